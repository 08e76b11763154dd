//! Output side of the terminal.
//!
//! Notifications may arrive while the user is typing. Every write goes through
//! one lock that clears the input line, prints, then redraws the prompt and the
//! partially typed input, so the visible line buffer is never corrupted.

use crossterm::{
    cursor, queue,
    style::Print,
    terminal::{self, Clear, ClearType},
};
use std::borrow::Cow;
use std::io::{self, StdoutLock, Write};
use std::sync::{Mutex, MutexGuard};
use tracing::trace;

pub trait Console: Send + Sync {
    /// Write text as-is.
    fn write(&self, text: &str);

    /// Write one line.
    fn print(&self, line: &str) {
        self.write(&format!("{line}\n"));
    }

    fn print_error(&self, line: &str);

    /// Install `prompt` and show it with the current input.
    fn show_prompt(&self, prompt: &str, echo: bool);

    /// Replace the prompt text, redrawing only if a prompt is on screen.
    fn update_prompt(&self, prompt: &str);

    /// Remove the prompt while a command runs.
    fn hide_prompt(&self);

    /// Draw a progress line over the previous one. A finished line stays on screen.
    fn progress(&self, line: &str, finished: bool);

    fn clear_screen(&self);

    fn width(&self) -> Option<u16>;
}

/// Center each line of `text` in `width` columns.
pub fn centered(text: &str, width: usize) -> String {
    text.lines()
        .map(|line| {
            ::console::pad_str(line, width, ::console::Alignment::Center, None)
                .trim_end()
                .to_string()
        })
        .collect::<Vec<_>>()
        .join("\n")
}

#[derive(Debug, Default)]
struct Screen {
    prompt: String,
    echo: bool,
    input: String,
    prompt_visible: bool,
    progress_visible: bool,
}

/// [`Console`] on the process's stdout.
///
/// In interactive mode the terminal is in raw mode, so newlines are written as
/// `\r\n` and the prompt line is redrawn after every write.
pub struct TerminalConsole {
    screen: Mutex<Screen>,
    interactive: bool,
}

impl TerminalConsole {
    pub fn new(interactive: bool) -> Self {
        Self {
            screen: Mutex::new(Screen::default()),
            interactive,
        }
    }

    fn screen(&self) -> MutexGuard<'_, Screen> {
        self.screen.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn draw<F>(&self, f: F)
    where
        F: FnOnce(&mut Screen, &mut StdoutLock<'_>) -> io::Result<()>,
    {
        let mut screen = self.screen();
        let mut out = io::stdout().lock();
        if let Err(e) = f(&mut screen, &mut out).and_then(|()| out.flush()) {
            trace!("terminal write failed: {e}");
        }
    }

    fn raw_text<'a>(&self, text: &'a str) -> Cow<'a, str> {
        if self.interactive && text.contains('\n') {
            Cow::Owned(text.replace("\r\n", "\n").replace('\n', "\r\n"))
        } else {
            Cow::Borrowed(text)
        }
    }

    /// The line being edited changed.
    pub fn set_input(&self, input: &str) {
        if !self.interactive {
            return;
        }
        self.draw(|screen, out| {
            screen.input = input.to_string();
            clear_line(out)?;
            redraw_prompt(screen, out)
        });
    }

    /// The edited line was submitted: leave it on screen and move below it.
    pub fn commit_input(&self) {
        if !self.interactive {
            return;
        }
        self.draw(|screen, out| {
            screen.input.clear();
            screen.prompt_visible = false;
            queue!(out, Print("\r\n"))
        });
    }

    fn write_styled(&self, text: &str) {
        let text = self.raw_text(text);
        self.draw(|screen, out| {
            if screen.prompt_visible || screen.progress_visible {
                clear_line(out)?;
            }
            screen.progress_visible = false;
            queue!(out, Print(&text))?;
            redraw_prompt(screen, out)
        });
    }
}

fn clear_line(out: &mut StdoutLock<'_>) -> io::Result<()> {
    queue!(out, cursor::MoveToColumn(0), Clear(ClearType::CurrentLine))
}

fn redraw_prompt(screen: &Screen, out: &mut StdoutLock<'_>) -> io::Result<()> {
    if screen.prompt_visible {
        queue!(out, Print(&screen.prompt))?;
        if screen.echo {
            queue!(out, Print(&screen.input))?;
        }
    }
    Ok(())
}

impl Console for TerminalConsole {
    fn write(&self, text: &str) {
        if self.interactive {
            self.write_styled(text);
        } else {
            let _screen = self.screen();
            let mut out = io::stdout().lock();
            let _ = out.write_all(text.as_bytes()).and_then(|()| out.flush());
        }
    }

    fn print_error(&self, line: &str) {
        if self.interactive {
            self.write_styled(&format!("{}\n", ::console::style(line).red()));
        } else {
            let _screen = self.screen();
            eprintln!("{line}");
        }
    }

    fn show_prompt(&self, prompt: &str, echo: bool) {
        if !self.interactive {
            let mut screen = self.screen();
            screen.prompt = prompt.to_string();
            let mut out = io::stdout().lock();
            let _ = write!(out, "{prompt}").and_then(|()| out.flush());
            return;
        }
        self.draw(|screen, out| {
            if screen.progress_visible {
                queue!(out, Print("\r\n"))?;
                screen.progress_visible = false;
            }
            screen.prompt = prompt.to_string();
            screen.echo = echo;
            screen.prompt_visible = true;
            clear_line(out)?;
            redraw_prompt(screen, out)
        });
    }

    fn update_prompt(&self, prompt: &str) {
        if !self.interactive {
            self.screen().prompt = prompt.to_string();
            return;
        }
        self.draw(|screen, out| {
            screen.prompt = prompt.to_string();
            if screen.prompt_visible {
                clear_line(out)?;
                redraw_prompt(screen, out)?;
            }
            Ok(())
        });
    }

    fn hide_prompt(&self) {
        if !self.interactive {
            return;
        }
        self.draw(|screen, out| {
            if screen.prompt_visible {
                clear_line(out)?;
                screen.prompt_visible = false;
            }
            Ok(())
        });
    }

    fn progress(&self, line: &str, finished: bool) {
        if !self.interactive {
            if finished {
                println!("{line}");
            }
            return;
        }
        self.draw(|screen, out| {
            clear_line(out)?;
            queue!(out, Print(line))?;
            if finished {
                queue!(out, Print("\r\n"))?;
                screen.progress_visible = false;
                redraw_prompt(screen, out)
            } else {
                screen.progress_visible = true;
                Ok(())
            }
        });
    }

    fn clear_screen(&self) {
        if !self.interactive {
            return;
        }
        self.draw(|screen, out| {
            queue!(out, Clear(ClearType::All), cursor::MoveTo(0, 0))?;
            screen.progress_visible = false;
            redraw_prompt(screen, out)
        });
    }

    fn width(&self) -> Option<u16> {
        terminal::size().ok().map(|(cols, _)| cols).filter(|cols| *cols > 0)
    }
}

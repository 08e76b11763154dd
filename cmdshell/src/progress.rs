//! Transfer progress line.

use cmdshell_ipc::PROGRESS_COMPLETE;
use human_repr::HumanCount;

pub const DEFAULT_TITLE: &str = "TRANSFERRING";

/// Highest percentage shown before the server reports completion.
const MAX_PARTIAL: f64 = 99.99;

/// Updates below this fraction of the total are noise left over from the previous transfer.
const STRAY_FRACTION: f64 = 0.001;

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProgressState {
    pub percentage: f64,
    pub finished: bool,
}

/// One line to draw.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressLine {
    pub title: String,
    pub completed: i64,
    pub total: i64,
    pub percentage: f64,
    /// The line is final and stays on screen; otherwise the next one overwrites it.
    pub finished: bool,
}

impl ProgressLine {
    /// `TITLE ||####....||(done/total: pct %)`, with the bar filling `width` columns.
    pub fn format(&self, width: usize) -> String {
        let done = (self.completed.max(0) as u64).human_count_bytes();
        let total = (self.total.max(0) as u64).human_count_bytes();
        let prefix = format!("{} ||", self.title);
        let suffix = format!("||({done}/{total}: {:.2} %)", self.percentage);

        let bar_width = width
            .saturating_sub(console::measure_text_width(&prefix))
            .saturating_sub(console::measure_text_width(&suffix));
        let filled = ((bar_width as f64) * self.percentage / 100.0) as usize;
        let filled = filled.min(bar_width);

        format!(
            "{prefix}{}{}{suffix}",
            "#".repeat(filled),
            ".".repeat(bar_width - filled)
        )
    }
}

/// Turns raw counters into non-regressing progress lines.
#[derive(Debug, Default)]
pub struct ProgressRenderer {
    state: ProgressState,
}

impl ProgressRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ProgressState {
        self.state
    }

    /// Start over for a new transfer.
    pub fn reset(&mut self) {
        self.state = ProgressState::default();
    }

    /// Returns the line to draw, or `None` when nothing should be redrawn.
    pub fn render(&mut self, completed: i64, total: i64, title: Option<&str>) -> Option<ProgressLine> {
        let title = title.unwrap_or(DEFAULT_TITLE).to_string();

        if completed == PROGRESS_COMPLETE {
            if self.state.finished {
                return None;
            }
            self.state = ProgressState {
                percentage: 100.0,
                finished: true,
            };
            let total = total.max(0);
            return Some(ProgressLine {
                title,
                completed: total,
                total,
                percentage: 100.0,
                finished: true,
            });
        }

        if self.state.finished || total < 0 {
            return None;
        }
        if (completed as f64) < (total as f64) * STRAY_FRACTION {
            return None;
        }

        let percentage = if total == 0 {
            0.0
        } else {
            (completed as f64 / total as f64 * 100.0).clamp(0.0, MAX_PARTIAL)
        };

        let previous = self.state.percentage;
        if percentage < previous || (percentage == previous && previous != 0.0) {
            return None;
        }
        self.state.percentage = percentage;

        Some(ProgressLine {
            title,
            completed,
            total,
            percentage,
            finished: false,
        })
    }
}

//! Where the server listens.

use std::fmt;
use std::path::{Path, PathBuf};

const APP_DIR: &str = "cmdshell";
const SOCKET_NAME: &str = "server.sock";

/// Server endpoint: a socket path on Unix, a pipe name on Windows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint(PathBuf);

impl Endpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self(path.into())
    }

    /// Default endpoint for the current user.
    pub fn default_for_user() -> Self {
        #[cfg(unix)]
        {
            Self(runtime_dir().join(SOCKET_NAME))
        }

        #[cfg(windows)]
        {
            let user = std::env::var("USERNAME").unwrap_or_else(|_| "default".to_string());
            Self(PathBuf::from(format!(r"\\.\pipe\{APP_DIR}_{user}")))
        }
    }

    pub fn as_path(&self) -> &Path {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.display())
    }
}

/// Per-user runtime directory shared by the shell and the server.
///
/// `$XDG_RUNTIME_DIR/cmdshell` when set, `/tmp/cmdshell-<uid>` otherwise.
pub fn runtime_dir() -> PathBuf {
    runtime_dir_from(std::env::var_os("XDG_RUNTIME_DIR").map(PathBuf::from))
}

fn runtime_dir_from(xdg_runtime: Option<PathBuf>) -> PathBuf {
    match xdg_runtime {
        Some(dir) if !dir.as_os_str().is_empty() => dir.join(APP_DIR),
        _ => std::env::temp_dir().join(format!("{APP_DIR}-{}", user_id())),
    }
}

#[cfg(unix)]
fn user_id() -> u32 {
    nix::unistd::getuid().as_raw()
}

#[cfg(not(unix))]
fn user_id() -> u32 {
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_runtime_dir_prefers_xdg() {
        let dir = runtime_dir_from(Some(PathBuf::from("/run/user/1000")));
        assert_eq!(dir, PathBuf::from("/run/user/1000/cmdshell"));
    }

    #[test]
    fn test_runtime_dir_falls_back_to_tmp() {
        let dir = runtime_dir_from(Some(PathBuf::new()));
        let name = dir.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("cmdshell-"), "got {name}");
        assert_eq!(runtime_dir_from(None), dir);
    }

    #[cfg(unix)]
    #[test]
    fn test_default_endpoint_is_socket_file() {
        let endpoint = Endpoint::default_for_user();
        assert_eq!(endpoint.as_path().file_name().unwrap(), SOCKET_NAME);
    }
}

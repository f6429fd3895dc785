//! Where roster keeps its files.
//!
//! Both directories follow the XDG base directory layout on every platform.
//! A daemon restarted from another shell or service manager resolves the
//! same snapshot as long as it sees the same `XDG_*` variables and home.
//!
//! | Directory      | Variable          | Fallback                 |
//! |----------------|-------------------|--------------------------|
//! | [`config_dir`] | `XDG_CONFIG_HOME` | `~/.config/roster`       |
//! | [`data_dir`]   | `XDG_DATA_HOME`   | `~/.local/share/roster`  |

use std::ffi::OsString;
use std::path::{Path, PathBuf};

/// Subdirectory created under each base directory.
const APP_DIR: &str = "roster";

/// File name of the session snapshot inside [`data_dir`].
pub const SNAPSHOT_FILE: &str = "sessions.snapshot";

/// File name of the registry config inside [`config_dir`].
pub const CONFIG_FILE: &str = "roster.toml";

/// Pick the base directory for one XDG variable.
///
/// Empty or relative values are ignored. Without a home directory the
/// fallback is relative to the working directory.
fn resolve(xdg: Option<OsString>, home: Option<PathBuf>, home_relative: &str) -> PathBuf {
    let base = xdg
        .map(PathBuf::from)
        .filter(|p| p.is_absolute())
        .unwrap_or_else(|| home.unwrap_or_default().join(Path::new(home_relative)));
    base.join(APP_DIR)
}

/// Directory holding `roster.toml`.
pub fn config_dir() -> PathBuf {
    resolve(
        std::env::var_os("XDG_CONFIG_HOME"),
        dirs::home_dir(),
        ".config",
    )
}

/// Directory holding session snapshots.
pub fn data_dir() -> PathBuf {
    resolve(
        std::env::var_os("XDG_DATA_HOME"),
        dirs::home_dir(),
        ".local/share",
    )
}

/// Default location of the session snapshot.
pub fn snapshot_path() -> PathBuf {
    data_dir().join(SNAPSHOT_FILE)
}

/// Default location of the registry config file.
pub fn config_path() -> PathBuf {
    config_dir().join(CONFIG_FILE)
}

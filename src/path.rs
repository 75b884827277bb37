// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Path resolution utilities.
//!
//! Determine relevent path information for both sides of a deployment. Local
//! paths are plain [`PathBuf`]s. Remote paths are always POSIX strings, no
//! matter what platform Boss itself runs on, so they get their own small set
//! of helpers that never touch [`std::path`].

use std::path::PathBuf;

/// Default name of the configuration file looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "boss.toml";

/// Determine absolute path to user's home directory.
///
/// Does not check if the path returned actually exists.
///
/// # Errors
///
/// - Return [`NoWayHome`] if home directory path cannot be determined.
pub fn home_dir() -> Result<PathBuf> {
    dirs::home_dir().ok_or(NoWayHome)
}

/// Determine default path to configuration file.
pub fn default_config_file() -> PathBuf {
    PathBuf::from(DEFAULT_CONFIG_FILE)
}

/// Resolve remote path against remote working directory.
///
/// Absolute paths are kept. `~` and `~/...` expand to the working directory,
/// which is the remote home, and any other relative path is joined onto it.
/// Paths like `~bob/...` are left alone, because there is no way to know where
/// another user's home lives without asking the remote.
pub fn resolve_remote_path(path: &str, cwd: &str) -> String {
    if path.starts_with('/') || (path.starts_with('~') && !is_own_home(path)) {
        return path.to_string();
    }

    let rest = path
        .strip_prefix('~')
        .unwrap_or(path)
        .trim_start_matches("./")
        .trim_start_matches('/');
    match rest {
        "" | "." => cwd.to_string(),
        rest => remote_join(cwd, rest),
    }
}

fn is_own_home(path: &str) -> bool {
    path == "~" || path.starts_with("~/")
}

/// Join two remote path segments with exactly one separator.
pub fn remote_join(base: &str, segment: &str) -> String {
    let segment = segment.trim_start_matches('/');
    if segment.is_empty() || segment == "." {
        return base.to_string();
    }

    format!("{}/{segment}", base.trim_end_matches('/'))
}

/// Parent directory of remote path.
///
/// Return `None` for a bare file name with no parent component.
pub fn remote_parent(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some(("", _)) => Some("/"),
        Some((parent, _)) => Some(parent),
        None => None,
    }
}

/// No way to determine user's home directory.
///
/// # See Also
///
/// - [`dirs::home_dir`](https://docs.rs/dirs/latest/dirs/fn.home_dir.html)
#[derive(Clone, Debug, thiserror::Error)]
#[error("cannot determine absolute path to user's home directory")]
pub struct NoWayHome;

/// Friendly result alias :3
pub type Result<T, E = NoWayHome> = std::result::Result<T, E>;

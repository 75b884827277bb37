// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote host access.
//!
//! Everything Boss does to a deployment target goes through the [`Remote`]
//! trait: executing shell commands, checking paths, and moving bytes. The
//! lifecycle manager never talks to SSH directly, so the same release logic
//! runs against a real host through [`SshRemote`], or against the local
//! machine through [`LocalRemote`].
//!
//! # Round Trips
//!
//! Every call on a remote is at least one network round trip. Multi-step
//! shell sequences should be sent through [`Remote::run_all`], which joins
//! them into a single invocation that stops at the first failing command.
//!
//! # Remote Paths
//!
//! Remote paths are plain POSIX strings. SFTP does not understand `~`, and a
//! relative symlink target resolves against the link's own directory, so any
//! path that may start with a home marker or be relative must go through
//! [`Remote::normalize_path`] first. The remote working directory used for
//! that expansion is resolved once per handle and memoized.

pub mod local;
pub mod ssh;

pub use local::LocalRemote;
pub use ssh::{SessionPool, SshRemote, SshTarget};

use crate::{
    path::resolve_remote_path,
    transfer::{DirectoryUploader, ProgressReporter, TransferError},
};

use std::path::Path;

/// Remote host that can execute commands and transfer files.
pub trait Remote {
    /// Identity of the remote host, e.g., `app@example.com:22`.
    fn identity(&self) -> &str;

    /// Execute one command and return its trimmed, non-empty stdout lines.
    ///
    /// # Errors
    ///
    /// - Return [`RemoteError::Channel`] if the channel errors.
    /// - Return [`RemoteError::Command`] if the command exits non-zero.
    fn run(&self, command: &str) -> Result<Vec<String>>;

    /// Working directory of remote session.
    ///
    /// Resolved lazily on first use, then served from memory.
    fn cwd(&self) -> Result<&str>;

    /// Check if remote path exists.
    ///
    /// A missing path is `false`, not an error.
    fn exists(&self, path: &str) -> Result<bool>;

    /// Check if remote path exists and is a directory.
    fn is_dir(&self, path: &str) -> Result<bool>;

    /// Read remote file in full.
    fn read_file(&self, path: &str) -> Result<Vec<u8>>;

    /// Write remote file in full, replacing whatever was there.
    fn write_file(&self, path: &str, data: &[u8]) -> Result<()>;

    /// Upload local file to remote path.
    ///
    /// The progress callback receives `(sent, total)` byte counts.
    fn upload(&self, local: &Path, remote: &str, progress: &mut dyn FnMut(u64, u64))
        -> Result<()>;

    /// Execute several commands in one round trip.
    ///
    /// Commands are joined with `&&`, so the batch stops at the first failure.
    fn run_all(&self, commands: &[String]) -> Result<Vec<String>> {
        self.run(&join_commands(commands))
    }

    /// Make remote path absolute against remote working directory.
    ///
    /// A leading `~` and any other relative path both resolve against the
    /// working directory. Absolute paths come back unchanged.
    fn normalize_path(&self, path: &str) -> Result<String> {
        if path.starts_with('/') {
            return Ok(path.to_string());
        }

        Ok(resolve_remote_path(path, self.cwd()?))
    }

    /// List entry names of remote directory.
    fn list_dir(&self, path: &str) -> Result<Vec<String>> {
        self.run(&format!("ls -1 {}", quote(path)))
    }

    /// Upload local directory to remote directory.
    ///
    /// The directory is compressed, uploaded once, and extracted remotely. The
    /// contents of `local_dir` end up directly inside `remote_dir`.
    fn upload_dir(
        &self,
        local_dir: &Path,
        remote_dir: &str,
        reporter: &mut dyn ProgressReporter,
    ) -> std::result::Result<(), TransferError> {
        DirectoryUploader::new(local_dir).upload(self, remote_dir, reporter)
    }
}

/// Join shell commands into one invocation.
pub fn join_commands(commands: &[String]) -> String {
    commands.join(" && ")
}

/// Quote a shell argument for POSIX `sh`.
///
/// Arguments made only of characters that the shell never interprets are
/// left as is to keep logged commands readable.
pub fn quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+=:,@%".contains(c));
    if plain {
        return arg.to_string();
    }

    format!("'{}'", arg.replace('\'', r"'\''"))
}

/// Split raw command output into trimmed, non-empty lines.
pub(crate) fn output_lines(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_owned)
        .collect()
}

/// All possible error types for remote host interaction.
#[derive(Debug, thiserror::Error)]
pub enum RemoteError {
    /// TCP connection or SSH handshake failed.
    #[error("failed to connect to {host}")]
    Connect {
        host: String,
        #[source]
        source: std::io::Error,
    },

    /// No authentication method was accepted.
    #[error("failed to authenticate as {user} on {host}")]
    Authenticate {
        user: String,
        host: String,
        #[source]
        source: ssh2::Error,
    },

    /// Session or SFTP channel errored.
    #[error("channel to {host} failed")]
    Channel {
        host: String,
        #[source]
        source: ssh2::Error,
    },

    /// Remote command exited unsuccessfully.
    #[error("command {command:?} on {host} exited with status {status}: {stderr}")]
    Command {
        host: String,
        command: String,
        status: i32,
        stderr: String,
    },

    /// File level I/O on remote path failed.
    #[error("failed to access {path:?} on {host}")]
    Io {
        host: String,
        path: String,
        #[source]
        source: std::io::Error,
    },
}

/// Friendly result alias :3
pub type Result<T, E = RemoteError> = std::result::Result<T, E>;

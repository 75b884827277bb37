// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote host access on the local machine.
//!
//! [`LocalRemote`] fulfills the same contract as an SSH remote, but runs
//! commands through the local `sh` and touches the local filesystem. The home
//! directory that `~` expands to is fixed at construction, which makes it
//! possible to point a whole deployment at a scratch directory.

use crate::remote::{output_lines, Remote, RemoteError, Result};

use std::{
    fs::{self, File},
    io::{ErrorKind, Read, Write},
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, instrument};

const CHUNK_SIZE: usize = 32 * 1024;

/// Remote host that is really the local machine.
#[derive(Debug, Clone)]
pub struct LocalRemote {
    identity: String,
    home: String,
}

impl LocalRemote {
    /// Construct new local remote whose home directory is `home`.
    ///
    /// Commands run with `home` as their working directory.
    pub fn new(home: impl Into<PathBuf>) -> Self {
        let home = home.into().to_string_lossy().into_owned();
        Self {
            identity: format!("local:{home}"),
            home,
        }
    }

    fn io_error(&self, path: impl Into<String>, source: std::io::Error) -> RemoteError {
        RemoteError::Io {
            host: self.identity.clone(),
            path: path.into(),
            source,
        }
    }
}

impl Remote for LocalRemote {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn run(&self, command: &str) -> Result<Vec<String>> {
        debug!("{}$ {command}", self.identity);
        let output = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.home)
            .output()
            .map_err(|source| self.io_error(command, source))?;

        if !output.status.success() {
            return Err(RemoteError::Command {
                host: self.identity.clone(),
                command: command.to_string(),
                status: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(output_lines(&String::from_utf8_lossy(&output.stdout)))
    }

    fn cwd(&self) -> Result<&str> {
        Ok(&self.home)
    }

    fn exists(&self, path: &str) -> Result<bool> {
        match fs::metadata(path) {
            Ok(_) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(self.io_error(path, err)),
        }
    }

    fn is_dir(&self, path: &str) -> Result<bool> {
        match fs::metadata(path) {
            Ok(meta) => Ok(meta.is_dir()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(self.io_error(path, err)),
        }
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        fs::read(path).map_err(|source| self.io_error(path, source))
    }

    fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        fs::write(path, data).map_err(|source| self.io_error(path, source))
    }

    #[instrument(skip(self, progress), level = "debug")]
    fn upload(
        &self,
        local: &Path,
        remote: &str,
        progress: &mut dyn FnMut(u64, u64),
    ) -> Result<()> {
        let local_name = local.display().to_string();
        let mut source =
            File::open(local).map_err(|source| self.io_error(local_name.as_str(), source))?;
        let total = source
            .metadata()
            .map_err(|source| self.io_error(local_name.as_str(), source))?
            .len();
        let mut target = File::create(remote).map_err(|source| self.io_error(remote, source))?;

        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut sent = 0u64;
        progress(sent, total);
        loop {
            let count = source
                .read(&mut buffer)
                .map_err(|source| self.io_error(local_name.as_str(), source))?;
            if count == 0 {
                break;
            }

            target
                .write_all(&buffer[..count])
                .map_err(|source| self.io_error(remote, source))?;
            sent += count as u64;
            progress(sent, total);
        }

        Ok(())
    }
}

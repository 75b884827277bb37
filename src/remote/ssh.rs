// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote host access over SSH.
//!
//! Each [`SshRemote`] owns exactly one SSH session, and lazily opens exactly
//! one SFTP sub-channel on top of it. Both stay open for the lifetime of the
//! handle. A [`SessionPool`] hands out one shared handle per remote host
//! identity, so repeated operations against the same host reuse the same
//! session instead of reconnecting.

use crate::{
    config::ConnectionSettings,
    remote::{output_lines, Remote, RemoteError, Result},
};

use ssh2::{ErrorCode, FileStat, Session, Sftp};
use std::{
    cell::{OnceCell, RefCell},
    collections::HashMap,
    fmt::{Debug, Formatter, Result as FmtResult},
    fs::File,
    io::{Read, Write},
    net::TcpStream,
    path::{Path, PathBuf},
    rc::Rc,
    time::Duration,
};
use tracing::{debug, info, instrument};

/// SFTP status code for a path that does not exist.
const SFTP_NO_SUCH_FILE: i32 = 2;

/// libssh2 error code for rejected authentication.
const SESSION_AUTHENTICATION_FAILED: i32 = -18;

const CHUNK_SIZE: usize = 32 * 1024;

/// Where and how to connect over SSH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshTarget {
    /// Host name or address of remote.
    pub host: String,

    /// SSH port of remote.
    pub port: u16,

    /// User to log in as.
    pub user: String,

    /// Private key to fall back to when the SSH agent cannot authenticate.
    pub key_filename: Option<PathBuf>,

    /// Timeout applied to every blocking session call.
    pub timeout: Option<Duration>,
}

impl SshTarget {
    /// Identity of remote host, i.e., `user@host:port`.
    pub fn identity(&self) -> String {
        format!("{}@{}:{}", self.user, self.host, self.port)
    }
}

impl From<&ConnectionSettings> for SshTarget {
    fn from(settings: &ConnectionSettings) -> Self {
        Self {
            host: settings.host.clone(),
            port: settings.port,
            user: settings.user.clone(),
            key_filename: settings.key_filename.clone(),
            timeout: settings.timeout_ms.map(Duration::from_millis),
        }
    }
}

/// Remote host reached through one SSH session.
pub struct SshRemote {
    identity: String,
    session: Session,
    sftp: OnceCell<Sftp>,
    cwd: OnceCell<String>,
}

impl SshRemote {
    /// Open new session to target.
    ///
    /// Authenticates through the SSH agent first, then falls back to the
    /// target's key file if one was given.
    ///
    /// # Errors
    ///
    /// - Return [`RemoteError::Connect`] if TCP connection or handshake fails.
    /// - Return [`RemoteError::Authenticate`] if no method is accepted.
    #[instrument(skip(target), fields(host = %target.host), level = "debug")]
    pub fn connect(target: &SshTarget) -> Result<Self> {
        let identity = target.identity();
        info!("connecting to {identity}");

        let tcp = TcpStream::connect((target.host.as_str(), target.port)).map_err(|source| {
            RemoteError::Connect {
                host: identity.clone(),
                source,
            }
        })?;

        let mut session = Session::new().map_err(|source| RemoteError::Channel {
            host: identity.clone(),
            source,
        })?;
        if let Some(timeout) = target.timeout {
            session.set_timeout(u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX));
        }
        session.set_tcp_stream(tcp);
        session.handshake().map_err(|source| RemoteError::Connect {
            host: identity.clone(),
            source: source.into(),
        })?;

        authenticate(&session, target)?;
        debug!("session established with {identity}");

        Ok(Self {
            identity,
            session,
            sftp: OnceCell::new(),
            cwd: OnceCell::new(),
        })
    }

    fn sftp(&self) -> Result<&Sftp> {
        if let Some(sftp) = self.sftp.get() {
            return Ok(sftp);
        }

        debug!("opening sftp channel on {}", self.identity);
        let sftp = self
            .session
            .sftp()
            .map_err(|source| self.channel_error(source))?;

        Ok(self.sftp.get_or_init(|| sftp))
    }

    fn stat(&self, path: &str) -> Result<Option<FileStat>> {
        match self.sftp()?.stat(Path::new(path)) {
            Ok(stat) => Ok(Some(stat)),
            Err(err) if matches!(err.code(), ErrorCode::SFTP(SFTP_NO_SUCH_FILE)) => Ok(None),
            Err(err) => Err(self.io_error(path, err.into())),
        }
    }

    fn channel_error(&self, source: ssh2::Error) -> RemoteError {
        RemoteError::Channel {
            host: self.identity.clone(),
            source,
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

impl Remote for SshRemote {
    fn identity(&self) -> &str {
        &self.identity
    }

    fn run(&self, command: &str) -> Result<Vec<String>> {
        debug!("{}$ {command}", self.identity);
        let mut channel = self
            .session
            .channel_session()
            .map_err(|source| self.channel_error(source))?;
        channel
            .exec(command)
            .map_err(|source| self.channel_error(source))?;

        let mut stdout = String::new();
        channel
            .read_to_string(&mut stdout)
            .map_err(|source| self.io_error(command, source))?;
        let mut stderr = String::new();
        channel
            .stderr()
            .read_to_string(&mut stderr)
            .map_err(|source| self.io_error(command, source))?;

        channel
            .wait_close()
            .map_err(|source| self.channel_error(source))?;
        let status = channel
            .exit_status()
            .map_err(|source| self.channel_error(source))?;

        if status != 0 {
            return Err(RemoteError::Command {
                host: self.identity.clone(),
                command: command.to_string(),
                status,
                stderr: stderr.trim().to_string(),
            });
        }

        Ok(output_lines(&stdout))
    }

    fn cwd(&self) -> Result<&str> {
        if let Some(cwd) = self.cwd.get() {
            return Ok(cwd);
        }

        let cwd = self
            .run("pwd")?
            .into_iter()
            .next()
            .unwrap_or_else(|| "/".to_string());
        debug!("remote working directory of {} is {cwd}", self.identity);

        Ok(self.cwd.get_or_init(|| cwd))
    }

    fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.stat(path)?.is_some())
    }

    fn is_dir(&self, path: &str) -> Result<bool> {
        Ok(self.stat(path)?.is_some_and(|stat| stat.is_dir()))
    }

    fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let mut file = self
            .sftp()?
            .open(Path::new(path))
            .map_err(|err| self.io_error(path, err.into()))?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)
            .map_err(|source| self.io_error(path, source))?;

        Ok(data)
    }

    fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let mut file = self
            .sftp()?
            .create(Path::new(path))
            .map_err(|err| self.io_error(path, err.into()))?;

        file.write_all(data)
            .map_err(|source| self.io_error(path, source))
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

        let mut target = self
            .sftp()?
            .create(Path::new(remote))
            .map_err(|err| self.io_error(remote, err.into()))?;

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

impl Debug for SshRemote {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.debug_struct("SshRemote")
            .field("identity", &self.identity)
            .field("sftp_open", &self.sftp.get().is_some())
            .field("cwd", &self.cwd.get())
            .finish()
    }
}

fn authenticate(session: &Session, target: &SshTarget) -> Result<()> {
    let mut failure = match session.userauth_agent(&target.user) {
        Ok(()) if session.authenticated() => {
            debug!("authenticated through ssh agent");
            return Ok(());
        }
        Ok(()) => ssh2::Error::new(
            ErrorCode::Session(SESSION_AUTHENTICATION_FAILED),
            "ssh agent did not authenticate session",
        ),
        Err(err) => err,
    };

    if let Some(key) = &target.key_filename {
        debug!("authenticating with key file {}", key.display());
        match session.userauth_pubkey_file(&target.user, None, key, None) {
            Ok(()) if session.authenticated() => return Ok(()),
            Ok(()) => {}
            Err(err) => failure = err,
        }
    }

    Err(RemoteError::Authenticate {
        user: target.user.clone(),
        host: target.host.clone(),
        source: failure,
    })
}

/// One shared SSH handle per remote host identity.
///
/// The pool is an explicit value owned by the caller. Whoever needs a remote
/// asks the pool instead of opening their own session.
#[derive(Debug, Default)]
pub struct SessionPool {
    sessions: RefCell<HashMap<String, Rc<SshRemote>>>,
}

impl SessionPool {
    /// Construct new empty session pool.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get session for target, connecting only if none exists yet.
    ///
    /// # Errors
    ///
    /// - Return [`RemoteError`] if a new connection must be made and fails.
    pub fn connect(&self, target: &SshTarget) -> Result<Rc<SshRemote>> {
        let identity = target.identity();
        if let Some(remote) = self.sessions.borrow().get(&identity) {
            debug!("reusing session to {identity}");
            return Ok(Rc::clone(remote));
        }

        let remote = Rc::new(SshRemote::connect(target)?);
        self.sessions
            .borrow_mut()
            .insert(identity, Rc::clone(&remote));

        Ok(remote)
    }

    /// Number of open sessions.
    pub fn len(&self) -> usize {
        self.sessions.borrow().len()
    }

    /// Check if no session has been opened yet.
    pub fn is_empty(&self) -> bool {
        self.sessions.borrow().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn target_identity_names_user_host_and_port() {
        let target = SshTarget {
            host: "example.com".into(),
            port: 2222,
            user: "deploy".into(),
            key_filename: None,
            timeout: None,
        };

        assert_eq!(target.identity(), "deploy@example.com:2222");
    }

    #[test]
    fn target_from_connection_settings() {
        let settings = ConnectionSettings {
            host: "10.0.0.5".into(),
            port: 22,
            user: "app".into(),
            key_filename: Some(PathBuf::from("/home/me/.ssh/id_ed25519")),
            timeout_ms: Some(1500),
        };

        let result = SshTarget::from(&settings);
        let expect = SshTarget {
            host: "10.0.0.5".into(),
            port: 22,
            user: "app".into(),
            key_filename: Some(PathBuf::from("/home/me/.ssh/id_ed25519")),
            timeout: Some(Duration::from_millis(1500)),
        };

        assert_eq!(result, expect);
    }

    #[test]
    fn new_pool_has_no_sessions() {
        let pool = SessionPool::new();
        assert!(pool.is_empty());
        assert_eq!(pool.len(), 0);
    }
}

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Deployment hooks.
//!
//! Scripts are named shell commands from the `[scripts]` table of the
//! configuration file. Presets run them around a deployment, either on the
//! local machine (e.g., `build`) or on the remote inside some directory (e.g.,
//! `reload`). The stage being deployed is exported to every script as
//! `STAGE`.

use crate::remote::{quote, Remote, RemoteError};

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    process::Command,
};
use tracing::{debug, info, instrument};

/// Script run before anything else happens.
pub const PRE_DEPLOY: &str = "pre_deploy";

/// Script run after the new build is live.
pub const POST_DEPLOY: &str = "post_deploy";

/// Install dependencies locally, or on a remote source checkout.
pub const INSTALL: &str = "install";

/// Install dependencies inside a new release on the remote.
pub const INSTALL_REMOTE: &str = "install_remote";

/// Build the project.
pub const BUILD: &str = "build";

/// Reload the running service.
pub const RELOAD: &str = "reload";

/// Start the service, or reload it if it already runs.
pub const START_OR_RELOAD: &str = "start_or_reload";

/// Report health of the running service.
pub const STATUS_CHECK: &str = "status_check";

/// Where a script executes.
#[derive(Clone, Copy)]
pub enum Target<'r> {
    /// Local machine, in the runner's local directory.
    Local,

    /// Remote host, inside a directory.
    Remote { remote: &'r dyn Remote, dir: &'r str },
}

impl std::fmt::Debug for Target<'_> {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => fmt.write_str("Local"),
            Self::Remote { remote, dir } => write!(fmt, "Remote({}:{dir})", remote.identity()),
        }
    }
}

/// Run configured scripts for one stage.
#[derive(Debug, Clone)]
pub struct ScriptRunner<'c> {
    scripts: &'c BTreeMap<String, String>,
    stage: &'c str,
    local_dir: PathBuf,
}

impl<'c> ScriptRunner<'c> {
    /// Construct new script runner over configured scripts.
    ///
    /// Local scripts run in the current working directory.
    pub fn new(scripts: &'c BTreeMap<String, String>, stage: &'c str) -> Self {
        Self {
            scripts,
            stage,
            local_dir: PathBuf::from("."),
        }
    }

    /// Run local scripts in a different directory.
    pub fn with_local_dir(mut self, local_dir: impl AsRef<Path>) -> Self {
        self.local_dir = local_dir.as_ref().to_path_buf();
        self
    }

    /// Check if script is configured.
    pub fn is_script_defined(&self, name: &str) -> bool {
        self.scripts.contains_key(name)
    }

    /// Run script and wait for it to finish.
    ///
    /// # Errors
    ///
    /// - Return [`ScriptError::Missing`] if script is not configured.
    /// - Return [`ScriptError::Spawn`] if local shell cannot be started.
    /// - Return [`ScriptError::Failed`] if script exits unsuccessfully.
    /// - Return [`ScriptError::Remote`] if remote cannot be reached.
    #[instrument(skip(self), level = "debug")]
    pub fn run_script(&self, name: &str, target: Target<'_>) -> Result<()> {
        let command = self
            .scripts
            .get(name)
            .ok_or_else(|| ScriptError::Missing {
                name: name.to_string(),
            })?;
        info!("Running script {name}");

        match target {
            Target::Local => self.run_local(name, command),
            Target::Remote { remote, dir } => self.run_remote(name, command, remote, dir),
        }
    }

    /// Run script only if it is configured.
    ///
    /// # Errors
    ///
    /// - Return any error of [`ScriptRunner::run_script`] except
    ///   [`ScriptError::Missing`].
    pub fn run_script_safely(&self, name: &str, target: Target<'_>) -> Result<()> {
        if !self.is_script_defined(name) {
            debug!("script {name} is not defined, skipping");
            return Ok(());
        }

        self.run_script(name, target)
    }

    fn run_local(&self, name: &str, command: &str) -> Result<()> {
        debug!("$ {command}");
        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .current_dir(&self.local_dir)
            .env("STAGE", self.stage)
            .status()
            .map_err(|source| ScriptError::Spawn {
                name: name.to_string(),
                source,
            })?;

        if !status.success() {
            return Err(ScriptError::Failed {
                name: name.to_string(),
                status: status.code().unwrap_or(-1),
                stderr: String::new(),
            });
        }

        Ok(())
    }

    fn run_remote(&self, name: &str, command: &str, remote: &dyn Remote, dir: &str) -> Result<()> {
        let dir = remote.normalize_path(dir)?;
        let output = remote
            .run(&format!(
                "cd {} && export STAGE={} && {command}",
                quote(&dir),
                quote(self.stage)
            ))
            .map_err(|error| match error {
                RemoteError::Command { status, stderr, .. } => ScriptError::Failed {
                    name: name.to_string(),
                    status,
                    stderr,
                },
                error => ScriptError::Remote(error),
            })?;

        for line in output {
            info!("{}: {line}", remote.identity());
        }

        Ok(())
    }
}

/// All possible error types for running scripts.
#[derive(Debug, thiserror::Error)]
pub enum ScriptError {
    /// Script is not configured.
    #[error("missing script {name:?}")]
    Missing { name: String },

    /// Local shell cannot be started.
    #[error("failed to start script {name:?}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Script exited unsuccessfully.
    #[error("script {name:?} exited with status {status}: {stderr}")]
    Failed {
        name: String,
        status: i32,
        stderr: String,
    },

    /// Remote cannot be reached.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Friendly result alias :3
pub type Result<T, E = ScriptError> = std::result::Result<T, E>;

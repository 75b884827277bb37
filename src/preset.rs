// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Deployment strategies.
//!
//! A preset decides how a project gets from the local machine to its remote
//! host. All presets share the same set of operations, but not all of them
//! support every operation, e.g., a remote source checkout has no release
//! directories to roll back to.
//!
//! # Available Presets
//!
//! - [`RemoteSourcePreset`]: the remote holds a Git checkout, which is synced
//!   and rebuilt in place.
//! - [`WebPreset`]: static files are built locally, then released as is.
//! - [`NodePreset`]: a Node service is built locally, released along with its
//!   package files, then installed and reloaded on the remote.

pub mod node;
pub mod remote_source;
pub mod web;

pub use node::NodePreset;
pub use remote_source::RemoteSourcePreset;
pub use web::WebPreset;

use crate::{
    buildman::{BuildError, BuildManager},
    config::Config,
    history::{BuildHistory, BuildId, BuildRecord},
    notify::{DeploymentContext, NotificationEvent, Notifications},
    remote::{Remote, RemoteError},
    script::{ScriptError, ScriptRunner},
    transfer::ProgressReporter,
    vcs::VcsInfo,
};

use serde::{Deserialize, Serialize};
use std::{
    cell::RefCell,
    env,
    fmt::{Display, Formatter, Result as FmtResult},
    path::PathBuf,
    str::FromStr,
};

/// Closed set of deployment strategies.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum PresetKind {
    #[default]
    RemoteSource,
    Web,
    Node,
}

impl Display for PresetKind {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::RemoteSource => fmt.write_str("remote-source"),
            Self::Web => fmt.write_str("web"),
            Self::Node => fmt.write_str("node"),
        }
    }
}

impl FromStr for PresetKind {
    type Err = PresetError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name {
            "remote-source" => Ok(Self::RemoteSource),
            "web" => Ok(Self::Web),
            "node" => Ok(Self::Node),
            _ => Err(PresetError::UnknownPreset {
                name: name.to_string(),
            }),
        }
    }
}

/// Build of history along with whether it is live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildInfo {
    pub record: BuildRecord,
    pub is_current: bool,
}

/// Operations every deployment strategy offers.
pub trait Preset {
    /// Prepare remote for deployments.
    fn setup(&self) -> Result<()>;

    /// Deploy project.
    fn deploy(&self) -> Result<()>;

    /// Make an earlier build live again.
    fn rollback(&self, id: Option<&BuildId>) -> Result<BuildRecord>;

    /// Build history of remote.
    fn builds(&self) -> Result<BuildHistory>;

    /// Find build by identifier, or the live build if none is given.
    fn build_info(&self, id: Option<&BuildId>) -> Result<Option<BuildInfo>>;

    /// Report state of deployed project.
    fn status(&self) -> Result<()>;

    /// Restart deployed service.
    fn restart(&self) -> Result<()>;
}

/// Everything a preset needs to deploy one stage.
pub struct Deployment<'a> {
    /// Resolved configuration of stage.
    pub config: &'a Config,

    /// Remote of stage.
    pub remote: &'a dyn Remote,

    /// Notifiers of stage.
    pub notifications: &'a Notifications,

    /// Operator deploying.
    pub user: String,

    /// Local project directory.
    pub project_dir: PathBuf,

    reporter: RefCell<Box<dyn ProgressReporter + 'a>>,
}

impl<'a> Deployment<'a> {
    /// Construct new deployment context.
    pub fn new(
        config: &'a Config,
        remote: &'a dyn Remote,
        notifications: &'a Notifications,
        reporter: impl ProgressReporter + 'a,
    ) -> Self {
        Self {
            config,
            remote,
            notifications,
            user: operator(),
            project_dir: PathBuf::from("."),
            reporter: RefCell::new(Box::new(reporter)),
        }
    }

    /// Use different local project directory.
    pub fn with_project_dir(mut self, project_dir: impl Into<PathBuf>) -> Self {
        self.project_dir = project_dir.into();
        self
    }

    /// Use different operator identity.
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = user.into();
        self
    }

    /// Build manager of stage.
    pub fn build_manager(&self) -> BuildManager<'a, dyn Remote + 'a> {
        BuildManager::from_settings(self.remote, &self.config.deployment)
    }

    /// Script runner of stage.
    pub fn scripts(&self) -> ScriptRunner<'a> {
        ScriptRunner::new(&self.config.scripts, &self.config.stage)
            .with_local_dir(&self.project_dir)
    }

    /// Version control information of local project.
    pub fn vcs(&self) -> VcsInfo {
        VcsInfo::discover(&self.project_dir)
    }

    /// Deployment context for notifications.
    pub fn context(&self, branch: Option<String>, commit: Option<String>) -> DeploymentContext {
        DeploymentContext {
            user: self.user.clone(),
            branch,
            commit,
            stage: self.config.stage.clone(),
        }
    }

    /// Send notification.
    pub fn notify(&self, event: NotificationEvent, context: &DeploymentContext) {
        self.notifications.send(event, context);
    }

    /// Run closure with progress reporter of deployment.
    pub fn with_reporter<T>(&self, f: impl FnOnce(&mut dyn ProgressReporter) -> T) -> T {
        let mut reporter = self.reporter.borrow_mut();
        f(&mut **reporter)
    }
}

impl std::fmt::Debug for Deployment<'_> {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.debug_struct("Deployment")
            .field("stage", &self.config.stage)
            .field("remote", &self.remote.identity())
            .field("user", &self.user)
            .field("project_dir", &self.project_dir)
            .finish()
    }
}

/// Select preset implementation.
pub fn select<'a>(kind: PresetKind, deployment: Deployment<'a>) -> Box<dyn Preset + 'a> {
    match kind {
        PresetKind::RemoteSource => Box::new(RemoteSourcePreset::new(deployment)),
        PresetKind::Web => Box::new(WebPreset::new(deployment)),
        PresetKind::Node => Box::new(NodePreset::new(deployment)),
    }
}

/// Identity of operator running Boss.
pub fn operator() -> String {
    env::var("USER")
        .or_else(|_| env::var("USERNAME"))
        .ok()
        .filter(|user| !user.is_empty())
        .unwrap_or_else(|| "unknown".into())
}

/// Build information from history.
pub(crate) fn build_info(history: &BuildHistory, id: Option<&BuildId>) -> Option<BuildInfo> {
    let record = match id {
        Some(id) => history.find_by_id(id),
        None => history.find_current(),
    }?;

    Some(BuildInfo {
        is_current: history.current.as_ref() == Some(&record.id),
        record: record.clone(),
    })
}

/// All possible error types for presets.
#[derive(Debug, thiserror::Error)]
pub enum PresetError {
    /// Preset name is not known.
    #[error("unknown preset {name:?}, preset should be one of remote-source, web, node")]
    UnknownPreset { name: String },

    /// Preset does not offer operation.
    #[error("preset {preset} does not support {operation}")]
    Unsupported {
        preset: PresetKind,
        operation: &'static str,
    },

    /// Local build output is missing.
    #[error("build directory {:?} does not exist, did the build run?", path.display())]
    BuildDirMissing { path: PathBuf },

    /// Remote project directory is missing.
    #[error("application directory {path:?} does not exist on remote")]
    AppDirMissing { path: String },

    /// Include file pattern is invalid.
    #[error(transparent)]
    Pattern(#[from] glob::PatternError),

    /// Release lifecycle failed.
    #[error(transparent)]
    Build(#[from] BuildError),

    /// Deployment hook failed.
    #[error(transparent)]
    Script(#[from] ScriptError),

    /// Remote cannot be accessed.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Friendly result alias :3
pub type Result<T, E = PresetError> = std::result::Result<T, E>;

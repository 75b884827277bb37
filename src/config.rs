// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Configuration layout.
//!
//! Specify the layout of the `boss.toml` configuration file, and resolve it
//! into one immutable [`Config`] for the stage being deployed.
//!
//! # Layers
//!
//! Settings are resolved once from four layers, lowest precedence first:
//!
//! 1. Global defaults.
//! 2. Preset defaults, e.g., the node preset knows about `package.json`.
//! 3. Top-level settings of the configuration file.
//! 4. Settings of the `[stages.<name>]` table being deployed.
//!
//! # General Layout
//!
//! ```toml
//! project_name = "website"
//! repository_url = "https://github.com/acme/website"
//! user = "deploy"
//!
//! [deployment]
//! preset = "web"
//! base_dir = "~/website"
//! keep_builds = 3
//!
//! [scripts]
//! build = "npm run build"
//!
//! [stages.production]
//! host = "${PRODUCTION_HOST}"
//! public_url = "https://acme.com"
//! ```
//!
//! Environment variables in connection and path settings are expanded when
//! the configuration is resolved. A leading `~` in remote paths is left
//! alone, because it refers to the home directory on the remote.

use crate::preset::PresetKind;

use serde::{Deserialize, Serialize};
use std::{
    borrow::Cow,
    collections::BTreeMap,
    fmt::{Display, Error as FmtError, Formatter, Result as FmtResult},
    fs::read_to_string,
    path::{Path, PathBuf},
    str::FromStr,
};

const DEFAULT_USER: &str = "app";
const DEFAULT_PORT: u16 = 22;
const DEFAULT_KEY_FILENAME: &str = "~/.ssh/id_rsa";
const DEFAULT_APP_DIR: &str = "~/";
const DEFAULT_BRANCH: &str = "master";
const DEFAULT_BRANCH_URL: &str = "{repository_url}/branch/{branch}";
const DEFAULT_BASE_DIR: &str = "~/deployment";
const DEFAULT_BUILD_DIR: &str = "build";
const DEFAULT_KEEP_BUILDS: usize = 5;
const DEFAULT_SLACK_BASE_URL: &str = "https://hooks.slack.com/services";
const DEFAULT_DEPLOYING_COLOR: &str = "good";
const DEFAULT_DEPLOYED_COLOR: &str = "#764FA5";
const DEFAULT_HIPCHAT_BASE_URL: &str = "https://api.hipchat.com/v2";
const DEFAULT_HIPCHAT_DEPLOYING_COLOR: &str = "yellow";
const DEFAULT_HIPCHAT_DEPLOYED_COLOR: &str = "green";

/// Fully resolved configuration for one stage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Name of stage being deployed.
    pub stage: String,

    /// Informational project settings.
    pub project: ProjectSettings,

    /// How to reach the stage's host.
    pub connection: ConnectionSettings,

    /// Remote directory holding project source for the remote source preset.
    pub app_dir: String,

    /// Default branch to deploy.
    pub branch: String,

    /// Public URL of stage, used in notifications.
    pub public_url: Option<String>,

    /// Release directory settings.
    pub deployment: DeploymentSettings,

    /// Named shell scripts usable as deployment hooks.
    pub scripts: BTreeMap<String, String>,

    /// Notification settings.
    pub notifications: NotificationSettings,
}

impl Config {
    /// Load configuration file and resolve it for stage.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::Read`] if configuration file cannot be read.
    /// - Return [`ConfigError::Deserialize`] if it is not valid.
    /// - Return any error of [`ConfigFile::resolve`].
    pub fn load(path: impl AsRef<Path>, stage: &str) -> Result<Self> {
        let content = read_to_string(path.as_ref()).map_err(|source| ConfigError::Read {
            path: path.as_ref().to_path_buf(),
            source,
        })?;

        content.parse::<ConfigFile>()?.resolve(stage)
    }
}

/// Informational project settings.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ProjectSettings {
    pub name: String,
    pub description: String,
    pub repository_url: String,
    pub branch_url: String,
}

impl ProjectSettings {
    /// URL of branch in repository browser, if a repository is configured.
    pub fn branch_url(&self, branch: &str) -> Option<String> {
        if self.repository_url.is_empty() || self.branch_url.is_empty() {
            return None;
        }

        Some(
            self.branch_url
                .replace("{repository_url}", self.repository_url.trim_end_matches('/'))
                .replace("{branch}", branch),
        )
    }
}

/// How to reach a host over SSH.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionSettings {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub key_filename: Option<PathBuf>,
    pub timeout_ms: Option<u64>,
}

/// Release directory settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeploymentSettings {
    /// Deployment strategy.
    pub preset: PresetKind,

    /// Remote base directory holding `builds/`, `builds.json`, and `current`.
    pub base_dir: String,

    /// Local directory holding build output.
    pub build_dir: PathBuf,

    /// Number of builds to retain.
    pub keep_builds: usize,

    /// Extra local files to ship along with build output.
    pub include_files: Vec<String>,
}

/// Notification settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationSettings {
    pub slack: SlackSettings,
    pub hipchat: HipChatSettings,
}

/// Slack incoming webhook settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlackSettings {
    pub enabled: bool,
    pub endpoint: String,
    pub base_url: String,
    pub deploying_color: String,
    pub deployed_color: String,
}

impl SlackSettings {
    /// Full webhook URL.
    pub fn webhook_url(&self) -> String {
        join_url(&self.base_url, &self.endpoint)
    }
}

/// HipChat room notification settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HipChatSettings {
    pub enabled: bool,
    pub endpoint: String,
    pub base_url: String,
    /// Whether the room notification pings its members.
    pub notify: bool,
    pub deploying_color: String,
    pub deployed_color: String,
}

impl HipChatSettings {
    /// Full room notification URL.
    pub fn notification_url(&self) -> String {
        join_url(&self.base_url, &self.endpoint)
    }
}

fn join_url(base: &str, endpoint: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        endpoint.trim_start_matches('/')
    )
}

/// Configuration file layout.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfigFile {
    /// Name of project.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_name: Option<String>,

    /// One sentence description of project.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_description: Option<String>,

    /// URL of project repository.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repository_url: Option<String>,

    /// Template of branch URL with `{repository_url}` and `{branch}`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch_url: Option<String>,

    /// Settings shared by all stages.
    #[serde(flatten)]
    pub common: Layer,

    /// Notification settings.
    #[serde(skip_serializing_if = "NotificationsLayer::is_empty")]
    pub notifications: NotificationsLayer,

    /// Stage specific settings.
    pub stages: BTreeMap<String, StageLayer>,
}

impl ConfigFile {
    /// Resolve configuration for stage.
    ///
    /// # Errors
    ///
    /// - Return [`ConfigError::UnknownStage`] if stage is not configured.
    /// - Return [`ConfigError::MissingHost`] if stage has no host.
    /// - Return [`ConfigError::InvalidKeepBuilds`] if zero builds are to be
    ///   kept.
    /// - Return [`ConfigError::ShellExpansion`] if environment variable
    ///   expansion fails.
    pub fn resolve(&self, stage: &str) -> Result<Config> {
        let stage_layer = self
            .stages
            .get(stage)
            .ok_or_else(|| ConfigError::UnknownStage {
                stage: stage.to_string(),
                known: self.stages.keys().cloned().collect(),
            })?;
        let host = stage_layer
            .host
            .as_deref()
            .ok_or_else(|| ConfigError::MissingHost {
                stage: stage.to_string(),
            })?;

        let user_layer = self.common.clone().merge(stage_layer.common.clone());
        let preset = user_layer.deployment.preset.unwrap_or_default();
        let layer = Layer::defaults()
            .merge(Layer::preset_defaults(preset))
            .merge(user_layer);

        let keep_builds = layer.deployment.keep_builds.unwrap_or(DEFAULT_KEEP_BUILDS);
        if keep_builds == 0 {
            return Err(ConfigError::InvalidKeepBuilds {
                stage: stage.to_string(),
            });
        }

        let key_filename = layer
            .key_filename
            .as_deref()
            .map(|path| shellexpand::full(path).map(|path| PathBuf::from(path.as_ref())))
            .transpose()?;
        let slack = &self.notifications.slack;
        let hipchat = &self.notifications.hipchat;

        Ok(Config {
            stage: stage.to_string(),
            project: ProjectSettings {
                name: self.project_name.clone().unwrap_or_default(),
                description: self.project_description.clone().unwrap_or_default(),
                repository_url: self.repository_url.clone().unwrap_or_default(),
                branch_url: self
                    .branch_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_BRANCH_URL.into()),
            },
            connection: ConnectionSettings {
                host: expand_env(host)?,
                port: layer.port.unwrap_or(DEFAULT_PORT),
                user: expand_env(layer.user.as_deref().unwrap_or(DEFAULT_USER))?,
                key_filename,
                timeout_ms: layer.timeout_ms,
            },
            app_dir: expand_env(layer.app_dir.as_deref().unwrap_or(DEFAULT_APP_DIR))?,
            branch: layer.branch.unwrap_or_else(|| DEFAULT_BRANCH.into()),
            public_url: stage_layer.public_url.clone(),
            deployment: DeploymentSettings {
                preset,
                base_dir: expand_env(
                    layer
                        .deployment
                        .base_dir
                        .as_deref()
                        .unwrap_or(DEFAULT_BASE_DIR),
                )?,
                build_dir: PathBuf::from(expand_env(
                    layer
                        .deployment
                        .build_dir
                        .as_deref()
                        .unwrap_or(DEFAULT_BUILD_DIR),
                )?),
                keep_builds,
                include_files: layer.deployment.include_files.unwrap_or_default(),
            },
            scripts: layer.scripts,
            notifications: NotificationSettings {
                slack: SlackSettings {
                    enabled: slack.enabled.unwrap_or(false),
                    endpoint: expand_env(slack.endpoint.as_deref().unwrap_or_default())?,
                    base_url: slack
                        .base_url
                        .clone()
                        .unwrap_or_else(|| DEFAULT_SLACK_BASE_URL.into()),
                    deploying_color: slack
                        .deploying_color
                        .clone()
                        .unwrap_or_else(|| DEFAULT_DEPLOYING_COLOR.into()),
                    deployed_color: slack
                        .deployed_color
                        .clone()
                        .unwrap_or_else(|| DEFAULT_DEPLOYED_COLOR.into()),
                },
                hipchat: HipChatSettings {
                    enabled: hipchat.enabled.unwrap_or(false),
                    endpoint: expand_env(hipchat.endpoint.as_deref().unwrap_or_default())?,
                    base_url: hipchat
                        .base_url
                        .clone()
                        .unwrap_or_else(|| DEFAULT_HIPCHAT_BASE_URL.into()),
                    notify: hipchat.notify.unwrap_or(false),
                    deploying_color: hipchat
                        .deploying_color
                        .clone()
                        .unwrap_or_else(|| DEFAULT_HIPCHAT_DEPLOYING_COLOR.into()),
                    deployed_color: hipchat
                        .deployed_color
                        .clone()
                        .unwrap_or_else(|| DEFAULT_HIPCHAT_DEPLOYED_COLOR.into()),
                },
            },
        })
    }

    /// Starter configuration written by `boss init`.
    pub fn starter(preset: PresetKind) -> Self {
        let mut stages = BTreeMap::new();
        stages.insert(
            "production".to_string(),
            StageLayer {
                host: Some("<put host here>".into()),
                public_url: Some("<put public url here>".into()),
                common: Layer::default(),
            },
        );

        Self {
            project_name: Some("<put project name here>".into()),
            project_description: Some("<put one sentence description here>".into()),
            repository_url: Some("<put repository url here>".into()),
            common: Layer {
                user: Some(DEFAULT_USER.into()),
                deployment: DeploymentLayer {
                    preset: Some(preset),
                    base_dir: Some(DEFAULT_BASE_DIR.into()),
                    keep_builds: Some(DEFAULT_KEEP_BUILDS),
                    ..Default::default()
                },
                ..Default::default()
            },
            stages,
            ..Default::default()
        }
    }
}

impl FromStr for ConfigFile {
    type Err = ConfigError;

    fn from_str(data: &str) -> Result<Self, Self::Err> {
        toml::de::from_str(data).map_err(ConfigError::Deserialize)
    }
}

impl Display for ConfigFile {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(
            toml::ser::to_string_pretty(self)
                .map_err(ConfigError::Serialize)?
                .as_str(),
        )
    }
}

/// Settings that can appear both at top-level and inside a stage.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Layer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_filename: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub app_dir: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,

    #[serde(skip_serializing_if = "DeploymentLayer::is_empty")]
    pub deployment: DeploymentLayer,

    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub scripts: BTreeMap<String, String>,
}

impl Layer {
    fn defaults() -> Self {
        Self {
            user: Some(DEFAULT_USER.into()),
            port: Some(DEFAULT_PORT),
            key_filename: Some(DEFAULT_KEY_FILENAME.into()),
            app_dir: Some(DEFAULT_APP_DIR.into()),
            branch: Some(DEFAULT_BRANCH.into()),
            deployment: DeploymentLayer {
                preset: Some(PresetKind::default()),
                base_dir: Some(DEFAULT_BASE_DIR.into()),
                build_dir: Some(DEFAULT_BUILD_DIR.into()),
                keep_builds: Some(DEFAULT_KEEP_BUILDS),
                include_files: Some(Vec::new()),
            },
            ..Default::default()
        }
    }

    fn preset_defaults(preset: PresetKind) -> Self {
        match preset {
            PresetKind::Node => Self {
                deployment: DeploymentLayer {
                    include_files: Some(
                        ["package.json", "package-lock.json", "yarn.lock", "pm2.config.js"]
                            .map(String::from)
                            .to_vec(),
                    ),
                    ..Default::default()
                },
                scripts: [
                    ("install", "npm install"),
                    ("install_remote", "npm install"),
                    ("build", "npm run build"),
                ]
                .into_iter()
                .map(|(name, cmd)| (name.to_string(), cmd.to_string()))
                .collect(),
                ..Default::default()
            },
            PresetKind::Web | PresetKind::RemoteSource => Self::default(),
        }
    }

    /// Merge higher precedence layer on top of this one.
    pub fn merge(mut self, over: Layer) -> Self {
        self.scripts.extend(over.scripts);

        Self {
            user: over.user.or(self.user),
            port: over.port.or(self.port),
            key_filename: over.key_filename.or(self.key_filename),
            timeout_ms: over.timeout_ms.or(self.timeout_ms),
            app_dir: over.app_dir.or(self.app_dir),
            branch: over.branch.or(self.branch),
            deployment: self.deployment.merge(over.deployment),
            scripts: self.scripts,
        }
    }
}

/// Release directory settings of one layer.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DeploymentLayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub preset: Option<PresetKind>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_dir: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub build_dir: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub keep_builds: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub include_files: Option<Vec<String>>,
}

impl DeploymentLayer {
    fn merge(self, over: DeploymentLayer) -> Self {
        Self {
            preset: over.preset.or(self.preset),
            base_dir: over.base_dir.or(self.base_dir),
            build_dir: over.build_dir.or(self.build_dir),
            keep_builds: over.keep_builds.or(self.keep_builds),
            include_files: over.include_files.or(self.include_files),
        }
    }

    fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Stage table layout.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct StageLayer {
    /// Host of stage. Required.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    /// Public URL of stage.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_url: Option<String>,

    /// Stage overrides of shared settings.
    #[serde(flatten)]
    pub common: Layer,
}

/// Notification table layout.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct NotificationsLayer {
    pub slack: SlackLayer,
    pub hipchat: HipChatLayer,
}

impl NotificationsLayer {
    fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Slack table layout.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct SlackLayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploying_color: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployed_color: Option<String>,
}

/// HipChat table layout.
#[derive(Debug, Default, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HipChatLayer {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify: Option<bool>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deploying_color: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployed_color: Option<String>,
}

fn expand_env(value: &str) -> Result<String> {
    Ok(shellexpand::env(value).map(Cow::into_owned)?)
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read configuration file {:?}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Failed to deserialize configuration.
    #[error(transparent)]
    Deserialize(#[from] toml::de::Error),

    /// Failed to serialize configuration.
    #[error(transparent)]
    Serialize(#[from] toml::ser::Error),

    /// Failed to perform shell expansion on configuration.
    #[error(transparent)]
    ShellExpansion(#[from] shellexpand::LookupError<std::env::VarError>),

    /// Stage is not configured.
    #[error("unknown stage {stage:?}, stage should be any one of {known:?}")]
    UnknownStage { stage: String, known: Vec<String> },

    /// Stage has no host to deploy to.
    #[error("stage {stage:?} has no host configured")]
    MissingHost { stage: String },

    /// Retention would delete the build being deployed.
    #[error("stage {stage:?} must keep at least one build")]
    InvalidKeepBuilds { stage: String },
}

impl From<ConfigError> for FmtError {
    fn from(_: ConfigError) -> Self {
        FmtError
    }
}

/// Friendly result alias :3
type Result<T, E = ConfigError> = std::result::Result<T, E>;

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Deployment notifications.
//!
//! Notifications are fire-and-forget. A notifier that fails is logged and
//! skipped, it never aborts a deployment.

use crate::config::{Config, HipChatSettings, ProjectSettings, SlackSettings};

use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(10);

/// Kind of deployment event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationEvent {
    DeploymentStarted,
    DeploymentFinished,
}

/// Details about the deployment being announced.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeploymentContext {
    pub user: String,
    pub branch: Option<String>,
    pub commit: Option<String>,
    pub stage: String,
}

/// Something that can announce deployment events.
pub trait Notifier {
    /// Name of notifier for log messages.
    fn name(&self) -> &str;

    /// Announce deployment event.
    fn notify(&self, event: NotificationEvent, context: &DeploymentContext) -> Result<()>;
}

/// All notifiers enabled for a stage.
#[derive(Default)]
pub struct Notifications {
    notifiers: Vec<Box<dyn Notifier>>,
}

impl Notifications {
    /// Construct new empty set of notifiers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Construct notifiers enabled by configuration.
    pub fn from_config(config: &Config) -> Self {
        let mut notifications = Self::new();
        if config.notifications.slack.enabled {
            notifications.add(SlackNotifier::new(
                config.notifications.slack.clone(),
                config.project.clone(),
                config.public_url.clone(),
            ));
        }

        if config.notifications.hipchat.enabled {
            notifications.add(HipChatNotifier::new(
                config.notifications.hipchat.clone(),
                config.project.clone(),
                config.public_url.clone(),
            ));
        }

        notifications
    }

    /// Add notifier.
    pub fn add(&mut self, notifier: impl Notifier + 'static) -> &mut Self {
        self.notifiers.push(Box::new(notifier));
        self
    }

    /// Number of notifiers.
    pub fn len(&self) -> usize {
        self.notifiers.len()
    }

    /// Check if there are no notifiers.
    pub fn is_empty(&self) -> bool {
        self.notifiers.is_empty()
    }

    /// Send event to every notifier, swallowing failures.
    pub fn send(&self, event: NotificationEvent, context: &DeploymentContext) {
        for notifier in &self.notifiers {
            match notifier.notify(event, context) {
                Ok(()) => debug!("sent {event:?} through {}", notifier.name()),
                Err(error) => warn!("failed to send {} notification: {error}", notifier.name()),
            }
        }
    }
}

impl std::fmt::Debug for Notifications {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        fmt.debug_list()
            .entries(self.notifiers.iter().map(|notifier| notifier.name()))
            .finish()
    }
}

/// Slack incoming webhook notifier.
#[derive(Debug, Clone)]
pub struct SlackNotifier {
    settings: SlackSettings,
    project: ProjectSettings,
    public_url: Option<String>,
}

impl SlackNotifier {
    /// Construct new Slack notifier.
    pub fn new(
        settings: SlackSettings,
        project: ProjectSettings,
        public_url: Option<String>,
    ) -> Self {
        Self {
            settings,
            project,
            public_url,
        }
    }

    /// Build Slack message for event.
    pub fn payload(&self, event: NotificationEvent, context: &DeploymentContext) -> SlackPayload {
        let (target, server_link) = describe(&self.project, self.public_url.as_deref(), context);
        let (verb, color) = match event {
            NotificationEvent::DeploymentStarted => {
                ("is deploying", &self.settings.deploying_color)
            }
            NotificationEvent::DeploymentFinished => {
                ("finished deploying", &self.settings.deployed_color)
            }
        };

        SlackPayload {
            attachments: vec![SlackAttachment {
                color: color.clone(),
                text: format!(
                    "{} {verb} {target} to {server_link} server.",
                    context.user
                ),
            }],
        }
    }
}

impl Notifier for SlackNotifier {
    fn name(&self) -> &str {
        "slack"
    }

    fn notify(&self, event: NotificationEvent, context: &DeploymentContext) -> Result<()> {
        post_json(&self.settings.webhook_url(), &self.payload(event, context))
    }
}

/// Slack message body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlackPayload {
    pub attachments: Vec<SlackAttachment>,
}

/// Colored block of Slack message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SlackAttachment {
    pub color: String,
    pub text: String,
}

/// HipChat room notifier.
#[derive(Debug, Clone)]
pub struct HipChatNotifier {
    settings: HipChatSettings,
    project: ProjectSettings,
    public_url: Option<String>,
}

impl HipChatNotifier {
    /// Construct new HipChat notifier.
    pub fn new(
        settings: HipChatSettings,
        project: ProjectSettings,
        public_url: Option<String>,
    ) -> Self {
        Self {
            settings,
            project,
            public_url,
        }
    }

    /// Build HipChat room notification for event.
    pub fn payload(&self, event: NotificationEvent, context: &DeploymentContext) -> HipChatPayload {
        let (target, server_link) = describe(&self.project, self.public_url.as_deref(), context);
        let (message, color) = match event {
            NotificationEvent::DeploymentStarted => (
                format!("{} is deploying {target} to {server_link} server.", context.user),
                &self.settings.deploying_color,
            ),
            NotificationEvent::DeploymentFinished => (
                format!("Finished deploying {target} to {server_link} server."),
                &self.settings.deployed_color,
            ),
        };

        HipChatPayload {
            color: color.clone(),
            message,
            notify: self.settings.notify,
            message_format: "text".into(),
        }
    }
}

impl Notifier for HipChatNotifier {
    fn name(&self) -> &str {
        "hipchat"
    }

    fn notify(&self, event: NotificationEvent, context: &DeploymentContext) -> Result<()> {
        post_json(
            &self.settings.notification_url(),
            &self.payload(event, context),
        )
    }
}

/// HipChat room notification body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HipChatPayload {
    pub color: String,
    pub message: String,
    pub notify: bool,
    pub message_format: String,
}

fn post_json(url: &str, payload: &impl Serialize) -> Result<()> {
    let client = reqwest::blocking::Client::builder()
        .timeout(WEBHOOK_TIMEOUT)
        .build()?;
    client.post(url).json(payload).send()?.error_for_status()?;

    Ok(())
}

/// Project and branch being deployed plus the server, as link markup.
fn describe(
    project: &ProjectSettings,
    public_url: Option<&str>,
    context: &DeploymentContext,
) -> (String, String) {
    let project_link = link(Some(project.repository_url.as_str()), &project.name);
    let server_link = link(public_url, &context.stage);
    let target = match context.branch.as_deref().filter(|branch| !branch.is_empty()) {
        Some(branch) => {
            let branch_link = link(project.branch_url(branch).as_deref(), branch);
            format!("{project_link}:{branch_link}")
        }
        None => project_link,
    };

    (target, server_link)
}

/// Link markup, or plain title without a URL.
fn link(url: Option<&str>, title: &str) -> String {
    match url.filter(|url| !url.is_empty()) {
        Some(url) => format!("<{url}|{title}>"),
        None => title.to_string(),
    }
}

/// All possible error types for notifications.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// Webhook request failed.
    #[error(transparent)]
    Http(#[from] reqwest::Error),
}

/// Friendly result alias :3
pub type Result<T, E = NotifyError> = std::result::Result<T, E>;

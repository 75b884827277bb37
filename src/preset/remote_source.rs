// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Remote source deployment.
//!
//! The remote holds a Git checkout of the project in `app_dir`. Deploying
//! syncs that checkout with the configured branch, then builds and reloads in
//! place. There are no release directories, so there is nothing to roll back
//! to.

use crate::{
    history::{BuildHistory, BuildId, BuildRecord},
    notify::NotificationEvent,
    preset::{BuildInfo, Deployment, Preset, PresetError, PresetKind, Result},
    remote::quote,
    script::{self, Target},
};

use tracing::{info, instrument};

/// Sync and rebuild a Git checkout on the remote.
#[derive(Debug)]
pub struct RemoteSourcePreset<'a> {
    deployment: Deployment<'a>,
}

impl<'a> RemoteSourcePreset<'a> {
    /// Construct new remote source preset.
    pub fn new(deployment: Deployment<'a>) -> Self {
        Self { deployment }
    }

    fn app_dir(&self) -> Result<String> {
        let remote = self.deployment.remote;
        let path = remote.normalize_path(&self.deployment.config.app_dir)?;
        if !remote.is_dir(&path)? {
            return Err(PresetError::AppDirMissing { path });
        }

        Ok(path)
    }

    fn unsupported(&self, operation: &'static str) -> PresetError {
        PresetError::Unsupported {
            preset: PresetKind::RemoteSource,
            operation,
        }
    }
}

/// Commands that sync a checkout with the origin branch.
pub fn sync_commands(app_dir: &str, branch: &str) -> Vec<String> {
    let branch = quote(branch);
    vec![
        format!("cd {}", quote(app_dir)),
        "git fetch --prune".to_string(),
        format!("git checkout {branch}"),
        format!("git pull origin {branch}"),
    ]
}

impl Preset for RemoteSourcePreset<'_> {
    fn setup(&self) -> Result<()> {
        let app_dir = self.app_dir()?;
        info!("Remote source is ready in {app_dir}");

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn deploy(&self) -> Result<()> {
        let config = self.deployment.config;
        let remote = self.deployment.remote;
        let scripts = self.deployment.scripts();
        let branch = config.branch.as_str();
        let app_dir = self.app_dir()?;

        let context = self.deployment.context(Some(branch.to_string()), None);
        self.deployment
            .notify(NotificationEvent::DeploymentStarted, &context);

        info!("Synchronizing {app_dir} with branch {branch}");
        remote.run_all(&sync_commands(&app_dir, branch))?;

        let target = Target::Remote {
            remote,
            dir: &app_dir,
        };
        scripts.run_script_safely(script::INSTALL, target)?;
        scripts.run_script_safely(script::BUILD, target)?;
        scripts.run_script_safely(script::RELOAD, target)?;
        scripts.run_script_safely(script::STATUS_CHECK, target)?;

        self.deployment
            .notify(NotificationEvent::DeploymentFinished, &context);
        info!("Deployment Completed");

        Ok(())
    }

    fn rollback(&self, _: Option<&BuildId>) -> Result<BuildRecord> {
        Err(self.unsupported("rollback"))
    }

    fn builds(&self) -> Result<BuildHistory> {
        Err(self.unsupported("builds"))
    }

    fn build_info(&self, _: Option<&BuildId>) -> Result<Option<BuildInfo>> {
        Err(self.unsupported("info"))
    }

    fn status(&self) -> Result<()> {
        let app_dir = self.app_dir()?;
        let scripts = self.deployment.scripts();
        if scripts.is_script_defined(script::STATUS_CHECK) {
            return Ok(scripts.run_script(
                script::STATUS_CHECK,
                Target::Remote {
                    remote: self.deployment.remote,
                    dir: &app_dir,
                },
            )?);
        }

        let output = self.deployment.remote.run_all(&[
            format!("cd {}", quote(&app_dir)),
            "git rev-parse --abbrev-ref HEAD".to_string(),
            "git log -1 --oneline".to_string(),
        ])?;
        for line in output {
            info!("{line}");
        }

        Ok(())
    }

    fn restart(&self) -> Result<()> {
        let app_dir = self.app_dir()?;
        Ok(self.deployment.scripts().run_script_safely(
            script::RELOAD,
            Target::Remote {
                remote: self.deployment.remote,
                dir: &app_dir,
            },
        )?)
    }
}

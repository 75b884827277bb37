// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Static web deployment.
//!
//! The project is built locally, and only the build output is released. A web
//! server on the remote is expected to serve from the `current` link.

use crate::{
    buildman::{Artifact, BuildInputs},
    history::{BuildHistory, BuildId, BuildRecord},
    notify::NotificationEvent,
    path::remote_join,
    preset::{build_info, BuildInfo, Deployment, Preset, PresetError, Result},
    script::{self, Target},
};

use tracing::{info, instrument};

/// Release local build output as is.
#[derive(Debug)]
pub struct WebPreset<'a> {
    deployment: Deployment<'a>,
}

impl<'a> WebPreset<'a> {
    /// Construct new web preset.
    pub fn new(deployment: Deployment<'a>) -> Self {
        Self { deployment }
    }

    fn current_dir(&self) -> String {
        remote_join(&self.deployment.config.deployment.base_dir, "current")
    }
}

impl Preset for WebPreset<'_> {
    fn setup(&self) -> Result<()> {
        let setup = self.deployment.build_manager().ensure_setup()?;
        if setup.created {
            info!("Remote is ready for deployment");
        } else {
            info!("Remote is already set up");
        }

        Ok(())
    }

    #[instrument(skip(self), level = "debug")]
    fn deploy(&self) -> Result<()> {
        let config = self.deployment.config;
        let scripts = self.deployment.scripts();
        let vcs = self.deployment.vcs();
        info!(
            "Deploying <{}:{}> to the {} server",
            vcs.branch.as_deref().unwrap_or_default(),
            vcs.commit.as_deref().unwrap_or_default(),
            config.stage
        );

        let context = self.deployment.context(vcs.branch.clone(), vcs.commit.clone());
        self.deployment
            .notify(NotificationEvent::DeploymentStarted, &context);

        scripts.run_script_safely(script::PRE_DEPLOY, Target::Local)?;
        scripts.run_script_safely(script::INSTALL, Target::Local)?;
        scripts.run_script_safely(script::BUILD, Target::Local)?;

        let build_dir = self
            .deployment
            .project_dir
            .join(&config.deployment.build_dir);
        if !build_dir.is_dir() {
            return Err(PresetError::BuildDirMissing { path: build_dir });
        }

        let inputs = BuildInputs {
            branch: vcs.branch,
            commit: vcs.commit,
            stage: config.stage.clone(),
            created_by: self.deployment.user.clone(),
            artifacts: vec![Artifact::new(build_dir, "")],
            stage_commands: Vec::new(),
        };
        let manager = self.deployment.build_manager();
        self.deployment
            .with_reporter(|reporter| manager.deploy(&inputs, reporter))?;

        scripts.run_script_safely(script::POST_DEPLOY, Target::Local)?;
        self.deployment
            .notify(NotificationEvent::DeploymentFinished, &context);
        info!("Deployment Completed");

        Ok(())
    }

    fn rollback(&self, id: Option<&BuildId>) -> Result<BuildRecord> {
        Ok(self.deployment.build_manager().rollback(id)?)
    }

    fn builds(&self) -> Result<BuildHistory> {
        Ok(self.deployment.build_manager().list_builds()?)
    }

    fn build_info(&self, id: Option<&BuildId>) -> Result<Option<BuildInfo>> {
        Ok(build_info(&self.builds()?, id))
    }

    fn status(&self) -> Result<()> {
        let scripts = self.deployment.scripts();
        if scripts.is_script_defined(script::STATUS_CHECK) {
            let dir = self.current_dir();
            return Ok(scripts.run_script(
                script::STATUS_CHECK,
                Target::Remote {
                    remote: self.deployment.remote,
                    dir: &dir,
                },
            )?);
        }

        match self.build_info(None)? {
            Some(info) => info!("Current build\n{}", info.record.details(info.is_current)),
            None => info!("No builds have been deployed yet."),
        }

        Ok(())
    }

    fn restart(&self) -> Result<()> {
        let dir = self.current_dir();
        Ok(self.deployment.scripts().run_script_safely(
            script::RELOAD,
            Target::Remote {
                remote: self.deployment.remote,
                dir: &dir,
            },
        )?)
    }
}

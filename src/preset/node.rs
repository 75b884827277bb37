// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Node service deployment.
//!
//! The project is built locally. Build output lands in `dist/` of the new
//! release, package files land in the release root. Dependencies are
//! installed on the remote before the release goes live, and the service is
//! reloaded right after.

use crate::{
    buildman::{Artifact, BuildInputs},
    history::{BuildHistory, BuildId, BuildRecord},
    notify::NotificationEvent,
    path::remote_join,
    preset::{build_info, BuildInfo, Deployment, Preset, PresetError, Result},
    remote::quote,
    script::{self, Target},
};

use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};

/// Directory inside release holding build output.
const DIST_DIR: &str = "dist";

/// Release local build output with package files, then reload service.
#[derive(Debug)]
pub struct NodePreset<'a> {
    deployment: Deployment<'a>,
}

impl<'a> NodePreset<'a> {
    /// Construct new node preset.
    pub fn new(deployment: Deployment<'a>) -> Self {
        Self { deployment }
    }

    fn current_dir(&self) -> String {
        remote_join(&self.deployment.config.deployment.base_dir, "current")
    }

    fn reload_service(&self) -> Result<()> {
        let scripts = self.deployment.scripts();
        let dir = self.current_dir();
        let target = Target::Remote {
            remote: self.deployment.remote,
            dir: &dir,
        };

        if scripts.is_script_defined(script::START_OR_RELOAD) {
            scripts.run_script(script::START_OR_RELOAD, target)?;
        } else {
            scripts.run_script_safely(script::RELOAD, target)?;
        }

        Ok(())
    }
}

impl Preset for NodePreset<'_> {
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
        info!("Deploying app to the {} server", config.stage);
        info!("  Branch: {}", vcs.branch.as_deref().unwrap_or_default());
        info!("  Commit: {}", vcs.commit.as_deref().unwrap_or_default());

        let context = self.deployment.context(vcs.branch.clone(), vcs.commit.clone());
        self.deployment
            .notify(NotificationEvent::DeploymentStarted, &context);

        info!("Getting the build ready for deployment");
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

        let mut artifacts = vec![Artifact::new(build_dir, DIST_DIR)];
        for file in include_files(&self.deployment.project_dir, &config.deployment.include_files)? {
            artifacts.push(Artifact::new(file, ""));
        }

        let stage_commands = config
            .scripts
            .get(script::INSTALL_REMOTE)
            .map(|command| {
                vec![
                    format!("export STAGE={}", quote(&config.stage)),
                    command.clone(),
                ]
            })
            .unwrap_or_default();

        let inputs = BuildInputs {
            branch: vcs.branch,
            commit: vcs.commit,
            stage: config.stage.clone(),
            created_by: self.deployment.user.clone(),
            artifacts,
            stage_commands,
        };
        let manager = self.deployment.build_manager();
        self.deployment
            .with_reporter(|reporter| manager.deploy(&inputs, reporter))?;

        self.reload_service()?;
        scripts.run_script_safely(script::POST_DEPLOY, Target::Local)?;

        self.deployment
            .notify(NotificationEvent::DeploymentFinished, &context);
        info!("Deployment Completed");

        Ok(())
    }

    fn rollback(&self, id: Option<&BuildId>) -> Result<BuildRecord> {
        let record = self.deployment.build_manager().rollback(id)?;
        self.reload_service()?;

        Ok(record)
    }

    fn builds(&self) -> Result<BuildHistory> {
        Ok(self.deployment.build_manager().list_builds()?)
    }

    fn build_info(&self, id: Option<&BuildId>) -> Result<Option<BuildInfo>> {
        Ok(build_info(&self.builds()?, id))
    }

    fn status(&self) -> Result<()> {
        let dir = self.current_dir();
        Ok(self.deployment.scripts().run_script_safely(
            script::STATUS_CHECK,
            Target::Remote {
                remote: self.deployment.remote,
                dir: &dir,
            },
        )?)
    }

    fn restart(&self) -> Result<()> {
        self.reload_service()
    }
}

/// Local files matching include patterns, relative to project directory.
///
/// Patterns that match nothing are skipped.
fn include_files(project_dir: &Path, patterns: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for pattern in patterns {
        let full = project_dir.join(pattern);
        let mut matched = false;
        for path in glob::glob(&full.to_string_lossy())?.flatten() {
            if path.is_file() && !files.contains(&path) {
                files.push(path);
                matched = true;
            }
        }

        if !matched {
            debug!("include pattern {pattern:?} matched nothing");
        }
    }

    Ok(files)
}

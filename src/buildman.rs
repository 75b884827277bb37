// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Build and release lifecycle.
//!
//! The build manager lays out a release directory structure on a remote
//! deployment target, and moves builds in and out of service using nothing but
//! directories, one JSON document, and one symbolic link.
//!
//! # Release Layout
//!
//! ```text
//! <base_dir>/
//!   builds/
//!     build-<id>/      one per retained build
//!   builds.json        build history
//!   current -> builds/build-<id>
//! ```
//!
//! Only `current` should ever be referenced by web servers or process
//! managers.
//!
//! # Activation
//!
//! Every mutation follows the same order: stage everything into a fresh
//! release directory, flip `current` with one `ln -sfn`, then record the
//! result in the build history. Anything that fails before the flip leaves the
//! previous build live. A failure after the flip but before the history is
//! saved leaves the new build live but unrecorded, which is reported and not
//! repaired.
//!
//! There is no remote lock. Two processes deploying to the same target at once
//! can drop each other's history updates.

use crate::{
    config::DeploymentSettings,
    history::{
        truncate_to_seconds, BuildHistory, BuildId, BuildRecord, HistoryError, HistoryStore,
    },
    path::remote_join,
    remote::{quote, Remote, RemoteError},
    transfer::{BulkUploader, ProgressReporter, TransferError},
};

use chrono::{DateTime, Duration, Utc};
use std::path::PathBuf;
use tracing::{debug, info, instrument, warn};

/// Name of directory holding release directories.
pub const RELEASES_DIR: &str = "builds";

/// Name of symbolic link pointing at live release directory.
pub const CURRENT_LINK: &str = "current";

/// Local file or directory that goes into a release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Local path of file or directory.
    pub local: PathBuf,

    /// Destination relative to release directory.
    ///
    /// Empty means the release directory itself for a lone directory
    /// artifact, or the artifact's own name inside the release directory
    /// otherwise.
    pub dest: String,
}

impl Artifact {
    /// Construct new artifact.
    pub fn new(local: impl Into<PathBuf>, dest: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            dest: dest.into(),
        }
    }
}

/// Everything a deployment needs to know about the build being deployed.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BuildInputs {
    /// Branch build was made from.
    pub branch: Option<String>,

    /// Commit build was made from.
    pub commit: Option<String>,

    /// Stage being deployed to.
    pub stage: String,

    /// Operator deploying the build.
    pub created_by: String,

    /// Files and directories making up the release.
    pub artifacts: Vec<Artifact>,

    /// Remote commands to run inside the new release directory before it goes
    /// live.
    pub stage_commands: Vec<String>,
}

/// Canonical paths of a set up deployment target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Setup {
    /// Directory holding release directories.
    pub release_dir: String,

    /// Symbolic link pointing at live release.
    pub current_link: String,

    /// Whether this call created the release directory.
    pub created: bool,
}

/// Build and release lifecycle manager of one deployment target.
#[derive(Debug)]
pub struct BuildManager<'r, R>
where
    R: Remote + ?Sized,
{
    remote: &'r R,
    base_dir: String,
    keep_builds: usize,
    preset_name: Option<String>,
}

impl<'r, R> BuildManager<'r, R>
where
    R: Remote + ?Sized,
{
    /// Construct new build manager over remote.
    ///
    /// The base directory may start with `~`, which is resolved against the
    /// remote's home.
    pub fn new(remote: &'r R, base_dir: impl Into<String>, keep_builds: usize) -> Self {
        Self {
            remote,
            base_dir: base_dir.into(),
            keep_builds,
            preset_name: None,
        }
    }

    /// Construct new build manager from deployment settings.
    pub fn from_settings(remote: &'r R, settings: &DeploymentSettings) -> Self {
        Self::new(remote, settings.base_dir.as_str(), settings.keep_builds)
            .with_preset(settings.preset.to_string())
    }

    /// Name preset recorded in freshly created build histories.
    pub fn with_preset(mut self, preset_name: impl Into<String>) -> Self {
        self.preset_name = Some(preset_name.into());
        self
    }

    /// Make sure release directory and build history exist.
    ///
    /// Safe to call any number of times. Nothing on the remote changes once
    /// the target is set up.
    ///
    /// # Errors
    ///
    /// - Return [`BuildError::Remote`] if remote cannot be inspected or
    ///   changed.
    /// - Return [`BuildError::History`] if fresh build history cannot be
    ///   written.
    #[instrument(skip(self), level = "debug")]
    pub fn ensure_setup(&self) -> Result<Setup> {
        let base_dir = self.remote.normalize_path(&self.base_dir)?;
        let release_dir = remote_join(&base_dir, RELEASES_DIR);
        let current_link = remote_join(&base_dir, CURRENT_LINK);
        let store = HistoryStore::new(self.remote, &base_dir);

        let created = !self.remote.is_dir(&release_dir)?;
        if created {
            info!("Creating the releases directory {release_dir}");
            self.remote
                .run(&format!("mkdir -p {}", quote(&release_dir)))?;
        }

        if created || !store.exists()? {
            info!("Creating build history {}", store.path());
            store.save(&BuildHistory::new(self.preset_name.clone()))?;
        }

        Ok(Setup {
            release_dir,
            current_link,
            created,
        })
    }

    /// Deploy new build and make it live.
    ///
    /// # Errors
    ///
    /// - Return any error of [`BuildManager::deploy_at`].
    pub fn deploy(
        &self,
        inputs: &BuildInputs,
        reporter: &mut dyn ProgressReporter,
    ) -> Result<BuildRecord> {
        self.deploy_at(inputs, Utc::now(), reporter)
    }

    /// Deploy new build as if it were built at `now`, and make it live.
    ///
    /// The build identifier comes from `now` at second resolution. If that
    /// would not sort after the newest recorded build, it is moved to one
    /// second after that build. It is moved further while a release directory
    /// of that name already exists, so a retry never reuses what a failed
    /// attempt left behind.
    ///
    /// # Errors
    ///
    /// - Return [`BuildError::Transfer`] if artifacts cannot be uploaded.
    /// - Return [`BuildError::Remote`] if a stage command or activation fails.
    /// - Return [`BuildError::History`] if build history cannot be read or
    ///   written.
    #[instrument(skip(self, inputs, reporter), fields(stage = %inputs.stage), level = "debug")]
    pub fn deploy_at(
        &self,
        inputs: &BuildInputs,
        now: DateTime<Utc>,
        reporter: &mut dyn ProgressReporter,
    ) -> Result<BuildRecord> {
        let setup = self.ensure_setup()?;
        let store = self.store()?;
        let mut history = store.load()?;

        let mut time = next_build_time(&history, now);
        let mut id = BuildId::from_time(time);
        let mut release_path = remote_join(&setup.release_dir, &id.dir_name());
        while self.remote.exists(&release_path)? {
            debug!("{release_path} is left over from an unrecorded attempt, skipping");
            time += Duration::seconds(1);
            id = BuildId::from_time(time);
            release_path = remote_join(&setup.release_dir, &id.dir_name());
        }
        info!("Preparing new build {id}");

        self.transfer(&inputs.artifacts, &release_path, reporter)?;

        if !inputs.stage_commands.is_empty() {
            info!("Running stage commands in {release_path}");
            let mut commands = vec![format!("cd {}", quote(&release_path))];
            commands.extend(inputs.stage_commands.iter().cloned());
            self.remote.run_all(&commands)?;
        }

        self.activate(&release_path, &setup.current_link)?;

        let record = BuildRecord {
            id: id.clone(),
            path: release_path,
            branch: inputs.branch.clone().filter(|branch| !branch.is_empty()),
            commit: inputs.commit.clone().filter(|commit| !commit.is_empty()),
            stage: inputs.stage.clone(),
            created_by: inputs.created_by.clone(),
            timestamp: time,
        };
        history.append(record.clone(), self.keep_builds);
        if let Err(error) = store.save(&history) {
            warn!("build {id} is live but could not be recorded in build history");
            return Err(error.into());
        }

        self.prune_old_builds(&history)?;
        info!("Build {id} is now live");

        Ok(record)
    }

    /// Make an earlier build live again.
    ///
    /// Without a target, the build deployed right before the live one is
    /// used. No files are transferred and no build is added to history.
    ///
    /// # Errors
    ///
    /// - Return [`BuildError::NoCurrentBuild`] if nothing is live.
    /// - Return [`BuildError::NoPreviousBuild`] if the live build is the oldest
    ///   one retained.
    /// - Return [`BuildError::BuildNotFound`] if the target is not in history.
    /// - Return [`BuildError::History`] if the live build is not recorded in
    ///   history, or history cannot be read or written.
    /// - Return [`BuildError::Remote`] if activation fails.
    #[instrument(skip(self), level = "debug")]
    pub fn rollback(&self, target: Option<&BuildId>) -> Result<BuildRecord> {
        let setup = self.ensure_setup()?;
        let store = self.store()?;
        let mut history = store.load()?;

        let current = match &history.current {
            Some(current) if !history.builds.is_empty() => current.clone(),
            _ => return Err(BuildError::NoCurrentBuild),
        };

        let record = match target {
            Some(id) => history
                .find_by_id(id)
                .cloned()
                .ok_or_else(|| BuildError::BuildNotFound(id.clone()))?,
            None => {
                if history.find_current().is_none() {
                    return Err(HistoryError::DanglingCurrent { id: current }.into());
                }

                history
                    .find_previous()
                    .cloned()
                    .ok_or(BuildError::NoPreviousBuild)?
            }
        };

        info!("Rolling back from {current} to {}", record.id);
        self.activate(&record.path, &setup.current_link)?;

        history.current = Some(record.id.clone());
        store.save(&history)?;

        Ok(record)
    }

    /// Delete release directories that build history no longer retains.
    ///
    /// Compares what is physically present under the release directory with
    /// what history says should exist, so it is safe to run at any time.
    /// Return number of deleted release directories.
    ///
    /// # Errors
    ///
    /// - Return [`BuildError::Remote`] if listing or deletion fails.
    #[instrument(skip(self, history), level = "debug")]
    pub fn prune_old_builds(&self, history: &BuildHistory) -> Result<usize> {
        let release_dir = remote_join(&self.remote.normalize_path(&self.base_dir)?, RELEASES_DIR);
        let retained = history.retained_dir_names();

        let stale = self
            .remote
            .list_dir(&release_dir)?
            .into_iter()
            .filter(|name| BuildId::from_dir_name(name).is_some() && !retained.contains(name))
            .map(|name| quote(&remote_join(&release_dir, &name)))
            .collect::<Vec<_>>();

        if stale.is_empty() {
            debug!("no old builds to delete");
            return Ok(0);
        }

        self.remote.run(&format!("rm -rf {}", stale.join(" ")))?;
        info!("Deleted {} old build(s)", stale.len());

        Ok(stale.len())
    }

    /// Load build history.
    ///
    /// # Errors
    ///
    /// - Return [`BuildError::History`] if target is not set up or history is
    ///   corrupt.
    pub fn list_builds(&self) -> Result<BuildHistory> {
        Ok(self.store()?.load()?)
    }

    /// Find build by identifier, or the live build if none is given.
    ///
    /// # Errors
    ///
    /// - Return [`BuildError::History`] if target is not set up or history is
    ///   corrupt.
    pub fn get_build_info(&self, id: Option<&BuildId>) -> Result<Option<BuildRecord>> {
        let history = self.list_builds()?;
        let record = match id {
            Some(id) => history.find_by_id(id),
            None => history.find_current(),
        };

        Ok(record.cloned())
    }

    fn store(&self) -> Result<HistoryStore<'r, R>> {
        let base_dir = self.remote.normalize_path(&self.base_dir)?;
        Ok(HistoryStore::new(self.remote, &base_dir))
    }

    fn transfer(
        &self,
        artifacts: &[Artifact],
        release_path: &str,
        reporter: &mut dyn ProgressReporter,
    ) -> Result<()> {
        match artifacts {
            [] => {
                debug!("no artifacts, creating empty release directory");
                self.remote
                    .run(&format!("mkdir -p {}", quote(release_path)))?;
            }
            [artifact] if artifact.dest.is_empty() && artifact.local.is_dir() => {
                info!("Uploading {} to {release_path}", artifact.local.display());
                self.remote
                    .upload_dir(&artifact.local, release_path, reporter)?;
            }
            _ => {
                let mut uploader = BulkUploader::new();
                for artifact in artifacts {
                    uploader.add(&artifact.local, artifact_dest(artifact, release_path));
                }
                info!("Uploading {} artifact(s) to {release_path}", uploader.len());
                uploader.upload(self.remote, reporter)?;
            }
        }

        Ok(())
    }

    fn activate(&self, release_path: &str, current_link: &str) -> Result<()> {
        info!("Pointing the current symlink to {release_path}");
        self.remote.run(&format!(
            "ln -sfn {} {}",
            quote(release_path),
            quote(current_link)
        ))?;

        Ok(())
    }
}

/// Build time of next deployment.
///
/// Truncated to whole seconds, and always later than the newest recorded
/// build so that identifiers stay unique and ordered.
fn next_build_time(history: &BuildHistory, now: DateTime<Utc>) -> DateTime<Utc> {
    let time = truncate_to_seconds(now);
    match history.latest().and_then(|latest| latest.id.time()) {
        Some(latest) if time <= latest => latest + Duration::seconds(1),
        _ => time,
    }
}

fn artifact_dest(artifact: &Artifact, release_path: &str) -> String {
    if !artifact.dest.is_empty() {
        return remote_join(release_path, &artifact.dest);
    }

    match artifact.local.file_name() {
        Some(name) => remote_join(release_path, &name.to_string_lossy()),
        None => release_path.to_string(),
    }
}

/// All possible error types for the release lifecycle.
#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    /// Nothing is live yet.
    #[error("no current build found, nothing to roll back from")]
    NoCurrentBuild,

    /// Live build is the oldest build retained.
    #[error("no previous build found, the current build is the oldest one")]
    NoPreviousBuild,

    /// Requested build is not in history.
    #[error("build {0} not found")]
    BuildNotFound(BuildId),

    /// Build history cannot be used.
    #[error(transparent)]
    History(#[from] HistoryError),

    /// Artifacts cannot be uploaded.
    #[error(transparent)]
    Transfer(#[from] TransferError),

    /// Remote cannot be accessed.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Friendly result alias :3
pub type Result<T, E = BuildError> = std::result::Result<T, E>;

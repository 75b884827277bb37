// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Compressed file transfers.
//!
//! Uploading a release file by file costs one round trip per file, which
//! adds up fast for something like a `node_modules` tree. Instead, Boss packs
//! everything that needs to go to the remote into one gzip-compressed tarball,
//! uploads that once, and sorts the contents into place with one batch of
//! remote shell commands.
//!
//! # Bundle Layout
//!
//! Every source registered with a [`BulkUploader`] is stored in the archive
//! under `bundle/<base name>`. The base name is the only key that links an
//! extracted entry back to its destination, so registering two sources that
//! share a base name is a caller error and is not detected here.
//!
//! # No Transactions
//!
//! A transfer that fails half way may leave remote destinations partially
//! populated. Callers that care, like the build manager, only ever upload into
//! fresh directories that nothing references yet.

use crate::{
    path::{remote_join, remote_parent},
    remote::{quote, Remote, RemoteError},
};

use chrono::Utc;
use flate2::{write::GzEncoder, Compression};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use std::{
    fmt::{Display, Formatter, Result as FmtResult},
    fs::{self, File},
    path::{Path, PathBuf},
};
use tempfile::TempDir;
use tracing::{debug, instrument, warn};

const BUNDLE_ROOT: &str = "bundle";
const ARCHIVE_NAME: &str = "upload.tar.gz";

/// Stage of an upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadStatus {
    /// Collecting sources to upload.
    Preparing,

    /// Packing sources into archive.
    Compressing,

    /// Archive is ready.
    Compressed { size: u64 },

    /// Archive is about to be sent.
    PreparingToUpload { size: u64 },

    /// Archive bytes sent so far.
    Uploading { sent: u64, total: u64 },

    /// Remote is unpacking and moving files into place.
    Finalizing,

    /// Everything is in place.
    Done,
}

impl Display for UploadStatus {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Preparing => fmt.write_str("Preparing"),
            Self::Compressing => fmt.write_str("Compressing"),
            Self::Compressed { size } => write!(fmt, "Compressed [{}]", HumanBytes(*size)),
            Self::PreparingToUpload { size } => write!(fmt, "Uploading [{}]", HumanBytes(*size)),
            Self::Uploading { sent, total } => {
                let percent = if *total == 0 {
                    100.0
                } else {
                    *sent as f64 * 100.0 / *total as f64
                };
                write!(fmt, "Uploading [{}] - {percent:.2}%", HumanBytes(*total))
            }
            Self::Finalizing => fmt.write_str("Finalizing"),
            Self::Done => fmt.write_str("Upload Completed"),
        }
    }
}

/// Receive status updates of an upload.
pub trait ProgressReporter {
    /// Handle transition to new upload status.
    fn update(&mut self, status: UploadStatus);
}

impl<F> ProgressReporter for F
where
    F: FnMut(UploadStatus),
{
    fn update(&mut self, status: UploadStatus) {
        self(status)
    }
}

/// Render upload progress as a single overwriting line on the console.
pub struct ConsoleProgress {
    style: ProgressStyle,
    bar: ProgressBar,
}

impl std::fmt::Debug for ConsoleProgress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConsoleProgress")
            .field("bar", &self.bar)
            .finish_non_exhaustive()
    }
}

impl ConsoleProgress {
    /// Construct new console progress reporter.
    ///
    /// # Errors
    ///
    /// - Return [`TransferError::IndicatifStyleTemplate`] if progress bar
    ///   style cannot be set.
    pub fn new() -> Result<Self> {
        let style = ProgressStyle::with_template(
            "{elapsed_precise:.green}  {msg:<30}  [{wide_bar:.yellow/blue}] {bytes}/{total_bytes}",
        )?
        .progress_chars("-Cco.");

        Ok(Self {
            bar: ProgressBar::hidden(),
            style,
        })
    }
}

impl ProgressReporter for ConsoleProgress {
    fn update(&mut self, status: UploadStatus) {
        match status {
            UploadStatus::Preparing => {
                self.bar = ProgressBar::new(0).with_style(self.style.clone());
                self.bar.set_message(status.to_string());
            }
            UploadStatus::PreparingToUpload { size } => {
                self.bar.set_length(size);
                self.bar.set_position(0);
                self.bar.set_message(status.to_string());
            }
            UploadStatus::Uploading { sent, total } => {
                self.bar.set_length(total);
                self.bar.set_position(sent);
            }
            UploadStatus::Done => self.bar.finish_with_message(status.to_string()),
            _ => self.bar.set_message(status.to_string()),
        }
    }
}

/// Upload many local paths to many remote destinations in one transfer.
///
/// Nothing is sent until [`BulkUploader::upload`] is called.
#[derive(Debug, Default, Clone)]
pub struct BulkUploader {
    entries: Vec<(PathBuf, String)>,
}

impl BulkUploader {
    /// Construct new empty bulk uploader.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register local file or directory to land at remote destination.
    ///
    /// The destination is the final path of the entry itself, not the
    /// directory that should contain it.
    pub fn add(&mut self, local: impl Into<PathBuf>, remote: impl Into<String>) -> &mut Self {
        self.entries.push((local.into(), remote.into()));
        self
    }

    /// Number of registered entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if nothing has been registered yet.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Compress, upload, and distribute all registered entries.
    ///
    /// # Errors
    ///
    /// - Return [`TransferError::NothingToUpload`] if nothing was registered.
    /// - Return [`TransferError::Archive`] if local sources cannot be packed.
    /// - Return [`TransferError::Remote`] if upload or remote finalization
    ///   fails.
    #[instrument(skip(self, remote, reporter), level = "debug")]
    pub fn upload<R>(&self, remote: &R, reporter: &mut dyn ProgressReporter) -> Result<()>
    where
        R: Remote + ?Sized,
    {
        if self.entries.is_empty() {
            return Err(TransferError::NothingToUpload);
        }

        reporter.update(UploadStatus::Preparing);
        let mut sources = Vec::with_capacity(self.entries.len());
        let mut moves = Vec::with_capacity(self.entries.len());
        for (local, destination) in &self.entries {
            let name = base_name(local)?;
            sources.push((local.clone(), format!("{BUNDLE_ROOT}/{name}")));
            moves.push((name, remote.normalize_path(destination)?));
        }

        reporter.update(UploadStatus::Compressing);
        let staging = staging_dir()?;
        let archive = staging.path().join(ARCHIVE_NAME);
        let size = compress(&sources, &archive)?;
        reporter.update(UploadStatus::Compressed { size });

        let upload_path = tmp_path("upload");
        let extract_path = tmp_path("extract");
        reporter.update(UploadStatus::PreparingToUpload { size });
        remote.upload(&archive, &upload_path, &mut |sent, total| {
            reporter.update(UploadStatus::Uploading { sent, total })
        })?;

        reporter.update(UploadStatus::Finalizing);
        let mut commands = vec![
            format!("mkdir -p {}", quote(&extract_path)),
            format!(
                "tar -zxf {} --strip-components=1 -C {}",
                quote(&upload_path),
                quote(&extract_path)
            ),
            format!("rm -f {}", quote(&upload_path)),
        ];
        for (name, destination) in &moves {
            if let Some(parent) = remote_parent(destination) {
                commands.push(format!("mkdir -p {}", quote(parent)));
            }
            commands.push(format!(
                "mv {} {}",
                quote(&remote_join(&extract_path, name)),
                quote(destination)
            ));
        }
        commands.push(format!("rm -rf {}", quote(&extract_path)));

        if let Err(error) = remote.run_all(&commands) {
            discard_remote(remote, &[&upload_path, &extract_path]);
            return Err(error.into());
        }

        debug!("distributed {} entries on {}", moves.len(), remote.identity());
        reporter.update(UploadStatus::Done);

        Ok(())
    }
}

/// Upload the contents of one local directory into one remote directory.
#[derive(Debug, Clone)]
pub struct DirectoryUploader {
    local_dir: PathBuf,
}

impl DirectoryUploader {
    /// Construct new directory uploader for local directory.
    pub fn new(local_dir: impl Into<PathBuf>) -> Self {
        Self {
            local_dir: local_dir.into(),
        }
    }

    /// Compress, upload, and extract local directory into remote directory.
    ///
    /// Remote directory is created if missing.
    ///
    /// # Errors
    ///
    /// - Return [`TransferError::NotADirectory`] if the local path is not a
    ///   directory.
    /// - Return [`TransferError::Archive`] if the directory cannot be packed.
    /// - Return [`TransferError::Remote`] if upload or extraction fails.
    #[instrument(skip(self, remote, reporter), level = "debug")]
    pub fn upload<R>(
        &self,
        remote: &R,
        remote_dir: &str,
        reporter: &mut dyn ProgressReporter,
    ) -> Result<()>
    where
        R: Remote + ?Sized,
    {
        if !self.local_dir.is_dir() {
            return Err(TransferError::NotADirectory {
                path: self.local_dir.clone(),
            });
        }

        reporter.update(UploadStatus::Preparing);
        let remote_dir = remote.normalize_path(remote_dir)?;

        reporter.update(UploadStatus::Compressing);
        let staging = staging_dir()?;
        let archive = staging.path().join(ARCHIVE_NAME);
        let size = compress(&[(self.local_dir.clone(), BUNDLE_ROOT.to_string())], &archive)?;
        reporter.update(UploadStatus::Compressed { size });

        let upload_path = tmp_path("upload");
        reporter.update(UploadStatus::PreparingToUpload { size });
        remote.upload(&archive, &upload_path, &mut |sent, total| {
            reporter.update(UploadStatus::Uploading { sent, total })
        })?;

        reporter.update(UploadStatus::Finalizing);
        let commands = vec![
            format!("mkdir -p {}", quote(&remote_dir)),
            format!(
                "tar -zxf {} --strip-components=1 -C {}",
                quote(&upload_path),
                quote(&remote_dir)
            ),
            format!("rm -f {}", quote(&upload_path)),
        ];
        if let Err(error) = remote.run_all(&commands) {
            discard_remote(remote, &[&upload_path]);
            return Err(error.into());
        }

        reporter.update(UploadStatus::Done);

        Ok(())
    }
}

/// Upload one local file to one remote path.
#[derive(Debug, Clone)]
pub struct FileUploader {
    local: PathBuf,
}

impl FileUploader {
    /// Construct new file uploader for local file.
    pub fn new(local: impl Into<PathBuf>) -> Self {
        Self {
            local: local.into(),
        }
    }

    /// Upload file to temporary remote path, then move it into place.
    ///
    /// If the remote path is an existing directory, the file keeps its name
    /// inside that directory.
    ///
    /// # Errors
    ///
    /// - Return [`TransferError::Archive`] if the local file cannot be read.
    /// - Return [`TransferError::Remote`] if upload or move fails.
    #[instrument(skip(self, remote, reporter), level = "debug")]
    pub fn upload<R>(
        &self,
        remote: &R,
        remote_path: &str,
        reporter: &mut dyn ProgressReporter,
    ) -> Result<()>
    where
        R: Remote + ?Sized,
    {
        reporter.update(UploadStatus::Preparing);
        let name = base_name(&self.local)?;
        let mut remote_path = remote.normalize_path(remote_path)?;
        if remote.is_dir(&remote_path)? {
            remote_path = remote_join(&remote_path, &name);
        }
        let size = fs::metadata(&self.local)
            .map_err(|source| TransferError::Archive {
                path: self.local.clone(),
                source,
            })?
            .len();

        let upload_path = tmp_path(&name);
        reporter.update(UploadStatus::PreparingToUpload { size });
        remote.upload(&self.local, &upload_path, &mut |sent, total| {
            reporter.update(UploadStatus::Uploading { sent, total })
        })?;

        reporter.update(UploadStatus::Finalizing);
        remote.run(&format!(
            "mv {} {}",
            quote(&upload_path),
            quote(&remote_path)
        ))?;
        reporter.update(UploadStatus::Done);

        Ok(())
    }
}

/// Pack local sources into gzip-compressed tarball.
///
/// Each source is stored under its paired archive name. Directories are
/// stored recursively, symlinks are stored as symlinks. Returns size of the
/// archive in bytes.
///
/// # Errors
///
/// - Return [`TransferError::Archive`] if any source cannot be read or the
///   archive cannot be written.
pub fn compress(sources: &[(PathBuf, String)], archive: &Path) -> Result<u64> {
    let archive_error = |source: std::io::Error| TransferError::Archive {
        path: archive.to_path_buf(),
        source,
    };

    let file = File::create(archive).map_err(archive_error)?;
    let mut builder = tar::Builder::new(GzEncoder::new(file, Compression::default()));
    builder.follow_symlinks(false);

    for (local, name) in sources {
        let source_error = |source: std::io::Error| TransferError::Archive {
            path: local.clone(),
            source,
        };

        let meta = fs::metadata(local).map_err(source_error)?;
        if meta.is_dir() {
            builder.append_dir_all(name, local).map_err(source_error)?;
        } else {
            builder
                .append_path_with_name(local, name)
                .map_err(source_error)?;
        }
    }

    builder
        .into_inner()
        .and_then(|encoder| encoder.finish())
        .map_err(archive_error)?;

    Ok(fs::metadata(archive).map_err(archive_error)?.len())
}

/// Unique temporary path on remote.
pub fn tmp_path(label: &str) -> String {
    format!(
        "/tmp/boss-{label}-{}",
        Utc::now().format("%Y%m%d%H%M%S%6f")
    )
}

fn base_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| TransferError::NoFileName {
            path: path.to_path_buf(),
        })
}

fn staging_dir() -> Result<TempDir> {
    tempfile::Builder::new()
        .prefix("boss-")
        .tempdir()
        .map_err(TransferError::Staging)
}

fn discard_remote<R>(remote: &R, paths: &[&str])
where
    R: Remote + ?Sized,
{
    let targets = paths.iter().map(|path| quote(path)).collect::<Vec<_>>();
    if let Err(error) = remote.run(&format!("rm -rf {}", targets.join(" "))) {
        warn!("failed to clean up temporary upload on {}: {error}", remote.identity());
    }
}

/// All possible error types for file transfers.
#[derive(Debug, thiserror::Error)]
pub enum TransferError {
    /// Upload was started without registering anything.
    #[error("no files to be uploaded")]
    NothingToUpload,

    /// Source path has no final component to name it by.
    #[error("cannot determine file name of {:?}", path.display())]
    NoFileName { path: PathBuf },

    /// Directory upload was given something else.
    #[error("{:?} is not a directory", path.display())]
    NotADirectory { path: PathBuf },

    /// Local source or archive cannot be read or written.
    #[error("failed to archive {:?}", path.display())]
    Archive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Local staging directory cannot be created.
    #[error("failed to create local staging directory")]
    Staging(#[source] std::io::Error),

    /// Remote side of the transfer fails.
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// Style template cannot be set for progress bars.
    #[error(transparent)]
    IndicatifStyleTemplate(#[from] indicatif::style::TemplateError),
}

/// Friendly result alias :3
pub type Result<T, E = TransferError> = std::result::Result<T, E>;

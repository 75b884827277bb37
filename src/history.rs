// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Release history.
//!
//! Every deployment target carries one JSON document next to its release
//! directories, `builds.json`, that records which builds are retained and
//! which one of them is live. The document is always read in full, changed in
//! memory, and written back in full.
//!
//! # Document Layout
//!
//! ```json
//! {
//!   "bossVersion": "0.1.0",
//!   "preset": "web",
//!   "current": "20230101000000",
//!   "builds": [
//!     {
//!       "id": "20230101000000",
//!       "path": "/home/app/deployment/builds/build-20230101000000",
//!       "branch": "main",
//!       "commit": "1a2b3c4",
//!       "stage": "production",
//!       "createdBy": "kabir",
//!       "timestamp": "2023-01-01 00:00:00 (UTC)"
//!     }
//!   ]
//! }
//! ```
//!
//! The `builds` list is ordered newest first. That ordering is the only thing
//! that defines which build came before which, so records must never be
//! reordered once written.

use crate::{
    path::remote_join,
    remote::{Remote, RemoteError},
};

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    fmt::{Display, Formatter, Result as FmtResult},
};
use tracing::{debug, instrument};

/// Name of history document inside deployment base directory.
pub const HISTORY_FILE: &str = "builds.json";

/// Prefix of every release directory name.
pub const BUILD_DIR_PREFIX: &str = "build-";

/// Version stamped into every history document Boss writes.
pub const TOOL_VERSION: &str = env!("CARGO_PKG_VERSION");

const ID_FORMAT: &str = "%Y%m%d%H%M%S";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S (UTC)";

/// Build identifier.
///
/// Derived from the UTC build time at second resolution, i.e.,
/// `YYYYMMDDHHMMSS`, so identifiers sort lexically in deployment order.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuildId(String);

impl BuildId {
    /// Construct build identifier from build time.
    pub fn from_time(time: DateTime<Utc>) -> Self {
        Self(time.format(ID_FORMAT).to_string())
    }

    /// Build time encoded in identifier.
    ///
    /// Return `None` if the identifier was not produced by
    /// [`BuildId::from_time`].
    pub fn time(&self) -> Option<DateTime<Utc>> {
        NaiveDateTime::parse_from_str(&self.0, ID_FORMAT)
            .ok()
            .map(|time| time.and_utc())
    }

    /// Name of release directory holding this build, i.e., `build-<id>`.
    pub fn dir_name(&self) -> String {
        format!("{BUILD_DIR_PREFIX}{}", self.0)
    }

    /// Extract build identifier from release directory name.
    pub fn from_dir_name(name: &str) -> Option<Self> {
        name.strip_prefix(BUILD_DIR_PREFIX)
            .filter(|id| !id.is_empty())
            .map(Self::from)
    }

    /// Identifier as plain text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for BuildId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for BuildId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl Display for BuildId {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        fmt.write_str(&self.0)
    }
}

/// One deployed build.
///
/// Never changed after it has been added to a history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildRecord {
    /// Unique identifier within history.
    pub id: BuildId,

    /// Absolute remote path of release directory.
    pub path: String,

    /// Branch the build was made from.
    #[serde(default)]
    pub branch: Option<String>,

    /// Abbreviated commit the build was made from.
    #[serde(default)]
    pub commit: Option<String>,

    /// Stage the build was deployed to.
    pub stage: String,

    /// Operator that deployed the build.
    pub created_by: String,

    /// UTC time build was created.
    #[serde(with = "timestamp")]
    pub timestamp: DateTime<Utc>,
}

impl BuildRecord {
    /// Render detailed description of build.
    pub fn details(&self, is_current: bool) -> BuildDetails<'_> {
        BuildDetails {
            record: self,
            is_current,
        }
    }
}

/// Detailed description of one build.
#[derive(Debug)]
pub struct BuildDetails<'a> {
    record: &'a BuildRecord,
    is_current: bool,
}

impl Display for BuildDetails<'_> {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        let record = self.record;
        writeln!(fmt, "Build {}", record.id)?;
        writeln!(fmt, "  ID: {}", record.id)?;
        writeln!(fmt, "  Commit: {}", record.commit.as_deref().unwrap_or_default())?;
        writeln!(fmt, "  Branch: {}", record.branch.as_deref().unwrap_or_default())?;
        writeln!(fmt, "  Stage: {}", record.stage)?;
        writeln!(fmt, "  Created By: {}", record.created_by)?;
        writeln!(fmt, "  Path: {}", record.path)?;
        writeln!(
            fmt,
            "  Current Build: {}",
            if self.is_current { "Yes" } else { "No" }
        )?;
        write!(fmt, "  Timestamp: {}", record.timestamp.format(TIMESTAMP_FORMAT))
    }
}

mod timestamp {
    use super::TIMESTAMP_FORMAT;

    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{de::Error, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(time: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.collect_str(&time.format(TIMESTAMP_FORMAT))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, TIMESTAMP_FORMAT)
            .map(|time| time.and_utc())
            .map_err(D::Error::custom)
    }
}

/// Build history of one deployment target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildHistory {
    /// Version of Boss that last wrote the document.
    #[serde(rename = "bossVersion")]
    pub tool_version: String,

    /// Preset that produced the history.
    #[serde(rename = "preset", default)]
    pub preset_name: Option<String>,

    /// Identifier of live build.
    #[serde(default)]
    pub current: Option<BuildId>,

    /// Retained builds, newest first.
    pub builds: Vec<BuildRecord>,
}

impl BuildHistory {
    /// Construct new empty history.
    pub fn new(preset_name: Option<String>) -> Self {
        Self {
            tool_version: TOOL_VERSION.into(),
            preset_name,
            current: None,
            builds: Vec::new(),
        }
    }

    /// Find build by identifier.
    pub fn find_by_id(&self, id: &BuildId) -> Option<&BuildRecord> {
        self.builds.iter().find(|build| &build.id == id)
    }

    /// Find live build.
    ///
    /// Return `None` if nothing is live yet, or if `current` names a build
    /// that is not in the history.
    pub fn find_current(&self) -> Option<&BuildRecord> {
        self.current.as_ref().and_then(|id| self.find_by_id(id))
    }

    /// Find build deployed right before the live build.
    ///
    /// Purely positional: this is the record right after the live one in the
    /// newest-first build list. Return `None` if nothing is live, or if the
    /// live build is the oldest one retained.
    pub fn find_previous(&self) -> Option<&BuildRecord> {
        let current = self.current.as_ref()?;
        let index = self.builds.iter().position(|build| &build.id == current)?;

        self.builds.get(index + 1)
    }

    /// Newest build in history.
    pub fn latest(&self) -> Option<&BuildRecord> {
        self.builds.first()
    }

    /// Make record the live build, and retain at most `keep` builds.
    ///
    /// The record is added as the newest build. The oldest builds past the
    /// retention bound are dropped. The new record itself is always retained.
    pub fn append(&mut self, record: BuildRecord, keep: usize) {
        self.current = Some(record.id.clone());
        self.builds.insert(0, record);
        self.builds.truncate(keep.max(1));
    }

    /// Release directory names of every retained build.
    pub fn retained_dir_names(&self) -> HashSet<String> {
        self.builds.iter().map(|build| build.id.dir_name()).collect()
    }

    /// Render history as table.
    pub fn table(&self) -> BuildTable<'_> {
        BuildTable { history: self }
    }
}

/// Tabular listing of build history.
///
/// The live build is marked with an arrow.
#[derive(Debug)]
pub struct BuildTable<'a> {
    history: &'a BuildHistory,
}

impl Display for BuildTable<'_> {
    fn fmt(&self, fmt: &mut Formatter<'_>) -> FmtResult {
        if self.history.builds.is_empty() {
            return fmt.write_str("No builds have been deployed yet.");
        }

        let mut rows = vec![[" ", "ID", "Commit", "Branch", "Created By", "Timestamp"]
            .map(String::from)
            .to_vec()];
        for build in &self.history.builds {
            let pointer = if Some(&build.id) == self.history.current.as_ref() {
                "➜"
            } else {
                " "
            };
            rows.push(vec![
                pointer.to_string(),
                build.id.to_string(),
                build.commit.clone().unwrap_or_default(),
                build.branch.clone().unwrap_or_default(),
                build.created_by.clone(),
                build.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            ]);
        }

        let mut widths = vec![0; rows[0].len()];
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.chars().count());
            }
        }

        let lines = rows
            .iter()
            .map(|row| {
                row.iter()
                    .zip(&widths)
                    .map(|(cell, &width)| format!("{cell:<width$}"))
                    .collect::<Vec<_>>()
                    .join("  ")
                    .trim_end()
                    .to_string()
            })
            .collect::<Vec<_>>();

        fmt.write_str(&lines.join("\n"))
    }
}

/// Reads and writes history document of one deployment target.
#[derive(Debug)]
pub struct HistoryStore<'r, R>
where
    R: Remote + ?Sized,
{
    remote: &'r R,
    path: String,
}

impl<'r, R> HistoryStore<'r, R>
where
    R: Remote + ?Sized,
{
    /// Construct new history store for normalized deployment base directory.
    pub fn new(remote: &'r R, base_dir: &str) -> Self {
        Self {
            remote,
            path: remote_join(base_dir, HISTORY_FILE),
        }
    }

    /// Remote path of history document.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Check if history document exists.
    pub fn exists(&self) -> Result<bool> {
        Ok(self.remote.exists(&self.path)?)
    }

    /// Load history document.
    ///
    /// # Errors
    ///
    /// - Return [`HistoryError::NotFound`] if the document does not exist.
    /// - Return [`HistoryError::Corrupt`] if the document is malformed.
    /// - Return [`HistoryError::Remote`] if the document cannot be read.
    #[instrument(skip(self), fields(path = %self.path), level = "debug")]
    pub fn load(&self) -> Result<BuildHistory> {
        if !self.remote.exists(&self.path)? {
            return Err(HistoryError::NotFound {
                path: self.path.clone(),
            });
        }

        let data = self.remote.read_file(&self.path)?;
        serde_json::from_slice(&data).map_err(|source| HistoryError::Corrupt {
            path: self.path.clone(),
            source,
        })
    }

    /// Save history document, replacing it in full.
    ///
    /// The document is stamped with the running version of Boss.
    ///
    /// # Errors
    ///
    /// - Return [`HistoryError::Serialize`] if history cannot be encoded.
    /// - Return [`HistoryError::Remote`] if the document cannot be written.
    #[instrument(skip(self, history), fields(path = %self.path), level = "debug")]
    pub fn save(&self, history: &BuildHistory) -> Result<()> {
        let document = BuildHistory {
            tool_version: TOOL_VERSION.into(),
            ..history.clone()
        };
        let data = serde_json::to_vec_pretty(&document)?;
        self.remote.write_file(&self.path, &data)?;
        debug!("saved {} build(s) to {}", document.builds.len(), self.path);

        Ok(())
    }
}

/// Build time truncated to whole seconds.
pub(crate) fn truncate_to_seconds(time: DateTime<Utc>) -> DateTime<Utc> {
    time.with_nanosecond(0).unwrap_or(time)
}

/// All possible error types for release history.
#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    /// History document does not exist, remote was never set up.
    #[error("build history {path:?} not found, remote is not set up")]
    NotFound { path: String },

    /// History document is malformed or lacks required fields.
    #[error("build history {path:?} is corrupt")]
    Corrupt {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    /// Live build names a build that history does not have.
    #[error("current build {id} is not recorded in build history")]
    DanglingCurrent { id: BuildId },

    /// History cannot be encoded.
    #[error(transparent)]
    Serialize(#[from] serde_json::Error),

    /// Remote cannot be accessed.
    #[error(transparent)]
    Remote(#[from] RemoteError),
}

/// Friendly result alias :3
pub type Result<T, E = HistoryError> = std::result::Result<T, E>;

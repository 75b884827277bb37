// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

//! Version control information about the local project.
//!
//! Only used to label builds. Not being inside a repository at all is fine,
//! the labels just stay empty.

use git2::Repository;
use std::path::Path;
use tracing::debug;

/// Branch and commit of local checkout.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct VcsInfo {
    /// Short name of checked out branch.
    pub branch: Option<String>,

    /// Abbreviated identifier of checked out commit.
    pub commit: Option<String>,
}

impl VcsInfo {
    /// Inspect repository containing path.
    ///
    /// Any failure yields empty values.
    pub fn discover(path: impl AsRef<Path>) -> Self {
        match Self::try_discover(path.as_ref()) {
            Ok(info) => info,
            Err(error) => {
                debug!("no version control information: {}", error.message());
                Self::default()
            }
        }
    }

    fn try_discover(path: &Path) -> Result<Self, git2::Error> {
        let repo = Repository::discover(path)?;
        let head = repo.head()?;

        let branch = head
            .is_branch()
            .then(|| head.shorthand().map(String::from))
            .flatten();
        let commit = head
            .peel_to_commit()?
            .as_object()
            .short_id()?
            .as_str()
            .map(String::from);

        Ok(Self { branch, commit })
    }
}

// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{RepoFixture, Workspace};

use boss::vcs::VcsInfo;

use anyhow::Result;
use pretty_assertions::assert_eq;
use std::fs;

#[test]
fn discover_reads_branch_and_commit() -> Result<()> {
    let ws = Workspace::new()?;
    let repo = RepoFixture::new(ws.project())?;
    repo.stage_and_commit("index.html", "<h1>hi</h1>")?;

    let result = VcsInfo::discover(ws.project());
    let expect = VcsInfo {
        branch: Some("main".into()),
        commit: Some(repo.short_head()?),
    };

    assert_eq!(result, expect);

    Ok(())
}

#[test]
fn discover_follows_checked_out_branch_from_subdirectory() -> Result<()> {
    let ws = Workspace::new()?;
    let repo = RepoFixture::new(ws.project())?;
    repo.stage_and_commit("index.html", "<h1>hi</h1>")?;
    repo.stage_and_commit("about.html", "<h1>about</h1>")?;
    repo.branch("release/2.0")?;
    fs::create_dir(ws.project().join("build"))?;

    let result = VcsInfo::discover(ws.project().join("build"));

    assert_eq!(result.branch.as_deref(), Some("release/2.0"));
    assert_eq!(result.commit, Some(repo.short_head()?));

    Ok(())
}

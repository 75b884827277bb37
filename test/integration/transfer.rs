// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{quiet, CountingRemote, Workspace};

use boss::{
    remote::Remote,
    transfer::{BulkUploader, FileUploader, TransferError, UploadStatus},
};

use anyhow::Result;
use pretty_assertions::assert_eq;
use std::{fs, path::Path};

#[test]
fn bulk_upload_sends_one_archive() -> Result<()> {
    let ws = Workspace::new()?;
    let remote = CountingRemote::new(ws.home());
    let readme = ws.write_project_file("README.md", "# Site")?;
    ws.write_project_file("public/css/site.css", "body {}")?;
    ws.write_project_file("public/index.html", "<h1>hi</h1>")?;

    let mut uploader = BulkUploader::new();
    uploader
        .add(&readme, "~/release/docs/README.md")
        .add(ws.project().join("public"), "~/release/www");
    uploader.upload(&remote, &mut quiet)?;

    let release = ws.home().join("release");
    assert_eq!(remote.uploads(), 1);
    assert_eq!(
        fs::read_to_string(release.join("docs/README.md"))?,
        "# Site"
    );
    assert_eq!(
        fs::read_to_string(release.join("www/css/site.css"))?,
        "body {}"
    );
    assert_eq!(
        fs::read_to_string(release.join("www/index.html"))?,
        "<h1>hi</h1>"
    );

    Ok(())
}

#[test]
fn bulk_upload_reports_every_stage() -> Result<()> {
    let ws = Workspace::new()?;
    let remote = CountingRemote::new(ws.home());
    let page = ws.write_project_file("index.html", "<h1>hi</h1>")?;

    let mut statuses = Vec::new();
    let mut uploader = BulkUploader::new();
    uploader.add(&page, "~/www/index.html");
    uploader.upload(&remote, &mut |status: UploadStatus| statuses.push(status))?;

    let stages = statuses
        .iter()
        .map(|status| match status {
            UploadStatus::Preparing => "preparing",
            UploadStatus::Compressing => "compressing",
            UploadStatus::Compressed { .. } => "compressed",
            UploadStatus::PreparingToUpload { .. } => "preparing-to-upload",
            UploadStatus::Uploading { .. } => "uploading",
            UploadStatus::Finalizing => "finalizing",
            UploadStatus::Done => "done",
        })
        .fold(Vec::new(), |mut stages, stage| {
            if stages.last() != Some(&stage) {
                stages.push(stage);
            }
            stages
        });
    assert_eq!(
        stages,
        vec![
            "preparing",
            "compressing",
            "compressed",
            "preparing-to-upload",
            "uploading",
            "finalizing",
            "done"
        ]
    );

    match statuses.iter().rev().nth(2) {
        Some(UploadStatus::Uploading { sent, total }) => assert_eq!(sent, total),
        other => panic!("expected finished upload, got {other:?}"),
    }

    Ok(())
}

#[test]
fn bulk_upload_needs_entries() -> Result<()> {
    let ws = Workspace::new()?;
    let remote = CountingRemote::new(ws.home());

    assert!(matches!(
        BulkUploader::new().upload(&remote, &mut quiet),
        Err(TransferError::NothingToUpload)
    ));
    assert_eq!(remote.uploads(), 0);

    Ok(())
}

#[test]
fn bulk_upload_failure_discards_temporary_files() -> Result<()> {
    let ws = Workspace::new()?;
    let remote = CountingRemote::new(ws.home());
    let page = ws.write_project_file("index.html", "<h1>hi</h1>")?;
    fs::write(ws.home().join("blocker"), "not a directory")?;

    let mut uploader = BulkUploader::new();
    uploader.add(&page, "~/blocker/www/index.html");
    let result = uploader.upload(&remote, &mut quiet);

    assert!(matches!(result, Err(TransferError::Remote(_))));
    let cleanup = remote.commands().pop().unwrap_or_default();
    assert!(cleanup.starts_with("rm -rf /tmp/boss-upload-"));
    for path in cleanup.split_whitespace().skip(2) {
        assert!(!Path::new(path).exists(), "{path} was left behind");
    }

    Ok(())
}

#[test]
fn directory_upload_extracts_contents_into_place() -> Result<()> {
    let ws = Workspace::new()?;
    let remote = CountingRemote::new(ws.home());
    ws.write_project_file("build/index.html", "<h1>hi</h1>")?;
    ws.write_project_file("build/assets/app.js", "main()")?;

    remote.upload_dir(&ws.project().join("build"), "~/site", &mut quiet)?;

    let site = ws.home().join("site");
    assert_eq!(remote.uploads(), 1);
    assert_eq!(fs::read_to_string(site.join("index.html"))?, "<h1>hi</h1>");
    assert_eq!(fs::read_to_string(site.join("assets/app.js"))?, "main()");

    Ok(())
}

#[test]
fn directory_upload_rejects_files() -> Result<()> {
    let ws = Workspace::new()?;
    let remote = CountingRemote::new(ws.home());
    let page = ws.write_project_file("index.html", "<h1>hi</h1>")?;

    assert!(matches!(
        remote.upload_dir(&page, "~/site", &mut quiet),
        Err(TransferError::NotADirectory { .. })
    ));
    assert_eq!(remote.uploads(), 0);

    Ok(())
}

#[test]
fn file_upload_moves_file_into_place() -> Result<()> {
    let ws = Workspace::new()?;
    let remote = CountingRemote::new(ws.home());
    let env = ws.write_project_file(".env", "PORT=8080")?;
    fs::create_dir(ws.home().join("app"))?;

    FileUploader::new(&env).upload(&remote, "~/app/.env.production", &mut quiet)?;

    assert_eq!(
        fs::read_to_string(ws.home().join("app/.env.production"))?,
        "PORT=8080"
    );

    Ok(())
}

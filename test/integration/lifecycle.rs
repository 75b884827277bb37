// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{at, quiet, CountingRemote, Workspace};

use boss::{
    buildman::{Artifact, BuildError, BuildInputs, BuildManager},
    history::{BuildHistory, BuildId, HistoryError},
    remote::LocalRemote,
};

use anyhow::Result;
use pretty_assertions::assert_eq;
use std::{fs, path::Path};

fn inputs(ws: &Workspace, page: &str) -> Result<BuildInputs> {
    ws.write_project_file("build/index.html", page)?;

    Ok(BuildInputs {
        branch: Some("main".into()),
        commit: Some("a1b2c3d".into()),
        stage: "production".into(),
        created_by: "kabir".into(),
        artifacts: vec![Artifact::new(ws.project().join("build"), "")],
        stage_commands: Vec::new(),
    })
}

fn read_history(ws: &Workspace) -> Result<BuildHistory> {
    Ok(serde_json::from_slice(&fs::read(ws.base_dir().join("builds.json"))?)?)
}

fn release_dirs(ws: &Workspace) -> Result<Vec<String>> {
    let mut names = fs::read_dir(ws.base_dir().join("builds"))?
        .map(|entry| entry.map(|entry| entry.file_name().to_string_lossy().into_owned()))
        .collect::<Result<Vec<_>, _>>()?;
    names.sort();

    Ok(names)
}

fn ids(history: &BuildHistory) -> Vec<&str> {
    history.builds.iter().map(|build| build.id.as_str()).collect()
}

#[test]
fn setup_creates_layout_once() -> Result<()> {
    let ws = Workspace::new()?;
    let remote = CountingRemote::new(ws.home());
    let manager = BuildManager::new(&remote, "~/deployment", 5).with_preset("web");

    let setup = manager.ensure_setup()?;
    assert!(setup.created);
    assert!(ws.base_dir().join("builds").is_dir());

    let history = read_history(&ws)?;
    assert_eq!(history.current, None);
    assert!(history.builds.is_empty());
    assert_eq!(history.preset_name.as_deref(), Some("web"));

    let commands = remote.commands().len();
    let writes = remote.writes();
    let setup = manager.ensure_setup()?;

    assert!(!setup.created);
    assert_eq!(remote.commands().len(), commands);
    assert_eq!(remote.writes(), writes);

    Ok(())
}

#[test]
fn first_deploy_goes_live() -> Result<()> {
    let ws = Workspace::new()?;
    let remote = LocalRemote::new(ws.home());
    let manager = BuildManager::new(&remote, "~/deployment", 5);

    let record = manager.deploy_at(&inputs(&ws, "<h1>v1</h1>")?, at(0, 0, 0), &mut quiet)?;

    let release = ws.base_dir().join("builds/build-20230101000000");
    assert_eq!(record.id, BuildId::from("20230101000000"));
    assert_eq!(record.path, release.to_string_lossy());
    assert_eq!(record.branch.as_deref(), Some("main"));
    assert_eq!(record.created_by, "kabir");
    assert_eq!(ws.current_target()?, release);
    assert_eq!(
        fs::read_to_string(ws.base_dir().join("current/index.html"))?,
        "<h1>v1</h1>"
    );

    let history = read_history(&ws)?;
    assert_eq!(history.current, Some(record.id.clone()));
    assert_eq!(history.builds, vec![record]);

    Ok(())
}

#[test]
fn deploy_resolves_relative_base_dir_against_home() -> Result<()> {
    let ws = Workspace::new()?;
    let remote = LocalRemote::new(ws.home());
    let manager = BuildManager::new(&remote, "deployment", 5);

    let record = manager.deploy_at(&inputs(&ws, "<h1>v1</h1>")?, at(0, 0, 0), &mut quiet)?;

    let release = ws.base_dir().join("builds/build-20230101000000");
    assert!(Path::new(&record.path).is_absolute());
    assert_eq!(record.path, release.to_string_lossy());
    assert_eq!(ws.current_target()?, release);
    assert!(ws.current_target()?.is_dir());
    assert_eq!(
        fs::read_to_string(ws.base_dir().join("current/index.html"))?,
        "<h1>v1</h1>"
    );
    assert_eq!(manager.list_builds()?.current, Some(record.id));

    Ok(())
}

#[test]
fn retry_skips_release_left_by_failed_attempt() -> Result<()> {
    let ws = Workspace::new()?;
    let remote = LocalRemote::new(ws.home());
    let manager = BuildManager::new(&remote, "~/deployment", 5);
    manager.deploy_at(&inputs(&ws, "v1")?, at(0, 0, 0), &mut quiet)?;

    let mut broken = inputs(&ws, "v2")?;
    broken.stage_commands = vec!["false".into()];
    assert!(manager.deploy_at(&broken, at(0, 0, 1), &mut quiet).is_err());
    assert!(ws.base_dir().join("builds/build-20230101000001").is_dir());

    let record = manager.deploy_at(&inputs(&ws, "v2")?, at(0, 0, 1), &mut quiet)?;

    assert_eq!(record.id.as_str(), "20230101000002");
    assert_eq!(fs::read_to_string(ws.base_dir().join("current/index.html"))?, "v2");
    assert_eq!(
        release_dirs(&ws)?,
        vec!["build-20230101000000", "build-20230101000002"]
    );

    Ok(())
}

#[test]
fn deploy_retains_newest_builds() -> Result<()> {
    let ws = Workspace::new()?;
    let remote = LocalRemote::new(ws.home());
    let manager = BuildManager::new(&remote, "~/deployment", 2);

    manager.deploy_at(&inputs(&ws, "v1")?, at(0, 0, 0), &mut quiet)?;
    manager.deploy_at(&inputs(&ws, "v2")?, at(0, 0, 1), &mut quiet)?;
    manager.deploy_at(&inputs(&ws, "v3")?, at(0, 0, 2), &mut quiet)?;

    let history = read_history(&ws)?;
    assert_eq!(ids(&history), vec!["20230101000002", "20230101000001"]);
    assert_eq!(history.current, Some(BuildId::from("20230101000002")));
    assert_eq!(
        release_dirs(&ws)?,
        vec!["build-20230101000001", "build-20230101000002"]
    );
    assert_eq!(
        fs::read_to_string(ws.base_dir().join("current/index.html"))?,
        "v3"
    );

    Ok(())
}

#[test]
fn deploy_in_same_second_keeps_ids_ordered() -> Result<()> {
    let ws = Workspace::new()?;
    let remote = LocalRemote::new(ws.home());
    let manager = BuildManager::new(&remote, "~/deployment", 5);

    let first = manager.deploy_at(&inputs(&ws, "v1")?, at(12, 30, 0), &mut quiet)?;
    let second = manager.deploy_at(&inputs(&ws, "v2")?, at(12, 30, 0), &mut quiet)?;
    let third = manager.deploy_at(&inputs(&ws, "v3")?, at(12, 29, 0), &mut quiet)?;

    assert_eq!(first.id.as_str(), "20230101123000");
    assert_eq!(second.id.as_str(), "20230101123001");
    assert_eq!(third.id.as_str(), "20230101123002");
    assert_eq!(
        ids(&read_history(&ws)?),
        vec!["20230101123002", "20230101123001", "20230101123000"]
    );

    Ok(())
}

#[test]
fn deploy_without_artifacts_creates_empty_release() -> Result<()> {
    let ws = Workspace::new()?;
    let remote = LocalRemote::new(ws.home());
    let manager = BuildManager::new(&remote, "~/deployment", 5);
    let inputs = BuildInputs {
        stage: "staging".into(),
        created_by: "kabir".into(),
        ..Default::default()
    };

    let record = manager.deploy_at(&inputs, at(0, 0, 0), &mut quiet)?;

    assert_eq!(record.branch, None);
    assert_eq!(record.commit, None);
    assert!(ws.base_dir().join("current").is_dir());
    assert_eq!(fs::read_dir(ws.base_dir().join("current"))?.count(), 0);

    Ok(())
}

#[test]
fn deploy_runs_stage_commands_inside_release() -> Result<()> {
    let ws = Workspace::new()?;
    let remote = LocalRemote::new(ws.home());
    let manager = BuildManager::new(&remote, "~/deployment", 5);
    let mut inputs = inputs(&ws, "v1")?;
    inputs.stage_commands = vec![
        "test -f index.html".into(),
        "touch installed".into(),
    ];

    manager.deploy_at(&inputs, at(0, 0, 0), &mut quiet)?;

    assert!(ws.base_dir().join("current/installed").is_file());

    Ok(())
}

#[test]
fn failed_stage_command_keeps_previous_build_live() -> Result<()> {
    let ws = Workspace::new()?;
    let remote = LocalRemote::new(ws.home());
    let manager = BuildManager::new(&remote, "~/deployment", 5);
    let live = manager.deploy_at(&inputs(&ws, "v1")?, at(0, 0, 0), &mut quiet)?;

    let mut broken = inputs(&ws, "v2")?;
    broken.stage_commands = vec!["false".into()];
    let result = manager.deploy_at(&broken, at(0, 0, 1), &mut quiet);

    assert!(matches!(result, Err(BuildError::Remote(_))));
    assert_eq!(ws.current_target()?.to_string_lossy(), live.path);
    assert_eq!(ids(&read_history(&ws)?), vec!["20230101000000"]);

    Ok(())
}

#[test]
fn missing_artifact_keeps_previous_build_live() -> Result<()> {
    let ws = Workspace::new()?;
    let remote = LocalRemote::new(ws.home());
    let manager = BuildManager::new(&remote, "~/deployment", 5);
    let live = manager.deploy_at(&inputs(&ws, "v1")?, at(0, 0, 0), &mut quiet)?;

    let broken = BuildInputs {
        artifacts: vec![Artifact::new(ws.project().join("nowhere"), "")],
        ..inputs(&ws, "v2")?
    };
    let result = manager.deploy_at(&broken, at(0, 0, 1), &mut quiet);

    assert!(matches!(result, Err(BuildError::Transfer(_))));
    assert_eq!(ws.current_target()?.to_string_lossy(), live.path);
    assert_eq!(read_history(&ws)?.current, Some(live.id));

    Ok(())
}

#[test]
fn deploy_rejects_corrupt_history() -> Result<()> {
    let ws = Workspace::new()?;
    let remote = LocalRemote::new(ws.home());
    let manager = BuildManager::new(&remote, "~/deployment", 5);
    manager.ensure_setup()?;
    fs::write(ws.base_dir().join("builds.json"), "{ \"builds\": 42 }")?;

    let result = manager.deploy_at(&inputs(&ws, "v1")?, at(0, 0, 0), &mut quiet);

    assert!(matches!(
        result,
        Err(BuildError::History(HistoryError::Corrupt { .. }))
    ));
    assert!(!ws.base_dir().join("current").exists());

    Ok(())
}

#[test]
fn rollback_walks_back_through_history() -> Result<()> {
    let ws = Workspace::new()?;
    let remote = CountingRemote::new(ws.home());
    let manager = BuildManager::new(&remote, "~/deployment", 5);
    let b0 = manager.deploy_at(&inputs(&ws, "v1")?, at(0, 0, 0), &mut quiet)?;
    let b1 = manager.deploy_at(&inputs(&ws, "v2")?, at(0, 0, 1), &mut quiet)?;
    manager.deploy_at(&inputs(&ws, "v3")?, at(0, 0, 2), &mut quiet)?;
    let uploads = remote.uploads();

    let record = manager.rollback(None)?;
    assert_eq!(record, b1);
    assert_eq!(ws.current_target()?.to_string_lossy(), b1.path);

    let record = manager.rollback(None)?;
    assert_eq!(record, b0);
    assert_eq!(
        fs::read_to_string(ws.base_dir().join("current/index.html"))?,
        "v1"
    );

    let history = read_history(&ws)?;
    assert_eq!(history.current, Some(b0.id));
    assert_eq!(history.builds.len(), 3);
    assert_eq!(remote.uploads(), uploads);
    assert!(matches!(
        manager.rollback(None),
        Err(BuildError::NoPreviousBuild)
    ));

    Ok(())
}

#[test]
fn rollback_to_explicit_build() -> Result<()> {
    let ws = Workspace::new()?;
    let remote = LocalRemote::new(ws.home());
    let manager = BuildManager::new(&remote, "~/deployment", 5);
    let b0 = manager.deploy_at(&inputs(&ws, "v1")?, at(0, 0, 0), &mut quiet)?;
    let b1 = manager.deploy_at(&inputs(&ws, "v2")?, at(0, 0, 1), &mut quiet)?;
    manager.deploy_at(&inputs(&ws, "v3")?, at(0, 0, 2), &mut quiet)?;

    let record = manager.rollback(Some(&b0.id))?;
    assert_eq!(record, b0);
    assert_eq!(read_history(&ws)?.current, Some(b0.id));

    let record = manager.rollback(Some(&b1.id))?;
    assert_eq!(record, b1);
    assert_eq!(ws.current_target()?.to_string_lossy(), b1.path);

    match manager.rollback(Some(&BuildId::from("19990101000000"))) {
        Err(BuildError::BuildNotFound(id)) => assert_eq!(id.as_str(), "19990101000000"),
        other => panic!("expected missing build, got {other:?}"),
    }
    assert_eq!(read_history(&ws)?.current, Some(b1.id));

    Ok(())
}

#[test]
fn rollback_needs_live_build() -> Result<()> {
    let ws = Workspace::new()?;
    let remote = LocalRemote::new(ws.home());
    let manager = BuildManager::new(&remote, "~/deployment", 5);
    manager.ensure_setup()?;

    assert!(matches!(
        manager.rollback(None),
        Err(BuildError::NoCurrentBuild)
    ));

    manager.deploy_at(&inputs(&ws, "v1")?, at(0, 0, 0), &mut quiet)?;
    assert!(matches!(
        manager.rollback(None),
        Err(BuildError::NoPreviousBuild)
    ));

    Ok(())
}

#[test]
fn rollback_rejects_dangling_current() -> Result<()> {
    let ws = Workspace::new()?;
    let remote = LocalRemote::new(ws.home());
    let manager = BuildManager::new(&remote, "~/deployment", 5);
    manager.deploy_at(&inputs(&ws, "v1")?, at(0, 0, 0), &mut quiet)?;
    manager.deploy_at(&inputs(&ws, "v2")?, at(0, 0, 1), &mut quiet)?;

    let mut history = read_history(&ws)?;
    history.current = Some(BuildId::from("20991231235959"));
    fs::write(
        ws.base_dir().join("builds.json"),
        serde_json::to_vec(&history)?,
    )?;

    assert!(matches!(
        manager.rollback(None),
        Err(BuildError::History(HistoryError::DanglingCurrent { .. }))
    ));

    Ok(())
}

#[test]
fn prune_removes_only_unretained_builds() -> Result<()> {
    let ws = Workspace::new()?;
    let remote = LocalRemote::new(ws.home());
    let manager = BuildManager::new(&remote, "~/deployment", 5);
    manager.deploy_at(&inputs(&ws, "v1")?, at(0, 0, 0), &mut quiet)?;

    let builds = ws.base_dir().join("builds");
    fs::create_dir(builds.join("build-19990101000000"))?;
    fs::create_dir(builds.join("build-19990101000001"))?;
    fs::create_dir(builds.join("shared"))?;
    fs::create_dir(builds.join("build-"))?;

    let history = manager.list_builds()?;
    assert_eq!(manager.prune_old_builds(&history)?, 2);
    assert_eq!(manager.prune_old_builds(&history)?, 0);
    assert_eq!(
        release_dirs(&ws)?,
        vec!["build-", "build-20230101000000", "shared"]
    );

    Ok(())
}

#[test]
fn build_info_finds_live_and_named_builds() -> Result<()> {
    let ws = Workspace::new()?;
    let remote = LocalRemote::new(ws.home());
    let manager = BuildManager::new(&remote, "~/deployment", 5);
    let b0 = manager.deploy_at(&inputs(&ws, "v1")?, at(0, 0, 0), &mut quiet)?;
    let b1 = manager.deploy_at(&inputs(&ws, "v2")?, at(0, 0, 1), &mut quiet)?;

    assert_eq!(manager.get_build_info(None)?, Some(b1));
    assert_eq!(manager.get_build_info(Some(&b0.id))?, Some(b0));
    assert_eq!(
        manager.get_build_info(Some(&BuildId::from("19990101000000")))?,
        None
    );

    Ok(())
}

#[test]
fn history_is_restored_when_missing() -> Result<()> {
    let ws = Workspace::new()?;
    let remote = LocalRemote::new(ws.home());
    let manager = BuildManager::new(&remote, "~/deployment", 5);
    manager.ensure_setup()?;
    fs::remove_file(ws.base_dir().join("builds.json"))?;

    assert!(matches!(
        manager.list_builds(),
        Err(BuildError::History(HistoryError::NotFound { .. }))
    ));

    let record = manager.deploy_at(&inputs(&ws, "v1")?, at(0, 0, 0), &mut quiet)?;
    assert_eq!(read_history(&ws)?.builds, vec![record]);

    Ok(())
}

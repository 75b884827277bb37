// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use crate::{quiet, Workspace};

use boss::{
    buildman::BuildError,
    config::{Config, ConfigFile},
    notify::{DeploymentContext, NotificationEvent, Notifications, Notifier, NotifyError},
    preset::{self, Deployment, PresetError, PresetKind},
    remote::LocalRemote,
};

use anyhow::Result;
use indoc::formatdoc;
use pretty_assertions::assert_eq;
use std::{cell::RefCell, fs, rc::Rc};

fn config(preset: PresetKind, scripts: &str) -> Result<Config> {
    let data = formatdoc! {r#"
        project_name = "website"
        app_dir = "~/app"

        [deployment]
        preset = "{preset}"
        base_dir = "~/deployment"
        keep_builds = 3

        [scripts]
        {scripts}

        [stages.production]
        host = "example.com"
    "#};

    Ok(data.parse::<ConfigFile>()?.resolve("production")?)
}

struct Recorder {
    events: Rc<RefCell<Vec<(NotificationEvent, DeploymentContext)>>>,
}

impl Notifier for Recorder {
    fn name(&self) -> &str {
        "recorder"
    }

    fn notify(
        &self,
        event: NotificationEvent,
        context: &DeploymentContext,
    ) -> Result<(), NotifyError> {
        self.events.borrow_mut().push((event, context.clone()));
        Ok(())
    }
}

#[test]
fn web_preset_deploys_and_rolls_back() -> Result<()> {
    let ws = Workspace::new()?;
    let remote = LocalRemote::new(ws.home());
    let config = config(
        PresetKind::Web,
        r#"
        build = "mkdir -p build && echo \"$STAGE\" > build/index.html"
        post_deploy = "touch deployed"
        reload = "touch reloaded"
        "#,
    )?;
    let events = Rc::new(RefCell::new(Vec::new()));
    let mut notifications = Notifications::new();
    notifications.add(Recorder {
        events: Rc::clone(&events),
    });
    let deployment = Deployment::new(&config, &remote, &notifications, quiet)
        .with_project_dir(ws.project())
        .with_user("kabir");
    let preset = preset::select(config.deployment.preset, deployment);

    preset.setup()?;
    preset.deploy()?;

    assert_eq!(
        fs::read_to_string(ws.base_dir().join("current/index.html"))?,
        "production\n"
    );
    assert!(ws.project().join("deployed").is_file());
    assert_eq!(
        events
            .borrow()
            .iter()
            .map(|(event, context)| (*event, context.user.as_str(), context.stage.as_str()))
            .collect::<Vec<_>>(),
        vec![
            (NotificationEvent::DeploymentStarted, "kabir", "production"),
            (NotificationEvent::DeploymentFinished, "kabir", "production"),
        ]
    );

    let first = preset
        .build_info(None)?
        .ok_or_else(|| anyhow::anyhow!("no live build"))?;
    assert!(first.is_current);
    assert_eq!(first.record.created_by, "kabir");
    assert_eq!(first.record.stage, "production");

    preset.deploy()?;
    assert_eq!(preset.builds()?.builds.len(), 2);

    let record = preset.rollback(None)?;
    assert_eq!(record, first.record);
    assert_eq!(
        fs::read_link(ws.base_dir().join("current"))?.to_string_lossy(),
        first.record.path
    );

    preset.restart()?;
    assert!(ws.base_dir().join("current/reloaded").is_file());
    preset.status()?;

    Ok(())
}

#[test]
fn web_preset_requires_build_output() -> Result<()> {
    let ws = Workspace::new()?;
    let remote = LocalRemote::new(ws.home());
    let config = config(PresetKind::Web, r#"build = "true""#)?;
    let notifications = Notifications::new();
    let deployment = Deployment::new(&config, &remote, &notifications, quiet)
        .with_project_dir(ws.project());
    let preset = preset::select(config.deployment.preset, deployment);

    assert!(matches!(
        preset.deploy(),
        Err(PresetError::BuildDirMissing { .. })
    ));
    assert!(!ws.base_dir().join("current").exists());

    Ok(())
}

#[test]
fn web_preset_stops_on_failed_build() -> Result<()> {
    let ws = Workspace::new()?;
    let remote = LocalRemote::new(ws.home());
    let config = config(PresetKind::Web, r#"build = "exit 2""#)?;
    let notifications = Notifications::new();
    let deployment = Deployment::new(&config, &remote, &notifications, quiet)
        .with_project_dir(ws.project());
    let preset = preset::select(config.deployment.preset, deployment);

    assert!(matches!(preset.deploy(), Err(PresetError::Script(_))));
    assert!(!ws.base_dir().exists());

    Ok(())
}

#[test]
fn node_preset_installs_and_reloads_release() -> Result<()> {
    let ws = Workspace::new()?;
    let remote = LocalRemote::new(ws.home());
    ws.write_project_file("package.json", r#"{ "name": "api" }"#)?;
    let config = config(
        PresetKind::Node,
        r#"
        install = "true"
        build = "mkdir -p build && echo 'main()' > build/index.js"
        install_remote = "test -f package.json && echo \"$STAGE\" > installed"
        start_or_reload = "touch started"
        "#,
    )?;
    let notifications = Notifications::new();
    let deployment = Deployment::new(&config, &remote, &notifications, quiet)
        .with_project_dir(ws.project())
        .with_user("kabir");
    let preset = preset::select(config.deployment.preset, deployment);

    preset.deploy()?;

    let current = ws.base_dir().join("current");
    assert_eq!(fs::read_to_string(current.join("dist/index.js"))?, "main()\n");
    assert_eq!(
        fs::read_to_string(current.join("package.json"))?,
        r#"{ "name": "api" }"#
    );
    assert_eq!(fs::read_to_string(current.join("installed"))?, "production\n");
    assert!(current.join("started").is_file());

    assert!(matches!(
        preset.rollback(None),
        Err(PresetError::Build(BuildError::NoPreviousBuild))
    ));

    Ok(())
}

#[test]
fn remote_source_preset_works_in_app_dir() -> Result<()> {
    let ws = Workspace::new()?;
    let remote = LocalRemote::new(ws.home());
    let config = config(
        PresetKind::RemoteSource,
        r#"
        reload = "touch reloaded"
        status_check = "test -f reloaded"
        "#,
    )?;
    let notifications = Notifications::new();
    let deployment = Deployment::new(&config, &remote, &notifications, quiet)
        .with_project_dir(ws.project());
    let preset = preset::select(config.deployment.preset, deployment);

    assert!(matches!(
        preset.setup(),
        Err(PresetError::AppDirMissing { .. })
    ));

    fs::create_dir(ws.home().join("app"))?;
    preset.setup()?;
    assert!(preset.status().is_err());
    preset.restart()?;
    assert!(ws.home().join("app/reloaded").is_file());
    preset.status()?;

    assert!(matches!(
        preset.rollback(None),
        Err(PresetError::Unsupported {
            preset: PresetKind::RemoteSource,
            ..
        })
    ));
    assert!(matches!(
        preset.builds(),
        Err(PresetError::Unsupported { .. })
    ));

    Ok(())
}

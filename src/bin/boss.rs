// SPDX-FileCopyrightText: 2025 Jason Pena <jasonpena@awkless.com>
// SPDX-License-Identifier: MIT

use boss::{
    config::{Config, ConfigFile},
    history::BuildId,
    notify::Notifications,
    path::{default_config_file, home_dir},
    preset::{self, Deployment, Preset, PresetKind},
    remote::{LocalRemote, Remote, SessionPool, SshRemote, SshTarget},
    transfer::ConsoleProgress,
};

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use std::{fs, path::PathBuf, process::exit, rc::Rc};
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Debug, Clone, Parser)]
#[command(
    about,
    override_usage = "\n  boss [options] init\n  boss [options] <command> <stage>",
    subcommand_help_heading = "Commands",
    version
)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, global = true, value_name = "path")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    fn run(self) -> Result<()> {
        let config_path = self.config.unwrap_or_else(default_config_file);
        match self.command {
            Command::Init(opts) => run_init(config_path, opts),
            Command::Setup(opts) => with_preset(config_path, &opts, None, |preset| Ok(preset.setup()?)),
            Command::Deploy(opts) => with_preset(
                config_path,
                &opts.stage,
                opts.branch.clone(),
                |preset| Ok(preset.deploy()?),
            ),
            Command::Rollback(opts) => {
                with_preset(config_path, &opts.stage, None, |preset| {
                    let id = opts.id.as_deref().map(BuildId::from);
                    let record = preset.rollback(id.as_ref())?;
                    info!("Rolled back to build {}", record.id);
                    Ok(())
                })
            }
            Command::Builds(opts) => with_preset(config_path, &opts, None, |preset| {
                println!("{}", preset.builds()?.table());
                Ok(())
            }),
            Command::Info(opts) => with_preset(config_path, &opts.stage, None, |preset| {
                let id = opts.id.as_deref().map(BuildId::from);
                match preset.build_info(id.as_ref())? {
                    Some(info) => println!("{}", info.record.details(info.is_current)),
                    None => match id {
                        Some(id) => bail!("build {id} not found"),
                        None => bail!("no current build found"),
                    },
                }
                Ok(())
            }),
            Command::Status(opts) => with_preset(config_path, &opts, None, |preset| Ok(preset.status()?)),
            Command::Restart(opts) => {
                with_preset(config_path, &opts, None, |preset| Ok(preset.restart()?))
            }
        }
    }
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// Write starter configuration file.
    #[command(override_usage = "boss init [options]")]
    Init(InitOptions),

    /// Prepare remote of stage for deployments.
    #[command(override_usage = "boss setup [options] <stage>")]
    Setup(StageOptions),

    /// Deploy project to stage.
    #[command(override_usage = "boss deploy [options] <stage>")]
    Deploy(DeployOptions),

    /// Make an earlier build of stage live again.
    #[command(override_usage = "boss rollback [options] <stage> [<id>]")]
    Rollback(BuildOptions),

    /// List build history of stage.
    #[command(override_usage = "boss builds [options] <stage>")]
    Builds(StageOptions),

    /// Show build of stage, the live one by default.
    #[command(override_usage = "boss info [options] <stage> [<id>]")]
    Info(BuildOptions),

    /// Show state of deployed project on stage.
    #[command(override_usage = "boss status [options] <stage>")]
    Status(StageOptions),

    /// Restart deployed service on stage.
    #[command(override_usage = "boss restart [options] <stage>")]
    Restart(StageOptions),
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct InitOptions {
    /// Deployment preset of project.
    #[arg(short, long, value_name = "preset", default_value = "web")]
    pub preset: PresetKind,

    /// Overwrite existing configuration file.
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Args, Clone, Debug)]
struct StageOptions {
    /// Name of stage.
    #[arg(required = true, value_name = "stage")]
    pub stage: String,

    /// Deploy to the local machine instead of the stage's host.
    #[arg(short, long)]
    pub local: bool,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct DeployOptions {
    #[command(flatten)]
    pub stage: StageOptions,

    /// Branch to deploy instead of the configured one.
    #[arg(short, long, value_name = "branch")]
    pub branch: Option<String>,
}

#[derive(Parser, Clone, Debug)]
#[command(author, about, long_about)]
struct BuildOptions {
    #[command(flatten)]
    pub stage: StageOptions,

    /// Build identifier, e.g., 20230101000000.
    #[arg(value_name = "id")]
    pub id: Option<String>,
}

/// Remote host of stage.
enum Connection {
    Local(LocalRemote),
    Ssh(Rc<SshRemote>),
}

impl Connection {
    fn open(config: &Config, local: bool, pool: &SessionPool) -> Result<Self> {
        if local {
            return Ok(Self::Local(LocalRemote::new(home_dir()?)));
        }

        Ok(Self::Ssh(pool.connect(&SshTarget::from(&config.connection))?))
    }

    fn as_remote(&self) -> &dyn Remote {
        match self {
            Self::Local(remote) => remote,
            Self::Ssh(remote) => &**remote,
        }
    }
}

fn main() {
    let layer = fmt::layer()
        .compact()
        .with_target(false)
        .with_timer(false)
        .without_time();
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap();
    tracing_subscriber::registry()
        .with(layer)
        .with(filter)
        .init();

    if let Err(error) = Cli::parse().run() {
        error!("{error:?}");
        exit(1);
    }

    exit(0)
}

fn run_init(config_path: PathBuf, opts: InitOptions) -> Result<()> {
    if config_path.exists() && !opts.force {
        bail!(
            "configuration file {:?} already exists, use --force to overwrite it",
            config_path.display()
        );
    }

    fs::write(&config_path, ConfigFile::starter(opts.preset).to_string())?;
    info!("Wrote starter configuration to {}", config_path.display());

    Ok(())
}

fn with_preset(
    config_path: PathBuf,
    opts: &StageOptions,
    branch: Option<String>,
    op: impl FnOnce(&dyn Preset) -> Result<()>,
) -> Result<()> {
    let mut config = Config::load(&config_path, &opts.stage)?;
    if let Some(branch) = branch {
        config.branch = branch;
    }

    let pool = SessionPool::new();
    let connection = Connection::open(&config, opts.local, &pool)?;
    let notifications = Notifications::from_config(&config);
    let deployment = Deployment::new(
        &config,
        connection.as_remote(),
        &notifications,
        ConsoleProgress::new()?,
    );
    let preset = preset::select(config.deployment.preset, deployment);

    op(preset.as_ref())
}

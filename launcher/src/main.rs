//! Console launcher for a module runtime.
//!
//! Resolves configuration from `conf/` (or an exploded archive), deploys the
//! module packages found in the deploy directory and keeps the runtime
//! running until it stops or the process is interrupted.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{error, info, warn};

use launcher::exit_codes;
use launcher::hooks::HookRegistry;
use launcher::io::config::{LaunchOptions, load_configuration, load_system_properties};
use launcher::io::environment::{
    FilesystemEnvironment, LaunchEnvironment, ResourceTreeEnvironment,
};
use launcher::io::resource_tree::ResourceTree;
use launcher::io::settings::ProcessSettings;
use launcher::logging;
use launcher::registry::RegistryRuntimeFactory;
use launcher::supervisor::Supervisor;

#[derive(Parser, Debug)]
#[command(
    name = "launcher",
    version,
    about = "Launch a module runtime and supervise its lifecycle"
)]
struct Cli {
    /// Directory scanned for module packages (overrides `launcher.auto.deploy.dir`).
    #[arg(short = 'b', long = "deploy-dir", value_name = "DEPLOY_DIR")]
    deploy_dir: Option<String>,

    /// Runtime cache location (overrides `runtime.storage`).
    #[arg(value_name = "CACHE_DIR")]
    cache_dir: Option<String>,

    /// Process-wide setting; may be repeated.
    #[arg(short = 'D', value_name = "KEY=VALUE")]
    defines: Vec<String>,

    /// Launch from an exploded application archive instead of the working directory.
    #[arg(long, value_name = "DIR")]
    resource_root: Option<PathBuf>,

    /// Print the resolved configuration as JSON and exit.
    #[arg(long)]
    print_config: bool,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(err) => {
            let code = if err.use_stderr() {
                exit_codes::USAGE
            } else {
                exit_codes::OK
            };
            if let Err(print_err) = err.print() {
                eprintln!("{err}: {print_err}");
            }
            std::process::exit(code);
        }
    };

    logging::init();
    if let Err(err) = run(cli) {
        eprintln!("{:#}", err);
        std::process::exit(exit_codes::FAILED);
    }
}

fn run(cli: Cli) -> Result<()> {
    let mut settings = ProcessSettings::from_process();
    for definition in &cli.defines {
        settings
            .define(definition)
            .with_context(|| format!("apply -D {definition}"))?;
    }

    let environment: Arc<dyn LaunchEnvironment> = match &cli.resource_root {
        Some(root) => {
            let tree = ResourceTree::from_dir(root)
                .with_context(|| format!("load resource tree {}", root.display()))?;
            Arc::new(ResourceTreeEnvironment::new(tree))
        }
        None => {
            let root = std::env::current_dir().context("resolve working directory")?;
            Arc::new(FilesystemEnvironment::new(root))
        }
    };
    let options = LaunchOptions {
        deploy_dir: cli.deploy_dir,
        storage_dir: cli.cache_dir,
    };

    if cli.print_config {
        load_system_properties(environment.as_ref(), &mut settings)
            .context("load system properties")?;
        let config = load_configuration(environment.as_ref(), &settings, &options)
            .context("load configuration")?;
        let payload = serde_json::to_string_pretty(&config).context("serialize configuration")?;
        println!("{payload}");
        return Ok(());
    }

    let hooks = Arc::new(HookRegistry::new());
    spawn_interrupt_listener(Arc::clone(&hooks))?;

    let mut supervisor = Supervisor::new(
        environment,
        settings,
        Box::new(RegistryRuntimeFactory),
        hooks,
    );
    let reason = supervisor.run(&options).context("launch runtime")?;
    info!(reason = ?reason, "launcher exiting");
    Ok(())
}

/// Run the registered exit hooks on the first Ctrl-C.
///
/// With no hook registered, or on a repeated interrupt, the process exits
/// immediately with [`exit_codes::FAILED`].
fn spawn_interrupt_listener(hooks: Arc<HookRegistry>) -> Result<()> {
    let signals = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("build signal runtime")?;
    std::thread::Builder::new()
        .name("launcher-signal".to_string())
        .spawn(move || {
            signals.block_on(async {
                loop {
                    if let Err(err) = tokio::signal::ctrl_c().await {
                        error!(err = %err, "unable to listen for interrupt");
                        return;
                    }
                    // `run_all` empties the table, so a repeated interrupt exits here.
                    if hooks.is_empty() {
                        warn!("interrupt received; exiting without cleanup");
                        std::process::exit(exit_codes::FAILED);
                    }
                    info!("interrupt received");
                    let hooks = Arc::clone(&hooks);
                    let spawned = std::thread::Builder::new()
                        .name("launcher-exit-hooks".to_string())
                        .spawn(move || hooks.run_all());
                    if let Err(err) = spawned {
                        error!(err = %err, "unable to run exit hooks");
                        std::process::exit(exit_codes::FAILED);
                    }
                }
            });
        })
        .context("spawn signal listener")?;
    Ok(())
}

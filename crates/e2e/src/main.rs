//! Scenario runner entry point
//!
//! Runs the YAML scenarios against a running (or spawned) ChatBattles app.
//! Exit status: 0 all passed, 1 any scenario failed, 2 runner error.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use chatbattles_e2e::config::ReadinessMode;
use chatbattles_e2e::target::TargetHandle;
use chatbattles_e2e::{ChromiumLauncher, RunnerConfig, Scenario, ScenarioRunner};

#[derive(Parser, Debug)]
#[command(name = "chatbattles-e2e")]
#[command(about = "Browser-driven E2E scenario runner for ChatBattles.ai")]
struct Args {
    /// Runner configuration file (missing file = defaults)
    #[arg(short, long, default_value = "e2e.toml")]
    config: PathBuf,

    /// Scenario directory (overrides the config file)
    #[arg(short, long)]
    scenarios: Option<PathBuf>,

    /// Run only scenarios carrying this tag
    #[arg(short, long)]
    tag: Option<String>,

    /// Run only the named scenario (repeatable)
    #[arg(short, long)]
    name: Vec<String>,

    /// Base URL of the application under test
    #[arg(long, env = "CHATBATTLES_BASE_URL")]
    base_url: Option<String>,

    /// Chromium binary (auto-detected when unset)
    #[arg(long, env = "CHATBATTLES_CHROME_BIN")]
    chrome: Option<PathBuf>,

    /// Show the browser window
    #[arg(long)]
    headed: bool,

    /// Pre-action wait: fixed or poll
    #[arg(long)]
    readiness: Option<ReadinessMode>,

    /// Scenarios to run concurrently
    #[arg(short, long)]
    jobs: Option<usize>,

    /// Output directory for results
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Command that starts the application before the run
    #[arg(long)]
    start_command: Option<String>,

    /// Skip the reachability probe of the base URL
    #[arg(long)]
    no_probe: bool,

    /// List selected scenarios and exit
    #[arg(long)]
    list: bool,

    /// Debug-level logging (RUST_LOG still wins)
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("Error: failed to create tokio runtime: {}", e);
            std::process::exit(2);
        }
    };

    match rt.block_on(async_main(args)) {
        Ok(true) => std::process::exit(0),
        Ok(false) => std::process::exit(1),
        Err(e) => {
            eprintln!("Error: {:#}", e);
            std::process::exit(2);
        }
    }
}

fn apply_overrides(config: &mut RunnerConfig, args: &Args) {
    if let Some(dir) = &args.scenarios {
        config.scenarios_dir = dir.clone();
    }
    if let Some(url) = &args.base_url {
        config.target.base_url = url.clone();
    }
    if let Some(chrome) = &args.chrome {
        config.session.chrome_executable = Some(chrome.clone());
    }
    if args.headed {
        config.session.headless = false;
    }
    if let Some(mode) = args.readiness {
        config.readiness.mode = mode;
    }
    if let Some(jobs) = args.jobs {
        config.jobs = jobs;
    }
    if let Some(output) = &args.output {
        config.output_dir = output.clone();
    }
    if let Some(command) = &args.start_command {
        config.target.start_command = Some(command.clone());
    }
    if args.no_probe {
        config.target.probe = false;
    }
}

async fn async_main(args: Args) -> anyhow::Result<bool> {
    let mut config = RunnerConfig::load(&args.config)
        .with_context(|| format!("loading {}", args.config.display()))?;
    apply_overrides(&mut config, &args);
    config.validate()?;

    let scenarios = Scenario::load_all(&config.scenarios_dir)
        .with_context(|| format!("loading scenarios from {}", config.scenarios_dir.display()))?;
    let selected = ScenarioRunner::select(scenarios, args.tag.as_deref(), &args.name)?;

    if args.list {
        for scenario in &selected {
            println!("{:<40} {}", scenario.name, scenario.description);
        }
        return Ok(true);
    }
    if selected.is_empty() {
        bail!("no scenarios selected");
    }

    // Kept alive for the whole run; dropping it stops a spawned app.
    let target = TargetHandle::ensure(&config.target).await?;

    let runner = ScenarioRunner::new(config, Arc::new(ChromiumLauncher));
    let results = runner.run_all(&selected).await;
    runner.write_results(&results)?;

    drop(target);
    Ok(results.success())
}

//! mender - drive remediation runs from the command line.
//!
//! 状態は `--state-dir` 配下の JSON file に永続化されます。
//! collaborator は scripted 実装なので、実際の container や git には触りません。

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, bail};
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use mender_core::app::{EngineBuilder, TickLoop, WorkflowEngine};
use mender_core::config::EngineConfig;
use mender_core::domain::TaskKey;
use mender_core::impls::{InMemoryStateStore, JsonFileStateStore, TokioWakeQueue};
use mender_core::ports::{Clock, StateStore, SystemClock};
use mender_core::remediation::scripted::{ScriptedFixer, ScriptedSandbox, ScriptedSourceControl};
use mender_core::remediation::{Collaborators, RemediationParams, RemediationStep, register_all};

#[derive(Parser)]
#[command(name = "mender")]
#[command(about = "Durable remediation workflows for failing builds")]
struct Args {
    /// Engine config (TOML). Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding one JSON document per task
    #[arg(long, global = true, default_value = ".mender-state")]
    state_dir: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start (or restart) a remediation run. `run` picks it up.
    Start {
        #[arg(long)]
        repository: String,

        #[arg(long)]
        branch: String,

        #[arg(long)]
        base_branch: Option<String>,

        #[arg(long, default_value = "cargo test")]
        build_command: String,

        /// Task key; defaults to `<repository>@<branch>`
        #[arg(long)]
        key: Option<String>,
    },

    /// Print the status of one task as JSON
    Status { key: String },

    /// Print the decision history of one task, one JSON record per line
    History { key: String },

    /// Tick persisted tasks until Ctrl-C
    ///
    /// Workflow state is durable but the scripted sandbox lives in memory.
    /// A task stopped mid-pipeline loses its sandbox files; once resumed, its
    /// later steps fail and the task parks. `start` it again to rerun it.
    Run {
        /// Transient failures the scripted fix generator reports first
        #[arg(long, default_value_t = 0)]
        fixer_failures: u32,
    },

    /// Run one remediation in memory and print its trace
    Demo {
        #[arg(long, default_value_t = 2)]
        fixer_failures: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .compact()
        .init();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Start {
            repository,
            branch,
            base_branch,
            build_command,
            key,
        } => {
            let mut params = RemediationParams::new(repository, branch);
            params.base_branch = base_branch;
            params.build_command = build_command;
            let key = TaskKey::new(key.unwrap_or_else(|| params.task_key()));

            let store = file_store(&args.state_dir).await?;
            let wakes = wake_queue();
            let engine = build_engine(config, store, wakes, scripted(0))?;
            let receipt = engine.start(key, serde_json::to_value(&params)?).await?;
            println!("started {} run_id={}", receipt.task_key, receipt.run_id);
        }
        Command::Status { key } => {
            let engine = read_only_engine(config, &args.state_dir).await?;
            let key = TaskKey::new(key);
            let Some(view) = engine.status(&key).await? else {
                bail!("unknown task {key}");
            };
            println!("{}", serde_json::to_string_pretty(&view)?);
        }
        Command::History { key } => {
            let engine = read_only_engine(config, &args.state_dir).await?;
            for record in engine.decisions(&TaskKey::new(key)).await? {
                println!("{}", serde_json::to_string(&record)?);
            }
        }
        Command::Run { fixer_failures } => {
            let store = file_store(&args.state_dir).await?;
            let wakes = wake_queue();
            let engine = build_engine(config, store, wakes.clone(), scripted(fixer_failures))?;
            let driver = TickLoop::resume(engine, wakes).await?;
            info!(state_dir = %args.state_dir.display(), "running; Ctrl-C to stop");
            tokio::signal::ctrl_c()
                .await
                .context("install Ctrl-C handler")?;
            driver.shutdown_and_join().await;
        }
        Command::Demo { fixer_failures } => demo(args.config.is_some(), config, fixer_failures).await?,
    }
    Ok(())
}

fn load_config(path: Option<&Path>) -> anyhow::Result<EngineConfig> {
    let config = match path {
        Some(path) => EngineConfig::load(path)?,
        None => EngineConfig::default(),
    };
    config.validate()?;
    Ok(config)
}

async fn file_store(dir: &Path) -> anyhow::Result<Arc<dyn StateStore<RemediationStep>>> {
    let store = JsonFileStateStore::<RemediationStep>::open(dir)
        .await
        .with_context(|| format!("open state dir {}", dir.display()))?;
    Ok(Arc::new(store))
}

fn wake_queue() -> Arc<TokioWakeQueue> {
    Arc::new(TokioWakeQueue::new(Arc::new(SystemClock)))
}

fn scripted(fixer_failures: u32) -> Collaborators {
    Collaborators {
        sandbox: Arc::new(ScriptedSandbox::new()),
        fixer: Arc::new(ScriptedFixer::new(fixer_failures)),
        scm: Arc::new(ScriptedSourceControl::new()),
    }
}

fn build_engine(
    config: EngineConfig,
    store: Arc<dyn StateStore<RemediationStep>>,
    wakes: Arc<TokioWakeQueue>,
    collaborators: Collaborators,
) -> anyhow::Result<WorkflowEngine<RemediationStep>> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let builder = EngineBuilder::<RemediationStep>::new()
        .store(store)
        .wakes(wakes)
        .clock(clock)
        .config(config);
    Ok(register_all(builder, collaborators)?.build()?)
}

/// Engine for queries only: wakes go nowhere.
async fn read_only_engine(
    config: EngineConfig,
    dir: &Path,
) -> anyhow::Result<WorkflowEngine<RemediationStep>> {
    let store = file_store(dir).await?;
    let builder = EngineBuilder::<RemediationStep>::new()
        .store(store)
        .config(config);
    Ok(register_all(builder, scripted(0))?.build()?)
}

async fn demo(custom_config: bool, config: EngineConfig, fixer_failures: u32) -> anyhow::Result<()> {
    // 既定の tick 間隔だと demo が長すぎるので縮める
    let config = if custom_config {
        config
    } else {
        EngineConfig {
            tick_interval_ms: 200,
            initial_delay_ms: 50,
            max_retry_delay_ms: 1_000,
            ..config
        }
    };
    let store: Arc<dyn StateStore<RemediationStep>> = Arc::new(InMemoryStateStore::new());
    let wakes = wake_queue();
    let engine = build_engine(config, store, wakes.clone(), scripted(fixer_failures))?;
    let driver = TickLoop::spawn(engine.clone(), wakes);

    let params = RemediationParams::new("acme/api", "main");
    let key = TaskKey::new(params.task_key());
    engine.start(key.clone(), serde_json::to_value(&params)?).await?;

    let mut last = None;
    let finished = tokio::time::timeout(Duration::from_secs(60), async {
        loop {
            if let Some(view) = engine.status(&key).await? {
                let line = format!("{} {:?} attempt={}", view.current_step, view.progress, view.attempt);
                if last.as_ref() != Some(&line) {
                    println!("{line}");
                    last = Some(line);
                }
                if view.parked {
                    return Ok::<_, anyhow::Error>(view);
                }
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await
    .context("demo run did not finish within 60s")??;
    driver.shutdown_and_join().await;

    println!("--- decisions");
    for record in engine.decisions(&key).await? {
        println!("{} {} {}", record.policy, record.decision, record.trigger);
    }
    println!("--- final status");
    println!("{}", serde_json::to_string_pretty(&finished)?);
    Ok(())
}

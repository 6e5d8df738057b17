use anyhow::{Context, Result};
use jobflow::cache::{CacheStore, FilesystemCacheStore};
use jobflow::cli::commands::{HistoryCommand, PlanCommand, RunCommand, ValidateCommand};
use jobflow::cli::output::*;
use jobflow::cli::{Cli, Command};
use jobflow::core::{config::PipelineConfig, DefinitionError, Pipeline, TriggerContext};
use jobflow::execution::{ExecutionEngine, ExecutionEvent};
use jobflow::persistence::{InMemoryPersistence, PersistenceBackend, RunSummary};
use jobflow::runner::{CachingStepRunner, ShellStepRunner};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::from_args();

    // Initialize logging; RUST_LOG wins over --verbose
    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    // Execute command
    match &cli.command {
        Command::Run(cmd) => run_pipeline(cmd).await?,
        Command::Validate(cmd) => validate_pipeline(cmd)?,
        Command::Plan(cmd) => plan_pipeline(cmd)?,
        Command::History(cmd) => show_history(cmd).await?,
    }

    Ok(())
}

/// Load and validate a pipeline, exiting with a readable message on a
/// definition error
fn load_pipeline(file: &str, trigger: TriggerContext) -> Result<(PipelineConfig, Pipeline)> {
    let config = match PipelineConfig::from_file(file) {
        Ok(config) => config,
        Err(e) => {
            report_load_error(&e);
            std::process::exit(1);
        }
    };
    let pipeline = config.to_pipeline(trigger)?;
    Ok((config, pipeline))
}

fn report_load_error(e: &anyhow::Error) {
    println!("{} Invalid pipeline definition:", CROSS);
    match e.downcast_ref::<DefinitionError>() {
        Some(def) => {
            println!("  {}", style(def).red());
            println!("  Jobs: {}", style(def.job_ids().join(", ")).bold());
        }
        None => println!("  {}", style(format!("{:#}", e)).red()),
    }
}

fn base_dir(file: &str) -> PathBuf {
    Path::new(file)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

async fn history_store(no_history: bool) -> Result<Arc<dyn PersistenceBackend>> {
    if no_history {
        return Ok(Arc::new(InMemoryPersistence::new()));
    }

    #[cfg(feature = "sqlite")]
    {
        Ok(Arc::new(
            jobflow::persistence::SqliteRunStore::with_default_path().await?,
        ))
    }

    #[cfg(not(feature = "sqlite"))]
    {
        warn!("Built without sqlite support; history is not persisted");
        Ok(Arc::new(InMemoryPersistence::new()))
    }
}

async fn run_pipeline(cmd: &RunCommand) -> Result<()> {
    let (config, mut pipeline) = load_pipeline(&cmd.file, cmd.trigger.to_context())?;

    if !cmd.json {
        println!("{} Loaded pipeline: {}", INFO, style(&config.name).bold());
    }

    if cmd.fail_fast {
        pipeline.fail_fast = true;
    }
    match cmd.critical_override(pipeline.graph()) {
        Ok(Some(critical)) => pipeline.critical = critical,
        Ok(None) => {}
        Err(e) => {
            report_load_error(&anyhow::Error::from(e));
            std::process::exit(1);
        }
    }

    let workdir = base_dir(&cmd.file);
    pipeline.compute_manifest_hashes(&workdir);

    let cache_root = cmd
        .cache_dir
        .clone()
        .unwrap_or_else(FilesystemCacheStore::default_root);
    info!("Using cache directory {}", cache_root.display());
    let cache: Arc<dyn CacheStore> = Arc::new(FilesystemCacheStore::new(cache_root));
    let runner = CachingStepRunner::new(
        ShellStepRunner::new().with_workdir(&workdir),
        cache,
        &workdir,
    );

    let store = history_store(cmd.no_history).await?;

    // Progress goes to the terminal unless a JSON report is requested
    let progress = create_progress_bar(pipeline.instances.len());
    if cmd.json {
        progress.finish_and_clear();
    }
    let handler_progress = progress.clone();
    let quiet = cmd.json;

    let engine = ExecutionEngine::new(runner, cmd.scheduling_strategy()).with_event_handler(
        move |event| {
            if !quiet {
                handler_progress.println(format_execution_event(&event));
            }
            if let ExecutionEvent::InstanceFinished { .. }
            | ExecutionEvent::InstanceSkipped { .. }
            | ExecutionEvent::InstanceCancelled { .. } = &event
            {
                handler_progress.inc(1);
            }
        },
    );

    // Ctrl-C stops dispatching new work; running instances finish
    let cancel = engine.cancel_handle();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling pending instances");
            cancel.cancel();
        }
    });

    let result = engine.execute(&mut pipeline).await;
    progress.finish_and_clear();

    let report = match result {
        Ok(report) => report,
        Err(e) => {
            error!("{}", e);
            println!(
                "\n{} {} {}",
                CROSS,
                style(&pipeline.name).bold(),
                style("aborted").red()
            );
            std::process::exit(1);
        }
    };

    if let Some(path) = &cmd.report {
        std::fs::write(path, report.to_json()?)
            .with_context(|| format!("Failed to write report to {}", path.display()))?;
    }

    if cmd.json {
        println!("{}", report.to_json()?);
    } else {
        println!("\n{}", format_report(&report));
    }

    if !cmd.no_history {
        let summary = RunSummary::from_report(&report);
        store.save_run(&summary).await?;
        if !cmd.json {
            println!(
                "\n{} Run saved to history (ID: {})",
                INFO,
                style(&summary.run_id.to_string()[..8]).dim()
            );
        }
    }

    std::process::exit(report.exit_code());
}

fn validate_pipeline(cmd: &ValidateCommand) -> Result<()> {
    let (config, pipeline) = load_pipeline(&cmd.file, TriggerContext::default())?;
    let order = pipeline.graph().order();

    if cmd.json {
        let jobs: Vec<_> = order
            .iter()
            .map(|id| {
                serde_json::json!({
                    "id": id,
                    "rank": pipeline.graph().rank(id),
                    "depends_on": pipeline.graph().dependencies(id),
                    "instances": pipeline.instances_of(id).count(),
                })
            })
            .collect();
        let data = serde_json::json!({
            "valid": true,
            "pipeline": config.name,
            "order": order,
            "jobs": jobs,
            "collapsed": pipeline.collapsed,
        });
        println!("{}", serde_json::to_string_pretty(&data)?);
        return Ok(());
    }

    println!("{}", format_validation(&pipeline));
    Ok(())
}

fn plan_pipeline(cmd: &PlanCommand) -> Result<()> {
    let (_, mut pipeline) = load_pipeline(&cmd.file, cmd.trigger.to_context())?;
    pipeline.compute_manifest_hashes(&base_dir(&cmd.file));

    if !cmd.json {
        println!("{}", format_plan(&pipeline));
        return Ok(());
    }

    let mut order: Vec<usize> = (0..pipeline.instances.len()).collect();
    order.sort_by_key(|&idx| pipeline.dispatch_key(idx));
    let instances: Vec<_> = order
        .into_iter()
        .map(|idx| {
            let inst = &pipeline.instances[idx];
            serde_json::json!({
                "name": inst.name(),
                "job": inst.job_id,
                "coordinate": inst.coordinate,
                "rank": pipeline.graph().rank(&inst.job_id),
                "dependencies": pipeline.graph().dependencies(&inst.job_id),
                "cache_keys": pipeline.cache_chain(idx).map(|c| c.keys),
            })
        })
        .collect();
    let data = serde_json::json!({
        "pipeline": pipeline.name,
        "instances": instances,
        "collapsed": pipeline.collapsed,
    });
    println!("{}", serde_json::to_string_pretty(&data)?);
    Ok(())
}

async fn show_history(cmd: &HistoryCommand) -> Result<()> {
    let store = history_store(false).await?;

    // If a specific run ID is requested
    if let Some(run_id) = &cmd.run_id {
        let run_id = uuid::Uuid::parse_str(run_id).context("Invalid run ID format")?;
        match store.load_run(run_id).await? {
            Some(summary) if cmd.json => println!("{}", serde_json::to_string_pretty(&summary)?),
            Some(summary) => println!("{}", format_run_summary(&summary)),
            None => println!("{} Run not found", WARN),
        }
        return Ok(());
    }

    // List runs for one pipeline or all
    let mut runs = match &cmd.pipeline {
        Some(name) => store.list_runs(name).await?,
        None => {
            let mut all = Vec::new();
            for name in store.list_pipelines().await? {
                all.extend(store.list_runs(&name).await?);
            }
            all.sort_by(|a, b| b.started_at.cmp(&a.started_at));
            all
        }
    };
    runs.truncate(cmd.limit);

    if runs.is_empty() {
        println!("{} No runs found", INFO);
        return Ok(());
    }

    if cmd.json {
        let data = serde_json::json!({ "runs": runs });
        println!("{}", serde_json::to_string_pretty(&data)?);
    } else {
        println!("{} Run history (showing latest {}):", INFO, runs.len());
        for summary in &runs {
            println!("  {}", format_run_summary(summary));
        }
    }

    Ok(())
}

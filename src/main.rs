use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use operon_engine::{IterationMode, PipelineEngine};
use operon_jobs::HttpJobService;
use operon_workspace::{BlockStatus, PipelineDef};

/// Operon - pipeline execution engine for protein analysis workflows
#[derive(Parser)]
#[command(name = "operon")]
#[command(version, about, long_about = None)]
struct Cli {
  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Run a pipeline against a job backend
  Run {
    /// Path to the pipeline definition file (JSON)
    pipeline_file: PathBuf,

    /// Block to run; defaults to the first block in the pipeline
    #[arg(long)]
    block: Option<String>,

    /// Chain downstream blocks automatically on completion
    #[arg(long)]
    automate: bool,

    /// Job backend base URL
    #[arg(long, default_value = "http://localhost:5000")]
    backend: String,

    /// Loop over the range starting at this block id
    #[arg(long, requires = "loop_end")]
    loop_start: Option<String>,

    /// Loop over the range ending at this block id
    #[arg(long, requires = "loop_start")]
    loop_end: Option<String>,

    /// Number of loop iterations (count mode)
    #[arg(long)]
    iterations: Option<u32>,
  },

  /// Validate a pipeline definition file
  Check {
    /// Path to the pipeline definition file (JSON)
    pipeline_file: PathBuf,
  },
}

fn main() -> Result<()> {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::from_default_env())
    .init();

  let cli = Cli::parse();
  match cli.command {
    Commands::Run {
      pipeline_file,
      block,
      automate,
      backend,
      loop_start,
      loop_end,
      iterations,
    } => {
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(run_pipeline(
        pipeline_file,
        block,
        automate,
        backend,
        loop_start,
        loop_end,
        iterations,
      ))
    }
    Commands::Check { pipeline_file } => check_pipeline(pipeline_file),
  }
}

#[allow(clippy::too_many_arguments)]
async fn run_pipeline(
  pipeline_file: PathBuf,
  block: Option<String>,
  automate: bool,
  backend: String,
  loop_start: Option<String>,
  loop_end: Option<String>,
  iterations: Option<u32>,
) -> Result<()> {
  let workspace = load_workspace(&pipeline_file).await?;
  eprintln!("Loaded pipeline with {} blocks", workspace.blocks().len());

  let jobs = HttpJobService::new(&backend)
    .with_context(|| format!("failed to create job client for {}", backend))?;
  let engine = PipelineEngine::new(jobs);
  engine.replace_workspace(workspace);
  engine.set_automation(automate);

  let cancel = CancellationToken::new();
  let runner = engine.clone();
  let token = cancel.clone();
  let dispatch = tokio::spawn(async move { runner.run(token).await });

  if let (Some(start), Some(end)) = (loop_start, loop_end) {
    engine.set_loop_start(Some(start));
    engine.set_loop_end(Some(end));
    if let Some(target) = iterations {
      engine.set_iteration_mode(IterationMode::Count { target });
    }
    engine.start_loop().await.context("failed to start loop")?;
  } else {
    let target = block
      .or_else(|| engine.blocks().first().map(|b| b.id.clone()))
      .context("pipeline has no blocks")?;
    eprintln!("Running block: {}", target);
    engine.run_block(&target, None).await;
  }

  wait_for_quiescence(&engine).await;
  cancel.cancel();
  dispatch.await.context("event loop panicked")??;

  let mut report = serde_json::Map::new();
  for block in engine.blocks() {
    report.insert(
      block.id.clone(),
      serde_json::json!({ "status": block.status, "output": block.output }),
    );
  }
  println!(
    "{}",
    serde_json::to_string_pretty(&serde_json::Value::Object(report))?
  );

  Ok(())
}

fn check_pipeline(pipeline_file: PathBuf) -> Result<()> {
  let content = std::fs::read_to_string(&pipeline_file)
    .with_context(|| format!("failed to read pipeline file: {}", pipeline_file.display()))?;
  let def: PipelineDef = serde_json::from_str(&content)
    .with_context(|| format!("failed to parse pipeline file: {}", pipeline_file.display()))?;
  let name = def.name.clone();
  let workspace = def
    .into_workspace()
    .context("pipeline failed validation")?;

  let connection_count: usize = workspace.connections().values().map(|t| t.len()).sum();
  eprintln!(
    "Pipeline '{}' is valid: {} blocks, {} connections",
    name,
    workspace.blocks().len(),
    connection_count
  );
  Ok(())
}

async fn load_workspace(pipeline_file: &PathBuf) -> Result<operon_workspace::Workspace> {
  let content = tokio::fs::read_to_string(pipeline_file)
    .await
    .with_context(|| format!("failed to read pipeline file: {}", pipeline_file.display()))?;
  let def: PipelineDef = serde_json::from_str(&content)
    .with_context(|| format!("failed to parse pipeline file: {}", pipeline_file.display()))?;
  def
    .into_workspace()
    .context("pipeline failed validation")
}

/// Wait until no block is running, no chaining is pending, and no loop
/// is active, sampled stably over a few ticks.
async fn wait_for_quiescence(engine: &PipelineEngine<HttpJobService>) {
  let mut settled = 0;
  loop {
    let busy = engine
      .blocks()
      .iter()
      .any(|b| b.status == BlockStatus::Running)
      || engine.watermark().is_some()
      || engine.loop_state().enabled;
    if busy {
      settled = 0;
    } else {
      settled += 1;
      if settled >= 3 {
        return;
      }
    }
    tokio::time::sleep(Duration::from_millis(200)).await;
  }
}

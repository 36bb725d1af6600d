use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use log::info;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::analysis::project_name;
use crate::config::{CauseSearchStrategy, PipelineConfig};
use crate::dispatch::{self, CommandChannel, Dispatcher, LocalDispatcher, RemoteDispatcher};
use crate::folders::ResultsFolders;
use crate::pipeline::{JsonLinesSink, LogSink, PipelineOrchestrator, ProgressSink};
use crate::worker::Worker;

#[derive(Parser, Debug)]
#[command(author, version, about = "Detect performance changes between revisions and localize their root cause", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run test selection, measurement and root-cause analysis for one revision pair
    Run(RunArgs),
    /// Execute one work request read from stdin and answer on stdout
    Worker(WorkspaceArgs),
}

#[derive(Args, Debug)]
pub struct WorkspaceArgs {
    /// Checkout of the project under test
    #[arg(short, long)]
    pub project: PathBuf,

    /// Directory holding the result trees; defaults to the user's data directory
    #[arg(short, long)]
    pub data: Option<PathBuf>,

    /// JSON configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Name of the result tree, defaults to the checkout's directory name
    #[arg(long)]
    pub project_name: Option<String>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub workspace: WorkspaceArgs,

    /// Current revision
    #[arg(long)]
    pub current: Option<String>,

    /// Old revision; without it the configured distance or the last nightly revision is used
    #[arg(long)]
    pub old: Option<String>,

    /// Tests to analyze, e.g. "de.test.CalleeTest#*;de.test.OtherTest#run"
    #[arg(long)]
    pub includes: Option<String>,

    /// Skip root-cause analysis
    #[arg(long)]
    pub no_rca: bool,

    /// Root-cause strategy (COMPLETE or LEVELWISE)
    #[arg(long)]
    pub strategy: Option<CauseSearchStrategy>,

    /// Measure both revisions in parallel
    #[arg(long)]
    pub parallel: bool,

    /// Number of cause searches running at the same time
    #[arg(long)]
    pub rca_workers: Option<usize>,

    /// Command starting a remote worker, e.g. "ssh build-host perfci worker --project /srv/app"
    #[arg(long, value_delimiter = ' ', num_args = 1..)]
    pub remote: Vec<String>,

    /// Append progress events as JSON lines to this file
    #[arg(long)]
    pub progress_file: Option<PathBuf>,
}

impl WorkspaceArgs {
    fn load_config(&self) -> Result<PipelineConfig> {
        match &self.config {
            Some(path) => Ok(PipelineConfig::from_file(path)?),
            None => Ok(PipelineConfig::default()),
        }
    }

    fn folders(&self, project_dir: &Path) -> Result<ResultsFolders> {
        let data = match &self.data {
            Some(data) => data.clone(),
            None => dirs::data_local_dir()
                .context("no data directory available, please pass --data")?
                .join("perfci"),
        };
        let name = self
            .project_name
            .clone()
            .unwrap_or_else(|| project_name(project_dir));
        Ok(ResultsFolders::new(&data, &name))
    }
}

impl RunArgs {
    fn apply(&self, config: &mut PipelineConfig) {
        if let Some(includes) = &self.includes {
            config.includes = includes.clone();
        }
        if self.no_rca {
            config.execute_rca = false;
        }
        if let Some(strategy) = self.strategy {
            config.rca_strategy = strategy;
        }
        if self.parallel {
            config.execute_parallel = true;
        }
        if let Some(workers) = self.rca_workers {
            config.rca_workers = workers;
        }
    }
}

/// Run the parsed command; returns the process exit code
pub async fn execute(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Run(args) => run(args).await,
        Command::Worker(args) => {
            let config = args.load_config()?;
            let folders = args.folders(&args.project)?;
            let worker = Worker::with_commands(args.project.clone(), folders, &config.stages);
            worker.serve_stdio().await?;
            Ok(0)
        }
    }
}

async fn run(args: RunArgs) -> Result<i32> {
    let mut config = args.workspace.load_config()?;
    args.apply(&mut config);
    let settings = config.validate()?;

    let project_dir = args.workspace.project.clone();
    let folders = args.workspace.folders(&project_dir)?;
    info!("Results go to {}", folders.root().display());

    let dispatcher: Arc<dyn Dispatcher> = if args.remote.is_empty() {
        let worker = Worker::with_commands(project_dir, folders.clone(), &config.stages);
        Arc::new(LocalDispatcher::new(Arc::new(worker), settings.stage_timeout))
    } else {
        let channel = CommandChannel::new(args.remote.clone());
        Arc::new(RemoteDispatcher::new(channel, settings.stage_timeout))
    };

    let (default_current, default_old) = config.revision_spec();
    let current = args.current.clone().unwrap_or(default_current);
    let old = args.old.clone().or(default_old);
    let pair = dispatch::resolve_versions(dispatcher.as_ref(), &current, old.as_deref())
        .await
        .context("failed to resolve revisions")?;

    let sink: Arc<dyn ProgressSink> = match &args.progress_file {
        Some(path) => Arc::new(JsonLinesSink::create(path)?),
        None => Arc::new(LogSink),
    };

    let outcome = PipelineOrchestrator::new(settings, pair, folders, dispatcher, sink)
        .run_pipeline()
        .await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    Ok(outcome.status.exit_code())
}

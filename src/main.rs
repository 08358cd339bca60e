use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::info;

use vela_cluster::{ClusterContext, FsCluster};
use vela_config::{Application, Settings};
use vela_engine::{Controller, ControllerRunner, WorkflowEngine, WorkflowOperator};
use vela_query::QueryEngine;
use vela_rollout::{RolloutController, RolloutPlan, RolloutPlanner};
use vela_steps::StandardRegistry;
use vela_store::{SqliteStore, Store};

/// Vela - deliver applications through revisioned workflows
#[derive(Parser)]
#[command(name = "vela")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the data directory (default: ~/.vela)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Deploy, reconcile and delete applications
  App {
    #[command(subcommand)]
    action: AppAction,
  },

  /// Inspect and operate workflow runs
  Workflow {
    #[command(subcommand)]
    action: WorkflowAction,
  },

  /// Garbage collection of superseded revisions
  Gc {
    #[command(subcommand)]
    action: GcAction,
  },

  /// Progressive rollouts
  Rollout {
    #[command(subcommand)]
    action: RolloutAction,
  },

  /// Run a query view
  Query {
    /// View name, e.g. application-status
    view: String,

    /// View parameter as key=value; values are parsed as JSON when possible
    #[arg(long = "param", value_name = "KEY=VALUE")]
    params: Vec<String>,
  },
}

#[derive(Subcommand)]
enum AppAction {
  /// Create or update an application from a JSON file and reconcile it once
  Deploy { file: PathBuf },

  /// Run one reconciliation pass
  Reconcile { name: String },

  /// Delete an application and everything it deployed
  Delete { name: String },

  /// Reconcile every application until interrupted
  Run,
}

#[derive(Subcommand)]
enum WorkflowAction {
  Status {
    name: String,
  },
  Resume {
    name: String,
    /// Resume a single suspended step
    #[arg(long)]
    step: Option<String>,
  },
  Suspend {
    name: String,
  },
  Terminate {
    name: String,
  },
  Restart {
    name: String,
    /// Restart from this step, keeping the steps before it
    #[arg(long)]
    step: Option<String>,
  },
  /// Re-target the last succeeded revision
  Rollback {
    name: String,
  },
}

#[derive(Subcommand)]
enum GcAction {
  /// Collect the resources of revisions that are no longer kept
  Sweep { name: String },
}

#[derive(Subcommand)]
enum RolloutAction {
  /// Print the batches of a rollout plan
  Plan {
    /// Path to the plan file (JSON)
    file: PathBuf,

    /// Total replicas at the end of the rollout
    #[arg(long)]
    replicas: u32,
  },
  Pause {
    name: String,
  },
  Resume {
    name: String,
  },
  Rollback {
    name: String,
  },
  Status {
    name: String,
  },
}

/// Everything the commands operate on, wired against the data directory.
struct ControlPlane {
  controller: Arc<Controller>,
  operator: WorkflowOperator,
  rollout: RolloutController,
  query: QueryEngine,
}

impl ControlPlane {
  async fn open(data_dir: &Path) -> Result<Self> {
    tokio::fs::create_dir_all(data_dir)
      .await
      .with_context(|| format!("failed to create data directory: {}", data_dir.display()))?;
    let settings = load_settings(data_dir).await?;

    let db_path = data_dir.join("vela.db");
    let store: Arc<dyn Store> = Arc::new(
      SqliteStore::open(&db_path)
        .await
        .with_context(|| format!("failed to open database: {}", db_path.display()))?,
    );
    let cluster = FsCluster::new(data_dir.join("cluster")).with_simulated_readiness(true);
    let clusters = ClusterContext::local(Arc::new(cluster));

    let mut registry = StandardRegistry::with_builtins();
    vela_rollout::register(&mut registry);
    let engine = Arc::new(WorkflowEngine::new(Arc::new(registry), settings.clone()));

    let planner = Arc::new(RolloutPlanner);
    let controller = Controller::new(store.clone(), clusters.clone(), engine).with_planner(planner.clone());
    let operator = WorkflowOperator::new(store.clone(), &settings).with_planner(planner);

    Ok(Self {
      controller: Arc::new(controller),
      rollout: RolloutController::new(store.clone(), operator.clone()),
      operator,
      query: QueryEngine::new(store, clusters),
    })
  }
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  tracing_subscriber::fmt()
    .with_env_filter(
      tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
    )
    .with_writer(std::io::stderr)
    .init();

  let data_dir = match cli.data_dir {
    Some(dir) => dir,
    None => dirs::home_dir()
      .context("could not determine home directory")?
      .join(".vela"),
  };

  let Some(command) = cli.command else {
    println!("vela - use --help to see available commands");
    return Ok(());
  };

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run(command, data_dir).await })
}

async fn run(command: Commands, data_dir: PathBuf) -> Result<()> {
  let plane = ControlPlane::open(&data_dir).await?;
  match command {
    Commands::App { action } => run_app(&plane, action).await,
    Commands::Workflow { action } => run_workflow(&plane, action).await,
    Commands::Gc {
      action: GcAction::Sweep { name },
    } => {
      let report = plane
        .controller
        .gc()
        .sweep(&name)
        .await
        .with_context(|| format!("failed to sweep {}", name))?;
      print_json(&report)
    }
    Commands::Rollout { action } => run_rollout(&plane, action).await,
    Commands::Query { view, params } => {
      let params = parse_params(&params)?;
      print_json(&plane.query.query(&view, &params).await)
    }
  }
}

async fn run_app(plane: &ControlPlane, action: AppAction) -> Result<()> {
  match action {
    AppAction::Deploy { file } => {
      let application: Application = read_json(&file).await?;
      let outcome = plane
        .controller
        .deploy(application)
        .await
        .context("deploy failed")?;
      print_json(&outcome)
    }
    AppAction::Reconcile { name } => {
      let outcome = plane
        .controller
        .reconcile(&name)
        .await
        .with_context(|| format!("failed to reconcile {}", name))?;
      print_json(&outcome)
    }
    AppAction::Delete { name } => {
      let report = plane
        .controller
        .delete(&name)
        .await
        .with_context(|| format!("failed to delete {}", name))?;
      print_json(&report)
    }
    AppAction::Run => {
      let runner = ControllerRunner::new(plane.controller.clone());
      let queued = runner.enqueue_all().await.context("failed to queue applications")?;
      info!(applications = queued, "queued_applications");

      let cancel = CancellationToken::new();
      let signal = cancel.clone();
      tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
          signal.cancel();
        }
      });
      runner.start(cancel).await.context("controller runner failed")?;
      Ok(())
    }
  }
}

async fn run_workflow(plane: &ControlPlane, action: WorkflowAction) -> Result<()> {
  let operator = &plane.operator;
  match action {
    WorkflowAction::Status { name } => print_json(&operator.status(&name).await?),
    WorkflowAction::Resume { name, step } => {
      let resumed = operator.resume(&name, step.as_deref()).await?;
      print_json(&serde_json::json!({ "resumed": resumed }))
    }
    WorkflowAction::Suspend { name } => {
      let suspended = operator.suspend(&name).await?;
      print_json(&serde_json::json!({ "suspended": suspended }))
    }
    WorkflowAction::Terminate { name } => {
      let terminated = operator.terminate(&name).await?;
      print_json(&serde_json::json!({ "terminated": terminated }))
    }
    WorkflowAction::Restart { name, step } => {
      operator.restart(&name, step.as_deref()).await?;
      print_json(&operator.status(&name).await?)
    }
    WorkflowAction::Rollback { name } => print_json(&operator.rollback(&name).await?),
  }
}

async fn run_rollout(plane: &ControlPlane, action: RolloutAction) -> Result<()> {
  let rollout = &plane.rollout;
  match action {
    RolloutAction::Plan { file, replicas } => {
      let plan: RolloutPlan = read_json(&file).await?;
      let batches = plan.batches(replicas).context("invalid rollout plan")?;
      print_json(&batches)
    }
    RolloutAction::Pause { name } => {
      let paused = rollout.pause(&name).await?;
      print_json(&serde_json::json!({ "paused": paused }))
    }
    RolloutAction::Resume { name } => {
      let resumed = rollout.resume(&name).await?;
      print_json(&serde_json::json!({ "resumed": resumed }))
    }
    RolloutAction::Rollback { name } => print_json(&rollout.rollback(&name).await?),
    RolloutAction::Status { name } => print_json(&rollout.status(&name).await?),
  }
}

async fn load_settings(data_dir: &Path) -> Result<Settings> {
  let path = data_dir.join("config.json");
  if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
    return Ok(Settings::default());
  }
  read_json(&path).await
}

async fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
  let content = tokio::fs::read_to_string(path)
    .await
    .with_context(|| format!("failed to read file: {}", path.display()))?;
  serde_json::from_str(&content).with_context(|| format!("failed to parse file: {}", path.display()))
}

/// Turn `key=value` pairs into a parameter object.
fn parse_params(pairs: &[String]) -> Result<serde_json::Value> {
  let mut params = serde_json::Map::new();
  for pair in pairs {
    let Some((key, value)) = pair.split_once('=') else {
      bail!("invalid parameter '{}', expected key=value", pair);
    };
    let value = serde_json::from_str(value).unwrap_or_else(|_| serde_json::Value::String(value.to_string()));
    params.insert(key.to_string(), value);
  }
  Ok(serde_json::Value::Object(params))
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
  println!("{}", serde_json::to_string_pretty(value)?);
  Ok(())
}

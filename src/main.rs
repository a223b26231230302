use std::io::{self, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use waypoint_gateway::{ConductorGateway, GatewayConfig, Payload, TaskStatus};
use waypoint_session::Session;
use waypoint_sync::{SyncClient, SyncConfig, SyncError, WaitEvent, WaitObserver, WaitOptions};

/// Waypoint - keeps a front end in step with remote workflow runs
#[derive(Parser)]
#[command(name = "waypoint")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Engine API root
  #[arg(
    long,
    global = true,
    env = "CONDUCTOR_SERVER_URL",
    default_value = "http://localhost:8080/api"
  )]
  server_url: String,

  /// Key id for token authentication
  #[arg(long, global = true, env = "CONDUCTOR_AUTH_KEY")]
  auth_key: Option<String>,

  /// Key secret for token authentication
  #[arg(long, global = true, env = "CONDUCTOR_AUTH_SECRET", hide_env_values = true)]
  auth_secret: Option<String>,

  /// Path to the config file (default: ~/.waypoint/config.json)
  #[arg(long, global = true, env = "WAYPOINT_CONFIG")]
  config: Option<PathBuf>,

  /// Log level, used when RUST_LOG is unset
  #[arg(long, global = true, env = "WAYPOINT_LOG_LEVEL", default_value = "warn")]
  log_level: String,

  /// Emit logs as JSON
  #[arg(long, global = true, env = "WAYPOINT_LOG_JSON")]
  json: bool,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Start a run of the configured workflow, input read from stdin
  Start,

  /// Show a run and its tasks
  Status { run_id: String },

  /// Find the actionable task for a reference name
  Locate { run_id: String, reference: String },

  /// Wait until a task is actionable
  WaitTask {
    run_id: String,
    reference: String,

    /// Also wait for these keys in the task input
    #[arg(long, value_delimiter = ',')]
    input_keys: Vec<String>,

    /// Give up after this many seconds
    #[arg(long)]
    timeout: Option<u64>,
  },

  /// Submit a task result, output read from stdin
  Complete {
    run_id: String,
    task_id: String,

    /// Terminal status to submit
    #[arg(long, default_value = "COMPLETED")]
    status: String,
  },

  /// Wait until a run output key is ready
  WaitOutput {
    run_id: String,
    key: String,

    /// Give up after this many seconds
    #[arg(long)]
    timeout: Option<u64>,
  },

  /// Classify a run as progressing, finished or stuck
  Classify { run_id: String },

  /// Dump the run state used to diagnose a stuck run
  Debug { run_id: String },

  /// Terminate a run
  Terminate {
    run_id: String,

    #[arg(long, default_value = "terminated from waypoint")]
    reason: String,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();
  init_tracing(&cli.log_level, cli.json);

  let Some(command) = cli.command else {
    println!("waypoint - use --help to see available commands");
    return Ok(());
  };

  let config = load_config(cli.config)?;

  let mut gateway_config = GatewayConfig::new(cli.server_url);
  if let (Some(key), Some(secret)) = (cli.auth_key, cli.auth_secret) {
    gateway_config = gateway_config.with_credentials(key, secret);
  }
  let gateway = ConductorGateway::new(gateway_config).context("failed to create engine client")?;
  let client = SyncClient::new(Arc::new(gateway), config);

  let rt = tokio::runtime::Runtime::new()?;
  rt.block_on(async { run(client, command).await })
}

fn init_tracing(log_level: &str, json: bool) {
  let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
    .unwrap_or_else(|_| log_level.to_string().into());

  let registry = tracing_subscriber::registry().with(env_filter);
  if json {
    registry
      .with(tracing_subscriber::fmt::layer().json().with_writer(io::stderr))
      .init();
  } else {
    registry
      .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
      .init();
  }
}

fn load_config(path: Option<PathBuf>) -> Result<SyncConfig> {
  if let Some(path) = path {
    return SyncConfig::from_file(&path)
      .with_context(|| format!("failed to load config: {}", path.display()));
  }

  match dirs::home_dir().map(|home| home.join(".waypoint").join("config.json")) {
    Some(path) if path.exists() => SyncConfig::from_file(&path)
      .with_context(|| format!("failed to load config: {}", path.display())),
    _ => Ok(SyncConfig::default()),
  }
}

async fn run(client: SyncClient<ConductorGateway>, command: Commands) -> Result<()> {
  // Ctrl-C abandons an in-flight wait
  let cancel = CancellationToken::new();
  tokio::spawn({
    let cancel = cancel.clone();
    async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        cancel.cancel();
      }
    }
  });

  let wait_options = |timeout: Option<u64>| {
    let observer: Arc<dyn WaitObserver> = Arc::new(report_progress);
    let mut options = client
      .wait_options()
      .with_cancel(cancel.clone())
      .with_observer(observer);
    if let Some(secs) = timeout {
      options = options.with_timeout(Duration::from_secs(secs));
    }
    options
  };

  let output = match command {
    Commands::Start => {
      let input = read_payload_from_stdin()?;
      let session = Session::new();
      let run_id = client
        .start_run(&session, input)
        .await
        .context("failed to start run")?;
      serde_json::json!({ "run_id": run_id })
    }
    Commands::Status { run_id } => {
      serde_json::to_value(client.run_summary(&run_id).await.context("failed to fetch run")?)?
    }
    Commands::Locate { run_id, reference } => {
      let task = client
        .locate(&run_id, &reference)
        .await
        .context("failed to locate task")?;
      serde_json::to_value(task)?
    }
    Commands::WaitTask {
      run_id,
      reference,
      input_keys,
      timeout,
    } => {
      let options = wait_options(timeout);
      let task = if input_keys.is_empty() {
        client.wait_for_task(&run_id, &reference, &options).await
      } else {
        let keys: Vec<&str> = input_keys.iter().map(String::as_str).collect();
        client
          .wait_for_task_input(&run_id, &reference, &keys, &options)
          .await
      };
      serde_json::to_value(task.context("wait for task failed")?)?
    }
    Commands::Complete {
      run_id,
      task_id,
      status,
    } => {
      let status: TaskStatus = serde_json::from_value(Value::String(status.to_uppercase()))
        .context("invalid task status")?;
      let output = read_payload_from_stdin()?;

      let session = Session::new();
      session.begin_run(&run_id);
      match client.complete_with(&session, &task_id, status, output).await {
        Ok(outcome) => serde_json::to_value(outcome)?,
        Err(e @ SyncError::CompletionConflict { .. }) => {
          tracing::warn!(error = %e, "completion skipped");
          eprintln!("warning: {}", e);
          return Ok(());
        }
        Err(e) => return Err(e).context("failed to complete task"),
      }
    }
    Commands::WaitOutput {
      run_id,
      key,
      timeout,
    } => {
      let options = wait_options(timeout);
      client
        .wait_for_output_key(&run_id, &key, &options)
        .await
        .context("wait for output failed")?
    }
    Commands::Classify { run_id } => {
      serde_json::to_value(client.classify(&run_id).await.context("failed to classify run")?)?
    }
    Commands::Debug { run_id } => serde_json::to_value(
      client
        .debug_snapshot(&run_id)
        .await
        .context("failed to fetch run")?,
    )?,
    Commands::Terminate { run_id, reason } => {
      client
        .terminate_run(&run_id, &reason)
        .await
        .context("failed to terminate run")?;
      serde_json::json!({ "run_id": run_id, "terminated": true })
    }
  };

  println!("{}", serde_json::to_string_pretty(&output)?);
  Ok(())
}

fn report_progress(event: WaitEvent) {
  match event {
    WaitEvent::Pending { target, poll, .. } => {
      eprintln!("Waiting for {} (poll {})", target, poll);
    }
    WaitEvent::StuckSuspected { reason, .. } => eprintln!("Run may be stuck: {}", reason),
    _ => {}
  }
}

fn read_payload_from_stdin() -> Result<Payload> {
  use std::io::IsTerminal;

  if io::stdin().is_terminal() {
    // No stdin pipe, use empty object
    return Ok(Payload::new());
  }

  let mut input = String::new();
  io::stdin()
    .read_to_string(&mut input)
    .context("failed to read payload from stdin")?;

  if input.trim().is_empty() {
    Ok(Payload::new())
  } else {
    serde_json::from_str(&input).context("failed to parse payload JSON object from stdin")
  }
}

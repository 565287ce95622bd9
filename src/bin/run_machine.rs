//! CLI: Run a compiled state machine class from JSON.
//!
//! Loads every class file into one registry, initializes the chosen class and ticks it.
//! Behavior names resolve against the builtin `context_flag:<key>` and
//! `time_in_state:<seconds>` conditions.
//!
//! Usage: `run_machine [OPTIONS] <class-file>...`
//! Example: run_machine --ticks 20 --var door=true tests/fixtures/door.json
//!
//! checkpoint.json and execution.log.json are written to the run directory after the last tick.
//!
//! Set RUST_LOG=logic_driver_runtime=trace for TRACE-level span enter/exit and events.

use clap::Parser;
use logic_driver_runtime::checkpoint_io::{self, CHECKPOINT_FILENAME};
use logic_driver_runtime::execution_log_io::{self, EXECUTION_LOG_FILENAME};
use logic_driver_runtime::types::RunContext;
use logic_driver_runtime::{
  Checkpoint, ClassRegistry, Instance, InstanceConfig, StateMachineClass,
};
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, fmt::format::FmtSpan};

const RUN_DIR: &str = ".logic-driver";

/// Run a compiled state machine class from JSON.
#[derive(Parser, Debug)]
#[command(name = "run_machine")]
#[command(after_help = r#"Examples:
  run_machine door.json
  run_machine --class Door --ticks 5 --var open=true door.json frame.json
  run_machine --resume --run-dir /tmp/door door.json"#)]
struct Args {
  /// Class to run. Defaults to the class of the first file.
  #[arg(long, value_name = "NAME")]
  class: Option<String>,

  /// Number of updates to run.
  #[arg(long, default_value_t = 10)]
  ticks: u32,

  /// Seconds passed to each update.
  #[arg(long, default_value_t = 0.1)]
  delta: f32,

  /// Context value set before initialization. Repeatable.
  #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_var)]
  vars: Vec<(String, String)>,

  /// Directory for checkpoint.json and execution.log.json.
  #[arg(long, value_name = "DIR", default_value = RUN_DIR)]
  run_dir: PathBuf,

  /// Restore the active states from the run directory before starting.
  #[arg(long)]
  resume: bool,

  /// Stop as soon as the root machine reaches an end state.
  #[arg(long)]
  stop_on_end_state: bool,

  /// Compiled class JSON files.
  #[arg(value_name = "class-file", required = true)]
  class_files: Vec<PathBuf>,
}

fn parse_var(s: &str) -> Result<(String, String), String> {
  s.split_once('=')
    .map(|(k, v)| (k.trim().to_string(), v.to_string()))
    .filter(|(k, _)| !k.is_empty())
    .ok_or_else(|| format!("expected KEY=VALUE, got `{s}`"))
}

/// Outcome printed after the run.
struct RunSummary {
  class: String,
  ticks: u32,
  active: Vec<String>,
  in_end_state: bool,
  stopped: bool,
}

fn load_classes(files: &[PathBuf]) -> Result<(ClassRegistry, String), String> {
  let mut registry = ClassRegistry::with_builtin_behaviors();
  let mut first = None;
  for path in files {
    let json =
      fs::read_to_string(path).map_err(|e| format!("Error reading {}: {}", path.display(), e))?;
    let class = StateMachineClass::from_json(&json)
      .map_err(|e| format!("Error parsing {}: {}", path.display(), e))?;
    first.get_or_insert_with(|| class.name.clone());
    for warning in registry.register_class(class) {
      eprintln!("warning: {warning}");
    }
  }
  first
    .map(|name| (registry, name))
    .ok_or_else(|| "no class files given".to_string())
}

/// Checkpoint from the run directory, or the last step of its execution log.
fn resume_checkpoint(run_dir: &Path) -> Option<Checkpoint> {
  match checkpoint_io::load_checkpoint(&run_dir.join(CHECKPOINT_FILENAME)) {
    Ok(cp) => return Some(cp),
    Err(e) => info!(error = %e, "no usable checkpoint, trying the execution log"),
  }
  let log = execution_log_io::load_execution_log(&run_dir.join(EXECUTION_LOG_FILENAME)).ok()?;
  let resume = execution_log_io::resume_state_from_log(&log)?;
  if resume.already_completed {
    info!("execution log is from a finished run");
  }
  Some(resume.checkpoint)
}

fn run(args: &Args) -> Result<RunSummary, String> {
  let (registry, first) = load_classes(&args.class_files)?;
  let class = args.class.clone().unwrap_or(first);
  let config = InstanceConfig {
    stop_on_end_state: args.stop_on_end_state,
    record_execution_log: true,
    ..InstanceConfig::default()
  };
  let mut instance =
    Instance::new(&class, Arc::new(registry), config).map_err(|e| format!("Error: {e}"))?;

  let context: RunContext = args.vars.iter().cloned().collect();
  instance
    .initialize(context)
    .map_err(|e| format!("Initialization error: {e}"))?;

  let checkpoint = if args.resume {
    resume_checkpoint(&args.run_dir)
  } else {
    None
  };
  match checkpoint {
    Some(cp) => {
      let loaded = instance
        .restore_checkpoint(&cp)
        .map_err(|e| format!("Restore error: {e}"))?;
      info!(loaded, requested = cp.active_states.len(), "resumed from run directory");
    }
    None => {
      if args.resume {
        warn!(run_dir = %args.run_dir.display(), "nothing to resume, starting fresh");
      }
      instance.start().map_err(|e| format!("Start error: {e}"))?;
    }
  }

  let mut ticks = 0;
  while ticks < args.ticks && instance.has_started() {
    instance
      .update(args.delta)
      .map_err(|e| format!("Update error: {e}"))?;
    ticks += 1;
  }

  let summary = RunSummary {
    class: class.clone(),
    ticks,
    active: instance
      .capture_active_set()
      .into_iter()
      .map(|guid| {
        instance
          .state_info(guid)
          .map(|info| info.name)
          .unwrap_or_else(|| guid.to_string())
      })
      .collect(),
    in_end_state: instance.is_in_end_state(),
    stopped: !instance.has_started(),
  };

  let checkpoint = instance.checkpoint();
  checkpoint_io::save_checkpoint(&args.run_dir.join(CHECKPOINT_FILENAME), &checkpoint)
    .map_err(|e| format!("Error writing checkpoint: {e}"))?;
  if let Some(log) = instance.execution_log() {
    let path = args.run_dir.join(EXECUTION_LOG_FILENAME);
    let written = if summary.stopped {
      execution_log_io::write_execution_log(&path, log)
    } else {
      execution_log_io::write_execution_log_partial(&path, log)
    };
    written.map_err(|e| format!("Error writing execution log: {e}"))?;
  }
  Ok(summary)
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
    .with_span_events(FmtSpan::ENTER | FmtSpan::EXIT)
    .init();

  info!("run_machine starting");
  let args = Args::parse();
  info!(class = ?args.class, ticks = args.ticks, run_dir = %args.run_dir.display(), "options");

  // Ticking is synchronous; keep it off the async thread.
  let result = match tokio::task::spawn_blocking(move || run(&args)).await {
    Ok(r) => r,
    Err(e) => {
      eprintln!("Run aborted: {}", e);
      process::exit(1);
    }
  };

  let summary = match result {
    Ok(s) => s,
    Err(e) => {
      eprintln!("{}", e);
      process::exit(1);
    }
  };

  info!(class = %summary.class, ticks = summary.ticks, active = ?summary.active, "run completed");
  println!("Run completed.");
  println!("  Class: {}", summary.class);
  println!("  Ticks: {}", summary.ticks);
  println!("  Active states: {:?}", summary.active);
  println!("  End state: {}", summary.in_end_state);
  println!("  Stopped: {}", summary.stopped);
}

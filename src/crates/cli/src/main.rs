//! Entry point mirroring `conductor.py`'s `main()`: parse a study directory
//! from argv, load its description, stage it if needed, and drive the
//! execution graph to completion.

use anyhow::{Context, Result};
use clap::Parser;
use conductor::{Conductor, DriverOutcome, PriorityRegistry, StudyDescription};
use std::collections::HashMap;
use std::path::PathBuf;
use study::Study;

/// Drive a staged study workspace to completion, or report its status.
#[derive(Parser, Debug)]
#[command(name = "conductor", version, about)]
struct Args {
    /// Study workspace directory, containing `study.yaml` and (once staged)
    /// `batch.info` and `<name>.pkl`.
    directory: PathBuf,

    /// Print the current status snapshot and exit instead of driving the study.
    #[arg(short = 's', long = "status")]
    status: bool,

    /// Directory to write the log file into (default: `<directory>/logs`).
    #[arg(short = 'l', long = "logpath")]
    logpath: Option<PathBuf>,

    /// Log verbosity: 0=warn, 1=info, 2=debug, 3=trace.
    #[arg(short = 'd', long = "debug_lvl", default_value_t = 1)]
    debug_lvl: u8,

    /// Also log to stdout in addition to the log file.
    #[arg(short = 'c', long = "logstdout")]
    logstdout: bool,

    /// Seconds to sleep between driver ticks.
    #[arg(short = 't', long = "sleeptime", default_value_t = 60)]
    sleeptime: u64,
}

fn level_filter(debug_lvl: u8) -> tracing::Level {
    match debug_lvl {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    }
}

fn init_logging(args: &Args) -> Result<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::fmt::writer::MakeWriterExt;

    let log_dir = args.logpath.clone().unwrap_or_else(|| args.directory.join("logs"));
    std::fs::create_dir_all(&log_dir).context("creating log directory")?;

    let file_appender = tracing_appender::rolling::never(&log_dir, "conductor.log");
    let (file_writer, guard) = tracing_appender::non_blocking(file_appender);

    let builder = tracing_subscriber::fmt().with_max_level(level_filter(args.debug_lvl));
    if args.logstdout {
        builder.with_writer(file_writer.and(std::io::stdout)).init();
    } else {
        builder.with_writer(file_writer).init();
    }

    Ok(guard)
}

fn yaml_value_to_string(value: &serde_yaml::Value) -> String {
    match value {
        serde_yaml::Value::String(s) => s.clone(),
        serde_yaml::Value::Number(n) => n.to_string(),
        serde_yaml::Value::Bool(b) => b.to_string(),
        other => serde_yaml::to_string(other).unwrap_or_default().trim().to_string(),
    }
}

fn print_status(directory: &std::path::Path) -> Result<()> {
    let status = Conductor::get_status(directory).context("reading status.csv")?;
    let mut rows: Vec<(&String, &utils::State)> = status.iter().collect();
    rows.sort_by_key(|(name, _)| name.as_str());
    for (name, state) in rows {
        println!("{:<32} {}", name, state);
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    if args.status {
        print_status(&args.directory)?;
        return Ok(());
    }

    let _log_guard = init_logging(&args)?;

    let description_path = args.directory.join("study.yaml");
    let description = StudyDescription::load(&description_path)
        .with_context(|| format!("loading study description from {}", description_path.display()))?;

    let environment = description.study_environment()?;
    let parameters = description.parameters()?;
    let mut study = Study::new(
        description.name.clone(),
        description.description.clone(),
        environment,
        parameters,
        description.output_path().to_path_buf(),
    );

    for step in description.study_steps() {
        study.add_step(step.clone())?;
    }

    study.setup(
        description.submission_attempts,
        description.restart_limit,
        description.submission_throttle,
    )?;
    let graph = study.stage()?;

    let adapter_type = description
        .batch
        .get("type")
        .map(yaml_value_to_string)
        .unwrap_or_else(|| "local".to_string());
    let adapter_params: HashMap<String, String> = description
        .batch
        .iter()
        .filter(|(k, _)| k.as_str() != "type")
        .map(|(k, v)| (k.clone(), yaml_value_to_string(v)))
        .collect();
    let adapter = scheduler::build_adapter(&adapter_type, &adapter_params)?;

    let registry = PriorityRegistry::new();
    let policy_names = description.execution_policy_names();
    let policies = registry.resolve(&policy_names)?;

    let sleep_time = description
        .sleep_time
        .map(std::time::Duration::from_secs)
        .unwrap_or_else(|| std::time::Duration::from_secs(args.sleeptime));

    let mut conductor = Conductor::new(graph, adapter, description.output_path(), sleep_time, policies);
    conductor.initialize(&description.batch)?;

    let outcome = conductor.run_loop()?;

    match outcome {
        DriverOutcome::Finished => tracing::info!("study finished"),
        DriverOutcome::Failed => tracing::error!("study failed"),
        DriverOutcome::Cancelled => tracing::warn!("study cancelled"),
        DriverOutcome::Running => unreachable!("run_loop only returns a terminal outcome"),
    }

    conductor.cleanup()?;
    std::process::exit(outcome.exit_code());
}

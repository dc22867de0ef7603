//! Durastep CLI Entry Point
//!
//! Inspects runs persisted by a file snapshot store.
//!
//! # Usage
//!
//! ```bash
//! # List stored runs
//! durastep list
//!
//! # Show one run in detail
//! durastep inspect 3f0c9a2e-6d5b-4c1e-9a57-0b3e2f1d8c44
//!
//! # Read settings from a config file, or point at a directory directly
//! durastep list --config durastep.yaml
//! durastep list --snapshot-dir /var/lib/durastep
//! ```

use std::env;
use std::path::PathBuf;
use std::process::ExitCode;

use colored::{ColoredString, Colorize};
use log::{debug, error, info};

use durastep::snapshot::{FileSnapshotStore, SnapshotStore};
use durastep::workflow::{Run, RunStatus, StepResult, StepStatus};
use durastep::{EngineConfig, APP_NAME, VERSION};

/// What the user asked for.
#[derive(Debug, PartialEq)]
enum Command {
    List,
    Inspect(String),
    Help,
    Version,
}

/// Command-line configuration parsed from arguments.
#[derive(Debug, PartialEq)]
struct Config {
    command: Command,
    config_path: Option<PathBuf>,
    snapshot_dir: Option<PathBuf>,
    verbose: bool,
}

/// Configures the logging system with appropriate formatting.
fn setup_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format(|buf, record| {
            use std::io::Write;

            match record.level() {
                log::Level::Warn | log::Level::Error => {
                    writeln!(buf, "[{}] {}", record.level(), record.args())
                }
                _ => writeln!(buf, "{}", record.args()),
            }
        })
        .init();
}

/// Prints usage information.
fn print_usage() {
    println!("Usage: durastep [OPTIONS] <COMMAND>");
    println!();
    println!("Commands:");
    println!("  list                  List stored run ids");
    println!("  inspect <RUN_ID>      Show a run's status and step results");
    println!();
    println!("Options:");
    println!("  --config PATH         Load settings from a YAML file");
    println!("  --snapshot-dir DIR    Snapshot directory (overrides config)");
    println!("  --verbose             Enable debug logging");
    println!("  --help                Show this help message");
    println!("  --version             Show version information");
}

/// Parses command-line arguments into a Config struct.
fn parse_arguments(args: &[String]) -> Result<Config, String> {
    let mut command = None;
    let mut config_path = None;
    let mut snapshot_dir = None;
    let mut verbose = false;
    let mut positional: Vec<&str> = Vec::new();
    let mut i = 1; // Skip program name

    while i < args.len() {
        let arg = &args[i];

        match arg.as_str() {
            "--help" | "-h" => command = Some(Command::Help),
            "--version" | "-V" => command = Some(Command::Version),
            "--verbose" | "-v" => verbose = true,
            "--config" => {
                i += 1;
                let path = args.get(i).ok_or("--config requires a path argument")?;
                config_path = Some(PathBuf::from(path));
            }
            "--snapshot-dir" => {
                i += 1;
                let dir = args
                    .get(i)
                    .ok_or("--snapshot-dir requires a directory argument")?;
                snapshot_dir = Some(PathBuf::from(dir));
            }
            arg if arg.starts_with('-') => {
                return Err(format!("Unknown option: {}", arg));
            }
            _ => positional.push(arg),
        }
        i += 1;
    }

    let command = match command {
        Some(command) => command,
        None => match positional.as_slice() {
            ["list"] => Command::List,
            ["inspect", run_id] => Command::Inspect(run_id.to_string()),
            ["inspect"] => return Err("inspect requires a run id".to_string()),
            [] => return Err("No command given".to_string()),
            [other, ..] => return Err(format!("Unexpected argument: {}", other)),
        },
    };

    Ok(Config {
        command,
        config_path,
        snapshot_dir,
        verbose,
    })
}

fn colored_run_status(status: RunStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        RunStatus::Completed => label.green().bold(),
        RunStatus::Suspended => label.yellow().bold(),
        RunStatus::Failed => label.red().bold(),
        RunStatus::Running => label.cyan().bold(),
    }
}

fn colored_step_status(status: StepStatus) -> ColoredString {
    let label = status.to_string();
    match status {
        StepStatus::Success => label.green(),
        StepStatus::Suspended => label.yellow(),
        StepStatus::Failed => label.red(),
        StepStatus::Running => label.cyan(),
        StepStatus::Pending => label.dimmed(),
    }
}

fn print_step(step_id: &str, result: &StepResult) {
    println!("  {} {}", step_id.bold(), colored_step_status(result.status));

    if let Some(started) = result.started_at {
        println!("      started:  {}", started.to_rfc3339());
    }
    if let Some(ended) = result.ended_at {
        println!("      ended:    {}", ended.to_rfc3339());
    }
    if result.resume_count > 0 {
        println!("      resumed:  {} time(s)", result.resume_count);
    }
    if let Some(continuation) = &result.continuation {
        println!("      point:    {}", continuation.point);
    }
    if let Some(payload) = &result.suspend_payload {
        println!("      waiting:  {}", payload);
    }
    if let Some(output) = &result.output {
        println!("      output:   {}", output);
    }
    if let Some(failure) = &result.error {
        println!("      error:    {}", failure.to_string().red());
    }
}

fn print_run(run: &Run) {
    println!();
    println!("Run {}", run.run_id.bold());
    println!("  workflow: {}", run.workflow);
    println!("  status:   {}", colored_run_status(run.status()));
    println!("  created:  {}", run.created_at.to_rfc3339());
    println!("  updated:  {}", run.updated_at.to_rfc3339());

    let active: Vec<&str> = run.active_paths.iter().map(String::as_str).collect();
    println!(
        "  active:   {}",
        if active.is_empty() {
            "-".to_string()
        } else {
            active.join(", ")
        }
    );

    println!();
    println!("Steps:");
    for (step_id, result) in &run.step_results {
        print_step(step_id, result);
    }
}

/// Main application entry point.
fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let config = parse_arguments(&args).map_err(|e| {
        eprintln!("Error: {}", e);
        eprintln!();
        print_usage();
        e
    })?;

    match config.command {
        Command::Help => {
            print_usage();
            return Ok(());
        }
        Command::Version => {
            println!("{} {}", APP_NAME, VERSION);
            return Ok(());
        }
        _ => {}
    }

    setup_logging(config.verbose);

    let mut engine_config = match &config.config_path {
        Some(path) => EngineConfig::load(path).map_err(|e| {
            error!("Failed to load config: {}", e);
            e
        })?,
        None => EngineConfig::default(),
    };
    if let Some(dir) = config.snapshot_dir {
        engine_config.snapshot_dir = dir;
    }
    debug!("Effective configuration: {:?}", engine_config);

    let store = FileSnapshotStore::new(engine_config.snapshot_dir);
    info!("Snapshot directory: {}", store.dir().display());

    match config.command {
        Command::List => {
            let runs = store.list_runs()?;
            if runs.is_empty() {
                println!("No stored runs");
            }
            for run_id in runs {
                match store.load(&run_id) {
                    Ok(snapshot) => {
                        let run = snapshot.into_run();
                        println!(
                            "{}  {:<10} {}",
                            run.run_id,
                            colored_run_status(run.status()),
                            run.workflow
                        );
                    }
                    Err(e) => println!("{}  {}", run_id, format!("unreadable: {}", e).red()),
                }
            }
        }
        Command::Inspect(run_id) => {
            let run = store.load(&run_id)?.into_run();
            print_run(&run);
        }
        Command::Help | Command::Version => {}
    }

    Ok(())
}

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!();
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("durastep")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn test_parse_list() {
        let config = parse_arguments(&args(&["list", "--verbose"])).unwrap();
        assert_eq!(config.command, Command::List);
        assert!(config.verbose);
    }

    #[test]
    fn test_parse_inspect_with_dir() {
        let config =
            parse_arguments(&args(&["--snapshot-dir", "/tmp/runs", "inspect", "run-1"])).unwrap();
        assert_eq!(config.command, Command::Inspect("run-1".to_string()));
        assert_eq!(config.snapshot_dir, Some(PathBuf::from("/tmp/runs")));
    }

    #[test]
    fn test_help_wins() {
        let config = parse_arguments(&args(&["inspect", "--help"])).unwrap();
        assert_eq!(config.command, Command::Help);
    }

    #[test]
    fn test_parse_errors() {
        assert!(parse_arguments(&args(&[])).is_err());
        assert!(parse_arguments(&args(&["inspect"])).is_err());
        assert!(parse_arguments(&args(&["list", "--bogus"])).is_err());
        assert!(parse_arguments(&args(&["--config"])).is_err());
        assert!(parse_arguments(&args(&["launch"])).is_err());
    }
}

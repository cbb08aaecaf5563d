//! Command-line front end for the remote execution bridge.
//!
//! Reads configuration from the environment, `~/.databrickscfg`, and the
//! project's `pyproject.toml`, then runs cells through one session.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use bridge::exit_codes;
use bridge::io::config::{Config, ConfigSources};
use bridge::io::workspace_client::WorkspaceClient;
use bridge::logging;
use bridge::session::{CellOutcome, Output, Session, StreamName};
use bridge::sync::preview_files;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "bridge",
    version,
    about = "Run notebook cells on a remote cluster through a persistent execution context"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run code in a new session, then shut the session down.
    Exec {
        /// Code for the first cell.
        code: Option<String>,
        /// Additional cells, one file per cell, run in order.
        #[arg(short, long = "file")]
        files: Vec<PathBuf>,
        /// Do not sync the project before executing.
        #[arg(long)]
        no_sync: bool,
        /// Print each cell outcome as one JSON line instead of rendered output.
        #[arg(long)]
        json: bool,
    },
    /// List files that would be synced and whether each changed since the last sync.
    Files,
    /// Validate configuration.
    Check,
}

fn main() {
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{:#}", err);
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let sources = ConfigSources::from_process()?;
    let config = Config::load(&sources);
    match cli.command {
        Command::Exec {
            code,
            files,
            no_sync,
            json,
        } => cmd_exec(config, code, &files, no_sync, json),
        Command::Files => cmd_files(&config),
        Command::Check => Ok(cmd_check(&config)),
    }
}

fn cmd_exec(
    mut config: Config,
    code: Option<String>,
    files: &[PathBuf],
    no_sync: bool,
    json: bool,
) -> Result<i32> {
    let mut cells: Vec<String> = code.into_iter().collect();
    for path in files {
        let cell =
            fs::read_to_string(path).with_context(|| format!("read cell {}", path.display()))?;
        cells.push(cell);
    }
    if cells.is_empty() {
        bail!("nothing to execute: pass CODE or --file");
    }

    let problems = config_problems(&config);
    if !problems.is_empty() {
        for problem in &problems {
            eprintln!("Configuration error: {problem}");
        }
        return Ok(exit_codes::INVALID);
    }
    if no_sync {
        config.sync.enabled = false;
    }

    let credentials = config.credentials()?;
    let client = WorkspaceClient::new(&credentials).context("create workspace client")?;
    let mut session = Session::new(config, Arc::new(client));

    let mut failed = false;
    for cell in &cells {
        let outcome = session.execute_cell(cell, false);
        if json {
            println!(
                "{}",
                serde_json::to_string(&outcome).context("serialize cell outcome")?
            );
        } else {
            print_outcome(&outcome);
        }
        failed |= !outcome.is_ok();
    }
    session.shutdown(false);

    Ok(if failed {
        exit_codes::EXEC_FAILED
    } else {
        exit_codes::OK
    })
}

fn print_outcome(outcome: &CellOutcome) {
    for output in &outcome.outputs {
        match output {
            Output::Stream {
                name: StreamName::Stdout,
                text,
            } => print!("{text}"),
            Output::Stream {
                name: StreamName::Stderr,
                text,
            } => eprint!("{text}"),
            Output::DisplayData { data } => {
                for (mime, payload) in data {
                    if mime == "text/html" {
                        println!("{payload}");
                    } else {
                        println!("[{mime}: {} bytes base64]", payload.len());
                    }
                }
            }
            Output::Error(error) => {
                eprintln!("{}: {}", error.ename, error.evalue);
                for line in &error.traceback {
                    eprintln!("{line}");
                }
            }
        }
    }
}

fn cmd_files(config: &Config) -> Result<i32> {
    let source = config.source_path();
    let statuses = preview_files(&config.sync, &source)
        .with_context(|| format!("list files under {}", source.display()))?;
    for status in &statuses {
        let marker = if status.oversized {
            "skip"
        } else if status.changed {
            "M"
        } else {
            "="
        };
        println!("{marker:>4} {:>10} {}", status.size, status.relative);
    }
    let changed = statuses.iter().filter(|status| status.changed).count();
    println!("{} files, {changed} changed", statuses.len());
    Ok(exit_codes::OK)
}

fn cmd_check(config: &Config) -> i32 {
    let problems = config_problems(config);
    if problems.is_empty() {
        println!(
            "configuration ok (cluster {}, profile {})",
            config.cluster_id.as_deref().unwrap_or_default(),
            config.profile
        );
        return exit_codes::OK;
    }
    for problem in &problems {
        eprintln!("- {problem}");
    }
    exit_codes::INVALID
}

fn config_problems(config: &Config) -> Vec<String> {
    let mut problems = config.validate();
    if let Err(err) = config.credentials() {
        problems.push(err.to_string());
    }
    problems
}

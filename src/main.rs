//! rerun-guard - Test Rerun Orchestration
//!
//! Command-line access to the retry decision, backoff schedule, effective
//! configuration and round lock of a rerun session.

use clap::{Parser, Subcommand};
use colored::Colorize;
use std::path::{Path, PathBuf};

use rerun_guard::classifier::Classification;
use rerun_guard::round_lock::DEFAULT_LOCK_PATH;
use rerun_guard::{
    EnvSettings, Failure, FailureClassifier, RerunError, RetryConfig, RetryController,
    RoundLockFile,
};

#[derive(Parser)]
#[command(name = "rerun-guard")]
#[command(version)]
#[command(about = "Retry decisions, backoff and progress tracking for test reruns", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file (.json or .toml); environment settings otherwise
    #[arg(short, long, global = true, env = "RERUN_GUARD_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decide whether a failure would be retried
    Classify {
        /// Failure type tag
        #[arg(short, long)]
        kind: String,

        /// Supertype tag (repeatable)
        #[arg(short, long)]
        ancestor: Vec<String>,

        /// Failure message
        #[arg(short, long)]
        message: Option<String>,
    },

    /// Print the delay schedule of the configured strategy
    Backoff {
        /// Number of attempts to show
        #[arg(short, long, default_value = "5")]
        attempts: u32,
    },

    /// Print the effective configuration as JSON
    Config {
        /// Configuration file to load instead of --config
        #[arg(short, long)]
        file: Option<PathBuf>,
    },

    /// Inspect or clear the round ownership lock
    Lock {
        #[command(subcommand)]
        action: LockAction,
    },
}

#[derive(Subcommand)]
enum LockAction {
    /// Show the current owner
    Show {
        /// Lock file path
        #[arg(short, long, default_value = DEFAULT_LOCK_PATH)]
        path: PathBuf,
    },

    /// Delete the lock file
    Clear {
        /// Lock file path
        #[arg(short, long, default_value = DEFAULT_LOCK_PATH)]
        path: PathBuf,
    },
}

fn effective_config(file: Option<&Path>) -> rerun_guard::Result<RetryConfig> {
    match file {
        Some(path) => {
            if !path.exists() {
                return Err(RerunError::config_with_path(
                    format!("config file not found: {}", path.display()),
                    path.to_path_buf(),
                ));
            }
            RetryConfig::load(path)
        }
        None => Ok(RetryConfig::from_settings(&EnvSettings)),
    }
}

fn fail(err: &RerunError) -> ! {
    eprintln!("{} {}", "Error:".red().bold(), err);
    std::process::exit(err.exit_code());
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose {
        "rerun_guard=debug,info"
    } else {
        "rerun_guard=info,warn"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Classify {
            kind,
            ancestor,
            message,
        } => {
            let config = effective_config(cli.config.as_deref()).unwrap_or_else(|e| fail(&e));

            let mut failure = Failure::new(kind);
            for tag in ancestor {
                failure = failure.with_ancestor(tag);
            }
            if let Some(message) = message {
                failure = failure.with_message(message);
            }

            let classification = FailureClassifier::from_config(&config).classify(Some(&failure));
            let verdict = if classification.is_retriable() {
                "RETRIABLE".green().bold()
            } else {
                "NOT RETRIABLE".red().bold()
            };

            println!("{} {}", verdict, failure.summary());
            match classification {
                Classification::Unrecognized | Classification::NoCause => {
                    println!("   Reason: {}", classification.to_string().dimmed());
                }
                _ => println!("   Reason: {}", classification),
            }
        }

        Commands::Backoff { attempts } => {
            let config = effective_config(cli.config.as_deref()).unwrap_or_else(|e| fail(&e));
            let controller = RetryController::with_config(config.clone());

            println!(
                "\n{} {} (base {}ms, multiplier {}, max {}ms)",
                "Backoff:".cyan().bold(),
                controller.strategy_name(),
                config.base_delay_ms,
                config.backoff_multiplier,
                config.max_delay_ms
            );
            println!("{}", "─".repeat(40));
            for attempt in 1..=attempts {
                let delay = controller.calculate_delay(attempt);
                let note = if attempt == 1 { " (first run)" } else { "" };
                println!(
                    "   Attempt {:>3}: {:>7}ms{}",
                    attempt,
                    delay.as_millis(),
                    note.dimmed()
                );
            }
            if !config.is_retry_enabled() {
                println!(
                    "\n{} Retries are disabled (max retries is 0)",
                    "Warning:".yellow().bold()
                );
            }
        }

        Commands::Config { file } => {
            let source = file.or(cli.config);
            let config = effective_config(source.as_deref()).unwrap_or_else(|e| fail(&e));
            println!("{}", serde_json::to_string_pretty(&config)?);
        }

        Commands::Lock { action } => match action {
            LockAction::Show { path } => {
                let lock = RoundLockFile::new(&path);
                match lock.try_read() {
                    Ok(Some(owner)) => {
                        let started = chrono::DateTime::from_timestamp_millis(owner.start_ms)
                            .map(|t| t.to_rfc3339())
                            .unwrap_or_else(|| owner.start_ms.to_string());
                        let this = if owner.is_owned_by(std::process::id()) {
                            " (this process)".green().to_string()
                        } else {
                            String::new()
                        };
                        println!("\n{} {}", "Round lock:".cyan().bold(), path.display());
                        println!("{}", "─".repeat(40));
                        println!("   Owner pid: {}{}", owner.process_id, this);
                        println!("   Round: {}", owner.round);
                        println!("   Started: {}", started);
                    }
                    Ok(None) => {
                        println!("No round lock at {}", path.display());
                    }
                    Err(e) => fail(&e),
                }
            }

            LockAction::Clear { path } => {
                let lock = RoundLockFile::new(&path);
                let existed = lock.exists();
                lock.remove().unwrap_or_else(|e| fail(&e));
                if existed {
                    println!("{} Round lock removed", "OK".green().bold());
                } else {
                    println!("{} No round lock to remove", "OK".green());
                }
            }
        },
    }

    Ok(())
}

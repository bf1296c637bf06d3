//! # shmrt
//!
//! Command line front end for `shmrt_core`.
//!
//! ```text
//! shmrt create  --name counters --size 4096
//! shmrt attach  --name counters --size 4096 --dump 64
//! shmrt inspect --name counters
//! shmrt stress  --children 4 --iterations 100000
//! shmrt destroy --name counters
//! ```

use clap::{Parser, Subcommand};
use shmrt::commands;
use shmrt::config::CliConfig;
use shmrt_common::config::LogLevel;
use shmrt_core::ShmRuntime;
use shmrt_core::storm::DEFAULT_STORM_ITERATIONS;
use std::path::PathBuf;
use std::process;
use tracing::{debug, error};
use tracing_subscriber::EnvFilter;

/// shmrt: named shared memory segments and process-shared mutexes
#[derive(Parser, Debug)]
#[command(name = "shmrt")]
#[command(author = "RTS007")]
#[command(version)]
#[command(about = "Create, inspect and stress test cross-process shared memory")]
struct Args {
    /// Path to a TOML configuration file ([shared] and [shm] tables).
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Enable verbose logging (DEBUG level).
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Output logs in JSON format.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a zero-filled segment and leave it in place.
    Create {
        /// Logical segment name.
        #[arg(long)]
        name: String,
        /// Size in bytes.
        #[arg(long)]
        size: usize,
    },
    /// Attach to the live segment under a name.
    Attach {
        /// Logical segment name.
        #[arg(long)]
        name: String,
        /// Size in bytes; must match the creation size.
        #[arg(long)]
        size: usize,
        /// Hex-dump this many leading bytes.
        #[arg(long, value_name = "BYTES")]
        dump: Option<usize>,
    },
    /// Destroy a segment.
    Destroy {
        /// Logical segment name.
        #[arg(long)]
        name: String,
    },
    /// Print a segment's live generation, size and creator as JSON.
    Inspect {
        /// Logical segment name.
        #[arg(long)]
        name: String,
    },
    /// Run a locked increment storm across forked children.
    Stress {
        /// Number of child processes.
        #[arg(long, default_value_t = 2)]
        children: u32,
        /// Increments per child.
        #[arg(long, default_value_t = DEFAULT_STORM_ITERATIONS)]
        iterations: u32,
    },
}

fn main() {
    let args = Args::parse();

    let config = match CliConfig::load_or_default(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("shmrt: invalid configuration: {e}");
            process::exit(1);
        }
    };
    setup_tracing(&args, config.log_level());

    if let Err(e) = run(&args, config) {
        error!("{e}");
        process::exit(1);
    }
}

fn run(args: &Args, config: CliConfig) -> Result<(), Box<dyn std::error::Error>> {
    let runtime = ShmRuntime::new(config.shm)?;
    debug!(prefix = %runtime.config().name_prefix, "runtime ready");

    let mut out = std::io::stdout().lock();
    match &args.command {
        Command::Create { name, size } => commands::create(&runtime, name, *size, &mut out)?,
        Command::Attach { name, size, dump } => {
            commands::attach(&runtime, name, *size, *dump, &mut out)?
        }
        Command::Destroy { name } => commands::destroy(&runtime, name, &mut out)?,
        Command::Inspect { name } => commands::inspect(&runtime, name, &mut out)?,
        Command::Stress {
            children,
            iterations,
        } => commands::stress(&runtime, *children, *iterations, &mut out)?,
    }
    Ok(())
}

/// Setup tracing subscriber from CLI flags and the configured level.
fn setup_tracing(args: &Args, level: LogLevel) {
    let directive = if args.verbose {
        LogLevel::Debug.as_directive()
    } else {
        level.as_directive()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));

    if args.json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }
}

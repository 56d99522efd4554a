use std::env;
use std::io;
use std::path::PathBuf;
use std::process;

use clap::{Parser, Subcommand};
use tzdb_repl::{Command, HostSessionFactory, Repl};
use tzdb_utils::logging::LOG_FORMAT_ENV;
use tzdb_utils::{
    debug, info, init_logging, init_logging_to_file, init_logging_with_level, warn, LogFormat, LogLevel, LoggingError,
    LoggingGuard,
};

/// An interactive native-process debugger.
#[derive(Parser, Debug)]
#[command(name = "tzdb")]
#[command(version)]
#[command(about = "An interactive native-process debugger with breakpoints, memory inspection and DWARF symbols", long_about = None)]
struct Cli
{
    /// Log verbosity (error, warn, info, debug, trace); overrides RUST_LOG
    #[arg(long, global = true)]
    log_level: Option<LogLevel>,

    /// Write logs to this file (or a dated file in this directory) instead of stderr
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
enum Commands
{
    /// Start the interactive debugger, optionally launching a program right away
    #[command(visible_alias = "db")]
    Debug
    {
        /// Path to the executable to launch
        program: Option<PathBuf>,
        /// Arguments to pass to the program
        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,
    },
}

fn main()
{
    let cli = Cli::parse();

    // The guard flushes file logs on drop, so it lives until exit
    let _guard = match init_logs(&cli) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            process::exit(1);
        }
    };

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        process::exit(1);
    }
}

fn init_logs(cli: &Cli) -> Result<LoggingGuard, LoggingError>
{
    match (&cli.log_file, cli.log_level) {
        (Some(path), level) => init_logging_to_file(path, level),
        (None, Some(level)) => {
            let format = match env::var(LOG_FORMAT_ENV) {
                Ok(value) => value.parse()?,
                Err(_) => LogFormat::default(),
            };
            init_logging_with_level(level, format)
        }
        (None, None) => init_logging(),
    }
}

fn run(cli: Cli) -> Result<(), Box<dyn std::error::Error>>
{
    // SIGINT reaches the target through the shared process group and shows up as a signal stop
    if let Err(e) = ctrlc::set_handler(|| debug!("interrupt ignored by debugger")) {
        warn!("Failed to install Ctrl-C handler: {}", e);
    }

    let first = match cli.command {
        Some(Commands::Debug {
            program: Some(program),
            args,
        }) => {
            info!("Launching program: {} with args: {:?}", program.display(), args);
            Some(Command::Launch { program, args })
        }
        Some(Commands::Debug { program: None, .. }) | None => None,
    };

    let stdout = io::stdout();
    let mut repl = Repl::new(HostSessionFactory, stdout.lock())?;
    repl.run_with(first, io::stdin().lock())?;
    Ok(())
}

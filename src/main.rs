use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::runtime::Runtime;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tidyzone::Priority;
use tidyzone::cli::{commands, load_config};

/// Parse a request priority from string
fn parse_priority(s: &str) -> Result<Priority, String> {
    s.parse::<Priority>()
        .map_err(|_| format!("Invalid priority '{}'. Valid values: manual, triggered, scheduled", s))
}

#[derive(Parser)]
#[command(name = "tidyzone")]
#[command(version, about = "Scheduled vision analysis of household zones")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Use this config file instead of the global/project chain
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    #[arg(long, global = true)]
    verbose: bool,

    #[arg(long, short, global = true)]
    quiet: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler and zone ticker until interrupted
    Run,

    /// Analyze one zone now and print the result
    Analyze {
        #[arg(help = "Zone name")]
        zone: String,
        #[arg(long, short, default_value = "manual", value_parser = parse_priority)]
        priority: Priority,
        #[arg(long, default_value = "180", help = "Give up waiting after this many seconds")]
        timeout: u64,
        #[arg(short = 'f', long, default_value = "text", help = "Output format: text, json")]
        format: String,
    },

    /// Show zone status and recent runs
    Status {
        #[arg(help = "Only this zone")]
        zone: Option<String>,
        #[arg(short = 'n', long, default_value = "10", help = "Recent runs to show")]
        limit: usize,
        #[arg(short = 'f', long, default_value = "text", help = "Output format: text, json")]
        format: String,
    },

    /// Manage configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show the effective configuration (merged from all sources)
    Show {
        #[arg(short = 'f', long, default_value = "toml", help = "Output format: toml, json")]
        format: String,
    },
    /// Show configuration file paths
    Path,
    /// Write a starter configuration file
    Init {
        #[arg(long, short, help = "Initialize global config")]
        global: bool,
        #[arg(long, help = "Overwrite existing config")]
        force: bool,
    },
}

/// Set up panic handler for graceful error reporting
fn setup_panic_handler() {
    let default_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic_info| {
        let message = if let Some(s) = panic_info.payload().downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = panic_info.payload().downcast_ref::<String>() {
            s.clone()
        } else {
            "Unknown panic".to_string()
        };

        eprintln!("\n\x1b[1;31m━━━ PANIC ━━━\x1b[0m");
        eprintln!("\x1b[31mtidyzone encountered an unexpected error:\x1b[0m");
        eprintln!("  {}", message);

        if let Some(location) = panic_info.location() {
            eprintln!(
                "\x1b[90mLocation: {}:{}:{}\x1b[0m",
                location.file(),
                location.line(),
                location.column()
            );
        }
        eprintln!();

        // Backtrace when RUST_BACKTRACE=1
        default_hook(panic_info);
    }));
}

fn main() -> ExitCode {
    setup_panic_handler();

    match run_cli() {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("\x1b[31mError:\x1b[0m {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_cli() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Run => {
            let config = load_config(config_path)?;
            let rt = Runtime::new()?;
            rt.block_on(commands::run::run(config))?;
        }
        Commands::Analyze {
            zone,
            priority,
            timeout,
            format,
        } => {
            let config = load_config(config_path)?;
            let rt = Runtime::new()?;
            rt.block_on(commands::analyze::run(
                config, &zone, priority, timeout, &format,
            ))?;
        }
        Commands::Status {
            zone,
            limit,
            format,
        } => {
            let config = load_config(config_path)?;
            commands::status::run(&config, zone.as_deref(), limit, &format)?;
        }
        Commands::Config { action } => match action {
            ConfigAction::Show { format } => {
                let config = load_config(config_path)?;
                commands::config::show(&config, &format)?;
            }
            ConfigAction::Path => commands::config::path()?,
            ConfigAction::Init { global, force } => commands::config::init(global, force)?,
        },
    }

    Ok(())
}

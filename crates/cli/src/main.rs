mod commands;
mod input;
mod logging;

use std::path::PathBuf;
use std::process;

use clap::{ArgAction, Parser, Subcommand, ValueEnum};

use crate::logging::{LogConfig, LogFormat};

/// Output format for CLI responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub(crate) enum OutputFormat {
    Text,
    Json,
}

/// Exit status when validation ran and the form is invalid.
pub(crate) const EXIT_INVALID: i32 = 2;

/// Clinical form validation and derivation engine.
#[derive(Parser)]
#[command(
    name = "edc",
    version,
    about = "Clinical form validation and derivation engine"
)]
struct Cli {
    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text", value_enum)]
    output: OutputFormat,

    /// Suppress non-essential output
    #[arg(long, global = true)]
    quiet: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    /// Log line format on stderr
    #[arg(long, global = true, default_value = "compact", value_enum)]
    log_format: LogFormat,

    /// Engine configuration file (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate entered values against a form definition
    Validate {
        /// Path to the form metadata JSON file
        form: PathBuf,
        /// Path to the entered values JSON file (object keyed by field id)
        #[arg(long)]
        values: PathBuf,
    },

    /// Compute derived fields and print the updated values
    Derive {
        /// Path to the form metadata JSON file
        form: PathBuf,
        /// Path to the entered values JSON file
        #[arg(long)]
        values: PathBuf,
    },

    /// Run design-time checks on a form definition
    Check {
        /// Path to the form metadata JSON file
        form: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    logging::init_logging(&LogConfig::from_verbosity(cli.verbose).with_format(cli.log_format));

    let config = match input::load_config(cli.config.as_deref()) {
        Ok(c) => c,
        Err(msg) => exit_with_error(&msg, cli.output, cli.quiet),
    };

    match cli.command {
        Commands::Validate { form, values } => {
            commands::validate::cmd_validate(&form, &values, config, cli.output, cli.quiet);
        }
        Commands::Derive { form, values } => {
            commands::derive::cmd_derive(&form, &values, config, cli.output, cli.quiet);
        }
        Commands::Check { form } => {
            commands::check::cmd_check(&form, &config, cli.output, cli.quiet);
        }
    }
}

pub(crate) fn report_error(msg: &str, output: OutputFormat, quiet: bool) {
    if quiet {
        return;
    }
    match output {
        OutputFormat::Text => eprintln!("{}", msg),
        OutputFormat::Json => {
            eprintln!("{}", serde_json::json!({ "error": msg }));
        }
    }
}

pub(crate) fn exit_with_error(msg: &str, output: OutputFormat, quiet: bool) -> ! {
    report_error(msg, output, quiet);
    process::exit(1);
}

/// Print a serializable value as pretty JSON on stdout.
pub(crate) fn print_json<T: serde::Serialize>(value: &T) {
    let json = serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"error\": \"serialization: {}\"}}", e));
    println!("{}", json);
}

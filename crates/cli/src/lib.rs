pub mod commands;

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tabletalk_core::config::{AppConfig, ConfigOverrides, LoadOptions, LogFormat};
use tracing::Level;

#[derive(Debug, Parser)]
#[command(
    name = "tabletalk",
    about = "Ask questions of a SQLite database through a tool-calling language model",
    long_about = "Run conversation turns against a language model that reads and changes a SQLite database only through validated tools.",
    after_help = "Examples:\n  tabletalk ask \"how many orders shipped last week?\"\n  tabletalk query '{\"action\":\"list_tables\"}'\n  tabletalk doctor --json"
)]
pub struct Cli {
    #[arg(long = "config", global = true, help = "Path to a tabletalk.toml config file")]
    config_path: Option<PathBuf>,
    #[arg(long, global = true, help = "Override database.url for this invocation")]
    database_url: Option<String>,
    #[arg(long, global = true, help = "Override llm.model for this invocation")]
    model: Option<String>,
    #[arg(long, global = true, help = "Override logging.level for this invocation")]
    log_level: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Print the function-calling catalog sent to the model")]
    Tools,
    #[command(about = "Run a structured JSON payload directly against the database")]
    Query {
        #[arg(help = "Payload such as '{\"action\":\"select\",\"table\":\"orders\"}'")]
        payload: String,
    },
    #[command(about = "Run one conversation turn and print the answer with its tool calls")]
    Ask {
        prompt: String,
        #[command(flatten)]
        mode: ModeArgs,
    },
    #[command(about = "Interactive conversation; `/db <json>` runs a payload, `/quit` exits")]
    Chat {
        #[command(flatten)]
        mode: ModeArgs,
    },
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, model endpoint, DB connectivity, and the tool catalog")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
}

#[derive(Debug, clap::Args)]
struct ModeArgs {
    #[arg(long, conflicts_with = "allow_writes", help = "Refuse every mutating tool call")]
    read_only: bool,
    #[arg(long, help = "Allow mutating tool calls regardless of the prompt")]
    allow_writes: bool,
}

impl ModeArgs {
    /// `None` leaves the decision to config or the prompt heuristic.
    fn read_only(&self) -> Option<bool> {
        match (self.read_only, self.allow_writes) {
            (true, _) => Some(true),
            (false, true) => Some(false),
            (false, false) => None,
        }
    }
}

pub fn init_logging(config: &AppConfig) {
    let log_level = config.logging.level.parse::<Level>().unwrap_or(Level::INFO);
    let builder = tracing_subscriber::fmt()
        .with_target(false)
        .with_max_level(log_level)
        .with_writer(std::io::stderr);

    let installed = match config.logging.format {
        LogFormat::Compact => builder.compact().try_init(),
        LogFormat::Pretty => builder.pretty().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if installed.is_err() {
        tracing::debug!(event_name = "system.logging.already_installed", "subscriber already set");
    }
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    let options = LoadOptions {
        require_file: cli.config_path.is_some(),
        config_path: cli.config_path,
        overrides: ConfigOverrides {
            database_url: cli.database_url,
            log_level: cli.log_level,
            llm_model: cli.model,
        },
    };

    if let Ok(config) = AppConfig::load(options.clone()) {
        init_logging(&config);
    }

    let result = match cli.command {
        Command::Tools => commands::tools::run(),
        Command::Query { payload } => commands::query::run(&options, &payload),
        Command::Ask { prompt, mode } => commands::ask::run(&options, &prompt, mode.read_only()),
        Command::Chat { mode } => commands::chat::run(&options, mode.read_only()),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run(&options) }
        }
        Command::Doctor { json } => {
            let (output, passed) = commands::doctor::run(&options, json);
            commands::CommandResult { exit_code: if passed { 0 } else { 1 }, output }
        }
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

pub mod commands;

use clap::{Parser, Subcommand};
use std::io;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(
    name = "comanda",
    about = "Comanda operator CLI",
    long_about = "Inspect configuration, apply migrations and talk to the order-taking dialogue locally.",
    after_help = "Examples:\n  comanda config\n  comanda config --json\n  comanda migrate\n  comanda chat --session cli:balcao"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config {
        #[arg(long, help = "Emit the redacted configuration as JSON")]
        json: bool,
    },
    #[command(about = "Chat with the dialogue against the demo catalog and in-memory collaborators")]
    Chat {
        #[arg(long, default_value = "cli:local", help = "Session key of the local customer")]
        session: String,
    },
}

/// Logs go to stderr so they never interleave with command output.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_target(false)
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .compact()
        .try_init();
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();
    init_logging();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config { json } => commands::config::run(json),
        Command::Chat { session } => {
            let stdin = io::stdin();
            commands::chat::run(&session, stdin.lock(), io::stdout())
        }
    };

    if !result.output.is_empty() {
        println!("{}", result.output);
    }
    ExitCode::from(result.exit_code)
}

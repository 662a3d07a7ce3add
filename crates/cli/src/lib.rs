pub mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "switchboard",
    about = "Switchboard operator CLI",
    long_about = "Inspect configuration and readiness, and dry-run intent routing and reply rendering.",
    after_help = "Examples:\n  switchboard doctor --json\n  switchboard config\n  switchboard classify \"run the nightly workflow\"\n  switchboard render reply.md --json"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, Slack token readiness, and rendering limits")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Show which handler a message would be routed to")]
    Classify {
        #[arg(help = "Message text as it would arrive from the chat platform")]
        text: String,
        #[arg(long, help = "Handler that answered the previous turn of the thread")]
        previous: Option<String>,
    },
    #[command(about = "Render a markdown file into delivery batches under the configured limits")]
    Render {
        #[arg(help = "Markdown file to render")]
        file: PathBuf,
        #[arg(long, help = "Emit the batches as JSON")]
        json: bool,
    },
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => commands::doctor::run(json),
        Command::Classify { text, previous } => commands::classify::run(&text, previous.as_deref()),
        Command::Render { file, json } => commands::render::run(&file, json),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}

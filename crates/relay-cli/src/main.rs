mod config;
mod run_cmd;

use std::io;
use std::path::PathBuf;

use clap::Parser;
use clap::error::ErrorKind;

use relay_core::{Diagnostics, ErrorCode, Output};

#[derive(Parser, Debug)]
#[command(
    name = "relay",
    version,
    about = "Run one LLM coding agent backend and report a uniform JSON result"
)]
pub struct Cli {
    /// Task prompt; `-` reads it from stdin
    pub prompt: String,

    /// Backend to run: claude, codex or gemini
    #[arg(short, long, env = "RELAY_BACKEND")]
    pub backend: Option<String>,

    /// Model identifier passed to the backend
    #[arg(short, long, env = "RELAY_MODEL")]
    pub model: Option<String>,

    /// Effort tier: low, medium or high
    #[arg(short, long)]
    pub effort: Option<String>,

    /// Deadline in seconds (overrides the effort tier's default)
    #[arg(short, long, env = "RELAY_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Working directory for the backend (defaults to the current directory)
    #[arg(short = 'C', long)]
    pub cwd: Option<PathBuf>,

    /// Extra system prompt text
    #[arg(long)]
    pub system_prompt: Option<String>,

    /// Backend option as KEY=JSON (repeatable)
    #[arg(short, long = "option", value_name = "KEY=JSON")]
    pub options: Vec<String>,

    /// Config file (defaults to ~/.config/relay/config.toml)
    #[arg(long)]
    pub config: Option<PathBuf>,

    /// Debug logging; backend diagnostics are not filtered
    #[arg(short, long)]
    pub verbose: bool,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        tracing_subscriber::EnvFilter::new("debug")
    } else {
        tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(|| Diagnostics::global().writer())
        .init();

    // Panic messages go through the filtered channel instead of raw stderr.
    std::panic::set_hook(Box::new(|info| {
        tracing::error!(panic = %info, "panic");
    }));
}

#[tokio::main(flavor = "current_thread")]
async fn main() {
    let code = match Cli::try_parse() {
        Ok(cli) => {
            init_tracing(cli.verbose);
            run_cmd::run(cli).await
        }
        Err(e) => match e.kind() {
            ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => {
                let _ = e.print();
                0
            }
            _ => {
                let message = e.to_string();
                let message = message
                    .lines()
                    .next()
                    .unwrap_or("invalid arguments")
                    .trim_start_matches("error: ");
                Output::rejected("unknown", ErrorCode::InvalidArgs, message)
                    .emit(&mut io::stdout().lock())
            }
        },
    };
    std::process::exit(code);
}

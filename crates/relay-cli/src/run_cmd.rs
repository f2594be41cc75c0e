//! The `relay` run: resolve config, pick the engine, execute, emit.

use std::io::{self, Read};

use anyhow::Context;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use relay_core::{
    CancelReason, CancelSignal, Diagnostics, EngineRegistry, ErrorCode, Orchestrator, Output,
    RunConfig,
};

use crate::Cli;
use crate::config::{self, CliError};

/// Run one invocation and return the process exit code.
pub async fn run(cli: Cli) -> i32 {
    let config = match prepare(&cli) {
        Ok(config) => config,
        Err(e) => {
            let engine = match &e {
                CliError::MissingApiKey { backend, .. } => backend.to_string(),
                _ => cli.backend.clone().unwrap_or_else(|| "unknown".to_string()),
            };
            warn!(error = %e, "rejecting run");
            return emit(&Output::rejected(engine, e.code(), e.to_string()));
        }
    };

    let registry = EngineRegistry::with_defaults();
    let Some(engine) = registry.get(config.backend) else {
        let message = format!("no engine registered for {}", config.backend);
        return emit(&Output::rejected(
            config.backend.as_str(),
            ErrorCode::InvalidArgs,
            message,
        ));
    };

    let interrupts = watch_interrupts(config.cancel.clone());
    let output = Orchestrator::new(Diagnostics::global())
        .with_filtering(!cli.verbose)
        .execute(config, engine)
        .await;
    interrupts.abort();

    emit(&output)
}

fn prepare(cli: &Cli) -> Result<RunConfig, CliError> {
    let file = config::load_config_or_default(cli.config.as_deref())?;
    let prompt = read_prompt(&cli.prompt)?;
    let config = config::resolve(cli, &file, prompt)?;
    config::check_credentials(config.backend, file.auth.require_api_key, |var| {
        std::env::var(var).ok()
    })?;
    Ok(config)
}

/// The prompt argument, or stdin when it is `-`.
fn read_prompt(arg: &str) -> anyhow::Result<String> {
    if arg != "-" {
        return Ok(arg.to_string());
    }
    let mut prompt = String::new();
    io::stdin()
        .read_to_string(&mut prompt)
        .context("failed to read prompt from stdin")?;
    Ok(prompt.trim_end().to_string())
}

/// Turn the first SIGINT/SIGTERM into an interrupt on `cancel`.
fn watch_interrupts(cancel: CancelSignal) -> JoinHandle<()> {
    tokio::spawn(async move {
        shutdown_signal().await;
        if cancel.trigger(CancelReason::Interrupt) {
            info!("interrupt received, cancelling run");
        }
    })
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => {}
                    _ = term.recv() => {}
                }
                return;
            }
            Err(e) => warn!(error = %e, "failed to install SIGTERM handler"),
        }
    }
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for Ctrl+C");
        std::future::pending::<()>().await;
    }
}

fn emit(output: &Output) -> i32 {
    output.emit(&mut io::stdout().lock())
}

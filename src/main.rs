mod cli;
mod commands;
mod config;
mod engine;
mod error;
mod item;
mod ledger;
mod script;
mod session;
mod simulate;
#[cfg(test)]
mod testing;
mod ui;
mod webdriver;

use std::process::ExitCode;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use console::Style;
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use tracing_subscriber::{EnvFilter, fmt};

use cli::{Cli, Command, LogFormat};
use config::RondoConfig;
use engine::RunSummary;
use simulate::Chances;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = init_tracing(cli.log_format, cli.verbose) {
        eprintln!("failed to init tracing: {e:#}");
        return ExitCode::from(2);
    }

    match dispatch(cli).await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %format!("{e:#}"), "fatal error");
            eprintln!("{} {e:#}", Style::new().red().bold().apply_to("error:"));
            ExitCode::from(2)
        }
    }
}

async fn dispatch(cli: Cli) -> Result<ExitCode> {
    let mut config = RondoConfig::load(cli.config.as_deref()).context("loading configuration")?;
    config.apply(&cli.overrides());
    config.validate()?;

    let cancel = CancellationToken::new();
    watch_for_cancel(&cancel, cli.deadline_secs.map(Duration::from_secs));

    let summary = match cli.command {
        Command::Run { items, dry_run: true } => {
            commands::plan(&config, &items)?;
            return Ok(ExitCode::SUCCESS);
        }
        Command::Run { items, dry_run: false } => commands::run(&config, &items, cancel).await?,
        Command::Demo {
            items,
            failure_rate,
            crash_rate,
            handled_rate,
            latency_ms,
        } => {
            let chances = Chances {
                failure: failure_rate,
                crash: crash_rate,
                handled: handled_rate,
                latency: Duration::from_millis(latency_ms),
            };
            commands::demo(&config, items, chances, cancel).await?
        }
        Command::Status { items } => {
            commands::status(&config, &items)?;
            return Ok(ExitCode::SUCCESS);
        }
    };

    Ok(exit_code(&summary))
}

/// 130 when cancelled, 1 when any item failed or was left unfinished, 0 otherwise.
fn exit_code(summary: &RunSummary) -> ExitCode {
    if summary.cancelled {
        ExitCode::from(130)
    } else if !summary.is_clean() {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    }
}

/// Cancels the run on Ctrl-C or once `deadline` has elapsed.
fn watch_for_cancel(cancel: &CancellationToken, deadline: Option<Duration>) {
    let token = cancel.clone();
    tokio::spawn(async move {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => {
                    warn!("interrupt received, finishing in-flight items");
                    token.cancel();
                }
                Err(e) => warn!(error = %e, "cannot listen for Ctrl-C"),
            },
            () = token.cancelled() => {}
        }
    });

    if let Some(deadline) = deadline {
        let token = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(deadline) => {
                    warn!(deadline_secs = deadline.as_secs(), "deadline reached, cancelling run");
                    token.cancel();
                }
                () = token.cancelled() => {}
            }
        });
    }
}

fn init_tracing(log_format: LogFormat, verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let subscriber = fmt().with_env_filter(env_filter).with_writer(std::io::stderr);

    match log_format {
        LogFormat::Text => subscriber
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to init tracing: {err}"))?,
        LogFormat::Json => subscriber
            .json()
            .try_init()
            .map_err(|err| anyhow::anyhow!("failed to init tracing: {err}"))?,
    }

    Ok(())
}

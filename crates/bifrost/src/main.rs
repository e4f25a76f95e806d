mod cli;
mod error;

use std::path::Path;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use bifrost_config::load_bridge_config;
use bifrost_core::{Bridge, BridgeConfig};

use crate::cli::{Cli, Command, LogFormat};
use crate::error::{CliError, exit_code};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(&cli);

    if let Err(err) = run(cli).await {
        let code = err.exit_code();
        eprintln!("{:?}", miette::Report::new(err));
        std::process::exit(code);
    }
    std::process::exit(exit_code::SUCCESS);
}

/// `RUST_LOG` wins; otherwise `-v` picks the level. The daemon logs at
/// info by default, the one-shot commands only warnings.
fn init_tracing(cli: &Cli) {
    let base = match cli.command {
        Command::Run => 1,
        Command::Check | Command::Completions(_) => 0,
    };
    let filter = match base + cli.global.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    match cli.global.log_format {
        LogFormat::Text => builder.with_target(false).init(),
        LogFormat::Json => builder.json().with_current_span(false).init(),
    }
}

async fn run(cli: Cli) -> Result<(), CliError> {
    match cli.command {
        Command::Completions(args) => {
            use clap::CommandFactory;
            use clap_complete::generate;

            let mut cmd = Cli::command();
            generate(args.shell, &mut cmd, "bifrost", &mut std::io::stdout());
            Ok(())
        }

        Command::Check => {
            let config = load(&cli.global.config)?;
            print_summary(&cli.global.config, &config);
            Ok(())
        }

        Command::Run => {
            let config = load(&cli.global.config)?;
            info!(
                config = %cli.global.config.display(),
                controllers = config.controllers.len(),
                "starting bifrost"
            );

            let shutdown = CancellationToken::new();
            tokio::spawn(forward_signals(shutdown.clone()));

            Bridge::new(config).run(shutdown).await?;
            Ok(())
        }
    }
}

fn load(path: &Path) -> Result<BridgeConfig, CliError> {
    load_bridge_config(path).map_err(|e| CliError::from_config(e, path))
}

fn print_summary(path: &Path, config: &BridgeConfig) {
    println!("{}: ok", path.display());
    println!(
        "mqtt: {}:{} (client id {})",
        config.mqtt.host, config.mqtt.port, config.mqtt.client_id
    );

    println!("controllers:");
    for controller in &config.controllers {
        match controller.default_brightness {
            Some(level) => println!(
                "  {} -> {} (default brightness {level})",
                controller.name, controller.address
            ),
            None => println!("  {} -> {}", controller.name, controller.address),
        }
    }

    if !config.switches.is_empty() {
        let mut switches: Vec<_> = config.switches.iter().collect();
        switches.sort();
        println!("switches:");
        for (switch, controller) in switches {
            println!("  {switch} -> {controller}");
        }
    }
}

/// Cancel `shutdown` on Ctrl-C or, on Unix, SIGTERM.
async fn forward_signals(shutdown: CancellationToken) {
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    wait_for_signal(tokio::signal::ctrl_c(), terminate).await;
    shutdown.cancel();
}

/// Resolve on whichever signal arrives first. If the Ctrl-C listener
/// cannot be installed, SIGTERM alone ends the wait.
async fn wait_for_signal(
    interrupt: impl Future<Output = std::io::Result<()>>,
    terminate: impl Future<Output = ()>,
) {
    let interrupt = async {
        match interrupt.await {
            Ok(()) => info!("interrupt received"),
            Err(e) => {
                warn!(error = %e, "cannot listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        () = interrupt => {}
        () = terminate => info!("terminate signal received"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn failed_interrupt_listener_still_waits_for_terminate() {
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let interrupt = std::future::ready(Err(std::io::Error::other("no signal driver")));
        let terminate = async {
            let _ = rx.await;
        };

        let waiter = tokio::spawn(wait_for_signal(interrupt, terminate));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        tx.send(()).unwrap();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn interrupt_ends_the_wait() {
        wait_for_signal(std::future::ready(Ok(())), std::future::pending()).await;
    }
}

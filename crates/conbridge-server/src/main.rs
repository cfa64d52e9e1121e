//! conbridge: drive a console program and shell commands from Telegram.
//!
//! Long-polls the Bot API, hands every text message to a single operator
//! session, and relays program output back to the operator chat.

mod config;
mod telegram;

use clap::Parser;
use config::{BridgeConfig, Overrides};
use conbridge_core::{
    DirectoryArtifacts, GestureTable, InboundMessage, SessionController, ShellVariant,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use telegram::api::TelegramApi;
use telegram::TelegramTransport;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};

/// How long the session gets to stop its processes after a shutdown signal.
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

/// conbridge: remote control bridge for console programs
#[derive(Parser, Debug)]
#[command(name = "conbridge", version, about = "Drive a console program from Telegram")]
struct Cli {
    /// Config file path
    #[arg(long, default_value = "~/.conbridge/config.toml")]
    config: String,

    /// Telegram bot token
    #[arg(long, env = "BOT_TOKEN", hide_env_values = true)]
    bot_token: Option<String>,

    /// Chat id of the only operator allowed to use the bridge
    #[arg(long, env = "ADMIN_CHAT_ID")]
    operator_chat_id: Option<i64>,

    /// Interactive program to launch
    #[arg(long)]
    program: Option<String>,

    /// Name shown on the launch button
    #[arg(long)]
    program_label: Option<String>,

    /// Shell-mode execution (oneshot, persistent)
    #[arg(long, value_parser = parse_shell_mode)]
    shell_mode: Option<ShellVariant>,

    /// Hard cap for one-shot shell commands, in seconds
    #[arg(long)]
    shell_timeout: Option<u64>,

    /// Directory scanned for artifacts
    #[arg(long)]
    artifacts_dir: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn parse_shell_mode(s: &str) -> Result<ShellVariant, String> {
    match s.to_ascii_lowercase().as_str() {
        "oneshot" => Ok(ShellVariant::Oneshot),
        "persistent" => Ok(ShellVariant::Persistent),
        other => Err(format!("unknown shell mode '{other}' (expected oneshot or persistent)")),
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize tracing
    use tracing_subscriber::EnvFilter;
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "starting conbridge");

    // Load bridge config (file + CLI overrides)
    let config_path = PathBuf::from(&cli.config);
    let overrides = Overrides {
        bot_token: cli.bot_token,
        operator_chat_id: cli.operator_chat_id,
        program: cli.program,
        program_label: cli.program_label,
        shell_mode: cli.shell_mode,
        shell_timeout: cli.shell_timeout,
        artifacts_dir: cli.artifacts_dir,
    };
    let config = match BridgeConfig::load(Some(&config_path), overrides) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!(error = %format!("{e:#}"), "failed to load config");
            std::process::exit(1);
        }
    };

    info!(
        operator = config.operator_chat_id,
        program = %config.program.display(),
        shell_mode = ?config.shell.variant,
        artifacts = %config.artifacts_dir.display(),
        "configuration loaded"
    );

    if let Err(e) = run(config).await {
        error!(error = %format!("{e:#}"), "bridge error");
        std::process::exit(1);
    }

    info!("conbridge stopped");
}

async fn run(config: BridgeConfig) -> anyhow::Result<()> {
    let api = Arc::new(TelegramApi::new(&config.bot_token));
    let session_config = config.session_config();
    let artifacts = Arc::new(DirectoryArtifacts::new(
        config.artifacts_dir.clone(),
        config.extensions.clone(),
        config.max_artifacts,
    ));

    // The transport renders the same launch label the session parses.
    let launch_label = GestureTable::new(&session_config.program_label)
        .launch_label()
        .to_string();
    let transport = Arc::new(TelegramTransport::new(
        Arc::clone(&api),
        config.operator_chat_id,
        launch_label,
    ));
    let controller = SessionController::new(session_config, transport, artifacts);

    let (inbound_tx, inbound_rx) = mpsc::channel::<InboundMessage>(64);
    let (cancel_tx, cancel_rx) = watch::channel(false);

    let poller = tokio::spawn(telegram::poller::poll_loop(
        api,
        config.poll_timeout,
        inbound_tx,
        cancel_rx,
    ));
    let mut session = tokio::spawn(controller.run(inbound_rx));

    tokio::select! {
        result = &mut session => {
            result?;
            warn!("session ended unexpectedly");
        }
        _ = shutdown_signal() => {
            info!("received shutdown signal");
            // Closing the poller closes the inbound channel, which ends the
            // session loop and stops any running processes.
            let _ = cancel_tx.send(true);
            match tokio::time::timeout(SHUTDOWN_TIMEOUT, &mut session).await {
                Ok(result) => result?,
                Err(_) => {
                    warn!("session did not stop in time");
                    session.abort();
                }
            }
        }
    }

    let _ = cancel_tx.send(true);
    if let Err(e) = poller.await {
        warn!(error = %e, "poller task failed");
    }
    Ok(())
}

/// Wait for SIGTERM or SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                tokio::select! {
                    _ = ctrl_c => {}
                    _ = sigterm.recv() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "failed to install SIGTERM handler");
                ctrl_c.await.ok();
            }
        }
    }

    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
    }
}

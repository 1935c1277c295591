mod audit;
mod backoff;
mod bluesky;
mod bot;
mod config;
mod handlers;
mod sandbox;
mod session;
#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::audit::AuditLog;
use crate::bluesky::BlueskyClient;
use crate::bot::{BotContext, Dispatcher, LoopSettings};
use crate::config::Config;
use crate::handlers::{CodeExecutionHandler, HandlerRegistry};
use crate::sandbox::E2bSandbox;
use crate::session::{persist_changes, SessionStore};

/// How long a stopping bot may take to finish its current item.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(30);

fn print_help() {
    println!(
        "\
runcode-bot v{}

A Bluesky bot that runs code from posts starting with a shebang line
addressed to it, and replies with the output.

USAGE:
    runcode-bot [OPTIONS] [CONFIG_PATH]

ARGUMENTS:
    CONFIG_PATH    Path to TOML configuration file [default: config/bot.toml]

OPTIONS:
    -h, --help       Print this help message and exit
    -V, --version    Print version and exit

ENVIRONMENT VARIABLES:
    Variables are referenced in the config file via ${{VAR_NAME}} syntax.

    RUST_LOG          Log level filter for tracing
                      (e.g. debug, runcode_bot=debug,warn)
    BSKY_PASSWORD     App password of the bot's Bluesky account
    E2B_API_KEY       API key for the E2B sandbox service
                      (from https://e2b.dev)

EXAMPLES:
    runcode-bot                         # uses config/bot.toml
    runcode-bot /etc/runcode/bot.toml   # custom config path
    RUST_LOG=debug runcode-bot          # with debug logging",
        env!("CARGO_PKG_VERSION"),
    );
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --help / --version before anything else
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("runcode-bot v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {}
        }
    }

    // Initialize logging (RUST_LOG=debug for debug mode)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("runcode_bot=info")),
        )
        .init();

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config/bot.toml".to_string());

    info!("Loading configuration from {config_path}");
    let config = Config::load(&config_path)?;

    info!("Account: {} on {}", config.bluesky.handle, config.bluesky.service);
    info!(
        "Sandbox: {} ({})",
        config.sandbox.template, config.sandbox.api_url
    );
    info!("Polling every {}s", config.bot.poll_interval_secs);

    let audit = AuditLog::open(&config.audit.path)?;

    // Sessions survive restarts; changes are written by a background task
    let store = SessionStore::new(&config.bot.session_path);
    let (client, session_rx) = BlueskyClient::new(
        config.bluesky.clone(),
        config.bot.request_timeout(),
        store.load(),
    );
    tokio::spawn(persist_changes(store, session_rx));

    let mut handlers = HandlerRegistry::new();
    handlers.register(Box::new(CodeExecutionHandler));
    anyhow::ensure!(!handlers.is_empty(), "no notification handlers registered");
    info!(
        "Handlers: {} registered ({})",
        handlers.len(),
        handlers.names().join(", ")
    );

    let cx = BotContext {
        social: Arc::new(client),
        sandbox: Arc::new(E2bSandbox::new(config.sandbox.clone())),
        audit: audit.clone(),
        settings: LoopSettings::from_config(&config),
    };
    let (stop, shutdown) = watch::channel(false);
    let mut dispatcher = Dispatcher::new(cx, handlers, shutdown);

    if let Err(e) = audit.lifecycle("Bot started") {
        warn!("Could not write lifecycle record: {e}");
    }

    // The loop runs on its own task so a panic is reported instead of
    // taking the process down silently
    let mut bot_task = tokio::spawn(async move { dispatcher.run().await });

    tokio::select! {
        joined = &mut bot_task => {
            let reason = match joined {
                Ok(()) => "loop exited".to_string(),
                Err(e) => e.to_string(),
            };
            error!("Bot crashed: {reason}");
            if let Err(e) = audit.lifecycle(&format!("Bot crashed: {reason}")) {
                warn!("Could not write lifecycle record: {e}");
            }
            Err(anyhow!("bot crashed: {reason}"))
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, finishing the current item");
            stop.send_replace(true);

            // A second Ctrl-C or the grace period cuts the wait short
            tokio::select! {
                _ = &mut bot_task => info!("Bot loop finished cleanly"),
                _ = tokio::signal::ctrl_c() => {
                    warn!("Second shutdown signal, exiting now");
                    bot_task.abort();
                }
                _ = tokio::time::sleep(SHUTDOWN_GRACE) => {
                    warn!("Bot loop still busy after {}s, exiting now", SHUTDOWN_GRACE.as_secs());
                    bot_task.abort();
                }
            }

            if let Err(e) = audit.lifecycle("Bot stopped by user") {
                warn!("Could not write lifecycle record: {e}");
            }
            Ok(())
        }
    }
}

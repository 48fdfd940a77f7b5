/// # note-relay CLI Interface (Module)
///
/// Command parsing and orchestration for the `note-relay` binary. The relay's behaviour lives
/// in the [`note-relay-core`] crate; this module only wires configuration, the Misskey client
/// and the Telegram producer together.
///
/// ## Commands
/// - `run --config <yaml>`: connect to both services and relay until interrupted.
/// - `check --config <yaml>`: load and validate the configuration, print a summary, and exit
///   without touching the network.
///
/// ## Programmatic use
/// Call [`run`] with a constructed [`Cli`]; integration tests do exactly that.
///
/// [`note-relay-core`]: ../../note-relay-core/
use crate::load_config::{load_config, AppConfig};
use crate::misskey::MisskeyClient;
use crate::telegram::{spawn_producer, TelegramMessenger};
use anyhow::Result;
use clap::{Parser, Subcommand};
use note_relay_core::relay::Relay;
use std::path::PathBuf;
use tokio::sync::mpsc;

/// CLI for note-relay: republish Telegram bot messages as Misskey notes.
#[derive(Parser)]
#[clap(
    name = "note-relay",
    version,
    about = "Relay Telegram bot messages, albums included, into Misskey notes"
)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start relaying with the given config file
    Run {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
    /// Validate the config file and environment, then exit
    Check {
        /// Path to the YAML config file
        #[clap(long)]
        config: PathBuf,
    },
}

/// Async CLI entrypoint for main() and integration tests.
pub async fn run(cli: Cli) -> Result<()> {
    // Emit a top-level 'trace_initialised' event at the very start
    tracing::info!("trace_initialised");

    match cli.command {
        Commands::Check { config } => {
            let config = load_config(config)?;
            config.relay.trace_loaded();
            println!("{}", summary(&config));
            Ok(())
        }
        Commands::Run { config } => {
            let config = load_config(config)?;
            config.relay.trace_loaded();
            tracing::info!(command = "run", "Starting relay");
            serve(config).await
        }
    }
}

fn summary(config: &AppConfig) -> String {
    let restriction = |id: Option<i64>| id.map_or_else(|| "any".to_string(), |id| id.to_string());
    format!(
        "Configuration OK\n  misskey: {}\n  upload folder: {}\n  visibility: {} (local only: {})\n  chat: {}\n  user: {}\n  failure policy: {:?}",
        config.misskey_url,
        config.relay.upload_folder,
        config.relay.view.visibility,
        config.relay.view.local_only,
        restriction(config.allowed_chat_id),
        restriction(config.allowed_user_id),
        config.relay.failure_policy,
    )
}

async fn serve(config: AppConfig) -> Result<()> {
    let misskey = MisskeyClient::new(&config.misskey_url, &config.misskey_token)
        .map_err(|e| anyhow::anyhow!("Failed to build Misskey client: {e}"))?;
    let messenger = TelegramMessenger::new(&config.telegram_token, config.poll_timeout_secs)
        .map_err(|e| anyhow::anyhow!("Failed to build Telegram bot: {e}"))?;
    messenger
        .connect()
        .await
        .map_err(|e| anyhow::anyhow!("Telegram rejected the bot token: {e}"))?;

    let started_at = chrono::Utc::now();
    let filter = config.inbound_filter(started_at);
    let (tx, mut rx) = mpsc::channel(config.queue_capacity);
    let producer = spawn_producer(
        messenger.bot().clone(),
        config.poll_timeout_secs,
        filter,
        tx,
    );

    let mut relay = Relay::new(misskey.clone(), misskey, messenger, config.relay);
    if relay.prepare_upload_folder().await.is_none() {
        tracing::warn!(
            folder = %relay.config().upload_folder,
            "Upload folder unavailable, uploads will go without a folder"
        );
    }

    let result = tokio::select! {
        outcome = relay.run(&mut rx) => outcome.map_err(anyhow::Error::from),
        signal = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupt received, shutting down");
            signal.map_err(anyhow::Error::from)
        }
    };

    producer.abort();
    match &result {
        Ok(()) => tracing::info!(command = "run", "Relay stopped"),
        Err(e) => tracing::error!(command = "run", error = %e, "Relay stopped with error"),
    }
    result
}

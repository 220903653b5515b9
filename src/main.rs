use std::sync::Arc;
use std::time::Duration;

use anyhow::Context as _;
use serenity::all::{ChannelId, Client, GatewayIntents, Http};
use tracing::{error, info, warn};
use tracing_subscriber::prelude::*;

use chad::bot::{unix_now, Bot, Coordinator, CoordinatorConfig, DiscordMessenger, Handler, Messenger, SettingsStore};
use chad::config::Config;
use chad::discord_log::DiscordLogLayer;

/// Pause between the final save and dropping the gateway connection.
const DISCONNECT_GRACE: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).unwrap_or_else(|| ".chad".to_string());
    let config = Config::load(&config_path).context("Failed to load config")?;

    let http = Arc::new(Http::new(&config.discord_token));

    // Setup logging
    let log_dir = config.data_dir.join("logs");
    std::fs::create_dir_all(&log_dir).context("Failed to create log directory")?;
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("chad.log"))
        .context("Failed to open log file")?;
    let (non_blocking, _guard) = tracing_appender::non_blocking(log_file);

    let registry = tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stdout)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(non_blocking)
                .with_ansi(false)
                .with_filter(
                    tracing_subscriber::EnvFilter::from_default_env()
                        .add_directive(tracing::Level::INFO.into()),
                ),
        );

    if let Some(log_channel_id) = config.log_channel_id {
        let layer = DiscordLogLayer::new(Arc::clone(&http), ChannelId::new(log_channel_id));
        registry.with(layer).init();
    } else {
        registry.init();
    }

    info!("🚀 Starting chad...");
    info!("Loaded config from {config_path}");

    let messenger: Arc<dyn Messenger> = Arc::new(DiscordMessenger::new(Arc::clone(&http)));
    let coordinator = Coordinator::new(
        CoordinatorConfig::from(&config),
        SettingsStore::new(config.settings_path()),
        Arc::clone(&messenger),
    );

    let restored = coordinator.restore(unix_now()).await;
    info!("Loaded {restored} reminder(s) from {}", config.settings_path().display());
    coordinator.start_background_tasks();

    let token = config.discord_token.clone();
    let bot = Arc::new(Bot::new(config, Arc::clone(&coordinator), messenger).context("Failed to create bot")?);

    let intents = GatewayIntents::GUILDS
        | GatewayIntents::GUILD_MESSAGES
        | GatewayIntents::GUILD_MEMBERS
        | GatewayIntents::MESSAGE_CONTENT;

    let mut client = Client::builder(&token, intents)
        .event_handler(Handler::new(bot))
        .await
        .context("Failed to create Discord session")?;
    let shard_manager = Arc::clone(&client.shard_manager);

    let gateway = tokio::spawn(async move {
        if let Err(e) = client.start().await {
            error!("Discord gateway error: {e}");
        }
    });

    info!("Bot is now running. Press CTRL-C to exit.");

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            if let Err(e) = result {
                warn!("Failed to listen for shutdown signal: {e}");
            }
        }
        _ = gateway => {
            warn!("Discord gateway stopped");
        }
    }

    if let Err(e) = coordinator.shutdown(unix_now()).await {
        error!("Error during shutdown: {e}");
    }

    tokio::time::sleep(DISCONNECT_GRACE).await;
    shard_manager.shutdown_all().await;
    info!("Goodbye");

    Ok(())
}

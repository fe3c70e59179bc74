// This is the entry point of the moderation bot.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic)
// - `infra/` = Implementations of core traits (databases)
// - `discord/` = Discord-specific adapters (commands, events, platform client)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize services (dependency injection)
// 3. Set up the Discord framework
// 4. Register commands, event handlers and background sweeps

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with half a dozen mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "discord/discord_layer.rs"]
mod discord;
#[path = "infra/infra_layer.rs"]
mod infra;

use crate::core::moderation::{
    ModerationConfig, ModerationService, ModerationStore, PlatformClient, FLOOD_SWEEP_INTERVAL,
};
use crate::discord::ingest::inbound_event;
use crate::discord::platform::SerenityPlatform;
use crate::discord::{Data, Error};
use crate::infra::moderation::SqliteModerationStore;
use anyhow::Context as _;
use poise::serenity_prelude as serenity;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Event handler for non-command Discord events.
/// Every relevant event goes through the moderation pipeline.
async fn event_handler(
    _ctx: &serenity::Context,
    event: &serenity::FullEvent,
    _framework: poise::FrameworkContext<'_, Data, Error>,
    data: &Data,
) -> Result<(), Error> {
    // Servers the bot is in are the servers it manages.
    if let serenity::FullEvent::GuildCreate { guild, .. } = event {
        if let Err(e) = data.store.register_group(guild.id.get(), &guild.name).await {
            tracing::error!(guild_id = guild.id.get(), error = %e, "Failed to register guild");
        }
    }

    if let Some(inbound) = inbound_event(event) {
        // The dispatcher paces actions; don't hold up the gateway while it does.
        let moderation = Arc::clone(&data.moderation);
        tokio::spawn(async move {
            let outcome = moderation.handle_event(inbound).await;
            tracing::debug!(?outcome, "Event handled");
        });
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    // Initialize logging so we can see what's happening (RUST_LOG overrides)
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Get Discord bot token from environment
    let token = std::env::var("DISCORD_TOKEN").context(
        "Missing DISCORD_TOKEN environment variable! Create a .env file with your bot token.",
    )?;

    let config = ModerationConfig::from_env().context("Invalid GUARD_* configuration")?;
    tracing::info!(
        dry_run = config.dry_run,
        action_mode = %config.action_mode,
        admins = config.admin_ids.len(),
        audit_channel = ?config.audit_channel_id,
        "Moderation config loaded"
    );

    // Keep runtime databases in a dedicated folder so the repo root stays tidy.
    let data_dir = "data";
    std::fs::create_dir_all(data_dir).context("Failed to create data directory")?;
    let db_path = format!("{}/moderation.db", data_dir);

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // The store is ready now; the pipeline itself needs the bot's own id and
    // HTTP client, so it is built in the framework setup below.

    let store = Arc::new(
        SqliteModerationStore::open(&db_path)
            .await
            .context("Failed to initialize moderation database")?,
    );

    // ========================================================================
    // DISCORD FRAMEWORK SETUP
    // ========================================================================

    let intents = serenity::GatewayIntents::GUILD_MESSAGES
        | serenity::GatewayIntents::MESSAGE_CONTENT // Required to read message content
        | serenity::GatewayIntents::GUILDS
        | serenity::GatewayIntents::GUILD_MEMBERS;

    let framework = poise::Framework::builder()
        .options(poise::FrameworkOptions {
            commands: vec![discord::commands::moderation::guard()],
            event_handler: |ctx, event, framework, data| {
                Box::pin(event_handler(ctx, event, framework, data))
            },
            ..Default::default()
        })
        .setup(move |ctx, ready, framework| {
            Box::pin(async move {
                tracing::info!(bot = %ready.user.name, "Bot is starting up");

                let platform: Arc<dyn PlatformClient> =
                    Arc::new(SerenityPlatform::new(ctx.http.clone(), ctx.cache.clone()));
                let moderation = Arc::new(ModerationService::new(
                    config,
                    platform,
                    Arc::clone(&store),
                    store.clone(),
                    ready.user.id.get(),
                )?);

                poise::builtins::register_globally(ctx, &framework.options().commands).await?;
                tracing::info!("Commands registered");

                // Background sweep of the in-memory trackers.
                let sweeper = Arc::clone(&moderation);
                tokio::spawn(async move {
                    let mut interval = tokio::time::interval(FLOOD_SWEEP_INTERVAL);
                    // The first tick completes immediately.
                    interval.tick().await;
                    loop {
                        interval.tick().await;
                        sweeper.sweep();
                    }
                });

                Ok(Data { moderation, store })
            })
        })
        .build();

    // Create the client and start the bot
    let mut client = serenity::ClientBuilder::new(token, intents)
        .framework(framework)
        .await
        .context("Error creating client")?;

    client.start().await.context("Error running bot")?;
    Ok(())
}

// Guard slash commands - runtime administration of the moderation pipeline.

use crate::core::moderation::{ModerationService, ModerationStore};
use crate::infra::moderation::SqliteModerationStore;
use poise::serenity_prelude as serenity;
use std::sync::Arc;

// Shared state available to all commands
pub struct Data {
    pub moderation: Arc<ModerationService<SqliteModerationStore>>,
    pub store: Arc<SqliteModerationStore>,
}

pub type Error = Box<dyn std::error::Error + Send + Sync>;
pub type Context<'a> = poise::Context<'a, Data, Error>;

/// Commands that change global behaviour are limited to configured admins.
fn ensure_bot_admin(ctx: &Context<'_>) -> Result<(), Error> {
    if ctx.data().moderation.config().is_admin(ctx.author().id.get()) {
        Ok(())
    } else {
        Err("Only configured bot admins can do that.".into())
    }
}

/// Moderation pipeline controls.
#[poise::command(
    slash_command,
    subcommands("status", "dryrun", "pardon", "unmute", "team", "features", "history"),
    required_permissions = "BAN_MEMBERS",
    guild_only
)]
pub async fn guard(_ctx: Context<'_>) -> Result<(), Error> {
    // Parent command - shows help
    Ok(())
}

/// Show pipeline mode, managed servers and queue state.
#[poise::command(slash_command, guild_only)]
pub async fn status(ctx: Context<'_>) -> Result<(), Error> {
    let status = ctx.data().moderation.status().await?;
    let config = ctx.data().moderation.config();

    let groups = if status.managed_groups.is_empty() {
        "none".to_string()
    } else {
        status
            .managed_groups
            .iter()
            .map(|g| {
                format!(
                    "{} (scam: {}, flood: {})",
                    g.title,
                    on_off(g.scam_detection),
                    on_off(g.flood_protection)
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let embed = serenity::CreateEmbed::new()
        .title("🛡️ Guard Status")
        .color(if status.dry_run { 0xFFA500 } else { 0x00FF00 })
        .field(
            "Mode",
            format!(
                "{}\nHIGH severity: {}",
                if status.dry_run { "Dry run" } else { "Live" },
                status.action_mode
            ),
            true,
        )
        .field(
            "Flood limit",
            format!(
                "{} msgs / {}s → {} min mute",
                config.flood.max_messages, config.flood.window_secs, config.flood.restrict_minutes
            ),
            true,
        )
        .field(
            "Queues",
            format!(
                "{} actions, {} audit entries pending",
                status.pending_actions, status.pending_audit
            ),
            false,
        )
        .field(
            "Trackers",
            format!(
                "{} flood subjects, {} active cooldowns, {} dedup markers",
                status.flood_subjects, status.active_cooldowns, status.dedup_markers
            ),
            false,
        )
        .field("Managed servers", groups, false);

    ctx.send(poise::CreateReply::default().embed(embed)).await?;
    Ok(())
}

/// Toggle dry-run mode (decide and log, but never act).
#[poise::command(slash_command, guild_only)]
pub async fn dryrun(
    ctx: Context<'_>,
    #[description = "Enable dry-run mode"] enabled: bool,
) -> Result<(), Error> {
    ensure_bot_admin(&ctx)?;
    ctx.data().moderation.dispatcher().set_dry_run(enabled);
    ctx.say(format!("Dry-run mode is now **{}**.", on_off(enabled)))
        .await?;
    Ok(())
}

/// Unban a user and remove them from the blacklist.
#[poise::command(slash_command, guild_only)]
pub async fn pardon(
    ctx: Context<'_>,
    #[description = "User to pardon"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;

    let result = ctx
        .data()
        .moderation
        .pardon(guild_id.get(), user.id.get(), ctx.author().id.get())
        .await?;

    ctx.say(format!("Pardon for <@{}>: {}", user.id, result.describe()))
        .await?;
    Ok(())
}

/// Lift a mute and reset the user's flood tracking.
#[poise::command(slash_command, guild_only)]
pub async fn unmute(
    ctx: Context<'_>,
    #[description = "User to unmute"] user: serenity::User,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;

    let result = ctx
        .data()
        .moderation
        .unmute(guild_id.get(), user.id.get(), ctx.author().id.get())
        .await;

    ctx.say(format!("Unmute for <@{}>: {}", user.id, result.describe()))
        .await?;
    Ok(())
}

/// Add or remove a team member (never moderated).
#[poise::command(slash_command, guild_only)]
pub async fn team(
    ctx: Context<'_>,
    #[description = "User to update"] user: serenity::User,
    #[description = "Add (true) or remove (false)"] add: bool,
) -> Result<(), Error> {
    ensure_bot_admin(&ctx)?;

    let store = &ctx.data().store;
    if add {
        store
            .add_team_member(user.id.get(), ctx.author().id.get())
            .await?;
        ctx.say(format!("✅ <@{}> is now a team member.", user.id))
            .await?;
    } else {
        store.remove_team_member(user.id.get()).await?;
        ctx.say(format!("<@{}> is no longer a team member.", user.id))
            .await?;
    }
    Ok(())
}

/// Turn scam detection or flood protection on or off for this server.
#[poise::command(slash_command, guild_only)]
pub async fn features(
    ctx: Context<'_>,
    #[description = "Scam detection"] scam_detection: bool,
    #[description = "Flood protection"] flood_protection: bool,
) -> Result<(), Error> {
    let guild_id = ctx.guild_id().ok_or("Must be used in a server")?;

    ctx.data()
        .store
        .set_group_flags(guild_id.get(), scam_detection, flood_protection)
        .await?;

    ctx.say(format!(
        "Scam detection: **{}**, flood protection: **{}**.",
        on_off(scam_detection),
        on_off(flood_protection)
    ))
    .await?;
    Ok(())
}

/// How many moderation actions were recorded against a user.
#[poise::command(slash_command, guild_only)]
pub async fn history(
    ctx: Context<'_>,
    #[description = "User to look up"] user: serenity::User,
) -> Result<(), Error> {
    let count = ctx.data().store.count_actions(user.id.get()).await?;
    ctx.say(format!("<@{}> has {} recorded moderation actions.", user.id, count))
        .await?;
    Ok(())
}

fn on_off(enabled: bool) -> &'static str {
    if enabled {
        "on"
    } else {
        "off"
    }
}

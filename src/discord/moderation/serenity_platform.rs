// Serenity-backed platform client - the only place that talks to Discord for
// moderation actions.
//
// Mapping onto Discord:
// - chat = guild; `send_message` targets a channel id
// - restrict = member timeout, unrestrict = timeout removed
// - administrators = guild owner plus members holding ADMINISTRATOR (from cache)
//
// Serenity errors are turned into `ApiError` here and nowhere else.

use crate::core::moderation::{
    ApiError, ChatMember, ChatPermissions, MemberPermissions, MemberStatus, PlatformClient,
    SendOptions,
};
use async_trait::async_trait;
use serenity::builder::{CreateMessage, EditMember};
use serenity::cache::Cache;
use serenity::http::{Http, HttpError};
use serenity::model::channel::MessageFlags;
use serenity::model::guild::Member;
use serenity::model::id::{ChannelId, GuildId, MessageId, UserId};
use serenity::model::{Permissions, Timestamp};
use std::sync::Arc;

/// Translate a serenity failure into the raw platform error shape.
pub fn to_api_error(err: serenity::Error) -> ApiError {
    match err {
        // Serenity's ratelimiter absorbs most 429s; one that gets through has no
        // retry hint, so classification falls back to the default wait.
        serenity::Error::Http(HttpError::UnsuccessfulRequest(response)) => {
            ApiError::new(response.status_code.as_u16(), response.error.message)
        }
        serenity::Error::Model(e) => ApiError::new(400, e.to_string()),
        other => ApiError::new(0, other.to_string()),
    }
}

pub struct SerenityPlatform {
    http: Arc<Http>,
    cache: Arc<Cache>,
}

impl SerenityPlatform {
    pub fn new(http: Arc<Http>, cache: Arc<Cache>) -> Self {
        Self { http, cache }
    }

    /// Owner flag and effective permissions, read from the guild cache.
    fn guild_view(
        &self,
        guild_id: GuildId,
        member: &Member,
    ) -> Option<(bool, Permissions)> {
        let guild = self.cache.guild(guild_id)?;
        Some((
            guild.owner_id == member.user.id,
            guild.member_permissions(member),
        ))
    }

    fn to_chat_member(&self, guild_id: GuildId, member: &Member) -> ChatMember {
        let (is_owner, permissions) = self
            .guild_view(guild_id, member)
            .unwrap_or((false, Permissions::empty()));

        let timed_out = member
            .communication_disabled_until
            .is_some_and(|until| until.unix_timestamp() > chrono::Utc::now().timestamp());

        let status = if is_owner {
            MemberStatus::Creator
        } else if permissions.administrator() {
            MemberStatus::Administrator
        } else if timed_out {
            MemberStatus::Restricted
        } else {
            MemberStatus::Member
        };

        ChatMember {
            user_id: member.user.id.get(),
            status,
            permissions: MemberPermissions {
                can_delete_messages: permissions.manage_messages(),
                can_restrict_members: permissions.moderate_members(),
                can_ban_members: permissions.ban_members(),
            },
        }
    }
}

#[async_trait]
impl PlatformClient for SerenityPlatform {
    async fn send_message(
        &self,
        chat_id: u64,
        text: &str,
        opts: SendOptions,
    ) -> Result<(), ApiError> {
        let mut message = CreateMessage::new().content(text);
        if opts.silent {
            message = message.flags(MessageFlags::SUPPRESS_NOTIFICATIONS);
        }
        ChannelId::new(chat_id)
            .send_message(&self.http, message)
            .await
            .map_err(to_api_error)?;
        Ok(())
    }

    async fn send_direct_message(&self, user_id: u64, text: &str) -> Result<(), ApiError> {
        UserId::new(user_id)
            .direct_message(&self.http, CreateMessage::new().content(text))
            .await
            .map_err(to_api_error)?;
        Ok(())
    }

    async fn delete_message(
        &self,
        _chat_id: u64,
        channel_id: u64,
        message_id: u64,
    ) -> Result<(), ApiError> {
        self.http
            .delete_message(
                ChannelId::new(channel_id),
                MessageId::new(message_id),
                Some("automated moderation"),
            )
            .await
            .map_err(to_api_error)
    }

    async fn restrict_member(
        &self,
        chat_id: u64,
        user_id: u64,
        permissions: ChatPermissions,
        until_epoch_secs: i64,
    ) -> Result<(), ApiError> {
        let edit = if permissions.can_send_messages {
            EditMember::new().enable_communication()
        } else {
            let until = Timestamp::from_unix_timestamp(until_epoch_secs)
                .map_err(|e| ApiError::new(400, format!("invalid timeout: {e}")))?;
            EditMember::new().disable_communication_until_datetime(until)
        };

        GuildId::new(chat_id)
            .edit_member(&self.http, UserId::new(user_id), edit)
            .await
            .map_err(to_api_error)?;
        Ok(())
    }

    async fn ban_member(
        &self,
        chat_id: u64,
        user_id: u64,
        _until_epoch_secs: Option<i64>,
    ) -> Result<(), ApiError> {
        // Discord bans have no expiry.
        GuildId::new(chat_id)
            .ban(&self.http, UserId::new(user_id), 0)
            .await
            .map_err(to_api_error)
    }

    async fn unban_member(
        &self,
        chat_id: u64,
        user_id: u64,
        only_if_banned: bool,
    ) -> Result<(), ApiError> {
        let guild_id = GuildId::new(chat_id);
        let user_id = UserId::new(user_id);

        match guild_id.unban(&self.http, user_id).await {
            Ok(()) => Ok(()),
            // Unknown Ban: the user was not banned to begin with.
            Err(e) => {
                let api = to_api_error(e);
                if only_if_banned && api.code == 404 {
                    Ok(())
                } else {
                    Err(api)
                }
            }
        }
    }

    async fn get_member(&self, chat_id: u64, user_id: u64) -> Result<ChatMember, ApiError> {
        let guild_id = GuildId::new(chat_id);
        let member = guild_id
            .member(&self.http, UserId::new(user_id))
            .await
            .map_err(to_api_error)?;
        Ok(self.to_chat_member(guild_id, &member))
    }

    async fn get_administrators(&self, chat_id: u64) -> Result<Vec<ChatMember>, ApiError> {
        let guild_id = GuildId::new(chat_id);
        let members: Vec<Member> = {
            let guild = self
                .cache
                .guild(guild_id)
                .ok_or_else(|| ApiError::new(0, format!("guild {chat_id} is not cached")))?;
            guild
                .members
                .values()
                .filter(|m| m.user.id == guild.owner_id || guild.member_permissions(m).administrator())
                .cloned()
                .collect()
        };

        Ok(members
            .iter()
            .map(|m| self.to_chat_member(guild_id, m))
            .collect())
    }
}

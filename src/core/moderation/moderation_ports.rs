// Ports for the external collaborators the pipeline talks to.
//
// The core defines WHAT it needs; infra/ and discord/ provide the HOW.

use super::moderation_errors::{ApiError, StoreError};
use super::moderation_models::{
    ActionKind, ChatMember, ChatPermissions, GroupSettings, ScamScore,
};
use async_trait::async_trait;

/// Options for outbound text messages.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SendOptions {
    /// Deliver without a notification ping.
    pub silent: bool,
}

/// The chat platform, as exposed by its client library.
///
/// All failures surface as `ApiError`; callers classify them with
/// `moderation_errors::classify`.
#[async_trait]
pub trait PlatformClient: Send + Sync {
    async fn send_message(&self, chat_id: u64, text: &str, opts: SendOptions)
        -> Result<(), ApiError>;

    async fn send_direct_message(&self, user_id: u64, text: &str) -> Result<(), ApiError>;

    async fn delete_message(
        &self,
        chat_id: u64,
        channel_id: u64,
        message_id: u64,
    ) -> Result<(), ApiError>;

    async fn restrict_member(
        &self,
        chat_id: u64,
        user_id: u64,
        permissions: ChatPermissions,
        until_epoch_secs: i64,
    ) -> Result<(), ApiError>;

    /// `None` bans permanently.
    async fn ban_member(
        &self,
        chat_id: u64,
        user_id: u64,
        until_epoch_secs: Option<i64>,
    ) -> Result<(), ApiError>;

    async fn unban_member(
        &self,
        chat_id: u64,
        user_id: u64,
        only_if_banned: bool,
    ) -> Result<(), ApiError>;

    async fn get_member(&self, chat_id: u64, user_id: u64) -> Result<ChatMember, ApiError>;

    async fn get_administrators(&self, chat_id: u64) -> Result<Vec<ChatMember>, ApiError>;
}

/// Persistence for audit records, rosters and per-chat settings.
#[async_trait]
pub trait ModerationStore: Send + Sync {
    async fn log_action(
        &self,
        user_id: u64,
        chat_id: u64,
        action: ActionKind,
        reason: &str,
    ) -> Result<(), StoreError>;

    async fn log_scam_event(
        &self,
        chat_id: u64,
        user_id: u64,
        message_id: u64,
        score: &ScamScore,
        action: &str,
    ) -> Result<(), StoreError>;

    async fn is_team_member(&self, user_id: u64) -> Result<bool, StoreError>;

    async fn add_team_member(&self, user_id: u64, added_by: u64) -> Result<(), StoreError>;

    async fn remove_team_member(&self, user_id: u64) -> Result<(), StoreError>;

    async fn is_blacklisted(&self, user_id: u64) -> Result<bool, StoreError>;

    async fn add_to_blacklist(
        &self,
        user_id: u64,
        actor_id: u64,
        reason: &str,
    ) -> Result<(), StoreError>;

    async fn remove_from_blacklist(&self, user_id: u64) -> Result<(), StoreError>;

    /// `None` means the chat is not managed.
    async fn get_group_settings(&self, chat_id: u64) -> Result<Option<GroupSettings>, StoreError>;

    /// Start managing a chat (keeps existing flags if already known).
    async fn register_group(&self, chat_id: u64, title: &str) -> Result<(), StoreError>;

    async fn get_managed_groups(&self) -> Result<Vec<GroupSettings>, StoreError>;
}

/// Hand-off to the risk scoring system. Its policy lives elsewhere.
#[async_trait]
pub trait RiskEscalation: Send + Sync {
    async fn escalate(&self, user_id: u64, reason: &str);
}

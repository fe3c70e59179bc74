// Action dispatcher - every account/message action goes through here.
//
// Actions run one at a time on the moderation queue. Each one walks the same
// ladder: exemption skip-check, bot permission check, dry-run short-circuit,
// platform call, classification of the result. Nothing here returns an error;
// every outcome is an `ActionResult`.

use super::action_queue::ModerationQueue;
use super::moderation_errors::{classify, ApiError, ApiFailure};
use super::moderation_models::{ActionKind, ActionResult, ChatPermissions};
use super::moderation_ports::{ModerationStore, PlatformClient};
use chrono::Utc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    pub bot_user_id: u64,
    pub admin_ids: Vec<u64>,
    /// Pause after each action before the next one starts.
    pub moderation_delay: Duration,
    pub dry_run: bool,
}

/// One concrete platform operation, as queued.
#[derive(Debug, Clone, Copy)]
enum Operation {
    Delete { channel_id: u64, message_id: u64 },
    Restrict { duration: Duration },
    Unrestrict,
    Ban,
    Kick,
    Unban,
}

impl Operation {
    fn kind(&self) -> ActionKind {
        match self {
            Operation::Delete { .. } => ActionKind::Delete,
            Operation::Restrict { .. } => ActionKind::Restrict,
            Operation::Unrestrict => ActionKind::Unrestrict,
            Operation::Ban => ActionKind::Ban,
            Operation::Kick => ActionKind::Kick,
            Operation::Unban => ActionKind::Unban,
        }
    }
}

struct DispatcherInner<S: ModerationStore> {
    platform: Arc<dyn PlatformClient>,
    store: Arc<S>,
    bot_user_id: u64,
    admin_ids: Vec<u64>,
    dry_run: AtomicBool,
}

pub struct ActionDispatcher<S: ModerationStore + 'static> {
    inner: Arc<DispatcherInner<S>>,
    queue: ModerationQueue,
}

impl<S: ModerationStore + 'static> ActionDispatcher<S> {
    /// Start the dispatcher and its queue consumer. Needs a tokio runtime.
    pub fn new(platform: Arc<dyn PlatformClient>, store: Arc<S>, settings: DispatcherSettings) -> Self {
        Self {
            inner: Arc::new(DispatcherInner {
                platform,
                store,
                bot_user_id: settings.bot_user_id,
                admin_ids: settings.admin_ids,
                dry_run: AtomicBool::new(settings.dry_run),
            }),
            queue: ModerationQueue::spawn(settings.moderation_delay),
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.inner.dry_run.load(Ordering::SeqCst)
    }

    pub fn set_dry_run(&self, enabled: bool) {
        self.inner.dry_run.store(enabled, Ordering::SeqCst);
        tracing::info!(dry_run = enabled, "Dry-run mode changed");
    }

    /// Actions queued or in flight.
    pub fn pending(&self) -> usize {
        self.queue.pending()
    }

    pub async fn delete_message(
        &self,
        chat_id: u64,
        channel_id: u64,
        message_id: u64,
        author_id: u64,
    ) -> ActionResult {
        self.dispatch(
            chat_id,
            author_id,
            Operation::Delete {
                channel_id,
                message_id,
            },
        )
        .await
    }

    /// Mute the member for `duration`, counted from when the action runs.
    pub async fn restrict(&self, chat_id: u64, user_id: u64, duration: Duration) -> ActionResult {
        self.dispatch(chat_id, user_id, Operation::Restrict { duration })
            .await
    }

    pub async fn unrestrict(&self, chat_id: u64, user_id: u64) -> ActionResult {
        self.dispatch(chat_id, user_id, Operation::Unrestrict).await
    }

    pub async fn ban(&self, chat_id: u64, user_id: u64) -> ActionResult {
        self.dispatch(chat_id, user_id, Operation::Ban).await
    }

    /// Remove from the chat without a lasting ban.
    pub async fn kick(&self, chat_id: u64, user_id: u64) -> ActionResult {
        self.dispatch(chat_id, user_id, Operation::Kick).await
    }

    pub async fn unban(&self, chat_id: u64, user_id: u64) -> ActionResult {
        self.dispatch(chat_id, user_id, Operation::Unban).await
    }

    async fn dispatch(&self, chat_id: u64, user_id: u64, op: Operation) -> ActionResult {
        let inner = Arc::clone(&self.inner);
        match self
            .queue
            .run(move || async move { inner.execute(chat_id, user_id, op).await })
            .await
        {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(chat_id, user_id, action = %op.kind(), error = %e, "Action did not settle");
                ActionResult::failed(e.to_string())
            }
        }
    }
}

impl<S: ModerationStore> DispatcherInner<S> {
    async fn execute(&self, chat_id: u64, user_id: u64, op: Operation) -> ActionResult {
        let kind = op.kind();

        if kind.is_punitive() {
            if let Some(reason) = self.exemption(chat_id, user_id).await {
                tracing::debug!(chat_id, user_id, action = %kind, reason, "Skipping exempt member");
                return ActionResult::skipped(reason);
            }
        }

        if let Err(result) = self.check_permission(chat_id, kind).await {
            return result;
        }

        if self.dry_run.load(Ordering::SeqCst) {
            tracing::info!(chat_id, user_id, action = %kind, "[dry run] would perform action");
            return ActionResult::ok();
        }

        let outcome = match op {
            Operation::Kick => match self.call_with_retry(chat_id, user_id, Operation::Ban).await {
                // The member is out either way once the ban landed.
                Ok(()) => match self.call_with_retry(chat_id, user_id, Operation::Unban).await {
                    Err(ApiFailure::AlreadySatisfied(_)) => Ok(()),
                    other => other,
                },
                Err(failure) => Err(failure),
            },
            other => self.call_with_retry(chat_id, user_id, other).await,
        };

        let result = settle(kind, outcome);
        if result.success {
            tracing::info!(chat_id, user_id, action = %kind, "Action applied");
        }
        result
    }

    /// Why this member must not be acted on, if they are exempt.
    /// Cheap local checks come first so exempt members cost no platform calls.
    async fn exemption(&self, chat_id: u64, user_id: u64) -> Option<&'static str> {
        if user_id == self.bot_user_id {
            return Some("target is the bot itself");
        }
        if self.admin_ids.contains(&user_id) {
            return Some("target is a configured admin");
        }
        match self.store.is_team_member(user_id).await {
            Ok(true) => return Some("target is a team member"),
            Ok(false) => {}
            Err(e) => tracing::warn!(user_id, error = %e, "Team lookup failed"),
        }
        match self.platform.get_administrators(chat_id).await {
            Ok(admins) => {
                if admins
                    .iter()
                    .any(|m| m.user_id == user_id && m.status.is_admin())
                {
                    return Some("target is a chat administrator");
                }
            }
            Err(e) => tracing::warn!(chat_id, error = %e, "Administrator lookup failed"),
        }
        None
    }

    async fn check_permission(&self, chat_id: u64, kind: ActionKind) -> Result<(), ActionResult> {
        match self.platform.get_member(chat_id, self.bot_user_id).await {
            Ok(bot) if kind.is_permitted_by(&bot.permissions) => Ok(()),
            Ok(_) => {
                tracing::warn!(chat_id, action = %kind, "Bot lacks permission for action");
                Err(ActionResult::skipped(format!("bot lacks permission to {kind}")))
            }
            Err(e) => match classify(&e) {
                ApiFailure::PermissionDenied(reason) => Err(ActionResult::skipped(reason)),
                failure => {
                    tracing::warn!(chat_id, action = %kind, error = %failure, "Permission check failed");
                    Err(ActionResult::failed(failure.to_string()))
                }
            },
        }
    }

    /// One platform call; a rate-limited call is retried once after the wait.
    async fn call_with_retry(
        &self,
        chat_id: u64,
        user_id: u64,
        op: Operation,
    ) -> Result<(), ApiFailure> {
        match self.call(chat_id, user_id, op).await {
            Ok(()) => Ok(()),
            Err(err) => match classify(&err) {
                ApiFailure::RateLimited(wait) => {
                    tracing::warn!(
                        chat_id,
                        user_id,
                        action = %op.kind(),
                        retry_after_ms = wait.as_millis() as u64,
                        "Rate limited, retrying once"
                    );
                    sleep(wait).await;
                    self.call(chat_id, user_id, op)
                        .await
                        .map_err(|e| classify(&e))
                }
                failure => Err(failure),
            },
        }
    }

    async fn call(&self, chat_id: u64, user_id: u64, op: Operation) -> Result<(), ApiError> {
        match op {
            Operation::Delete {
                channel_id,
                message_id,
            } => {
                self.platform
                    .delete_message(chat_id, channel_id, message_id)
                    .await
            }
            Operation::Restrict { duration } => {
                let until_epoch_secs = Utc::now().timestamp() + duration.as_secs() as i64;
                self.platform
                    .restrict_member(chat_id, user_id, ChatPermissions::muted(), until_epoch_secs)
                    .await
            }
            Operation::Unrestrict => {
                self.platform
                    .restrict_member(chat_id, user_id, ChatPermissions::full(), 0)
                    .await
            }
            Operation::Ban => self.platform.ban_member(chat_id, user_id, None).await,
            Operation::Unban | Operation::Kick => {
                self.platform.unban_member(chat_id, user_id, true).await
            }
        }
    }
}

/// Collapse a call outcome into the tri-state result.
fn settle(kind: ActionKind, outcome: Result<(), ApiFailure>) -> ActionResult {
    match outcome {
        Ok(()) => ActionResult::ok(),
        Err(ApiFailure::PermissionDenied(reason)) => {
            tracing::warn!(action = %kind, reason = %reason, "Platform refused action");
            ActionResult::skipped(reason)
        }
        Err(ApiFailure::AlreadySatisfied(reason))
            if matches!(
                kind,
                ActionKind::Delete | ActionKind::Unban | ActionKind::Unrestrict
            ) =>
        {
            tracing::debug!(action = %kind, reason = %reason, "Target already in requested state");
            ActionResult::ok()
        }
        Err(failure) => {
            tracing::warn!(action = %kind, error = %failure, "Action failed");
            ActionResult::failed(failure.to_string())
        }
    }
}

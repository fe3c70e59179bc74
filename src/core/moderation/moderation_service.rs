// Moderation service - the per-event enforcement policy.
//
// This service composes:
// - Managed-chat and sender exemption gates
// - Dedup (one run per delivered message, one response per message id)
// - Flood detection and the flood restrict
// - Scam scoring and the LOW / MEDIUM / HIGH response tiers
// - The scam cooldown, persisted records and audit entries
//
// NO Discord dependencies here - platform access goes through the ports.

use super::action_dispatcher::{ActionDispatcher, DispatcherSettings};
use super::audit_queue::{AuditQueue, AuditQueueConfig};
use super::cooldown_store::{scam_key, CooldownStore};
use super::dedup_gate::DedupGate;
use super::flood_tracker::FloodTracker;
use super::moderation_config::ModerationConfig;
use super::moderation_errors::{ConfigError, ModerationError};
use super::moderation_models::{
    ActionKind, ActionMode, ActionResult, AuditEntry, GroupSettings, IgnoreReason, InboundEvent,
    MessageEvent, ModerationOutcome, ScamScore, ScoreMeta, Severity,
};
use super::moderation_ports::{ModerationStore, PlatformClient, RiskEscalation};
use super::signal_scorer::SignalScorer;
use std::sync::Arc;
use std::time::Duration;

/// How many entries each periodic sweep dropped.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub flood_subjects: usize,
    pub cooldowns: usize,
    pub dedup_markers: usize,
}

/// Snapshot for the status command.
#[derive(Debug, Clone)]
pub struct ServiceStatus {
    pub dry_run: bool,
    pub action_mode: ActionMode,
    pub managed_groups: Vec<GroupSettings>,
    pub pending_actions: usize,
    pub pending_audit: usize,
    pub flood_subjects: usize,
    pub active_cooldowns: usize,
    pub dedup_markers: usize,
}

pub struct ModerationService<S: ModerationStore + 'static> {
    config: ModerationConfig,
    bot_user_id: u64,
    store: Arc<S>,
    dispatcher: ActionDispatcher<S>,
    audit: AuditQueue,
    escalation: Arc<dyn RiskEscalation>,
    scorer: SignalScorer,
    cooldowns: CooldownStore,
    /// New-message deliveries seen, so a redelivery never runs twice.
    deliveries: DedupGate,
    /// Messages already acted on; edits of these are ignored.
    dedup: DedupGate,
    flood: FloodTracker,
}

impl<S: ModerationStore + 'static> ModerationService<S> {
    /// Wire up the pipeline. Spawns the two queue consumers, so this needs a
    /// tokio runtime.
    pub fn new(
        config: ModerationConfig,
        platform: Arc<dyn PlatformClient>,
        store: Arc<S>,
        escalation: Arc<dyn RiskEscalation>,
        bot_user_id: u64,
    ) -> Result<Self, ConfigError> {
        let scorer = SignalScorer::new(&config.scoring, &config.domain_whitelist)?;

        let dispatcher = ActionDispatcher::new(
            Arc::clone(&platform),
            Arc::clone(&store),
            DispatcherSettings {
                bot_user_id,
                admin_ids: config.admin_ids.clone(),
                moderation_delay: config.moderation_delay(),
                dry_run: config.dry_run,
            },
        );
        let audit = AuditQueue::spawn(
            platform,
            AuditQueueConfig {
                audit_chat_id: config.audit_channel_id,
                admin_ids: config.admin_ids.clone(),
                spacing: config.audit_spacing(),
            },
        );

        Ok(Self {
            bot_user_id,
            store,
            dispatcher,
            audit,
            escalation,
            scorer,
            cooldowns: CooldownStore::new(),
            deliveries: DedupGate::new(config.dedup_ttl()),
            dedup: DedupGate::new(config.dedup_ttl()),
            flood: FloodTracker::new(config.flood.clone()),
            config,
        })
    }

    pub fn config(&self) -> &ModerationConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> &ActionDispatcher<S> {
        &self.dispatcher
    }

    /// Run one inbound event through the pipeline.
    ///
    /// Never fails: internal errors are logged and turn into `NoAction`, so a
    /// bad event cannot stop the ones after it.
    pub async fn handle_event(&self, event: InboundEvent) -> ModerationOutcome {
        let chat_id = event.chat_id();
        match self.process(event).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(chat_id, error = %e, "Moderation pipeline failed for event");
                ModerationOutcome::NoAction
            }
        }
    }

    async fn process(&self, event: InboundEvent) -> Result<ModerationOutcome, ModerationError> {
        let Some(settings) = self.store.get_group_settings(event.chat_id()).await? else {
            return Ok(ModerationOutcome::Ignored(IgnoreReason::UnmanagedChat));
        };

        match event {
            InboundEvent::Message(msg) => self.handle_message(&settings, msg, true).await,
            InboundEvent::EditedMessage(msg) => self.handle_message(&settings, msg, false).await,
            InboundEvent::MemberJoined { chat_id, user_id } => {
                self.handle_join(chat_id, user_id).await
            }
            InboundEvent::MemberLeft { chat_id, user_id } => {
                self.flood.clear(chat_id, user_id);
                Ok(ModerationOutcome::TrackerCleared)
            }
            InboundEvent::ChannelPost { .. } => {
                Ok(ModerationOutcome::Ignored(IgnoreReason::Unsupported))
            }
        }
    }

    async fn handle_message(
        &self,
        settings: &GroupSettings,
        msg: MessageEvent,
        is_new: bool,
    ) -> Result<ModerationOutcome, ModerationError> {
        if self.is_exempt_sender(&msg).await? {
            return Ok(ModerationOutcome::Ignored(IgnoreReason::ExemptSender));
        }

        // Claimed before anything else so a redelivery is neither counted
        // nor scored again. Edits carry new content and skip this gate.
        if is_new && !self.deliveries.mark_processed(msg.chat_id, msg.message_id) {
            return Ok(ModerationOutcome::Ignored(IgnoreReason::Duplicate));
        }

        if self.dedup.is_processed(msg.chat_id, msg.message_id) {
            return Ok(ModerationOutcome::Ignored(IgnoreReason::Duplicate));
        }

        // Edits re-deliver an existing message, so they never count as traffic.
        if is_new && settings.flood_protection {
            let observation = self.flood.observe(msg.chat_id, msg.user_id);
            if observation.is_flood {
                if !self.dedup.mark_processed(msg.chat_id, msg.message_id) {
                    return Ok(ModerationOutcome::Ignored(IgnoreReason::Duplicate));
                }
                return Ok(self.respond_to_flood(&msg, observation.count).await);
            }
        }

        if !settings.scam_detection {
            return Ok(ModerationOutcome::Ignored(IgnoreReason::FeatureDisabled));
        }

        let score = self.scorer.score(
            &msg.text,
            &msg.extracted_urls,
            ScoreMeta {
                is_forwarded: msg.is_forwarded,
                has_entities: msg.has_entities,
            },
        );
        if score.severity == Severity::None {
            return Ok(ModerationOutcome::Clean);
        }

        if !self.dedup.mark_processed(msg.chat_id, msg.message_id) {
            return Ok(ModerationOutcome::Ignored(IgnoreReason::Duplicate));
        }

        tracing::info!(
            chat_id = msg.chat_id,
            user_id = msg.user_id,
            message_id = msg.message_id,
            severity = %score.severity,
            score = score.value,
            reasons = %score.reason_summary(),
            "Scored suspicious message"
        );

        match score.severity {
            Severity::None => Ok(ModerationOutcome::Clean),
            Severity::Low => Ok(self.respond_low(&msg, score).await),
            Severity::Medium | Severity::High => {
                let key = scam_key(msg.user_id, msg.chat_id);
                if self.cooldowns.is_active(&key, self.config.scam_cooldown()) {
                    tracing::info!(
                        chat_id = msg.chat_id,
                        user_id = msg.user_id,
                        "Scam cooldown active, logging only"
                    );
                    self.record_scam(&msg, &score, "cooldown").await;
                    return Ok(ModerationOutcome::LoggedOnly { score });
                }
                // Touched before any await so a burst only acts once.
                self.cooldowns.touch(&key);

                if score.severity == Severity::High {
                    Ok(self.respond_high(&msg, score).await)
                } else {
                    Ok(self.respond_medium(&msg, score).await)
                }
            }
        }
    }

    async fn is_exempt_sender(&self, msg: &MessageEvent) -> Result<bool, ModerationError> {
        if msg.from_bot || msg.user_id == self.bot_user_id || self.config.is_admin(msg.user_id) {
            return Ok(true);
        }
        Ok(self.store.is_team_member(msg.user_id).await?)
    }

    async fn respond_low(&self, msg: &MessageEvent, score: ScamScore) -> ModerationOutcome {
        if !self.scorer.has_unwhitelisted_url(&msg.extracted_urls) {
            self.record_scam(msg, &score, "log_only").await;
            return ModerationOutcome::LoggedOnly { score };
        }

        let delete = self.delete(msg).await;
        self.record_action(msg.user_id, msg.chat_id, ActionKind::Delete, &score.reason_summary(), &delete)
            .await;
        self.record_scam(msg, &score, "delete").await;
        ModerationOutcome::Deleted { score, delete }
    }

    async fn respond_medium(&self, msg: &MessageEvent, score: ScamScore) -> ModerationOutcome {
        let delete = self.delete(msg).await;
        self.record_action(msg.user_id, msg.chat_id, ActionKind::Delete, &score.reason_summary(), &delete)
            .await;
        self.record_scam(msg, &score, "delete").await;

        self.audit.log(&self.scam_entry(
            "Suspicious message removed",
            msg,
            &score,
            format!("delete: {}", delete.describe()),
        ));
        ModerationOutcome::Deleted { score, delete }
    }

    async fn respond_high(&self, msg: &MessageEvent, score: ScamScore) -> ModerationOutcome {
        let reason = score.reason_summary();
        let mode = self.config.action_mode;
        // Simulated decisions leave no lasting state behind.
        let dry_run = self.dispatcher.is_dry_run();
        let mut notes = Vec::new();

        let delete = self.delete(msg).await;
        self.record_action(msg.user_id, msg.chat_id, ActionKind::Delete, &reason, &delete)
            .await;

        let (kind, punishment) = match mode {
            ActionMode::Ban => {
                let ban = self.dispatcher.ban(msg.chat_id, msg.user_id).await;
                if dry_run {
                    notes.push("blacklist skipped (dry run)");
                } else if !ban.skipped {
                    // A skip means the target turned out to be exempt.
                    if let Err(e) = self
                        .store
                        .add_to_blacklist(msg.user_id, self.bot_user_id, &reason)
                        .await
                    {
                        tracing::warn!(user_id = msg.user_id, error = %e, "Failed to blacklist user");
                    }
                }
                (ActionKind::Ban, ban)
            }
            ActionMode::Restrict => {
                let restrict = self
                    .dispatcher
                    .restrict(msg.chat_id, msg.user_id, self.config.high_restrict_duration())
                    .await;
                (ActionKind::Restrict, restrict)
            }
        };
        self.record_action(msg.user_id, msg.chat_id, kind, &reason, &punishment)
            .await;
        self.record_scam(msg, &score, kind.as_str()).await;

        if dry_run {
            notes.push("escalation skipped (dry run)");
        } else {
            self.escalation.escalate(msg.user_id, &reason).await;
        }

        let mut outcome = format!(
            "delete: {}, {kind}: {}",
            delete.describe(),
            punishment.describe()
        );
        for note in notes {
            outcome.push_str(", ");
            outcome.push_str(note);
        }
        self.audit
            .log(&self.scam_entry("Scam message punished", msg, &score, outcome));

        ModerationOutcome::Punished {
            score,
            mode,
            delete,
            punishment,
        }
    }

    async fn respond_to_flood(&self, msg: &MessageEvent, count: usize) -> ModerationOutcome {
        let flood = self.flood.config();
        let reason = format!("flood: {count} messages in {}s", flood.window_secs);
        tracing::info!(chat_id = msg.chat_id, user_id = msg.user_id, count, "Flood detected");

        let delete = self.delete(msg).await;
        let restrict = self
            .dispatcher
            .restrict(
                msg.chat_id,
                msg.user_id,
                Duration::from_secs(flood.restrict_minutes * 60),
            )
            .await;
        self.record_action(msg.user_id, msg.chat_id, ActionKind::Restrict, &reason, &restrict)
            .await;

        self.audit.log(&AuditEntry {
            title: "Flood detected".to_string(),
            chat_id: msg.chat_id,
            user_id: msg.user_id,
            message_id: Some(msg.message_id),
            severity: None,
            score: None,
            reasons: vec![reason],
            outcome: format!(
                "delete: {}, restrict {}m: {}",
                delete.describe(),
                flood.restrict_minutes,
                restrict.describe()
            ),
            dry_run: self.dispatcher.is_dry_run(),
        });

        ModerationOutcome::FloodRestricted {
            count,
            delete,
            restrict,
        }
    }

    async fn handle_join(
        &self,
        chat_id: u64,
        user_id: u64,
    ) -> Result<ModerationOutcome, ModerationError> {
        if !self.store.is_blacklisted(user_id).await? {
            return Ok(ModerationOutcome::NoAction);
        }

        tracing::info!(chat_id, user_id, "Blacklisted user joined");
        let ban = self.dispatcher.ban(chat_id, user_id).await;
        self.record_action(user_id, chat_id, ActionKind::Ban, "blacklisted user joined", &ban)
            .await;
        self.audit.log(&AuditEntry {
            title: "Blacklisted user banned on join".to_string(),
            chat_id,
            user_id,
            message_id: None,
            severity: None,
            score: None,
            reasons: vec!["user is on the global blacklist".to_string()],
            outcome: format!("ban: {}", ban.describe()),
            dry_run: self.dispatcher.is_dry_run(),
        });
        Ok(ModerationOutcome::BlacklistBanned { ban })
    }

    // ========================================================================
    // ADMIN OPERATIONS
    // ========================================================================

    /// Lift a ban and take the user off the blacklist.
    pub async fn pardon(
        &self,
        chat_id: u64,
        user_id: u64,
        actor_id: u64,
    ) -> Result<ActionResult, ModerationError> {
        self.store.remove_from_blacklist(user_id).await?;
        let unban = self.dispatcher.unban(chat_id, user_id).await;
        let reason = format!("pardoned by {actor_id}");
        self.record_action(user_id, chat_id, ActionKind::Unban, &reason, &unban)
            .await;
        Ok(unban)
    }

    /// Lift a restriction and forget the member's flood history.
    pub async fn unmute(&self, chat_id: u64, user_id: u64, actor_id: u64) -> ActionResult {
        self.flood.clear(chat_id, user_id);
        let unrestrict = self.dispatcher.unrestrict(chat_id, user_id).await;
        let reason = format!("unmuted by {actor_id}");
        self.record_action(user_id, chat_id, ActionKind::Unrestrict, &reason, &unrestrict)
            .await;
        unrestrict
    }

    pub async fn status(&self) -> Result<ServiceStatus, ModerationError> {
        Ok(ServiceStatus {
            dry_run: self.dispatcher.is_dry_run(),
            action_mode: self.config.action_mode,
            managed_groups: self.store.get_managed_groups().await?,
            pending_actions: self.dispatcher.pending(),
            pending_audit: self.audit.pending(),
            flood_subjects: self.flood.len(),
            active_cooldowns: self.cooldowns.len(),
            dedup_markers: self.deliveries.len() + self.dedup.len(),
        })
    }

    /// Drop idle flood subjects, stale cooldowns and expired dedup markers.
    pub fn sweep(&self) -> SweepReport {
        let report = SweepReport {
            flood_subjects: self.flood.sweep_idle(),
            cooldowns: self.cooldowns.sweep(self.config.scam_cooldown()),
            dedup_markers: self.deliveries.sweep() + self.dedup.sweep(),
        };
        tracing::debug!(?report, "Swept moderation trackers");
        report
    }

    // ========================================================================
    // HELPERS
    // ========================================================================

    async fn delete(&self, msg: &MessageEvent) -> ActionResult {
        self.dispatcher
            .delete_message(msg.chat_id, msg.channel_id, msg.message_id, msg.user_id)
            .await
    }

    /// Persist an attempt. The record means "decided", whatever the outcome.
    async fn record_action(
        &self,
        user_id: u64,
        chat_id: u64,
        kind: ActionKind,
        reason: &str,
        result: &ActionResult,
    ) {
        let note = format!("{reason} [{}]", result.describe());
        if let Err(e) = self.store.log_action(user_id, chat_id, kind, &note).await {
            tracing::warn!(user_id, chat_id, action = %kind, error = %e, "Failed to persist action");
        }
    }

    async fn record_scam(&self, msg: &MessageEvent, score: &ScamScore, action: &str) {
        if let Err(e) = self
            .store
            .log_scam_event(msg.chat_id, msg.user_id, msg.message_id, score, action)
            .await
        {
            tracing::warn!(
                chat_id = msg.chat_id,
                user_id = msg.user_id,
                error = %e,
                "Failed to persist scam event"
            );
        }
    }

    fn scam_entry(
        &self,
        title: &str,
        msg: &MessageEvent,
        score: &ScamScore,
        outcome: String,
    ) -> AuditEntry {
        AuditEntry {
            title: title.to_string(),
            chat_id: msg.chat_id,
            user_id: msg.user_id,
            message_id: Some(msg.message_id),
            severity: Some(score.severity),
            score: Some(score.value),
            reasons: score.reasons.clone(),
            outcome,
            dry_run: self.dispatcher.is_dry_run(),
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

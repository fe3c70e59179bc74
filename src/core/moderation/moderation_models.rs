// Moderation domain models - data structures for the enforcement pipeline.
//
// These are pure domain types with no Discord dependencies.
// The Discord layer converts platform events into these and back.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

// ============================================================================
// INBOUND EVENTS
// ============================================================================

/// A message as seen by the pipeline, stripped of platform specifics.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageEvent {
    pub chat_id: u64,
    /// Channel the message was posted in (needed to delete it).
    pub channel_id: u64,
    pub user_id: u64,
    pub message_id: u64,
    pub text: String,
    pub extracted_urls: Vec<String>,
    pub is_forwarded: bool,
    pub has_entities: bool,
    /// Whether the author is an automated account.
    pub from_bot: bool,
    pub timestamp_ms: i64,
}

/// Every update shape the pipeline knows how to handle.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Message(MessageEvent),
    /// Same message id as the original; dedup treats both as one delivery.
    EditedMessage(MessageEvent),
    MemberJoined { chat_id: u64, user_id: u64 },
    MemberLeft { chat_id: u64, user_id: u64 },
    ChannelPost { chat_id: u64, message_id: u64 },
}

impl InboundEvent {
    pub fn chat_id(&self) -> u64 {
        match self {
            InboundEvent::Message(m) | InboundEvent::EditedMessage(m) => m.chat_id,
            InboundEvent::MemberJoined { chat_id, .. }
            | InboundEvent::MemberLeft { chat_id, .. }
            | InboundEvent::ChannelPost { chat_id, .. } => *chat_id,
        }
    }
}

// ============================================================================
// SCORING
// ============================================================================

/// Abuse strength of a scored message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::None => write!(f, "NONE"),
            Severity::Low => write!(f, "LOW"),
            Severity::Medium => write!(f, "MEDIUM"),
            Severity::High => write!(f, "HIGH"),
        }
    }
}

/// Message features the scorer looks at besides text and links.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScoreMeta {
    pub is_forwarded: bool,
    pub has_entities: bool,
}

/// Result of scoring a message. Immutable once produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScamScore {
    pub value: u32,
    pub severity: Severity,
    /// Human-readable reasons, in the order the signals were evaluated.
    pub reasons: Vec<String>,
}

impl ScamScore {
    pub fn none() -> Self {
        Self {
            value: 0,
            severity: Severity::None,
            reasons: Vec::new(),
        }
    }

    pub fn reason_summary(&self) -> String {
        if self.reasons.is_empty() {
            "no signals".to_string()
        } else {
            self.reasons.join("; ")
        }
    }
}

// ============================================================================
// ACTIONS
// ============================================================================

/// Kinds of account/message actions the dispatcher can issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Delete,
    Restrict,
    Unrestrict,
    Ban,
    Kick,
    Unban,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Delete => "delete",
            ActionKind::Restrict => "restrict",
            ActionKind::Unrestrict => "unrestrict",
            ActionKind::Ban => "ban",
            ActionKind::Kick => "kick",
            ActionKind::Unban => "unban",
        }
    }

    /// Punitive actions are never applied to exempt accounts.
    /// Corrective ones (unban, unrestrict) skip the exemption check.
    pub fn is_punitive(&self) -> bool {
        !matches!(self, ActionKind::Unban | ActionKind::Unrestrict)
    }

    /// Whether the bot's member permissions allow this action.
    pub fn is_permitted_by(&self, permissions: &MemberPermissions) -> bool {
        match self {
            ActionKind::Delete => permissions.can_delete_messages,
            ActionKind::Restrict | ActionKind::Unrestrict => permissions.can_restrict_members,
            ActionKind::Ban | ActionKind::Kick | ActionKind::Unban => {
                permissions.can_ban_members
            }
        }
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single action attempt.
///
/// Exactly one terminal outcome: success, skipped, or failed. Never both
/// `success` and `skipped`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionResult {
    pub success: bool,
    pub skipped: bool,
    pub error: Option<String>,
}

impl ActionResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            skipped: false,
            error: None,
        }
    }

    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            skipped: true,
            error: Some(reason.into()),
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            success: false,
            skipped: false,
            error: Some(error.into()),
        }
    }

    pub fn describe(&self) -> String {
        match (self.success, self.skipped, &self.error) {
            (true, _, _) => "ok".to_string(),
            (false, true, Some(reason)) => format!("skipped ({reason})"),
            (false, true, None) => "skipped".to_string(),
            (false, false, Some(err)) => format!("failed ({err})"),
            (false, false, None) => "failed".to_string(),
        }
    }
}

/// What to do with HIGH severity senders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionMode {
    #[default]
    Ban,
    Restrict,
}

impl FromStr for ActionMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ban" => Ok(ActionMode::Ban),
            "restrict" | "mute" => Ok(ActionMode::Restrict),
            other => Err(format!("unknown action mode '{other}'")),
        }
    }
}

impl fmt::Display for ActionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionMode::Ban => write!(f, "ban"),
            ActionMode::Restrict => write!(f, "restrict"),
        }
    }
}

/// Permissions granted to a restricted member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPermissions {
    pub can_send_messages: bool,
}

impl ChatPermissions {
    pub fn muted() -> Self {
        Self {
            can_send_messages: false,
        }
    }

    pub fn full() -> Self {
        Self {
            can_send_messages: true,
        }
    }
}

// ============================================================================
// PLATFORM VIEWS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Creator,
    Administrator,
    Member,
    Restricted,
    Left,
    Banned,
}

impl MemberStatus {
    pub fn is_admin(&self) -> bool {
        matches!(self, MemberStatus::Creator | MemberStatus::Administrator)
    }
}

/// Moderation capabilities a member holds in a chat.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberPermissions {
    pub can_delete_messages: bool,
    pub can_restrict_members: bool,
    pub can_ban_members: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMember {
    pub user_id: u64,
    pub status: MemberStatus,
    pub permissions: MemberPermissions,
}

/// Per-chat feature flags. A chat without settings is not managed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupSettings {
    pub chat_id: u64,
    pub title: String,
    pub scam_detection: bool,
    pub flood_protection: bool,
}

impl GroupSettings {
    pub fn new(chat_id: u64, title: impl Into<String>) -> Self {
        Self {
            chat_id,
            title: title.into(),
            scam_detection: true,
            flood_protection: true,
        }
    }
}

// ============================================================================
// TRACKER RESULTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FloodObservation {
    pub is_flood: bool,
    /// Messages currently inside the window for this subject.
    pub count: usize,
}

// ============================================================================
// PIPELINE OUTCOME
// ============================================================================

/// Why an event was let through without any pipeline work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IgnoreReason {
    UnmanagedChat,
    ExemptSender,
    Duplicate,
    FeatureDisabled,
    Unsupported,
}

/// Decision taken for one inbound event.
#[derive(Debug, Clone, PartialEq)]
pub enum ModerationOutcome {
    /// Neutral result: nothing was decided (also returned after internal errors).
    NoAction,
    Ignored(IgnoreReason),
    /// Scored but clean.
    Clean,
    /// Scored and logged only (whitelisted LOW, or scam cooldown active).
    LoggedOnly { score: ScamScore },
    /// LOW/MEDIUM response.
    Deleted {
        score: ScamScore,
        delete: ActionResult,
    },
    /// HIGH response.
    Punished {
        score: ScamScore,
        mode: ActionMode,
        delete: ActionResult,
        punishment: ActionResult,
    },
    FloodRestricted {
        count: usize,
        delete: ActionResult,
        restrict: ActionResult,
    },
    BlacklistBanned { ban: ActionResult },
    TrackerCleared,
}

/// A structured entry destined for the audit channel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub title: String,
    pub chat_id: u64,
    pub user_id: u64,
    pub message_id: Option<u64>,
    pub severity: Option<Severity>,
    pub score: Option<u32>,
    pub reasons: Vec<String>,
    pub outcome: String,
    pub dry_run: bool,
}

impl AuditEntry {
    pub fn render(&self) -> String {
        let mut lines = Vec::new();
        let prefix = if self.dry_run { "[DRY RUN] " } else { "" };
        lines.push(format!("{prefix}{}", self.title));
        lines.push(format!("Chat: {}", self.chat_id));
        lines.push(format!("User: <@{}> ({})", self.user_id, self.user_id));
        if let Some(message_id) = self.message_id {
            lines.push(format!("Message: {message_id}"));
        }
        if let (Some(severity), Some(score)) = (self.severity, self.score) {
            lines.push(format!("Severity: {severity} (score {score})"));
        }
        if !self.reasons.is_empty() {
            lines.push(format!("Reasons: {}", self.reasons.join("; ")));
        }
        lines.push(format!("Outcome: {}", self.outcome));
        lines.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn action_result_is_never_success_and_skipped() {
        for result in [
            ActionResult::ok(),
            ActionResult::skipped("admin"),
            ActionResult::failed("boom"),
        ] {
            assert!(!(result.success && result.skipped));
        }
    }

    #[test]
    fn action_mode_parses_aliases() {
        assert_eq!("BAN".parse::<ActionMode>().unwrap(), ActionMode::Ban);
        assert_eq!("mute".parse::<ActionMode>().unwrap(), ActionMode::Restrict);
        assert!("warn".parse::<ActionMode>().is_err());
    }

    #[test]
    fn corrective_actions_are_not_punitive() {
        assert!(ActionKind::Ban.is_punitive());
        assert!(ActionKind::Delete.is_punitive());
        assert!(!ActionKind::Unban.is_punitive());
        assert!(!ActionKind::Unrestrict.is_punitive());
    }

    #[test]
    fn audit_entry_marks_dry_run() {
        let entry = AuditEntry {
            title: "Scam message removed".to_string(),
            chat_id: 1,
            user_id: 2,
            message_id: Some(3),
            severity: Some(Severity::Medium),
            score: Some(3),
            reasons: vec!["scam pattern".to_string()],
            outcome: "delete: ok".to_string(),
            dry_run: true,
        };
        let text = entry.render();
        assert!(text.starts_with("[DRY RUN] Scam message removed"));
        assert!(text.contains("Severity: MEDIUM (score 3)"));
    }
}

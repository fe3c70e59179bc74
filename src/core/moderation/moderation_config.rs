// Static thresholds for the pipeline, resolved once at startup.
//
// Values come from environment variables (a `.env` file is loaded by main).
// Every key is optional; missing keys fall back to the defaults below.

use super::moderation_errors::ConfigError;
use super::moderation_models::ActionMode;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

/// Patterns that commonly show up in scam and phishing messages.
pub const DEFAULT_SCAM_PATTERNS: &[&str] = &[
    r"\bfree\s+(nitro|crypto|airdrop|gift|btc|eth|usdt)\b",
    r"\b(airdrop|giveaway)\s+(is\s+)?(live|ending|claim)",
    r"\b(double|multiply|x10)\s+your\s+(crypto|btc|eth|money|investment)",
    r"\bwallet\s*(connect|verification|validate|recovery|sync)",
    r"\b(seed|recovery|secret)\s+phrase\b",
    r"\bdm\s+me\s+(for|to)\b",
    r"\bguaranteed\s+(profit|returns|income)\b",
    r"(dlscord|disc0rd|discorcl|steamcommunlty|steancommunity)\.",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloodConfig {
    /// Messages allowed inside the window; one more triggers.
    pub max_messages: usize,
    pub window_secs: u64,
    /// How long a flooding member stays restricted (and locked in the tracker).
    pub restrict_minutes: u64,
}

impl Default for FloodConfig {
    fn default() -> Self {
        Self {
            max_messages: 5,
            window_secs: 30,
            restrict_minutes: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringConfig {
    pub unwhitelisted_url_weight: u32,
    pub scam_pattern_weight: u32,
    pub forwarded_weight: u32,
    pub link_density_weight: u32,
    /// Links needed (together with entities) before density counts as a signal.
    pub link_density_min_links: usize,
    pub medium_threshold: u32,
    pub high_threshold: u32,
    pub scam_patterns: Vec<String>,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            unwhitelisted_url_weight: 1,
            scam_pattern_weight: 3,
            forwarded_weight: 1,
            link_density_weight: 1,
            link_density_min_links: 3,
            medium_threshold: 2,
            high_threshold: 4,
            scam_patterns: DEFAULT_SCAM_PATTERNS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModerationConfig {
    pub dry_run: bool,
    pub action_mode: ActionMode,
    /// Accounts that are never acted upon and receive audit fallbacks.
    pub admin_ids: Vec<u64>,
    pub audit_channel_id: Option<u64>,
    pub domain_whitelist: Vec<String>,
    pub flood: FloodConfig,
    pub scoring: ScoringConfig,
    pub scam_cooldown_secs: u64,
    pub dedup_ttl_secs: u64,
    pub moderation_delay_ms: u64,
    pub audit_spacing_ms: u64,
    pub high_restrict_hours: u64,
}

impl Default for ModerationConfig {
    fn default() -> Self {
        Self {
            dry_run: false,
            action_mode: ActionMode::Ban,
            admin_ids: Vec::new(),
            audit_channel_id: None,
            domain_whitelist: vec![
                "discord.com".to_string(),
                "discord.gg".to_string(),
                "github.com".to_string(),
                "youtube.com".to_string(),
                "youtu.be".to_string(),
            ],
            flood: FloodConfig::default(),
            scoring: ScoringConfig::default(),
            scam_cooldown_secs: 600,
            dedup_ttl_secs: 300,
            moderation_delay_ms: 350,
            audit_spacing_ms: 1000,
            high_restrict_hours: 24,
        }
    }
}

impl ModerationConfig {
    /// Build the config from process environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the config from any key lookup (used by tests).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Some(v) = parse_opt::<bool>(&lookup, "GUARD_DRY_RUN")? {
            config.dry_run = v;
        }
        if let Some(v) = parse_opt::<ActionMode>(&lookup, "GUARD_ACTION_MODE")? {
            config.action_mode = v;
        }
        if let Some(raw) = lookup("GUARD_ADMIN_IDS") {
            config.admin_ids = parse_id_list("GUARD_ADMIN_IDS", &raw)?;
        }
        if let Some(v) = parse_opt::<u64>(&lookup, "GUARD_AUDIT_CHANNEL_ID")? {
            config.audit_channel_id = Some(v);
        }
        if let Some(raw) = lookup("GUARD_DOMAIN_WHITELIST") {
            config.domain_whitelist = raw
                .split(',')
                .map(|d| d.trim().trim_start_matches("www.").to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect();
        }

        if let Some(v) = parse_opt(&lookup, "GUARD_FLOOD_MAX_MESSAGES")? {
            config.flood.max_messages = v;
        }
        if let Some(v) = parse_opt(&lookup, "GUARD_FLOOD_WINDOW_SECS")? {
            config.flood.window_secs = v;
        }
        if let Some(v) = parse_opt(&lookup, "GUARD_FLOOD_RESTRICT_MINUTES")? {
            config.flood.restrict_minutes = v;
        }

        if let Some(v) = parse_opt(&lookup, "GUARD_MEDIUM_THRESHOLD")? {
            config.scoring.medium_threshold = v;
        }
        if let Some(v) = parse_opt(&lookup, "GUARD_HIGH_THRESHOLD")? {
            config.scoring.high_threshold = v;
        }
        if let Some(path) = lookup("GUARD_SCAM_PATTERNS_FILE") {
            let contents =
                std::fs::read_to_string(&path).map_err(|_| ConfigError::Invalid {
                    key: "GUARD_SCAM_PATTERNS_FILE".to_string(),
                    value: path.clone(),
                })?;
            config.scoring.scam_patterns = contents
                .lines()
                .map(str::trim)
                .filter(|l| !l.is_empty() && !l.starts_with('#'))
                .map(str::to_string)
                .collect();
        }

        if let Some(v) = parse_opt(&lookup, "GUARD_SCAM_COOLDOWN_SECS")? {
            config.scam_cooldown_secs = v;
        }
        if let Some(v) = parse_opt(&lookup, "GUARD_DEDUP_TTL_SECS")? {
            config.dedup_ttl_secs = v;
        }
        if let Some(v) = parse_opt(&lookup, "GUARD_MODERATION_DELAY_MS")? {
            config.moderation_delay_ms = v;
        }
        if let Some(v) = parse_opt(&lookup, "GUARD_AUDIT_SPACING_MS")? {
            config.audit_spacing_ms = v;
        }
        if let Some(v) = parse_opt(&lookup, "GUARD_HIGH_RESTRICT_HOURS")? {
            config.high_restrict_hours = v;
        }

        if config.scoring.medium_threshold == 0
            || config.scoring.high_threshold <= config.scoring.medium_threshold
        {
            return Err(ConfigError::Invalid {
                key: "GUARD_HIGH_THRESHOLD".to_string(),
                value: config.scoring.high_threshold.to_string(),
            });
        }

        Ok(config)
    }

    pub fn scam_cooldown(&self) -> Duration {
        Duration::from_secs(self.scam_cooldown_secs)
    }

    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }

    pub fn moderation_delay(&self) -> Duration {
        Duration::from_millis(self.moderation_delay_ms)
    }

    pub fn audit_spacing(&self) -> Duration {
        Duration::from_millis(self.audit_spacing_ms)
    }

    pub fn high_restrict_duration(&self) -> Duration {
        Duration::from_secs(self.high_restrict_hours * 60 * 60)
    }

    pub fn is_admin(&self, user_id: u64) -> bool {
        self.admin_ids.contains(&user_id)
    }
}

fn parse_opt<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(raw) if raw.trim().is_empty() => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value: raw,
            }),
    }
}

fn parse_id_list(key: &str, raw: &str) -> Result<Vec<u64>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<u64>().map_err(|_| ConfigError::Invalid {
                key: key.to_string(),
                value: s.to_string(),
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_nothing_is_set() {
        let config = ModerationConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config, ModerationConfig::default());
        assert_eq!(config.flood.max_messages, 5);
        assert_eq!(config.scam_cooldown(), Duration::from_secs(600));
        assert_eq!(config.moderation_delay(), Duration::from_millis(350));
    }

    #[test]
    fn reads_overrides() {
        let config = ModerationConfig::from_lookup(lookup_from(&[
            ("GUARD_DRY_RUN", "true"),
            ("GUARD_ACTION_MODE", "restrict"),
            ("GUARD_ADMIN_IDS", "10, 20"),
            ("GUARD_AUDIT_CHANNEL_ID", "99"),
            ("GUARD_DOMAIN_WHITELIST", "Example.org, www.rust-lang.org"),
            ("GUARD_FLOOD_WINDOW_SECS", "10"),
        ]))
        .unwrap();

        assert!(config.dry_run);
        assert_eq!(config.action_mode, ActionMode::Restrict);
        assert_eq!(config.admin_ids, vec![10, 20]);
        assert!(config.is_admin(20));
        assert_eq!(config.audit_channel_id, Some(99));
        assert_eq!(config.domain_whitelist, vec!["example.org", "rust-lang.org"]);
        assert_eq!(config.flood.window_secs, 10);
    }

    #[test]
    fn rejects_garbage() {
        let err = ModerationConfig::from_lookup(lookup_from(&[("GUARD_ADMIN_IDS", "1,abc")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref value, .. } if value == "abc"));

        let err = ModerationConfig::from_lookup(lookup_from(&[
            ("GUARD_MEDIUM_THRESHOLD", "5"),
            ("GUARD_HIGH_THRESHOLD", "3"),
        ]))
        .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { .. }));
    }
}

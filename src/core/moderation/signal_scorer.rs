// Signal scorer - maps message features to a severity tier.
//
// Scoring is pure: same input, same ScamScore. Each signal is evaluated
// independently and contributes its weight at most once.

use super::moderation_config::ScoringConfig;
use super::moderation_errors::ConfigError;
use super::moderation_models::{ScamScore, ScoreMeta, Severity};
use regex::{Regex, RegexBuilder};
use std::sync::OnceLock;
use url::Url;

fn url_regex() -> &'static Regex {
    static URL_RE: OnceLock<Regex> = OnceLock::new();
    URL_RE.get_or_init(|| {
        Regex::new(r#"(?i)\b(?:https?://|www\.)[^\s<>()\[\]"']+"#).expect("static url regex")
    })
}

/// Pull links out of free text. Trailing punctuation is not part of a link.
pub fn extract_urls(text: &str) -> Vec<String> {
    url_regex()
        .find_iter(text)
        .map(|m| {
            m.as_str()
                .trim_end_matches(['.', ',', '!', '?', ';', ':'])
                .to_string()
        })
        .filter(|u| !u.is_empty())
        .collect()
}

/// Lowercased host of a link, without a leading `www.`.
pub fn host_of(link: &str) -> Option<String> {
    let parsed = Url::parse(link).or_else(|_| Url::parse(&format!("https://{link}")));
    let host = parsed.ok()?.host_str()?.to_ascii_lowercase();
    Some(host.trim_start_matches("www.").to_string())
}

pub struct SignalScorer {
    config: ScoringConfig,
    whitelist: Vec<String>,
    patterns: Vec<Regex>,
}

impl SignalScorer {
    pub fn new(config: &ScoringConfig, whitelist: &[String]) -> Result<Self, ConfigError> {
        let patterns = config
            .scam_patterns
            .iter()
            .map(|p| RegexBuilder::new(p).case_insensitive(true).build())
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            config: config.clone(),
            whitelist: whitelist.iter().map(|d| d.to_ascii_lowercase()).collect(),
            patterns,
        })
    }

    /// Whether the link's host is a whitelisted domain or one of its subdomains.
    pub fn is_whitelisted(&self, link: &str) -> bool {
        match host_of(link) {
            Some(host) => self
                .whitelist
                .iter()
                .any(|d| host == *d || host.ends_with(&format!(".{d}"))),
            None => false,
        }
    }

    pub fn has_unwhitelisted_url(&self, urls: &[String]) -> bool {
        urls.iter().any(|u| !self.is_whitelisted(u))
    }

    pub fn score(&self, text: &str, urls: &[String], meta: ScoreMeta) -> ScamScore {
        let mut value = 0;
        let mut reasons = Vec::new();

        let mut foreign_hosts: Vec<String> = Vec::new();
        for link in urls.iter().filter(|u| !self.is_whitelisted(u)) {
            let host = host_of(link).unwrap_or_else(|| link.clone());
            if !foreign_hosts.contains(&host) {
                foreign_hosts.push(host);
            }
        }
        if !foreign_hosts.is_empty() {
            value += self.config.unwhitelisted_url_weight;
            reasons.push(format!("non-whitelisted link: {}", foreign_hosts.join(", ")));
        }

        if let Some(found) = self.patterns.iter().find_map(|p| p.find(text)) {
            value += self.config.scam_pattern_weight;
            reasons.push(format!("scam pattern: \"{}\"", found.as_str()));
        }

        if meta.is_forwarded {
            value += self.config.forwarded_weight;
            reasons.push("forwarded message".to_string());
        }

        if meta.has_entities && urls.len() >= self.config.link_density_min_links {
            value += self.config.link_density_weight;
            reasons.push(format!("high link density ({} links)", urls.len()));
        }

        let severity = if value >= self.config.high_threshold {
            Severity::High
        } else if value >= self.config.medium_threshold {
            Severity::Medium
        } else if value > 0 || !reasons.is_empty() {
            Severity::Low
        } else {
            Severity::None
        };

        ScamScore {
            value,
            severity,
            reasons,
        }
    }
}

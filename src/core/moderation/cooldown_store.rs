// Keyed last-touch timestamps used to throttle repeated severe actions.

use super::moderation_models::now_ms;
use dashmap::DashMap;
use std::time::Duration;

/// Cooldown key for scam escalations of one user in one chat.
pub fn scam_key(user_id: u64, chat_id: u64) -> String {
    format!("{user_id}:{chat_id}:scam")
}

#[derive(Default)]
pub struct CooldownStore {
    /// key -> last touch (epoch ms)
    entries: DashMap<String, i64>,
}

impl CooldownStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn is_active(&self, key: &str, window: Duration) -> bool {
        self.is_active_at(key, window, now_ms())
    }

    /// `now - last_touch < window`; false for unknown keys.
    pub fn is_active_at(&self, key: &str, window: Duration, now: i64) -> bool {
        match self.entries.get(key) {
            Some(last) => now - *last < window.as_millis() as i64,
            None => false,
        }
    }

    pub fn touch(&self, key: &str) {
        self.touch_at(key, now_ms());
    }

    /// Last-touch never moves backwards.
    pub fn touch_at(&self, key: &str, now: i64) {
        self.entries
            .entry(key.to_string())
            .and_modify(|last| *last = (*last).max(now))
            .or_insert(now);
    }

    pub fn clear(&self, key: &str) {
        self.entries.remove(key);
    }

    pub fn sweep(&self, max_age: Duration) -> usize {
        self.sweep_at(max_age, now_ms())
    }

    /// Drop entries older than `max_age`. Returns how many were removed.
    pub fn sweep_at(&self, max_age: Duration, now: i64) -> usize {
        let before = self.entries.len();
        let max_age = max_age.as_millis() as i64;
        // retain holds each shard's lock while deciding, so a concurrent touch
        // either lands before (and is kept) or after (and re-inserts).
        self.entries.retain(|_, last| now - *last <= max_age);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const W: Duration = Duration::from_millis(10_000);

    #[test]
    fn inactive_when_never_touched() {
        let store = CooldownStore::new();
        assert!(!store.is_active_at("k", W, 1_000));
    }

    #[test]
    fn window_boundaries() {
        let store = CooldownStore::new();
        store.touch_at("k", 50_000);

        assert!(store.is_active_at("k", W, 50_000 + 10_000 - 1));
        assert!(!store.is_active_at("k", W, 50_000 + 10_000));
        assert!(!store.is_active_at("k", W, 50_000 + 10_000 + 1));
    }

    #[test]
    fn touch_never_moves_backwards() {
        let store = CooldownStore::new();
        store.touch_at("k", 20_000);
        store.touch_at("k", 5_000);
        assert!(store.is_active_at("k", W, 29_999));
    }

    #[test]
    fn clear_and_sweep() {
        let store = CooldownStore::new();
        store.touch_at(&scam_key(1, 2), 0);
        store.touch_at(&scam_key(3, 2), 90_000);
        store.touch_at("other", 0);

        store.clear("other");
        assert_eq!(store.len(), 2);

        let removed = store.sweep_at(Duration::from_secs(60), 100_000);
        assert_eq!(removed, 1);
        assert!(store.is_active_at(&scam_key(3, 2), W, 95_000));
        assert!(!store.is_active_at(&scam_key(1, 2), W, 5_000));
    }
}

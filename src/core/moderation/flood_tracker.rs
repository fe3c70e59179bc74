// Per (chat, user) sliding-window message counter.
//
// A subject that goes over the limit is flagged once and then locked until the
// restrict period elapses; after that a fresh window starts.

use super::moderation_config::FloodConfig;
use super::moderation_models::{now_ms, FloodObservation};
use dashmap::DashMap;
use std::collections::VecDeque;
use std::time::Duration;

/// How often the idle sweep runs.
pub const FLOOD_SWEEP_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Subjects without activity for this long are forgotten.
pub const FLOOD_IDLE_TTL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, Default)]
struct FloodEntry {
    /// Message timestamps (epoch ms), oldest first.
    timestamps: VecDeque<i64>,
    restricted_until: Option<i64>,
}

impl FloodEntry {
    fn last_activity(&self) -> i64 {
        let last_message = self.timestamps.back().copied().unwrap_or(i64::MIN);
        last_message.max(self.restricted_until.unwrap_or(i64::MIN))
    }
}

pub struct FloodTracker {
    config: FloodConfig,
    entries: DashMap<(u64, u64), FloodEntry>,
}

impl FloodTracker {
    pub fn new(config: FloodConfig) -> Self {
        Self {
            config,
            entries: DashMap::new(),
        }
    }

    pub fn config(&self) -> &FloodConfig {
        &self.config
    }

    pub fn observe(&self, chat_id: u64, user_id: u64) -> FloodObservation {
        self.observe_at(chat_id, user_id, now_ms())
    }

    /// Record one message and decide whether the subject is flooding.
    ///
    /// The lock is taken in the same step that flags the flood, so concurrent
    /// observers can never both see a trigger.
    pub fn observe_at(&self, chat_id: u64, user_id: u64, now: i64) -> FloodObservation {
        let window_ms = (self.config.window_secs * 1000) as i64;
        let restrict_ms = (self.config.restrict_minutes * 60 * 1000) as i64;

        let mut entry = self.entries.entry((chat_id, user_id)).or_default();

        if let Some(until) = entry.restricted_until {
            if now < until {
                return FloodObservation {
                    is_flood: false,
                    count: entry.timestamps.len(),
                };
            }
            entry.restricted_until = None;
            entry.timestamps.clear();
        }

        entry.timestamps.push_back(now);
        let cutoff = now - window_ms;
        while let Some(&oldest) = entry.timestamps.front() {
            if oldest < cutoff {
                entry.timestamps.pop_front();
            } else {
                break;
            }
        }

        let count = entry.timestamps.len();
        let is_flood = count > self.config.max_messages;
        if is_flood {
            entry.restricted_until = Some(now + restrict_ms);
        }

        FloodObservation { is_flood, count }
    }

    #[cfg(test)]
    pub fn is_locked_at(&self, chat_id: u64, user_id: u64, now: i64) -> bool {
        self.entries
            .get(&(chat_id, user_id))
            .and_then(|e| e.restricted_until)
            .is_some_and(|until| now < until)
    }

    pub fn clear(&self, chat_id: u64, user_id: u64) {
        self.entries.remove(&(chat_id, user_id));
    }

    pub fn sweep_idle(&self) -> usize {
        self.sweep_idle_at(FLOOD_IDLE_TTL, now_ms())
    }

    /// Forget subjects idle for longer than `idle`. Locked subjects are kept
    /// until their lock has expired.
    pub fn sweep_idle_at(&self, idle: Duration, now: i64) -> usize {
        let before = self.entries.len();
        let idle_ms = idle.as_millis() as i64;
        self.entries
            .retain(|_, entry| entry.last_activity() >= now - idle_ms);
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tracker() -> FloodTracker {
        FloodTracker::new(FloodConfig {
            max_messages: 5,
            window_secs: 30,
            restrict_minutes: 10,
        })
    }

    #[test]
    fn sixth_message_triggers_exactly_once() {
        let tracker = tracker();
        for i in 0..5 {
            let obs = tracker.observe_at(1, 2, i * 1_000);
            assert!(!obs.is_flood, "message {} should not trigger", i + 1);
            assert_eq!(obs.count, (i + 1) as usize);
        }

        let sixth = tracker.observe_at(1, 2, 5_000);
        assert!(sixth.is_flood);
        assert_eq!(sixth.count, 6);

        // Locked: nothing fires for the rest of the restrict period.
        for i in 0..20 {
            let obs = tracker.observe_at(1, 2, 6_000 + i * 100);
            assert!(!obs.is_flood);
        }
        assert!(tracker.is_locked_at(1, 2, 5_000 + 10 * 60 * 1_000 - 1));
    }

    #[test]
    fn lock_expiry_starts_fresh_window() {
        let tracker = tracker();
        for i in 0..6 {
            tracker.observe_at(1, 2, i);
        }
        let unlocked_at = 5 + 10 * 60 * 1_000;
        assert!(!tracker.is_locked_at(1, 2, unlocked_at));

        let obs = tracker.observe_at(1, 2, unlocked_at);
        assert!(!obs.is_flood);
        assert_eq!(obs.count, 1);

        for i in 1..5 {
            assert!(!tracker.observe_at(1, 2, unlocked_at + i).is_flood);
        }
        assert!(tracker.observe_at(1, 2, unlocked_at + 5).is_flood);
    }

    #[test]
    fn old_messages_leave_the_window() {
        let tracker = tracker();
        // One message every 7 seconds never has more than 5 inside 30 seconds.
        for i in 0..20 {
            let obs = tracker.observe_at(1, 2, i * 7_000);
            assert!(!obs.is_flood);
            assert!(obs.count <= 5);
        }
    }

    #[test]
    fn subjects_are_independent() {
        let tracker = tracker();
        for i in 0..5 {
            tracker.observe_at(1, 2, i);
            tracker.observe_at(1, 3, i);
            tracker.observe_at(9, 2, i);
        }
        assert!(tracker.observe_at(1, 2, 10).is_flood);
        assert!(!tracker.is_locked_at(1, 3, 10));
        assert!(!tracker.is_locked_at(9, 2, 10));
    }

    #[test]
    fn sweep_removes_idle_subjects_only() {
        let tracker = tracker();
        tracker.observe_at(1, 1, 0);
        tracker.observe_at(1, 2, 3_000_000);
        for i in 0..6 {
            tracker.observe_at(1, 3, i);
        }

        let hour = Duration::from_secs(3_600);
        let removed = tracker.sweep_idle_at(hour, 5_000_000);
        assert_eq!(removed, 2);
        assert_eq!(tracker.len(), 1);

        tracker.clear(1, 2);
        assert_eq!(tracker.len(), 0);
    }
}

// Per-message processed markers with a fixed TTL.
//
// A marker means "this (chat, message) already went through the pipeline".
// Original and edited deliveries share the message id, so they share a marker.

use super::moderation_models::now_ms;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::time::Duration;

pub struct DedupGate {
    ttl: Duration,
    /// "chat:message" -> expires at (epoch ms)
    markers: DashMap<String, i64>,
}

fn marker_key(chat_id: u64, message_id: u64) -> String {
    format!("{chat_id}:{message_id}")
}

impl DedupGate {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            markers: DashMap::new(),
        }
    }

    pub fn is_processed(&self, chat_id: u64, message_id: u64) -> bool {
        self.is_processed_at(chat_id, message_id, now_ms())
    }

    pub fn is_processed_at(&self, chat_id: u64, message_id: u64, now: i64) -> bool {
        let key = marker_key(chat_id, message_id);
        // remove_if only removes while the shard lock is held, so a fresh
        // marker written in between is never dropped.
        self.markers.remove_if(&key, |_, expires_at| *expires_at <= now);
        self.markers.contains_key(&key)
    }

    /// Claim the message. Returns false when a live marker already exists,
    /// meaning another delivery got here first.
    pub fn mark_processed(&self, chat_id: u64, message_id: u64) -> bool {
        self.mark_processed_at(chat_id, message_id, now_ms())
    }

    pub fn mark_processed_at(&self, chat_id: u64, message_id: u64, now: i64) -> bool {
        let expires_at = now + self.ttl.as_millis() as i64;
        match self.markers.entry(marker_key(chat_id, message_id)) {
            Entry::Occupied(mut existing) => {
                if *existing.get() <= now {
                    existing.insert(expires_at);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(expires_at);
                true
            }
        }
    }

    /// Drop expired markers. Only needed to bound memory.
    pub fn sweep(&self) -> usize {
        self.sweep_at(now_ms())
    }

    pub fn sweep_at(&self, now: i64) -> usize {
        let before = self.markers.len();
        self.markers.retain(|_, expires_at| *expires_at > now);
        before.saturating_sub(self.markers.len())
    }

    pub fn len(&self) -> usize {
        self.markers.len()
    }
}

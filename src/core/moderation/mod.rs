// Core moderation module - the trust-and-safety pipeline.
// Trackers and scorer are leaves; the service composes them.

pub mod action_dispatcher;
pub mod action_queue;
pub mod audit_queue;
pub mod cooldown_store;
pub mod dedup_gate;
pub mod flood_tracker;
pub mod moderation_config;
pub mod moderation_errors;
pub mod moderation_models;
pub mod moderation_ports;
pub mod moderation_service;
pub mod signal_scorer;

#[cfg(test)]
pub mod test_support;

pub use action_dispatcher::*;
pub use flood_tracker::FLOOD_SWEEP_INTERVAL;
pub use moderation_config::*;
pub use moderation_errors::*;
pub use moderation_models::*;
pub use moderation_ports::*;
pub use moderation_service::*;
pub use signal_scorer::extract_urls;

// Discord layer - commands, event ingestion and the platform client.

#[path = "commands/command_catalog.rs"]
pub mod commands;

#[path = "moderation/event_ingest.rs"]
pub mod ingest;

#[path = "moderation/serenity_platform.rs"]
pub mod platform;

// Re-export command types for convenience
pub use commands::moderation::{Data, Error};

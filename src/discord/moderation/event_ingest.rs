// Gateway events -> pipeline events.
//
// Every shape the pipeline cares about is converted here, once; anything else
// returns None and never reaches the core.

use crate::core::moderation::{extract_urls, InboundEvent, MessageEvent};
use poise::serenity_prelude as serenity;

/// The fields of a Discord message the pipeline looks at.
#[derive(Debug, Clone, Default)]
pub struct MessageParts {
    pub guild_id: u64,
    pub channel_id: u64,
    pub message_id: u64,
    pub author_id: u64,
    pub author_is_bot: bool,
    pub content: String,
    /// Plain message carrying a reference to another message.
    pub is_forwarded: bool,
    pub mention_count: usize,
    pub embed_count: usize,
    pub timestamp_ms: i64,
}

impl MessageParts {
    fn from_message(msg: &serenity::Message) -> Option<Self> {
        let guild_id = msg.guild_id?;
        Some(Self {
            guild_id: guild_id.get(),
            channel_id: msg.channel_id.get(),
            message_id: msg.id.get(),
            author_id: msg.author.id.get(),
            author_is_bot: msg.author.bot,
            content: msg.content.clone(),
            // Replies are InlineReply; a Regular message with a reference is a forward.
            is_forwarded: msg.kind == serenity::MessageType::Regular
                && msg.message_reference.is_some(),
            mention_count: msg.mentions.len()
                + msg.mention_roles.len()
                + usize::from(msg.mention_everyone),
            embed_count: msg.embeds.len(),
            timestamp_ms: msg.timestamp.unix_timestamp() * 1000,
        })
    }

    pub fn into_event(self) -> MessageEvent {
        MessageEvent {
            chat_id: self.guild_id,
            channel_id: self.channel_id,
            user_id: self.author_id,
            message_id: self.message_id,
            extracted_urls: extract_urls(&self.content),
            text: self.content,
            is_forwarded: self.is_forwarded,
            has_entities: self.mention_count > 0 || self.embed_count > 0,
            from_bot: self.author_is_bot,
            timestamp_ms: self.timestamp_ms,
        }
    }
}

/// Convert a gateway event. None for DMs and event kinds the pipeline ignores.
pub fn inbound_event(event: &serenity::FullEvent) -> Option<InboundEvent> {
    match event {
        serenity::FullEvent::Message { new_message } => {
            if new_message.webhook_id.is_some() {
                let guild_id = new_message.guild_id?;
                return Some(InboundEvent::ChannelPost {
                    chat_id: guild_id.get(),
                    message_id: new_message.id.get(),
                });
            }
            MessageParts::from_message(new_message)
                .map(|parts| InboundEvent::Message(parts.into_event()))
        }
        serenity::FullEvent::MessageUpdate { new, event, .. } => {
            let parts = match new {
                Some(msg) => MessageParts::from_message(msg)?,
                // Not cached: rebuild what we can from the partial update.
                None => {
                    let author = event.author.as_ref()?;
                    MessageParts {
                        guild_id: event.guild_id?.get(),
                        channel_id: event.channel_id.get(),
                        message_id: event.id.get(),
                        author_id: author.id.get(),
                        author_is_bot: author.bot,
                        content: event.content.clone()?,
                        is_forwarded: false,
                        mention_count: event.mentions.as_ref().map_or(0, |m| m.len()),
                        embed_count: event.embeds.as_ref().map_or(0, |e| e.len()),
                        timestamp_ms: crate::core::moderation::now_ms(),
                    }
                }
            };
            Some(InboundEvent::EditedMessage(parts.into_event()))
        }
        serenity::FullEvent::GuildMemberAddition { new_member } => {
            Some(InboundEvent::MemberJoined {
                chat_id: new_member.guild_id.get(),
                user_id: new_member.user.id.get(),
            })
        }
        serenity::FullEvent::GuildMemberRemoval { guild_id, user, .. } => {
            Some(InboundEvent::MemberLeft {
                chat_id: guild_id.get(),
                user_id: user.id.get(),
            })
        }
        _ => None,
    }
}

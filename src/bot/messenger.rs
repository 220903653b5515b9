//! Outbound calls to the chat platform.
//!
//! The core only ever talks back to Discord through [`Messenger`], so tests
//! can swap in a recording fake.

use std::sync::Arc;

use async_trait::async_trait;
use serenity::builder::{CreateEmbed, CreateEmbedFooter, CreateMessage, EditMember, EditMessage};
use serenity::http::Http;
use serenity::model::Timestamp;
use serenity::model::channel::ReactionType;
use serenity::model::id::{ChannelId, GuildId, MessageId, UserId};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct MessengerError(pub String);

/// A message the bot posted, kept so it can be edited later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentMessage {
    pub channel_id: String,
    pub message_id: String,
}

/// Platform-neutral rich message.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Embed {
    pub title: String,
    pub description: String,
    pub colour: u32,
    /// (name, value, inline)
    pub fields: Vec<(String, String, bool)>,
    pub footer: Option<String>,
    pub timestamp: Option<i64>,
}

#[async_trait]
pub trait Messenger: Send + Sync {
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<SentMessage, MessengerError>;

    async fn send_embed(&self, channel_id: &str, embed: &Embed) -> Result<SentMessage, MessengerError>;

    async fn edit_message(&self, message: &SentMessage, text: &str) -> Result<(), MessengerError>;

    async fn edit_embed(&self, message: &SentMessage, embed: &Embed) -> Result<(), MessengerError>;

    async fn delete_message(&self, message: &SentMessage) -> Result<(), MessengerError>;

    async fn add_reaction(&self, channel_id: &str, message_id: &str, emoji: &str) -> Result<(), MessengerError>;

    /// Stop a member from talking until `until` (unix seconds).
    async fn timeout_member(&self, guild_id: &str, user_id: &str, until: i64) -> Result<(), MessengerError>;
}

/// Edit the placeholder if there is one, otherwise post a fresh message.
pub async fn reply_or_edit(
    messenger: &dyn Messenger,
    channel_id: &str,
    placeholder: Option<&SentMessage>,
    text: &str,
) -> Result<(), MessengerError> {
    match placeholder {
        Some(message) => messenger.edit_message(message, text).await,
        None => messenger.send_message(channel_id, text).await.map(|_| ()),
    }
}

/// Embed flavour of [`reply_or_edit`].
pub async fn reply_or_edit_embed(
    messenger: &dyn Messenger,
    channel_id: &str,
    placeholder: Option<&SentMessage>,
    embed: &Embed,
) -> Result<(), MessengerError> {
    match placeholder {
        Some(message) => messenger.edit_embed(message, embed).await,
        None => messenger.send_embed(channel_id, embed).await.map(|_| ()),
    }
}

/// Discord implementation over serenity's REST client.
pub struct DiscordMessenger {
    http: Arc<Http>,
}

impl DiscordMessenger {
    pub fn new(http: Arc<Http>) -> Self {
        Self { http }
    }
}

fn parse_id(kind: &str, raw: &str) -> Result<u64, MessengerError> {
    raw.parse::<u64>()
        .ok()
        .filter(|id| *id != 0)
        .ok_or_else(|| MessengerError(format!("invalid {kind} id '{raw}'")))
}

fn channel(raw: &str) -> Result<ChannelId, MessengerError> {
    parse_id("channel", raw).map(ChannelId::new)
}

fn message(raw: &str) -> Result<MessageId, MessengerError> {
    parse_id("message", raw).map(MessageId::new)
}

fn to_discord_embed(embed: &Embed) -> CreateEmbed {
    let mut builder = CreateEmbed::new()
        .title(&embed.title)
        .description(&embed.description)
        .colour(embed.colour);

    for (name, value, inline) in &embed.fields {
        builder = builder.field(name, value, *inline);
    }
    if let Some(ref footer) = embed.footer {
        builder = builder.footer(CreateEmbedFooter::new(footer));
    }
    if let Some(ts) = embed.timestamp.and_then(|t| Timestamp::from_unix_timestamp(t).ok()) {
        builder = builder.timestamp(ts);
    }
    builder
}

fn sent(msg: &serenity::model::channel::Message) -> SentMessage {
    SentMessage {
        channel_id: msg.channel_id.to_string(),
        message_id: msg.id.to_string(),
    }
}

fn failed(action: &str, e: serenity::Error) -> MessengerError {
    let err = MessengerError(format!("Failed to {action}: {e}"));
    warn!("{}", err);
    err
}

#[async_trait]
impl Messenger for DiscordMessenger {
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<SentMessage, MessengerError> {
        channel(channel_id)?
            .say(&self.http, text)
            .await
            .map(|m| sent(&m))
            .map_err(|e| failed("send", e))
    }

    async fn send_embed(&self, channel_id: &str, embed: &Embed) -> Result<SentMessage, MessengerError> {
        channel(channel_id)?
            .send_message(&self.http, CreateMessage::new().embed(to_discord_embed(embed)))
            .await
            .map(|m| sent(&m))
            .map_err(|e| failed("send embed", e))
    }

    async fn edit_message(&self, msg: &SentMessage, text: &str) -> Result<(), MessengerError> {
        channel(&msg.channel_id)?
            .edit_message(&self.http, message(&msg.message_id)?, EditMessage::new().content(text))
            .await
            .map(|_| ())
            .map_err(|e| failed("edit", e))
    }

    async fn edit_embed(&self, msg: &SentMessage, embed: &Embed) -> Result<(), MessengerError> {
        let builder = EditMessage::new().content("").embed(to_discord_embed(embed));
        channel(&msg.channel_id)?
            .edit_message(&self.http, message(&msg.message_id)?, builder)
            .await
            .map(|_| ())
            .map_err(|e| failed("edit embed", e))
    }

    async fn delete_message(&self, msg: &SentMessage) -> Result<(), MessengerError> {
        channel(&msg.channel_id)?
            .delete_message(&self.http, message(&msg.message_id)?)
            .await
            .map_err(|e| failed("delete", e))
    }

    async fn add_reaction(&self, channel_id: &str, message_id: &str, emoji: &str) -> Result<(), MessengerError> {
        channel(channel_id)?
            .create_reaction(&self.http, message(message_id)?, ReactionType::Unicode(emoji.to_string()))
            .await
            .map_err(|e| failed("add reaction", e))
    }

    async fn timeout_member(&self, guild_id: &str, user_id: &str, until: i64) -> Result<(), MessengerError> {
        let guild = GuildId::new(parse_id("guild", guild_id)?);
        let user = UserId::new(parse_id("user", user_id)?);
        let until = Timestamp::from_unix_timestamp(until)
            .map_err(|e| MessengerError(format!("invalid timeout: {e}")))?;

        guild
            .edit_member(&self.http, user, EditMember::new().disable_communication_until_datetime(until))
            .await
            .map(|_| ())
            .map_err(|e| failed("timeout member", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_id_rejects_garbage() {
        assert_eq!(parse_id("channel", "1234").unwrap(), 1234);
        assert!(parse_id("channel", "0").is_err());
        assert!(parse_id("channel", "abc").is_err());
        assert!(parse_id("channel", "").is_err());
    }
}

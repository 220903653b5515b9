//! Test doubles.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::bot::messenger::{Embed, Messenger, MessengerError, SentMessage};

#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Sent { channel_id: String, text: String },
    SentEmbed { channel_id: String, embed: Embed },
    Edited { message: SentMessage, text: String },
    EditedEmbed { message: SentMessage, embed: Embed },
    Deleted(SentMessage),
    Reaction { channel_id: String, message_id: String, emoji: String },
    Timeout { guild_id: String, user_id: String, until: i64 },
}

/// Messenger that records every call instead of talking to Discord.
#[derive(Default)]
pub struct RecordingMessenger {
    calls: Mutex<Vec<Outbound>>,
    fail: bool,
}

impl RecordingMessenger {
    /// Records calls but reports every one of them as failed.
    pub fn failing() -> Self {
        Self { calls: Mutex::new(Vec::new()), fail: true }
    }

    pub fn calls(&self) -> Vec<Outbound> {
        self.calls.lock().unwrap().clone()
    }

    /// Text of every plain message sent, in order.
    pub fn sent_texts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Outbound::Sent { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    fn record(&self, call: Outbound) -> Result<(), MessengerError> {
        let mut calls = self.calls.lock().unwrap();
        calls.push(call);
        if self.fail {
            return Err(MessengerError("unknown channel".into()));
        }
        Ok(())
    }

    fn next_message(&self, channel_id: &str) -> SentMessage {
        SentMessage {
            channel_id: channel_id.to_string(),
            message_id: format!("sent-{}", self.calls.lock().unwrap().len()),
        }
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn send_message(&self, channel_id: &str, text: &str) -> Result<SentMessage, MessengerError> {
        let sent = self.next_message(channel_id);
        self.record(Outbound::Sent { channel_id: channel_id.into(), text: text.into() })?;
        Ok(sent)
    }

    async fn send_embed(&self, channel_id: &str, embed: &Embed) -> Result<SentMessage, MessengerError> {
        let sent = self.next_message(channel_id);
        self.record(Outbound::SentEmbed { channel_id: channel_id.into(), embed: embed.clone() })?;
        Ok(sent)
    }

    async fn edit_message(&self, message: &SentMessage, text: &str) -> Result<(), MessengerError> {
        self.record(Outbound::Edited { message: message.clone(), text: text.into() })
    }

    async fn edit_embed(&self, message: &SentMessage, embed: &Embed) -> Result<(), MessengerError> {
        self.record(Outbound::EditedEmbed { message: message.clone(), embed: embed.clone() })
    }

    async fn delete_message(&self, message: &SentMessage) -> Result<(), MessengerError> {
        self.record(Outbound::Deleted(message.clone()))
    }

    async fn add_reaction(&self, channel_id: &str, message_id: &str, emoji: &str) -> Result<(), MessengerError> {
        self.record(Outbound::Reaction {
            channel_id: channel_id.into(),
            message_id: message_id.into(),
            emoji: emoji.into(),
        })
    }

    async fn timeout_member(&self, guild_id: &str, user_id: &str, until: i64) -> Result<(), MessengerError> {
        self.record(Outbound::Timeout { guild_id: guild_id.into(), user_id: user_id.into(), until })
    }
}

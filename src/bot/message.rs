//! Inbound chat message, decoupled from the gateway's types.

use crate::openrouter::Message;

/// A message the bot received.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage {
    pub message_id: String,
    pub channel_id: String,
    /// None for direct messages.
    pub guild_id: Option<String>,
    pub user_id: String,
    pub username: String,
    pub text: String,
    /// Whether the message @-mentions the bot.
    pub mentions_bot: bool,
}

/// Safely truncate a string at a char boundary.
pub fn truncate_safe(s: &str, max_bytes: usize) -> &str {
    if s.len() <= max_bytes {
        return s;
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

impl ChatMessage {
    /// Entry stored in the channel's conversation window.
    pub fn context_entry(&self) -> Message {
        Message::user(format!("{}: {}", self.username, self.text))
    }

    /// Split `!name args` into `("name", "args")` when the text starts with `prefix`.
    pub fn command<'a>(&'a self, prefix: &str) -> Option<(&'a str, &'a str)> {
        let body = self.text.strip_prefix(prefix)?;
        let (name, args) = body.split_once(char::is_whitespace).unwrap_or((body, ""));
        if name.is_empty() {
            return None;
        }
        Some((name, args.trim()))
    }
}

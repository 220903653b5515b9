//! Unprompted replies: random engagement and @-mentions.
//!
//! The model answers either with text or with a single emoji. Text goes to
//! the channel, an emoji becomes a reaction on the triggering message.

use serde::Deserialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::bot::commands::Bot;
use crate::bot::message::ChatMessage;
use crate::bot::messenger::reply_or_edit;
use crate::openrouter::{Message, Role, ToolCall};
use crate::websearch::SearchError;

const ENGAGE_INSTRUCTION: &str = "You are reading the chat above. Reply to the latest message with either a short message or a single emoji reaction. If you react with an emoji, respond with only the emoji.";

const MENTION_INSTRUCTION: &str = "You were mentioned in the latest message above. Reply to it directly. Use the search tool if you need current information.";

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownFunction(String),
    #[error("invalid tool arguments: {0}")]
    BadArguments(#[from] serde_json::Error),
    #[error(transparent)]
    Search(#[from] SearchError),
}

#[derive(Deserialize)]
struct SearchArgs {
    query: String,
}

/// Whether a model reply should be posted as text rather than used as a reaction.
///
/// Replies starting with a letter, digit or punctuation are text. Mentions are
/// lenient: anything longer than two characters is text too.
pub fn is_text_reply(content: &str, lenient: bool) -> bool {
    let Some(first) = content.chars().next() else {
        return false;
    };
    if first.is_alphanumeric() || first.is_ascii_punctuation() {
        return true;
    }
    lenient && content.chars().count() > 2
}

impl Bot {
    /// Randomly chime in on a message the bot wasn't addressed in.
    pub(crate) async fn engage_with_message(&self, msg: &ChatMessage) {
        let mut request = self.llm.request();
        request.extend(self.coordinator.conversation(&msg.channel_id));
        request.push(Message::user(ENGAGE_INSTRUCTION));

        let reply = match self.llm.send(&request).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Failed to engage with message: {e}");
                return;
            }
        };

        let content = reply.content.trim();
        if content.is_empty() {
            return;
        }

        if is_text_reply(content, false) {
            let text = self.coordinator.resolve_mentions(content);
            if let Err(e) = self.messenger.send_message(&msg.channel_id, &text).await {
                warn!("Failed to send engagement: {e}");
            }
        } else {
            info!("Reacting to {} with {}", msg.message_id, content);
            if let Err(e) = self.messenger.add_reaction(&msg.channel_id, &msg.message_id, content).await {
                warn!("Failed to add reaction: {e}");
            }
        }
    }

    /// Answer a message that mentions the bot, with web search available.
    pub(crate) async fn engage_from_mention(&self, msg: &ChatMessage) {
        let placeholder = self.messenger.send_message(&msg.channel_id, "💭 Thinking...").await.ok();

        let mut request = self.llm.request_with_tools();
        request.extend(self.coordinator.conversation(&msg.channel_id));
        request.push(Message::user(MENTION_INSTRUCTION));

        let mut reply = match self.llm.send(&request).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("Failed to answer mention: {e}");
                let text = "❌ Sorry I'm unable to think right now.";
                if let Err(e) = reply_or_edit(self.messenger.as_ref(), &msg.channel_id, placeholder.as_ref(), text).await {
                    error!("Failed to send message: {e}");
                }
                return;
            }
        };

        if !reply.tool_calls.is_empty() {
            for call in std::mem::take(&mut reply.tool_calls) {
                let result = match self.process_tool_call(&call).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!("Tool call {} failed: {e}", call.function.name);
                        Message::tool_result(&call.id, &call.function.name, format!("Error: {e}"))
                    }
                };
                request.push(Message {
                    role: Role::Assistant,
                    content: String::new(),
                    name: None,
                    tool_call_id: None,
                    tool_calls: vec![call],
                });
                request.push(result);
            }

            reply = match self.llm.send(&request).await {
                Ok(reply) => reply,
                Err(e) => {
                    error!("Failed to answer mention after tool calls: {e}");
                    let text = "❌ Sorry I'm unable to think right now.";
                    if let Err(e) = reply_or_edit(self.messenger.as_ref(), &msg.channel_id, placeholder.as_ref(), text).await {
                        error!("Failed to send message: {e}");
                    }
                    return;
                }
            };
        }

        let content = reply.content.trim();
        if is_text_reply(content, true) {
            let text = self.coordinator.resolve_mentions(content);
            if let Err(e) = reply_or_edit(self.messenger.as_ref(), &msg.channel_id, placeholder.as_ref(), &text).await {
                error!("Failed to send message: {e}");
            }
            return;
        }

        if let Some(ref placeholder) = placeholder
            && let Err(e) = self.messenger.delete_message(placeholder).await
        {
            warn!("Failed to delete placeholder: {e}");
        }
        if content.is_empty() {
            return;
        }
        if let Err(e) = self.messenger.add_reaction(&msg.channel_id, &msg.message_id, content).await {
            warn!("Failed to add reaction: {e}");
        }
    }

    /// Run one tool the model asked for and wrap its output as a tool message.
    pub(crate) async fn process_tool_call(&self, call: &ToolCall) -> Result<Message, ToolError> {
        match call.function.name.as_str() {
            "search" => {
                let args: SearchArgs = serde_json::from_str(&call.function.arguments)?;
                let results = self.search.search(&args.query).await?;
                let content = serde_json::to_string(&results)?;
                Ok(Message::tool_result(&call.id, &call.function.name, content))
            }
            other => Err(ToolError::UnknownFunction(other.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_replies() {
        assert!(is_text_reply("hello", false));
        assert!(is_text_reply("42 is the answer", false));
        assert!(is_text_reply("\"quoted\"", false));
        assert!(is_text_reply("Ça va", false));
    }

    #[test]
    fn test_emoji_replies() {
        assert!(!is_text_reply("👍", false));
        assert!(!is_text_reply("😂", true));
        assert!(!is_text_reply("", true));
    }

    #[test]
    fn test_lenient_mentions() {
        assert!(!is_text_reply("🎉 congrats", false));
        assert!(is_text_reply("🎉 congrats", true));
    }
}

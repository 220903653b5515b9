use std::sync::Arc;
use std::time::Duration;

use serenity::all::{ChannelId, Http};
use tokio::sync::mpsc;
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::Layer;
use tracing_subscriber::layer::Context;

use crate::bot::message::truncate_safe;

/// Discord rejects messages over 2000 characters.
const MAX_LOG_MESSAGE: usize = 1900;
const FLUSH_INTERVAL: Duration = Duration::from_secs(5);
const FLUSH_LINES: usize = 50;

/// Log message with priority.
#[derive(Debug)]
enum LogMessage {
    /// WARN/ERROR - send immediately
    Urgent(String),
    /// INFO - batch and send periodically
    Info(String),
}

/// Mirrors INFO and above into a Discord channel.
pub struct DiscordLogLayer {
    tx: mpsc::UnboundedSender<LogMessage>,
}

impl DiscordLogLayer {
    /// Must be called inside a tokio runtime.
    pub fn new(http: Arc<Http>, channel: ChannelId) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<LogMessage>();

        tokio::spawn(async move {
            let mut info_buffer: Vec<String> = Vec::new();
            let mut interval = tokio::time::interval(FLUSH_INTERVAL);

            loop {
                tokio::select! {
                    msg = rx.recv() => {
                        match msg {
                            Some(LogMessage::Urgent(text)) => send_log(&http, channel, &text).await,
                            Some(LogMessage::Info(text)) => {
                                info_buffer.push(text);
                                if info_buffer.len() >= FLUSH_LINES {
                                    flush_buffer(&http, channel, &mut info_buffer).await;
                                }
                            }
                            None => break,
                        }
                    }
                    _ = interval.tick() => {
                        flush_buffer(&http, channel, &mut info_buffer).await;
                    }
                }
            }
        });

        Self { tx }
    }
}

async fn send_log(http: &Http, channel: ChannelId, text: &str) {
    let text = if text.len() > MAX_LOG_MESSAGE {
        format!("{}...", truncate_safe(text, MAX_LOG_MESSAGE))
    } else {
        text.to_string()
    };
    if let Err(e) = channel.say(http, text).await {
        eprintln!("Failed to send log to Discord: {e}");
    }
}

async fn flush_buffer(http: &Http, channel: ChannelId, buffer: &mut Vec<String>) {
    if buffer.is_empty() {
        return;
    }
    let combined = buffer.join("\n");
    buffer.clear();
    send_log(http, channel, &combined).await;
}

#[derive(Default)]
struct MessageVisitor {
    message: String,
}

impl Visit for MessageVisitor {
    fn record_debug(&mut self, field: &Field, value: &dyn std::fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{:?}", value);
        } else if self.message.is_empty() {
            self.message = format!("{} = {:?}", field.name(), value);
        } else {
            self.message.push_str(&format!(", {} = {:?}", field.name(), value));
        }
    }
}

fn classify(level: Level, target: &str, message: String) -> Option<LogMessage> {
    // Events from the Discord client itself would feed back into the channel
    if level > Level::INFO || target.starts_with("serenity") {
        return None;
    }
    Some(match level {
        Level::ERROR => LogMessage::Urgent(format!("❌ {}", message)),
        Level::WARN => LogMessage::Urgent(format!("⚠️ {}", message)),
        _ => LogMessage::Info(message),
    })
}

impl<S: Subscriber> Layer<S> for DiscordLogLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let level = *metadata.level();
        if level > Level::INFO {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let Some(msg) = classify(level, metadata.target(), visitor.message) else {
            return;
        };
        if self.tx.send(msg).is_err() {
            eprintln!("Log channel closed, message dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_levels() {
        assert!(matches!(
            classify(Level::ERROR, "chad::bot", "boom".into()),
            Some(LogMessage::Urgent(m)) if m == "❌ boom"
        ));
        assert!(matches!(
            classify(Level::WARN, "chad::bot", "hmm".into()),
            Some(LogMessage::Urgent(m)) if m == "⚠️ hmm"
        ));
        assert!(matches!(classify(Level::INFO, "chad", "hi".into()), Some(LogMessage::Info(_))));
        assert!(classify(Level::DEBUG, "chad", "noise".into()).is_none());
    }

    #[test]
    fn test_skips_client_events() {
        assert!(classify(Level::WARN, "serenity::gateway::shard", "reconnect".into()).is_none());
    }
}

//! Bot module - shared state, commands and Discord event handling.

pub mod commands;
pub mod coordinator;
pub mod engage;
pub mod handler;
pub mod history;
pub mod members;
pub mod message;
pub mod messenger;
pub mod rate_limit;
pub mod reminders;
pub mod settings;

#[cfg(test)]
mod testing;

pub use commands::Bot;
pub use coordinator::{Coordinator, CoordinatorConfig};
pub use handler::Handler;
pub use message::ChatMessage;
pub use messenger::{DiscordMessenger, Messenger};
pub use settings::SettingsStore;

/// Current wall-clock time in unix seconds.
pub fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

pub mod bot;
pub mod config;
pub mod discord_log;
pub mod openrouter;
pub mod websearch;

//! Source code for a Telegram bot that watches Dash addresses
//! and tells chats when one of their addresses receives DASH.

/// Dash addresses, transactions and amounts.
pub mod types;

/// Who watches what, and which transactions they were told about.
pub mod database;

/// Block explorer and price APIs.
pub mod gateway;

/// Alert messages.
pub mod notifier;

/// The background loop that polls explorers and sends alerts.
pub mod poll_loop;

/// Settings from the environment.
pub mod config;

/// Functions that handle events from Telegram.
mod handlers;

/// Entry function that starts the bot.
mod entry;
pub use entry::*;

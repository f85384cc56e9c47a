//! Bot front-end services
//!
//! Everything the Telegram side of the bridge does besides delivering
//! notifications: command parsing, inline mailbox actions and the update
//! loop tying them together.

pub mod actions;
mod bot;
pub mod commands;

pub use bot::BotService;

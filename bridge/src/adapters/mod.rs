//! Concrete implementations of the `backend` traits
//!
//! - `sqlite`: ledger, sessions and encrypted credentials
//! - `gmail`: mailbox access over the Gmail REST API
//! - `telegram`: Bot API client and notifier

pub mod gmail;
pub mod sqlite;
pub mod telegram;

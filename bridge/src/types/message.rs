use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque reference to a delivered notification (the Telegram message id)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NotificationHandle(pub i64);

impl fmt::Display for NotificationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message as fetched from the remote mailbox
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MailMessage {
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub received_at: DateTime<Utc>,
    /// Plain-text body, possibly shortened
    pub body: String,
    /// Attachment file names
    pub attachments: Vec<String>,
    pub labels: Vec<String>,
    pub is_read: bool,
}

/// A mailbox message the bridge has observed and possibly notified about
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedMessage {
    pub message_id: String,
    pub subject: String,
    pub sender: String,
    pub received_at: DateTime<Utc>,
    /// None means tracked but not yet confirmed delivered
    pub notification_handle: Option<NotificationHandle>,
}

impl TrackedMessage {
    pub fn from_fetched(message: &MailMessage) -> Self {
        Self {
            message_id: message.message_id.clone(),
            subject: message.subject.clone(),
            sender: message.sender.clone(),
            received_at: message.received_at,
            notification_handle: None,
        }
    }
}

/// OAuth credentials stored per chat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    pub access_token: String,
    pub refresh_token: Option<String>,
    /// Unix timestamp (seconds)
    pub expires_at: Option<i64>,
    pub email: Option<String>,
}

/// Counts of what one poll cycle did. Only used for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    pub attempted: u32,
    pub delivered: u32,
    pub failed: u32,
    pub retracted: u32,
}

impl CycleOutcome {
    pub fn is_noop(&self) -> bool {
        self.attempted == 0 && self.retracted == 0
    }
}

/// Entries written to the action log
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActionKind {
    Delivered,
    DeliveryFailed,
    /// Delivery reported success but the handle never reached the ledger
    Error,
    Retracted,
    RetractionFailed,
    Deleted,
    Archived,
    Starred,
}

impl ActionKind {
    /// Get the action string for database storage
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Delivered => "delivered",
            Self::DeliveryFailed => "delivery_failed",
            Self::Error => "error",
            Self::Retracted => "retracted",
            Self::RetractionFailed => "retraction_failed",
            Self::Deleted => "deleted",
            Self::Archived => "archived",
            Self::Starred => "starred",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "delivered" => Some(Self::Delivered),
            "delivery_failed" => Some(Self::DeliveryFailed),
            "error" => Some(Self::Error),
            "retracted" => Some(Self::Retracted),
            "retraction_failed" => Some(Self::RetractionFailed),
            "deleted" => Some(Self::Deleted),
            "archived" => Some(Self::Archived),
            "starred" => Some(Self::Starred),
            _ => None,
        }
    }
}

//! Parsing of chat commands and inline button callbacks

/// A slash command sent to the bot
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BotCommand {
    Start,
    Connect,
    /// Authorization code, or the redirect URL containing it
    Code(String),
    Status,
    /// `None` asks for the current value
    Sync(Option<bool>),
    Unread(Option<bool>),
    Reconnect,
    Unknown(String),
}

impl BotCommand {
    /// Returns `None` for plain text that is not a command
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let rest = text.strip_prefix('/')?;
        let (head, args) = match rest.split_once(char::is_whitespace) {
            Some((head, args)) => (head, args.trim()),
            None => (rest, ""),
        };
        // Commands in groups arrive as /status@my_bot
        let name = head.split('@').next().unwrap_or(head).to_ascii_lowercase();

        let command = match name.as_str() {
            "start" | "help" => Self::Start,
            "connect" => Self::Connect,
            "code" => Self::Code(args.to_string()),
            "status" => Self::Status,
            "sync" => Self::Sync(parse_toggle(args)),
            "unread" => Self::Unread(parse_toggle(args)),
            "reconnect" => Self::Reconnect,
            _ => Self::Unknown(name),
        };
        Some(command)
    }

    /// Name for logging; never includes arguments such as codes
    pub fn name(&self) -> &str {
        match self {
            Self::Start => "start",
            Self::Connect => "connect",
            Self::Code(_) => "code",
            Self::Status => "status",
            Self::Sync(_) => "sync",
            Self::Unread(_) => "unread",
            Self::Reconnect => "reconnect",
            Self::Unknown(name) => name,
        }
    }
}

fn parse_toggle(arg: &str) -> Option<bool> {
    match arg.to_ascii_lowercase().as_str() {
        "on" | "yes" | "true" | "1" => Some(true),
        "off" | "no" | "false" | "0" => Some(false),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallbackKind {
    Delete,
    Archive,
    Star,
}

/// Payload of an inline keyboard button, `<action>:<message id>`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackAction {
    pub kind: CallbackKind,
    pub message_id: String,
}

impl CallbackAction {
    pub fn parse(data: &str) -> Option<Self> {
        let (action, message_id) = data.split_once(':')?;
        if message_id.is_empty() {
            return None;
        }
        let kind = match action {
            "delete" => CallbackKind::Delete,
            "archive" => CallbackKind::Archive,
            "star" => CallbackKind::Star,
            _ => return None,
        };
        Some(Self {
            kind,
            message_id: message_id.to_string(),
        })
    }
}

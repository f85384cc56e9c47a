//! Rendering of mail notifications as Telegram HTML

use super::{InlineKeyboardButton, InlineKeyboardMarkup};
use crate::types::MailMessage;

/// Body excerpt length; keeps notifications far below the 4096 char limit
pub const BODY_EXCERPT_CHARS: usize = 800;
const SUBJECT_CHARS: usize = 200;

pub fn escape_html(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

/// Cut `text` to at most `max_chars` characters, marking the cut with "…"
pub fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars.saturating_sub(1)).collect();
    format!("{}…", cut.trim_end())
}

pub fn render_notification(message: &MailMessage) -> String {
    let mut out = format!(
        "📧 <b>{}</b>\nFrom: {}\n🕒 {}",
        escape_html(&truncate(&message.subject, SUBJECT_CHARS)),
        escape_html(&message.sender),
        message.received_at.format("%Y-%m-%d %H:%M UTC"),
    );

    let body = message.body.trim();
    if !body.is_empty() {
        out.push_str("\n\n");
        out.push_str(&escape_html(&truncate(body, BODY_EXCERPT_CHARS)));
    }

    if !message.attachments.is_empty() {
        out.push_str("\n\n📎 ");
        out.push_str(&escape_html(&message.attachments.join(", ")));
    }

    out
}

pub fn action_keyboard(message_id: &str, starred: bool) -> InlineKeyboardMarkup {
    let star = if starred { "⭐ Starred" } else { "☆ Star" };
    InlineKeyboardMarkup {
        inline_keyboard: vec![vec![
            button("🗑 Delete", "delete", message_id),
            button("📥 Archive", "archive", message_id),
            button(star, "star", message_id),
        ]],
    }
}

fn button(text: &str, action: &str, message_id: &str) -> InlineKeyboardButton {
    InlineKeyboardButton {
        text: text.to_string(),
        callback_data: format!("{}:{}", action, message_id),
    }
}

//! Gmail API resources and their mapping to [`MailMessage`]

use base64::{engine::general_purpose::URL_SAFE, Engine};
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::types::MailMessage;

pub const LABEL_INBOX: &str = "INBOX";
pub const LABEL_UNREAD: &str = "UNREAD";
pub const LABEL_STARRED: &str = "STARRED";
pub const LABEL_TRASH: &str = "TRASH";

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailProfile {
    pub email_address: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailMessageList {
    #[serde(default)]
    pub messages: Vec<GmailMessageRef>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GmailMessageRef {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailMessage {
    pub id: String,
    #[serde(default)]
    pub label_ids: Vec<String>,
    pub snippet: Option<String>,
    /// Absent for `format=minimal`
    pub payload: Option<GmailPayload>,
    /// Milliseconds since epoch, as a string
    pub internal_date: Option<String>,
}

impl GmailMessage {
    pub fn has_label(&self, label: &str) -> bool {
        self.label_ids.iter().any(|l| l == label)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailPayload {
    pub mime_type: Option<String>,
    #[serde(default)]
    pub headers: Vec<GmailHeader>,
    pub body: Option<GmailBody>,
    #[serde(default)]
    pub parts: Vec<GmailPayload>,
    pub filename: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GmailHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GmailBody {
    pub data: Option<String>,
    pub attachment_id: Option<String>,
}

pub fn to_mail_message(message: &GmailMessage) -> MailMessage {
    let payload = message.payload.clone().unwrap_or_default();

    let subject = header(&payload, "Subject")
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "(no subject)".to_string());
    let sender = header(&payload, "From")
        .map(format_sender)
        .unwrap_or_else(|| "(unknown sender)".to_string());

    let body = extract_text(&payload)
        .map(|t| collapse_blank_lines(&t))
        .filter(|t| !t.is_empty())
        .or_else(|| message.snippet.as_deref().map(decode_entities))
        .unwrap_or_default();

    let mut attachments = Vec::new();
    collect_attachments(&payload, &mut attachments);

    MailMessage {
        message_id: message.id.clone(),
        subject,
        sender,
        received_at: received_at(message, &payload),
        body,
        attachments,
        labels: message.label_ids.clone(),
        is_read: !message.has_label(LABEL_UNREAD),
    }
}

fn header<'a>(payload: &'a GmailPayload, name: &str) -> Option<&'a str> {
    payload
        .headers
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.as_str())
}

/// `Name <addr>` when the header carries a display name, else the address
fn format_sender(raw: &str) -> String {
    match mailparse::addrparse(raw) {
        Ok(list) => match list.first() {
            Some(mailparse::MailAddr::Single(info)) => match &info.display_name {
                Some(name) if !name.trim().is_empty() => format!("{} <{}>", name.trim(), info.addr),
                _ => info.addr.clone(),
            },
            Some(mailparse::MailAddr::Group(group)) => group.group_name.clone(),
            None => raw.trim().to_string(),
        },
        Err(_) => raw.trim().to_string(),
    }
}

/// internalDate first, then the Date header, then now
fn received_at(message: &GmailMessage, payload: &GmailPayload) -> DateTime<Utc> {
    message
        .internal_date
        .as_deref()
        .and_then(|ms| ms.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .or_else(|| {
            header(payload, "Date")
                .and_then(|d| mailparse::dateparse(d).ok())
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
        })
        .unwrap_or_else(Utc::now)
}

/// Prefer the first text/plain part, fall back to stripped text/html
fn extract_text(payload: &GmailPayload) -> Option<String> {
    let mut plain = None;
    let mut html = None;
    collect_bodies(payload, &mut plain, &mut html);
    plain.or_else(|| html.map(|h| strip_html(&h)))
}

fn collect_bodies(payload: &GmailPayload, plain: &mut Option<String>, html: &mut Option<String>) {
    let is_attachment = payload.filename.as_deref().is_some_and(|f| !f.is_empty());
    if !is_attachment {
        if let Some(data) = payload.body.as_ref().and_then(|b| b.data.as_deref()) {
            let mime = payload.mime_type.as_deref().unwrap_or("").to_ascii_lowercase();
            if let Some(decoded) = decode_body(data) {
                if mime == "text/plain" && plain.is_none() {
                    *plain = Some(decoded);
                } else if mime == "text/html" && html.is_none() {
                    *html = Some(decoded);
                }
            }
        }
    }

    for part in &payload.parts {
        collect_bodies(part, plain, html);
    }
}

fn collect_attachments(payload: &GmailPayload, names: &mut Vec<String>) {
    if let Some(filename) = payload.filename.as_deref().filter(|f| !f.is_empty()) {
        names.push(filename.to_string());
    }
    for part in &payload.parts {
        collect_attachments(part, names);
    }
}

/// Gmail uses base64url, sometimes with and sometimes without padding
pub fn decode_body(data: &str) -> Option<String> {
    let padded = match data.len() % 4 {
        2 => format!("{}==", data),
        3 => format!("{}=", data),
        _ => data.to_string(),
    };
    let bytes = URL_SAFE.decode(padded.as_bytes()).ok()?;
    Some(String::from_utf8_lossy(&bytes).into_owned())
}

fn strip_html(html: &str) -> String {
    let mut text = String::with_capacity(html.len());
    let mut in_tag = false;
    let mut tag = String::new();
    let mut skip_until: Option<&str> = None;

    for ch in html.chars() {
        match ch {
            '<' => {
                in_tag = true;
                tag.clear();
            }
            '>' if in_tag => {
                in_tag = false;
                let name = tag
                    .trim_start_matches('/')
                    .split(|c: char| c.is_whitespace() || c == '/')
                    .next()
                    .unwrap_or("")
                    .to_ascii_lowercase();
                let closing = tag.starts_with('/');

                match (skip_until, name.as_str(), closing) {
                    (Some(skipped), current, true) if skipped == current => skip_until = None,
                    (Some(_), _, _) => {}
                    (None, "style", false) => skip_until = Some("style"),
                    (None, "script", false) => skip_until = Some("script"),
                    (None, "br" | "p" | "div" | "tr" | "li" | "h1" | "h2" | "h3", _) => {
                        text.push('\n')
                    }
                    _ => {}
                }
            }
            _ if in_tag => tag.push(ch),
            _ if skip_until.is_some() => {}
            _ => text.push(ch),
        }
    }

    decode_entities(&text)
}

fn decode_entities(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}

fn collapse_blank_lines(text: &str) -> String {
    let mut out = Vec::new();
    let mut blank = false;
    for line in text.lines().map(str::trim_end) {
        if line.trim().is_empty() {
            if !blank && !out.is_empty() {
                out.push("");
            }
            blank = true;
        } else {
            out.push(line);
            blank = false;
        }
    }
    out.join("\n").trim().to_string()
}

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

const BODY_EXCERPT_MAX_CHARS: usize = 8000;

/// One thread as the rest of the system sees it. Raw provider payload shapes
/// never leave this module.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadDetail {
    pub id: String,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Message {
    pub id: String,
    pub from: Option<String>,
    pub subject: Option<String>,
    pub label_ids: Vec<String>,
    /// internalDate: provider-assigned, monotonically increasing per message.
    pub timestamp: Option<DateTime<Utc>>,
    pub snippet: Option<String>,
    /// Plain-text body excerpt; only populated when the thread was fetched
    /// with bodies included.
    pub body_excerpt: Option<String>,
}

impl Message {
    pub fn has_label(&self, label: &str) -> bool {
        self.label_ids.iter().any(|l| l == label)
    }
}

pub fn thread_from_api(thread: GmailThread) -> ThreadDetail {
    let messages = thread
        .messages
        .unwrap_or_default()
        .into_iter()
        .map(message_from_api)
        .collect();
    ThreadDetail {
        id: thread.id,
        messages,
    }
}

pub fn message_from_api(message: GmailMessage) -> Message {
    let from = message
        .payload
        .as_ref()
        .and_then(|p| extract_header(p, "From"));
    let subject = message
        .payload
        .as_ref()
        .and_then(|p| extract_header(p, "Subject"));
    let body_excerpt = message.payload.as_ref().and_then(extract_body_excerpt);

    let timestamp = message
        .internal_date
        .as_deref()
        .and_then(|ms_str| ms_str.parse::<i64>().ok())
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

    Message {
        id: message.id,
        from,
        subject,
        label_ids: message.label_ids.unwrap_or_default(),
        timestamp,
        snippet: message.snippet,
        body_excerpt,
    }
}

pub fn extract_header(payload: &GmailPayload, name: &str) -> Option<String> {
    payload
        .headers
        .as_deref()
        .unwrap_or_default()
        .iter()
        .find(|h| h.name.eq_ignore_ascii_case(name))
        .map(|h| h.value.clone())
}

/// Parse an RFC5322-ish From header into (display name, lowercased address).
pub fn parse_from_header(raw: Option<&str>) -> (Option<String>, Option<String>) {
    let Some(raw) = raw else {
        return (None, None);
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return (None, None);
    }

    // Pattern: "Display Name <email@example.com>"
    if let Some(angle_start) = raw.rfind('<') {
        if let Some(angle_end) = raw.rfind('>') {
            let address = raw[angle_start + 1..angle_end].trim();
            let name_part = raw[..angle_start].trim();
            let name = name_part.trim_matches('"').trim().to_string();
            let name = if name.is_empty() { None } else { Some(name) };
            let address = if address.is_empty() {
                None
            } else {
                Some(address.to_ascii_lowercase())
            };
            return (name, address);
        }
    }

    // Plain email address
    if raw.contains('@') {
        return (None, Some(raw.to_ascii_lowercase()));
    }

    (Some(raw.to_string()), None)
}

fn extract_body_excerpt(payload: &GmailPayload) -> Option<String> {
    let mut text_body = None;
    let mut html_body = None;
    collect_body_parts(payload, &mut text_body, &mut html_body);

    if text_body.is_none() {
        text_body = html_body.as_deref().and_then(html_to_text);
    }

    text_body
        .map(|t| truncate_chars(&t, BODY_EXCERPT_MAX_CHARS))
        .filter(|t| !t.is_empty())
}

fn collect_body_parts(
    payload: &GmailPayload,
    text_body: &mut Option<String>,
    html_body: &mut Option<String>,
) {
    let mime_type = payload
        .mime_type
        .as_deref()
        .unwrap_or("")
        .to_ascii_lowercase();

    if let Some(body) = &payload.body {
        if let Some(data) = &body.data {
            if !data.is_empty() {
                if let Some(decoded) = decode_body_data(data) {
                    if mime_type == "text/plain" && text_body.is_none() {
                        *text_body = Some(decoded);
                    } else if mime_type == "text/html" && html_body.is_none() {
                        *html_body = Some(decoded);
                    }
                }
            }
        }
    }

    if let Some(parts) = &payload.parts {
        for part in parts {
            collect_body_parts(part, text_body, html_body);
        }
    }
}

pub fn decode_body_data(data: &str) -> Option<String> {
    let bytes = URL_SAFE_NO_PAD.decode(data).ok()?;
    String::from_utf8(bytes).ok()
}

fn html_to_text(html: &str) -> Option<String> {
    std::panic::catch_unwind(|| {
        html2text::from_read(html.as_bytes(), 120)
            .lines()
            .map(str::trim_end)
            .collect::<Vec<_>>()
            .join("\n")
            .trim()
            .to_string()
    })
    .ok()
    .filter(|t| !t.is_empty())
}

fn truncate_chars(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        s.chars().take(max_chars).collect()
    }
}

// --- Gmail API response types ---
// Fields are deserialized from the API; not all are read directly, they exist
// to match the API contract.

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct GmailProfile {
    #[serde(rename = "emailAddress")]
    pub email_address: String,
    #[serde(rename = "historyId")]
    pub history_id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct GmailThreadList {
    pub threads: Option<Vec<GmailThreadStub>>,
    #[serde(rename = "nextPageToken")]
    pub next_page_token: Option<String>,
    #[serde(rename = "resultSizeEstimate")]
    pub result_size_estimate: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct GmailThreadStub {
    pub id: String,
    pub snippet: Option<String>,
    #[serde(rename = "historyId")]
    pub history_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct GmailThread {
    pub id: String,
    pub messages: Option<Vec<GmailMessage>>,
    #[serde(rename = "historyId")]
    pub history_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct GmailMessage {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: Option<String>,
    #[serde(rename = "labelIds")]
    pub label_ids: Option<Vec<String>>,
    pub snippet: Option<String>,
    pub payload: Option<GmailPayload>,
    #[serde(rename = "internalDate")]
    pub internal_date: Option<String>,
    #[serde(rename = "historyId")]
    pub history_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GmailPayload {
    #[serde(rename = "mimeType")]
    pub mime_type: Option<String>,
    pub headers: Option<Vec<GmailHeader>>,
    pub body: Option<GmailBody>,
    pub parts: Option<Vec<GmailPayload>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GmailHeader {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct GmailBody {
    pub size: Option<u64>,
    pub data: Option<String>,
}

// --- History API response types ---

#[derive(Debug, Clone, Deserialize)]
pub struct GmailHistoryList {
    pub history: Option<Vec<GmailHistoryRecord>>,
    #[serde(rename = "nextPageToken")]
    pub next_page_token: Option<String>,
    #[serde(rename = "historyId")]
    pub history_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct GmailHistoryRecord {
    pub id: Option<String>,
    #[serde(rename = "messagesAdded")]
    pub messages_added: Option<Vec<GmailHistoryMessageEvent>>,
    #[serde(rename = "labelsAdded")]
    pub labels_added: Option<Vec<GmailHistoryLabelEvent>>,
    #[serde(rename = "labelsRemoved")]
    pub labels_removed: Option<Vec<GmailHistoryLabelEvent>>,
}

impl GmailHistoryRecord {
    /// Thread ids touched by this record (message-added or label-changed).
    pub fn touched_thread_ids(&self) -> impl Iterator<Item = &str> {
        let added = self
            .messages_added
            .as_deref()
            .unwrap_or_default()
            .iter()
            .filter_map(|e| e.message.thread_id.as_deref());
        let labeled = self
            .labels_added
            .as_deref()
            .unwrap_or_default()
            .iter()
            .chain(self.labels_removed.as_deref().unwrap_or_default())
            .filter_map(|e| e.message.thread_id.as_deref());
        added.chain(labeled)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct GmailHistoryMessageEvent {
    pub message: GmailMessageRef,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct GmailHistoryLabelEvent {
    pub message: GmailMessageRef,
    #[serde(rename = "labelIds")]
    pub label_ids: Option<Vec<String>>,
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
pub struct GmailMessageRef {
    pub id: String,
    #[serde(rename = "threadId")]
    pub thread_id: Option<String>,
}

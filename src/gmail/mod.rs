use std::collections::BTreeSet;
use std::sync::Mutex;
use std::time::Duration as StdDuration;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tokio::time::sleep;
use tracing::warn;

pub mod parse;

pub use parse::{Message, ThreadDetail};

use self::parse::{thread_from_api, GmailHistoryList, GmailProfile, GmailThread, GmailThreadList};
use crate::config::Config;

const GMAIL_API_BASE: &str = "https://gmail.googleapis.com/gmail/v1";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const CACHE_SKEW_SECONDS: i64 = 60;
const MAX_PAGE_SIZE: usize = 500;
const HISTORY_PAGE_SIZE: usize = 100;
const MAX_RATE_LIMIT_RETRIES: usize = 5;
const REDACTED_BODY_MAX_LEN: usize = 200;
const METADATA_HEADERS: &[&str] = &["From", "Subject", "Date"];

#[derive(Debug, Error)]
pub enum GmailError {
    /// Expected pre-setup state: credentials were never configured.
    #[error("gmail is not connected: {0}")]
    NotConnected(String),

    #[error("gmail authentication failed: {0}")]
    Auth(String),

    /// The change log can no longer be resumed from this marker.
    #[error("gmail history marker {0} has expired")]
    MarkerExpired(String),

    #[error("gmail thread {0} not found")]
    ThreadNotFound(String),

    #[error("gmail send rejected: {0}")]
    Send(String),

    #[error("transient gmail error: {0}")]
    Transient(String),
}

/// Read/write operations against the remote mailbox. The production
/// implementation is [`GmailGateway`]; tests inject an in-memory fake.
#[async_trait(?Send)]
pub trait MailboxGateway {
    /// Mailbox this gateway operates on ("me" or a delegated address).
    fn mailbox(&self) -> &str;

    /// Current change-sequence marker (Gmail historyId).
    async fn current_marker(&self) -> Result<String, GmailError>;

    /// Page through a thread search until `max_results` or exhaustion.
    async fn list_thread_ids(
        &self,
        query: Option<&str>,
        restrict_to_inbox: bool,
        max_results: usize,
    ) -> Result<Vec<String>, GmailError>;

    /// Tail the change log from `marker`, returning the set of inbox threads
    /// touched by message-added or label-changed events.
    async fn changed_thread_ids_since(&self, marker: &str)
        -> Result<BTreeSet<String>, GmailError>;

    async fn thread_detail(
        &self,
        thread_id: &str,
        include_bodies: bool,
    ) -> Result<ThreadDetail, GmailError>;

    async fn send_reply(
        &self,
        thread_id: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), GmailError>;
}

#[derive(Debug, Clone)]
struct GmailCredentials {
    client_id: String,
    client_secret: String,
    refresh_token: String,
}

#[derive(Debug, Clone)]
struct CachedAccessToken {
    access_token: String,
    expires_at: DateTime<Utc>,
}

impl CachedAccessToken {
    fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}

#[derive(Debug, Clone, Deserialize)]
#[allow(dead_code)]
struct OAuthTokenResponse {
    access_token: String,
    token_type: Option<String>,
    expires_in: u64,
    scope: Option<String>,
}

#[derive(Debug)]
enum ApiError {
    NotConnected(String),
    Auth(String),
    Network(String),
    Http { status: StatusCode, body: String },
}

fn map_common(err: ApiError) -> GmailError {
    match err {
        ApiError::NotConnected(m) => GmailError::NotConnected(m),
        ApiError::Auth(m) => GmailError::Auth(m),
        ApiError::Network(m) => GmailError::Transient(m),
        ApiError::Http { status, body } => match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => GmailError::Auth(format!(
                "status={} body={}",
                status,
                redact_response_body(&body)
            )),
            _ => GmailError::Transient(format!(
                "gmail api request failed: status={} body={}",
                status,
                redact_response_body(&body)
            )),
        },
    }
}

fn decode<T: DeserializeOwned>(body: &str, what: &str) -> Result<T, GmailError> {
    serde_json::from_str(body).map_err(|e| GmailError::Transient(format!("decode gmail {what}: {e}")))
}

fn redact_response_body(body: &str) -> String {
    let trimmed = body.trim();
    if trimmed.len() <= REDACTED_BODY_MAX_LEN {
        trimmed.to_string()
    } else {
        format!(
            "{}…[truncated {} bytes]",
            &trimmed[..REDACTED_BODY_MAX_LEN],
            trimmed.len()
        )
    }
}

pub struct GmailGateway {
    client: Client,
    credentials: Option<GmailCredentials>,
    token_url: String,
    api_base: String,
    mailbox: String,
    token_cache: Mutex<Option<CachedAccessToken>>,
}

impl GmailGateway {
    pub fn from_config(config: &Config) -> Self {
        let credentials = match (
            &config.gmail_client_id,
            &config.gmail_client_secret,
            &config.gmail_refresh_token,
        ) {
            (Some(client_id), Some(client_secret), Some(refresh_token)) => {
                Some(GmailCredentials {
                    client_id: client_id.clone(),
                    client_secret: client_secret.clone(),
                    refresh_token: refresh_token.clone(),
                })
            }
            _ => None,
        };

        Self {
            client: Client::new(),
            credentials,
            token_url: config
                .gmail_token_url
                .clone()
                .unwrap_or_else(|| GOOGLE_TOKEN_URL.to_string()),
            api_base: config
                .gmail_api_base
                .clone()
                .unwrap_or_else(|| GMAIL_API_BASE.to_string()),
            mailbox: config.mailbox.clone(),
            token_cache: Mutex::new(None),
        }
    }

    fn cached_token(&self) -> Option<String> {
        let cache = self.token_cache.lock().expect("token cache poisoned");
        cache
            .as_ref()
            .filter(|token| !token.is_expired())
            .map(|token| token.access_token.clone())
    }

    fn store_token(&self, token: CachedAccessToken) {
        let mut cache = self.token_cache.lock().expect("token cache poisoned");
        *cache = Some(token);
    }

    async fn access_token(&self) -> Result<String, ApiError> {
        if let Some(cached) = self.cached_token() {
            return Ok(cached);
        }

        let credentials = self.credentials.as_ref().ok_or_else(|| {
            ApiError::NotConnected(
                "gmail credentials are not configured; set MAILDESK_GMAIL_CLIENT_ID, \
                 MAILDESK_GMAIL_CLIENT_SECRET and MAILDESK_GMAIL_REFRESH_TOKEN"
                    .to_string(),
            )
        })?;

        let fresh = self.fetch_token(credentials).await?;
        let access_token = fresh.access_token.clone();
        self.store_token(fresh);
        Ok(access_token)
    }

    async fn fetch_token(
        &self,
        credentials: &GmailCredentials,
    ) -> Result<CachedAccessToken, ApiError> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("client_id", credentials.client_id.as_str()),
                ("client_secret", credentials.client_secret.as_str()),
                ("refresh_token", credentials.refresh_token.as_str()),
                ("grant_type", "refresh_token"),
            ])
            .send()
            .await
            .map_err(|e| ApiError::Network(format!("request gmail oauth token: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("read gmail token response: {e}")))?;

        if !status.is_success() {
            return Err(ApiError::Auth(format!(
                "gmail oauth token request failed: status={} body={}",
                status,
                redact_response_body(&body)
            )));
        }

        let payload: OAuthTokenResponse = serde_json::from_str(&body)
            .map_err(|e| ApiError::Auth(format!("decode gmail token response: {e}")))?;
        let expires_at = Utc::now()
            + Duration::seconds((payload.expires_in as i64).saturating_sub(CACHE_SKEW_SECONDS));

        Ok(CachedAccessToken {
            access_token: payload.access_token,
            expires_at,
        })
    }

    async fn api_get(&self, path: &str, query: &[(&str, String)]) -> Result<String, ApiError> {
        let url = format!("{}/{path}", self.api_base);
        let mut backoff_seconds = 1u64;

        for attempt in 0..=MAX_RATE_LIMIT_RETRIES {
            let token = self.access_token().await?;
            let response = self
                .client
                .get(&url)
                .query(query)
                .bearer_auth(&token)
                .header("accept", "application/json")
                .send()
                .await
                .map_err(|e| ApiError::Network(format!("gmail api request {url}: {e}")))?;

            if response.status() == StatusCode::TOO_MANY_REQUESTS {
                let retry_after_seconds = response
                    .headers()
                    .get("retry-after")
                    .and_then(|value| value.to_str().ok())
                    .and_then(|value| value.parse::<u64>().ok())
                    .unwrap_or(backoff_seconds);

                if attempt == MAX_RATE_LIMIT_RETRIES {
                    let body = response.text().await.unwrap_or_default();
                    return Err(ApiError::Http {
                        status: StatusCode::TOO_MANY_REQUESTS,
                        body,
                    });
                }

                sleep(StdDuration::from_secs(retry_after_seconds)).await;
                backoff_seconds = (backoff_seconds * 2).min(32);
                continue;
            }

            let status = response.status();
            let body = response
                .text()
                .await
                .map_err(|e| ApiError::Network(format!("read gmail api response: {e}")))?;

            if !status.is_success() {
                return Err(ApiError::Http { status, body });
            }

            return Ok(body);
        }

        Err(ApiError::Network(format!(
            "gmail api request {url} failed without response"
        )))
    }

    async fn api_post(&self, path: &str, payload: &serde_json::Value) -> Result<String, ApiError> {
        let url = format!("{}/{path}", self.api_base);
        let token = self.access_token().await?;

        let response = self
            .client
            .post(&url)
            .bearer_auth(&token)
            .json(payload)
            .send()
            .await
            .map_err(|e| ApiError::Network(format!("gmail api request {url}: {e}")))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Network(format!("read gmail api response: {e}")))?;

        if !status.is_success() {
            return Err(ApiError::Http { status, body });
        }

        Ok(body)
    }
}

/// Compose a minimal RFC822 reply for messages.send.
fn build_raw_message(to: &str, subject: &str, body: &str) -> String {
    let mime = format!(
        "To: {to}\r\nSubject: {subject}\r\nContent-Type: text/plain; charset=\"UTF-8\"\r\n\r\n{body}"
    );
    URL_SAFE_NO_PAD.encode(mime.as_bytes())
}

#[async_trait(?Send)]
impl MailboxGateway for GmailGateway {
    fn mailbox(&self) -> &str {
        &self.mailbox
    }

    async fn current_marker(&self) -> Result<String, GmailError> {
        let body = self
            .api_get(&format!("users/{}/profile", self.mailbox), &[])
            .await
            .map_err(map_common)?;
        let profile: GmailProfile = decode(&body, "profile")?;
        Ok(profile.history_id)
    }

    async fn list_thread_ids(
        &self,
        query: Option<&str>,
        restrict_to_inbox: bool,
        max_results: usize,
    ) -> Result<Vec<String>, GmailError> {
        let mut ids = Vec::new();
        let mut page_token: Option<String> = None;

        while ids.len() < max_results {
            let page_size = (max_results - ids.len()).min(MAX_PAGE_SIZE);
            let mut params: Vec<(&str, String)> = vec![("maxResults", page_size.to_string())];
            if restrict_to_inbox {
                params.push(("labelIds", "INBOX".to_string()));
            }
            if let Some(q) = query {
                params.push(("q", q.to_string()));
            }
            if let Some(pt) = &page_token {
                params.push(("pageToken", pt.clone()));
            }

            let body = self
                .api_get(&format!("users/{}/threads", self.mailbox), &params)
                .await
                .map_err(map_common)?;
            let list: GmailThreadList = decode(&body, "thread list")?;

            for stub in list.threads.unwrap_or_default() {
                ids.push(stub.id);
            }

            page_token = list.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        ids.truncate(max_results);
        Ok(ids)
    }

    async fn changed_thread_ids_since(
        &self,
        marker: &str,
    ) -> Result<BTreeSet<String>, GmailError> {
        let mut thread_ids = BTreeSet::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut params: Vec<(&str, String)> = vec![
                ("startHistoryId", marker.to_string()),
                ("maxResults", HISTORY_PAGE_SIZE.to_string()),
                ("labelId", "INBOX".to_string()),
            ];
            if let Some(pt) = &page_token {
                params.push(("pageToken", pt.clone()));
            }

            let body = match self
                .api_get(&format!("users/{}/history", self.mailbox), &params)
                .await
            {
                Ok(body) => body,
                // Gmail reports an unresumable startHistoryId as 404 (or a 400
                // naming the parameter on some deployments).
                Err(ApiError::Http { status, body })
                    if status == StatusCode::NOT_FOUND
                        || (status == StatusCode::BAD_REQUEST && body.contains("historyId")) =>
                {
                    return Err(GmailError::MarkerExpired(marker.to_string()));
                }
                Err(e) => return Err(map_common(e)),
            };

            let list: GmailHistoryList = decode(&body, "history list")?;
            for record in list.history.unwrap_or_default() {
                for thread_id in record.touched_thread_ids() {
                    thread_ids.insert(thread_id.to_string());
                }
            }

            page_token = list.next_page_token;
            if page_token.is_none() {
                break;
            }
        }

        Ok(thread_ids)
    }

    async fn thread_detail(
        &self,
        thread_id: &str,
        include_bodies: bool,
    ) -> Result<ThreadDetail, GmailError> {
        let mut params: Vec<(&str, String)> = Vec::new();
        if include_bodies {
            params.push(("format", "full".to_string()));
        } else {
            params.push(("format", "metadata".to_string()));
            for header in METADATA_HEADERS {
                params.push(("metadataHeaders", header.to_string()));
            }
        }

        let body = match self
            .api_get(
                &format!("users/{}/threads/{thread_id}", self.mailbox),
                &params,
            )
            .await
        {
            Ok(body) => body,
            Err(ApiError::Http { status, .. }) if status == StatusCode::NOT_FOUND => {
                return Err(GmailError::ThreadNotFound(thread_id.to_string()));
            }
            Err(e) => return Err(map_common(e)),
        };

        let raw: GmailThread = decode(&body, "thread detail")?;
        Ok(thread_from_api(raw))
    }

    async fn send_reply(
        &self,
        thread_id: &str,
        to: &str,
        subject: &str,
        body: &str,
    ) -> Result<(), GmailError> {
        if to.trim().is_empty() {
            return Err(GmailError::Send("missing recipient email".to_string()));
        }

        let payload = serde_json::json!({
            "raw": build_raw_message(to, subject, body),
            "threadId": thread_id,
        });

        match self
            .api_post(&format!("users/{}/messages/send", self.mailbox), &payload)
            .await
        {
            Ok(_) => Ok(()),
            Err(ApiError::Http { status, body })
                if status.is_client_error()
                    && status != StatusCode::UNAUTHORIZED
                    && status != StatusCode::FORBIDDEN =>
            {
                warn!(%thread_id, %status, "gmail rejected reply send");
                Err(GmailError::Send(format!(
                    "status={} body={}",
                    status,
                    redact_response_body(&body)
                )))
            }
            Err(e) => Err(map_common(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use reqwest::StatusCode;

    use super::{build_raw_message, map_common, ApiError, GmailError, OAuthTokenResponse};

    #[test]
    fn oauth_token_response_deserializes() {
        let payload = r#"{"access_token":"ya29.abc","token_type":"Bearer","expires_in":3600,"scope":"https://www.googleapis.com/auth/gmail.modify"}"#;
        let decoded: OAuthTokenResponse =
            serde_json::from_str(payload).expect("decode oauth token response");
        assert_eq!(decoded.access_token, "ya29.abc");
        assert_eq!(decoded.expires_in, 3600);
    }

    #[test]
    fn raw_message_round_trips_through_base64url() {
        let raw = build_raw_message("jane@example.com", "Re: Leaking tap", "On our way.");
        let decoded = URL_SAFE_NO_PAD.decode(raw).expect("decode raw message");
        let text = String::from_utf8(decoded).expect("utf8 raw message");
        assert!(text.starts_with("To: jane@example.com\r\n"));
        assert!(text.contains("Subject: Re: Leaking tap\r\n"));
        assert!(text.ends_with("\r\n\r\nOn our way."));
    }

    #[test]
    fn api_errors_map_to_taxonomy() {
        assert!(matches!(
            map_common(ApiError::NotConnected("no creds".into())),
            GmailError::NotConnected(_)
        ));
        assert!(matches!(
            map_common(ApiError::Network("timeout".into())),
            GmailError::Transient(_)
        ));
        assert!(matches!(
            map_common(ApiError::Http {
                status: StatusCode::UNAUTHORIZED,
                body: String::new()
            }),
            GmailError::Auth(_)
        ));
        assert!(matches!(
            map_common(ApiError::Http {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                body: String::new()
            }),
            GmailError::Transient(_)
        ));
    }
}

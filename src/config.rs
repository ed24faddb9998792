use std::path::PathBuf;

use anyhow::{Context, Result};

const DEFAULT_RECOVERY_WINDOW_DAYS: i64 = 30;
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";

/// Runtime settings, resolved from `MAILDESK_*` environment variables.
///
/// Gmail credentials are optional on purpose: a deployment that has never
/// completed OAuth still runs, and sync reports "not connected" instead of
/// failing hard.
#[derive(Debug, Clone)]
pub struct Config {
    pub gmail_client_id: Option<String>,
    pub gmail_client_secret: Option<String>,
    pub gmail_refresh_token: Option<String>,
    pub gmail_token_url: Option<String>,
    pub gmail_api_base: Option<String>,

    /// Mailbox to operate on: "me" unless a delegated mailbox is configured.
    pub mailbox: String,

    /// Addresses that count as "ours" for outbound classification,
    /// comma-separated in the environment, stored lowercased.
    pub my_emails: Vec<String>,

    /// Window used for bootstrap syncs and marker-expiry recovery.
    pub recovery_window_days: i64,

    pub include_archived: bool,

    pub openai_api_key: Option<String>,
    pub openai_model: String,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let my_emails = env_string("MAILDESK_MY_EMAILS")
            .map(|raw| {
                raw.split(',')
                    .map(|e| e.trim().to_ascii_lowercase())
                    .filter(|e| !e.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let recovery_window_days = env_string("MAILDESK_RECOVERY_WINDOW_DAYS")
            .map(|raw| {
                raw.parse::<i64>()
                    .with_context(|| format!("invalid MAILDESK_RECOVERY_WINDOW_DAYS '{raw}'"))
            })
            .transpose()?
            .unwrap_or(DEFAULT_RECOVERY_WINDOW_DAYS);

        Ok(Self {
            gmail_client_id: env_string("MAILDESK_GMAIL_CLIENT_ID"),
            gmail_client_secret: env_string("MAILDESK_GMAIL_CLIENT_SECRET"),
            gmail_refresh_token: env_string("MAILDESK_GMAIL_REFRESH_TOKEN"),
            gmail_token_url: env_string("MAILDESK_GMAIL_TOKEN_URL"),
            gmail_api_base: env_string("MAILDESK_GMAIL_API_BASE"),
            mailbox: env_string("MAILDESK_MAILBOX").unwrap_or_else(|| "me".to_string()),
            my_emails,
            recovery_window_days,
            include_archived: env_string("MAILDESK_SYNC_INCLUDE_ARCHIVED")
                .is_some_and(|raw| matches!(raw.as_str(), "1" | "true" | "yes")),
            openai_api_key: env_string("MAILDESK_OPENAI_API_KEY"),
            openai_model: env_string("MAILDESK_OPENAI_MODEL")
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
        })
    }

    pub fn default_db_path() -> Result<PathBuf> {
        if let Some(path) = env_string("MAILDESK_DB_PATH") {
            return Ok(PathBuf::from(path));
        }
        let home = dirs::home_dir().context("failed to determine home directory")?;
        Ok(home.join(".maildesk").join("maildesk.db"))
    }
}

fn env_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::env_string;

    #[test]
    fn env_string_filters_blank_values() {
        std::env::set_var("MAILDESK_TEST_BLANK", "   ");
        assert!(env_string("MAILDESK_TEST_BLANK").is_none());
        std::env::set_var("MAILDESK_TEST_BLANK", " value ");
        assert_eq!(env_string("MAILDESK_TEST_BLANK").as_deref(), Some("value"));
        std::env::remove_var("MAILDESK_TEST_BLANK");
    }
}

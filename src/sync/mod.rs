use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::Serialize;
use tracing::{debug, info, warn};

pub mod reconcile;

use self::reconcile::{reconcile_thread, ReconcileOptions, ReconcileOutcome};
use crate::classify::OwnAddresses;
use crate::db::Database;
use crate::gmail::{GmailError, MailboxGateway};
use crate::triage::TriageClassifier;

/// Logical key of the incremental-sync watermark in the state store.
pub const WATERMARK_KEY: &str = "gmail_history_id";

pub const DEFAULT_MAX_THREADS: usize = 500;
pub const DEFAULT_CHECK_MAX_THREADS: usize = 200;
const DEFAULT_RECOVERY_WINDOW_DAYS: i64 = 30;

#[derive(Debug, Clone)]
pub struct SyncOptions {
    pub max_threads: usize,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub incremental: bool,
    pub include_archived: bool,
    pub awaiting_only: bool,
    pub auto_classify: bool,
    pub recovery_window_days: i64,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            max_threads: DEFAULT_MAX_THREADS,
            start: None,
            end: None,
            incremental: true,
            include_archived: false,
            awaiting_only: true,
            auto_classify: false,
            recovery_window_days: DEFAULT_RECOVERY_WINDOW_DAYS,
        }
    }
}

/// Which thread-id source the run ended up using.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncMode {
    /// Explicit date-bounded search.
    Range,
    /// Change-log tailing from the stored watermark.
    Incremental,
    /// Bounded recent window: first-time bootstrap or marker-expiry fallback.
    Window,
}

impl std::fmt::Display for SyncMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Range => write!(f, "range"),
            Self::Incremental => write!(f, "incremental"),
            Self::Window => write!(f, "window"),
        }
    }
}

/// The sole observable contract of a sync run: expected failures land in
/// `ok`/`error`, never as errors raised to the caller.
#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mode: Option<SyncMode>,
    pub threads_seen: usize,
    pub upserted: usize,
    pub skipped: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watermark: Option<String>,
    pub hit_limit: bool,
    pub mailbox: String,
    pub include_archived: bool,
    pub awaiting_only: bool,
    pub auto_classify: bool,
}

impl SyncSummary {
    fn failure(error: String, mailbox: &str, options: &SyncOptions) -> Self {
        Self {
            ok: false,
            error: Some(error),
            mode: None,
            threads_seen: 0,
            upserted: 0,
            skipped: 0,
            watermark: None,
            hit_limit: false,
            mailbox: mailbox.to_string(),
            include_archived: options.include_archived,
            awaiting_only: options.awaiting_only,
            auto_classify: options.auto_classify,
        }
    }
}

/// Reconcile the inbox into the ticket store.
///
/// Strategy order: explicit date range, then change-log tailing from the
/// stored watermark, then a bounded recent window. All per-thread upserts and
/// the watermark advance commit together at the end of the run; a failed run
/// leaves the previous watermark and committed ticket state untouched.
pub async fn sync_inbox_threads(
    gateway: &dyn MailboxGateway,
    db: &Database,
    triage: &dyn TriageClassifier,
    own: &OwnAddresses,
    options: &SyncOptions,
) -> Result<SyncSummary> {
    let mailbox = gateway.mailbox().to_string();
    let range_mode = options.start.is_some() || options.end.is_some();

    // The marker is read before listing so that events landing mid-run fall
    // after the stored watermark and are replayed by the next incremental run.
    let start_marker = if range_mode {
        None
    } else {
        match gateway.current_marker().await {
            Ok(marker) => Some(marker),
            Err(error @ (GmailError::NotConnected(_) | GmailError::Auth(_))) => {
                info!(%error, "gmail sync skipped");
                return Ok(SyncSummary::failure(error.to_string(), &mailbox, options));
            }
            Err(error) => {
                warn!(%error, "gmail sync aborted before listing");
                return Ok(SyncSummary::failure(error.to_string(), &mailbox, options));
            }
        }
    };

    let stored_watermark = db
        .get_sync_state(WATERMARK_KEY)?
        .and_then(|state| state.value)
        .filter(|value| !value.trim().is_empty());

    // Request one past the cap so hit_limit can be reported accurately.
    let over_cap = options.max_threads.saturating_add(1);

    let (mut thread_ids, mode) = if range_mode {
        let query = build_query(options.start, options.end, options.include_archived);
        match gateway
            .list_thread_ids(query.as_deref(), !options.include_archived, over_cap)
            .await
        {
            Ok(ids) => (ids, SyncMode::Range),
            Err(error) => {
                warn!(%error, "range listing failed");
                return Ok(SyncSummary::failure(error.to_string(), &mailbox, options));
            }
        }
    } else if options.incremental && stored_watermark.is_some() {
        let marker = stored_watermark.as_deref().unwrap_or_default();
        match gateway.changed_thread_ids_since(marker).await {
            Ok(ids) => (ids.into_iter().collect(), SyncMode::Incremental),
            Err(GmailError::MarkerExpired(_)) => {
                warn!(
                    window_days = options.recovery_window_days,
                    "gmail history marker expired, falling back to a bounded window"
                );
                match list_recent_window(gateway, options, over_cap).await {
                    Ok(ids) => (ids, SyncMode::Window),
                    Err(error) => {
                        warn!(%error, "window fallback listing failed");
                        return Ok(SyncSummary::failure(error.to_string(), &mailbox, options));
                    }
                }
            }
            Err(error) => {
                warn!(%error, "incremental listing failed");
                return Ok(SyncSummary::failure(error.to_string(), &mailbox, options));
            }
        }
    } else {
        match list_recent_window(gateway, options, over_cap).await {
            Ok(ids) => (ids, SyncMode::Window),
            Err(error) => {
                warn!(%error, "bootstrap window listing failed");
                return Ok(SyncSummary::failure(error.to_string(), &mailbox, options));
            }
        }
    };

    let hit_limit = thread_ids.len() > options.max_threads;
    if hit_limit {
        thread_ids.truncate(options.max_threads);
    }

    let reconcile_options = ReconcileOptions {
        awaiting_only: options.awaiting_only,
        auto_classify: options.auto_classify,
    };

    let tx = db
        .conn()
        .unchecked_transaction()
        .context("begin sync transaction")?;

    let mut upserted = 0usize;
    let mut skipped = 0usize;

    for thread_id in &thread_ids {
        let detail = match gateway.thread_detail(thread_id, options.auto_classify).await {
            Ok(detail) => detail,
            Err(GmailError::ThreadNotFound(_)) => {
                debug!(%thread_id, "thread vanished between listing and fetch");
                skipped += 1;
                continue;
            }
            Err(GmailError::Transient(message)) => {
                warn!(%thread_id, %message, "skipping thread after transient fetch failure");
                skipped += 1;
                continue;
            }
            Err(error) => {
                drop(tx);
                warn!(%thread_id, %error, "sync aborted mid-run, rolling back");
                return Ok(SyncSummary::failure(error.to_string(), &mailbox, options));
            }
        };

        match reconcile_thread(db, triage, own, &detail, &reconcile_options).await? {
            ReconcileOutcome::Upserted => upserted += 1,
            ReconcileOutcome::Skipped(reason) => {
                debug!(%thread_id, ?reason, "thread skipped");
                skipped += 1;
            }
        }
    }

    let watermark = if let Some(marker) = &start_marker {
        db.set_sync_state(WATERMARK_KEY, marker)?;
        Some(marker.clone())
    } else {
        None
    };

    tx.commit().context("commit sync run")?;

    info!(
        ?mode,
        threads = thread_ids.len(),
        upserted,
        skipped,
        hit_limit,
        "sync run complete"
    );

    Ok(SyncSummary {
        ok: true,
        error: None,
        mode: Some(mode),
        threads_seen: thread_ids.len(),
        upserted,
        skipped,
        watermark,
        hit_limit,
        mailbox,
        include_archived: options.include_archived,
        awaiting_only: options.awaiting_only,
        auto_classify: options.auto_classify,
    })
}

async fn list_recent_window(
    gateway: &dyn MailboxGateway,
    options: &SyncOptions,
    max_results: usize,
) -> Result<Vec<String>, GmailError> {
    let start =
        chrono::Utc::now().date_naive() - chrono::Duration::days(options.recovery_window_days);
    let query = build_query(Some(start), None, options.include_archived);
    gateway
        .list_thread_ids(query.as_deref(), !options.include_archived, max_results)
        .await
}

/// Gmail search query for a date-bounded listing. The end date is inclusive:
/// Gmail's `before:` is exclusive, so the day after is used.
fn build_query(
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    include_archived: bool,
) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(start) = start {
        parts.push(format!("after:{}", start.format("%Y/%m/%d")));
    }
    if let Some(end) = end {
        if let Some(next_day) = end.succ_opt() {
            parts.push(format!("before:{}", next_day.format("%Y/%m/%d")));
        }
    }
    if include_archived {
        parts.push("in:anywhere".to_string());
    }

    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" "))
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::{build_query, SyncOptions};

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn query_bounds_are_inclusive_of_end_date() {
        let q = build_query(Some(date(2026, 1, 1)), Some(date(2026, 1, 31)), false);
        assert_eq!(q.as_deref(), Some("after:2026/01/01 before:2026/02/01"));
    }

    #[test]
    fn query_with_archived_search_scope() {
        let q = build_query(Some(date(2026, 1, 1)), None, true);
        assert_eq!(q.as_deref(), Some("after:2026/01/01 in:anywhere"));
    }

    #[test]
    fn empty_query_when_no_bounds() {
        assert_eq!(build_query(None, None, false), None);
    }

    #[test]
    fn default_options_match_manual_sync_defaults() {
        let options = SyncOptions::default();
        assert_eq!(options.max_threads, 500);
        assert!(options.incremental);
        assert!(options.awaiting_only);
        assert!(!options.auto_classify);
        assert!(!options.include_archived);
        assert_eq!(options.recovery_window_days, 30);
    }
}

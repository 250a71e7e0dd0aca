use chapter_tickets::config::RosterConfig;
use chapter_tickets::error::AppError;
use chapter_tickets::workflows::authorization::{
    BroadcastNotifier, InMemoryDirectory, RequestEvent,
};
use chapter_tickets::workflows::roster::{self, RosterImport};
use chrono::{DateTime, FixedOffset, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn};

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

/// Build the match and member directory from the configured roster exports.
///
/// Either file may be absent; the service then starts with an empty side.
pub(crate) fn load_directory(
    config: &RosterConfig,
) -> Result<(InMemoryDirectory, RosterImport), AppError> {
    let matches = match &config.matches_csv {
        Some(path) => roster::load_matches(path)?,
        None => {
            warn!("ROSTER_MATCHES_CSV not set; no matches scheduled");
            Vec::new()
        }
    };
    let members = match &config.members_csv {
        Some(path) => roster::load_members(path)?,
        None => {
            warn!("ROSTER_MEMBERS_CSV not set; no members enrolled");
            Vec::new()
        }
    };

    let mut directory = InMemoryDirectory::new();
    let imported = roster::import_into(&mut directory, matches, members)?;
    Ok((directory, imported))
}

/// Log every request event until the notifier is dropped.
pub(crate) fn spawn_event_log(notifier: &BroadcastNotifier) -> tokio::task::JoinHandle<()> {
    let mut receiver = notifier.subscribe();
    tokio::spawn(async move {
        loop {
            match receiver.recv().await {
                Ok(RequestEvent::RequestCreated { request }) => info!(
                    request_id = %request.id,
                    match_id = %request.match_id,
                    member_id = %request.member_id,
                    "request created"
                ),
                Ok(RequestEvent::StatusChanged {
                    request_id,
                    from,
                    to,
                    ..
                }) => info!(%request_id, %from, %to, "request status changed"),
                Ok(RequestEvent::BatchCommitted {
                    match_id,
                    chapter,
                    request_ids,
                }) => info!(%match_id, %chapter, requests = request_ids.len(), "batch committed"),
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "request event log fell behind")
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

pub(crate) fn parse_instant(raw: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|instant| instant.with_timezone(&Utc))
        .map_err(|err| format!("failed to parse '{raw}' as an RFC 3339 timestamp ({err})"))
}

pub(crate) fn parse_offset(raw: &str) -> Result<FixedOffset, String> {
    raw.trim()
        .parse::<FixedOffset>()
        .map_err(|err| format!("failed to parse '{raw}' as a UTC offset like -03:00 ({err})"))
}

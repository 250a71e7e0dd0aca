//! Durable request collection with the one-active-request-per-member invariant.

mod file;
mod ledger;
mod memory;

use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::domain::{
    join_member_ids, AuthorizationRequest, MatchId, MemberId, NewRequest, RequestId,
    RequestStatus,
};

pub use file::JsonFileRequestStore;
pub use memory::InMemoryRequestStore;

/// Storage abstraction so the coordinator can be exercised in isolation.
///
/// Implementations must make the uniqueness check and the insert of a whole
/// batch a single atomic step with respect to concurrent callers, and must
/// only serialize callers whose batches share a `(match, member)` key.
pub trait RequestStore: Send + Sync {
    /// Requests for a match ordered by creation time, optionally for one chapter.
    fn list(
        &self,
        match_id: &MatchId,
        chapter: Option<&str>,
    ) -> Result<Vec<AuthorizationRequest>, StoreError>;

    fn fetch(&self, id: &RequestId) -> Result<Option<AuthorizationRequest>, StoreError>;

    /// Insert every request or none of them.
    ///
    /// With a ticket, nothing becomes visible unless [`CommitTicket::try_publish`]
    /// succeeds right before the change is applied; otherwise the store undoes
    /// any durable trace and returns [`StoreError::DeadlineExceeded`].
    fn create_batch(
        &self,
        batch: Vec<NewRequest>,
        ticket: Option<&CommitTicket>,
    ) -> Result<Vec<AuthorizationRequest>, StoreError>;

    fn create(&self, request: NewRequest) -> Result<AuthorizationRequest, StoreError> {
        self.create_batch(vec![request], None)?
            .pop()
            .ok_or_else(|| StoreError::Unavailable("insert returned no record".to_string()))
    }

    /// Move a request to `status`, returning the status it held before and the updated record.
    fn update_status(
        &self,
        id: &RequestId,
        status: RequestStatus,
        ticket: Option<&CommitTicket>,
    ) -> Result<(RequestStatus, AuthorizationRequest), StoreError>;
}

const TICKET_OPEN: u8 = 0;
const TICKET_PUBLISHED: u8 = 1;
const TICKET_ABANDONED: u8 = 2;

/// Deadline shared by a caller waiting on a commit and the store performing it.
///
/// Exactly one side settles the commit: the store by publishing it before the
/// deadline, or the caller by abandoning it. Once abandoned, the store must
/// not make the change visible.
#[derive(Debug, Clone)]
pub struct CommitTicket {
    deadline: Instant,
    state: Arc<AtomicU8>,
}

impl CommitTicket {
    pub fn new(deadline: Instant) -> Self {
        Self {
            deadline,
            state: Arc::new(AtomicU8::new(TICKET_OPEN)),
        }
    }

    pub fn within(timeout: Duration) -> Self {
        Self::new(Instant::now() + timeout)
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// Store side: claim the right to make the change visible.
    ///
    /// Fails once the deadline has passed or the caller abandoned the commit.
    pub fn try_publish(&self) -> bool {
        if Instant::now() >= self.deadline {
            self.abandon();
            return false;
        }
        self.state
            .compare_exchange(
                TICKET_OPEN,
                TICKET_PUBLISHED,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Caller side: stop waiting. Returns false when the store already published.
    pub fn abandon(&self) -> bool {
        match self.state.compare_exchange(
            TICKET_OPEN,
            TICKET_ABANDONED,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => true,
            Err(current) => current == TICKET_ABANDONED,
        }
    }
}

/// Error enumeration for store failures.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("authorization already requested for member(s): {}", join_member_ids(.member_ids))]
    Duplicate { member_ids: Vec<MemberId> },
    #[error("request {id} cannot move from {from} to {to}")]
    IllegalTransition {
        id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
    },
    #[error("request {0} not found")]
    NotFound(RequestId),
    #[error("request store did not accept the commit before its deadline")]
    DeadlineExceeded,
    #[error("failed to persist requests to {}: {source}", .path.display())]
    Persist {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("stored requests at {} are unreadable: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("request store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    /// Infrastructure failures a caller may retry without changing its input.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            StoreError::DeadlineExceeded | StoreError::Persist { .. } | StoreError::Unavailable(_)
        )
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ticket_settles_exactly_once() {
        let published = CommitTicket::within(Duration::from_secs(5));
        assert!(published.try_publish());
        assert!(!published.abandon(), "a published commit cannot be abandoned");

        let abandoned = CommitTicket::within(Duration::from_secs(5));
        assert!(abandoned.abandon());
        assert!(!abandoned.try_publish());
        assert!(abandoned.abandon());
    }

    #[test]
    fn expired_ticket_refuses_to_publish() {
        let ticket = CommitTicket::new(Instant::now());
        assert!(!ticket.try_publish());
        assert!(ticket.abandon());
    }
}

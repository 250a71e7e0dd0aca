use super::super::domain::{AuthorizationRequest, MatchId, NewRequest, RequestId, RequestStatus};
use super::ledger::{SharedLedger, Volatile};
use super::{CommitTicket, RequestStore, StoreError};

/// Process-local store. Requests are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryRequestStore {
    ledger: SharedLedger,
}

impl InMemoryRequestStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RequestStore for InMemoryRequestStore {
    fn list(
        &self,
        match_id: &MatchId,
        chapter: Option<&str>,
    ) -> Result<Vec<AuthorizationRequest>, StoreError> {
        self.ledger.read(|ledger| ledger.list(match_id, chapter))
    }

    fn fetch(&self, id: &RequestId) -> Result<Option<AuthorizationRequest>, StoreError> {
        self.ledger.read(|ledger| ledger.fetch(id))
    }

    fn create_batch(
        &self,
        batch: Vec<NewRequest>,
        ticket: Option<&CommitTicket>,
    ) -> Result<Vec<AuthorizationRequest>, StoreError> {
        self.ledger.insert_batch(&Volatile, batch, ticket)
    }

    fn update_status(
        &self,
        id: &RequestId,
        status: RequestStatus,
        ticket: Option<&CommitTicket>,
    ) -> Result<(RequestStatus, AuthorizationRequest), StoreError> {
        self.ledger.transition(&Volatile, id, status, ticket)
    }
}

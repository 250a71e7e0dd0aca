use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use super::domain::{AuthorizationRequest, MatchId, RequestStatus};
use super::store::{RequestStore, StoreError};

/// Read-only dashboard aggregation over the request store.
pub struct StatusProjector<S> {
    store: Arc<S>,
}

impl<S: RequestStore> StatusProjector<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    pub fn summarize(
        &self,
        match_id: &MatchId,
        chapter: Option<&str>,
    ) -> Result<StatusSummary, StoreError> {
        let requests = self.store.list(match_id, chapter)?;
        Ok(StatusSummary::from_requests(match_id, chapter, &requests))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatusSummary {
    pub match_id: MatchId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
    /// Every status is present, zero when unused.
    pub count_by_status: BTreeMap<RequestStatus, usize>,
    pub total_submitted: usize,
}

impl StatusSummary {
    pub fn from_requests(
        match_id: &MatchId,
        chapter: Option<&str>,
        requests: &[AuthorizationRequest],
    ) -> Self {
        let mut count_by_status: BTreeMap<RequestStatus, usize> = RequestStatus::ordered()
            .into_iter()
            .map(|status| (status, 0))
            .collect();

        for request in requests {
            *count_by_status.entry(request.status).or_default() += 1;
        }

        Self {
            match_id: match_id.clone(),
            chapter: chapter.map(str::to_string),
            count_by_status,
            total_submitted: requests.len(),
        }
    }

    pub fn count(&self, status: RequestStatus) -> usize {
        self.count_by_status.get(&status).copied().unwrap_or(0)
    }
}

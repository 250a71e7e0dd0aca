use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::directory::{DirectoryError, MatchDirectory, MemberDirectory};
use super::domain::{
    join_member_ids, AuthorizationRequest, Match, MatchId, Member, MemberId, NewRequest,
    RequestId, RequestStatus,
};
use super::draft::{eligible_candidates, DraftStaging};
use super::notify::{NotificationSink, RequestEvent};
use super::projector::{StatusProjector, StatusSummary};
use super::store::{CommitTicket, RequestStore, StoreError};
use super::window::{WindowEvaluator, WindowState};

const DEFAULT_COMMIT_TIMEOUT: Duration = Duration::from_secs(2);

/// A chapter's staged selection for one match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Submission {
    pub match_id: MatchId,
    pub chapter: String,
    pub member_ids: Vec<MemberId>,
}

/// Outcome of a committed batch. The caller's draft should be cleared.
#[derive(Debug, Clone, Serialize)]
pub struct SubmissionReceipt {
    pub match_id: MatchId,
    pub chapter: String,
    pub requests: Vec<AuthorizationRequest>,
}

/// Input problems detected before anything is written.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("no members staged for submission")]
    EmptyBatch,
    #[error("match {0} is not scheduled")]
    UnknownMatch(MatchId),
    #[error("member(s) not enrolled with chapter {chapter}: {}", join_member_ids(.member_ids))]
    UnknownMembers {
        chapter: String,
        member_ids: Vec<MemberId>,
    },
    #[error("member(s) without current dues: {}", join_member_ids(.member_ids))]
    IneligibleMembers { member_ids: Vec<MemberId> },
    #[error("member(s) staged more than once: {}", join_member_ids(.member_ids))]
    RepeatedMembers { member_ids: Vec<MemberId> },
}

/// Error raised by the submission coordinator.
#[derive(Debug, thiserror::Error)]
pub enum SubmissionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("authorization window for match {match_id} is not open")]
    WindowClosed { match_id: MatchId },
    #[error("match {match_id} already has active requests for: {}", join_member_ids(.member_ids))]
    Duplicate {
        match_id: MatchId,
        member_ids: Vec<MemberId>,
    },
    #[error("request {id} cannot move from {from} to {to}")]
    Transition {
        id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
    },
    #[error("request {0} not found")]
    NotFound(RequestId),
    #[error(transparent)]
    Storage(StoreError),
    #[error(transparent)]
    Directory(#[from] DirectoryError),
}

impl SubmissionError {
    /// Infrastructure failures the caller may retry unchanged.
    pub fn is_retryable(&self) -> bool {
        match self {
            SubmissionError::Storage(err) => err.is_retryable(),
            SubmissionError::Directory(_) => true,
            _ => false,
        }
    }
}

impl From<StoreError> for SubmissionError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::IllegalTransition { id, from, to } => Self::Transition { id, from, to },
            StoreError::NotFound(id) => Self::NotFound(id),
            other => Self::Storage(other),
        }
    }
}

/// Validates staged selections against the window and roster and commits them atomically.
pub struct SubmissionCoordinator<S, N> {
    store: Arc<S>,
    notifier: Arc<N>,
    matches: Arc<dyn MatchDirectory>,
    members: Arc<dyn MemberDirectory>,
    evaluator: WindowEvaluator,
    commit_timeout: Duration,
}

impl<S, N> SubmissionCoordinator<S, N>
where
    S: RequestStore + 'static,
    N: NotificationSink + 'static,
{
    pub fn new(
        store: Arc<S>,
        notifier: Arc<N>,
        matches: Arc<dyn MatchDirectory>,
        members: Arc<dyn MemberDirectory>,
        evaluator: WindowEvaluator,
    ) -> Self {
        Self {
            store,
            notifier,
            matches,
            members,
            evaluator,
            commit_timeout: DEFAULT_COMMIT_TIMEOUT,
        }
    }

    pub fn with_commit_timeout(mut self, commit_timeout: Duration) -> Self {
        self.commit_timeout = commit_timeout;
        self
    }

    pub fn projector(&self) -> StatusProjector<S> {
        StatusProjector::new(Arc::clone(&self.store))
    }

    /// Commit a chapter's staged members as pending requests, all or none.
    ///
    /// Everything before the commit may be abandoned by dropping the future.
    /// The commit runs on a blocking task bounded by the commit timeout: a store
    /// that has not published by then is told to abandon the batch and the
    /// caller gets a retryable [`StoreError::DeadlineExceeded`].
    pub async fn submit(
        &self,
        submission: Submission,
        now: DateTime<Utc>,
    ) -> Result<SubmissionReceipt, SubmissionError> {
        let Submission {
            match_id,
            chapter,
            member_ids,
        } = submission;

        if member_ids.is_empty() {
            return Err(ValidationError::EmptyBatch.into());
        }

        let fixture = self
            .matches
            .get(&match_id)?
            .ok_or_else(|| ValidationError::UnknownMatch(match_id.clone()))?;

        if !self.evaluator.is_active(&fixture, now) {
            debug!(%match_id, %chapter, "submission refused: authorization window not open");
            return Err(SubmissionError::WindowClosed { match_id });
        }

        let batch = self.build_batch(&match_id, &chapter, &member_ids, now)?;

        let created = match self
            .on_store(move |store, ticket| store.create_batch(batch, Some(ticket)))
            .await
        {
            Ok(created) => created,
            Err(StoreError::Duplicate { member_ids }) => {
                info!(
                    %match_id,
                    %chapter,
                    conflicts = member_ids.len(),
                    "submission rejected: members already requested"
                );
                return Err(SubmissionError::Duplicate {
                    match_id,
                    member_ids,
                });
            }
            Err(other) => return Err(other.into()),
        };

        info!(%match_id, %chapter, created = created.len(), "authorization batch committed");
        self.announce_batch(&match_id, &chapter, &created);

        Ok(SubmissionReceipt {
            match_id,
            chapter,
            requests: created,
        })
    }

    /// Submit the draft's selection, clearing it only when the batch commits.
    pub async fn submit_draft(
        &self,
        draft: &mut DraftStaging,
        chapter: &str,
        now: DateTime<Utc>,
    ) -> Result<SubmissionReceipt, SubmissionError> {
        debug!(
            actor = draft.actor(),
            match_id = %draft.match_id(),
            staged = draft.len(),
            "submitting draft"
        );
        let submission = Submission {
            match_id: draft.match_id().clone(),
            chapter: chapter.to_string(),
            member_ids: draft.selected().to_vec(),
        };
        let receipt = self.submit(submission, now).await?;
        draft.clear();
        Ok(receipt)
    }

    /// Apply a status transition and report it to the notification sink.
    pub async fn update_status(
        &self,
        id: &RequestId,
        status: RequestStatus,
    ) -> Result<AuthorizationRequest, SubmissionError> {
        let request_id = id.clone();
        let (from, updated) = self
            .on_store(move |store, ticket| store.update_status(&request_id, status, Some(ticket)))
            .await?;

        info!(request_id = %updated.id, %from, to = %updated.status, "request status changed");
        self.notify(RequestEvent::StatusChanged {
            request_id: updated.id.clone(),
            match_id: updated.match_id.clone(),
            from,
            to: updated.status,
        });

        Ok(updated)
    }

    pub async fn get(&self, id: &RequestId) -> Result<AuthorizationRequest, SubmissionError> {
        let request_id = id.clone();
        self.on_store(move |store, _| store.fetch(&request_id))
            .await?
            .ok_or_else(|| SubmissionError::NotFound(id.clone()))
    }

    pub async fn requests(
        &self,
        match_id: &MatchId,
        chapter: Option<&str>,
    ) -> Result<Vec<AuthorizationRequest>, SubmissionError> {
        let match_id = match_id.clone();
        let chapter = chapter.map(str::to_string);
        Ok(self
            .on_store(move |store, _| store.list(&match_id, chapter.as_deref()))
            .await?)
    }

    /// Per-status counts for a match, optionally for one chapter.
    pub async fn summary(
        &self,
        match_id: &MatchId,
        chapter: Option<&str>,
    ) -> Result<StatusSummary, SubmissionError> {
        let projector = self.projector();
        let match_id = match_id.clone();
        let chapter = chapter.map(str::to_string);
        Ok(self
            .on_store(move |_, _| projector.summarize(&match_id, chapter.as_deref()))
            .await?)
    }

    /// Current-dues members of `chapter` without an active request for the match.
    pub async fn candidates(
        &self,
        match_id: &MatchId,
        chapter: &str,
    ) -> Result<Vec<Member>, SubmissionError> {
        if self.matches.get(match_id)?.is_none() {
            return Err(ValidationError::UnknownMatch(match_id.clone()).into());
        }

        let roster = self.members.list_by_chapter(chapter)?;
        let existing = self.requests(match_id, None).await?;
        Ok(eligible_candidates(match_id, &roster, &existing)
            .into_iter()
            .cloned()
            .collect())
    }

    /// All matches whose window is open at `now`.
    pub fn open_matches(&self, now: DateTime<Utc>) -> Result<Vec<Match>, SubmissionError> {
        let fixtures = self.matches.list()?;
        let open: Vec<Match> = self
            .evaluator
            .active_matches(&fixtures, now)
            .into_iter()
            .cloned()
            .collect();

        if open.len() > 1 {
            warn!(open = open.len(), "more than one authorization window is open");
        }
        Ok(open)
    }

    pub fn window_states(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Vec<(Match, WindowState)>, SubmissionError> {
        Ok(self
            .matches
            .list()?
            .into_iter()
            .map(|fixture| {
                let state = self.evaluator.state(&fixture, now);
                (fixture, state)
            })
            .collect())
    }

    fn build_batch(
        &self,
        match_id: &MatchId,
        chapter: &str,
        member_ids: &[MemberId],
        now: DateTime<Utc>,
    ) -> Result<Vec<NewRequest>, SubmissionError> {
        let mut seen = HashSet::new();
        let repeated: Vec<MemberId> = member_ids
            .iter()
            .filter(|id| !seen.insert(*id))
            .cloned()
            .collect();
        if !repeated.is_empty() {
            return Err(ValidationError::RepeatedMembers {
                member_ids: repeated,
            }
            .into());
        }

        let roster = self.members.list_by_chapter(chapter)?;
        let by_id: HashMap<&MemberId, &Member> =
            roster.iter().map(|member| (&member.id, member)).collect();

        let unknown: Vec<MemberId> = member_ids
            .iter()
            .filter(|id| !by_id.contains_key(id))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(ValidationError::UnknownMembers {
                chapter: chapter.to_string(),
                member_ids: unknown,
            }
            .into());
        }

        let ineligible: Vec<MemberId> = member_ids
            .iter()
            .filter(|id| by_id.get(id).is_some_and(|member| !member.is_current()))
            .cloned()
            .collect();
        if !ineligible.is_empty() {
            return Err(ValidationError::IneligibleMembers {
                member_ids: ineligible,
            }
            .into());
        }

        // Snapshots are taken here, in staged order; later roster edits never reach them.
        Ok(member_ids
            .iter()
            .filter_map(|id| by_id.get(id))
            .map(|member| NewRequest::for_member(match_id, member, now))
            .collect())
    }

    /// Run store work on a blocking thread, bounded by the commit timeout.
    ///
    /// On timeout the ticket is abandoned so a late store cannot publish; if the
    /// store published first, its result is awaited and returned instead.
    async fn on_store<T, F>(&self, work: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&S, &CommitTicket) -> Result<T, StoreError> + Send + 'static,
    {
        let store = Arc::clone(&self.store);
        let ticket = CommitTicket::within(self.commit_timeout);
        let task_ticket = ticket.clone();
        let mut task = tokio::task::spawn_blocking(move || work(&*store, &task_ticket));

        let joined = match tokio::time::timeout(self.commit_timeout, &mut task).await {
            Ok(joined) => joined,
            Err(_) if ticket.abandon() => {
                warn!(
                    timeout_ms = self.commit_timeout.as_millis() as u64,
                    "request store did not answer before the commit deadline"
                );
                return Err(StoreError::DeadlineExceeded);
            }
            Err(_) => task.await,
        };

        joined.map_err(|err| StoreError::Unavailable(format!("store task failed: {err}")))?
    }

    fn announce_batch(&self, match_id: &MatchId, chapter: &str, created: &[AuthorizationRequest]) {
        for request in created {
            self.notify(RequestEvent::RequestCreated {
                request: request.clone(),
            });
        }
        self.notify(RequestEvent::BatchCommitted {
            match_id: match_id.clone(),
            chapter: chapter.to_string(),
            request_ids: created.iter().map(|request| request.id.clone()).collect(),
        });
    }

    fn notify(&self, event: RequestEvent) {
        if let Err(err) = self.notifier.publish(event) {
            warn!(error = %err, "request notification dropped");
        }
    }
}

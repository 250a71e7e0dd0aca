use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::response::Response;
use chrono::{DateTime, TimeZone, Utc};
use serde_json::Value;

use crate::workflows::authorization::directory::InMemoryDirectory;
use crate::workflows::authorization::domain::{
    AuthorizationRequest, AuthorizationWindow, DuesStatus, Match, MatchId, Member, MemberId,
    NewRequest, RequestId, RequestStatus,
};
use crate::workflows::authorization::notify::{
    NotificationError, NotificationSink, RequestEvent,
};
use crate::workflows::authorization::store::{
    CommitTicket, InMemoryRequestStore, RequestStore, StoreError,
};
use crate::workflows::authorization::submission::SubmissionCoordinator;
use crate::workflows::authorization::window::WindowEvaluator;

pub(super) const CHAPTER: &str = "Rosario";
pub(super) const OTHER_CHAPTER: &str = "Cordoba";

pub(super) fn at(day: u32, month: u32, hour: u32, minute: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, month, day, hour, minute, 0)
        .single()
        .expect("valid instant")
}

/// 12/03/2026 09:00, inside the fixture window.
pub(super) fn during_window() -> DateTime<Utc> {
    at(12, 3, 9, 0)
}

/// 15/03/2026 00:00, after the fixture window closed.
pub(super) fn after_window() -> DateTime<Utc> {
    at(15, 3, 0, 0)
}

pub(super) fn match_id() -> MatchId {
    MatchId("m-2026-03-15".to_string())
}

pub(super) fn member_id(id: &str) -> MemberId {
    MemberId(id.to_string())
}

pub(super) fn home_match() -> Match {
    Match {
        id: match_id(),
        opponent: "Brazil".to_string(),
        competition: "Qualifiers".to_string(),
        kickoff: None,
        venue: "Monumental".to_string(),
        is_home: true,
        is_neutral: false,
        is_suspended: false,
        window: AuthorizationWindow::new("10/03/2026", "10:00", "14/03/2026", "20:00"),
    }
}

pub(super) fn fixture_with_window(id: &str, window: AuthorizationWindow) -> Match {
    Match {
        id: MatchId(id.to_string()),
        window,
        ..home_match()
    }
}

pub(super) fn member(id: &str, chapter: &str, dues: DuesStatus) -> Member {
    Member {
        id: member_id(id),
        chapter: chapter.to_string(),
        name: format!("Member {id}"),
        national_id: format!("DNI-{id}"),
        category: "adult".to_string(),
        dues,
    }
}

/// One home match plus a Rosario roster (a, b current; c overdue) and one Cordoba member.
pub(super) fn directory() -> InMemoryDirectory {
    let mut directory = InMemoryDirectory::new();
    directory.schedule(home_match()).expect("schedule match");
    for member in [
        member("a", CHAPTER, DuesStatus::Current),
        member("b", CHAPTER, DuesStatus::Current),
        member("c", CHAPTER, DuesStatus::Overdue),
        member("d", OTHER_CHAPTER, DuesStatus::Current),
    ] {
        directory.enroll(member).expect("enroll member");
    }
    directory
}

pub(super) fn new_request(id: &str) -> NewRequest {
    NewRequest::for_member(
        &match_id(),
        &member(id, CHAPTER, DuesStatus::Current),
        during_window(),
    )
}

pub(super) type MemoryCoordinator = SubmissionCoordinator<InMemoryRequestStore, MemoryEvents>;

pub(super) fn build_coordinator() -> (
    Arc<InMemoryRequestStore>,
    Arc<MemoryEvents>,
    MemoryCoordinator,
) {
    build_coordinator_with(directory())
}

pub(super) fn build_coordinator_with(
    directory: InMemoryDirectory,
) -> (
    Arc<InMemoryRequestStore>,
    Arc<MemoryEvents>,
    MemoryCoordinator,
) {
    let store = Arc::new(InMemoryRequestStore::new());
    let events = Arc::new(MemoryEvents::default());
    let directory = Arc::new(directory);
    let coordinator = SubmissionCoordinator::new(
        store.clone(),
        events.clone(),
        directory.clone(),
        directory,
        WindowEvaluator::utc(),
    );
    (store, events, coordinator)
}

#[derive(Default)]
pub(super) struct MemoryEvents {
    events: Mutex<Vec<RequestEvent>>,
}

impl MemoryEvents {
    pub(super) fn events(&self) -> Vec<RequestEvent> {
        self.events.lock().expect("events lock").clone()
    }
}

impl NotificationSink for MemoryEvents {
    fn publish(&self, event: RequestEvent) -> Result<(), NotificationError> {
        self.events.lock().expect("events lock").push(event);
        Ok(())
    }
}

pub(super) struct FailingNotifier;

impl NotificationSink for FailingNotifier {
    fn publish(&self, _event: RequestEvent) -> Result<(), NotificationError> {
        Err(NotificationError::Transport("webhook offline".to_string()))
    }
}

pub(super) struct UnavailableStore;

impl RequestStore for UnavailableStore {
    fn list(
        &self,
        _match_id: &MatchId,
        _chapter: Option<&str>,
    ) -> Result<Vec<AuthorizationRequest>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn fetch(&self, _id: &RequestId) -> Result<Option<AuthorizationRequest>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn create_batch(
        &self,
        _batch: Vec<NewRequest>,
        _ticket: Option<&CommitTicket>,
    ) -> Result<Vec<AuthorizationRequest>, StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }

    fn update_status(
        &self,
        _id: &RequestId,
        _status: RequestStatus,
        _ticket: Option<&CommitTicket>,
    ) -> Result<(RequestStatus, AuthorizationRequest), StoreError> {
        Err(StoreError::Unavailable("database offline".to_string()))
    }
}

/// Store that takes `delay` to answer every call and never looks at its ticket.
pub(super) struct SlowStore {
    delay: Duration,
    inner: InMemoryRequestStore,
}

impl SlowStore {
    pub(super) fn new(delay: Duration) -> Self {
        Self {
            delay,
            inner: InMemoryRequestStore::new(),
        }
    }
}

impl RequestStore for SlowStore {
    fn list(
        &self,
        match_id: &MatchId,
        chapter: Option<&str>,
    ) -> Result<Vec<AuthorizationRequest>, StoreError> {
        std::thread::sleep(self.delay);
        self.inner.list(match_id, chapter)
    }

    fn fetch(&self, id: &RequestId) -> Result<Option<AuthorizationRequest>, StoreError> {
        std::thread::sleep(self.delay);
        self.inner.fetch(id)
    }

    fn create_batch(
        &self,
        batch: Vec<NewRequest>,
        _ticket: Option<&CommitTicket>,
    ) -> Result<Vec<AuthorizationRequest>, StoreError> {
        std::thread::sleep(self.delay);
        self.inner.create_batch(batch, None)
    }

    fn update_status(
        &self,
        id: &RequestId,
        status: RequestStatus,
        _ticket: Option<&CommitTicket>,
    ) -> Result<(RequestStatus, AuthorizationRequest), StoreError> {
        std::thread::sleep(self.delay);
        self.inner.update_status(id, status, None)
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}

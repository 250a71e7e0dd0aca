use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError, RwLock, RwLockWriteGuard, TryLockError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use super::super::domain::{
    AuthorizationRequest, MatchId, MemberId, NewRequest, RequestId, RequestStatus,
};
use super::{CommitTicket, StoreError};

const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(1);

type MemberKey = (MatchId, MemberId);

/// A single durable change to the request collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub(crate) enum Change {
    Created {
        next_sequence: u64,
        requests: Vec<AuthorizationRequest>,
    },
    StatusChanged {
        id: RequestId,
        status: RequestStatus,
    },
}

/// Makes a change durable before the ledger publishes it.
///
/// `record` runs outside every ledger lock, so slow storage only delays the
/// caller that owns the change.
pub(crate) trait Journal {
    type Receipt;

    fn record(&self, change: &Change) -> Result<Self::Receipt, StoreError>;

    /// Undo a recorded change that will never be published.
    fn retract(&self, receipt: Self::Receipt);
}

/// Journal for process-local stores: nothing to write.
pub(crate) struct Volatile;

impl Journal for Volatile {
    type Receipt = ();

    fn record(&self, _change: &Change) -> Result<(), StoreError> {
        Ok(())
    }

    fn retract(&self, _receipt: ()) {}
}

/// Published request records.
///
/// Only `next_sequence` and `records` are persisted; positions are rebuilt
/// with [`RequestLedger::reindex`] after loading.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct RequestLedger {
    next_sequence: u64,
    records: Vec<AuthorizationRequest>,
    #[serde(skip)]
    positions: HashMap<RequestId, usize>,
}

impl RequestLedger {
    pub(crate) fn reindex(&mut self) {
        self.positions = self
            .records
            .iter()
            .enumerate()
            .map(|(position, record)| (record.id.clone(), position))
            .collect();
    }

    pub(crate) fn list(&self, match_id: &MatchId, chapter: Option<&str>) -> Vec<AuthorizationRequest> {
        let mut requests: Vec<AuthorizationRequest> = self
            .records
            .iter()
            .filter(|record| &record.match_id == match_id)
            .filter(|record| chapter.map_or(true, |chapter| record.chapter == chapter))
            .cloned()
            .collect();
        // Stable: equal timestamps keep insertion order.
        requests.sort_by_key(|record| record.created_at);
        requests
    }

    pub(crate) fn fetch(&self, id: &RequestId) -> Option<AuthorizationRequest> {
        self.positions
            .get(id)
            .and_then(|position| self.records.get(*position))
            .cloned()
    }

    fn active_keys(&self) -> HashSet<MemberKey> {
        self.records
            .iter()
            .filter(|record| record.status.is_active())
            .map(|record| (record.match_id.clone(), record.member_id.clone()))
            .collect()
    }

    /// Apply a change. Replaying an already applied change leaves the ledger as it was.
    pub(crate) fn apply(&mut self, change: &Change) {
        match change {
            Change::Created {
                next_sequence,
                requests,
            } => {
                self.next_sequence = self.next_sequence.max(*next_sequence);
                for request in requests {
                    if self.positions.contains_key(&request.id) {
                        continue;
                    }
                    self.positions.insert(request.id.clone(), self.records.len());
                    self.records.push(request.clone());
                }
            }
            Change::StatusChanged { id, status } => {
                if let Some(record) = self
                    .positions
                    .get(id)
                    .and_then(|position| self.records.get_mut(*position))
                {
                    record.status = *status;
                }
            }
        }
    }
}

/// Keys held by active or in-flight requests, plus the id sequence.
#[derive(Debug, Default)]
struct Claims {
    active: HashSet<MemberKey>,
    transitions: HashSet<RequestId>,
    next_sequence: u64,
}

impl Claims {
    /// Members in `batch` already claimed for the match, or staged twice.
    fn conflicts(&self, batch: &[NewRequest]) -> Vec<MemberId> {
        let mut seen = HashSet::new();
        batch
            .iter()
            .filter(|request| {
                let key = (request.match_id.clone(), request.member_id.clone());
                self.active.contains(&key) || !seen.insert(key)
            })
            .map(|request| request.member_id.clone())
            .collect()
    }
}

/// Published records behind a reader/writer lock, and per-key claims behind a
/// short mutex.
///
/// A commit claims its `(match, member)` keys, records the change in its
/// journal with no lock held, then publishes under a brief write lock.
/// Batches with disjoint keys never wait on each other's journal writes.
/// Lock order is records before claims.
#[derive(Debug, Default)]
pub(crate) struct SharedLedger {
    records: RwLock<RequestLedger>,
    claims: Mutex<Claims>,
}

impl SharedLedger {
    pub(crate) fn new(mut ledger: RequestLedger) -> Self {
        ledger.reindex();
        let claims = Claims {
            active: ledger.active_keys(),
            transitions: HashSet::new(),
            next_sequence: ledger.next_sequence,
        };
        Self {
            records: RwLock::new(ledger),
            claims: Mutex::new(claims),
        }
    }

    pub(crate) fn read<T>(&self, read: impl FnOnce(&RequestLedger) -> T) -> Result<T, StoreError> {
        let guard = self.records.read().map_err(|_| poisoned())?;
        Ok(read(&guard))
    }

    pub(crate) fn insert_batch<J: Journal>(
        &self,
        journal: &J,
        batch: Vec<NewRequest>,
        ticket: Option<&CommitTicket>,
    ) -> Result<Vec<AuthorizationRequest>, StoreError> {
        let reservation = self.reserve(batch)?;
        let change = Change::Created {
            next_sequence: reservation.next_sequence,
            requests: reservation.requests.clone(),
        };

        let receipt = journal.record(&change)?;
        let mut records = match self.publish_lock(ticket) {
            Ok(records) => records,
            Err(err) => {
                journal.retract(receipt);
                return Err(err);
            }
        };
        records.apply(&change);
        drop(records);

        Ok(reservation.settle())
    }

    pub(crate) fn transition<J: Journal>(
        &self,
        journal: &J,
        id: &RequestId,
        to: RequestStatus,
        ticket: Option<&CommitTicket>,
    ) -> Result<(RequestStatus, AuthorizationRequest), StoreError> {
        let _claim = self.claim_request(id, ticket.map(CommitTicket::deadline))?;

        let current = self
            .read(|ledger| ledger.fetch(id))?
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        let from = current.status;
        if !from.can_transition_to(to) {
            return Err(StoreError::IllegalTransition {
                id: id.clone(),
                from,
                to,
            });
        }

        let change = Change::StatusChanged {
            id: id.clone(),
            status: to,
        };
        let receipt = journal.record(&change)?;
        let mut records = match self.publish_lock(ticket) {
            Ok(records) => records,
            Err(err) => {
                journal.retract(receipt);
                return Err(err);
            }
        };
        records.apply(&change);
        let updated = records
            .fetch(id)
            .ok_or_else(|| StoreError::NotFound(id.clone()))?;
        if !to.is_active() {
            self.release(&[(updated.match_id.clone(), updated.member_id.clone())]);
        }

        Ok((from, updated))
    }

    /// Claim every key of the batch and allocate its ids, or claim nothing.
    fn reserve(&self, batch: Vec<NewRequest>) -> Result<Reservation<'_>, StoreError> {
        let mut claims = self.claims()?;

        let member_ids = claims.conflicts(&batch);
        if !member_ids.is_empty() {
            return Err(StoreError::Duplicate { member_ids });
        }

        let mut keys = Vec::with_capacity(batch.len());
        let mut requests = Vec::with_capacity(batch.len());
        for request in batch {
            claims.next_sequence += 1;
            let record = request.into_request(RequestId(format!("req-{:06}", claims.next_sequence)));
            let key = (record.match_id.clone(), record.member_id.clone());
            claims.active.insert(key.clone());
            keys.push(key);
            requests.push(record);
        }

        Ok(Reservation {
            ledger: self,
            keys,
            requests,
            next_sequence: claims.next_sequence,
            settled: false,
        })
    }

    /// Serialize status changes per request; unrelated requests never wait.
    fn claim_request(
        &self,
        id: &RequestId,
        deadline: Option<Instant>,
    ) -> Result<TransitionClaim<'_>, StoreError> {
        loop {
            {
                let mut claims = self.claims()?;
                if claims.transitions.insert(id.clone()) {
                    return Ok(TransitionClaim {
                        ledger: self,
                        id: id.clone(),
                    });
                }
            }
            if deadline.is_some_and(|deadline| Instant::now() >= deadline) {
                return Err(StoreError::DeadlineExceeded);
            }
            std::thread::sleep(LOCK_RETRY_INTERVAL);
        }
    }

    fn release(&self, keys: &[MemberKey]) {
        let mut claims = self.claims.lock().unwrap_or_else(PoisonError::into_inner);
        for key in keys {
            claims.active.remove(key);
        }
    }

    fn claims(&self) -> Result<MutexGuard<'_, Claims>, StoreError> {
        self.claims.lock().map_err(|_| poisoned())
    }

    /// Write access to the records, granted only if the ticket still allows publishing.
    fn publish_lock(
        &self,
        ticket: Option<&CommitTicket>,
    ) -> Result<RwLockWriteGuard<'_, RequestLedger>, StoreError> {
        let guard = self.lock_records(ticket.map(CommitTicket::deadline))?;
        if ticket.map_or(true, CommitTicket::try_publish) {
            Ok(guard)
        } else {
            Err(StoreError::DeadlineExceeded)
        }
    }

    fn lock_records(
        &self,
        deadline: Option<Instant>,
    ) -> Result<RwLockWriteGuard<'_, RequestLedger>, StoreError> {
        let Some(deadline) = deadline else {
            return self.records.write().map_err(|_| poisoned());
        };

        loop {
            match self.records.try_write() {
                Ok(guard) => return Ok(guard),
                Err(TryLockError::Poisoned(_)) => return Err(poisoned()),
                Err(TryLockError::WouldBlock) => {
                    if Instant::now() >= deadline {
                        return Err(StoreError::DeadlineExceeded);
                    }
                    std::thread::sleep(LOCK_RETRY_INTERVAL);
                }
            }
        }
    }
}

fn poisoned() -> StoreError {
    StoreError::Unavailable("request ledger lock poisoned".to_string())
}

/// Claimed keys of an unpublished batch. Dropping it unsettled frees the keys.
struct Reservation<'a> {
    ledger: &'a SharedLedger,
    keys: Vec<MemberKey>,
    requests: Vec<AuthorizationRequest>,
    next_sequence: u64,
    settled: bool,
}

impl Reservation<'_> {
    fn settle(mut self) -> Vec<AuthorizationRequest> {
        self.settled = true;
        std::mem::take(&mut self.requests)
    }
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.ledger.release(&self.keys);
        }
    }
}

struct TransitionClaim<'a> {
    ledger: &'a SharedLedger,
    id: RequestId,
}

impl Drop for TransitionClaim<'_> {
    fn drop(&mut self) {
        let mut claims = self
            .ledger
            .claims
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        claims.transitions.remove(&self.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::authorization::domain::MemberSnapshot;
    use chrono::{TimeZone, Utc};
    use std::sync::{Arc, Barrier};
    use std::thread;

    fn new_request(member: &str, minute: u32) -> NewRequest {
        NewRequest {
            match_id: MatchId("m-1".to_string()),
            member_id: MemberId(member.to_string()),
            member: MemberSnapshot {
                name: format!("Member {member}"),
                national_id: format!("ID-{member}"),
                category: "adult".to_string(),
            },
            chapter: "Rosario".to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 3, 12, 9, minute, 0).unwrap(),
        }
    }

    fn listed(shared: &SharedLedger) -> Vec<AuthorizationRequest> {
        shared
            .read(|ledger| ledger.list(&MatchId("m-1".to_string()), None))
            .expect("read")
    }

    /// Journal that parks inside `record` until the test lets it go.
    struct ParkedJournal {
        entered: Barrier,
        release: Barrier,
    }

    impl Journal for ParkedJournal {
        type Receipt = ();

        fn record(&self, _change: &Change) -> Result<(), StoreError> {
            self.entered.wait();
            self.release.wait();
            Ok(())
        }

        fn retract(&self, _receipt: ()) {}
    }

    struct BrokenJournal;

    impl Journal for BrokenJournal {
        type Receipt = ();

        fn record(&self, _change: &Change) -> Result<(), StoreError> {
            Err(StoreError::Unavailable("disk full".to_string()))
        }

        fn retract(&self, _receipt: ()) {}
    }

    #[test]
    fn insert_batch_is_all_or_nothing() {
        let shared = SharedLedger::default();
        shared
            .insert_batch(&Volatile, vec![new_request("a", 0)], None)
            .expect("first insert");

        match shared.insert_batch(&Volatile, vec![new_request("b", 1), new_request("a", 2)], None) {
            Err(StoreError::Duplicate { member_ids }) => {
                assert_eq!(member_ids, vec![MemberId("a".to_string())]);
            }
            other => panic!("expected duplicate, got {other:?}"),
        }

        assert_eq!(listed(&shared).len(), 1, "rejected batch must leave no records");
        shared
            .insert_batch(&Volatile, vec![new_request("b", 3)], None)
            .expect("b was never claimed");
    }

    #[test]
    fn repeated_member_in_batch_is_a_conflict() {
        let claims = Claims::default();
        let conflicts = claims.conflicts(&[new_request("a", 0), new_request("a", 1)]);
        assert_eq!(conflicts, vec![MemberId("a".to_string())]);
    }

    #[test]
    fn rejected_request_frees_the_member() {
        let shared = SharedLedger::default();
        let created = shared
            .insert_batch(&Volatile, vec![new_request("a", 0)], None)
            .expect("insert");
        let (from, rejected) = shared
            .transition(&Volatile, &created[0].id, RequestStatus::Rejected, None)
            .expect("reject");
        assert_eq!(from, RequestStatus::Pending);
        assert_eq!(rejected.status, RequestStatus::Rejected);

        shared
            .insert_batch(&Volatile, vec![new_request("a", 5)], None)
            .expect("re-request after rejection");
    }

    #[test]
    fn reload_restores_claims_and_sequence() {
        let shared = SharedLedger::default();
        shared
            .insert_batch(&Volatile, vec![new_request("a", 0)], None)
            .expect("insert");

        let json = shared
            .read(|ledger| serde_json::to_string(ledger))
            .expect("read")
            .expect("serialize");
        let restored: RequestLedger = serde_json::from_str(&json).expect("deserialize");
        let restored = SharedLedger::new(restored);

        assert!(matches!(
            restored.insert_batch(&Volatile, vec![new_request("a", 1)], None),
            Err(StoreError::Duplicate { .. })
        ));
        let next = restored
            .insert_batch(&Volatile, vec![new_request("b", 1)], None)
            .expect("insert");
        assert_eq!(next[0].id, RequestId("req-000002".to_string()));
    }

    #[test]
    fn replaying_a_change_twice_is_harmless() {
        let record = new_request("a", 0).into_request(RequestId("req-000001".to_string()));
        let created = Change::Created {
            next_sequence: 1,
            requests: vec![record.clone()],
        };
        let approved = Change::StatusChanged {
            id: record.id.clone(),
            status: RequestStatus::Approved,
        };

        let mut ledger = RequestLedger::default();
        for change in [&created, &approved, &created, &approved] {
            ledger.apply(change);
        }

        let all = ledger.list(&MatchId("m-1".to_string()), None);
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].status, RequestStatus::Approved);
    }

    #[test]
    fn publish_times_out_while_records_are_locked() {
        let shared = SharedLedger::default();
        {
            let _reader = shared.records.read().expect("read lock");
            let ticket = CommitTicket::within(Duration::from_millis(20));
            let result = shared.insert_batch(&Volatile, vec![new_request("a", 0)], Some(&ticket));
            assert!(matches!(result, Err(StoreError::DeadlineExceeded)));
        }

        assert!(listed(&shared).is_empty());
        shared
            .insert_batch(&Volatile, vec![new_request("a", 1)], None)
            .expect("timed out batch released its claim");
    }

    #[test]
    fn abandoned_ticket_publishes_nothing() {
        let shared = SharedLedger::default();
        let ticket = CommitTicket::within(Duration::from_secs(5));
        assert!(ticket.abandon());

        let result = shared.insert_batch(&Volatile, vec![new_request("a", 0)], Some(&ticket));
        assert!(matches!(result, Err(StoreError::DeadlineExceeded)));
        assert!(listed(&shared).is_empty());
    }

    #[test]
    fn failed_journal_write_releases_claims() {
        let shared = SharedLedger::default();
        assert!(matches!(
            shared.insert_batch(&BrokenJournal, vec![new_request("a", 0)], None),
            Err(StoreError::Unavailable(_))
        ));
        assert!(listed(&shared).is_empty());

        shared
            .insert_batch(&Volatile, vec![new_request("a", 1)], None)
            .expect("claim released after journal failure");
    }

    #[test]
    fn slow_commit_does_not_block_disjoint_batch() {
        let shared = Arc::new(SharedLedger::default());
        let journal = Arc::new(ParkedJournal {
            entered: Barrier::new(2),
            release: Barrier::new(2),
        });

        let slow = {
            let shared = Arc::clone(&shared);
            let journal = Arc::clone(&journal);
            thread::spawn(move || shared.insert_batch(journal.as_ref(), vec![new_request("rosario-1", 0)], None))
        };
        journal.entered.wait();

        // The slow batch holds its claim while its journal write is parked.
        let ticket = CommitTicket::within(Duration::from_millis(50));
        let mut other_chapter = new_request("cordoba-1", 1);
        other_chapter.chapter = "Cordoba".to_string();
        shared
            .insert_batch(&Volatile, vec![other_chapter], Some(&ticket))
            .expect("disjoint batch commits while the slow one is in flight");

        let ticket = CommitTicket::within(Duration::from_millis(50));
        match shared.insert_batch(&Volatile, vec![new_request("rosario-1", 2)], Some(&ticket)) {
            Err(StoreError::Duplicate { member_ids }) => {
                assert_eq!(member_ids, vec![MemberId("rosario-1".to_string())]);
            }
            other => panic!("expected in-flight claim to conflict, got {other:?}"),
        }

        journal.release.wait();
        slow.join().expect("thread").expect("slow batch commits");
        assert_eq!(listed(&shared).len(), 2);
    }
}

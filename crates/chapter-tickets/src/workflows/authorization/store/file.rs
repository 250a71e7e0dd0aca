use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use tracing::{debug, info, warn};

use super::super::domain::{AuthorizationRequest, MatchId, NewRequest, RequestId, RequestStatus};
use super::ledger::{Change, Journal, RequestLedger, SharedLedger};
use super::{CommitTicket, RequestStore, StoreError};

/// Store persisted as a JSON snapshot plus a journal directory of changes.
///
/// Each change is written to its own journal entry (temp file, fsync, rename,
/// directory fsync) before it becomes visible, so commits for different members
/// never share a file or a lock while they wait on the disk. Opening the store
/// replays the journal over the snapshot and compacts both into a new snapshot.
#[derive(Debug)]
pub struct JsonFileRequestStore {
    ledger: SharedLedger,
    journal: FileJournal,
}

impl JsonFileRequestStore {
    /// Open the store at `path`, starting empty when nothing was persisted yet.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| persist_error(parent, source))?;
        }

        let mut ledger = load_snapshot(&path)?;
        ledger.reindex();

        let journal_dir = journal_dir_for(&path);
        fs::create_dir_all(&journal_dir).map_err(|source| persist_error(&journal_dir, source))?;

        let entries = journal_entries(&journal_dir)?;
        if !entries.is_empty() {
            for entry in &entries {
                ledger.apply(&read_entry(entry)?);
            }

            let snapshot = serde_json::to_vec_pretty(&ledger).map_err(encode_error)?;
            write_atomically(&path, &snapshot)?;
            for entry in &entries {
                fs::remove_file(entry).map_err(|source| persist_error(entry, source))?;
            }
            sync_dir(&journal_dir);
            info!(
                path = %path.display(),
                replayed = entries.len(),
                "request journal compacted"
            );
        }

        info!(path = %path.display(), "request store opened");
        Ok(Self {
            ledger: SharedLedger::new(ledger),
            journal: FileJournal {
                dir: journal_dir,
                next_entry: AtomicU64::new(0),
            },
        })
    }
}

impl RequestStore for JsonFileRequestStore {
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
        self.ledger.insert_batch(&self.journal, batch, ticket)
    }

    fn update_status(
        &self,
        id: &RequestId,
        status: RequestStatus,
        ticket: Option<&CommitTicket>,
    ) -> Result<(RequestStatus, AuthorizationRequest), StoreError> {
        self.ledger.transition(&self.journal, id, status, ticket)
    }
}

/// One file per change, named by a sequence that orders replay.
#[derive(Debug)]
struct FileJournal {
    dir: PathBuf,
    next_entry: AtomicU64,
}

impl Journal for FileJournal {
    type Receipt = PathBuf;

    fn record(&self, change: &Change) -> Result<PathBuf, StoreError> {
        let sequence = self.next_entry.fetch_add(1, Ordering::Relaxed) + 1;
        let entry = self.dir.join(format!("{sequence:012}.json"));
        let bytes = serde_json::to_vec(change).map_err(encode_error)?;
        write_atomically(&entry, &bytes)?;
        debug!(path = %entry.display(), bytes = bytes.len(), "request change journaled");
        Ok(entry)
    }

    fn retract(&self, entry: PathBuf) {
        match fs::remove_file(&entry) {
            Ok(()) => {
                sync_dir(&self.dir);
                debug!(path = %entry.display(), "unpublished change retracted");
            }
            Err(err) => warn!(
                path = %entry.display(),
                error = %err,
                "failed to retract unpublished change; it will be replayed on restart"
            ),
        }
    }
}

fn load_snapshot(path: &Path) -> Result<RequestLedger, StoreError> {
    if !path.exists() {
        return Ok(RequestLedger::default());
    }

    let raw = fs::read_to_string(path).map_err(|source| persist_error(path, source))?;
    if raw.trim().is_empty() {
        return Ok(RequestLedger::default());
    }
    serde_json::from_str(&raw).map_err(|source| StoreError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}

fn read_entry(entry: &Path) -> Result<Change, StoreError> {
    let raw = fs::read(entry).map_err(|source| persist_error(entry, source))?;
    serde_json::from_slice(&raw).map_err(|source| StoreError::Corrupt {
        path: entry.to_path_buf(),
        source,
    })
}

/// Journal entries in replay order. Leftover temp files from interrupted writes are removed.
fn journal_entries(dir: &Path) -> Result<Vec<PathBuf>, StoreError> {
    let listing = fs::read_dir(dir).map_err(|source| persist_error(dir, source))?;

    let mut entries = Vec::new();
    for item in listing {
        let path = item.map_err(|source| persist_error(dir, source))?.path();
        if path.extension().is_some_and(|extension| extension == "tmp") {
            if let Err(err) = fs::remove_file(&path) {
                warn!(path = %path.display(), error = %err, "failed to remove interrupted journal write");
            }
            continue;
        }

        let sequence = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| stem.parse::<u64>().ok());
        match sequence {
            Some(sequence) if path.extension().is_some_and(|extension| extension == "json") => {
                entries.push((sequence, path));
            }
            _ => warn!(path = %path.display(), "ignoring unexpected file in request journal"),
        }
    }

    entries.sort_by_key(|(sequence, _)| *sequence);
    Ok(entries.into_iter().map(|(_, path)| path).collect())
}

fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let temp_path = temp_path_for(path);
    let written = write_synced(&temp_path, bytes).and_then(|()| fs::rename(&temp_path, path));

    if let Err(source) = written {
        if let Err(err) = fs::remove_file(&temp_path) {
            if err.kind() != io::ErrorKind::NotFound {
                warn!(path = %temp_path.display(), error = %err, "failed to remove temp file");
            }
        }
        return Err(persist_error(path, source));
    }

    if let Some(parent) = path.parent() {
        sync_dir(parent);
    }
    Ok(())
}

fn write_synced(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

fn temp_path_for(path: &Path) -> PathBuf {
    suffixed(path, ".tmp")
}

fn journal_dir_for(path: &Path) -> PathBuf {
    suffixed(path, ".journal")
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|name| name.to_os_string())
        .unwrap_or_else(|| "requests.json".into());
    name.push(suffix);
    path.with_file_name(name)
}

#[cfg(unix)]
fn sync_dir(dir: &Path) {
    let dir = if dir.as_os_str().is_empty() {
        Path::new(".")
    } else {
        dir
    };
    if let Err(err) = File::open(dir).and_then(|handle| handle.sync_all()) {
        warn!(path = %dir.display(), error = %err, "failed to sync directory");
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

fn persist_error(path: &Path, source: io::Error) -> StoreError {
    StoreError::Persist {
        path: path.to_path_buf(),
        source,
    }
}

fn encode_error(err: serde_json::Error) -> StoreError {
    StoreError::Unavailable(format!("failed to encode requests: {err}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflows::authorization::domain::{MemberId, MemberSnapshot};
    use chrono::{TimeZone, Utc};

    fn new_request(member: &str) -> NewRequest {
        NewRequest {
            match_id: MatchId("m-1".to_string()),
            member_id: MemberId(member.to_string()),
            member: MemberSnapshot {
                name: format!("Member {member}"),
                national_id: format!("ID-{member}"),
                category: "adult".to_string(),
            },
            chapter: "Rosario".to_string(),
            created_at: Utc.with_ymd_and_hms(2026, 3, 12, 9, 0, 0).unwrap(),
        }
    }

    fn journal_len(path: &Path) -> usize {
        fs::read_dir(journal_dir_for(path)).expect("journal dir").count()
    }

    #[test]
    fn requests_and_invariant_survive_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested").join("requests.json");

        {
            let store = JsonFileRequestStore::open(&path).expect("open");
            let created = store.create(new_request("a")).expect("create");
            store
                .update_status(&created.id, RequestStatus::Approved, None)
                .expect("approve");
            assert_eq!(journal_len(&path), 2, "one entry per change");
        }

        let reopened = JsonFileRequestStore::open(&path).expect("reopen");
        assert_eq!(journal_len(&path), 0, "journal compacted into the snapshot");
        let listed = reopened
            .list(&MatchId("m-1".to_string()), None)
            .expect("list");
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].status, RequestStatus::Approved);

        match reopened.create(new_request("a")) {
            Err(StoreError::Duplicate { member_ids }) => {
                assert_eq!(member_ids, vec![MemberId("a".to_string())]);
            }
            other => panic!("expected duplicate after restart, got {other:?}"),
        }

        let next = reopened.create(new_request("b")).expect("create");
        assert_eq!(next.id, RequestId("req-000002".to_string()));
        assert!(!temp_path_for(&path).exists());
    }

    #[test]
    fn journal_left_by_a_crash_is_replayed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("requests.json");
        let journal_dir = journal_dir_for(&path);
        fs::create_dir_all(&journal_dir).expect("journal dir");

        let record = new_request("a").into_request(RequestId("req-000007".to_string()));
        let changes = [
            Change::Created {
                next_sequence: 7,
                requests: vec![record.clone()],
            },
            Change::StatusChanged {
                id: record.id.clone(),
                status: RequestStatus::Rejected,
            },
        ];
        for (index, change) in changes.iter().enumerate() {
            let bytes = serde_json::to_vec(change).expect("encode");
            fs::write(journal_dir.join(format!("{:012}.json", index + 1)), bytes).expect("write");
        }
        fs::write(journal_dir.join("000000000003.json.tmp"), b"{ half").expect("write");

        let store = JsonFileRequestStore::open(&path).expect("open");
        let fetched = store.fetch(&record.id).expect("fetch").expect("replayed");
        assert_eq!(fetched.status, RequestStatus::Rejected);
        assert_eq!(journal_len(&path), 0);

        let next = store.create(new_request("a")).expect("rejection freed the member");
        assert_eq!(next.id, RequestId("req-000008".to_string()));
    }

    #[test]
    fn abandoned_commit_leaves_no_trace() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("requests.json");

        {
            let store = JsonFileRequestStore::open(&path).expect("open");
            let ticket = CommitTicket::within(std::time::Duration::from_secs(5));
            assert!(ticket.abandon());

            assert!(matches!(
                store.create_batch(vec![new_request("a")], Some(&ticket)),
                Err(StoreError::DeadlineExceeded)
            ));
            assert_eq!(journal_len(&path), 0);
        }

        let reopened = JsonFileRequestStore::open(&path).expect("reopen");
        assert!(reopened
            .list(&MatchId("m-1".to_string()), None)
            .expect("list")
            .is_empty());
    }

    #[test]
    fn failed_write_removes_temp_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        // Renaming a file over a non-empty directory fails.
        let target = dir.path().join("occupied");
        fs::create_dir_all(target.join("child")).expect("dir");

        match write_atomically(&target, b"{}") {
            Err(StoreError::Persist { path, .. }) => assert_eq!(path, target),
            other => panic!("expected persist error, got {other:?}"),
        }
        assert!(!temp_path_for(&target).exists());
    }

    #[test]
    fn corrupt_snapshot_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("requests.json");
        fs::write(&path, "{ not json").expect("write");

        match JsonFileRequestStore::open(&path) {
            Err(StoreError::Corrupt { .. }) => {}
            other => panic!("expected corrupt store error, got {other:?}"),
        }
    }

    #[test]
    fn corrupt_journal_entry_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("requests.json");
        let journal_dir = journal_dir_for(&path);
        fs::create_dir_all(&journal_dir).expect("journal dir");
        fs::write(journal_dir.join("000000000001.json"), "{ not json").expect("write");

        match JsonFileRequestStore::open(&path) {
            Err(StoreError::Corrupt { path: reported, .. }) => {
                assert_eq!(reported, journal_dir.join("000000000001.json"));
            }
            other => panic!("expected corrupt journal error, got {other:?}"),
        }
    }
}

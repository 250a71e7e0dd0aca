//! Chapter ticket authorization: window evaluation, draft staging, atomic batch
//! submission, request lifecycle, and per-match status summaries.
//!
//! Clock reads happen only at the HTTP edge; every evaluation here takes `now`
//! as an argument.

pub mod directory;
pub mod domain;
pub mod draft;
pub mod notify;
pub mod projector;
pub mod router;
pub mod store;
pub mod submission;
pub mod window;

#[cfg(test)]
mod tests;

pub use directory::{
    DirectoryError, InMemoryDirectory, MatchDirectory, MemberDirectory, ScheduleError,
};
pub use domain::{
    AuthorizationRequest, AuthorizationWindow, DuesStatus, Match, MatchId, Member, MemberId,
    MemberSnapshot, NewRequest, RequestId, RequestStatus,
};
pub use draft::DraftStaging;
pub use notify::{BroadcastNotifier, NotificationError, NotificationSink, RequestEvent};
pub use projector::{StatusProjector, StatusSummary};
pub use router::authorization_router;
pub use store::{
    CommitTicket, InMemoryRequestStore, JsonFileRequestStore, RequestStore, StoreError,
};
pub use submission::{
    Submission, SubmissionCoordinator, SubmissionError, SubmissionReceipt, ValidationError,
};
pub use window::{find_overlaps, WindowEvaluator, WindowOverlap, WindowState};

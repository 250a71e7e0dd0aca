use std::fmt;

use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

/// Identifier wrapper for scheduled matches.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchId(pub String);

/// Identifier wrapper for chapter-affiliated members.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MemberId(pub String);

/// Identifier wrapper for persisted authorization requests.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub String);

macro_rules! display_as_inner {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        })*
    };
}

display_as_inner!(MatchId, MemberId, RequestId);

pub(crate) fn join_member_ids(ids: &[MemberId]) -> String {
    ids.iter()
        .map(|id| id.0.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

const WINDOW_DATE_FORMAT: &str = "%d/%m/%Y";
const WINDOW_TIME_FORMAT: &str = "%H:%M";

/// Calendar-local bounds during which chapters may submit requests for a match.
///
/// Values are kept as entered by administrators (`dd/mm/yyyy` and `HH:MM`) and
/// only interpreted on evaluation, so a malformed entry makes the match
/// ineligible instead of failing at load time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationWindow {
    #[serde(default)]
    pub open_date: Option<String>,
    #[serde(default)]
    pub open_time: Option<String>,
    #[serde(default)]
    pub close_date: Option<String>,
    #[serde(default)]
    pub close_time: Option<String>,
}

impl AuthorizationWindow {
    pub fn new(open_date: &str, open_time: &str, close_date: &str, close_time: &str) -> Self {
        Self {
            open_date: Some(open_date.to_string()),
            open_time: Some(open_time.to_string()),
            close_date: Some(close_date.to_string()),
            close_time: Some(close_time.to_string()),
        }
    }

    pub fn opens_at(&self) -> Option<NaiveDateTime> {
        parse_local(self.open_date.as_deref()?, self.open_time.as_deref()?)
    }

    pub fn closes_at(&self) -> Option<NaiveDateTime> {
        parse_local(self.close_date.as_deref()?, self.close_time.as_deref()?)
    }

    /// Both bounds, or `None` when either is missing or malformed.
    pub fn naive_bounds(&self) -> Option<(NaiveDateTime, NaiveDateTime)> {
        Some((self.opens_at()?, self.closes_at()?))
    }
}

/// Parse a `dd/mm/yyyy` date and a 24-hour `HH:MM` time into a wall-clock instant.
pub fn parse_local(date: &str, time: &str) -> Option<NaiveDateTime> {
    let date = NaiveDate::parse_from_str(date.trim(), WINDOW_DATE_FORMAT).ok()?;
    let time = NaiveTime::parse_from_str(time.trim(), WINDOW_TIME_FORMAT).ok()?;
    Some(date.and_time(time))
}

/// Scheduling metadata for a fixture, as maintained by administrators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Match {
    pub id: MatchId,
    pub opponent: String,
    pub competition: String,
    #[serde(default)]
    pub kickoff: Option<NaiveDateTime>,
    pub venue: String,
    pub is_home: bool,
    pub is_neutral: bool,
    pub is_suspended: bool,
    #[serde(default)]
    pub window: AuthorizationWindow,
}

impl Match {
    /// Away fixtures and suspended matches can never accept chapter requests.
    pub fn accepts_chapter_requests(&self) -> bool {
        (self.is_home || self.is_neutral) && !self.is_suspended
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DuesStatus {
    Current,
    Overdue,
    Inactive,
}

impl DuesStatus {
    pub const fn label(self) -> &'static str {
        match self {
            DuesStatus::Current => "current",
            DuesStatus::Overdue => "overdue",
            DuesStatus::Inactive => "inactive",
        }
    }
}

/// Member enrolled with a chapter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub id: MemberId,
    pub chapter: String,
    pub name: String,
    pub national_id: String,
    pub category: String,
    pub dues: DuesStatus,
}

impl Member {
    pub fn is_current(&self) -> bool {
        self.dues == DuesStatus::Current
    }

    pub fn snapshot(&self) -> MemberSnapshot {
        MemberSnapshot {
            name: self.name.clone(),
            national_id: self.national_id.clone(),
            category: self.category.clone(),
        }
    }
}

/// Member details frozen into a request when it is created.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberSnapshot {
    pub name: String,
    pub national_id: String,
    pub category: String,
}

/// Lifecycle status of an authorization request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequestStatus {
    Pending,
    Approved,
    Rejected,
    CancellationRequested,
}

impl RequestStatus {
    pub const fn ordered() -> [Self; 4] {
        [
            Self::Pending,
            Self::Approved,
            Self::Rejected,
            Self::CancellationRequested,
        ]
    }

    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Rejected => "REJECTED",
            Self::CancellationRequested => "CANCELLATION_REQUESTED",
        }
    }

    /// Every status except `Rejected` blocks a new request for the same member and match.
    pub const fn is_active(self) -> bool {
        !matches!(self, Self::Rejected)
    }

    pub const fn next_states(self) -> &'static [RequestStatus] {
        match self {
            Self::Pending => &[Self::Approved, Self::Rejected],
            Self::Approved => &[Self::CancellationRequested],
            // Terminal until a resolution path for cancellations is decided.
            Self::Rejected | Self::CancellationRequested => &[],
        }
    }

    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        self.next_states().contains(&next)
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().to_ascii_uppercase().replace([' ', '-'], "_");
        Self::ordered()
            .into_iter()
            .find(|status| status.label() == normalized)
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Persisted ask for one member's ticket authorization for one match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    pub id: RequestId,
    pub match_id: MatchId,
    pub member_id: MemberId,
    pub member: MemberSnapshot,
    pub chapter: String,
    pub status: RequestStatus,
    pub created_at: DateTime<Utc>,
}

/// Request contents before the store assigns an identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRequest {
    pub match_id: MatchId,
    pub member_id: MemberId,
    pub member: MemberSnapshot,
    pub chapter: String,
    pub created_at: DateTime<Utc>,
}

impl NewRequest {
    pub fn for_member(match_id: &MatchId, member: &Member, created_at: DateTime<Utc>) -> Self {
        Self {
            match_id: match_id.clone(),
            member_id: member.id.clone(),
            member: member.snapshot(),
            chapter: member.chapter.clone(),
            created_at,
        }
    }

    pub(crate) fn into_request(self, id: RequestId) -> AuthorizationRequest {
        AuthorizationRequest {
            id,
            match_id: self.match_id,
            member_id: self.member_id,
            member: self.member,
            chapter: self.chapter,
            status: RequestStatus::Pending,
            created_at: self.created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_local_requires_day_month_year_and_24_hour_time() {
        let parsed = parse_local("10/03/2026", "20:00").expect("valid window bound");
        assert_eq!(
            parsed,
            NaiveDate::from_ymd_opt(2026, 3, 10)
                .unwrap()
                .and_hms_opt(20, 0, 0)
                .unwrap()
        );

        assert!(parse_local("2026-03-10", "20:00").is_none());
        assert!(parse_local("31/02/2026", "20:00").is_none());
        assert!(parse_local("10/03/2026", "24:00").is_none());
        assert!(parse_local("10/03/2026", "8pm").is_none());
    }

    #[test]
    fn transition_table_matches_lifecycle() {
        assert!(RequestStatus::Pending.can_transition_to(RequestStatus::Approved));
        assert!(RequestStatus::Pending.can_transition_to(RequestStatus::Rejected));
        assert!(RequestStatus::Approved.can_transition_to(RequestStatus::CancellationRequested));
        assert!(!RequestStatus::Approved.can_transition_to(RequestStatus::Pending));
        assert!(!RequestStatus::Rejected.can_transition_to(RequestStatus::Approved));
        assert!(RequestStatus::CancellationRequested.next_states().is_empty());
    }

    #[test]
    fn status_parse_accepts_labels_loosely() {
        assert_eq!(RequestStatus::parse("approved"), Some(RequestStatus::Approved));
        assert_eq!(
            RequestStatus::parse("cancellation requested"),
            Some(RequestStatus::CancellationRequested)
        );
        assert_eq!(RequestStatus::parse("cancelled"), None);
    }

    #[test]
    fn status_serializes_as_screaming_snake_case() {
        let json = serde_json::to_string(&RequestStatus::CancellationRequested).expect("json");
        assert_eq!(json, "\"CANCELLATION_REQUESTED\"");
    }
}

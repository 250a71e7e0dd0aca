use chrono::{DateTime, FixedOffset, NaiveDateTime, Offset, TimeZone, Utc};
use serde::Serialize;

use super::domain::{Match, MatchId};

/// Decides whether a match currently accepts chapter requests.
///
/// Window bounds are wall-clock values in the organization's schedule offset;
/// `now` always comes from the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowEvaluator {
    offset: FixedOffset,
}

impl Default for WindowEvaluator {
    fn default() -> Self {
        Self::utc()
    }
}

impl WindowEvaluator {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn utc() -> Self {
        Self { offset: Utc.fix() }
    }

    pub fn offset(&self) -> FixedOffset {
        self.offset
    }

    fn to_utc(&self, local: NaiveDateTime) -> Option<DateTime<Utc>> {
        self.offset
            .from_local_datetime(&local)
            .single()
            .map(|instant| instant.with_timezone(&Utc))
    }

    /// Open and close instants, or `None` when the window is absent or malformed.
    pub fn bounds(&self, fixture: &Match) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let (open, close) = fixture.window.naive_bounds()?;
        Some((self.to_utc(open)?, self.to_utc(close)?))
    }

    pub fn is_active(&self, fixture: &Match, now: DateTime<Utc>) -> bool {
        if !fixture.accepts_chapter_requests() {
            return false;
        }

        match self.bounds(fixture) {
            Some((open, close)) => open <= now && now <= close,
            None => false,
        }
    }

    /// Every match whose window is open at `now`, in input order.
    ///
    /// More than one entry means the schedule has overlapping windows; callers
    /// surface that instead of picking one.
    pub fn active_matches<'a>(&self, fixtures: &'a [Match], now: DateTime<Utc>) -> Vec<&'a Match> {
        fixtures
            .iter()
            .filter(|fixture| self.is_active(fixture, now))
            .collect()
    }

    pub fn state(&self, fixture: &Match, now: DateTime<Utc>) -> WindowState {
        if !fixture.accepts_chapter_requests() {
            return WindowState::Ineligible;
        }

        match self.bounds(fixture) {
            None => WindowState::Unscheduled,
            Some((open, _)) if now < open => WindowState::Upcoming { opens_at: open },
            Some((_, close)) if now > close => WindowState::Closed,
            Some((_, close)) => WindowState::Open { closes_at: close },
        }
    }
}

/// Chapter-facing classification of a match window at a given instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum WindowState {
    /// Away or suspended fixture.
    Ineligible,
    /// Window fields missing or malformed.
    Unscheduled,
    Upcoming { opens_at: DateTime<Utc> },
    Open { closes_at: DateTime<Utc> },
    Closed,
}

impl WindowState {
    pub const fn label(&self) -> &'static str {
        match self {
            WindowState::Ineligible => "ineligible",
            WindowState::Unscheduled => "unscheduled",
            WindowState::Upcoming { .. } => "upcoming",
            WindowState::Open { .. } => "open",
            WindowState::Closed => "closed",
        }
    }

    pub const fn is_open(&self) -> bool {
        matches!(self, WindowState::Open { .. })
    }
}

/// Two schedulable matches whose windows intersect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WindowOverlap {
    pub first: MatchId,
    pub second: MatchId,
}

/// True when both matches could accept requests and their windows share an instant.
pub fn windows_overlap(a: &Match, b: &Match) -> bool {
    if !a.accepts_chapter_requests() || !b.accepts_chapter_requests() {
        return false;
    }

    match (a.window.naive_bounds(), b.window.naive_bounds()) {
        (Some((a_open, a_close)), Some((b_open, b_close))) => {
            a_open <= a_close && b_open <= b_close && a_open <= b_close && b_open <= a_close
        }
        _ => false,
    }
}

/// Every overlapping pair in `fixtures`, first-listed match first.
pub fn find_overlaps(fixtures: &[Match]) -> Vec<WindowOverlap> {
    let mut overlaps = Vec::new();
    for (index, first) in fixtures.iter().enumerate() {
        for second in &fixtures[index + 1..] {
            if windows_overlap(first, second) {
                overlaps.push(WindowOverlap {
                    first: first.id.clone(),
                    second: second.id.clone(),
                });
            }
        }
    }
    overlaps
}

use std::collections::HashMap;

use super::domain::{Match, MatchId, Member, MemberId};
use super::window::windows_overlap;

/// Read-only access to scheduled matches.
pub trait MatchDirectory: Send + Sync {
    fn get(&self, id: &MatchId) -> Result<Option<Match>, DirectoryError>;
    fn list(&self) -> Result<Vec<Match>, DirectoryError>;
}

/// Read-only access to chapter rosters.
pub trait MemberDirectory: Send + Sync {
    fn list_by_chapter(&self, chapter: &str) -> Result<Vec<Member>, DirectoryError>;
}

#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("directory unavailable: {0}")]
    Unavailable(String),
}

/// Rejections raised while scheduling a match.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScheduleError {
    #[error("match {0} is already scheduled")]
    DuplicateMatch(MatchId),
    #[error("authorization window of match {candidate} overlaps match {existing}")]
    OverlappingWindow { candidate: MatchId, existing: MatchId },
    #[error("member {0} is already enrolled")]
    DuplicateMember(MemberId),
}

/// Directory held in memory, populated at start-up from roster files or fixtures.
#[derive(Debug, Default, Clone)]
pub struct InMemoryDirectory {
    matches: Vec<Match>,
    members: Vec<Member>,
    member_index: HashMap<MemberId, usize>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a match, refusing one whose window overlaps an already scheduled match.
    pub fn schedule(&mut self, fixture: Match) -> Result<(), ScheduleError> {
        if self.matches.iter().any(|existing| existing.id == fixture.id) {
            return Err(ScheduleError::DuplicateMatch(fixture.id));
        }

        if let Some(existing) = self
            .matches
            .iter()
            .find(|existing| windows_overlap(existing, &fixture))
        {
            return Err(ScheduleError::OverlappingWindow {
                candidate: fixture.id.clone(),
                existing: existing.id.clone(),
            });
        }

        self.matches.push(fixture);
        Ok(())
    }

    pub fn enroll(&mut self, member: Member) -> Result<(), ScheduleError> {
        if self.member_index.contains_key(&member.id) {
            return Err(ScheduleError::DuplicateMember(member.id));
        }
        self.member_index.insert(member.id.clone(), self.members.len());
        self.members.push(member);
        Ok(())
    }

    pub fn member(&self, id: &MemberId) -> Option<&Member> {
        self.member_index
            .get(id)
            .and_then(|position| self.members.get(*position))
    }

    /// Replace a member's roster data, e.g. after a dues payment or name change.
    pub fn update_member(&mut self, member: Member) -> bool {
        match self.member_index.get(&member.id) {
            Some(position) => {
                self.members[*position] = member;
                true
            }
            None => false,
        }
    }

    pub fn matches(&self) -> &[Match] {
        &self.matches
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }
}

impl MatchDirectory for InMemoryDirectory {
    fn get(&self, id: &MatchId) -> Result<Option<Match>, DirectoryError> {
        Ok(self.matches.iter().find(|fixture| &fixture.id == id).cloned())
    }

    fn list(&self) -> Result<Vec<Match>, DirectoryError> {
        Ok(self.matches.clone())
    }
}

impl MemberDirectory for InMemoryDirectory {
    fn list_by_chapter(&self, chapter: &str) -> Result<Vec<Member>, DirectoryError> {
        Ok(self
            .members
            .iter()
            .filter(|member| member.chapter == chapter)
            .cloned()
            .collect())
    }
}

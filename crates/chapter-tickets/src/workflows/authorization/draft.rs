use std::collections::HashSet;

use super::domain::{AuthorizationRequest, MatchId, Member, MemberId};

/// Unpersisted selection of members one chapter operator is preparing to submit.
///
/// Owned by a single actor; nothing here touches the request store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DraftStaging {
    actor: String,
    match_id: MatchId,
    selected: Vec<MemberId>,
}

impl DraftStaging {
    pub fn new(actor: impl Into<String>, match_id: MatchId) -> Self {
        Self {
            actor: actor.into(),
            match_id,
            selected: Vec::new(),
        }
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn match_id(&self) -> &MatchId {
        &self.match_id
    }

    /// Staged members in the order they were selected.
    pub fn selected(&self) -> &[MemberId] {
        &self.selected
    }

    pub fn contains(&self, member_id: &MemberId) -> bool {
        self.selected.contains(member_id)
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    /// Add the member if absent, remove it otherwise. Returns whether it is now staged.
    pub fn toggle(&mut self, member_id: MemberId) -> bool {
        match self.selected.iter().position(|staged| staged == &member_id) {
            Some(position) => {
                self.selected.remove(position);
                false
            }
            None => {
                self.selected.push(member_id);
                true
            }
        }
    }

    /// Drop the given members, e.g. the conflicts reported by a rejected submission.
    pub fn remove(&mut self, member_ids: &[MemberId]) {
        self.selected.retain(|staged| !member_ids.contains(staged));
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    /// Members with current dues and no active request for this draft's match.
    ///
    /// Recompute whenever the request list changes; uniqueness is per match and
    /// member regardless of which chapter submitted.
    pub fn eligible_candidates<'a>(
        &self,
        members: &'a [Member],
        existing: &[AuthorizationRequest],
    ) -> Vec<&'a Member> {
        eligible_candidates(&self.match_id, members, existing)
    }
}

pub fn eligible_candidates<'a>(
    match_id: &MatchId,
    members: &'a [Member],
    existing: &[AuthorizationRequest],
) -> Vec<&'a Member> {
    let taken: HashSet<&MemberId> = existing
        .iter()
        .filter(|request| &request.match_id == match_id && request.status.is_active())
        .map(|request| &request.member_id)
        .collect();

    members
        .iter()
        .filter(|member| member.is_current() && !taken.contains(&member.id))
        .collect()
}

//! Membership snapshots and the diff between two of them.

use std::collections::HashSet;

use tracing::debug;

use crate::{DomainError, RelayId};

/// The set of relays that should currently be connected.
///
/// A snapshot is only ever replaced wholesale; the supervisor computes the
/// diff against the previous snapshot instead of storing edits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipSet {
    relays: HashSet<RelayId>,
}

/// A relay list line that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedLine {
    /// 1-based line number in the source text
    pub line: usize,
    pub error: DomainError,
}

/// Result of parsing a relay list.
#[derive(Debug, Clone, Default)]
pub struct ParsedMembership {
    pub set: MembershipSet,
    pub rejected: Vec<RejectedLine>,
}

impl MembershipSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parses one relay address per non-empty line.
    ///
    /// Invalid lines are collected in `rejected` and do not affect the
    /// remaining entries. Duplicate lines (after normalization) collapse.
    pub fn parse(contents: &str) -> ParsedMembership {
        let mut parsed = ParsedMembership::default();

        for (index, line) in contents.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match RelayId::parse(line) {
                Ok(relay) => {
                    parsed.set.relays.insert(relay);
                }
                Err(error) => {
                    debug!(line = index + 1, error = %error, "Rejected relay list line");
                    parsed.rejected.push(RejectedLine {
                        line: index + 1,
                        error,
                    });
                }
            }
        }

        parsed
    }

    pub fn insert(&mut self, relay: RelayId) -> bool {
        self.relays.insert(relay)
    }

    pub fn contains(&self, relay: &RelayId) -> bool {
        self.relays.contains(relay)
    }

    pub fn len(&self) -> usize {
        self.relays.len()
    }

    pub fn is_empty(&self) -> bool {
        self.relays.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &RelayId> {
        self.relays.iter()
    }

    /// Relays in lexical order, for stable logging and assertions.
    pub fn sorted(&self) -> Vec<RelayId> {
        let mut relays: Vec<RelayId> = self.relays.iter().cloned().collect();
        relays.sort();
        relays
    }

    /// Computes what must change to move from `self` to `target`.
    pub fn diff(&self, target: &MembershipSet) -> MembershipDiff {
        let mut added: Vec<RelayId> = target.relays.difference(&self.relays).cloned().collect();
        let mut removed: Vec<RelayId> = self.relays.difference(&target.relays).cloned().collect();
        added.sort();
        removed.sort();
        MembershipDiff { added, removed }
    }
}

impl FromIterator<RelayId> for MembershipSet {
    fn from_iter<I: IntoIterator<Item = RelayId>>(iter: I) -> Self {
        Self {
            relays: iter.into_iter().collect(),
        }
    }
}

impl<'a> FromIterator<&'a RelayId> for MembershipSet {
    fn from_iter<I: IntoIterator<Item = &'a RelayId>>(iter: I) -> Self {
        iter.into_iter().cloned().collect()
    }
}

impl IntoIterator for MembershipSet {
    type Item = RelayId;
    type IntoIter = std::collections::hash_set::IntoIter<RelayId>;

    fn into_iter(self) -> Self::IntoIter {
        self.relays.into_iter()
    }
}

/// Relays to start and relays to stop.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MembershipDiff {
    pub added: Vec<RelayId>,
    pub removed: Vec<RelayId>,
}

impl MembershipDiff {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

//! Moderation lifecycle for user-submitted comments and guestbook entries.
//!
//! ```text
//!   submit            approve
//!  ───────▶ Pending ──────────▶ Approved
//!              │                   │
//!              │ delete            │ delete
//!              ▼                   ▼
//!           (removed)          (removed)
//! ```
//!
//! Approval is one-way. Deletion removes the row, so "Deleted" is never
//! observed on a stored record.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::store::{Predicate, Query};

/// Stored column carrying the approval flag.
pub const APPROVAL_COLUMN: &str = "isApproved";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationState {
    Pending,
    Approved,
}

impl ModerationState {
    pub fn of(is_approved: bool) -> Self {
        if is_approved {
            ModerationState::Approved
        } else {
            ModerationState::Pending
        }
    }

    /// The only transition a stored record can make.
    pub fn approve(self) -> Self {
        ModerationState::Approved
    }
}

/// Which moderation states a listing includes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModerationFilter {
    Pending,
    Approved,
    #[default]
    All,
}

impl ModerationFilter {
    pub fn predicate(self) -> Option<Predicate> {
        match self {
            ModerationFilter::Pending => Some(Predicate::eq(APPROVAL_COLUMN, false)),
            ModerationFilter::Approved => Some(Predicate::eq(APPROVAL_COLUMN, true)),
            ModerationFilter::All => None,
        }
    }

    /// Adds the filter's predicate to `query`, server side like any other filter.
    pub fn apply(self, mut query: Query) -> Query {
        if let Some(p) = self.predicate() {
            query.predicates.push(p);
        }
        query
    }

    pub fn admits(self, state: ModerationState) -> bool {
        match self {
            ModerationFilter::Pending => state == ModerationState::Pending,
            ModerationFilter::Approved => state == ModerationState::Approved,
            ModerationFilter::All => true,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ModerationFilter::Pending => "pending",
            ModerationFilter::Approved => "approved",
            ModerationFilter::All => "all",
        }
    }
}

impl FromStr for ModerationFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pending" => Ok(ModerationFilter::Pending),
            "approved" => Ok(ModerationFilter::Approved),
            "all" | "" => Ok(ModerationFilter::All),
            other => Err(format!(
                "unknown moderation filter {other:?} (expected pending, approved or all)"
            )),
        }
    }
}

impl fmt::Display for ModerationFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn approval_is_one_way() {
        assert_eq!(ModerationState::Pending.approve(), ModerationState::Approved);
        assert_eq!(ModerationState::Approved.approve(), ModerationState::Approved);
    }

    #[test]
    fn filters_push_predicates() {
        let q = ModerationFilter::Pending.apply(Query::new());
        let row = json!({"isApproved": false}).as_object().unwrap().clone();
        assert!(q.matches(&row));
        assert!(ModerationFilter::All.apply(Query::new()).predicates.is_empty());
        assert_eq!(
            ModerationFilter::Approved.predicate(),
            Some(Predicate::eq("isApproved", true))
        );
    }

    #[test]
    fn parses_filter_names() {
        assert_eq!("Pending".parse(), Ok(ModerationFilter::Pending));
        assert_eq!("".parse(), Ok(ModerationFilter::All));
        assert!("rejected".parse::<ModerationFilter>().is_err());
    }

    #[test]
    fn admits_matching_states() {
        assert!(ModerationFilter::All.admits(ModerationState::Pending));
        assert!(!ModerationFilter::Approved.admits(ModerationState::of(false)));
    }
}

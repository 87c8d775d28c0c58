use std::fmt;

use crate::types::TrxID;

/// A snapshot of which transactions are visible to a reader.
///
/// `active` holds the ids of the transactions that were active when the
/// view was created, other than the creator, sorted in descending
/// order. Everything at or above `low_limit` started after the
/// snapshot.
#[derive(Clone, PartialEq, Eq)]
pub struct ReadView {
    creator: TrxID,
    active: Vec<TrxID>,
    low_limit: TrxID,
    up_limit: TrxID,
}

impl ReadView {
    pub fn new(creator: TrxID, active: &[TrxID], low_limit: TrxID) -> Self {
        let mut ids: Vec<TrxID> = active.iter().copied().filter(|id| *id != creator).collect();
        ids.sort_unstable_by(|a, b| b.cmp(a));
        ids.dedup();
        let up_limit = ids.last().copied().unwrap_or(low_limit);
        Self {
            creator,
            active: ids,
            low_limit,
            up_limit,
        }
    }

    pub fn creator(&self) -> TrxID {
        self.creator
    }

    pub fn low_limit(&self) -> TrxID {
        self.low_limit
    }

    /// The smallest id that was active at the snapshot; everything
    /// below it is committed.
    pub fn up_limit(&self) -> TrxID {
        self.up_limit
    }

    pub fn active_ids(&self) -> &[TrxID] {
        &self.active
    }

    /// Whether changes of the transaction are visible. Id 0 marks rows
    /// written outside of any transaction.
    pub fn sees(&self, id: TrxID) -> bool {
        if id == 0 || id == self.creator {
            return true;
        }
        if id < self.up_limit {
            return true;
        }
        if id >= self.low_limit {
            return false;
        }
        self.active.binary_search_by(|active| id.cmp(active)).is_err()
    }
}

impl fmt::Debug for ReadView {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<ReadView creator={} low_limit={} up_limit={} active={:?}>",
            self.creator, self.low_limit, self.up_limit, self.active
        )
    }
}

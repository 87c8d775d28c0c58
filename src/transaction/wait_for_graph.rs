use std::collections::{HashMap, HashSet};

use crate::types::TrxID;

pub(crate) struct WaitForGraph {
    // key: transaction id, value: the transactions that the key transaction is waiting for
    graph: HashMap<TrxID, HashSet<TrxID>>,
}

impl WaitForGraph {
    pub(crate) fn new() -> Self {
        Self {
            graph: HashMap::new(),
        }
    }

    pub(crate) fn add_edge(&mut self, from: TrxID, to: TrxID) {
        if from == to {
            return;
        }
        self.graph.entry(from).or_insert_with(HashSet::new).insert(to);
    }

    pub(crate) fn waits_for(&self, tid: TrxID) -> Option<&HashSet<TrxID>> {
        self.graph.get(&tid)
    }

    /// Drop every edge leaving the transaction.
    pub(crate) fn remove_waiter(&mut self, tid: TrxID) {
        self.graph.remove(&tid);
    }

    /// Drop the transaction from the graph, as waiter and as holder.
    pub(crate) fn remove_transaction(&mut self, tid: TrxID) {
        self.graph.remove(&tid);
        for targets in self.graph.values_mut() {
            targets.remove(&tid);
        }
        self.graph.retain(|_, targets| !targets.is_empty());
    }

    pub(crate) fn n_edges(&self) -> usize {
        self.graph.values().map(|t| t.len()).sum()
    }

    /// Whether the waiter is part of a cycle.
    pub(crate) fn in_cycle(&self, waiter: TrxID) -> bool {
        let mut visited = HashSet::new();
        match self.graph.get(&waiter) {
            Some(blockers) => blockers
                .iter()
                .any(|b| self.has_path(*b, waiter, &mut visited)),
            None => false,
        }
    }

    fn has_path(&self, from: TrxID, target: TrxID, visited: &mut HashSet<TrxID>) -> bool {
        if from == target {
            return true;
        }
        if !visited.insert(from) {
            return false;
        }
        if let Some(next) = self.graph.get(&from) {
            for &t in next {
                if self.has_path(t, target, visited) {
                    return true;
                }
            }
        }
        false
    }

    /// Check if there is a cycle in the wait-for graph.
    pub(crate) fn exists_cycle(&self) -> bool {
        let mut visited = HashSet::new();
        let mut rec_stack = HashSet::new();

        for &tid in self.graph.keys() {
            if self.is_cyclic(tid, &mut visited, &mut rec_stack) {
                return true;
            }
        }

        false
    }

    fn is_cyclic(
        &self,
        tid: TrxID,
        visited: &mut HashSet<TrxID>,
        rec_stack: &mut HashSet<TrxID>,
    ) -> bool {
        if !visited.contains(&tid) {
            visited.insert(tid);
            rec_stack.insert(tid);

            if let Some(transactions) = self.graph.get(&tid) {
                for &t in transactions {
                    if !visited.contains(&t) && self.is_cyclic(t, visited, rec_stack) {
                        return true;
                    } else if rec_stack.contains(&t) {
                        return true;
                    }
                }
            }
        }

        rec_stack.remove(&tid);
        false
    }
}

use std::collections::HashMap;

use crate::types::PageID;

struct LruNode {
    id: PageID,
    prev: Option<usize>,
    next: Option<usize>,
    old: bool,
}

/// Doubly linked LRU list over an arena of nodes. The head is the most
/// recently used end; the last `old_len` entries form the "old"
/// sub-list.
pub struct Lru {
    nodes: Vec<LruNode>,
    free: Vec<usize>,
    index: HashMap<PageID, usize>,
    head: Option<usize>,
    tail: Option<usize>,
    old_ratio: usize,
    old_len: usize,
}

impl Lru {
    pub fn new(old_ratio: usize) -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            index: HashMap::new(),
            head: None,
            tail: None,
            old_ratio: old_ratio.min(100),
            old_len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn contains(&self, id: &PageID) -> bool {
        self.index.contains_key(id)
    }

    pub fn old_len(&self) -> usize {
        self.old_len
    }

    pub fn is_old(&self, id: &PageID) -> bool {
        self.index
            .get(id)
            .map(|i| self.nodes[*i].old)
            .unwrap_or(false)
    }

    fn unlink(&mut self, i: usize) {
        let (prev, next) = (self.nodes[i].prev, self.nodes[i].next);
        match prev {
            Some(p) => self.nodes[p].next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => self.nodes[n].prev = prev,
            None => self.tail = prev,
        }
        self.nodes[i].prev = None;
        self.nodes[i].next = None;
    }

    fn push_head(&mut self, i: usize) {
        self.nodes[i].prev = None;
        self.nodes[i].next = self.head;
        if let Some(h) = self.head {
            self.nodes[h].prev = Some(i);
        }
        self.head = Some(i);
        if self.tail.is_none() {
            self.tail = Some(i);
        }
    }

    /// Insert at the young end. Adding a present id only touches it.
    pub fn add(&mut self, id: PageID) {
        if self.contains(&id) {
            self.touch(&id);
            return;
        }
        let node = LruNode {
            id,
            prev: None,
            next: None,
            old: false,
        };
        let i = match self.free.pop() {
            Some(i) => {
                self.nodes[i] = node;
                i
            }
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        };
        self.index.insert(id, i);
        self.push_head(i);
        self.recompute_old();
    }

    pub fn touch(&mut self, id: &PageID) {
        if let Some(&i) = self.index.get(id) {
            if self.head != Some(i) {
                self.unlink(i);
                self.push_head(i);
                self.recompute_old();
            }
        }
    }

    pub fn remove(&mut self, id: &PageID) -> bool {
        match self.index.remove(id) {
            Some(i) => {
                self.unlink(i);
                self.free.push(i);
                self.recompute_old();
                true
            }
            None => false,
        }
    }

    /// Mark the oldest `total * old_ratio / 100` entries (at least one
    /// when the list is not empty) as old.
    fn recompute_old(&mut self) {
        let total = self.len();
        let mut old_len = total * self.old_ratio / 100;
        if total > 0 && old_len == 0 {
            old_len = 1;
        }
        self.old_len = old_len;

        let mut cur = self.tail;
        let mut n = 0;
        while let Some(i) = cur {
            self.nodes[i].old = n < old_len;
            n += 1;
            cur = self.nodes[i].prev;
        }
    }

    /// Ids from the young end to the old end.
    pub fn ids(&self) -> Vec<PageID> {
        let mut out = Vec::with_capacity(self.len());
        let mut cur = self.head;
        while let Some(i) = cur {
            out.push(self.nodes[i].id);
            cur = self.nodes[i].next;
        }
        out
    }

    /// Ids from the old end to the young end.
    pub fn ids_from_tail(&self) -> Vec<PageID> {
        let mut out = Vec::with_capacity(self.len());
        let mut cur = self.tail;
        while let Some(i) = cur {
            out.push(self.nodes[i].id);
            cur = self.nodes[i].prev;
        }
        out
    }

    /// First entry from the tail that `skip` does not reject.
    pub fn victim<F: Fn(&PageID) -> bool>(&self, skip: F) -> Option<PageID> {
        let mut cur = self.tail;
        while let Some(i) = cur {
            let id = &self.nodes[i].id;
            if !skip(id) {
                return Some(*id);
            }
            cur = self.nodes[i].prev;
        }
        None
    }
}

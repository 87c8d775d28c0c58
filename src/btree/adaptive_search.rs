use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Mutex,
    },
};

use log::debug;

use crate::{
    btree::{
        page_tree::PageTree,
        tree::{BTree, NodeId},
    },
    config::AdaptiveSearchConfig,
    error::SmallError,
    types::{IndexID, PageNo},
    utils::HandyMutex,
};

#[derive(Debug, Clone, Copy)]
struct CachedPosition {
    node: NodeId,
    index: usize,
    mod_count: u64,
}

#[derive(Debug, Clone, Copy)]
struct CachedLeaf {
    page_no: PageNo,
    mod_count: u64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AdaptiveStats {
    pub hits: u64,
    pub misses: u64,
    pub entries: usize,
    pub clears: u64,
}

/// A hash shortcut from `(tree, key)` to the leaf position found by the
/// last search. An entry is trusted only while the tree's modification
/// stamp is unchanged.
pub struct AdaptiveSearch {
    enabled: AtomicBool,
    max_entries: usize,
    map: Mutex<HashMap<(u64, Vec<u8>), CachedPosition>>,
    leaves: Mutex<HashMap<(IndexID, Vec<u8>), CachedLeaf>>,
    hits: AtomicU64,
    misses: AtomicU64,
    clears: AtomicU64,
}

impl AdaptiveSearch {
    pub fn new(config: &AdaptiveSearchConfig) -> Self {
        Self {
            enabled: AtomicBool::new(config.enabled),
            max_entries: config.max_entries.max(1),
            map: Mutex::new(HashMap::new()),
            leaves: Mutex::new(HashMap::new()),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            clears: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::SeqCst)
    }

    /// Turning the cache off also drops its entries.
    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
        if !enabled {
            self.clear();
        }
    }

    /// Point lookup through the cache, falling back to the tree search.
    pub fn search<'a>(&self, tree: &'a BTree, key: &[u8]) -> Result<Option<&'a [u8]>, SmallError> {
        if !self.is_enabled() {
            return tree.search(key);
        }

        let cache_key = (tree.id(), key.to_vec());
        let cached = self.map.ml().get(&cache_key).copied();
        if let Some(pos) = cached {
            if pos.mod_count == tree.mod_count() {
                if let Some((k, v)) = tree.record_at(pos.node, pos.index) {
                    if tree.compare(k, key) == std::cmp::Ordering::Equal {
                        self.hits.fetch_add(1, Ordering::SeqCst);
                        return Ok(Some(v));
                    }
                }
            }
        }

        self.misses.fetch_add(1, Ordering::SeqCst);
        let (node, index) = match tree.search_position(key)? {
            Some(pos) => pos,
            None => return Ok(None),
        };
        let mut map = self.map.ml();
        if map.len() >= self.max_entries && !map.contains_key(&cache_key) {
            debug!("adaptive search cache full at {} entries, clearing", map.len());
            map.clear();
            self.clears.fetch_add(1, Ordering::SeqCst);
        }
        map.insert(
            cache_key,
            CachedPosition {
                node,
                index,
                mod_count: tree.mod_count(),
            },
        );
        drop(map);
        Ok(tree.record_at(node, index).map(|(_, v)| v))
    }

    /// Point lookup in a page tree. A hit reads the cached leaf only;
    /// the entry is trusted while the tree has not been modified.
    pub fn search_page(&self, tree: &PageTree, key: &[u8]) -> Result<Option<Vec<u8>>, SmallError> {
        if !self.is_enabled() {
            return tree.search(key);
        }

        let cache_key = (tree.index_id(), key.to_vec());
        let cached = self.leaves.ml().get(&cache_key).copied();
        if let Some(leaf) = cached {
            if leaf.mod_count == tree.mod_count() {
                if let Some(v) = tree.search_on_page(leaf.page_no, key)? {
                    self.hits.fetch_add(1, Ordering::SeqCst);
                    return Ok(Some(v));
                }
            }
        }

        self.misses.fetch_add(1, Ordering::SeqCst);
        let mod_count = tree.mod_count();
        let (page_no, value) = tree.search_leaf(key)?;
        if value.is_some() {
            let mut leaves = self.leaves.ml();
            if leaves.len() >= self.max_entries && !leaves.contains_key(&cache_key) {
                debug!("adaptive search leaf cache full at {} entries, clearing", leaves.len());
                leaves.clear();
                self.clears.fetch_add(1, Ordering::SeqCst);
            }
            leaves.insert(cache_key, CachedLeaf { page_no, mod_count });
        }
        Ok(value)
    }

    /// Drop the entries of one in-memory tree.
    pub fn drop_tree(&self, tree_id: u64) {
        self.map.ml().retain(|(id, _), _| *id != tree_id);
    }

    /// Drop the entries of one page tree.
    pub fn drop_index(&self, index_id: IndexID) {
        self.leaves.ml().retain(|(id, _), _| *id != index_id);
    }

    pub fn clear(&self) {
        self.map.ml().clear();
        self.leaves.ml().clear();
    }

    pub fn stats(&self) -> AdaptiveStats {
        AdaptiveStats {
            hits: self.hits.load(Ordering::SeqCst),
            misses: self.misses.load(Ordering::SeqCst),
            entries: self.map.ml().len() + self.leaves.ml().len(),
            clears: self.clears.load(Ordering::SeqCst),
        }
    }
}

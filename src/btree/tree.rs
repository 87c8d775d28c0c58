use std::{
    cmp::Ordering,
    fmt,
    sync::atomic::{AtomicU64, Ordering as AtomicOrdering},
};

use log::debug;

use crate::{
    btree::tree_cursor::TreeCursor,
    error::{ErrorKind, SmallError},
    record::{bytes_compare, CompareFn},
};

pub type NodeId = usize;

static NEXT_TREE_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone)]
pub(crate) struct Node {
    pub(crate) keys: Vec<Vec<u8>>,
    /// Leaf payloads, parallel to `keys`. Empty for internal nodes.
    pub(crate) values: Vec<Vec<u8>>,
    /// `keys.len() + 1` children for internal nodes, none for leaves.
    pub(crate) children: Vec<NodeId>,
    /// Right sibling of a leaf.
    pub(crate) next: Option<NodeId>,
    pub(crate) leaf: bool,
}

impl Node {
    fn new_leaf() -> Self {
        Self {
            keys: Vec::new(),
            values: Vec::new(),
            children: Vec::new(),
            next: None,
            leaf: true,
        }
    }

    fn new_internal() -> Self {
        Self {
            leaf: false,
            ..Self::new_leaf()
        }
    }
}

/// An in-memory B+ tree with the ordering and rebalancing rules of the
/// page-backed tree.
///
/// Nodes live in an arena and refer to each other by index. For an
/// internal node, `keys[i]` is the smallest key of the subtree under
/// `children[i + 1]`.
pub struct BTree {
    id: u64,
    order: usize,
    cmp: CompareFn,

    nodes: Vec<Option<Node>>,
    free: Vec<NodeId>,
    root: NodeId,

    size: usize,
    mod_count: u64,
}

impl BTree {
    /// A tree of order `m` holds at most `m - 1` keys per node.
    pub fn new(order: usize) -> Result<Self, SmallError> {
        Self::with_compare(order, bytes_compare)
    }

    pub fn with_compare(order: usize, cmp: CompareFn) -> Result<Self, SmallError> {
        if order < 3 {
            return Err(SmallError::invalid(&format!(
                "tree order must be at least 3, got {}",
                order
            )));
        }
        Ok(Self {
            id: NEXT_TREE_ID.fetch_add(1, AtomicOrdering::SeqCst),
            order,
            cmp,
            nodes: vec![Some(Node::new_leaf())],
            free: Vec::new(),
            root: 0,
            size: 0,
            mod_count: 0,
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn order(&self) -> usize {
        self.order
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    /// Stamp bumped by every mutation.
    pub fn mod_count(&self) -> u64 {
        self.mod_count
    }

    pub fn compare(&self, a: &[u8], b: &[u8]) -> Ordering {
        (self.cmp)(a, b)
    }

    pub fn max_keys(&self) -> usize {
        self.order - 1
    }

    pub fn min_leaf_keys(&self) -> usize {
        (self.order + 1) / 2
    }

    pub fn min_internal_keys(&self) -> usize {
        (self.order + 1) / 2 - 1
    }

    pub(crate) fn root(&self) -> NodeId {
        self.root
    }

    pub(crate) fn node(&self, id: NodeId) -> Result<&Node, SmallError> {
        match self.nodes.get(id) {
            Some(Some(n)) => Ok(n),
            _ => Err(dangling(self.id, id)),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> Result<&mut Node, SmallError> {
        let tree = self.id;
        match self.nodes.get_mut(id) {
            Some(Some(n)) => Ok(n),
            _ => Err(dangling(tree, id)),
        }
    }

    fn child(&self, node: &Node, idx: usize) -> Result<NodeId, SmallError> {
        node.children.get(idx).copied().ok_or_else(|| {
            SmallError::new(
                ErrorKind::InvalidState,
                &format!(
                    "tree {}: child {} of a node with {} children",
                    self.id,
                    idx,
                    node.children.len()
                ),
            )
        })
    }

    fn alloc(&mut self, node: Node) -> NodeId {
        match self.free.pop() {
            Some(id) => {
                self.nodes[id] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        }
    }

    fn dealloc(&mut self, id: NodeId) {
        if let Some(slot) = self.nodes.get_mut(id) {
            *slot = None;
            self.free.push(id);
        }
    }

    /// Child to descend into: the number of separators `<= key`.
    fn child_index(&self, node: &Node, key: &[u8]) -> usize {
        node.keys
            .partition_point(|k| self.compare(k, key) != Ordering::Greater)
    }

    fn leaf_search(&self, node: &Node, key: &[u8]) -> Result<usize, usize> {
        node.keys.binary_search_by(|k| self.compare(k, key))
    }

    /// Descend to the leaf that holds or would hold `key`, recording
    /// `(node, child index)` for each internal level.
    fn descend(&self, key: &[u8]) -> Result<(NodeId, Vec<(NodeId, usize)>), SmallError> {
        let mut path = Vec::new();
        let mut id = self.root;
        loop {
            let node = self.node(id)?;
            if node.leaf {
                return Ok((id, path));
            }
            let idx = self.child_index(node, key);
            path.push((id, idx));
            id = self.child(node, idx)?;
        }
    }

    pub fn height(&self) -> Result<usize, SmallError> {
        let mut h = 1;
        let mut node = self.node(self.root)?;
        while !node.leaf {
            node = self.node(self.child(node, 0)?)?;
            h += 1;
        }
        Ok(h)
    }

    pub fn search(&self, key: &[u8]) -> Result<Option<&[u8]>, SmallError> {
        let (leaf, _) = self.descend(key)?;
        let node = self.node(leaf)?;
        Ok(self
            .leaf_search(node, key)
            .ok()
            .map(|i| node.values[i].as_slice()))
    }

    /// Position of the key in its leaf, if present.
    pub fn search_position(&self, key: &[u8]) -> Result<Option<(NodeId, usize)>, SmallError> {
        let (leaf, _) = self.descend(key)?;
        Ok(self.leaf_search(self.node(leaf)?, key).ok().map(|i| (leaf, i)))
    }

    /// Record at a leaf position, if the position still exists.
    pub fn record_at(&self, node: NodeId, index: usize) -> Option<(&[u8], &[u8])> {
        match self.nodes.get(node) {
            Some(Some(n)) if n.leaf && index < n.keys.len() => {
                Some((n.keys[index].as_slice(), n.values[index].as_slice()))
            }
            _ => None,
        }
    }

    pub fn contains(&self, key: &[u8]) -> Result<bool, SmallError> {
        Ok(self.search(key)?.is_some())
    }

    // ---------------------------------------------------------------
    // insert
    // ---------------------------------------------------------------

    /// Insert or replace. Returns whether an existing value was
    /// replaced.
    pub fn insert(&mut self, key: &[u8], value: &[u8]) -> Result<bool, SmallError> {
        let (leaf, path) = self.descend(key)?;
        let pos = match self.leaf_search(self.node(leaf)?, key) {
            Ok(i) => {
                self.node_mut(leaf)?.values[i] = value.to_vec();
                self.mod_count += 1;
                return Ok(true);
            }
            Err(i) => i,
        };

        {
            let node = self.node_mut(leaf)?;
            node.keys.insert(pos, key.to_vec());
            node.values.insert(pos, value.to_vec());
        }
        self.size += 1;
        self.mod_count += 1;

        if self.node(leaf)?.keys.len() > self.max_keys() {
            self.split(leaf, path)?;
        }
        Ok(false)
    }

    fn split(&mut self, mut id: NodeId, mut path: Vec<(NodeId, usize)>) -> Result<(), SmallError> {
        loop {
            let (sep, right) = if self.node(id)?.leaf {
                self.split_leaf(id)?
            } else {
                self.split_internal(id)?
            };

            match path.pop() {
                None => {
                    let mut root = Node::new_internal();
                    root.keys.push(sep);
                    root.children.push(id);
                    root.children.push(right);
                    self.root = self.alloc(root);
                    debug!("tree {}: root split, height {}", self.id, self.height()?);
                    return Ok(());
                }
                Some((parent, idx)) => {
                    let max = self.max_keys();
                    let p = self.node_mut(parent)?;
                    p.keys.insert(idx, sep);
                    p.children.insert(idx + 1, right);
                    if p.keys.len() <= max {
                        return Ok(());
                    }
                    id = parent;
                }
            }
        }
    }

    /// Move the upper half of the leaf to a new right sibling. The
    /// sibling's first key is copied up.
    fn split_leaf(&mut self, id: NodeId) -> Result<(Vec<u8>, NodeId), SmallError> {
        let (keys, values, next) = {
            let node = self.node_mut(id)?;
            let mid = (node.keys.len() + 1) / 2;
            (node.keys.split_off(mid), node.values.split_off(mid), node.next)
        };
        let sep = keys.first().cloned().unwrap_or_default();
        let mut right = Node::new_leaf();
        right.keys = keys;
        right.values = values;
        right.next = next;
        let right_id = self.alloc(right);
        self.node_mut(id)?.next = Some(right_id);
        Ok((sep, right_id))
    }

    /// Move the keys above the median to a new right sibling. The
    /// median moves up.
    fn split_internal(&mut self, id: NodeId) -> Result<(Vec<u8>, NodeId), SmallError> {
        let (sep, keys, children) = {
            let node = self.node_mut(id)?;
            let mid = node.keys.len() / 2;
            let keys = node.keys.split_off(mid + 1);
            let sep = node.keys.pop().unwrap_or_default();
            let children = node.children.split_off(mid + 1);
            (sep, keys, children)
        };
        let mut right = Node::new_internal();
        right.keys = keys;
        right.children = children;
        Ok((sep, self.alloc(right)))
    }

    // ---------------------------------------------------------------
    // delete
    // ---------------------------------------------------------------

    /// Remove the key, returning its value.
    pub fn delete(&mut self, key: &[u8]) -> Result<Option<Vec<u8>>, SmallError> {
        let (leaf, path) = self.descend(key)?;
        let pos = match self.leaf_search(self.node(leaf)?, key) {
            Ok(i) => i,
            Err(_) => return Ok(None),
        };
        let value = {
            let node = self.node_mut(leaf)?;
            node.keys.remove(pos);
            node.values.remove(pos)
        };
        self.size -= 1;
        self.mod_count += 1;

        self.rebalance(leaf, path)?;
        if pos == 0 {
            self.fix_separator(key)?;
        }
        Ok(Some(value))
    }

    fn rebalance(&mut self, mut id: NodeId, mut path: Vec<(NodeId, usize)>) -> Result<(), SmallError> {
        loop {
            let (parent, idx) = match path.pop() {
                None => {
                    let root = self.node(id)?;
                    if !root.leaf && root.keys.is_empty() {
                        let child = self.child(root, 0)?;
                        self.dealloc(id);
                        self.root = child;
                        debug!("tree {}: root collapsed", self.id);
                    }
                    return Ok(());
                }
                Some(p) => p,
            };

            let node = self.node(id)?;
            let min = if node.leaf {
                self.min_leaf_keys()
            } else {
                self.min_internal_keys()
            };
            if node.keys.len() >= min {
                return Ok(());
            }
            let leaf = node.leaf;

            let (left, right) = {
                let p = self.node(parent)?;
                let left = match idx {
                    0 => None,
                    _ => Some(self.child(p, idx - 1)?),
                };
                (left, p.children.get(idx + 1).copied())
            };

            if let Some(l) = left {
                if self.node(l)?.keys.len() > min {
                    if leaf {
                        self.borrow_from_left_leaf(parent, idx, l, id)?;
                    } else {
                        self.borrow_from_left_internal(parent, idx, l, id)?;
                    }
                    return Ok(());
                }
            }
            if let Some(r) = right {
                if self.node(r)?.keys.len() > min {
                    if leaf {
                        self.borrow_from_right_leaf(parent, idx, id, r)?;
                    } else {
                        self.borrow_from_right_internal(parent, idx, id, r)?;
                    }
                    return Ok(());
                }
            }

            let (sep_idx, into) = match (left, right) {
                (Some(l), _) => {
                    self.merge(parent, idx - 1, l, id)?;
                    (idx - 1, l)
                }
                (None, Some(r)) => {
                    self.merge(parent, idx, id, r)?;
                    (idx, id)
                }
                (None, None) => return Ok(()),
            };
            // with an odd order two minimal nodes can overflow once merged
            if self.node(into)?.keys.len() > self.max_keys() {
                let (sep, new_right) = if leaf {
                    self.split_leaf(into)?
                } else {
                    self.split_internal(into)?
                };
                let p = self.node_mut(parent)?;
                p.keys.insert(sep_idx, sep);
                p.children.insert(sep_idx + 1, new_right);
                return Ok(());
            }
            id = parent;
        }
    }

    fn borrow_from_left_leaf(
        &mut self,
        parent: NodeId,
        idx: usize,
        left: NodeId,
        id: NodeId,
    ) -> Result<(), SmallError> {
        let (k, v) = {
            let l = self.node_mut(left)?;
            let k = l.keys.pop().unwrap_or_default();
            let v = l.values.pop().unwrap_or_default();
            (k, v)
        };
        {
            let node = self.node_mut(id)?;
            node.keys.insert(0, k.clone());
            node.values.insert(0, v);
        }
        self.node_mut(parent)?.keys[idx - 1] = k;
        Ok(())
    }

    fn borrow_from_right_leaf(
        &mut self,
        parent: NodeId,
        idx: usize,
        id: NodeId,
        right: NodeId,
    ) -> Result<(), SmallError> {
        let (k, v, new_min) = {
            let r = self.node_mut(right)?;
            let k = r.keys.remove(0);
            let v = r.values.remove(0);
            (k, v, r.keys.first().cloned().unwrap_or_default())
        };
        {
            let node = self.node_mut(id)?;
            node.keys.push(k);
            node.values.push(v);
        }
        self.node_mut(parent)?.keys[idx] = new_min;
        Ok(())
    }

    fn borrow_from_left_internal(
        &mut self,
        parent: NodeId,
        idx: usize,
        left: NodeId,
        id: NodeId,
    ) -> Result<(), SmallError> {
        let (k, child) = {
            let l = self.node_mut(left)?;
            (l.keys.pop().unwrap_or_default(), l.children.pop().unwrap_or_default())
        };
        let sep = std::mem::replace(&mut self.node_mut(parent)?.keys[idx - 1], k);
        let node = self.node_mut(id)?;
        node.keys.insert(0, sep);
        node.children.insert(0, child);
        Ok(())
    }

    fn borrow_from_right_internal(
        &mut self,
        parent: NodeId,
        idx: usize,
        id: NodeId,
        right: NodeId,
    ) -> Result<(), SmallError> {
        let (k, child) = {
            let r = self.node_mut(right)?;
            (r.keys.remove(0), r.children.remove(0))
        };
        let sep = std::mem::replace(&mut self.node_mut(parent)?.keys[idx], k);
        let node = self.node_mut(id)?;
        node.keys.push(sep);
        node.children.push(child);
        Ok(())
    }

    /// Fold `right` (child `sep_idx + 1` of the parent) into `left`.
    fn merge(&mut self, parent: NodeId, sep_idx: usize, left: NodeId, right: NodeId) -> Result<(), SmallError> {
        let tree = self.id;
        let r = self
            .nodes
            .get_mut(right)
            .and_then(Option::take)
            .ok_or_else(|| dangling(tree, right))?;
        self.free.push(right);
        let sep = {
            let p = self.node_mut(parent)?;
            p.children.remove(sep_idx + 1);
            p.keys.remove(sep_idx)
        };
        let l = self.node_mut(left)?;
        if l.leaf {
            l.keys.extend(r.keys);
            l.values.extend(r.values);
            l.next = r.next;
        } else {
            l.keys.push(sep);
            l.keys.extend(r.keys);
            l.children.extend(r.children);
        }
        Ok(())
    }

    /// Replace any separator equal to the removed key by the new minimum
    /// of the subtree right of it.
    fn fix_separator(&mut self, removed: &[u8]) -> Result<(), SmallError> {
        let mut id = self.root;
        loop {
            let node = self.node(id)?;
            if node.leaf {
                return Ok(());
            }
            if let Ok(i) = node.keys.binary_search_by(|k| self.compare(k, removed)) {
                let child = self.child(node, i + 1)?;
                if let Some(min) = self.min_key(child)? {
                    self.node_mut(id)?.keys[i] = min;
                }
                return Ok(());
            }
            let idx = self.child_index(node, removed);
            id = self.child(node, idx)?;
        }
    }

    fn min_key(&self, id: NodeId) -> Result<Option<Vec<u8>>, SmallError> {
        let leaf = self.leftmost_leaf(id)?;
        Ok(self.node(leaf)?.keys.first().cloned())
    }

    // ---------------------------------------------------------------
    // navigation
    // ---------------------------------------------------------------

    pub(crate) fn leftmost_leaf(&self, mut id: NodeId) -> Result<NodeId, SmallError> {
        loop {
            let node = self.node(id)?;
            if node.leaf {
                return Ok(id);
            }
            id = self.child(node, 0)?;
        }
    }

    pub(crate) fn rightmost_leaf(&self, mut id: NodeId) -> Result<NodeId, SmallError> {
        loop {
            let node = self.node(id)?;
            if node.leaf {
                return Ok(id);
            }
            id = self.child(node, node.children.len().saturating_sub(1))?;
        }
    }

    /// Leaf to the left of `leaf`. Leaves only link rightwards, so this
    /// walks down from the root.
    pub(crate) fn prev_leaf(&self, leaf: NodeId) -> Result<Option<NodeId>, SmallError> {
        let first = match self.node(leaf)?.keys.first() {
            Some(k) => k,
            None => return Ok(None),
        };
        let mut id = self.root;
        let mut branch = None;
        loop {
            let node = self.node(id)?;
            if node.leaf {
                break;
            }
            let idx = self.child_index(node, first);
            if idx > 0 {
                branch = Some(self.child(node, idx - 1)?);
            }
            id = self.child(node, idx)?;
        }
        branch.map(|b| self.rightmost_leaf(b)).transpose()
    }

    pub fn first(&self) -> Result<TreeCursor<'_>, SmallError> {
        let leaf = self.leftmost_leaf(self.root)?;
        let mut cur = TreeCursor::new(self, leaf, 0);
        cur.skip_empty_forward()?;
        Ok(cur)
    }

    pub fn last(&self) -> Result<TreeCursor<'_>, SmallError> {
        let leaf = self.rightmost_leaf(self.root)?;
        let n = self.node(leaf)?.keys.len();
        if n == 0 {
            return Ok(TreeCursor::invalid(self));
        }
        Ok(TreeCursor::new(self, leaf, n - 1))
    }

    /// Cursor on the first key `>= key`.
    pub fn seek(&self, key: &[u8]) -> Result<TreeCursor<'_>, SmallError> {
        let (leaf, _) = self.descend(key)?;
        let idx = match self.leaf_search(self.node(leaf)?, key) {
            Ok(i) | Err(i) => i,
        };
        let mut cur = TreeCursor::new(self, leaf, idx);
        cur.skip_empty_forward()?;
        Ok(cur)
    }

    /// Cursor on the last key `<= key`.
    pub fn seek_le(&self, key: &[u8]) -> Result<TreeCursor<'_>, SmallError> {
        let mut cur = self.seek(key)?;
        if !cur.is_valid() {
            return self.last();
        }
        if self.compare(cur.key(), key) == Ordering::Greater {
            cur.prev()?;
        }
        Ok(cur)
    }

    pub fn iter(&self) -> Result<TreeIter<'_>, SmallError> {
        Ok(TreeIter {
            cursor: self.first()?,
        })
    }

    // ---------------------------------------------------------------
    // checks
    // ---------------------------------------------------------------

    /// Structural check: keys strictly increasing inside each node and
    /// within the bounds set by the parent, `keys + 1` children per
    /// internal node, every leaf at the same depth, and a leaf chain
    /// that visits the leaves left to right. Occupancy is not checked.
    pub fn validate(&self) -> Result<(), SmallError> {
        let mut leaves = Vec::new();
        let mut leaf_depth = None;
        let count = self.validate_node(self.root, None, None, 1, &mut leaf_depth, &mut leaves)?;
        if count != self.size {
            return Err(SmallError::invalid(&format!(
                "tree {}: size {} but {} keys in leaves",
                self.id, self.size, count
            )));
        }
        for pair in leaves.windows(2) {
            let next = self.node(pair[0])?.next;
            if next != Some(pair[1]) {
                return Err(SmallError::invalid(&format!(
                    "tree {}: leaf {} links to {:?}, expected {}",
                    self.id, pair[0], next, pair[1]
                )));
            }
        }
        if let Some(last) = leaves.last() {
            if self.node(*last)?.next.is_some() {
                return Err(SmallError::invalid(&format!(
                    "tree {}: rightmost leaf {} has a successor",
                    self.id, last
                )));
            }
        }
        Ok(())
    }

    fn validate_node(
        &self,
        id: NodeId,
        lower: Option<&[u8]>,
        upper: Option<&[u8]>,
        depth: usize,
        leaf_depth: &mut Option<usize>,
        leaves: &mut Vec<NodeId>,
    ) -> Result<usize, SmallError> {
        let node = self.node(id)?;
        let fail = |msg: String| Err(SmallError::invalid(&format!("tree {} node {}: {}", self.id, id, msg)));

        for pair in node.keys.windows(2) {
            if self.compare(&pair[0], &pair[1]) != Ordering::Less {
                return fail(format!("keys out of order: {:?} >= {:?}", pair[0], pair[1]));
            }
        }
        if let (Some(lo), Some(first)) = (lower, node.keys.first()) {
            if self.compare(first, lo) == Ordering::Less {
                return fail(format!("key {:?} below lower bound {:?}", first, lo));
            }
        }
        if let (Some(hi), Some(last)) = (upper, node.keys.last()) {
            if self.compare(last, hi) != Ordering::Less {
                return fail(format!("key {:?} not below upper bound {:?}", last, hi));
            }
        }
        if node.keys.len() > self.max_keys() {
            return fail(format!("{} keys exceed the maximum {}", node.keys.len(), self.max_keys()));
        }

        if node.leaf {
            if node.values.len() != node.keys.len() {
                return fail(format!("{} keys but {} values", node.keys.len(), node.values.len()));
            }
            match leaf_depth {
                Some(d) if *d != depth => {
                    return fail(format!("leaf at depth {}, expected {}", depth, d));
                }
                _ => *leaf_depth = Some(depth),
            }
            leaves.push(id);
            return Ok(node.keys.len());
        }

        if node.children.len() != node.keys.len() + 1 {
            return fail(format!("{} keys but {} children", node.keys.len(), node.children.len()));
        }
        let mut count = 0;
        for (i, child) in node.children.iter().enumerate() {
            let lo = if i == 0 { lower } else { Some(node.keys[i - 1].as_slice()) };
            let hi = if i == node.keys.len() { upper } else { Some(node.keys[i].as_slice()) };
            count += self.validate_node(*child, lo, hi, depth + 1, leaf_depth, leaves)?;
        }
        Ok(count)
    }

    /// Every separator equals the smallest key of the subtree to its
    /// right.
    pub fn check_node_ptrs(&self) -> Result<(), SmallError> {
        let mut stack = vec![self.root];
        while let Some(id) = stack.pop() {
            let node = self.node(id)?;
            if node.leaf {
                continue;
            }
            for (i, sep) in node.keys.iter().enumerate() {
                let min = self.min_key(self.child(node, i + 1)?)?;
                if min.as_deref() != Some(sep.as_slice()) {
                    return Err(SmallError::invalid(&format!(
                        "tree {} node {}: separator {:?} but child minimum {:?}",
                        self.id, id, sep, min
                    )));
                }
            }
            stack.extend(node.children.iter().copied());
        }
        Ok(())
    }

    pub fn print_size(&self) -> String {
        let (mut nodes, mut keys, mut leaves) = (0, 0, 0);
        for node in self.nodes.iter().flatten() {
            nodes += 1;
            keys += node.keys.len();
            if node.leaf {
                leaves += 1;
            }
        }
        format!("nodes={} keys={} leaves={}", nodes, keys, leaves)
    }
}

fn dangling(tree: u64, id: NodeId) -> SmallError {
    SmallError::new(
        ErrorKind::InvalidState,
        &format!("tree {}: dangling node id {}", tree, id),
    )
}

impl fmt::Debug for BTree {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "<BTree id={} order={} size={} height={}>",
            self.id,
            self.order,
            self.size,
            self.height().unwrap_or(0)
        )
    }
}

/// Forward iterator over `(key, value)` pairs. A broken link ends the
/// iteration with the error.
pub struct TreeIter<'a> {
    cursor: TreeCursor<'a>,
}

impl<'a> Iterator for TreeIter<'a> {
    type Item = Result<(&'a [u8], &'a [u8]), SmallError>;

    fn next(&mut self) -> Option<Self::Item> {
        let item = self.cursor.record()?;
        match self.cursor.next() {
            Ok(_) => Some(Ok(item)),
            Err(e) => {
                self.cursor.invalidate();
                Some(Err(e))
            }
        }
    }
}

use crate::{
    btree::tree::{BTree, NodeId},
    error::SmallError,
};

/// A position in a leaf of a `BTree`. The cursor borrows the tree, so
/// it cannot outlive a mutation; use a persistent cursor for that.
#[derive(Clone)]
pub struct TreeCursor<'a> {
    tree: &'a BTree,
    node: NodeId,
    index: usize,
    valid: bool,
}

impl<'a> TreeCursor<'a> {
    pub(crate) fn new(tree: &'a BTree, node: NodeId, index: usize) -> Self {
        Self {
            tree,
            node,
            index,
            valid: true,
        }
    }

    pub(crate) fn invalid(tree: &'a BTree) -> Self {
        Self {
            tree,
            node: tree.root(),
            index: 0,
            valid: false,
        }
    }

    /// Step off the end of an exhausted leaf onto the next non-empty
    /// one, or become invalid.
    pub(crate) fn skip_empty_forward(&mut self) -> Result<(), SmallError> {
        while self.valid {
            let node = self.tree.node(self.node)?;
            if self.index < node.keys.len() {
                break;
            }
            match node.next {
                Some(next) => {
                    self.node = next;
                    self.index = 0;
                }
                None => self.valid = false,
            }
        }
        Ok(())
    }

    pub(crate) fn invalidate(&mut self) {
        self.valid = false;
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn tree(&self) -> &'a BTree {
        self.tree
    }

    pub fn position(&self) -> (NodeId, usize) {
        (self.node, self.index)
    }

    pub fn record(&self) -> Option<(&'a [u8], &'a [u8])> {
        if !self.valid {
            return None;
        }
        self.tree.record_at(self.node, self.index)
    }

    /// Key under the cursor. Empty when the cursor is invalid.
    pub fn key(&self) -> &'a [u8] {
        self.record().map(|(k, _)| k).unwrap_or(&[])
    }

    pub fn value(&self) -> &'a [u8] {
        self.record().map(|(_, v)| v).unwrap_or(&[])
    }

    /// Advance, following the leaf link. Returns whether the cursor is
    /// still on a record.
    pub fn next(&mut self) -> Result<bool, SmallError> {
        if !self.valid {
            return Ok(false);
        }
        self.index += 1;
        self.skip_empty_forward()?;
        Ok(self.valid)
    }

    pub fn prev(&mut self) -> Result<bool, SmallError> {
        if !self.valid {
            return Ok(false);
        }
        if self.index > 0 {
            self.index -= 1;
            return Ok(true);
        }
        let mut leaf = self.node;
        loop {
            match self.tree.prev_leaf(leaf)? {
                Some(p) => {
                    let n = self.tree.node(p)?.keys.len();
                    if n > 0 {
                        self.node = p;
                        self.index = n - 1;
                        return Ok(true);
                    }
                    leaf = p;
                }
                None => {
                    self.valid = false;
                    return Ok(false);
                }
            }
        }
    }
}

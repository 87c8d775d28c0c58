use std::cmp::Ordering;

use crate::{
    btree::{
        page_cursor::PageCursor,
        page_tree::PageTree,
        tree::BTree,
        tree_cursor::TreeCursor,
    },
    error::SmallError,
};

/// Where a stored position sits relative to the stored key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelPos {
    On,
    Before,
    After,
    BeforeFirst,
    AfterLast,
}

/// The cursor operations a persistent cursor needs.
pub trait LeafCursor {
    fn is_valid(&self) -> bool;
    fn key(&self) -> &[u8];
    fn step_next(&mut self) -> Result<bool, SmallError>;
    fn step_prev(&mut self) -> Result<bool, SmallError>;
}

/// A tree a persistent cursor can be restored on.
pub trait SeekTree<'a> {
    type Cursor: LeafCursor;

    fn seek_ge(&'a self, key: &[u8]) -> Result<Self::Cursor, SmallError>;
    fn seek_le(&'a self, key: &[u8]) -> Result<Self::Cursor, SmallError>;
    fn first_record(&'a self) -> Result<Self::Cursor, SmallError>;
    fn unpositioned(&'a self) -> Result<Self::Cursor, SmallError>;
    fn compare_keys(&self, a: &[u8], b: &[u8]) -> Ordering;
}

impl<'a> LeafCursor for TreeCursor<'a> {
    fn is_valid(&self) -> bool {
        TreeCursor::is_valid(self)
    }

    fn key(&self) -> &[u8] {
        TreeCursor::key(self)
    }

    fn step_next(&mut self) -> Result<bool, SmallError> {
        self.next()
    }

    fn step_prev(&mut self) -> Result<bool, SmallError> {
        self.prev()
    }
}

impl<'a> SeekTree<'a> for BTree {
    type Cursor = TreeCursor<'a>;

    fn seek_ge(&'a self, key: &[u8]) -> Result<Self::Cursor, SmallError> {
        self.seek(key)
    }

    fn seek_le(&'a self, key: &[u8]) -> Result<Self::Cursor, SmallError> {
        BTree::seek_le(self, key)
    }

    fn first_record(&'a self) -> Result<Self::Cursor, SmallError> {
        self.first()
    }

    fn unpositioned(&'a self) -> Result<Self::Cursor, SmallError> {
        Ok(TreeCursor::invalid(self))
    }

    fn compare_keys(&self, a: &[u8], b: &[u8]) -> Ordering {
        self.compare(a, b)
    }
}

impl<'a> LeafCursor for PageCursor<'a> {
    fn is_valid(&self) -> bool {
        PageCursor::is_valid(self)
    }

    fn key(&self) -> &[u8] {
        PageCursor::key(self)
    }

    fn step_next(&mut self) -> Result<bool, SmallError> {
        self.next()
    }

    fn step_prev(&mut self) -> Result<bool, SmallError> {
        self.prev()
    }
}

impl<'a> SeekTree<'a> for PageTree {
    type Cursor = PageCursor<'a>;

    fn seek_ge(&'a self, key: &[u8]) -> Result<Self::Cursor, SmallError> {
        self.seek(key)
    }

    fn seek_le(&'a self, key: &[u8]) -> Result<Self::Cursor, SmallError> {
        PageTree::seek_le(self, key)
    }

    fn first_record(&'a self) -> Result<Self::Cursor, SmallError> {
        self.first()
    }

    fn unpositioned(&'a self) -> Result<Self::Cursor, SmallError> {
        // seek past the last record
        let mut cur = self.last()?;
        if cur.is_valid() {
            cur.next()?;
        }
        Ok(cur)
    }

    fn compare_keys(&self, a: &[u8], b: &[u8]) -> Ordering {
        crate::record::bytes_compare(a, b)
    }
}

/// A cursor position that survives changes to the tree: the key under
/// the cursor and where the cursor stood relative to it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistentCursor {
    key: Option<Vec<u8>>,
    rel_pos: RelPos,
}

impl Default for PersistentCursor {
    fn default() -> Self {
        Self::new()
    }
}

impl PersistentCursor {
    pub fn new() -> Self {
        Self {
            key: None,
            rel_pos: RelPos::BeforeFirst,
        }
    }

    pub fn rel_pos(&self) -> RelPos {
        self.rel_pos
    }

    pub fn stored_key(&self) -> Option<&[u8]> {
        self.key.as_deref()
    }

    /// Remember the record under the cursor. A cursor that ran off the
    /// tree is stored as after-last.
    pub fn store<C: LeafCursor>(&mut self, cursor: &C) {
        if cursor.is_valid() {
            self.key = Some(cursor.key().to_vec());
            self.rel_pos = RelPos::On;
        } else {
            self.key = None;
            self.rel_pos = RelPos::AfterLast;
        }
    }

    /// Remember a position next to a key that need not exist.
    pub fn store_relative(&mut self, key: &[u8], rel_pos: RelPos) {
        match rel_pos {
            RelPos::BeforeFirst | RelPos::AfterLast => self.key = None,
            _ => self.key = Some(key.to_vec()),
        }
        self.rel_pos = rel_pos;
    }

    /// Position a cursor on the closest surviving record. The flag is
    /// true only when the stored key is still in the tree and the
    /// cursor is on it.
    pub fn restore<'a, T: SeekTree<'a>>(&self, tree: &'a T) -> Result<(T::Cursor, bool), SmallError> {
        let key = match (&self.key, self.rel_pos) {
            (_, RelPos::BeforeFirst) | (_, RelPos::AfterLast) | (None, _) => {
                return Ok((tree.unpositioned()?, false))
            }
            (Some(k), _) => k.as_slice(),
        };

        match self.rel_pos {
            RelPos::Before => {
                let mut cur = tree.seek_le(key)?;
                if cur.is_valid() && tree.compare_keys(cur.key(), key) == Ordering::Equal {
                    cur.step_prev()?;
                }
                Ok((cur, false))
            }
            RelPos::After => {
                let mut cur = tree.seek_ge(key)?;
                if cur.is_valid() && tree.compare_keys(cur.key(), key) == Ordering::Equal {
                    cur.step_next()?;
                }
                Ok((cur, false))
            }
            _ => {
                let cur = tree.seek_le(key)?;
                if !cur.is_valid() {
                    return Ok((tree.first_record()?, false));
                }
                let exact = tree.compare_keys(cur.key(), key) == Ordering::Equal;
                Ok((cur, exact))
            }
        }
    }
}

use crate::{
    btree::page_tree::{leaf_entries, PageTree},
    error::SmallError,
    page::IndexPage,
    types::{PageNo, NULL_PAGE_NO},
};

/// A position in the leaf level of a `PageTree`.
///
/// The cursor keeps a copy of the records of its current leaf and walks
/// the level through the sibling links, so it does not pin any page
/// between calls. Changes to the tree made after the leaf was loaded
/// are not seen until the cursor moves to another leaf.
pub struct PageCursor<'a> {
    tree: &'a PageTree,
    page_no: PageNo,
    prev: PageNo,
    next: PageNo,
    records: Vec<(Vec<u8>, Vec<u8>)>,
    index: usize,
    valid: bool,
}

impl<'a> PageCursor<'a> {
    /// Cursor on the `index`-th record of the leaf, moving on to the
    /// following leaves when that one is exhausted.
    pub(crate) fn open(tree: &'a PageTree, leaf: PageNo, index: usize) -> Result<Self, SmallError> {
        let mut cur = Self {
            tree,
            page_no: leaf,
            prev: NULL_PAGE_NO,
            next: NULL_PAGE_NO,
            records: Vec::new(),
            index,
            valid: true,
        };
        cur.load(leaf)?;
        cur.skip_forward()?;
        Ok(cur)
    }

    /// Cursor on the last record at or before the leaf.
    pub(crate) fn open_at_end(tree: &'a PageTree, leaf: PageNo) -> Result<Self, SmallError> {
        let mut cur = Self::open(tree, leaf, 0)?;
        if cur.page_no != leaf || !cur.valid {
            cur.valid = true;
            cur.load(leaf)?;
            cur.index = 0;
            cur.step_back_page()?;
            return Ok(cur);
        }
        cur.index = cur.records.len() - 1;
        Ok(cur)
    }

    fn load(&mut self, page_no: PageNo) -> Result<(), SmallError> {
        let (records, prev, next) = self.tree.read_page(page_no, |page| {
            let p = IndexPage::new(page);
            Ok((leaf_entries(page)?, p.prev(), p.next()))
        })?;
        self.page_no = page_no;
        self.records = records;
        self.prev = prev;
        self.next = next;
        Ok(())
    }

    fn skip_forward(&mut self) -> Result<(), SmallError> {
        while self.valid && self.index >= self.records.len() {
            if self.next == NULL_PAGE_NO {
                self.valid = false;
            } else {
                let next = self.next;
                self.load(next)?;
                self.index = 0;
            }
        }
        Ok(())
    }

    /// Move to the last record of the nearest non-empty leaf on the
    /// left, or become invalid.
    fn step_back_page(&mut self) -> Result<(), SmallError> {
        loop {
            if self.prev == NULL_PAGE_NO {
                self.valid = false;
                return Ok(());
            }
            let prev = self.prev;
            self.load(prev)?;
            if !self.records.is_empty() {
                self.index = self.records.len() - 1;
                return Ok(());
            }
        }
    }

    pub fn is_valid(&self) -> bool {
        self.valid
    }

    pub fn page_no(&self) -> PageNo {
        self.page_no
    }

    pub fn record(&self) -> Option<(&[u8], &[u8])> {
        if !self.valid {
            return None;
        }
        self.records
            .get(self.index)
            .map(|(k, v)| (k.as_slice(), v.as_slice()))
    }

    /// Key under the cursor. Empty when the cursor is invalid.
    pub fn key(&self) -> &[u8] {
        self.record().map(|(k, _)| k).unwrap_or(&[])
    }

    pub fn value(&self) -> &[u8] {
        self.record().map(|(_, v)| v).unwrap_or(&[])
    }

    pub fn next(&mut self) -> Result<bool, SmallError> {
        if !self.valid {
            return Ok(false);
        }
        self.index += 1;
        self.skip_forward()?;
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
        self.step_back_page()?;
        Ok(self.valid)
    }
}

use std::collections::{BTreeSet, HashMap};

use crate::{
    error::{ErrorKind, SmallError},
    types::SmallResult,
    utils::next_pow2,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BuddyBlock {
    pub offset: usize,
    pub size: usize,
}

/// Power-of-two allocator over a single arena. Blocks range from `low`
/// bytes up to the whole arena.
pub struct BuddyAllocator {
    low: usize,
    total: usize,
    // free offsets per level, level k holds blocks of `low << k` bytes
    free: Vec<BTreeSet<usize>>,
    used: HashMap<usize, usize>,
    arena: Vec<u8>,
}

impl BuddyAllocator {
    pub fn new(low: usize, total: usize) -> Self {
        let low = next_pow2(low.max(1));
        let total = next_pow2(total.max(low));
        let levels = (total / low).trailing_zeros() as usize + 1;
        let mut free = vec![BTreeSet::new(); levels];
        free[levels - 1].insert(0);
        Self {
            low,
            total,
            free,
            used: HashMap::new(),
            arena: vec![0u8; total],
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    fn block_size(&self, level: usize) -> usize {
        self.low << level
    }

    fn level_for(&self, size: usize) -> usize {
        let size = next_pow2(size.max(self.low));
        (size / self.low).trailing_zeros() as usize
    }

    pub fn alloc(&mut self, size: usize) -> Option<BuddyBlock> {
        if size > self.total {
            return None;
        }
        let want = self.level_for(size);
        let mut level = (want..self.free.len()).find(|l| !self.free[*l].is_empty())?;
        let offset = *self.free[level].iter().next()?;
        self.free[level].remove(&offset);

        while level > want {
            level -= 1;
            let buddy = offset + self.block_size(level);
            self.free[level].insert(buddy);
        }
        self.used.insert(offset, want);
        Some(BuddyBlock {
            offset,
            size: self.block_size(want),
        })
    }

    pub fn free(&mut self, block: BuddyBlock) -> SmallResult {
        let mut level = self.used.remove(&block.offset).ok_or_else(|| {
            SmallError::new(
                ErrorKind::InvalidState,
                &format!("buddy block at {} is not allocated", block.offset),
            )
        })?;
        let mut offset = block.offset;
        while level + 1 < self.free.len() {
            let buddy = offset ^ self.block_size(level);
            if !self.free[level].remove(&buddy) {
                break;
            }
            offset = offset.min(buddy);
            level += 1;
        }
        self.free[level].insert(offset);
        Ok(())
    }

    pub fn data(&self, block: &BuddyBlock) -> &[u8] {
        &self.arena[block.offset..block.offset + block.size]
    }

    pub fn data_mut(&mut self, block: &BuddyBlock) -> &mut [u8] {
        &mut self.arena[block.offset..block.offset + block.size]
    }

    pub fn free_bytes(&self) -> usize {
        self.free
            .iter()
            .enumerate()
            .map(|(l, set)| set.len() * self.block_size(l))
            .sum()
    }

    pub fn n_used(&self) -> usize {
        self.used.len()
    }
}

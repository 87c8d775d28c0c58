use std::{fmt, ops::BitOr};

use bit_vec::BitVec;

use crate::types::{IndexID, PageNo, SpaceID, TrxID};

pub type LockId = u64;

/// Lock modes, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LockMode {
    IS = 0,
    IX = 1,
    S = 2,
    X = 3,
}

// row = held, column = requested
const MODE_COMPAT: [[bool; 4]; 4] = [
    // IS    IX     S      X
    [true, true, true, false],    // IS
    [true, true, false, false],   // IX
    [true, false, true, false],   // S
    [false, false, false, false], // X
];

impl LockMode {
    pub fn compatible(self, other: LockMode) -> bool {
        MODE_COMPAT[self as usize][other as usize]
    }

    pub fn stronger_or_eq(self, other: LockMode) -> bool {
        self >= other
    }

    pub fn name(self) -> &'static str {
        match self {
            LockMode::IS => "IS",
            LockMode::IX => "IX",
            LockMode::S => "S",
            LockMode::X => "X",
        }
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Record lock flags. The empty set locks the record alone.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct LockFlags(u8);

impl LockFlags {
    pub const NONE: LockFlags = LockFlags(0);
    pub const WAIT: LockFlags = LockFlags(0x01);
    pub const GAP: LockFlags = LockFlags(0x02);
    pub const INSERT_INTENTION: LockFlags = LockFlags(0x04);
    pub const NEXT_KEY: LockFlags = LockFlags(0x08);

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, other: LockFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: LockFlags) -> bool {
        self.0 & other.0 != 0
    }

    pub fn without(self, other: LockFlags) -> LockFlags {
        LockFlags(self.0 & !other.0)
    }

    /// The lock covers the record itself.
    pub fn has_record(self) -> bool {
        if self.intersects(LockFlags::NEXT_KEY) {
            return true;
        }
        !self.intersects(LockFlags::GAP | LockFlags::INSERT_INTENTION)
    }

    /// The lock covers the gap before the record.
    pub fn has_gap(self) -> bool {
        self.intersects(LockFlags::GAP | LockFlags::INSERT_INTENTION | LockFlags::NEXT_KEY)
    }

    pub fn is_insert_intention(self) -> bool {
        self.intersects(LockFlags::INSERT_INTENTION)
    }
}

impl BitOr for LockFlags {
    type Output = LockFlags;

    fn bitor(self, rhs: LockFlags) -> LockFlags {
        LockFlags(self.0 | rhs.0)
    }
}

impl fmt::Debug for LockFlags {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let mut names = Vec::new();
        for (flag, name) in [
            (LockFlags::WAIT, "WAIT"),
            (LockFlags::GAP, "GAP"),
            (LockFlags::INSERT_INTENTION, "INSERT_INTENTION"),
            (LockFlags::NEXT_KEY, "NEXT_KEY"),
        ] {
            if self.contains(flag) {
                names.push(name);
            }
        }
        if names.is_empty() {
            write!(f, "REC")
        } else {
            write!(f, "{}", names.join("|"))
        }
    }
}

/// Whether a record lock request conflicts with a lock of another
/// transaction on the same record.
pub fn rec_lock_conflicts(
    req_mode: LockMode,
    req_flags: LockFlags,
    held_mode: LockMode,
    held_flags: LockFlags,
) -> bool {
    if req_flags.has_record() && held_flags.has_record() && !req_mode.compatible(held_mode) {
        return true;
    }
    if req_flags.has_gap() && held_flags.has_gap() {
        let (req_ii, held_ii) = (req_flags.is_insert_intention(), held_flags.is_insert_intention());
        if req_ii && held_ii {
            return false;
        }
        if req_ii || held_ii {
            return true;
        }
    }
    false
}

/// Outcome of a lock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockStatus {
    Granted,
    Wait,
    Deadlock,
}

/// A record inside a page, as seen by the lock manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub space: SpaceID,
    pub page_no: PageNo,
    pub heap_no: u16,
}

impl RecordKey {
    pub fn new(space: SpaceID, page_no: PageNo, heap_no: u16) -> Self {
        Self {
            space,
            page_no,
            heap_no,
        }
    }

    pub fn page_key(&self) -> (SpaceID, PageNo) {
        (self.space, self.page_no)
    }
}

/// A row named by its full key in one index. Two distinct keys never
/// share a lock.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RowKey {
    pub index: IndexID,
    pub key: Vec<u8>,
}

impl RowKey {
    pub fn new(index: IndexID, key: &[u8]) -> Self {
        Self {
            index,
            key: key.to_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockTarget {
    Table(String),
    Row(RowKey),
    /// One lock covers every record of the page whose heap number bit
    /// is set.
    Record {
        space: SpaceID,
        page_no: PageNo,
        heaps: BitVec,
    },
}

#[derive(Debug, Clone)]
pub struct Lock {
    pub id: LockId,
    pub trx: TrxID,
    pub mode: LockMode,
    pub flags: LockFlags,
    pub target: LockTarget,
}

impl Lock {
    pub fn is_waiting(&self) -> bool {
        self.flags.contains(LockFlags::WAIT)
    }

    pub fn has_bit(&self, heap_no: u16) -> bool {
        match &self.target {
            LockTarget::Record { heaps, .. } => heaps.get(heap_no as usize).unwrap_or(false),
            LockTarget::Table(_) | LockTarget::Row(_) => false,
        }
    }

    pub fn set_bit(&mut self, heap_no: u16) {
        if let LockTarget::Record { heaps, .. } = &mut self.target {
            let i = heap_no as usize;
            if i >= heaps.len() {
                let grow = i + 1 - heaps.len();
                heaps.grow(grow, false);
            }
            heaps.set(i, true);
        }
    }

    pub fn clear_bit(&mut self, heap_no: u16) {
        if let LockTarget::Record { heaps, .. } = &mut self.target {
            if (heap_no as usize) < heaps.len() {
                heaps.set(heap_no as usize, false);
            }
        }
    }

    pub fn has_any_bit(&self) -> bool {
        match &self.target {
            LockTarget::Record { heaps, .. } => heaps.any(),
            LockTarget::Table(_) | LockTarget::Row(_) => true,
        }
    }

    /// Heap numbers covered by a record lock.
    pub fn heap_nos(&self) -> Vec<u16> {
        match &self.target {
            LockTarget::Record { heaps, .. } => heaps
                .iter()
                .enumerate()
                .filter(|(_, set)| *set)
                .map(|(i, _)| i as u16)
                .collect(),
            LockTarget::Table(_) | LockTarget::Row(_) => Vec::new(),
        }
    }
}

pub mod buddy;
pub mod buffer_pool;
pub mod lru;
pub mod pool_set;
pub mod read_ahead;

pub use buddy::{BuddyAllocator, BuddyBlock};
pub use buffer_pool::{BufferPool, FlushObserver, Frame, Stats};
pub use lru::Lru;
pub use pool_set::BufferPools;
pub use read_ahead::ReadAhead;

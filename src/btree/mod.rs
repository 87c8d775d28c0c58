//! Ordered indexes: an in-memory B+ tree with cursors and the adaptive
//! search cache, and the B+ tree stored in index pages.

pub mod adaptive_search;
pub mod page_cursor;
pub mod page_tree;
pub mod pcur;
pub mod tree;
pub mod tree_cursor;

pub use adaptive_search::{AdaptiveSearch, AdaptiveStats};
pub use page_cursor::PageCursor;
pub use page_tree::PageTree;
pub use pcur::{LeafCursor, PersistentCursor, RelPos, SeekTree};
pub use tree::{BTree, TreeIter};
pub use tree_cursor::TreeCursor;

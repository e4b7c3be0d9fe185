//! Storage Engine
//!
//! The in-memory database and the purpose-built data structures beneath it.
//! Everything here is single-threaded by design: the event loop is the only
//! caller, so there are no locks anywhere in the data path.
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────┐
//! │                          Store                             │
//! │                                                            │
//! │   HMap<Entry> ── key index, incremental rehashing          │
//! │        │                                                   │
//! │        ├── Value::Str(Bytes)                               │
//! │        └── Value::ZSet ──┬── HMap<usize>  (by name)        │
//! │                          └── AVL tree     (by score,name)  │
//! │                                                            │
//! │   Vec<HeapItem> ── TTL min-heap with entry back-refs       │
//! └────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - `hmap`: chained hash map that rehashes a bounded amount per operation
//! - `avl`: size-augmented balanced tree over caller-owned arenas
//! - `zset`: sorted set composing the two indexes above
//! - `heap`: expiration min-heap whose items know their owners
//! - `engine`: the [`Store`] tying keys, values, and TTLs together

pub mod avl;
pub mod engine;
pub mod heap;
pub mod hmap;
pub mod zset;

pub use engine::{Entry, Store, Value, WrongType, MAX_EXPIRE_WORKS};
pub use hmap::{str_hash, HMap};
pub use zset::{ZNode, ZSet};

//! # EmberKV - An In-Memory Key-Value Store
//!
//! EmberKV is a small in-memory database serving strings and sorted sets
//! over a length-prefixed binary protocol. One thread runs everything: a
//! readiness-polling event loop multiplexes every client connection,
//! executes commands against shared state, and retires expired keys and
//! dead connections on deadlines. There are no locks because there is
//! nothing to lock against.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            EmberKV                              │
//! │                                                                 │
//! │  ┌────────────┐    ┌──────────────┐    ┌──────────────┐         │
//! │  │  poll()    │───>│  Connection  │───>│   Command    │         │
//! │  │  loop      │    │  buffers     │    │   dispatch   │         │
//! │  └────────────┘    └──────────────┘    └──────┬───────┘         │
//! │        │                                      │                 │
//! │        │ deadlines                            ▼                 │
//! │  ┌─────┴──────────────┐    ┌───────────────────────────────┐    │
//! │  │ idle list  io list │    │            Store              │    │
//! │  │ (intrusive, FIFO)  │    │  HMap ── incremental rehash   │    │
//! │  └────────────────────┘    │  ZSet ── hash + AVL indexes   │    │
//! │                            │  TTL  ── min-heap, back-refs  │    │
//! │                            └───────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Wire protocol
//!
//! Requests are frames of `len:u32 | nstr:u32 | (len:u32, bytes)*`;
//! responses are frames carrying one tagged value (nil, error, string,
//! int, double, or array). All integers are little-endian; frames top out
//! at 32 MiB. Pipelining works out of the box since frames are processed
//! in arrival order per connection.
//!
//! ## Commands
//!
//! `get`, `set`, `del`, `keys`, `zadd`, `zrem`, `zscore`, `zquery`,
//! `zqueryr`, `zcount`, `zrank`, `pexpire`, `pttl`. See
//! [`commands::handler`] for the exact shapes.
//!
//! ## Module Overview
//!
//! - [`buffer`]: the slide-and-grow byte FIFO under every connection
//! - [`protocol`]: request parsing and response serialization
//! - [`storage`]: the store and its purpose-built data structures
//! - [`commands`]: command dispatch and execution
//! - [`connection`]: connection state, timer lists, and the event loop
//! - [`clock`]: the monotonic millisecond clock behind every deadline
//!
//! ## Design Highlights
//!
//! ### Latency-shaped data structures
//!
//! The key index rehashes incrementally (128 nodes per operation, never a
//! full-table stall), the sorted set answers rank and offset queries in
//! O(log n) through subtree counts, and TTL deletion is O(log n) at any
//! heap position because every entry knows where its heap item sits.
//!
//! ### One thread, two deadline queues
//!
//! Connections sit on an idle list (5 s) or an io list (1 s) ordered by
//! last activity. Since both lists are FIFO, only their fronts are ever
//! inspected, and the poll timeout is exactly the nearest deadline.

pub mod buffer;
pub mod clock;
pub mod commands;
pub mod connection;
pub mod protocol;
pub mod storage;

pub use buffer::ByteBuf;
pub use connection::Server;
pub use protocol::{Reply, ReplyWriter};
pub use storage::Store;

/// The default port the server listens on.
pub const DEFAULT_PORT: u16 = 1234;

/// The default host the server binds to.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Version of EmberKV.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

//! The Store
//!
//! One keyspace mapping byte-string keys to either a string or a sorted
//! set, plus the TTL schedule. This is the single owner of every entry:
//! values are created when a command installs them and destroyed at exactly
//! one point, removal from the map.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │ Store                                               │
//! │                                                     │
//! │  entries: HMap<Entry>      ttl: Vec<HeapItem>       │
//! │  ┌───────────────────┐     ┌──────────────────┐     │
//! │  │ key ─ Value::Str  │◄────┤ (deadline, id)   │     │
//! │  │ key ─ Value::ZSet │     │ (deadline, id)   │     │
//! │  └───────────────────┘     └──────────────────┘     │
//! │        entry.heap_idx ────────────^                 │
//! └─────────────────────────────────────────────────────┘
//! ```
//!
//! The heap holds entry handles; each entry holds its current heap
//! position. Heap moves update the entry through a callback, so both sides
//! of the back-reference stay consistent without searching.
//!
//! Time never comes from a global here: every deadline-touching operation
//! takes `now_ms`, which makes TTL behavior fully testable.

use bytes::Bytes;
use thiserror::Error;
use tracing::debug;

use super::heap::{self, HeapItem};
use super::hmap::{str_hash, HMap};
use super::zset::ZSet;

/// Expirations processed per sweep call. Bounds the time the event loop
/// spends expiring keys in one tick; the rest waits for the next tick.
pub const MAX_EXPIRE_WORKS: usize = 2000;

/// The command asked for one value type but the key holds the other.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("value type mismatch")]
pub struct WrongType;

/// What a key maps to.
pub enum Value {
    Str(Bytes),
    ZSet(ZSet),
}

/// One keyspace row.
pub struct Entry {
    pub key: Bytes,
    pub value: Value,
    /// Position in the TTL heap; `None` when the entry never expires.
    heap_idx: Option<usize>,
}

/// Remaining TTL answers mirror the wire protocol: -2 missing key, -1 no
/// TTL, otherwise milliseconds left.
pub const PTTL_MISSING: i64 = -2;
pub const PTTL_PERSISTENT: i64 = -1;

/// The in-memory database.
pub struct Store {
    entries: HMap<Entry>,
    ttl: Vec<HeapItem>,
}

impl Store {
    pub fn new() -> Self {
        Self {
            entries: HMap::new(),
            ttl: Vec::new(),
        }
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn find(&mut self, key: &[u8]) -> Option<usize> {
        self.entries
            .lookup(str_hash(key), |entry| entry.key.as_ref() == key)
    }

    /// Reads a string value. `Ok(None)` when the key is absent.
    pub fn get(&mut self, key: &[u8]) -> Result<Option<Bytes>, WrongType> {
        match self.find(key) {
            None => Ok(None),
            Some(id) => match &self.entries.get(id).value {
                Value::Str(s) => Ok(Some(s.clone())),
                Value::ZSet(_) => Err(WrongType),
            },
        }
    }

    /// Installs or overwrites a string value. Overwriting keeps the
    /// entry's TTL.
    pub fn set(&mut self, key: Bytes, value: Bytes) -> Result<(), WrongType> {
        match self.find(&key) {
            Some(id) => match &mut self.entries.get_mut(id).value {
                Value::Str(s) => {
                    *s = value;
                    Ok(())
                }
                Value::ZSet(_) => Err(WrongType),
            },
            None => {
                let hcode = str_hash(&key);
                self.entries.insert(
                    hcode,
                    Entry {
                        key,
                        value: Value::Str(value),
                        heap_idx: None,
                    },
                );
                Ok(())
            }
        }
    }

    /// Removes a key of any type. Returns whether it existed.
    pub fn del(&mut self, key: &[u8]) -> bool {
        match self
            .entries
            .remove(str_hash(key), |entry| entry.key.as_ref() == key)
        {
            Some(entry) => {
                self.dispose(entry);
                true
            }
            None => false,
        }
    }

    /// Visits every key. Order is unspecified.
    pub fn keys(&self) -> impl Iterator<Item = &Bytes> {
        self.entries.iter().map(|(_, entry)| &entry.key)
    }

    /// Adds or rescores a sorted-set member, creating the set when the key
    /// is absent. Returns `true` when the member was new.
    pub fn zadd(
        &mut self,
        key: Bytes,
        score: ordered_float::NotNan<f64>,
        name: &[u8],
    ) -> Result<bool, WrongType> {
        let id = match self.find(&key) {
            Some(id) => id,
            None => {
                let hcode = str_hash(&key);
                self.entries.insert(
                    hcode,
                    Entry {
                        key,
                        value: Value::ZSet(ZSet::new()),
                        heap_idx: None,
                    },
                )
            }
        };
        match &mut self.entries.get_mut(id).value {
            Value::ZSet(zset) => Ok(zset.insert(name, score)),
            Value::Str(_) => Err(WrongType),
        }
    }

    /// Borrows a sorted set for reading. A missing key reads as `Ok(None)`
    /// and callers treat it as an empty set.
    pub fn zset(&mut self, key: &[u8]) -> Result<Option<&ZSet>, WrongType> {
        match self.find(key) {
            None => Ok(None),
            Some(id) => match &self.entries.get(id).value {
                Value::ZSet(zset) => Ok(Some(zset)),
                Value::Str(_) => Err(WrongType),
            },
        }
    }

    /// Borrows a sorted set for mutation; same missing-key contract as
    /// [`zset`](Self::zset).
    pub fn zset_mut(&mut self, key: &[u8]) -> Result<Option<&mut ZSet>, WrongType> {
        match self.find(key) {
            None => Ok(None),
            Some(id) => match &mut self.entries.get_mut(id).value {
                Value::ZSet(zset) => Ok(Some(zset)),
                Value::Str(_) => Err(WrongType),
            },
        }
    }

    /// Sets, replaces, or (with a negative `ttl_ms`) clears a key's TTL.
    /// Returns whether the key existed.
    pub fn pexpire(&mut self, key: &[u8], ttl_ms: i64, now_ms: u64) -> bool {
        match self.find(key) {
            Some(id) => {
                self.set_ttl(id, ttl_ms, now_ms);
                true
            }
            None => false,
        }
    }

    /// Remaining TTL in milliseconds; see [`PTTL_MISSING`] and
    /// [`PTTL_PERSISTENT`].
    pub fn pttl(&mut self, key: &[u8], now_ms: u64) -> i64 {
        match self.find(key) {
            None => PTTL_MISSING,
            Some(id) => match self.entries.get(id).heap_idx {
                None => PTTL_PERSISTENT,
                Some(pos) => {
                    let expires_at = self.ttl[pos].expires_at;
                    expires_at.saturating_sub(now_ms) as i64
                }
            },
        }
    }

    /// Deadline of the next expiration, for the event loop's poll timeout.
    pub fn next_expiry(&self) -> Option<u64> {
        self.ttl.first().map(|item| item.expires_at)
    }

    /// Removes entries whose deadline has passed, oldest first, up to
    /// `budget` of them. Returns how many were removed.
    pub fn sweep_expired(&mut self, now_ms: u64, budget: usize) -> usize {
        let mut removed = 0;
        while removed < budget {
            let Some(head) = self.ttl.first().copied() else {
                break;
            };
            if head.expires_at >= now_ms {
                break;
            }
            let entry = self
                .entries
                .remove_id(head.entry)
                .expect("ttl heap references a live entry");
            debug!(key = %String::from_utf8_lossy(&entry.key), "key expired");
            self.dispose(entry);
            removed += 1;
        }
        removed
    }

    fn set_ttl(&mut self, id: usize, ttl_ms: i64, now_ms: u64) {
        let current = self.entries.get(id).heap_idx;
        if ttl_ms < 0 {
            if let Some(pos) = current {
                let entries = &mut self.entries;
                heap::remove(&mut self.ttl, pos, &mut |moved, idx| {
                    entries.get_mut(moved).heap_idx = Some(idx);
                });
                self.entries.get_mut(id).heap_idx = None;
            }
        } else {
            let item = HeapItem {
                expires_at: now_ms + ttl_ms as u64,
                entry: id,
            };
            let entries = &mut self.entries;
            heap::upsert(&mut self.ttl, current, item, &mut |moved, idx| {
                entries.get_mut(moved).heap_idx = Some(idx);
            });
        }
    }

    /// Tears down an entry already detached from the map, dropping its TTL
    /// schedule with it.
    fn dispose(&mut self, entry: Entry) {
        if let Some(pos) = entry.heap_idx {
            let entries = &mut self.entries;
            heap::remove(&mut self.ttl, pos, &mut |moved, idx| {
                entries.get_mut(moved).heap_idx = Some(idx);
            });
        }
    }
}

impl Default for Store {
    fn default() -> Self {
        Self::new()
    }
}

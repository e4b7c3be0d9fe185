//! Sorted Set
//!
//! A set of (name, score) members indexed two ways at once:
//!
//! - by name, through a hash map, for point lookups and updates
//! - by (score, name), through a size-augmented AVL tree, for range
//!   queries, ranks, and ordered walks
//!
//! Members live in one slab; the hash index stores slab handles and the
//! tree's link blocks are embedded in the members themselves, so a single
//! allocation participates in both indexes. Membership in the two indexes
//! is always identical, and the tree key always reflects the member's
//! current score.
//!
//! Ordering is total: scores compare as IEEE-754 doubles (NaN is banned at
//! the type level), equal scores fall back to unsigned byte-wise name
//! comparison, and a shorter name sorts before its extensions.

use std::cmp::Ordering;

use bytes::Bytes;
use ordered_float::NotNan;

use super::avl::{self, AvlArena, AvlLinks};
use super::hmap::{str_hash, HMap};

/// One member of a sorted set.
pub struct ZNode {
    pub name: Bytes,
    pub score: NotNan<f64>,
    links: AvlLinks,
}

/// Name-and-score ordered set. Handles returned by lookups stay valid
/// until the member is removed.
pub struct ZSet {
    nodes: Vec<Option<ZNode>>,
    free: Vec<usize>,
    root: Option<usize>,
    by_name: HMap<usize>,
}

impl AvlArena for ZSet {
    fn links(&self, id: usize) -> &AvlLinks {
        &self.node(id).links
    }
    fn links_mut(&mut self, id: usize) -> &mut AvlLinks {
        &mut self.node_entry_mut(id).links
    }
}

impl ZSet {
    pub fn new() -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
            by_name: HMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }

    /// Borrows a member by handle.
    pub fn node(&self, id: usize) -> &ZNode {
        self.nodes[id].as_ref().expect("vacant zset slot")
    }

    fn node_entry_mut(&mut self, id: usize) -> &mut ZNode {
        self.nodes[id].as_mut().expect("vacant zset slot")
    }

    /// Adds a member or updates an existing member's score.
    /// Returns `true` when the name was new.
    pub fn insert(&mut self, name: &[u8], score: NotNan<f64>) -> bool {
        if let Some(id) = self.lookup(name) {
            self.update_score(id, score);
            return false;
        }
        let node = ZNode {
            name: Bytes::copy_from_slice(name),
            score,
            links: AvlLinks::new(),
        };
        let id = match self.free.pop() {
            Some(id) => {
                self.nodes[id] = Some(node);
                id
            }
            None => {
                self.nodes.push(Some(node));
                self.nodes.len() - 1
            }
        };
        self.by_name.insert(str_hash(name), id);
        self.tree_insert(id);
        true
    }

    /// Finds a member by name.
    pub fn lookup(&mut self, name: &[u8]) -> Option<usize> {
        if self.root.is_none() {
            return None;
        }
        let nodes = &self.nodes;
        let found = self.by_name.lookup(str_hash(name), |&id| {
            nodes[id].as_ref().is_some_and(|n| n.name.as_ref() == name)
        })?;
        Some(*self.by_name.get(found))
    }

    /// Detaches a member from both indexes and returns it.
    pub fn remove(&mut self, id: usize) -> ZNode {
        let hcode = str_hash(&self.node(id).name);
        let unindexed = self.by_name.remove(hcode, |&v| v == id);
        debug_assert!(unindexed.is_some());
        self.root = avl::remove(self, id);
        let node = self.nodes[id].take().expect("vacant zset slot");
        self.free.push(id);
        node
    }

    /// Smallest member not less than (score, name).
    pub fn seekge(&self, score: NotNan<f64>, name: &[u8]) -> Option<usize> {
        let mut found = None;
        let mut cur = self.root;
        while let Some(c) = cur {
            if self.node_below_key(c, score, name) {
                cur = self.links(c).right;
            } else {
                found = Some(c);
                cur = self.links(c).left;
            }
        }
        found
    }

    /// Largest member not greater than (score, name).
    pub fn seekle(&self, score: NotNan<f64>, name: &[u8]) -> Option<usize> {
        let mut found = None;
        let mut cur = self.root;
        while let Some(c) = cur {
            if self.key_below_node(score, name, c) {
                cur = self.links(c).left;
            } else {
                found = Some(c);
                cur = self.links(c).right;
            }
        }
        found
    }

    /// Number of members in the closed range [lo, hi]. Zero when either
    /// bound finds no member or the bounds cross.
    pub fn count(
        &self,
        lo_score: NotNan<f64>,
        lo_name: &[u8],
        hi_score: NotNan<f64>,
        hi_name: &[u8],
    ) -> i64 {
        let (Some(lo), Some(hi)) = (
            self.seekge(lo_score, lo_name),
            self.seekle(hi_score, hi_name),
        ) else {
            return 0;
        };
        (self.rank(hi) - self.rank(lo) + 1).max(0)
    }

    /// Member `offset` in-order positions away from `id`.
    pub fn offset(&self, id: usize, offset: i64) -> Option<usize> {
        avl::offset(self, id, offset)
    }

    /// 0-based position of a member in score order.
    pub fn rank(&self, id: usize) -> i64 {
        avl::rank(self, id)
    }

    /// Drops every member.
    pub fn clear(&mut self) {
        self.by_name.clear();
        self.nodes.clear();
        self.free.clear();
        self.root = None;
    }

    fn update_score(&mut self, id: usize, score: NotNan<f64>) {
        if self.node(id).score == score {
            return;
        }
        self.root = avl::remove(self, id);
        let node = self.node_entry_mut(id);
        node.score = score;
        node.links = AvlLinks::new();
        self.tree_insert(id);
    }

    fn tree_insert(&mut self, id: usize) {
        let mut parent = None;
        let mut cur = self.root;
        let mut went_left = false;
        while let Some(c) = cur {
            parent = Some(c);
            went_left = self.node_less(id, c);
            cur = if went_left {
                self.links(c).left
            } else {
                self.links(c).right
            };
        }
        match parent {
            Some(p) => {
                if went_left {
                    self.links_mut(p).left = Some(id);
                } else {
                    self.links_mut(p).right = Some(id);
                }
                self.links_mut(id).parent = Some(p);
            }
            None => self.root = Some(id),
        }
        self.root = Some(avl::fix(self, id));
    }

    /// (score, name) of `a` orders before that of `b`.
    fn node_less(&self, a: usize, b: usize) -> bool {
        let rhs = self.node(b);
        self.node_below_key(a, rhs.score, &rhs.name)
    }

    /// Member `id` orders strictly before the key (score, name).
    fn node_below_key(&self, id: usize, score: NotNan<f64>, name: &[u8]) -> bool {
        let node = self.node(id);
        match node.score.cmp(&score) {
            Ordering::Equal => node.name.as_ref() < name,
            ordering => ordering == Ordering::Less,
        }
    }

    /// The key (score, name) orders strictly before member `id`.
    fn key_below_node(&self, score: NotNan<f64>, name: &[u8], id: usize) -> bool {
        let node = self.node(id);
        match score.cmp(&node.score) {
            Ordering::Equal => name < node.name.as_ref(),
            ordering => ordering == Ordering::Less,
        }
    }
}

impl Default for ZSet {
    fn default() -> Self {
        Self::new()
    }
}

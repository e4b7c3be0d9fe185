//! Size-Augmented AVL Tree
//!
//! A height-balanced binary search tree that also caches subtree sizes, so
//! rank queries and move-by-offset walks run in O(log n). The tree does not
//! own its nodes: link fields live in the caller's arena behind the
//! [`AvlArena`] trait, and every function here works purely on node indices.
//! That lets one allocation participate in several containers at once (a
//! sorted-set member sits in this tree and in a hash index simultaneously).
//!
//! Ordering is also the caller's concern. Insertion is a plain BST descent
//! done by the caller, which then hands the freshly linked node to [`fix`]
//! to restore balance. This module only needs the links.
//!
//! Cached fields are maintained on the way back up every mutation:
//!
//! - `height = 1 + max(height(left), height(right))`
//! - `count  = 1 + count(left) + count(right)`
//! - heights of siblings never differ by more than one

/// Per-node link block, embedded in the caller's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AvlLinks {
    pub parent: Option<usize>,
    pub left: Option<usize>,
    pub right: Option<usize>,
    pub height: u32,
    pub count: u32,
}

impl AvlLinks {
    /// A detached single node.
    pub fn new() -> Self {
        Self {
            parent: None,
            left: None,
            right: None,
            height: 1,
            count: 1,
        }
    }
}

impl Default for AvlLinks {
    fn default() -> Self {
        Self::new()
    }
}

/// Storage the tree operates on: any arena that can hand out link blocks
/// by node index.
pub trait AvlArena {
    fn links(&self, id: usize) -> &AvlLinks;
    fn links_mut(&mut self, id: usize) -> &mut AvlLinks;
}

/// Height of an optional subtree; 0 for empty.
pub fn height<A: AvlArena + ?Sized>(arena: &A, node: Option<usize>) -> u32 {
    node.map_or(0, |id| arena.links(id).height)
}

/// Size of an optional subtree; 0 for empty.
pub fn count<A: AvlArena + ?Sized>(arena: &A, node: Option<usize>) -> u32 {
    node.map_or(0, |id| arena.links(id).count)
}

fn update<A: AvlArena + ?Sized>(arena: &mut A, id: usize) {
    let (left, right) = {
        let links = arena.links(id);
        (links.left, links.right)
    };
    let new_height = 1 + height(arena, left).max(height(arena, right));
    let new_count = 1 + count(arena, left) + count(arena, right);
    let links = arena.links_mut(id);
    links.height = new_height;
    links.count = new_count;
}

fn rot_left<A: AvlArena + ?Sized>(arena: &mut A, node: usize) -> usize {
    let parent = arena.links(node).parent;
    let new_node = arena.links(node).right.expect("rot_left without right child");
    let inner = arena.links(new_node).left;

    arena.links_mut(node).right = inner;
    if let Some(inner) = inner {
        arena.links_mut(inner).parent = Some(node);
    }
    // the link from the old parent down to this subtree is fixed by the
    // caller, which alone knows whether the subtree was a root
    arena.links_mut(new_node).parent = parent;
    arena.links_mut(new_node).left = Some(node);
    arena.links_mut(node).parent = Some(new_node);

    update(arena, node);
    update(arena, new_node);
    new_node
}

fn rot_right<A: AvlArena + ?Sized>(arena: &mut A, node: usize) -> usize {
    let parent = arena.links(node).parent;
    let new_node = arena.links(node).left.expect("rot_right without left child");
    let inner = arena.links(new_node).right;

    arena.links_mut(node).left = inner;
    if let Some(inner) = inner {
        arena.links_mut(inner).parent = Some(node);
    }
    arena.links_mut(new_node).parent = parent;
    arena.links_mut(new_node).right = Some(node);
    arena.links_mut(node).parent = Some(new_node);

    update(arena, node);
    update(arena, new_node);
    new_node
}

/// Left subtree is two levels taller: rotate right, pre-rotating the left
/// child when its inner grandchild is the taller one.
fn fix_left<A: AvlArena + ?Sized>(arena: &mut A, node: usize) -> usize {
    let left = arena.links(node).left.expect("left-heavy without left child");
    if height(arena, arena.links(left).left) < height(arena, arena.links(left).right) {
        let rotated = rot_left(arena, left);
        arena.links_mut(node).left = Some(rotated);
    }
    rot_right(arena, node)
}

fn fix_right<A: AvlArena + ?Sized>(arena: &mut A, node: usize) -> usize {
    let right = arena
        .links(node)
        .right
        .expect("right-heavy without right child");
    if height(arena, arena.links(right).right) < height(arena, arena.links(right).left) {
        let rotated = rot_right(arena, right);
        arena.links_mut(node).right = Some(rotated);
    }
    rot_left(arena, node)
}

/// Restores balance and cached fields on the path from `node` to the root.
/// Call after linking a new node or splicing one out. Returns the root.
pub fn fix<A: AvlArena + ?Sized>(arena: &mut A, mut node: usize) -> usize {
    loop {
        update(arena, node);
        let left = height(arena, arena.links(node).left);
        let right = height(arena, arena.links(node).right);
        let parent = arena.links(node).parent;

        let mut subtree = node;
        if left == right + 2 {
            subtree = fix_left(arena, node);
        } else if left + 2 == right {
            subtree = fix_right(arena, node);
        }

        match parent {
            Some(parent) => {
                if subtree != node {
                    // a rotation replaced this subtree's root; reattach it
                    let links = arena.links_mut(parent);
                    if links.left == Some(node) {
                        links.left = Some(subtree);
                    } else {
                        links.right = Some(subtree);
                    }
                }
                node = parent;
            }
            None => return subtree,
        }
    }
}

/// Splices out a node with at most one child. The child (if any) replaces
/// it at the parent, and the tree is rebalanced upward from there.
fn remove_one_child<A: AvlArena + ?Sized>(arena: &mut A, node: usize) -> Option<usize> {
    let links = *arena.links(node);
    debug_assert!(links.left.is_none() || links.right.is_none());
    let child = links.left.or(links.right);

    if let Some(child) = child {
        arena.links_mut(child).parent = links.parent;
    }
    let Some(parent) = links.parent else {
        return child;
    };
    {
        let parent_links = arena.links_mut(parent);
        if parent_links.left == Some(node) {
            parent_links.left = child;
        } else {
            parent_links.right = child;
        }
    }
    Some(fix(arena, parent))
}

/// Detaches `node` from the tree and returns the new root.
///
/// A node with two children is replaced by its in-order successor: the
/// successor is spliced out of its own (easy) position first, then takes
/// over the removed node's links.
pub fn remove<A: AvlArena + ?Sized>(arena: &mut A, node: usize) -> Option<usize> {
    let (left, right) = {
        let links = arena.links(node);
        (links.left, links.right)
    };
    if left.is_none() || right.is_none() {
        return remove_one_child(arena, node);
    }

    // leftmost node of the right subtree
    let mut successor = right.expect("two-child node missing right child");
    while let Some(next) = arena.links(successor).left {
        successor = next;
    }
    let mut root = remove_one_child(arena, successor);

    // the successor inherits the removed node's position wholesale; read the
    // links only now, rebalancing above may have changed them
    let links = *arena.links(node);
    *arena.links_mut(successor) = links;
    if let Some(child) = links.left {
        arena.links_mut(child).parent = Some(successor);
    }
    if let Some(child) = links.right {
        arena.links_mut(child).parent = Some(successor);
    }
    match links.parent {
        Some(parent) => {
            let parent_links = arena.links_mut(parent);
            if parent_links.left == Some(node) {
                parent_links.left = Some(successor);
            } else {
                parent_links.right = Some(successor);
            }
        }
        None => root = Some(successor),
    }
    root
}

/// Walks `offset` positions through the in-order sequence (negative values
/// go backward). Returns `None` when the target falls outside the tree.
/// Cost is O(log n) regardless of the distance, thanks to subtree counts.
pub fn offset<A: AvlArena + ?Sized>(arena: &A, start: usize, offset: i64) -> Option<usize> {
    let mut pos: i64 = 0; // rank of `node` relative to the starting node
    let mut node = start;
    while pos != offset {
        let links = arena.links(node);
        if pos < offset && pos + i64::from(count(arena, links.right)) >= offset {
            // target is inside the right subtree
            let right = links.right.expect("count promised a right subtree");
            pos += i64::from(count(arena, arena.links(right).left)) + 1;
            node = right;
        } else if pos > offset && pos - i64::from(count(arena, links.left)) <= offset {
            // target is inside the left subtree
            let left = links.left.expect("count promised a left subtree");
            pos -= i64::from(count(arena, arena.links(left).right)) + 1;
            node = left;
        } else {
            // outside this subtree entirely; climb
            let Some(parent) = links.parent else {
                return None;
            };
            if arena.links(parent).right == Some(node) {
                pos -= i64::from(count(arena, links.left)) + 1;
            } else {
                pos += i64::from(count(arena, links.right)) + 1;
            }
            node = parent;
        }
    }
    Some(node)
}

/// 0-based in-order position of `node`.
pub fn rank<A: AvlArena + ?Sized>(arena: &A, node: usize) -> i64 {
    let mut rank = i64::from(count(arena, arena.links(node).left));
    let mut cur = node;
    while let Some(parent) = arena.links(cur).parent {
        if arena.links(parent).right == Some(cur) {
            rank += i64::from(count(arena, arena.links(parent).left)) + 1;
        }
        cur = parent;
    }
    rank
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Minimal owning container: values plus their link blocks, never
    /// compacted, with insertion ordered by `val`.
    struct TestTree {
        vals: Vec<u32>,
        links: Vec<AvlLinks>,
        root: Option<usize>,
    }

    impl AvlArena for TestTree {
        fn links(&self, id: usize) -> &AvlLinks {
            &self.links[id]
        }
        fn links_mut(&mut self, id: usize) -> &mut AvlLinks {
            &mut self.links[id]
        }
    }

    impl TestTree {
        fn new() -> Self {
            Self {
                vals: Vec::new(),
                links: Vec::new(),
                root: None,
            }
        }

        fn add(&mut self, val: u32) {
            let id = self.vals.len();
            self.vals.push(val);
            self.links.push(AvlLinks::new());

            let mut parent = None;
            let mut cur = self.root;
            let mut went_left = false;
            while let Some(c) = cur {
                parent = Some(c);
                went_left = val < self.vals[c];
                cur = if went_left {
                    self.links[c].left
                } else {
                    self.links[c].right
                };
            }
            match parent {
                Some(p) => {
                    if went_left {
                        self.links[p].left = Some(id);
                    } else {
                        self.links[p].right = Some(id);
                    }
                    self.links[id].parent = Some(p);
                }
                None => {}
            }
            self.root = Some(fix(self, id));
        }

        fn del(&mut self, val: u32) -> bool {
            let mut cur = self.root;
            while let Some(c) = cur {
                if self.vals[c] == val {
                    break;
                }
                cur = if val < self.vals[c] {
                    self.links[c].left
                } else {
                    self.links[c].right
                };
            }
            let Some(found) = cur else {
                return false;
            };
            self.root = remove(self, found);
            true
        }

        fn verify_node(&self, parent: Option<usize>, node: Option<usize>) {
            let Some(node) = node else { return };
            let links = &self.links[node];
            assert_eq!(links.parent, parent);
            self.verify_node(Some(node), links.left);
            self.verify_node(Some(node), links.right);

            assert_eq!(
                links.count,
                1 + count(self, links.left) + count(self, links.right)
            );
            let l = height(self, links.left);
            let r = height(self, links.right);
            assert!(l == r || l + 1 == r || l == r + 1);
            assert_eq!(links.height, 1 + l.max(r));

            if let Some(left) = links.left {
                assert!(self.vals[left] <= self.vals[node]);
            }
            if let Some(right) = links.right {
                assert!(self.vals[right] >= self.vals[node]);
            }
        }

        fn extract(&self, node: Option<usize>, out: &mut Vec<u32>) {
            let Some(node) = node else { return };
            self.extract(self.links[node].left, out);
            out.push(self.vals[node]);
            self.extract(self.links[node].right, out);
        }

        fn verify(&self, reference: &[u32]) {
            self.verify_node(None, self.root);
            assert_eq!(count(self, self.root) as usize, reference.len());
            let mut inorder = Vec::new();
            self.extract(self.root, &mut inorder);
            let mut expected = reference.to_vec();
            expected.sort_unstable();
            assert_eq!(inorder, expected);
        }
    }

    /// Small deterministic generator; enough randomness for shuffling.
    struct Lcg(u64);

    impl Lcg {
        fn next(&mut self) -> u32 {
            self.0 = self
                .0
                .wrapping_mul(6364136223846793005)
                .wrapping_add(1442695040888963407);
            (self.0 >> 33) as u32
        }
    }

    #[test]
    fn test_empty_and_single() {
        let mut tree = TestTree::new();
        tree.verify(&[]);
        tree.add(123);
        tree.verify(&[123]);
        assert!(!tree.del(124));
        assert!(tree.del(123));
        tree.verify(&[]);
    }

    #[test]
    fn test_sequential_insertion() {
        // ascending inserts keep triggering the right-heavy case
        let mut tree = TestTree::new();
        let mut reference = Vec::new();
        for i in (0..1000).step_by(3) {
            tree.add(i);
            reference.push(i);
            tree.verify(&reference);
        }
    }

    #[test]
    fn test_random_insertion_and_deletion() {
        let mut tree = TestTree::new();
        let mut reference: Vec<u32> = Vec::new();
        let mut rng = Lcg(0x5eed);

        for _ in 0..300 {
            let val = rng.next() % 500;
            tree.add(val);
            reference.push(val);
            tree.verify(&reference);
        }
        for _ in 0..600 {
            let val = rng.next() % 500;
            match reference.iter().position(|&v| v == val) {
                Some(at) => {
                    assert!(tree.del(val));
                    reference.swap_remove(at);
                }
                None => assert!(!tree.del(val)),
            }
            tree.verify(&reference);
        }
    }

    fn build(size: u32, skip: Option<u32>) -> (TestTree, Vec<u32>) {
        let mut tree = TestTree::new();
        let mut reference = Vec::new();
        for i in 0..size {
            if Some(i) == skip {
                continue;
            }
            tree.add(i);
            reference.push(i);
        }
        (tree, reference)
    }

    #[test]
    fn test_insert_at_every_position() {
        for size in 0..200 {
            for val in 0..size {
                let (mut tree, mut reference) = build(size, Some(val));
                tree.verify(&reference);
                tree.add(val);
                reference.push(val);
                tree.verify(&reference);
            }
        }
    }

    #[test]
    fn test_insert_duplicate_at_every_position() {
        for size in 0..200 {
            for val in 0..size {
                let (mut tree, mut reference) = build(size, None);
                tree.add(val);
                reference.push(val);
                tree.verify(&reference);
            }
        }
    }

    #[test]
    fn test_remove_at_every_position() {
        for size in 0..200 {
            for val in 0..size {
                let (mut tree, mut reference) = build(size, None);
                assert!(tree.del(val));
                reference.retain(|&v| v != val);
                tree.verify(&reference);
            }
        }
    }

    #[test]
    fn test_rank_and_offset_are_inverse() {
        let mut tree = TestTree::new();
        for i in 0..100 {
            tree.add(i);
        }
        let root = tree.root.unwrap();
        // walk to the minimum, then offset forward to every position
        let first = offset(&tree, root, -rank(&tree, root)).unwrap();
        assert_eq!(rank(&tree, first), 0);
        for k in 0..100 {
            let node = offset(&tree, first, k).unwrap();
            assert_eq!(rank(&tree, node), k);
            assert_eq!(tree.vals[node], k as u32);
        }
        assert!(offset(&tree, first, 100).is_none());
        assert!(offset(&tree, first, -1).is_none());
    }

    #[test]
    fn test_offset_both_directions() {
        let mut tree = TestTree::new();
        for i in 0..64 {
            tree.add(i);
        }
        let root = tree.root.unwrap();
        let start_rank = rank(&tree, root);
        for k in -start_rank..(64 - start_rank) {
            let node = offset(&tree, root, k).unwrap();
            assert_eq!(rank(&tree, node), start_rank + k);
        }
    }
}

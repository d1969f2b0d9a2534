//! Arena-backed AVL tree with multi-value keys.

use crate::error::{CoreError, CoreResult};
use crate::tree::range::RangeQuery;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Key comparison function shared by a tree and its owner.
pub type Comparator<K> = Arc<dyn Fn(&K, &K) -> Ordering + Send + Sync>;

/// Handle of a node inside the tree's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(usize);

/// Returned by [`AvlTree::insert`] when a unique tree already holds the key.
///
/// The rejected key is handed back to the caller.
#[derive(Debug, Clone, PartialEq)]
pub struct DuplicateKey<K> {
    /// The key that was already present.
    pub key: K,
}

struct Node<K, V> {
    key: K,
    values: Vec<V>,
    left: Option<NodeId>,
    right: Option<NodeId>,
    parent: Option<NodeId>,
    /// `height(left) - height(right)`, always in `-1..=1` between operations.
    balance: i8,
}

/// A self-balancing binary search tree mapping each key to a list of values.
///
/// Nodes live in an arena and refer to each other through [`NodeId`]
/// handles, which gives O(1) parent access for upward rebalancing without
/// ownership cycles.
///
/// - Duplicate keys are rejected when the tree is unique; otherwise the value
///   is appended to the key's list
/// - Deleting a node with two children replaces it with its in-order
///   predecessor or successor, picked at random on every call so that
///   delete-heavy workloads do not skew the tree to one side
///
/// # Example
///
/// ```rust
/// use emberdb_core::{AvlTree, RangeQuery};
/// use std::sync::Arc;
///
/// let mut tree: AvlTree<i32, &str> = AvlTree::new(false, Arc::new(|a: &i32, b: &i32| a.cmp(b)));
/// tree.insert(5, "five").unwrap();
/// tree.insert(3, "three").unwrap();
/// tree.insert(5, "cinq").unwrap();
///
/// assert_eq!(tree.search(&5), vec!["five", "cinq"]);
/// assert_eq!(tree.between_bounds(&RangeQuery::new().gt(3)), vec!["five", "cinq"]);
/// ```
pub struct AvlTree<K, V> {
    nodes: Vec<Option<Node<K, V>>>,
    free: Vec<usize>,
    root: Option<NodeId>,
    len: usize,
    unique: bool,
    compare: Comparator<K>,
    rng: Box<dyn RngCore + Send>,
}

impl<K, V> fmt::Debug for AvlTree<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AvlTree")
            .field("len", &self.len)
            .field("unique", &self.unique)
            .field("height", &self.height())
            .finish_non_exhaustive()
    }
}

impl<K, V> AvlTree<K, V> {
    /// Creates an empty tree with an entropy-seeded random source.
    pub fn new(unique: bool, compare: Comparator<K>) -> Self {
        Self {
            nodes: Vec::new(),
            free: Vec::new(),
            root: None,
            len: 0,
            unique,
            compare,
            rng: Box::new(StdRng::from_entropy()),
        }
    }

    /// Replaces the random source used to pick the replacement side when
    /// deleting a node with two children.
    #[must_use]
    pub fn with_rng(mut self, rng: Box<dyn RngCore + Send>) -> Self {
        self.rng = rng;
        self
    }

    /// Returns whether the tree rejects duplicate keys.
    #[must_use]
    pub fn is_unique(&self) -> bool {
        self.unique
    }

    /// Returns the number of distinct keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Returns true if the tree holds no keys.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Returns the height of the tree (0 when empty).
    #[must_use]
    pub fn height(&self) -> usize {
        self.subtree_height(self.root)
    }

    /// Removes every key.
    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free.clear();
        self.root = None;
        self.len = 0;
    }

    fn node(&self, id: NodeId) -> &Node<K, V> {
        match self.nodes.get(id.0) {
            Some(Some(node)) => node,
            _ => unreachable!("dangling node handle {id:?}"),
        }
    }

    fn node_mut(&mut self, id: NodeId) -> &mut Node<K, V> {
        match self.nodes.get_mut(id.0) {
            Some(Some(node)) => node,
            _ => unreachable!("dangling node handle {id:?}"),
        }
    }

    fn alloc(&mut self, node: Node<K, V>) -> NodeId {
        if let Some(slot) = self.free.pop() {
            self.nodes[slot] = Some(node);
            NodeId(slot)
        } else {
            self.nodes.push(Some(node));
            NodeId(self.nodes.len() - 1)
        }
    }

    fn release(&mut self, id: NodeId) -> Node<K, V> {
        match self.nodes.get_mut(id.0).and_then(Option::take) {
            Some(node) => {
                self.free.push(id.0);
                node
            }
            None => unreachable!("double release of node {id:?}"),
        }
    }

    fn balance(&self, id: NodeId) -> i8 {
        self.node(id).balance
    }

    fn subtree_height(&self, id: Option<NodeId>) -> usize {
        id.map_or(0, |id| {
            let node = self.node(id);
            1 + self
                .subtree_height(node.left)
                .max(self.subtree_height(node.right))
        })
    }

    fn find_node(&self, key: &K) -> Option<NodeId> {
        let mut current = self.root;
        while let Some(id) = current {
            let node = self.node(id);
            current = match (self.compare)(key, &node.key) {
                Ordering::Equal => return Some(id),
                Ordering::Less => node.left,
                Ordering::Greater => node.right,
            };
        }
        None
    }

    /// Points `parent`'s link to `old` (or the root) at `new`.
    fn replace_child(&mut self, parent: Option<NodeId>, old: NodeId, new: Option<NodeId>) {
        match parent {
            None => self.root = new,
            Some(p) => {
                let node = self.node_mut(p);
                if node.left == Some(old) {
                    node.left = new;
                } else {
                    node.right = new;
                }
            }
        }
    }

    fn rotate_left(&mut self, x: NodeId) -> NodeId {
        let Some(y) = self.node(x).right else {
            unreachable!("rotate_left without a right child")
        };
        let inner = self.node(y).left;
        let parent = self.node(x).parent;

        self.node_mut(x).right = inner;
        if let Some(inner) = inner {
            self.node_mut(inner).parent = Some(x);
        }
        self.node_mut(y).parent = parent;
        self.replace_child(parent, x, Some(y));
        self.node_mut(y).left = Some(x);
        self.node_mut(x).parent = Some(y);

        let yb = self.balance(y);
        let xb = self.balance(x) + 1 - yb.min(0);
        self.node_mut(x).balance = xb;
        self.node_mut(y).balance = yb + 1 + xb.max(0);
        y
    }

    fn rotate_right(&mut self, x: NodeId) -> NodeId {
        let Some(y) = self.node(x).left else {
            unreachable!("rotate_right without a left child")
        };
        let inner = self.node(y).right;
        let parent = self.node(x).parent;

        self.node_mut(x).left = inner;
        if let Some(inner) = inner {
            self.node_mut(inner).parent = Some(x);
        }
        self.node_mut(y).parent = parent;
        self.replace_child(parent, x, Some(y));
        self.node_mut(y).right = Some(x);
        self.node_mut(x).parent = Some(y);

        let yb = self.balance(y);
        let xb = self.balance(x) - 1 - yb.max(0);
        self.node_mut(x).balance = xb;
        self.node_mut(y).balance = yb - 1 + xb.min(0);
        y
    }

    /// Restores balance at a node whose factor reached ±2, using a single or
    /// double rotation. Returns the new root of the subtree.
    fn rebalance(&mut self, id: NodeId) -> NodeId {
        match self.balance(id) {
            2 => {
                if let Some(left) = self.node(id).left {
                    if self.balance(left) < 0 {
                        self.rotate_left(left);
                    }
                }
                self.rotate_right(id)
            }
            -2 => {
                if let Some(right) = self.node(id).right {
                    if self.balance(right) > 0 {
                        self.rotate_right(right);
                    }
                }
                self.rotate_left(id)
            }
            _ => id,
        }
    }

    /// Walks from a freshly attached leaf toward the root, updating factors.
    fn rebalance_after_insert(&mut self, leaf: NodeId) {
        let mut child = leaf;
        while let Some(parent) = self.node(child).parent {
            let from_left = self.node(parent).left == Some(child);
            let node = self.node_mut(parent);
            node.balance += if from_left { 1 } else { -1 };
            let balance = node.balance;

            match balance {
                // Subtree height unchanged from here up
                0 => break,
                1 | -1 => child = parent,
                _ => {
                    self.rebalance(parent);
                    break;
                }
            }
        }
    }

    /// Walks from the parent of a physically removed node toward the root.
    fn rebalance_after_delete(&mut self, start: Option<NodeId>, mut from_left: bool) {
        let mut current = start;
        while let Some(id) = current {
            let node = self.node_mut(id);
            node.balance += if from_left { -1 } else { 1 };
            let balance = node.balance;

            let mut subtree = id;
            match balance {
                // Height did not change
                1 | -1 => break,
                0 => {}
                _ => {
                    subtree = self.rebalance(id);
                    if self.balance(subtree) != 0 {
                        break;
                    }
                }
            }

            current = self.node(subtree).parent;
            if let Some(parent) = current {
                from_left = self.node(parent).left == Some(subtree);
            }
        }
    }

    /// Detaches a node with at most one child and frees its slot.
    fn unlink(&mut self, id: NodeId) -> Node<K, V> {
        let (left, right, parent) = {
            let node = self.node(id);
            (node.left, node.right, node.parent)
        };
        debug_assert!(left.is_none() || right.is_none());
        let child = left.or(right);

        if let Some(child) = child {
            self.node_mut(child).parent = parent;
        }
        let from_left = parent.is_some_and(|p| self.node(p).left == Some(id));
        self.replace_child(parent, id, child);

        let removed = self.release(id);
        self.len -= 1;
        self.rebalance_after_delete(parent, from_left);
        removed
    }

    fn remove_node(&mut self, id: NodeId) {
        let (left, right) = {
            let node = self.node(id);
            (node.left, node.right)
        };

        let (Some(left), Some(right)) = (left, right) else {
            self.unlink(id);
            return;
        };

        let replacement = if self.rng.next_u32() & 1 == 0 {
            self.rightmost(left)
        } else {
            self.leftmost(right)
        };

        // `id` stays valid through the rotations triggered by unlinking
        let moved = self.unlink(replacement);
        let node = self.node_mut(id);
        node.key = moved.key;
        node.values = moved.values;
    }

    fn leftmost(&self, mut id: NodeId) -> NodeId {
        while let Some(left) = self.node(id).left {
            id = left;
        }
        id
    }

    fn rightmost(&self, mut id: NodeId) -> NodeId {
        while let Some(right) = self.node(id).right {
            id = right;
        }
        id
    }

    /// Inserts `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`DuplicateKey`] without modifying the tree if the tree is
    /// unique and already holds `key`.
    pub fn insert(&mut self, key: K, value: V) -> Result<(), DuplicateKey<K>> {
        let Some(mut current) = self.root else {
            let id = self.alloc(Node {
                key,
                values: vec![value],
                left: None,
                right: None,
                parent: None,
                balance: 0,
            });
            self.root = Some(id);
            self.len = 1;
            return Ok(());
        };

        loop {
            let ordering = (self.compare)(&key, &self.node(current).key);
            let next = match ordering {
                Ordering::Equal => {
                    if self.unique {
                        return Err(DuplicateKey { key });
                    }
                    self.node_mut(current).values.push(value);
                    return Ok(());
                }
                Ordering::Less => self.node(current).left,
                Ordering::Greater => self.node(current).right,
            };

            match next {
                Some(next) => current = next,
                None => {
                    let id = self.alloc(Node {
                        key,
                        values: vec![value],
                        left: None,
                        right: None,
                        parent: Some(current),
                        balance: 0,
                    });
                    if ordering == Ordering::Less {
                        self.node_mut(current).left = Some(id);
                    } else {
                        self.node_mut(current).right = Some(id);
                    }
                    self.len += 1;
                    self.rebalance_after_insert(id);
                    return Ok(());
                }
            }
        }
    }

    /// Returns whether `key` is present.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.find_node(key).is_some()
    }

    /// Visits every key and its values in ascending key order.
    pub fn execute_on_every_node(&self, mut visitor: impl FnMut(&K, &[V])) {
        let mut stack = Vec::new();
        let mut current = self.root;
        loop {
            while let Some(id) = current {
                stack.push(id);
                current = self.node(id).left;
            }
            let Some(id) = stack.pop() else { break };
            let node = self.node(id);
            visitor(&node.key, &node.values);
            current = node.right;
        }
    }

    /// Checks every structural invariant of the tree.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::TreeInvariant`] describing the first violation:
    /// a wrong parent link, an out-of-order key, an empty value list, a stale
    /// or out-of-range balance factor, or a wrong key count.
    pub fn check_invariants(&self) -> CoreResult<()> {
        if let Some(root) = self.root {
            if self.node(root).parent.is_some() {
                return Err(CoreError::tree_invariant("root has a parent"));
            }
        }
        let mut count = 0;
        self.check_subtree(self.root, &mut count)?;
        if count != self.len {
            return Err(CoreError::tree_invariant(format!(
                "tree reports {} keys but holds {count}",
                self.len
            )));
        }

        let mut previous: Option<&K> = None;
        let mut ordered = true;
        let mut stack = Vec::new();
        let mut current = self.root;
        loop {
            while let Some(id) = current {
                stack.push(id);
                current = self.node(id).left;
            }
            let Some(id) = stack.pop() else { break };
            let node = self.node(id);
            if let Some(prev) = previous {
                if (self.compare)(prev, &node.key) != Ordering::Less {
                    ordered = false;
                }
            }
            previous = Some(&node.key);
            current = node.right;
        }
        if !ordered {
            return Err(CoreError::tree_invariant("in-order traversal is not sorted"));
        }
        Ok(())
    }

    /// Returns the subtree height after validating links and factors.
    fn check_subtree(&self, id: Option<NodeId>, count: &mut usize) -> CoreResult<usize> {
        let Some(id) = id else { return Ok(0) };
        let node = self.node(id);
        *count += 1;

        if node.values.is_empty() {
            return Err(CoreError::tree_invariant("node without values"));
        }
        for child in [node.left, node.right].into_iter().flatten() {
            if self.node(child).parent != Some(id) {
                return Err(CoreError::tree_invariant("child parent link is wrong"));
            }
        }

        let left = self.check_subtree(node.left, count)?;
        let right = self.check_subtree(node.right, count)?;
        #[allow(clippy::cast_possible_wrap, clippy::cast_possible_truncation)]
        let actual = (left as i64 - right as i64) as i8;
        if actual != node.balance {
            return Err(CoreError::tree_invariant(format!(
                "stored balance factor {} but subtrees give {actual}",
                node.balance
            )));
        }
        if !(-1..=1).contains(&actual) {
            return Err(CoreError::tree_invariant(format!(
                "balance factor {actual} out of range"
            )));
        }
        Ok(1 + left.max(right))
    }
}

impl<K, V: Clone> AvlTree<K, V> {
    /// Returns the values stored under `key` (empty if absent).
    #[must_use]
    pub fn search(&self, key: &K) -> Vec<V> {
        self.find_node(key)
            .map(|id| self.node(id).values.clone())
            .unwrap_or_default()
    }

    /// Returns the values of every key within the bounds, in ascending key
    /// order. Missing bounds are unbounded.
    #[must_use]
    pub fn between_bounds(&self, query: &RangeQuery<K>) -> Vec<V> {
        let lower = query.lower_bound(self.compare.as_ref());
        let upper = query.upper_bound(self.compare.as_ref());
        let mut out = Vec::new();
        self.collect_between(self.root, lower, upper, &mut out);
        out
    }

    fn collect_between(
        &self,
        id: Option<NodeId>,
        lower: Option<(&K, bool)>,
        upper: Option<(&K, bool)>,
        out: &mut Vec<V>,
    ) {
        let Some(id) = id else { return };
        let node = self.node(id);

        let above_lower = lower.map_or(true, |(bound, strict)| {
            let ordering = (self.compare)(&node.key, bound);
            if strict {
                ordering == Ordering::Greater
            } else {
                ordering != Ordering::Less
            }
        });
        let below_upper = upper.map_or(true, |(bound, strict)| {
            let ordering = (self.compare)(&node.key, bound);
            if strict {
                ordering == Ordering::Less
            } else {
                ordering != Ordering::Greater
            }
        });

        if above_lower {
            self.collect_between(node.left, lower, upper, out);
        }
        if above_lower && below_upper {
            out.extend(node.values.iter().cloned());
        }
        if below_upper {
            self.collect_between(node.right, lower, upper, out);
        }
    }

    /// Returns every value in ascending key order.
    #[must_use]
    pub fn values(&self) -> Vec<V> {
        let mut out = Vec::new();
        self.execute_on_every_node(|_, values| out.extend(values.iter().cloned()));
        out
    }
}

impl<K, V: PartialEq> AvlTree<K, V> {
    /// Deletes `value` from `key`, or the whole key when `value` is `None`.
    ///
    /// The node disappears once its last value is gone. Deleting a missing
    /// key or a value not stored under the key does nothing.
    pub fn delete(&mut self, key: &K, value: Option<&V>) {
        let Some(id) = self.find_node(key) else {
            return;
        };

        if let Some(value) = value {
            let values = &mut self.node_mut(id).values;
            let before = values.len();
            values.retain(|v| v != value);
            if values.len() == before || !values.is_empty() {
                return;
            }
        }

        self.remove_node(id);
    }
}

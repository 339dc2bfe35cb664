//! Parent/child adjacency index with ancestor and descendant traversal
//!
//! The index is a DAG in intent only: nodes may have several parents, and
//! cycles are detected during traversal rather than assumed away.
//!
//! - **Diamonds**: a node reachable through two paths is reported once
//! - **Cycles**: traversal fails fast with `AuthzError::CircularHierarchy`
//! - **Mutation**: every mutating call reports whether anything changed

use indexmap::{IndexMap, IndexSet};
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;

use crate::error::{AuthzError, Result};

/// One node of the hierarchy with its direct neighbours
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HierarchyNode<K: Hash + Eq> {
    key: K,
    parents: IndexSet<K>,
    children: IndexSet<K>,
}

impl<K: Hash + Eq> HierarchyNode<K> {
    fn new(key: K) -> Self {
        Self {
            key,
            parents: IndexSet::new(),
            children: IndexSet::new(),
        }
    }

    pub fn key(&self) -> &K {
        &self.key
    }

    /// Direct parents, in edge insertion order
    pub fn parents(&self) -> impl Iterator<Item = &K> {
        self.parents.iter()
    }

    /// Direct children, in edge insertion order
    pub fn children(&self) -> impl Iterator<Item = &K> {
        self.children.iter()
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    Up,
    Down,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Visiting,
    Visited,
}

/// Adjacency index over one parent/child edge set
///
/// # Examples
///
/// ```rust
/// use simple_authz::hierarchy::HierarchyIndex;
///
/// let mut index = HierarchyIndex::new();
/// index.add_edge("operation", "task");
/// index.add_edge("task", "role");
///
/// assert_eq!(index.ancestors(&"operation").unwrap(), vec!["task", "role"]);
/// assert_eq!(index.descendants(&"role").unwrap(), vec!["task", "operation"]);
/// ```
#[derive(Debug, Clone)]
pub struct HierarchyIndex<K: Hash + Eq> {
    nodes: IndexMap<K, HierarchyNode<K>>,
}

impl<K> HierarchyIndex<K>
where
    K: Clone + Eq + Hash + fmt::Display,
{
    /// Creates a new empty index
    pub fn new() -> Self {
        Self {
            nodes: IndexMap::new(),
        }
    }

    /// Adds a node without edges
    ///
    /// Returns `false` if the node was already present.
    pub fn add_node(&mut self, key: K) -> bool {
        if self.nodes.contains_key(&key) {
            return false;
        }
        self.nodes.insert(key.clone(), HierarchyNode::new(key));
        true
    }

    /// Adds a `child -> parent` edge, creating missing nodes
    ///
    /// Returns `false` if the edge was already present.
    pub fn add_edge(&mut self, child: K, parent: K) -> bool {
        self.add_node(child.clone());
        self.add_node(parent.clone());

        let added = match self.nodes.get_mut(&child) {
            Some(node) => node.parents.insert(parent.clone()),
            None => false,
        };
        if let Some(node) = self.nodes.get_mut(&parent) {
            node.children.insert(child);
        }
        added
    }

    /// Removes a `child -> parent` edge
    ///
    /// Returns `false` if no such edge existed.
    pub fn remove_edge(&mut self, child: &K, parent: &K) -> bool {
        let removed = match self.nodes.get_mut(child) {
            Some(node) => node.parents.shift_remove(parent),
            None => false,
        };
        if let Some(node) = self.nodes.get_mut(parent) {
            node.children.shift_remove(child);
        }
        removed
    }

    /// Removes a node together with every edge touching it
    ///
    /// Returns `false` if the node was not present.
    pub fn remove_node(&mut self, key: &K) -> bool {
        let Some(node) = self.nodes.shift_remove(key) else {
            return false;
        };
        for parent in &node.parents {
            if let Some(parent_node) = self.nodes.get_mut(parent) {
                parent_node.children.shift_remove(key);
            }
        }
        for child in &node.children {
            if let Some(child_node) = self.nodes.get_mut(child) {
                child_node.parents.shift_remove(key);
            }
        }
        true
    }

    pub fn contains(&self, key: &K) -> bool {
        self.nodes.contains_key(key)
    }

    pub fn node(&self, key: &K) -> Option<&HierarchyNode<K>> {
        self.nodes.get(key)
    }

    /// All nodes, in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &HierarchyNode<K>> {
        self.nodes.values()
    }

    /// Direct parents of `key`; empty for unknown keys
    pub fn parents(&self, key: &K) -> impl Iterator<Item = &K> {
        self.nodes
            .get(key)
            .into_iter()
            .flat_map(|node| node.parents.iter())
    }

    /// Direct children of `key`; empty for unknown keys
    pub fn children(&self, key: &K) -> impl Iterator<Item = &K> {
        self.nodes
            .get(key)
            .into_iter()
            .flat_map(|node| node.children.iter())
    }

    /// Every transitive parent of `key`, depth first, each reported once
    ///
    /// # Errors
    ///
    /// `AuthzError::CircularHierarchy` if a cycle is reachable from `key`
    pub fn ancestors(&self, key: &K) -> Result<Vec<K>> {
        self.traverse(key, Direction::Up)
    }

    /// Every transitive child of `key`, depth first, each reported once
    ///
    /// # Errors
    ///
    /// `AuthzError::CircularHierarchy` if a cycle is reachable from `key`
    pub fn descendants(&self, key: &K) -> Result<Vec<K>> {
        self.traverse(key, Direction::Down)
    }

    /// Checks the whole index for cycles
    pub fn detect_cycles(&self) -> Result<()> {
        let mut state: HashMap<&K, VisitState> = HashMap::new();

        for key in self.nodes.keys() {
            if state.contains_key(key) {
                continue;
            }
            state.insert(key, VisitState::Visiting);
            self.visit(key, Direction::Down, &mut state, None)?;
        }

        Ok(())
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
    }

    fn neighbours(&self, key: &K, direction: Direction) -> impl Iterator<Item = &K> {
        self.nodes.get(key).into_iter().flat_map(move |node| match direction {
            Direction::Up => node.parents.iter(),
            Direction::Down => node.children.iter(),
        })
    }

    fn traverse(&self, key: &K, direction: Direction) -> Result<Vec<K>> {
        let mut state: HashMap<&K, VisitState> = HashMap::new();
        let mut found = Vec::new();

        state.insert(key, VisitState::Visiting);
        self.visit(key, direction, &mut state, Some(&mut found))?;

        Ok(found)
    }

    /// Depth-first walk from `start`, pushing newly reached keys onto
    /// `found` in preorder
    ///
    /// `start` must already be marked `Visiting`. Frames live on the heap so
    /// depth is bounded by memory, not by the thread stack.
    fn visit<'a>(
        &'a self,
        start: &'a K,
        direction: Direction,
        state: &mut HashMap<&'a K, VisitState>,
        mut found: Option<&mut Vec<K>>,
    ) -> Result<()> {
        let mut stack = vec![(start, self.neighbours(start, direction))];

        while let Some((_, pending)) = stack.last_mut() {
            let Some(next) = pending.next() else {
                if let Some((done, _)) = stack.pop() {
                    state.insert(done, VisitState::Visited);
                }
                continue;
            };

            match state.get(next) {
                Some(VisitState::Visiting) => {
                    let path: Vec<&K> = stack.iter().map(|(key, _)| *key).collect();
                    return Err(cycle_error(&path, next));
                }
                Some(VisitState::Visited) => continue,
                None => {}
            }

            if let Some(found) = found.as_deref_mut() {
                found.push(next.clone());
            }

            state.insert(next, VisitState::Visiting);
            stack.push((next, self.neighbours(next, direction)));
        }

        Ok(())
    }
}

impl<K> Default for HierarchyIndex<K>
where
    K: Clone + Eq + Hash + fmt::Display,
{
    fn default() -> Self {
        Self::new()
    }
}

fn cycle_error<K: PartialEq + fmt::Display>(path: &[&K], repeated: &K) -> AuthzError {
    let start = path.iter().position(|key| *key == repeated).unwrap_or(0);
    let mut cycle: Vec<String> = path[start..].iter().map(|key| key.to_string()).collect();
    cycle.push(repeated.to_string());
    AuthzError::CircularHierarchy { path: cycle }
}

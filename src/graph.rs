//! Graph model: nodes, ordered edges and the helpers used to build them
//!
//! Nodes live in an arena owned by [`Graph`] and are addressed through
//! [`NodeIndex`] handles. Every edge is stored twice, as a successor on the
//! parent and as a predecessor on the child. The predecessor order is the
//! order in which the child's operator receives its inputs.
//!
//! None of the linking operations check for cycles. Running a graph with a
//! cycle reachable from its start node never completes, because the nodes on
//! the cycle never reach an indegree of zero. Call [`Graph::validate`] first
//! when the graph comes from untrusted input.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::ops::Index;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{GraphError, Result};
use crate::operator::Operator;

/// Handle to a node inside a [`Graph`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeIndex(usize);

impl NodeIndex {
    /// Position of the node in its graph's arena
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for NodeIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A vertex of the graph, wrapping zero or one operator
pub struct Node<V, G = ()> {
    id: String,
    op: Option<Arc<dyn Operator<V, G>>>,
    prev: Vec<NodeIndex>,
    next: Vec<NodeIndex>,
    timeout: Option<Duration>,
    indegree: usize,
}

impl<V, G> Node<V, G> {
    fn new(id: String, op: Option<Arc<dyn Operator<V, G>>>) -> Self {
        Self {
            id,
            op,
            prev: Vec::new(),
            next: Vec::new(),
            timeout: None,
            indegree: 0,
        }
    }

    /// Identifier used as the node's key in the state store
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Operator run by this node, `None` for the start node
    pub fn operator(&self) -> Option<&Arc<dyn Operator<V, G>>> {
        self.op.as_ref()
    }

    /// True for the start node, which runs nothing and records no output
    pub fn is_workless(&self) -> bool {
        self.op.is_none()
    }

    /// Parents, in the order their outputs are passed to the operator
    pub fn predecessors(&self) -> &[NodeIndex] {
        &self.prev
    }

    /// Children released when this node finishes
    pub fn successors(&self) -> &[NodeIndex] {
        &self.next
    }

    /// Number of parents this node waits on before it can run
    pub fn indegree(&self) -> usize {
        self.indegree
    }

    /// Per-node deadline, overriding the run-wide default
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl<V, G> fmt::Debug for Node<V, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Node")
            .field("id", &self.id)
            .field("workless", &self.is_workless())
            .field("prev", &self.prev)
            .field("next", &self.next)
            .field("timeout", &self.timeout)
            .field("indegree", &self.indegree)
            .finish()
    }
}

/// Arena of nodes plus the edges between them
pub struct Graph<V, G = ()> {
    nodes: Vec<Node<V, G>>,
    ids: HashMap<String, NodeIndex>,
}

impl<V, G> Default for Graph<V, G> {
    fn default() -> Self {
        Self {
            nodes: Vec::new(),
            ids: HashMap::new(),
        }
    }
}

impl<V, G> fmt::Debug for Graph<V, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph").field("nodes", &self.nodes).finish()
    }
}

impl<V, G> Index<NodeIndex> for Graph<V, G> {
    type Output = Node<V, G>;

    fn index(&self, idx: NodeIndex) -> &Self::Output {
        &self.nodes[idx.0]
    }
}

impl<V: 'static, G: 'static> Graph<V, G> {
    /// Creates an empty graph
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates the workless node every run starts from
    pub fn create_start_node(&mut self, id: impl Into<String>) -> NodeIndex {
        self.push(Node::new(id.into(), None))
    }

    /// Creates a detached node wrapping `op`
    pub fn create_node(&mut self, id: impl Into<String>, op: impl Operator<V, G>) -> NodeIndex {
        self.push(Node::new(id.into(), Some(Arc::new(op))))
    }

    /// Creates a node whose only parent is `parent` and returns it
    pub fn append_child(
        &mut self,
        parent: NodeIndex,
        id: impl Into<String>,
        op: impl Operator<V, G>,
    ) -> NodeIndex {
        let child = self.create_node(id, op);
        self.nodes[child.0].prev.push(parent);
        self.nodes[child.0].indegree = 1;
        self.nodes[parent.0].next.push(child);
        child
    }
}

impl<V, G> Graph<V, G> {
    fn push(&mut self, node: Node<V, G>) -> NodeIndex {
        let idx = NodeIndex(self.nodes.len());
        self.ids.entry(node.id.clone()).or_insert(idx);
        self.nodes.push(node);
        idx
    }

    /// Number of nodes, the start node included
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no node was created yet
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Returns true if `idx` points into this graph
    pub fn contains(&self, idx: NodeIndex) -> bool {
        idx.0 < self.nodes.len()
    }

    /// Node behind `idx`, `None` when out of range
    pub fn node(&self, idx: NodeIndex) -> Option<&Node<V, G>> {
        self.nodes.get(idx.0)
    }

    /// Looks a node up by id, the first node created wins on duplicates
    pub fn find(&self, id: &str) -> Option<NodeIndex> {
        self.ids.get(id).copied()
    }

    /// Every node with its handle, in creation order
    pub fn nodes(&self) -> impl Iterator<Item = (NodeIndex, &Node<V, G>)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, node)| (NodeIndex(i), node))
    }

    /// Sets the node's deadline, a zero duration disables it
    pub fn set_timeout(&mut self, node: NodeIndex, timeout: Duration) -> NodeIndex {
        self.nodes[node.0].timeout = (!timeout.is_zero()).then_some(timeout);
        node
    }

    /// Adds `child` as a successor of `parent`
    ///
    /// `parent` goes to the end of the child's predecessors. Linking the same
    /// pair twice is a no-op.
    pub fn link_child(&mut self, parent: NodeIndex, child: NodeIndex) -> NodeIndex {
        if self.nodes[parent.0].next.contains(&child) {
            return child;
        }
        self.nodes[parent.0].next.push(child);
        self.add_prev(child, parent, None);
        child
    }

    /// Appends `parent` to the end of `child`'s predecessors
    ///
    /// Does nothing if it is already one of them.
    pub fn link_parent(&mut self, child: NodeIndex, parent: NodeIndex) -> NodeIndex {
        if self.nodes[child.0].prev.contains(&parent) {
            return parent;
        }
        self.nodes[parent.0].next.push(child);
        self.add_prev(child, parent, None);
        parent
    }

    /// Inserts `new_parent` into `child`'s predecessors right before `existing`
    ///
    /// Falls back to appending when `existing` is not a predecessor.
    /// This lets a builder attach parents out of order and still hand the
    /// operator its inputs in the order it expects.
    pub fn insert_parent_before(
        &mut self,
        child: NodeIndex,
        new_parent: NodeIndex,
        existing: NodeIndex,
    ) -> NodeIndex {
        let prev = &self.nodes[child.0].prev;
        if prev.contains(&new_parent) {
            return new_parent;
        }
        let at = prev.iter().position(|&p| p == existing);
        self.nodes[new_parent.0].next.push(child);
        self.add_prev(child, new_parent, at);
        new_parent
    }

    fn add_prev(&mut self, child: NodeIndex, parent: NodeIndex, at: Option<usize>) {
        let node = &mut self.nodes[child.0];
        match at {
            Some(pos) => node.prev.insert(pos, parent),
            None => node.prev.push(parent),
        }
        node.indegree += 1;
    }

    /// First of `node`'s predecessors, left to right, found in `candidates`
    pub fn find_first_matching_predecessor(
        &self,
        node: NodeIndex,
        candidates: &[NodeIndex],
    ) -> Option<NodeIndex> {
        self.nodes[node.0]
            .prev
            .iter()
            .copied()
            .find(|p| candidates.contains(p))
    }

    /// Links two existing nodes by id, failing when either is missing
    pub fn link_by_id(&mut self, parent_id: &str, child_id: &str) -> Result<NodeIndex> {
        let parent = self
            .find(parent_id)
            .ok_or_else(|| GraphError::UnknownNode(parent_id.to_string()))?;
        let child = self
            .find(child_id)
            .ok_or_else(|| GraphError::UnknownNode(child_id.to_string()))?;
        Ok(self.link_child(parent, child))
    }

    /// Checks the graph before a run
    ///
    /// The start node must exist and be workless, ids must be unique and no
    /// cycle may be reachable from the start.
    pub fn validate(&self, start: NodeIndex) -> Result<()> {
        let start_node = self
            .node(start)
            .ok_or(GraphError::InvalidIndex(start.0))?;
        if !start_node.is_workless() {
            return Err(GraphError::StartHasOperator(start_node.id.clone()));
        }

        let mut seen = HashSet::with_capacity(self.nodes.len());
        for node in &self.nodes {
            if !seen.insert(node.id.as_str()) {
                return Err(GraphError::DuplicateId(node.id.clone()));
            }
        }

        self.check_acyclic(start)
    }

    // Iterative three-colour DFS over the part reachable from `start`
    fn check_acyclic(&self, start: NodeIndex) -> Result<()> {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            Unvisited,
            OnStack,
            Done,
        }

        let mut marks = vec![Mark::Unvisited; self.nodes.len()];
        let mut stack = vec![(start, 0usize)];
        marks[start.0] = Mark::OnStack;

        while let Some((current, cursor)) = stack.last_mut() {
            let next = &self.nodes[current.0].next;
            if let Some(&child) = next.get(*cursor) {
                *cursor += 1;
                match marks[child.0] {
                    Mark::OnStack => {
                        return Err(GraphError::Cycle(self.nodes[child.0].id.clone()));
                    }
                    Mark::Unvisited => {
                        marks[child.0] = Mark::OnStack;
                        stack.push((child, 0));
                    }
                    Mark::Done => {}
                }
            } else {
                marks[current.0] = Mark::Done;
                stack.pop();
            }
        }
        Ok(())
    }
}

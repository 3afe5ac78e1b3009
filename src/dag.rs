//! Core DAG execution logic

use std::any::Any;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{mpsc, Notify};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, debug_span, error, info, warn, Instrument};

use crate::config::DagConfig;
use crate::error::{GraphError, Result};
use crate::graph::{Graph, Node, NodeIndex};
use crate::operator::{OpContext, Operator};
use crate::store::{MemoryStore, StateStore};

/// How a visited node ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// The operator returned and its output was stored, or the node is the
    /// workless start node
    Finished,
    /// The deadline elapsed first and nothing was stored
    TimedOut,
    /// The operator panicked and nothing was stored
    Failed,
}

/// Last observed result of running a node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeOutcome {
    /// How the node ended
    pub status: NodeStatus,
    /// Time from dispatch to the end of the operator race
    pub elapsed: Duration,
}

impl NodeOutcome {
    /// Returns true if the node's deadline elapsed
    pub fn is_canceled(&self) -> bool {
        self.status == NodeStatus::TimedOut
    }
}

/// Result of DAG execution
#[derive(Debug)]
pub struct ExecutionResult {
    /// Number of nodes that ran, including the start node
    pub processed_count: usize,
    /// Total number of nodes in the graph
    pub total_nodes: usize,
    /// IDs of nodes whose deadline elapsed
    pub timed_out: Vec<String>,
    /// IDs of nodes whose operator panicked
    pub failed_nodes: Vec<String>,
    /// Wall time of the whole run
    pub elapsed: Duration,
}

impl ExecutionResult {
    /// Returns true if every node of the graph was reached
    pub fn is_complete(&self) -> bool {
        self.processed_count == self.total_nodes
    }

    /// Returns true if no reached node timed out or failed
    pub fn is_successful(&self) -> bool {
        self.timed_out.is_empty() && self.failed_nodes.is_empty()
    }
}

/// Dependency counters of a run, all guarded by one lock
#[derive(Debug, Default)]
struct Schedule {
    indegree: Vec<usize>,
    outcomes: Vec<Option<NodeOutcome>>,
    /// Nodes scheduled but not yet fully propagated
    active: usize,
}

impl Schedule {
    fn new<V, G>(graph: &Graph<V, G>) -> Self {
        Self {
            indegree: graph.nodes().map(|(_, node)| node.indegree()).collect(),
            outcomes: vec![None; graph.len()],
            active: 0,
        }
    }

    /// Counts one finished parent of `child`
    ///
    /// Returns true when that was the last one, in which case the child is
    /// already counted as in flight.
    fn release(&mut self, child: NodeIndex) -> bool {
        let remaining = &mut self.indegree[child.index()];
        let Some(left) = remaining.checked_sub(1) else {
            return false;
        };
        *remaining = left;
        if left == 0 {
            // Must happen before the child is queued, or `active` could read
            // zero while it is still pending.
            self.active += 1;
            true
        } else {
            false
        }
    }
}

/// State shared by the dispatch loop and every node task of one run
struct Run<V, G> {
    graph: Arc<Graph<V, G>>,
    store: Arc<dyn StateStore<V, G>>,
    config: DagConfig,
    schedule: Mutex<Schedule>,
    ready: mpsc::UnboundedSender<NodeIndex>,
    done: Notify,
}

impl<V, G> Run<V, G>
where
    V: Clone + Send + Sync + 'static,
    G: Send + Sync + 'static,
{
    async fn process_node(self: Arc<Self>, idx: NodeIndex) {
        let node = &self.graph[idx];
        let started = Instant::now();
        let status = match node.operator() {
            Some(op) => self.invoke(idx, op.clone()).await,
            None => NodeStatus::Finished,
        };
        let outcome = NodeOutcome {
            status,
            elapsed: started.elapsed(),
        };

        if self.config.verbose {
            info!(?status, elapsed_ms = outcome.elapsed.as_millis() as u64, "Node complete");
        } else {
            debug!(?status, elapsed_ms = outcome.elapsed.as_millis() as u64, "Node complete");
        }
        self.propagate(idx, node, outcome);
    }

    /// Runs the operator on its own task and races it against the deadline
    ///
    /// Only the node unit writes to the store, and only when the operator
    /// task wins. On timeout the task is aborted and whatever it returns
    /// later is dropped, even if it never yields.
    async fn invoke(self: &Arc<Self>, idx: NodeIndex, op: Arc<dyn Operator<V, G>>) -> NodeStatus {
        let node = &self.graph[idx];
        let timeout = node.timeout().or(self.config.default_timeout);
        let deadline = timeout.map(|t| Instant::now() + t);
        let cancel = CancellationToken::new();
        let ctx = OpContext::new(node.id(), deadline, cancel.clone());

        let run = self.clone();
        let mut handle = tokio::spawn(
            async move {
                let node = &run.graph[idx];
                let inputs = node
                    .predecessors()
                    .iter()
                    .map(|&p| run.store.input_from(run.graph[p].id(), node.id()))
                    .collect();
                let global = run.store.global();
                op.process(ctx, global, inputs).await
            }
            .in_current_span(),
        );

        let joined = match deadline {
            Some(deadline) => tokio::select! {
                biased;
                _ = tokio::time::sleep_until(deadline) => {
                    handle.abort();
                    cancel.cancel();
                    let timeout_ms = timeout.unwrap_or_default().as_millis() as u64;
                    warn!(timeout_ms, "Node timed out");
                    return NodeStatus::TimedOut;
                }
                joined = &mut handle => joined,
            },
            None => handle.await,
        };

        match joined {
            Ok(output) => {
                self.store.set_output(node.id(), output);
                NodeStatus::Finished
            }
            Err(err) if err.is_panic() => {
                let message = panic_message(err.into_panic());
                error!(%message, "Operator panicked");
                NodeStatus::Failed
            }
            Err(err) => {
                error!(%err, "Operator task was cancelled");
                NodeStatus::Failed
            }
        }
    }

    /// Releases the node's children, then retires the node itself
    fn propagate(&self, idx: NodeIndex, node: &Node<V, G>, outcome: NodeOutcome) {
        self.schedule.lock().outcomes[idx.index()] = Some(outcome);

        for &child in node.successors() {
            let ready = self.schedule.lock().release(child);
            if ready {
                let _ = self.ready.send(child);
            }
        }

        let active = {
            let mut schedule = self.schedule.lock();
            schedule.active -= 1;
            schedule.active
        };
        if active == 0 {
            self.done.notify_one();
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

/// Concurrent DAG executor that runs every node as soon as its last parent
/// has finished
///
/// There is no precomputed plan and no worker pool: each ready node gets its
/// own tokio task, and the run is over once the in-flight count drops to zero.
/// Only nodes reachable from the start node are visited.
///
/// The graph must be acyclic. A cycle reachable from the start node makes
/// [`Dag::execute`] wait forever; see [`Graph::validate`].
pub struct Dag<V, G = ()> {
    graph: Arc<Graph<V, G>>,
    start: NodeIndex,
    store: Arc<dyn StateStore<V, G>>,
    config: DagConfig,
    global: Option<G>,
    schedule: Schedule,
}

impl<V, G> Dag<V, G>
where
    V: Clone + Send + Sync + 'static,
    G: Send + Sync + 'static,
{
    /// Creates an executor over `graph`, seeded from `start`, with a fresh
    /// [`MemoryStore`]
    pub fn new(graph: Graph<V, G>, start: NodeIndex) -> Result<Self> {
        if !graph.contains(start) {
            return Err(GraphError::InvalidIndex(start.index()));
        }
        let schedule = Schedule::new(&graph);
        Ok(Self {
            graph: Arc::new(graph),
            start,
            store: Arc::new(MemoryStore::new()),
            config: DagConfig::default(),
            global: None,
            schedule,
        })
    }

    /// Replaces the default store
    pub fn with_store(mut self, store: Arc<dyn StateStore<V, G>>) -> Self {
        self.store = store;
        self
    }

    /// Sets the global value every operator receives
    ///
    /// The value is handed to whichever store is bound when the next run
    /// starts, so the order relative to [`Dag::with_store`] does not matter.
    pub fn with_global(mut self, global: G) -> Self {
        self.global = Some(global);
        self
    }

    /// Replaces the run-wide settings
    pub fn with_config(mut self, config: DagConfig) -> Self {
        self.config = config;
        self
    }

    /// Enables info-level node logging
    pub fn verbose(mut self, enabled: bool) -> Self {
        self.config.verbose = enabled;
        self
    }

    /// Graph this executor runs
    pub fn graph(&self) -> &Graph<V, G> {
        &self.graph
    }

    /// Store holding the outputs of the last run
    pub fn state_store(&self) -> &Arc<dyn StateStore<V, G>> {
        &self.store
    }

    /// Outcome of `node` in the last run, `None` if it was not reached
    pub fn outcome(&self, node: NodeIndex) -> Option<NodeOutcome> {
        self.schedule.outcomes.get(node.index()).copied().flatten()
    }

    /// Parents of `node` that had not finished when the last run ended
    pub fn pending_dependencies(&self, node: NodeIndex) -> Option<usize> {
        self.schedule.indegree.get(node.index()).copied()
    }

    /// Executes the graph with maximum concurrency
    ///
    /// Outputs land in the store; the returned summary only says which nodes
    /// ran and how they ended. Each call is a fresh run over the same graph:
    /// outputs of operator nodes left by an earlier run are removed first, so
    /// a node that times out this time leaves no entry behind.
    pub async fn execute(&mut self) -> ExecutionResult {
        let started = Instant::now();
        let (tx, mut rx) = mpsc::unbounded_channel::<NodeIndex>();

        if let Some(global) = self.global.take() {
            self.store.set_global(global);
        }
        for (_, node) in self.graph.nodes().filter(|(_, node)| !node.is_workless()) {
            self.store.remove_output(node.id());
        }

        let run = Arc::new(Run {
            graph: self.graph.clone(),
            store: self.store.clone(),
            config: self.config.clone(),
            schedule: Mutex::new(Schedule::new(&*self.graph)),
            ready: tx,
            done: Notify::new(),
        });

        debug!(
            start = %self.graph[self.start].id(),
            nodes = self.graph.len(),
            "Starting DAG run"
        );

        // The start node is in flight before it is queued
        run.schedule.lock().active = 1;
        let _ = run.ready.send(self.start);

        // Main loop: spawn every node handed over until the run drains
        loop {
            tokio::select! {
                Some(idx) = rx.recv() => {
                    let span = debug_span!("dag_node", node = %self.graph[idx].id());
                    tokio::spawn(run.clone().process_node(idx).instrument(span));
                }
                _ = run.done.notified() => break,
            }
        }

        self.schedule = std::mem::take(&mut *run.schedule.lock());

        let mut processed_count = 0;
        let mut timed_out = Vec::new();
        let mut failed_nodes = Vec::new();
        for (idx, node) in self.graph.nodes() {
            let Some(outcome) = self.outcome(idx) else {
                continue;
            };
            processed_count += 1;
            match outcome.status {
                NodeStatus::Finished => {}
                NodeStatus::TimedOut => timed_out.push(node.id().to_string()),
                NodeStatus::Failed => failed_nodes.push(node.id().to_string()),
            }
        }

        let result = ExecutionResult {
            processed_count,
            total_nodes: self.graph.len(),
            timed_out,
            failed_nodes,
            elapsed: started.elapsed(),
        };
        info!(
            processed = result.processed_count,
            total = result.total_nodes,
            timed_out = result.timed_out.len(),
            failed = result.failed_nodes.len(),
            elapsed_ms = result.elapsed.as_millis() as u64,
            "DAG run finished"
        );
        result
    }
}

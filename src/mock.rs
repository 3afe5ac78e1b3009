//! Mock graph generation for testing

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::graph::{Graph, NodeIndex};
use crate::operator::{OpContext, Operator};

/// Configuration for mock graph generation
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Number of operator nodes to generate (the start node comes on top)
    pub node_count: usize,
    /// Maximum number of parents per non-root node
    pub max_dependencies: usize,
    /// Number of root nodes (children of the start node only)
    pub root_nodes: usize,
    /// Upper bound of the random per-node processing delay
    pub max_delay_ms: u64,
    /// Whether parent edges are attached in random order
    pub shuffle: bool,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            node_count: 50,
            max_dependencies: 3,
            root_nodes: 6,
            max_delay_ms: 5,
            shuffle: true,
        }
    }
}

/// Records what every mock operator saw
#[derive(Debug, Default)]
pub struct MockRecorder {
    calls: Mutex<HashMap<String, usize>>,
    inputs: Mutex<HashMap<String, Vec<Option<String>>>>,
}

impl MockRecorder {
    /// How many times the operator of `id` was invoked
    pub fn calls(&self, id: &str) -> usize {
        self.calls.lock().get(id).copied().unwrap_or(0)
    }

    /// Inputs the operator of `id` received on its last invocation
    pub fn inputs(&self, id: &str) -> Option<Vec<Option<String>>> {
        self.inputs.lock().get(id).cloned()
    }
}

/// Operator that waits a fixed delay and returns its node id
pub struct MockOp {
    delay: Duration,
    recorder: Arc<MockRecorder>,
}

impl Operator<String> for MockOp {
    fn process(
        &self,
        ctx: OpContext,
        _global: Option<Arc<()>>,
        inputs: Vec<Option<String>>,
    ) -> BoxFuture<'_, String> {
        async move {
            let id = ctx.node_id().to_string();
            *self.recorder.calls.lock().entry(id.clone()).or_default() += 1;
            self.recorder.inputs.lock().insert(id.clone(), inputs);
            tokio::time::sleep(self.delay).await;
            id
        }
        .boxed()
    }
}

/// A generated graph together with what a correct run must produce
pub struct MockGraph {
    /// The generated graph
    pub graph: Graph<String>,
    /// Workless node every root hangs off
    pub start: NodeIndex,
    /// Operator node ids in creation order
    pub ids: Vec<String>,
    /// Expected predecessor ids per node, in input order
    pub parents: HashMap<String, Vec<String>>,
    /// Shared record of every operator invocation
    pub recorder: Arc<MockRecorder>,
}

/// Generates a mock DAG with randomized dependencies
pub fn generate_mock_graph(count: usize) -> MockGraph {
    generate_mock_graph_with_config(MockConfig {
        node_count: count,
        ..Default::default()
    })
}

/// Generates a mock DAG with custom configuration
///
/// Root nodes hang off the start node; every later node depends on a random
/// set of earlier ones, which keeps the graph acyclic. Each node's
/// predecessors always end up sorted by creation order, even when `shuffle`
/// attaches them in random order.
pub fn generate_mock_graph_with_config(config: MockConfig) -> MockGraph {
    let mut rng = rand::thread_rng();
    let recorder = Arc::new(MockRecorder::default());
    let mut graph = Graph::new();
    let start = graph.create_start_node("start");
    let mut nodes: Vec<NodeIndex> = Vec::with_capacity(config.node_count);
    let mut ids: Vec<String> = Vec::with_capacity(config.node_count);
    let mut parents = HashMap::with_capacity(config.node_count);

    for i in 1..=config.node_count {
        let id = format!("node_{}", i);
        // Draw the delay up front; the operator itself stays free of the rng
        let op = MockOp {
            delay: Duration::from_millis(rng.gen_range(0..=config.max_delay_ms)),
            recorder: recorder.clone(),
        };

        let mut deps = BTreeSet::new();
        if i > config.root_nodes && !nodes.is_empty() {
            let dep_count = rng.gen_range(1..=config.max_dependencies.max(1));
            for _ in 0..dep_count {
                deps.insert(rng.gen_range(0..nodes.len()));
            }
        }

        let node = if deps.is_empty() {
            graph.append_child(start, id.clone(), op)
        } else {
            let node = graph.create_node(id.clone(), op);
            let mut order: Vec<usize> = deps.iter().copied().collect();
            if config.shuffle {
                order.shuffle(&mut rng);
            }
            for dep in order {
                // Anchor on the closest already-linked parent created after `dep`
                let later: Vec<NodeIndex> = deps.range(dep + 1..).map(|&d| nodes[d]).collect();
                match graph.find_first_matching_predecessor(node, &later) {
                    Some(anchor) => graph.insert_parent_before(node, nodes[dep], anchor),
                    None => graph.link_parent(node, nodes[dep]),
                };
            }
            node
        };

        let expected = if deps.is_empty() {
            vec!["start".to_string()]
        } else {
            deps.iter().map(|&d| ids[d].clone()).collect()
        };
        parents.insert(id.clone(), expected);
        nodes.push(node);
        ids.push(id);
    }

    MockGraph {
        graph,
        start,
        ids,
        parents,
        recorder,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::Dag;
    use std::collections::HashSet;

    #[test]
    fn test_generate_mock_graph_count() {
        let mock = generate_mock_graph(25);
        assert_eq!(mock.graph.len(), 26);
        assert_eq!(mock.ids.len(), 25);
    }

    #[test]
    fn test_generate_mock_graph_unique_ids() {
        let mock = generate_mock_graph(50);
        let ids: HashSet<_> = mock.graph.nodes().map(|(_, n)| n.id()).collect();
        assert_eq!(ids.len(), 51);
        assert_eq!(mock.graph.validate(mock.start), Ok(()));
    }

    #[test]
    fn test_predecessors_sorted_despite_shuffle() {
        for _ in 0..20 {
            let mock = generate_mock_graph_with_config(MockConfig {
                node_count: 40,
                max_dependencies: 5,
                root_nodes: 3,
                ..Default::default()
            });
            for (_, node) in mock.graph.nodes() {
                if node.is_workless() {
                    continue;
                }
                let actual: Vec<&str> = node
                    .predecessors()
                    .iter()
                    .map(|&p| mock.graph[p].id())
                    .collect();
                assert_eq!(actual, mock.parents[node.id()]);
                assert_eq!(node.indegree(), actual.len());
            }
        }
    }

    #[test]
    fn test_root_nodes_hang_off_start() {
        let config = MockConfig {
            node_count: 20,
            root_nodes: 5,
            shuffle: false,
            ..Default::default()
        };
        let mock = generate_mock_graph_with_config(config);

        for id in mock.ids.iter().take(5) {
            assert_eq!(mock.parents[id], vec!["start".to_string()]);
        }
        assert!(mock.graph[mock.start].successors().len() >= 5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_random_dags_run_every_node_exactly_once() {
        for _ in 0..10 {
            let mock = generate_mock_graph(60);
            let recorder = mock.recorder.clone();
            let parents = mock.parents.clone();
            let ids = mock.ids.clone();

            let mut dag = Dag::new(mock.graph, mock.start).unwrap();
            let result = dag.execute().await;
            assert!(result.is_complete());
            assert!(result.is_successful());

            let outputs = dag.state_store().all_outputs();
            assert_eq!(outputs.len(), ids.len());
            for id in &ids {
                assert_eq!(recorder.calls(id), 1, "{id} ran more than once");
                assert_eq!(outputs[id], *id);

                // Inputs arrive in predecessor order; the start node adds nothing
                let expected: Vec<Option<String>> = parents[id]
                    .iter()
                    .map(|p| (p != "start").then(|| p.clone()))
                    .collect();
                assert_eq!(recorder.inputs(id), Some(expected));
            }
            assert_eq!(recorder.calls("start"), 0);
        }
    }
}

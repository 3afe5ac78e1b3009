//! # Local DAG Engine
//!
//! A concurrent DAG (Directed Acyclic Graph) engine that runs user-defined
//! operators with maximum parallelism. Each operator receives the outputs of
//! its direct parents, in the order those parents were linked.
//!
//! ## Key Features
//!
//! - **Dynamic readiness**: no precomputed plan or barriers. A node runs as
//!   soon as its last parent finishes
//! - **Ordered fan-in**: parents can be inserted at a chosen position, so a
//!   join receives its inputs in the order its operator expects
//! - **Per-node deadlines**: a node that times out stores nothing, and its
//!   children still run
//! - **Pluggable state**: outputs flow through a [`StateStore`]; swap in your
//!   own to shape a producer's output per consumer
//!
//! ## Usage
//!
//! ```ignore
//! let mut graph: Graph<String> = Graph::new();
//! let start = graph.create_start_node("start");
//! let left = graph.append_child(start, "left", left_op);
//! let right = graph.append_child(start, "right", right_op);
//! let join = graph.append_child(left, "join", join_op);
//! graph.link_child(right, join);
//!
//! let mut dag = Dag::new(graph, start)?;
//! dag.execute().await;
//! let outputs = dag.state_store().all_outputs();
//! ```
//!
//! The graph must be acyclic. Cycles are not detected while running; use
//! [`Graph::validate`] when in doubt.

pub mod config;
pub mod dag;
pub mod error;
pub mod graph;
pub mod mock;
pub mod operator;
pub mod store;

pub use config::DagConfig;
pub use dag::{Dag, ExecutionResult, NodeOutcome, NodeStatus};
pub use error::GraphError;
pub use graph::{Graph, Node, NodeIndex};
pub use mock::{generate_mock_graph, MockConfig};
pub use operator::{op_fn, FnOperator, OpContext, Operator, ProcessFn};
pub use store::{MemoryStore, StateStore};

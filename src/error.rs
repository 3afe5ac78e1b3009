use thiserror::Error;

/// Errors raised while building or validating a graph
///
/// Runtime problems (timeouts, panicking operators) are not errors; they are
/// recorded as node outcomes and the run carries on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum GraphError {
    #[error("node not found: {0}")]
    UnknownNode(String),

    #[error("node index {0} is out of range")]
    InvalidIndex(usize),

    #[error("duplicate node id: {0}")]
    DuplicateId(String),

    #[error("start node '{0}' must not carry an operator")]
    StartHasOperator(String),

    #[error("graph contains a cycle through node '{0}'")]
    Cycle(String),
}

/// Result alias for graph construction
pub type Result<T> = std::result::Result<T, GraphError>;

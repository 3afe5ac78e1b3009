//! The unit of work wrapped by a graph node

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

/// Per-invocation context handed to an operator
///
/// Carries the id of the node being executed, so operators can tag their own
/// logs or metrics, plus the node's deadline and a token that fires when the
/// deadline elapses.
#[derive(Debug, Clone)]
pub struct OpContext {
    node_id: String,
    deadline: Option<Instant>,
    cancel: CancellationToken,
}

impl OpContext {
    /// Creates a context for one invocation of node `node_id`
    pub fn new(
        node_id: impl Into<String>,
        deadline: Option<Instant>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            deadline,
            cancel,
        }
    }

    /// Id of the node currently executing this operator
    pub fn node_id(&self) -> &str {
        &self.node_id
    }

    /// Instant the node times out at, if it has a timeout
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline, `None` when the node has no timeout
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    /// Returns true once the node has timed out
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Resolves once the node has timed out
    ///
    /// The operator task itself is aborted on timeout. This is for blocking
    /// work that cannot be interrupted at an await point, and for work the
    /// operator handed off to other tasks.
    pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
        self.cancel.cancelled()
    }

    /// Owned token for handing cancellation to spawned work
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// A node's computation
///
/// `inputs` holds one entry per predecessor, in predecessor-list order. An
/// entry is `None` when that predecessor left nothing in the store (it timed
/// out, panicked or is the workless start node). Operators of the same run are
/// invoked concurrently, each at most once.
pub trait Operator<V, G = ()>: Send + Sync + 'static {
    /// Computes the node's output from its parents' values
    fn process(
        &self,
        ctx: OpContext,
        global: Option<Arc<G>>,
        inputs: Vec<Option<V>>,
    ) -> BoxFuture<'_, V>;
}

/// Type alias for a closure-backed operator body
pub type ProcessFn<V, G> =
    Arc<dyn Fn(OpContext, Option<Arc<G>>, Vec<Option<V>>) -> BoxFuture<'static, V> + Send + Sync>;

/// Operator backed by a closure, see [`op_fn`]
pub struct FnOperator<V, G = ()> {
    f: ProcessFn<V, G>,
}

impl<V, G> Clone for FnOperator<V, G> {
    fn clone(&self) -> Self {
        Self { f: self.f.clone() }
    }
}

impl<V, G> Operator<V, G> for FnOperator<V, G>
where
    V: Send + 'static,
    G: Send + Sync + 'static,
{
    fn process(
        &self,
        ctx: OpContext,
        global: Option<Arc<G>>,
        inputs: Vec<Option<V>>,
    ) -> BoxFuture<'_, V> {
        (self.f)(ctx, global, inputs)
    }
}

/// Wraps an async closure as an [`Operator`]
///
/// ```ignore
/// let upper = op_fn(|_ctx, _global: Option<Arc<()>>, inputs: Vec<Option<String>>| async move {
///     inputs.into_iter().flatten().collect::<String>().to_uppercase()
/// });
/// ```
pub fn op_fn<V, G, F, Fut>(f: F) -> FnOperator<V, G>
where
    V: 'static,
    G: 'static,
    F: Fn(OpContext, Option<Arc<G>>, Vec<Option<V>>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = V> + Send + 'static,
{
    FnOperator {
        f: Arc::new(move |ctx, global, inputs| f(ctx, global, inputs).boxed()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(id: &str, deadline: Option<Instant>) -> OpContext {
        OpContext::new(id, deadline, CancellationToken::new())
    }

    #[tokio::test]
    async fn test_op_fn_receives_inputs_in_order() {
        let op = op_fn(|_ctx, _global: Option<Arc<()>>, inputs: Vec<Option<String>>| async move {
            inputs
                .into_iter()
                .map(|i| i.unwrap_or_else(|| "-".into()))
                .collect::<Vec<_>>()
                .join(",")
        });

        let out = op
            .process(ctx("n", None), None, vec![Some("a".into()), None, Some("c".into())])
            .await;
        assert_eq!(out, "a,-,c");
    }

    #[tokio::test]
    async fn test_op_fn_sees_node_id_and_global() {
        let op = op_fn(
            |ctx: OpContext, global: Option<Arc<u32>>, _inputs: Vec<Option<String>>| async move {
                format!("{}:{}", ctx.node_id(), global.map_or(0, |g| *g))
            },
        );

        let out = op.process(ctx("node_7", None), Some(Arc::new(42)), vec![]).await;
        assert_eq!(out, "node_7:42");
    }

    #[tokio::test]
    async fn test_context_deadline_and_cancellation() {
        let no_deadline = ctx("a", None);
        assert!(no_deadline.deadline().is_none());
        assert!(no_deadline.remaining().is_none());

        let token = CancellationToken::new();
        let with_deadline = OpContext::new(
            "b",
            Some(Instant::now() + Duration::from_secs(60)),
            token.clone(),
        );
        let remaining = with_deadline.remaining().unwrap();
        assert!(remaining > Duration::from_secs(50));
        assert!(!with_deadline.is_cancelled());

        token.cancel();
        assert!(with_deadline.is_cancelled());
        with_deadline.cancelled().await;
    }

    #[test]
    fn test_remaining_saturates_after_deadline() {
        let past = OpContext::new("late", Some(Instant::now()), CancellationToken::new());
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(past.remaining(), Some(Duration::ZERO));
    }
}

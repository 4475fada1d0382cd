//! Provider pool with run-and-mark failover.
//!
//! A [`Balancer`] holds named nodes (typically providers for different
//! vendors or accounts). [`run`](Balancer::run) tries nodes in
//! round-robin order; a node whose attempt fails is marked down for a
//! cooldown and the next node is tried, so a single flaky vendor does
//! not take the pool with it.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::complete::{complete, parse_json_response};
use crate::context::CallContext;
use crate::error::{ErrorKind, LlmError};
use crate::message::Messages;
use crate::provider::{JsonMap, Llm, RequestMutator};

/// Default time a failing node stays out of rotation.
pub const DEFAULT_COOLDOWN: Duration = Duration::from_secs(30);

struct Node<T> {
    name: String,
    value: Arc<T>,
    down_until: Mutex<Option<Instant>>,
}

impl<T> Node<T> {
    fn is_available(&self) -> bool {
        self.down_until
            .lock()
            .expect("node lock poisoned")
            .is_none_or(|until| Instant::now() >= until)
    }

    fn mark_down(&self, cooldown: Duration) {
        *self.down_until.lock().expect("node lock poisoned") = Some(Instant::now() + cooldown);
    }
}

/// A round-robin node pool with per-node failure cooldowns.
///
/// ```rust
/// use llm_mux::Balancer;
///
/// let mut pool: Balancer<String> = Balancer::new();
/// pool.add("primary", "node-a".to_owned());
/// pool.add("fallback", "node-b".to_owned());
/// assert_eq!(pool.len(), 2);
/// ```
pub struct Balancer<T> {
    nodes: Vec<Node<T>>,
    cursor: AtomicUsize,
    cooldown: Duration,
}

impl<T> Balancer<T> {
    /// An empty pool with the default cooldown.
    pub fn new() -> Self {
        Self::with_cooldown(DEFAULT_COOLDOWN)
    }

    /// An empty pool with a custom failure cooldown.
    pub fn with_cooldown(cooldown: Duration) -> Self {
        Self {
            nodes: Vec::new(),
            cursor: AtomicUsize::new(0),
            cooldown,
        }
    }

    /// Adds a named node to the rotation.
    pub fn add(&mut self, name: impl Into<String>, value: T) {
        self.nodes.push(Node {
            name: name.into(),
            value: Arc::new(value),
            down_until: Mutex::new(None),
        });
    }

    /// Number of nodes, available or not.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the pool has no nodes.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Visits every node: name, value, and current availability.
    pub fn walk_nodes(&self, mut visitor: impl FnMut(&str, &T, bool)) {
        for node in &self.nodes {
            visitor(&node.name, &node.value, node.is_available());
        }
    }

    /// Runs `op` against pool nodes until one succeeds.
    ///
    /// Nodes are visited in round-robin order starting from a moving
    /// cursor; a failing node is marked down for the cooldown and the
    /// next is tried. When every node is down or has failed, the last
    /// failure propagates.
    pub async fn run<R, F>(&self, mut op: F) -> Result<R, LlmError>
    where
        F: AsyncFnMut(Arc<T>) -> Result<R, LlmError>,
    {
        if self.nodes.is_empty() {
            return Err(LlmError::new(ErrorKind::Unknown, "balancer has no nodes"));
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed);
        let mut last_err: Option<LlmError> = None;

        for i in 0..self.nodes.len() {
            let node = &self.nodes[(start + i) % self.nodes.len()];
            if !node.is_available() {
                continue;
            }
            match op(Arc::clone(&node.value)).await {
                Ok(value) => return Ok(value),
                Err(e) => {
                    tracing::warn!(node = %node.name, error = %e, "balancer node failed");
                    node.mark_down(self.cooldown);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| LlmError::new(ErrorKind::Unknown, "no available balancer nodes")))
    }
}

impl<T> Default for Balancer<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> std::fmt::Debug for Balancer<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Balancer")
            .field(
                "nodes",
                &self.nodes.iter().map(|n| &n.name).collect::<Vec<_>>(),
            )
            .field("cooldown", &self.cooldown)
            .finish()
    }
}

/// Completes a prompt against the pool, failing over between nodes.
///
/// Each attempt runs on a copy of the conversation, so a failing node
/// leaves no partial turns behind.
pub async fn balancer_complete<L: Llm>(
    cx: &CallContext,
    pool: &Balancer<L>,
    messages: &Messages,
    mutators: &[RequestMutator],
) -> Result<String, LlmError> {
    pool.run(async |llm: Arc<L>| {
        let mut attempt = messages.clone();
        complete(cx, llm.as_ref(), &mut attempt, mutators).await
    })
    .await
}

/// [`balancer_complete`], parsing the answer as a JSON object.
pub async fn balancer_complete_json<L: Llm>(
    cx: &CallContext,
    pool: &Balancer<L>,
    messages: &Messages,
    mutators: &[RequestMutator],
) -> Result<JsonMap, LlmError> {
    let text = balancer_complete(cx, pool, messages, mutators).await?;
    Ok(parse_json_response(&text))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_pool_errors() {
        let pool: Balancer<u32> = Balancer::new();
        let err = pool.run(async |_n| Ok(())).await.unwrap_err();
        assert!(err.message.contains("no nodes"));
    }

    #[tokio::test]
    async fn test_single_node_success() {
        let mut pool = Balancer::new();
        pool.add("a", 41u32);
        let out = pool.run(async |n: Arc<u32>| Ok(*n + 1)).await.unwrap();
        assert_eq!(out, 42);
    }

    #[tokio::test]
    async fn test_failover_to_next_node() {
        let mut pool = Balancer::new();
        pool.add("bad", "bad".to_owned());
        pool.add("good", "good".to_owned());

        let out = pool
            .run(async |n: Arc<String>| {
                if *n == "bad" {
                    Err(LlmError::new(ErrorKind::Server, "down"))
                } else {
                    Ok((*n).clone())
                }
            })
            .await
            .unwrap();
        assert_eq!(out, "good");
    }

    #[tokio::test]
    async fn test_failed_node_marked_down() {
        let mut pool = Balancer::with_cooldown(Duration::from_secs(3600));
        pool.add("only", 1u32);

        let _ = pool
            .run(async |_n: Arc<u32>| -> Result<(), LlmError> {
                Err(LlmError::new(ErrorKind::Server, "down"))
            })
            .await;

        let mut available = true;
        pool.walk_nodes(|_, _, ok| available = ok);
        assert!(!available);

        // With the only node down, run reports no availability.
        let err = pool.run(async |_n| Ok(())).await.unwrap_err();
        assert!(err.message.contains("no available"));
    }

    #[tokio::test]
    async fn test_all_nodes_fail_returns_last_error() {
        let mut pool = Balancer::new();
        pool.add("a", 1u32);
        pool.add("b", 2u32);

        let err = pool
            .run(async |n: Arc<u32>| -> Result<(), LlmError> {
                Err(LlmError::new(ErrorKind::Server, format!("node {n}")))
            })
            .await
            .unwrap_err();
        assert!(err.message.starts_with("node"));
    }

    #[test]
    fn test_walk_nodes_sees_all() {
        let mut pool = Balancer::new();
        pool.add("a", 1u32);
        pool.add("b", 2u32);
        let mut names = Vec::new();
        pool.walk_nodes(|name, _, _| names.push(name.to_owned()));
        assert_eq!(names, ["a", "b"]);
    }
}

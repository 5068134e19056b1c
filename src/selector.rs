//! The selector seam shared with the host RPC client.
//!
//! The host owns the selector lifecycle: it initializes one selector per
//! client, asks it for a selection before every dispatch, feeds back the
//! outcome through `mark`, and closes it on shutdown. Everything here is
//! written so a strategy can be swapped in without touching the rest of the
//! lifecycle; the low-latency strategy in [`crate::strategies`] plugs into
//! exactly this seam.

use std::fmt;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use rand::prelude::*;

use crate::error::SelectError;
use crate::registry::{RegistryNode, Service};
use crate::snapshot::SnapshotCell;

/// Deferred selection result. The host requests a selection first and
/// resolves the actual node right before dispatch.
#[derive(Clone)]
pub struct Next {
    resolve: Arc<dyn Fn() -> Result<RegistryNode, SelectError> + Send + Sync>,
}

impl Next {
    pub fn new(
        resolve: impl Fn() -> Result<RegistryNode, SelectError> + Send + Sync + 'static,
    ) -> Self {
        Next {
            resolve: Arc::new(resolve),
        }
    }

    pub fn node(node: RegistryNode) -> Self {
        Next::new(move || Ok(node.clone()))
    }

    pub fn fail(err: SelectError) -> Self {
        Next::new(move || Err(err.clone()))
    }

    pub fn resolve(&self) -> Result<RegistryNode, SelectError> {
        (self.resolve)()
    }
}

impl fmt::Debug for Next {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Next").finish_non_exhaustive()
    }
}

/// Picks a node from the current registry snapshot.
#[async_trait]
pub trait Strategy: Send + Sync {
    async fn choose(&self, services: &[Service]) -> Next;
}

/// Options applied by [`Selector::init`].
#[derive(Default)]
pub struct SelectorOptions {
    pub strategy: Option<Arc<dyn Strategy>>,
}

impl SelectorOptions {
    pub fn with_strategy(strategy: Arc<dyn Strategy>) -> Self {
        SelectorOptions {
            strategy: Some(strategy),
        }
    }
}

/// The selector abstraction the host RPC client consumes.
#[async_trait]
pub trait Selector: Send + Sync {
    fn init(&self, opts: SelectorOptions) -> Result<(), SelectError>;

    async fn select(&self, service: &str) -> Result<Next, SelectError>;

    /// Feedback after the host used (or failed to use) a node.
    async fn mark(&self, service: &str, node: &RegistryNode, outcome: Option<&SelectError>);

    async fn reset(&self, service: &str);

    async fn close(&self) -> Result<(), SelectError>;

    fn describe(&self) -> &'static str;
}

/// Snapshot-backed selector with a pluggable strategy.
///
/// Reads the service → nodes relation out of a [`SnapshotCell`] the host
/// keeps fresh, scopes it to the requested service name, and delegates the
/// actual pick to the current strategy (uniform random until `init`
/// installs something better).
pub struct DefaultSelector {
    services: Arc<SnapshotCell<Vec<Service>>>,
    strategy: RwLock<Arc<dyn Strategy>>,
}

impl DefaultSelector {
    pub fn new(services: Arc<SnapshotCell<Vec<Service>>>) -> Self {
        DefaultSelector {
            services,
            strategy: RwLock::new(Arc::new(RandomStrategy)),
        }
    }

    fn current_strategy(&self) -> Arc<dyn Strategy> {
        match self.strategy.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }
}

#[async_trait]
impl Selector for DefaultSelector {
    fn init(&self, opts: SelectorOptions) -> Result<(), SelectError> {
        if let Some(strategy) = opts.strategy {
            let mut guard = match self.strategy.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            *guard = strategy;
        }
        Ok(())
    }

    async fn select(&self, service: &str) -> Result<Next, SelectError> {
        let snapshot = self.services.latest();
        let scoped: Vec<Service> = snapshot
            .iter()
            .filter(|s| service.is_empty() || s.name == service)
            .cloned()
            .collect();

        if scoped.iter().all(|s| s.nodes.is_empty()) {
            return Err(SelectError::NoneAvailable);
        }

        Ok(self.current_strategy().choose(&scoped).await)
    }

    async fn mark(&self, service: &str, node: &RegistryNode, outcome: Option<&SelectError>) {
        if let Some(err) = outcome {
            tracing::debug!(service, node = %node.id, %err, "node marked after failed use");
        }
    }

    async fn reset(&self, _service: &str) {}

    async fn close(&self) -> Result<(), SelectError> {
        Ok(())
    }

    fn describe(&self) -> &'static str {
        "default"
    }
}

/// Uniform random pick across every node of the scoped services. The
/// baseline the host gets before a better strategy is installed.
pub struct RandomStrategy;

#[async_trait]
impl Strategy for RandomStrategy {
    async fn choose(&self, services: &[Service]) -> Next {
        let nodes: Vec<&RegistryNode> = services.iter().flat_map(|s| s.nodes.iter()).collect();
        if nodes.is_empty() {
            return Next::fail(SelectError::NoneAvailable);
        }
        let picked = nodes[thread_rng().gen_range(0..nodes.len())].clone();
        Next::node(picked)
    }
}

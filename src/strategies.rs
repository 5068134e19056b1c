//! Latency-aware selection strategy.
//!
//! One round: consult the cache, sort candidates with unknowns first, spawn
//! a probe per unknown node, and race the first successful probe against a
//! deadline. Every probe outcome lands in the cache — successes as
//! known-good latencies, failures as blacklist entries — so rounds get
//! cheaper as the cache fills and a fully-known candidate set resolves with
//! no probing at all.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::cache::{sort_by_latency, LatencyCache, Node};
use crate::error::SelectError;
use crate::options::{SelectCallback, SelectOptions};
use crate::probe::{EchoProber, ProbeError, Prober};
use crate::registry::{RegistryNode, Service};
use crate::selector::{Next, Selector, SelectorOptions, Strategy};

pub struct LowLatencyStrategy {
    cache: Arc<LatencyCache>,
    prober: Arc<dyn Prober>,
    max_latency: Duration,
    on_select: Option<SelectCallback>,
}

impl LowLatencyStrategy {
    pub fn new(opts: SelectOptions) -> Self {
        let SelectOptions {
            max_latency,
            privileged,
            blacklist_ttl,
            on_select,
            prober,
        } = opts;

        LowLatencyStrategy {
            cache: Arc::new(LatencyCache::new(blacklist_ttl)),
            prober: prober.unwrap_or_else(|| Arc::new(EchoProber::new(privileged))),
            max_latency,
            on_select,
        }
    }

    async fn run_round(&self, services: &[Service]) -> Result<RegistryNode, SelectError> {
        let candidates: Vec<RegistryNode> = services
            .iter()
            .flat_map(|s| s.nodes.iter().cloned())
            .collect();

        let (mut nodes, saw_new) = self.cache.lookup(&candidates).await;
        if saw_new {
            self.cache.reconcile(&candidates).await;
        }
        if nodes.is_empty() {
            return Err(SelectError::NoneAvailable);
        }

        sort_by_latency(&mut nodes);

        // Unknowns sort first and each gets a probe. The first node with a
        // cached latency is the provisional winner: everything after it is
        // known and slower, and its latency bounds how long the round waits
        // for a probe to beat it.
        let mut winner: Option<Node> = None;
        let mut deadline = self.max_latency;
        let mut channel: Option<(mpsc::Sender<Node>, mpsc::Receiver<Node>)> = None;

        for node in &nodes {
            if !node.latency.is_zero() {
                deadline = node.latency;
                winner = Some(node.clone());
                break;
            }
            let sender = match &channel {
                Some((tx, _)) => tx.clone(),
                None => {
                    let (tx, rx) = mpsc::channel(1);
                    let sender = tx.clone();
                    channel = Some((tx, rx));
                    sender
                }
            };
            self.spawn_probe(node.clone(), sender);
        }

        let Some((tx, mut rx)) = channel else {
            // Every candidate had a cached latency; the sorted minimum wins
            // with no waiting.
            return match winner {
                Some(node) => Ok(self.finish(node)),
                None => Err(SelectError::NoneAvailable),
            };
        };
        // The round keeps no sender. Once every probe task is done the
        // channel closes, so an all-failure round is detected without
        // sitting out the full deadline.
        drop(tx);

        match timeout(deadline, rx.recv()).await {
            Ok(Some(node)) => Ok(self.finish(node)),
            Ok(None) => match winner {
                Some(node) => Ok(self.finish(node)),
                None => Err(SelectError::NoneAvailable),
            },
            Err(_) => match winner {
                Some(node) => Ok(self.finish(node)),
                None => Err(SelectError::ProbeTimeout(deadline)),
            },
        }
    }

    /// Probe tasks are fire-and-forget: they outlive the round that spawned
    /// them, always write their outcome to the cache, and only
    /// conditionally deliver to the round's single result slot.
    fn spawn_probe(&self, node: Node, results: mpsc::Sender<Node>) {
        let prober = Arc::clone(&self.prober);
        let cache = Arc::clone(&self.cache);
        let ceiling = self.max_latency;

        tokio::spawn(async move {
            let registry_node = node.registry_node();
            let outcome = match prober.probe(&registry_node).await {
                Ok(rtt) if rtt > ceiling => Err(ProbeError::OverCeiling { rtt, ceiling }),
                other => other,
            };
            match outcome {
                Ok(rtt) => {
                    let probed = Node {
                        latency: rtt,
                        ..node
                    };
                    cache.record(probed.clone(), false).await;
                    // A full slot or a finished round drops the result; the
                    // cache write above already happened either way.
                    let _ = results.try_send(probed);
                }
                Err(err) => {
                    warn!(node = %node.id, address = %node.address, %err, "probe failed, blacklisting");
                    cache.record(node, true).await;
                }
            }
        });
    }

    fn finish(&self, node: Node) -> RegistryNode {
        debug!(node = %node.id, address = %node.address, latency = ?node.latency, "round settled");
        if let Some(callback) = &self.on_select {
            callback(&node.address);
        }
        node.registry_node()
    }
}

#[async_trait]
impl Strategy for LowLatencyStrategy {
    async fn choose(&self, services: &[Service]) -> Next {
        match self.run_round(services).await {
            Ok(node) => Next::node(node),
            Err(err) => Next::fail(err),
        }
    }
}

/// Selector wrapper that owns nothing but the strategy.
///
/// Every lifecycle call is forwarded to the wrapped selector; `init` is the
/// one place this type interferes, pinning the low-latency strategy into
/// the options before they reach the inner selector.
pub struct LowLatencySelector {
    inner: Arc<dyn Selector>,
    strategy: Arc<LowLatencyStrategy>,
}

impl LowLatencySelector {
    pub fn new(inner: Arc<dyn Selector>, opts: SelectOptions) -> Self {
        LowLatencySelector {
            inner,
            strategy: Arc::new(LowLatencyStrategy::new(opts)),
        }
    }
}

#[async_trait]
impl Selector for LowLatencySelector {
    fn init(&self, mut opts: SelectorOptions) -> Result<(), SelectError> {
        opts.strategy = Some(self.strategy.clone() as Arc<dyn Strategy>);
        self.inner.init(opts)
    }

    async fn select(&self, service: &str) -> Result<Next, SelectError> {
        self.inner.select(service).await
    }

    async fn mark(&self, service: &str, node: &RegistryNode, outcome: Option<&SelectError>) {
        self.inner.mark(service, node, outcome).await;
    }

    async fn reset(&self, _service: &str) {}

    async fn close(&self) -> Result<(), SelectError> {
        self.inner.close().await
    }

    fn describe(&self) -> &'static str {
        self.inner.describe()
    }
}

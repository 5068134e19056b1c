//! Last-known latency bookkeeping for candidate nodes.
//!
//! Two mappings live behind one lock: known-good nodes with their last
//! measured round trip, and the blacklist of nodes that failed a probe or
//! came back over the ceiling. An id is in at most one of the two at any
//! time. Blacklist entries optionally age out so a node gets another chance
//! without waiting for the registry to drop and re-add it.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use tokio::sync::RwLock;

use crate::registry::RegistryNode;

/// One candidate as the cache tracks it. A latency of zero means the node
/// has never been probed, not that it is infinitely fast.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub id: String,
    pub address: String,
    pub latency: Duration,
}

impl Node {
    pub fn unprobed(candidate: &RegistryNode) -> Self {
        Node {
            id: candidate.id.clone(),
            address: candidate.address.clone(),
            latency: Duration::ZERO,
        }
    }

    pub fn registry_node(&self) -> RegistryNode {
        RegistryNode {
            id: self.id.clone(),
            address: self.address.clone(),
        }
    }
}

/// Ascending latency, unprobed nodes first. Zero encodes "no information
/// yet", and a node without information must be visited before trusting an
/// older cached value.
pub fn sort_by_latency(nodes: &mut [Node]) {
    nodes.sort_by(|a, b| a.latency.cmp(&b.latency));
}

#[derive(Debug)]
struct BlacklistEntry {
    node: Node,
    since: Instant,
}

#[derive(Debug, Default)]
struct CacheInner {
    known: HashMap<String, Node>,
    blacklist: HashMap<String, BlacklistEntry>,
}

#[derive(Debug)]
pub struct LatencyCache {
    inner: RwLock<CacheInner>,
    blacklist_ttl: Option<Duration>,
}

impl LatencyCache {
    /// `blacklist_ttl` of `None` keeps blacklisted nodes excluded for the
    /// process lifetime; with a TTL they become eligible for re-probing
    /// once the entry has aged past it.
    pub fn new(blacklist_ttl: Option<Duration>) -> Self {
        LatencyCache {
            inner: RwLock::new(CacheInner::default()),
            blacklist_ttl,
        }
    }

    /// Resolves `candidates` against the cache. Blacklisted ids are
    /// skipped, cached nodes come back with their last latency, unseen ids
    /// come back unprobed. The flag reports whether any unseen id was met.
    pub async fn lookup(&self, candidates: &[RegistryNode]) -> (Vec<Node>, bool) {
        self.evict_expired().await;

        let inner = self.inner.read().await;
        let mut nodes = Vec::with_capacity(candidates.len());
        let mut saw_new = false;
        for candidate in candidates {
            if inner.blacklist.contains_key(&candidate.id) {
                continue;
            }
            match inner.known.get(&candidate.id) {
                Some(node) => nodes.push(node.clone()),
                None => {
                    saw_new = true;
                    nodes.push(Node::unprobed(candidate));
                }
            }
        }
        (nodes, saw_new)
    }

    /// Drops known-good entries whose id is absent from `candidates`.
    /// After a topology change a stale latency would outrank nodes that
    /// still need probing, so membership mismatches clear the stale side.
    pub async fn reconcile(&self, candidates: &[RegistryNode]) {
        let live: HashSet<&str> = candidates.iter().map(|c| c.id.as_str()).collect();
        let mut inner = self.inner.write().await;
        let before = inner.known.len();
        inner.known.retain(|id, _| live.contains(id.as_str()));
        let dropped = before - inner.known.len();
        if dropped > 0 {
            tracing::debug!(dropped, "reconciled latency cache against new candidate set");
        }
    }

    /// Records one probe outcome. The id ends up in exactly one of the two
    /// maps; concurrent probe tasks serialize on the write lock.
    pub async fn record(&self, node: Node, blacklist: bool) {
        let mut inner = self.inner.write().await;
        if blacklist {
            inner.known.remove(&node.id);
            inner.blacklist.insert(
                node.id.clone(),
                BlacklistEntry {
                    node,
                    since: Instant::now(),
                },
            );
        } else {
            inner.blacklist.remove(&node.id);
            inner.known.insert(node.id.clone(), node);
        }
    }

    pub async fn known_latency(&self, id: &str) -> Option<Duration> {
        self.inner.read().await.known.get(id).map(|n| n.latency)
    }

    pub async fn is_blacklisted(&self, id: &str) -> bool {
        self.inner.read().await.blacklist.contains_key(id)
    }

    async fn evict_expired(&self) {
        let Some(ttl) = self.blacklist_ttl else {
            return;
        };
        let expired = {
            let inner = self.inner.read().await;
            inner.blacklist.values().any(|e| e.since.elapsed() >= ttl)
        };
        if !expired {
            return;
        }
        let mut inner = self.inner.write().await;
        inner.blacklist.retain(|id, entry| {
            let keep = entry.since.elapsed() < ttl;
            if !keep {
                tracing::debug!(node = %id, address = %entry.node.address, "blacklist entry expired");
            }
            keep
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::RegistryNode;

    fn candidates(ids: &[&str]) -> Vec<RegistryNode> {
        ids.iter()
            .map(|id| RegistryNode::new(*id, format!("{id}.example:8080")))
            .collect()
    }

    #[tokio::test]
    async fn lookup_reports_unseen_ids_as_unprobed() {
        let cache = LatencyCache::new(None);
        let (nodes, saw_new) = cache.lookup(&candidates(&["a", "b"])).await;

        assert!(saw_new);
        assert_eq!(nodes.len(), 2);
        assert!(nodes.iter().all(|n| n.latency.is_zero()));
    }

    #[tokio::test]
    async fn lookup_returns_cached_latency_and_skips_blacklist() {
        let cache = LatencyCache::new(None);
        let cands = candidates(&["a", "b", "c"]);

        let mut probed = Node::unprobed(&cands[0]);
        probed.latency = Duration::from_millis(5);
        cache.record(probed, false).await;
        cache.record(Node::unprobed(&cands[1]), true).await;

        let (nodes, saw_new) = cache.lookup(&cands).await;
        assert!(saw_new); // "c" is unseen
        assert_eq!(nodes.len(), 2);
        assert_eq!(nodes[0].id, "a");
        assert_eq!(nodes[0].latency, Duration::from_millis(5));
        assert_eq!(nodes[1].id, "c");
    }

    #[tokio::test]
    async fn record_moves_an_id_between_maps() {
        let cache = LatencyCache::new(None);
        let cands = candidates(&["a"]);

        let mut node = Node::unprobed(&cands[0]);
        node.latency = Duration::from_millis(3);
        cache.record(node.clone(), false).await;
        assert_eq!(cache.known_latency("a").await, Some(Duration::from_millis(3)));
        assert!(!cache.is_blacklisted("a").await);

        cache.record(node.clone(), true).await;
        assert_eq!(cache.known_latency("a").await, None);
        assert!(cache.is_blacklisted("a").await);

        cache.record(node, false).await;
        assert!(!cache.is_blacklisted("a").await);
        assert_eq!(cache.known_latency("a").await, Some(Duration::from_millis(3)));
    }

    #[tokio::test]
    async fn reconcile_purges_ids_missing_from_candidates() {
        let cache = LatencyCache::new(None);
        let old = candidates(&["a", "b"]);
        for candidate in &old {
            let mut node = Node::unprobed(candidate);
            node.latency = Duration::from_millis(1);
            cache.record(node, false).await;
        }

        let new = candidates(&["b", "c"]);
        cache.reconcile(&new).await;

        assert_eq!(cache.known_latency("a").await, None);
        assert_eq!(cache.known_latency("b").await, Some(Duration::from_millis(1)));
    }

    #[tokio::test]
    async fn blacklist_ttl_readmits_expired_entries() {
        let cache = LatencyCache::new(Some(Duration::from_millis(20)));
        let cands = candidates(&["a"]);
        cache.record(Node::unprobed(&cands[0]), true).await;

        let (nodes, _) = cache.lookup(&cands).await;
        assert!(nodes.is_empty());

        tokio::time::sleep(Duration::from_millis(40)).await;

        let (nodes, saw_new) = cache.lookup(&cands).await;
        assert_eq!(nodes.len(), 1);
        assert!(saw_new);
        assert!(!cache.is_blacklisted("a").await);
    }

    #[tokio::test]
    async fn permanent_blacklist_never_expires() {
        let cache = LatencyCache::new(None);
        let cands = candidates(&["a"]);
        cache.record(Node::unprobed(&cands[0]), true).await;

        tokio::time::sleep(Duration::from_millis(30)).await;

        let (nodes, _) = cache.lookup(&cands).await;
        assert!(nodes.is_empty());
    }

    #[test]
    fn unprobed_nodes_sort_first() {
        let mut nodes = vec![
            Node {
                id: "slow".into(),
                address: "slow:1".into(),
                latency: Duration::from_millis(80),
            },
            Node {
                id: "new".into(),
                address: "new:1".into(),
                latency: Duration::ZERO,
            },
            Node {
                id: "fast".into(),
                address: "fast:1".into(),
                latency: Duration::from_millis(2),
            },
        ];

        sort_by_latency(&mut nodes);

        let order: Vec<&str> = nodes.iter().map(|n| n.id.as_str()).collect();
        assert_eq!(order, vec!["new", "fast", "slow"]);
    }
}

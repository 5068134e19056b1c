//! Tunables for the low-latency selector and the client-option factory.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::probe::Prober;
use crate::registry::Service;
use crate::selector::{DefaultSelector, Selector, SelectorOptions};
use crate::snapshot::SnapshotCell;
use crate::strategies::LowLatencySelector;

/// Default ceiling on acceptable round-trip latency.
pub const DEFAULT_MAX_LATENCY: Duration = Duration::from_secs(1);

/// Invoked with the address of every node a round settles on.
pub type SelectCallback = Arc<dyn Fn(&str) + Send + Sync>;

#[derive(Clone)]
pub struct SelectOptions {
    /// Probes slower than this are failures; also the race deadline when no
    /// cached latency bounds the round tighter.
    pub max_latency: Duration,

    /// Whether probes may use the ICMP echo path. Off, latency is measured
    /// with a plain TCP connect.
    pub privileged: bool,

    /// How long a blacklisted node stays excluded. `None` means for the
    /// process lifetime.
    pub blacklist_ttl: Option<Duration>,

    pub on_select: Option<SelectCallback>,

    /// Probe transport override; tests script rounds through this.
    pub prober: Option<Arc<dyn Prober>>,
}

impl Default for SelectOptions {
    fn default() -> Self {
        SelectOptions {
            max_latency: DEFAULT_MAX_LATENCY,
            privileged: false,
            blacklist_ttl: None,
            on_select: None,
            prober: None,
        }
    }
}

impl SelectOptions {
    pub fn max_latency(mut self, ceiling: Duration) -> Self {
        self.max_latency = ceiling;
        self
    }

    pub fn privileged(mut self, privileged: bool) -> Self {
        self.privileged = privileged;
        self
    }

    pub fn blacklist_ttl(mut self, ttl: Duration) -> Self {
        self.blacklist_ttl = Some(ttl);
        self
    }

    pub fn on_select(mut self, callback: impl Fn(&str) + Send + Sync + 'static) -> Self {
        self.on_select = Some(Arc::new(callback));
        self
    }

    pub fn prober(mut self, prober: Arc<dyn Prober>) -> Self {
        self.prober = Some(prober);
        self
    }
}

impl fmt::Debug for SelectOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelectOptions")
            .field("max_latency", &self.max_latency)
            .field("privileged", &self.privileged)
            .field("blacklist_ttl", &self.blacklist_ttl)
            .field("on_select", &self.on_select.is_some())
            .field("prober", &self.prober.is_some())
            .finish()
    }
}

/// The slice of the host client's option set this crate participates in.
pub struct ClientOptions {
    pub selector: Option<Arc<dyn Selector>>,
}

pub type ClientOption = Box<dyn FnOnce(&mut ClientOptions) + Send>;

/// Builds the client option that swaps the client's selector for a
/// low-latency one.
///
/// The client's current selector — or a fresh default one reading
/// `services` — keeps handling the whole lifecycle; only the strategy is
/// replaced, and the wrapped selector is re-initialized with it wired in.
pub fn low_latency(
    opts: SelectOptions,
    services: Arc<SnapshotCell<Vec<Service>>>,
) -> ClientOption {
    Box::new(move |client: &mut ClientOptions| {
        let inner: Arc<dyn Selector> = match client.selector.take() {
            Some(existing) => existing,
            None => Arc::new(DefaultSelector::new(services)),
        };

        let selector = Arc::new(LowLatencySelector::new(inner, opts));
        if let Err(err) = selector.init(SelectorOptions::default()) {
            tracing::warn!(%err, "low-latency selector init failed");
        }
        client.selector = Some(selector);
    })
}

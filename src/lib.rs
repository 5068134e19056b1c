//! Latency-aware node selection for RPC clients.
//!
//! Given the registry's current view of a service and its instances, pick
//! the instance with the lowest observed network latency. Nodes the crate
//! has never measured are probed concurrently, the first usable answer (or
//! the best cached one) wins the round, and everything learned — good
//! latencies and dead or too-slow nodes alike — is cached so later rounds
//! resolve without touching the network.
//!
//! ```no_run
//! use std::sync::Arc;
//! use latency_selector::{
//!     low_latency, ClientOptions, SelectOptions, Selector, Service, SnapshotCell,
//! };
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! // The host keeps this snapshot fresh from its registry.
//! let services: Arc<SnapshotCell<Vec<Service>>> = Arc::new(SnapshotCell::new(Vec::new()));
//!
//! let mut client = ClientOptions { selector: None };
//! low_latency(SelectOptions::default(), services)(&mut client);
//!
//! let selector = client.selector.expect("selector installed");
//! let node = selector.select("greeter").await?.resolve()?;
//! println!("dispatching to {}", node.address);
//! # Ok(())
//! # }
//! ```

pub mod cache;
pub mod config;
pub mod error;
pub mod options;
pub mod probe;
pub mod registry;
pub mod selector;
pub mod snapshot;
pub mod strategies;

pub use config::Config;
pub use error::SelectError;
pub use options::{low_latency, ClientOption, ClientOptions, SelectOptions, DEFAULT_MAX_LATENCY};
pub use registry::{RegistryNode, Service};
pub use selector::{DefaultSelector, Next, Selector, SelectorOptions, Strategy};
pub use snapshot::SnapshotCell;
pub use strategies::{LowLatencySelector, LowLatencyStrategy};

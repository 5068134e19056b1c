//! Shared, replace-on-write snapshot storage.
//!
//! Registry snapshots are read on every selection round but replaced only
//! when the host refreshes its view of the mesh. `SnapshotCell` keeps the
//! readers cheap: a read borrows the current `Arc`, a write swaps in a whole
//! new value. Readers never observe a half-updated snapshot.

use std::sync::Arc;
use tokio::sync::watch;

pub struct SnapshotCell<T> {
    tx: watch::Sender<Arc<T>>,
    rx: watch::Receiver<Arc<T>>,
}

impl<T> SnapshotCell<T>
where
    T: Clone,
{
    pub fn new(initial_value: T) -> Self {
        let (tx, rx) = watch::channel(Arc::new(initial_value));
        Self { tx, rx }
    }

    /// Replaces the current snapshot. Readers holding the previous `Arc`
    /// keep a consistent view until they drop it.
    pub fn publish(&self, new_value: T) {
        self.tx.send(Arc::new(new_value)).ok();
    }

    pub fn latest(&self) -> Arc<T> {
        self.rx.borrow().clone()
    }

    /// Clone-mutate-publish convenience for hosts that patch the snapshot
    /// in place (tests do this a lot).
    pub fn update(&self, mutate: impl FnOnce(&mut T)) {
        let mut value = self.latest().as_ref().clone();
        mutate(&mut value);
        self.publish(value);
    }

    /// A receiver for callers that want to be woken on new snapshots.
    pub fn subscribe(&self) -> watch::Receiver<Arc<T>> {
        self.rx.clone()
    }
}

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::MissedTickBehavior;

use crate::fleet::FleetStore;
use crate::messages::Snapshot;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

impl std::fmt::Display for ObserverId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "observer-{}", self.0)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("observer buffer is full")]
    Lagging,
    #[error("observer channel is closed")]
    Closed,
}

impl<T> From<TrySendError<T>> for DeliveryError {
    fn from(err: TrySendError<T>) -> Self {
        match err {
            TrySendError::Full(_) => DeliveryError::Lagging,
            TrySendError::Closed(_) => DeliveryError::Closed,
        }
    }
}

#[derive(Debug, Clone)]
pub struct BroadcastConfig {
    pub tick_interval: Duration,
    /// Snapshots an observer may have queued before it counts as too slow
    /// and gets detached.
    pub observer_buffer: usize,
}

impl Default for BroadcastConfig {
    fn default() -> Self {
        BroadcastConfig {
            tick_interval: Duration::from_secs(5),
            observer_buffer: 4,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub delivered: usize,
    pub pruned: usize,
}

#[derive(Default)]
struct Observers {
    next_id: u64,
    senders: HashMap<ObserverId, mpsc::Sender<Snapshot>>,
}

type Registry = Mutex<Observers>;

/// Drives the tick cadence and fans each fleet snapshot out to every attached
/// observer.
pub struct Broadcaster {
    store: Arc<FleetStore>,
    registry: Arc<Registry>,
    config: BroadcastConfig,
}

impl Broadcaster {
    pub fn new(store: Arc<FleetStore>, config: BroadcastConfig) -> Self {
        Broadcaster {
            store,
            registry: Arc::new(Registry::default()),
            config,
        }
    }

    pub fn store(&self) -> &Arc<FleetStore> {
        &self.store
    }

    pub fn attach(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.config.observer_buffer.max(1));

        let mut observers = self.registry.lock();
        let id = ObserverId(observers.next_id);
        observers.next_id += 1;
        observers.senders.insert(id, tx);
        drop(observers);

        debug!("Attached {}", id);

        Subscription {
            id,
            rx,
            registry: self.registry.clone(),
            detached: false,
        }
    }

    /// Returns whether the observer was still attached. Detaching twice is a
    /// no-op.
    pub fn detach(&self, id: ObserverId) -> bool {
        let removed = self.registry.lock().senders.remove(&id).is_some();
        if removed {
            debug!("Detached {}", id);
        }
        removed
    }

    pub fn observer_count(&self) -> usize {
        self.registry.lock().senders.len()
    }

    /// Advances the fleet one step and delivers the result to every observer.
    ///
    /// The registry stays locked from the advance through the fan-out, so
    /// concurrent callers deliver whole ticks in the order they were produced.
    /// Delivery never waits on an observer: a full buffer or a closed channel
    /// detaches that observer within the same pass.
    pub fn tick(&self) -> TickReport {
        let mut observers = self.registry.lock();
        let snapshot = self.store.advance_tick();

        let attached = observers.senders.len();
        observers.senders.retain(|id, tx| match tx.try_send(snapshot.clone()) {
            Ok(()) => true,
            Err(err) => {
                let err = DeliveryError::from(err);
                match err {
                    DeliveryError::Lagging => {
                        warn!("Detaching {} at tick {}: {}", id, snapshot.tick, err)
                    }
                    DeliveryError::Closed => {
                        debug!("Detaching {} at tick {}: {}", id, snapshot.tick, err)
                    }
                }
                false
            }
        });

        TickReport {
            tick: snapshot.tick,
            delivered: observers.senders.len(),
            pruned: attached - observers.senders.len(),
        }
    }

    /// Runs the tick loop for the lifetime of the process.
    pub async fn run(self: Arc<Self>) {
        self.run_with(Broadcaster::tick).await
    }

    async fn run_with<F>(self: Arc<Self>, mut body: F)
    where
        F: FnMut(&Broadcaster) -> TickReport + Send,
    {
        info!(
            "Broadcasting {} devices every {:?}",
            self.store.len(),
            self.config.tick_interval
        );

        let mut interval = tokio::time::interval(self.config.tick_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately; observers get the seeded state
        // from the snapshot query, so skip it.
        interval.tick().await;

        loop {
            interval.tick().await;
            self.guarded(|| body(&*self));
        }
    }

    /// Runs one tick body, logging a panic instead of unwinding out of the
    /// loop. Returns `None` if the body panicked.
    fn guarded(&self, body: impl FnOnce() -> TickReport) -> Option<TickReport> {
        match std::panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(report) => {
                debug!(
                    "Tick {} delivered to {} observers ({} detached)",
                    report.tick, report.delivered, report.pruned
                );
                Some(report)
            }
            Err(panic) => {
                let reason = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                error!(
                    "Tick failed, last published tick {} (observers: {}): {}; continuing",
                    self.store.snapshot().tick,
                    self.observer_count(),
                    reason
                );
                None
            }
        }
    }
}

/// The receiving end of one attached observer.
///
/// Dropping the subscription detaches it.
pub struct Subscription {
    id: ObserverId,
    rx: mpsc::Receiver<Snapshot>,
    registry: Arc<Registry>,
    detached: bool,
}

impl Subscription {
    pub fn id(&self) -> ObserverId {
        self.id
    }

    /// Waits for the next snapshot. Returns `None` once detached, whether by
    /// [`Subscription::detach`], [`Broadcaster::detach`] or a failed delivery.
    pub async fn recv(&mut self) -> Option<Snapshot> {
        if self.detached {
            return None;
        }
        let snapshot = self.rx.recv().await;
        if snapshot.is_some() && !self.registry.lock().senders.contains_key(&self.id) {
            // Detached elsewhere while this was still queued.
            self.detach();
            return None;
        }
        snapshot
    }

    /// Detaches and discards anything already queued, so nothing is observed
    /// after this returns.
    pub fn detach(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        if self.registry.lock().senders.remove(&self.id).is_some() {
            debug!("Detached {}", self.id);
        }
        self.rx.close();
        while self.rx.try_recv().is_ok() {}
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

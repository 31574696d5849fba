//! The connectivity monitor.

use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bulwark_errors::ConnectivityStatus;
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::error::{NetworkError, Result};
use crate::persist::{JsonFileQueueStore, QueueSnapshot, QueueStore};
use crate::probe::{start_probe_task, HealthProbe, HttpHealthProbe, ProbeHandle};
use crate::queue::{OperationQueue, QueuedOperation};
use crate::state::{ConnectivityState, NetworkEvent};

/// Replays queued operations once connectivity returns.
pub trait OperationExecutor: Send + Sync + std::fmt::Debug {
    /// Executes one operation. An `Err` carries the failure reason.
    fn execute<'a>(
        &'a self,
        operation: &'a QueuedOperation,
    ) -> Pin<Box<dyn Future<Output = std::result::Result<(), String>> + Send + 'a>>;
}

/// Lets retry and recovery code wait for the network instead of sleeping.
pub trait ConnectionWaiter: Send + Sync + std::fmt::Debug {
    /// Whether the network is currently up.
    fn is_connected(&self) -> bool;

    /// Resolves once the network is up, or fails after `timeout`.
    fn wait_until_online(
        &self,
        timeout: Option<Duration>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

type Listener = Arc<dyn Fn(&NetworkEvent) + Send + Sync>;
type ListenerMap = RwLock<HashMap<u64, Listener>>;

/// Keeps a listener registered. Dropping it unsubscribes.
#[must_use = "dropping the subscription unsubscribes the listener"]
pub struct Subscription {
    id: u64,
    listeners: Weak<ListenerMap>,
}

impl Subscription {
    /// The subscription handle.
    #[must_use]
    pub const fn id(&self) -> u64 {
        self.id
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.write().remove(&self.id);
        }
    }
}

/// Outcome of one drain pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Operations that completed.
    pub completed: usize,
    /// Operations that failed and were re-queued.
    pub requeued: usize,
    /// Operations that failed for the last time and were dropped.
    pub dropped: usize,
    /// Operations left in the queue after the pass.
    pub remaining: usize,
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

/// Tracks online/offline state and replays deferred work.
pub struct NetworkMonitor {
    config: NetworkConfig,
    state: RwLock<ConnectivityState>,
    online_tx: watch::Sender<bool>,
    listeners: Arc<ListenerMap>,
    next_listener_id: AtomicU64,
    queue: Mutex<OperationQueue>,
    draining: AtomicBool,
    executor: Option<Arc<dyn OperationExecutor>>,
    probe: Option<Arc<dyn HealthProbe>>,
    store: Option<Arc<dyn QueueStore>>,
}

impl std::fmt::Debug for NetworkMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NetworkMonitor")
            .field("state", &*self.state.read())
            .field("queued", &self.queue.lock().len())
            .field("listeners", &self.listeners.read().len())
            .finish_non_exhaustive()
    }
}

impl NetworkMonitor {
    /// Creates a monitor with no probe, executor or store attached.
    pub fn new(config: NetworkConfig) -> Result<Self> {
        config.validate()?;

        let online = config.initially_online;
        let (online_tx, _) = watch::channel(online);
        Ok(Self {
            state: RwLock::new(ConnectivityState::new(online)),
            online_tx,
            listeners: Arc::new(RwLock::new(HashMap::new())),
            next_listener_id: AtomicU64::new(1),
            queue: Mutex::new(OperationQueue::new(config.max_queue_size)),
            draining: AtomicBool::new(false),
            executor: None,
            probe: None,
            store: None,
            config,
        })
    }

    /// Creates a monitor and attaches the HTTP probe and the JSON queue
    /// store named in the configuration.
    pub fn from_config(config: NetworkConfig) -> Result<Self> {
        let probe = match &config.health_url {
            Some(url) => Some(HttpHealthProbe::new(url.clone(), config.probe_timeout()).map_err(
                |e| NetworkError::InvalidConfig {
                    reason: format!("cannot build health probe: {e}"),
                },
            )?),
            None => None,
        };
        let store = config
            .queue_snapshot_path
            .clone()
            .map(JsonFileQueueStore::new);

        let mut monitor = Self::new(config)?;
        if let Some(probe) = probe {
            monitor = monitor.with_probe(Arc::new(probe));
        }
        if let Some(store) = store {
            monitor = monitor.with_store(Arc::new(store));
        }
        Ok(monitor)
    }

    /// Attaches the executor used to replay queued operations.
    #[must_use]
    pub fn with_executor(mut self, executor: Arc<dyn OperationExecutor>) -> Self {
        self.executor = Some(executor);
        self
    }

    /// Attaches a liveness probe.
    #[must_use]
    pub fn with_probe(mut self, probe: Arc<dyn HealthProbe>) -> Self {
        self.probe = Some(probe);
        self
    }

    /// Attaches a queue store.
    #[must_use]
    pub fn with_store(mut self, store: Arc<dyn QueueStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// The monitor's configuration.
    #[must_use]
    pub const fn config(&self) -> &NetworkConfig {
        &self.config
    }

    /// Whether the network is currently considered up.
    #[must_use]
    pub fn is_online(&self) -> bool {
        self.state.read().is_online
    }

    /// A snapshot of the connectivity state.
    #[must_use]
    pub fn state(&self) -> ConnectivityState {
        *self.state.read()
    }

    /// Registers a listener for network events.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&NetworkEvent) + Send + Sync + 'static,
    {
        let id = self.next_listener_id.fetch_add(1, Ordering::SeqCst);
        self.listeners.write().insert(id, Arc::new(listener));
        debug!(subscription = id, "Network listener subscribed");
        Subscription {
            id,
            listeners: Arc::downgrade(&self.listeners),
        }
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.read().len()
    }

    fn emit(&self, event: &NetworkEvent) {
        let listeners: Vec<Listener> = self.listeners.read().values().cloned().collect();
        for listener in listeners {
            listener(event);
        }
    }

    /// Records a platform connectivity signal. Coming online drains the
    /// offline queue.
    pub async fn set_online(&self, online: bool) {
        if self.transition(online) && online {
            self.process_queue().await;
        }
    }

    fn transition(&self, online: bool) -> bool {
        let now = Utc::now();
        {
            let mut state = self.state.write();
            if state.is_online == online {
                return false;
            }
            state.is_online = online;
            if online {
                state.last_online_at = Some(now);
            } else {
                state.last_offline_at = Some(now);
            }
        }

        self.online_tx.send_replace(online);
        if online {
            info!("Network connectivity restored");
            self.emit(&NetworkEvent::Online { at: now });
        } else {
            warn!("Network connectivity lost");
            self.emit(&NetworkEvent::Offline { at: now });
        }
        true
    }

    /// Runs the liveness probe once and updates the state when it disagrees.
    ///
    /// Without a probe this returns the current state unchanged.
    pub async fn check_connectivity(&self) -> bool {
        let Some(probe) = self.probe.clone() else {
            return self.is_online();
        };

        let reachable = tokio::time::timeout(self.config.probe_timeout(), probe.probe())
            .await
            .unwrap_or(false);
        self.state.write().last_probe_at = Some(Utc::now());

        if reachable != self.is_online() {
            debug!(reachable, "Probe disagrees with connectivity state");
            self.set_online(reachable).await;
        }
        reachable
    }

    /// Spawns the periodic probe task.
    pub fn start_probing(self: &Arc<Self>) -> ProbeHandle {
        info!(
            interval_ms = self.config.probe_interval_ms,
            "Starting connectivity probes"
        );
        start_probe_task(Arc::downgrade(self), self.config.probe_interval())
    }

    /// Resolves immediately when online; otherwise waits for the next online
    /// transition, failing after `timeout`.
    pub async fn wait_for_connection(&self, timeout: Option<Duration>) -> Result<()> {
        if self.is_online() {
            return Ok(());
        }

        let mut rx = self.online_tx.subscribe();
        match timeout {
            Some(limit) => match tokio::time::timeout(limit, rx.wait_for(|online| *online)).await
            {
                Ok(Ok(_)) => Ok(()),
                Ok(Err(_)) => Err(NetworkError::MonitorClosed),
                Err(_) => Err(NetworkError::ConnectionTimeout {
                    timeout_ms: limit.as_millis() as u64,
                }),
            },
            None => rx
                .wait_for(|online| *online)
                .await
                .map(|_| ())
                .map_err(|_| NetworkError::MonitorClosed),
        }
    }

    /// Defers an operation until connectivity returns.
    ///
    /// Returns the operation evicted to make room, which is the new one when
    /// it has the lowest priority in a full queue. An ID that is already
    /// queued is rejected.
    pub fn queue_operation(&self, operation: QueuedOperation) -> Result<Option<QueuedOperation>> {
        if !self.config.enable_offline_queue {
            return Err(NetworkError::QueueDisabled);
        }

        let id = operation.id.clone();
        let priority = operation.priority;
        let evicted = {
            let mut queue = self.queue.lock();
            if queue.contains(&id) {
                return Err(NetworkError::DuplicateOperation { id });
            }
            queue.push(operation)
        };

        debug!(operation_id = %id, %priority, "Operation queued");
        self.emit(&NetworkEvent::OperationQueued { id, priority });

        if let Some(evicted) = &evicted {
            warn!(
                operation_id = %evicted.id,
                priority = %evicted.priority,
                "Offline queue full, evicted operation"
            );
            self.emit(&NetworkEvent::OperationEvicted {
                id: evicted.id.clone(),
            });
        }
        Ok(evicted)
    }

    /// Removes a queued operation.
    pub fn cancel_operation(&self, id: &str) -> Option<QueuedOperation> {
        let removed = self.queue.lock().remove(id);
        if removed.is_some() {
            debug!(operation_id = %id, "Queued operation cancelled");
        }
        removed
    }

    /// Number of queued operations.
    #[must_use]
    pub fn queue_len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Queued operations in drain order.
    #[must_use]
    pub fn queued_operations(&self) -> Vec<QueuedOperation> {
        self.queue.lock().snapshot()
    }

    /// Drops every queued operation.
    pub fn clear_queue(&self) {
        self.queue.lock().clear();
    }

    /// Replays queued operations in priority order.
    ///
    /// Only one pass runs at a time; a concurrent call returns an empty
    /// report. The pass stops early if connectivity drops. Each operation
    /// is attempted at most once per pass.
    pub async fn process_queue(&self) -> DrainReport {
        if self.draining.swap(true, Ordering::SeqCst) {
            return DrainReport {
                remaining: self.queue_len(),
                ..DrainReport::default()
            };
        }
        let _guard = DrainGuard(&self.draining);

        let Some(executor) = self.executor.clone() else {
            debug!("No operation executor attached, queue left as is");
            return DrainReport {
                remaining: self.queue_len(),
                ..DrainReport::default()
            };
        };

        let mut report = DrainReport::default();
        // Failed this pass; neither they nor their dependents run again
        // until the next pass.
        let mut failed: HashSet<String> = HashSet::new();
        let mut first = true;

        while self.is_online() {
            let next = self.queue.lock().pop_ready(&failed);
            let Some(mut operation) = next else {
                break;
            };

            if !first {
                tokio::time::sleep(self.config.drain_delay()).await;
            }
            first = false;

            match executor.execute(&operation).await {
                Ok(()) => {
                    report.completed += 1;
                    debug!(operation_id = %operation.id, "Queued operation completed");
                    self.emit(&NetworkEvent::OperationCompleted { id: operation.id });
                }
                Err(reason) => {
                    failed.insert(operation.id.clone());
                    operation.retry_count += 1;
                    let dropped = operation.is_exhausted();
                    let event = NetworkEvent::OperationFailed {
                        id: operation.id.clone(),
                        retry_count: operation.retry_count,
                        dropped,
                    };

                    if dropped {
                        report.dropped += 1;
                        warn!(
                            operation_id = %operation.id,
                            kind = %operation.kind,
                            retry_count = operation.retry_count,
                            reason = %reason,
                            "Queued operation failed too many times, dropping"
                        );
                    } else {
                        report.requeued += 1;
                        debug!(
                            operation_id = %operation.id,
                            retry_count = operation.retry_count,
                            reason = %reason,
                            "Queued operation failed, re-queueing"
                        );
                        let evicted = self.queue.lock().push(operation);
                        if let Some(evicted) = evicted {
                            self.emit(&NetworkEvent::OperationEvicted { id: evicted.id });
                        }
                    }
                    self.emit(&event);
                }
            }
        }

        report.remaining = self.queue_len();
        self.emit(&NetworkEvent::QueueDrained {
            completed: report.completed,
            failed: report.requeued + report.dropped,
        });
        info!(
            completed = report.completed,
            requeued = report.requeued,
            dropped = report.dropped,
            remaining = report.remaining,
            "Offline queue drain finished"
        );
        report
    }

    /// Writes the queue to the attached store.
    pub fn persist_queue(&self) -> Result<()> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let snapshot = QueueSnapshot::new(self.queued_operations());
        store.save(&snapshot)
    }

    /// Loads queued operations from the attached store.
    ///
    /// Load failures are logged and treated as an empty snapshot. Returns
    /// the number of operations restored.
    pub fn restore_queue(&self) -> usize {
        let Some(store) = &self.store else {
            return 0;
        };

        let snapshot = match store.load() {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => return 0,
            Err(e) => {
                warn!(error = %e, "Failed to restore offline queue, starting empty");
                return 0;
            }
        };

        let mut queue = self.queue.lock();
        let mut restored = 0;
        for operation in snapshot.operations {
            if queue.contains(&operation.id) {
                continue;
            }
            if queue.push(operation).is_none() {
                restored += 1;
            }
        }
        info!(
            restored,
            saved_at = %snapshot.saved_at,
            "Restored offline queue"
        );
        restored
    }
}

impl ConnectivityStatus for NetworkMonitor {
    fn is_online(&self) -> bool {
        Self::is_online(self)
    }
}

impl ConnectionWaiter for NetworkMonitor {
    fn is_connected(&self) -> bool {
        self.is_online()
    }

    fn wait_until_online(
        &self,
        timeout: Option<Duration>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(self.wait_for_connection(timeout))
    }
}

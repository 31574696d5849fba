//! Connectivity monitoring and the offline operation queue.
//!
//! [`NetworkMonitor`] tracks whether the backend is reachable, from
//! platform signals ([`NetworkMonitor::set_online`]) and periodic liveness
//! probes. Work that cannot run while offline is deferred into a bounded
//! priority queue and replayed through an [`OperationExecutor`] when
//! connectivity returns.
//!
//! # Example
//!
//! ```rust,no_run
//! use bulwark_network::{NetworkConfig, NetworkMonitor, OperationPriority, QueuedOperation};
//!
//! # async fn run() -> bulwark_network::Result<()> {
//! let monitor = NetworkMonitor::new(NetworkConfig::default())?;
//! let _sub = monitor.subscribe(|event| println!("{event:?}"));
//!
//! monitor.set_online(false).await;
//! monitor.queue_operation(
//!     QueuedOperation::new("upload", serde_json::json!({"file": "report.csv"}))
//!         .with_priority(OperationPriority::High),
//! )?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod config;
pub mod error;
pub mod monitor;
pub mod persist;
pub mod probe;
pub mod queue;
pub mod state;

pub use config::NetworkConfig;
pub use error::{NetworkError, Result};
pub use monitor::{ConnectionWaiter, DrainReport, NetworkMonitor, OperationExecutor, Subscription};
pub use persist::{JsonFileQueueStore, QueueSnapshot, QueueStore};
pub use probe::{HealthProbe, HttpHealthProbe, ProbeHandle};
pub use queue::{OperationPriority, OperationQueue, QueuedOperation};
pub use state::{ConnectivityState, NetworkEvent};

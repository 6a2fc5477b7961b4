//! Shared-resource coordination exercises.
//!
//! Three small concurrency patterns built on `Mutex` + `Condvar` monitors:
//!
//! - [`pool`]: a counted pool of sweets that philosophers drain under one
//!   monitor, parking on a condition variable when the pool is empty.
//! - [`dining`]: philosophers that need two forks before they can eat, with
//!   layouts that deadlock, layouts that cannot, and the tools to tell them
//!   apart.
//! - [`channel`]: a fixed-capacity FIFO with blocking push/pop and a
//!   sentinel-terminated producer/consumer protocol in [`pipeline`].
//!
//! Every blocking call takes a [`Wait`] describing how long to wait and
//! which [`CancelToken`] may interrupt it.

pub mod cancel;
pub mod channel;
pub mod config;
pub mod dining;
pub mod error;
pub mod monitor;
pub mod monitor_dining;
pub mod pipeline;
pub mod pool;
pub mod report;
pub mod telemetry;

pub use cancel::CancelToken;
pub use channel::{BoundedChannel, PushError};
pub use config::ScenarioConfig;
pub use dining::{DiningReport, DiningTable, Fairness, Fork, Outcome, Strategy};
pub use error::{ConfigError, SyncError};
pub use monitor::Wait;
pub use monitor_dining::MonitorTable;
pub use pool::{ResourcePool, Termination};
pub use report::{WorkerExit, WorkerTally};

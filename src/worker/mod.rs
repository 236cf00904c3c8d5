//! Background execution: dispatch queue, worker pool, reconciliation
//! poller and the shutdown signal they share.

pub mod poller;
pub mod pool;
pub mod queue;
pub mod shutdown;

pub use poller::{ReconciliationPoller, ScanReport};
pub use pool::{JobRunner, WorkerPool};
pub use queue::{Job, JobQueue, JobReceiver, RetryScheduler};
pub use shutdown::{Shutdown, ShutdownSignal};

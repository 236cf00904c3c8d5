//! Worker Pool
//!
//! N tokio tasks draining the shared dispatch queue. A job already picked
//! up runs to completion on shutdown: a broadcast that left the process
//! cannot be recalled, so only the intake stops.

use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::queue::{Job, JobReceiver};
use super::shutdown::ShutdownSignal;
use crate::signature::SignatureOrchestrator;
use crate::transaction::TransactionOrchestrator;

/// Routes a job to its orchestrator
pub struct JobRunner {
    transactions: Arc<TransactionOrchestrator>,
    signatures: Arc<SignatureOrchestrator>,
}

impl JobRunner {
    pub fn new(
        transactions: Arc<TransactionOrchestrator>,
        signatures: Arc<SignatureOrchestrator>,
    ) -> Self {
        Self {
            transactions,
            signatures,
        }
    }

    /// Run one job; failures are logged, the record keeps its state
    pub async fn run(&self, job: Job) {
        match job {
            Job::Transaction(id) => match self.transactions.dispatch(id).await {
                Ok(status) => debug!(tx_id = %id, status = %status, "Transaction job done"),
                Err(e) => error!(tx_id = %id, error = %e, "Transaction dispatch failed"),
            },
            Job::Signature(id) => match self.signatures.dispatch(id).await {
                Ok(status) => debug!(signature_id = %id, status = %status, "Signature job done"),
                Err(e) => error!(signature_id = %id, error = %e, "Signature dispatch failed"),
            },
        }
    }
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    scheduler: Option<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `worker_count` workers sharing `receiver`, plus the retry
    /// scheduler that feeds them delayed jobs
    pub fn spawn(
        runner: Arc<JobRunner>,
        mut receiver: JobReceiver,
        worker_count: usize,
        shutdown: ShutdownSignal,
    ) -> Self {
        let scheduler = receiver
            .take_scheduler()
            .map(|scheduler| tokio::spawn(scheduler.run(shutdown.clone())));
        let receiver = Arc::new(Mutex::new(receiver));
        let worker_count = worker_count.max(1);

        let handles = (0..worker_count)
            .map(|worker_id| {
                let runner = runner.clone();
                let receiver = receiver.clone();
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    loop {
                        let job = tokio::select! {
                            _ = shutdown.triggered() => break,
                            job = async { receiver.lock().await.recv().await } => job,
                        };
                        let Some(job) = job else { break };
                        debug!(worker_id, ?job, "Picked up job");
                        runner.run(job).await;
                    }
                    debug!(worker_id, "Worker stopped");
                })
            })
            .collect();

        info!(worker_count, "Worker pool started");
        Self { handles, scheduler }
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Wait for every worker to finish its current job and exit
    pub async fn join(self) {
        if let Some(scheduler) = self.scheduler
            && let Err(e) = scheduler.await
        {
            error!(error = %e, "Retry scheduler panicked");
        }
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Worker task panicked");
            }
        }
        info!("Worker pool stopped");
    }
}

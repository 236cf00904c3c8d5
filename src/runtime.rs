//! Runtime wiring
//!
//! Builds every component once, injects the shared collaborators and owns
//! the background tasks (worker pool and reconciliation poller).

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::chain::{ChainError, ChainRegistry};
use crate::config::AppConfig;
use crate::error::CustodyError;
use crate::events::{BroadcastPublisher, EventPublisher};
use crate::service::CustodyService;
use crate::signature::SignatureOrchestrator;
use crate::signer::{self, Signer, SignerError};
use crate::store::{CustodyStore, MemoryStore, PgStore, StoreError};
use crate::transaction::TransactionOrchestrator;
use crate::vault::{VaultLocks, VaultManager};
use crate::worker::{
    JobQueue, JobReceiver, JobRunner, ReconciliationPoller, ScanReport, Shutdown, WorkerPool,
};

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("Chain adapter setup failed: {0}")]
    Chain(#[from] ChainError),

    #[error("Signer setup failed: {0}")]
    Signer(#[from] SignerError),

    #[error("Storage setup failed: {0}")]
    Store(#[from] StoreError),

    #[error("No blockchain configured under `chains`")]
    NoChains,
}

pub struct CustodyRuntime {
    service: CustodyService,
    poller: Arc<ReconciliationPoller>,
    runner: Arc<JobRunner>,
    receiver: Option<JobReceiver>,
    worker_count: usize,
    shutdown: Shutdown,
    pool: Option<WorkerPool>,
    poller_task: Option<JoinHandle<()>>,
}

impl CustodyRuntime {
    /// Wire components around explicit collaborators
    pub fn build(
        config: &AppConfig,
        store: Arc<dyn CustodyStore>,
        chains: ChainRegistry,
        signer: Arc<dyn Signer>,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        let chains = Arc::new(chains);
        let call_timeout = config.orchestrator.call_timeout();
        let (queue, receiver) = JobQueue::bounded(config.workers.queue_capacity);

        let vaults = Arc::new(VaultManager::new(
            store.clone(),
            chains.clone(),
            Arc::new(VaultLocks::new()),
            call_timeout,
        ));
        let transactions = Arc::new(TransactionOrchestrator::new(
            store.clone(),
            chains,
            vaults.clone(),
            signer.clone(),
            events.clone(),
            queue.clone(),
            &config.orchestrator,
        ));
        let signatures = Arc::new(SignatureOrchestrator::new(
            store.clone(),
            vaults.clone(),
            signer,
            events,
            queue.clone(),
            call_timeout,
            Duration::from_secs(config.signature.default_ttl_secs),
        ));
        let poller = Arc::new(ReconciliationPoller::new(
            store,
            transactions.clone(),
            signatures.clone(),
            queue,
            config.poller.clone(),
        ));

        Self {
            service: CustodyService::new(vaults, transactions.clone(), signatures.clone()),
            poller,
            runner: Arc::new(JobRunner::new(transactions, signatures)),
            receiver: Some(receiver),
            worker_count: config.workers.worker_count,
            shutdown: Shutdown::new(),
            pool: None,
            poller_task: None,
        }
    }

    /// Build collaborators from configuration: PostgreSQL when
    /// `storage.postgres_url` is set, in-memory otherwise
    pub async fn from_config(config: &AppConfig) -> Result<Self, StartupError> {
        let store: Arc<dyn CustodyStore> = match &config.storage.postgres_url {
            Some(url) => {
                let store = PgStore::connect(url, config.storage.max_connections).await?;
                info!("Connected to PostgreSQL");
                Arc::new(store)
            }
            None => {
                warn!("No storage.postgres_url configured, records will not survive a restart");
                Arc::new(MemoryStore::new())
            }
        };

        let chains = ChainRegistry::from_config(&config.chains)?;
        if chains.supported().is_empty() {
            return Err(StartupError::NoChains);
        }
        let signer = signer::from_config(&config.signer)?;
        info!(key_id = signer.key_id(), "Signer ready");

        Ok(Self::build(
            config,
            store,
            chains,
            signer,
            Arc::new(BroadcastPublisher::default()),
        ))
    }

    pub fn service(&self) -> &CustodyService {
        &self.service
    }

    pub fn poller(&self) -> &Arc<ReconciliationPoller> {
        &self.poller
    }

    pub fn shutdown_handle(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Crash recovery pass; run before `start`
    pub async fn recover(&self) -> Result<ScanReport, CustodyError> {
        self.poller.recover().await
    }

    /// Spawn workers and the poller. Calling twice is a no-op.
    pub fn start(&mut self) {
        let Some(receiver) = self.receiver.take() else {
            warn!("Runtime already started");
            return;
        };

        self.pool = Some(WorkerPool::spawn(
            self.runner.clone(),
            receiver,
            self.worker_count,
            self.shutdown.subscribe(),
        ));

        let poller = self.poller.clone();
        let signal = self.shutdown.subscribe();
        self.poller_task = Some(tokio::spawn(async move { poller.run(signal).await }));
        info!("Custody runtime started");
    }

    /// Stop intake, let in-flight jobs finish, wait for background tasks
    pub async fn shutdown(mut self) {
        self.shutdown.trigger();
        if let Some(pool) = self.pool.take() {
            pool.join().await;
        }
        if let Some(task) = self.poller_task.take()
            && let Err(e) = task.await
        {
            error!(error = %e, "Poller task panicked");
        }
        info!("Custody runtime stopped");
    }
}

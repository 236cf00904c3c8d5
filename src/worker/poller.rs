//! Reconciliation Poller
//!
//! Periodically re-reads in-flight records against their external system
//! and advances them. Races with live dispatches are settled by the
//! store's CAS, so the poller never needs a lock of its own.
//!
//! Each tick:
//! 1. expire overdue signature requests
//! 2. reconcile `Submitted` transactions against their receipts
//! 3. resolve stale `Submitting` transactions (unknown outcome)
//! 4. re-enqueue due `Pending` transactions and `Pending` signature
//!    requests the queue may have lost

use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::queue::{Job, JobQueue};
use super::shutdown::ShutdownSignal;
use crate::config::PollerConfig;
use crate::error::CustodyError;
use crate::signature::{SignatureOrchestrator, SignatureStatus};
use crate::store::{CustodyStore, ScanCursor};
use crate::transaction::{TransactionOrchestrator, TransactionStatus};

/// Counters of one scan
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub expired: usize,
    pub reconciled: usize,
    pub resolved: usize,
    pub requeued: usize,
    /// Records whose status changed during the scan
    pub advanced: usize,
    pub errors: usize,
}

impl ScanReport {
    pub fn is_idle(&self) -> bool {
        self.expired + self.reconciled + self.resolved + self.requeued == 0
    }
}

/// Cutoffs for one scan; records written after a cutoff are left alone
#[derive(Debug, Clone, Copy)]
struct Cutoffs {
    submitting: DateTime<Utc>,
    pending: DateTime<Utc>,
}

pub struct ReconciliationPoller {
    store: Arc<dyn CustodyStore>,
    transactions: Arc<TransactionOrchestrator>,
    signatures: Arc<SignatureOrchestrator>,
    queue: JobQueue,
    config: PollerConfig,
}

impl ReconciliationPoller {
    pub fn new(
        store: Arc<dyn CustodyStore>,
        transactions: Arc<TransactionOrchestrator>,
        signatures: Arc<SignatureOrchestrator>,
        queue: JobQueue,
        config: PollerConfig,
    ) -> Self {
        Self {
            store,
            transactions,
            signatures,
            queue,
            config,
        }
    }

    /// Tick until shutdown
    pub async fn run(&self, mut shutdown: ShutdownSignal) {
        let interval = Duration::from_millis(self.config.interval_ms.max(1));
        info!(
            interval_ms = self.config.interval_ms,
            stale_submitting_secs = self.config.stale_submitting_secs,
            batch_size = self.config.batch_size,
            "Reconciliation poller started"
        );

        loop {
            tokio::select! {
                _ = shutdown.triggered() => break,
                _ = tokio::time::sleep(interval) => {}
            }
            match self.scan_once().await {
                Ok(report) if report.is_idle() => debug!("Nothing to reconcile"),
                Ok(report) => info!(?report, "Reconciliation scan finished"),
                Err(e) => error!(error = %e, "Reconciliation scan failed"),
            }
        }
        info!("Reconciliation poller stopped");
    }

    /// One regular pass
    pub async fn scan_once(&self) -> Result<ScanReport, CustodyError> {
        let now = Utc::now();
        let cutoffs = Cutoffs {
            submitting: now - secs(self.config.stale_submitting_secs),
            pending: now - secs(self.config.stale_pending_secs),
        };
        self.scan(now, cutoffs).await
    }

    /// Startup pass after a crash or restart.
    ///
    /// Nothing is in flight yet, so every `Submitting` transaction has an
    /// unknown outcome and every `Signing` request was interrupted.
    pub async fn recover(&self) -> Result<ScanReport, CustodyError> {
        let now = Utc::now();
        let mut report = ScanReport::default();

        let batch = self.config.batch_size.max(1);
        let mut cursor = None;
        loop {
            let page = self
                .store
                .find_signatures(SignatureStatus::Signing, now, cursor, batch)
                .await?;
            let Some(last) = page.last() else { break };
            cursor = Some(ScanCursor::after_signature(last));
            let full = page.len() == batch;

            for req in page {
                match self.signatures.recover_interrupted(req).await {
                    Ok(_) => report.advanced += 1,
                    Err(e) => {
                        warn!(error = %e, "Failed to recover interrupted signing");
                        report.errors += 1;
                    }
                }
            }
            if !full {
                break;
            }
        }

        let scanned = self
            .scan(
                now,
                Cutoffs {
                    submitting: now,
                    pending: now,
                },
            )
            .await?;
        report.expired += scanned.expired;
        report.reconciled += scanned.reconciled;
        report.resolved += scanned.resolved;
        report.requeued += scanned.requeued;
        report.advanced += scanned.advanced;
        report.errors += scanned.errors;

        info!(?report, "Recovery pass finished");
        Ok(report)
    }

    /// Every candidate is visited once per scan. Pages of `batch_size` are
    /// walked with a keyset cursor, so records a visit leaves untouched
    /// (receipt not yet visible, lookup failed) cannot starve newer ones.
    async fn scan(&self, now: DateTime<Utc>, cutoffs: Cutoffs) -> Result<ScanReport, CustodyError> {
        let batch = self.config.batch_size.max(1);
        let mut report = ScanReport::default();

        // 1. Expiry
        let mut cursor = None;
        loop {
            let page = self.store.find_expired_signatures(now, cursor, batch).await?;
            let Some(last) = page.last() else { break };
            cursor = Some(ScanCursor::after_expiry(last));
            let full = page.len() == batch;

            for req in page {
                report.expired += 1;
                match self.signatures.expire(req).await {
                    Ok(SignatureStatus::Expired) => report.advanced += 1,
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "Failed to expire signature request");
                        report.errors += 1;
                    }
                }
            }
            if !full {
                break;
            }
        }

        // 2. Receipts
        let mut cursor = None;
        loop {
            let page = self
                .store
                .find_transactions(TransactionStatus::Submitted, now, cursor, batch)
                .await?;
            let Some(last) = page.last() else { break };
            cursor = Some(ScanCursor::after_transaction(last));
            let full = page.len() == batch;

            for tx in page {
                report.reconciled += 1;
                match self.transactions.reconcile(tx).await {
                    Ok(TransactionStatus::Submitted) => {}
                    Ok(_) => report.advanced += 1,
                    Err(e) => {
                        warn!(error = %e, "Failed to reconcile transaction");
                        report.errors += 1;
                    }
                }
            }
            if !full {
                break;
            }
        }

        // 3. Unknown outcomes
        let mut cursor = None;
        loop {
            let page = self
                .store
                .find_transactions(TransactionStatus::Submitting, cutoffs.submitting, cursor, batch)
                .await?;
            let Some(last) = page.last() else { break };
            cursor = Some(ScanCursor::after_transaction(last));
            let full = page.len() == batch;

            for tx in page {
                report.resolved += 1;
                warn!(tx_id = %tx.id, updated_at = %tx.updated_at, "Resolving stale SUBMITTING transaction");
                match self.transactions.resolve_unknown(tx).await {
                    Ok(TransactionStatus::Submitting) => {}
                    Ok(_) => report.advanced += 1,
                    Err(e) => {
                        warn!(error = %e, "Failed to resolve transaction outcome");
                        report.errors += 1;
                    }
                }
            }
            if !full {
                break;
            }
        }

        // 4. Lost queue entries
        let mut cursor = None;
        loop {
            let page = self
                .store
                .find_transactions(TransactionStatus::Pending, cutoffs.pending, cursor, batch)
                .await?;
            let Some(last) = page.last() else { break };
            cursor = Some(ScanCursor::after_transaction(last));
            let full = page.len() == batch;

            for tx in page {
                if tx.is_due(now) && self.queue.try_enqueue(Job::Transaction(tx.id)) {
                    report.requeued += 1;
                }
            }
            if !full {
                break;
            }
        }
        let mut cursor = None;
        loop {
            let page = self
                .store
                .find_signatures(SignatureStatus::Pending, cutoffs.pending, cursor, batch)
                .await?;
            let Some(last) = page.last() else { break };
            cursor = Some(ScanCursor::after_signature(last));
            let full = page.len() == batch;

            for req in page {
                if self.queue.try_enqueue(Job::Signature(req.id)) {
                    report.requeued += 1;
                }
            }
            if !full {
                break;
            }
        }

        Ok(report)
    }
}

fn secs(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(secs as i64)
}

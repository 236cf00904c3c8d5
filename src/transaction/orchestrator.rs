//! Transaction Orchestrator
//!
//! Drives a transaction from `Pending` through broadcast to `Confirmed`
//! (or `Failed`). Every state change is a compare-and-swap on
//! `(status, version)` at the store, so a live dispatch and the
//! reconciliation poller can never both advance the same record: the loser
//! re-reads and no-ops.
//!
//! # Dispatch
//! 1. Sign once: lease the record, estimate fee, encode, sign, keep the
//!    blob on the record.
//! 2. CAS `Pending -> Submitting` (the single winner is the only caller of
//!    `submit`).
//! 3. Broadcast and classify: transient goes back to `Pending` with backoff,
//!    permanent goes to `Failed`, unknown outcome is resolved on chain
//!    before anything else happens.

use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use super::retry::RetryPolicy;
use super::state::TransactionStatus;
use super::types::{
    CreateTransactionRequest, TransactionFilter, TransactionRecord, UpdateTransactionStatusRequest,
};
use crate::chain::{
    ChainAdapter, ChainError, ChainRegistry, FailureClass, OutcomeResolution, ReceiptStatus,
    SignedPayload, TransferIntent, with_deadline,
};
use crate::config::OrchestratorConfig;
use crate::core_types::{BlockchainType, TransactionId, VaultId};
use crate::error::CustodyError;
use crate::events::{EventPublisher, StatusEnvelope, TOPIC_TRANSACTIONS, publish_best_effort};
use crate::money::parse_amount;
use crate::signer::Signer;
use crate::store::{CustodyStore, Page, PageRequest};
use crate::vault::VaultManager;
use crate::worker::{Job, JobQueue};

/// Slack added to delayed re-enqueues so the job never arrives before
/// `next_attempt_at`
const REQUEUE_SLACK: Duration = Duration::from_millis(10);

pub struct TransactionOrchestrator {
    store: Arc<dyn CustodyStore>,
    chains: Arc<ChainRegistry>,
    vaults: Arc<VaultManager>,
    signer: Arc<dyn Signer>,
    events: Arc<dyn EventPublisher>,
    queue: JobQueue,
    policy: RetryPolicy,
    call_timeout: Duration,
    dropped_grace: chrono::Duration,
}

impl TransactionOrchestrator {
    pub fn new(
        store: Arc<dyn CustodyStore>,
        chains: Arc<ChainRegistry>,
        vaults: Arc<VaultManager>,
        signer: Arc<dyn Signer>,
        events: Arc<dyn EventPublisher>,
        queue: JobQueue,
        config: &OrchestratorConfig,
    ) -> Self {
        Self {
            store,
            chains,
            vaults,
            signer,
            events,
            queue,
            policy: RetryPolicy::from_config(config),
            call_timeout: config.call_timeout(),
            dropped_grace: chrono::Duration::seconds(config.dropped_grace_secs as i64),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    // ========================================================================
    // Exposed operations
    // ========================================================================

    /// Validate and persist a `Pending` transfer, then schedule dispatch.
    ///
    /// Returns without touching the network.
    pub async fn create_transaction(
        &self,
        req: CreateTransactionRequest,
    ) -> Result<TransactionRecord, CustodyError> {
        let vault = self.vaults.get_vault(req.vault_id).await?;
        let chain = vault.blockchain_type;
        let adapter = self.chains.get(chain)?;

        let from = req.from_address.trim();
        let to = req.to_address.trim();
        if !same_address(chain, from, &vault.address) {
            return Err(CustodyError::Validation(format!(
                "from_address {} is not the address of vault {}",
                from, vault.id
            )));
        }
        if !adapter.validate_address(to) {
            return Err(CustodyError::Validation(format!(
                "invalid {} address: {}",
                chain, to
            )));
        }
        let amount = parse_amount(&req.amount, chain.decimals())?;

        let record = {
            let _guard = self.vaults.lock(vault.id).await;
            // Status may have changed while waiting for the lock
            let vault = self.vaults.get_vault(vault.id).await?;
            if !vault.status.accepts_work() {
                return Err(CustodyError::Conflict(format!(
                    "vault {} is {}",
                    vault.id, vault.status
                )));
            }
            let record = TransactionRecord::new_pending(
                vault.id,
                chain,
                vault.address.clone(),
                to.to_string(),
                amount,
            );
            self.store.insert_transaction(&record).await?;
            record
        };

        info!(
            tx_id = %record.id,
            vault_id = %record.vault_id,
            chain = %chain,
            amount = %record.amount,
            to = %record.to_address,
            "Transaction created"
        );
        self.queue.try_enqueue(Job::Transaction(record.id));
        Ok(record)
    }

    pub async fn get_transaction(&self, id: TransactionId) -> Result<TransactionRecord, CustodyError> {
        self.store
            .get_transaction(id)
            .await?
            .ok_or_else(|| CustodyError::NotFound(format!("transaction {}", id)))
    }

    pub async fn list_transactions(
        &self,
        filter: &TransactionFilter,
        page: u32,
        size: u32,
    ) -> Result<Page<TransactionRecord>, CustodyError> {
        let page = PageRequest::new(page, size)?;
        Ok(self.store.list_transactions(filter, page).await?)
    }

    /// Administrative override into a terminal status, reason required
    pub async fn update_status(
        &self,
        id: TransactionId,
        req: UpdateTransactionStatusRequest,
    ) -> Result<TransactionRecord, CustodyError> {
        let reason = req.reason.trim();
        if reason.is_empty() {
            return Err(CustodyError::Validation(
                "a reason is required for a status override".into(),
            ));
        }
        if !req.status.is_terminal() {
            return Err(CustodyError::Validation(format!(
                "status override must target a terminal status, got {}",
                req.status
            )));
        }

        let vault_id = self.get_transaction(id).await?.vault_id;
        let _guard = self.vaults.lock(vault_id).await;
        let current = self.get_transaction(id).await?;

        if current.status.is_terminal() {
            return Err(CustodyError::Conflict(format!(
                "transaction {} is already {}",
                id, current.status
            )));
        }
        if !current.status.can_transition_to(req.status) {
            return Err(CustodyError::Conflict(format!(
                "transaction {} cannot move from {} to {}",
                id, current.status, req.status
            )));
        }

        let mut next = current.next_version();
        next.status = req.status;
        next.status_reason = Some(reason.to_string());
        next.next_attempt_at = None;

        if !self
            .store
            .cas_transaction(&next, current.status, current.version)
            .await?
        {
            return Err(CustodyError::Conflict(format!(
                "transaction {} was modified concurrently",
                id
            )));
        }

        warn!(
            tx_id = %id,
            from = %current.status,
            to = %next.status,
            reason,
            "Transaction status overridden"
        );
        self.after_commit(current.status, &next).await;
        Ok(next)
    }

    // ========================================================================
    // Dispatch
    // ========================================================================

    /// Advance a due `Pending` transaction by one broadcast attempt.
    ///
    /// Returns the status after the step; any other status is a no-op.
    pub async fn dispatch(&self, id: TransactionId) -> Result<TransactionStatus, CustodyError> {
        let tx = self.get_transaction(id).await?;
        if !tx.is_due(Utc::now()) {
            debug!(tx_id = %id, status = %tx.status, "Nothing to dispatch");
            return Ok(tx.status);
        }

        let adapter = match self.chains.get(tx.blockchain_type) {
            Ok(adapter) => adapter,
            Err(e) => return self.fail(&tx, e.to_string()).await,
        };

        let (tx, payload) = match tx.signed_payload.clone() {
            Some(raw) => {
                let payload = SignedPayload::new(tx.id.to_string(), raw);
                (tx, payload)
            }
            None => {
                let Some(mut claimed) = self.claim_for_signing(&tx).await? else {
                    debug!(tx_id = %id, "Signing claimed elsewhere");
                    return self.current_status(id).await;
                };
                if claimed.fee.is_none() {
                    claimed.fee = self.estimate_fee(adapter.as_ref(), &intent_of(&claimed)).await;
                }
                match self.sign_transfer(adapter.as_ref(), &claimed).await {
                    Ok(payload) => (claimed, payload),
                    Err(SigningFailure::Retry(reason)) => {
                        warn!(tx_id = %id, error = %reason, "Transient encoding failure");
                        // Counts as an attempt so a dead node cannot retry forever
                        let mut counted = claimed.clone();
                        counted.attempt_count += 1;
                        return self.retry_or_fail(&counted, reason).await;
                    }
                    Err(SigningFailure::Fail(reason)) => return self.fail(&claimed, reason).await,
                }
            }
        };

        let mut next = tx.next_version();
        next.status = TransactionStatus::Submitting;
        next.attempt_count = tx.attempt_count + 1;
        next.signed_payload = Some(payload.raw.clone());
        next.next_attempt_at = None;

        if !self
            .store
            .cas_transaction(&next, TransactionStatus::Pending, tx.version)
            .await?
        {
            debug!(tx_id = %id, "Dispatch lost the race, transaction owned elsewhere");
            return self.current_status(id).await;
        }

        info!(
            tx_id = %id,
            chain = %next.blockchain_type,
            attempt = next.attempt_count,
            "Submitting transaction"
        );

        let result = with_deadline(self.call_timeout, "submit", adapter.submit(&payload))
            .await
            .map_err(ChainError::into_submit_error);

        match result {
            Ok(hash) => self.mark_submitted(&next, hash).await,
            Err(e) => match e.class() {
                FailureClass::Transient => {
                    warn!(tx_id = %id, attempt = next.attempt_count, error = %e, "Transient submit failure");
                    self.retry_or_fail(&next, e.to_string()).await
                }
                FailureClass::Permanent => {
                    warn!(tx_id = %id, error = %e, "Transaction rejected by network");
                    self.fail(&next, e.to_string()).await
                }
                FailureClass::UnknownOutcome => {
                    warn!(tx_id = %id, error = %e, "Submit outcome unknown, resolving on chain");
                    self.resolve_outcome(next, e.to_string()).await
                }
            },
        }
    }

    /// Resolve a `Submitting` record whose broadcast result was never
    /// observed (timeout, crash). Never resubmits blindly: the chain is asked
    /// first, and only a positive "not seen" sends it back to `Pending`.
    pub async fn resolve_unknown(
        &self,
        current: TransactionRecord,
    ) -> Result<TransactionStatus, CustodyError> {
        let reason = current
            .last_error
            .clone()
            .unwrap_or_else(|| "submission outcome unknown".to_string());
        self.resolve_outcome(current, reason).await
    }

    async fn resolve_outcome(
        &self,
        current: TransactionRecord,
        reason: String,
    ) -> Result<TransactionStatus, CustodyError> {
        if current.status != TransactionStatus::Submitting {
            return Ok(current.status);
        }
        let Some(raw) = current.signed_payload.clone() else {
            // Nothing signed means nothing was broadcast
            return self
                .retry_or_fail(&current, "interrupted before broadcast".to_string())
                .await;
        };
        let adapter = self.chains.get(current.blockchain_type)?;
        let payload = SignedPayload::new(current.id.to_string(), raw);

        let lookup = with_deadline(
            self.call_timeout,
            "find_submission",
            adapter.find_submission(&payload),
        )
        .await;

        match lookup {
            Ok(Some(hash)) => {
                info!(tx_id = %current.id, tx_hash = %hash, "Unknown outcome resolved: seen by network");
                self.mark_submitted(&current, hash).await
            }
            Ok(None) => {
                info!(tx_id = %current.id, "Unknown outcome resolved: not seen by network");
                self.retry_or_fail(&current, reason).await
            }
            Err(e) => match adapter.resolution() {
                OutcomeResolution::IdempotentResubmit => {
                    // Resubmission carries the same request id and is deduplicated
                    warn!(tx_id = %current.id, error = %e, "Lookup failed, re-queueing deduplicated resubmit");
                    self.retry_or_fail(&current, reason).await
                }
                OutcomeResolution::Lookup => {
                    warn!(tx_id = %current.id, error = %e, "Lookup failed, leaving transaction for the poller");
                    Ok(TransactionStatus::Submitting)
                }
            },
        }
    }

    // ========================================================================
    // Reconciliation
    // ========================================================================

    /// Re-read a `Submitted` transaction's receipt and advance it
    pub async fn reconcile(
        &self,
        current: TransactionRecord,
    ) -> Result<TransactionStatus, CustodyError> {
        if current.status != TransactionStatus::Submitted {
            return Ok(current.status);
        }
        let Some(hash) = current.chain_tx_hash.clone() else {
            error!(tx_id = %current.id, "Submitted transaction without a chain hash");
            return Err(CustodyError::Storage(format!(
                "transaction {} is SUBMITTED without a chain hash",
                current.id
            )));
        };
        let adapter = self.chains.get(current.blockchain_type)?;

        let receipt = match with_deadline(
            self.call_timeout,
            "get_receipt",
            adapter.get_receipt(&hash),
        )
        .await
        {
            Ok(receipt) => receipt,
            Err(e) => {
                debug!(tx_id = %current.id, error = %e, "Receipt read failed, retrying next tick");
                return Ok(TransactionStatus::Submitted);
            }
        };

        match receipt {
            ReceiptStatus::Included {
                confirmations,
                finalized,
            } => {
                let confirmations = confirmations.max(current.confirmations);
                let threshold = self.chains.finality_threshold(current.blockchain_type);

                let mut next = current.next_version();
                next.confirmations = confirmations;
                if finalized || confirmations >= threshold {
                    next.status = TransactionStatus::Confirmed;
                } else if confirmations == current.confirmations {
                    return Ok(TransactionStatus::Submitted);
                } else {
                    debug!(tx_id = %current.id, confirmations, threshold, "Confirmations advanced");
                }
                self.transition(&current, next).await
            }
            ReceiptStatus::NotFound => {
                let since = current.submitted_at.unwrap_or(current.updated_at);
                if Utc::now() - since < self.dropped_grace {
                    return Ok(TransactionStatus::Submitted);
                }
                warn!(tx_id = %current.id, tx_hash = %hash, "Transaction dropped from chain");
                self.retry_or_fail(&current, format!("dropped from chain: {}", hash))
                    .await
            }
            ReceiptStatus::Reverted(reason) => {
                warn!(tx_id = %current.id, tx_hash = %hash, reason = %reason, "Transaction reverted");
                self.fail(&current, format!("reverted: {}", reason)).await
            }
        }
    }

    // ========================================================================
    // Transitions
    // ========================================================================

    async fn mark_submitted(
        &self,
        current: &TransactionRecord,
        hash: String,
    ) -> Result<TransactionStatus, CustodyError> {
        let mut next = current.next_version();
        match &current.chain_tx_hash {
            Some(existing) if existing != &hash => {
                error!(
                    tx_id = %current.id,
                    existing = %existing,
                    reported = %hash,
                    "Adapter reported a different hash for the same payload, keeping the first"
                );
            }
            _ => next.chain_tx_hash = Some(hash),
        }
        next.status = TransactionStatus::Submitted;
        next.submitted_at = Some(Utc::now());
        next.last_error = None;
        self.transition(current, next).await
    }

    /// Back to `Pending` with backoff while budget remains, else `Failed`
    async fn retry_or_fail(
        &self,
        current: &TransactionRecord,
        reason: String,
    ) -> Result<TransactionStatus, CustodyError> {
        if !self.policy.has_budget(current.attempt_count) {
            warn!(
                tx_id = %current.id,
                attempts = current.attempt_count,
                error = %reason,
                "Retry budget exhausted"
            );
            return self.fail(current, reason).await;
        }

        let delay = self.policy.backoff(current.attempt_count);
        let mut next = current.next_version();
        next.status = TransactionStatus::Pending;
        next.last_error = Some(reason);
        next.next_attempt_at =
            Some(Utc::now() + chrono::Duration::milliseconds(delay.as_millis() as i64));
        self.transition(current, next).await
    }

    async fn fail(
        &self,
        current: &TransactionRecord,
        reason: String,
    ) -> Result<TransactionStatus, CustodyError> {
        let mut next = current.next_version();
        next.status = TransactionStatus::Failed;
        next.last_error = Some(reason);
        next.next_attempt_at = None;
        self.transition(current, next).await
    }

    /// CAS `current -> next`. A lost CAS re-reads and reports the winner's status.
    async fn transition(
        &self,
        current: &TransactionRecord,
        next: TransactionRecord,
    ) -> Result<TransactionStatus, CustodyError> {
        if next.status != current.status && !current.status.can_transition_to(next.status) {
            return Err(CustodyError::Conflict(format!(
                "illegal transition {} -> {} for transaction {}",
                current.status, next.status, current.id
            )));
        }
        if !self
            .store
            .cas_transaction(&next, current.status, current.version)
            .await?
        {
            debug!(tx_id = %current.id, expected = %current.status, "CAS lost, transaction advanced elsewhere");
            return self.current_status(current.id).await;
        }
        if next.status != current.status {
            info!(tx_id = %next.id, from = %current.status, to = %next.status, "Transaction status changed");
            self.after_commit(current.status, &next).await;
        }
        Ok(next.status)
    }

    async fn after_commit(&self, previous: TransactionStatus, next: &TransactionRecord) {
        match next.status {
            TransactionStatus::Pending => {
                let delay = next
                    .next_attempt_at
                    .and_then(|at| (at - Utc::now()).to_std().ok())
                    .unwrap_or_default();
                self.queue
                    .enqueue_after(Job::Transaction(next.id), delay + REQUEUE_SLACK);
            }
            TransactionStatus::Confirmed => {
                self.announce(next).await;
                self.refresh_balance(next.vault_id).await;
            }
            TransactionStatus::Failed => self.announce(next).await,
            TransactionStatus::Submitting | TransactionStatus::Submitted => {}
        }
        debug!(tx_id = %next.id, from = %previous, version = next.version, "Transition committed");
    }

    async fn refresh_balance(&self, vault_id: VaultId) {
        if let Err(e) = self.vaults.refresh_balance(vault_id).await {
            warn!(vault_id = %vault_id, error = %e, "Balance refresh after confirmation failed");
        }
    }

    async fn announce(&self, tx: &TransactionRecord) {
        let detail = match tx.status {
            TransactionStatus::Confirmed => tx
                .status_reason
                .clone()
                .or_else(|| tx.chain_tx_hash.clone()),
            _ => tx.status_reason.clone().or_else(|| tx.last_error.clone()),
        };
        let envelope = StatusEnvelope {
            id: tx.id.to_string(),
            vault_id: tx.vault_id.to_string(),
            status: tx.status.as_str().to_string(),
            detail,
            occurred_at: tx.updated_at,
        };
        publish_best_effort(self.events.as_ref(), TOPIC_TRANSACTIONS, &envelope.id, &envelope)
            .await;
    }

    async fn current_status(&self, id: TransactionId) -> Result<TransactionStatus, CustodyError> {
        Ok(self.get_transaction(id).await?.status)
    }

    // ========================================================================
    // Signing
    // ========================================================================

    async fn estimate_fee(
        &self,
        adapter: &dyn ChainAdapter,
        intent: &TransferIntent,
    ) -> Option<Decimal> {
        match with_deadline(self.call_timeout, "estimate_fee", adapter.estimate_fee(intent)).await {
            Ok(fee) => Some(fee),
            Err(e) => {
                warn!(tx_id = %intent.transaction_id, error = %e, "Fee estimation failed, continuing without fee");
                None
            }
        }
    }

    /// Lease the record for one signing round: `next_attempt_at` moves out
    /// past the fee, encoding and signer deadlines, so concurrent dispatchers
    /// see it as not due. A crash mid-signing only delays the record until
    /// the lease runs out. `None` when another dispatcher got there first.
    async fn claim_for_signing(
        &self,
        tx: &TransactionRecord,
    ) -> Result<Option<TransactionRecord>, CustodyError> {
        let lease = self.call_timeout * 3 + REQUEUE_SLACK;
        let mut claimed = tx.next_version();
        claimed.next_attempt_at = chrono::Duration::from_std(lease)
            .ok()
            .map(|lease| Utc::now() + lease);

        if !self
            .store
            .cas_transaction(&claimed, TransactionStatus::Pending, tx.version)
            .await?
        {
            return Ok(None);
        }
        Ok(Some(claimed))
    }

    /// Encode for the chain, sign, attach; the reason ends up in `last_error`
    async fn sign_transfer(
        &self,
        adapter: &dyn ChainAdapter,
        tx: &TransactionRecord,
    ) -> Result<SignedPayload, SigningFailure> {
        let key_id = self.signer.key_id();
        let scheme = adapter.signature_scheme();
        if !self.signer.supports(scheme) {
            return Err(SigningFailure::Fail(format!(
                "signer {} cannot produce {} signatures",
                key_id, scheme
            )));
        }

        let public_key = self.signer.public_key();
        let unsigned = with_deadline(
            self.call_timeout,
            "encode_transfer",
            adapter.encode_transfer(&intent_of(tx), public_key.as_deref()),
        )
        .await
        .map_err(|e| {
            let reason = format!("encoding failed: {}", e);
            match e.class() {
                FailureClass::Permanent => SigningFailure::Fail(reason),
                FailureClass::Transient | FailureClass::UnknownOutcome => {
                    SigningFailure::Retry(reason)
                }
            }
        })?;

        let signature = match tokio::time::timeout(
            self.call_timeout,
            self.signer.sign(&unsigned.signing_payload),
        )
        .await
        {
            Ok(Ok(signature)) => signature,
            Ok(Err(e)) => return Err(SigningFailure::Fail(format!("signer {}: {}", key_id, e))),
            Err(_) => {
                return Err(SigningFailure::Fail(format!(
                    "signer {}: timed out after {}ms",
                    key_id,
                    self.call_timeout.as_millis()
                )));
            }
        };

        let raw = adapter
            .attach_signature(&unsigned, &signature)
            .map_err(|e| SigningFailure::Fail(format!("signer {}: {}", key_id, e)))?;
        Ok(SignedPayload::new(tx.id.to_string(), raw))
    }
}

/// Why a transfer could not be signed
enum SigningFailure {
    /// Chain read failed transiently; back to `Pending` with backoff
    Retry(String),
    Fail(String),
}

fn intent_of(tx: &TransactionRecord) -> TransferIntent {
    TransferIntent {
        transaction_id: tx.id,
        chain: tx.blockchain_type,
        from: tx.from_address.clone(),
        to: tx.to_address.clone(),
        amount: tx.amount,
        fee: tx.fee,
    }
}

/// Hex account addresses compare case-insensitively (EIP-55 checksums)
fn same_address(chain: BlockchainType, a: &str, b: &str) -> bool {
    match chain {
        BlockchainType::Ethereum => a.eq_ignore_ascii_case(b),
        BlockchainType::Xrp | BlockchainType::Utxo => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{MockChainAdapter, MockSubmit};
    use crate::core_types::OrganizationId;
    use crate::events::BroadcastPublisher;
    use crate::signer::{MockSigner, SignerError};
    use crate::store::MemoryStore;
    use crate::vault::{CreateVaultRequest, UpdateVaultRequest, Vault, VaultLocks, VaultStatus};
    use crate::worker::JobReceiver;

    const RECIPIENT: &str = "0xabc0000000000000000000000000000000000def";

    struct Harness {
        orchestrator: TransactionOrchestrator,
        vaults: Arc<VaultManager>,
        store: Arc<MemoryStore>,
        mock: Arc<MockChainAdapter>,
        signer: Arc<MockSigner>,
        events: Arc<BroadcastPublisher>,
        _rx: JobReceiver,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let mock = Arc::new(MockChainAdapter::new(BlockchainType::Ethereum));
        let chains = Arc::new(ChainRegistry::new().with(mock.clone(), 3));
        let config = OrchestratorConfig {
            max_attempts: 3,
            backoff_base_ms: 0,
            backoff_max_ms: 0,
            backoff_jitter: false,
            call_timeout_ms: 1_000,
            dropped_grace_secs: 0,
        };
        let vaults = Arc::new(VaultManager::new(
            store.clone(),
            chains.clone(),
            Arc::new(VaultLocks::new()),
            config.call_timeout(),
        ));
        let signer = Arc::new(MockSigner::new("test-key"));
        let events = Arc::new(BroadcastPublisher::new(64));
        let (queue, rx) = JobQueue::bounded(64);
        let orchestrator = TransactionOrchestrator::new(
            store.clone(),
            chains,
            vaults.clone(),
            signer.clone(),
            events.clone(),
            queue,
            &config,
        );
        Harness {
            orchestrator,
            vaults,
            store,
            mock,
            signer,
            events,
            _rx: rx,
        }
    }

    async fn vault(h: &Harness) -> Vault {
        h.vaults
            .create_vault(CreateVaultRequest {
                organization_id: OrganizationId::new(),
                name: "Treasury".into(),
                blockchain_type: BlockchainType::Ethereum,
            })
            .await
            .unwrap()
    }

    async fn pending_tx(h: &Harness, vault: &Vault) -> TransactionRecord {
        h.orchestrator
            .create_transaction(CreateTransactionRequest {
                vault_id: vault.id,
                from_address: vault.address.clone(),
                to_address: RECIPIENT.into(),
                amount: "1.5".into(),
            })
            .await
            .unwrap()
    }

    fn assert_monotonic(history: &[TransactionStatus]) {
        for pair in history.windows(2) {
            assert!(
                pair[0] == pair[1] || pair[0].can_transition_to(pair[1]),
                "illegal transition in {:?}",
                history
            );
        }
    }

    #[tokio::test]
    async fn test_create_transaction_validation() {
        let h = harness();
        let v = vault(&h).await;
        let request = |from: &str, to: &str, amount: &str| CreateTransactionRequest {
            vault_id: v.id,
            from_address: from.into(),
            to_address: to.into(),
            amount: amount.into(),
        };

        for (from, to, amount) in [
            (RECIPIENT, RECIPIENT, "1"),
            (v.address.as_str(), "0x123", "1"),
            (v.address.as_str(), RECIPIENT, "0"),
            (v.address.as_str(), RECIPIENT, "-1"),
            (v.address.as_str(), RECIPIENT, "abc"),
        ] {
            assert!(matches!(
                h.orchestrator.create_transaction(request(from, to, amount)).await,
                Err(CustodyError::Validation(_))
            ));
        }

        let mut missing = request(&v.address, RECIPIENT, "1");
        missing.vault_id = VaultId::new();
        assert!(matches!(
            h.orchestrator.create_transaction(missing).await,
            Err(CustodyError::NotFound(_))
        ));

        h.vaults
            .update_vault(
                v.id,
                UpdateVaultRequest {
                    name: None,
                    status: Some(VaultStatus::Locked),
                },
            )
            .await
            .unwrap();
        assert!(matches!(
            h.orchestrator
                .create_transaction(request(&v.address, RECIPIENT, "1"))
                .await,
            Err(CustodyError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_checksummed_from_address_accepted() {
        let h = harness();
        let v = vault(&h).await;
        let tx = h
            .orchestrator
            .create_transaction(CreateTransactionRequest {
                vault_id: v.id,
                from_address: format!("0x{}", v.address[2..].to_uppercase()),
                to_address: RECIPIENT.into(),
                amount: "0.25".into(),
            })
            .await
            .unwrap();
        assert_eq!(tx.from_address, v.address);
        assert_eq!(tx.status, TransactionStatus::Pending);
    }

    #[tokio::test]
    async fn test_dispatch_to_confirmed() {
        let h = harness();
        let v = vault(&h).await;
        h.mock.set_balance(&v.address, Decimal::new(7, 0));
        let mut events = h.events.subscribe();

        let tx = pending_tx(&h, &v).await;
        assert_eq!(tx.status, TransactionStatus::Pending);
        assert!(tx.chain_tx_hash.is_none());

        assert_eq!(
            h.orchestrator.dispatch(tx.id).await.unwrap(),
            TransactionStatus::Submitted
        );
        let submitted = h.orchestrator.get_transaction(tx.id).await.unwrap();
        let raw = submitted.signed_payload.clone().unwrap();
        assert_eq!(submitted.chain_tx_hash, Some(h.mock.hash_of(&raw)));
        assert_eq!(submitted.fee, Some(Decimal::new(21, 5)));
        assert_eq!(submitted.attempt_count, 1);

        let mut status = submitted.status;
        for _ in 0..5 {
            let current = h.orchestrator.get_transaction(tx.id).await.unwrap();
            status = h.orchestrator.reconcile(current).await.unwrap();
            if status == TransactionStatus::Confirmed {
                break;
            }
        }
        assert_eq!(status, TransactionStatus::Confirmed);

        let confirmed = h.orchestrator.get_transaction(tx.id).await.unwrap();
        assert!(confirmed.confirmations >= 3);
        assert_eq!(confirmed.chain_tx_hash, submitted.chain_tx_hash);

        let event = events.recv().await.unwrap();
        assert_eq!(event.key, tx.id.to_string());
        assert_eq!(event.value["status"], "CONFIRMED");

        let refreshed = h.vaults.get_vault(v.id).await.unwrap();
        assert_eq!(refreshed.balance, Decimal::new(7, 0));
        assert!(refreshed.balance_updated_at.is_some());

        assert_monotonic(&h.store.transaction_history(tx.id));
    }

    #[tokio::test]
    async fn test_concurrent_dispatch_submits_once() {
        let h = harness();
        let v = vault(&h).await;
        let tx = pending_tx(&h, &v).await;
        h.mock.set_latency(Some(Duration::from_millis(50)));

        h.signer.set_latency(Some(Duration::from_millis(50)));

        let (a, b) = tokio::join!(h.orchestrator.dispatch(tx.id), h.orchestrator.dispatch(tx.id));
        a.unwrap();
        b.unwrap();

        assert_eq!(h.signer.sign_count(), 1);
        assert_eq!(h.mock.submit_count(), 1);
        let stored = h.orchestrator.get_transaction(tx.id).await.unwrap();
        assert_eq!(stored.status, TransactionStatus::Submitted);
        assert_eq!(stored.attempt_count, 1);
    }

    #[tokio::test]
    async fn test_retry_budget_exhaustion() {
        let h = harness();
        let v = vault(&h).await;
        let tx = pending_tx(&h, &v).await;
        h.mock.push_submits([
            MockSubmit::Transient("busy 1".into()),
            MockSubmit::Transient("busy 2".into()),
            MockSubmit::Transient("busy 3".into()),
        ]);

        assert_eq!(h.orchestrator.dispatch(tx.id).await.unwrap(), TransactionStatus::Pending);
        assert_eq!(h.orchestrator.dispatch(tx.id).await.unwrap(), TransactionStatus::Pending);
        assert_eq!(h.orchestrator.dispatch(tx.id).await.unwrap(), TransactionStatus::Failed);
        // Terminal, further dispatches are no-ops
        assert_eq!(h.orchestrator.dispatch(tx.id).await.unwrap(), TransactionStatus::Failed);

        let failed = h.orchestrator.get_transaction(tx.id).await.unwrap();
        assert_eq!(h.mock.submit_count(), 3);
        assert_eq!(failed.attempt_count, 3);
        assert!(failed.last_error.unwrap().contains("busy 3"));
        assert!(failed.chain_tx_hash.is_none());
        assert_monotonic(&h.store.transaction_history(tx.id));
    }

    #[tokio::test]
    async fn test_permanent_rejection_fails_immediately() {
        let h = harness();
        let v = vault(&h).await;
        let tx = pending_tx(&h, &v).await;
        h.mock.push_submit(MockSubmit::Permanent("invalid sender".into()));

        assert_eq!(h.orchestrator.dispatch(tx.id).await.unwrap(), TransactionStatus::Failed);
        assert_eq!(h.mock.submit_count(), 1);
        let failed = h.orchestrator.get_transaction(tx.id).await.unwrap();
        assert!(failed.last_error.unwrap().contains("invalid sender"));
    }

    #[tokio::test]
    async fn test_unknown_outcome_found_on_chain() {
        let h = harness();
        let v = vault(&h).await;
        let tx = pending_tx(&h, &v).await;
        h.mock.push_submit(MockSubmit::UnknownAccepted);

        assert_eq!(
            h.orchestrator.dispatch(tx.id).await.unwrap(),
            TransactionStatus::Submitted
        );
        assert_eq!(h.mock.submit_count(), 1);
        assert_eq!(h.mock.lookup_count(), 1);
        let stored = h.orchestrator.get_transaction(tx.id).await.unwrap();
        assert!(stored.chain_tx_hash.is_some());
    }

    #[tokio::test]
    async fn test_unknown_outcome_not_seen_is_retried_with_same_payload() {
        let h = harness();
        let v = vault(&h).await;
        let tx = pending_tx(&h, &v).await;
        h.mock.push_submit(MockSubmit::UnknownLost);

        assert_eq!(h.orchestrator.dispatch(tx.id).await.unwrap(), TransactionStatus::Pending);
        let first = h.orchestrator.get_transaction(tx.id).await.unwrap();

        assert_eq!(
            h.orchestrator.dispatch(tx.id).await.unwrap(),
            TransactionStatus::Submitted
        );
        let second = h.orchestrator.get_transaction(tx.id).await.unwrap();
        assert_eq!(first.signed_payload, second.signed_payload);
        assert_eq!(h.signer.sign_count(), 1);
        assert_eq!(h.mock.broadcast_count(), 1);
    }

    #[tokio::test]
    async fn test_lookup_failure_leaves_submitting() {
        let h = harness();
        let v = vault(&h).await;
        let tx = pending_tx(&h, &v).await;
        h.mock.push_submit(MockSubmit::UnknownAccepted);
        h.mock.set_fail_reads(true);

        assert_eq!(
            h.orchestrator.dispatch(tx.id).await.unwrap(),
            TransactionStatus::Submitting
        );

        h.mock.set_fail_reads(false);
        let stuck = h.orchestrator.get_transaction(tx.id).await.unwrap();
        assert_eq!(
            h.orchestrator.resolve_unknown(stuck).await.unwrap(),
            TransactionStatus::Submitted
        );
        assert_eq!(h.mock.submit_count(), 1);
    }

    #[tokio::test]
    async fn test_dropped_transaction_rebroadcast_keeps_hash() {
        let h = harness();
        let v = vault(&h).await;
        let tx = pending_tx(&h, &v).await;

        h.orchestrator.dispatch(tx.id).await.unwrap();
        let submitted = h.orchestrator.get_transaction(tx.id).await.unwrap();
        let hash = submitted.chain_tx_hash.clone().unwrap();

        h.mock.drop_transaction(&hash);
        assert_eq!(
            h.orchestrator.reconcile(submitted).await.unwrap(),
            TransactionStatus::Pending
        );
        assert_eq!(
            h.orchestrator.dispatch(tx.id).await.unwrap(),
            TransactionStatus::Submitted
        );

        let rebroadcast = h.orchestrator.get_transaction(tx.id).await.unwrap();
        assert_eq!(rebroadcast.chain_tx_hash, Some(hash));
        assert_eq!(rebroadcast.attempt_count, 2);
        assert_eq!(h.mock.submit_count(), 2);
        assert_eq!(h.mock.broadcast_count(), 1);
        assert_monotonic(&h.store.transaction_history(tx.id));
    }

    #[tokio::test]
    async fn test_reverted_transaction_fails() {
        let h = harness();
        let v = vault(&h).await;
        let tx = pending_tx(&h, &v).await;
        h.orchestrator.dispatch(tx.id).await.unwrap();
        let submitted = h.orchestrator.get_transaction(tx.id).await.unwrap();
        h.mock
            .revert_transaction(submitted.chain_tx_hash.as_deref().unwrap(), "out of gas");

        assert_eq!(
            h.orchestrator.reconcile(submitted).await.unwrap(),
            TransactionStatus::Failed
        );
        let failed = h.orchestrator.get_transaction(tx.id).await.unwrap();
        assert!(failed.last_error.unwrap().contains("out of gas"));
    }

    #[tokio::test]
    async fn test_signer_failure_is_terminal() {
        let h = harness();
        let v = vault(&h).await;
        let tx = pending_tx(&h, &v).await;
        h.signer
            .set_failure(Some(SignerError::Unavailable("hsm offline".into())));

        assert_eq!(h.orchestrator.dispatch(tx.id).await.unwrap(), TransactionStatus::Failed);
        assert_eq!(h.mock.submit_count(), 0);
        let failed = h.orchestrator.get_transaction(tx.id).await.unwrap();
        assert!(failed.last_error.unwrap().contains("hsm offline"));
    }

    #[tokio::test]
    async fn test_transient_encoding_failure_is_retried() {
        let h = harness();
        let v = vault(&h).await;
        let tx = pending_tx(&h, &v).await;
        h.mock
            .set_encode_failure(Some(ChainError::Transport("nonce lookup reset".into())));

        assert_eq!(h.orchestrator.dispatch(tx.id).await.unwrap(), TransactionStatus::Pending);
        let pending = h.orchestrator.get_transaction(tx.id).await.unwrap();
        assert_eq!(pending.attempt_count, 1);
        assert!(pending.signed_payload.is_none());
        assert!(pending.last_error.unwrap().contains("nonce lookup reset"));
        assert_eq!(h.signer.sign_count(), 0);

        h.mock.set_encode_failure(None);
        assert_eq!(
            h.orchestrator.dispatch(tx.id).await.unwrap(),
            TransactionStatus::Submitted
        );
    }

    #[tokio::test]
    async fn test_permanent_encoding_failure_fails() {
        let h = harness();
        let v = vault(&h).await;
        let tx = pending_tx(&h, &v).await;
        h.mock
            .set_encode_failure(Some(ChainError::InvalidAddress(RECIPIENT.into())));

        assert_eq!(h.orchestrator.dispatch(tx.id).await.unwrap(), TransactionStatus::Failed);
        assert_eq!(h.signer.sign_count(), 0);
        assert_eq!(h.mock.submit_count(), 0);
    }

    #[tokio::test]
    async fn test_signer_without_chain_scheme_fails() {
        let h = harness();
        let v = vault(&h).await;
        let tx = pending_tx(&h, &v).await;
        h.signer
            .set_supported_schemes(Some(vec![crate::core_types::SignatureType::EcdsaSecp256k1]));

        assert_eq!(h.orchestrator.dispatch(tx.id).await.unwrap(), TransactionStatus::Failed);
        assert_eq!(h.signer.sign_count(), 0);
        let failed = h.orchestrator.get_transaction(tx.id).await.unwrap();
        assert!(failed.last_error.unwrap().contains("ed25519"));
    }

    #[tokio::test]
    async fn test_fee_estimation_failure_is_not_fatal() {
        let h = harness();
        let v = vault(&h).await;
        let tx = pending_tx(&h, &v).await;
        h.mock.set_fee(None);

        assert_eq!(
            h.orchestrator.dispatch(tx.id).await.unwrap(),
            TransactionStatus::Submitted
        );
        assert!(h.orchestrator.get_transaction(tx.id).await.unwrap().fee.is_none());
    }

    #[tokio::test]
    async fn test_status_override() {
        let h = harness();
        let v = vault(&h).await;
        let tx = pending_tx(&h, &v).await;
        let request = |status, reason: &str| UpdateTransactionStatusRequest {
            status,
            reason: reason.into(),
        };

        assert!(matches!(
            h.orchestrator
                .update_status(tx.id, request(TransactionStatus::Failed, "  "))
                .await,
            Err(CustodyError::Validation(_))
        ));
        assert!(matches!(
            h.orchestrator
                .update_status(tx.id, request(TransactionStatus::Submitted, "ops"))
                .await,
            Err(CustodyError::Validation(_))
        ));
        // No skipping from Pending to Confirmed
        assert!(matches!(
            h.orchestrator
                .update_status(tx.id, request(TransactionStatus::Confirmed, "ops"))
                .await,
            Err(CustodyError::Conflict(_))
        ));

        let failed = h
            .orchestrator
            .update_status(tx.id, request(TransactionStatus::Failed, "duplicate request"))
            .await
            .unwrap();
        assert_eq!(failed.status, TransactionStatus::Failed);
        assert_eq!(failed.status_reason.as_deref(), Some("duplicate request"));

        assert!(matches!(
            h.orchestrator
                .update_status(tx.id, request(TransactionStatus::Failed, "again"))
                .await,
            Err(CustodyError::Conflict(_))
        ));
        // Dispatch after the override does nothing
        assert_eq!(h.orchestrator.dispatch(tx.id).await.unwrap(), TransactionStatus::Failed);
        assert_eq!(h.mock.submit_count(), 0);
    }

    #[tokio::test]
    async fn test_list_transactions_filtered() {
        let h = harness();
        let v = vault(&h).await;
        let a = pending_tx(&h, &v).await;
        pending_tx(&h, &v).await;
        h.orchestrator.dispatch(a.id).await.unwrap();

        let submitted = h
            .orchestrator
            .list_transactions(
                &TransactionFilter {
                    vault_id: Some(v.id),
                    status: Some(TransactionStatus::Submitted),
                },
                1,
                10,
            )
            .await
            .unwrap();
        assert_eq!(submitted.total, 1);
        assert_eq!(submitted.items[0].id, a.id);

        let all = h
            .orchestrator
            .list_transactions(&TransactionFilter::default(), 1, 10)
            .await
            .unwrap();
        assert_eq!(all.total, 2);
        assert!(h.orchestrator.list_transactions(&TransactionFilter::default(), 0, 10).await.is_err());
    }
}

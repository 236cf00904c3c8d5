//! Signature Orchestrator
//!
//! Drives a `SignatureRequest` from `Pending` to `Completed`, `Failed` or
//! `Expired`. Expiry is checked before the signer is called, after it
//! returns, and by the poller; an expired request never completes.
//! Signer failures are terminal.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use super::state::SignatureStatus;
use super::types::{RequestSignatureInput, SignatureFilter, SignatureRequest};
use crate::core_types::SignatureRequestId;
use crate::error::CustodyError;
use crate::events::{EventPublisher, StatusEnvelope, TOPIC_SIGNATURES, publish_best_effort};
use crate::signer::{Signer, SignerError};
use crate::store::{CustodyStore, Page, PageRequest};
use crate::vault::VaultManager;
use crate::worker::{Job, JobQueue};

pub struct SignatureOrchestrator {
    store: Arc<dyn CustodyStore>,
    vaults: Arc<VaultManager>,
    signer: Arc<dyn Signer>,
    events: Arc<dyn EventPublisher>,
    queue: JobQueue,
    call_timeout: Duration,
    default_ttl: Duration,
}

impl SignatureOrchestrator {
    pub fn new(
        store: Arc<dyn CustodyStore>,
        vaults: Arc<VaultManager>,
        signer: Arc<dyn Signer>,
        events: Arc<dyn EventPublisher>,
        queue: JobQueue,
        call_timeout: Duration,
        default_ttl: Duration,
    ) -> Self {
        Self {
            store,
            vaults,
            signer,
            events,
            queue,
            call_timeout,
            default_ttl,
        }
    }

    /// Persist a `Pending` request and schedule signing
    pub async fn request_signature(
        &self,
        input: RequestSignatureInput,
    ) -> Result<SignatureRequest, CustodyError> {
        if input.data_to_sign.is_empty() {
            return Err(CustodyError::Validation("data_to_sign must not be empty".into()));
        }
        if !self.signer.supports(input.signature_type) {
            return Err(CustodyError::Validation(format!(
                "signature type {} not supported by key {}",
                input.signature_type,
                self.signer.key_id()
            )));
        }
        let ttl = input
            .ttl_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_ttl);
        if ttl.is_zero() {
            return Err(CustodyError::Validation("ttl_secs must be positive".into()));
        }
        let ttl = chrono::Duration::from_std(ttl)
            .map_err(|_| CustodyError::Validation("ttl_secs out of range".into()))?;

        let request = {
            let _guard = self.vaults.lock(input.vault_id).await;
            let vault = self.vaults.get_vault(input.vault_id).await?;
            if !vault.status.accepts_work() {
                return Err(CustodyError::Conflict(format!(
                    "vault {} is {}",
                    vault.id, vault.status
                )));
            }
            let request = SignatureRequest::new_pending(
                vault.id,
                input.data_to_sign,
                input.signature_type,
                Utc::now() + ttl,
            );
            self.store.insert_signature(&request).await?;
            request
        };

        info!(
            signature_id = %request.id,
            vault_id = %request.vault_id,
            signature_type = %request.signature_type,
            bytes = request.data_to_sign.len(),
            expires_at = %request.expires_at,
            "Signature requested"
        );
        self.queue.try_enqueue(Job::Signature(request.id));
        Ok(request)
    }

    pub async fn get_signature_status(
        &self,
        id: SignatureRequestId,
    ) -> Result<SignatureRequest, CustodyError> {
        self.store
            .get_signature(id)
            .await?
            .ok_or_else(|| CustodyError::NotFound(format!("signature request {}", id)))
    }

    pub async fn list_signature_requests(
        &self,
        filter: &SignatureFilter,
        page: u32,
        size: u32,
    ) -> Result<Page<SignatureRequest>, CustodyError> {
        let page = PageRequest::new(page, size)?;
        Ok(self.store.list_signatures(filter, page).await?)
    }

    /// Sign a `Pending` request. Anything else is a no-op.
    pub async fn dispatch(&self, id: SignatureRequestId) -> Result<SignatureStatus, CustodyError> {
        let current = self.get_signature_status(id).await?;
        if current.status != SignatureStatus::Pending {
            debug!(signature_id = %id, status = %current.status, "Nothing to sign");
            return Ok(current.status);
        }
        if current.is_expired_at(Utc::now()) {
            return self.expire(current).await;
        }

        let mut signing = current.next_version();
        signing.status = SignatureStatus::Signing;
        if !self
            .store
            .cas_signature(&signing, SignatureStatus::Pending, current.version)
            .await?
        {
            debug!(signature_id = %id, "Signing lost the race, request owned elsewhere");
            return self.current_status(id).await;
        }

        let result = match tokio::time::timeout(
            self.call_timeout,
            self.signer.sign(&signing.data_to_sign),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SignerError::Timeout(format!(
                "no response within {}ms",
                self.call_timeout.as_millis()
            ))),
        };

        // Expiry wins over a late signature
        if signing.is_expired_at(Utc::now()) {
            warn!(signature_id = %id, "Signature request expired while signing");
            return self.expire(signing).await;
        }

        let mut next = signing.next_version();
        match result {
            Ok(signature) => {
                next.status = SignatureStatus::Completed;
                next.signature = Some(signature);
                next.key_id = Some(self.signer.key_id().to_string());
            }
            Err(e) => {
                warn!(signature_id = %id, key_id = self.signer.key_id(), error = %e, "Signing failed");
                next.status = SignatureStatus::Failed;
                next.error = Some(e.to_string());
            }
        }
        self.transition(&signing, next).await
    }

    /// Move a non-terminal request to `Expired`
    pub async fn expire(
        &self,
        current: SignatureRequest,
    ) -> Result<SignatureStatus, CustodyError> {
        if current.status.is_terminal() {
            return Ok(current.status);
        }
        let mut next = current.next_version();
        next.status = SignatureStatus::Expired;
        next.error = Some(format!("expired at {}", current.expires_at));
        self.transition(&current, next).await
    }

    /// Startup handling of a request left in `Signing` by a previous process.
    ///
    /// Whether the signer produced a signature is unknowable and signing is
    /// never repeated, so the request fails (or expires if already overdue).
    pub async fn recover_interrupted(
        &self,
        current: SignatureRequest,
    ) -> Result<SignatureStatus, CustodyError> {
        if current.status != SignatureStatus::Signing {
            return Ok(current.status);
        }
        if current.is_expired_at(Utc::now()) {
            return self.expire(current).await;
        }
        let mut next = current.next_version();
        next.status = SignatureStatus::Failed;
        next.error = Some("signing interrupted".to_string());
        self.transition(&current, next).await
    }

    async fn transition(
        &self,
        current: &SignatureRequest,
        next: SignatureRequest,
    ) -> Result<SignatureStatus, CustodyError> {
        if !current.status.can_transition_to(next.status) {
            return Err(CustodyError::Conflict(format!(
                "illegal transition {} -> {} for signature request {}",
                current.status, next.status, current.id
            )));
        }
        if !self
            .store
            .cas_signature(&next, current.status, current.version)
            .await?
        {
            debug!(signature_id = %current.id, expected = %current.status, "CAS lost, request advanced elsewhere");
            return self.current_status(current.id).await;
        }

        info!(
            signature_id = %next.id,
            from = %current.status,
            to = %next.status,
            "Signature request status changed"
        );
        if next.status.is_terminal() {
            self.announce(&next).await;
        }
        Ok(next.status)
    }

    async fn announce(&self, req: &SignatureRequest) {
        let envelope = StatusEnvelope {
            id: req.id.to_string(),
            vault_id: req.vault_id.to_string(),
            status: req.status.as_str().to_string(),
            detail: req.error.clone(),
            occurred_at: req.updated_at,
        };
        publish_best_effort(self.events.as_ref(), TOPIC_SIGNATURES, &envelope.id, &envelope).await;
    }

    async fn current_status(&self, id: SignatureRequestId) -> Result<SignatureStatus, CustodyError> {
        Ok(self.get_signature_status(id).await?.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::{ChainRegistry, MockChainAdapter};
    use crate::core_types::{BlockchainType, OrganizationId, SignatureType, VaultId};
    use crate::events::BroadcastPublisher;
    use crate::signer::{Ed25519Signer, MockSigner};
    use crate::store::MemoryStore;
    use crate::vault::{CreateVaultRequest, VaultLocks};
    use crate::worker::JobReceiver;

    struct Harness {
        orchestrator: SignatureOrchestrator,
        store: Arc<MemoryStore>,
        signer: Arc<MockSigner>,
        events: Arc<BroadcastPublisher>,
        vault_id: VaultId,
        _rx: JobReceiver,
    }

    async fn harness_with(signer: Arc<dyn Signer>, mock_signer: Arc<MockSigner>) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let chains = Arc::new(
            ChainRegistry::new().with(Arc::new(MockChainAdapter::new(BlockchainType::Xrp)), 1),
        );
        let vaults = Arc::new(VaultManager::new(
            store.clone(),
            chains,
            Arc::new(VaultLocks::new()),
            Duration::from_secs(1),
        ));
        let vault = vaults
            .create_vault(CreateVaultRequest {
                organization_id: OrganizationId::new(),
                name: "Signing vault".into(),
                blockchain_type: BlockchainType::Xrp,
            })
            .await
            .unwrap();
        let events = Arc::new(BroadcastPublisher::new(16));
        let (queue, rx) = JobQueue::bounded(16);
        let orchestrator = SignatureOrchestrator::new(
            store.clone(),
            vaults,
            signer,
            events.clone(),
            queue,
            Duration::from_secs(1),
            Duration::from_secs(3_600),
        );
        Harness {
            orchestrator,
            store,
            signer: mock_signer,
            events,
            vault_id: vault.id,
            _rx: rx,
        }
    }

    async fn harness() -> Harness {
        let signer = Arc::new(MockSigner::new("test-key"));
        harness_with(signer.clone(), signer).await
    }

    fn input(vault_id: VaultId, data: &[u8]) -> RequestSignatureInput {
        RequestSignatureInput {
            vault_id,
            data_to_sign: data.to_vec(),
            signature_type: SignatureType::Ed25519,
            ttl_secs: None,
        }
    }

    /// Insert directly so the expiry can be placed precisely
    async fn insert_expiring_in(h: &Harness, millis: i64) -> SignatureRequest {
        let req = SignatureRequest::new_pending(
            h.vault_id,
            b"payload".to_vec(),
            SignatureType::Ed25519,
            Utc::now() + chrono::Duration::milliseconds(millis),
        );
        h.store.insert_signature(&req).await.unwrap();
        req
    }

    #[tokio::test]
    async fn test_empty_payload_rejected_and_not_persisted() {
        let h = harness().await;
        assert!(matches!(
            h.orchestrator.request_signature(input(h.vault_id, b"")).await,
            Err(CustodyError::Validation(_))
        ));
        let page = h
            .orchestrator
            .list_signature_requests(&SignatureFilter::default(), 1, 10)
            .await
            .unwrap();
        assert_eq!(page.total, 0);
    }

    #[tokio::test]
    async fn test_unsupported_scheme_rejected() {
        let local = Arc::new(Ed25519Signer::from_seed("local", &[7u8; 32]));
        let h = harness_with(local, Arc::new(MockSigner::new("unused"))).await;
        let mut req = input(h.vault_id, b"abc");
        req.signature_type = SignatureType::EcdsaSecp256k1;
        assert!(matches!(
            h.orchestrator.request_signature(req).await,
            Err(CustodyError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_unknown_vault() {
        let h = harness().await;
        assert!(matches!(
            h.orchestrator.request_signature(input(VaultId::new(), b"abc")).await,
            Err(CustodyError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_sign_to_completed() {
        let h = harness().await;
        let mut events = h.events.subscribe();

        let req = h
            .orchestrator
            .request_signature(input(h.vault_id, b"hello vault"))
            .await
            .unwrap();
        assert_eq!(req.status, SignatureStatus::Pending);
        assert!(req.expires_at > req.created_at);

        assert_eq!(
            h.orchestrator.dispatch(req.id).await.unwrap(),
            SignatureStatus::Completed
        );
        let done = h.orchestrator.get_signature_status(req.id).await.unwrap();
        assert_eq!(done.signature, Some(h.signer.expected_signature(b"hello vault")));
        assert_eq!(done.key_id.as_deref(), Some("test-key"));

        let event = events.recv().await.unwrap();
        assert_eq!(event.topic, TOPIC_SIGNATURES);
        assert_eq!(event.value["status"], "COMPLETED");

        // Completed is terminal
        assert_eq!(
            h.orchestrator.dispatch(req.id).await.unwrap(),
            SignatureStatus::Completed
        );
        assert_eq!(h.signer.sign_count(), 1);
    }

    #[tokio::test]
    async fn test_signer_failure_not_retried() {
        let h = harness().await;
        h.signer
            .set_failure(Some(SignerError::Rejected("policy denied".into())));
        let req = h
            .orchestrator
            .request_signature(input(h.vault_id, b"abc"))
            .await
            .unwrap();

        assert_eq!(h.orchestrator.dispatch(req.id).await.unwrap(), SignatureStatus::Failed);
        assert_eq!(h.orchestrator.dispatch(req.id).await.unwrap(), SignatureStatus::Failed);
        assert_eq!(h.signer.sign_count(), 1);

        let failed = h.orchestrator.get_signature_status(req.id).await.unwrap();
        assert!(failed.signature.is_none());
        assert!(failed.error.unwrap().contains("policy denied"));
    }

    #[tokio::test]
    async fn test_expired_before_signing() {
        let h = harness().await;
        let req = insert_expiring_in(&h, -1_000).await;

        assert_eq!(h.orchestrator.dispatch(req.id).await.unwrap(), SignatureStatus::Expired);
        assert_eq!(h.signer.sign_count(), 0);
    }

    #[tokio::test]
    async fn test_expired_while_signing_never_completes() {
        let h = harness().await;
        h.signer.set_latency(Some(Duration::from_millis(200)));
        let req = insert_expiring_in(&h, 50).await;

        assert_eq!(h.orchestrator.dispatch(req.id).await.unwrap(), SignatureStatus::Expired);
        let expired = h.orchestrator.get_signature_status(req.id).await.unwrap();
        assert!(expired.signature.is_none());
        assert_eq!(h.signer.sign_count(), 1);
    }

    #[tokio::test]
    async fn test_concurrent_dispatch_signs_once() {
        let h = harness().await;
        h.signer.set_latency(Some(Duration::from_millis(50)));
        let req = h
            .orchestrator
            .request_signature(input(h.vault_id, b"abc"))
            .await
            .unwrap();

        let (a, b) = tokio::join!(h.orchestrator.dispatch(req.id), h.orchestrator.dispatch(req.id));
        a.unwrap();
        b.unwrap();
        assert_eq!(h.signer.sign_count(), 1);
        assert_eq!(
            h.orchestrator.get_signature_status(req.id).await.unwrap().status,
            SignatureStatus::Completed
        );
    }

    #[tokio::test]
    async fn test_recover_interrupted_signing() {
        let h = harness().await;

        let live = insert_expiring_in(&h, 60_000).await;
        let mut signing = live.next_version();
        signing.status = SignatureStatus::Signing;
        assert!(h.store.cas_signature(&signing, SignatureStatus::Pending, live.version).await.unwrap());
        assert_eq!(
            h.orchestrator.recover_interrupted(signing).await.unwrap(),
            SignatureStatus::Failed
        );

        let overdue = insert_expiring_in(&h, -1_000).await;
        let mut signing = overdue.next_version();
        signing.status = SignatureStatus::Signing;
        assert!(h.store.cas_signature(&signing, SignatureStatus::Pending, overdue.version).await.unwrap());
        assert_eq!(
            h.orchestrator.recover_interrupted(signing).await.unwrap(),
            SignatureStatus::Expired
        );
    }
}

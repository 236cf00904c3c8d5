//! End-to-end flows through the public service surface with the worker
//! pool and reconciliation poller running against mock collaborators.

use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;

use vault_custody::chain::{ChainRegistry, MockChainAdapter, MockSubmit};
use vault_custody::config::AppConfig;
use vault_custody::events::{BroadcastPublisher, TOPIC_SIGNATURES, TOPIC_TRANSACTIONS};
use vault_custody::signature::{RequestSignatureInput, SignatureFilter};
use vault_custody::signer::MockSigner;
use vault_custody::store::{CustodyStore, MemoryStore};
use vault_custody::transaction::{CreateTransactionRequest, TransactionFilter};
use vault_custody::vault::{CreateVaultRequest, VaultFilter};
use vault_custody::{
    BlockchainType, CustodyError, CustodyRuntime, CustodyService, OrganizationId,
    SignatureRequestId, SignatureStatus, SignatureType, TransactionId, TransactionStatus, Vault,
    VaultStatus,
};

const RECIPIENT: &str = "0xabc0000000000000000000000000000000000123";
const WAIT: Duration = Duration::from_secs(10);

struct TestEnv {
    runtime: CustodyRuntime,
    store: Arc<MemoryStore>,
    eth: Arc<MockChainAdapter>,
    signer: Arc<MockSigner>,
    events: Arc<BroadcastPublisher>,
}

impl TestEnv {
    fn service(&self) -> &CustodyService {
        self.runtime.service()
    }
}

fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.orchestrator.max_attempts = 3;
    config.orchestrator.backoff_base_ms = 5;
    config.orchestrator.backoff_max_ms = 20;
    config.orchestrator.backoff_jitter = false;
    config.orchestrator.call_timeout_ms = 2_000;
    config.workers.worker_count = 4;
    config.poller.interval_ms = 20;
    config
}

fn start_env(config: AppConfig) -> TestEnv {
    let store = Arc::new(MemoryStore::new());
    let eth = Arc::new(MockChainAdapter::new(BlockchainType::Ethereum));
    let xrp = Arc::new(MockChainAdapter::new(BlockchainType::Xrp));
    let chains = ChainRegistry::new().with(eth.clone(), 3).with(xrp, 1);
    let signer = Arc::new(MockSigner::new("integration-key"));
    let events = Arc::new(BroadcastPublisher::new(256));

    let mut runtime =
        CustodyRuntime::build(&config, store.clone(), chains, signer.clone(), events.clone());
    runtime.start();

    TestEnv {
        runtime,
        store,
        eth,
        signer,
        events,
    }
}

async fn acme_vault(service: &CustodyService) -> Vault {
    service
        .create_vault(CreateVaultRequest {
            organization_id: OrganizationId::new(),
            name: "Acme Vault".into(),
            blockchain_type: BlockchainType::Ethereum,
        })
        .await
        .unwrap()
}

fn transfer(vault: &Vault, amount: &str) -> CreateTransactionRequest {
    CreateTransactionRequest {
        vault_id: vault.id,
        from_address: vault.address.clone(),
        to_address: RECIPIENT.into(),
        amount: amount.into(),
    }
}

async fn wait_for_tx(
    service: &CustodyService,
    id: TransactionId,
    wanted: TransactionStatus,
) -> vault_custody::TransactionRecord {
    tokio::time::timeout(WAIT, async {
        loop {
            let tx = service.get_transaction(id).await.unwrap();
            if tx.status == wanted {
                return tx;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("transaction {} never reached {}", id, wanted))
}

async fn wait_for_signature(
    service: &CustodyService,
    id: SignatureRequestId,
) -> vault_custody::SignatureRequest {
    tokio::time::timeout(WAIT, async {
        loop {
            let req = service.get_signature_status(id).await.unwrap();
            if req.status.is_terminal() {
                return req;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("signature request {} never finished", id))
}

#[tokio::test]
async fn test_vault_to_confirmed_transfer() {
    let env = start_env(test_config());
    let service = env.service();
    let mut events = env.events.subscribe();

    let vault = acme_vault(service).await;
    assert_eq!(vault.status, VaultStatus::Active);
    assert!(vault.address.starts_with("0x"));
    assert!(vault.address[2..].chars().all(|c| c.is_ascii_hexdigit()));
    env.eth.set_balance(&vault.address, Decimal::new(985, 1));

    let created = service
        .create_transaction(transfer(&vault, "1.5"))
        .await
        .unwrap();
    assert_eq!(created.status, TransactionStatus::Pending);
    assert_eq!(created.amount, Decimal::new(15, 1));

    let submitted = wait_for_tx(service, created.id, TransactionStatus::Submitted).await;
    let hash = submitted.chain_tx_hash.clone().unwrap();
    assert!(!hash.is_empty());

    let confirmed = wait_for_tx(service, created.id, TransactionStatus::Confirmed).await;
    assert_eq!(confirmed.chain_tx_hash, Some(hash));
    assert!(confirmed.confirmations >= 3);

    let event = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event.topic, TOPIC_TRANSACTIONS);
    assert_eq!(event.key, created.id.to_string());
    assert_eq!(event.value["status"], "CONFIRMED");

    // Address never changes, balance cache refreshed by reconciliation
    let reloaded = tokio::time::timeout(WAIT, async {
        loop {
            let v = service.get_vault(vault.id).await.unwrap();
            if v.balance_updated_at.is_some() {
                return v;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(reloaded.address, vault.address);
    assert_eq!(reloaded.balance, Decimal::new(985, 1));

    let live = service.get_vault_balance(vault.id).await.unwrap();
    assert_eq!(live.balance, Decimal::new(985, 1));

    env.runtime.shutdown().await;
}

#[tokio::test]
async fn test_empty_signature_payload_is_rejected() {
    let env = start_env(test_config());
    let service = env.service();
    let vault = acme_vault(service).await;

    let result = service
        .request_signature(RequestSignatureInput {
            vault_id: vault.id,
            data_to_sign: Vec::new(),
            signature_type: SignatureType::Ed25519,
            ttl_secs: None,
        })
        .await;
    assert!(matches!(result, Err(CustodyError::Validation(_))));

    let page = service
        .list_signature_requests(&SignatureFilter::default(), 1, 20)
        .await
        .unwrap();
    assert_eq!(page.total, 0);
    assert_eq!(env.signer.sign_count(), 0);

    env.runtime.shutdown().await;
}

#[tokio::test]
async fn test_signature_completes_and_is_published() {
    let env = start_env(test_config());
    let service = env.service();
    let mut events = env.events.subscribe();
    let vault = acme_vault(service).await;

    let req = service
        .request_signature(RequestSignatureInput {
            vault_id: vault.id,
            data_to_sign: b"withdrawal approval #42".to_vec(),
            signature_type: SignatureType::EcdsaSecp256k1,
            ttl_secs: Some(60),
        })
        .await
        .unwrap();
    assert_eq!(req.status, SignatureStatus::Pending);

    let done = wait_for_signature(service, req.id).await;
    assert_eq!(done.status, SignatureStatus::Completed);
    assert_eq!(
        done.signature,
        Some(env.signer.expected_signature(b"withdrawal approval #42"))
    );

    let event = tokio::time::timeout(WAIT, events.recv()).await.unwrap().unwrap();
    assert_eq!(event.topic, TOPIC_SIGNATURES);
    assert_eq!(event.value["status"], "COMPLETED");

    env.runtime.shutdown().await;
}

#[tokio::test]
async fn test_signature_expiring_mid_flight_never_completes() {
    let env = start_env(test_config());
    let service = env.service();
    let vault = acme_vault(service).await;
    env.signer.set_latency(Some(Duration::from_millis(1_500)));

    let req = service
        .request_signature(RequestSignatureInput {
            vault_id: vault.id,
            data_to_sign: vec![0x01, 0x02],
            signature_type: SignatureType::Ed25519,
            ttl_secs: Some(1),
        })
        .await
        .unwrap();

    let done = wait_for_signature(service, req.id).await;
    assert_eq!(done.status, SignatureStatus::Expired);
    assert!(done.signature.is_none());

    // Stays expired
    tokio::time::sleep(Duration::from_millis(100)).await;
    let again = service.get_signature_status(req.id).await.unwrap();
    assert_eq!(again.status, SignatureStatus::Expired);

    env.runtime.shutdown().await;
}

#[tokio::test]
async fn test_retry_budget_exhaustion_fails_after_exactly_n_attempts() {
    let env = start_env(test_config());
    let service = env.service();
    let vault = acme_vault(service).await;
    env.eth.push_submits([
        MockSubmit::Transient("node busy 1".into()),
        MockSubmit::Transient("node busy 2".into()),
        MockSubmit::Transient("node busy 3".into()),
    ]);

    let tx = service
        .create_transaction(transfer(&vault, "0.1"))
        .await
        .unwrap();
    let failed = wait_for_tx(service, tx.id, TransactionStatus::Failed).await;

    assert_eq!(failed.attempt_count, 3);
    assert!(failed.last_error.unwrap().contains("node busy 3"));
    assert!(failed.chain_tx_hash.is_none());
    assert_eq!(env.eth.submit_count(), 3);

    env.runtime.shutdown().await;
}

#[tokio::test]
async fn test_duplicate_scheduling_submits_each_transfer_once() {
    let mut config = test_config();
    // Poller re-enqueues every Pending record on every tick, racing the workers
    config.poller.stale_pending_secs = 0;
    config.poller.interval_ms = 1;
    config.workers.worker_count = 8;
    let env = start_env(config);
    let service = env.service();
    let vault = acme_vault(service).await;
    env.eth.set_latency(Some(Duration::from_millis(20)));

    let created = futures::future::join_all(
        (0..10).map(|i| service.create_transaction(transfer(&vault, &format!("0.{}", i + 1)))),
    )
    .await;
    let ids: Vec<TransactionId> = created.into_iter().map(|r| r.unwrap().id).collect();

    for id in &ids {
        wait_for_tx(service, *id, TransactionStatus::Confirmed).await;
    }
    assert_eq!(env.eth.submit_count(), ids.len());
    assert_eq!(env.eth.broadcast_count(), ids.len());

    for id in &ids {
        let history = env.store.transaction_history(*id);
        for pair in history.windows(2) {
            assert!(
                pair[0] == pair[1] || pair[0].can_transition_to(pair[1]),
                "illegal transition in {:?}",
                history
            );
        }
        assert!(!history.windows(2).any(|w| {
            w[0] == TransactionStatus::Pending && w[1] == TransactionStatus::Confirmed
        }));
    }

    env.runtime.shutdown().await;
}

#[tokio::test]
async fn test_dropped_transaction_is_rebroadcast_with_same_hash() {
    let mut config = test_config();
    config.orchestrator.dropped_grace_secs = 0;
    let env = start_env(config);
    let service = env.service();
    let vault = acme_vault(service).await;
    // Never reach finality on its own
    env.eth.set_confirmations_per_poll(0);

    let tx = service
        .create_transaction(transfer(&vault, "3"))
        .await
        .unwrap();
    let submitted = wait_for_tx(service, tx.id, TransactionStatus::Submitted).await;
    let hash = submitted.chain_tx_hash.clone().unwrap();

    env.eth.drop_transaction(&hash);
    tokio::time::timeout(WAIT, async {
        loop {
            let current = service.get_transaction(tx.id).await.unwrap();
            if current.attempt_count >= 2 && current.status == TransactionStatus::Submitted {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    env.eth.set_confirmations_per_poll(1);
    let confirmed = wait_for_tx(service, tx.id, TransactionStatus::Confirmed).await;
    assert_eq!(confirmed.chain_tx_hash, Some(hash));
    assert_eq!(env.eth.broadcast_count(), 1);

    env.runtime.shutdown().await;
}

#[tokio::test]
async fn test_unknown_outcome_is_resolved_without_double_submit() {
    let env = start_env(test_config());
    let service = env.service();
    let vault = acme_vault(service).await;
    env.eth.push_submit(MockSubmit::UnknownAccepted);

    let tx = service
        .create_transaction(transfer(&vault, "0.5"))
        .await
        .unwrap();
    let confirmed = wait_for_tx(service, tx.id, TransactionStatus::Confirmed).await;

    assert_eq!(confirmed.attempt_count, 1);
    assert_eq!(env.eth.submit_count(), 1);
    assert!(env.eth.lookup_count() >= 1);

    env.runtime.shutdown().await;
}

#[tokio::test]
async fn test_delete_vault_with_open_work_conflicts() {
    let env = start_env(test_config());
    let service = env.service();
    let vault = acme_vault(service).await;
    // Hold the transaction in SUBMITTED
    env.eth.set_confirmations_per_poll(0);

    let tx = service
        .create_transaction(transfer(&vault, "1"))
        .await
        .unwrap();
    wait_for_tx(service, tx.id, TransactionStatus::Submitted).await;

    assert!(matches!(
        service.delete_vault(vault.id).await,
        Err(CustodyError::Conflict(_))
    ));

    env.eth.set_confirmations_per_poll(3);
    wait_for_tx(service, tx.id, TransactionStatus::Confirmed).await;

    service.delete_vault(vault.id).await.unwrap();
    assert!(matches!(
        service.get_vault(vault.id).await,
        Err(CustodyError::NotFound(_))
    ));

    // Terminal transactions stay as the audit trail
    let kept = service
        .list_transactions(
            &TransactionFilter {
                vault_id: Some(vault.id),
                status: None,
            },
            1,
            10,
        )
        .await
        .unwrap();
    assert_eq!(kept.total, 1);
    assert_eq!(kept.items[0].status, TransactionStatus::Confirmed);

    env.runtime.shutdown().await;
}

#[tokio::test]
async fn test_list_vaults_by_organization() {
    let env = start_env(test_config());
    let service = env.service();
    let org = OrganizationId::new();

    for (name, chain) in [
        ("eth-hot", BlockchainType::Ethereum),
        ("xrp-hot", BlockchainType::Xrp),
    ] {
        service
            .create_vault(CreateVaultRequest {
                organization_id: org,
                name: name.into(),
                blockchain_type: chain,
            })
            .await
            .unwrap();
    }
    acme_vault(service).await;

    let page = service
        .list_vaults(
            &VaultFilter {
                organization_id: Some(org),
                ..VaultFilter::default()
            },
            1,
            10,
        )
        .await
        .unwrap();
    assert_eq!(page.total, 2);
    assert!(page.items.iter().all(|v| v.organization_id == org));

    // UTXO is a known chain but not configured here
    assert!(matches!(
        service
            .create_vault(CreateVaultRequest {
                organization_id: org,
                name: "btc".into(),
                blockchain_type: BlockchainType::Utxo,
            })
            .await,
        Err(CustodyError::Validation(_))
    ));

    env.runtime.shutdown().await;
}

#[tokio::test]
async fn test_recovery_after_restart() {
    let config = test_config();
    let store = Arc::new(MemoryStore::new());
    let eth = Arc::new(MockChainAdapter::new(BlockchainType::Ethereum));
    let signer = Arc::new(MockSigner::new("k"));

    // First process: records created, never dispatched
    let first = CustodyRuntime::build(
        &config,
        store.clone(),
        ChainRegistry::new().with(eth.clone(), 1),
        signer.clone(),
        Arc::new(BroadcastPublisher::default()),
    );
    let vault = acme_vault(first.service()).await;
    let tx = first
        .service()
        .create_transaction(transfer(&vault, "2"))
        .await
        .unwrap();
    first.shutdown().await;
    assert_eq!(eth.submit_count(), 0);

    // Second process over the same store
    let mut second = CustodyRuntime::build(
        &config,
        store.clone(),
        ChainRegistry::new().with(eth.clone(), 1),
        signer,
        Arc::new(BroadcastPublisher::default()),
    );
    let report = second.recover().await.unwrap();
    assert!(report.requeued >= 1);
    second.start();

    wait_for_tx(second.service(), tx.id, TransactionStatus::Confirmed).await;
    assert_eq!(eth.submit_count(), 1);
    assert!(store.get_transaction(tx.id).await.unwrap().is_some());

    second.shutdown().await;
}

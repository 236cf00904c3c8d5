//! Scriptable in-process chain used by tests and `mock: true` chains.
//!
//! Submissions are hashed the same way the real network would hash them
//! and recorded per submission id, so duplicate broadcasts of one payload
//! are deduplicated just like a node or custodian would.

use async_trait::async_trait;
use rust_decimal::Decimal;
use sha2::{Digest, Sha256};
use sha3::Keccak256;
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use super::error::ChainError;
use super::validation::BECH32_CHARSET;
use super::{
    ChainAdapter, EthereumAdapter, OutcomeResolution, ReceiptStatus, SignedPayload,
    TransferIntent, UnsignedTransfer, XrpAdapter,
};
use crate::core_types::{BlockchainType, SignatureType};

/// Scripted outcome of the next `submit` call
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockSubmit {
    Accept,
    /// Node busy; nothing broadcast
    Transient(String),
    /// Network rejection
    Permanent(String),
    /// Broadcast went through but the caller only sees a timeout
    UnknownAccepted,
    /// Request was lost before reaching the network; caller sees a timeout
    UnknownLost,
}

#[derive(Debug, Clone)]
struct MockTx {
    confirmations: u64,
    dropped: bool,
    reverted: Option<String>,
}

#[derive(Debug, Default)]
struct MockState {
    script: VecDeque<MockSubmit>,
    /// submission id -> tx hash
    seen: HashMap<String, String>,
    txs: HashMap<String, MockTx>,
    balances: HashMap<String, Decimal>,
}

#[derive(Debug)]
pub struct MockChainAdapter {
    chain: BlockchainType,
    resolution: OutcomeResolution,
    signature_scheme: SignatureType,
    state: Mutex<MockState>,
    confirmations_per_poll: Mutex<u64>,
    fee: Mutex<Option<Decimal>>,
    latency: Mutex<Option<Duration>>,
    fail_address_generation: Mutex<bool>,
    fail_reads: Mutex<bool>,
    encode_failure: Mutex<Option<ChainError>>,
    submit_count: AtomicUsize,
    receipt_count: AtomicUsize,
    lookup_count: AtomicUsize,
}

impl MockChainAdapter {
    pub fn new(chain: BlockchainType) -> Self {
        let resolution = match chain {
            BlockchainType::Utxo => OutcomeResolution::IdempotentResubmit,
            _ => OutcomeResolution::Lookup,
        };
        Self {
            chain,
            resolution,
            signature_scheme: SignatureType::Ed25519,
            state: Mutex::new(MockState::default()),
            confirmations_per_poll: Mutex::new(1),
            fee: Mutex::new(Some(Decimal::new(21, 5))),
            latency: Mutex::new(None),
            fail_address_generation: Mutex::new(false),
            fail_reads: Mutex::new(false),
            encode_failure: Mutex::new(None),
            submit_count: AtomicUsize::new(0),
            receipt_count: AtomicUsize::new(0),
            lookup_count: AtomicUsize::new(0),
        }
    }

    pub fn with_resolution(mut self, resolution: OutcomeResolution) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn with_signature_scheme(mut self, scheme: SignatureType) -> Self {
        self.signature_scheme = scheme;
        self
    }

    // === Scripting ===

    /// Queue outcomes for upcoming `submit` calls (default is `Accept`)
    pub fn push_submit(&self, outcome: MockSubmit) {
        self.state.lock().unwrap().script.push_back(outcome);
    }

    pub fn push_submits(&self, outcomes: impl IntoIterator<Item = MockSubmit>) {
        self.state.lock().unwrap().script.extend(outcomes);
    }

    /// Confirmations added on every receipt poll
    pub fn set_confirmations_per_poll(&self, n: u64) {
        *self.confirmations_per_poll.lock().unwrap() = n;
    }

    pub fn set_fee(&self, fee: Option<Decimal>) {
        *self.fee.lock().unwrap() = fee;
    }

    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock().unwrap() = latency;
    }

    pub fn set_fail_address_generation(&self, fail: bool) {
        *self.fail_address_generation.lock().unwrap() = fail;
    }

    /// Make balance / receipt / lookup reads fail with a transport error
    pub fn set_fail_reads(&self, fail: bool) {
        *self.fail_reads.lock().unwrap() = fail;
    }

    /// Every `encode_transfer` fails with `error` (until cleared)
    pub fn set_encode_failure(&self, error: Option<ChainError>) {
        *self.encode_failure.lock().unwrap() = error;
    }

    pub fn set_balance(&self, address: &str, amount: Decimal) {
        self.state
            .lock()
            .unwrap()
            .balances
            .insert(address.to_string(), amount);
    }

    /// Evict a transaction from the mempool / chain (reorg)
    pub fn drop_transaction(&self, tx_hash: &str) {
        if let Some(tx) = self.state.lock().unwrap().txs.get_mut(tx_hash) {
            tx.dropped = true;
            tx.confirmations = 0;
        }
    }

    pub fn revert_transaction(&self, tx_hash: &str, reason: &str) {
        if let Some(tx) = self.state.lock().unwrap().txs.get_mut(tx_hash) {
            tx.reverted = Some(reason.to_string());
        }
    }

    // === Inspection ===

    pub fn submit_count(&self) -> usize {
        self.submit_count.load(Ordering::SeqCst)
    }

    pub fn receipt_count(&self) -> usize {
        self.receipt_count.load(Ordering::SeqCst)
    }

    pub fn lookup_count(&self) -> usize {
        self.lookup_count.load(Ordering::SeqCst)
    }

    /// Distinct transactions the network knows about
    pub fn broadcast_count(&self) -> usize {
        self.state.lock().unwrap().txs.len()
    }

    pub fn is_known(&self, tx_hash: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .txs
            .get(tx_hash)
            .is_some_and(|tx| !tx.dropped)
    }

    /// Hash the network assigns to `raw`
    pub fn hash_of(&self, raw: &[u8]) -> String {
        match self.chain {
            BlockchainType::Ethereum => EthereumAdapter::expected_hash(raw),
            BlockchainType::Xrp => XrpAdapter::expected_hash(raw),
            BlockchainType::Utxo => hex::encode(Sha256::digest(Sha256::digest(raw))),
        }
    }

    async fn simulate_latency(&self) {
        let latency = *self.latency.lock().unwrap();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
    }

    fn check_reads(&self) -> Result<(), ChainError> {
        if *self.fail_reads.lock().unwrap() {
            return Err(ChainError::Transport("mock read failure".to_string()));
        }
        Ok(())
    }

    fn record(state: &mut MockState, submission_id: &str, hash: &str) {
        state
            .seen
            .insert(submission_id.to_string(), hash.to_string());
        let tx = state.txs.entry(hash.to_string()).or_insert(MockTx {
            confirmations: 0,
            dropped: false,
            reverted: None,
        });
        tx.dropped = false;
    }

    fn fresh_address(&self) -> String {
        let seed = uuid::Uuid::new_v4();
        let digest = Keccak256::digest(seed.as_bytes());
        match self.chain {
            BlockchainType::Ethereum => format!("0x{}", hex::encode(&digest[..20])),
            BlockchainType::Xrp => {
                // Account id with a zero type prefix encodes to a leading 'r'
                let mut body = vec![0u8];
                body.extend_from_slice(&digest[..20]);
                let checksum = Sha256::digest(Sha256::digest(&body));
                body.extend_from_slice(&checksum[..4]);
                bs58::encode(body)
                    .with_alphabet(bs58::Alphabet::RIPPLE)
                    .into_string()
            }
            BlockchainType::Utxo => {
                let charset = BECH32_CHARSET.as_bytes();
                let data: String = digest
                    .iter()
                    .map(|b| charset[(*b as usize) % charset.len()] as char)
                    .collect();
                format!("bc1q{}", data)
            }
        }
    }
}

#[async_trait]
impl ChainAdapter for MockChainAdapter {
    fn chain(&self) -> BlockchainType {
        self.chain
    }

    fn resolution(&self) -> OutcomeResolution {
        self.resolution
    }

    fn signature_scheme(&self) -> SignatureType {
        self.signature_scheme
    }

    async fn generate_address(&self) -> Result<String, ChainError> {
        self.simulate_latency().await;
        if *self.fail_address_generation.lock().unwrap() {
            return Err(ChainError::Transport("mock address service down".to_string()));
        }
        Ok(self.fresh_address())
    }

    async fn get_balance(&self, address: &str) -> Result<Decimal, ChainError> {
        if !self.validate_address(address) {
            return Err(ChainError::InvalidAddress(address.to_string()));
        }
        self.simulate_latency().await;
        self.check_reads()?;
        Ok(self
            .state
            .lock()
            .unwrap()
            .balances
            .get(address)
            .copied()
            .unwrap_or(Decimal::ZERO))
    }

    async fn estimate_fee(&self, _intent: &TransferIntent) -> Result<Decimal, ChainError> {
        self.check_reads()?;
        (*self.fee.lock().unwrap())
            .ok_or_else(|| ChainError::NodeBusy("mock fee oracle unavailable".to_string()))
    }

    async fn encode_transfer(
        &self,
        intent: &TransferIntent,
        _public_key: Option<&[u8]>,
    ) -> Result<UnsignedTransfer, ChainError> {
        if let Some(error) = self.encode_failure.lock().unwrap().clone() {
            return Err(error);
        }
        serde_json::to_vec(intent)
            .map(UnsignedTransfer::plain)
            .map_err(|e| ChainError::Parse(e.to_string()))
    }

    async fn submit(&self, payload: &SignedPayload) -> Result<String, ChainError> {
        self.submit_count.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;

        let hash = self.hash_of(&payload.raw);
        let mut state = self.state.lock().unwrap();

        // Identical payload already live on the network
        if state.txs.get(&hash).is_some_and(|tx| !tx.dropped) {
            return Ok(hash);
        }

        match state.script.pop_front().unwrap_or(MockSubmit::Accept) {
            MockSubmit::Accept => {
                Self::record(&mut state, &payload.submission_id, &hash);
                Ok(hash)
            }
            MockSubmit::Transient(msg) => Err(ChainError::NodeBusy(msg)),
            MockSubmit::Permanent(msg) => Err(ChainError::Rejected(msg)),
            MockSubmit::UnknownAccepted => {
                Self::record(&mut state, &payload.submission_id, &hash);
                Err(ChainError::UnknownOutcome("mock timeout after send".to_string()))
            }
            MockSubmit::UnknownLost => Err(ChainError::UnknownOutcome(
                "mock timeout before send".to_string(),
            )),
        }
    }

    async fn get_receipt(&self, tx_hash: &str) -> Result<ReceiptStatus, ChainError> {
        self.receipt_count.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        self.check_reads()?;

        let step = *self.confirmations_per_poll.lock().unwrap();
        let mut state = self.state.lock().unwrap();
        let Some(tx) = state.txs.get_mut(tx_hash) else {
            return Ok(ReceiptStatus::NotFound);
        };
        if tx.dropped {
            return Ok(ReceiptStatus::NotFound);
        }
        if let Some(reason) = &tx.reverted {
            return Ok(ReceiptStatus::Reverted(reason.clone()));
        }
        tx.confirmations += step;
        Ok(ReceiptStatus::Included {
            confirmations: tx.confirmations,
            finalized: false,
        })
    }

    async fn find_submission(&self, payload: &SignedPayload) -> Result<Option<String>, ChainError> {
        self.lookup_count.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        self.check_reads()?;

        let state = self.state.lock().unwrap();
        Ok(state
            .seen
            .get(&payload.submission_id)
            .filter(|hash| state.txs.get(*hash).is_some_and(|tx| !tx.dropped))
            .cloned())
    }
}

//! Ethereum Adapter
//!
//! Account-based chain reached over JSON-RPC (Geth / Anvil compatible).
//! The transaction hash is the Keccak-256 of the raw signed blob, so an
//! ambiguous broadcast is resolved with `eth_getTransactionByHash`.
//!
//! Transfers are legacy EIP-155 transactions. The signer receives the
//! Keccak-256 of the unsigned RLP list and must answer with a 65-byte
//! recoverable secp256k1 signature `r || s || v`, where `v` is the recovery
//! id (0/1, or 27/28).

use async_trait::async_trait;
use num_bigint::BigUint;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{Value, json};
use sha3::{Digest, Keccak256};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::error::ChainError;
use super::rlp;
use super::rpc::{JsonRpcClient, RpcFailure};
use super::{
    ChainAdapter, OutcomeResolution, ReceiptStatus, SignedPayload, TransferIntent,
    UnsignedTransfer,
};
use crate::config::EthereumConfig;
use crate::core_types::{BlockchainType, SignatureType};
use crate::money::{from_base_units, parse_hex_quantity, to_base_units};

/// Gas used by a plain value transfer
const TRANSFER_GAS: u64 = 21_000;

/// Items of an unsigned EIP-155 list: six transaction fields plus chain id, 0, 0
const UNSIGNED_ITEMS: usize = 9;

/// Receipt structure from RPC
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct EthReceipt {
    block_number: Option<String>,
    status: Option<String>,
}

#[derive(Debug)]
pub struct EthereumAdapter {
    rpc: JsonRpcClient,
    keystore_passphrase: String,
}

impl EthereumAdapter {
    pub fn new(config: &EthereumConfig) -> Result<Self, ChainError> {
        info!(rpc_url = %config.rpc_url, "Initializing Ethereum adapter");
        let rpc = JsonRpcClient::new(
            config.rpc_url.clone(),
            Duration::from_millis(config.timeout_ms),
        )?;
        Ok(Self {
            rpc,
            keystore_passphrase: config.keystore_passphrase.clone(),
        })
    }

    /// Transaction hash the network will assign to `raw`
    pub fn expected_hash(raw: &[u8]) -> String {
        format!("0x{}", hex::encode(Keccak256::digest(raw)))
    }

    fn parse_quantity(value: &str) -> Result<Decimal, ChainError> {
        let wei = parse_hex_quantity(value).map_err(|e| ChainError::Parse(e.to_string()))?;
        from_base_units(&wei, BlockchainType::Ethereum.decimals())
            .map_err(|e| ChainError::Parse(e.to_string()))
    }

    fn wei(amount: Decimal) -> Result<u128, ChainError> {
        to_base_units(amount, BlockchainType::Ethereum.decimals())
            .map_err(|e| ChainError::Rejected(format!("amount {}: {}", amount, e)))
    }

    fn address_bytes(address: &str) -> Result<[u8; 20], ChainError> {
        address
            .strip_prefix("0x")
            .and_then(|digits| hex::decode(digits).ok())
            .and_then(|bytes| bytes.try_into().ok())
            .ok_or_else(|| ChainError::InvalidAddress(address.to_string()))
    }

    /// Unsigned EIP-155 transfer; the signer signs its Keccak-256
    pub fn unsigned_transfer(
        nonce: u64,
        gas_price: &BigUint,
        to: &[u8; 20],
        value: u128,
        chain_id: u64,
    ) -> UnsignedTransfer {
        let body = rlp::encode_list(&[
            rlp::uint_bytes(nonce.into()),
            rlp::trim_leading_zeros(&gas_price.to_bytes_be()).to_vec(),
            rlp::uint_bytes(TRANSFER_GAS.into()),
            to.to_vec(),
            rlp::uint_bytes(value),
            Vec::new(),
            rlp::uint_bytes(chain_id.into()),
            Vec::new(),
            Vec::new(),
        ]);
        UnsignedTransfer {
            signing_payload: Keccak256::digest(&body).to_vec(),
            body,
        }
    }

    /// Split `r || s || v` and normalize `v` to a recovery id
    fn split_signature(signature: &[u8]) -> Result<(&[u8], &[u8], u8), ChainError> {
        let [rs @ .., v] = signature else {
            return Err(ChainError::InvalidSignature("empty signature".into()));
        };
        if rs.len() != 64 {
            return Err(ChainError::InvalidSignature(format!(
                "expected 65-byte recoverable signature, got {} bytes",
                signature.len()
            )));
        }
        let recovery_id = match *v {
            0 | 1 => *v,
            27 | 28 => *v - 27,
            other => {
                return Err(ChainError::InvalidSignature(format!(
                    "recovery id {} out of range",
                    other
                )));
            }
        };
        Ok((&rs[..32], &rs[32..], recovery_id))
    }

    fn parse_u64(value: &str) -> Result<u64, ChainError> {
        let digits = value
            .strip_prefix("0x")
            .ok_or_else(|| ChainError::Parse(format!("missing 0x prefix: {}", value)))?;
        u64::from_str_radix(digits, 16).map_err(|e| ChainError::Parse(e.to_string()))
    }

    /// Map a node rejection message of `eth_sendRawTransaction`
    fn classify_send_error(message: &str, expected: &str) -> Result<String, ChainError> {
        let lower = message.to_ascii_lowercase();
        if lower.contains("already known") || lower.contains("known transaction") {
            // Identical blob already in the pool: our earlier attempt got through
            return Ok(expected.to_string());
        }
        if lower.contains("nonce too low") {
            // Might be our own transaction already mined
            return Err(ChainError::UnknownOutcome(message.to_string()));
        }
        if lower.contains("insufficient funds") {
            return Err(ChainError::InsufficientFunds(message.to_string()));
        }
        if lower.contains("invalid sender") || lower.contains("invalid signature") {
            return Err(ChainError::InvalidSignature(message.to_string()));
        }
        if lower.contains("txpool is full") || lower.contains("busy") {
            return Err(ChainError::NodeBusy(message.to_string()));
        }
        Err(ChainError::Rejected(message.to_string()))
    }
}

#[async_trait]
impl ChainAdapter for EthereumAdapter {
    fn chain(&self) -> BlockchainType {
        BlockchainType::Ethereum
    }

    fn resolution(&self) -> OutcomeResolution {
        OutcomeResolution::Lookup
    }

    fn signature_scheme(&self) -> SignatureType {
        SignatureType::EcdsaSecp256k1
    }

    async fn generate_address(&self) -> Result<String, ChainError> {
        let address: String = self
            .rpc
            .call_required("personal_newAccount", json!([self.keystore_passphrase]))
            .await?;
        if !self.validate_address(&address) {
            return Err(ChainError::Parse(format!(
                "node returned malformed address: {}",
                address
            )));
        }
        Ok(address)
    }

    async fn get_balance(&self, address: &str) -> Result<Decimal, ChainError> {
        if !self.validate_address(address) {
            return Err(ChainError::InvalidAddress(address.to_string()));
        }
        let balance: String = self
            .rpc
            .call_required("eth_getBalance", json!([address, "latest"]))
            .await?;
        Self::parse_quantity(&balance)
    }

    async fn estimate_fee(&self, _intent: &TransferIntent) -> Result<Decimal, ChainError> {
        let gas_price: String = self.rpc.call_required("eth_gasPrice", json!([])).await?;
        let price = parse_hex_quantity(&gas_price).map_err(|e| ChainError::Parse(e.to_string()))?;
        let fee = price * TRANSFER_GAS;
        from_base_units(&fee, BlockchainType::Ethereum.decimals())
            .map_err(|e| ChainError::Parse(e.to_string()))
    }

    async fn encode_transfer(
        &self,
        intent: &TransferIntent,
        _public_key: Option<&[u8]>,
    ) -> Result<UnsignedTransfer, ChainError> {
        let to = Self::address_bytes(&intent.to)?;
        let value = Self::wei(intent.amount)?;
        // The recorded fee was priced at TRANSFER_GAS, so it fixes the gas price
        let gas_price = match intent.fee {
            Some(fee) => BigUint::from(Self::wei(fee)?) / TRANSFER_GAS,
            None => {
                let price: String = self.rpc.call_required("eth_gasPrice", json!([])).await?;
                parse_hex_quantity(&price).map_err(|e| ChainError::Parse(e.to_string()))?
            }
        };
        let nonce: String = self
            .rpc
            .call_required("eth_getTransactionCount", json!([intent.from, "pending"]))
            .await?;
        let chain_id: String = self.rpc.call_required("eth_chainId", json!([])).await?;

        Ok(Self::unsigned_transfer(
            Self::parse_u64(&nonce)?,
            &gas_price,
            &to,
            value,
            Self::parse_u64(&chain_id)?,
        ))
    }

    fn attach_signature(
        &self,
        unsigned: &UnsignedTransfer,
        signature: &[u8],
    ) -> Result<Vec<u8>, ChainError> {
        let (r, s, recovery_id) = Self::split_signature(signature)?;
        let mut items = rlp::decode_list(&unsigned.body)?;
        if items.len() != UNSIGNED_ITEMS {
            return Err(ChainError::Parse(format!(
                "unsigned transfer has {} items",
                items.len()
            )));
        }
        let chain_id = rlp::decode_uint(&items[6])?;
        let v = chain_id * 2 + 35 + u128::from(recovery_id);

        items.truncate(6);
        items.push(rlp::uint_bytes(v));
        items.push(rlp::trim_leading_zeros(r).to_vec());
        items.push(rlp::trim_leading_zeros(s).to_vec());
        Ok(rlp::encode_list(&items))
    }

    async fn submit(&self, payload: &SignedPayload) -> Result<String, ChainError> {
        let expected = Self::expected_hash(&payload.raw);
        let raw_hex = format!("0x{}", hex::encode(&payload.raw));

        debug!(submission_id = %payload.submission_id, tx_hash = %expected, "eth_sendRawTransaction");

        match self
            .rpc
            .call::<_, String>("eth_sendRawTransaction", json!([raw_hex]))
            .await
        {
            Ok(Some(hash)) => {
                if !hash.eq_ignore_ascii_case(&expected) {
                    warn!(
                        returned = %hash,
                        expected = %expected,
                        "Node returned unexpected transaction hash"
                    );
                }
                Ok(hash)
            }
            Ok(None) => Err(ChainError::UnknownOutcome(
                "empty eth_sendRawTransaction result".to_string(),
            )),
            Err(RpcFailure::Rpc(e)) => Self::classify_send_error(&e.message, &expected),
            Err(RpcFailure::Chain(e)) => Err(e.into_submit_error()),
        }
    }

    async fn get_receipt(&self, tx_hash: &str) -> Result<ReceiptStatus, ChainError> {
        let receipt: Option<EthReceipt> = self
            .rpc
            .call("eth_getTransactionReceipt", json!([tx_hash]))
            .await?;

        match receipt {
            Some(EthReceipt {
                block_number: Some(block),
                status,
            }) => {
                if status.as_deref() == Some("0x0") {
                    return Ok(ReceiptStatus::Reverted("execution reverted".to_string()));
                }
                let included_at = Self::parse_u64(&block)?;
                let latest: String = self.rpc.call_required("eth_blockNumber", json!([])).await?;
                let latest = Self::parse_u64(&latest)?;
                let confirmations = latest.saturating_sub(included_at) + 1;
                Ok(ReceiptStatus::Included {
                    confirmations,
                    finalized: false,
                })
            }
            _ => {
                // No receipt: still in the mempool, or gone
                let pending: Option<Value> = self
                    .rpc
                    .call("eth_getTransactionByHash", json!([tx_hash]))
                    .await?;
                Ok(match pending {
                    Some(_) => ReceiptStatus::Included {
                        confirmations: 0,
                        finalized: false,
                    },
                    None => ReceiptStatus::NotFound,
                })
            }
        }
    }

    async fn find_submission(&self, payload: &SignedPayload) -> Result<Option<String>, ChainError> {
        let expected = Self::expected_hash(&payload.raw);
        let found: Option<Value> = self
            .rpc
            .call("eth_getTransactionByHash", json!([expected]))
            .await?;
        Ok(found.map(|_| expected))
    }
}

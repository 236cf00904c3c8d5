//! XRP Ledger Adapter
//!
//! Talks to rippled over its JSON-RPC dialect (`{"method", "params": [{..}]}`
//! with the outcome inside `result.status`). A transaction in a validated
//! ledger is final, so finality is reported directly instead of counted.
//!
//! Transfers are native `Payment` transactions in the canonical binary
//! format. The signer signs `STX\0 || fields` with an Ed25519 key whose
//! public half is embedded as `SigningPubKey`.

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use sha2::{Digest, Sha256, Sha512};
use std::time::Duration;
use tracing::{debug, info};

use super::error::ChainError;
use super::rpc::{classify_reqwest, classify_status};
use super::{
    ChainAdapter, OutcomeResolution, ReceiptStatus, SignedPayload, TransferIntent,
    UnsignedTransfer,
};
use crate::config::XrpConfig;
use crate::core_types::BlockchainType;
use crate::money::{from_base_units, parse_base_units, to_base_units};

/// Hash prefix for signed transactions ("TXN\0")
const TXN_PREFIX: [u8; 4] = [0x54, 0x58, 0x4E, 0x00];
/// Prefix of single-signature signing data ("STX\0")
const SIGNING_PREFIX: [u8; 4] = [0x53, 0x54, 0x58, 0x00];

/// Fee when none was estimated for the transfer
const DEFAULT_FEE_DROPS: u64 = 12;
/// 100 billion XRP, the native amount ceiling
const MAX_DROPS: u64 = 100_000_000_000_000_000;
/// Positive native amount marker
const NATIVE_POSITIVE: u64 = 0x4000_0000_0000_0000;
/// tfFullyCanonicalSig
const FLAG_CANONICAL_SIG: u32 = 0x8000_0000;

/// Serialized field ids: (type code, field code)
mod field {
    pub const TRANSACTION_TYPE: (u8, u8) = (1, 2);
    pub const FLAGS: (u8, u8) = (2, 2);
    pub const SEQUENCE: (u8, u8) = (2, 4);
    pub const AMOUNT: (u8, u8) = (6, 1);
    pub const FEE: (u8, u8) = (6, 8);
    pub const SIGNING_PUB_KEY: (u8, u8) = (7, 3);
    pub const TXN_SIGNATURE: (u8, u8) = (7, 4);
    pub const ACCOUNT: (u8, u8) = (8, 1);
    pub const DESTINATION: (u8, u8) = (8, 3);
}

/// One serialized field; `value` excludes the length prefix
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Field {
    pub id: (u8, u8),
    pub value: Vec<u8>,
}

impl Field {
    fn new(id: (u8, u8), value: impl Into<Vec<u8>>) -> Self {
        Self {
            id,
            value: value.into(),
        }
    }
}

/// Blob and AccountID fields carry a length prefix
fn is_variable_length(type_code: u8) -> bool {
    matches!(type_code, 7 | 8)
}

fn encode_header(out: &mut Vec<u8>, (type_code, field_code): (u8, u8)) {
    match (type_code < 16, field_code < 16) {
        (true, true) => out.push((type_code << 4) | field_code),
        (true, false) => out.extend_from_slice(&[type_code << 4, field_code]),
        (false, true) => out.extend_from_slice(&[field_code, type_code]),
        (false, false) => out.extend_from_slice(&[0, type_code, field_code]),
    }
}

fn encode_length(out: &mut Vec<u8>, len: usize) -> Result<(), ChainError> {
    match len {
        0..=192 => out.push(len as u8),
        193..=12_480 => {
            let len = len - 193;
            out.extend_from_slice(&[193 + (len >> 8) as u8, (len & 0xff) as u8]);
        }
        12_481..=918_744 => {
            let len = len - 12_481;
            out.extend_from_slice(&[
                241 + (len >> 16) as u8,
                ((len >> 8) & 0xff) as u8,
                (len & 0xff) as u8,
            ]);
        }
        _ => return Err(ChainError::Parse(format!("field of {} bytes too long", len))),
    }
    Ok(())
}

/// Serialize `fields` in canonical order
pub fn encode_fields(mut fields: Vec<Field>) -> Result<Vec<u8>, ChainError> {
    fields.sort_by_key(|f| f.id);
    let mut out = Vec::new();
    for f in &fields {
        encode_header(&mut out, f.id);
        if is_variable_length(f.id.0) {
            encode_length(&mut out, f.value.len())?;
        }
        out.extend_from_slice(&f.value);
    }
    Ok(out)
}

/// Parse a flat field sequence (the subset of types a Payment uses)
pub fn decode_fields(mut data: &[u8]) -> Result<Vec<Field>, ChainError> {
    fn take<'a>(data: &mut &'a [u8], n: usize) -> Result<&'a [u8], ChainError> {
        if data.len() < n {
            return Err(ChainError::Parse("truncated transaction blob".into()));
        }
        let (head, rest) = data.split_at(n);
        *data = rest;
        Ok(head)
    }

    let mut fields = Vec::new();
    while !data.is_empty() {
        let first = take(&mut data, 1)?[0];
        let (mut type_code, mut field_code) = (first >> 4, first & 0x0f);
        if type_code == 0 {
            type_code = take(&mut data, 1)?[0];
        }
        if field_code == 0 {
            field_code = take(&mut data, 1)?[0];
        }

        let len = match type_code {
            1 => 2,
            2 => 4,
            3 | 6 => 8,
            5 => 32,
            7 | 8 => {
                let b1 = take(&mut data, 1)?[0] as usize;
                match b1 {
                    0..=192 => b1,
                    193..=240 => 193 + ((b1 - 193) << 8) + take(&mut data, 1)?[0] as usize,
                    241..=254 => {
                        let rest = take(&mut data, 2)?;
                        12_481 + ((b1 - 241) << 16) + ((rest[0] as usize) << 8) + rest[1] as usize
                    }
                    _ => return Err(ChainError::Parse("invalid length prefix".into())),
                }
            }
            other => {
                return Err(ChainError::Parse(format!("unsupported field type {}", other)));
            }
        };
        fields.push(Field::new((type_code, field_code), take(&mut data, len)?));
    }
    Ok(fields)
}

#[derive(Serialize)]
struct RippledRequest {
    method: &'static str,
    params: [Value; 1],
}

#[derive(Deserialize)]
struct RippledResponse {
    result: Value,
}

/// Outcome of a rippled call that reached the server
enum RippledReply {
    Success(Value),
    Error { code: String, message: String },
}

#[derive(Debug)]
pub struct XrpAdapter {
    url: String,
    client: reqwest::Client,
}

impl XrpAdapter {
    pub fn new(config: &XrpConfig) -> Result<Self, ChainError> {
        info!(rpc_url = %config.rpc_url, "Initializing XRP adapter");
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ChainError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            url: config.rpc_url.clone(),
            client,
        })
    }

    /// SHA-512Half of the prefixed blob, uppercase hex like rippled reports it
    pub fn expected_hash(raw: &[u8]) -> String {
        let mut hasher = Sha512::new();
        hasher.update(TXN_PREFIX);
        hasher.update(raw);
        let digest = hasher.finalize();
        hex::encode_upper(&digest[..32])
    }

    /// 20-byte account id of a classic address, checksum verified
    pub fn account_id(address: &str) -> Result<[u8; 20], ChainError> {
        let invalid = || ChainError::InvalidAddress(address.to_string());
        let bytes = bs58::decode(address)
            .with_alphabet(bs58::Alphabet::RIPPLE)
            .into_vec()
            .map_err(|_| invalid())?;
        if bytes.len() != 25 || bytes[0] != 0 {
            return Err(invalid());
        }
        let checksum = Sha256::digest(Sha256::digest(&bytes[..21]));
        if checksum[..4] != bytes[21..] {
            return Err(invalid());
        }
        bytes[1..21].try_into().map_err(|_| invalid())
    }

    fn drops(amount: Decimal) -> Result<u64, ChainError> {
        let drops = to_base_units(amount, BlockchainType::Xrp.decimals())
            .map_err(|e| ChainError::Rejected(format!("amount {}: {}", amount, e)))?;
        u64::try_from(drops)
            .ok()
            .filter(|d| *d <= MAX_DROPS)
            .ok_or_else(|| ChainError::Rejected(format!("amount {} exceeds native maximum", amount)))
    }

    /// `SigningPubKey` value; a bare Ed25519 key gets its 0xED type prefix
    fn signing_public_key(public_key: Option<&[u8]>) -> Result<Vec<u8>, ChainError> {
        match public_key {
            Some(key) if key.len() == 32 => {
                let mut prefixed = Vec::with_capacity(33);
                prefixed.push(0xED);
                prefixed.extend_from_slice(key);
                Ok(prefixed)
            }
            Some(key) if key.len() == 33 && key[0] == 0xED => Ok(key.to_vec()),
            Some(key) => Err(ChainError::Unsupported(format!(
                "signer public key of {} bytes is not an Ed25519 key",
                key.len()
            ))),
            None => Err(ChainError::Unsupported(
                "signer does not expose a public key".into(),
            )),
        }
    }

    /// Unsigned native Payment; the signer signs `STX\0 || body`
    pub fn unsigned_payment(
        account: &[u8; 20],
        destination: &[u8; 20],
        drops: u64,
        fee_drops: u64,
        sequence: u32,
        signing_public_key: &[u8],
    ) -> Result<UnsignedTransfer, ChainError> {
        let body = encode_fields(vec![
            Field::new(field::TRANSACTION_TYPE, 0u16.to_be_bytes()),
            Field::new(field::FLAGS, FLAG_CANONICAL_SIG.to_be_bytes()),
            Field::new(field::SEQUENCE, sequence.to_be_bytes()),
            Field::new(field::AMOUNT, (drops | NATIVE_POSITIVE).to_be_bytes()),
            Field::new(field::FEE, (fee_drops | NATIVE_POSITIVE).to_be_bytes()),
            Field::new(field::SIGNING_PUB_KEY, signing_public_key),
            Field::new(field::ACCOUNT, account.as_slice()),
            Field::new(field::DESTINATION, destination.as_slice()),
        ])?;
        let mut signing_payload = Vec::with_capacity(SIGNING_PREFIX.len() + body.len());
        signing_payload.extend_from_slice(&SIGNING_PREFIX);
        signing_payload.extend_from_slice(&body);
        Ok(UnsignedTransfer {
            signing_payload,
            body,
        })
    }

    /// Next sequence number of the sending account
    async fn account_sequence(&self, address: &str) -> Result<u32, ChainError> {
        let params = json!({ "account": address, "ledger_index": "current" });
        let result = match self.call("account_info", params).await? {
            RippledReply::Success(result) => result,
            RippledReply::Error { code, message } => {
                return Err(ChainError::Rejected(format!("{}: {}", code, message)));
            }
        };
        result["account_data"]["Sequence"]
            .as_u64()
            .and_then(|seq| u32::try_from(seq).ok())
            .ok_or_else(|| ChainError::Parse("account_info: missing Sequence".into()))
    }

    async fn call(&self, method: &'static str, params: Value) -> Result<RippledReply, ChainError> {
        let request = RippledRequest {
            method,
            params: [params],
        };

        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(classify_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let body: RippledResponse = response
            .json()
            .await
            .map_err(|e| ChainError::Parse(e.to_string()))?;

        if body.result["status"] == "error" {
            let code = body.result["error"].as_str().unwrap_or("unknown").to_string();
            let message = body.result["error_message"]
                .as_str()
                .unwrap_or(&code)
                .to_string();
            if code == "tooBusy" || code == "slowDown" || code == "noNetwork" {
                return Err(ChainError::NodeBusy(message));
            }
            return Ok(RippledReply::Error { code, message });
        }

        Ok(RippledReply::Success(body.result))
    }

    async fn call_ok(&self, method: &'static str, params: Value) -> Result<Value, ChainError> {
        match self.call(method, params).await? {
            RippledReply::Success(result) => Ok(result),
            RippledReply::Error { code, message } => {
                Err(ChainError::Rejected(format!("{}: {}", code, message)))
            }
        }
    }

    fn drops_to_xrp(drops: &str) -> Result<Decimal, ChainError> {
        let units = parse_base_units(drops).map_err(|e| ChainError::Parse(e.to_string()))?;
        from_base_units(&units, BlockchainType::Xrp.decimals())
            .map_err(|e| ChainError::Parse(e.to_string()))
    }

    /// Map a `submit` engine result
    fn classify_engine_result(
        engine_result: &str,
        message: &str,
        expected: &str,
    ) -> Result<String, ChainError> {
        let detail = format!("{}: {}", engine_result, message);
        match engine_result {
            "tesSUCCESS" | "terQUEUED" | "tefALREADY" => Ok(expected.to_string()),
            // Sequence already consumed: possibly by this very transaction
            "tefPAST_SEQ" => Err(ChainError::UnknownOutcome(detail)),
            "tecUNFUNDED_PAYMENT" | "tecINSUFFICIENT_RESERVE" | "terINSUF_FEE_B" => {
                Err(ChainError::InsufficientFunds(detail))
            }
            "temBAD_SIGNATURE" | "temINVALID" | "tefBAD_AUTH" => {
                Err(ChainError::InvalidSignature(detail))
            }
            r if r.starts_with("tel") || r.starts_with("ter") => Err(ChainError::NodeBusy(detail)),
            _ => Err(ChainError::Rejected(detail)),
        }
    }
}

#[async_trait]
impl ChainAdapter for XrpAdapter {
    fn chain(&self) -> BlockchainType {
        BlockchainType::Xrp
    }

    fn resolution(&self) -> OutcomeResolution {
        OutcomeResolution::Lookup
    }

    async fn generate_address(&self) -> Result<String, ChainError> {
        let result = self.call_ok("wallet_propose", json!({})).await?;
        let address = result["account_id"]
            .as_str()
            .ok_or_else(|| ChainError::Parse("wallet_propose: missing account_id".into()))?;
        Ok(address.to_string())
    }

    async fn get_balance(&self, address: &str) -> Result<Decimal, ChainError> {
        if !self.validate_address(address) {
            return Err(ChainError::InvalidAddress(address.to_string()));
        }
        let params = json!({ "account": address, "ledger_index": "validated" });
        match self.call("account_info", params).await? {
            RippledReply::Success(result) => {
                let drops = result["account_data"]["Balance"]
                    .as_str()
                    .ok_or_else(|| ChainError::Parse("account_info: missing Balance".into()))?;
                Self::drops_to_xrp(drops)
            }
            // Unfunded accounts do not exist on ledger yet
            RippledReply::Error { code, .. } if code == "actNotFound" => Ok(Decimal::ZERO),
            RippledReply::Error { code, message } => {
                Err(ChainError::Rejected(format!("{}: {}", code, message)))
            }
        }
    }

    async fn estimate_fee(&self, _intent: &TransferIntent) -> Result<Decimal, ChainError> {
        let result = self.call_ok("fee", json!({})).await?;
        let drops = result["drops"]["open_ledger_fee"]
            .as_str()
            .ok_or_else(|| ChainError::Parse("fee: missing drops.open_ledger_fee".into()))?;
        Self::drops_to_xrp(drops)
    }

    async fn encode_transfer(
        &self,
        intent: &TransferIntent,
        public_key: Option<&[u8]>,
    ) -> Result<UnsignedTransfer, ChainError> {
        let signing_public_key = Self::signing_public_key(public_key)?;
        let account = Self::account_id(&intent.from)?;
        let destination = Self::account_id(&intent.to)?;
        let drops = Self::drops(intent.amount)?;
        let fee_drops = match intent.fee {
            Some(fee) => Self::drops(fee)?,
            None => DEFAULT_FEE_DROPS,
        };
        let sequence = self.account_sequence(&intent.from).await?;

        Self::unsigned_payment(
            &account,
            &destination,
            drops,
            fee_drops,
            sequence,
            &signing_public_key,
        )
    }

    fn attach_signature(
        &self,
        unsigned: &UnsignedTransfer,
        signature: &[u8],
    ) -> Result<Vec<u8>, ChainError> {
        if signature.len() != 64 {
            return Err(ChainError::InvalidSignature(format!(
                "expected 64-byte Ed25519 signature, got {} bytes",
                signature.len()
            )));
        }
        let mut fields = decode_fields(&unsigned.body)?;
        fields.retain(|f| f.id != field::TXN_SIGNATURE);
        fields.push(Field::new(field::TXN_SIGNATURE, signature));
        encode_fields(fields)
    }

    async fn submit(&self, payload: &SignedPayload) -> Result<String, ChainError> {
        let expected = Self::expected_hash(&payload.raw);
        let params = json!({ "tx_blob": hex::encode_upper(&payload.raw) });

        debug!(submission_id = %payload.submission_id, tx_hash = %expected, "rippled submit");

        let result = match self
            .call("submit", params)
            .await
            .map_err(ChainError::into_submit_error)?
        {
            RippledReply::Success(result) => result,
            RippledReply::Error { code, message } => {
                return Err(ChainError::Rejected(format!("{}: {}", code, message)));
            }
        };

        let engine_result = result["engine_result"].as_str().unwrap_or_default();
        let message = result["engine_result_message"]
            .as_str()
            .unwrap_or_default();
        let hash = result["tx_json"]["hash"]
            .as_str()
            .map(str::to_string)
            .unwrap_or(expected);

        Self::classify_engine_result(engine_result, message, &hash)
    }

    async fn get_receipt(&self, tx_hash: &str) -> Result<ReceiptStatus, ChainError> {
        let result = match self.call("tx", json!({ "transaction": tx_hash })).await? {
            RippledReply::Success(result) => result,
            RippledReply::Error { code, .. } if code == "txnNotFound" => {
                return Ok(ReceiptStatus::NotFound);
            }
            RippledReply::Error { code, message } => {
                return Err(ChainError::Rejected(format!("{}: {}", code, message)));
            }
        };

        let validated = result["validated"].as_bool().unwrap_or(false);
        if !validated {
            return Ok(ReceiptStatus::Included {
                confirmations: 0,
                finalized: false,
            });
        }

        match result["meta"]["TransactionResult"].as_str() {
            Some("tesSUCCESS") => Ok(ReceiptStatus::Included {
                confirmations: 1,
                finalized: true,
            }),
            Some(other) => Ok(ReceiptStatus::Reverted(other.to_string())),
            None => Err(ChainError::Parse("tx: missing meta.TransactionResult".into())),
        }
    }

    async fn find_submission(&self, payload: &SignedPayload) -> Result<Option<String>, ChainError> {
        let expected = Self::expected_hash(&payload.raw);
        match self.get_receipt(&expected).await? {
            ReceiptStatus::NotFound => Ok(None),
            _ => Ok(Some(expected)),
        }
    }
}

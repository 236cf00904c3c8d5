//! UTXO Custodian Adapter
//!
//! UTXO chains are reached through a custodian REST service that owns coin
//! selection and broadcast. The service cannot be queried by our raw blob,
//! so every submission carries a deterministic `Idempotency-Key` (the
//! transaction id) and the custodian deduplicates resubmissions.

use async_trait::async_trait;
use num_bigint::BigUint;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, info};

use super::error::ChainError;
use super::rpc::{classify_reqwest, classify_status};
use super::{ChainAdapter, OutcomeResolution, ReceiptStatus, SignedPayload, TransferIntent};
use crate::config::UtxoConfig;
use crate::core_types::BlockchainType;
use crate::money::from_base_units;

// ============================================================================
// Wire types
// ============================================================================

#[derive(Deserialize)]
struct AddressResponse {
    address: String,
}

#[derive(Deserialize)]
struct Utxo {
    value_sat: u64,
}

#[derive(Deserialize)]
struct UtxoListResponse {
    utxos: Vec<Utxo>,
}

#[derive(Deserialize)]
struct FeeResponse {
    /// Flat fee for a standard one-input two-output transfer
    fee_sat: u64,
}

#[derive(Serialize)]
struct SubmitRequest<'a> {
    request_id: &'a str,
    raw: String,
}

#[derive(Deserialize)]
struct SubmitResponse {
    txid: String,
}

#[derive(Deserialize)]
struct StatusResponse {
    status: String,
    #[serde(default)]
    confirmations: u64,
    #[serde(default)]
    reason: Option<String>,
}

// ============================================================================
// Adapter
// ============================================================================

#[derive(Debug)]
pub struct UtxoCustodianAdapter {
    base_url: String,
    api_key: String,
    client: reqwest::Client,
}

impl UtxoCustodianAdapter {
    pub fn new(config: &UtxoConfig) -> Result<Self, ChainError> {
        info!(base_url = %config.base_url, "Initializing UTXO custodian adapter");
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| ChainError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn sats_to_coin(sats: u64) -> Result<Decimal, ChainError> {
        from_base_units(&BigUint::from(sats), BlockchainType::Utxo.decimals())
            .map_err(|e| ChainError::Parse(e.to_string()))
    }

    async fn get_json<R>(&self, path: &str, query: &[(&str, &str)]) -> Result<Option<R>, ChainError>
    where
        R: for<'de> Deserialize<'de>,
    {
        let response = self
            .client
            .get(self.url(path))
            .header("X-API-Key", &self.api_key)
            .query(query)
            .send()
            .await
            .map_err(classify_reqwest)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        response
            .json()
            .await
            .map(Some)
            .map_err(|e| ChainError::Parse(e.to_string()))
    }

    /// Map a failed `POST /transactions`
    fn classify_submit_status(status: StatusCode, body: &str) -> ChainError {
        if status.is_server_error() {
            // The custodian may have accepted before failing
            return ChainError::UnknownOutcome(format!("HTTP {}: {}", status, body));
        }
        if status == StatusCode::TOO_MANY_REQUESTS {
            return ChainError::NodeBusy(format!("HTTP {}: {}", status, body));
        }
        if body.to_ascii_lowercase().contains("insufficient") {
            return ChainError::InsufficientFunds(body.to_string());
        }
        ChainError::Rejected(format!("HTTP {}: {}", status, body))
    }

    fn map_status(status: StatusResponse) -> Result<ReceiptStatus, ChainError> {
        match status.status.as_str() {
            "pending" => Ok(ReceiptStatus::Included {
                confirmations: 0,
                finalized: false,
            }),
            "confirmed" => Ok(ReceiptStatus::Included {
                confirmations: status.confirmations,
                finalized: false,
            }),
            "failed" => Ok(ReceiptStatus::Reverted(
                status.reason.unwrap_or_else(|| "rejected by custodian".to_string()),
            )),
            "dropped" | "not_found" => Ok(ReceiptStatus::NotFound),
            other => Err(ChainError::Parse(format!("unknown custodian status: {}", other))),
        }
    }
}

#[async_trait]
impl ChainAdapter for UtxoCustodianAdapter {
    fn chain(&self) -> BlockchainType {
        BlockchainType::Utxo
    }

    fn resolution(&self) -> OutcomeResolution {
        OutcomeResolution::IdempotentResubmit
    }

    async fn generate_address(&self) -> Result<String, ChainError> {
        let response = self
            .client
            .post(self.url("/addresses"))
            .header("X-API-Key", &self.api_key)
            .send()
            .await
            .map_err(classify_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(classify_status(status, &body));
        }

        let body: AddressResponse = response
            .json()
            .await
            .map_err(|e| ChainError::Parse(e.to_string()))?;
        Ok(body.address)
    }

    async fn get_balance(&self, address: &str) -> Result<Decimal, ChainError> {
        if !self.validate_address(address) {
            return Err(ChainError::InvalidAddress(address.to_string()));
        }
        let list: Option<UtxoListResponse> =
            self.get_json("/utxos", &[("address", address)]).await?;
        let total: u64 = list
            .map(|l| l.utxos.iter().map(|u| u.value_sat).sum())
            .unwrap_or(0);
        Self::sats_to_coin(total)
    }

    async fn estimate_fee(&self, _intent: &TransferIntent) -> Result<Decimal, ChainError> {
        let fee: FeeResponse = self
            .get_json("/fees", &[])
            .await?
            .ok_or_else(|| ChainError::Parse("fee endpoint returned 404".into()))?;
        Self::sats_to_coin(fee.fee_sat)
    }

    async fn submit(&self, payload: &SignedPayload) -> Result<String, ChainError> {
        debug!(submission_id = %payload.submission_id, "Custodian submit");

        let request = SubmitRequest {
            request_id: &payload.submission_id,
            raw: hex::encode(&payload.raw),
        };
        let response = self
            .client
            .post(self.url("/transactions"))
            .header("X-API-Key", &self.api_key)
            .header("Idempotency-Key", &payload.submission_id)
            .json(&request)
            .send()
            .await
            .map_err(|e| classify_reqwest(e).into_submit_error())?;

        let status = response.status();
        // 409: this request id was already accepted; body carries the original txid
        if status.is_success() || status == StatusCode::CONFLICT {
            let body: SubmitResponse = response
                .json()
                .await
                .map_err(|e| ChainError::UnknownOutcome(e.to_string()))?;
            return Ok(body.txid);
        }

        let body = response.text().await.unwrap_or_default();
        Err(Self::classify_submit_status(status, &body))
    }

    async fn get_receipt(&self, tx_hash: &str) -> Result<ReceiptStatus, ChainError> {
        let path = format!("/transactions/{}/status", tx_hash);
        match self.get_json::<StatusResponse>(&path, &[]).await? {
            Some(status) => Self::map_status(status),
            None => Ok(ReceiptStatus::NotFound),
        }
    }

    async fn find_submission(&self, payload: &SignedPayload) -> Result<Option<String>, ChainError> {
        let found: Option<SubmitResponse> = self
            .get_json("/transactions", &[("request_id", payload.submission_id.as_str())])
            .await?;
        Ok(found.map(|r| r.txid))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_status_classification() {
        assert!(matches!(
            UtxoCustodianAdapter::classify_submit_status(StatusCode::BAD_GATEWAY, ""),
            ChainError::UnknownOutcome(_)
        ));
        assert!(matches!(
            UtxoCustodianAdapter::classify_submit_status(StatusCode::TOO_MANY_REQUESTS, ""),
            ChainError::NodeBusy(_)
        ));
        assert!(matches!(
            UtxoCustodianAdapter::classify_submit_status(
                StatusCode::UNPROCESSABLE_ENTITY,
                "Insufficient funds in wallet"
            ),
            ChainError::InsufficientFunds(_)
        ));
        assert!(matches!(
            UtxoCustodianAdapter::classify_submit_status(StatusCode::BAD_REQUEST, "bad raw"),
            ChainError::Rejected(_)
        ));
    }

    #[test]
    fn test_status_mapping() {
        let confirmed = StatusResponse {
            status: "confirmed".into(),
            confirmations: 3,
            reason: None,
        };
        assert_eq!(
            UtxoCustodianAdapter::map_status(confirmed).unwrap(),
            ReceiptStatus::Included {
                confirmations: 3,
                finalized: false
            }
        );

        let dropped = StatusResponse {
            status: "dropped".into(),
            confirmations: 0,
            reason: None,
        };
        assert_eq!(
            UtxoCustodianAdapter::map_status(dropped).unwrap(),
            ReceiptStatus::NotFound
        );

        let weird = StatusResponse {
            status: "limbo".into(),
            confirmations: 0,
            reason: None,
        };
        assert!(UtxoCustodianAdapter::map_status(weird).is_err());
    }

    #[test]
    fn test_sats_conversion() {
        assert_eq!(
            UtxoCustodianAdapter::sats_to_coin(150_000_000).unwrap(),
            Decimal::from_str_exact("1.5").unwrap()
        );
    }
}

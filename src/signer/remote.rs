//! HTTP proxy to an external key-custody service (KMS / HSM front end).
//!
//! Wire format: `POST {url}` with `{"key_id", "payload"}` where `payload`
//! is base64; the response carries a base64 `signature`.

use async_trait::async_trait;
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use super::{Signer, SignerError};
use crate::core_types::SignatureType;

#[derive(Serialize)]
struct SignRequest<'a> {
    key_id: &'a str,
    payload: String,
}

#[derive(Deserialize)]
struct SignResponse {
    signature: String,
}

#[derive(Debug)]
pub struct RemoteSigner {
    url: String,
    key_id: String,
    api_key: Option<String>,
    schemes: Vec<SignatureType>,
    public_key: Option<Vec<u8>>,
    client: reqwest::Client,
}

impl RemoteSigner {
    pub fn new(
        url: &str,
        key_id: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> Result<Self, SignerError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SignerError::Unavailable(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self {
            url: url.to_string(),
            key_id: key_id.to_string(),
            api_key,
            schemes: vec![SignatureType::Ed25519, SignatureType::EcdsaSecp256k1],
            public_key: None,
            client,
        })
    }

    /// Restrict the schemes this key can produce
    pub fn with_schemes(mut self, schemes: Vec<SignatureType>) -> Self {
        self.schemes = schemes;
        self
    }

    /// Public key registered for `key_id` at the custody service
    pub fn with_public_key_hex(mut self, public_key_hex: &str) -> Result<Self, SignerError> {
        let key = hex::decode(public_key_hex.trim_start_matches("0x"))
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        if key.is_empty() {
            return Err(SignerError::InvalidKey("empty public key".to_string()));
        }
        self.public_key = Some(key);
        Ok(self)
    }

    fn classify_status(status: reqwest::StatusCode, body: &str) -> SignerError {
        if status.is_server_error() || status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            SignerError::Unavailable(format!("HTTP {}: {}", status, body))
        } else {
            SignerError::Rejected(format!("HTTP {}: {}", status, body))
        }
    }

    fn decode_signature(encoded: &str) -> Result<Vec<u8>, SignerError> {
        let signature = BASE64
            .decode(encoded)
            .map_err(|e| SignerError::Malformed(e.to_string()))?;
        if signature.is_empty() {
            return Err(SignerError::Malformed("empty signature".to_string()));
        }
        Ok(signature)
    }
}

#[async_trait]
impl Signer for RemoteSigner {
    fn key_id(&self) -> &str {
        &self.key_id
    }

    fn supports(&self, scheme: SignatureType) -> bool {
        self.schemes.contains(&scheme)
    }

    fn public_key(&self) -> Option<Vec<u8>> {
        self.public_key.clone()
    }

    async fn sign(&self, payload: &[u8]) -> Result<Vec<u8>, SignerError> {
        debug!(key_id = %self.key_id, bytes = payload.len(), "Remote sign request");

        let mut request = self.client.post(&self.url).json(&SignRequest {
            key_id: &self.key_id,
            payload: BASE64.encode(payload),
        });
        if let Some(api_key) = &self.api_key {
            request = request.header("X-API-Key", api_key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                SignerError::Timeout(e.to_string())
            } else {
                SignerError::Unavailable(e.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, &body));
        }

        let body: SignResponse = response
            .json()
            .await
            .map_err(|e| SignerError::Malformed(e.to_string()))?;
        Self::decode_signature(&body.signature)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(matches!(
            RemoteSigner::classify_status(reqwest::StatusCode::SERVICE_UNAVAILABLE, ""),
            SignerError::Unavailable(_)
        ));
        assert!(matches!(
            RemoteSigner::classify_status(reqwest::StatusCode::FORBIDDEN, "key disabled"),
            SignerError::Rejected(_)
        ));
    }

    #[test]
    fn test_decode_signature() {
        assert_eq!(
            RemoteSigner::decode_signature(&BASE64.encode([1u8, 2, 3])).unwrap(),
            vec![1, 2, 3]
        );
        assert!(RemoteSigner::decode_signature("***").is_err());
        assert!(RemoteSigner::decode_signature("").is_err());
    }

    #[test]
    fn test_scheme_restriction() {
        let signer = RemoteSigner::new("http://localhost:1", "k", None, Duration::from_secs(1))
            .unwrap()
            .with_schemes(vec![SignatureType::EcdsaSecp256k1]);
        assert!(signer.supports(SignatureType::EcdsaSecp256k1));
        assert!(!signer.supports(SignatureType::Ed25519));
    }

    #[test]
    fn test_public_key_is_optional() {
        let signer = RemoteSigner::new("http://localhost:1", "k", None, Duration::from_secs(1)).unwrap();
        assert_eq!(signer.public_key(), None);

        let signer = signer.with_public_key_hex("0xed01").unwrap();
        assert_eq!(signer.public_key(), Some(vec![0xed, 0x01]));
        assert!(
            RemoteSigner::new("http://localhost:1", "k", None, Duration::from_secs(1))
                .unwrap()
                .with_public_key_hex("zz")
                .is_err()
        );
    }
}

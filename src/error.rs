//! Custody Error Types
//!
//! Service-level error taxonomy returned by every exposed operation.
//! Error codes are stable strings for the API layer that wraps this crate.

use thiserror::Error;

use crate::chain::{ChainError, FailureClass};
use crate::money::MoneyError;
use crate::signer::SignerError;
use crate::store::StoreError;

/// Custody error types
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CustodyError {
    // === Caller Errors (never retried) ===
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    // === Chain Errors ===
    #[error("Address generation failed: {0}")]
    AddressGeneration(String),

    #[error("Transient infrastructure error: {0}")]
    TransientInfra(String),

    #[error("Rejected by chain: {0}")]
    PermanentChain(String),

    #[error("Submission outcome unknown: {0}")]
    UnknownOutcome(String),

    // === Key Custody ===
    #[error("Signer error: {0}")]
    Signer(String),

    // === System Errors ===
    #[error("Storage error: {0}")]
    Storage(String),
}

impl CustodyError {
    /// Get the error code for API responses
    pub fn code(&self) -> &'static str {
        match self {
            CustodyError::Validation(_) => "VALIDATION_ERROR",
            CustodyError::NotFound(_) => "NOT_FOUND",
            CustodyError::Conflict(_) => "CONFLICT",
            CustodyError::AddressGeneration(_) => "ADDRESS_GENERATION_ERROR",
            CustodyError::TransientInfra(_) => "TRANSIENT_INFRA_ERROR",
            CustodyError::PermanentChain(_) => "PERMANENT_CHAIN_ERROR",
            CustodyError::UnknownOutcome(_) => "UNKNOWN_OUTCOME",
            CustodyError::Signer(_) => "SIGNER_ERROR",
            CustodyError::Storage(_) => "STORAGE_ERROR",
        }
    }

    /// Get HTTP status code suggestion
    pub fn http_status(&self) -> u16 {
        match self {
            CustodyError::Validation(_) => 400,
            CustodyError::NotFound(_) => 404,
            CustodyError::Conflict(_) => 409,
            CustodyError::PermanentChain(_) => 422,
            CustodyError::AddressGeneration(_)
            | CustodyError::UnknownOutcome(_)
            | CustodyError::Signer(_)
            | CustodyError::Storage(_) => 500,
            CustodyError::TransientInfra(_) => 503,
        }
    }

    /// Whether the failure may succeed on a later attempt
    pub fn is_retryable(&self) -> bool {
        matches!(self, CustodyError::TransientInfra(_))
    }
}

impl From<StoreError> for CustodyError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(what) => CustodyError::NotFound(what),
            StoreError::Duplicate(what) => CustodyError::Conflict(what),
            other => CustodyError::Storage(other.to_string()),
        }
    }
}

impl From<ChainError> for CustodyError {
    fn from(e: ChainError) -> Self {
        if let ChainError::InvalidAddress(addr) = &e {
            return CustodyError::Validation(format!("invalid address: {}", addr));
        }
        match e.class() {
            FailureClass::Transient => CustodyError::TransientInfra(e.to_string()),
            FailureClass::Permanent => CustodyError::PermanentChain(e.to_string()),
            FailureClass::UnknownOutcome => CustodyError::UnknownOutcome(e.to_string()),
        }
    }
}

impl From<SignerError> for CustodyError {
    fn from(e: SignerError) -> Self {
        CustodyError::Signer(e.to_string())
    }
}

impl From<MoneyError> for CustodyError {
    fn from(e: MoneyError) -> Self {
        CustodyError::Validation(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            CustodyError::Validation("x".into()).code(),
            "VALIDATION_ERROR"
        );
        assert_eq!(CustodyError::Conflict("x".into()).code(), "CONFLICT");
        assert_eq!(
            CustodyError::UnknownOutcome("x".into()).code(),
            "UNKNOWN_OUTCOME"
        );
    }

    #[test]
    fn test_http_status() {
        assert_eq!(CustodyError::Validation("x".into()).http_status(), 400);
        assert_eq!(CustodyError::NotFound("x".into()).http_status(), 404);
        assert_eq!(CustodyError::Conflict("x".into()).http_status(), 409);
        assert_eq!(CustodyError::TransientInfra("x".into()).http_status(), 503);
    }

    #[test]
    fn test_chain_error_mapping() {
        let err: CustodyError = ChainError::Timeout("read".into()).into();
        assert!(err.is_retryable());

        let err: CustodyError = ChainError::InsufficientFunds("need 2".into()).into();
        assert!(matches!(err, CustodyError::PermanentChain(_)));

        let err: CustodyError = ChainError::InvalidAddress("0x12".into()).into();
        assert!(matches!(err, CustodyError::Validation(_)));
    }

    #[test]
    fn test_store_error_mapping() {
        let err: CustodyError = StoreError::NotFound("vault 1".into()).into();
        assert_eq!(err, CustodyError::NotFound("vault 1".into()));
    }
}

use thiserror::Error;

/// How the orchestrator must treat a failed chain call
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Safe to retry with backoff (timeout on a read, connection reset, node busy)
    Transient,
    /// The network rejected the request, retrying cannot help
    Permanent,
    /// The request may or may not have reached the network
    UnknownOutcome,
}

#[derive(Debug, Error, Clone, PartialEq)]
pub enum ChainError {
    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Node busy: {0}")]
    NodeBusy(String),

    #[error("Malformed node response: {0}")]
    Parse(String),

    #[error("Rejected by network: {0}")]
    Rejected(String),

    #[error("Insufficient funds: {0}")]
    InsufficientFunds(String),

    #[error("Invalid signature: {0}")]
    InvalidSignature(String),

    #[error("Invalid address format: {0}")]
    InvalidAddress(String),

    #[error("Operation not supported: {0}")]
    Unsupported(String),

    #[error("Submission outcome unknown: {0}")]
    UnknownOutcome(String),
}

impl ChainError {
    pub fn class(&self) -> FailureClass {
        match self {
            ChainError::Transport(_)
            | ChainError::Timeout(_)
            | ChainError::NodeBusy(_)
            | ChainError::Parse(_) => FailureClass::Transient,
            ChainError::Rejected(_)
            | ChainError::InsufficientFunds(_)
            | ChainError::InvalidSignature(_)
            | ChainError::InvalidAddress(_)
            | ChainError::Unsupported(_) => FailureClass::Permanent,
            ChainError::UnknownOutcome(_) => FailureClass::UnknownOutcome,
        }
    }

    /// Re-classify a failure of a broadcast call.
    ///
    /// Once the request may have left this process, a timeout or an
    /// unreadable response no longer proves the network did not see it.
    pub fn into_submit_error(self) -> ChainError {
        match self {
            ChainError::Timeout(msg) | ChainError::Parse(msg) => ChainError::UnknownOutcome(msg),
            other => other,
        }
    }
}

//! Transaction state machine
//!
//! ```text
//! Pending ──► Submitting ──► Submitted ──► Confirmed
//!    ▲            │              │
//!    └────────────┴──────────────┘   (retry / dropped)
//!  any non-terminal state ──► Failed
//! ```
//!
//! State IDs are stored as SMALLINT.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum TransactionStatus {
    /// Persisted, not yet attempted (or waiting for a retry)
    Pending = 0,

    /// Broadcast call in flight (persist-before-call).
    /// Found at recovery: outcome unknown, must be resolved before retrying.
    Submitting = 10,

    /// Accepted by the network, `chain_tx_hash` recorded
    Submitted = 20,

    /// Terminal: reached the finality threshold
    Confirmed = 30,

    /// Terminal: rejected, reverted or out of attempts
    Failed = -10,
}

impl TransactionStatus {
    pub const ALL: [TransactionStatus; 5] = [
        TransactionStatus::Pending,
        TransactionStatus::Submitting,
        TransactionStatus::Submitted,
        TransactionStatus::Confirmed,
        TransactionStatus::Failed,
    ];

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransactionStatus::Confirmed | TransactionStatus::Failed)
    }

    /// Whether `self -> next` is an edge of the state machine
    pub fn can_transition_to(&self, next: TransactionStatus) -> bool {
        use TransactionStatus::*;
        match (self, next) {
            (Pending, Submitting) | (Pending, Failed) => true,
            (Submitting, Submitted) | (Submitting, Pending) | (Submitting, Failed) => true,
            (Submitted, Confirmed) | (Submitted, Pending) | (Submitted, Failed) => true,
            (Confirmed, _) | (Failed, _) => false,
            _ => false,
        }
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(TransactionStatus::Pending),
            10 => Some(TransactionStatus::Submitting),
            20 => Some(TransactionStatus::Submitted),
            30 => Some(TransactionStatus::Confirmed),
            -10 => Some(TransactionStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "PENDING",
            TransactionStatus::Submitting => "SUBMITTING",
            TransactionStatus::Submitted => "SUBMITTED",
            TransactionStatus::Confirmed => "CONFIRMED",
            TransactionStatus::Failed => "FAILED",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransactionStatus::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown transaction status: {}", s))
    }
}

//! Signature request state machine
//!
//! `Pending -> Signing -> Completed`, with `Failed` and `Expired` reachable
//! from both non-terminal states.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[repr(i16)]
pub enum SignatureStatus {
    Pending = 0,
    /// Signer call in flight
    Signing = 10,
    Completed = 20,
    Failed = -10,
    Expired = -20,
}

impl SignatureStatus {
    pub const ALL: [SignatureStatus; 5] = [
        SignatureStatus::Pending,
        SignatureStatus::Signing,
        SignatureStatus::Completed,
        SignatureStatus::Failed,
        SignatureStatus::Expired,
    ];

    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SignatureStatus::Completed | SignatureStatus::Failed | SignatureStatus::Expired
        )
    }

    pub fn can_transition_to(&self, next: SignatureStatus) -> bool {
        use SignatureStatus::*;
        matches!(
            (self, next),
            (Pending, Signing)
                | (Pending, Failed)
                | (Pending, Expired)
                | (Signing, Completed)
                | (Signing, Failed)
                | (Signing, Expired)
        )
    }

    #[inline]
    pub fn id(&self) -> i16 {
        *self as i16
    }

    pub fn from_id(id: i16) -> Option<Self> {
        match id {
            0 => Some(SignatureStatus::Pending),
            10 => Some(SignatureStatus::Signing),
            20 => Some(SignatureStatus::Completed),
            -10 => Some(SignatureStatus::Failed),
            -20 => Some(SignatureStatus::Expired),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureStatus::Pending => "PENDING",
            SignatureStatus::Signing => "SIGNING",
            SignatureStatus::Completed => "COMPLETED",
            SignatureStatus::Failed => "FAILED",
            SignatureStatus::Expired => "EXPIRED",
        }
    }
}

impl fmt::Display for SignatureStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SignatureStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SignatureStatus::ALL
            .into_iter()
            .find(|st| st.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown signature status: {}", s))
    }
}

//! Lifecycle of a single forward request.
//!
//! Built -> Signed -> Submitted -> Verified -> Executed -> {Succeeded | Reverted}
//!                             \-> Rejected(SignatureMismatch | NonceMismatch)

use serde::{Deserialize, Serialize};

use crate::{ForwarderError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RejectReason {
    SignatureMismatch,
    NonceMismatch,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RequestState {
    Built,
    Signed,
    Submitted,
    Verified,
    Executed,
    Succeeded,
    Reverted,
    Rejected(RejectReason),
}

impl RequestState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestState::Succeeded | RequestState::Reverted | RequestState::Rejected(_)
        )
    }

    pub fn can_transition_to(&self, next: RequestState) -> bool {
        use RequestState::*;
        matches!(
            (self, next),
            (Built, Signed)
                | (Signed, Submitted)
                | (Submitted, Verified)
                | (Submitted, Rejected(_))
                | (Verified, Executed)
                | (Executed, Succeeded)
                | (Executed, Reverted)
        )
    }

    /// Advance to `next`, failing on any edge not in the lifecycle graph.
    pub fn transition(self, next: RequestState) -> Result<RequestState> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(ForwarderError::Other(format!(
                "illegal request state transition {:?} -> {:?}",
                self, next
            )))
        }
    }
}

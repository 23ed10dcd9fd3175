use serde::{Deserialize, Serialize};

use stockline_core::{Entity, PaymentId};

/// Lifecycle of one recorded payment.
///
/// Payments record facts reported by the external gateway integration; the
/// order only encodes the structural rule that completed payments must cover
/// the total. Confirming external truth before completion is the
/// orchestration layer's job.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentState {
    Pending,
    Completed,
    Failed,
    Void,
}

impl PaymentState {
    pub fn can_transition_to(self, next: PaymentState) -> bool {
        use PaymentState::*;
        matches!(
            (self, next),
            (Pending, Completed) | (Pending, Failed) | (Pending, Void) | (Completed, Void)
        )
    }
}

impl core::fmt::Display for PaymentState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Void => "void",
        };
        f.write_str(s)
    }
}

/// One payment against an order, in minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub amount_cents: i64,
    pub state: PaymentState,
}

impl Entity for Payment {
    type Id = PaymentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_fans_out_and_terminal_states_stay_put() {
        assert!(PaymentState::Pending.can_transition_to(PaymentState::Completed));
        assert!(PaymentState::Pending.can_transition_to(PaymentState::Failed));
        assert!(PaymentState::Completed.can_transition_to(PaymentState::Void));
        assert!(!PaymentState::Failed.can_transition_to(PaymentState::Completed));
        assert!(!PaymentState::Void.can_transition_to(PaymentState::Pending));
    }
}

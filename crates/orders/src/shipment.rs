use serde::{Deserialize, Serialize};

use stockline_core::{Entity, ShipmentId, StockLocationId};

/// Lifecycle of one shipment record.
///
/// `Pending` shipments are waiting on fulfillment; a shipment must be
/// `Ready` or `Shipped` before the owning order may complete.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShipmentState {
    Pending,
    Ready,
    Shipped,
}

impl ShipmentState {
    pub fn can_transition_to(self, next: ShipmentState) -> bool {
        use ShipmentState::*;
        matches!((self, next), (Pending, Ready) | (Ready, Shipped))
    }
}

impl core::fmt::Display for ShipmentState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Shipped => "shipped",
        };
        f.write_str(s)
    }
}

/// One shipment of an order, fulfilled from a stock location chosen by the
/// external placement policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Shipment {
    pub id: ShipmentId,
    pub stock_location_id: StockLocationId,
    pub cost_cents: i64,
    pub state: ShipmentState,
}

impl Entity for Shipment {
    type Id = ShipmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl Shipment {
    /// Whether this shipment no longer blocks order completion.
    pub fn is_fulfillment_ready(&self) -> bool {
        matches!(self.state, ShipmentState::Ready | ShipmentState::Shipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shipment_progresses_linearly() {
        assert!(ShipmentState::Pending.can_transition_to(ShipmentState::Ready));
        assert!(ShipmentState::Ready.can_transition_to(ShipmentState::Shipped));
        assert!(!ShipmentState::Pending.can_transition_to(ShipmentState::Shipped));
        assert!(!ShipmentState::Shipped.can_transition_to(ShipmentState::Ready));
    }
}

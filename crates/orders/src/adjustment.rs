use serde::{Deserialize, Serialize};

use stockline_core::{AdjustmentId, Entity};

/// A signed amount applied on top of the item and shipment totals
/// (promotions, manual corrections, surcharges).
///
/// Adjustments may be negative; the owning order rejects any change that
/// would drive its total below zero.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Adjustment {
    pub id: AdjustmentId,
    pub label: String,
    pub amount_cents: i64,
}

impl Entity for Adjustment {
    type Id = AdjustmentId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

use serde::{Deserialize, Serialize};

use stockline_core::{Entity, LineItemId, ValueObject, VariantId};

/// Price captured at the moment a line item is added to an order.
///
/// Later catalog price changes never retroactively alter an order already in
/// progress; the snapshot is the contract with the buyer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    /// Unit price in minor currency units (cents).
    pub unit_price_cents: i64,
    /// ISO currency code, matching the owning order.
    pub currency: String,
}

impl ValueObject for PriceSnapshot {}

/// One purchasable position of an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub id: LineItemId,
    pub variant_id: VariantId,
    pub quantity: i64,
    pub price: PriceSnapshot,
    pub requires_shipping: bool,
}

impl Entity for LineItem {
    type Id = LineItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }
}

impl LineItem {
    /// Extended amount: quantity times the snapshotted unit price.
    pub fn amount_cents(&self) -> i64 {
        self.quantity * self.price.unit_price_cents
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockline_core::{DomainError, StockItemId, StockTransferId, ValueObject};

/// Maximum length accepted for a free-text movement reason.
const MAX_REASON_LEN: usize = 255;

/// What caused a stock movement.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementOriginator {
    /// Manual or corrective quantity change.
    Adjustment,
    /// Quantity earmarked against an open order.
    Reservation,
    /// Earmark returned to the sellable pool.
    Release,
    /// Quantity physically left the location.
    Shipment,
    /// Leg of a location-to-location transfer.
    Transfer,
    /// Goods received from an external supplier.
    Receipt,
}

impl MovementOriginator {
    /// Whether movements with this originator apply to the on-hand counter.
    /// `Reservation`/`Release` deltas apply to the reserved counter instead.
    pub fn affects_on_hand(self) -> bool {
        !matches!(self, Self::Reservation | Self::Release)
    }
}

impl core::fmt::Display for MovementOriginator {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Adjustment => "adjustment",
            Self::Reservation => "reservation",
            Self::Release => "release",
            Self::Shipment => "shipment",
            Self::Transfer => "transfer",
            Self::Receipt => "receipt",
        };
        f.write_str(s)
    }
}

/// Immutable audit record of a quantity delta applied to a stock item.
///
/// Movements are facts: once created they never change, and the stream of
/// movements for a stock item is its append-only ledger. The delta applies to
/// the on-hand counter for `Adjustment`/`Shipment`/`Transfer`/`Receipt`
/// originators and to the reserved counter for `Reservation`/`Release`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockMovement {
    pub stock_item_id: StockItemId,
    pub quantity_delta: i64,
    pub originator: MovementOriginator,
    pub reason: Option<String>,
    /// Back-reference to the transfer this movement is a leg of, if any.
    pub stock_transfer_id: Option<StockTransferId>,
    pub occurred_at: DateTime<Utc>,
}

impl ValueObject for StockMovement {}

impl StockMovement {
    /// Creation validation: a movement must describe a real delta and a
    /// bounded reason. Nothing else about a movement is checked here - the
    /// owning stock item decides whether the delta is *permitted*.
    pub fn new(
        stock_item_id: StockItemId,
        quantity_delta: i64,
        originator: MovementOriginator,
        reason: Option<String>,
        stock_transfer_id: Option<StockTransferId>,
        occurred_at: DateTime<Utc>,
    ) -> Result<Self, DomainError> {
        if quantity_delta == 0 {
            return Err(DomainError::validation("movement delta cannot be zero"));
        }
        if let Some(reason) = &reason {
            if reason.len() > MAX_REASON_LEN {
                return Err(DomainError::validation(format!(
                    "movement reason exceeds {MAX_REASON_LEN} characters"
                )));
            }
        }

        Ok(Self {
            stock_item_id,
            quantity_delta,
            originator,
            reason,
            stock_transfer_id,
            occurred_at,
        })
    }
}

use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;

use stockline_core::{AggregateId, StockItemId};
use stockline_events::EventEnvelope;
use stockline_stock::{STOCK_ITEM_AGGREGATE_TYPE, StockItemEvent, StockMovement};

use crate::read_model::KeyedStore;

#[derive(Debug, Error)]
pub enum MovementLogProjectionError {
    #[error("failed to deserialize stock item event: {0}")]
    Deserialize(String),
}

/// Append-only movement ledger per stock item.
///
/// Materializes the `StockMovement` payloads embedded in the stock item
/// events into a queryable audit trail. Transfer legs keep their
/// back-reference to the originating transfer, so a transfer's execution
/// state is derivable from this log alone.
#[derive(Debug)]
pub struct MovementLogProjection<S>
where
    S: KeyedStore<StockItemId, Vec<StockMovement>>,
{
    store: S,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl<S> MovementLogProjection<S>
where
    S: KeyedStore<StockItemId, Vec<StockMovement>>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    /// All movements recorded for one stock item, in stream order.
    pub fn movements(&self, stock_item_id: &StockItemId) -> Vec<StockMovement> {
        self.store.get(stock_item_id).unwrap_or_default()
    }

    /// Apply a published envelope into the log. Idempotent under
    /// at-least-once delivery; envelopes of other aggregate types are
    /// ignored.
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), MovementLogProjectionError> {
        if envelope.aggregate_type() != STOCK_ITEM_AGGREGATE_TYPE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let mut cursors = match self.cursors.write() {
            Ok(c) => c,
            Err(_) => return Ok(()),
        };
        if seq <= *cursors.get(&aggregate_id).unwrap_or(&0) {
            // Duplicate or replay; safe to ignore.
            return Ok(());
        }

        let event: StockItemEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| MovementLogProjectionError::Deserialize(e.to_string()))?;

        let movement = match &event {
            StockItemEvent::StockItemCreated(e) => e.movement.clone(),
            StockItemEvent::StockAdjusted(e) => Some(e.movement.clone()),
            StockItemEvent::StockReserved(e) => Some(e.movement.clone()),
            StockItemEvent::StockReleased(e) => Some(e.movement.clone()),
            StockItemEvent::ShipmentConfirmed(e) => Some(e.movement.clone()),
            // Backorder fills shuffle the queue without moving quantity.
            StockItemEvent::BackordersProcessed(_) => None,
        };

        if let Some(movement) = movement {
            let key = movement.stock_item_id;
            let mut log = self.store.get(&key).unwrap_or_default();
            log.push(movement);
            self.store.upsert(key, log);
        }

        cursors.insert(aggregate_id, seq);
        Ok(())
    }
}

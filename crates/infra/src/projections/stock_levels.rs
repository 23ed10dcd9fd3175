use std::collections::HashMap;
use std::sync::RwLock;

use serde_json::Value as JsonValue;
use thiserror::Error;

use stockline_core::{AggregateId, StockItemId, StockLocationId, VariantId};
use stockline_events::EventEnvelope;
use stockline_stock::{STOCK_ITEM_AGGREGATE_TYPE, StockItemEvent};

use crate::read_model::KeyedStore;

/// Queryable stock read model: current counters per stock item.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockLevel {
    pub stock_item_id: StockItemId,
    pub variant_id: VariantId,
    pub location_id: StockLocationId,
    pub on_hand: i64,
    pub reserved: i64,
    pub backordered: i64,
}

impl StockLevel {
    /// Sellable headroom, mirroring the aggregate's definition.
    pub fn available(&self) -> i64 {
        self.on_hand - self.reserved
    }
}

#[derive(Debug, Error)]
pub enum StockLevelsProjectionError {
    #[error("failed to deserialize stock item event: {0}")]
    Deserialize(String),

    #[error("event references an unknown stock item {0}")]
    UnknownStockItem(StockItemId),

    #[error("non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence { last: u64, found: u64 },
}

/// Stock levels projection.
///
/// Consumes published envelopes (JSON payloads) and maintains one row per
/// stock item. Read models are disposable and rebuildable from the stream.
#[derive(Debug)]
pub struct StockLevelsProjection<S>
where
    S: KeyedStore<StockItemId, StockLevel>,
{
    store: S,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl<S> StockLevelsProjection<S>
where
    S: KeyedStore<StockItemId, StockLevel>,
{
    pub fn new(store: S) -> Self {
        Self {
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    /// Query the row for one stock item.
    pub fn get(&self, stock_item_id: &StockItemId) -> Option<StockLevel> {
        self.store.get(stock_item_id)
    }

    /// List all rows.
    pub fn list(&self) -> Vec<StockLevel> {
        self.store.list()
    }

    /// Apply a published envelope into the projection.
    ///
    /// - Enforces monotonic sequence per stream
    /// - Idempotent for at-least-once delivery (replays <= cursor are ignored)
    /// - Ignores envelopes of other aggregate types
    pub fn apply_envelope(
        &self,
        envelope: &EventEnvelope<JsonValue>,
    ) -> Result<(), StockLevelsProjectionError> {
        if envelope.aggregate_type() != STOCK_ITEM_AGGREGATE_TYPE {
            return Ok(());
        }

        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let mut cursors = match self.cursors.write() {
            Ok(c) => c,
            Err(_) => return Ok(()),
        };
        let last = *cursors.get(&aggregate_id).unwrap_or(&0);

        if seq == 0 {
            return Err(StockLevelsProjectionError::NonMonotonicSequence { last, found: seq });
        }
        if seq <= last {
            // Duplicate or replay; safe to ignore.
            return Ok(());
        }
        if last != 0 && seq != last + 1 {
            return Err(StockLevelsProjectionError::NonMonotonicSequence { last, found: seq });
        }

        let event: StockItemEvent = serde_json::from_value(envelope.payload().clone())
            .map_err(|e| StockLevelsProjectionError::Deserialize(e.to_string()))?;

        match &event {
            StockItemEvent::StockItemCreated(e) => {
                self.store.upsert(
                    e.stock_item_id,
                    StockLevel {
                        stock_item_id: e.stock_item_id,
                        variant_id: e.variant_id,
                        location_id: e.location_id,
                        on_hand: e.initial_on_hand,
                        reserved: 0,
                        backordered: 0,
                    },
                );
            }
            StockItemEvent::StockAdjusted(e) => {
                let mut row = self
                    .store
                    .get(&e.stock_item_id)
                    .ok_or(StockLevelsProjectionError::UnknownStockItem(e.stock_item_id))?;
                row.on_hand += e.movement.quantity_delta;
                self.store.upsert(e.stock_item_id, row);
            }
            StockItemEvent::StockReserved(e) => {
                let mut row = self
                    .store
                    .get(&e.stock_item_id)
                    .ok_or(StockLevelsProjectionError::UnknownStockItem(e.stock_item_id))?;
                row.reserved += e.quantity;
                row.backordered += e.backordered_quantity;
                self.store.upsert(e.stock_item_id, row);
            }
            StockItemEvent::StockReleased(e) => {
                let mut row = self
                    .store
                    .get(&e.stock_item_id)
                    .ok_or(StockLevelsProjectionError::UnknownStockItem(e.stock_item_id))?;
                row.reserved -= e.quantity;
                row.backordered -= e.backordered_quantity;
                self.store.upsert(e.stock_item_id, row);
            }
            StockItemEvent::ShipmentConfirmed(e) => {
                let mut row = self
                    .store
                    .get(&e.stock_item_id)
                    .ok_or(StockLevelsProjectionError::UnknownStockItem(e.stock_item_id))?;
                row.on_hand -= e.quantity;
                row.reserved -= e.quantity;
                self.store.upsert(e.stock_item_id, row);
            }
            StockItemEvent::BackordersProcessed(e) => {
                let mut row = self
                    .store
                    .get(&e.stock_item_id)
                    .ok_or(StockLevelsProjectionError::UnknownStockItem(e.stock_item_id))?;
                row.backordered -= e.fills.iter().map(|f| f.quantity).sum::<i64>();
                self.store.upsert(e.stock_item_id, row);
            }
        }

        cursors.insert(aggregate_id, seq);
        Ok(())
    }
}

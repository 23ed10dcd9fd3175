use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;

use stockline_core::{
    DomainError, InventoryUnitId, StockItemId, StockLocationId, StockTransferId, StoreId,
    VariantId,
};
use stockline_events::{EventBus, EventEnvelope};
use stockline_stock::{
    AdjustStock, ClearDefault, CreateStockItem, CreateStockLocation, DeleteStockLocation,
    LinkStore, MakeDefault, MovementOriginator, RegisterStockItem, ReleaseStock, ReserveStock,
    RestoreStockLocation, STOCK_ITEM_AGGREGATE_TYPE, STOCK_LOCATION_AGGREGATE_TYPE,
    StockInvariantViolation, StockItem, StockItemCommand, StockItemEvent, StockLocation,
    StockLocationCommand, StockReserved, UnlinkStore, UpdateStockLocation, validate_invariants,
};

use crate::command_dispatcher::{CommandDispatcher, DEFAULT_MAX_ATTEMPTS, DispatchError};
use crate::event_store::EventStore;

/// Location and stock-item orchestration.
///
/// Thin delegation into the aggregates plus the checks that need visibility
/// across streams (deletion guards, default uniqueness, item-or-create).
/// Reservation-path commands run through the bounded conflict-retry loop.
pub struct StockService<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    max_attempts: u32,
}

impl<S, B> Clone for StockService<S, B> {
    fn clone(&self) -> Self {
        Self {
            dispatcher: Arc::clone(&self.dispatcher),
            max_attempts: self.max_attempts,
        }
    }
}

impl<S, B> StockService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>) -> Self {
        Self {
            dispatcher,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn dispatcher(&self) -> &Arc<CommandDispatcher<S, B>> {
        &self.dispatcher
    }

    /// Load a location, requiring that it exists.
    pub fn load_location(
        &self,
        location_id: StockLocationId,
    ) -> Result<StockLocation, DispatchError> {
        let location = self
            .dispatcher
            .load_aggregate(location_id.as_aggregate_id(), |id| {
                StockLocation::empty(StockLocationId::new(id))
            })?;
        if !location.is_created() {
            return Err(DomainError::not_found().into());
        }
        Ok(location)
    }

    /// Load a stock item, requiring that it exists.
    pub fn load_item(&self, stock_item_id: StockItemId) -> Result<StockItem, DispatchError> {
        let item = self
            .dispatcher
            .load_aggregate(stock_item_id.as_aggregate_id(), |id| {
                StockItem::empty(StockItemId::new(id))
            })?;
        if !item.is_created() {
            return Err(DomainError::not_found().into());
        }
        Ok(item)
    }

    pub fn create_location(
        &self,
        name: impl Into<String>,
        code: Option<String>,
        active: bool,
    ) -> Result<StockLocationId, DispatchError> {
        let location_id = StockLocationId::generate();
        self.dispatcher.dispatch(
            location_id.as_aggregate_id(),
            STOCK_LOCATION_AGGREGATE_TYPE,
            &StockLocationCommand::CreateStockLocation(CreateStockLocation {
                location_id,
                name: name.into(),
                code,
                active,
                occurred_at: Utc::now(),
            }),
            |id| StockLocation::empty(StockLocationId::new(id)),
        )?;
        Ok(location_id)
    }

    pub fn update_location(
        &self,
        location_id: StockLocationId,
        name: Option<String>,
        code: Option<String>,
        active: Option<bool>,
    ) -> Result<(), DispatchError> {
        self.dispatch_location(
            location_id,
            &StockLocationCommand::UpdateStockLocation(UpdateStockLocation {
                location_id,
                name,
                code,
                active,
                occurred_at: Utc::now(),
            }),
        )
    }

    /// Make `location_id` the system default, clearing `previous_default`
    /// first. At-most-one-default is enforced here, not in the aggregate.
    pub fn make_default(
        &self,
        location_id: StockLocationId,
        previous_default: Option<StockLocationId>,
    ) -> Result<(), DispatchError> {
        if let Some(previous) = previous_default.filter(|p| *p != location_id) {
            self.dispatch_location(
                previous,
                &StockLocationCommand::ClearDefault(ClearDefault {
                    location_id: previous,
                    occurred_at: Utc::now(),
                }),
            )?;
        }
        self.dispatch_location(
            location_id,
            &StockLocationCommand::MakeDefault(MakeDefault {
                location_id,
                occurred_at: Utc::now(),
            }),
        )
    }

    /// Soft-delete a location. Blocked while any owned stock item still has
    /// reserved quantity; pending-transfer checks are the orchestration
    /// layer's separate responsibility (this service cannot see transfers).
    pub fn delete_location(&self, location_id: StockLocationId) -> Result<(), DispatchError> {
        let location = self.load_location(location_id)?;
        for (variant_id, stock_item_id) in location.stock_items() {
            let item = self.load_item(*stock_item_id)?;
            if item.reserved() > 0 {
                tracing::warn!(%location_id, %variant_id, reserved = item.reserved(),
                    "refusing to delete location with reserved stock");
                return Err(DomainError::conflict(
                    "location has stock items with reserved quantity",
                )
                .into());
            }
        }
        self.dispatch_location(
            location_id,
            &StockLocationCommand::DeleteStockLocation(DeleteStockLocation {
                location_id,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn restore_location(&self, location_id: StockLocationId) -> Result<(), DispatchError> {
        self.dispatch_location(
            location_id,
            &StockLocationCommand::RestoreStockLocation(RestoreStockLocation {
                location_id,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn link_store(
        &self,
        location_id: StockLocationId,
        store_id: StoreId,
    ) -> Result<(), DispatchError> {
        self.dispatch_location(
            location_id,
            &StockLocationCommand::LinkStore(LinkStore {
                location_id,
                store_id,
                occurred_at: Utc::now(),
            }),
        )
    }

    pub fn unlink_store(
        &self,
        location_id: StockLocationId,
        store_id: StoreId,
    ) -> Result<(), DispatchError> {
        self.dispatch_location(
            location_id,
            &StockLocationCommand::UnlinkStore(UnlinkStore {
                location_id,
                store_id,
                occurred_at: Utc::now(),
            }),
        )
    }

    /// Return the stock item tracking `variant_id` at the location, creating
    /// it with zero on-hand on first use. Idempotent.
    pub fn stock_item_or_create(
        &self,
        location_id: StockLocationId,
        variant_id: VariantId,
        backorderable: bool,
    ) -> Result<StockItemId, DispatchError> {
        let location = self.load_location(location_id)?;
        if let Some(existing) = location.stock_item_for(variant_id) {
            return Ok(existing);
        }

        let stock_item_id = StockItemId::generate();
        self.dispatcher.dispatch(
            stock_item_id.as_aggregate_id(),
            STOCK_ITEM_AGGREGATE_TYPE,
            &StockItemCommand::CreateStockItem(CreateStockItem {
                stock_item_id,
                variant_id,
                location_id,
                initial_on_hand: 0,
                backorderable,
                occurred_at: Utc::now(),
            }),
            |id| StockItem::empty(StockItemId::new(id)),
        )?;

        let registered = self.dispatcher.dispatch_with_retry(
            location_id.as_aggregate_id(),
            STOCK_LOCATION_AGGREGATE_TYPE,
            &StockLocationCommand::RegisterStockItem(RegisterStockItem {
                location_id,
                variant_id,
                stock_item_id,
                occurred_at: Utc::now(),
            }),
            |id| StockLocation::empty(StockLocationId::new(id)),
            self.max_attempts,
        );
        match registered {
            Ok(_) => Ok(stock_item_id),
            // A concurrent creator registered first; their item wins and the
            // orphan stream created above is never referenced again.
            Err(err) if err.is_retriable() => {
                let location = self.load_location(location_id)?;
                location
                    .stock_item_for(variant_id)
                    .ok_or_else(|| DomainError::not_found().into())
            }
            Err(other) => Err(other),
        }
    }

    /// Add quantity at a location (manual restock).
    pub fn restock(
        &self,
        location_id: StockLocationId,
        variant_id: VariantId,
        quantity: i64,
        reason: Option<String>,
    ) -> Result<StockItemId, DispatchError> {
        self.adjust_at(
            location_id,
            variant_id,
            quantity,
            MovementOriginator::Adjustment,
            reason,
            None,
            true,
        )
    }

    /// Remove quantity at a location (manual unstock). The stock item rejects
    /// any removal that would invalidate existing reservations.
    pub fn unstock(
        &self,
        location_id: StockLocationId,
        variant_id: VariantId,
        quantity: i64,
        reason: Option<String>,
    ) -> Result<StockItemId, DispatchError> {
        self.adjust_at(
            location_id,
            variant_id,
            -quantity,
            MovementOriginator::Adjustment,
            reason,
            None,
            false,
        )
    }

    /// Shared restock/unstock path. Location-level validation first, then
    /// delegation to the stock item's adjust operation.
    pub(crate) fn adjust_at(
        &self,
        location_id: StockLocationId,
        variant_id: VariantId,
        delta: i64,
        originator: MovementOriginator,
        reason: Option<String>,
        stock_transfer_id: Option<StockTransferId>,
        create_if_missing: bool,
    ) -> Result<StockItemId, DispatchError> {
        if delta == 0 {
            return Err(DomainError::validation("quantity must be positive").into());
        }

        let stock_item_id = if create_if_missing {
            self.stock_item_or_create(location_id, variant_id, false)?
        } else {
            let location = self.load_location(location_id)?;
            location
                .stock_item_for(variant_id)
                .ok_or_else(|| DispatchError::from(DomainError::not_found()))?
        };

        self.dispatcher.dispatch_with_retry(
            stock_item_id.as_aggregate_id(),
            STOCK_ITEM_AGGREGATE_TYPE,
            &StockItemCommand::AdjustStock(AdjustStock {
                stock_item_id,
                delta,
                originator,
                reason,
                stock_transfer_id,
                occurred_at: Utc::now(),
            }),
            |id| StockItem::empty(StockItemId::new(id)),
            self.max_attempts,
        )?;
        Ok(stock_item_id)
    }

    /// Reserve quantity against open orders, retrying the read-modify-write
    /// cycle on conflicts up to the configured bound. Returns the reservation
    /// decision (including how much of it backordered).
    pub fn reserve(
        &self,
        stock_item_id: StockItemId,
        quantity: i64,
        unit_id: Option<InventoryUnitId>,
    ) -> Result<StockReserved, DispatchError> {
        let committed = self.dispatcher.dispatch_with_retry(
            stock_item_id.as_aggregate_id(),
            STOCK_ITEM_AGGREGATE_TYPE,
            &StockItemCommand::ReserveStock(ReserveStock {
                stock_item_id,
                quantity,
                unit_id,
                occurred_at: Utc::now(),
            }),
            |id| StockItem::empty(StockItemId::new(id)),
            self.max_attempts,
        )?;

        let first = committed.first().ok_or_else(|| {
            DispatchError::StreamIntegrity("reservation produced no event".to_string())
        })?;
        match serde_json::from_value(first.payload.clone()) {
            Ok(StockItemEvent::StockReserved(e)) => Ok(e),
            Ok(_) | Err(_) => Err(DispatchError::Deserialize(
                "expected a stock.item.reserved event".to_string(),
            )),
        }
    }

    /// Return reserved quantity to the sellable pool.
    pub fn release(
        &self,
        stock_item_id: StockItemId,
        quantity: i64,
        unit_id: Option<InventoryUnitId>,
    ) -> Result<(), DispatchError> {
        self.dispatcher.dispatch_with_retry(
            stock_item_id.as_aggregate_id(),
            STOCK_ITEM_AGGREGATE_TYPE,
            &StockItemCommand::ReleaseStock(ReleaseStock {
                stock_item_id,
                quantity,
                unit_id,
                occurred_at: Utc::now(),
            }),
            |id| StockItem::empty(StockItemId::new(id)),
            self.max_attempts,
        )?;
        Ok(())
    }

    /// Read-only consistency verification for one location and its items.
    pub fn validate_location(
        &self,
        location_id: StockLocationId,
    ) -> Result<Option<StockInvariantViolation>, DispatchError> {
        let location = self.load_location(location_id)?;
        let mut items = Vec::with_capacity(location.stock_items().len());
        for stock_item_id in location.stock_items().values() {
            items.push(self.load_item(*stock_item_id)?);
        }
        Ok(validate_invariants(&location, &items))
    }

    fn dispatch_location(
        &self,
        location_id: StockLocationId,
        command: &StockLocationCommand,
    ) -> Result<(), DispatchError> {
        self.dispatcher.dispatch(
            location_id.as_aggregate_id(),
            STOCK_LOCATION_AGGREGATE_TYPE,
            command,
            |id| StockLocation::empty(StockLocationId::new(id)),
        )?;
        Ok(())
    }
}

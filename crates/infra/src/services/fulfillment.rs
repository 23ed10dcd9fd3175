use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;

use stockline_core::{
    DomainError, InventoryUnitId, OrderId, ShipmentId, StockItemId, StockLocationId,
};
use stockline_events::{EventBus, EventEnvelope};
use stockline_orders::{
    CancelUnit, CreateInventoryUnit, FillBackorder, INVENTORY_UNIT_AGGREGATE_TYPE, InventoryUnit,
    InventoryUnitCommand, LineItem, ShipUnit,
};
use stockline_stock::{
    BackorderFill, ConfirmShipment, ProcessBackorders, STOCK_ITEM_AGGREGATE_TYPE, StockItem,
    StockItemCommand, StockItemEvent,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::services::stock::StockService;

/// Units created when a line item committed its quantity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedUnits {
    pub stock_item_id: StockItemId,
    /// Block covered by on-hand stock, if any.
    pub on_hand: Option<InventoryUnitId>,
    /// Block waiting on a restock, if any.
    pub backordered: Option<InventoryUnitId>,
}

/// Coordination between stock reservations and inventory units.
///
/// This service plays the roles the orchestration layer wires to the order
/// signals: committing line items when checkout locks quantities, releasing
/// units when an order cancels, filling backorders when stock arrives, and
/// confirming physical shipment. Each multi-step method assumes the caller's
/// transaction boundary.
pub struct FulfillmentService<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    stock: StockService<S, B>,
}

impl<S, B> FulfillmentService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>) -> Self {
        let stock = StockService::new(Arc::clone(&dispatcher));
        Self { dispatcher, stock }
    }

    /// Commit a line item's quantity at the location chosen by the external
    /// placement policy: reserve the stock, then create the unit block(s).
    ///
    /// The reservation decides atomically how much backorders; the unit for
    /// the backordered block is pre-minted so the stock item's queue can
    /// reference it.
    pub fn commit_line_item(
        &self,
        order_id: OrderId,
        line_item: &LineItem,
        location_id: StockLocationId,
    ) -> Result<CommittedUnits, DispatchError> {
        let backorder_unit_id = InventoryUnitId::generate();
        let stock_item_id =
            self.stock
                .stock_item_or_create(location_id, line_item.variant_id, false)?;

        let reserved = self
            .stock
            .reserve(stock_item_id, line_item.quantity, Some(backorder_unit_id))?;

        let backordered_quantity = reserved.backordered_quantity;
        let on_hand_quantity = line_item.quantity - backordered_quantity;

        let on_hand = if on_hand_quantity > 0 {
            let unit_id = InventoryUnitId::generate();
            self.create_unit(order_id, line_item, unit_id, on_hand_quantity, false)?;
            Some(unit_id)
        } else {
            None
        };
        let backordered = if backordered_quantity > 0 {
            self.create_unit(
                order_id,
                line_item,
                backorder_unit_id,
                backordered_quantity,
                true,
            )?;
            Some(backorder_unit_id)
        } else {
            None
        };

        tracing::debug!(
            %order_id,
            line_item_id = %line_item.id,
            %stock_item_id,
            on_hand_quantity,
            backordered_quantity,
            "line item committed"
        );

        Ok(CommittedUnits {
            stock_item_id,
            on_hand,
            backordered,
        })
    }

    /// Fill waiting backorders from newly available stock and transition the
    /// filled units to on-hand. Returns the fills that happened.
    pub fn process_backorders(
        &self,
        stock_item_id: StockItemId,
    ) -> Result<Vec<BackorderFill>, DispatchError> {
        let committed = self.dispatcher.dispatch(
            stock_item_id.as_aggregate_id(),
            STOCK_ITEM_AGGREGATE_TYPE,
            &StockItemCommand::ProcessBackorders(ProcessBackorders {
                stock_item_id,
                occurred_at: Utc::now(),
            }),
            |id| StockItem::empty(StockItemId::new(id)),
        )?;

        let Some(first) = committed.first() else {
            return Ok(vec![]);
        };
        let fills = match serde_json::from_value(first.payload.clone()) {
            Ok(StockItemEvent::BackordersProcessed(e)) => e.fills,
            Ok(_) | Err(_) => {
                return Err(DispatchError::Deserialize(
                    "expected a stock.item.backorders_processed event".to_string(),
                ));
            }
        };

        for fill in &fills {
            self.dispatch_unit(
                fill.unit_id,
                &InventoryUnitCommand::FillBackorder(FillBackorder {
                    unit_id: fill.unit_id,
                    occurred_at: Utc::now(),
                }),
            )?;
        }

        Ok(fills)
    }

    /// Confirm physical shipment: decrement the stock item's counters by the
    /// units' combined quantity and transition each unit to shipped. Returns
    /// the shipped quantity.
    pub fn ship(
        &self,
        stock_item_id: StockItemId,
        shipment_id: ShipmentId,
        unit_ids: &[InventoryUnitId],
    ) -> Result<i64, DispatchError> {
        let mut quantity = 0;
        for unit_id in unit_ids {
            let unit = self.load_unit(*unit_id)?;
            quantity += unit.quantity();
        }
        if quantity == 0 {
            return Ok(0);
        }

        self.dispatcher.dispatch(
            stock_item_id.as_aggregate_id(),
            STOCK_ITEM_AGGREGATE_TYPE,
            &StockItemCommand::ConfirmShipment(ConfirmShipment {
                stock_item_id,
                quantity,
                occurred_at: Utc::now(),
            }),
            |id| StockItem::empty(StockItemId::new(id)),
        )?;

        for unit_id in unit_ids {
            self.dispatch_unit(
                *unit_id,
                &InventoryUnitCommand::ShipUnit(ShipUnit {
                    unit_id: *unit_id,
                    shipment_id,
                    occurred_at: Utc::now(),
                }),
            )?;
        }

        Ok(quantity)
    }

    /// Release-inventory consumer: cancel each unit and hand its reservation
    /// back to the sellable pool. Already-terminal units are skipped. Returns
    /// the total quantity released.
    pub fn cancel_units(
        &self,
        stock_item_id: StockItemId,
        unit_ids: &[InventoryUnitId],
    ) -> Result<i64, DispatchError> {
        let mut released = 0;
        for unit_id in unit_ids {
            let unit = self.load_unit(*unit_id)?;
            if unit.is_terminal() {
                continue;
            }

            self.dispatch_unit(
                *unit_id,
                &InventoryUnitCommand::CancelUnit(CancelUnit {
                    unit_id: *unit_id,
                    occurred_at: Utc::now(),
                }),
            )?;
            self.stock
                .release(stock_item_id, unit.quantity(), Some(*unit_id))?;
            released += unit.quantity();
        }
        Ok(released)
    }

    fn create_unit(
        &self,
        order_id: OrderId,
        line_item: &LineItem,
        unit_id: InventoryUnitId,
        quantity: i64,
        backordered: bool,
    ) -> Result<(), DispatchError> {
        self.dispatch_unit(
            unit_id,
            &InventoryUnitCommand::CreateInventoryUnit(CreateInventoryUnit {
                unit_id,
                line_item_id: line_item.id,
                variant_id: line_item.variant_id,
                order_id,
                quantity,
                backordered,
                occurred_at: Utc::now(),
            }),
        )
    }

    fn load_unit(&self, unit_id: InventoryUnitId) -> Result<InventoryUnit, DispatchError> {
        let unit = self
            .dispatcher
            .load_aggregate(unit_id.as_aggregate_id(), |id| {
                InventoryUnit::empty(InventoryUnitId::new(id))
            })?;
        if !unit.is_created() {
            return Err(DomainError::not_found().into());
        }
        Ok(unit)
    }

    fn dispatch_unit(
        &self,
        unit_id: InventoryUnitId,
        command: &InventoryUnitCommand,
    ) -> Result<(), DispatchError> {
        self.dispatcher.dispatch(
            unit_id.as_aggregate_id(),
            INVENTORY_UNIT_AGGREGATE_TYPE,
            command,
            |id| InventoryUnit::empty(InventoryUnitId::new(id)),
        )?;
        Ok(())
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockline_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, InventoryUnitId, StockItemId,
    StockLocationId, StockTransferId, VariantId,
};
use stockline_events::{Command, Event};

use crate::movement::{MovementOriginator, StockMovement};

/// Stream type identifier for stock item aggregates.
pub const STOCK_ITEM_AGGREGATE_TYPE: &str = "stock.item";

/// A reservation that could not be covered by on-hand stock, waiting for a
/// future restock. Entries are filled in FIFO order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackorderEntry {
    pub unit_id: InventoryUnitId,
    pub quantity: i64,
}

/// Aggregate root: StockItem - the quantity ledger for one (variant, location)
/// pair.
///
/// Counter invariants, maintained by every operation:
/// - `on_hand >= 0` and `reserved >= 0`
/// - `reserved <= on_hand` whenever the item is not backorderable
///
/// The aggregate version is the concurrency token: reservation decisions are
/// only durable when the append succeeds against the version they were decided
/// at, so two racing writers can never both consume the last unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockItem {
    id: StockItemId,
    variant_id: VariantId,
    location_id: StockLocationId,
    on_hand: i64,
    reserved: i64,
    backorderable: bool,
    backorders: Vec<BackorderEntry>,
    version: u64,
    created: bool,
}

impl StockItem {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: StockItemId) -> Self {
        Self {
            id,
            variant_id: VariantId::from_uuid(uuid::Uuid::nil()),
            location_id: StockLocationId::new(AggregateId::from_uuid(uuid::Uuid::nil())),
            on_hand: 0,
            reserved: 0,
            backorderable: false,
            backorders: Vec::new(),
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> StockItemId {
        self.id
    }

    pub fn variant_id(&self) -> VariantId {
        self.variant_id
    }

    pub fn location_id(&self) -> StockLocationId {
        self.location_id
    }

    pub fn on_hand(&self) -> i64 {
        self.on_hand
    }

    pub fn reserved(&self) -> i64 {
        self.reserved
    }

    pub fn backorderable(&self) -> bool {
        self.backorderable
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    /// Sellable headroom: on-hand minus reserved. Negative only when a
    /// backorderable item is oversold.
    pub fn count_available(&self) -> i64 {
        self.on_hand - self.reserved
    }

    /// Reservations currently waiting on a restock, FIFO.
    pub fn backorders(&self) -> &[BackorderEntry] {
        &self.backorders
    }

    pub fn backordered_total(&self) -> i64 {
        self.backorders.iter().map(|e| e.quantity).sum()
    }
}

impl AggregateRoot for StockItem {
    type Id = StockItemId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateStockItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateStockItem {
    pub stock_item_id: StockItemId,
    pub variant_id: VariantId,
    pub location_id: StockLocationId,
    pub initial_on_hand: i64,
    pub backorderable: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdjustStock - apply a signed delta to on-hand.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustStock {
    pub stock_item_id: StockItemId,
    pub delta: i64,
    pub originator: MovementOriginator,
    pub reason: Option<String>,
    pub stock_transfer_id: Option<StockTransferId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReserveStock - earmark quantity against an open order.
///
/// `unit_id` names the inventory unit the reservation backs; it is required
/// whenever the reservation would backorder, so the backorder queue always
/// knows which unit a future restock should fill.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReserveStock {
    pub stock_item_id: StockItemId,
    pub quantity: i64,
    pub unit_id: Option<InventoryUnitId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReleaseStock - return an earmark to the sellable pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseStock {
    pub stock_item_id: StockItemId,
    pub quantity: i64,
    /// When the released reservation was backordered, names the queue entry
    /// to drop.
    pub unit_id: Option<InventoryUnitId>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ConfirmShipment - the quantity has physically left the location.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfirmShipment {
    pub stock_item_id: StockItemId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ProcessBackorders - fill waiting reservations from on-hand stock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessBackorders {
    pub stock_item_id: StockItemId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockItemCommand {
    CreateStockItem(CreateStockItem),
    AdjustStock(AdjustStock),
    ReserveStock(ReserveStock),
    ReleaseStock(ReleaseStock),
    ConfirmShipment(ConfirmShipment),
    ProcessBackorders(ProcessBackorders),
}

impl Command for StockItemCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        let id = match self {
            Self::CreateStockItem(c) => c.stock_item_id,
            Self::AdjustStock(c) => c.stock_item_id,
            Self::ReserveStock(c) => c.stock_item_id,
            Self::ReleaseStock(c) => c.stock_item_id,
            Self::ConfirmShipment(c) => c.stock_item_id,
            Self::ProcessBackorders(c) => c.stock_item_id,
        };
        id.as_aggregate_id()
    }
}

/// Event: StockItemCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockItemCreated {
    pub stock_item_id: StockItemId,
    pub variant_id: VariantId,
    pub location_id: StockLocationId,
    pub initial_on_hand: i64,
    pub backorderable: bool,
    /// Present when the item was created with stock already on hand.
    pub movement: Option<StockMovement>,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockAdjusted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockAdjusted {
    pub stock_item_id: StockItemId,
    pub movement: StockMovement,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReserved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReserved {
    pub stock_item_id: StockItemId,
    pub quantity: i64,
    /// Portion of `quantity` not covered by on-hand stock at decision time.
    pub backordered_quantity: i64,
    pub unit_id: Option<InventoryUnitId>,
    pub movement: StockMovement,
    pub occurred_at: DateTime<Utc>,
}

/// Event: StockReleased.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockReleased {
    pub stock_item_id: StockItemId,
    pub quantity: i64,
    pub unit_id: Option<InventoryUnitId>,
    /// Quantity dequeued from the backorder list (the named unit's whole
    /// entry, zero when no entry matched).
    pub backordered_quantity: i64,
    pub movement: StockMovement,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShipmentConfirmed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentConfirmed {
    pub stock_item_id: StockItemId,
    pub quantity: i64,
    pub movement: StockMovement,
    pub occurred_at: DateTime<Utc>,
}

/// One backorder queue entry filled by a restock.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackorderFill {
    pub unit_id: InventoryUnitId,
    pub quantity: i64,
}

/// Event: BackordersProcessed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackordersProcessed {
    pub stock_item_id: StockItemId,
    pub fills: Vec<BackorderFill>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockItemEvent {
    StockItemCreated(StockItemCreated),
    StockAdjusted(StockAdjusted),
    StockReserved(StockReserved),
    StockReleased(StockReleased),
    ShipmentConfirmed(ShipmentConfirmed),
    BackordersProcessed(BackordersProcessed),
}

impl Event for StockItemEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockItemEvent::StockItemCreated(_) => "stock.item.created",
            StockItemEvent::StockAdjusted(_) => "stock.item.adjusted",
            StockItemEvent::StockReserved(_) => "stock.item.reserved",
            StockItemEvent::StockReleased(_) => "stock.item.released",
            StockItemEvent::ShipmentConfirmed(_) => "stock.item.shipment_confirmed",
            StockItemEvent::BackordersProcessed(_) => "stock.item.backorders_processed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockItemEvent::StockItemCreated(e) => e.occurred_at,
            StockItemEvent::StockAdjusted(e) => e.occurred_at,
            StockItemEvent::StockReserved(e) => e.occurred_at,
            StockItemEvent::StockReleased(e) => e.occurred_at,
            StockItemEvent::ShipmentConfirmed(e) => e.occurred_at,
            StockItemEvent::BackordersProcessed(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockItem {
    type Command = StockItemCommand;
    type Event = StockItemEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockItemEvent::StockItemCreated(e) => {
                self.id = e.stock_item_id;
                self.variant_id = e.variant_id;
                self.location_id = e.location_id;
                self.on_hand = e.initial_on_hand;
                self.reserved = 0;
                self.backorderable = e.backorderable;
                self.backorders.clear();
                self.created = true;
            }
            StockItemEvent::StockAdjusted(e) => {
                self.on_hand += e.movement.quantity_delta;
            }
            StockItemEvent::StockReserved(e) => {
                self.reserved += e.quantity;
                if e.backordered_quantity > 0 {
                    if let Some(unit_id) = e.unit_id {
                        self.backorders.push(BackorderEntry {
                            unit_id,
                            quantity: e.backordered_quantity,
                        });
                    }
                }
            }
            StockItemEvent::StockReleased(e) => {
                self.reserved -= e.quantity;
                if let Some(unit_id) = e.unit_id {
                    self.backorders.retain(|entry| entry.unit_id != unit_id);
                }
            }
            StockItemEvent::ShipmentConfirmed(e) => {
                self.on_hand -= e.quantity;
                self.reserved -= e.quantity;
            }
            StockItemEvent::BackordersProcessed(e) => {
                // Fills do not change the counters; the physical stock that
                // arrived is already counted and stays reserved for the
                // formerly-backordered units.
                for fill in &e.fills {
                    self.backorders.retain(|entry| entry.unit_id != fill.unit_id);
                }
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockItemCommand::CreateStockItem(cmd) => self.handle_create(cmd),
            StockItemCommand::AdjustStock(cmd) => self.handle_adjust(cmd),
            StockItemCommand::ReserveStock(cmd) => self.handle_reserve(cmd),
            StockItemCommand::ReleaseStock(cmd) => self.handle_release(cmd),
            StockItemCommand::ConfirmShipment(cmd) => self.handle_confirm_shipment(cmd),
            StockItemCommand::ProcessBackorders(cmd) => self.handle_process_backorders(cmd),
        }
    }
}

impl StockItem {
    fn ensure_item_id(&self, stock_item_id: StockItemId) -> Result<(), DomainError> {
        if self.id != stock_item_id {
            return Err(DomainError::validation("stock_item_id mismatch"));
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateStockItem) -> Result<Vec<StockItemEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("stock item already exists"));
        }
        if cmd.initial_on_hand < 0 {
            return Err(DomainError::validation("initial on-hand cannot be negative"));
        }

        let movement = if cmd.initial_on_hand > 0 {
            Some(StockMovement::new(
                cmd.stock_item_id,
                cmd.initial_on_hand,
                MovementOriginator::Adjustment,
                Some("initial stock".to_string()),
                None,
                cmd.occurred_at,
            )?)
        } else {
            None
        };

        Ok(vec![StockItemEvent::StockItemCreated(StockItemCreated {
            stock_item_id: cmd.stock_item_id,
            variant_id: cmd.variant_id,
            location_id: cmd.location_id,
            initial_on_hand: cmd.initial_on_hand,
            backorderable: cmd.backorderable,
            movement,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_adjust(&self, cmd: &AdjustStock) -> Result<Vec<StockItemEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_item_id(cmd.stock_item_id)?;

        if !cmd.originator.affects_on_hand() {
            return Err(DomainError::validation(
                "adjustment originator must target the on-hand counter",
            ));
        }

        let new_on_hand = self.on_hand + cmd.delta;
        if new_on_hand < 0 {
            return Err(DomainError::insufficient_stock(-cmd.delta, self.on_hand));
        }
        // Unstocking must not silently invalidate existing reservations.
        if !self.backorderable && self.reserved > new_on_hand {
            return Err(DomainError::insufficient_stock(
                -cmd.delta,
                self.on_hand - self.reserved,
            ));
        }

        let movement = StockMovement::new(
            cmd.stock_item_id,
            cmd.delta,
            cmd.originator,
            cmd.reason.clone(),
            cmd.stock_transfer_id,
            cmd.occurred_at,
        )?;

        Ok(vec![StockItemEvent::StockAdjusted(StockAdjusted {
            stock_item_id: cmd.stock_item_id,
            movement,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reserve(&self, cmd: &ReserveStock) -> Result<Vec<StockItemEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_item_id(cmd.stock_item_id)?;

        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }

        let available = self.count_available();
        let shortfall = (cmd.quantity - available).clamp(0, cmd.quantity);

        if shortfall > 0 && !self.backorderable {
            return Err(DomainError::insufficient_stock(cmd.quantity, available));
        }
        if shortfall > 0 && cmd.unit_id.is_none() {
            return Err(DomainError::validation(
                "backordered reservation requires an inventory unit reference",
            ));
        }

        let movement = StockMovement::new(
            cmd.stock_item_id,
            cmd.quantity,
            MovementOriginator::Reservation,
            None,
            None,
            cmd.occurred_at,
        )?;

        Ok(vec![StockItemEvent::StockReserved(StockReserved {
            stock_item_id: cmd.stock_item_id,
            quantity: cmd.quantity,
            backordered_quantity: shortfall,
            unit_id: cmd.unit_id,
            movement,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_release(&self, cmd: &ReleaseStock) -> Result<Vec<StockItemEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_item_id(cmd.stock_item_id)?;

        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }

        // A release may cover non-backordered reservations plus the named
        // unit's own backorder entry; other units' backorders stay queued.
        let entry_quantity = cmd
            .unit_id
            .and_then(|unit| self.backorders.iter().find(|e| e.unit_id == unit))
            .map(|e| e.quantity)
            .unwrap_or(0);
        let releasable = (self.reserved - self.backordered_total()) + entry_quantity;
        if cmd.quantity > releasable {
            return Err(DomainError::validation(
                "release exceeds releasable reserved quantity",
            ));
        }

        let movement = StockMovement::new(
            cmd.stock_item_id,
            -cmd.quantity,
            MovementOriginator::Release,
            None,
            None,
            cmd.occurred_at,
        )?;

        Ok(vec![StockItemEvent::StockReleased(StockReleased {
            stock_item_id: cmd.stock_item_id,
            quantity: cmd.quantity,
            unit_id: cmd.unit_id,
            backordered_quantity: entry_quantity,
            movement,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_confirm_shipment(
        &self,
        cmd: &ConfirmShipment,
    ) -> Result<Vec<StockItemEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_item_id(cmd.stock_item_id)?;

        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }

        // Backordered reservations are promises, not physical stock; only the
        // covered portion of the reserved balance can ship.
        let shippable = self.reserved - self.backordered_total();
        if cmd.quantity > shippable {
            return Err(DomainError::insufficient_stock(
                cmd.quantity,
                shippable.max(0),
            ));
        }
        if cmd.quantity > self.on_hand {
            return Err(DomainError::insufficient_stock(cmd.quantity, self.on_hand));
        }

        let movement = StockMovement::new(
            cmd.stock_item_id,
            -cmd.quantity,
            MovementOriginator::Shipment,
            None,
            None,
            cmd.occurred_at,
        )?;

        Ok(vec![StockItemEvent::ShipmentConfirmed(ShipmentConfirmed {
            stock_item_id: cmd.stock_item_id,
            quantity: cmd.quantity,
            movement,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_process_backorders(
        &self,
        cmd: &ProcessBackorders,
    ) -> Result<Vec<StockItemEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        self.ensure_item_id(cmd.stock_item_id)?;

        let backordered_total = self.backordered_total();
        let mut fillable = self.on_hand - (self.reserved - backordered_total);
        if fillable <= 0 || self.backorders.is_empty() {
            return Ok(vec![]);
        }

        // Iterate a snapshot of the queue; membership is only mutated later in
        // `apply`. FIFO, whole entries only: stop at the first entry that no
        // longer fits.
        let snapshot: Vec<BackorderEntry> = self.backorders.clone();
        let mut fills = Vec::new();
        for entry in snapshot {
            if entry.quantity > fillable {
                break;
            }
            fillable -= entry.quantity;
            fills.push(BackorderFill {
                unit_id: entry.unit_id,
                quantity: entry.quantity,
            });
        }

        if fills.is_empty() {
            return Ok(vec![]);
        }

        Ok(vec![StockItemEvent::BackordersProcessed(
            BackordersProcessed {
                stock_item_id: cmd.stock_item_id,
                fills,
                occurred_at: cmd.occurred_at,
            },
        )])
    }
}

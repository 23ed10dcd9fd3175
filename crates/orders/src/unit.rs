use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockline_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, InventoryUnitId, LineItemId, OrderId,
    ShipmentId, VariantId,
};
use stockline_events::{Command, Event};

/// Stream type identifier for inventory unit aggregates.
pub const INVENTORY_UNIT_AGGREGATE_TYPE: &str = "orders.unit";

/// Lifecycle state of an inventory unit.
///
/// `OnHand → Shipped → (Returned)`, with the alternate path
/// `Backordered → OnHand` when stock arrives. Cancel is reachable from any
/// non-terminal state. Shipped (pending return), Returned and Canceled are
/// terminal for this engine; the return flow itself is owned by a separate
/// subsystem.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    OnHand,
    Backordered,
    Shipped,
    Returned,
    Canceled,
}

impl core::fmt::Display for UnitState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::OnHand => "on_hand",
            Self::Backordered => "backordered",
            Self::Shipped => "shipped",
            Self::Returned => "returned",
            Self::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Aggregate root: InventoryUnit - a trackable handle on a counted block of
/// identical physical items tied to one line item of an order.
///
/// A unit represents a block (`quantity >= 1`), not necessarily a single
/// piece; committing a line item creates at most two blocks - one on hand,
/// one backordered for the shortfall.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InventoryUnit {
    id: InventoryUnitId,
    line_item_id: LineItemId,
    variant_id: VariantId,
    order_id: OrderId,
    shipment_id: Option<ShipmentId>,
    quantity: i64,
    state: UnitState,
    version: u64,
    created: bool,
}

impl InventoryUnit {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: InventoryUnitId) -> Self {
        Self {
            id,
            line_item_id: LineItemId::new(AggregateId::from_uuid(uuid::Uuid::nil())),
            variant_id: VariantId::from_uuid(uuid::Uuid::nil()),
            order_id: OrderId::new(AggregateId::from_uuid(uuid::Uuid::nil())),
            shipment_id: None,
            quantity: 0,
            state: UnitState::OnHand,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> InventoryUnitId {
        self.id
    }

    pub fn line_item_id(&self) -> LineItemId {
        self.line_item_id
    }

    pub fn variant_id(&self) -> VariantId {
        self.variant_id
    }

    pub fn order_id(&self) -> OrderId {
        self.order_id
    }

    pub fn shipment_id(&self) -> Option<ShipmentId> {
        self.shipment_id
    }

    pub fn quantity(&self) -> i64 {
        self.quantity
    }

    pub fn state(&self) -> UnitState {
        self.state
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.state,
            UnitState::Shipped | UnitState::Returned | UnitState::Canceled
        )
    }
}

impl AggregateRoot for InventoryUnit {
    type Id = InventoryUnitId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateInventoryUnit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateInventoryUnit {
    pub unit_id: InventoryUnitId,
    pub line_item_id: LineItemId,
    pub variant_id: VariantId,
    pub order_id: OrderId,
    pub quantity: i64,
    pub backordered: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: FillBackorder - stock arrived for this unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FillBackorder {
    pub unit_id: InventoryUnitId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ShipUnit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipUnit {
    pub unit_id: InventoryUnitId,
    pub shipment_id: ShipmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: ReturnUnit - post-sale return recorded by the return subsystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReturnUnit {
    pub unit_id: InventoryUnitId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelUnit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelUnit {
    pub unit_id: InventoryUnitId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryUnitCommand {
    CreateInventoryUnit(CreateInventoryUnit),
    FillBackorder(FillBackorder),
    ShipUnit(ShipUnit),
    ReturnUnit(ReturnUnit),
    CancelUnit(CancelUnit),
}

impl Command for InventoryUnitCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        let id = match self {
            Self::CreateInventoryUnit(c) => c.unit_id,
            Self::FillBackorder(c) => c.unit_id,
            Self::ShipUnit(c) => c.unit_id,
            Self::ReturnUnit(c) => c.unit_id,
            Self::CancelUnit(c) => c.unit_id,
        };
        id.as_aggregate_id()
    }
}

/// Event: UnitCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitCreated {
    pub unit_id: InventoryUnitId,
    pub line_item_id: LineItemId,
    pub variant_id: VariantId,
    pub order_id: OrderId,
    pub quantity: i64,
    pub backordered: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Event: UnitBackorderFilled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitBackorderFilled {
    pub unit_id: InventoryUnitId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: UnitShipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitShipped {
    pub unit_id: InventoryUnitId,
    pub shipment_id: ShipmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: UnitReturned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitReturned {
    pub unit_id: InventoryUnitId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: UnitCanceled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitCanceled {
    pub unit_id: InventoryUnitId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum InventoryUnitEvent {
    UnitCreated(UnitCreated),
    UnitBackorderFilled(UnitBackorderFilled),
    UnitShipped(UnitShipped),
    UnitReturned(UnitReturned),
    UnitCanceled(UnitCanceled),
}

impl Event for InventoryUnitEvent {
    fn event_type(&self) -> &'static str {
        match self {
            InventoryUnitEvent::UnitCreated(_) => "orders.unit.created",
            InventoryUnitEvent::UnitBackorderFilled(_) => "orders.unit.backorder_filled",
            InventoryUnitEvent::UnitShipped(_) => "orders.unit.shipped",
            InventoryUnitEvent::UnitReturned(_) => "orders.unit.returned",
            InventoryUnitEvent::UnitCanceled(_) => "orders.unit.canceled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            InventoryUnitEvent::UnitCreated(e) => e.occurred_at,
            InventoryUnitEvent::UnitBackorderFilled(e) => e.occurred_at,
            InventoryUnitEvent::UnitShipped(e) => e.occurred_at,
            InventoryUnitEvent::UnitReturned(e) => e.occurred_at,
            InventoryUnitEvent::UnitCanceled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for InventoryUnit {
    type Command = InventoryUnitCommand;
    type Event = InventoryUnitEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            InventoryUnitEvent::UnitCreated(e) => {
                self.id = e.unit_id;
                self.line_item_id = e.line_item_id;
                self.variant_id = e.variant_id;
                self.order_id = e.order_id;
                self.shipment_id = None;
                self.quantity = e.quantity;
                self.state = if e.backordered {
                    UnitState::Backordered
                } else {
                    UnitState::OnHand
                };
                self.created = true;
            }
            InventoryUnitEvent::UnitBackorderFilled(_) => {
                self.state = UnitState::OnHand;
            }
            InventoryUnitEvent::UnitShipped(e) => {
                self.state = UnitState::Shipped;
                self.shipment_id = Some(e.shipment_id);
            }
            InventoryUnitEvent::UnitReturned(_) => {
                self.state = UnitState::Returned;
            }
            InventoryUnitEvent::UnitCanceled(_) => {
                self.state = UnitState::Canceled;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            InventoryUnitCommand::CreateInventoryUnit(cmd) => self.handle_create(cmd),
            InventoryUnitCommand::FillBackorder(cmd) => self.handle_fill_backorder(cmd),
            InventoryUnitCommand::ShipUnit(cmd) => self.handle_ship(cmd),
            InventoryUnitCommand::ReturnUnit(cmd) => self.handle_return(cmd),
            InventoryUnitCommand::CancelUnit(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl InventoryUnit {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn handle_create(&self, cmd: &CreateInventoryUnit) -> Result<Vec<InventoryUnitEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("inventory unit already exists"));
        }
        if cmd.quantity < 1 {
            return Err(DomainError::validation("unit quantity must be at least 1"));
        }

        Ok(vec![InventoryUnitEvent::UnitCreated(UnitCreated {
            unit_id: cmd.unit_id,
            line_item_id: cmd.line_item_id,
            variant_id: cmd.variant_id,
            order_id: cmd.order_id,
            quantity: cmd.quantity,
            backordered: cmd.backordered,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_fill_backorder(
        &self,
        cmd: &FillBackorder,
    ) -> Result<Vec<InventoryUnitEvent>, DomainError> {
        self.ensure_created()?;
        if self.state != UnitState::Backordered {
            return Err(DomainError::invalid_transition(
                self.state.to_string(),
                UnitState::OnHand.to_string(),
            ));
        }
        Ok(vec![InventoryUnitEvent::UnitBackorderFilled(
            UnitBackorderFilled {
                unit_id: cmd.unit_id,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_ship(&self, cmd: &ShipUnit) -> Result<Vec<InventoryUnitEvent>, DomainError> {
        self.ensure_created()?;
        // Backordered stock was never on hand, so it cannot ship; terminal
        // states cannot ship again.
        if self.state != UnitState::OnHand {
            return Err(DomainError::invalid_transition(
                self.state.to_string(),
                UnitState::Shipped.to_string(),
            ));
        }
        Ok(vec![InventoryUnitEvent::UnitShipped(UnitShipped {
            unit_id: cmd.unit_id,
            shipment_id: cmd.shipment_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_return(&self, cmd: &ReturnUnit) -> Result<Vec<InventoryUnitEvent>, DomainError> {
        self.ensure_created()?;
        if self.state != UnitState::Shipped {
            return Err(DomainError::invalid_transition(
                self.state.to_string(),
                UnitState::Returned.to_string(),
            ));
        }
        Ok(vec![InventoryUnitEvent::UnitReturned(UnitReturned {
            unit_id: cmd.unit_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelUnit) -> Result<Vec<InventoryUnitEvent>, DomainError> {
        self.ensure_created()?;
        match self.state {
            UnitState::Canceled => Ok(vec![]),
            UnitState::OnHand | UnitState::Backordered => {
                Ok(vec![InventoryUnitEvent::UnitCanceled(UnitCanceled {
                    unit_id: cmd.unit_id,
                    occurred_at: cmd.occurred_at,
                })])
            }
            UnitState::Shipped | UnitState::Returned => Err(DomainError::invalid_transition(
                self.state.to_string(),
                UnitState::Canceled.to_string(),
            )),
        }
    }
}

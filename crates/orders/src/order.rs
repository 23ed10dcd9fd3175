use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockline_core::{
    AdjustmentId, Aggregate, AggregateId, AggregateRoot, DomainError, LineItemId, OrderId,
    PaymentId, ShipmentId, StockLocationId, ValueObject, VariantId,
};
use stockline_events::{Command, Event};

use crate::adjustment::Adjustment;
use crate::line_item::{LineItem, PriceSnapshot};
use crate::payment::{Payment, PaymentState};
use crate::shipment::{Shipment, ShipmentState};

/// Stream type identifier for order aggregates.
pub const ORDER_AGGREGATE_TYPE: &str = "orders.order";

/// Maximum length accepted for adjustment labels.
const MAX_LABEL_LEN: usize = 255;

/// Order checkout state machine.
///
/// Linear forward path `Cart → Address → Delivery → Payment → Confirm →
/// Complete`; `Canceled` is reachable from every non-terminal state.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderState {
    Cart,
    Address,
    Delivery,
    Payment,
    Confirm,
    Complete,
    Canceled,
}

impl OrderState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Complete | Self::Canceled)
    }
}

impl core::fmt::Display for OrderState {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let s = match self {
            Self::Cart => "cart",
            Self::Address => "address",
            Self::Delivery => "delivery",
            Self::Payment => "payment",
            Self::Confirm => "confirm",
            Self::Complete => "complete",
            Self::Canceled => "canceled",
        };
        f.write_str(s)
    }
}

/// Postal address captured for checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub line1: String,
    pub city: String,
    pub postal_code: String,
    pub country: String,
}

impl ValueObject for Address {}

impl Address {
    fn validate(&self) -> Result<(), DomainError> {
        if self.line1.trim().is_empty()
            || self.city.trim().is_empty()
            || self.country.trim().is_empty()
        {
            return Err(DomainError::validation(
                "address requires line1, city and country",
            ));
        }
        Ok(())
    }
}

/// Shipment record to create when entering the payment step. The stock
/// location comes from the external placement policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewShipment {
    pub shipment_id: ShipmentId,
    pub stock_location_id: StockLocationId,
    pub cost_cents: i64,
}

/// Aggregate root: Order - coordinates line items, adjustments, payments and
/// shipments through the checkout state machine.
///
/// All money is integer minor-currency units (cents). Totals are recomputed
/// from the collections on every read and every mutation validates the
/// prospective total, so the `total = items + shipments + adjustments >= 0`
/// invariant can never drift.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    id: OrderId,
    state: OrderState,
    currency: String,
    line_items: Vec<LineItem>,
    adjustments: Vec<Adjustment>,
    payments: Vec<Payment>,
    shipments: Vec<Shipment>,
    ship_address: Option<Address>,
    bill_address: Option<Address>,
    shipping_method: Option<String>,
    completed_at: Option<DateTime<Utc>>,
    canceled_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl Order {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: OrderId) -> Self {
        Self {
            id,
            state: OrderState::Cart,
            currency: String::new(),
            line_items: Vec::new(),
            adjustments: Vec::new(),
            payments: Vec::new(),
            shipments: Vec::new(),
            ship_address: None,
            bill_address: None,
            shipping_method: None,
            completed_at: None,
            canceled_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn state(&self) -> OrderState {
        self.state
    }

    pub fn currency(&self) -> &str {
        &self.currency
    }

    pub fn line_items(&self) -> &[LineItem] {
        &self.line_items
    }

    pub fn adjustments(&self) -> &[Adjustment] {
        &self.adjustments
    }

    pub fn payments(&self) -> &[Payment] {
        &self.payments
    }

    pub fn shipments(&self) -> &[Shipment] {
        &self.shipments
    }

    pub fn ship_address(&self) -> Option<&Address> {
        self.ship_address.as_ref()
    }

    pub fn bill_address(&self) -> Option<&Address> {
        self.bill_address.as_ref()
    }

    pub fn shipping_method(&self) -> Option<&str> {
        self.shipping_method.as_deref()
    }

    pub fn completed_at(&self) -> Option<DateTime<Utc>> {
        self.completed_at
    }

    pub fn canceled_at(&self) -> Option<DateTime<Utc>> {
        self.canceled_at
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    /// An order with at least one line item, none of which require shipping.
    /// An empty cart counts as physical; it cannot advance anyway.
    pub fn is_digital(&self) -> bool {
        !self.line_items.is_empty() && self.line_items.iter().all(|l| !l.requires_shipping)
    }

    pub fn item_total_cents(&self) -> i64 {
        self.line_items.iter().map(LineItem::amount_cents).sum()
    }

    pub fn shipment_total_cents(&self) -> i64 {
        self.shipments.iter().map(|s| s.cost_cents).sum()
    }

    pub fn adjustment_total_cents(&self) -> i64 {
        self.adjustments.iter().map(|a| a.amount_cents).sum()
    }

    pub fn total_cents(&self) -> i64 {
        self.item_total_cents() + self.shipment_total_cents() + self.adjustment_total_cents()
    }

    /// Sum of payments the gateway has reported as completed.
    pub fn completed_payment_total_cents(&self) -> i64 {
        self.payments
            .iter()
            .filter(|p| p.state == PaymentState::Completed)
            .map(|p| p.amount_cents)
            .sum()
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateOrder {
    pub order_id: OrderId,
    pub currency: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddLineItem - captures the price snapshot at addition time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLineItem {
    pub order_id: OrderId,
    pub line_item_id: LineItemId,
    pub variant_id: VariantId,
    pub quantity: i64,
    pub unit_price_cents: i64,
    pub currency: String,
    pub requires_shipping: bool,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveLineItem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveLineItem {
    pub order_id: OrderId,
    pub line_item_id: LineItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdateLineItemQuantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateLineItemQuantity {
    pub order_id: OrderId,
    pub line_item_id: LineItemId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AddAdjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddAdjustment {
    pub order_id: OrderId,
    pub adjustment_id: AdjustmentId,
    pub label: String,
    pub amount_cents: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RemoveAdjustment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveAdjustment {
    pub order_id: OrderId,
    pub adjustment_id: AdjustmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SetAddresses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetAddresses {
    pub order_id: OrderId,
    pub ship_address: Address,
    pub bill_address: Address,
    pub occurred_at: DateTime<Utc>,
}

/// Command: SelectShippingMethod.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectShippingMethod {
    pub order_id: OrderId,
    pub method_name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: RecordPayment - a fact reported by the gateway integration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordPayment {
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub amount_cents: i64,
    pub state: PaymentState,
    pub occurred_at: DateTime<Utc>,
}

/// Command: UpdatePaymentState - asynchronous gateway result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdatePaymentState {
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub state: PaymentState,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkShipmentReady.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkShipmentReady {
    pub order_id: OrderId,
    pub shipment_id: ShipmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: MarkShipmentShipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkShipmentShipped {
    pub order_id: OrderId,
    pub shipment_id: ShipmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdvanceToAddress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceToAddress {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdvanceToDelivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceToDelivery {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdvanceToPayment - creates the shipment records decided by the
/// external placement policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceToPayment {
    pub order_id: OrderId,
    pub shipments: Vec<NewShipment>,
    pub occurred_at: DateTime<Utc>,
}

/// Command: AdvanceToConfirm.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdvanceToConfirm {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CompleteOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

/// Command: CancelOrder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelOrder {
    pub order_id: OrderId,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderCommand {
    CreateOrder(CreateOrder),
    AddLineItem(AddLineItem),
    RemoveLineItem(RemoveLineItem),
    UpdateLineItemQuantity(UpdateLineItemQuantity),
    AddAdjustment(AddAdjustment),
    RemoveAdjustment(RemoveAdjustment),
    SetAddresses(SetAddresses),
    SelectShippingMethod(SelectShippingMethod),
    RecordPayment(RecordPayment),
    UpdatePaymentState(UpdatePaymentState),
    MarkShipmentReady(MarkShipmentReady),
    MarkShipmentShipped(MarkShipmentShipped),
    AdvanceToAddress(AdvanceToAddress),
    AdvanceToDelivery(AdvanceToDelivery),
    AdvanceToPayment(AdvanceToPayment),
    AdvanceToConfirm(AdvanceToConfirm),
    CompleteOrder(CompleteOrder),
    CancelOrder(CancelOrder),
}

impl Command for OrderCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        let id = match self {
            Self::CreateOrder(c) => c.order_id,
            Self::AddLineItem(c) => c.order_id,
            Self::RemoveLineItem(c) => c.order_id,
            Self::UpdateLineItemQuantity(c) => c.order_id,
            Self::AddAdjustment(c) => c.order_id,
            Self::RemoveAdjustment(c) => c.order_id,
            Self::SetAddresses(c) => c.order_id,
            Self::SelectShippingMethod(c) => c.order_id,
            Self::RecordPayment(c) => c.order_id,
            Self::UpdatePaymentState(c) => c.order_id,
            Self::MarkShipmentReady(c) => c.order_id,
            Self::MarkShipmentShipped(c) => c.order_id,
            Self::AdvanceToAddress(c) => c.order_id,
            Self::AdvanceToDelivery(c) => c.order_id,
            Self::AdvanceToPayment(c) => c.order_id,
            Self::AdvanceToConfirm(c) => c.order_id,
            Self::CompleteOrder(c) => c.order_id,
            Self::CancelOrder(c) => c.order_id,
        };
        id.as_aggregate_id()
    }
}

/// Event: OrderCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCreated {
    pub order_id: OrderId,
    pub currency: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineItemAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemAdded {
    pub order_id: OrderId,
    pub line_item: LineItem,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineItemRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemRemoved {
    pub order_id: OrderId,
    pub line_item_id: LineItemId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: LineItemQuantityUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItemQuantityUpdated {
    pub order_id: OrderId,
    pub line_item_id: LineItemId,
    pub quantity: i64,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AdjustmentAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentAdded {
    pub order_id: OrderId,
    pub adjustment: Adjustment,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AdjustmentRemoved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdjustmentRemoved {
    pub order_id: OrderId,
    pub adjustment_id: AdjustmentId,
    pub occurred_at: DateTime<Utc>,
}

/// Event: AddressesSet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressesSet {
    pub order_id: OrderId,
    pub ship_address: Address,
    pub bill_address: Address,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShippingMethodSelected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShippingMethodSelected {
    pub order_id: OrderId,
    pub method_name: String,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentRecorded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRecorded {
    pub order_id: OrderId,
    pub payment: Payment,
    pub occurred_at: DateTime<Utc>,
}

/// Event: PaymentStateChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentStateChanged {
    pub order_id: OrderId,
    pub payment_id: PaymentId,
    pub from: PaymentState,
    pub to: PaymentState,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShipmentAdded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentAdded {
    pub order_id: OrderId,
    pub shipment: Shipment,
    pub occurred_at: DateTime<Utc>,
}

/// Event: ShipmentStateChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShipmentStateChanged {
    pub order_id: OrderId,
    pub shipment_id: ShipmentId,
    pub from: ShipmentState,
    pub to: ShipmentState,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderStateChanged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderStateChanged {
    pub order_id: OrderId,
    pub from: OrderState,
    pub to: OrderState,
    pub occurred_at: DateTime<Utc>,
}

/// Event: OrderCompleted - the "finalize inventory" signal for the external
/// orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCompleted {
    pub order_id: OrderId,
    pub completed_at: DateTime<Utc>,
}

/// Event: OrderCanceled - the "release inventory" signal for the external
/// orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderCanceled {
    pub order_id: OrderId,
    pub canceled_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderEvent {
    OrderCreated(OrderCreated),
    LineItemAdded(LineItemAdded),
    LineItemRemoved(LineItemRemoved),
    LineItemQuantityUpdated(LineItemQuantityUpdated),
    AdjustmentAdded(AdjustmentAdded),
    AdjustmentRemoved(AdjustmentRemoved),
    AddressesSet(AddressesSet),
    ShippingMethodSelected(ShippingMethodSelected),
    PaymentRecorded(PaymentRecorded),
    PaymentStateChanged(PaymentStateChanged),
    ShipmentAdded(ShipmentAdded),
    ShipmentStateChanged(ShipmentStateChanged),
    OrderStateChanged(OrderStateChanged),
    OrderCompleted(OrderCompleted),
    OrderCanceled(OrderCanceled),
}

impl Event for OrderEvent {
    fn event_type(&self) -> &'static str {
        match self {
            OrderEvent::OrderCreated(_) => "orders.order.created",
            OrderEvent::LineItemAdded(_) => "orders.order.line_item_added",
            OrderEvent::LineItemRemoved(_) => "orders.order.line_item_removed",
            OrderEvent::LineItemQuantityUpdated(_) => "orders.order.line_item_quantity_updated",
            OrderEvent::AdjustmentAdded(_) => "orders.order.adjustment_added",
            OrderEvent::AdjustmentRemoved(_) => "orders.order.adjustment_removed",
            OrderEvent::AddressesSet(_) => "orders.order.addresses_set",
            OrderEvent::ShippingMethodSelected(_) => "orders.order.shipping_method_selected",
            OrderEvent::PaymentRecorded(_) => "orders.order.payment_recorded",
            OrderEvent::PaymentStateChanged(_) => "orders.order.payment_state_changed",
            OrderEvent::ShipmentAdded(_) => "orders.order.shipment_added",
            OrderEvent::ShipmentStateChanged(_) => "orders.order.shipment_state_changed",
            OrderEvent::OrderStateChanged(_) => "orders.order.state_changed",
            OrderEvent::OrderCompleted(_) => "orders.order.completed",
            OrderEvent::OrderCanceled(_) => "orders.order.canceled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            OrderEvent::OrderCreated(e) => e.occurred_at,
            OrderEvent::LineItemAdded(e) => e.occurred_at,
            OrderEvent::LineItemRemoved(e) => e.occurred_at,
            OrderEvent::LineItemQuantityUpdated(e) => e.occurred_at,
            OrderEvent::AdjustmentAdded(e) => e.occurred_at,
            OrderEvent::AdjustmentRemoved(e) => e.occurred_at,
            OrderEvent::AddressesSet(e) => e.occurred_at,
            OrderEvent::ShippingMethodSelected(e) => e.occurred_at,
            OrderEvent::PaymentRecorded(e) => e.occurred_at,
            OrderEvent::PaymentStateChanged(e) => e.occurred_at,
            OrderEvent::ShipmentAdded(e) => e.occurred_at,
            OrderEvent::ShipmentStateChanged(e) => e.occurred_at,
            OrderEvent::OrderStateChanged(e) => e.occurred_at,
            OrderEvent::OrderCompleted(e) => e.completed_at,
            OrderEvent::OrderCanceled(e) => e.canceled_at,
        }
    }
}

impl Aggregate for Order {
    type Command = OrderCommand;
    type Event = OrderEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            OrderEvent::OrderCreated(e) => {
                self.id = e.order_id;
                self.state = OrderState::Cart;
                self.currency = e.currency.clone();
                self.line_items.clear();
                self.adjustments.clear();
                self.payments.clear();
                self.shipments.clear();
                self.created = true;
            }
            OrderEvent::LineItemAdded(e) => {
                self.line_items.push(e.line_item.clone());
            }
            OrderEvent::LineItemRemoved(e) => {
                self.line_items.retain(|l| l.id != e.line_item_id);
            }
            OrderEvent::LineItemQuantityUpdated(e) => {
                if let Some(line) = self.line_items.iter_mut().find(|l| l.id == e.line_item_id) {
                    line.quantity = e.quantity;
                }
            }
            OrderEvent::AdjustmentAdded(e) => {
                self.adjustments.push(e.adjustment.clone());
            }
            OrderEvent::AdjustmentRemoved(e) => {
                self.adjustments.retain(|a| a.id != e.adjustment_id);
            }
            OrderEvent::AddressesSet(e) => {
                self.ship_address = Some(e.ship_address.clone());
                self.bill_address = Some(e.bill_address.clone());
            }
            OrderEvent::ShippingMethodSelected(e) => {
                self.shipping_method = Some(e.method_name.clone());
            }
            OrderEvent::PaymentRecorded(e) => {
                self.payments.push(e.payment.clone());
            }
            OrderEvent::PaymentStateChanged(e) => {
                if let Some(payment) = self.payments.iter_mut().find(|p| p.id == e.payment_id) {
                    payment.state = e.to;
                }
            }
            OrderEvent::ShipmentAdded(e) => {
                self.shipments.push(e.shipment.clone());
            }
            OrderEvent::ShipmentStateChanged(e) => {
                if let Some(shipment) = self.shipments.iter_mut().find(|s| s.id == e.shipment_id) {
                    shipment.state = e.to;
                }
            }
            OrderEvent::OrderStateChanged(e) => {
                self.state = e.to;
            }
            OrderEvent::OrderCompleted(e) => {
                // Set exactly once on the terminal transition.
                self.completed_at.get_or_insert(e.completed_at);
            }
            OrderEvent::OrderCanceled(e) => {
                self.canceled_at.get_or_insert(e.canceled_at);
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            OrderCommand::CreateOrder(cmd) => self.handle_create(cmd),
            OrderCommand::AddLineItem(cmd) => self.handle_add_line_item(cmd),
            OrderCommand::RemoveLineItem(cmd) => self.handle_remove_line_item(cmd),
            OrderCommand::UpdateLineItemQuantity(cmd) => self.handle_update_quantity(cmd),
            OrderCommand::AddAdjustment(cmd) => self.handle_add_adjustment(cmd),
            OrderCommand::RemoveAdjustment(cmd) => self.handle_remove_adjustment(cmd),
            OrderCommand::SetAddresses(cmd) => self.handle_set_addresses(cmd),
            OrderCommand::SelectShippingMethod(cmd) => self.handle_select_shipping(cmd),
            OrderCommand::RecordPayment(cmd) => self.handle_record_payment(cmd),
            OrderCommand::UpdatePaymentState(cmd) => self.handle_update_payment_state(cmd),
            OrderCommand::MarkShipmentReady(cmd) => {
                self.handle_shipment_transition(cmd.shipment_id, ShipmentState::Ready, cmd.occurred_at)
            }
            OrderCommand::MarkShipmentShipped(cmd) => self.handle_shipment_transition(
                cmd.shipment_id,
                ShipmentState::Shipped,
                cmd.occurred_at,
            ),
            OrderCommand::AdvanceToAddress(cmd) => self.handle_advance_to_address(cmd),
            OrderCommand::AdvanceToDelivery(cmd) => self.handle_advance_to_delivery(cmd),
            OrderCommand::AdvanceToPayment(cmd) => self.handle_advance_to_payment(cmd),
            OrderCommand::AdvanceToConfirm(cmd) => self.handle_advance_to_confirm(cmd),
            OrderCommand::CompleteOrder(cmd) => self.handle_complete(cmd),
            OrderCommand::CancelOrder(cmd) => self.handle_cancel(cmd),
        }
    }
}

impl Order {
    fn ensure_created(&self) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found());
        }
        Ok(())
    }

    fn ensure_cart(&self) -> Result<(), DomainError> {
        if self.state != OrderState::Cart {
            return Err(DomainError::validation(
                "line items and promotions may only change while the order is a cart",
            ));
        }
        Ok(())
    }

    fn ensure_transition(&self, from: OrderState, to: OrderState) -> Result<(), DomainError> {
        if self.state != from {
            return Err(DomainError::invalid_transition(
                self.state.to_string(),
                to.to_string(),
            ));
        }
        Ok(())
    }

    /// Reject any mutation that would drive the aggregate total negative.
    fn check_total(&self, prospective_total: i64) -> Result<(), DomainError> {
        if prospective_total < 0 {
            return Err(DomainError::validation(
                "order total cannot become negative",
            ));
        }
        Ok(())
    }

    fn state_change(&self, to: OrderState, occurred_at: DateTime<Utc>) -> OrderEvent {
        OrderEvent::OrderStateChanged(OrderStateChanged {
            order_id: self.id,
            from: self.state,
            to,
            occurred_at,
        })
    }

    fn handle_create(&self, cmd: &CreateOrder) -> Result<Vec<OrderEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("order already exists"));
        }
        if cmd.currency.trim().is_empty() {
            return Err(DomainError::validation("currency cannot be empty"));
        }

        Ok(vec![OrderEvent::OrderCreated(OrderCreated {
            order_id: cmd.order_id,
            currency: cmd.currency.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_add_line_item(&self, cmd: &AddLineItem) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_cart()?;

        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        if cmd.unit_price_cents <= 0 {
            return Err(DomainError::validation("unit price must be positive"));
        }
        if cmd.currency != self.currency {
            return Err(DomainError::validation(format!(
                "line currency {} does not match order currency {}",
                cmd.currency, self.currency
            )));
        }

        // Same variant again: bump the existing line, keep its original price
        // snapshot.
        if let Some(existing) = self.line_items.iter().find(|l| l.variant_id == cmd.variant_id) {
            let new_quantity = existing.quantity + cmd.quantity;
            let delta = cmd.quantity * existing.price.unit_price_cents;
            self.check_total(self.total_cents() + delta)?;
            return Ok(vec![OrderEvent::LineItemQuantityUpdated(
                LineItemQuantityUpdated {
                    order_id: cmd.order_id,
                    line_item_id: existing.id,
                    quantity: new_quantity,
                    occurred_at: cmd.occurred_at,
                },
            )]);
        }

        let line_item = LineItem {
            id: cmd.line_item_id,
            variant_id: cmd.variant_id,
            quantity: cmd.quantity,
            price: PriceSnapshot {
                unit_price_cents: cmd.unit_price_cents,
                currency: cmd.currency.clone(),
            },
            requires_shipping: cmd.requires_shipping,
        };
        self.check_total(self.total_cents() + line_item.amount_cents())?;

        Ok(vec![OrderEvent::LineItemAdded(LineItemAdded {
            order_id: cmd.order_id,
            line_item,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_line_item(&self, cmd: &RemoveLineItem) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_cart()?;

        let line = self
            .line_items
            .iter()
            .find(|l| l.id == cmd.line_item_id)
            .ok_or_else(DomainError::not_found)?;

        // Removing an item can drive the total negative when negative
        // adjustments are present; that removal is rejected, not absorbed.
        self.check_total(self.total_cents() - line.amount_cents())?;

        Ok(vec![OrderEvent::LineItemRemoved(LineItemRemoved {
            order_id: cmd.order_id,
            line_item_id: cmd.line_item_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_quantity(
        &self,
        cmd: &UpdateLineItemQuantity,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_cart()?;

        if cmd.quantity <= 0 {
            return Err(DomainError::validation("quantity must be positive"));
        }
        let line = self
            .line_items
            .iter()
            .find(|l| l.id == cmd.line_item_id)
            .ok_or_else(DomainError::not_found)?;

        let delta = (cmd.quantity - line.quantity) * line.price.unit_price_cents;
        self.check_total(self.total_cents() + delta)?;

        if cmd.quantity == line.quantity {
            return Ok(vec![]);
        }

        Ok(vec![OrderEvent::LineItemQuantityUpdated(
            LineItemQuantityUpdated {
                order_id: cmd.order_id,
                line_item_id: cmd.line_item_id,
                quantity: cmd.quantity,
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_add_adjustment(&self, cmd: &AddAdjustment) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        if self.state.is_terminal() {
            return Err(DomainError::validation(
                "adjustments cannot change on a closed order",
            ));
        }
        if cmd.label.trim().is_empty() || cmd.label.len() > MAX_LABEL_LEN {
            return Err(DomainError::validation(
                "adjustment label must be non-empty and bounded",
            ));
        }
        if cmd.amount_cents == 0 {
            return Err(DomainError::validation("adjustment amount cannot be zero"));
        }
        if self.adjustments.iter().any(|a| a.id == cmd.adjustment_id) {
            return Err(DomainError::conflict("adjustment already recorded"));
        }
        self.check_total(self.total_cents() + cmd.amount_cents)?;

        Ok(vec![OrderEvent::AdjustmentAdded(AdjustmentAdded {
            order_id: cmd.order_id,
            adjustment: Adjustment {
                id: cmd.adjustment_id,
                label: cmd.label.clone(),
                amount_cents: cmd.amount_cents,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_remove_adjustment(
        &self,
        cmd: &RemoveAdjustment,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        if self.state.is_terminal() {
            return Err(DomainError::validation(
                "adjustments cannot change on a closed order",
            ));
        }
        let adjustment = self
            .adjustments
            .iter()
            .find(|a| a.id == cmd.adjustment_id)
            .ok_or_else(DomainError::not_found)?;
        self.check_total(self.total_cents() - adjustment.amount_cents)?;

        Ok(vec![OrderEvent::AdjustmentRemoved(AdjustmentRemoved {
            order_id: cmd.order_id,
            adjustment_id: cmd.adjustment_id,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_set_addresses(&self, cmd: &SetAddresses) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        if !matches!(self.state, OrderState::Cart | OrderState::Address) {
            return Err(DomainError::validation(
                "addresses are captured during the cart and address steps",
            ));
        }
        cmd.ship_address.validate()?;
        cmd.bill_address.validate()?;

        Ok(vec![OrderEvent::AddressesSet(AddressesSet {
            order_id: cmd.order_id,
            ship_address: cmd.ship_address.clone(),
            bill_address: cmd.bill_address.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_select_shipping(
        &self,
        cmd: &SelectShippingMethod,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        if self.state != OrderState::Delivery {
            return Err(DomainError::validation(
                "shipping method is selected during the delivery step",
            ));
        }
        if cmd.method_name.trim().is_empty() {
            return Err(DomainError::validation("shipping method cannot be empty"));
        }

        Ok(vec![OrderEvent::ShippingMethodSelected(
            ShippingMethodSelected {
                order_id: cmd.order_id,
                method_name: cmd.method_name.clone(),
                occurred_at: cmd.occurred_at,
            },
        )])
    }

    fn handle_record_payment(&self, cmd: &RecordPayment) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        if !matches!(self.state, OrderState::Payment | OrderState::Confirm) {
            return Err(DomainError::validation(
                "payments are recorded during the payment and confirm steps",
            ));
        }
        if cmd.amount_cents <= 0 {
            return Err(DomainError::validation("payment amount must be positive"));
        }
        if self.payments.iter().any(|p| p.id == cmd.payment_id) {
            return Err(DomainError::conflict("payment already recorded"));
        }

        Ok(vec![OrderEvent::PaymentRecorded(PaymentRecorded {
            order_id: cmd.order_id,
            payment: Payment {
                id: cmd.payment_id,
                amount_cents: cmd.amount_cents,
                state: cmd.state,
            },
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_update_payment_state(
        &self,
        cmd: &UpdatePaymentState,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        let payment = self
            .payments
            .iter()
            .find(|p| p.id == cmd.payment_id)
            .ok_or_else(DomainError::not_found)?;

        if payment.state == cmd.state {
            return Ok(vec![]);
        }
        if !payment.state.can_transition_to(cmd.state) {
            return Err(DomainError::invalid_transition(
                payment.state.to_string(),
                cmd.state.to_string(),
            ));
        }

        Ok(vec![OrderEvent::PaymentStateChanged(PaymentStateChanged {
            order_id: cmd.order_id,
            payment_id: cmd.payment_id,
            from: payment.state,
            to: cmd.state,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_shipment_transition(
        &self,
        shipment_id: ShipmentId,
        to: ShipmentState,
        occurred_at: DateTime<Utc>,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        if self.state == OrderState::Canceled {
            return Err(DomainError::validation(
                "shipments cannot progress on a canceled order",
            ));
        }
        let shipment = self
            .shipments
            .iter()
            .find(|s| s.id == shipment_id)
            .ok_or_else(DomainError::not_found)?;

        if !shipment.state.can_transition_to(to) {
            return Err(DomainError::invalid_transition(
                shipment.state.to_string(),
                to.to_string(),
            ));
        }

        Ok(vec![OrderEvent::ShipmentStateChanged(ShipmentStateChanged {
            order_id: self.id,
            shipment_id,
            from: shipment.state,
            to,
            occurred_at,
        })])
    }

    fn handle_advance_to_address(
        &self,
        cmd: &AdvanceToAddress,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_transition(OrderState::Cart, OrderState::Address)?;
        if self.line_items.is_empty() {
            return Err(DomainError::validation("cannot advance an empty cart"));
        }
        Ok(vec![self.state_change(OrderState::Address, cmd.occurred_at)])
    }

    fn handle_advance_to_delivery(
        &self,
        cmd: &AdvanceToDelivery,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_transition(OrderState::Address, OrderState::Delivery)?;
        if !self.is_digital() && (self.ship_address.is_none() || self.bill_address.is_none()) {
            return Err(DomainError::validation(
                "physical orders require shipping and billing addresses",
            ));
        }
        Ok(vec![self.state_change(OrderState::Delivery, cmd.occurred_at)])
    }

    fn handle_advance_to_payment(
        &self,
        cmd: &AdvanceToPayment,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_transition(OrderState::Delivery, OrderState::Payment)?;

        if self.is_digital() {
            if !cmd.shipments.is_empty() {
                return Err(DomainError::validation(
                    "digital orders cannot carry shipments",
                ));
            }
        } else {
            if self.shipping_method.is_none() {
                return Err(DomainError::validation(
                    "physical orders require a selected shipping method",
                ));
            }
            if cmd.shipments.is_empty() {
                return Err(DomainError::validation(
                    "physical orders require at least one shipment placement",
                ));
            }
        }

        let mut events = Vec::with_capacity(cmd.shipments.len() + 1);
        for (i, new_shipment) in cmd.shipments.iter().enumerate() {
            if new_shipment.cost_cents < 0 {
                return Err(DomainError::validation("shipment cost cannot be negative"));
            }
            if cmd.shipments[..i]
                .iter()
                .any(|s| s.shipment_id == new_shipment.shipment_id)
            {
                return Err(DomainError::conflict("duplicate shipment id"));
            }
            events.push(OrderEvent::ShipmentAdded(ShipmentAdded {
                order_id: cmd.order_id,
                shipment: Shipment {
                    id: new_shipment.shipment_id,
                    stock_location_id: new_shipment.stock_location_id,
                    cost_cents: new_shipment.cost_cents,
                    state: ShipmentState::Pending,
                },
                occurred_at: cmd.occurred_at,
            }));
        }
        events.push(self.state_change(OrderState::Payment, cmd.occurred_at));

        Ok(events)
    }

    fn handle_advance_to_confirm(
        &self,
        cmd: &AdvanceToConfirm,
    ) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_transition(OrderState::Payment, OrderState::Confirm)?;
        if self.completed_payment_total_cents() < self.total_cents() {
            return Err(DomainError::validation(
                "completed payments do not cover the order total",
            ));
        }
        Ok(vec![self.state_change(OrderState::Confirm, cmd.occurred_at)])
    }

    fn handle_complete(&self, cmd: &CompleteOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        self.ensure_transition(OrderState::Confirm, OrderState::Complete)?;

        if self.completed_payment_total_cents() < self.total_cents() {
            return Err(DomainError::validation(
                "completed payments do not cover the order total",
            ));
        }
        if !self.is_digital() && !self.shipments.iter().all(Shipment::is_fulfillment_ready) {
            return Err(DomainError::validation(
                "every shipment must be ready or shipped before completion",
            ));
        }

        Ok(vec![
            self.state_change(OrderState::Complete, cmd.occurred_at),
            OrderEvent::OrderCompleted(OrderCompleted {
                order_id: cmd.order_id,
                completed_at: cmd.occurred_at,
            }),
        ])
    }

    fn handle_cancel(&self, cmd: &CancelOrder) -> Result<Vec<OrderEvent>, DomainError> {
        self.ensure_created()?;
        match self.state {
            OrderState::Complete => Err(DomainError::invalid_transition(
                self.state.to_string(),
                OrderState::Canceled.to_string(),
            )),
            OrderState::Canceled => Ok(vec![]),
            _ => Ok(vec![
                self.state_change(OrderState::Canceled, cmd.occurred_at),
                OrderEvent::OrderCanceled(OrderCanceled {
                    order_id: cmd.order_id,
                    canceled_at: cmd.occurred_at,
                }),
            ]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stockline_events::execute;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn created_order() -> Order {
        let id = OrderId::generate();
        let mut order = Order::empty(id);
        { let __cmd = OrderCommand::CreateOrder(CreateOrder {
                order_id: id,
                currency: "USD".to_string(),
                occurred_at: test_time(),
            }); execute(&mut order, &__cmd) }
        .unwrap();
        order
    }

    fn add_line(
        order: &mut Order,
        quantity: i64,
        unit_price_cents: i64,
        requires_shipping: bool,
    ) -> LineItemId {
        let line_item_id = LineItemId::generate();
        execute(
            order,
            &OrderCommand::AddLineItem(AddLineItem {
                order_id: order.id_typed(),
                line_item_id,
                variant_id: VariantId::new(),
                quantity,
                unit_price_cents,
                currency: "USD".to_string(),
                requires_shipping,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        line_item_id
    }

    fn test_address() -> Address {
        Address {
            line1: "1 Dock Road".to_string(),
            city: "Rotterdam".to_string(),
            postal_code: "3011".to_string(),
            country: "NL".to_string(),
        }
    }

    fn pay_in_full(order: &mut Order) {
        let amount = order.total_cents();
        execute(
            order,
            &OrderCommand::RecordPayment(RecordPayment {
                order_id: order.id_typed(),
                payment_id: PaymentId::generate(),
                amount_cents: amount,
                state: PaymentState::Completed,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
    }

    #[test]
    fn add_then_remove_line_item_leaves_zero_totals() {
        let mut order = created_order();
        let line_item_id = add_line(&mut order, 2, 500, true);
        assert_eq!(order.item_total_cents(), 1000);

        { let __cmd = OrderCommand::RemoveLineItem(RemoveLineItem {
                order_id: order.id_typed(),
                line_item_id,
                occurred_at: test_time(),
            }); execute(&mut order, &__cmd) }
        .unwrap();

        assert_eq!(order.item_total_cents(), 0);
        assert_eq!(order.total_cents(), 0);
        assert!(order.adjustments().is_empty());
    }

    #[test]
    fn adding_the_same_variant_merges_and_keeps_the_original_snapshot() {
        let mut order = created_order();
        let variant = VariantId::new();
        let first = LineItemId::generate();
        { let __cmd = OrderCommand::AddLineItem(AddLineItem {
                order_id: order.id_typed(),
                line_item_id: first,
                variant_id: variant,
                quantity: 1,
                unit_price_cents: 500,
                currency: "USD".to_string(),
                requires_shipping: true,
                occurred_at: test_time(),
            }); execute(&mut order, &__cmd) }
        .unwrap();

        // Catalog price changed to 900 in the meantime; the snapshot wins.
        { let __cmd = OrderCommand::AddLineItem(AddLineItem {
                order_id: order.id_typed(),
                line_item_id: LineItemId::generate(),
                variant_id: variant,
                quantity: 2,
                unit_price_cents: 900,
                currency: "USD".to_string(),
                requires_shipping: true,
                occurred_at: test_time(),
            }); execute(&mut order, &__cmd) }
        .unwrap();

        assert_eq!(order.line_items().len(), 1);
        assert_eq!(order.line_items()[0].id, first);
        assert_eq!(order.line_items()[0].quantity, 3);
        assert_eq!(order.item_total_cents(), 1500);
    }

    #[test]
    fn currency_mismatch_is_rejected() {
        let order = created_order();
        let err = order
            .handle(&OrderCommand::AddLineItem(AddLineItem {
                order_id: order.id_typed(),
                line_item_id: LineItemId::generate(),
                variant_id: VariantId::new(),
                quantity: 1,
                unit_price_cents: 500,
                currency: "EUR".to_string(),
                requires_shipping: true,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn line_items_are_frozen_outside_the_cart() {
        let mut order = created_order();
        add_line(&mut order, 1, 500, false);
        { let __cmd = OrderCommand::AdvanceToAddress(AdvanceToAddress {
                order_id: order.id_typed(),
                occurred_at: test_time(),
            }); execute(&mut order, &__cmd) }
        .unwrap();

        let err = order
            .handle(&OrderCommand::AddLineItem(AddLineItem {
                order_id: order.id_typed(),
                line_item_id: LineItemId::generate(),
                variant_id: VariantId::new(),
                quantity: 1,
                unit_price_cents: 100,
                currency: "USD".to_string(),
                requires_shipping: false,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn negative_total_is_rejected_for_adjustments_and_removals() {
        let mut order = created_order();
        let line_item_id = add_line(&mut order, 1, 500, true);

        let err = order
            .handle(&OrderCommand::AddAdjustment(AddAdjustment {
                order_id: order.id_typed(),
                adjustment_id: AdjustmentId::generate(),
                label: "promo".to_string(),
                amount_cents: -600,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        { let __cmd = OrderCommand::AddAdjustment(AddAdjustment {
                order_id: order.id_typed(),
                adjustment_id: AdjustmentId::generate(),
                label: "promo".to_string(),
                amount_cents: -400,
                occurred_at: test_time(),
            }); execute(&mut order, &__cmd) }
        .unwrap();
        assert_eq!(order.total_cents(), 100);

        // Removing the only line item would leave total = -400.
        let err = order
            .handle(&OrderCommand::RemoveLineItem(RemoveLineItem {
                order_id: order.id_typed(),
                line_item_id,
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn digital_order_completes_without_shipments() {
        let mut order = created_order();
        add_line(&mut order, 1, 1500, false);

        { let __cmd = OrderCommand::AdvanceToAddress(AdvanceToAddress {
                order_id: order.id_typed(),
                occurred_at: test_time(),
            }); execute(&mut order, &__cmd) }
        .unwrap();
        { let __cmd = OrderCommand::AdvanceToDelivery(AdvanceToDelivery {
                order_id: order.id_typed(),
                occurred_at: test_time(),
            }); execute(&mut order, &__cmd) }
        .unwrap();
        { let __cmd = OrderCommand::AdvanceToPayment(AdvanceToPayment {
                order_id: order.id_typed(),
                shipments: vec![],
                occurred_at: test_time(),
            }); execute(&mut order, &__cmd) }
        .unwrap();
        pay_in_full(&mut order);
        { let __cmd = OrderCommand::AdvanceToConfirm(AdvanceToConfirm {
                order_id: order.id_typed(),
                occurred_at: test_time(),
            }); execute(&mut order, &__cmd) }
        .unwrap();
        let events = { let __cmd = OrderCommand::CompleteOrder(CompleteOrder {
                order_id: order.id_typed(),
                occurred_at: test_time(),
            }); execute(&mut order, &__cmd) }
        .unwrap();

        assert_eq!(order.state(), OrderState::Complete);
        assert!(order.completed_at().is_some());
        assert!(events
            .iter()
            .any(|e| matches!(e, OrderEvent::OrderCompleted(_))));
    }

    #[test]
    fn physical_order_with_pending_shipment_cannot_complete() {
        let mut order = created_order();
        add_line(&mut order, 1, 1000, true);

        { let __cmd = OrderCommand::AdvanceToAddress(AdvanceToAddress {
                order_id: order.id_typed(),
                occurred_at: test_time(),
            }); execute(&mut order, &__cmd) }
        .unwrap();
        { let __cmd = OrderCommand::SetAddresses(SetAddresses {
                order_id: order.id_typed(),
                ship_address: test_address(),
                bill_address: test_address(),
                occurred_at: test_time(),
            }); execute(&mut order, &__cmd) }
        .unwrap();
        { let __cmd = OrderCommand::AdvanceToDelivery(AdvanceToDelivery {
                order_id: order.id_typed(),
                occurred_at: test_time(),
            }); execute(&mut order, &__cmd) }
        .unwrap();
        { let __cmd = OrderCommand::SelectShippingMethod(SelectShippingMethod {
                order_id: order.id_typed(),
                method_name: "ground".to_string(),
                occurred_at: test_time(),
            }); execute(&mut order, &__cmd) }
        .unwrap();

        let shipment_id = ShipmentId::generate();
        { let __cmd = OrderCommand::AdvanceToPayment(AdvanceToPayment {
                order_id: order.id_typed(),
                shipments: vec![NewShipment {
                    shipment_id,
                    stock_location_id: StockLocationId::generate(),
                    cost_cents: 300,
                }],
                occurred_at: test_time(),
            }); execute(&mut order, &__cmd) }
        .unwrap();
        assert_eq!(order.total_cents(), 1300);

        pay_in_full(&mut order);
        { let __cmd = OrderCommand::AdvanceToConfirm(AdvanceToConfirm {
                order_id: order.id_typed(),
                occurred_at: test_time(),
            }); execute(&mut order, &__cmd) }
        .unwrap();

        // Shipment still Pending: completion refused.
        let err = order
            .handle(&OrderCommand::CompleteOrder(CompleteOrder {
                order_id: order.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        { let __cmd = OrderCommand::MarkShipmentReady(MarkShipmentReady {
                order_id: order.id_typed(),
                shipment_id,
                occurred_at: test_time(),
            }); execute(&mut order, &__cmd) }
        .unwrap();
        { let __cmd = OrderCommand::CompleteOrder(CompleteOrder {
                order_id: order.id_typed(),
                occurred_at: test_time(),
            }); execute(&mut order, &__cmd) }
        .unwrap();
        assert_eq!(order.state(), OrderState::Complete);
    }

    #[test]
    fn physical_order_requires_addresses_before_delivery() {
        let mut order = created_order();
        add_line(&mut order, 1, 1000, true);
        { let __cmd = OrderCommand::AdvanceToAddress(AdvanceToAddress {
                order_id: order.id_typed(),
                occurred_at: test_time(),
            }); execute(&mut order, &__cmd) }
        .unwrap();

        let err = order
            .handle(&OrderCommand::AdvanceToDelivery(AdvanceToDelivery {
                order_id: order.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn confirm_requires_covering_payments() {
        let mut order = created_order();
        add_line(&mut order, 1, 1500, false);
        { let __cmd = OrderCommand::AdvanceToAddress(AdvanceToAddress {
                order_id: order.id_typed(),
                occurred_at: test_time(),
            }); execute(&mut order, &__cmd) }
        .unwrap();
        { let __cmd = OrderCommand::AdvanceToDelivery(AdvanceToDelivery {
                order_id: order.id_typed(),
                occurred_at: test_time(),
            }); execute(&mut order, &__cmd) }
        .unwrap();
        { let __cmd = OrderCommand::AdvanceToPayment(AdvanceToPayment {
                order_id: order.id_typed(),
                shipments: vec![],
                occurred_at: test_time(),
            }); execute(&mut order, &__cmd) }
        .unwrap();

        // A pending payment does not count toward the structural precondition.
        { let __cmd = OrderCommand::RecordPayment(RecordPayment {
                order_id: order.id_typed(),
                payment_id: PaymentId::generate(),
                amount_cents: 1500,
                state: PaymentState::Pending,
                occurred_at: test_time(),
            }); execute(&mut order, &__cmd) }
        .unwrap();
        let err = order
            .handle(&OrderCommand::AdvanceToConfirm(AdvanceToConfirm {
                order_id: order.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));

        // Gateway confirms asynchronously; now the structural check passes.
        let payment_id = order.payments()[0].id;
        { let __cmd = OrderCommand::UpdatePaymentState(UpdatePaymentState {
                order_id: order.id_typed(),
                payment_id,
                state: PaymentState::Completed,
                occurred_at: test_time(),
            }); execute(&mut order, &__cmd) }
        .unwrap();
        { let __cmd = OrderCommand::AdvanceToConfirm(AdvanceToConfirm {
                order_id: order.id_typed(),
                occurred_at: test_time(),
            }); execute(&mut order, &__cmd) }
        .unwrap();
        assert_eq!(order.state(), OrderState::Confirm);
    }

    #[test]
    fn skipping_states_is_an_invalid_transition() {
        let mut order = created_order();
        add_line(&mut order, 1, 100, false);

        let err = order
            .handle(&OrderCommand::AdvanceToDelivery(AdvanceToDelivery {
                order_id: order.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert_eq!(
            err,
            DomainError::InvalidStateTransition {
                from: "cart".to_string(),
                to: "delivery".to_string()
            }
        );
    }

    #[test]
    fn cancel_is_idempotent_and_blocked_after_completion() {
        let mut order = created_order();
        add_line(&mut order, 1, 100, false);

        let events = { let __cmd = OrderCommand::CancelOrder(CancelOrder {
                order_id: order.id_typed(),
                occurred_at: test_time(),
            }); execute(&mut order, &__cmd) }
        .unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(order.state(), OrderState::Canceled);
        assert!(order.canceled_at().is_some());

        let events = { let __cmd = OrderCommand::CancelOrder(CancelOrder {
                order_id: order.id_typed(),
                occurred_at: test_time(),
            }); execute(&mut order, &__cmd) }
        .unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn empty_cart_cannot_advance() {
        let order = created_order();
        let err = order
            .handle(&OrderCommand::AdvanceToAddress(AdvanceToAddress {
                order_id: order.id_typed(),
                occurred_at: test_time(),
            }))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn totals_identity_holds_after_every_step() {
        let mut order = created_order();
        add_line(&mut order, 2, 700, true);
        { let __cmd = OrderCommand::AddAdjustment(AddAdjustment {
                order_id: order.id_typed(),
                adjustment_id: AdjustmentId::generate(),
                label: "loyalty".to_string(),
                amount_cents: -200,
                occurred_at: test_time(),
            }); execute(&mut order, &__cmd) }
        .unwrap();

        assert_eq!(
            order.total_cents(),
            order.item_total_cents() + order.shipment_total_cents()
                + order.adjustment_total_cents()
        );
        assert_eq!(order.total_cents(), 1200);
    }

    mod proptest_tests {
        use super::*;
        use proptest::prelude::*;

        proptest! {
            #![proptest_config(ProptestConfig {
                cases: 256,
                ..ProptestConfig::default()
            })]

            /// Property: whatever sequence of cart mutations is attempted,
            /// the total identity holds and never goes negative.
            #[test]
            fn cart_mutations_preserve_the_total_invariant(
                prices in proptest::collection::vec((1i64..=1000, 1i64..=5), 1..8),
                discounts in proptest::collection::vec(-800i64..=800, 0..6)
            ) {
                let mut order = created_order();
                for (price, quantity) in &prices {
                    let _ = { let __cmd = OrderCommand::AddLineItem(AddLineItem {
                            order_id: order.id_typed(),
                            line_item_id: LineItemId::generate(),
                            variant_id: VariantId::new(),
                            quantity: *quantity,
                            unit_price_cents: *price,
                            currency: "USD".to_string(),
                            requires_shipping: true,
                            occurred_at: Utc::now(),
                        }); execute(&mut order, &__cmd) };
                }
                for amount in &discounts {
                    let _ = { let __cmd = OrderCommand::AddAdjustment(AddAdjustment {
                            order_id: order.id_typed(),
                            adjustment_id: AdjustmentId::generate(),
                            label: "promo".to_string(),
                            amount_cents: *amount,
                            occurred_at: Utc::now(),
                        }); execute(&mut order, &__cmd) };
                }

                prop_assert!(order.total_cents() >= 0);
                prop_assert_eq!(
                    order.total_cents(),
                    order.item_total_cents()
                        + order.shipment_total_cents()
                        + order.adjustment_total_cents()
                );
            }
        }
    }
}

//! Orders domain module (event-sourced).
//!
//! This crate contains business rules for the order lifecycle and the
//! per-unit inventory tracking attached to it, implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod adjustment;
pub mod line_item;
pub mod order;
pub mod payment;
pub mod shipment;
pub mod unit;

pub use adjustment::Adjustment;
pub use line_item::{LineItem, PriceSnapshot};
pub use order::{
    AddAdjustment, AddLineItem, Address, AddressesSet, AdjustmentAdded, AdjustmentRemoved,
    AdvanceToAddress, AdvanceToConfirm, AdvanceToDelivery, AdvanceToPayment, CancelOrder,
    CompleteOrder, CreateOrder, LineItemAdded, LineItemQuantityUpdated, LineItemRemoved,
    MarkShipmentReady, MarkShipmentShipped, NewShipment, ORDER_AGGREGATE_TYPE, Order,
    OrderCanceled, OrderCommand, OrderCompleted, OrderCreated, OrderEvent, OrderState,
    OrderStateChanged, PaymentRecorded, PaymentStateChanged, RecordPayment, RemoveAdjustment,
    RemoveLineItem, SelectShippingMethod, SetAddresses, ShipmentAdded, ShipmentStateChanged,
    ShippingMethodSelected, UpdateLineItemQuantity, UpdatePaymentState,
};
pub use payment::{Payment, PaymentState};
pub use shipment::{Shipment, ShipmentState};
pub use unit::{
    CancelUnit, CreateInventoryUnit, FillBackorder, INVENTORY_UNIT_AGGREGATE_TYPE, InventoryUnit,
    InventoryUnitCommand, InventoryUnitEvent, ReturnUnit, ShipUnit, UnitBackorderFilled,
    UnitCanceled, UnitCreated, UnitReturned, UnitShipped, UnitState,
};

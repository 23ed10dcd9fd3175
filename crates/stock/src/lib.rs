//! Stock domain module (event-sourced).
//!
//! This crate contains business rules for stock tracking: quantity ledgers,
//! locations, movements, and multi-location transfers. Implemented purely as
//! deterministic domain logic (no IO, no HTTP, no storage).

pub mod item;
pub mod location;
pub mod movement;
pub mod transfer;

pub use item::{
    AdjustStock, BackorderEntry, BackorderFill, BackordersProcessed, ConfirmShipment,
    CreateStockItem, ProcessBackorders, ReleaseStock, ReserveStock, STOCK_ITEM_AGGREGATE_TYPE,
    ShipmentConfirmed, StockAdjusted, StockItem, StockItemCommand, StockItemCreated,
    StockItemEvent, StockReleased, StockReserved,
};
pub use location::{
    ClearDefault, CreateStockLocation, DeleteStockLocation, LinkStore, LocationCreated,
    LocationDefaultChanged, LocationDeleted, LocationRestored, LocationUpdated, MakeDefault,
    RegisterStockItem, RestoreStockLocation, STOCK_LOCATION_AGGREGATE_TYPE,
    StockInvariantViolation, StockItemRegistered, StockLocation, StockLocationCommand,
    StockLocationEvent, StoreLink, StoreLinked, StoreUnlinked, UnlinkStore, UpdateStockLocation,
    validate_invariants,
};
pub use movement::{MovementOriginator, StockMovement};
pub use transfer::{
    CreateStockTransfer, STOCK_TRANSFER_AGGREGATE_TYPE, StockTransfer, StockTransferCommand,
    StockTransferEvent, TransferCreated, TransferLeg, TransferLine, TransferLineError,
    TransferPlan,
};

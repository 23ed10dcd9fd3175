//! Projection implementations (read model builders).
//!
//! Projections consume published envelopes and build query-optimized read
//! models. All projections here are:
//! - **Rebuildable**: reconstructable from the event stream
//! - **Idempotent**: safe under at-least-once delivery (cursor-checked)

pub mod movement_log;
pub mod stock_levels;

pub use movement_log::{MovementLogProjection, MovementLogProjectionError};
pub use stock_levels::{StockLevel, StockLevelsProjection, StockLevelsProjectionError};

//! Strongly-typed identifiers used across the domain.
//!
//! Every aggregate and embedded record gets its own newtype so ids cannot be
//! mixed up across boundaries. `VariantId` and `StoreId` reference catalog and
//! storefront entities that live outside this engine; only their identities
//! appear here.

use core::str::FromStr;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::DomainError;

/// Identifier of an aggregate root.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AggregateId(Uuid);

/// Identifier of a product variant (catalog reference, external).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariantId(Uuid);

/// Identifier of a store (storefront reference, external).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StoreId(Uuid);

macro_rules! impl_uuid_newtype {
    ($t:ty, $name:literal) => {
        impl $t {
            /// Create a new identifier.
            ///
            /// Uses UUIDv7 (time-ordered). Prefer passing IDs explicitly in tests
            /// for determinism.
            pub fn new() -> Self {
                Self(Uuid::now_v7())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $t {
            fn default() -> Self {
                Self::new()
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<Uuid> for $t {
            fn from(value: Uuid) -> Self {
                Self(value)
            }
        }

        impl From<$t> for Uuid {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(uuid))
            }
        }
    };
}

impl_uuid_newtype!(AggregateId, "AggregateId");
impl_uuid_newtype!(VariantId, "VariantId");
impl_uuid_newtype!(StoreId, "StoreId");

macro_rules! impl_aggregate_scoped_id {
    ($t:ident, $name:literal) => {
        /// Aggregate-scoped identifier newtype over [`AggregateId`].
        #[derive(
            Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        #[serde(transparent)]
        pub struct $t(pub AggregateId);

        impl $t {
            pub fn new(id: AggregateId) -> Self {
                Self(id)
            }

            /// Mint a fresh identifier.
            pub fn generate() -> Self {
                Self(AggregateId::new())
            }

            pub fn as_aggregate_id(&self) -> AggregateId {
                self.0
            }
        }

        impl core::fmt::Display for $t {
            fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
                core::fmt::Display::fmt(&self.0, f)
            }
        }

        impl From<$t> for AggregateId {
            fn from(value: $t) -> Self {
                value.0
            }
        }

        impl FromStr for $t {
            type Err = DomainError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let uuid = Uuid::from_str(s)
                    .map_err(|e| DomainError::invalid_id(format!("{}: {}", $name, e)))?;
                Ok(Self(AggregateId::from_uuid(uuid)))
            }
        }
    };
}

impl_aggregate_scoped_id!(StockItemId, "StockItemId");
impl_aggregate_scoped_id!(StockLocationId, "StockLocationId");
impl_aggregate_scoped_id!(StockTransferId, "StockTransferId");
impl_aggregate_scoped_id!(InventoryUnitId, "InventoryUnitId");
impl_aggregate_scoped_id!(OrderId, "OrderId");
impl_aggregate_scoped_id!(LineItemId, "LineItemId");
impl_aggregate_scoped_id!(AdjustmentId, "AdjustmentId");
impl_aggregate_scoped_id!(PaymentId, "PaymentId");
impl_aggregate_scoped_id!(ShipmentId, "ShipmentId");

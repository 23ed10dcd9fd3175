use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use stockline_core::{
    Aggregate, AggregateId, AggregateRoot, DomainError, StockItemId, StockLocationId,
    StockTransferId, VariantId,
};
use stockline_events::{Command, Event};

use crate::item::StockItem;

/// Stream type identifier for stock transfer aggregates.
pub const STOCK_TRANSFER_AGGREGATE_TYPE: &str = "stock.transfer";

/// One requested (variant, quantity) pair of a transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferLine {
    pub variant_id: VariantId,
    pub quantity: i64,
}

/// Aggregate root: StockTransfer - one request to move named quantities of
/// variants between two locations, or to receive from an external supplier
/// into one location (no source).
///
/// The transfer is an immutable request description. Execution state is
/// derived from its effects on the stock items (every movement of an executed
/// leg back-references this transfer's id); no status machine is stored here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockTransfer {
    id: StockTransferId,
    number: String,
    source_location_id: Option<StockLocationId>,
    destination_location_id: StockLocationId,
    lines: Vec<TransferLine>,
    created_at: Option<DateTime<Utc>>,
    version: u64,
    created: bool,
}

impl StockTransfer {
    /// Create an empty, not-yet-created aggregate instance for rehydration.
    pub fn empty(id: StockTransferId) -> Self {
        Self {
            id,
            number: String::new(),
            source_location_id: None,
            destination_location_id: StockLocationId::new(AggregateId::from_uuid(
                uuid::Uuid::nil(),
            )),
            lines: Vec::new(),
            created_at: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> StockTransferId {
        self.id
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn source_location_id(&self) -> Option<StockLocationId> {
        self.source_location_id
    }

    pub fn destination_location_id(&self) -> StockLocationId {
        self.destination_location_id
    }

    pub fn lines(&self) -> &[TransferLine] {
        &self.lines
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn is_created(&self) -> bool {
        self.created
    }

    /// A receipt takes goods from an external supplier: no source location,
    /// no availability checks.
    pub fn is_receipt(&self) -> bool {
        self.source_location_id.is_none()
    }
}

impl AggregateRoot for StockTransfer {
    type Id = StockTransferId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: CreateStockTransfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateStockTransfer {
    pub transfer_id: StockTransferId,
    /// Human-readable sequential number, generated by the caller.
    pub number: String,
    pub source_location_id: Option<StockLocationId>,
    pub destination_location_id: StockLocationId,
    pub lines: Vec<TransferLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockTransferCommand {
    CreateStockTransfer(CreateStockTransfer),
}

impl Command for StockTransferCommand {
    fn target_aggregate_id(&self) -> AggregateId {
        match self {
            Self::CreateStockTransfer(c) => c.transfer_id.as_aggregate_id(),
        }
    }
}

/// Event: TransferCreated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferCreated {
    pub transfer_id: StockTransferId,
    pub number: String,
    pub source_location_id: Option<StockLocationId>,
    pub destination_location_id: StockLocationId,
    pub lines: Vec<TransferLine>,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockTransferEvent {
    TransferCreated(TransferCreated),
}

impl Event for StockTransferEvent {
    fn event_type(&self) -> &'static str {
        match self {
            StockTransferEvent::TransferCreated(_) => "stock.transfer.created",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockTransferEvent::TransferCreated(e) => e.occurred_at,
        }
    }
}

impl Aggregate for StockTransfer {
    type Command = StockTransferCommand;
    type Event = StockTransferEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            StockTransferEvent::TransferCreated(e) => {
                self.id = e.transfer_id;
                self.number = e.number.clone();
                self.source_location_id = e.source_location_id;
                self.destination_location_id = e.destination_location_id;
                self.lines = e.lines.clone();
                self.created_at = Some(e.occurred_at);
                self.created = true;
            }
        }

        // Deterministic version tracking: +1 per applied event.
        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            StockTransferCommand::CreateStockTransfer(cmd) => self.handle_create(cmd),
        }
    }
}

impl StockTransfer {
    fn handle_create(
        &self,
        cmd: &CreateStockTransfer,
    ) -> Result<Vec<StockTransferEvent>, DomainError> {
        if self.created {
            return Err(DomainError::conflict("stock transfer already exists"));
        }
        if cmd.number.trim().is_empty() {
            return Err(DomainError::validation("transfer number cannot be empty"));
        }
        if cmd.source_location_id == Some(cmd.destination_location_id) {
            return Err(DomainError::conflict(
                "transfer source and destination must differ",
            ));
        }
        if cmd.lines.is_empty() {
            return Err(DomainError::validation(
                "transfer requires at least one line",
            ));
        }
        for line in &cmd.lines {
            if line.quantity <= 0 {
                return Err(DomainError::validation("line quantity must be positive"));
            }
        }
        for (i, line) in cmd.lines.iter().enumerate() {
            if cmd.lines[..i].iter().any(|l| l.variant_id == line.variant_id) {
                return Err(DomainError::validation(
                    "transfer lines must name distinct variants",
                ));
            }
        }

        Ok(vec![StockTransferEvent::TransferCreated(TransferCreated {
            transfer_id: cmd.transfer_id,
            number: cmd.number.clone(),
            source_location_id: cmd.source_location_id,
            destination_location_id: cmd.destination_location_id,
            lines: cmd.lines.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }
}

/// Validation failure for one requested line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferLineError {
    pub variant_id: VariantId,
    pub error: DomainError,
}

/// One concrete apply-operation of a validated transfer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferLeg {
    /// Remove quantity from the resolved source stock item.
    Unstock {
        location_id: StockLocationId,
        stock_item_id: StockItemId,
        variant_id: VariantId,
        quantity: i64,
    },
    /// Add quantity at the destination (the stock item is resolved or
    /// created at execution time).
    Restock {
        location_id: StockLocationId,
        variant_id: VariantId,
        quantity: i64,
    },
}

/// Output of the validate phase: every leg needed to execute the transfer.
///
/// The plan is inert data. Executing it is a separate concern
/// (`TransferService`), and must happen inside a caller-supplied atomic
/// transaction so a failure on leg N rolls back legs 1..N-1.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferPlan {
    pub transfer_id: StockTransferId,
    pub receipt: bool,
    pub legs: Vec<TransferLeg>,
}

impl StockTransfer {
    /// Validate phase of the two-phase protocol.
    ///
    /// Checks every requested line against the source stock items without
    /// mutating anything, accumulating **every** failure found so the caller
    /// sees the complete picture instead of guessing past the first error.
    /// Only a fully clean validation yields a plan.
    ///
    /// `source_items` are the current stock items at the source location;
    /// ignored (and availability unchecked) for supplier receipts.
    pub fn plan(&self, source_items: &[StockItem]) -> Result<TransferPlan, Vec<TransferLineError>> {
        if !self.created {
            return Err(vec![TransferLineError {
                variant_id: VariantId::from_uuid(uuid::Uuid::nil()),
                error: DomainError::not_found(),
            }]);
        }

        let mut errors = Vec::new();
        let mut legs = Vec::new();

        for line in &self.lines {
            match self.source_location_id {
                None => {
                    legs.push(TransferLeg::Restock {
                        location_id: self.destination_location_id,
                        variant_id: line.variant_id,
                        quantity: line.quantity,
                    });
                }
                Some(source_id) => {
                    let item = source_items.iter().find(|item| {
                        item.variant_id() == line.variant_id && item.location_id() == source_id
                    });
                    match item {
                        None => errors.push(TransferLineError {
                            variant_id: line.variant_id,
                            error: DomainError::not_found(),
                        }),
                        Some(item) => {
                            let available = item.count_available();
                            if line.quantity > available {
                                errors.push(TransferLineError {
                                    variant_id: line.variant_id,
                                    error: DomainError::insufficient_stock(
                                        line.quantity,
                                        available,
                                    ),
                                });
                            } else {
                                legs.push(TransferLeg::Unstock {
                                    location_id: source_id,
                                    stock_item_id: item.id_typed(),
                                    variant_id: line.variant_id,
                                    quantity: line.quantity,
                                });
                                legs.push(TransferLeg::Restock {
                                    location_id: self.destination_location_id,
                                    variant_id: line.variant_id,
                                    quantity: line.quantity,
                                });
                            }
                        }
                    }
                }
            }
        }

        if !errors.is_empty() {
            return Err(errors);
        }

        Ok(TransferPlan {
            transfer_id: self.id,
            receipt: self.is_receipt(),
            legs,
        })
    }
}

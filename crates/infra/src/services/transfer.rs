use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde_json::Value as JsonValue;

use stockline_core::{DomainError, StockLocationId, StockTransferId, VariantId};
use stockline_events::{EventBus, EventEnvelope};
use stockline_stock::{
    CreateStockTransfer, MovementOriginator, STOCK_TRANSFER_AGGREGATE_TYPE, StockItem,
    StockTransfer, StockTransferCommand, TransferLeg, TransferLine, TransferLineError,
    TransferPlan,
};

use crate::command_dispatcher::{CommandDispatcher, DispatchError};
use crate::event_store::EventStore;
use crate::services::stock::StockService;

/// Result of a fully executed transfer, handed to the calling orchestrator
/// (the consumer of the transfer-completed signal).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferOutcome {
    pub transfer_id: StockTransferId,
    pub number: String,
    pub legs_applied: usize,
}

/// Failure modes of transfer execution.
#[derive(Debug)]
pub enum TransferError {
    /// The validate phase found problems; the full list is returned and
    /// **zero** side effects occurred anywhere.
    Validation(Vec<TransferLineError>),
    /// Validation passed but a leg failed during execution (typically a
    /// concurrent writer racing past validation). `applied` lists every leg
    /// already executed: the caller **must** roll the whole execute phase
    /// back via its own transaction boundary.
    PartialFailure {
        transfer_id: StockTransferId,
        applied: Vec<TransferLeg>,
        failed: Vec<(TransferLeg, DispatchError)>,
    },
    /// Infrastructure or lookup failure before any leg was attempted.
    Dispatch(DispatchError),
}

impl From<DispatchError> for TransferError {
    fn from(value: DispatchError) -> Self {
        TransferError::Dispatch(value)
    }
}

impl From<DomainError> for TransferError {
    fn from(value: DomainError) -> Self {
        TransferError::Dispatch(value.into())
    }
}

impl core::fmt::Display for TransferError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TransferError::Validation(errors) => {
                write!(f, "transfer validation failed for {} line(s)", errors.len())
            }
            TransferError::PartialFailure {
                applied, failed, ..
            } => write!(
                f,
                "transfer partially failed: {} leg(s) applied, {} leg(s) failed; roll back via the surrounding transaction",
                applied.len(),
                failed.len()
            ),
            TransferError::Dispatch(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for TransferError {}

/// Multi-location transfer orchestration: the execute half of the two-phase
/// validate/execute protocol (the validate half is the pure
/// [`StockTransfer::plan`]).
pub struct TransferService<S, B> {
    dispatcher: Arc<CommandDispatcher<S, B>>,
    stock: StockService<S, B>,
    sequence: AtomicU64,
}

impl<S, B> TransferService<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(dispatcher: Arc<CommandDispatcher<S, B>>) -> Self {
        let stock = StockService::new(Arc::clone(&dispatcher));
        Self {
            dispatcher,
            stock,
            sequence: AtomicU64::new(0),
        }
    }

    /// Create a transfer request with the next sequential number.
    pub fn create_transfer(
        &self,
        source_location_id: Option<StockLocationId>,
        destination_location_id: StockLocationId,
        lines: Vec<TransferLine>,
    ) -> Result<StockTransferId, DispatchError> {
        let transfer_id = StockTransferId::generate();
        let number = format!("T-{:05}", self.sequence.fetch_add(1, Ordering::SeqCst) + 1);

        self.dispatcher.dispatch(
            transfer_id.as_aggregate_id(),
            STOCK_TRANSFER_AGGREGATE_TYPE,
            &StockTransferCommand::CreateStockTransfer(CreateStockTransfer {
                transfer_id,
                number,
                source_location_id,
                destination_location_id,
                lines,
                occurred_at: Utc::now(),
            }),
            |id| StockTransfer::empty(StockTransferId::new(id)),
        )?;
        Ok(transfer_id)
    }

    /// Execute a location-to-location transfer.
    ///
    /// Validate phase: every line is checked against the source items with no
    /// mutation; any failure returns the complete error list and nothing has
    /// changed anywhere. Execute phase: legs are applied in order; the caller
    /// is expected to wrap this call in an atomic transaction so a
    /// [`TransferError::PartialFailure`] rolls back the already-applied legs.
    pub fn transfer(&self, transfer_id: StockTransferId) -> Result<TransferOutcome, TransferError> {
        let transfer = self.load_transfer(transfer_id)?;
        if transfer.is_receipt() {
            return Err(DomainError::validation(
                "transfer has no source location; use receive()",
            )
            .into());
        }
        self.plan_and_execute(&transfer)
    }

    /// Execute a supplier receipt into the destination location.
    pub fn receive(&self, transfer_id: StockTransferId) -> Result<TransferOutcome, TransferError> {
        let transfer = self.load_transfer(transfer_id)?;
        if !transfer.is_receipt() {
            return Err(DomainError::validation(
                "transfer has a source location; use transfer()",
            )
            .into());
        }
        self.plan_and_execute(&transfer)
    }

    fn load_transfer(&self, transfer_id: StockTransferId) -> Result<StockTransfer, DispatchError> {
        let transfer = self
            .dispatcher
            .load_aggregate(transfer_id.as_aggregate_id(), |id| {
                StockTransfer::empty(StockTransferId::new(id))
            })?;
        if !transfer.is_created() {
            return Err(DomainError::not_found().into());
        }
        Ok(transfer)
    }

    fn plan_and_execute(&self, transfer: &StockTransfer) -> Result<TransferOutcome, TransferError> {
        // Both endpoints must exist and be live before anything moves.
        if let Some(source_id) = transfer.source_location_id() {
            let source = self.stock.load_location(source_id)?;
            if source.is_deleted() {
                return Err(DomainError::conflict("source location is deleted").into());
            }
        }
        let destination = self.stock.load_location(transfer.destination_location_id())?;
        if destination.is_deleted() {
            return Err(DomainError::conflict("destination location is deleted").into());
        }

        let source_items = self.load_source_items(transfer)?;
        let plan = transfer
            .plan(&source_items)
            .map_err(TransferError::Validation)?;

        self.execute_plan(transfer, plan)
    }

    /// Resolve the source stock items for the transfer's lines. Variants
    /// without a stock item are simply absent; the planner reports them.
    fn load_source_items(&self, transfer: &StockTransfer) -> Result<Vec<StockItem>, DispatchError> {
        let Some(source_id) = transfer.source_location_id() else {
            return Ok(vec![]);
        };
        let source = self.stock.load_location(source_id)?;

        let mut items = Vec::new();
        for line in transfer.lines() {
            if let Some(stock_item_id) = source.stock_item_for(line.variant_id) {
                items.push(self.stock.load_item(stock_item_id)?);
            }
        }
        Ok(items)
    }

    fn execute_plan(
        &self,
        transfer: &StockTransfer,
        plan: TransferPlan,
    ) -> Result<TransferOutcome, TransferError> {
        let originator = if plan.receipt {
            MovementOriginator::Receipt
        } else {
            MovementOriginator::Transfer
        };

        let mut applied: Vec<TransferLeg> = Vec::with_capacity(plan.legs.len());
        let mut failed: Vec<(TransferLeg, DispatchError)> = Vec::new();

        for leg in plan.legs {
            let result = self.apply_leg(&leg, originator, plan.transfer_id);
            match result {
                Ok(()) => applied.push(leg),
                Err(err) => {
                    failed.push((leg, err));
                    // Stop at the first execution failure; the caller rolls
                    // back whatever was applied.
                    break;
                }
            }
        }

        if !failed.is_empty() {
            tracing::error!(
                transfer_id = %plan.transfer_id,
                applied = applied.len(),
                failed = failed.len(),
                "transfer execution failed partway; caller must roll back"
            );
            return Err(TransferError::PartialFailure {
                transfer_id: plan.transfer_id,
                applied,
                failed,
            });
        }

        tracing::info!(
            transfer_id = %plan.transfer_id,
            number = transfer.number(),
            legs = applied.len(),
            receipt = plan.receipt,
            "transfer executed"
        );

        Ok(TransferOutcome {
            transfer_id: plan.transfer_id,
            number: transfer.number().to_string(),
            legs_applied: applied.len(),
        })
    }

    fn apply_leg(
        &self,
        leg: &TransferLeg,
        originator: MovementOriginator,
        transfer_id: StockTransferId,
    ) -> Result<(), DispatchError> {
        let (location_id, variant_id, delta): (StockLocationId, VariantId, i64) = match leg {
            TransferLeg::Unstock {
                location_id,
                variant_id,
                quantity,
                ..
            } => (*location_id, *variant_id, -quantity),
            TransferLeg::Restock {
                location_id,
                variant_id,
                quantity,
            } => (*location_id, *variant_id, *quantity),
        };

        self.stock
            .adjust_at(
                location_id,
                variant_id,
                delta,
                originator,
                None,
                Some(transfer_id),
                delta > 0,
            )
            .map(|_| ())
    }
}

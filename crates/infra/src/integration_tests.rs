//! Integration tests for the full pipeline.
//!
//! Command → EventStore → EventBus → Projection → ReadModel, plus the
//! cross-aggregate service flows (transfers, fulfillment, guards).

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Barrier};

    use chrono::Utc;
    use serde_json::Value as JsonValue;

    use stockline_core::{
        AggregateRoot, DomainError, ExpectedVersion, InventoryUnitId, LineItemId, OrderId,
        ShipmentId, StockItemId, StockLocationId, VariantId,
    };
    use stockline_events::{EventBus, EventEnvelope, InMemoryEventBus};
    use stockline_orders::{
        InventoryUnit, LineItem, PriceSnapshot, UnitState,
    };
    use stockline_stock::{
        MovementOriginator, ReserveStock, STOCK_ITEM_AGGREGATE_TYPE, StockItem, StockItemCommand,
        TransferLine,
    };

    use crate::command_dispatcher::{CommandDispatcher, DispatchError};
    use crate::event_store::{EventStore, EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent};
    use crate::projections::movement_log::MovementLogProjection;
    use crate::projections::stock_levels::{StockLevel, StockLevelsProjection};
    use crate::read_model::InMemoryKeyedStore;
    use crate::services::fulfillment::FulfillmentService;
    use crate::services::stock::StockService;
    use crate::services::transfer::{TransferError, TransferService};

    type Bus = Arc<InMemoryEventBus<EventEnvelope<JsonValue>>>;
    type Dispatcher = Arc<CommandDispatcher<Arc<InMemoryEventStore>, Bus>>;
    type Levels = Arc<StockLevelsProjection<Arc<InMemoryKeyedStore<StockItemId, StockLevel>>>>;
    type Movements =
        Arc<MovementLogProjection<Arc<InMemoryKeyedStore<StockItemId, Vec<stockline_stock::StockMovement>>>>>;

    struct Harness {
        dispatcher: Dispatcher,
        stock: StockService<Arc<InMemoryEventStore>, Bus>,
        transfers: TransferService<Arc<InMemoryEventStore>, Bus>,
        fulfillment: FulfillmentService<Arc<InMemoryEventStore>, Bus>,
        levels: Levels,
        movements: Movements,
    }

    fn setup() -> Harness {
        let store = Arc::new(InMemoryEventStore::new());
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let dispatcher: Dispatcher = Arc::new(CommandDispatcher::new(store, bus.clone()));

        let levels: Levels = Arc::new(StockLevelsProjection::new(Arc::new(
            InMemoryKeyedStore::new(),
        )));
        let movements: Movements = Arc::new(MovementLogProjection::new(Arc::new(
            InMemoryKeyedStore::new(),
        )));

        // Subscribe to the bus BEFORE any events are published.
        let levels_clone = levels.clone();
        let movements_clone = movements.clone();
        let bus_clone = bus.clone();
        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<()>();
        std::thread::spawn(move || {
            let sub = bus_clone.subscribe();
            let _ = ready_tx.send(());
            while let Ok(envelope) = sub.recv() {
                if let Err(e) = levels_clone.apply_envelope(&envelope) {
                    eprintln!("stock levels projection failed: {e:?}");
                }
                if let Err(e) = movements_clone.apply_envelope(&envelope) {
                    eprintln!("movement log projection failed: {e:?}");
                }
            }
        });
        let _ = ready_rx.recv_timeout(std::time::Duration::from_secs(1));

        Harness {
            stock: StockService::new(dispatcher.clone()),
            transfers: TransferService::new(dispatcher.clone()),
            fulfillment: FulfillmentService::new(dispatcher.clone()),
            dispatcher,
            levels,
            movements,
        }
    }

    /// The subscriber thread processes events asynchronously; give it a beat.
    fn wait_for_processing() {
        std::thread::sleep(std::time::Duration::from_millis(50));
    }

    fn line_item(quantity: i64) -> LineItem {
        LineItem {
            id: LineItemId::generate(),
            variant_id: VariantId::new(),
            quantity,
            price: PriceSnapshot {
                unit_price_cents: 500,
                currency: "USD".to_string(),
            },
            requires_shipping: true,
        }
    }

    fn load_item(h: &Harness, stock_item_id: StockItemId) -> StockItem {
        h.stock.load_item(stock_item_id).unwrap()
    }

    fn load_unit(h: &Harness, unit_id: InventoryUnitId) -> InventoryUnit {
        h.dispatcher
            .load_aggregate(unit_id.as_aggregate_id(), |id| {
                InventoryUnit::empty(InventoryUnitId::new(id))
            })
            .unwrap()
    }

    #[test]
    fn restock_updates_the_stock_levels_read_model() {
        let h = setup();
        let location_id = h.stock.create_location("Main", None, true).unwrap();
        let variant_id = VariantId::new();

        let stock_item_id = h.stock.restock(location_id, variant_id, 7, None).unwrap();
        wait_for_processing();

        let level = h.levels.get(&stock_item_id).unwrap();
        assert_eq!(level.on_hand, 7);
        assert_eq!(level.reserved, 0);
        assert_eq!(level.available(), 7);
        assert_eq!(level.location_id, location_id);
    }

    #[test]
    fn concurrent_reservations_cannot_oversell() {
        let h = setup();
        let location_id = h.stock.create_location("Main", None, true).unwrap();
        let variant_id = VariantId::new();
        let stock_item_id = h.stock.restock(location_id, variant_id, 1, None).unwrap();

        // Two writers race for the last unit. Each dispatch loads the stream,
        // decides, and appends against the loaded version - exactly one can
        // win; the other sees a Conflict (lost the append) or
        // InsufficientStock (reloaded after the winner committed).
        let barrier = Arc::new(Barrier::new(2));
        let mut handles = Vec::new();
        for _ in 0..2 {
            let dispatcher = h.dispatcher.clone();
            let barrier = barrier.clone();
            handles.push(std::thread::spawn(move || {
                barrier.wait();
                dispatcher.dispatch(
                    stock_item_id.as_aggregate_id(),
                    STOCK_ITEM_AGGREGATE_TYPE,
                    &StockItemCommand::ReserveStock(ReserveStock {
                        stock_item_id,
                        quantity: 1,
                        unit_id: None,
                        occurred_at: Utc::now(),
                    }),
                    |id| StockItem::empty(StockItemId::new(id)),
                )
            }));
        }

        let results: Vec<_> = handles.into_iter().map(|t| t.join().unwrap()).collect();
        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1, "exactly one reservation must win: {results:?}");

        for result in results {
            if let Err(err) = result {
                assert!(
                    matches!(
                        err,
                        DispatchError::Concurrency(_)
                            | DispatchError::Domain(DomainError::InsufficientStock { .. })
                    ),
                    "loser must see a conflict or insufficient stock, got {err:?}"
                );
            }
        }

        let item = load_item(&h, stock_item_id);
        assert_eq!(item.reserved(), 1);
        assert_eq!(item.on_hand(), 1);
    }

    /// Store wrapper whose appends always lose the optimistic check.
    struct AlwaysConflictingStore {
        inner: InMemoryEventStore,
    }

    impl EventStore for AlwaysConflictingStore {
        fn append(
            &self,
            _events: Vec<UncommittedEvent>,
            _expected_version: ExpectedVersion,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            Err(EventStoreError::Concurrency(
                "simulated concurrent writer".to_string(),
            ))
        }

        fn load_stream(
            &self,
            aggregate_id: stockline_core::AggregateId,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.load_stream(aggregate_id)
        }
    }

    #[test]
    fn conflict_retry_is_bounded_and_surfaces_the_conflict() {
        let store = AlwaysConflictingStore {
            inner: InMemoryEventStore::new(),
        };
        let bus: Bus = Arc::new(InMemoryEventBus::new());
        let dispatcher = CommandDispatcher::new(store, bus);

        let stock_item_id = StockItemId::generate();
        let err = dispatcher
            .dispatch_with_retry(
                stock_item_id.as_aggregate_id(),
                STOCK_ITEM_AGGREGATE_TYPE,
                &StockItemCommand::CreateStockItem(stockline_stock::CreateStockItem {
                    stock_item_id,
                    variant_id: VariantId::new(),
                    location_id: StockLocationId::generate(),
                    initial_on_hand: 1,
                    backorderable: false,
                    occurred_at: Utc::now(),
                }),
                |id| StockItem::empty(StockItemId::new(id)),
                3,
            )
            .unwrap_err();

        assert!(matches!(err, DispatchError::Concurrency(_)));
    }

    #[test]
    fn transfer_round_trip_restores_both_locations() {
        let h = setup();
        let a = h.stock.create_location("A", None, true).unwrap();
        let b = h.stock.create_location("B", None, true).unwrap();
        let variant_id = VariantId::new();
        let item_a = h.stock.restock(a, variant_id, 5, None).unwrap();

        let lines = vec![TransferLine {
            variant_id,
            quantity: 5,
        }];
        let t1 = h.transfers.create_transfer(Some(a), b, lines.clone()).unwrap();
        let outcome = h.transfers.transfer(t1).unwrap();
        assert_eq!(outcome.legs_applied, 2);

        let item_b = h
            .stock
            .load_location(b)
            .unwrap()
            .stock_item_for(variant_id)
            .unwrap();
        assert_eq!(load_item(&h, item_a).on_hand(), 0);
        assert_eq!(load_item(&h, item_b).on_hand(), 5);

        let t2 = h.transfers.create_transfer(Some(b), a, lines).unwrap();
        h.transfers.transfer(t2).unwrap();

        assert_eq!(load_item(&h, item_a).on_hand(), 5);
        assert_eq!(load_item(&h, item_b).on_hand(), 0);
    }

    #[test]
    fn transfer_with_one_invalid_line_changes_nothing() {
        let h = setup();
        let a = h.stock.create_location("A", None, true).unwrap();
        let b = h.stock.create_location("B", None, true).unwrap();
        let good = VariantId::new();
        let missing = VariantId::new();
        let item_a = h.stock.restock(a, good, 5, None).unwrap();

        let transfer_id = h
            .transfers
            .create_transfer(
                Some(a),
                b,
                vec![
                    TransferLine {
                        variant_id: good,
                        quantity: 3,
                    },
                    TransferLine {
                        variant_id: missing,
                        quantity: 1,
                    },
                ],
            )
            .unwrap();

        let err = h.transfers.transfer(transfer_id).unwrap_err();
        match err {
            TransferError::Validation(errors) => {
                assert_eq!(errors.len(), 1);
                assert_eq!(errors[0].variant_id, missing);
            }
            other => panic!("expected validation failure, got {other}"),
        }

        // Zero side effects anywhere: the source item is untouched and the
        // destination never learned about the variant.
        let item = load_item(&h, item_a);
        assert_eq!(item.on_hand(), 5);
        assert_eq!(item.version(), 2); // created + restock, nothing since
        assert!(
            h.stock
                .load_location(b)
                .unwrap()
                .stock_item_for(good)
                .is_none()
        );
    }

    #[test]
    fn supplier_receipt_stocks_the_destination() {
        let h = setup();
        let destination = h.stock.create_location("Inbound", None, true).unwrap();
        let variant_id = VariantId::new();

        let transfer_id = h
            .transfers
            .create_transfer(
                None,
                destination,
                vec![TransferLine {
                    variant_id,
                    quantity: 40,
                }],
            )
            .unwrap();
        let outcome = h.transfers.receive(transfer_id).unwrap();
        assert_eq!(outcome.legs_applied, 1);

        let item_id = h
            .stock
            .load_location(destination)
            .unwrap()
            .stock_item_for(variant_id)
            .unwrap();
        assert_eq!(load_item(&h, item_id).on_hand(), 40);

        wait_for_processing();
        let log = h.movements.movements(&item_id);
        assert!(
            log.iter().any(|m| {
                m.originator == MovementOriginator::Receipt
                    && m.stock_transfer_id == Some(transfer_id)
            }),
            "receipt movement must back-reference the transfer: {log:?}"
        );
    }

    #[test]
    fn transfer_movements_back_reference_the_transfer() {
        let h = setup();
        let a = h.stock.create_location("A", None, true).unwrap();
        let b = h.stock.create_location("B", None, true).unwrap();
        let variant_id = VariantId::new();
        let item_a = h.stock.restock(a, variant_id, 5, None).unwrap();

        let transfer_id = h
            .transfers
            .create_transfer(
                Some(a),
                b,
                vec![TransferLine {
                    variant_id,
                    quantity: 2,
                }],
            )
            .unwrap();
        h.transfers.transfer(transfer_id).unwrap();
        wait_for_processing();

        let log = h.movements.movements(&item_a);
        let leg = log
            .iter()
            .find(|m| m.originator == MovementOriginator::Transfer)
            .expect("transfer leg must be logged");
        assert_eq!(leg.quantity_delta, -2);
        assert_eq!(leg.stock_transfer_id, Some(transfer_id));
    }

    #[test]
    fn backordered_commitment_fills_and_ships_after_restock() {
        let h = setup();
        let location_id = h.stock.create_location("Main", None, true).unwrap();
        let variant_id = VariantId::new();
        // Backorderable item with nothing on hand.
        let stock_item_id = h
            .stock
            .stock_item_or_create(location_id, variant_id, true)
            .unwrap();

        let order_id = OrderId::generate();
        let mut line = line_item(2);
        line.variant_id = variant_id;

        let committed = h
            .fulfillment
            .commit_line_item(order_id, &line, location_id)
            .unwrap();
        assert!(committed.on_hand.is_none());
        let unit_id = committed.backordered.expect("fully backordered");
        assert_eq!(load_unit(&h, unit_id).state(), UnitState::Backordered);
        assert_eq!(load_item(&h, stock_item_id).backordered_total(), 2);

        // Stock arrives; the backorder fills and the unit comes on hand.
        h.stock.restock(location_id, variant_id, 5, None).unwrap();
        let fills = h.fulfillment.process_backorders(stock_item_id).unwrap();
        assert_eq!(fills.len(), 1);
        assert_eq!(fills[0].unit_id, unit_id);
        assert_eq!(load_unit(&h, unit_id).state(), UnitState::OnHand);

        let item = load_item(&h, stock_item_id);
        assert_eq!(item.on_hand(), 5);
        assert_eq!(item.reserved(), 2);
        assert_eq!(item.backordered_total(), 0);

        // Physical shipment leaves the building.
        let shipped = h
            .fulfillment
            .ship(stock_item_id, ShipmentId::generate(), &[unit_id])
            .unwrap();
        assert_eq!(shipped, 2);
        let item = load_item(&h, stock_item_id);
        assert_eq!(item.on_hand(), 3);
        assert_eq!(item.reserved(), 0);
        assert_eq!(load_unit(&h, unit_id).state(), UnitState::Shipped);

        wait_for_processing();
        let level = h.levels.get(&stock_item_id).unwrap();
        assert_eq!(level.on_hand, 3);
        assert_eq!(level.reserved, 0);
        assert_eq!(level.backordered, 0);
    }

    #[test]
    fn canceling_units_releases_their_reservations() {
        let h = setup();
        let location_id = h.stock.create_location("Main", None, true).unwrap();
        let variant_id = VariantId::new();
        h.stock.restock(location_id, variant_id, 4, None).unwrap();

        let mut line = line_item(3);
        line.variant_id = variant_id;
        let committed = h
            .fulfillment
            .commit_line_item(OrderId::generate(), &line, location_id)
            .unwrap();
        let unit_id = committed.on_hand.expect("covered by stock");
        let stock_item_id = committed.stock_item_id;
        assert_eq!(load_item(&h, stock_item_id).reserved(), 3);

        // The release-inventory consumer reacting to an order cancellation.
        let released = h
            .fulfillment
            .cancel_units(stock_item_id, &[unit_id])
            .unwrap();
        assert_eq!(released, 3);
        let item = load_item(&h, stock_item_id);
        assert_eq!(item.reserved(), 0);
        assert_eq!(item.on_hand(), 4);
        assert_eq!(load_unit(&h, unit_id).state(), UnitState::Canceled);

        // Idempotent: the unit is already terminal.
        let released = h
            .fulfillment
            .cancel_units(stock_item_id, &[unit_id])
            .unwrap();
        assert_eq!(released, 0);
    }

    #[test]
    fn location_with_reserved_stock_cannot_be_deleted() {
        let h = setup();
        let location_id = h.stock.create_location("Main", None, true).unwrap();
        let variant_id = VariantId::new();
        let stock_item_id = h.stock.restock(location_id, variant_id, 2, None).unwrap();
        h.stock.reserve(stock_item_id, 2, None).unwrap();

        let err = h.stock.delete_location(location_id).unwrap_err();
        assert!(matches!(
            err,
            DispatchError::Domain(DomainError::Conflict(_))
        ));

        h.stock.release(stock_item_id, 2, None).unwrap();
        h.stock.delete_location(location_id).unwrap();
        assert!(h.stock.load_location(location_id).unwrap().is_deleted());

        h.stock.restore_location(location_id).unwrap();
        assert!(!h.stock.load_location(location_id).unwrap().is_deleted());
    }

    #[test]
    fn make_default_clears_the_previous_default() {
        let h = setup();
        let first = h.stock.create_location("First", None, true).unwrap();
        let second = h.stock.create_location("Second", None, true).unwrap();

        h.stock.make_default(first, None).unwrap();
        assert!(h.stock.load_location(first).unwrap().is_default());

        h.stock.make_default(second, Some(first)).unwrap();
        assert!(!h.stock.load_location(first).unwrap().is_default());
        assert!(h.stock.load_location(second).unwrap().is_default());
    }

    #[test]
    fn validate_location_reports_clean_state() {
        let h = setup();
        let location_id = h.stock.create_location("Main", None, true).unwrap();
        h.stock
            .restock(location_id, VariantId::new(), 3, None)
            .unwrap();

        assert!(h.stock.validate_location(location_id).unwrap().is_none());
    }

    #[test]
    fn stock_item_or_create_is_idempotent() {
        let h = setup();
        let location_id = h.stock.create_location("Main", None, true).unwrap();
        let variant_id = VariantId::new();

        let first = h
            .stock
            .stock_item_or_create(location_id, variant_id, false)
            .unwrap();
        let second = h
            .stock
            .stock_item_or_create(location_id, variant_id, false)
            .unwrap();
        assert_eq!(first, second);
    }
}

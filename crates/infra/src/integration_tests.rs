//! End-to-end tests of the fulfillment service.
//!
//! Command → EventStore → EventBus → read models, over the in-memory store.
//!
//! Verifies:
//! - availability is bounded by what other carts hold and never shown negative
//! - reservations move exactly with checkout and cancellation
//! - picked, missing and cancelled items restore the right warehouses
//! - stale reads surface as errors; ledger increments retry

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::{Arc, Barrier, Mutex};
    use std::thread;

    use proptest::prelude::*;
    use serde_json::Value as JsonValue;

    use stockroom_core::{AggregateId, CustomerId, ExpectedVersion, ProductId};
    use stockroom_events::{EventBus, EventEnvelope, InMemoryEventBus};
    use stockroom_inventory::{VariantId, Warehouse, WarehouseSplit};
    use stockroom_orders::{Adjustment, CustomerItemStatus, ItemStatus, OrderId, OrderItemId, OrderStatus, Percent};

    use crate::config::FulfillmentConfig;
    use crate::event_store::{EventStore, EventStoreError, InMemoryEventStore, StoredEvent, UncommittedEvent};
    use crate::external::{
        CatalogAlternativeResolver, InMemoryStaffNotifier, NotifyError, StaffNotification, StaffNotifier,
    };
    use crate::fulfillment::{
        Fulfillment, FulfillmentError, NewVariant, OrderView, StaffAddItem, VariantRef,
    };
    use crate::projections::{ReadModels, CART_STREAM, ORDER_STREAM, VARIANT_STREAM};

    type Bus = InMemoryEventBus<EventEnvelope<JsonValue>>;
    type Service = Fulfillment<Arc<dyn EventStore>, Arc<Bus>>;

    struct Harness {
        svc: Service,
        bus: Arc<Bus>,
        notifications: Arc<InMemoryStaffNotifier>,
    }

    fn harness() -> Harness {
        harness_with(Arc::new(InMemoryEventStore::new()))
    }

    fn harness_with(store: Arc<dyn EventStore>) -> Harness {
        let notifications = Arc::new(InMemoryStaffNotifier::new());
        let (svc, bus) = service(store, notifications.clone());
        Harness {
            svc,
            bus,
            notifications,
        }
    }

    fn service(store: Arc<dyn EventStore>, notifier: Arc<dyn StaffNotifier>) -> (Service, Arc<Bus>) {
        let read_models = Arc::new(ReadModels::new());
        let resolver = Arc::new(CatalogAlternativeResolver::new(read_models.clone()));
        let bus = Arc::new(Bus::new());
        let svc = Fulfillment::new(
            store,
            bus.clone(),
            read_models,
            notifier,
            resolver,
            FulfillmentConfig::default(),
        );
        (svc, bus)
    }

    fn stock(h: &Harness, product_id: ProductId, color: &str, general: i64, public_sale: i64, price: u64) -> VariantId {
        stock_sized(h, product_id, color, "M", general, public_sale, price)
    }

    fn stock_sized(
        h: &Harness,
        product_id: ProductId,
        color: &str,
        size: &str,
        general: i64,
        public_sale: i64,
        price: u64,
    ) -> VariantId {
        h.svc
            .register_variant(NewVariant {
                product_id,
                color: color.to_string(),
                size: size.to_string(),
                unit_price: price,
                general,
                public_sale,
            })
            .unwrap()
            .variant_id
    }

    fn place(h: &Harness, customer: CustomerId, lines: &[(VariantId, i64)]) -> OrderView {
        for (variant_id, quantity) in lines {
            h.svc.add_item(customer, (*variant_id).into(), *quantity, None).unwrap();
        }
        let report = h.svc.checkout(customer, Vec::new(), String::new()).unwrap();
        assert!(report.failed.is_empty(), "unexpected failed lines: {:?}", report.failed);
        report.order.unwrap()
    }

    fn item_of(order: &OrderView, variant_id: VariantId) -> OrderItemId {
        order
            .items
            .iter()
            .find(|i| i.variant_id == variant_id)
            .map(|i| i.item_id)
            .unwrap()
    }

    fn reserved(h: &Harness, variant_id: VariantId) -> i64 {
        h.svc.variant(variant_id).unwrap().reserved
    }

    #[test]
    fn second_customer_sees_zero_available_with_alternatives() {
        let h = harness();
        let product = ProductId::new();
        let black = stock(&h, product, "black", 5, 0, 1_000);
        let white = stock(&h, product, "white", 2, 0, 1_000);
        let first = CustomerId::new();
        let second = CustomerId::new();

        let cart = h.svc.add_item(first, black.into(), 5, None).unwrap();
        assert_eq!(cart.lines.len(), 1);
        assert_eq!(cart.lines[0].max_quantity, 5);

        let err = h.svc.add_item(second, black.into(), 1, None).unwrap_err();
        match err {
            FulfillmentError::InsufficientStock {
                variant_id,
                requested,
                available,
                alternatives,
            } => {
                assert_eq!(variant_id, Some(black));
                assert_eq!(requested, 1);
                assert_eq!(available, 0);
                assert_eq!(alternatives.len(), 1);
                assert_eq!(alternatives[0].variant_id, white);
            }
            other => panic!("expected insufficient stock, got {other:?}"),
        }

        // Cart membership alone reserves nothing.
        assert_eq!(reserved(&h, black), 0);
        assert!(h.svc.cart(second).unwrap().lines.is_empty());
    }

    #[test]
    fn adding_the_same_variant_twice_coalesces() {
        let h = harness();
        let product = ProductId::new();
        let v = stock(&h, product, "Black", 10, 0, 500);
        let c = CustomerId::new();

        let by_attributes = VariantRef::Attributes {
            product_id: product,
            color: "black".to_string(),
            size: "m".to_string(),
        };
        h.svc.add_item(c, by_attributes, 2, Some("black-m.png".to_string())).unwrap();
        let cart = h.svc.add_item(c, v.into(), 3, None).unwrap();

        assert_eq!(cart.lines.len(), 1);
        assert_eq!(cart.lines[0].variant_id, v);
        assert_eq!(cart.lines[0].quantity, 5);
        assert_eq!(cart.subtotal, 2_500);
    }

    #[test]
    fn customer_may_raise_own_quantity_up_to_remaining_stock() {
        let h = harness();
        let v = stock(&h, ProductId::new(), "red", 5, 0, 100);
        let c = CustomerId::new();

        h.svc.add_item(c, v.into(), 3, None).unwrap();
        let err = h.svc.add_item(c, v.into(), 3, None).unwrap_err();
        assert!(matches!(
            err,
            FulfillmentError::InsufficientStock {
                requested: 3,
                available: 2,
                ..
            }
        ));

        let cart = h.svc.update_quantity(c, v, 5).unwrap();
        assert_eq!(cart.lines[0].quantity, 5);

        let err = h.svc.update_quantity(c, v, 6).unwrap_err();
        assert!(matches!(
            err,
            FulfillmentError::InsufficientStock {
                requested: 6,
                available: 5,
                ..
            }
        ));

        let cart = h.svc.update_quantity(c, v, 0).unwrap();
        assert!(cart.lines.is_empty());
    }

    #[test]
    fn removing_and_clearing_never_touch_the_ledger() {
        let h = harness();
        let a = stock(&h, ProductId::new(), "red", 5, 0, 100);
        let b = stock(&h, ProductId::new(), "blue", 5, 0, 100);
        let c = CustomerId::new();

        h.svc.add_item(c, a.into(), 1, None).unwrap();
        h.svc.add_item(c, b.into(), 2, None).unwrap();
        let cart = h.svc.remove_item(c, a).unwrap();
        assert_eq!(cart.lines.len(), 1);
        // Removing again is a successful no-op.
        h.svc.remove_item(c, a).unwrap();

        let cart = h.svc.clear_cart(c).unwrap();
        assert!(cart.lines.is_empty());
        assert!(h.svc.cart(c).unwrap().lines.is_empty());
        assert_eq!(reserved(&h, a), 0);
        assert_eq!(reserved(&h, b), 0);
    }

    #[test]
    fn checkout_reserves_exactly_the_checked_out_quantity() {
        let h = harness();
        let a = stock(&h, ProductId::new(), "red", 5, 0, 1_000);
        let b = stock(&h, ProductId::new(), "blue", 0, 3, 250);
        let c = CustomerId::new();

        h.svc.add_item(c, a.into(), 2, None).unwrap();
        h.svc.add_item(c, b.into(), 3, None).unwrap();
        let report = h
            .svc
            .checkout(c, vec![Adjustment::Shipping { amount: 500 }], "leave at door".to_string())
            .unwrap();

        assert_eq!(report.converted.len(), 2);
        assert!(report.failed.is_empty());
        let order = report.order.unwrap();
        assert_eq!(order.status, OrderStatus::Active);
        assert_eq!(order.total, 2_000 + 750 + 500);
        assert_eq!(order.notes, "leave at door");
        assert!(order.items.iter().all(|i| i.status == ItemStatus::Reserved && i.can_cancel));

        assert_eq!(reserved(&h, a), 2);
        assert_eq!(reserved(&h, b), 3);
        assert_eq!(h.svc.availability(b).unwrap(), 0);
        assert!(h.svc.cart(c).unwrap().lines.is_empty());
        assert_eq!(h.svc.customer_orders(c).active.len(), 1);
    }

    #[test]
    fn checkout_fails_lines_individually() {
        let h = harness();
        let product = ProductId::new();
        let a = stock(&h, product, "red", 5, 0, 100);
        let b = stock(&h, product, "blue", 3, 0, 100);
        let c = CustomerId::new();

        h.svc.add_item(c, a.into(), 1, None).unwrap();
        h.svc.add_item(c, b.into(), 3, None).unwrap();
        // Stock shrinks after the line went into the cart.
        h.svc.adjust_physical(b, Warehouse::General, -2).unwrap();

        let report = h.svc.checkout(c, Vec::new(), String::new()).unwrap();
        assert_eq!(report.converted.len(), 1);
        assert_eq!(report.converted[0].variant_id, a);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].variant_id, b);
        assert!(matches!(
            report.failed[0].error,
            FulfillmentError::InsufficientStock {
                requested: 3,
                available: 1,
                ..
            }
        ));

        let order = report.order.unwrap();
        assert_eq!(order.items.len(), 1);
        assert_eq!(reserved(&h, a), 1);
        assert_eq!(reserved(&h, b), 0);

        // The failed line stays for the customer to resolve.
        let cart = h.svc.cart(c).unwrap();
        assert_eq!(cart.lines.len(), 1);
        assert_eq!(cart.lines[0].variant_id, b);
        assert_eq!(cart.lines[0].max_quantity, 1);
    }

    #[test]
    fn sold_out_line_reports_alternatives() {
        let h = harness();
        let product = ProductId::new();
        let a = stock(&h, product, "red", 1, 0, 100);
        let alt = stock(&h, product, "green", 4, 0, 100);
        let c = CustomerId::new();

        h.svc.add_item(c, a.into(), 1, None).unwrap();
        h.svc.adjust_physical(a, Warehouse::General, -1).unwrap();

        let report = h.svc.checkout(c, Vec::new(), String::new()).unwrap();
        assert!(report.order.is_none());
        assert_eq!(report.failed.len(), 1);
        let alternatives = report.failed[0].alternatives();
        assert_eq!(alternatives.len(), 1);
        assert_eq!(alternatives[0].variant_id, alt);
    }

    #[test]
    fn empty_cart_checkout_creates_no_order() {
        let h = harness();
        let report = h.svc.checkout(CustomerId::new(), Vec::new(), String::new()).unwrap();
        assert!(report.order.is_none());
        assert!(report.converted.is_empty());
        assert!(report.failed.is_empty());
    }

    #[test]
    fn picking_withdraws_general_first_and_leaves_reserved_alone() {
        let h = harness();
        let v = stock(&h, ProductId::new(), "red", 1, 4, 100);
        let c = CustomerId::new();
        let order = place(&h, c, &[(v, 3)]);
        let item = item_of(&order, v);

        let order = h.svc.mark_picked(order.order_id, item).unwrap();
        assert_eq!(order.items[0].status, ItemStatus::Picked);
        assert_eq!(order.items[0].customer_status, CustomerItemStatus::Picked);

        let row = h.svc.variant(v).unwrap();
        assert_eq!(row.general, 0);
        assert_eq!(row.public_sale, 2);
        assert_eq!(row.reserved, 3);
        // Picked stock is still counted as reserved until shipped; never shown negative.
        assert_eq!(row.available, 0);

        let err = h.svc.mark_picked(order.order_id, item).unwrap_err();
        assert!(matches!(err, FulfillmentError::InvalidTransition { .. }));
    }

    #[test]
    fn order_lifecycle_settles_reservations_on_send() {
        let h = harness();
        let v = stock(&h, ProductId::new(), "red", 5, 0, 100);
        let c = CustomerId::new();
        let order = place(&h, c, &[(v, 2)]);
        let order_id = order.order_id;
        h.svc.mark_picked(order_id, item_of(&order, v)).unwrap();

        let err = h.svc.mark_sent(order_id).unwrap_err();
        assert!(matches!(err, FulfillmentError::InvalidTransition { .. }));

        let closed = h.svc.close_order(order_id).unwrap();
        assert_eq!(closed.status, OrderStatus::Closed);
        assert!(closed.items.iter().all(|i| i.can_cancel));

        let sent = h.svc.mark_sent(order_id).unwrap();
        assert_eq!(sent.status, OrderStatus::Sent);
        assert!(sent.items.iter().all(|i| !i.can_cancel));

        let row = h.svc.variant(v).unwrap();
        assert_eq!(row.reserved, 0);
        assert_eq!(row.stock_qty, 3);
        assert_eq!(row.available, 3);

        let orders = h.svc.customer_orders(c);
        assert!(orders.active.is_empty());
        assert_eq!(orders.previous.len(), 1);

        let err = h.svc.cancel_item(Some(c), order_id, item_of(&order, v)).unwrap_err();
        assert!(matches!(err, FulfillmentError::InvalidTransition { .. }));
    }

    #[test]
    fn cancelling_reserved_then_picked_items() {
        let h = harness();
        let reserved_v = stock(&h, ProductId::new(), "red", 10, 0, 100);
        let picked_v = stock(&h, ProductId::new(), "blue", 10, 0, 50);
        let c = CustomerId::new();
        let order = place(&h, c, &[(reserved_v, 2), (picked_v, 1)]);
        let order_id = order.order_id;
        let reserved_item = item_of(&order, reserved_v);
        let picked_item = item_of(&order, picked_v);
        h.svc.mark_picked(order_id, picked_item).unwrap();

        let outcome = h.svc.cancel_item(Some(c), order_id, reserved_item).unwrap();
        assert_eq!(outcome.order.as_ref().unwrap().total, 50);
        assert_eq!(outcome.released, 2);
        assert!(!outcome.staff_notified);
        assert!(!outcome.order_deleted);
        assert!(h.notifications.list().is_empty());
        assert_eq!(reserved(&h, reserved_v), 0);

        let outcome = h.svc.cancel_item(Some(c), order_id, picked_item).unwrap();
        assert!(outcome.staff_notified);
        assert!(outcome.order_deleted);
        assert!(outcome.order.is_none());

        let sent = h.notifications.list();
        assert_eq!(sent.len(), 1);
        assert!(!sent[0].whole_order);
        assert_eq!(sent[0].items.len(), 1);
        assert_eq!(sent[0].items[0].variant_id, picked_v);

        let row = h.svc.variant(picked_v).unwrap();
        assert_eq!(row.reserved, 0);
        assert_eq!(row.general, 10);

        assert!(matches!(h.svc.order(order_id), Err(FulfillmentError::NotFound { .. })));
        assert!(h.svc.customer_orders(c).active.is_empty());
    }

    #[test]
    fn staff_additions_draw_general_first_and_credit_back_on_cancel() {
        let h = harness();
        let base = stock(&h, ProductId::new(), "red", 5, 0, 200);
        let v = stock(&h, ProductId::new(), "blue", 4, 20, 300);
        let c = CustomerId::new();
        let order = place(&h, c, &[(base, 1)]);
        let order_id = order.order_id;
        h.svc.close_order(order_id).unwrap();

        let order = h
            .svc
            .add_items(
                order_id,
                vec![StaffAddItem {
                    variant_id: v,
                    quantity: 10,
                    unit_price: None,
                    picked: true,
                }],
            )
            .unwrap();
        assert_eq!(order.status, OrderStatus::Active);
        assert_eq!(order.items.len(), 2);
        assert_eq!(order.total, 200 + 3_000);

        let stored = h.svc.read_models().orders.get(order_id).unwrap();
        let added = stored.items().iter().find(|i| i.variant_id == v).unwrap();
        assert_eq!(added.status, ItemStatus::Picked);
        assert_eq!(
            added.taken,
            WarehouseSplit {
                general: 4,
                public_sale: 6
            }
        );

        let row = h.svc.variant(v).unwrap();
        assert_eq!((row.general, row.public_sale, row.reserved), (0, 14, 0));

        h.svc.cancel_item(None, order_id, added.id).unwrap();
        let row = h.svc.variant(v).unwrap();
        assert_eq!((row.general, row.public_sale), (4, 20));
    }

    #[test]
    fn staff_additions_reserve_when_not_picked_and_roll_back_on_failure() {
        let h = harness();
        let base = stock(&h, ProductId::new(), "red", 5, 0, 200);
        let plenty = stock(&h, ProductId::new(), "blue", 5, 0, 100);
        let scarce = stock(&h, ProductId::new(), "green", 1, 0, 100);
        let order = place(&h, CustomerId::new(), &[(base, 1)]);

        let order = h
            .svc
            .add_items(
                order.order_id,
                vec![StaffAddItem {
                    variant_id: plenty,
                    quantity: 2,
                    unit_price: Some(80),
                    picked: false,
                }],
            )
            .unwrap();
        assert_eq!(reserved(&h, plenty), 2);
        assert_eq!(order.total, 200 + 160);

        let err = h
            .svc
            .add_items(
                order.order_id,
                vec![
                    StaffAddItem {
                        variant_id: plenty,
                        quantity: 1,
                        unit_price: None,
                        picked: false,
                    },
                    StaffAddItem {
                        variant_id: scarce,
                        quantity: 2,
                        unit_price: None,
                        picked: false,
                    },
                ],
            )
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::InsufficientStock { available: 1, .. }));
        // The first line's reservation was undone.
        assert_eq!(reserved(&h, plenty), 2);
        assert_eq!(h.svc.order(order.order_id).unwrap().items.len(), 2);
    }

    #[test]
    fn cancelling_a_missing_item_only_lowers_the_total() {
        let h = harness();
        let a = stock(&h, ProductId::new(), "red", 5, 0, 100);
        let b = stock(&h, ProductId::new(), "blue", 5, 0, 30);
        let c = CustomerId::new();
        let order = place(&h, c, &[(a, 1), (b, 2)]);
        let order_id = order.order_id;
        assert_eq!(order.total, 160);

        let missing = item_of(&order, b);
        let order = h.svc.mark_missing(order_id, missing).unwrap();
        let item = order.items.iter().find(|i| i.item_id == missing).unwrap();
        assert_eq!(item.customer_status, CustomerItemStatus::Missing);
        assert_eq!(order.missing_count, 1);
        assert_eq!(h.svc.missing_summary().len(), 1);

        let before = h.svc.variant(b).unwrap();
        assert_eq!(before.stock_qty, 3);
        assert_eq!(before.reserved, 0);

        let outcome = h.svc.cancel_item(Some(c), order_id, missing).unwrap();
        assert_eq!(outcome.order.unwrap().total, 100);
        assert_eq!(outcome.released, 0);
        assert!(!outcome.staff_notified);

        let after = h.svc.variant(b).unwrap();
        assert_eq!(after.stock_qty, before.stock_qty);
        assert_eq!(after.reserved, before.reserved);
        assert!(h.svc.missing_summary().is_empty());
    }

    #[test]
    fn marking_a_picked_item_missing_withdraws_nothing_more() {
        let h = harness();
        let v = stock(&h, ProductId::new(), "red", 5, 0, 100);
        let order = place(&h, CustomerId::new(), &[(v, 2)]);
        let item = item_of(&order, v);
        h.svc.mark_picked(order.order_id, item).unwrap();

        h.svc.mark_missing(order.order_id, item).unwrap();
        let row = h.svc.variant(v).unwrap();
        assert_eq!(row.stock_qty, 3);
        assert_eq!(row.reserved, 0);

        let err = h.svc.mark_missing(order.order_id, item).unwrap_err();
        assert!(matches!(err, FulfillmentError::InvalidTransition { .. }));
    }

    #[test]
    fn missing_write_off_is_bounded_by_ledger_stock() {
        let h = harness();
        let v = stock(&h, ProductId::new(), "red", 3, 0, 100);
        let order = place(&h, CustomerId::new(), &[(v, 3)]);
        // Someone corrected the count down after checkout.
        h.svc.adjust_physical(v, Warehouse::General, -2).unwrap();

        h.svc.mark_missing(order.order_id, item_of(&order, v)).unwrap();
        let row = h.svc.variant(v).unwrap();
        assert_eq!(row.stock_qty, 0);
        assert_eq!(row.reserved, 0);
    }

    #[test]
    fn cancelling_twice_is_a_quiet_success() {
        let h = harness();
        let a = stock(&h, ProductId::new(), "red", 5, 0, 100);
        let b = stock(&h, ProductId::new(), "blue", 5, 0, 100);
        let c = CustomerId::new();
        let order = place(&h, c, &[(a, 1), (b, 1)]);
        let item = item_of(&order, a);

        h.svc.cancel_item(Some(c), order.order_id, item).unwrap();
        let before = h.svc.variant(a).unwrap();

        let again = h.svc.cancel_item(Some(c), order.order_id, item).unwrap();
        assert!(again.cancelled_items.is_empty());
        assert_eq!(again.released, 0);
        assert!(again.order.is_some());
        assert_eq!(h.svc.variant(a).unwrap(), before);

        let unknown = OrderId::new(AggregateId::new());
        let outcome = h.svc.cancel_item(Some(c), unknown, item).unwrap();
        assert!(outcome.order.is_none());
        assert!(h.svc.cancel_order(Some(c), unknown).unwrap().cancelled_items.is_empty());
    }

    #[test]
    fn cancelling_the_last_item_deletes_the_order() {
        let h = harness();
        let v = stock(&h, ProductId::new(), "red", 5, 0, 100);
        let c = CustomerId::new();
        let order = place(&h, c, &[(v, 2)]);
        assert_eq!(h.svc.pending_items().len(), 1);

        let outcome = h.svc.cancel_item(Some(c), order.order_id, item_of(&order, v)).unwrap();
        assert!(outcome.order_deleted);
        assert_eq!(reserved(&h, v), 0);
        assert!(h.svc.pending_items().is_empty());
        assert!(h.svc.customer_orders(c).active.is_empty());
        assert!(h.svc.read_models().orders.list().is_empty());
        assert!(matches!(h.svc.order(order.order_id), Err(FulfillmentError::NotFound { .. })));
    }

    #[test]
    fn whole_order_cancel_keeps_a_closed_trail_when_something_was_picked() {
        let h = harness();
        let a = stock(&h, ProductId::new(), "red", 5, 0, 100);
        let b = stock(&h, ProductId::new(), "blue", 5, 0, 100);
        let c = CustomerId::new();
        let order = place(&h, c, &[(a, 1), (b, 2)]);
        h.svc.mark_picked(order.order_id, item_of(&order, a)).unwrap();

        let outcome = h.svc.cancel_order(Some(c), order.order_id).unwrap();
        assert!(!outcome.order_deleted);
        assert_eq!(outcome.cancelled_items.len(), 2);
        assert_eq!(outcome.released, 3);
        assert!(outcome.staff_notified);

        let trail = outcome.order.unwrap();
        assert_eq!(trail.status, OrderStatus::Closed);
        assert!(trail.customer_cancelled);
        assert!(trail.items.is_empty());
        assert_eq!(trail.cancelled_items.len(), 2);
        assert_eq!(trail.total, 0);

        let sent = h.notifications.list();
        assert_eq!(sent.len(), 1);
        assert!(sent[0].whole_order);
        assert_eq!(sent[0].items.len(), 1);

        assert_eq!(h.svc.variant(a).unwrap().stock_qty, 5);
        assert_eq!(reserved(&h, a), 0);
        assert_eq!(reserved(&h, b), 0);

        // Nothing left to cancel.
        let again = h.svc.cancel_order(Some(c), order.order_id).unwrap();
        assert!(again.cancelled_items.is_empty());
        assert_eq!(h.notifications.list().len(), 1);
    }

    #[test]
    fn whole_order_cancel_without_picks_deletes() {
        let h = harness();
        let a = stock(&h, ProductId::new(), "red", 5, 0, 100);
        let c = CustomerId::new();
        let order = place(&h, c, &[(a, 2)]);
        h.svc.set_queued(order.order_id, item_of(&order, a), true).unwrap();

        let outcome = h.svc.cancel_order(Some(c), order.order_id).unwrap();
        assert!(outcome.order_deleted);
        assert!(!outcome.staff_notified);
        assert!(h.notifications.list().is_empty());
        assert_eq!(reserved(&h, a), 0);
    }

    #[test]
    fn customers_cannot_touch_other_customers_orders() {
        let h = harness();
        let v = stock(&h, ProductId::new(), "red", 5, 0, 100);
        let owner = CustomerId::new();
        let order = place(&h, owner, &[(v, 1)]);

        let err = h.svc.cancel_order(Some(CustomerId::new()), order.order_id).unwrap_err();
        assert!(matches!(err, FulfillmentError::NotFound { .. }));
        assert!(h.svc.customer_order(CustomerId::new(), order.order_id).is_err());
        assert_eq!(reserved(&h, v), 1);
    }

    struct FailingNotifier;

    impl StaffNotifier for FailingNotifier {
        fn notify(&self, _notification: StaffNotification) -> Result<(), NotifyError> {
            Err(NotifyError("mail relay down".to_string()))
        }
    }

    #[test]
    fn notification_failure_does_not_block_cancellation() {
        let (svc, _bus) = service(Arc::new(InMemoryEventStore::new()), Arc::new(FailingNotifier));
        let v = svc
            .register_variant(NewVariant {
                product_id: ProductId::new(),
                color: "red".to_string(),
                size: "S".to_string(),
                unit_price: 100,
                general: 3,
                public_sale: 0,
            })
            .unwrap()
            .variant_id;
        let c = CustomerId::new();
        svc.add_item(c, v.into(), 1, None).unwrap();
        let order = svc.checkout(c, Vec::new(), String::new()).unwrap().order.unwrap();
        svc.mark_picked(order.order_id, order.items[0].item_id).unwrap();

        let outcome = svc.cancel_item(Some(c), order.order_id, order.items[0].item_id).unwrap();
        assert!(outcome.order_deleted);
        assert!(!outcome.staff_notified);
        assert_eq!(svc.variant(v).unwrap().stock_qty, 3);
    }

    #[test]
    fn queued_items_show_as_waiting() {
        let h = harness();
        let v = stock(&h, ProductId::new(), "red", 5, 0, 100);
        let order = place(&h, CustomerId::new(), &[(v, 1)]);
        let item = item_of(&order, v);

        let order = h.svc.set_queued(order.order_id, item, true).unwrap();
        assert_eq!(order.items[0].status, ItemStatus::Reserved);
        assert_eq!(order.items[0].customer_status, CustomerItemStatus::Waiting);
        assert!(order.items[0].queued);
        assert_eq!(h.svc.pending_items().len(), 1);
    }

    #[test]
    fn adjustments_are_recomputed_against_the_item_subtotal() {
        let h = harness();
        let v = stock(&h, ProductId::new(), "red", 5, 0, 1_000);
        let order = place(&h, CustomerId::new(), &[(v, 2)]);
        let adjustments = vec![
            Adjustment::Shipping { amount: 500 },
            Adjustment::Discount { amount: 200 },
            Adjustment::PercentExtra {
                label: "gift wrap".to_string(),
                percent: Percent::from_basis_points(1_000).unwrap(),
            },
        ];

        let first = h.svc.set_adjustments(order.order_id, adjustments.clone()).unwrap();
        assert_eq!(first.total, 2_000 + 500 - 200 + 200);
        let second = h.svc.set_adjustments(order.order_id, adjustments).unwrap();
        assert_eq!(second.total, first.total);

        let noted = h.svc.update_notes(order.order_id, "ring twice".to_string()).unwrap();
        assert_eq!(noted.notes, "ring twice");
        assert_eq!(noted.adjustments.len(), 3);
    }

    #[test]
    fn substituting_a_missing_item_goes_through_the_cart() {
        let h = harness();
        let product = ProductId::new();
        let red = stock(&h, product, "red", 2, 0, 100);
        let blue = stock(&h, product, "blue", 5, 0, 100);
        let c = CustomerId::new();
        let order = place(&h, c, &[(red, 2)]);
        let item = item_of(&order, red);

        let err = h
            .svc
            .substitute_missing(c, order.order_id, item, blue.into(), None)
            .unwrap_err();
        assert!(matches!(err, FulfillmentError::InvalidTransition { .. }));

        h.svc.mark_missing(order.order_id, item).unwrap();
        let alternatives = h.svc.alternatives_for(red).unwrap();
        assert_eq!(alternatives[0].variant_id, blue);

        let outcome = h
            .svc
            .substitute_missing(c, order.order_id, item, blue.into(), None)
            .unwrap();
        assert_eq!(outcome.cart.lines.len(), 1);
        assert_eq!(outcome.cart.lines[0].variant_id, blue);
        assert_eq!(outcome.cart.lines[0].quantity, 2);
        assert!(outcome.cancellation.order_deleted);
    }

    #[test]
    fn deactivated_variants_drop_out_of_carts_on_read() {
        let h = harness();
        let v = stock(&h, ProductId::new(), "red", 5, 0, 100);
        let c = CustomerId::new();
        h.svc.add_item(c, v.into(), 2, None).unwrap();

        h.svc.deactivate_variant(v).unwrap();
        assert!(h.svc.cart(c).unwrap().lines.is_empty());

        let stored = h
            .svc
            .read_models()
            .carts
            .get(stockroom_cart::CartId::for_customer(c))
            .unwrap();
        assert!(stored.lines().is_empty());

        let err = h.svc.add_item(c, v.into(), 1, None).unwrap_err();
        assert!(matches!(err, FulfillmentError::InsufficientStock { available: 0, .. }));
    }

    #[test]
    fn low_stock_groups_sum_colors_per_size() {
        let h = harness();
        let product = ProductId::new();
        stock_sized(&h, product, "red", "M", 1, 0, 100);
        stock_sized(&h, product, "blue", "M", 0, 1, 100);
        stock_sized(&h, product, "red", "L", 5, 0, 100);

        let groups = h.svc.low_stock_groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].size, "M");
        assert_eq!(groups[0].stock_qty, 2);
        assert_eq!(groups[0].variants.len(), 2);
    }

    #[test]
    fn committed_events_are_published() {
        let h = harness();
        let sub = h.bus.subscribe();
        let v = stock(&h, ProductId::new(), "red", 5, 0, 100);
        h.svc.add_item(CustomerId::new(), v.into(), 1, None).unwrap();

        let published = sub.drain();
        assert!(published.iter().any(|e| e.aggregate_type() == VARIANT_STREAM));
        assert!(published.iter().any(|e| e.aggregate_type() == CART_STREAM));
    }

    #[test]
    fn read_models_rebuild_from_the_log() {
        let h = harness();
        let v = stock(&h, ProductId::new(), "red", 5, 0, 100);
        let c = CustomerId::new();
        place(&h, c, &[(v, 2)]);

        h.svc.read_models().orders.clear();
        h.svc.read_models().variants.clear();
        assert!(h.svc.customer_orders(c).active.is_empty());

        let replayed = h.svc.rebuild_read_models().unwrap();
        assert!(replayed > 0);
        assert_eq!(h.svc.customer_orders(c).active.len(), 1);
        assert_eq!(h.svc.list_variants()[0].reserved, 2);
    }

    /// Store that rejects the next appends of one aggregate type as if
    /// another writer got there first.
    #[derive(Default)]
    struct ContendedStore {
        inner: InMemoryEventStore,
        conflicts: Mutex<HashMap<String, u32>>,
    }

    impl ContendedStore {
        fn conflict_next(&self, aggregate_type: &str, times: u32) {
            self.conflicts
                .lock()
                .unwrap()
                .insert(aggregate_type.to_string(), times);
        }
    }

    impl EventStore for ContendedStore {
        fn append(
            &self,
            events: Vec<UncommittedEvent>,
            expected_version: ExpectedVersion,
        ) -> Result<Vec<StoredEvent>, EventStoreError> {
            if let Some(first) = events.first() {
                let mut conflicts = self.conflicts.lock().unwrap();
                if let Some(left) = conflicts.get_mut(&first.aggregate_type) {
                    if *left > 0 {
                        *left -= 1;
                        return Err(EventStoreError::Concurrency("stream moved".to_string()));
                    }
                }
            }
            self.inner.append(events, expected_version)
        }

        fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.load_stream(aggregate_id)
        }

        fn load_all(&self) -> Result<Vec<StoredEvent>, EventStoreError> {
            self.inner.load_all()
        }
    }

    #[test]
    fn ledger_increments_retry_but_order_writes_report_stale_reads() {
        let store = Arc::new(ContendedStore::default());
        let h = harness_with(store.clone());
        let v = stock(&h, ProductId::new(), "red", 5, 0, 100);
        let c = CustomerId::new();
        h.svc.add_item(c, v.into(), 2, None).unwrap();

        store.conflict_next(VARIANT_STREAM, 2);
        let order = h.svc.checkout(c, Vec::new(), String::new()).unwrap().order.unwrap();
        assert_eq!(reserved(&h, v), 2);

        store.conflict_next(ORDER_STREAM, 1);
        let err = h.svc.close_order(order.order_id).unwrap_err();
        assert!(matches!(err, FulfillmentError::StaleRead { .. }));
        assert_eq!(h.svc.order(order.order_id).unwrap().status, OrderStatus::Active);

        // Re-fetch and retry succeeds.
        assert_eq!(h.svc.close_order(order.order_id).unwrap().status, OrderStatus::Closed);
    }

    #[test]
    fn failed_order_write_releases_checkout_reservations() {
        let store = Arc::new(ContendedStore::default());
        let h = harness_with(store.clone());
        let v = stock(&h, ProductId::new(), "red", 5, 0, 100);
        let c = CustomerId::new();
        h.svc.add_item(c, v.into(), 3, None).unwrap();

        store.conflict_next(ORDER_STREAM, 1);
        let err = h.svc.checkout(c, Vec::new(), String::new()).unwrap_err();
        assert!(matches!(err, FulfillmentError::StaleRead { .. }));
        assert_eq!(reserved(&h, v), 0);
        assert_eq!(h.svc.cart(c).unwrap().lines.len(), 1);
    }

    #[test]
    fn cart_moving_before_the_claim_releases_reservations() {
        let store = Arc::new(ContendedStore::default());
        let h = harness_with(store.clone());
        let v = stock(&h, ProductId::new(), "red", 5, 0, 100);
        let c = CustomerId::new();
        h.svc.add_item(c, v.into(), 3, None).unwrap();

        store.conflict_next(CART_STREAM, 1);
        let err = h.svc.checkout(c, Vec::new(), String::new()).unwrap_err();
        assert!(matches!(err, FulfillmentError::StaleRead { .. }));
        assert_eq!(reserved(&h, v), 0);
        assert_eq!(h.svc.cart(c).unwrap().lines[0].quantity, 3);
        assert!(h.svc.customer_orders(c).active.is_empty());

        let order = h.svc.checkout(c, Vec::new(), String::new()).unwrap().order.unwrap();
        assert_eq!(order.items[0].quantity, 3);
        assert_eq!(reserved(&h, v), 3);
    }

    #[test]
    fn sending_requires_every_item_handled() {
        let h = harness();
        let a = stock(&h, ProductId::new(), "red", 5, 0, 100);
        let b = stock(&h, ProductId::new(), "blue", 5, 0, 100);
        let c = CustomerId::new();
        let order = place(&h, c, &[(a, 2), (b, 1)]);
        let order_id = order.order_id;
        h.svc.mark_picked(order_id, item_of(&order, a)).unwrap();
        h.svc.close_order(order_id).unwrap();

        let err = h.svc.mark_sent(order_id).unwrap_err();
        assert!(matches!(err, FulfillmentError::InvalidTransition { .. }));
        let unpicked = h.svc.variant(b).unwrap();
        assert_eq!(unpicked.reserved, 1);
        assert_eq!(unpicked.available, 4);
        assert_eq!(h.svc.order(order_id).unwrap().status, OrderStatus::Closed);

        h.svc.mark_picked(order_id, item_of(&order, b)).unwrap();
        let sent = h.svc.mark_sent(order_id).unwrap();
        assert_eq!(sent.status, OrderStatus::Sent);

        for (variant_id, shipped) in [(a, 2), (b, 1)] {
            let row = h.svc.variant(variant_id).unwrap();
            assert_eq!(row.reserved, 0);
            assert_eq!(row.available, 5 - shipped);
        }
    }

    fn ordered_quantity(h: &Harness, customer: CustomerId, variant_id: VariantId) -> i64 {
        h.svc
            .customer_orders(customer)
            .active
            .iter()
            .flat_map(|o| o.items.iter())
            .filter(|i| i.variant_id == variant_id)
            .map(|i| i.quantity)
            .sum()
    }

    #[test]
    fn duplicate_checkouts_place_one_order() {
        for _ in 0..50 {
            let h = harness();
            let v = stock(&h, ProductId::new(), "red", 10, 0, 100);
            let c = CustomerId::new();
            h.svc.add_item(c, v.into(), 2, None).unwrap();

            let barrier = Barrier::new(2);
            let results: Vec<_> = thread::scope(|scope| {
                let handles: Vec<_> = (0..2)
                    .map(|_| {
                        scope.spawn(|| {
                            barrier.wait();
                            h.svc.checkout(c, Vec::new(), String::new())
                        })
                    })
                    .collect();
                handles.into_iter().map(|t| t.join().unwrap()).collect()
            });

            let placed = results
                .iter()
                .filter(|r| matches!(r, Ok(report) if report.order.is_some()))
                .count();
            assert_eq!(placed, 1, "{results:?}");
            for r in &results {
                match r {
                    Ok(_) | Err(FulfillmentError::StaleRead { .. }) => {}
                    Err(other) => panic!("unexpected checkout error: {other:?}"),
                }
            }

            h.svc.rebuild_read_models().unwrap();
            assert_eq!(reserved(&h, v), 2);
            assert_eq!(h.svc.customer_orders(c).active.len(), 1);
            assert_eq!(ordered_quantity(&h, c, v), 2);
            assert!(h.svc.cart(c).unwrap().lines.is_empty());
        }
    }

    #[test]
    fn quantity_edit_racing_checkout_is_never_lost() {
        for _ in 0..50 {
            let h = harness();
            let v = stock(&h, ProductId::new(), "red", 10, 0, 100);
            let c = CustomerId::new();
            h.svc.add_item(c, v.into(), 2, None).unwrap();

            let barrier = Barrier::new(2);
            let (checkout, update) = thread::scope(|scope| {
                let checkout = scope.spawn(|| {
                    barrier.wait();
                    h.svc.checkout(c, Vec::new(), String::new())
                });
                let update = scope.spawn(|| {
                    barrier.wait();
                    h.svc.update_quantity(c, v, 5)
                });
                (checkout.join().unwrap(), update.join().unwrap())
            });

            h.svc.rebuild_read_models().unwrap();
            let ordered = ordered_quantity(&h, c, v);
            let in_cart: i64 = h.svc.cart(c).unwrap().lines.iter().map(|l| l.quantity).sum();
            assert_eq!(reserved(&h, v), ordered);
            if update.is_ok() {
                // The raised quantity ends up either in the order or still in the cart.
                assert!(ordered == 5 || in_cart == 5, "ordered {ordered}, cart {in_cart}, {checkout:?}");
            }
            assert!(ordered + in_cart >= 2);
        }
    }

    #[test]
    fn concurrent_cancels_of_one_item_release_once() {
        for _ in 0..50 {
            let h = harness();
            let a = stock(&h, ProductId::new(), "red", 10, 0, 100);
            let b = stock(&h, ProductId::new(), "blue", 10, 0, 100);
            let first = CustomerId::new();
            let second = CustomerId::new();
            let order = place(&h, first, &[(a, 3), (b, 1)]);
            place(&h, second, &[(a, 2)]);
            let item = item_of(&order, a);

            let barrier = Barrier::new(2);
            let results: Vec<_> = thread::scope(|scope| {
                let handles: Vec<_> = (0..2)
                    .map(|_| {
                        scope.spawn(|| {
                            barrier.wait();
                            h.svc.cancel_item(Some(first), order.order_id, item)
                        })
                    })
                    .collect();
                handles.into_iter().map(|t| t.join().unwrap()).collect()
            });

            for r in &results {
                match r {
                    Ok(_) | Err(FulfillmentError::StaleRead { .. }) => {}
                    Err(other) => panic!("unexpected cancel error: {other:?}"),
                }
            }
            assert!(results.iter().any(|r| r.is_ok()));
            assert_eq!(reserved(&h, a), 2);
            assert_eq!(reserved(&h, b), 1);
            let left = h.svc.order(order.order_id).unwrap();
            assert_eq!(left.items.len(), 1);
            assert_eq!(left.total, 100);
        }
    }

    #[derive(Debug, Clone)]
    enum Op {
        Add(usize, usize, i64),
        Checkout(usize),
        CancelFirstItem(usize),
        CancelOrder(usize),
        PickNext,
        MissingNext,
        CloseNext,
        SendNext,
        Restock(usize, i64),
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![
            (0..2usize, 0..2usize, 1..4i64).prop_map(|(c, v, q)| Op::Add(c, v, q)),
            (0..2usize).prop_map(Op::Checkout),
            (0..2usize).prop_map(Op::CancelFirstItem),
            (0..2usize).prop_map(Op::CancelOrder),
            Just(Op::PickNext),
            Just(Op::MissingNext),
            Just(Op::CloseNext),
            Just(Op::SendNext),
            (0..2usize, -3..4i64).prop_map(|(v, d)| Op::Restock(v, d)),
        ]
    }

    fn run(h: &Harness, customers: &[CustomerId], variants: &[VariantId], op: Op) {
        // Rejections are expected; only the invariants matter.
        let _ = match op {
            Op::Add(c, v, q) => h.svc.add_item(customers[c], variants[v].into(), q, None).map(|_| ()),
            Op::Checkout(c) => h.svc.checkout(customers[c], Vec::new(), String::new()).map(|_| ()),
            Op::CancelFirstItem(c) => match h.svc.customer_orders(customers[c]).active.first() {
                Some(o) if !o.items.is_empty() => h
                    .svc
                    .cancel_item(Some(customers[c]), o.order_id, o.items[0].item_id)
                    .map(|_| ()),
                _ => Ok(()),
            },
            Op::CancelOrder(c) => match h.svc.customer_orders(customers[c]).active.first() {
                Some(o) => h.svc.cancel_order(Some(customers[c]), o.order_id).map(|_| ()),
                None => Ok(()),
            },
            Op::PickNext => match h.svc.pending_items().first() {
                Some(p) => h.svc.mark_picked(p.order_id, p.item.id).map(|_| ()),
                None => Ok(()),
            },
            Op::MissingNext => {
                let next = h.svc.read_models().orders.list().into_iter().find_map(|o| {
                    o.items()
                        .iter()
                        .find(|i| i.status != ItemStatus::Missing)
                        .map(|i| (o.id_typed(), i.id))
                });
                match next {
                    Some((order_id, item_id)) => h.svc.mark_missing(order_id, item_id).map(|_| ()),
                    None => Ok(()),
                }
            }
            Op::CloseNext => match h
                .svc
                .read_models()
                .orders
                .list()
                .iter()
                .find(|o| o.status() == OrderStatus::Active)
            {
                Some(o) => h.svc.close_order(o.id_typed()).map(|_| ()),
                None => Ok(()),
            },
            Op::SendNext => match h
                .svc
                .read_models()
                .orders
                .list()
                .iter()
                .find(|o| o.status() == OrderStatus::Closed && !o.items().is_empty())
            {
                Some(o) => h.svc.mark_sent(o.id_typed()).map(|_| ()),
                None => Ok(()),
            },
            Op::Restock(v, delta) if delta != 0 => h
                .svc
                .adjust_physical(variants[v], Warehouse::General, delta)
                .map(|_| ()),
            Op::Restock(..) => Ok(()),
        };
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 32,
            .. ProptestConfig::default()
        })]

        /// Availability is never shown negative, and the reserved counter
        /// always equals what live order items hold.
        #[test]
        fn reservations_are_conserved(ops in proptest::collection::vec(op(), 1..30)) {
            let h = harness();
            let product = ProductId::new();
            let variants = [
                stock(&h, product, "red", 3, 2, 100),
                stock(&h, product, "blue", 1, 1, 150),
            ];
            let customers = [CustomerId::new(), CustomerId::new()];

            for op in ops {
                run(&h, &customers, &variants, op);

                for v in variants {
                    let row = h.svc.variant(v).unwrap();
                    prop_assert!(row.available >= 0);
                    prop_assert!(row.general >= 0 && row.public_sale >= 0);

                    let held: i64 = h
                        .svc
                        .read_models()
                        .orders
                        .list()
                        .iter()
                        .flat_map(|o| o.items().iter())
                        .filter(|i| i.variant_id == v)
                        .map(|i| i.reserved_held)
                        .sum();
                    prop_assert_eq!(row.reserved, held);
                }
            }
        }
    }
}

mod common;

use booking_service::coordinator::{Coordinator, MemoryCoordinator};
use booking_service::request::BookingRequest;
use booking_service::store::{InventoryStore, MemoryInventoryStore};
use booking_service::{LockCoordinator, LockKey, LockOptions, ReservationError, ReservationTransaction};
use common::*;
use serde_json::json;
use shared::BookingFilter;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn twenty_buyers_five_seats() {
    let handler = Arc::new(handler(
        MemoryInventoryStore::new(),
        Arc::new(MemoryCoordinator::new()),
    ));
    let event = handler.publish_event(concert(&[("VIP", 5000, 5)])).await.unwrap();
    let section_id = event.sections[0].id;

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let handler = Arc::clone(&handler);
            let request = BookingRequest::new(event.id, section_id, 1, &format!("user-{i}"));
            tokio::spawn(async move { handler.create_reservation(&request).await })
        })
        .collect();

    let mut confirmed = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => confirmed += 1,
            Err(ReservationError::InsufficientCapacity { .. }) => {}
            Err(other) => panic!("unexpected failure: {other}"),
        }
    }

    assert_eq!(confirmed, 5);
    assert_eq!(remaining(&handler, &event, 0).await, 0);
    let bookings = handler
        .list_reservations(&BookingFilter::default(), None, None)
        .await
        .unwrap();
    assert_eq!(bookings.total, 5);
    for booking in &bookings.items {
        assert_eq!(booking.qty, 1);
        assert_eq!(booking.total_price, bigdecimal::BigDecimal::from(5000));
    }
}

#[tokio::test]
async fn sequential_buyers_stop_at_capacity() {
    let handler = handler(MemoryInventoryStore::new(), Arc::new(MemoryCoordinator::new()));
    let event = handler.publish_event(concert(&[("VIP", 5000, 5)])).await.unwrap();
    let section_id = event.sections[0].id;

    for user in ["a", "b"] {
        handler
            .create_reservation(&BookingRequest::new(event.id, section_id, 2, user))
            .await
            .unwrap();
    }
    let err = handler
        .create_reservation(&BookingRequest::new(event.id, section_id, 2, "c"))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        ReservationError::InsufficientCapacity {
            requested: 2,
            remaining: 1
        }
    ));
    assert_eq!(remaining(&handler, &event, 0).await, 1);
}

#[tokio::test]
async fn invalid_quantities_never_reach_coordinator_or_store() {
    let coordinator = Arc::new(CountingCoordinator::default());
    let handler = handler(InstrumentedStore::default(), coordinator.clone());

    for qty in [json!(0), json!(101), json!(1.5)] {
        let request = BookingRequest {
            event_id: Some(Uuid::new_v4().to_string()),
            section_id: Some(Uuid::new_v4().to_string()),
            qty: Some(qty),
            user_id: Some("user-1".into()),
        };
        let err = handler.create_reservation(&request).await.unwrap_err();
        assert!(matches!(err, ReservationError::Validation(_)));
    }

    assert_eq!(coordinator.calls(), 0);
    assert_eq!(handler.store().begins(), 0);
    assert_eq!(handler.metrics().snapshot().booking_rejected, 3);
}

#[tokio::test]
async fn unknown_event_leaves_no_lock_behind() {
    let coordinator = Arc::new(MemoryCoordinator::new());
    let handler = handler(MemoryInventoryStore::new(), coordinator.clone());
    let (event_id, section_id) = (Uuid::new_v4(), Uuid::new_v4());

    let err = handler
        .create_reservation(&BookingRequest::new(event_id, section_id, 1, "user-1"))
        .await
        .unwrap_err();

    assert!(matches!(err, ReservationError::ResourceNotFound(id) if id == event_id));
    let key = LockKey::for_section(event_id, section_id);
    assert_eq!(coordinator.get(key.as_str()).await.unwrap(), None);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn same_section_transactions_never_overlap() {
    let handler = Arc::new(handler(
        InstrumentedStore::slow_reads(Duration::from_millis(5)),
        Arc::new(MemoryCoordinator::new()),
    ));
    let event = handler.publish_event(concert(&[("GA", 100, 100)])).await.unwrap();
    let section_id = event.sections[0].id;

    let tasks: Vec<_> = (0..10)
        .map(|i| {
            let handler = Arc::clone(&handler);
            let request = BookingRequest::new(event.id, section_id, 1, &format!("user-{i}"));
            tokio::spawn(async move { handler.create_reservation(&request).await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(handler.store().max_active(), 1);
    assert_eq!(remaining(&handler, &event, 0).await, 90);
}

#[tokio::test]
async fn different_sections_do_not_block_each_other() {
    let coordinator = Arc::new(MemoryCoordinator::new());
    let handler = handler(MemoryInventoryStore::new(), coordinator.clone());
    let event = handler
        .publish_event(concert(&[("VIP", 5000, 5), ("GA", 100, 50)]))
        .await
        .unwrap();

    let vip = LockKey::for_section(event.id, event.sections[0].id);
    coordinator
        .set_if_absent(vip.as_str(), "held-elsewhere", Duration::from_secs(30))
        .await
        .unwrap();

    handler
        .create_reservation(&BookingRequest::new(event.id, event.sections[1].id, 3, "user-1"))
        .await
        .unwrap();
    assert_eq!(remaining(&handler, &event, 1).await, 47);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_bookings_on_sibling_sections_all_commit() {
    let handler = Arc::new(handler(
        InstrumentedStore::slow_writes(Duration::from_millis(10)),
        Arc::new(MemoryCoordinator::new()),
    ));
    let event = handler
        .publish_event(concert(&[("VIP", 5000, 50), ("GA", 100, 50)]))
        .await
        .unwrap();

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let handler = Arc::clone(&handler);
            let section_id = event.sections[i % 2].id;
            let request = BookingRequest::new(event.id, section_id, 1, &format!("user-{i}"));
            tokio::spawn(async move { handler.create_reservation(&request).await })
        })
        .collect();

    let mut aborted = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(_) => {}
            Err(ReservationError::TransactionAborted(_)) => aborted += 1,
            Err(other) => panic!("unexpected failure: {other}"),
        }
    }

    assert_eq!(aborted, 0);
    assert_eq!(remaining(&handler, &event, 0).await, 40);
    assert_eq!(remaining(&handler, &event, 1).await, 40);
    assert_eq!(handler.metrics().snapshot().booking_successes, 20);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn store_alone_prevents_overselling() {
    let store = Arc::new(MemoryInventoryStore::new());
    let event = shared::Event::publish(
        "Test Concert".into(),
        String::new(),
        vec![shared::NewSection {
            name: "VIP".into(),
            price: bigdecimal::BigDecimal::from(5000),
            capacity: 5,
        }],
    );
    store.publish_event(&event).await.unwrap();
    let transaction = ReservationTransaction::new(store);
    let (event_id, section_id) = (event.id, event.sections[0].id);

    let tasks: Vec<_> = (0..20)
        .map(|i| {
            let transaction = transaction.clone();
            tokio::spawn(async move {
                transaction
                    .execute(event_id, section_id, 2, &format!("user-{i}"), None)
                    .await
            })
        })
        .collect();

    let mut sold = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(booking) => sold += booking.qty,
            Err(ReservationError::InsufficientCapacity { .. })
            | Err(ReservationError::TransactionAborted(_)) => {}
            Err(other) => panic!("unexpected failure: {other}"),
        }
    }

    let stored = transaction.store().find_event(event_id).await.unwrap().unwrap();
    assert!(sold <= 5);
    assert_eq!(stored.sections[0].remaining, 5 - sold);
}

#[tokio::test]
async fn failed_reservation_write_rolls_back_decrement() {
    let coordinator = Arc::new(MemoryCoordinator::new());
    let handler = handler(InstrumentedStore::failing_reservation_writes(), coordinator.clone());
    let event = handler.publish_event(concert(&[("VIP", 5000, 5)])).await.unwrap();
    let section_id = event.sections[0].id;

    let err = handler
        .create_reservation(&BookingRequest::new(event.id, section_id, 2, "user-1"))
        .await
        .unwrap_err();

    assert!(matches!(err, ReservationError::TransactionAborted(_)));
    assert!(err.is_retryable());
    assert_eq!(remaining(&handler, &event, 0).await, 5);
    let bookings = handler
        .list_reservations(&BookingFilter::default(), None, None)
        .await
        .unwrap();
    assert_eq!(bookings.total, 0);

    let key = LockKey::for_section(event.id, section_id);
    assert_eq!(coordinator.get(key.as_str()).await.unwrap(), None);
}

#[tokio::test]
async fn expired_holder_cannot_release_successor_lock() {
    let coordinator = Arc::new(MemoryCoordinator::new());
    let locks = LockCoordinator::with_backoff(coordinator.clone(), fast_backoff());
    let key = LockKey::for_section(Uuid::new_v4(), Uuid::new_v4());
    let short = LockOptions {
        ttl: Duration::from_millis(20),
        max_retries: 1,
    };

    let stale = locks.acquire(&key, &short).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    let current = locks.acquire(&key, &LockOptions::default()).await.unwrap();

    locks.release(&stale).await;
    assert_eq!(
        coordinator.get(key.as_str()).await.unwrap().as_deref(),
        Some(current.token.as_str())
    );
}

#[tokio::test]
async fn releasing_twice_is_harmless() {
    let coordinator = Arc::new(MemoryCoordinator::new());
    let locks = LockCoordinator::with_backoff(coordinator.clone(), fast_backoff());
    let key = LockKey::for_section(Uuid::new_v4(), Uuid::new_v4());

    let handle = locks.acquire(&key, &LockOptions::default()).await.unwrap();
    locks.release(&handle).await;
    locks.release(&handle).await;
    assert_eq!(coordinator.get(key.as_str()).await.unwrap(), None);

    let next = locks.acquire(&key, &LockOptions::default()).await.unwrap();
    assert_eq!(next.attempts, 1);
}

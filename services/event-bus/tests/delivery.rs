//! Delivery contract: ordering, redelivery, restart from committed offsets

use event_bus::{BusError, EventBus, TopicConfig};
use rust_decimal::Decimal;
use std::time::Duration;
use tempfile::TempDir;
use types::event::{Event, EventType, InteractionPayload};
use types::ids::EntityId;

fn rate(entity: &str, item: u64, rating: i64, t: i64) -> Event {
    Event::new(
        EntityId::new(entity),
        EventType::Rate,
        InteractionPayload::rating(item, Decimal::from(rating)),
        t,
        t,
    )
}

#[tokio::test]
async fn test_in_order_delivery_within_partition() {
    let bus = EventBus::in_memory(4);
    let mut partition = None;
    for t in 0..10 {
        let ack = bus.publish(rate("u1", t as u64, 4, t)).unwrap();
        partition = Some(ack.partition);
    }

    let mut sub = bus.subscribe("engine", partition.unwrap()).unwrap();
    for expected in 0..10u64 {
        let delivery = sub.next().await.unwrap();
        assert_eq!(delivery.offset, expected);
        assert_eq!(delivery.event.payload.item_id, Some(expected));
    }
}

#[tokio::test]
async fn test_seek_redelivers_same_events_at_same_offsets() {
    let bus = EventBus::in_memory(1);
    for t in 0..3 {
        bus.publish(rate("u1", 10 + t as u64, 5, t)).unwrap();
    }
    let mut sub = bus.subscribe("engine", 0).unwrap();
    let first: Vec<_> = vec![
        sub.next().await.unwrap(),
        sub.next().await.unwrap(),
        sub.next().await.unwrap(),
    ];

    sub.seek(1);
    let again = sub.next().await.unwrap();
    assert_eq!(again, first[1]);
    assert_eq!(again.event.event_id, first[1].event.event_id);
}

#[tokio::test]
async fn test_waiting_subscriber_wakes_on_publish() {
    let bus = std::sync::Arc::new(EventBus::in_memory(1));
    let mut sub = bus.subscribe("engine", 0).unwrap();

    let publisher = bus.clone();
    let handle = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(20)).await;
        publisher.publish(rate("u1", 1, 3, 1)).unwrap();
    });

    let delivery = tokio::time::timeout(Duration::from_secs(2), sub.next())
        .await
        .expect("subscriber should wake")
        .unwrap();
    assert_eq!(delivery.offset, 0);
    handle.await.unwrap();
}

#[tokio::test]
async fn test_unavailable_bus_fails_reads_until_restored() {
    let bus = EventBus::in_memory(1);
    bus.publish(rate("u1", 1, 3, 1)).unwrap();
    let mut sub = bus.subscribe("engine", 0).unwrap();

    bus.set_available(false);
    assert!(matches!(sub.next().await, Err(BusError::Unavailable(_))));
    assert_eq!(sub.position(), 0);

    bus.set_available(true);
    assert_eq!(sub.next().await.unwrap().offset, 0);
}

#[tokio::test]
async fn test_durable_restart_resumes_from_committed_offset() {
    let tmp = TempDir::new().unwrap();
    let config = TopicConfig::durable(2, tmp.path());

    let (partition, published) = {
        let bus = EventBus::open(config.clone()).unwrap();
        let mut acks = Vec::new();
        for t in 0..5 {
            acks.push(bus.publish(rate("u7", t as u64, 4, t)).unwrap());
        }
        let partition = acks[0].partition;

        let mut sub = bus.subscribe("engine", partition).unwrap();
        sub.next().await.unwrap();
        sub.next().await.unwrap();
        sub.commit(sub.position()).unwrap();
        bus.sync().unwrap();
        (partition, acks.len() as u64)
    };

    let bus = EventBus::open(config).unwrap();
    assert_eq!(bus.bounds(partition).unwrap(), (0, published));
    assert_eq!(bus.committed_offset("engine", partition).unwrap(), Some(2));

    let mut sub = bus.subscribe("engine", partition).unwrap();
    let delivery = sub.next().await.unwrap();
    assert_eq!(delivery.offset, 2);
    assert_eq!(delivery.event.payload.item_id, Some(2));
    assert_eq!(delivery.event.payload.rating, Some(Decimal::from(4)));
}

#[tokio::test]
async fn test_retention_skips_subscriber_to_log_start() {
    let config = TopicConfig {
        retention: 3,
        ..TopicConfig::in_memory(1)
    };
    let bus = EventBus::open(config).unwrap();
    let mut sub = bus.subscribe("engine", 0).unwrap();
    for t in 0..6 {
        bus.publish(rate("u1", t as u64, 2, t)).unwrap();
    }

    let delivery = sub.next().await.unwrap();
    assert_eq!(delivery.offset, 3);
}

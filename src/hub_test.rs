use super::*;
use crate::frame::Metadata;
use axum::body::Bytes;
use serde_json::{Value, json};
use tokio::time::{Duration, timeout};

fn frame(fram_id: &str) -> Frame {
    let text = json!({
        "fram_id": fram_id,
        "cam_id": "cam-a",
        "timestamp": "2025-03-01T10:20:30Z",
        "image_info": { "width": 2, "height": 2 },
        "objects": [{ "obj_id": "o1", "type": "quadcopter", "lat": 1.5, "lng": 2.5, "alt": 3.0, "speed_kt": 4.0 }]
    })
    .to_string();
    Frame::new(Metadata::parse(&text).expect("valid metadata"), Bytes::from_static(b"\xFF\xD8\xFF\xD9"))
}

async fn recv_json(rx: &mut mpsc::Receiver<Utf8Bytes>) -> Value {
    let text = timeout(Duration::from_millis(500), rx.recv())
        .await
        .expect("broadcast receive timed out")
        .expect("queue closed unexpectedly");
    serde_json::from_str(text.as_str()).expect("broadcast is json")
}

#[tokio::test]
async fn broadcast_reaches_every_consumer() {
    let hub = Hub::new(8);
    let mut rx_a = hub.register_consumer(Uuid::new_v4()).await.unwrap();
    let mut rx_b = hub.register_consumer(Uuid::new_v4()).await.unwrap();

    let report = hub.broadcast(frame("1"), None).await.unwrap();
    assert_eq!(report, Delivery { delivered: 2, dropped: 0 });

    for rx in [&mut rx_a, &mut rx_b] {
        let msg = recv_json(rx).await;
        assert_eq!(msg["kind"], json!("frame"));
        assert_eq!(msg["meta"]["fram_id"], json!("1"));
        assert_eq!(msg["image_jpeg_base64"], json!("/9j/2Q=="));
    }
}

#[tokio::test]
async fn broadcast_with_no_consumers_is_counted() {
    let hub = Hub::new(8);
    let report = hub.broadcast(frame("1"), None).await.unwrap();
    assert_eq!(report, Delivery::default());
    assert_eq!(hub.stats().await.frames_relayed, 1);
}

#[tokio::test]
async fn full_queue_drops_only_for_that_consumer() {
    let hub = Hub::new(1);
    let mut slow = hub.register_consumer(Uuid::new_v4()).await.unwrap();
    let mut fast = hub.register_consumer(Uuid::new_v4()).await.unwrap();

    hub.broadcast(frame("1"), None).await.unwrap();
    assert_eq!(recv_json(&mut fast).await["meta"]["fram_id"], json!("1"));

    // `slow` never drained frame 1, so frame 2 is dropped for it alone.
    let report = hub.broadcast(frame("2"), None).await.unwrap();
    assert_eq!(report, Delivery { delivered: 1, dropped: 1 });
    assert_eq!(recv_json(&mut fast).await["meta"]["fram_id"], json!("2"));
    assert_eq!(recv_json(&mut slow).await["meta"]["fram_id"], json!("1"));
    assert!(slow.try_recv().is_err());

    let stats = hub.stats().await;
    assert_eq!(stats.consumers, 2);
    assert_eq!(stats.deliveries_dropped, 1);
}

#[tokio::test]
async fn closed_consumer_is_pruned_on_broadcast() {
    let hub = Hub::new(8);
    let rx = hub.register_consumer(Uuid::new_v4()).await.unwrap();
    let mut live = hub.register_consumer(Uuid::new_v4()).await.unwrap();
    drop(rx);

    let report = hub.broadcast(frame("1"), None).await.unwrap();
    assert_eq!(report, Delivery { delivered: 1, dropped: 1 });
    assert_eq!(hub.consumer_count().await, 1);
    assert_eq!(recv_json(&mut live).await["meta"]["fram_id"], json!("1"));
}

#[tokio::test]
async fn late_consumer_gets_no_backfill() {
    let hub = Hub::new(8);
    hub.broadcast(frame("1"), None).await.unwrap();
    hub.broadcast(frame("2"), None).await.unwrap();

    let mut late = hub.register_consumer(Uuid::new_v4()).await.unwrap();
    assert!(late.try_recv().is_err());

    hub.broadcast(frame("3"), None).await.unwrap();
    assert_eq!(recv_json(&mut late).await["meta"]["fram_id"], json!("3"));
}

#[tokio::test]
async fn remove_consumer_stops_delivery() {
    let hub = Hub::new(8);
    let session_id = Uuid::new_v4();
    let mut rx = hub.register_consumer(session_id).await.unwrap();

    assert!(hub.remove_consumer(session_id).await);
    assert!(!hub.remove_consumer(session_id).await);

    let report = hub.broadcast(frame("1"), None).await.unwrap();
    assert_eq!(report.delivered, 0);
    assert!(rx.recv().await.is_none());
}

#[tokio::test]
async fn camera_info_is_attached_to_broadcast() {
    let hub = Hub::new(8);
    let mut rx = hub.register_consumer(Uuid::new_v4()).await.unwrap();
    let camera = CameraInfo { name: "Gate".into(), location: "North".into() };

    hub.broadcast(frame("1"), Some(&camera)).await.unwrap();
    let msg = recv_json(&mut rx).await;
    assert_eq!(msg["meta"]["token_id"]["camera_info"]["name"], json!("Gate"));
}

#[tokio::test]
async fn producer_guard_tracks_live_producers() {
    let hub = Hub::new(8);
    let a = hub.producer_connected().unwrap();
    let b = hub.producer_connected().unwrap();
    assert_eq!(hub.stats().await.producers, 2);

    drop(a);
    assert_eq!(hub.stats().await.producers, 1);
    drop(b);
    assert_eq!(hub.stats().await.producers, 0);
}

#[tokio::test]
async fn close_drains_consumers_and_refuses_new_connections() {
    let hub = Hub::new(8);
    let mut rx = hub.register_consumer(Uuid::new_v4()).await.unwrap();

    hub.close().await;

    assert!(hub.is_closed());
    assert!(rx.recv().await.is_none());
    assert_eq!(hub.consumer_count().await, 0);
    assert!(hub.register_consumer(Uuid::new_v4()).await.is_err());
    assert!(hub.producer_connected().is_err());
}

#[tokio::test]
async fn separate_hubs_do_not_share_consumers() {
    let first = Hub::new(8);
    let second = Hub::new(8);
    let mut rx = first.register_consumer(Uuid::new_v4()).await.unwrap();

    let report = second.broadcast(frame("1"), None).await.unwrap();
    assert_eq!(report.delivered, 0);
    assert!(rx.try_recv().is_err());
}

#[tokio::test]
async fn closed_wakes_waiters_on_close() {
    let hub = Hub::new(8);
    let waiter = {
        let hub = hub.clone();
        tokio::spawn(async move { hub.closed().await })
    };

    assert!(timeout(Duration::from_millis(50), hub.closed()).await.is_err());
    hub.close().await;

    timeout(Duration::from_millis(500), waiter)
        .await
        .expect("waiter woke")
        .expect("waiter task ok");
    timeout(Duration::from_millis(50), hub.closed())
        .await
        .expect("already closed resolves immediately");
}

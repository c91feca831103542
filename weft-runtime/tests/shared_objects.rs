//! Shared-object lifecycle scenarios: event round-trips, pre-confirmation
//! emit queueing, and the forget path.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod common;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use serde_json::json;
use tokio::sync::Notify;
use weft_runtime::{Router, RouterOptions, SharedObject};

/// Configures a child whose shared objects answer `"ping"` with `"pong"`.
fn pong_child(
    worker_id: u32,
) -> (
    weft_runtime::Endpoint,
    std::thread::JoinHandle<()>,
) {
    let (stop_tx, stop_rx) = common::stop_signal();
    common::spawn_worker(
        worker_id,
        "child",
        move |options| {
            options
                .with_factory(common::gauge_factory)
                .with_on_object_shared(|object| {
                    object.on("ping", |object, data| {
                        object.emit("pong", data.clone());
                    });
                })
                .with_on_close(move || stop_tx.notify_one())
        },
        move |_router| async move { stop_rx.notified().await },
    )
}

#[tokio::test]
#[cfg_attr(coverage_nightly, coverage(off))]
async fn events_round_trip_between_peers() {
    let (endpoint, child) = pong_child(5);
    let router = Router::init(RouterOptions::new(1, "main")).unwrap();
    router.register_worker("child", endpoint);

    let gauge = SharedObject::new(&router, &common::GAUGE_LAYOUT, &[]);
    router
        .share_objects("child", std::slice::from_ref(&gauge))
        .await
        .unwrap();

    let received = Arc::new(Mutex::new(Vec::new()));
    let arrived = Arc::new(Notify::new());
    {
        let received = Arc::clone(&received);
        let arrived = Arc::clone(&arrived);
        gauge.on("pong", move |_object, data| {
            received.lock().unwrap().push(data.clone());
            arrived.notify_one();
        });
    }

    gauge.emit("ping", json!({"n": 1}));
    tokio::time::timeout(Duration::from_secs(2), arrived.notified())
        .await
        .expect("no pong arrived");
    // Allow any stray duplicate to surface before asserting.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(*received.lock().unwrap(), vec![json!({"n": 1})]);

    router.close_worker("child").await.unwrap();
    child.join().unwrap();
}

#[tokio::test]
#[cfg_attr(coverage_nightly, coverage(off))]
async fn emits_issued_before_confirmation_are_queued() {
    let (endpoint, child) = pong_child(6);
    let router = Router::init(RouterOptions::new(1, "main")).unwrap();
    router.register_worker("child", endpoint);

    let gauge = SharedObject::new(&router, &common::GAUGE_LAYOUT, &[]);
    let received = Arc::new(Mutex::new(Vec::new()));
    let arrived = Arc::new(Notify::new());
    {
        let received = Arc::clone(&received);
        let arrived = Arc::clone(&arrived);
        gauge.on("pong", move |_object, data| {
            received.lock().unwrap().push(data.clone());
            arrived.notify_one();
        });
    }

    // Emit immediately, without awaiting the share confirmation first.
    let share = router.share_objects("child", std::slice::from_ref(&gauge));
    gauge.emit("ping", json!("early"));
    share.await.unwrap();

    tokio::time::timeout(Duration::from_secs(2), arrived.notified())
        .await
        .expect("queued emit never reached the peer");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(*received.lock().unwrap(), vec![json!("early")]);

    router.close_worker("child").await.unwrap();
    child.join().unwrap();
}

#[tokio::test]
#[cfg_attr(coverage_nightly, coverage(off))]
async fn sharing_twice_is_refused() {
    let (endpoint, child) = pong_child(7);
    let router = Router::init(RouterOptions::new(1, "main")).unwrap();
    router.register_worker("child", endpoint);

    let gauge = SharedObject::new(&router, &common::GAUGE_LAYOUT, &[]);
    router
        .share_objects("child", std::slice::from_ref(&gauge))
        .await
        .unwrap();
    // The second share skips the object with a warning and resolves without
    // posting anything.
    router
        .share_objects("child", std::slice::from_ref(&gauge))
        .await
        .unwrap();
    assert!(router.get_shared_object_by_id(gauge.id()).is_some());

    router.close_worker("child").await.unwrap();
    child.join().unwrap();
}

#[tokio::test]
#[cfg_attr(coverage_nightly, coverage(off))]
async fn forgetting_destroys_the_remote_copies_only() {
    let (stop_tx, stop_rx) = common::stop_signal();
    let (endpoint, child) = common::spawn_worker(
        8,
        "child",
        move |options| {
            let adopted: Arc<Mutex<Vec<SharedObject>>> = Arc::new(Mutex::new(Vec::new()));
            let keeper = Arc::clone(&adopted);
            options
                .with_factory(common::gauge_factory)
                .with_on_object_shared(move |object| {
                    keeper.lock().unwrap().push(object.clone());
                })
                .with_on_message(move |packet| {
                    let adopted = Arc::clone(&adopted);
                    async move {
                        let router = Router::instance()?;
                        let ids: Vec<u64> =
                            serde_json::from_value(packet.body["ids"].clone())?;
                        let tracked: Vec<bool> = ids
                            .iter()
                            .map(|id| router.get_shared_object_by_id(*id).is_some())
                            .collect();
                        let destroyed: Vec<bool> = adopted
                            .lock()
                            .unwrap()
                            .iter()
                            .map(|object| object.is_destroyed())
                            .collect();
                        Ok(json!({"tracked": tracked, "destroyed": destroyed}))
                    }
                })
                .with_on_close(move || stop_tx.notify_one())
        },
        move |_router| async move { stop_rx.notified().await },
    );

    let router = Router::init(RouterOptions::new(1, "main")).unwrap();
    router.register_worker("child", endpoint);

    let first = SharedObject::new(&router, &common::GAUGE_LAYOUT, &[("value", 1.0.into())]);
    let second = SharedObject::new(&router, &common::GAUGE_LAYOUT, &[("value", 2.0.into())]);
    router
        .share_objects("child", &[first.clone(), second.clone()])
        .await
        .unwrap();

    router.forget_objects(&[first.clone(), second.clone()]);

    // Forgotten on this side immediately.
    assert!(router.get_shared_object_by_id(first.id()).is_none());
    assert!(router.get_shared_object_by_id(second.id()).is_none());

    // The peer destroys its projections; ours stay usable.
    let query = json!({"type": "status", "ids": [first.id(), second.id()]});
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        let status = router
            .send_async("child", query.clone(), Vec::new())
            .await
            .unwrap();
        if status["tracked"] == json!([false, false]) && status["destroyed"] == json!([true, true])
        {
            break;
        }
        assert!(
            Instant::now() < deadline,
            "peer never destroyed its copies: {status}",
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    assert!(!first.is_destroyed());
    assert!(!second.is_destroyed());
    first.set("value", 3.0);
    assert_eq!(first.get("value").as_number(), Some(3.0));

    router.close_worker("child").await.unwrap();
    child.join().unwrap();
}

#[tokio::test]
#[cfg_attr(coverage_nightly, coverage(off))]
async fn string_properties_truncate_at_255_units() {
    let router = Router::init(RouterOptions::new(1, "main")).unwrap();
    let gauge = SharedObject::new(&router, &common::GAUGE_LAYOUT, &[]);
    gauge.set("label", "x".repeat(256));
    assert_eq!(gauge.get("label").as_str().map(str::len), Some(255));
}

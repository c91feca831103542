//! Property convergence across workers: the peer eventually observes the
//! last locally written value, exactly once, and then goes quiet.

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

mod common;

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use pretty_assertions::assert_eq;
use serde_json::json;
use weft_runtime::{Router, RouterOptions, SharedObject};

#[tokio::test]
#[cfg_attr(coverage_nightly, coverage(off))]
async fn writes_converge_on_the_last_value() {
    let (stop_tx, stop_rx) = common::stop_signal();
    let (endpoint, child) = common::spawn_worker(
        4,
        "child",
        move |options| {
            let observed: Arc<Mutex<Vec<f64>>> = Arc::new(Mutex::new(Vec::new()));
            let recorder = Arc::clone(&observed);
            options
                .with_factory(common::gauge_factory)
                .with_on_object_shared(move |object| {
                    let observed = Arc::clone(&recorder);
                    object.set_on_property_change(move |_object, name, new_value, _old_value| {
                        if name == "value" {
                            if let Some(number) = new_value.as_number() {
                                observed.lock().unwrap().push(number);
                            }
                        }
                    });
                })
                .with_on_message(move |_packet| {
                    let observed = Arc::clone(&observed);
                    async move { Ok(json!(observed.lock().unwrap().clone())) }
                })
                .with_on_close(move || stop_tx.notify_one())
        },
        move |_router| async move { stop_rx.notified().await },
    );

    let router = Router::init(RouterOptions::new(1, "main")).unwrap();
    router.register_worker("child", endpoint);

    let gauge = SharedObject::new(&router, &common::GAUGE_LAYOUT, &[("value", 0.0.into())]);
    router
        .share_objects("child", std::slice::from_ref(&gauge))
        .await
        .unwrap();

    for value in [111.0, 222.0, 333.0, 444.0, 555.0, 666.0, 999.0] {
        gauge.set("value", value);
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let query = || async {
        let answer = router
            .send_async("child", json!({"type": "observed"}), Vec::new())
            .await
            .unwrap();
        serde_json::from_value::<Vec<f64>>(answer).unwrap()
    };

    let deadline = Instant::now() + Duration::from_secs(5);
    let observed = loop {
        let observed = query().await;
        if observed.last() == Some(&999.0) {
            break observed;
        }
        assert!(
            Instant::now() < deadline,
            "child never observed the final value, saw {observed:?}",
        );
        tokio::time::sleep(Duration::from_millis(20)).await;
    };

    // Intermediate values may coalesce, but the final one arrives exactly
    // once and nothing follows it.
    assert_eq!(
        observed.iter().filter(|value| **value == 999.0).count(),
        1,
        "final value observed more than once: {observed:?}",
    );
    tokio::time::sleep(Duration::from_millis(150)).await;
    let settled = query().await;
    assert_eq!(settled, observed, "changes kept arriving after equilibrium");

    router.close_worker("child").await.unwrap();
    child.join().unwrap();
}

#[tokio::test]
#[cfg_attr(coverage_nightly, coverage(off))]
async fn local_writes_do_not_fire_the_local_change_hook() {
    let router = Router::init(RouterOptions::new(1, "main")).unwrap();
    let gauge = SharedObject::new(&router, &common::GAUGE_LAYOUT, &[]);

    let fired = Arc::new(Mutex::new(0_u32));
    let counter = Arc::clone(&fired);
    gauge.set_on_property_change(move |_object, _name, _new, _old| {
        *counter.lock().unwrap() += 1;
    });

    gauge.set("value", 42.0);
    gauge.set("count", 7);
    gauge.flush();
    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(*fired.lock().unwrap(), 0, "hook fired for local writes");
    assert_eq!(gauge.get("value").as_number(), Some(42.0));
}

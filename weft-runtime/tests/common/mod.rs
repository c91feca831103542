//! Two-worker test harness: each worker is an OS thread driving its own
//! current-thread runtime, wired to the test body over a channel transport.

#![allow(dead_code)]

use std::future::Future;
use std::sync::{Arc, LazyLock};

use tokio::sync::Notify;
use weft_buffer::{BufferStruct, PropertySpec, StructLayout};
use weft_runtime::{Endpoint, Router, RouterOptions, SharedObject};
use weft_shm::SharedBuffer;

/// The struct type used by the shared-object scenarios.
pub static GAUGE_LAYOUT: LazyLock<StructLayout> = LazyLock::new(|| {
    StructLayout::compute(
        "GAUG",
        &[
            PropertySpec::number("value"),
            PropertySpec::string("label"),
            PropertySpec::int32("count"),
            PropertySpec::boolean("active"),
        ],
    )
    .unwrap()
});

/// Factory building gauge projections for inbound `shareObjects` buffers.
pub fn gauge_factory(buffer: SharedBuffer) -> Option<SharedObject> {
    if BufferStruct::extract_type_id(&buffer) != GAUGE_LAYOUT.type_id() {
        return None;
    }
    let router = Router::instance().ok()?;
    SharedObject::adopt(&router, &GAUGE_LAYOUT, buffer).ok()
}

/// Spawns a worker thread with its own current-thread runtime and router,
/// wired to the returned endpoint. The worker auto-registers the test body's
/// side as `"parent"` and announces readiness immediately; `body` runs until
/// it returns, after which the worker shuts down.
pub fn spawn_worker<C, F, Fut>(
    worker_id: u32,
    worker_name: &'static str,
    configure: C,
    body: F,
) -> (Endpoint, std::thread::JoinHandle<()>)
where
    C: FnOnce(RouterOptions) -> RouterOptions + Send + 'static,
    F: FnOnce(Router) -> Fut + Send + 'static,
    Fut: Future<Output = ()>,
{
    let (near, far) = Endpoint::pair();
    let join = std::thread::spawn(move || {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .expect("building the worker runtime");
        runtime.block_on(async move {
            let options = configure(RouterOptions::new(worker_id, worker_name).with_parent(far));
            let router = Router::init(options).expect("initializing the worker router");
            body(router).await;
        });
    });
    (near, join)
}

/// A stop signal connecting a worker's close hook to its body: the hook
/// calls [`notify`](Notify::notify_one), the body awaits it.
pub fn stop_signal() -> (Arc<Notify>, Arc<Notify>) {
    let stop = Arc::new(Notify::new());
    (Arc::clone(&stop), stop)
}

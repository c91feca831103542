//! The per-worker router.
//!
//! Exactly one [`Router`] lives on each worker thread (the thread-local
//! singleton mirrors the per-worker global of the execution model). It owns
//! the peer registry with per-peer ready gates, dispatches framed control
//! messages, correlates request/response pairs, tracks shared objects by id
//! and routes their events to the one peer each object is shared with.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use futures::future::BoxFuture;
use serde_json::Value;
use tokio::sync::{Notify, mpsc, oneshot};
use tokio::task::JoinHandle;
use weft_buffer::{BufferStruct, type_id};
use weft_protocol::{self as protocol, ControlMessage};
use weft_shm::SharedBuffer;

use crate::error::Error;
use crate::object::SharedObject;
use crate::transport::{Endpoint, Packet};

/// Each worker mints unique ids in its own stride of this size, so ids from
/// distinct workers can never collide.
const UNIQUE_ID_STRIDE: u64 = 10_u64.pow(13);

/// Worker ids are confined to `1..=MAX_WORKER_ID` so that
/// `worker_id * UNIQUE_ID_STRIDE` stays exactly representable in an IEEE-754
/// double, which is how unique ids are stored in buffer headers.
const MAX_WORKER_ID: u32 = 899;

/// How long [`Router::close_worker`] waits for the peer's acknowledgement
/// before forcing termination.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_millis(5000);

/// The peer name auto-registered when a router is given a parent endpoint.
pub const PARENT_WORKER_NAME: &str = "parent";

thread_local! {
    static INSTANCE: RefCell<Option<Router>> = const { RefCell::new(None) };
}

type Factory = Arc<dyn Fn(SharedBuffer) -> Option<SharedObject> + Send + Sync>;
type ObjectHook = Arc<dyn Fn(&SharedObject) + Send + Sync>;
type BoxError = Box<dyn std::error::Error + Send + Sync>;
type MessageHook = Arc<dyn Fn(Packet) -> BoxFuture<'static, Result<Value, BoxError>> + Send + Sync>;
type CloseHook = Arc<dyn Fn() + Send + Sync>;

/// How [`Router::close_worker`] ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CloseOutcome {
    /// The peer acknowledged the close request in time.
    Graceful,
    /// The peer did not answer in time and its endpoint was terminated.
    Forced,
}

/// Configuration for [`Router::init`].
pub struct RouterOptions {
    worker_id: u32,
    worker_name: String,
    factory: Option<Factory>,
    on_object_shared: Option<ObjectHook>,
    on_before_object_forgotten: Option<ObjectHook>,
    on_message: Option<MessageHook>,
    on_close: Option<CloseHook>,
    parent: Option<Endpoint>,
}

impl fmt::Debug for RouterOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouterOptions")
            .field("worker_id", &self.worker_id)
            .field("worker_name", &self.worker_name)
            .field("has_factory", &self.factory.is_some())
            .field("has_parent", &self.parent.is_some())
            .finish()
    }
}

impl RouterOptions {
    /// Creates options for a worker with the given id and name.
    ///
    /// # Panics
    ///
    /// If `worker_id` is outside `1..=899`.
    pub fn new(worker_id: u32, worker_name: impl Into<String>) -> Self {
        assert!(
            (1..=MAX_WORKER_ID).contains(&worker_id),
            "worker id must be within 1..={MAX_WORKER_ID}",
        );
        Self {
            worker_id,
            worker_name: worker_name.into(),
            factory: None,
            on_object_shared: None,
            on_before_object_forgotten: None,
            on_message: None,
            on_close: None,
            parent: None,
        }
    }

    /// Installs the factory that builds the local projection for buffers
    /// arriving in `shareObjects` messages.
    ///
    /// The factory inspects the buffer's type id and returns the matching
    /// concrete object, or `None` for unrecognized types (which fails the
    /// share request).
    pub fn with_factory(
        mut self,
        factory: impl Fn(SharedBuffer) -> Option<SharedObject> + Send + Sync + 'static,
    ) -> Self {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Installs a hook invoked for every object registered by an inbound
    /// `shareObjects` message.
    pub fn with_on_object_shared(
        mut self,
        hook: impl Fn(&SharedObject) + Send + Sync + 'static,
    ) -> Self {
        self.on_object_shared = Some(Arc::new(hook));
        self
    }

    /// Installs a hook invoked before an object is dropped by an inbound
    /// `forgetObjects` message.
    pub fn with_on_before_object_forgotten(
        mut self,
        hook: impl Fn(&SharedObject) + Send + Sync + 'static,
    ) -> Self {
        self.on_before_object_forgotten = Some(Arc::new(hook));
        self
    }

    /// Installs the handler for non-control messages.
    ///
    /// When the inbound message carries a correlation id, the handler's
    /// return value (or error) is posted back to the sender as a response.
    pub fn with_on_message<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Packet) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, BoxError>> + Send + 'static,
    {
        self.on_message = Some(Arc::new(move |packet| Box::pin(hook(packet))));
        self
    }

    /// Installs the hook invoked when a peer asks this worker to close.
    ///
    /// It runs after the close request has been acknowledged; the worker's
    /// host loop typically uses it to stop its runtime.
    pub fn with_on_close(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_close = Some(Arc::new(hook));
        self
    }

    /// Wires the endpoint to the worker that spawned this one.
    ///
    /// The router auto-registers it under [`PARENT_WORKER_NAME`] with an
    /// already-resolved ready gate and announces its own readiness
    /// immediately.
    pub fn with_parent(mut self, endpoint: Endpoint) -> Self {
        self.parent = Some(endpoint);
        self
    }
}

struct ReadyGate {
    ready: AtomicBool,
    notify: Notify,
}

impl ReadyGate {
    fn new(ready: bool) -> Self {
        Self {
            ready: AtomicBool::new(ready),
            notify: Notify::new(),
        }
    }

    fn resolve(&self) {
        if !self.ready.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.ready.load(Ordering::SeqCst) {
                return;
            }
            notified.await;
        }
    }
}

struct Peer {
    endpoint: Arc<Endpoint>,
    ready: Arc<ReadyGate>,
    listener: JoinHandle<()>,
}

/// Tracking metadata for an object shared with a peer.
struct SharedEntry {
    object: SharedObject,
    peer: String,
    share_confirmed: bool,
    /// Emits issued before the peer confirmed the share, drained afterwards.
    emit_queue: Option<Vec<(String, Value)>>,
}

struct PendingRequest {
    peer: String,
    response_tx: oneshot::Sender<Result<Value, Error>>,
}

struct RouterInner {
    worker_id: u32,
    worker_name: String,
    peers: Mutex<HashMap<String, Peer>>,
    objects: Mutex<HashMap<u64, SharedEntry>>,
    pending: Mutex<HashMap<u64, PendingRequest>>,
    next_async_msg_id: AtomicU64,
    next_unique_id: AtomicU64,
    /// One-shot latch swallowing the automatic echo of an inbound remote
    /// emit.
    suppress_shared_object_emit: AtomicBool,
    factory: Option<Factory>,
    on_object_shared: Option<ObjectHook>,
    on_before_object_forgotten: Option<ObjectHook>,
    on_message: Option<MessageHook>,
    on_close: Option<CloseHook>,
}

/// The per-worker coordinator for messaging and shared-object routing.
///
/// Handles are cheap to clone; all clones refer to the worker's one router.
#[derive(Clone)]
pub struct Router {
    inner: Arc<RouterInner>,
}

/// A non-owning router handle held by shared objects, so an object map entry
/// (router → object) and the object's back reference don't keep each other
/// alive.
pub(crate) struct WeakRouter {
    inner: Weak<RouterInner>,
}

impl WeakRouter {
    pub(crate) fn upgrade(&self) -> Option<Router> {
        self.inner.upgrade().map(|inner| Router { inner })
    }
}

impl fmt::Debug for Router {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Router")
            .field("worker_id", &self.inner.worker_id)
            .field("worker_name", &self.inner.worker_name)
            .finish()
    }
}

impl Router {
    /// Initializes this worker's router and stores it in the thread-local
    /// singleton slot.
    ///
    /// Fails with [`Error::AlreadyInitialized`] when the slot is occupied.
    pub fn init(options: RouterOptions) -> Result<Router, Error> {
        INSTANCE.with(|slot| {
            let mut slot = slot.borrow_mut();
            if slot.is_some() {
                return Err(Error::AlreadyInitialized);
            }
            let router = Router {
                inner: Arc::new(RouterInner {
                    worker_id: options.worker_id,
                    worker_name: options.worker_name,
                    peers: Mutex::new(HashMap::new()),
                    objects: Mutex::new(HashMap::new()),
                    pending: Mutex::new(HashMap::new()),
                    next_async_msg_id: AtomicU64::new(1),
                    next_unique_id: AtomicU64::new(
                        u64::from(options.worker_id) * UNIQUE_ID_STRIDE + 1,
                    ),
                    suppress_shared_object_emit: AtomicBool::new(false),
                    factory: options.factory,
                    on_object_shared: options.on_object_shared,
                    on_before_object_forgotten: options.on_before_object_forgotten,
                    on_message: options.on_message,
                    on_close: options.on_close,
                }),
            };
            if let Some(parent) = options.parent {
                // The spawning worker is by definition up; announce our own
                // readiness to it right away.
                router.register_peer(PARENT_WORKER_NAME.to_owned(), parent, true);
                router.post_to(PARENT_WORKER_NAME, ControlMessage::Ready.to_value(), Vec::new());
            }
            *slot = Some(router.clone());
            Ok(router)
        })
    }

    /// Returns this worker's router.
    pub fn instance() -> Result<Router, Error> {
        INSTANCE.with(|slot| slot.borrow().clone().ok_or(Error::NotInitialized))
    }

    /// Tears the thread-local singleton down; warns when none is installed.
    pub fn destroy() {
        let router = INSTANCE.with(|slot| slot.borrow_mut().take());
        match router {
            Some(router) => router.shutdown(),
            None => tracing::warn!("no router to destroy on this worker"),
        }
    }

    fn shutdown(&self) {
        let peers: Vec<Peer> = {
            let mut peers = self.inner.peers.lock().unwrap();
            peers.drain().map(|(_, peer)| peer).collect()
        };
        for peer in peers {
            peer.listener.abort();
        }
        let pending: Vec<PendingRequest> = {
            let mut pending = self.inner.pending.lock().unwrap();
            pending.drain().map(|(_, request)| request).collect()
        };
        for request in pending {
            let peer = request.peer.clone();
            let _ = request.response_tx.send(Err(Error::WorkerClosed(peer)));
        }
        self.inner.objects.lock().unwrap().clear();
    }

    /// This worker's id.
    pub fn worker_id(&self) -> u32 {
        self.inner.worker_id
    }

    /// This worker's name.
    pub fn worker_name(&self) -> &str {
        &self.inner.worker_name
    }

    pub(crate) fn downgrade(&self) -> WeakRouter {
        WeakRouter {
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Mints the next globally unique id.
    pub fn generate_unique_id(&self) -> u64 {
        self.inner.next_unique_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Registers a peer worker reachable over `endpoint` and starts
    /// listening to it.
    ///
    /// Sends queue until the peer announces itself with a `ready` message.
    pub fn register_worker(&self, name: impl Into<String>, endpoint: Endpoint) {
        self.register_peer(name.into(), endpoint, false);
    }

    fn register_peer(&self, name: String, endpoint: Endpoint, ready: bool) {
        let Some(receiver) = endpoint.take_receiver() else {
            tracing::warn!(peer = %name, "endpoint receiver already claimed, not registering");
            return;
        };
        let endpoint = Arc::new(endpoint);
        let gate = Arc::new(ReadyGate::new(ready));
        let listener = tokio::spawn(listen(self.clone(), name.clone(), receiver));
        let previous = self.inner.peers.lock().unwrap().insert(
            name.clone(),
            Peer {
                endpoint,
                ready: gate,
                listener,
            },
        );
        if let Some(previous) = previous {
            tracing::warn!(peer = %name, "replacing existing worker registration");
            previous.listener.abort();
        }
    }

    fn peer_channel(&self, name: &str) -> Result<(Arc<Endpoint>, Arc<ReadyGate>), Error> {
        let peers = self.inner.peers.lock().unwrap();
        let peer = peers
            .get(name)
            .ok_or_else(|| Error::UnknownWorker(name.to_owned()))?;
        Ok((Arc::clone(&peer.endpoint), Arc::clone(&peer.ready)))
    }

    /// Sends a message to `peer`, fire-and-forget.
    ///
    /// The post happens once the peer's ready gate resolves; failures after
    /// that point only log. Fails synchronously for unregistered peers.
    pub fn send(&self, peer: &str, body: Value, buffers: Vec<SharedBuffer>) -> Result<(), Error> {
        let (endpoint, gate) = self.peer_channel(peer)?;
        tokio::spawn(async move {
            gate.wait().await;
            endpoint.post(Packet::with_buffers(body, buffers));
        });
        Ok(())
    }

    /// Sends a message to `peer` and resolves with the peer's response.
    pub fn send_async(
        &self,
        peer: &str,
        body: Value,
        buffers: Vec<SharedBuffer>,
    ) -> impl Future<Output = Result<Value, Error>> + Send + use<> {
        self.send_async_with(peer, body, buffers, false)
    }

    /// Like [`send_async`](Self::send_async); with `skip_response_wait` the
    /// future resolves right after posting instead of awaiting the response.
    ///
    /// # Panics
    ///
    /// If `body` is not a JSON object; only objects can carry the
    /// correlation id.
    pub fn send_async_with(
        &self,
        peer: &str,
        mut body: Value,
        buffers: Vec<SharedBuffer>,
        skip_response_wait: bool,
    ) -> impl Future<Output = Result<Value, Error>> + Send + use<> {
        let staged = self.peer_channel(peer).map(|(endpoint, gate)| {
            let async_msg_id = self.inner.next_async_msg_id.fetch_add(1, Ordering::SeqCst);
            assert!(
                protocol::tag_async_msg_id(&mut body, async_msg_id),
                "async messages must be JSON objects",
            );
            let response_rx = (!skip_response_wait).then(|| {
                let (response_tx, response_rx) = oneshot::channel();
                self.inner.pending.lock().unwrap().insert(
                    async_msg_id,
                    PendingRequest {
                        peer: peer.to_owned(),
                        response_tx,
                    },
                );
                response_rx
            });
            (endpoint, gate, response_rx, body)
        });
        let peer = peer.to_owned();
        async move {
            let (endpoint, gate, response_rx, body) = staged?;
            gate.wait().await;
            endpoint.post(Packet::with_buffers(body, buffers));
            match response_rx {
                None => Ok(Value::Null),
                Some(response_rx) => match response_rx.await {
                    Ok(result) => result,
                    Err(_) => Err(Error::WorkerClosed(peer)),
                },
            }
        }
    }

    /// Shares `objects` with `peer`.
    ///
    /// Objects already tracked for a peer are skipped with a warning, since
    /// each object has exactly one peer. The returned future resolves once the
    /// peer confirmed; events emitted in the meantime are queued and drained
    /// on confirmation. The bookkeeping happens before this method returns,
    /// so emitting right after the call (without awaiting) is safe.
    pub fn share_objects(
        &self,
        peer: &str,
        objects: &[SharedObject],
    ) -> impl Future<Output = Result<(), Error>> + Send + use<> {
        let staged = self.stage_share(peer, objects);
        let this = self.clone();
        async move {
            let Some((to_share, request)) = staged? else {
                return Ok(());
            };
            request.await?;
            let mut drained = Vec::new();
            {
                let mut objects = this.inner.objects.lock().unwrap();
                for object in &to_share {
                    let Some(entry) = objects.get_mut(&object.id()) else {
                        // Forgotten while the share was in flight.
                        continue;
                    };
                    entry.share_confirmed = true;
                    if let Some(queue) = entry.emit_queue.take() {
                        drained.push((object.clone(), queue));
                    }
                }
            }
            for (object, queue) in drained {
                for (event, data) in queue {
                    this.shared_object_emit(&object, &event, &data);
                }
            }
            Ok(())
        }
    }

    /// The synchronous prologue of [`share_objects`](Self::share_objects).
    #[allow(clippy::type_complexity)]
    fn stage_share(
        &self,
        peer: &str,
        objects: &[SharedObject],
    ) -> Result<
        Option<(
            Vec<SharedObject>,
            impl Future<Output = Result<Value, Error>> + Send + use<>,
        )>,
        Error,
    > {
        let mut to_share = Vec::new();
        {
            let tracked = self.inner.objects.lock().unwrap();
            for object in objects {
                if tracked.contains_key(&object.id()) {
                    tracing::warn!(
                        object_id = object.id(),
                        "object is already shared, skipping",
                    );
                    continue;
                }
                to_share.push(object.clone());
            }
        }
        if to_share.is_empty() {
            return Ok(None);
        }
        // Extract every buffer before registering anything, so a destroyed
        // object aborts the call without leaving entries behind.
        let mut buffers = Vec::new();
        for object in &to_share {
            buffers.push(object.extract_buffer()?);
        }
        {
            let mut tracked = self.inner.objects.lock().unwrap();
            for object in &to_share {
                tracked.insert(
                    object.id(),
                    SharedEntry {
                        object: object.clone(),
                        peer: peer.to_owned(),
                        share_confirmed: false,
                        emit_queue: None,
                    },
                );
            }
        }
        let request = self.send_async(peer, ControlMessage::ShareObjects.to_value(), buffers);
        Ok(Some((to_share, request)))
    }

    /// Withdraws `objects` from their peers.
    ///
    /// Local instances stay intact; each affected peer receives one
    /// `forgetObjects` message and destroys its projections. Objects that
    /// were never shared log a warning.
    pub fn forget_objects(&self, objects: &[SharedObject]) {
        self.forget_ids(objects.iter().map(|object| object.id()), false);
    }

    /// Like [`forget_objects`](Self::forget_objects) without the warning for
    /// untracked objects.
    pub fn forget_objects_silent(&self, objects: &[SharedObject]) {
        self.forget_ids(objects.iter().map(|object| object.id()), true);
    }

    /// Silent forget used by shared-object teardown.
    pub(crate) fn forget_destroyed(&self, object: &SharedObject) {
        self.forget_ids(std::iter::once(object.id()), true);
    }

    fn forget_ids(&self, ids: impl Iterator<Item = u64>, silent: bool) {
        let mut by_peer: HashMap<String, Vec<u64>> = HashMap::new();
        {
            let mut tracked = self.inner.objects.lock().unwrap();
            for id in ids {
                match tracked.remove(&id) {
                    Some(entry) => by_peer.entry(entry.peer).or_default().push(id),
                    None => {
                        if !silent {
                            tracing::warn!(object_id = id, "cannot forget an object that was never shared");
                        }
                    }
                }
            }
        }
        for (peer, object_ids) in by_peer {
            let message = ControlMessage::ForgetObjects { object_ids }.to_value();
            if let Err(error) = self.send(&peer, message, Vec::new()) {
                tracing::warn!(%peer, %error, "could not notify peer of forgotten objects");
            }
        }
    }

    /// Looks a tracked shared object up by id.
    pub fn get_shared_object_by_id(&self, id: u64) -> Option<SharedObject> {
        self.inner
            .objects
            .lock()
            .unwrap()
            .get(&id)
            .map(|entry| entry.object.clone())
    }

    /// Asks `peer` to close, waiting [`DEFAULT_CLOSE_TIMEOUT`] for the
    /// acknowledgement.
    pub async fn close_worker(&self, peer: &str) -> Result<CloseOutcome, Error> {
        self.close_worker_with_timeout(peer, DEFAULT_CLOSE_TIMEOUT)
            .await
    }

    /// Asks `peer` to close.
    ///
    /// Returns [`CloseOutcome::Graceful`] when the peer acknowledges within
    /// `timeout`; otherwise terminates the peer's endpoint and returns
    /// [`CloseOutcome::Forced`]. Either way the peer is removed from the
    /// registry and its in-flight requests are rejected with
    /// [`Error::WorkerClosed`].
    pub async fn close_worker_with_timeout(
        &self,
        peer: &str,
        timeout: Duration,
    ) -> Result<CloseOutcome, Error> {
        let request = self.send_async(peer, ControlMessage::Close.to_value(), Vec::new());
        let outcome = match tokio::time::timeout(timeout, request).await {
            Ok(Ok(_)) => CloseOutcome::Graceful,
            Ok(Err(Error::UnknownWorker(name))) => return Err(Error::UnknownWorker(name)),
            Ok(Err(error)) => {
                tracing::warn!(%peer, %error, "close request failed, terminating worker");
                self.terminate_peer(peer);
                CloseOutcome::Forced
            }
            Err(_) => {
                tracing::warn!(
                    %peer,
                    timeout_ms = timeout.as_millis() as u64,
                    "worker did not acknowledge close in time, terminating",
                );
                self.terminate_peer(peer);
                CloseOutcome::Forced
            }
        };
        self.remove_peer(peer);
        Ok(outcome)
    }

    fn terminate_peer(&self, name: &str) {
        if let Some(peer) = self.inner.peers.lock().unwrap().get(name) {
            peer.endpoint.terminate();
        }
    }

    fn remove_peer(&self, name: &str) {
        if let Some(peer) = self.inner.peers.lock().unwrap().remove(name) {
            peer.listener.abort();
        }
        let rejected: Vec<PendingRequest> = {
            let mut pending = self.inner.pending.lock().unwrap();
            let ids: Vec<u64> = pending
                .iter()
                .filter(|(_, request)| request.peer == name)
                .map(|(id, _)| *id)
                .collect();
            ids.into_iter()
                .filter_map(|id| pending.remove(&id))
                .collect()
        };
        for request in rejected {
            let _ = request
                .response_tx
                .send(Err(Error::WorkerClosed(name.to_owned())));
        }
    }

    /// Routes an event emitted on `object` to its peer.
    ///
    /// Consumes the suppression latch set while an inbound remote emit is
    /// being delivered, so that emit's automatic forwarding does not echo
    /// back to its sender while emits issued by listeners still go out.
    pub(crate) fn shared_object_emit(&self, object: &SharedObject, event: &str, data: &Value) {
        if self
            .inner
            .suppress_shared_object_emit
            .swap(false, Ordering::SeqCst)
        {
            return;
        }
        let peer = {
            let mut tracked = self.inner.objects.lock().unwrap();
            let Some(entry) = tracked.get_mut(&object.id()) else {
                // Never shared; nothing to route.
                return;
            };
            if !entry.share_confirmed {
                entry
                    .emit_queue
                    .get_or_insert_with(Vec::new)
                    .push((event.to_owned(), data.clone()));
                return;
            }
            entry.peer.clone()
        };
        let message = ControlMessage::SharedObjectEmit {
            shared_object_id: object.id(),
            event_name: event.to_owned(),
            data: data.clone(),
        }
        .to_value();
        if let Err(error) = self.send(&peer, message, Vec::new()) {
            tracing::warn!(%peer, %error, "could not forward shared-object emit");
        }
    }

    fn post_to(&self, peer: &str, body: Value, buffers: Vec<SharedBuffer>) {
        let endpoint = {
            let peers = self.inner.peers.lock().unwrap();
            peers.get(peer).map(|peer| Arc::clone(&peer.endpoint))
        };
        match endpoint {
            Some(endpoint) => endpoint.post(Packet::with_buffers(body, buffers)),
            None => tracing::warn!(%peer, "cannot post to unregistered worker"),
        }
    }

    async fn dispatch(&self, peer: &str, packet: Packet) {
        let async_msg_id = protocol::async_msg_id(&packet.body);
        let control = match protocol::parse_control(&packet.body) {
            Ok(control) => control,
            Err(error) => {
                tracing::warn!(%peer, %error, "dropping malformed control message");
                return;
            }
        };

        let result = match control {
            Some(ControlMessage::Ready) => {
                self.handle_ready(peer);
                return;
            }
            Some(ControlMessage::Response {
                async_msg_id,
                error,
                data,
            }) => {
                self.handle_response(async_msg_id, error, data);
                return;
            }
            Some(ControlMessage::Close) => {
                // Acknowledge before tearing down so the peer sees a
                // graceful close.
                if let Some(async_msg_id) = async_msg_id {
                    self.post_to(
                        peer,
                        ControlMessage::response_ok(async_msg_id, Value::Null).to_value(),
                        Vec::new(),
                    );
                }
                match &self.inner.on_close {
                    Some(hook) => hook(),
                    None => tracing::warn!(%peer, "close requested but no close handler installed"),
                }
                return;
            }
            Some(ControlMessage::ShareObjects) => self.handle_share_objects(peer, packet.buffers),
            Some(ControlMessage::ForgetObjects { object_ids }) => {
                self.handle_forget_objects(&object_ids);
                Ok(Value::Null)
            }
            Some(ControlMessage::SharedObjectEmit {
                shared_object_id,
                event_name,
                data,
            }) => {
                self.handle_shared_object_emit(shared_object_id, &event_name, data);
                Ok(Value::Null)
            }
            None => self.handle_user_message(packet).await,
        };

        match (async_msg_id, result) {
            (Some(async_msg_id), Ok(data)) => self.post_to(
                peer,
                ControlMessage::response_ok(async_msg_id, data).to_value(),
                Vec::new(),
            ),
            (Some(async_msg_id), Err(message)) => self.post_to(
                peer,
                ControlMessage::response_err(async_msg_id, message).to_value(),
                Vec::new(),
            ),
            (None, Ok(_)) => {}
            (None, Err(message)) => {
                tracing::error!(%peer, %message, "handler failed for an uncorrelated message");
            }
        }
    }

    fn handle_ready(&self, peer: &str) {
        let peers = self.inner.peers.lock().unwrap();
        match peers.get(peer) {
            Some(entry) => entry.ready.resolve(),
            None => tracing::warn!(%peer, "ready from unregistered worker"),
        }
    }

    fn handle_response(&self, async_msg_id: u64, error: bool, data: Value) {
        let pending = self.inner.pending.lock().unwrap().remove(&async_msg_id);
        match pending {
            Some(request) => {
                let result = if error {
                    let message = data
                        .as_str()
                        .map(str::to_owned)
                        .unwrap_or_else(|| data.to_string());
                    Err(Error::Remote { message })
                } else {
                    Ok(data)
                };
                let _ = request.response_tx.send(result);
            }
            None => tracing::error!("{}", Error::UnknownAsyncResponse(async_msg_id)),
        }
    }

    fn handle_share_objects(
        &self,
        peer: &str,
        buffers: Vec<SharedBuffer>,
    ) -> Result<Value, String> {
        let mut shared = Vec::new();
        for buffer in buffers {
            let type_tag = type_id::decode(BufferStruct::extract_type_id(&buffer));
            let object = self
                .inner
                .factory
                .as_ref()
                .and_then(|factory| factory(buffer))
                .ok_or_else(|| {
                    Error::FactoryFailure {
                        type_tag: type_tag.clone(),
                    }
                    .to_string()
                })?;
            self.inner.objects.lock().unwrap().insert(
                object.id(),
                SharedEntry {
                    object: object.clone(),
                    peer: peer.to_owned(),
                    share_confirmed: true,
                    emit_queue: None,
                },
            );
            shared.push(object);
        }
        if let Some(hook) = &self.inner.on_object_shared {
            for object in &shared {
                hook(object);
            }
        }
        Ok(Value::Null)
    }

    fn handle_forget_objects(&self, object_ids: &[u64]) {
        for &id in object_ids {
            // Ids we never tracked are silently ignored.
            let object = {
                let tracked = self.inner.objects.lock().unwrap();
                tracked.get(&id).map(|entry| entry.object.clone())
            };
            let Some(object) = object else {
                continue;
            };
            if let Some(hook) = &self.inner.on_before_object_forgotten {
                hook(&object);
            }
            self.inner.objects.lock().unwrap().remove(&id);
            object.destroy();
        }
    }

    fn handle_shared_object_emit(&self, shared_object_id: u64, event_name: &str, data: Value) {
        let object = self
            .inner
            .objects
            .lock()
            .unwrap()
            .get(&shared_object_id)
            .map(|entry| entry.object.clone());
        let Some(object) = object else {
            // The object may have been forgotten while the emit was in
            // flight.
            return;
        };
        self.inner
            .suppress_shared_object_emit
            .store(true, Ordering::SeqCst);
        object.emit(event_name, data);
        self.inner
            .suppress_shared_object_emit
            .store(false, Ordering::SeqCst);
    }

    async fn handle_user_message(&self, packet: Packet) -> Result<Value, String> {
        match &self.inner.on_message {
            Some(hook) => hook(packet).await.map_err(|error| error.to_string()),
            None => {
                tracing::warn!("message received but no message handler installed");
                Ok(Value::Null)
            }
        }
    }
}

async fn listen(router: Router, peer: String, mut receiver: mpsc::UnboundedReceiver<Packet>) {
    while let Some(packet) = receiver.recv().await {
        router.dispatch(&peer, packet).await;
    }
}

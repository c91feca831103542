//! Shared objects: per-worker projections over a typed shared buffer.
//!
//! A [`SharedObject`] owns one [`BufferStruct`] view and keeps an in-worker
//! cache of every property (`cur_props`). Setters update the cache, record
//! the property in a mutation set and schedule a mutation cycle; the cycle
//! reconciles peer writes with staged local writes under the buffer lock and
//! then parks exactly one asynchronous wait on the notify word. When the
//! peer bumps the notify word the wait resolves and the cycle runs again,
//! forming a perpetual "react to peer, flush local, wait again" loop with
//! eventually-consistent, last-writer-wins semantics.
//!
//! Handles are cheap to clone; all clones refer to the same object.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use weft_buffer::{BufferStruct, MAX_STRING_LEN, PropKind, PropertyLayout, StructLayout, Value};
use weft_shm::{SharedBuffer, WaitOutcome};

use crate::error::Error;
use crate::router::{Router, WeakRouter};

/// Event name emitted synchronously when destruction begins.
pub const EVENT_BEFORE_DESTROY: &str = "beforeDestroy";

/// Event name emitted locally once destruction finished.
pub const EVENT_AFTER_DESTROY: &str = "afterDestroy";

/// Identifies a registered event listener for [`SharedObject::off`].
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&SharedObject, &serde_json::Value) + Send + Sync>;
type PropertyChangeHook = Arc<dyn Fn(&SharedObject, &str, &Value, &Value) + Send + Sync>;
type DestroyHook = Arc<dyn Fn(&SharedObject) + Send + Sync>;

#[derive(Clone)]
struct ListenerEntry {
    id: ListenerId,
    once: bool,
    callback: Listener,
}

struct ObjectInner {
    layout: &'static StructLayout,
    id: u64,
    worker_id: u32,
    router: WeakRouter,
    /// The owned buffer view; cleared when destruction finishes.
    buffer: Mutex<Option<BufferStruct>>,
    /// The in-worker truth for every property, indexed by prop number.
    cur_props: Mutex<Vec<Value>>,
    /// Prop numbers with staged local writes.
    mutations: Mutex<BTreeSet<u32>>,
    initialized: AtomicBool,
    destroying: AtomicBool,
    destroyed: AtomicBool,
    mutations_queued: AtomicBool,
    /// Bumped to invalidate the outstanding notify wait.
    wait_epoch: AtomicU64,
    listeners: Mutex<HashMap<String, Vec<ListenerEntry>>>,
    next_listener_id: AtomicU64,
    on_property_change: Mutex<Option<PropertyChangeHook>>,
    on_destroy: Mutex<Option<DestroyHook>>,
}

/// A per-worker projection over a shared buffer.
#[derive(Clone)]
pub struct SharedObject {
    inner: Arc<ObjectInner>,
}

impl fmt::Debug for SharedObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedObject")
            .field("id", &self.inner.id)
            .field("type_tag", &self.inner.layout.type_tag())
            .field("destroyed", &self.is_destroyed())
            .finish()
    }
}

impl SharedObject {
    /// Creates a new shared object backed by a fresh buffer.
    ///
    /// Properties missing from `initial` start at their kind's default (0,
    /// `false`, the empty string, or `Undefined` for nullable properties).
    /// Must be called from within the worker's async runtime.
    ///
    /// # Panics
    ///
    /// On unknown property names or kind mismatches in `initial`.
    pub fn new(router: &Router, layout: &'static StructLayout, initial: &[(&str, Value)]) -> Self {
        let buffer_struct = BufferStruct::create(layout, router.generate_unique_id());

        let mut cur_props: Vec<Value> = layout.properties().iter().map(default_value).collect();
        for (name, value) in initial {
            let property = lookup(layout, name);
            ensure_kind(layout, property, value);
            cur_props[property.prop_num as usize] = clamp_string(property, value.clone());
        }
        // Stage every property so the first cycle writes the snapshot out.
        let mutations = layout
            .properties()
            .iter()
            .map(|property| property.prop_num)
            .collect();

        let object = Self::from_parts(router, layout, buffer_struct, cur_props, mutations);
        {
            // No peer holds a view yet, so the lock is not needed.
            let guard = object.inner.buffer.lock().unwrap();
            let buffer_struct = guard.as_ref().expect("fresh object has a buffer");
            let wait = object.execute_mutations(buffer_struct);
            drop(guard);
            object.spawn_wait_handler(wait);
        }
        object.inner.initialized.store(true, Ordering::SeqCst);
        object
    }

    /// Builds the local projection over a buffer received from a peer.
    ///
    /// This is the factory path: the buffer already carries the peer's
    /// snapshot, which becomes the initial `cur_props`. Must be called from
    /// within the worker's async runtime.
    pub fn adopt(
        router: &Router,
        layout: &'static StructLayout,
        buffer: SharedBuffer,
    ) -> Result<Self, Error> {
        let buffer_struct = BufferStruct::open(layout, buffer)?;
        let cur_props = vec![Value::Undefined; layout.properties().len()];
        let object = Self::from_parts(router, layout, buffer_struct, cur_props, BTreeSet::new());
        {
            let guard = object.inner.buffer.lock().unwrap();
            let buffer_struct = guard.as_ref().expect("fresh object has a buffer");
            let wait = buffer_struct.lock(|| {
                {
                    let mut cur_props = object.inner.cur_props.lock().unwrap();
                    for property in layout.properties() {
                        cur_props[property.prop_num as usize] = buffer_struct.get(property);
                    }
                }
                object.execute_mutations(buffer_struct)
            });
            drop(guard);
            object.spawn_wait_handler(wait);
        }
        object.inner.initialized.store(true, Ordering::SeqCst);
        Ok(object)
    }

    fn from_parts(
        router: &Router,
        layout: &'static StructLayout,
        buffer_struct: BufferStruct,
        cur_props: Vec<Value>,
        mutations: BTreeSet<u32>,
    ) -> Self {
        Self {
            inner: Arc::new(ObjectInner {
                layout,
                id: buffer_struct.unique_id(),
                worker_id: router.worker_id(),
                router: router.downgrade(),
                buffer: Mutex::new(Some(buffer_struct)),
                cur_props: Mutex::new(cur_props),
                mutations: Mutex::new(mutations),
                initialized: AtomicBool::new(false),
                destroying: AtomicBool::new(false),
                destroyed: AtomicBool::new(false),
                mutations_queued: AtomicBool::new(false),
                wait_epoch: AtomicU64::new(0),
                listeners: Mutex::new(HashMap::new()),
                next_listener_id: AtomicU64::new(1),
                on_property_change: Mutex::new(None),
                on_destroy: Mutex::new(None),
            }),
        }
    }

    /// The object's unique id.
    pub fn id(&self) -> u64 {
        self.inner.id
    }

    /// The packed type id of the object's struct type.
    pub fn type_id(&self) -> u32 {
        self.inner.layout.type_id()
    }

    /// The tag of the object's struct type.
    pub fn type_tag(&self) -> &'static str {
        self.inner.layout.type_tag()
    }

    /// The object's struct layout.
    pub fn layout(&self) -> &'static StructLayout {
        self.inner.layout
    }

    /// Whether destruction has completed.
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.load(Ordering::SeqCst)
    }

    /// Returns the underlying shared buffer for transfer to a peer.
    pub fn extract_buffer(&self) -> Result<SharedBuffer, Error> {
        self.inner
            .buffer
            .lock()
            .unwrap()
            .as_ref()
            .map(|buffer_struct| buffer_struct.buffer().clone())
            .ok_or(Error::UseAfterDestroy)
    }

    /// Reads a property from the in-worker cache.
    ///
    /// # Panics
    ///
    /// On unknown property names.
    pub fn get(&self, name: &str) -> Value {
        let property = lookup(self.inner.layout, name);
        self.inner.cur_props.lock().unwrap()[property.prop_num as usize].clone()
    }

    /// Writes a property to the in-worker cache, stages it for the next
    /// mutation cycle and schedules one.
    ///
    /// # Panics
    ///
    /// On unknown property names or kind mismatches.
    pub fn set(&self, name: &str, value: impl Into<Value>) {
        let value = value.into();
        let property = lookup(self.inner.layout, name);
        ensure_kind(self.inner.layout, property, &value);
        let value = clamp_string(property, value);

        self.inner.cur_props.lock().unwrap()[property.prop_num as usize] = value;
        self.inner.mutations.lock().unwrap().insert(property.prop_num);
        self.queue_mutations();
    }

    /// Installs the hook fired when a peer write is observed.
    ///
    /// The hook receives `(object, name, new_value, old_value)`. It is never
    /// fired during initialization nor for purely local writes.
    pub fn set_on_property_change(
        &self,
        hook: impl Fn(&SharedObject, &str, &Value, &Value) + Send + Sync + 'static,
    ) {
        *self.inner.on_property_change.lock().unwrap() = Some(Arc::new(hook));
    }

    /// Installs the hook fired when destruction begins, after the
    /// `beforeDestroy` event.
    pub fn set_on_destroy(&self, hook: impl Fn(&SharedObject) + Send + Sync + 'static) {
        *self.inner.on_destroy.lock().unwrap() = Some(Arc::new(hook));
    }

    /// Registers a listener for `event`.
    pub fn on(
        &self,
        event: impl Into<String>,
        listener: impl Fn(&SharedObject, &serde_json::Value) + Send + Sync + 'static,
    ) -> ListenerId {
        self.add_listener(event.into(), false, Arc::new(listener))
    }

    /// Registers a listener for `event` that removes itself before its first
    /// invocation.
    pub fn once(
        &self,
        event: impl Into<String>,
        listener: impl Fn(&SharedObject, &serde_json::Value) + Send + Sync + 'static,
    ) -> ListenerId {
        self.add_listener(event.into(), true, Arc::new(listener))
    }

    fn add_listener(&self, event: String, once: bool, callback: Listener) -> ListenerId {
        let id = ListenerId(self.inner.next_listener_id.fetch_add(1, Ordering::SeqCst));
        self.inner
            .listeners
            .lock()
            .unwrap()
            .entry(event)
            .or_default()
            .push(ListenerEntry { id, once, callback });
        id
    }

    /// Removes a listener previously registered with [`on`](Self::on) or
    /// [`once`](Self::once).
    pub fn off(&self, event: &str, id: ListenerId) {
        if let Some(entries) = self.inner.listeners.lock().unwrap().get_mut(event) {
            entries.retain(|entry| entry.id != id);
        }
    }

    /// Emits `event` to the peer (unless the router is currently delivering
    /// a remote emit) and then to local listeners in registration order.
    pub fn emit(&self, event: &str, data: serde_json::Value) {
        if let Some(router) = self.inner.router.upgrade() {
            router.shared_object_emit(self, event, &data);
        }
        self.dispatch_local(event, &data);
    }

    /// Emits `event` to local listeners only.
    pub fn emit_local(&self, event: &str, data: serde_json::Value) {
        self.dispatch_local(event, &data);
    }

    fn dispatch_local(&self, event: &str, data: &serde_json::Value) {
        let entries: Vec<ListenerEntry> = {
            let mut listeners = self.inner.listeners.lock().unwrap();
            let Some(entries) = listeners.get_mut(event) else {
                return;
            };
            let snapshot = entries.clone();
            // `once` listeners remove themselves before being invoked.
            entries.retain(|entry| !entry.once);
            snapshot
        };
        for entry in entries {
            (entry.callback)(self, data);
        }
    }

    /// Runs one mutation cycle synchronously, draining staged writes under
    /// the blocking lock.
    pub fn flush(&self) {
        let Some(buffer_struct) = self.buffer_struct() else {
            return;
        };
        let wait = buffer_struct.lock(|| self.execute_mutations(&buffer_struct));
        self.spawn_wait_handler(wait);
    }

    /// Begins destruction. Idempotent.
    ///
    /// Emits `beforeDestroy` synchronously, runs the destroy hook and queues
    /// one final mutation cycle that flushes outstanding writes before
    /// teardown completes.
    pub fn destroy(&self) {
        if self.inner.destroying.load(Ordering::SeqCst) {
            return;
        }
        self.emit_local(EVENT_BEFORE_DESTROY, serde_json::Value::Null);
        self.inner.destroying.store(true, Ordering::SeqCst);
        let hook = self.inner.on_destroy.lock().unwrap().clone();
        if let Some(hook) = hook {
            hook(self);
        }
        self.queue_mutations();
    }

    fn finish_destroy(&self) {
        if self.inner.destroyed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.wait_epoch.fetch_add(1, Ordering::SeqCst);
        if let Some(router) = self.inner.router.upgrade() {
            router.forget_destroyed(self);
        }
        let buffer_struct = self.inner.buffer.lock().unwrap().take();
        if let Some(buffer_struct) = buffer_struct {
            // One last wake so a peer parked on the notify word observes the
            // departure instead of waiting forever.
            buffer_struct.notify(None);
        }
        self.emit_local(EVENT_AFTER_DESTROY, serde_json::Value::Null);
        self.inner.listeners.lock().unwrap().clear();
    }

    fn buffer_struct(&self) -> Option<BufferStruct> {
        self.inner.buffer.lock().unwrap().clone()
    }

    /// Schedules a mutation cycle on the worker's runtime. Idempotent while
    /// one is already queued.
    fn queue_mutations(&self) {
        if self.inner.mutations_queued.swap(true, Ordering::SeqCst) {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            this.inner.mutations_queued.store(false, Ordering::SeqCst);
            this.mutation_microtask().await;
        });
    }

    async fn mutation_microtask(&self) {
        let Some(buffer_struct) = self.buffer_struct() else {
            return;
        };
        let wait = buffer_struct
            .lock_async(|| self.execute_mutations(&buffer_struct))
            .await;
        if self.inner.destroying.load(Ordering::SeqCst) {
            self.finish_destroy();
        }
        self.spawn_wait_handler(wait);
    }

    /// The reconciliation step. The caller holds the buffer lock, except
    /// during construction before any peer holds a view.
    fn execute_mutations(
        &self,
        buffer_struct: &BufferStruct,
    ) -> (u64, impl Future<Output = WaitOutcome> + Send + use<>) {
        // Adopt peer writes first; our own writes are recognizable by the
        // notify word still holding our worker id.
        if buffer_struct.notify_value() != self.inner.worker_id && buffer_struct.is_dirty() {
            self.process_dirty_properties(buffer_struct);
            buffer_struct.reset_dirty();
        }

        let staged: Vec<u32> = {
            let mut mutations = self.inner.mutations.lock().unwrap();
            let staged = mutations.iter().copied().collect();
            mutations.clear();
            staged
        };
        let mut wrote = false;
        {
            let cur_props = self.inner.cur_props.lock().unwrap();
            for prop_num in staged {
                let property = &self.inner.layout.properties()[prop_num as usize];
                wrote |= buffer_struct.set(property, &cur_props[prop_num as usize]);
            }
        }

        // Invalidate the previous wait before arming the next one.
        let epoch = self.inner.wait_epoch.fetch_add(1, Ordering::SeqCst) + 1;
        let expected = if wrote {
            buffer_struct.notify(Some(self.inner.worker_id));
            self.inner.worker_id
        } else {
            buffer_struct.notify_value()
        };
        (epoch, buffer_struct.wait_async(expected, None))
    }

    fn process_dirty_properties(&self, buffer_struct: &BufferStruct) {
        let mut changes = Vec::new();
        {
            let mut cur_props = self.inner.cur_props.lock().unwrap();
            let mut mutations = self.inner.mutations.lock().unwrap();
            for property in self.inner.layout.properties() {
                if !buffer_struct.is_dirty_prop(property.prop_num) {
                    continue;
                }
                let new_value = buffer_struct.get(property);
                let old_value = std::mem::replace(
                    &mut cur_props[property.prop_num as usize],
                    new_value.clone(),
                );
                // The peer's write wins over anything staged locally.
                mutations.remove(&property.prop_num);
                changes.push((property.name, new_value, old_value));
            }
        }

        if !self.inner.initialized.load(Ordering::SeqCst) {
            return;
        }
        let hook = self.inner.on_property_change.lock().unwrap().clone();
        if let Some(hook) = hook {
            for (name, new_value, old_value) in &changes {
                hook(self, name, new_value, old_value);
            }
        }
    }

    fn spawn_wait_handler(
        &self,
        (epoch, wait): (u64, impl Future<Output = WaitOutcome> + Send + 'static),
    ) {
        let this = self.clone();
        tokio::spawn(async move {
            let outcome = wait.await;
            if this.inner.wait_epoch.load(Ordering::SeqCst) != epoch || this.is_destroyed() {
                return;
            }
            assert_eq!(
                outcome,
                WaitOutcome::Woken,
                "an unbounded notify wait can only end woken",
            );
            this.mutation_microtask().await;
        });
    }
}

fn lookup<'a>(layout: &'a StructLayout, name: &str) -> &'a PropertyLayout {
    layout
        .property(name)
        .unwrap_or_else(|| panic!("unknown property {name:?} on {:?}", layout.type_tag()))
}

fn ensure_kind(layout: &StructLayout, property: &PropertyLayout, value: &Value) {
    match value.kind() {
        None => assert!(
            property.allow_undefined,
            "property {:?} of {:?} cannot be undefined",
            property.name,
            layout.type_tag(),
        ),
        Some(kind) => assert!(
            kind == property.kind,
            "property {:?} of {:?} expects {:?}, got {value:?}",
            property.name,
            layout.type_tag(),
            property.kind,
        ),
    }
}

/// Truncates over-long strings at the setter so the cache and the buffer
/// converge on the same stored value.
fn clamp_string(property: &PropertyLayout, value: Value) -> Value {
    if property.kind != PropKind::String {
        return value;
    }
    let Value::String(text) = &value else {
        return value;
    };
    let units: Vec<u16> = text.encode_utf16().collect();
    if units.len() <= MAX_STRING_LEN {
        return value;
    }
    tracing::warn!(
        property = property.name,
        length = units.len(),
        "string value exceeds {MAX_STRING_LEN} code units, truncating",
    );
    Value::String(String::from_utf16_lossy(&units[..MAX_STRING_LEN]))
}

fn default_value(property: &PropertyLayout) -> Value {
    if property.allow_undefined {
        return Value::Undefined;
    }
    match property.kind {
        PropKind::Number => Value::Number(0.0),
        PropKind::Int32 => Value::Int32(0),
        PropKind::Boolean => Value::Bool(false),
        PropKind::String => Value::String(String::new()),
    }
}

#[cfg(test)]
#[cfg_attr(coverage_nightly, coverage(off))]
mod tests {
    use std::sync::LazyLock;
    use std::time::Duration;

    use weft_buffer::PropertySpec;

    use super::*;
    use crate::router::RouterOptions;

    static ITEM_LAYOUT: LazyLock<StructLayout> = LazyLock::new(|| {
        StructLayout::compute(
            "ITEM",
            &[
                PropertySpec::number("score"),
                PropertySpec::string("name"),
                PropertySpec::boolean("done"),
                PropertySpec::number("extra").nullable(),
            ],
        )
        .unwrap()
    });

    fn router() -> Router {
        Router::init(RouterOptions::new(1, "test")).unwrap()
    }

    #[tokio::test]
    async fn fresh_objects_start_from_the_initial_snapshot() {
        let router = router();
        let item = SharedObject::new(
            &router,
            &ITEM_LAYOUT,
            &[("score", 7.5.into()), ("name", "seven".into())],
        );
        assert_eq!(item.get("score"), Value::Number(7.5));
        assert_eq!(item.get("name"), Value::String("seven".into()));
        assert_eq!(item.get("done"), Value::Bool(false));
        assert_eq!(item.get("extra"), Value::Undefined);
        assert_eq!(item.type_tag(), "ITEM");
        assert!(!item.is_destroyed());
    }

    #[tokio::test]
    async fn ids_come_from_the_router_generator() {
        let router = router();
        let first = SharedObject::new(&router, &ITEM_LAYOUT, &[]);
        let second = SharedObject::new(&router, &ITEM_LAYOUT, &[]);
        assert_eq!(second.id(), first.id() + 1);
    }

    #[tokio::test]
    async fn adopt_projects_the_shared_buffer() {
        let router = router();
        let original = SharedObject::new(&router, &ITEM_LAYOUT, &[("score", 3.0.into())]);
        original.flush();
        let copy =
            SharedObject::adopt(&router, &ITEM_LAYOUT, original.extract_buffer().unwrap())
                .unwrap();
        assert_eq!(copy.id(), original.id());
        assert_eq!(copy.get("score"), Value::Number(3.0));
        assert_eq!(copy.get("extra"), Value::Undefined);
    }

    #[tokio::test]
    async fn listeners_fire_in_registration_order_and_once_self_removes() {
        let router = router();
        let item = SharedObject::new(&router, &ITEM_LAYOUT, &[]);

        let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        {
            let order = Arc::clone(&order);
            item.on("tick", move |_object, _data| order.lock().unwrap().push("first"));
        }
        {
            let order = Arc::clone(&order);
            item.once("tick", move |_object, _data| order.lock().unwrap().push("second"));
        }

        item.emit_local("tick", serde_json::Value::Null);
        item.emit_local("tick", serde_json::Value::Null);
        assert_eq!(*order.lock().unwrap(), vec!["first", "second", "first"]);
    }

    #[tokio::test]
    async fn off_removes_a_listener() {
        let router = router();
        let item = SharedObject::new(&router, &ITEM_LAYOUT, &[]);
        let count = Arc::new(Mutex::new(0_u32));
        let id = {
            let count = Arc::clone(&count);
            item.on("tick", move |_object, _data| *count.lock().unwrap() += 1)
        };
        item.emit_local("tick", serde_json::Value::Null);
        item.off("tick", id);
        item.emit_local("tick", serde_json::Value::Null);
        assert_eq!(*count.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn destroy_runs_the_full_teardown() {
        let router = router();
        let item = SharedObject::new(&router, &ITEM_LAYOUT, &[]);

        let events: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
        {
            let events = Arc::clone(&events);
            item.on(EVENT_BEFORE_DESTROY, move |_object, _data| {
                events.lock().unwrap().push("before")
            });
        }
        {
            let events = Arc::clone(&events);
            item.on(EVENT_AFTER_DESTROY, move |_object, _data| {
                events.lock().unwrap().push("after")
            });
        }
        {
            let events = Arc::clone(&events);
            item.set_on_destroy(move |_object| events.lock().unwrap().push("hook"));
        }

        item.destroy();
        // `beforeDestroy` and the hook are synchronous; teardown completes
        // with the queued final cycle.
        assert_eq!(*events.lock().unwrap(), vec!["before", "hook"]);
        assert!(!item.is_destroyed());

        tokio::time::timeout(Duration::from_secs(2), async {
            while !item.is_destroyed() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("destruction never finished");

        assert_eq!(*events.lock().unwrap(), vec!["before", "hook", "after"]);
        assert!(matches!(
            item.extract_buffer(),
            Err(Error::UseAfterDestroy)
        ));

        // Idempotent: a second destroy changes nothing.
        item.destroy();
        assert_eq!(*events.lock().unwrap(), vec!["before", "hook", "after"]);
    }

    #[tokio::test]
    #[should_panic(expected = "unknown property")]
    async fn unknown_properties_panic() {
        let router = router();
        let item = SharedObject::new(&router, &ITEM_LAYOUT, &[]);
        item.get("missing");
    }

    #[tokio::test]
    #[should_panic(expected = "expects")]
    async fn kind_mismatches_panic() {
        let router = router();
        let item = SharedObject::new(&router, &ITEM_LAYOUT, &[]);
        item.set("score", true);
    }

    #[tokio::test]
    async fn undefined_round_trips_through_nullable_properties() {
        let router = router();
        let item = SharedObject::new(&router, &ITEM_LAYOUT, &[("extra", 1.0.into())]);
        assert_eq!(item.get("extra"), Value::Number(1.0));
        item.set("extra", Value::Undefined);
        item.flush();
        assert_eq!(item.get("extra"), Value::Undefined);
    }
}

//! The typed view over a shared buffer.

use std::future::Future;
use std::time::Duration;

use rand::Rng as _;
use weft_shm::{SharedBuffer, WaitOutcome};

use crate::schema::{HEADER_BYTES, MAX_STRING_LEN, PropKind, PropertyLayout, StructLayout};
use crate::{BufferError, Value};

// Header word indexes (32-bit).
const WORD_TYPE_ID: usize = 0;
const WORD_NOTIFY: usize = 1;
const WORD_LOCK: usize = 2;
// Word 3 is padding for 64-bit alignment of the unique id.
const BYTE_UNIQUE_ID: usize = 16;
const WORD_DIRTY: [usize; 2] = [6, 7];
const WORD_UNDEFINED: [usize; 2] = [8, 9];

/// How many failed acquisition attempts to spin through before parking on the
/// lock word.
const LOCK_SPIN_LIMIT: u32 = 64;

/// A typed view over a shared buffer.
///
/// Every view carries its own random lock holder id, so distinct views over
/// the same buffer (one per worker) contend for the lock word as distinct
/// holders. Cloning a view shares the holder id; clones are the same logical
/// view.
///
/// All property mutation methods require the caller to hold the lock; the
/// exceptions are construction (no peer can hold a view yet) and the header
/// words, which have their own atomic protocols.
#[derive(Clone, Debug)]
pub struct BufferStruct {
    layout: &'static StructLayout,
    buffer: SharedBuffer,
    lock_id: u32,
}

impl BufferStruct {
    /// Allocates a fresh buffer for `layout`, stamps the type id and
    /// `unique_id`, and marks every nullable property undefined.
    pub fn create(layout: &'static StructLayout, unique_id: u64) -> Self {
        let buffer = SharedBuffer::new(layout.byte_len());
        buffer.store(WORD_TYPE_ID, layout.type_id());
        buffer.write_f64(BYTE_UNIQUE_ID, unique_id as f64);
        let this = Self {
            layout,
            buffer,
            lock_id: random_lock_id(),
        };
        for property in layout.properties() {
            if property.allow_undefined {
                this.set_undefined_bit(property.prop_num, true);
            }
        }
        this
    }

    /// Builds a view over an existing buffer, validating its header against
    /// `layout`.
    pub fn open(layout: &'static StructLayout, buffer: SharedBuffer) -> Result<Self, BufferError> {
        let actual = Self::extract_type_id(&buffer);
        if actual != layout.type_id() {
            return Err(BufferError::TypeIdMismatch {
                expected: layout.type_id(),
                actual,
            });
        }
        Ok(Self {
            layout,
            buffer,
            lock_id: random_lock_id(),
        })
    }

    /// Reads the type id word out of a raw buffer.
    ///
    /// Returns 0 (never a valid type id) when the buffer is shorter than the
    /// header or not sized in multiples of 8 bytes. The returned word is not
    /// validated; see [`crate::type_id::is_valid`].
    pub fn extract_type_id(buffer: &SharedBuffer) -> u32 {
        if buffer.byte_len() < HEADER_BYTES || buffer.byte_len() % 8 != 0 {
            return 0;
        }
        buffer.load(WORD_TYPE_ID)
    }

    /// The layout this view projects.
    pub fn layout(&self) -> &'static StructLayout {
        self.layout
    }

    /// The type id stamped into the buffer header.
    pub fn type_id(&self) -> u32 {
        self.buffer.load(WORD_TYPE_ID)
    }

    /// The unique id assigned at creation.
    pub fn unique_id(&self) -> u64 {
        self.buffer.read_f64(BYTE_UNIQUE_ID) as u64
    }

    /// The underlying shared buffer.
    pub fn buffer(&self) -> &SharedBuffer {
        &self.buffer
    }

    /// Reads a property value.
    pub fn get(&self, property: &PropertyLayout) -> Value {
        if property.allow_undefined && self.is_undefined(property.prop_num) {
            return Value::Undefined;
        }
        match property.kind {
            PropKind::Number => Value::Number(self.buffer.read_f64(property.byte_offset)),
            PropKind::Int32 => Value::Int32(self.buffer.read_u32(property.byte_offset) as i32),
            PropKind::Boolean => Value::Bool(self.buffer.read_u32(property.byte_offset) != 0),
            PropKind::String => Value::String(self.read_string(property)),
        }
    }

    /// Writes a property value, marking the dirty bit iff the stored value
    /// actually changed.
    ///
    /// Returns whether the property was dirtied. Undefined transitions always
    /// count as changes; writing a value equal to the current one (including
    /// writing `Undefined` over `Undefined`) is a no-op.
    pub fn set(&self, property: &PropertyLayout, value: &Value) -> bool {
        let was_undefined = property.allow_undefined && self.is_undefined(property.prop_num);

        if value.is_undefined() {
            assert!(
                property.allow_undefined,
                "property {:?} of {:?} cannot be undefined",
                property.name,
                self.layout.type_tag(),
            );
            if was_undefined {
                return false;
            }
            self.set_undefined_bit(property.prop_num, true);
            self.set_dirty_bit(property.prop_num);
            return true;
        }

        let changed = match (property.kind, value) {
            (PropKind::Number, Value::Number(value)) => {
                let current = self.buffer.read_f64(property.byte_offset);
                if !was_undefined && current == *value {
                    return false;
                }
                self.buffer.write_f64(property.byte_offset, *value);
                true
            }
            (PropKind::Int32, Value::Int32(value)) => {
                let current = self.buffer.read_u32(property.byte_offset) as i32;
                if !was_undefined && current == *value {
                    return false;
                }
                self.buffer.write_u32(property.byte_offset, *value as u32);
                true
            }
            (PropKind::Boolean, Value::Bool(value)) => {
                let current = self.buffer.read_u32(property.byte_offset) != 0;
                if !was_undefined && current == *value {
                    return false;
                }
                self.buffer.write_u32(property.byte_offset, u32::from(*value));
                true
            }
            (PropKind::String, Value::String(value)) => {
                if !was_undefined && self.read_string(property) == *value {
                    return false;
                }
                self.write_string(property, value);
                true
            }
            (kind, value) => panic!(
                "property {:?} of {:?} expects {kind:?}, got {value:?}",
                property.name,
                self.layout.type_tag(),
            ),
        };

        if was_undefined {
            self.set_undefined_bit(property.prop_num, false);
        }
        self.set_dirty_bit(property.prop_num);
        changed
    }

    fn read_string(&self, property: &PropertyLayout) -> String {
        let length = usize::from(self.buffer.read_u16(property.byte_offset));
        assert!(
            length <= MAX_STRING_LEN,
            "corrupt string length {length} for property {:?} of {:?}",
            property.name,
            self.layout.type_tag(),
        );
        let units: Vec<u16> = (0..length)
            .map(|index| self.buffer.read_u16(property.byte_offset + 2 + index * 2))
            .collect();
        String::from_utf16_lossy(&units)
    }

    fn write_string(&self, property: &PropertyLayout, value: &str) {
        let mut units: Vec<u16> = value.encode_utf16().collect();
        if units.len() > MAX_STRING_LEN {
            tracing::warn!(
                property = property.name,
                length = units.len(),
                "string value exceeds {MAX_STRING_LEN} code units, truncating",
            );
            units.truncate(MAX_STRING_LEN);
        }
        self.buffer.write_u16(property.byte_offset, units.len() as u16);
        for (index, unit) in units.iter().enumerate() {
            self.buffer.write_u16(property.byte_offset + 2 + index * 2, *unit);
        }
    }

    /// Returns whether any dirty bit is set.
    pub fn is_dirty(&self) -> bool {
        self.buffer.load(WORD_DIRTY[0]) != 0 || self.buffer.load(WORD_DIRTY[1]) != 0
    }

    /// Returns whether the dirty bit for `prop_num` is set.
    pub fn is_dirty_prop(&self, prop_num: u32) -> bool {
        self.mask_bit(WORD_DIRTY, prop_num)
    }

    /// Zeroes the notify word and both dirty words.
    ///
    /// Not an atomic operation as a whole; callers hold the lock.
    pub fn reset_dirty(&self) {
        self.buffer.store(WORD_NOTIFY, 0);
        self.buffer.store(WORD_DIRTY[0], 0);
        self.buffer.store(WORD_DIRTY[1], 0);
    }

    fn set_dirty_bit(&self, prop_num: u32) {
        self.set_mask_bit(WORD_DIRTY, prop_num, true);
    }

    /// Returns whether the undefined bit for `prop_num` is set.
    pub fn is_undefined(&self, prop_num: u32) -> bool {
        self.mask_bit(WORD_UNDEFINED, prop_num)
    }

    fn set_undefined_bit(&self, prop_num: u32, on: bool) {
        self.set_mask_bit(WORD_UNDEFINED, prop_num, on);
    }

    fn mask_bit(&self, words: [usize; 2], prop_num: u32) -> bool {
        let word = words[(prop_num / 32) as usize];
        self.buffer.load(word) & (1 << (prop_num % 32)) != 0
    }

    fn set_mask_bit(&self, words: [usize; 2], prop_num: u32, on: bool) {
        let word = words[(prop_num / 32) as usize];
        let bit = 1_u32 << (prop_num % 32);
        let current = self.buffer.load(word);
        self.buffer
            .store(word, if on { current | bit } else { current & !bit });
    }

    /// The current value of the notify word: the id of the last mutator
    /// worker.
    pub fn notify_value(&self) -> u32 {
        self.buffer.load(WORD_NOTIFY)
    }

    /// Optionally stores `value` into the notify word, then wakes everyone
    /// parked on it.
    pub fn notify(&self, value: Option<u32>) {
        if let Some(value) = value {
            self.buffer.store(WORD_NOTIFY, value);
        }
        self.buffer.notify(WORD_NOTIFY);
    }

    /// Blocks until the notify word is notified or `timeout` elapses;
    /// `NotEqual` if it already differs from `expected` on entry.
    pub fn wait(&self, expected: u32, timeout: Option<Duration>) -> WaitOutcome {
        self.buffer.wait(WORD_NOTIFY, expected, timeout)
    }

    /// The asynchronous flavor of [`wait`](Self::wait). The waiter registers
    /// at call time, so a wait created while holding the lock cannot miss a
    /// wake that lands before the future is polled.
    pub fn wait_async(
        &self,
        expected: u32,
        timeout: Option<Duration>,
    ) -> impl Future<Output = WaitOutcome> + Send + use<> {
        self.buffer.wait_async(WORD_NOTIFY, expected, timeout)
    }

    /// Runs `f` while holding the buffer lock, blocking the current thread
    /// until the lock is available.
    ///
    /// The lock is released even if `f` panics.
    pub fn lock<R>(&self, f: impl FnOnce() -> R) -> R {
        let mut spins = 0_u32;
        loop {
            match self.buffer.compare_exchange(WORD_LOCK, 0, self.lock_id) {
                Ok(_) => break,
                Err(holder) => {
                    if spins < LOCK_SPIN_LIMIT {
                        spins += 1;
                        std::hint::spin_loop();
                        continue;
                    }
                    // Park until the observed holder releases or changes.
                    self.buffer.wait(WORD_LOCK, holder, None);
                }
            }
        }
        let _release = ReleaseGuard {
            buffer: &self.buffer,
        };
        f()
    }

    /// Runs `f` while holding the buffer lock, suspending the current task
    /// while the lock is contended.
    ///
    /// The lock is released even if `f` panics.
    pub async fn lock_async<R>(&self, f: impl FnOnce() -> R) -> R {
        let mut spins = 0_u32;
        loop {
            match self.buffer.compare_exchange(WORD_LOCK, 0, self.lock_id) {
                Ok(_) => break,
                Err(holder) => {
                    if spins < LOCK_SPIN_LIMIT {
                        spins += 1;
                        std::hint::spin_loop();
                        continue;
                    }
                    self.buffer.wait_async(WORD_LOCK, holder, None).await;
                }
            }
        }
        let _release = ReleaseGuard {
            buffer: &self.buffer,
        };
        f()
    }
}

/// Releases the lock word on drop, so exceptions cannot leave it held.
struct ReleaseGuard<'a> {
    buffer: &'a SharedBuffer,
}

impl Drop for ReleaseGuard<'_> {
    fn drop(&mut self) {
        self.buffer.store(WORD_LOCK, 0);
        self.buffer.notify(WORD_LOCK);
    }
}

fn random_lock_id() -> u32 {
    loop {
        let id: u32 = rand::rng().random();
        // 0 means "free" in the lock word.
        if id != 0 {
            return id;
        }
    }
}

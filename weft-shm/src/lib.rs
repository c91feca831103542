//! Shared atomic buffer primitive for the weft data-sharing runtime.
//!
//! A [`SharedBuffer`] is a fixed-size region of 32-bit words visible to every
//! worker thread holding a clone of the handle. Aligned word loads and stores
//! are atomic; higher-level synchronization is built from
//! [`SharedBuffer::compare_exchange`] plus a futex-style
//! [`wait`](SharedBuffer::wait)/[`notify`](SharedBuffer::notify) channel
//! attached to each word.
//!
//! The payload accessors ([`read_u16`](SharedBuffer::read_u16),
//! [`read_f64`](SharedBuffer::read_f64), …) address the region by byte offset
//! and are intended for data that is only mutated while holding a lock built
//! on top of the word operations; they make no atomicity guarantee beyond the
//! individual 32-bit words they touch.

#![forbid(unsafe_code)]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::Notify;

/// Outcome of a [`SharedBuffer::wait`] or [`SharedBuffer::wait_async`] call.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum WaitOutcome {
    /// The waiter parked and was woken by a notify on the word.
    Woken,
    /// The word already differed from the expected value on entry.
    NotEqual,
    /// The timeout elapsed before any notify arrived.
    TimedOut,
}

/// Wait state for a single word, created lazily on first use.
///
/// Wakeups are modelled as a generation counter: every notify bumps the
/// generation and wakes everyone parked on the word, and a waiter considers
/// itself woken once the generation moved past the value it snapshotted when
/// it registered. This also absorbs spurious condvar wakeups.
struct WordChannel {
    generation: Mutex<u64>,
    waiters: Condvar,
    async_waiters: Notify,
}

impl WordChannel {
    fn new() -> Self {
        Self {
            generation: Mutex::new(0),
            waiters: Condvar::new(),
            async_waiters: Notify::new(),
        }
    }

    fn generation(&self) -> u64 {
        *self.generation.lock().unwrap()
    }

    fn bump(&self) {
        {
            let mut generation = self.generation.lock().unwrap();
            *generation += 1;
        }
        self.waiters.notify_all();
        self.async_waiters.notify_waiters();
    }
}

struct Inner {
    words: Box<[AtomicU32]>,
    byte_len: usize,
    channels: Mutex<HashMap<usize, Arc<WordChannel>>>,
}

impl Inner {
    fn word(&self, index: usize) -> &AtomicU32 {
        &self.words[index]
    }

    fn channel(&self, index: usize) -> Arc<WordChannel> {
        assert!(index < self.words.len(), "word index {index} out of range");
        Arc::clone(
            self.channels
                .lock()
                .unwrap()
                .entry(index)
                .or_insert_with(|| Arc::new(WordChannel::new())),
        )
    }
}

/// A byte region shared between workers, with atomic word access and a
/// per-word futex-style notification channel.
///
/// Cloning is cheap and every clone refers to the same memory.
#[derive(Clone)]
pub struct SharedBuffer {
    inner: Arc<Inner>,
}

impl fmt::Debug for SharedBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedBuffer")
            .field("byte_len", &self.inner.byte_len)
            .finish()
    }
}

impl SharedBuffer {
    /// Allocates a zero-filled shared region of `byte_len` bytes.
    pub fn new(byte_len: usize) -> Self {
        let words = (0..byte_len.div_ceil(4)).map(|_| AtomicU32::new(0)).collect();
        Self {
            inner: Arc::new(Inner {
                words,
                byte_len,
                channels: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Returns the length of the region in bytes.
    pub fn byte_len(&self) -> usize {
        self.inner.byte_len
    }

    /// Atomically loads the 32-bit word at `index`.
    pub fn load(&self, index: usize) -> u32 {
        self.inner.word(index).load(Ordering::SeqCst)
    }

    /// Atomically stores `value` into the 32-bit word at `index`.
    pub fn store(&self, index: usize, value: u32) {
        self.inner.word(index).store(value, Ordering::SeqCst);
    }

    /// Atomically replaces the word at `index` with `new` if it currently
    /// holds `current`.
    ///
    /// Returns `Ok` with the previous value on success, `Err` with the
    /// observed value on failure.
    pub fn compare_exchange(&self, index: usize, current: u32, new: u32) -> Result<u32, u32> {
        self.inner
            .word(index)
            .compare_exchange(current, new, Ordering::SeqCst, Ordering::SeqCst)
    }

    /// Reads the 16-bit value at the 2-byte-aligned `byte_offset`.
    pub fn read_u16(&self, byte_offset: usize) -> u16 {
        debug_assert_eq!(byte_offset % 2, 0, "u16 access must be 2-byte aligned");
        let word = self.load(byte_offset / 4);
        ((word >> ((byte_offset % 4) * 8)) & 0xffff) as u16
    }

    /// Writes the 16-bit value at the 2-byte-aligned `byte_offset`.
    ///
    /// This is a word-level read-modify-write; concurrent writers must be
    /// excluded by the caller's lock.
    pub fn write_u16(&self, byte_offset: usize, value: u16) {
        debug_assert_eq!(byte_offset % 2, 0, "u16 access must be 2-byte aligned");
        let shift = (byte_offset % 4) * 8;
        let mask = 0xffff_u32 << shift;
        let word = self.inner.word(byte_offset / 4);
        let current = word.load(Ordering::SeqCst);
        word.store((current & !mask) | (u32::from(value) << shift), Ordering::SeqCst);
    }

    /// Reads the 32-bit value at the 4-byte-aligned `byte_offset`.
    pub fn read_u32(&self, byte_offset: usize) -> u32 {
        debug_assert_eq!(byte_offset % 4, 0, "u32 access must be 4-byte aligned");
        self.load(byte_offset / 4)
    }

    /// Writes the 32-bit value at the 4-byte-aligned `byte_offset`.
    pub fn write_u32(&self, byte_offset: usize, value: u32) {
        debug_assert_eq!(byte_offset % 4, 0, "u32 access must be 4-byte aligned");
        self.store(byte_offset / 4, value);
    }

    /// Reads the IEEE-754 double at the 8-byte-aligned `byte_offset`.
    pub fn read_f64(&self, byte_offset: usize) -> f64 {
        debug_assert_eq!(byte_offset % 8, 0, "f64 access must be 8-byte aligned");
        let lo = u64::from(self.load(byte_offset / 4));
        let hi = u64::from(self.load(byte_offset / 4 + 1));
        f64::from_bits(lo | (hi << 32))
    }

    /// Writes the IEEE-754 double at the 8-byte-aligned `byte_offset` as two
    /// little-endian words.
    pub fn write_f64(&self, byte_offset: usize, value: f64) {
        debug_assert_eq!(byte_offset % 8, 0, "f64 access must be 8-byte aligned");
        let bits = value.to_bits();
        self.store(byte_offset / 4, (bits & 0xffff_ffff) as u32);
        self.store(byte_offset / 4 + 1, (bits >> 32) as u32);
    }

    /// Wakes every waiter currently parked on the word at `index`.
    pub fn notify(&self, index: usize) {
        self.inner.channel(index).bump();
    }

    /// Blocks the current thread until the word at `index` is notified, the
    /// timeout elapses, or the word is observed to differ from `expected` on
    /// entry.
    pub fn wait(&self, index: usize, expected: u32, timeout: Option<Duration>) -> WaitOutcome {
        let channel = self.inner.channel(index);
        let mut generation = channel.generation.lock().unwrap();
        if self.load(index) != expected {
            return WaitOutcome::NotEqual;
        }
        let start = *generation;
        let deadline = timeout.map(|timeout| Instant::now() + timeout);
        while *generation == start {
            match deadline {
                None => generation = channel.waiters.wait(generation).unwrap(),
                Some(deadline) => {
                    let Some(remaining) = deadline.checked_duration_since(Instant::now()) else {
                        return WaitOutcome::TimedOut;
                    };
                    let (guard, result) = channel.waiters.wait_timeout(generation, remaining).unwrap();
                    generation = guard;
                    if result.timed_out() && *generation == start {
                        return WaitOutcome::TimedOut;
                    }
                }
            }
        }
        WaitOutcome::Woken
    }

    /// The asynchronous flavor of [`wait`](Self::wait).
    ///
    /// The waiter is registered when this method is *called*, not when the
    /// returned future is first polled: a notify that lands between the call
    /// and the first poll still counts as a wakeup. This lets a caller
    /// register a wait while holding a lock and await it after releasing the
    /// lock without losing a wake in between.
    pub fn wait_async(
        &self,
        index: usize,
        expected: u32,
        timeout: Option<Duration>,
    ) -> impl Future<Output = WaitOutcome> + Send + use<> {
        let channel = self.inner.channel(index);
        let start = channel.generation();
        let not_equal = self.load(index) != expected;
        async move {
            if not_equal {
                return WaitOutcome::NotEqual;
            }
            let deadline = timeout.map(|timeout| tokio::time::Instant::now() + timeout);
            loop {
                let notified = channel.async_waiters.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if channel.generation() != start {
                    return WaitOutcome::Woken;
                }
                match deadline {
                    None => notified.await,
                    Some(deadline) => {
                        if tokio::time::timeout_at(deadline, notified).await.is_err() {
                            return WaitOutcome::TimedOut;
                        }
                    }
                }
            }
        }
    }
}

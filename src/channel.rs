//! Shared input channel between the controller thread and a host thread.
//!
//! The channel is a fixed-size region laid out like a raw shared buffer:
//!
//! ```text
//! byte 0..4   flag    (0 = WAIT, 1 = READY)
//! byte 4..8   length  (valid payload bytes)
//! byte 8..    payload (UTF-8 text)
//! ```
//!
//! The host side resets the flag and blocks until the controller publishes.
//! The wait is a real thread-blocking wait (condvar), never a cooperative
//! yield, because the hosted interpreter's input call is synchronous.
//!
//! A [`SharedChannel`] is allocated once per controller and survives host
//! restarts. Each host derives a [`ChannelBinding`] when it is initialized;
//! bindings from a terminated host are abandoned and can never consume
//! input meant for its replacement.

use std::fmt;
use std::sync::atomic::{AtomicI32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use thiserror::Error;
use tracing::{debug, warn};

/// Flag value while the host is waiting for input
pub const FLAG_WAIT: i32 = 0;
/// Flag value once the controller has published a payload
pub const FLAG_READY: i32 = 1;
/// Size of the control header (flag + length words)
pub const HEADER_BYTES: usize = 8;
/// Default total channel size
pub const DEFAULT_CHANNEL_BYTES: usize = 1024;

const FLAG_WORD: usize = 0;
const LENGTH_WORD: usize = 1;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("channel of {capacity} bytes leaves no room for a payload")]
    CapacityTooSmall { capacity: usize },

    #[error("payload of {len} bytes exceeds channel capacity of {capacity} bytes")]
    PayloadTooLarge { len: usize, capacity: usize },

    #[error("a wait is already outstanding on this channel")]
    AlreadyWaiting,

    #[error("wait abandoned: the owning host was terminated")]
    Abandoned,
}

#[derive(Debug, Default)]
struct WaitState {
    /// Bumped every time the owning host is torn down
    epoch: u64,
    /// Epoch of the binding currently blocked in a wait
    waiter: Option<u64>,
}

struct ChannelBuffer {
    words: [AtomicI32; 2],
    payload: Box<[AtomicU8]>,
    state: Mutex<WaitState>,
    ready: Condvar,
}

/// Controller-side handle to the shared input buffer.
///
/// Cloning is cheap; all clones refer to the same buffer.
#[derive(Clone)]
pub struct SharedChannel {
    inner: Arc<ChannelBuffer>,
}

impl fmt::Debug for SharedChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedChannel")
            .field("capacity", &self.capacity())
            .field("flag", &self.flag())
            .field("length", &self.length())
            .finish()
    }
}

impl Default for SharedChannel {
    fn default() -> Self {
        Self::allocate(DEFAULT_CHANNEL_BYTES)
    }
}

impl SharedChannel {
    /// Allocate a channel of `capacity` total bytes (header included).
    pub fn new(capacity: usize) -> Result<Self, ChannelError> {
        if capacity <= HEADER_BYTES {
            return Err(ChannelError::CapacityTooSmall { capacity });
        }
        Ok(Self::allocate(capacity))
    }

    fn allocate(capacity: usize) -> Self {
        let payload = (0..capacity - HEADER_BYTES)
            .map(|_| AtomicU8::new(0))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        debug!(capacity, "Allocated shared input channel");
        Self {
            inner: Arc::new(ChannelBuffer {
                words: [AtomicI32::new(FLAG_WAIT), AtomicI32::new(0)],
                payload,
                state: Mutex::new(WaitState::default()),
                ready: Condvar::new(),
            }),
        }
    }

    /// Total size in bytes, header included
    pub fn capacity(&self) -> usize {
        self.inner.payload.len() + HEADER_BYTES
    }

    /// Largest payload `publish` accepts
    pub fn payload_capacity(&self) -> usize {
        self.inner.payload.len()
    }

    pub fn flag(&self) -> i32 {
        self.inner.words[FLAG_WORD].load(Ordering::Acquire)
    }

    pub fn length(&self) -> usize {
        self.inner.words[LENGTH_WORD].load(Ordering::Acquire).max(0) as usize
    }

    /// Write `bytes` into the payload region, mark the channel READY and wake
    /// the blocked host. Controller-only.
    ///
    /// Oversized payloads are rejected without touching the buffer.
    pub fn publish(&self, bytes: &[u8]) -> Result<(), ChannelError> {
        let capacity = self.payload_capacity();
        if bytes.len() > capacity {
            warn!(
                len = bytes.len(),
                capacity, "Rejected oversized input payload"
            );
            return Err(ChannelError::PayloadTooLarge {
                len: bytes.len(),
                capacity,
            });
        }

        for (slot, byte) in self.inner.payload.iter().zip(bytes) {
            slot.store(*byte, Ordering::Relaxed);
        }
        self.inner.words[LENGTH_WORD].store(bytes.len() as i32, Ordering::Relaxed);

        // Flag flips under the wait lock so a waiter can't miss the wakeup
        let _state = self.inner.state.lock();
        self.inner.words[FLAG_WORD].store(FLAG_READY, Ordering::Release);
        self.inner.ready.notify_all();
        debug!(bytes = bytes.len(), "Published input payload");
        Ok(())
    }

    pub fn publish_str(&self, text: &str) -> Result<(), ChannelError> {
        self.publish(text.as_bytes())
    }

    /// Derive a host-side binding for the current epoch.
    pub fn bind(&self) -> ChannelBinding {
        let epoch = self.inner.state.lock().epoch;
        ChannelBinding {
            channel: self.clone(),
            epoch,
        }
    }

    /// Abandon every binding handed out so far and wake any blocked waiter.
    ///
    /// Called when the host that owns the current binding is terminated.
    pub fn abandon_waiters(&self) {
        let mut state = self.inner.state.lock();
        state.epoch += 1;
        let had_waiter = state.waiter.take().is_some();
        self.inner.ready.notify_all();
        debug!(epoch = state.epoch, had_waiter, "Abandoned channel waiters");
    }

    fn read_payload(&self) -> String {
        let len = self.length().min(self.payload_capacity());
        let bytes: Vec<u8> = self.inner.payload[..len]
            .iter()
            .map(|slot| slot.load(Ordering::Relaxed))
            .collect();
        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Host-side view of a [`SharedChannel`], valid until the host is terminated.
#[derive(Debug, Clone)]
pub struct ChannelBinding {
    channel: SharedChannel,
    epoch: u64,
}

impl ChannelBinding {
    /// Set the flag back to WAIT. Must precede every wait.
    ///
    /// A no-op once the binding is abandoned: the flag then belongs to the
    /// replacement host.
    pub fn reset(&self) {
        let state = self.channel.inner.state.lock();
        if state.epoch != self.epoch {
            debug!(
                epoch = self.epoch,
                current = state.epoch,
                "Ignored reset from abandoned binding"
            );
            return;
        }
        self.channel.inner.words[FLAG_WORD].store(FLAG_WAIT, Ordering::Release);
    }

    pub fn is_abandoned(&self) -> bool {
        self.channel.inner.state.lock().epoch != self.epoch
    }

    pub fn payload_capacity(&self) -> usize {
        self.channel.payload_capacity()
    }

    /// Block the calling thread until the controller publishes, then decode
    /// the payload as UTF-8.
    ///
    /// There is no timeout: if nothing is ever published the thread stays
    /// blocked until the binding is abandoned.
    pub fn await_ready(&self) -> Result<String, ChannelError> {
        self.wait(None)
            .map(|payload| payload.unwrap_or_default())
    }

    /// Same as [`await_ready`](Self::await_ready) but gives up after
    /// `timeout`, returning `Ok(None)`.
    pub fn await_ready_timeout(&self, timeout: Duration) -> Result<Option<String>, ChannelError> {
        self.wait(Some(Instant::now() + timeout))
    }

    fn wait(&self, deadline: Option<Instant>) -> Result<Option<String>, ChannelError> {
        let inner = &self.channel.inner;
        let mut state = inner.state.lock();

        if state.epoch != self.epoch {
            return Err(ChannelError::Abandoned);
        }
        if state.waiter == Some(self.epoch) {
            return Err(ChannelError::AlreadyWaiting);
        }
        state.waiter = Some(self.epoch);

        let outcome = loop {
            if state.epoch != self.epoch {
                break Err(ChannelError::Abandoned);
            }
            if inner.words[FLAG_WORD].load(Ordering::Acquire) == FLAG_READY {
                break Ok(true);
            }
            match deadline {
                None => inner.ready.wait(&mut state),
                Some(deadline) => {
                    if inner.ready.wait_until(&mut state, deadline).timed_out() {
                        let ready =
                            inner.words[FLAG_WORD].load(Ordering::Acquire) == FLAG_READY;
                        if !ready && state.epoch == self.epoch {
                            break Ok(false);
                        }
                    }
                }
            }
        };

        if state.waiter == Some(self.epoch) {
            state.waiter = None;
        }
        drop(state);

        match outcome {
            Ok(true) => Ok(Some(self.channel.read_payload())),
            Ok(false) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

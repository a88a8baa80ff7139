//! Bounded inbound frame queue.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::Instant;
use vraft_wire::Frame;

struct Inner {
    frames: VecDeque<Frame>,
    dropped: u64,
}

/// Handoff between the socket reader and the engine driver.
///
/// Bounded; on overflow the oldest frame is dropped and counted. This is
/// the only lossy step on the receive path above the physical channel.
pub struct InboundQueue {
    inner: Mutex<Inner>,
    cond: Condvar,
    capacity: usize,
}

impl InboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                frames: VecDeque::with_capacity(capacity),
                dropped: 0,
            }),
            cond: Condvar::new(),
            capacity,
        }
    }

    /// Push a frame, evicting the oldest one if the queue is full.
    pub fn push(&self, frame: Frame) {
        let mut inner = self.inner.lock();
        if inner.frames.len() == self.capacity {
            inner.frames.pop_front();
            inner.dropped += 1;
        }
        inner.frames.push_back(frame);
        drop(inner);
        self.cond.notify_one();
    }

    /// Pop the next frame, waiting until `deadline` if the queue is empty.
    ///
    /// Returns `None` on deadline expiry.
    pub fn pop_until(&self, deadline: Instant) -> Option<Frame> {
        let mut inner = self.inner.lock();
        loop {
            if let Some(frame) = inner.frames.pop_front() {
                return Some(frame);
            }
            if self.cond.wait_until(&mut inner, deadline).timed_out() {
                return inner.frames.pop_front();
            }
        }
    }

    /// Pop without waiting.
    pub fn try_pop(&self) -> Option<Frame> {
        self.inner.lock().frames.pop_front()
    }

    /// Frames evicted due to overflow since startup.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().dropped
    }

    pub fn len(&self) -> usize {
        self.inner.lock().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

//! Bounded FIFO of encoded frames waiting for an open transport.

use std::collections::VecDeque;

use parking_lot::Mutex;
use phx_core::{PhxError, Result};
use phx_settings::OverflowPolicy;
use tokio::sync::Notify;

use crate::transport::TransportHandle;

#[derive(Debug)]
struct Frame {
    reference: Option<String>,
    text: String,
}

/// Ordered send buffer shared by every channel of a socket.
///
/// Frames remember the ref they were encoded with so replies that can no
/// longer be delivered are not sent on a later connection.
#[derive(Debug)]
pub struct SendBuffer {
    queue: Mutex<VecDeque<Frame>>,
    capacity: usize,
    policy: OverflowPolicy,
    space: Notify,
}

impl SendBuffer {
    /// Create an empty buffer.
    pub fn new(capacity: usize, policy: OverflowPolicy) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            capacity,
            policy,
            space: Notify::new(),
        }
    }

    /// Append a frame, applying the overflow policy when full.
    ///
    /// Under [`OverflowPolicy::Wait`] this waits until a drain or discard
    /// frees space.
    pub async fn push(&self, text: String, reference: Option<String>) -> Result<()> {
        let mut frame = Some(Frame { reference, text });
        loop {
            let notified = self.space.notified();
            {
                let mut queue = self.queue.lock();
                if queue.len() < self.capacity {
                    if let Some(frame) = frame.take() {
                        queue.push_back(frame);
                    }
                    return Ok(());
                }
                if self.policy == OverflowPolicy::Reject {
                    return Err(PhxError::BufferFull { capacity: self.capacity });
                }
            }
            notified.await;
        }
    }

    /// Append a frame without ever waiting.
    pub fn try_push(&self, text: String, reference: Option<String>) -> Result<()> {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            return Err(PhxError::BufferFull { capacity: self.capacity });
        }
        queue.push_back(Frame { reference, text });
        Ok(())
    }

    /// Send buffered frames in order until empty or `handle` refuses one.
    ///
    /// The lock is held for the whole drain so two drains cannot interleave.
    /// Returns the number of frames handed to the transport.
    pub fn drain(&self, handle: &dyn TransportHandle) -> usize {
        let mut sent = 0;
        {
            let mut queue = self.queue.lock();
            while let Some(frame) = queue.front() {
                if !handle.send(frame.text.clone()) {
                    break;
                }
                let _ = queue.pop_front();
                sent += 1;
            }
        }
        if sent > 0 {
            self.space.notify_waiters();
        }
        sent
    }

    /// Drop the frame encoded with `reference`, if it is still buffered.
    pub fn remove(&self, reference: &str) -> bool {
        let removed = {
            let mut queue = self.queue.lock();
            let before = queue.len();
            queue.retain(|frame| frame.reference.as_deref() != Some(reference));
            before != queue.len()
        };
        if removed {
            self.space.notify_waiters();
        }
        removed
    }

    /// Drop every frame that carries a ref, keeping fire-and-forget frames.
    ///
    /// Returns the number of frames dropped.
    pub fn discard_referenced(&self) -> usize {
        let dropped = {
            let mut queue = self.queue.lock();
            let before = queue.len();
            queue.retain(|frame| frame.reference.is_none());
            before - queue.len()
        };
        if dropped > 0 {
            self.space.notify_waiters();
        }
        dropped
    }

    /// Number of buffered frames.
    pub fn len(&self) -> usize {
        self.queue.lock().len()
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

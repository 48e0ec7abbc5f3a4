//! Bounded outbound queue with fail-fast backpressure.
//!
//! The queue holds SIDs of accepted requests in submission order until the
//! connection writes them. When it is at capacity further submissions are
//! refused immediately. A saturation episode starts with the first refusal and
//! ends when the queue drops below capacity again; [`OutboundQueue::reject`]
//! reports only the first refusal of each episode so `full` is signalled once.

use std::collections::VecDeque;

#[derive(Debug)]
pub(crate) struct OutboundQueue {
    items: VecDeque<u8>,
    capacity: usize,
    saturated: bool,
}

impl OutboundQueue {
    pub fn new(capacity: usize) -> Self {
        Self {
            items: VecDeque::with_capacity(capacity.min(256)),
            capacity,
            saturated: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.items.len() >= self.capacity
    }

    /// Records a refused submission. Returns `true` if it opened a new episode.
    pub fn reject(&mut self) -> bool {
        !std::mem::replace(&mut self.saturated, true)
    }

    /// Appends `sid`. The caller checks [`is_full`](Self::is_full) first.
    pub fn push(&mut self, sid: u8) {
        self.items.push_back(sid);
    }

    /// Takes the oldest queued SID.
    pub fn pop(&mut self) -> Option<u8> {
        let sid = self.items.pop_front();
        self.settle();
        sid
    }

    /// Removes `sid` wherever it is queued. Returns `true` if it was present.
    pub fn remove(&mut self, sid: u8) -> bool {
        let Some(index) = self.items.iter().position(|s| *s == sid) else {
            return false;
        };
        self.items.remove(index);
        self.settle();
        true
    }

    pub fn drain(&mut self) -> Vec<u8> {
        let all = self.items.drain(..).collect();
        self.settle();
        all
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn is_saturated(&self) -> bool {
        self.saturated
    }

    fn settle(&mut self) {
        if self.items.len() < self.capacity {
            self.saturated = false;
        }
    }
}

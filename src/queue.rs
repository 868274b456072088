//! Status queues shared between the refresh thread and whatever renders progress.
//!
//! Both queues are stacks: a consumer that only handles one message per tick
//! sees the newest status first and drains superseded ones afterwards.

use serde::Serialize;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Unbounded thread-safe LIFO stack.
#[derive(Debug)]
pub struct MessageStack<T> {
    items: Mutex<Vec<T>>,
    ready: Condvar,
}

impl<T> Default for MessageStack<T> {
    fn default() -> Self {
        Self {
            items: Mutex::new(Vec::new()),
            ready: Condvar::new(),
        }
    }
}

impl<T> MessageStack<T> {
    // A panicking producer must not wedge the consumer.
    fn lock(&self) -> MutexGuard<'_, Vec<T>> {
        self.items.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn push(&self, item: T) {
        self.lock().push(item);
        self.ready.notify_one();
    }

    /// Pop the most recently pushed item. With `block == false` an empty
    /// stack yields `None` immediately; otherwise waits for a push.
    pub fn get(&self, block: bool) -> Option<T> {
        let mut items = self.lock();
        if !block {
            return items.pop();
        }
        loop {
            if let Some(item) = items.pop() {
                return Some(item);
            }
            items = self
                .ready
                .wait(items)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ValidatorMessage {
    pub msg: String,
    pub step: u32,
}

#[derive(Debug, Default)]
pub struct ValidatorMessageQueue {
    stack: MessageStack<ValidatorMessage>,
}

impl ValidatorMessageQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_message(&self, msg: impl Into<String>, step: u32) {
        self.stack.push(ValidatorMessage {
            msg: msg.into(),
            step,
        });
    }

    pub fn get(&self, block: bool) -> Option<ValidatorMessage> {
        self.stack.get(block)
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RefresherStatus {
    Starting,
    InProgress,
    Finished,
    Error,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RefresherMessage {
    pub status: RefresherStatus,
    pub total_keys: usize,
    pub current_key: usize,
}

#[derive(Debug, Default)]
pub struct RefresherMessageQueue {
    stack: MessageStack<RefresherMessage>,
}

impl RefresherMessageQueue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Counters default to 0 for statuses that carry no progress.
    pub fn add_message(
        &self,
        status: RefresherStatus,
        total_keys: Option<usize>,
        current_key: Option<usize>,
    ) {
        self.stack.push(RefresherMessage {
            status,
            total_keys: total_keys.unwrap_or(0),
            current_key: current_key.unwrap_or(0),
        });
    }

    pub fn get(&self, block: bool) -> Option<RefresherMessage> {
        self.stack.get(block)
    }

    pub fn len(&self) -> usize {
        self.stack.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

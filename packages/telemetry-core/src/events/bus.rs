//! Bounded per-subscriber mailbox implementation of the event bus.
//!
//! `tokio::sync::broadcast` was considered and rejected: it drops the
//! *slowest* subscriber's oldest messages implicitly via a shared ring buffer
//! and reports lag, whereas the bus needs each subscriber to own an
//! independent bounded mailbox that silently drops its own oldest message on
//! overflow (lossy-newest-wins) without affecting any other subscriber.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::debug;

use crate::constants::EVENT_MAILBOX_CAPACITY;
use crate::events::BusMessage;

/// A bounded FIFO mailbox for one subscriber.
///
/// Pushing past `capacity` drops the oldest queued message rather than the
/// new one, and never blocks the publisher.
struct Mailbox {
    queue: parking_lot::Mutex<VecDeque<Arc<BusMessage>>>,
    notify: Notify,
    closed: std::sync::atomic::AtomicBool,
    capacity: usize,
}

impl Mailbox {
    fn new(capacity: usize) -> Self {
        Self {
            queue: parking_lot::Mutex::new(VecDeque::with_capacity(capacity.min(64)),),
            notify: Notify::new(),
            closed: std::sync::atomic::AtomicBool::new(false),
            capacity,
        }
    }

    /// Pushes `message`, dropping the oldest entry first if the mailbox is full.
    fn push(&self, message: Arc<BusMessage>) {
        let mut queue = self.queue.lock();
        if queue.len() >= self.capacity {
            queue.pop_front();
        }
        queue.push_back(message);
        drop(queue);
        self.notify.notify_one();
    }

    fn try_pop(&self) -> Option<Arc<BusMessage>> {
        self.queue.lock().pop_front()
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

/// Handle returned by [`EventBus::subscribe`]; drop it (or call
/// [`Subscription::unsubscribe`]) to stop receiving and free the mailbox.
pub struct Subscription {
    id: u64,
    mailbox: Arc<Mailbox>,
    bus: EventBus,
}

impl Subscription {
    /// Waits for and returns the next message, in FIFO order for this subscriber.
    ///
    /// Returns `None` once the subscription has been explicitly unsubscribed.
    pub async fn recv(&self) -> Option<Arc<BusMessage>> {
        loop {
            if let Some(message) = self.mailbox.try_pop() {
                return Some(message);
            }
            if self.mailbox.is_closed() {
                return None;
            }
            self.mailbox.notify.notified().await;
        }
    }

    /// Removes this subscription from the bus; further publishes will not reach it.
    pub fn unsubscribe(&self) {
        self.bus.unsubscribe(self.id);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

/// In-process pub/sub bus. Cheaply `Clone`-able; all clones share the same subscriber table.
#[derive(Clone)]
pub struct EventBus {
    subscribers: Arc<DashMap<u64, Arc<Mailbox>>>,
    next_id: Arc<AtomicU64>,
    mailbox_capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_MAILBOX_CAPACITY)
    }
}

impl EventBus {
    pub fn new(mailbox_capacity: usize) -> Self {
        Self {
            subscribers: Arc::new(DashMap::new()),
            next_id: Arc::new(AtomicU64::new(1)),
            mailbox_capacity,
        }
    }

    /// Allocates a new bounded mailbox and returns a handle to read from it.
    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let mailbox = Arc::new(Mailbox::new(self.mailbox_capacity));
        self.subscribers.insert(id, mailbox.clone());
        Subscription {
            id,
            mailbox,
            bus: self.clone(),
        }
    }

    fn unsubscribe(&self, id: u64) {
        if let Some((_, mailbox)) = self.subscribers.remove(&id) {
            mailbox.close();
        }
    }

    /// The number of currently-registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Enqueues `message` to every current subscriber's mailbox.
    ///
    /// Snapshotting the subscriber ids first (rather than holding the map
    /// locked while pushing) keeps a slow subscriber from blocking publish
    /// for everyone else - `DashMap` shards internally, but iterating while
    /// concurrently inserting/removing is still best avoided.
    pub fn publish(&self, message: BusMessage) {
        let message = Arc::new(message);
        let ids: Vec<u64> = self.subscribers.iter().map(|entry| *entry.key()).collect();
        for id in ids {
            if let Some(mailbox) = self.subscribers.get(&id).map(|m| m.clone()) {
                mailbox.push(message.clone());
            } else {
                debug!(subscriber_id = id, "publish target vanished before delivery");
            }
        }
    }
}

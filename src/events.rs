//! Lifecycle event channel.
//!
//! A single publish point shared by the dispatcher, the extraction pipeline and the
//! process supervisor. Presentation layers attach as subscribers. Delivery is
//! fire-and-forget: an event published while nobody is attached is not delivered to
//! later plain subscribers. A small per-request replay buffer lets a subscriber that
//! attaches late for a specific request still observe that request's early events.

use crate::model::{LifecycleEvent, RequestId};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::mpsc;

/// Events retained per request for late subscribers.
pub const REPLAY_EVENTS_PER_REQUEST: usize = 64;
/// Requests whose events are retained at once; the oldest request is dropped first.
pub const REPLAY_REQUESTS: usize = 32;

struct Subscriber {
    id: u64,
    filter: Option<RequestId>,
    tx: mpsc::UnboundedSender<LifecycleEvent>,
}

#[derive(Default)]
struct Inner {
    next_id: u64,
    subscribers: Vec<Subscriber>,
    replay: HashMap<RequestId, VecDeque<LifecycleEvent>>,
    replay_order: VecDeque<RequestId>,
}

impl Inner {
    fn remember(&mut self, event: &LifecycleEvent) {
        let id = event.request_id;
        if !self.replay.contains_key(&id) {
            if self.replay_order.len() >= REPLAY_REQUESTS {
                if let Some(oldest) = self.replay_order.pop_front() {
                    self.replay.remove(&oldest);
                }
            }
            self.replay_order.push_back(id);
        }
        let buf = self.replay.entry(id).or_default();
        if buf.len() >= REPLAY_EVENTS_PER_REQUEST {
            buf.pop_front();
        }
        buf.push_back(event.clone());
    }
}

/// Cloneable handle to the shared channel.
#[derive(Clone, Default)]
pub struct EventChannel {
    inner: Arc<Mutex<Inner>>,
}

/// An attached subscriber. Dropping it detaches.
pub struct Subscription {
    id: u64,
    rx: mpsc::UnboundedReceiver<LifecycleEvent>,
    channel: EventChannel,
}

impl Subscription {
    pub async fn recv(&mut self) -> Option<LifecycleEvent> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<LifecycleEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.channel.detach(self.id);
    }
}

impl EventChannel {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Attach a subscriber that receives every event published from now on.
    pub fn subscribe(&self) -> Subscription {
        self.attach(None)
    }

    /// Attach a subscriber for one request. Buffered events of that request are
    /// delivered first, followed by live events of the same request.
    pub fn subscribe_request(&self, request_id: RequestId) -> Subscription {
        self.attach(Some(request_id))
    }

    fn attach(&self, filter: Option<RequestId>) -> Subscription {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut inner = self.lock();
        if let Some(id) = filter {
            if let Some(buf) = inner.replay.get(&id) {
                for ev in buf {
                    let _ = tx.send(ev.clone());
                }
            }
        }
        inner.next_id += 1;
        let id = inner.next_id;
        inner.subscribers.push(Subscriber { id, filter, tx });
        Subscription {
            id,
            rx,
            channel: self.clone(),
        }
    }

    fn detach(&self, id: u64) {
        self.lock().subscribers.retain(|s| s.id != id);
    }

    /// Publish an event to every attached subscriber. Never blocks, never fails.
    pub fn publish(&self, event: LifecycleEvent) {
        let mut inner = self.lock();
        inner.remember(&event);
        inner.subscribers.retain(|s| {
            if s.filter.is_some_and(|f| f != event.request_id) {
                return !s.tx.is_closed();
            }
            s.tx.send(event.clone()).is_ok()
        });
    }

    #[cfg(test)]
    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    /// Drop the replay buffer of a finished request.
    pub fn forget(&self, request_id: RequestId) {
        let mut inner = self.lock();
        inner.replay.remove(&request_id);
        inner.replay_order.retain(|id| *id != request_id);
    }
}

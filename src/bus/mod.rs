//! In-process typed pub/sub
//!
//! One `Broker<T>` instance exists per event type. Producers publish,
//! reactors subscribe; nobody holds a direct reference to anybody else.
//!
//! ## Delivery semantics
//!
//! - Fan-out is best-effort: publishing never blocks on a slow
//!   subscriber. Each subscriber has a small bounded buffer; when it is
//!   full the message is dropped for that subscriber only, and the
//!   subscriber stays registered.
//! - Subscribers receive only events published after `subscribe` returns.
//! - `unsubscribe` is idempotent and closes the subscriber's channel.
//! - `stop` closes all subscribers and refuses further publishes.

use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::model::Service;

/// Buffered events per subscriber before messages are dropped
const SUBSCRIBER_BUFFER: usize = 16;

struct Registry<T> {
    subscribers: HashMap<u64, mpsc::Sender<T>>,
    next_id: u64,
    running: bool,
}

/// Typed single-producer-multi-consumer event bus
pub struct Broker<T> {
    registry: Mutex<Registry<T>>,
}

impl<T: Clone> Broker<T> {
    /// Create a broker; `start` must be called before publishing
    pub fn new() -> Self {
        Self {
            registry: Mutex::new(Registry {
                subscribers: HashMap::new(),
                next_id: 0,
                running: false,
            }),
        }
    }

    /// Arm the broker for publishing
    pub fn start(&self) {
        let mut registry = self.registry.lock().expect("broker lock poisoned");
        registry.running = true;
    }

    /// Close every subscriber channel and refuse further publishes
    pub fn stop(&self) {
        let mut registry = self.registry.lock().expect("broker lock poisoned");
        registry.running = false;
        let closed = registry.subscribers.len();
        registry.subscribers.clear();
        debug!("broker stopped, closed {closed} subscribers");
    }

    /// Register a subscriber
    ///
    /// Returns the subscriber id (for `unsubscribe`) and the receiving end.
    /// After `stop`, the returned channel is already closed.
    pub fn subscribe(&self) -> (u64, mpsc::Receiver<T>) {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        let mut registry = self.registry.lock().expect("broker lock poisoned");
        let id = registry.next_id;
        registry.next_id += 1;
        if registry.running {
            registry.subscribers.insert(id, tx);
        }
        (id, rx)
    }

    /// Remove a subscriber, closing its channel
    ///
    /// Unknown ids are ignored, so calling twice is harmless.
    pub fn unsubscribe(&self, id: u64) {
        let mut registry = self.registry.lock().expect("broker lock poisoned");
        registry.subscribers.remove(&id);
    }

    /// Fan an event out to all current subscribers
    ///
    /// Returns the number of subscribers the event was delivered to.
    /// Subscribers with a full buffer miss this event but stay registered.
    pub fn publish(&self, event: T) -> usize {
        let registry = self.registry.lock().expect("broker lock poisoned");
        if !registry.running {
            warn!("publish on stopped broker dropped");
            return 0;
        }

        let mut delivered = 0;
        for (id, tx) in registry.subscribers.iter() {
            match tx.try_send(event.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    trace!("subscriber {id} buffer full, dropping event");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {
                    trace!("subscriber {id} closed, event not delivered");
                }
            }
        }
        delivered
    }

    /// Number of registered subscribers
    pub fn subscriber_count(&self) -> usize {
        self.registry
            .lock()
            .expect("broker lock poisoned")
            .subscribers
            .len()
    }
}

impl<T: Clone> Default for Broker<T> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Event types
// ============================================================================

/// A service's state changed (success or failure was recorded)
#[derive(Debug, Clone, Copy, Default)]
pub struct ServiceUpdated;

/// Kind of service lifecycle event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TriggerEvent {
    Created,
    Updated,
    Deleted,
    /// Manual one-shot check was requested
    Check,
    Unknown,
}

impl TriggerEvent {
    pub fn as_str(&self) -> &'static str {
        match self {
            TriggerEvent::Created => "created",
            TriggerEvent::Updated => "updated",
            TriggerEvent::Deleted => "deleted",
            TriggerEvent::Check => "check",
            TriggerEvent::Unknown => "unknown",
        }
    }
}

/// Lifecycle event consumed by the scheduler and the broadcaster
#[derive(Debug, Clone)]
pub struct TriggerService {
    pub event_type: TriggerEvent,
    pub service: Service,
}

// ============================================================================
// Tests
// ============================================================================

//! Event bus for workspace observers.
//!
//! Provides a publish-subscribe system so a UI layer can react to local
//! changes, confirmations and rollbacks without polling the stores.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::domain::{CapsuleId, EmailId};

/// Workspace events.
#[derive(Debug, Clone, PartialEq)]
pub enum AppEvent {
    // Refresh events
    /// Emails and capsules were re-read from the backend.
    Refreshed {
        emails_added: usize,
        emails_updated: usize,
        capsules: usize,
    },
    /// The backend ran its processing pipeline.
    EmailsProcessed { processed: usize },
    /// A view's fetch finished after the view was closed and was dropped.
    StaleResponseDiscarded { view_id: u64 },

    // Email events
    /// An email's flags changed locally.
    EmailChanged(EmailId),
    /// The backend accepted an email change.
    EmailConfirmed(EmailId),
    /// An email change failed to confirm and was reverted.
    EmailRolledBack { email_id: EmailId, error: String },

    // Capsule events
    /// A capsule was created locally.
    CapsuleCreated(CapsuleId),
    /// A capsule changed locally.
    CapsuleChanged(CapsuleId),
    /// The backend accepted a capsule change.
    CapsuleConfirmed(CapsuleId),
    /// A capsule change failed to confirm and was reverted.
    CapsuleRolledBack {
        capsule_id: CapsuleId,
        error: String,
    },
    /// A capsule whose creation was never confirmed was removed.
    CapsuleRemoved(CapsuleId),
}

/// Subscriber ID for unsubscribing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

/// Event handler function type.
pub type EventHandler = Arc<dyn Fn(&AppEvent) + Send + Sync>;

/// Event bus for publish-subscribe communication.
///
/// Handlers run synchronously on the publishing task, so they should be
/// quick. A handler may subscribe, unsubscribe or publish on the same bus.
/// Thread-safe for use across async boundaries.
pub struct EventBus {
    handlers: Arc<Mutex<HashMap<u64, EventHandler>>>,
    next_id: Arc<Mutex<u64>>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create a new event bus.
    pub fn new() -> Self {
        Self {
            handlers: Arc::new(Mutex::new(HashMap::new())),
            next_id: Arc::new(Mutex::new(0)),
        }
    }

    /// Subscribe to all events.
    ///
    /// Returns a subscriber ID that can be used to unsubscribe.
    pub fn subscribe<F>(&self, handler: F) -> SubscriberId
    where
        F: Fn(&AppEvent) + Send + Sync + 'static,
    {
        let mut next_id = self.next_id.lock().unwrap_or_else(PoisonError::into_inner);
        let id = *next_id;
        *next_id += 1;

        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id, Arc::new(handler));

        SubscriberId(id)
    }

    /// Unsubscribe from events.
    pub fn unsubscribe(&self, subscriber_id: SubscriberId) {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&subscriber_id.0);
    }

    /// Publish an event to all subscribers.
    pub fn publish(&self, event: AppEvent) {
        // Released before dispatch so handlers can use the bus.
        let handlers: Vec<EventHandler> = self
            .handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        for handler in handlers {
            handler(&event);
        }
    }

    /// Get the number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.handlers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            handlers: Arc::clone(&self.handlers),
            next_id: Arc::clone(&self.next_id),
        }
    }
}

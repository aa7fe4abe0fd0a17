//! Sync service for optimistic mutations.
//!
//! Every mutating command applies its change locally first and then asks
//! the backend to confirm it. The [`SyncService`] serializes commands per
//! record, bounds each confirmation with a timeout, keeps confirmation
//! counters and broadcasts the outcome.
//!
//! Rolling back is the caller's job: when [`SyncService::confirm`] returns
//! an error the caller restores its snapshot before releasing the permit.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex as AsyncMutex, OwnedMutexGuard};

use crate::config::duration_ms;
use crate::domain::{CapsuleId, EmailId};
use crate::error::{CoreError, Result};

/// Record a command mutates.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SyncKey {
    Email(EmailId),
    Capsule(CapsuleId),
}

impl fmt::Display for SyncKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncKey::Email(id) => write!(f, "email:{}", id),
            SyncKey::Capsule(id) => write!(f, "capsule:{}", id),
        }
    }
}

impl From<EmailId> for SyncKey {
    fn from(id: EmailId) -> Self {
        SyncKey::Email(id)
    }
}

impl From<CapsuleId> for SyncKey {
    fn from(id: CapsuleId) -> Self {
        SyncKey::Capsule(id)
    }
}

/// What happens to a command for a record that already has a
/// confirmation in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Wait for the earlier confirmation to settle.
    #[default]
    Queue,
    /// Fail immediately with a conflict error.
    Reject,
}

/// Settings for sync behavior.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Upper bound on a single backend confirmation.
    #[serde(with = "duration_ms")]
    pub confirm_timeout: Duration,
    /// Policy for concurrent commands on the same record.
    pub conflict_policy: ConflictPolicy,
    /// Default `max_emails` for the backend processing run.
    pub process_batch_size: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            confirm_timeout: Duration::from_secs(10),
            conflict_policy: ConflictPolicy::Queue,
            process_batch_size: 10,
        }
    }
}

/// Confirmation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Confirmations the backend accepted.
    pub confirmed: u64,
    /// Confirmations that failed or timed out and were rolled back.
    pub rolled_back: u64,
    /// Confirmations currently in flight.
    pub in_flight: usize,
}

/// Event emitted by the sync service.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncEvent {
    /// A command acquired its record and is about to mutate it.
    Started(SyncKey),
    /// The backend accepted the change.
    Confirmed(SyncKey),
    /// The change failed to confirm and must be rolled back.
    RolledBack { key: SyncKey, error: CoreError },
    /// A command was rejected because the record was busy.
    Conflict(SyncKey),
}

type InFlight = Arc<Mutex<BTreeSet<SyncKey>>>;

/// Exclusive right to mutate one record until dropped.
pub struct SyncPermit {
    key: SyncKey,
    in_flight: InFlight,
    _guard: OwnedMutexGuard<()>,
}

impl SyncPermit {
    /// The record this permit covers.
    pub fn key(&self) -> &SyncKey {
        &self.key
    }
}

impl fmt::Debug for SyncPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncPermit").field("key", &self.key).finish()
    }
}

impl Drop for SyncPermit {
    fn drop(&mut self) {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Sync service coordinating optimistic commands.
///
/// # Example
///
/// ```ignore
/// let permit = sync.begin(SyncKey::Email(id.clone())).await?;
/// let change = emails.toggle_pin(&id)?;
/// if let Err(e) = sync.confirm(&permit, backend.update_email(&session, &id, &change.patch())).await {
///     emails.restore(change.before)?;
///     return Err(e);
/// }
/// ```
pub struct SyncService {
    settings: SyncSettings,
    locks: Mutex<HashMap<SyncKey, Arc<AsyncMutex<()>>>>,
    in_flight: InFlight,
    confirmed: AtomicU64,
    rolled_back: AtomicU64,
    event_sender: broadcast::Sender<SyncEvent>,
}

impl SyncService {
    /// Creates a new SyncService.
    pub fn new(settings: SyncSettings) -> Self {
        let (event_sender, _) = broadcast::channel(100);
        Self {
            settings,
            locks: Mutex::new(HashMap::new()),
            in_flight: Arc::new(Mutex::new(BTreeSet::new())),
            confirmed: AtomicU64::new(0),
            rolled_back: AtomicU64::new(0),
            event_sender,
        }
    }

    /// Current settings.
    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    /// Subscribes to sync events.
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.event_sender.subscribe()
    }

    /// Claims a record for one command.
    ///
    /// Under [`ConflictPolicy::Queue`] this waits for any earlier permit on
    /// the same record to drop. Under [`ConflictPolicy::Reject`] it fails
    /// with [`CoreError::Conflict`] instead. Permits for different records
    /// never wait on each other.
    pub async fn begin(&self, key: impl Into<SyncKey>) -> Result<SyncPermit> {
        let key = key.into();
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
            // Unused entries are only referenced by the map.
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            Arc::clone(locks.entry(key.clone()).or_default())
        };

        let guard = match self.settings.conflict_policy {
            ConflictPolicy::Queue => lock.lock_owned().await,
            ConflictPolicy::Reject => match lock.try_lock_owned() {
                Ok(guard) => guard,
                Err(_) => {
                    tracing::warn!(%key, "Command rejected, confirmation in flight");
                    let _ = self.event_sender.send(SyncEvent::Conflict(key.clone()));
                    return Err(CoreError::Conflict(key.to_string()));
                }
            },
        };

        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(key.clone());
        let _ = self.event_sender.send(SyncEvent::Started(key.clone()));

        Ok(SyncPermit {
            key,
            in_flight: Arc::clone(&self.in_flight),
            _guard: guard,
        })
    }

    /// Awaits a backend confirmation, bounded by `confirm_timeout`.
    ///
    /// A timeout is reported as [`CoreError::Network`]. Any error means
    /// the caller must roll back the local change.
    pub async fn confirm<T, F>(&self, permit: &SyncPermit, confirmation: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let key = permit.key();
        let timeout = self.settings.confirm_timeout;

        let outcome = match tokio::time::timeout(timeout, confirmation).await {
            Ok(result) => result,
            Err(_) => Err(CoreError::Network(format!(
                "confirmation for {} timed out after {}ms",
                key,
                timeout.as_millis()
            ))),
        };

        match &outcome {
            Ok(_) => {
                self.confirmed.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(%key, "Change confirmed");
                let _ = self.event_sender.send(SyncEvent::Confirmed(key.clone()));
            }
            Err(error) => {
                self.rolled_back.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(%key, %error, "Change not confirmed, rolling back");
                let _ = self.event_sender.send(SyncEvent::RolledBack {
                    key: key.clone(),
                    error: error.clone(),
                });
            }
        }

        outcome
    }

    /// Records with a command in flight, in key order.
    pub fn pending(&self) -> Vec<SyncKey> {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    /// Returns true if the record has a command in flight.
    pub fn is_pending(&self, key: &SyncKey) -> bool {
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(key)
    }

    /// Current confirmation counters.
    pub fn stats(&self) -> SyncStats {
        SyncStats {
            confirmed: self.confirmed.load(Ordering::Relaxed),
            rolled_back: self.rolled_back.load(Ordering::Relaxed),
            in_flight: self.pending().len(),
        }
    }
}

impl fmt::Debug for SyncService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncService")
            .field("settings", &self.settings)
            .field("stats", &self.stats())
            .finish()
    }
}

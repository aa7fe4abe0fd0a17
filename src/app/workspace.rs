//! Workspace: the command and query surface of the mail client.
//!
//! Commands apply locally, publish an event, then confirm with the backend
//! through the [`SyncService`]. A failed confirmation restores the
//! pre-command snapshot and publishes a rollback event before the error is
//! returned. Store locks are never held across an await.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use chrono::{DateTime, Utc};

use super::events::{AppEvent, EventBus};
use super::view::View;
use crate::domain::{
    Capsule, CapsuleId, CapsulePatch, Email, EmailId, FollowUpId, NewCapsule, Session,
};
use crate::error::{CoreError, Result};
use crate::providers::backend::CapsuleBackend;
use crate::services::association::{self, CapsuleFromEmail, MailboxEntry};
use crate::services::{
    CapsuleChange, CapsuleFilter, CapsuleStore, EmailStore, FlagChange, IngestSummary,
    MailboxFilter, PendingFollowUp, SyncPermit, SyncService, SyncSettings, SyncStats,
};

/// Counts reported by a refresh.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub emails: IngestSummary,
    /// Capsules added or replaced.
    pub capsules: usize,
}

/// Backend records together with the confirmation marks taken before they
/// were fetched.
pub(crate) struct RemoteSnapshot {
    emails: Vec<Email>,
    capsules: Vec<Capsule>,
    email_mark: u64,
    capsule_mark: u64,
}

/// Local state plus the backend it is reconciled against.
///
/// Cloning is cheap; clones share the same stores, sync state and event bus.
#[derive(Clone)]
pub struct Workspace {
    emails: Arc<RwLock<EmailStore>>,
    capsules: Arc<RwLock<CapsuleStore>>,
    sync: Arc<SyncService>,
    backend: Arc<dyn CapsuleBackend>,
    events: EventBus,
    next_view_id: Arc<AtomicU64>,
}

impl Workspace {
    /// Creates an empty workspace.
    pub fn new(backend: Arc<dyn CapsuleBackend>, settings: SyncSettings) -> Self {
        Self {
            emails: Arc::new(RwLock::new(EmailStore::new())),
            capsules: Arc::new(RwLock::new(CapsuleStore::new())),
            sync: Arc::new(SyncService::new(settings)),
            backend,
            events: EventBus::new(),
            next_view_id: Arc::new(AtomicU64::new(1)),
        }
    }

    /// Event bus for observers.
    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Sync service, for confirmation events and counters.
    pub fn sync(&self) -> &SyncService {
        &self.sync
    }

    pub(crate) fn backend(&self) -> &dyn CapsuleBackend {
        self.backend.as_ref()
    }

    fn read_emails(&self) -> RwLockReadGuard<'_, EmailStore> {
        self.emails.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_emails(&self) -> RwLockWriteGuard<'_, EmailStore> {
        self.emails.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_capsules(&self) -> RwLockReadGuard<'_, CapsuleStore> {
        self.capsules.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_capsules(&self) -> RwLockWriteGuard<'_, CapsuleStore> {
        self.capsules.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Opens a view handle whose fetches are discarded once it closes.
    pub fn open_view(&self) -> View {
        let id = self.next_view_id.fetch_add(1, Ordering::Relaxed);
        View::new(id, self.clone())
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Looks up an email.
    pub fn email(&self, id: &EmailId) -> Result<Email> {
        self.read_emails().get(id).cloned()
    }

    /// All emails in arrival order.
    pub fn emails(&self) -> Vec<Email> {
        self.read_emails().list().to_vec()
    }

    /// Number of unread emails.
    pub fn unread_count(&self) -> usize {
        self.read_emails().unread_count()
    }

    /// Emails matching a filter, each tagged with its capsule membership.
    pub fn mailbox(&self, filter: &MailboxFilter) -> Vec<MailboxEntry> {
        let emails = self.read_emails();
        let capsules = self.read_capsules();
        association::decorate(&capsules, filter.apply(emails.list()))
    }

    /// Looks up a capsule.
    pub fn capsule(&self, id: &CapsuleId) -> Result<Capsule> {
        self.read_capsules().get(id).cloned()
    }

    /// All capsules in creation order.
    pub fn capsules(&self) -> Vec<Capsule> {
        self.read_capsules().list().to_vec()
    }

    /// Capsules matching a filter.
    pub fn capsules_filtered(&self, filter: &CapsuleFilter) -> Vec<Capsule> {
        self.read_capsules()
            .list_filtered(filter)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Capsules containing an email.
    pub fn capsules_for_email(&self, email_id: &EmailId) -> Vec<Capsule> {
        self.read_capsules()
            .capsules_for_email(email_id)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Returns true if any capsule contains the email.
    pub fn in_capsule(&self, email_id: &EmailId) -> bool {
        association::in_capsule(&self.read_capsules(), email_id)
    }

    /// Follow-ups due at or before `now`.
    pub fn pending_follow_ups(&self, now: DateTime<Utc>) -> Vec<PendingFollowUp> {
        self.read_capsules().pending_follow_ups(now)
    }

    /// Confirmation counters.
    pub fn sync_stats(&self) -> SyncStats {
        self.sync.stats()
    }

    // ------------------------------------------------------------------
    // Refresh
    // ------------------------------------------------------------------

    /// Re-reads emails and capsules from the backend.
    ///
    /// Records confirmed while the fetch was in flight keep their local
    /// state.
    pub async fn refresh(&self, session: &Session) -> Result<RefreshSummary> {
        let snapshot = self.fetch_all(session).await?;
        Ok(self.apply_refresh(snapshot))
    }

    pub(crate) async fn fetch_all(&self, session: &Session) -> Result<RemoteSnapshot> {
        let email_mark = self.email_mark();
        let capsule_mark = self.capsule_mark();
        let (emails, capsules) = futures::try_join!(
            self.backend.list_emails(session),
            self.backend.list_capsules(session)
        )?;
        Ok(RemoteSnapshot {
            emails,
            capsules,
            email_mark,
            capsule_mark,
        })
    }

    pub(crate) fn apply_refresh(&self, snapshot: RemoteSnapshot) -> RefreshSummary {
        let email_summary = self
            .write_emails()
            .ingest_as_of(snapshot.emails, snapshot.email_mark);
        let capsule_count = self
            .write_capsules()
            .ingest_as_of(snapshot.capsules, snapshot.capsule_mark);
        let summary = RefreshSummary {
            emails: email_summary,
            capsules: capsule_count,
        };
        tracing::info!(
            emails_added = summary.emails.added,
            emails_updated = summary.emails.updated,
            capsules = summary.capsules,
            "Workspace refreshed"
        );
        self.events.publish(AppEvent::Refreshed {
            emails_added: summary.emails.added,
            emails_updated: summary.emails.updated,
            capsules: summary.capsules,
        });
        summary
    }

    pub(crate) fn email_mark(&self) -> u64 {
        self.read_emails().confirmation_mark()
    }

    pub(crate) fn capsule_mark(&self) -> u64 {
        self.read_capsules().confirmation_mark()
    }

    pub(crate) fn ingest_email(&self, email: Email, mark: u64) -> Result<Email> {
        let id = email.id.clone();
        let mut store = self.write_emails();
        store.ingest_as_of([email], mark);
        store.get(&id).cloned()
    }

    pub(crate) fn ingest_capsule(&self, capsule: Capsule, mark: u64) -> Result<Capsule> {
        let id = capsule.id.clone();
        let mut store = self.write_capsules();
        store.ingest_as_of([capsule], mark);
        store.get(&id).cloned()
    }

    /// Asks the backend to process new emails, then refreshes.
    ///
    /// `max_emails` defaults to the configured batch size.
    pub async fn process_emails(&self, session: &Session, max_emails: Option<usize>) -> Result<usize> {
        let max_emails = max_emails.unwrap_or(self.sync.settings().process_batch_size);
        let processed = self.backend.process_emails(session, max_emails).await?;
        tracing::info!(processed, max_emails, "Backend processed emails");
        self.events.publish(AppEvent::EmailsProcessed { processed });

        self.refresh(session).await?;
        Ok(processed)
    }

    // ------------------------------------------------------------------
    // Email commands
    // ------------------------------------------------------------------

    /// Opens an email, marking it read the first time.
    pub async fn select_email(&self, session: &Session, id: &EmailId) -> Result<Email> {
        self.change_email(session, id, |store| store.select(id)).await
    }

    /// Marks an email read.
    pub async fn mark_read(&self, session: &Session, id: &EmailId) -> Result<Email> {
        self.change_email(session, id, |store| store.mark_read(id)).await
    }

    /// Marks an email unread.
    pub async fn mark_unread(&self, session: &Session, id: &EmailId) -> Result<Email> {
        self.change_email(session, id, |store| store.mark_unread(id)).await
    }

    /// Flips an email's pinned flag.
    pub async fn toggle_pin(&self, session: &Session, id: &EmailId) -> Result<Email> {
        self.change_email(session, id, |store| store.toggle_pin(id)).await
    }

    /// Flips an email's archived flag.
    pub async fn toggle_archive(&self, session: &Session, id: &EmailId) -> Result<Email> {
        self.change_email(session, id, |store| store.toggle_archive(id)).await
    }

    async fn change_email<F>(&self, session: &Session, id: &EmailId, apply: F) -> Result<Email>
    where
        F: FnOnce(&mut EmailStore) -> Result<FlagChange>,
    {
        let permit = self.sync.begin(id.clone()).await?;
        let change = apply(&mut *self.write_emails())?;
        if !change.changed() {
            return Ok(change.after);
        }
        self.events.publish(AppEvent::EmailChanged(id.clone()));

        let patch = change.patch();
        let confirmation = async {
            self.backend
                .update_email(session, id, &patch)
                .await
                .map_err(CoreError::from)
        };

        match self.sync.confirm(&permit, confirmation).await {
            Ok(_) => {
                self.write_emails().mark_clean(id);
                tracing::info!(email_id = %id, ?patch, "Email change confirmed");
                self.events.publish(AppEvent::EmailConfirmed(id.clone()));
                Ok(change.after)
            }
            Err(error) => {
                if let Err(restore_error) = self.write_emails().restore(change.before) {
                    tracing::error!(email_id = %id, %restore_error, "Rollback failed");
                }
                tracing::warn!(email_id = %id, %error, "Email change rolled back");
                self.events.publish(AppEvent::EmailRolledBack {
                    email_id: id.clone(),
                    error: error.to_string(),
                });
                Err(error)
            }
        }
    }

    // ------------------------------------------------------------------
    // Capsule commands
    // ------------------------------------------------------------------

    /// Creates a capsule.
    pub async fn create_capsule(&self, session: &Session, input: NewCapsule) -> Result<Capsule> {
        let capsule = self.write_capsules().create(input)?;
        self.confirm_creation(session, capsule).await
    }

    /// Creates a capsule seeded from an email.
    pub async fn create_capsule_from_email(
        &self,
        session: &Session,
        email_id: &EmailId,
        options: &CapsuleFromEmail,
    ) -> Result<Capsule> {
        let email = self.email(email_id)?;
        let capsule =
            association::create_capsule_from_email(&mut *self.write_capsules(), &email, options)?;
        self.confirm_creation(session, capsule).await
    }

    async fn confirm_creation(&self, session: &Session, capsule: Capsule) -> Result<Capsule> {
        let id = capsule.id.clone();
        let permit = self.sync.begin(id.clone()).await?;
        self.events.publish(AppEvent::CapsuleCreated(id.clone()));

        let confirmation = async {
            self.backend
                .create_capsule(session, &capsule)
                .await
                .map_err(CoreError::from)
        };

        match self.sync.confirm(&permit, confirmation).await {
            Ok(_) => {
                self.write_capsules().mark_clean(&id);
                tracing::info!(capsule_id = %id, title = %capsule.title, "Capsule creation confirmed");
                self.events.publish(AppEvent::CapsuleConfirmed(id));
                Ok(capsule)
            }
            Err(error) => {
                if let Err(remove_error) = self.write_capsules().remove_unconfirmed(&id) {
                    tracing::error!(capsule_id = %id, %remove_error, "Rollback failed");
                }
                tracing::warn!(capsule_id = %id, %error, "Capsule creation rolled back");
                self.events.publish(AppEvent::CapsuleRemoved(id));
                Err(error)
            }
        }
    }

    /// Merges a patch into a capsule.
    pub async fn update_capsule(
        &self,
        session: &Session,
        id: &CapsuleId,
        patch: &CapsulePatch,
    ) -> Result<Capsule> {
        self.change_capsule(session, id, |store| store.update(id, patch))
            .await
    }

    /// Closes an open capsule or reopens a closed one.
    pub async fn archive_capsule(&self, session: &Session, id: &CapsuleId) -> Result<Capsule> {
        self.change_capsule(session, id, |store| store.archive(id))
            .await
    }

    /// Adds an email to a capsule, merging its entities.
    pub async fn attach_email(
        &self,
        session: &Session,
        capsule_id: &CapsuleId,
        email_id: &EmailId,
    ) -> Result<Capsule> {
        let email = self.email(email_id)?;
        self.change_capsule(session, capsule_id, |store| {
            association::attach_email(store, capsule_id, &email)
        })
        .await
    }

    /// Removes an email from a capsule.
    pub async fn detach_email(
        &self,
        session: &Session,
        capsule_id: &CapsuleId,
        email_id: &EmailId,
    ) -> Result<Capsule> {
        self.change_capsule(session, capsule_id, |store| {
            association::detach_email(store, capsule_id, email_id)
        })
        .await
    }

    /// Adds a follow-up reminder to a capsule.
    pub async fn add_follow_up(
        &self,
        session: &Session,
        capsule_id: &CapsuleId,
        description: &str,
        due_date: DateTime<Utc>,
    ) -> Result<Capsule> {
        self.change_capsule(session, capsule_id, |store| {
            store.add_follow_up(capsule_id, description, due_date)
        })
        .await
    }

    /// Marks a follow-up as completed.
    pub async fn complete_follow_up(
        &self,
        session: &Session,
        capsule_id: &CapsuleId,
        follow_up_id: &FollowUpId,
    ) -> Result<Capsule> {
        self.change_capsule(session, capsule_id, |store| {
            store.complete_follow_up(capsule_id, follow_up_id)
        })
        .await
    }

    async fn change_capsule<F>(&self, session: &Session, id: &CapsuleId, apply: F) -> Result<Capsule>
    where
        F: FnOnce(&mut CapsuleStore) -> Result<CapsuleChange>,
    {
        let permit = self.sync.begin(id.clone()).await?;
        let change = apply(&mut *self.write_capsules())?;
        self.events.publish(AppEvent::CapsuleChanged(id.clone()));

        let after = change.after.clone();
        let confirmation = async move {
            self.backend
                .update_capsule(session, &after)
                .await
                .map_err(CoreError::from)
        };

        self.settle_capsule(&permit, confirmation, change).await
    }

    async fn settle_capsule<F, T>(
        &self,
        permit: &SyncPermit,
        confirmation: F,
        change: CapsuleChange,
    ) -> Result<Capsule>
    where
        F: Future<Output = Result<T>>,
    {
        let id = change.after.id.clone();
        match self.sync.confirm(permit, confirmation).await {
            Ok(_) => {
                self.write_capsules().mark_clean(&id);
                tracing::info!(capsule_id = %id, "Capsule change confirmed");
                self.events.publish(AppEvent::CapsuleConfirmed(id));
                Ok(change.after)
            }
            Err(error) => {
                if let Err(restore_error) = self.write_capsules().restore(change.before) {
                    tracing::error!(capsule_id = %id, %restore_error, "Rollback failed");
                }
                tracing::warn!(capsule_id = %id, %error, "Capsule change rolled back");
                self.events.publish(AppEvent::CapsuleRolledBack {
                    capsule_id: id,
                    error: error.to_string(),
                });
                Err(error)
            }
        }
    }
}

impl std::fmt::Debug for Workspace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workspace")
            .field("emails", &self.read_emails().len())
            .field("capsules", &self.read_capsules().len())
            .field("sync", &self.sync)
            .finish()
    }
}

//! End-to-end workspace scenarios against an in-memory backend.
//!
//! The fake backend keeps its own copy of every record, so these tests
//! check both what the workspace shows and what it sent.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use pretty_assertions::assert_eq;
use tokio::sync::Semaphore;

use capsule_mail::app::{AppEvent, Workspace};
use capsule_mail::domain::{
    Capsule, CapsuleId, CapsulePatch, CapsuleStatus, CapsuleType, Email, EmailId, Entity,
    EntityCatalog, FlagPatch, NewCapsule, Session,
};
use capsule_mail::error::{CoreError, RecordKind};
use capsule_mail::providers::backend::{BackendError, BackendResult, CapsuleBackend};
use capsule_mail::services::{
    CapsuleFromEmail, Category, ConflictPolicy, MailboxFilter, SyncKey, SyncSettings,
};

// ============================================================================
// Fake backend
// ============================================================================

#[derive(Default)]
struct FakeBackend {
    emails: Mutex<Vec<Email>>,
    capsules: Mutex<Vec<Capsule>>,
    failing_emails: Mutex<HashSet<EmailId>>,
    fail_capsule_writes: AtomicBool,
    email_updates: Mutex<Vec<(EmailId, FlagPatch)>>,
    /// When set, every update and single-record fetch waits for a permit.
    gate: Option<Arc<Semaphore>>,
    /// When set, `list_emails` takes its snapshot and then waits for a permit.
    list_gate: Option<Arc<Semaphore>>,
    list_calls: AtomicUsize,
}

impl FakeBackend {
    fn with_emails(emails: Vec<Email>) -> Self {
        Self {
            emails: Mutex::new(emails),
            ..Default::default()
        }
    }

    fn gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    fn list_gated(mut self) -> (Self, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        self.list_gate = Some(Arc::clone(&gate));
        (self, gate)
    }

    fn fail_updates_for(&self, id: &str) {
        self.failing_emails.lock().unwrap().insert(EmailId::from(id));
    }

    fn recorded_updates(&self) -> Vec<(EmailId, FlagPatch)> {
        self.email_updates.lock().unwrap().clone()
    }

    async fn pass_gate(&self) {
        if let Some(gate) = &self.gate {
            gate.acquire().await.unwrap().forget();
        }
    }

    fn capsule_write(&self, capsule: &Capsule) -> BackendResult<Capsule> {
        if self.fail_capsule_writes.load(Ordering::SeqCst) {
            return Err(BackendError::ApiError {
                status: 503,
                message: "capsule service unavailable".to_string(),
            });
        }
        let mut capsules = self.capsules.lock().unwrap();
        capsules.retain(|c| c.id != capsule.id);
        capsules.push(capsule.clone());
        Ok(capsule.clone())
    }
}

#[async_trait]
impl CapsuleBackend for FakeBackend {
    async fn list_emails(&self, _session: &Session) -> BackendResult<Vec<Email>> {
        let emails = self.emails.lock().unwrap().clone();
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(gate) = &self.list_gate {
            gate.acquire().await.unwrap().forget();
        }
        Ok(emails)
    }

    async fn get_email(&self, _session: &Session, id: &EmailId) -> BackendResult<Email> {
        self.pass_gate().await;
        self.emails
            .lock()
            .unwrap()
            .iter()
            .find(|e| &e.id == id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound {
                kind: RecordKind::Email,
                id: id.to_string(),
            })
    }

    async fn update_email(
        &self,
        _session: &Session,
        id: &EmailId,
        patch: &FlagPatch,
    ) -> BackendResult<Email> {
        self.pass_gate().await;
        if self.failing_emails.lock().unwrap().contains(id) {
            return Err(BackendError::ApiError {
                status: 500,
                message: format!("cannot update {}", id),
            });
        }

        self.email_updates
            .lock()
            .unwrap()
            .push((id.clone(), *patch));

        let mut emails = self.emails.lock().unwrap();
        let email = emails
            .iter_mut()
            .find(|e| &e.id == id)
            .ok_or_else(|| BackendError::NotFound {
                kind: RecordKind::Email,
                id: id.to_string(),
            })?;
        patch.apply_to(email);
        Ok(email.clone())
    }

    async fn process_emails(&self, _session: &Session, max_emails: usize) -> BackendResult<usize> {
        Ok(self.emails.lock().unwrap().len().min(max_emails))
    }

    async fn list_capsules(&self, _session: &Session) -> BackendResult<Vec<Capsule>> {
        Ok(self.capsules.lock().unwrap().clone())
    }

    async fn get_capsule(&self, _session: &Session, id: &CapsuleId) -> BackendResult<Capsule> {
        self.pass_gate().await;
        self.capsules
            .lock()
            .unwrap()
            .iter()
            .find(|c| &c.id == id)
            .cloned()
            .ok_or_else(|| BackendError::NotFound {
                kind: RecordKind::Capsule,
                id: id.to_string(),
            })
    }

    async fn create_capsule(&self, _session: &Session, capsule: &Capsule) -> BackendResult<Capsule> {
        self.capsule_write(capsule)
    }

    async fn update_capsule(&self, _session: &Session, capsule: &Capsule) -> BackendResult<Capsule> {
        self.capsule_write(capsule)
    }

    async fn delete_capsule(&self, _session: &Session, id: &CapsuleId) -> BackendResult<()> {
        self.capsules.lock().unwrap().retain(|c| &c.id != id);
        Ok(())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn session() -> Session {
    Session::new("agent@broker.example").with_token("test-token")
}

fn lease_renewal() -> Email {
    let mut entities = EntityCatalog::new();
    entities.properties.push(Entity::named("Harbor Plaza"));
    entities.people.push(Entity::named("Dana Cole"));
    Email::new("1", "dana@example.com", "Lease renewal", Utc::now())
        .with_sender_name("Dana Cole")
        .with_entities(entities)
}

fn invoice() -> Email {
    let mut email = Email::new("2", "billing@example.com", "Invoice", Utc::now());
    email.read = true;
    email.pinned = true;
    email
}

fn tour_request() -> Email {
    Email::new("3", "sam@example.com", "Tour request", Utc::now())
}

async fn workspace(backend: Arc<FakeBackend>, settings: SyncSettings) -> Workspace {
    let workspace = Workspace::new(backend, settings);
    workspace.refresh(&session()).await.unwrap();
    workspace
}

async fn default_workspace() -> (Workspace, Arc<FakeBackend>) {
    let backend = Arc::new(FakeBackend::with_emails(vec![
        lease_renewal(),
        invoice(),
        tour_request(),
    ]));
    let workspace = workspace(Arc::clone(&backend), SyncSettings::default()).await;
    (workspace, backend)
}

fn ids(entries: &[capsule_mail::services::MailboxEntry]) -> Vec<&str> {
    entries.iter().map(|e| e.email.id.0.as_str()).collect()
}

async fn wait_until_pending(workspace: &Workspace, key: &SyncKey) {
    while !workspace.sync().is_pending(key) {
        tokio::task::yield_now().await;
    }
}

// ============================================================================
// Mailbox scenarios
// ============================================================================

#[tokio::test]
async fn pinned_then_archive_leaves_only_lease_in_inbox() {
    let backend = Arc::new(FakeBackend::with_emails(vec![lease_renewal(), invoice()]));
    let workspace = workspace(Arc::clone(&backend), SyncSettings::default()).await;

    let pinned = workspace.mailbox(&MailboxFilter::new(Category::Pinned));
    assert_eq!(ids(&pinned), vec!["2"]);

    workspace
        .toggle_archive(&session(), &EmailId::from("2"))
        .await
        .unwrap();

    let inbox = workspace.mailbox(&MailboxFilter::new(Category::Inbox));
    assert_eq!(ids(&inbox), vec!["1"]);
    assert_eq!(
        backend.recorded_updates(),
        vec![(EmailId::from("2"), FlagPatch::archived(true))]
    );
}

#[tokio::test]
async fn all_with_blank_query_is_the_whole_mailbox() {
    let (workspace, _) = default_workspace().await;

    let all = workspace.mailbox(&MailboxFilter::new(Category::All).search(""));
    let emails: Vec<Email> = all.into_iter().map(|e| e.email).collect();
    assert_eq!(emails, workspace.emails());
}

#[tokio::test]
async fn search_matches_sender_name() {
    let (workspace, _) = default_workspace().await;
    let hits = workspace.mailbox(&MailboxFilter::new(Category::Unread).search("dana"));
    assert_eq!(ids(&hits), vec!["1"]);
}

#[tokio::test]
async fn read_flag_only_moves_through_select_and_mark() {
    let (workspace, backend) = default_workspace().await;
    let id = EmailId::from("1");

    workspace.toggle_pin(&session(), &id).await.unwrap();
    workspace.toggle_archive(&session(), &id).await.unwrap();
    assert!(!workspace.email(&id).unwrap().read);

    let opened = workspace.select_email(&session(), &id).await.unwrap();
    assert!(opened.read);

    // A second selection is a no-op and sends nothing.
    let updates_before = backend.recorded_updates().len();
    workspace.select_email(&session(), &id).await.unwrap();
    assert_eq!(backend.recorded_updates().len(), updates_before);

    let unread = workspace.mark_unread(&session(), &id).await.unwrap();
    assert!(!unread.read);
    assert_eq!(workspace.unread_count(), 2);
}

// ============================================================================
// Rollback scenarios
// ============================================================================

#[tokio::test]
async fn failed_pin_confirmation_restores_previous_value() {
    let (workspace, backend) = default_workspace().await;
    backend.fail_updates_for("3");

    let events = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&events);
    workspace
        .events()
        .subscribe(move |event| sink.lock().unwrap().push(event.clone()));

    let id = EmailId::from("3");
    let result = workspace.toggle_pin(&session(), &id).await;

    let error = result.unwrap_err();
    assert!(matches!(error, CoreError::Network(_)));
    assert!(error.is_recoverable());
    assert!(!workspace.email(&id).unwrap().pinned);
    assert!(backend.recorded_updates().is_empty());
    assert_eq!(workspace.sync_stats().rolled_back, 1);
    assert!(events
        .lock()
        .unwrap()
        .iter()
        .any(|e| matches!(e, AppEvent::EmailRolledBack { email_id, .. } if *email_id == id)));
}

#[tokio::test]
async fn confirmation_timeout_rolls_back() {
    let (backend, _gate) = FakeBackend::with_emails(vec![lease_renewal()]).gated();
    let backend = Arc::new(backend);
    let settings = SyncSettings {
        confirm_timeout: Duration::from_millis(30),
        ..Default::default()
    };
    let workspace = workspace(Arc::clone(&backend), settings).await;

    let id = EmailId::from("1");
    let result = workspace.toggle_archive(&session(), &id).await;

    assert!(matches!(result, Err(CoreError::Network(_))));
    assert!(!workspace.email(&id).unwrap().archived);
    assert!(workspace.sync().pending().is_empty());
}

#[tokio::test]
async fn failed_capsule_update_restores_snapshot() {
    let (workspace, backend) = default_workspace().await;
    let capsule = workspace
        .create_capsule(&session(), NewCapsule::new("Harbor Plaza", CapsuleType::Property))
        .await
        .unwrap();

    backend.fail_capsule_writes.store(true, Ordering::SeqCst);
    let result = workspace
        .update_capsule(&session(), &capsule.id, &CapsulePatch::title("Renamed"))
        .await;

    assert!(matches!(result, Err(CoreError::Network(_))));
    assert_eq!(workspace.capsule(&capsule.id).unwrap(), capsule);
}

#[tokio::test]
async fn rejected_creation_leaves_no_capsule() {
    let (workspace, backend) = default_workspace().await;
    backend.fail_capsule_writes.store(true, Ordering::SeqCst);

    let result = workspace
        .create_capsule_from_email(
            &session(),
            &EmailId::from("1"),
            &CapsuleFromEmail::new(CapsuleType::Deal),
        )
        .await;

    assert!(result.is_err());
    assert!(workspace.capsules().is_empty());
    assert!(!workspace.in_capsule(&EmailId::from("1")));
}

// ============================================================================
// Capsule scenarios
// ============================================================================

#[tokio::test]
async fn closed_capsule_reopens_as_active() {
    let (workspace, backend) = default_workspace().await;
    let capsule = workspace
        .create_capsule(&session(), NewCapsule::new("Harbor Plaza sale", CapsuleType::Deal))
        .await
        .unwrap();

    workspace
        .update_capsule(&session(), &capsule.id, &CapsulePatch::status(CapsuleStatus::Closed))
        .await
        .unwrap();
    let reopened = workspace
        .archive_capsule(&session(), &capsule.id)
        .await
        .unwrap();

    assert_eq!(reopened.status, CapsuleStatus::Active);
    assert!(reopened.updated_at >= reopened.created_at);

    let stored = backend.capsules.lock().unwrap()[0].clone();
    assert_eq!(stored.status, CapsuleStatus::Active);
}

#[tokio::test]
async fn capsule_from_email_includes_email_and_entities() {
    let (workspace, _) = default_workspace().await;
    let email = workspace.email(&EmailId::from("1")).unwrap();

    let capsule = workspace
        .create_capsule_from_email(
            &session(),
            &email.id,
            &CapsuleFromEmail::new(CapsuleType::Property),
        )
        .await
        .unwrap();

    assert_eq!(capsule.title, "Lease renewal");
    assert_eq!(capsule.emails, vec![email.clone()]);
    assert_eq!(capsule.entities, email.entities);
    assert!(workspace.in_capsule(&email.id));
}

#[tokio::test]
async fn attach_and_detach_track_membership() {
    let (workspace, _) = default_workspace().await;
    let capsule = workspace
        .create_capsule(&session(), NewCapsule::new("Harbor Plaza", CapsuleType::Property))
        .await
        .unwrap();

    let attached = workspace
        .attach_email(&session(), &capsule.id, &EmailId::from("1"))
        .await
        .unwrap();
    assert_eq!(attached.emails.len(), 1);
    assert!(attached.entities.contains_label(
        capsule_mail::domain::EntityKind::Property,
        "harbor plaza"
    ));
    assert_eq!(workspace.capsules_for_email(&EmailId::from("1")).len(), 1);

    let detached = workspace
        .detach_email(&session(), &capsule.id, &EmailId::from("1"))
        .await
        .unwrap();
    assert!(detached.emails.is_empty());
    assert!(!workspace.in_capsule(&EmailId::from("1")));
}

#[tokio::test]
async fn attaching_unknown_email_is_not_found() {
    let (workspace, _) = default_workspace().await;
    let capsule = workspace
        .create_capsule(&session(), NewCapsule::new("Harbor Plaza", CapsuleType::Property))
        .await
        .unwrap();

    let result = workspace
        .attach_email(&session(), &capsule.id, &EmailId::from("404"))
        .await;
    assert!(matches!(result, Err(CoreError::NotFound { kind: RecordKind::Email, .. })));
}

#[tokio::test]
async fn follow_ups_come_due_and_complete() {
    let (workspace, _) = default_workspace().await;
    let capsule = workspace
        .create_capsule(&session(), NewCapsule::new("Harbor Plaza", CapsuleType::Property))
        .await
        .unwrap();

    let now = Utc::now();
    let updated = workspace
        .add_follow_up(&session(), &capsule.id, "Send estoppel", now - ChronoDuration::hours(2))
        .await
        .unwrap();
    workspace
        .add_follow_up(&session(), &capsule.id, "Closing", now + ChronoDuration::days(7))
        .await
        .unwrap();

    let due = workspace.pending_follow_ups(now);
    assert_eq!(due.len(), 1);
    assert_eq!(due[0].capsule_id, capsule.id);
    assert_eq!(due[0].follow_up.description, "Send estoppel");

    let follow_up_id = updated.follow_ups[0].id.clone();
    workspace
        .complete_follow_up(&session(), &capsule.id, &follow_up_id)
        .await
        .unwrap();
    assert!(workspace.pending_follow_ups(now).is_empty());
}

#[tokio::test]
async fn process_emails_refreshes_afterwards() {
    let backend = Arc::new(FakeBackend::with_emails(vec![lease_renewal(), invoice()]));
    let workspace = Workspace::new(Arc::clone(&backend) as Arc<dyn CapsuleBackend>, SyncSettings::default());

    let processed = workspace.process_emails(&session(), Some(1)).await.unwrap();
    assert_eq!(processed, 1);
    assert_eq!(workspace.emails().len(), 2);
}

// ============================================================================
// Concurrency scenarios
// ============================================================================

#[tokio::test]
async fn reject_policy_refuses_second_command_for_busy_email() {
    let (backend, gate) = FakeBackend::with_emails(vec![lease_renewal()]).gated();
    let backend = Arc::new(backend);
    let settings = SyncSettings {
        conflict_policy: ConflictPolicy::Reject,
        ..Default::default()
    };
    let workspace = workspace(Arc::clone(&backend), settings).await;
    let id = EmailId::from("1");

    let first = {
        let workspace = workspace.clone();
        let id = id.clone();
        tokio::spawn(async move { workspace.toggle_pin(&session(), &id).await })
    };
    wait_until_pending(&workspace, &SyncKey::Email(id.clone())).await;

    let second = workspace.toggle_archive(&session(), &id).await;
    assert!(matches!(second, Err(CoreError::Conflict(_))));

    gate.add_permits(1);
    let pinned = first.await.unwrap().unwrap();
    assert!(pinned.pinned);
    assert!(!pinned.archived);
}

#[tokio::test]
async fn queue_policy_runs_commands_in_order() {
    let (backend, gate) = FakeBackend::with_emails(vec![lease_renewal()]).gated();
    let backend = Arc::new(backend);
    let workspace = workspace(Arc::clone(&backend), SyncSettings::default()).await;
    let id = EmailId::from("1");

    let first = {
        let workspace = workspace.clone();
        let id = id.clone();
        tokio::spawn(async move { workspace.toggle_pin(&session(), &id).await })
    };
    wait_until_pending(&workspace, &SyncKey::Email(id.clone())).await;

    let second = {
        let workspace = workspace.clone();
        let id = id.clone();
        tokio::spawn(async move { workspace.toggle_pin(&session(), &id).await })
    };

    gate.add_permits(2);
    first.await.unwrap().unwrap();
    second.await.unwrap().unwrap();

    assert!(!workspace.email(&id).unwrap().pinned);
    assert_eq!(
        backend.recorded_updates(),
        vec![
            (id.clone(), FlagPatch::pinned(true)),
            (id.clone(), FlagPatch::pinned(false)),
        ]
    );
    assert_eq!(workspace.sync_stats().confirmed, 2);
}

#[tokio::test]
async fn different_emails_confirm_independently() {
    let (workspace, backend) = default_workspace().await;

    let session = session();
    let (first, third) = (EmailId::from("1"), EmailId::from("3"));
    let (a, b) = tokio::join!(
        workspace.toggle_pin(&session, &first),
        workspace.toggle_pin(&session, &third),
    );
    assert!(a.unwrap().pinned);
    assert!(b.unwrap().pinned);
    assert_eq!(backend.recorded_updates().len(), 2);
}

#[tokio::test]
async fn closed_view_never_applies_late_response() {
    let (backend, gate) = FakeBackend::with_emails(vec![lease_renewal()]).gated();
    let workspace = Workspace::new(Arc::new(backend), SyncSettings::default());
    let view = workspace.open_view();
    let session = session();
    let id = EmailId::from("1");

    let load = view.load_email(&session, &id);
    let close = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        view.close();
        gate.add_permits(1);
    };
    let (loaded, ()) = tokio::join!(load, close);

    assert_eq!(loaded.unwrap(), None);
    assert!(workspace.email(&id).is_err());
    assert!(workspace.emails().is_empty());
}

#[tokio::test]
async fn view_load_keeps_unconfirmed_local_flags() {
    let (backend, gate) = FakeBackend::with_emails(vec![lease_renewal()]).gated();
    let backend = Arc::new(backend);
    let workspace = workspace(Arc::clone(&backend), SyncSettings::default()).await;
    let id = EmailId::from("1");

    let pin = {
        let workspace = workspace.clone();
        let id = id.clone();
        tokio::spawn(async move { workspace.toggle_pin(&session(), &id).await })
    };
    wait_until_pending(&workspace, &SyncKey::Email(id.clone())).await;

    gate.add_permits(2);
    let view = workspace.open_view();
    let loaded = view.load_email(&session(), &id).await.unwrap().unwrap();
    assert!(loaded.pinned);

    pin.await.unwrap().unwrap();
    assert!(workspace.email(&id).unwrap().pinned);
}

#[tokio::test]
async fn late_refresh_does_not_undo_confirmed_change() {
    let (backend, list_gate) = FakeBackend::with_emails(vec![lease_renewal()]).list_gated();
    let backend = Arc::new(backend);
    list_gate.add_permits(1);
    let workspace = workspace(Arc::clone(&backend), SyncSettings::default()).await;
    let id = EmailId::from("1");

    // Snapshot taken while email 1 is still unpinned on the backend.
    let late_refresh = {
        let workspace = workspace.clone();
        tokio::spawn(async move { workspace.refresh(&session()).await })
    };
    while backend.list_calls.load(Ordering::SeqCst) < 2 {
        tokio::task::yield_now().await;
    }

    let pinned = workspace.toggle_pin(&session(), &id).await.unwrap();
    assert!(pinned.pinned);

    list_gate.add_permits(1);
    let summary = late_refresh.await.unwrap().unwrap();
    assert_eq!(summary.emails.kept_local, 1);
    assert!(workspace.email(&id).unwrap().pinned);

    // A refresh started after the confirmation sees the backend copy.
    list_gate.add_permits(1);
    let summary = workspace.refresh(&session()).await.unwrap();
    assert_eq!(summary.emails.updated, 1);
    assert!(workspace.email(&id).unwrap().pinned);
    assert!(backend.emails.lock().unwrap()[0].pinned);
}

//! Email record store.
//!
//! Holds emails in arrival order and exposes the flag transitions:
//!
//! - read: set on first selection or explicit mark-read, cleared only by
//!   explicit mark-unread
//! - pinned and archived: independent toggles
//!
//! Every transition that changes a flag marks the email dirty until the
//! sync layer confirms or rolls it back. Confirmations are numbered so that
//! backend data fetched before a confirmation never overwrites it.

use std::collections::{HashMap, HashSet};

use crate::domain::{Email, EmailId, FlagPatch};
use crate::error::{CoreError, Result};

/// Outcome of a flag transition.
#[derive(Debug, Clone, PartialEq)]
pub struct FlagChange {
    /// The email as it was before the transition.
    pub before: Email,
    /// The email after the transition.
    pub after: Email,
}

impl FlagChange {
    /// Returns true if any flag changed.
    pub fn changed(&self) -> bool {
        self.before.flags() != self.after.flags()
    }

    /// The minimal patch that turns `before` into `after`.
    pub fn patch(&self) -> FlagPatch {
        let diff = |a: bool, b: bool| (a != b).then_some(b);
        FlagPatch {
            read: diff(self.before.read, self.after.read),
            pinned: diff(self.before.pinned, self.after.pinned),
            archived: diff(self.before.archived, self.after.archived),
        }
    }
}

/// Counts reported by [`EmailStore::ingest`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Emails seen for the first time.
    pub added: usize,
    /// Known emails replaced with the backend copy.
    pub updated: usize,
    /// Known emails kept as-is because a local change is unconfirmed.
    pub kept_local: usize,
}

/// In-memory store of email records.
#[derive(Debug, Default)]
pub struct EmailStore {
    emails: Vec<Email>,
    index: HashMap<EmailId, usize>,
    dirty: HashSet<EmailId>,
    confirmations: u64,
    confirmed_at: HashMap<EmailId, u64>,
}

impl EmailStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding `emails` in the given order.
    pub fn with_emails(emails: impl IntoIterator<Item = Email>) -> Self {
        let mut store = Self::new();
        store.ingest(emails);
        store
    }

    /// Number of emails in the store.
    pub fn len(&self) -> usize {
        self.emails.len()
    }

    /// Returns true if the store holds no emails.
    pub fn is_empty(&self) -> bool {
        self.emails.is_empty()
    }

    /// Looks up an email by id.
    pub fn get(&self, id: &EmailId) -> Result<&Email> {
        self.index
            .get(id)
            .map(|&i| &self.emails[i])
            .ok_or_else(|| CoreError::email_not_found(id))
    }

    /// Returns true if the id is known.
    pub fn contains(&self, id: &EmailId) -> bool {
        self.index.contains_key(id)
    }

    /// All emails in arrival order.
    pub fn list(&self) -> &[Email] {
        &self.emails
    }

    /// Emails belonging to one conversation, in store order.
    pub fn thread(&self, thread_id: &str) -> Vec<&Email> {
        self.emails
            .iter()
            .filter(|e| e.thread_id.as_deref() == Some(thread_id))
            .collect()
    }

    /// Number of unread emails.
    pub fn unread_count(&self) -> usize {
        self.emails.iter().filter(|e| !e.read).count()
    }

    /// Current confirmation mark. Take it before fetching from the backend
    /// and hand it to [`EmailStore::ingest_as_of`].
    pub fn confirmation_mark(&self) -> u64 {
        self.confirmations
    }

    /// Merges emails delivered by the backend.
    ///
    /// New ids are appended in the order given. Known ids are replaced in
    /// place, unless the email has an unconfirmed local change, in which
    /// case the local copy wins.
    pub fn ingest(&mut self, emails: impl IntoIterator<Item = Email>) -> IngestSummary {
        self.ingest_as_of(emails, self.confirmations)
    }

    /// Like [`EmailStore::ingest`], for data fetched at `mark`.
    ///
    /// Emails confirmed after `mark` also keep their local copy.
    pub fn ingest_as_of(
        &mut self,
        emails: impl IntoIterator<Item = Email>,
        mark: u64,
    ) -> IngestSummary {
        let mut summary = IngestSummary::default();
        for email in emails {
            match self.index.get(&email.id) {
                Some(_) if self.keeps_local(&email.id, mark) => summary.kept_local += 1,
                Some(&i) => {
                    self.emails[i] = email;
                    summary.updated += 1;
                }
                None => {
                    self.index.insert(email.id.clone(), self.emails.len());
                    self.emails.push(email);
                    summary.added += 1;
                }
            }
        }
        tracing::debug!(
            added = summary.added,
            updated = summary.updated,
            kept_local = summary.kept_local,
            "Ingested emails"
        );
        summary
    }

    /// Applies a partial flag update.
    pub fn set_flags(&mut self, id: &EmailId, patch: FlagPatch) -> Result<FlagChange> {
        let i = *self
            .index
            .get(id)
            .ok_or_else(|| CoreError::email_not_found(id))?;

        let before = self.emails[i].clone();
        let changed = patch.apply_to(&mut self.emails[i]);
        if changed {
            self.dirty.insert(id.clone());
            tracing::debug!(email_id = %id, ?patch, "Email flags changed");
        }

        Ok(FlagChange {
            before,
            after: self.emails[i].clone(),
        })
    }

    /// Selects (opens) an email: marks it read the first time, no-op after.
    pub fn select(&mut self, id: &EmailId) -> Result<FlagChange> {
        if self.get(id)?.read {
            let email = self.get(id)?.clone();
            return Ok(FlagChange {
                before: email.clone(),
                after: email,
            });
        }
        self.set_flags(id, FlagPatch::read(true))
    }

    /// Explicitly marks an email read.
    pub fn mark_read(&mut self, id: &EmailId) -> Result<FlagChange> {
        self.set_flags(id, FlagPatch::read(true))
    }

    /// Explicitly marks an email unread.
    pub fn mark_unread(&mut self, id: &EmailId) -> Result<FlagChange> {
        self.set_flags(id, FlagPatch::read(false))
    }

    /// Flips the pinned flag.
    pub fn toggle_pin(&mut self, id: &EmailId) -> Result<FlagChange> {
        let pinned = self.get(id)?.pinned;
        self.set_flags(id, FlagPatch::pinned(!pinned))
    }

    /// Flips the archived flag.
    pub fn toggle_archive(&mut self, id: &EmailId) -> Result<FlagChange> {
        let archived = self.get(id)?.archived;
        self.set_flags(id, FlagPatch::archived(!archived))
    }

    /// Puts back a previous snapshot of an email and clears its dirty mark.
    pub fn restore(&mut self, snapshot: Email) -> Result<()> {
        let i = *self
            .index
            .get(&snapshot.id)
            .ok_or_else(|| CoreError::email_not_found(&snapshot.id))?;
        self.dirty.remove(&snapshot.id);
        self.emails[i] = snapshot;
        Ok(())
    }

    /// Clears the dirty mark once the backend confirmed the change.
    pub fn mark_clean(&mut self, id: &EmailId) {
        self.dirty.remove(id);
        self.confirmations += 1;
        self.confirmed_at.insert(id.clone(), self.confirmations);
    }

    fn keeps_local(&self, id: &EmailId, mark: u64) -> bool {
        self.dirty.contains(id) || self.confirmed_at.get(id).is_some_and(|&seq| seq > mark)
    }

    /// Returns true if the email has an unconfirmed local change.
    pub fn is_dirty(&self, id: &EmailId) -> bool {
        self.dirty.contains(id)
    }

    /// Ids with unconfirmed local changes, in store order.
    pub fn dirty_ids(&self) -> Vec<EmailId> {
        self.emails
            .iter()
            .filter(|e| self.dirty.contains(&e.id))
            .map(|e| e.id.clone())
            .collect()
    }
}

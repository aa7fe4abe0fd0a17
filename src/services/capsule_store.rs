//! Capsule store.
//!
//! Holds capsules in creation order and owns their lifecycle:
//! creation with defaults, patch updates, the close/reopen toggle,
//! follow-ups, and the lookup queries used by the capsule views.
//!
//! Every mutation runs against a copy of the capsule and is only written
//! back once it succeeds, so a rejected command leaves the store as it was.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};

use super::filter::CapsuleFilter;
use crate::domain::{
    Capsule, CapsuleId, CapsulePatch, CapsuleStatus, CapsuleType, Email, EmailId, EntityKind,
    FollowUp, FollowUpId, NewCapsule,
};
use crate::error::{CoreError, Result};

/// Outcome of a capsule mutation.
#[derive(Debug, Clone, PartialEq)]
pub struct CapsuleChange {
    /// The capsule as it was before the mutation.
    pub before: Capsule,
    /// The capsule after the mutation.
    pub after: Capsule,
}

/// A due follow-up, tagged with the capsule it belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingFollowUp {
    pub capsule_id: CapsuleId,
    pub capsule_title: String,
    pub follow_up: FollowUp,
}

/// In-memory store of capsules.
#[derive(Debug, Default)]
pub struct CapsuleStore {
    capsules: Vec<Capsule>,
    index: HashMap<CapsuleId, usize>,
    dirty: HashSet<CapsuleId>,
    confirmations: u64,
    confirmed_at: HashMap<CapsuleId, u64>,
}

impl CapsuleStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of capsules.
    pub fn len(&self) -> usize {
        self.capsules.len()
    }

    /// Returns true if there are no capsules.
    pub fn is_empty(&self) -> bool {
        self.capsules.is_empty()
    }

    /// Looks up a capsule by id.
    pub fn get(&self, id: &CapsuleId) -> Result<&Capsule> {
        self.index
            .get(id)
            .map(|&i| &self.capsules[i])
            .ok_or_else(|| CoreError::capsule_not_found(id))
    }

    /// All capsules in creation order.
    pub fn list(&self) -> &[Capsule] {
        &self.capsules
    }

    /// Creates a capsule from user input.
    ///
    /// Assigns a fresh id, stamps both timestamps with the current time and
    /// defaults status to Active and priority to 3. Duplicate member emails
    /// in the input are dropped.
    pub fn create(&mut self, input: NewCapsule) -> Result<Capsule> {
        let title = validate_title(&input.title)?;
        let now = Utc::now();

        let mut emails: Vec<Email> = Vec::with_capacity(input.emails.len());
        for email in input.emails {
            if !emails.iter().any(|e| e.id == email.id) {
                emails.push(email);
            }
        }

        let capsule = Capsule {
            id: CapsuleId::generate(),
            title,
            capsule_type: input.capsule_type,
            status: input.status.unwrap_or_default(),
            priority: input.priority.unwrap_or_default(),
            summary: input.summary,
            user_notes: input.user_notes,
            created_at: now,
            updated_at: now,
            emails,
            entities: input.entities,
            overridden_kinds: Default::default(),
            follow_ups: Vec::new(),
        };

        self.index.insert(capsule.id.clone(), self.capsules.len());
        self.capsules.push(capsule.clone());
        self.dirty.insert(capsule.id.clone());
        tracing::debug!(capsule_id = %capsule.id, title = %capsule.title, "Capsule created");
        Ok(capsule)
    }

    /// Current confirmation mark, see [`CapsuleStore::ingest_as_of`].
    pub fn confirmation_mark(&self) -> u64 {
        self.confirmations
    }

    /// Merges capsules delivered by the backend.
    ///
    /// Known ids with an unconfirmed local change keep their local copy.
    /// Returns the number of capsules added or replaced.
    pub fn ingest(&mut self, capsules: impl IntoIterator<Item = Capsule>) -> usize {
        self.ingest_as_of(capsules, self.confirmations)
    }

    /// Like [`CapsuleStore::ingest`], for data fetched at `mark`.
    ///
    /// Capsules confirmed after `mark` also keep their local copy.
    pub fn ingest_as_of(&mut self, capsules: impl IntoIterator<Item = Capsule>, mark: u64) -> usize {
        let mut applied = 0;
        for capsule in capsules {
            match self.index.get(&capsule.id) {
                Some(_) if self.keeps_local(&capsule.id, mark) => {}
                Some(&i) => {
                    self.capsules[i] = capsule;
                    applied += 1;
                }
                None => {
                    self.index.insert(capsule.id.clone(), self.capsules.len());
                    self.capsules.push(capsule);
                    applied += 1;
                }
            }
        }
        applied
    }

    /// Applies a mutation to a copy of the capsule and stores the result.
    ///
    /// `updated_at` is bumped after `f` succeeds. If `f` fails the store is
    /// left untouched.
    pub fn modify<F>(&mut self, id: &CapsuleId, f: F) -> Result<CapsuleChange>
    where
        F: FnOnce(&mut Capsule) -> Result<()>,
    {
        let i = *self
            .index
            .get(id)
            .ok_or_else(|| CoreError::capsule_not_found(id))?;

        let before = self.capsules[i].clone();
        let mut after = before.clone();
        f(&mut after)?;
        after.touch(Utc::now());

        self.capsules[i] = after.clone();
        self.dirty.insert(id.clone());
        Ok(CapsuleChange { before, after })
    }

    /// Merges a patch into a capsule.
    pub fn update(&mut self, id: &CapsuleId, patch: &CapsulePatch) -> Result<CapsuleChange> {
        if let Some(title) = &patch.title {
            validate_title(title)?;
        }
        let change = self.modify(id, |capsule| {
            patch.apply_to(capsule);
            Ok(())
        })?;
        tracing::debug!(capsule_id = %id, "Capsule updated");
        Ok(change)
    }

    /// Closes an open capsule, or reopens a closed one as Active.
    pub fn archive(&mut self, id: &CapsuleId) -> Result<CapsuleChange> {
        self.modify(id, |capsule| {
            capsule.status = if capsule.is_closed() {
                CapsuleStatus::Active
            } else {
                CapsuleStatus::Closed
            };
            Ok(())
        })
    }

    /// Adds a follow-up reminder to a capsule.
    pub fn add_follow_up(
        &mut self,
        id: &CapsuleId,
        description: &str,
        due_date: DateTime<Utc>,
    ) -> Result<CapsuleChange> {
        let description = description.trim();
        if description.is_empty() {
            return Err(CoreError::Validation(
                "follow-up description cannot be empty".to_string(),
            ));
        }

        self.modify(id, |capsule| {
            capsule.follow_ups.push(FollowUp {
                id: FollowUpId::generate(),
                description: description.to_string(),
                due_date,
                completed: false,
            });
            Ok(())
        })
    }

    /// Marks a follow-up as completed.
    pub fn complete_follow_up(
        &mut self,
        id: &CapsuleId,
        follow_up_id: &FollowUpId,
    ) -> Result<CapsuleChange> {
        self.modify(id, |capsule| {
            let follow_up = capsule
                .follow_ups
                .iter_mut()
                .find(|f| &f.id == follow_up_id)
                .ok_or_else(|| CoreError::follow_up_not_found(follow_up_id))?;
            follow_up.completed = true;
            Ok(())
        })
    }

    /// Every incomplete follow-up due at or before `now`, ordered by due date.
    pub fn pending_follow_ups(&self, now: DateTime<Utc>) -> Vec<PendingFollowUp> {
        let mut pending: Vec<PendingFollowUp> = self
            .capsules
            .iter()
            .flat_map(|capsule| {
                capsule
                    .follow_ups
                    .iter()
                    .filter(|f| !f.completed && f.due_date <= now)
                    .map(|f| PendingFollowUp {
                        capsule_id: capsule.id.clone(),
                        capsule_title: capsule.title.clone(),
                        follow_up: f.clone(),
                    })
            })
            .collect();
        pending.sort_by_key(|p| p.follow_up.due_date);
        pending
    }

    /// Capsules matching a filter, in creation order.
    pub fn list_filtered(&self, filter: &CapsuleFilter) -> Vec<&Capsule> {
        let matches = self.capsules.iter().filter(|c| filter.matches(c));
        match filter.limit {
            Some(limit) => matches.take(limit).collect(),
            None => matches.collect(),
        }
    }

    /// Capsules that contain a given email.
    pub fn capsules_for_email(&self, email_id: &EmailId) -> Vec<&Capsule> {
        self.capsules
            .iter()
            .filter(|c| c.contains_email(email_id))
            .collect()
    }

    /// Returns true if any capsule contains the email.
    pub fn contains_email(&self, email_id: &EmailId) -> bool {
        self.capsules.iter().any(|c| c.contains_email(email_id))
    }

    /// Capsules that mention a property, matched by label.
    pub fn capsules_by_property(&self, property: &str) -> Vec<&Capsule> {
        self.capsules
            .iter()
            .filter(|c| c.entities.contains_label(EntityKind::Property, property))
            .collect()
    }

    /// Capsules of one type.
    pub fn capsules_by_type(&self, capsule_type: CapsuleType) -> Vec<&Capsule> {
        self.capsules
            .iter()
            .filter(|c| c.capsule_type == capsule_type)
            .collect()
    }

    /// Puts back a previous snapshot of a capsule and clears its dirty mark.
    pub fn restore(&mut self, snapshot: Capsule) -> Result<()> {
        let i = *self
            .index
            .get(&snapshot.id)
            .ok_or_else(|| CoreError::capsule_not_found(&snapshot.id))?;
        self.dirty.remove(&snapshot.id);
        self.capsules[i] = snapshot;
        Ok(())
    }

    /// Drops a capsule whose creation the backend never confirmed.
    pub fn remove_unconfirmed(&mut self, id: &CapsuleId) -> Result<Capsule> {
        let i = *self
            .index
            .get(id)
            .ok_or_else(|| CoreError::capsule_not_found(id))?;
        let removed = self.capsules.remove(i);
        self.dirty.remove(id);
        self.index = self
            .capsules
            .iter()
            .enumerate()
            .map(|(i, c)| (c.id.clone(), i))
            .collect();
        Ok(removed)
    }

    /// Clears the dirty mark once the backend confirmed the change.
    pub fn mark_clean(&mut self, id: &CapsuleId) {
        self.dirty.remove(id);
        self.confirmations += 1;
        self.confirmed_at.insert(id.clone(), self.confirmations);
    }

    fn keeps_local(&self, id: &CapsuleId, mark: u64) -> bool {
        self.dirty.contains(id) || self.confirmed_at.get(id).is_some_and(|&seq| seq > mark)
    }

    /// Returns true if the capsule has an unconfirmed local change.
    pub fn is_dirty(&self, id: &CapsuleId) -> bool {
        self.dirty.contains(id)
    }
}

fn validate_title(title: &str) -> Result<String> {
    let title = title.trim();
    if title.is_empty() {
        return Err(CoreError::Validation("title cannot be empty".to_string()));
    }
    Ok(title.to_string())
}

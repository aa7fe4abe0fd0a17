//! Email-to-capsule association.
//!
//! Attaching an email copies its extracted entities into the capsule's
//! catalog. Kinds the user overrode by hand are left alone. Membership is
//! the only source of the derived `in_capsule` flag.

use serde::{Deserialize, Serialize};

use super::capsule_store::{CapsuleChange, CapsuleStore};
use crate::domain::{Capsule, CapsuleId, CapsuleType, Email, EmailId, NewCapsule};
use crate::error::Result;

/// Title used when neither the caller nor the email provide one.
pub const UNTITLED_CAPSULE: &str = "Untitled capsule";

/// Options for [`create_capsule_from_email`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapsuleFromEmail {
    /// Capsule title; defaults to the email subject.
    #[serde(default)]
    pub title: Option<String>,
    #[serde(rename = "type")]
    pub capsule_type: CapsuleType,
    /// Whether the email becomes the first member.
    #[serde(default = "default_include_email")]
    pub include_email: bool,
}

fn default_include_email() -> bool {
    true
}

impl CapsuleFromEmail {
    /// Options that include the email and take the title from its subject.
    pub fn new(capsule_type: CapsuleType) -> Self {
        Self {
            title: None,
            capsule_type,
            include_email: true,
        }
    }

    /// Overrides the title.
    pub fn title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Sets whether the email becomes a member.
    pub fn include_email(mut self, include: bool) -> Self {
        self.include_email = include;
        self
    }
}

/// An email decorated with its derived capsule membership.
#[derive(Debug, Clone, PartialEq)]
pub struct MailboxEntry {
    pub email: Email,
    pub in_capsule: bool,
}

/// Adds an email to a capsule and merges its entities.
///
/// Attaching an email that is already a member is a no-op apart from
/// re-merging entities, which adds nothing new.
pub fn attach_email(
    capsules: &mut CapsuleStore,
    capsule_id: &CapsuleId,
    email: &Email,
) -> Result<CapsuleChange> {
    let change = capsules.modify(capsule_id, |capsule| {
        if !capsule.contains_email(&email.id) {
            capsule.emails.push(email.clone());
        }
        let frozen = capsule.overridden_kinds.clone();
        capsule.entities.merge_from(&email.entities, &frozen);
        Ok(())
    })?;
    tracing::debug!(
        capsule_id = %capsule_id,
        email_id = %email.id,
        members = change.after.emails.len(),
        "Email attached to capsule"
    );
    Ok(change)
}

/// Removes an email from a capsule. Entities copied from it are kept.
pub fn detach_email(
    capsules: &mut CapsuleStore,
    capsule_id: &CapsuleId,
    email_id: &EmailId,
) -> Result<CapsuleChange> {
    capsules.modify(capsule_id, |capsule| {
        capsule.emails.retain(|e| &e.id != email_id);
        Ok(())
    })
}

/// Creates a capsule seeded from an email.
///
/// The capsule starts with the email's entities. It contains the email
/// only when `options.include_email` is set.
pub fn create_capsule_from_email(
    capsules: &mut CapsuleStore,
    email: &Email,
    options: &CapsuleFromEmail,
) -> Result<Capsule> {
    let title = match &options.title {
        Some(title) => title.clone(),
        None if email.subject.trim().is_empty() => UNTITLED_CAPSULE.to_string(),
        None => email.subject.clone(),
    };

    let mut input = NewCapsule::new(title, options.capsule_type);
    input.entities = email.entities.clone();
    if options.include_email {
        input.emails.push(email.clone());
    }

    capsules.create(input)
}

/// Returns true if any capsule contains the email.
pub fn in_capsule(capsules: &CapsuleStore, email_id: &EmailId) -> bool {
    capsules.contains_email(email_id)
}

/// Pairs each email with its derived `in_capsule` flag, keeping order.
pub fn decorate<'a>(
    capsules: &CapsuleStore,
    emails: impl IntoIterator<Item = &'a Email>,
) -> Vec<MailboxEntry> {
    emails
        .into_iter()
        .map(|email| MailboxEntry {
            in_capsule: in_capsule(capsules, &email.id),
            email: email.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{CapsulePatch, Entity, EntityCatalog, EntityKind};
    use chrono::Utc;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn lease_email() -> Email {
        let mut entities = EntityCatalog::new();
        entities.properties.push(Entity::named("Harbor Plaza"));
        entities.people.push(Entity::named("Dana Cole"));
        Email::new("1", "dana@example.com", "Lease renewal", Utc::now()).with_entities(entities)
    }

    #[test]
    fn create_from_email_with_include_email() {
        let mut store = CapsuleStore::new();
        let email = lease_email();

        let capsule =
            create_capsule_from_email(&mut store, &email, &CapsuleFromEmail::new(CapsuleType::Deal))
                .unwrap();

        assert_eq!(capsule.title, "Lease renewal");
        assert_eq!(capsule.emails, vec![email.clone()]);
        assert_eq!(capsule.entities, email.entities);
        assert!(in_capsule(&store, &email.id));
    }

    #[test]
    fn create_from_email_without_membership() {
        let mut store = CapsuleStore::new();
        let email = lease_email();
        let options = CapsuleFromEmail::new(CapsuleType::Property)
            .title("Harbor Plaza")
            .include_email(false);

        let capsule = create_capsule_from_email(&mut store, &email, &options).unwrap();
        assert_eq!(capsule.title, "Harbor Plaza");
        assert!(capsule.emails.is_empty());
        assert_eq!(capsule.entities, email.entities);
        assert!(!in_capsule(&store, &email.id));
    }

    #[test]
    fn blank_subject_gets_placeholder_title() {
        let mut store = CapsuleStore::new();
        let email = Email::new("9", "x@example.com", "  ", Utc::now());
        let capsule =
            create_capsule_from_email(&mut store, &email, &CapsuleFromEmail::new(CapsuleType::Other))
                .unwrap();
        assert_eq!(capsule.title, UNTITLED_CAPSULE);
    }

    #[test]
    fn attach_is_idempotent_and_merges_by_label() {
        let mut store = CapsuleStore::new();
        let capsule = store
            .create(NewCapsule::new("Harbor Plaza", CapsuleType::Property))
            .unwrap();

        let first = lease_email();
        let mut other_entities = EntityCatalog::new();
        other_entities.properties.push(Entity::named("harbor plaza "));
        other_entities.companies.push(Entity::named("Acme Realty"));
        let second =
            Email::new("2", "acme@example.com", "Re: Lease", Utc::now()).with_entities(other_entities);

        attach_email(&mut store, &capsule.id, &first).unwrap();
        attach_email(&mut store, &capsule.id, &first).unwrap();
        let change = attach_email(&mut store, &capsule.id, &second).unwrap();

        let members: Vec<_> = change.after.emails.iter().map(|e| e.id.0.as_str()).collect();
        assert_eq!(members, vec!["1", "2"]);
        assert_eq!(change.after.entities.properties.len(), 1);
        assert_eq!(change.after.entities.people.len(), 1);
        assert_eq!(change.after.entities.companies.len(), 1);
    }

    #[test]
    fn attach_respects_manual_overrides() {
        let mut store = CapsuleStore::new();
        let capsule = store
            .create(NewCapsule::new("Harbor Plaza", CapsuleType::Property))
            .unwrap();

        let mut overrides = BTreeMap::new();
        overrides.insert(EntityKind::Person, vec![Entity::named("Sam Park")]);
        store
            .update(
                &capsule.id,
                &CapsulePatch {
                    entities: Some(overrides),
                    ..Default::default()
                },
            )
            .unwrap();

        let change = attach_email(&mut store, &capsule.id, &lease_email()).unwrap();
        assert_eq!(change.after.entities.people, vec![Entity::named("Sam Park")]);
        assert_eq!(change.after.entities.properties.len(), 1);
    }

    #[test]
    fn attach_to_unknown_capsule_fails_cleanly() {
        let mut store = CapsuleStore::new();
        let result = attach_email(&mut store, &CapsuleId::from("missing"), &lease_email());
        assert!(result.is_err());
        assert!(store.is_empty());
    }

    #[test]
    fn detach_keeps_entities() {
        let mut store = CapsuleStore::new();
        let email = lease_email();
        let capsule =
            create_capsule_from_email(&mut store, &email, &CapsuleFromEmail::new(CapsuleType::Deal))
                .unwrap();

        let change = detach_email(&mut store, &capsule.id, &email.id).unwrap();
        assert!(change.after.emails.is_empty());
        assert_eq!(change.after.entities, email.entities);
        assert!(!in_capsule(&store, &email.id));
    }

    #[test]
    fn decorate_marks_members() {
        let mut store = CapsuleStore::new();
        let member = lease_email();
        let loose = Email::new("2", "b@example.com", "Invoice", Utc::now());
        create_capsule_from_email(&mut store, &member, &CapsuleFromEmail::new(CapsuleType::Deal))
            .unwrap();

        let emails = vec![member, loose];
        let entries = decorate(&store, &emails);
        let flags: Vec<_> = entries.iter().map(|e| e.in_capsule).collect();
        assert_eq!(flags, vec![true, false]);
    }
}

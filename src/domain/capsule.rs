//! Capsule domain types.
//!
//! A capsule groups related emails around a deal, property, client or
//! project, together with the entities aggregated from those emails.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CapsuleId, Email, EmailId, Entity, EntityCatalog, EntityKind, FollowUpId};
use crate::error::CoreError;

/// What a capsule is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CapsuleType {
    Property,
    Deal,
    Client,
    Project,
    Other,
}

impl CapsuleType {
    /// Returns all capsule types.
    pub fn all() -> &'static [CapsuleType] {
        &[
            CapsuleType::Property,
            CapsuleType::Deal,
            CapsuleType::Client,
            CapsuleType::Project,
            CapsuleType::Other,
        ]
    }

    /// Wire name of the type.
    pub fn as_str(&self) -> &'static str {
        match self {
            CapsuleType::Property => "Property",
            CapsuleType::Deal => "Deal",
            CapsuleType::Client => "Client",
            CapsuleType::Project => "Project",
            CapsuleType::Other => "Other",
        }
    }
}

impl fmt::Display for CapsuleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapsuleType {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .iter()
            .copied()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CoreError::Validation(format!("unknown capsule type: {s:?}")))
    }
}

/// Lifecycle status of a capsule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum CapsuleStatus {
    #[default]
    Active,
    Pending,
    Closed,
}

impl CapsuleStatus {
    /// Wire name of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            CapsuleStatus::Active => "Active",
            CapsuleStatus::Pending => "Pending",
            CapsuleStatus::Closed => "Closed",
        }
    }
}

impl fmt::Display for CapsuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CapsuleStatus {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [
            CapsuleStatus::Active,
            CapsuleStatus::Pending,
            CapsuleStatus::Closed,
        ]
        .into_iter()
        .find(|st| st.as_str().eq_ignore_ascii_case(s.trim()))
        .ok_or_else(|| CoreError::Validation(format!("unknown capsule status: {s:?}")))
    }
}

/// Capsule priority, 1 (highest) to 5 (lowest).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Priority(u8);

impl Priority {
    pub const HIGHEST: Priority = Priority(1);
    pub const LOWEST: Priority = Priority(5);

    /// Creates a priority, rejecting values outside 1..=5.
    pub fn new(value: u8) -> Result<Self, CoreError> {
        if (Self::HIGHEST.0..=Self::LOWEST.0).contains(&value) {
            Ok(Self(value))
        } else {
            Err(CoreError::Validation(format!(
                "priority must be between 1 and 5, got {value}"
            )))
        }
    }

    /// Returns the numeric value.
    pub fn value(&self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Self(3)
    }
}

impl TryFrom<u8> for Priority {
    type Error = CoreError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Priority> for u8 {
    fn from(p: Priority) -> Self {
        p.0
    }
}

/// A dated reminder attached to a capsule.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FollowUp {
    pub id: FollowUpId,
    pub description: String,
    pub due_date: DateTime<Utc>,
    #[serde(default)]
    pub completed: bool,
}

/// A user-curated folder of related emails.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Capsule {
    #[serde(alias = "_id")]
    pub id: CapsuleId,
    pub title: String,
    #[serde(rename = "type")]
    pub capsule_type: CapsuleType,
    #[serde(default)]
    pub status: CapsuleStatus,
    #[serde(default)]
    pub priority: Priority,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub user_notes: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Member emails, in the order they were attached.
    #[serde(default)]
    pub emails: Vec<Email>,
    /// Entities aggregated from member emails, plus manual overrides.
    #[serde(default)]
    pub entities: EntityCatalog,
    /// Entity kinds the user set by hand; aggregation leaves them alone.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub overridden_kinds: BTreeSet<EntityKind>,
    #[serde(default)]
    pub follow_ups: Vec<FollowUp>,
}

impl Capsule {
    /// Returns true if the email is a member of this capsule.
    pub fn contains_email(&self, email_id: &EmailId) -> bool {
        self.emails.iter().any(|e| &e.id == email_id)
    }

    /// Returns true if the capsule is closed.
    pub fn is_closed(&self) -> bool {
        self.status == CapsuleStatus::Closed
    }

    /// Bumps `updated_at`, never moving it before `created_at`.
    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.updated_at = now.max(self.created_at);
    }
}

/// Input for creating a capsule (`POST /capsules` body).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewCapsule {
    pub title: String,
    #[serde(rename = "type")]
    pub capsule_type: CapsuleType,
    #[serde(default)]
    pub status: Option<CapsuleStatus>,
    #[serde(default)]
    pub priority: Option<Priority>,
    #[serde(default)]
    pub summary: String,
    #[serde(default)]
    pub user_notes: String,
    #[serde(default)]
    pub entities: EntityCatalog,
    #[serde(default)]
    pub emails: Vec<Email>,
}

impl NewCapsule {
    /// Creates input with the given title and type and default everything else.
    pub fn new(title: impl Into<String>, capsule_type: CapsuleType) -> Self {
        Self {
            title: title.into(),
            capsule_type,
            status: None,
            priority: None,
            summary: String::new(),
            user_notes: String::new(),
            entities: EntityCatalog::default(),
            emails: Vec::new(),
        }
    }

    /// Sets the initial status.
    pub fn status(mut self, status: CapsuleStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the priority.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }

    /// Sets the summary.
    pub fn summary(mut self, summary: impl Into<String>) -> Self {
        self.summary = summary.into();
        self
    }
}

/// Partial update of a capsule's user-editable fields.
///
/// `entities` replaces the listed kinds and marks them as overridden.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CapsulePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub capsule_type: Option<CapsuleType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<CapsuleStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<Priority>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_notes: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<BTreeMap<EntityKind, Vec<Entity>>>,
}

impl CapsulePatch {
    /// Patch changing only the status.
    pub fn status(status: CapsuleStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }

    /// Patch changing only the title.
    pub fn title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Default::default()
        }
    }

    /// Writes the patch into `capsule`. Does not validate or touch timestamps.
    pub(crate) fn apply_to(&self, capsule: &mut Capsule) {
        if let Some(title) = &self.title {
            capsule.title = title.trim().to_string();
        }
        if let Some(capsule_type) = self.capsule_type {
            capsule.capsule_type = capsule_type;
        }
        if let Some(status) = self.status {
            capsule.status = status;
        }
        if let Some(priority) = self.priority {
            capsule.priority = priority;
        }
        if let Some(summary) = &self.summary {
            capsule.summary = summary.clone();
        }
        if let Some(notes) = &self.user_notes {
            capsule.user_notes = notes.clone();
        }
        if let Some(overrides) = &self.entities {
            for (kind, entities) in overrides {
                *capsule.entities.get_mut(*kind) = entities.clone();
                capsule.overridden_kinds.insert(*kind);
            }
        }
    }
}

//! Extracted entity types.
//!
//! Entities are produced by the external extraction pipeline and attached
//! to emails. This crate only reads them, copies them into capsules and
//! merges them when emails join a capsule.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Kind of extracted mention.
///
/// Serialized with the plural key used by the catalog wire format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    #[serde(rename = "properties")]
    Property,
    #[serde(rename = "people")]
    Person,
    #[serde(rename = "companies")]
    Company,
    #[serde(rename = "dates")]
    Date,
}

impl EntityKind {
    /// Returns all entity kinds in catalog order.
    pub fn all() -> &'static [EntityKind] {
        &[
            EntityKind::Property,
            EntityKind::Person,
            EntityKind::Company,
            EntityKind::Date,
        ]
    }
}

/// A single extracted mention.
///
/// Properties are labelled by `name` or `address`, people and companies by
/// `name`, dates by `text`. Any other attribute the extractor attached is
/// kept in `attributes` and round-trips untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Extractor-specific extras (confidence, role, normalized value...).
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

impl Entity {
    /// Creates an entity labelled by name.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Default::default()
        }
    }

    /// Creates a property entity labelled by street address.
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: Some(address.into()),
            ..Default::default()
        }
    }

    /// Creates an entity labelled by free text (dates).
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    /// Returns the display label: `name`, then `address`, then `text`.
    pub fn label(&self) -> Option<&str> {
        self.name
            .as_deref()
            .or(self.address.as_deref())
            .or(self.text.as_deref())
            .filter(|label| !label.trim().is_empty())
    }

    /// Normalized label used for de-duplication.
    fn label_key(&self) -> Option<String> {
        self.label().map(|label| label.trim().to_lowercase())
    }
}

/// Extracted entities grouped by kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityCatalog {
    #[serde(default)]
    pub properties: Vec<Entity>,
    #[serde(default)]
    pub people: Vec<Entity>,
    #[serde(default)]
    pub companies: Vec<Entity>,
    #[serde(default)]
    pub dates: Vec<Entity>,
}

impl EntityCatalog {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the mentions of one kind.
    pub fn get(&self, kind: EntityKind) -> &[Entity] {
        match kind {
            EntityKind::Property => &self.properties,
            EntityKind::Person => &self.people,
            EntityKind::Company => &self.companies,
            EntityKind::Date => &self.dates,
        }
    }

    /// Returns the mentions of one kind for modification.
    pub fn get_mut(&mut self, kind: EntityKind) -> &mut Vec<Entity> {
        match kind {
            EntityKind::Property => &mut self.properties,
            EntityKind::Person => &mut self.people,
            EntityKind::Company => &mut self.companies,
            EntityKind::Date => &mut self.dates,
        }
    }

    /// Adds a mention unless one with the same label is already present.
    ///
    /// Returns true if the mention was added. Unlabelled mentions are
    /// ignored.
    pub fn insert(&mut self, kind: EntityKind, entity: Entity) -> bool {
        let Some(key) = entity.label_key() else {
            return false;
        };
        let list = self.get_mut(kind);
        if list.iter().any(|e| e.label_key().as_deref() == Some(key.as_str())) {
            return false;
        }
        list.push(entity);
        true
    }

    /// Returns true if a mention of `kind` carries `label` (case-insensitive).
    pub fn contains_label(&self, kind: EntityKind, label: &str) -> bool {
        let key = label.trim().to_lowercase();
        self.get(kind)
            .iter()
            .any(|e| e.label_key().as_deref() == Some(key.as_str()))
    }

    /// Unions `other` into this catalog, kind by kind, de-duplicating by
    /// label and leaving the kinds listed in `frozen` untouched.
    ///
    /// Returns the number of mentions added.
    pub fn merge_from(&mut self, other: &EntityCatalog, frozen: &BTreeSet<EntityKind>) -> usize {
        let mut added = 0;
        for &kind in EntityKind::all() {
            if frozen.contains(&kind) {
                continue;
            }
            for entity in other.get(kind) {
                if self.insert(kind, entity.clone()) {
                    added += 1;
                }
            }
        }
        added
    }

    /// Total number of mentions across all kinds.
    pub fn len(&self) -> usize {
        EntityKind::all().iter().map(|&k| self.get(k).len()).sum()
    }

    /// Returns true if no mentions are present.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

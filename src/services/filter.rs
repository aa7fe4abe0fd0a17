//! Mailbox filtering and search.
//!
//! A [`MailboxFilter`] combines a category predicate with an optional
//! free-text query. Results keep the store's order; nothing is re-sorted.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::{Capsule, CapsuleStatus, CapsuleType, Email};
use crate::error::CoreError;

/// Mailbox categories shown in the sidebar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Every email.
    #[default]
    All,
    /// Everything not archived.
    Inbox,
    /// Emails not yet read.
    Unread,
    /// Emails the user pinned.
    Pinned,
    /// Archived emails.
    Archived,
}

impl Category {
    /// Returns all categories in sidebar order.
    pub fn all() -> &'static [Category] {
        &[
            Category::All,
            Category::Inbox,
            Category::Unread,
            Category::Pinned,
            Category::Archived,
        ]
    }

    /// Lowercase name of the category.
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::All => "all",
            Category::Inbox => "inbox",
            Category::Unread => "unread",
            Category::Pinned => "pinned",
            Category::Archived => "archived",
        }
    }

    /// Checks the category predicate against an email.
    pub fn matches(&self, email: &Email) -> bool {
        match self {
            Category::All => true,
            Category::Inbox => !email.archived,
            Category::Unread => !email.read,
            Category::Pinned => email.pinned,
            Category::Archived => email.archived,
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        Self::all()
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s))
            .ok_or_else(|| CoreError::Validation(format!("unknown mailbox category: {s:?}")))
    }
}

/// Category plus free-text query over the mailbox.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MailboxFilter {
    /// Category predicate.
    pub category: Category,
    /// Free-text query; blank means no text predicate.
    pub query: String,
}

impl MailboxFilter {
    /// Creates a filter for a category with no query.
    pub fn new(category: Category) -> Self {
        Self {
            category,
            query: String::new(),
        }
    }

    /// Sets the free-text query.
    pub fn search(mut self, query: impl Into<String>) -> Self {
        self.query = query.into();
        self
    }

    /// Checks both predicates against an email.
    pub fn matches(&self, email: &Email) -> bool {
        if !self.category.matches(email) {
            return false;
        }

        let query = self.query.trim();
        if query.is_empty() {
            return true;
        }

        let needle = query.to_lowercase();
        let hit = |field: &str| field.to_lowercase().contains(&needle);
        hit(&email.subject)
            || hit(&email.sender)
            || email.sender_name.as_deref().map(hit).unwrap_or(false)
            || hit(&email.body_text)
    }

    /// Returns the matching emails in their original order.
    pub fn apply<'a>(&self, emails: &'a [Email]) -> Vec<&'a Email> {
        emails.iter().filter(|e| self.matches(e)).collect()
    }
}

/// Filter for capsule listings.
#[derive(Debug, Clone, Default)]
pub struct CapsuleFilter {
    /// Only capsules in this status.
    pub status: Option<CapsuleStatus>,
    /// Only capsules of this type.
    pub capsule_type: Option<CapsuleType>,
    /// Search query over title and summary.
    pub search: Option<String>,
    /// Maximum results to return.
    pub limit: Option<usize>,
}

impl CapsuleFilter {
    /// Creates an empty filter.
    pub fn new() -> Self {
        Self::default()
    }

    /// Filters to one status.
    pub fn status(mut self, status: CapsuleStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Filters to one capsule type.
    pub fn capsule_type(mut self, capsule_type: CapsuleType) -> Self {
        self.capsule_type = Some(capsule_type);
        self
    }

    /// Adds a search query.
    pub fn search(mut self, query: impl Into<String>) -> Self {
        self.search = Some(query.into());
        self
    }

    /// Sets maximum results.
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Checks if a capsule matches this filter (ignores `limit`).
    pub fn matches(&self, capsule: &Capsule) -> bool {
        if let Some(status) = self.status {
            if capsule.status != status {
                return false;
            }
        }

        if let Some(capsule_type) = self.capsule_type {
            if capsule.capsule_type != capsule_type {
                return false;
            }
        }

        if let Some(ref query) = self.search {
            let query_lower = query.trim().to_lowercase();
            let title_match = capsule.title.to_lowercase().contains(&query_lower);
            let summary_match = capsule.summary.to_lowercase().contains(&query_lower);
            if !title_match && !summary_match {
                return false;
            }
        }

        true
    }
}

//! Email domain types.
//!
//! Represents individual email messages and the partial flag updates
//! exchanged with the backend.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{EmailId, EntityCatalog};

/// An individual email message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Email {
    /// Unique identifier for this email.
    pub id: EmailId,
    /// Conversation this email belongs to, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thread_id: Option<String>,
    /// Sender address.
    pub sender: String,
    /// Sender display name (e.g., "Dana Cole").
    #[serde(default)]
    pub sender_name: Option<String>,
    /// Email subject line.
    #[serde(default)]
    pub subject: String,
    /// Plain text body content.
    #[serde(default)]
    pub body_text: String,
    /// HTML body content.
    #[serde(default)]
    pub body_html: Option<String>,
    /// Date and time the email was sent.
    pub date: DateTime<Utc>,
    /// Recipient addresses, in header order.
    #[serde(default)]
    pub recipients: Vec<String>,
    /// Whether the email has been read.
    #[serde(default)]
    pub read: bool,
    /// Whether the user pinned the email.
    #[serde(default)]
    pub pinned: bool,
    /// Whether the email is archived (hidden from the inbox).
    #[serde(default)]
    pub archived: bool,
    /// Entities detected by the extraction pipeline.
    #[serde(default)]
    pub entities: EntityCatalog,
}

impl Email {
    /// Creates an unread, unpinned, unarchived email with no body.
    pub fn new(
        id: impl Into<EmailId>,
        sender: impl Into<String>,
        subject: impl Into<String>,
        date: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            thread_id: None,
            sender: sender.into(),
            sender_name: None,
            subject: subject.into(),
            body_text: String::new(),
            body_html: None,
            date,
            recipients: Vec::new(),
            read: false,
            pinned: false,
            archived: false,
            entities: EntityCatalog::default(),
        }
    }

    /// Sets the sender display name.
    pub fn with_sender_name(mut self, name: impl Into<String>) -> Self {
        self.sender_name = Some(name.into());
        self
    }

    /// Sets the plain text body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body_text = body.into();
        self
    }

    /// Sets the extracted entities.
    pub fn with_entities(mut self, entities: EntityCatalog) -> Self {
        self.entities = entities;
        self
    }

    /// Returns the sender display string: "Name <address>" or the address.
    pub fn sender_display(&self) -> String {
        match &self.sender_name {
            Some(name) if !name.is_empty() => format!("{} <{}>", name, self.sender),
            _ => self.sender.clone(),
        }
    }

    /// Returns the current flags as a full patch.
    pub fn flags(&self) -> FlagPatch {
        FlagPatch {
            read: Some(self.read),
            pinned: Some(self.pinned),
            archived: Some(self.archived),
        }
    }
}

/// Partial update of an email's flags (`PUT /emails/{id}` body).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub read: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pinned: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub archived: Option<bool>,
}

impl FlagPatch {
    /// Patch touching only the read flag.
    pub fn read(read: bool) -> Self {
        Self {
            read: Some(read),
            ..Default::default()
        }
    }

    /// Patch touching only the pinned flag.
    pub fn pinned(pinned: bool) -> Self {
        Self {
            pinned: Some(pinned),
            ..Default::default()
        }
    }

    /// Patch touching only the archived flag.
    pub fn archived(archived: bool) -> Self {
        Self {
            archived: Some(archived),
            ..Default::default()
        }
    }

    /// Returns true if the patch changes nothing.
    pub fn is_empty(&self) -> bool {
        self.read.is_none() && self.pinned.is_none() && self.archived.is_none()
    }

    /// Applies the patch, returning true if any flag actually changed.
    pub fn apply_to(&self, email: &mut Email) -> bool {
        let before = (email.read, email.pinned, email.archived);
        if let Some(read) = self.read {
            email.read = read;
        }
        if let Some(pinned) = self.pinned {
            email.pinned = pinned;
        }
        if let Some(archived) = self.archived {
            email.archived = archived;
        }
        before != (email.read, email.pinned, email.archived)
    }
}

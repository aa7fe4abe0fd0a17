//! Business services layer.
//!
//! This module contains the local record stores and the services that
//! coordinate them with the backend.
//!
//! # Architecture
//!
//! Services sit between the workspace and the backend:
//!
//! ```text
//! Workspace (commands, queries, events)
//!          |
//!          v
//!    Services Layer  <-- You are here
//!          |
//!          v
//! Backend (HTTP provider)
//! ```
//!
//! # Services Overview
//!
//! - [`EmailStore`]: email records and their flag transitions
//! - [`CapsuleStore`]: capsule lifecycle, follow-ups and lookups
//! - [`association`]: attaching emails to capsules and merging entities
//! - [`MailboxFilter`]: category plus free-text filtering
//! - [`SyncService`]: per-record serialization and confirmation of
//!   optimistic changes

pub mod association;
mod capsule_store;
mod email_store;
mod filter;
mod sync_service;

pub use association::{CapsuleFromEmail, MailboxEntry, UNTITLED_CAPSULE};
pub use capsule_store::{CapsuleChange, CapsuleStore, PendingFollowUp};
pub use email_store::{EmailStore, FlagChange, IngestSummary};
pub use filter::{CapsuleFilter, Category, MailboxFilter};
pub use sync_service::{
    ConflictPolicy, SyncEvent, SyncKey, SyncPermit, SyncService, SyncSettings, SyncStats,
};

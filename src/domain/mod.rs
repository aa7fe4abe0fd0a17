//! Domain layer types for capsule mail.
//!
//! This module contains the core domain types used throughout the crate:
//! emails, extracted entities, capsules and the explicit user session.

mod capsule;
mod email;
mod entity;
mod session;
mod types;

pub use capsule::{
    Capsule, CapsulePatch, CapsuleStatus, CapsuleType, FollowUp, NewCapsule, Priority,
};
pub use email::{Email, FlagPatch};
pub use entity::{Entity, EntityCatalog, EntityKind};
pub use session::Session;
pub use types::{CapsuleId, EmailId, FollowUpId};

//! capsule-mail - capsule-organized email on top of a JSON backend
//!
//! This crate provides the client core for capsule mail: email and capsule
//! records, their state transitions, email-to-capsule association,
//! mailbox filtering and optimistic synchronization with rollback.

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod providers;
pub mod services;

pub use app::Workspace;
pub use error::{CoreError, Result};

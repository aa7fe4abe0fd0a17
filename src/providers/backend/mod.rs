//! Capsule API backend.
//!
//! The backend is the system of record. The core only talks to it through
//! the [`CapsuleBackend`] trait so that tests can swap in in-memory fakes.
//!
//! # Example
//!
//! ```rust,no_run
//! use capsule_mail::domain::Session;
//! use capsule_mail::providers::backend::{CapsuleBackend, HttpBackend};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let backend = HttpBackend::new("http://localhost:5000/api")?;
//! let session = Session::new("agent@broker.example").with_token("...");
//!
//! let emails = backend.list_emails(&session).await?;
//! println!("{} emails", emails.len());
//! # Ok(())
//! # }
//! ```

mod http;
mod traits;

pub use http::{HttpBackend, DEFAULT_BASE_URL};
#[cfg(test)]
pub use traits::MockCapsuleBackend;
pub use traits::{BackendError, BackendResult, CapsuleBackend};

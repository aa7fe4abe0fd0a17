//! Backend provider implementations.
//!
//! This module contains provider traits and implementations for external services:
//!
//! - [`backend`] - the capsule API (JSON over HTTP)

pub mod backend;

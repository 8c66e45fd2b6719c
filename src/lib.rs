//! Centinela — command-processing core for a multi-tenant guard operations
//! platform.
//!
//! Every state change enters as a [`types::Command`] and traverses the same
//! nine-stage pipeline: structural intake, authentication, authorization,
//! idempotency, payload validation, preconditions, execution, persistence
//! and audit emission. The client is hostile by design; this crate is the
//! sole authority over outcomes, and the same command id always resolves to
//! the same result.
//!
//! See `DESIGN.md` for full architecture documentation.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod config;
pub mod logging;
pub mod types;

pub mod kernel;

pub mod domain;

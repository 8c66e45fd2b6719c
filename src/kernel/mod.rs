//! The processing kernel: security, idempotency, the command pipeline and
//! the audit trail.
//!
//! Everything that decides whether and how a command changes state lives
//! here. Domain handlers plug in through [`pipeline::CommandHandler`];
//! infrastructure plugs in through the collaborator traits
//! ([`identity::IdentityStore`], [`identity::CompanyDirectory`],
//! [`idempotency::IdempotencyStore`], [`audit::AuditSink`]).

pub mod audit;
pub mod capability;
pub mod identity;
pub mod idempotency;
pub mod pipeline;
pub mod security;

pub use identity::{RequestContext, RuntimeIdentity};
pub use pipeline::{PipelineRunner, PipelineStage};
pub use security::SecurityKernel;

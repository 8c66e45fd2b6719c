//! Identity resolution types and the contracts an identity provider must
//! satisfy.
//!
//! The client is hostile by design: nothing here trusts a request beyond
//! what a verified credential proves. Invalid identity is always an
//! explicit state, never `None`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{CompanyId, CompanyStatus, UserId, UserRole};

/// Reason a presented credential resolved to an invalid identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    /// Credential expired.
    Expired,
    /// Credential malformed or missing required claims.
    Malformed,
    /// Credential revoked.
    Revoked,
    /// Tenant suspended or deleted.
    CompanySuspended,
    /// No recognized canonical role in the claims.
    MissingRole,
}

/// Verified, immutable user identity. Only the security kernel constructs
/// this from verified claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedIdentity {
    /// Verified user id.
    pub uid: UserId,
    /// Tenant the user belongs to.
    pub company_id: CompanyId,
    /// Canonical role from verified claims.
    pub role: UserRole,
    /// Email from the credential, if present.
    pub email: String,
    /// Whether the email address is verified.
    pub email_verified: bool,
    /// When the credential was issued.
    pub auth_time: DateTime<Utc>,
}

/// Resolved identity of a request. Exactly one variant holds; only
/// `Authenticated` may proceed past the AUTHENTICATION stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuntimeIdentity {
    /// Cryptographically verified identity.
    Authenticated(AuthenticatedIdentity),
    /// No credential presented.
    Anonymous,
    /// A credential was presented but could not be honored.
    Invalid {
        /// Why the credential was not honored.
        reason: InvalidReason,
    },
}

impl RuntimeIdentity {
    /// The authenticated identity, if this is the authenticated variant.
    pub fn as_authenticated(&self) -> Option<&AuthenticatedIdentity> {
        match self {
            Self::Authenticated(identity) => Some(identity),
            _ => None,
        }
    }
}

/// Result of authentication, carried through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthContext {
    /// The resolved identity.
    pub identity: RuntimeIdentity,
}

/// Raw context of an incoming request, before any trust decision.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// Remote address, for diagnostics only.
    pub ip: String,
    /// Server clock at receipt (Unix ms).
    pub timestamp: i64,
    /// Authorization header, expected form `Bearer <token>`.
    pub authorization_header: Option<String>,
}

/// Why a credential failed cryptographic verification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CredentialError {
    /// The credential's validity window has passed.
    #[error("credential expired")]
    Expired,
    /// The credential was explicitly revoked.
    #[error("credential revoked")]
    Revoked,
    /// The credential could not be parsed or its signature is wrong.
    #[error("credential malformed")]
    Malformed,
}

/// Claims extracted from a successfully verified credential.
///
/// Tenant and role are plain optionals here: their presence is the
/// security kernel's cascade to judge, not the provider's.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedCredential {
    /// Subject user id.
    pub uid: UserId,
    /// Email claim, if present.
    pub email: Option<String>,
    /// Whether the email claim is verified.
    pub email_verified: bool,
    /// When the credential was issued.
    pub auth_time: DateTime<Utc>,
    /// Tenant claim, if present.
    pub company_id: Option<String>,
    /// Raw role claim, if present. Validated by the kernel.
    pub role: Option<String>,
}

/// Credential verifier. Performs the cryptographic (and possibly network)
/// check; it makes no policy decisions.
#[async_trait]
pub trait IdentityStore: Send + Sync {
    /// Verify a bearer credential and return its claims.
    async fn verify(&self, credential: &str) -> Result<VerifiedCredential, CredentialError>;
}

/// Tenant status lookup. `None` means the tenant is unknown.
#[async_trait]
pub trait CompanyDirectory: Send + Sync {
    /// Current lifecycle status of a tenant.
    async fn status(&self, company_id: &str) -> anyhow::Result<Option<CompanyStatus>>;
}

/// Extract the token from a `Bearer <token>` authorization header.
///
/// Distinguishes "no header" (anonymous path) from "header present but
/// unusable" (malformed credential).
pub(crate) fn extract_bearer_token(header: Option<&str>) -> BearerExtraction<'_> {
    let Some(header) = header else {
        return BearerExtraction::Absent;
    };
    let mut parts = header.split_whitespace();
    match (parts.next(), parts.next(), parts.next()) {
        (Some("Bearer"), Some(token), None) if !token.is_empty() => {
            BearerExtraction::Token(token)
        }
        _ => BearerExtraction::Malformed,
    }
}

/// Outcome of bearer-token extraction.
pub(crate) enum BearerExtraction<'a> {
    /// No authorization header at all.
    Absent,
    /// A well-formed bearer token.
    Token(&'a str),
    /// A header was sent but it is not a usable bearer credential.
    Malformed,
}

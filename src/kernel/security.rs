//! Security kernel: authentication cascade and deny-by-default
//! authorization.
//!
//! Authentication turns a raw request into a [`RuntimeIdentity`] and never
//! fails open: any doubt about the credential, the tenant, or the role
//! resolves to an explicit `Invalid` identity. Authorization grants access
//! only when a policy explicitly allows it.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::kernel::identity::{
    extract_bearer_token, AuthContext, AuthenticatedIdentity, BearerExtraction, CompanyDirectory,
    CredentialError, IdentityStore, InvalidReason, RequestContext, RuntimeIdentity,
};
use crate::types::{CompanyStatus, UserRole};

// ── policy ──────────────────────────────────────────────────────────────

/// Action a policy asks to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PermissionAction {
    /// Create a resource.
    Create,
    /// Read a resource.
    Read,
    /// Update a resource.
    Update,
    /// Delete a resource.
    Delete,
    /// Execute a command against a resource.
    Execute,
}

/// Resource class a policy targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    /// Shift records.
    Shift,
    /// Patrol records.
    Patrol,
    /// Incident records.
    Incident,
    /// Tenant records.
    Company,
    /// User records.
    User,
}

/// Declarative access policy: the intent to perform an action on a
/// resource class. Evaluation is deny-by-default, so a policy the kernel
/// does not recognize denies everyone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessPolicy {
    /// Targeted resource class.
    pub resource: ResourceType,
    /// Requested action.
    pub action: PermissionAction,
}

/// The one policy the kernel currently recognizes: any verified identity
/// may execute commands against its own tenant.
pub const POLICY_ALLOW_AUTHENTICATED: AccessPolicy =
    AccessPolicy { resource: ResourceType::Company, action: PermissionAction::Execute };

/// Why authorization was denied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialCode {
    /// The governing policy does not grant access.
    DeniedByPolicy,
    /// Anonymous identities are not allowed here.
    AnonymousNotAllowed,
    /// The identity is invalid and cannot be evaluated.
    InvalidContext,
    /// The actor's role is below what the operation requires.
    InsufficientRole,
    /// The actor attempted to cross a tenant boundary.
    TenantIsolation,
}

/// Outcome of an authorization check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorizationResult {
    /// Access granted by an explicit policy.
    Allowed,
    /// Access denied. The default outcome.
    Denied {
        /// Human-readable reason, for logs.
        reason: String,
        /// Typed denial code.
        code: DenialCode,
    },
}

impl AuthorizationResult {
    /// Whether access was granted.
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }

    fn denied(code: DenialCode, reason: impl Into<String>) -> Self {
        Self::Denied { reason: reason.into(), code }
    }
}

/// Raised when a caller asserts access it does not have.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("access denied ({code:?}): {reason}")]
pub struct SecurityViolation {
    /// Human-readable reason.
    pub reason: String,
    /// Typed denial code.
    pub code: DenialCode,
}

// ── kernel ──────────────────────────────────────────────────────────────

/// The security kernel. Owns the credential verifier and the tenant
/// directory; every trust decision in the crate goes through here.
pub struct SecurityKernel {
    identities: Arc<dyn IdentityStore>,
    companies: Arc<dyn CompanyDirectory>,
}

impl SecurityKernel {
    /// Build a kernel over the given identity and tenant providers.
    pub fn new(identities: Arc<dyn IdentityStore>, companies: Arc<dyn CompanyDirectory>) -> Self {
        Self { identities, companies }
    }

    /// Resolve the identity of a request.
    ///
    /// The cascade is strict: credential verification, then tenant claim
    /// presence, then tenant status, then role. The first failure wins and
    /// produces the matching `Invalid` reason. Infrastructure failures
    /// while checking the tenant fail closed as `company_suspended`.
    pub async fn authenticate(&self, request: &RequestContext) -> AuthContext {
        let identity = self.resolve_identity(request).await;
        if let RuntimeIdentity::Invalid { reason } = &identity {
            warn!(ip = %request.ip, ?reason, "credential rejected");
        }
        AuthContext { identity }
    }

    async fn resolve_identity(&self, request: &RequestContext) -> RuntimeIdentity {
        let token = match extract_bearer_token(request.authorization_header.as_deref()) {
            BearerExtraction::Absent => return RuntimeIdentity::Anonymous,
            BearerExtraction::Malformed => {
                return RuntimeIdentity::Invalid { reason: InvalidReason::Malformed }
            }
            BearerExtraction::Token(token) => token,
        };

        let credential = match self.identities.verify(token).await {
            Ok(credential) => credential,
            Err(CredentialError::Expired) => {
                return RuntimeIdentity::Invalid { reason: InvalidReason::Expired }
            }
            Err(CredentialError::Revoked) => {
                return RuntimeIdentity::Invalid { reason: InvalidReason::Revoked }
            }
            Err(CredentialError::Malformed) => {
                return RuntimeIdentity::Invalid { reason: InvalidReason::Malformed }
            }
        };

        // A verified credential without a tenant claim cannot be scoped to
        // any data; it is as unusable as an unparseable one.
        let Some(company_id) = credential.company_id.filter(|id| !id.is_empty()) else {
            return RuntimeIdentity::Invalid { reason: InvalidReason::Malformed };
        };

        match self.companies.status(&company_id).await {
            Ok(Some(CompanyStatus::Active)) => {}
            Ok(Some(CompanyStatus::Suspended) | Some(CompanyStatus::Deleted)) | Ok(None) => {
                return RuntimeIdentity::Invalid { reason: InvalidReason::CompanySuspended }
            }
            Err(error) => {
                // Fail closed: an unreachable directory must not let a
                // possibly-suspended tenant act.
                warn!(company_id = %company_id, %error, "tenant lookup failed, denying");
                return RuntimeIdentity::Invalid { reason: InvalidReason::CompanySuspended };
            }
        }

        let Some(role) = credential.role.as_deref().and_then(UserRole::parse) else {
            return RuntimeIdentity::Invalid { reason: InvalidReason::MissingRole };
        };

        RuntimeIdentity::Authenticated(AuthenticatedIdentity {
            uid: credential.uid,
            company_id,
            role,
            email: credential.email.unwrap_or_default(),
            email_verified: credential.email_verified,
            auth_time: credential.auth_time,
        })
    }

    /// Check an identity against a policy. Deny by default: anything that
    /// is not an explicit grant is a denial.
    pub fn authorize(&self, identity: &RuntimeIdentity, policy: AccessPolicy) -> AuthorizationResult {
        if policy == POLICY_ALLOW_AUTHENTICATED {
            return match identity {
                RuntimeIdentity::Authenticated(_) => AuthorizationResult::Allowed,
                RuntimeIdentity::Anonymous => AuthorizationResult::denied(
                    DenialCode::AnonymousNotAllowed,
                    "anonymous access not allowed",
                ),
                RuntimeIdentity::Invalid { reason } => AuthorizationResult::denied(
                    DenialCode::InvalidContext,
                    format!("invalid identity: {reason:?}"),
                ),
            };
        }
        AuthorizationResult::denied(DenialCode::DeniedByPolicy, "policy not recognized")
    }

    /// Like [`authorize`](Self::authorize) but turns a denial into an error
    /// for call sites that must not proceed.
    pub fn assert_authorized(
        &self,
        identity: &RuntimeIdentity,
        policy: AccessPolicy,
    ) -> Result<(), SecurityViolation> {
        match self.authorize(identity, policy) {
            AuthorizationResult::Allowed => Ok(()),
            AuthorizationResult::Denied { reason, code } => {
                Err(SecurityViolation { reason, code })
            }
        }
    }
}

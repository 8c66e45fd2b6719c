//! Nine-stage command pipeline.
//!
//! Every command traverses the same ordered stages; the first six are pure
//! checks, the last three have side effects. A stage failure terminates the
//! run immediately and nothing after it executes. The runner owns terminal
//! idempotency bookkeeping so handlers never touch the record store.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info};

use crate::kernel::identity::{AuthContext, RequestContext};
use crate::kernel::idempotency::{IdempotencyCheck, IdempotencyOutcome, IdempotencyStore};
use crate::kernel::security::{
    AccessPolicy, AuthorizationResult, SecurityKernel, POLICY_ALLOW_AUTHENTICATED,
};
use crate::types::{
    Command, CommandResult, CommandType, RejectionCode, SUPPORTED_COMMAND_VERSION,
};

// ── stages ──────────────────────────────────────────────────────────────

/// Whether a stage may touch state outside the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageEffect {
    /// Read-only check; repeatable without consequence.
    Pure,
    /// Mutates external state; runs at most once per command id.
    SideEffecting,
}

/// The ordered stages of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineStage {
    /// Structural normalization of the raw command.
    Intake,
    /// Identity resolution.
    Authentication,
    /// Access decision.
    Authorization,
    /// Duplicate detection and PENDING lock creation.
    IdempotencyCheck,
    /// Command-specific payload validation.
    PayloadValidation,
    /// Domain-state preconditions.
    PreconditionCheck,
    /// Domain logic.
    Execution,
    /// Durable writes.
    Persistence,
    /// Audit trail emission.
    AuditEmission,
}

impl PipelineStage {
    /// Effect class of the stage.
    pub fn effect(self) -> StageEffect {
        match self {
            Self::Intake
            | Self::Authentication
            | Self::Authorization
            | Self::IdempotencyCheck
            | Self::PayloadValidation
            | Self::PreconditionCheck => StageEffect::Pure,
            Self::Execution | Self::Persistence | Self::AuditEmission => {
                StageEffect::SideEffecting
            }
        }
    }

    /// Canonical stage name.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Intake => "INTAKE",
            Self::Authentication => "AUTHENTICATION",
            Self::Authorization => "AUTHORIZATION",
            Self::IdempotencyCheck => "IDEMPOTENCY_CHECK",
            Self::PayloadValidation => "PAYLOAD_VALIDATION",
            Self::PreconditionCheck => "PRECONDITION_CHECK",
            Self::Execution => "EXECUTION",
            Self::Persistence => "PERSISTENCE",
            Self::AuditEmission => "AUDIT_EMISSION",
        }
    }
}

/// The single source of stage order.
pub const STAGE_ORDER: [PipelineStage; 9] = [
    PipelineStage::Intake,
    PipelineStage::Authentication,
    PipelineStage::Authorization,
    PipelineStage::IdempotencyCheck,
    PipelineStage::PayloadValidation,
    PipelineStage::PreconditionCheck,
    PipelineStage::Execution,
    PipelineStage::Persistence,
    PipelineStage::AuditEmission,
];

// ── execution context ───────────────────────────────────────────────────

/// A stage failure. Recording one terminates the run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineFailure {
    /// Stage that failed.
    pub failed_at: PipelineStage,
    /// Typed rejection surfaced to the client.
    pub rejection_code: RejectionCode,
    /// Diagnostic message; logged and echoed in the rejection.
    pub internal_message: String,
    /// Server clock at failure (Unix ms).
    pub failed_at_timestamp: i64,
}

/// Accumulated state of one pipeline run. Stages only ever add to it.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    /// The command being processed.
    pub command: Command,
    /// Stage currently (or last) executing.
    pub stage: PipelineStage,
    /// When the run started.
    pub started_at: DateTime<Utc>,
    /// Authentication outcome, set by AUTHENTICATION.
    pub auth: Option<AuthContext>,
    /// Authorization outcome, set by AUTHORIZATION.
    pub authorization: Option<AuthorizationResult>,
    /// Idempotency decision, set by IDEMPOTENCY_CHECK.
    pub idempotency: Option<IdempotencyCheck>,
    /// Whether this run created the PENDING record (and owns resolution).
    pub owns_record: bool,
    /// Set by PAYLOAD_VALIDATION on success.
    pub payload_valid: bool,
    /// Set by PRECONDITION_CHECK on success.
    pub preconditions_met: bool,
    /// Product of EXECUTION, consumed by PERSISTENCE and AUDIT_EMISSION.
    pub artifact: Option<serde_json::Value>,
    /// Client-facing receipt, set by EXECUTION.
    pub receipt: Option<serde_json::Value>,
    /// Stored outcome to replay instead of processing, set when
    /// IDEMPOTENCY_CHECK finds a fresh resolved record.
    pub replay: Option<CommandResult>,
    /// Terminal failure, if any stage failed.
    pub failure: Option<PipelineFailure>,
}

impl ExecutionContext {
    /// Fresh context for a command, positioned at INTAKE.
    pub fn new(command: Command) -> Self {
        Self {
            command,
            stage: PipelineStage::Intake,
            started_at: Utc::now(),
            auth: None,
            authorization: None,
            idempotency: None,
            owns_record: false,
            payload_valid: false,
            preconditions_met: false,
            artifact: None,
            receipt: None,
            replay: None,
            failure: None,
        }
    }

    /// Record a failure at the current stage. Total: never panics.
    pub fn fail(mut self, rejection_code: RejectionCode, message: impl Into<String>) -> Self {
        self.failure = Some(PipelineFailure {
            failed_at: self.stage,
            rejection_code,
            internal_message: message.into(),
            failed_at_timestamp: Utc::now().timestamp_millis(),
        });
        self
    }

    /// Wall time spent so far, saturating at zero.
    pub fn elapsed_ms(&self) -> u64 {
        Utc::now()
            .signed_duration_since(self.started_at)
            .num_milliseconds()
            .max(0)
            .unsigned_abs()
    }
}

/// Full outcome of a pipeline run: the client-facing result plus the
/// internal trace of what happened.
#[derive(Debug)]
pub struct PipelineExecutionResult {
    /// The result surfaced to the client.
    pub result: CommandResult,
    /// The final execution context.
    pub context: ExecutionContext,
    /// Stages that completed, in order.
    pub completed_stages: Vec<PipelineStage>,
    /// Stage the run failed at, if it failed.
    pub failed_stage: Option<PipelineStage>,
}

// ── handler contract ────────────────────────────────────────────────────

/// Per-command-type business logic, invoked for the last five stages.
///
/// Every method is total: a failing step records the failure on the
/// returned context instead of erroring, so the runner's fail-fast loop
/// stays the single control path.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    /// PAYLOAD_VALIDATION: structural validation of the payload.
    async fn validate_payload(&self, ctx: ExecutionContext) -> ExecutionContext;
    /// PRECONDITION_CHECK: domain-state checks.
    async fn check_preconditions(&self, ctx: ExecutionContext) -> ExecutionContext;
    /// EXECUTION: build the artifact and the receipt.
    async fn execute(&self, ctx: ExecutionContext) -> ExecutionContext;
    /// PERSISTENCE: durably write the artifact.
    async fn persist(&self, ctx: ExecutionContext) -> ExecutionContext;
    /// AUDIT_EMISSION: emit the audit record.
    async fn emit_audit(&self, ctx: ExecutionContext) -> ExecutionContext;
}

/// Registry mapping command types to their handlers.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<CommandType, Arc<dyn CommandHandler>>,
}

impl HandlerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for a command type, replacing any previous one.
    pub fn register(&mut self, command_type: CommandType, handler: Arc<dyn CommandHandler>) {
        self.handlers.insert(command_type, handler);
    }

    /// Handler for a command type, if one is registered.
    pub fn get(&self, command_type: CommandType) -> Option<Arc<dyn CommandHandler>> {
        self.handlers.get(&command_type).cloned()
    }
}

// ── runner ──────────────────────────────────────────────────────────────

/// The pipeline runner. Holds its collaborators explicitly; construct one
/// per process and share it.
pub struct PipelineRunner {
    kernel: SecurityKernel,
    idempotency: Arc<dyn IdempotencyStore>,
    handlers: HandlerRegistry,
    policy: AccessPolicy,
}

impl PipelineRunner {
    /// Build a runner over its collaborators. AUTHORIZATION evaluates the
    /// allow-authenticated policy.
    pub fn new(
        kernel: SecurityKernel,
        idempotency: Arc<dyn IdempotencyStore>,
        handlers: HandlerRegistry,
    ) -> Self {
        Self { kernel, idempotency, handlers, policy: POLICY_ALLOW_AUTHENTICATED }
    }

    /// Override the policy evaluated at AUTHORIZATION. The seam for wiring
    /// per-command module/capability policies; the kernel denies any policy
    /// it does not recognize.
    pub fn with_policy(mut self, policy: AccessPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Run a command through all nine stages.
    pub async fn run(
        &self,
        command: Command,
        request: &RequestContext,
    ) -> PipelineExecutionResult {
        self.run_inner(command, request, None).await
    }

    /// Run a command through the stages up to and including `stop_after`,
    /// then stop. Used to exercise the pure prefix of the pipeline in
    /// isolation; the result carries a partial-run receipt.
    pub async fn run_up_to_stage(
        &self,
        command: Command,
        request: &RequestContext,
        stop_after: PipelineStage,
    ) -> PipelineExecutionResult {
        self.run_inner(command, request, Some(stop_after)).await
    }

    async fn run_inner(
        &self,
        command: Command,
        request: &RequestContext,
        stop_after: Option<PipelineStage>,
    ) -> PipelineExecutionResult {
        let command_id = command.command_id.clone();
        let mut ctx = ExecutionContext::new(command);
        let mut completed = Vec::new();
        let mut stopped_early = false;

        for stage in STAGE_ORDER {
            ctx.stage = stage;
            debug!(command_id = %command_id, stage = stage.as_str(), "stage start");
            ctx = self.run_stage(stage, ctx, request).await;
            if ctx.failure.is_some() {
                break;
            }
            completed.push(stage);
            if ctx.replay.is_some() {
                break;
            }
            if stop_after == Some(stage) {
                stopped_early = true;
                break;
            }
        }

        self.finish(ctx, completed, stopped_early).await
    }

    async fn finish(
        &self,
        ctx: ExecutionContext,
        completed: Vec<PipelineStage>,
        stopped_early: bool,
    ) -> PipelineExecutionResult {
        let now = Utc::now().timestamp_millis();
        let command_id = ctx.command.command_id.clone();
        let company_id = ctx.command.company_id.clone();

        if let Some(failure) = ctx.failure.clone() {
            // Only the run that created the PENDING record resolves it; a
            // bookkeeping failure is logged, never surfaced.
            if ctx.owns_record {
                if let Err(error) = self
                    .idempotency
                    .mark_rejected(&company_id, &command_id, failure.rejection_code)
                    .await
                {
                    error!(command_id = %command_id, %error, "failed to mark record rejected");
                }
            }
            info!(
                command_id = %command_id,
                stage = failure.failed_at.as_str(),
                code = ?failure.rejection_code,
                "command rejected"
            );
            return PipelineExecutionResult {
                result: CommandResult::Rejected {
                    command_id,
                    server_timestamp: now,
                    rejection_code: failure.rejection_code,
                    message: failure.internal_message.clone(),
                },
                failed_stage: Some(failure.failed_at),
                completed_stages: completed,
                context: ctx,
            };
        }

        if let Some(result) = ctx.replay.clone() {
            info!(command_id = %command_id, "replaying cached outcome");
            return PipelineExecutionResult {
                result,
                context: ctx,
                completed_stages: completed,
                failed_stage: None,
            };
        }

        if stopped_early {
            let receipt = json!({
                "partial": true,
                "completedThrough": completed.last().map(|s| s.as_str()),
            });
            return PipelineExecutionResult {
                result: CommandResult::Accepted {
                    command_id,
                    server_timestamp: now,
                    receipt,
                },
                context: ctx,
                completed_stages: completed,
                failed_stage: None,
            };
        }

        if let Err(error) = self.idempotency.mark_accepted(&company_id, &command_id).await {
            error!(command_id = %command_id, %error, "failed to mark record accepted");
        }
        info!(command_id = %command_id, duration_ms = ctx.elapsed_ms(), "command accepted");
        let receipt = ctx.receipt.clone().unwrap_or_else(|| json!({}));
        PipelineExecutionResult {
            result: CommandResult::Accepted { command_id, server_timestamp: now, receipt },
            context: ctx,
            completed_stages: completed,
            failed_stage: None,
        }
    }

    async fn run_stage(
        &self,
        stage: PipelineStage,
        ctx: ExecutionContext,
        request: &RequestContext,
    ) -> ExecutionContext {
        match stage {
            PipelineStage::Intake => self.stage_intake(ctx),
            PipelineStage::Authentication => self.stage_authentication(ctx, request).await,
            PipelineStage::Authorization => self.stage_authorization(ctx),
            PipelineStage::IdempotencyCheck => self.stage_idempotency(ctx).await,
            PipelineStage::PayloadValidation
            | PipelineStage::PreconditionCheck
            | PipelineStage::Execution
            | PipelineStage::Persistence
            | PipelineStage::AuditEmission => self.stage_handler(stage, ctx).await,
        }
    }

    fn stage_intake(&self, ctx: ExecutionContext) -> ExecutionContext {
        if ctx.command.command_id.trim().is_empty() {
            return ctx.fail(RejectionCode::InvalidPayload, "commandId must not be empty");
        }
        if ctx.command.version != SUPPORTED_COMMAND_VERSION {
            let message = format!(
                "unsupported command version {} (supported: {SUPPORTED_COMMAND_VERSION})",
                ctx.command.version
            );
            return ctx.fail(RejectionCode::VersionMismatch, message);
        }
        ctx
    }

    async fn stage_authentication(
        &self,
        mut ctx: ExecutionContext,
        request: &RequestContext,
    ) -> ExecutionContext {
        let auth = self.kernel.authenticate(request).await;
        use crate::kernel::identity::{InvalidReason, RuntimeIdentity};
        let failure = match &auth.identity {
            RuntimeIdentity::Authenticated(_) => None,
            RuntimeIdentity::Invalid { reason: InvalidReason::CompanySuspended } => {
                Some((RejectionCode::CompanySuspended, "tenant is not active"))
            }
            RuntimeIdentity::Anonymous | RuntimeIdentity::Invalid { .. } => {
                Some((RejectionCode::Unauthorized, "authentication required"))
            }
        };
        ctx.auth = Some(auth);
        match failure {
            Some((code, message)) => ctx.fail(code, message),
            None => ctx,
        }
    }

    fn stage_authorization(&self, mut ctx: ExecutionContext) -> ExecutionContext {
        let Some(auth) = ctx.auth.clone() else {
            return ctx.fail(RejectionCode::InternalError, "authorization before authentication");
        };
        let decision = self.kernel.authorize(&auth.identity, self.policy);
        ctx.authorization = Some(decision.clone());
        match decision {
            AuthorizationResult::Allowed => ctx,
            AuthorizationResult::Denied { reason, .. } => {
                ctx.fail(RejectionCode::Forbidden, reason)
            }
        }
    }

    async fn stage_idempotency(&self, mut ctx: ExecutionContext) -> ExecutionContext {
        let company_id = ctx.command.company_id.clone();
        let command_id = ctx.command.command_id.clone();
        let check = match self.idempotency.check_idempotency(&company_id, &command_id).await {
            Ok(check) => check,
            Err(error) => {
                return ctx.fail(
                    RejectionCode::InternalError,
                    format!("idempotency check failed: {error}"),
                )
            }
        };
        ctx.idempotency = Some(check.clone());
        match check {
            IdempotencyCheck::CreateAndProcess => {
                match self.idempotency.create_pending_record(&company_id, &command_id).await {
                    Ok(true) => {
                        ctx.owns_record = true;
                        ctx
                    }
                    // Lost the creation race: a concurrent run owns the id.
                    Ok(false) => ctx.fail(
                        RejectionCode::DuplicateCommand,
                        "command id is being processed concurrently",
                    ),
                    Err(error) => ctx.fail(
                        RejectionCode::InternalError,
                        format!("failed to create idempotency record: {error}"),
                    ),
                }
            }
            IdempotencyCheck::RejectInFlight { .. } => ctx.fail(
                RejectionCode::DuplicateCommand,
                "command id is already being processed",
            ),
            IdempotencyCheck::CachedSuccess { record } => {
                let server_timestamp = Utc::now().timestamp_millis();
                ctx.replay = Some(CommandResult::Accepted {
                    command_id,
                    server_timestamp,
                    receipt: json!({
                        "replay": true,
                        "resolvedAt": record.resolved_at.map(|t| t.timestamp_millis()),
                    }),
                });
                ctx
            }
            IdempotencyCheck::CachedRejection { record } => {
                let code = match record.result {
                    Some(IdempotencyOutcome::Rejection { code }) => code,
                    // A REJECTED record without a stored code is corrupt.
                    _ => RejectionCode::InternalError,
                };
                ctx.replay = Some(CommandResult::Rejected {
                    command_id,
                    server_timestamp: Utc::now().timestamp_millis(),
                    rejection_code: code,
                    message: "replayed cached rejection".to_owned(),
                });
                ctx
            }
        }
    }

    async fn stage_handler(
        &self,
        stage: PipelineStage,
        ctx: ExecutionContext,
    ) -> ExecutionContext {
        let Some(handler) = self.handlers.get(ctx.command.command_type) else {
            let message =
                format!("command type {} is not implemented", ctx.command.command_type.as_str());
            return ctx.fail(RejectionCode::InternalError, message);
        };
        match stage {
            PipelineStage::PayloadValidation => handler.validate_payload(ctx).await,
            PipelineStage::PreconditionCheck => handler.check_preconditions(ctx).await,
            PipelineStage::Execution => handler.execute(ctx).await,
            PipelineStage::Persistence => handler.persist(ctx).await,
            PipelineStage::AuditEmission => handler.emit_audit(ctx).await,
            _ => ctx,
        }
    }
}

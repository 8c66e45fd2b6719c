//! End-to-end pipeline behavior.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;

use centinela::domain::shifts::{MemoryShiftStore, ShiftOpenHandler, ShiftStore};
use centinela::kernel::audit::JsonlAuditSink;
use centinela::kernel::identity::{
    CompanyDirectory, CredentialError, IdentityStore, RequestContext, VerifiedCredential,
};
use centinela::kernel::idempotency::{
    IdempotencyCheck, IdempotencyStore, MemoryIdempotencyStore,
};
use centinela::kernel::pipeline::{
    HandlerRegistry, PipelineRunner, PipelineStage, STAGE_ORDER,
};
use centinela::kernel::security::{
    AccessPolicy, PermissionAction, ResourceType, SecurityKernel,
};
use centinela::types::{
    Capability, Command, CommandActor, CommandOrigin, CommandResult, CommandType, CompanyStatus,
    RejectionCode, SystemModule, UserRole, SUPPORTED_COMMAND_VERSION,
};

// ── fixtures ────────────────────────────────────────────────────────────

struct FixedIdentityStore;

#[async_trait]
impl IdentityStore for FixedIdentityStore {
    async fn verify(&self, credential: &str) -> Result<VerifiedCredential, CredentialError> {
        let (uid, company_id, role) = match credential {
            "guard-token" => ("guard-1", "co-1", "guard"),
            "suspended-co-token" => ("guard-9", "co-frozen", "guard"),
            _ => return Err(CredentialError::Malformed),
        };
        Ok(VerifiedCredential {
            uid: uid.to_owned(),
            email: Some(format!("{uid}@example.com")),
            email_verified: true,
            auth_time: Utc::now(),
            company_id: Some(company_id.to_owned()),
            role: Some(role.to_owned()),
        })
    }
}

struct FixedDirectory;

#[async_trait]
impl CompanyDirectory for FixedDirectory {
    async fn status(&self, company_id: &str) -> anyhow::Result<Option<CompanyStatus>> {
        let statuses: HashMap<&str, CompanyStatus> = HashMap::from([
            ("co-1", CompanyStatus::Active),
            ("co-frozen", CompanyStatus::Suspended),
        ]);
        Ok(statuses.get(company_id).copied())
    }
}

/// Idempotency store that counts terminal bookkeeping calls.
struct CountingIdempotencyStore {
    inner: MemoryIdempotencyStore,
    accepted: AtomicUsize,
    rejected: AtomicUsize,
}

impl CountingIdempotencyStore {
    fn new() -> Self {
        Self {
            inner: MemoryIdempotencyStore::new(),
            accepted: AtomicUsize::new(0),
            rejected: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl IdempotencyStore for CountingIdempotencyStore {
    async fn check_idempotency(
        &self,
        company_id: &str,
        command_id: &str,
    ) -> anyhow::Result<IdempotencyCheck> {
        self.inner.check_idempotency(company_id, command_id).await
    }

    async fn create_pending_record(
        &self,
        company_id: &str,
        command_id: &str,
    ) -> anyhow::Result<bool> {
        self.inner.create_pending_record(company_id, command_id).await
    }

    async fn mark_accepted(&self, company_id: &str, command_id: &str) -> anyhow::Result<()> {
        self.accepted.fetch_add(1, Ordering::SeqCst);
        self.inner.mark_accepted(company_id, command_id).await
    }

    async fn mark_rejected(
        &self,
        company_id: &str,
        command_id: &str,
        code: RejectionCode,
    ) -> anyhow::Result<()> {
        self.rejected.fetch_add(1, Ordering::SeqCst);
        self.inner.mark_rejected(company_id, command_id, code).await
    }
}

struct Harness {
    runner: PipelineRunner,
    idempotency: Arc<CountingIdempotencyStore>,
    shifts: Arc<MemoryShiftStore>,
}

fn harness() -> Harness {
    harness_with(|runner| runner)
}

fn harness_with(configure: impl FnOnce(PipelineRunner) -> PipelineRunner) -> Harness {
    let kernel = SecurityKernel::new(Arc::new(FixedIdentityStore), Arc::new(FixedDirectory));
    let idempotency = Arc::new(CountingIdempotencyStore::new());
    let shifts = Arc::new(MemoryShiftStore::new());
    let audit = Arc::new(JsonlAuditSink::from_writer(Box::new(Vec::new())));

    let mut handlers = HandlerRegistry::new();
    handlers.register(
        CommandType::ShiftOpen,
        Arc::new(ShiftOpenHandler::new(
            Arc::clone(&shifts) as Arc<dyn ShiftStore>,
            audit,
        )),
    );

    let runner = configure(PipelineRunner::new(
        kernel,
        Arc::clone(&idempotency) as Arc<dyn IdempotencyStore>,
        handlers,
    ));
    Harness { runner, idempotency, shifts }
}

fn shift_open_command(command_id: &str) -> Command {
    Command {
        command_id: command_id.to_owned(),
        command_type: CommandType::ShiftOpen,
        version: SUPPORTED_COMMAND_VERSION,
        actor: CommandActor { uid: "guard-1".into(), role: UserRole::Guard },
        company_id: "co-1".into(),
        module: SystemModule::Core,
        capability: Capability::ShiftOpen,
        origin: CommandOrigin::Android,
        client_timestamp: Utc::now().timestamp_millis(),
        payload: json!({ "location": { "latitude": 19.43, "longitude": -99.13 } }),
    }
}

fn request_as(token: Option<&str>) -> RequestContext {
    RequestContext {
        ip: "203.0.113.7".into(),
        timestamp: Utc::now().timestamp_millis(),
        authorization_header: token.map(|t| format!("Bearer {t}")),
    }
}

fn rejection_code(result: &CommandResult) -> RejectionCode {
    result.rejection_code().expect("rejected result")
}

// ── scenarios ───────────────────────────────────────────────────────────

#[tokio::test]
async fn full_run_completes_all_nine_stages() {
    let h = harness();
    let outcome = h.runner.run(shift_open_command("cmd-1"), &request_as(Some("guard-token"))).await;

    assert!(outcome.result.is_accepted());
    assert_eq!(outcome.completed_stages, STAGE_ORDER.to_vec());
    assert_eq!(outcome.failed_stage, None);
    assert_eq!(h.idempotency.accepted.load(Ordering::SeqCst), 1);
    assert_eq!(h.idempotency.rejected.load(Ordering::SeqCst), 0);

    let CommandResult::Accepted { receipt, .. } = &outcome.result else {
        panic!("expected acceptance");
    };
    assert!(receipt["shiftId"].as_str().expect("shift id").starts_with("shift_"));

    let stored = h
        .shifts
        .find_active_shift("co-1", "guard-1")
        .await
        .expect("lookup")
        .expect("stored shift");
    assert_eq!(stored.source_command_id, "cmd-1");
}

#[tokio::test]
async fn anonymous_request_fails_at_authentication() {
    let h = harness();
    let outcome = h.runner.run(shift_open_command("cmd-1"), &request_as(None)).await;

    assert_eq!(rejection_code(&outcome.result), RejectionCode::Unauthorized);
    assert_eq!(outcome.failed_stage, Some(PipelineStage::Authentication));
    assert_eq!(outcome.completed_stages, vec![PipelineStage::Intake]);
    // Rejected before the record was created: nothing to resolve.
    assert_eq!(h.idempotency.rejected.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn suspended_tenant_fails_at_authentication_with_company_suspended() {
    let h = harness();
    let outcome = h
        .runner
        .run(shift_open_command("cmd-1"), &request_as(Some("suspended-co-token")))
        .await;

    assert_eq!(rejection_code(&outcome.result), RejectionCode::CompanySuspended);
    assert_eq!(outcome.failed_stage, Some(PipelineStage::Authentication));
}

#[tokio::test]
async fn authorization_failure_stops_before_handler_stages() {
    let deny_all = AccessPolicy { resource: ResourceType::Shift, action: PermissionAction::Delete };
    let h = harness_with(|runner| runner.with_policy(deny_all));
    let outcome = h.runner.run(shift_open_command("cmd-1"), &request_as(Some("guard-token"))).await;

    assert_eq!(rejection_code(&outcome.result), RejectionCode::Forbidden);
    assert_eq!(outcome.failed_stage, Some(PipelineStage::Authorization));
    assert_eq!(
        outcome.completed_stages,
        vec![PipelineStage::Intake, PipelineStage::Authentication]
    );
    // No handler stage ran.
    assert!(h
        .shifts
        .find_active_shift("co-1", "guard-1")
        .await
        .expect("lookup")
        .is_none());
}

#[tokio::test]
async fn malformed_commands_fail_at_intake() {
    let h = harness();

    let mut command = shift_open_command("cmd-1");
    command.version = 2;
    let outcome = h.runner.run(command, &request_as(Some("guard-token"))).await;
    assert_eq!(rejection_code(&outcome.result), RejectionCode::VersionMismatch);
    assert_eq!(outcome.failed_stage, Some(PipelineStage::Intake));
    assert!(outcome.completed_stages.is_empty());

    let outcome = h.runner.run(shift_open_command("  "), &request_as(Some("guard-token"))).await;
    assert_eq!(rejection_code(&outcome.result), RejectionCode::InvalidPayload);
    assert_eq!(outcome.failed_stage, Some(PipelineStage::Intake));
}

#[tokio::test]
async fn second_run_replays_cached_success_without_reexecuting() {
    let h = harness();
    let first = h.runner.run(shift_open_command("cmd-1"), &request_as(Some("guard-token"))).await;
    assert!(first.result.is_accepted());

    // The same command id again: the handler must not run a second time,
    // and a second shift must not exist.
    let second = h.runner.run(shift_open_command("cmd-1"), &request_as(Some("guard-token"))).await;
    assert!(second.result.is_accepted());
    assert_eq!(
        second.completed_stages.last().copied(),
        Some(PipelineStage::IdempotencyCheck)
    );
    let CommandResult::Accepted { receipt, .. } = &second.result else {
        panic!("expected acceptance");
    };
    assert_eq!(receipt["replay"], true);
    assert_eq!(h.idempotency.accepted.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rejections_are_cached_and_replayed() {
    let h = harness();
    let mut command = shift_open_command("cmd-1");
    command.payload = json!({ "location": { "latitude": 120.0, "longitude": 0.0 } });

    let first = h.runner.run(command.clone(), &request_as(Some("guard-token"))).await;
    assert_eq!(rejection_code(&first.result), RejectionCode::InvalidPayload);
    assert_eq!(first.failed_stage, Some(PipelineStage::PayloadValidation));
    // This run owned the PENDING record, so it resolved it.
    assert_eq!(h.idempotency.rejected.load(Ordering::SeqCst), 1);

    let second = h.runner.run(command, &request_as(Some("guard-token"))).await;
    assert_eq!(rejection_code(&second.result), RejectionCode::InvalidPayload);
    assert_eq!(second.failed_stage, None);
    assert_eq!(
        second.completed_stages.last().copied(),
        Some(PipelineStage::IdempotencyCheck)
    );
    // Replay does not resolve anything again.
    assert_eq!(h.idempotency.rejected.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn in_flight_command_id_is_a_duplicate() {
    let h = harness();
    // Simulate a concurrent run holding the PENDING lock.
    assert!(h.idempotency.create_pending_record("co-1", "cmd-1").await.expect("create"));

    let outcome = h.runner.run(shift_open_command("cmd-1"), &request_as(Some("guard-token"))).await;
    assert_eq!(rejection_code(&outcome.result), RejectionCode::DuplicateCommand);
    assert_eq!(outcome.failed_stage, Some(PipelineStage::IdempotencyCheck));
    // The failing run did not own the record, so it must not resolve it.
    assert_eq!(h.idempotency.rejected.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn unregistered_command_type_is_a_typed_internal_error() {
    let h = harness();
    let mut command = shift_open_command("cmd-1");
    command.command_type = CommandType::RondinStart;
    command.module = SystemModule::Patrols;
    command.capability = Capability::RondinStart;

    let outcome = h.runner.run(command, &request_as(Some("guard-token"))).await;
    assert_eq!(rejection_code(&outcome.result), RejectionCode::InternalError);
    assert_eq!(outcome.failed_stage, Some(PipelineStage::PayloadValidation));
    let CommandResult::Rejected { message, .. } = &outcome.result else {
        panic!("expected rejection");
    };
    assert!(message.contains("not implemented"));
}

#[tokio::test]
async fn partial_run_stops_after_requested_stage() {
    let h = harness();
    let outcome = h
        .runner
        .run_up_to_stage(
            shift_open_command("cmd-1"),
            &request_as(Some("guard-token")),
            PipelineStage::PreconditionCheck,
        )
        .await;

    assert!(outcome.result.is_accepted());
    assert_eq!(outcome.completed_stages, STAGE_ORDER[..6].to_vec());
    let CommandResult::Accepted { receipt, .. } = &outcome.result else {
        panic!("expected acceptance");
    };
    assert_eq!(receipt["partial"], true);
    assert_eq!(receipt["completedThrough"], "PRECONDITION_CHECK");

    // The side-effecting stages never ran.
    assert!(h
        .shifts
        .find_active_shift("co-1", "guard-1")
        .await
        .expect("lookup")
        .is_none());
    assert_eq!(h.idempotency.accepted.load(Ordering::SeqCst), 0);
}

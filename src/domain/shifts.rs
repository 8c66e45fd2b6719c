//! Shift lifecycle: the `shift.open` handler and its store.
//!
//! This is the reference instantiation of the five-step handler template.
//! A guard opens a shift to mark themselves on duty; a user may hold at
//! most one active shift per tenant at a time.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::Mutex;
use tracing::error;
use uuid::Uuid;

use crate::kernel::audit::{generate_audit_id, AuditRecord, AuditResult, AuditSink};
use crate::kernel::pipeline::{CommandHandler, ExecutionContext};
use crate::types::{CommandId, CompanyId, RejectionCode, UserId};

// ── types ───────────────────────────────────────────────────────────────

/// A geographic coordinate reported by the client device.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    /// Degrees, [-90, 90].
    pub latitude: f64,
    /// Degrees, [-180, 180].
    pub longitude: f64,
}

impl GeoPoint {
    /// Whether the coordinate is within valid bounds.
    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.latitude) && (-180.0..=180.0).contains(&self.longitude)
    }
}

/// Payload of `shift.open`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ShiftOpenPayload {
    /// Where the shift was opened, if the device had a fix.
    #[serde(default)]
    pub location: Option<GeoPoint>,
    /// Free-form opening notes.
    #[serde(default)]
    pub notes: Option<String>,
}

/// Lifecycle status of a shift.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ShiftStatus {
    /// On duty.
    Active,
    /// Off duty.
    Closed,
}

/// A stored shift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftRecord {
    /// Unique shift id, `shift_<uuid>`.
    pub shift_id: String,
    /// The guard on duty.
    pub user_id: UserId,
    /// Tenant scope.
    pub company_id: CompanyId,
    /// Current status.
    pub status: ShiftStatus,
    /// When the shift opened.
    pub opened_at: DateTime<Utc>,
    /// The command that created the shift, for traceability.
    pub source_command_id: CommandId,
    /// Opening location, if reported.
    pub open_location: Option<GeoPoint>,
    /// Opening notes, if any.
    pub open_notes: Option<String>,
}

/// Client-facing receipt of a successful `shift.open`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShiftOpenReceipt {
    /// The created shift.
    pub shift_id: String,
    /// Opening time (Unix ms).
    pub opened_at: i64,
}

// ── store ───────────────────────────────────────────────────────────────

/// Shift persistence, tenant-scoped.
#[async_trait]
pub trait ShiftStore: Send + Sync {
    /// The user's active shift in the tenant, if one exists.
    async fn find_active_shift(
        &self,
        company_id: &str,
        user_id: &str,
    ) -> anyhow::Result<Option<ShiftRecord>>;

    /// Durably store a shift.
    async fn insert(&self, record: ShiftRecord) -> anyhow::Result<()>;
}

/// In-memory shift store.
#[derive(Default)]
pub struct MemoryShiftStore {
    shifts: Mutex<HashMap<String, ShiftRecord>>,
}

impl MemoryShiftStore {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ShiftStore for MemoryShiftStore {
    async fn find_active_shift(
        &self,
        company_id: &str,
        user_id: &str,
    ) -> anyhow::Result<Option<ShiftRecord>> {
        let shifts = self.shifts.lock().await;
        Ok(shifts
            .values()
            .find(|s| {
                s.company_id == company_id
                    && s.user_id == user_id
                    && s.status == ShiftStatus::Active
            })
            .cloned())
    }

    async fn insert(&self, record: ShiftRecord) -> anyhow::Result<()> {
        let mut shifts = self.shifts.lock().await;
        shifts.insert(record.shift_id.clone(), record);
        Ok(())
    }
}

// ── handler ─────────────────────────────────────────────────────────────

/// Handler for `shift.open`.
pub struct ShiftOpenHandler {
    shifts: Arc<dyn ShiftStore>,
    audit: Arc<dyn AuditSink>,
}

impl ShiftOpenHandler {
    /// Build the handler over its stores.
    pub fn new(shifts: Arc<dyn ShiftStore>, audit: Arc<dyn AuditSink>) -> Self {
        Self { shifts, audit }
    }

    fn actor_uid(ctx: &ExecutionContext) -> Option<UserId> {
        ctx.auth
            .as_ref()
            .and_then(|auth| auth.identity.as_authenticated())
            .map(|identity| identity.uid.clone())
    }
}

#[async_trait]
impl CommandHandler for ShiftOpenHandler {
    async fn validate_payload(&self, mut ctx: ExecutionContext) -> ExecutionContext {
        let payload: ShiftOpenPayload = match serde_json::from_value(ctx.command.payload.clone())
        {
            Ok(payload) => payload,
            Err(error) => {
                return ctx.fail(
                    RejectionCode::InvalidPayload,
                    format!("invalid shift.open payload: {error}"),
                )
            }
        };
        if let Some(location) = &payload.location {
            if !location.is_valid() {
                return ctx.fail(
                    RejectionCode::InvalidPayload,
                    "location out of bounds: latitude must be in [-90, 90], longitude in [-180, 180]",
                );
            }
        }
        ctx.payload_valid = true;
        ctx
    }

    async fn check_preconditions(&self, mut ctx: ExecutionContext) -> ExecutionContext {
        let Some(uid) = Self::actor_uid(&ctx) else {
            return ctx.fail(RejectionCode::InternalError, "no authenticated identity in context");
        };
        match self.shifts.find_active_shift(&ctx.command.company_id, &uid).await {
            Ok(None) => {
                ctx.preconditions_met = true;
                ctx
            }
            Ok(Some(existing)) => ctx.fail(
                RejectionCode::InvalidState,
                format!("user already has active shift {}", existing.shift_id),
            ),
            Err(error) => ctx.fail(
                RejectionCode::InternalError,
                format!("shift lookup failed: {error}"),
            ),
        }
    }

    async fn execute(&self, mut ctx: ExecutionContext) -> ExecutionContext {
        let Some(uid) = Self::actor_uid(&ctx) else {
            return ctx.fail(RejectionCode::InternalError, "no authenticated identity in context");
        };
        let payload: ShiftOpenPayload = match serde_json::from_value(ctx.command.payload.clone())
        {
            Ok(payload) => payload,
            Err(error) => {
                return ctx.fail(
                    RejectionCode::InternalError,
                    format!("payload changed since validation: {error}"),
                )
            }
        };
        let opened_at = Utc::now();
        let record = ShiftRecord {
            shift_id: format!("shift_{}", Uuid::new_v4().simple()),
            user_id: uid,
            company_id: ctx.command.company_id.clone(),
            status: ShiftStatus::Active,
            opened_at,
            source_command_id: ctx.command.command_id.clone(),
            open_location: payload.location,
            open_notes: payload.notes,
        };
        let receipt = ShiftOpenReceipt {
            shift_id: record.shift_id.clone(),
            opened_at: opened_at.timestamp_millis(),
        };
        match (serde_json::to_value(&record), serde_json::to_value(&receipt)) {
            (Ok(artifact), Ok(receipt)) => {
                ctx.artifact = Some(artifact);
                ctx.receipt = Some(receipt);
                ctx
            }
            (Err(error), _) | (_, Err(error)) => ctx.fail(
                RejectionCode::InternalError,
                format!("failed to encode shift: {error}"),
            ),
        }
    }

    async fn persist(&self, ctx: ExecutionContext) -> ExecutionContext {
        let Some(artifact) = ctx.artifact.clone() else {
            return ctx.fail(RejectionCode::InternalError, "nothing to persist");
        };
        let record: ShiftRecord = match serde_json::from_value(artifact) {
            Ok(record) => record,
            Err(error) => {
                return ctx.fail(
                    RejectionCode::InternalError,
                    format!("corrupt execution artifact: {error}"),
                )
            }
        };
        match self.shifts.insert(record).await {
            Ok(()) => ctx,
            Err(error) => {
                ctx.fail(RejectionCode::InternalError, format!("failed to store shift: {error}"))
            }
        }
    }

    async fn emit_audit(&self, ctx: ExecutionContext) -> ExecutionContext {
        let record = AuditRecord {
            audit_id: generate_audit_id(),
            command_id: ctx.command.command_id.clone(),
            command_type: ctx.command.command_type,
            company_id: ctx.command.company_id.clone(),
            user_id: Self::actor_uid(&ctx).unwrap_or_else(|| ctx.command.actor.uid.clone()),
            user_role: ctx.command.actor.role,
            result: AuditResult::Accepted,
            rejection_code: None,
            timestamp: Utc::now(),
            duration_ms: ctx.elapsed_ms(),
            context: ctx.receipt.clone().map(|receipt| json!({ "receipt": receipt })),
        };
        // The command already succeeded; an audit write failure must not
        // retroactively fail it.
        if let Err(error) = self.audit.append(&record).await {
            error!(command_id = %ctx.command.command_id, %error, "audit emission failed");
        }
        ctx
    }
}

//! Idempotency engine: per-(tenant, command) processing records and the
//! decision rules that make every command id resolve exactly once.
//!
//! The atomic create-if-absent of the PENDING record is the system's only
//! concurrency-control primitive: of N concurrent runs of the same command
//! id, the one that creates the record processes, the rest are duplicates.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::types::{CommandId, CompanyId, RejectionCode};

// ── records ─────────────────────────────────────────────────────────────

/// Processing status of a command id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdempotencyStatus {
    /// Processing in flight.
    Pending,
    /// Resolved successfully.
    Accepted,
    /// Resolved with a rejection.
    Rejected,
}

/// Stored outcome of a resolved command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum IdempotencyOutcome {
    /// The command was accepted.
    Success,
    /// The command was rejected with this code.
    Rejection {
        /// The stored rejection code.
        code: RejectionCode,
    },
}

/// Record of one command id's processing, scoped to a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// Tenant scope.
    pub company_id: CompanyId,
    /// The command id this record locks.
    pub command_id: CommandId,
    /// Current status.
    pub status: IdempotencyStatus,
    /// When the record was created (the PENDING lock time).
    pub created_at: DateTime<Utc>,
    /// When the record was resolved, if it was.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Stored outcome, present once resolved.
    pub result: Option<IdempotencyOutcome>,
}

// ── decision rules ──────────────────────────────────────────────────────

/// Tunable windows of the idempotency rules. Defaults match production:
/// resolved records are honored for 24 hours, a PENDING lock goes stale
/// after 5 minutes (a crashed run must not block its command id forever).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdempotencyConfig {
    /// How long a resolved record keeps answering for its command id.
    pub ttl: Duration,
    /// How long a PENDING record blocks concurrent runs.
    pub pending_timeout: Duration,
}

impl Default for IdempotencyConfig {
    fn default() -> Self {
        Self { ttl: Duration::hours(24), pending_timeout: Duration::minutes(5) }
    }
}

/// What the pipeline should do with a command id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdempotencyCheck {
    /// No usable record: create the PENDING lock and process.
    CreateAndProcess,
    /// A fresh PENDING record exists: another run owns this command id.
    RejectInFlight {
        /// The blocking record.
        record: IdempotencyRecord,
    },
    /// A fresh ACCEPTED record exists: replay the success.
    CachedSuccess {
        /// The cached record.
        record: IdempotencyRecord,
    },
    /// A fresh REJECTED record exists: replay the rejection.
    CachedRejection {
        /// The cached record.
        record: IdempotencyRecord,
    },
}

/// Apply the decision rules to a stored record.
///
/// A record past the TTL is expired regardless of status. A PENDING record
/// past the pending timeout is a stale lock. Both yield `CreateAndProcess`;
/// the store overwrites them when creating the new lock.
pub fn decide(
    record: Option<&IdempotencyRecord>,
    now: DateTime<Utc>,
    config: &IdempotencyConfig,
) -> IdempotencyCheck {
    let Some(record) = record else {
        return IdempotencyCheck::CreateAndProcess;
    };
    let age = now.signed_duration_since(record.created_at);
    if age > config.ttl {
        return IdempotencyCheck::CreateAndProcess;
    }
    match record.status {
        IdempotencyStatus::Pending => {
            if age > config.pending_timeout {
                IdempotencyCheck::CreateAndProcess
            } else {
                IdempotencyCheck::RejectInFlight { record: record.clone() }
            }
        }
        IdempotencyStatus::Accepted => IdempotencyCheck::CachedSuccess { record: record.clone() },
        IdempotencyStatus::Rejected => {
            IdempotencyCheck::CachedRejection { record: record.clone() }
        }
    }
}

// ── store contract ──────────────────────────────────────────────────────

/// Idempotency record store. All operations are tenant-scoped.
#[async_trait]
pub trait IdempotencyStore: Send + Sync {
    /// Evaluate the stored record for a command id against the decision
    /// rules.
    async fn check_idempotency(
        &self,
        company_id: &str,
        command_id: &str,
    ) -> anyhow::Result<IdempotencyCheck>;

    /// Atomically create the PENDING record if no fresh record exists.
    /// Returns `true` when this caller created it (and owns the run),
    /// `false` when a fresh record already exists.
    async fn create_pending_record(
        &self,
        company_id: &str,
        command_id: &str,
    ) -> anyhow::Result<bool>;

    /// Resolve the record as accepted.
    async fn mark_accepted(&self, company_id: &str, command_id: &str) -> anyhow::Result<()>;

    /// Resolve the record as rejected with the given code.
    async fn mark_rejected(
        &self,
        company_id: &str,
        command_id: &str,
        code: RejectionCode,
    ) -> anyhow::Result<()>;
}

// ── in-memory store ─────────────────────────────────────────────────────

/// In-memory store. The mutex around the map is what makes
/// `create_pending_record` a single-writer transaction.
pub struct MemoryIdempotencyStore {
    config: IdempotencyConfig,
    records: Mutex<HashMap<(CompanyId, CommandId), IdempotencyRecord>>,
}

impl MemoryIdempotencyStore {
    /// Store with production windows.
    pub fn new() -> Self {
        Self::with_config(IdempotencyConfig::default())
    }

    /// Store with explicit windows.
    pub fn with_config(config: IdempotencyConfig) -> Self {
        Self { config, records: Mutex::new(HashMap::new()) }
    }

    fn key(company_id: &str, command_id: &str) -> (CompanyId, CommandId) {
        (company_id.to_owned(), command_id.to_owned())
    }
}

impl Default for MemoryIdempotencyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl IdempotencyStore for MemoryIdempotencyStore {
    async fn check_idempotency(
        &self,
        company_id: &str,
        command_id: &str,
    ) -> anyhow::Result<IdempotencyCheck> {
        let records = self.records.lock().await;
        let record = records.get(&Self::key(company_id, command_id));
        Ok(decide(record, Utc::now(), &self.config))
    }

    async fn create_pending_record(
        &self,
        company_id: &str,
        command_id: &str,
    ) -> anyhow::Result<bool> {
        let mut records = self.records.lock().await;
        let key = Self::key(company_id, command_id);
        let now = Utc::now();
        // Fresh records block; stale or expired ones are overwritten.
        if !matches!(decide(records.get(&key), now, &self.config), IdempotencyCheck::CreateAndProcess)
        {
            return Ok(false);
        }
        records.insert(
            key,
            IdempotencyRecord {
                company_id: company_id.to_owned(),
                command_id: command_id.to_owned(),
                status: IdempotencyStatus::Pending,
                created_at: now,
                resolved_at: None,
                result: None,
            },
        );
        Ok(true)
    }

    async fn mark_accepted(&self, company_id: &str, command_id: &str) -> anyhow::Result<()> {
        let mut records = self.records.lock().await;
        let key = Self::key(company_id, command_id);
        let Some(record) = records.get_mut(&key) else {
            anyhow::bail!("no idempotency record for {company_id}/{command_id}");
        };
        record.status = IdempotencyStatus::Accepted;
        record.resolved_at = Some(Utc::now());
        record.result = Some(IdempotencyOutcome::Success);
        Ok(())
    }

    async fn mark_rejected(
        &self,
        company_id: &str,
        command_id: &str,
        code: RejectionCode,
    ) -> anyhow::Result<()> {
        let mut records = self.records.lock().await;
        let key = Self::key(company_id, command_id);
        let Some(record) = records.get_mut(&key) else {
            anyhow::bail!("no idempotency record for {company_id}/{command_id}");
        };
        record.status = IdempotencyStatus::Rejected;
        record.resolved_at = Some(Utc::now());
        record.result = Some(IdempotencyOutcome::Rejection { code });
        Ok(())
    }
}

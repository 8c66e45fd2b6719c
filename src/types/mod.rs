//! Core domain value types: commands, results, roles, modules, capabilities.

use serde::{Deserialize, Serialize};

/// Unique command identifier, generated by the client before sending.
/// Used for idempotency and traceability.
pub type CommandId = String;

/// User identifier, as issued by the identity provider.
pub type UserId = String;

/// Tenant identifier. Every key and query in the system is scoped by it.
pub type CompanyId = String;

/// Command contract version currently supported by the pipeline.
pub const SUPPORTED_COMMAND_VERSION: u32 = 1;

/// Canonical user roles.
///
/// Roles bound what a user may *delegate*, never what they may execute;
/// execution rights come from per-user capability assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    /// Platform operator. May delegate everything.
    Superadmin,
    /// Company administrator.
    Admin,
    /// Field supervisor.
    Supervisor,
    /// Operational guard.
    Guard,
}

impl UserRole {
    /// Parse a raw role claim. Unknown values are rejected, never defaulted.
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "superadmin" => Some(Self::Superadmin),
            "admin" => Some(Self::Admin),
            "supervisor" => Some(Self::Supervisor),
            "guard" => Some(Self::Guard),
            _ => None,
        }
    }

    /// Canonical wire name of the role.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Superadmin => "superadmin",
            Self::Admin => "admin",
            Self::Supervisor => "supervisor",
            Self::Guard => "guard",
        }
    }
}

/// Lifecycle status of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompanyStatus {
    /// Operational; users may work.
    Active,
    /// Temporarily suspended; access blocked.
    Suspended,
    /// Removed; access permanently blocked.
    Deleted,
}

/// Platform a command originated from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandOrigin {
    /// Android field app.
    Android,
    /// Web console.
    Web,
}

/// Closed set of domain command types.
///
/// Each type corresponds to one operational capability; anything not in
/// this enumeration cannot change system state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandType {
    /// Open a guard shift.
    #[serde(rename = "shift.open")]
    ShiftOpen,
    /// Close the actor's own shift.
    #[serde(rename = "shift.close")]
    ShiftClose,
    /// Close a subordinate's shift under supervision.
    #[serde(rename = "shift.close.supervised")]
    ShiftCloseSupervised,
    /// Report a new incident.
    #[serde(rename = "incident.create")]
    IncidentCreate,
    /// Close an incident.
    #[serde(rename = "incident.close")]
    IncidentClose,
    /// Start a patrol (rondin).
    #[serde(rename = "rondin.start")]
    RondinStart,
    /// Record a scanned checkpoint during a patrol.
    #[serde(rename = "rondin.recordCheckpoint")]
    RondinRecordCheckpoint,
    /// Finish a patrol.
    #[serde(rename = "rondin.finish")]
    RondinFinish,
    /// Submit a completed checklist.
    #[serde(rename = "checklist.submit")]
    ChecklistSubmit,
    /// Register a person entering the premises.
    #[serde(rename = "access.registerEntry")]
    AccessRegisterEntry,
    /// Register a person leaving the premises.
    #[serde(rename = "access.registerExit")]
    AccessRegisterExit,
    /// Register a vehicle entering.
    #[serde(rename = "vehicle.registerEntry")]
    VehicleRegisterEntry,
    /// Register a vehicle leaving.
    #[serde(rename = "vehicle.registerExit")]
    VehicleRegisterExit,
    /// Attach evidence to an existing record.
    #[serde(rename = "evidence.attach")]
    EvidenceAttach,
    /// Create a checkpoint (QR point).
    #[serde(rename = "checkpoint.create")]
    CheckpointCreate,
    /// Disable a checkpoint.
    #[serde(rename = "checkpoint.disable")]
    CheckpointDisable,
}

impl CommandType {
    /// Canonical wire name, e.g. `"shift.open"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ShiftOpen => "shift.open",
            Self::ShiftClose => "shift.close",
            Self::ShiftCloseSupervised => "shift.close.supervised",
            Self::IncidentCreate => "incident.create",
            Self::IncidentClose => "incident.close",
            Self::RondinStart => "rondin.start",
            Self::RondinRecordCheckpoint => "rondin.recordCheckpoint",
            Self::RondinFinish => "rondin.finish",
            Self::ChecklistSubmit => "checklist.submit",
            Self::AccessRegisterEntry => "access.registerEntry",
            Self::AccessRegisterExit => "access.registerExit",
            Self::VehicleRegisterEntry => "vehicle.registerEntry",
            Self::VehicleRegisterExit => "vehicle.registerExit",
            Self::EvidenceAttach => "evidence.attach",
            Self::CheckpointCreate => "checkpoint.create",
            Self::CheckpointDisable => "checkpoint.disable",
        }
    }
}

/// Toggleable functional areas. A disabled module makes its capabilities
/// non-existent regardless of assignment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemModule {
    /// Authentication, users, company, shifts.
    Core,
    /// Incident reporting.
    Incidents,
    /// Patrols (rondins).
    Patrols,
    /// Checklists.
    Checklists,
    /// Pedestrian access control.
    AccessControl,
    /// Vehicle access control.
    VehicleControl,
    /// Evidence attachments (cross-cutting).
    Evidence,
    /// Checkpoints and QR codes.
    Checkpoints,
}

/// All canonical modules, in declaration order.
pub const CANONICAL_MODULES: [SystemModule; 8] = [
    SystemModule::Core,
    SystemModule::Incidents,
    SystemModule::Patrols,
    SystemModule::Checklists,
    SystemModule::AccessControl,
    SystemModule::VehicleControl,
    SystemModule::Evidence,
    SystemModule::Checkpoints,
];

/// Fine-grained permitted actions. Each capability is scoped to one module
/// (`qr.scan` belongs to both patrols and checkpoints) and is assigned per
/// user — a role never implies a capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum Capability {
    #[serde(rename = "shift.open")]
    ShiftOpen,
    #[serde(rename = "shift.close")]
    ShiftClose,
    #[serde(rename = "shift.view.self")]
    ShiftViewSelf,
    #[serde(rename = "incident.create")]
    IncidentCreate,
    #[serde(rename = "incident.view.self")]
    IncidentViewSelf,
    #[serde(rename = "incident.close")]
    IncidentClose,
    #[serde(rename = "incident.attachEvidence")]
    IncidentAttachEvidence,
    #[serde(rename = "rondin.start")]
    RondinStart,
    #[serde(rename = "rondin.recordCheckpoint")]
    RondinRecordCheckpoint,
    #[serde(rename = "rondin.finish")]
    RondinFinish,
    #[serde(rename = "qr.scan")]
    QrScan,
    #[serde(rename = "checklist.view.self")]
    ChecklistViewSelf,
    #[serde(rename = "checklist.submit")]
    ChecklistSubmit,
    #[serde(rename = "access.registerEntry")]
    AccessRegisterEntry,
    #[serde(rename = "access.registerExit")]
    AccessRegisterExit,
    #[serde(rename = "access.view.self")]
    AccessViewSelf,
    #[serde(rename = "vehicle.registerEntry")]
    VehicleRegisterEntry,
    #[serde(rename = "vehicle.registerExit")]
    VehicleRegisterExit,
    #[serde(rename = "vehicle.view.self")]
    VehicleViewSelf,
    #[serde(rename = "evidence.attach")]
    EvidenceAttach,
    #[serde(rename = "evidence.view.self")]
    EvidenceViewSelf,
    #[serde(rename = "checkpoint.create")]
    CheckpointCreate,
    #[serde(rename = "checkpoint.disable")]
    CheckpointDisable,
    #[serde(rename = "checkpoint.downloadQR")]
    CheckpointDownloadQr,
}

impl Capability {
    /// Canonical wire name, e.g. `"rondin.recordCheckpoint"`.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ShiftOpen => "shift.open",
            Self::ShiftClose => "shift.close",
            Self::ShiftViewSelf => "shift.view.self",
            Self::IncidentCreate => "incident.create",
            Self::IncidentViewSelf => "incident.view.self",
            Self::IncidentClose => "incident.close",
            Self::IncidentAttachEvidence => "incident.attachEvidence",
            Self::RondinStart => "rondin.start",
            Self::RondinRecordCheckpoint => "rondin.recordCheckpoint",
            Self::RondinFinish => "rondin.finish",
            Self::QrScan => "qr.scan",
            Self::ChecklistViewSelf => "checklist.view.self",
            Self::ChecklistSubmit => "checklist.submit",
            Self::AccessRegisterEntry => "access.registerEntry",
            Self::AccessRegisterExit => "access.registerExit",
            Self::AccessViewSelf => "access.view.self",
            Self::VehicleRegisterEntry => "vehicle.registerEntry",
            Self::VehicleRegisterExit => "vehicle.registerExit",
            Self::VehicleViewSelf => "vehicle.view.self",
            Self::EvidenceAttach => "evidence.attach",
            Self::EvidenceViewSelf => "evidence.view.self",
            Self::CheckpointCreate => "checkpoint.create",
            Self::CheckpointDisable => "checkpoint.disable",
            Self::CheckpointDownloadQr => "checkpoint.downloadQR",
        }
    }
}

/// Actor of a command, derived from the authenticated identity at creation
/// time and frozen into the command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandActor {
    /// User executing the command.
    pub uid: UserId,
    /// Role held at the moment the command was created.
    pub role: UserRole,
}

/// Canonical domain command.
///
/// Commands are intentions, not results: the backend alone decides the
/// outcome. A command is immutable once created, and the same `command_id`
/// must always yield the same outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Command {
    /// Globally unique identifier, generated by the client.
    pub command_id: CommandId,
    /// Requested action.
    pub command_type: CommandType,
    /// Contract version, for evolution without breaking clients.
    pub version: u32,
    /// Actor, frozen at creation.
    pub actor: CommandActor,
    /// Tenant the command belongs to.
    pub company_id: CompanyId,
    /// Module the command belongs to.
    pub module: SystemModule,
    /// Capability required to execute the command.
    pub capability: Capability,
    /// Platform of origin.
    pub origin: CommandOrigin,
    /// Client clock at creation (Unix ms); may differ from server time.
    pub client_timestamp: i64,
    /// Command-specific data, the minimum necessary.
    pub payload: serde_json::Value,
}

/// Typed reasons a command can be rejected. Closed set; clients handle
/// these programmatically.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RejectionCode {
    /// Not authenticated.
    Unauthorized,
    /// Authenticated but not allowed.
    Forbidden,
    /// Tenant suspended or deleted.
    CompanySuspended,
    /// User suspended.
    UserSuspended,
    /// Module not active for the tenant.
    ModuleDisabled,
    /// Command id already processed or in flight.
    DuplicateCommand,
    /// Domain state does not permit the action.
    InvalidState,
    /// A specific business precondition failed.
    PreconditionFailed,
    /// Referenced resource does not exist.
    ResourceNotFound,
    /// Referenced resource is locked.
    ResourceLocked,
    /// Payload failed validation.
    InvalidPayload,
    /// Command contract version not supported.
    VersionMismatch,
    /// Technical failure; the only retry-eligible class.
    InternalError,
}

impl RejectionCode {
    /// Whether a client may retry the same command id after this rejection.
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::InternalError)
    }
}

/// Outcome of command execution as seen by the client. Only two states
/// exist: accepted or rejected with a typed reason.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum CommandResult {
    /// The backend processed the command successfully.
    #[serde(rename_all = "camelCase")]
    Accepted {
        /// Echo of the command id.
        command_id: CommandId,
        /// Server clock at resolution (Unix ms).
        server_timestamp: i64,
        /// Command-specific receipt.
        receipt: serde_json::Value,
    },
    /// The backend rejected the command with an explicit reason.
    #[serde(rename_all = "camelCase")]
    Rejected {
        /// Echo of the command id.
        command_id: CommandId,
        /// Server clock at resolution (Unix ms).
        server_timestamp: i64,
        /// Typed rejection reason.
        rejection_code: RejectionCode,
        /// Diagnostic text; not intended for end-user display.
        message: String,
    },
}

impl CommandResult {
    /// Whether the result is an acceptance.
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted { .. })
    }

    /// The rejection code, if the result is a rejection.
    pub fn rejection_code(&self) -> Option<RejectionCode> {
        match self {
            Self::Rejected { rejection_code, .. } => Some(*rejection_code),
            Self::Accepted { .. } => None,
        }
    }
}

//! Declarative capability model: module membership, operative profiles and
//! per-role delegation ceilings.
//!
//! Nothing here grants access. Roles bound what a user may *delegate*;
//! execution rights come only from capabilities explicitly assigned to the
//! user. The pipeline does not consult this model; it exists so that user
//! administration can be validated against a single source of truth.

use crate::types::{Capability, SystemModule, UserRole};

// ── module membership ───────────────────────────────────────────────────

/// Capabilities belonging to a module. `qr.scan` is deliberately listed
/// under both patrols and checkpoints.
pub fn module_capabilities(module: SystemModule) -> &'static [Capability] {
    match module {
        SystemModule::Core => {
            &[Capability::ShiftOpen, Capability::ShiftClose, Capability::ShiftViewSelf]
        }
        SystemModule::Incidents => &[
            Capability::IncidentCreate,
            Capability::IncidentViewSelf,
            Capability::IncidentClose,
            Capability::IncidentAttachEvidence,
        ],
        SystemModule::Patrols => &[
            Capability::RondinStart,
            Capability::RondinRecordCheckpoint,
            Capability::RondinFinish,
            Capability::QrScan,
        ],
        SystemModule::Checklists => {
            &[Capability::ChecklistViewSelf, Capability::ChecklistSubmit]
        }
        SystemModule::AccessControl => &[
            Capability::AccessRegisterEntry,
            Capability::AccessRegisterExit,
            Capability::AccessViewSelf,
        ],
        SystemModule::VehicleControl => &[
            Capability::VehicleRegisterEntry,
            Capability::VehicleRegisterExit,
            Capability::VehicleViewSelf,
        ],
        SystemModule::Evidence => {
            &[Capability::EvidenceAttach, Capability::EvidenceViewSelf]
        }
        SystemModule::Checkpoints => &[
            Capability::CheckpointCreate,
            Capability::CheckpointDisable,
            Capability::CheckpointDownloadQr,
            Capability::QrScan,
        ],
    }
}

/// Whether a capability belongs to a module.
pub fn is_capability_in_module(capability: Capability, module: SystemModule) -> bool {
    module_capabilities(module).contains(&capability)
}

// ── capability categories ───────────────────────────────────────────────

/// Base field-operation capabilities, typically held by guards.
pub const OPERATION_CAPABILITIES: [Capability; 21] = [
    Capability::ShiftOpen,
    Capability::ShiftClose,
    Capability::ShiftViewSelf,
    Capability::IncidentCreate,
    Capability::IncidentViewSelf,
    Capability::IncidentClose,
    Capability::IncidentAttachEvidence,
    Capability::RondinStart,
    Capability::RondinRecordCheckpoint,
    Capability::RondinFinish,
    Capability::QrScan,
    Capability::ChecklistViewSelf,
    Capability::ChecklistSubmit,
    Capability::AccessRegisterEntry,
    Capability::AccessRegisterExit,
    Capability::AccessViewSelf,
    Capability::VehicleRegisterEntry,
    Capability::VehicleRegisterExit,
    Capability::VehicleViewSelf,
    Capability::EvidenceAttach,
    Capability::EvidenceViewSelf,
];

/// Administrative capabilities. User and module management entries are not
/// operational commands, so they travel as plain wire names.
pub const ADMIN_CAPABILITIES: [&str; 9] = [
    "user.invite",
    "user.suspend",
    "user.assignCapabilities",
    "user.assignProfile",
    "module.enable",
    "module.disable",
    "checkpoint.create",
    "checkpoint.disable",
    "checkpoint.downloadQR",
];

/// Supervision capabilities, held by supervisors over assigned personnel.
pub const SUPERVISION_CAPABILITIES: [&str; 3] = [
    "operation.view.assigned",
    "incident.close.supervised",
    "shift.close.supervised",
];

// ── operative profiles ──────────────────────────────────────────────────

/// A recommended bundle of capabilities for a kind of field work. Profiles
/// are assignment shortcuts, not security entities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperativeProfile {
    /// Stable profile id.
    pub id: &'static str,
    /// Display name.
    pub name: &'static str,
    /// Capabilities the profile typically bundles.
    pub typical_capabilities: &'static [Capability],
}

/// Patrol-focused profile.
pub const PROFILE_RONDINERO: OperativeProfile = OperativeProfile {
    id: "rondinero",
    name: "Rondinero",
    typical_capabilities: &[
        Capability::ShiftOpen,
        Capability::ShiftClose,
        Capability::RondinStart,
        Capability::RondinRecordCheckpoint,
        Capability::RondinFinish,
        Capability::QrScan,
        Capability::IncidentCreate,
        Capability::EvidenceAttach,
    ],
};

/// Gate-control profile.
pub const PROFILE_GUARDIA_ACCESOS: OperativeProfile = OperativeProfile {
    id: "guardia_accesos",
    name: "Guardia de Accesos",
    typical_capabilities: &[
        Capability::ShiftOpen,
        Capability::ShiftClose,
        Capability::AccessRegisterEntry,
        Capability::AccessRegisterExit,
        Capability::VehicleRegisterEntry,
        Capability::VehicleRegisterExit,
        Capability::QrScan,
        Capability::EvidenceAttach,
    ],
};

/// Generalist profile.
pub const PROFILE_GUARDIA_GENERAL: OperativeProfile = OperativeProfile {
    id: "guardia_general",
    name: "Guardia General",
    typical_capabilities: &[
        Capability::ShiftOpen,
        Capability::ShiftClose,
        Capability::ChecklistSubmit,
        Capability::IncidentCreate,
        Capability::QrScan,
        Capability::EvidenceAttach,
    ],
};

/// All canonical profiles.
pub const CANONICAL_PROFILES: [OperativeProfile; 3] =
    [PROFILE_RONDINERO, PROFILE_GUARDIA_ACCESOS, PROFILE_GUARDIA_GENERAL];

// ── delegation ceilings ─────────────────────────────────────────────────

/// The most a role may *delegate*: the capabilities it can assign, the
/// roles it can grant, and whether it can toggle modules. Holding a role
/// never grants any of the listed capabilities.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoleDelegationCeiling {
    /// The role this ceiling bounds.
    pub role: UserRole,
    /// Hierarchy level; strictly ordered, used only for comparisons.
    pub level: u8,
    /// Operational capabilities this role may assign to users.
    pub delegable_capabilities: &'static [Capability],
    /// Administrative/supervision wire names this role may assign.
    pub delegable_named: &'static [&'static str],
    /// Roles this role may grant.
    pub delegable_roles: &'static [UserRole],
    /// Whether this role may enable or disable modules.
    pub can_manage_modules: bool,
}

/// Superadmin: level 100, may delegate everything.
pub const CEILING_SUPERADMIN: RoleDelegationCeiling = RoleDelegationCeiling {
    role: UserRole::Superadmin,
    level: 100,
    delegable_capabilities: &OPERATION_CAPABILITIES,
    delegable_named: &[
        "user.invite",
        "user.suspend",
        "user.assignCapabilities",
        "user.assignProfile",
        "module.enable",
        "module.disable",
        "checkpoint.create",
        "checkpoint.disable",
        "checkpoint.downloadQR",
        "operation.view.assigned",
        "incident.close.supervised",
        "shift.close.supervised",
    ],
    delegable_roles: &[UserRole::Admin, UserRole::Supervisor, UserRole::Guard],
    can_manage_modules: true,
};

/// Admin: level 80, may delegate operation and supervision plus most admin
/// entries, but never module.enable/module.disable.
pub const CEILING_ADMIN: RoleDelegationCeiling = RoleDelegationCeiling {
    role: UserRole::Admin,
    level: 80,
    delegable_capabilities: &OPERATION_CAPABILITIES,
    delegable_named: &[
        "operation.view.assigned",
        "incident.close.supervised",
        "shift.close.supervised",
        "user.invite",
        "user.suspend",
        "user.assignCapabilities",
        "user.assignProfile",
        "checkpoint.create",
        "checkpoint.disable",
        "checkpoint.downloadQR",
    ],
    delegable_roles: &[UserRole::Supervisor, UserRole::Guard],
    can_manage_modules: false,
};

/// Supervisor: level 70, delegates nothing.
pub const CEILING_SUPERVISOR: RoleDelegationCeiling = RoleDelegationCeiling {
    role: UserRole::Supervisor,
    level: 70,
    delegable_capabilities: &[],
    delegable_named: &[],
    delegable_roles: &[],
    can_manage_modules: false,
};

/// Guard: level 50, delegates nothing.
pub const CEILING_GUARD: RoleDelegationCeiling = RoleDelegationCeiling {
    role: UserRole::Guard,
    level: 50,
    delegable_capabilities: &[],
    delegable_named: &[],
    delegable_roles: &[],
    can_manage_modules: false,
};

/// The ceiling bounding a role.
pub fn delegation_ceiling(role: UserRole) -> &'static RoleDelegationCeiling {
    match role {
        UserRole::Superadmin => &CEILING_SUPERADMIN,
        UserRole::Admin => &CEILING_ADMIN,
        UserRole::Supervisor => &CEILING_SUPERVISOR,
        UserRole::Guard => &CEILING_GUARD,
    }
}

/// Whether `from` may grant the role `to`.
pub fn can_role_delegate_to(from: UserRole, to: UserRole) -> bool {
    delegation_ceiling(from).delegable_roles.contains(&to)
}

/// Whether a role may assign a capability, by wire name. Checks the role's
/// ceiling only, never whether any user holds the capability.
pub fn can_role_delegate_capability(role: UserRole, capability: &str) -> bool {
    let ceiling = delegation_ceiling(role);
    ceiling
        .delegable_capabilities
        .iter()
        .any(|c| c.as_str() == capability)
        || ceiling.delegable_named.contains(&capability)
}

/// Hierarchy level of a role.
pub fn role_level(role: UserRole) -> u8 {
    delegation_ceiling(role).level
}

/// Whether `a` is strictly above `b` in the hierarchy.
pub fn is_role_superior(a: UserRole, b: UserRole) -> bool {
    role_level(a) > role_level(b)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CANONICAL_MODULES;

    #[test]
    fn qr_scan_belongs_to_patrols_and_checkpoints_only() {
        let holders: Vec<SystemModule> = CANONICAL_MODULES
            .into_iter()
            .filter(|&m| is_capability_in_module(Capability::QrScan, m))
            .collect();
        assert_eq!(holders, vec![SystemModule::Patrols, SystemModule::Checkpoints]);
    }

    #[test]
    fn every_capability_has_a_home_module() {
        for capability in OPERATION_CAPABILITIES {
            assert!(
                CANONICAL_MODULES
                    .into_iter()
                    .any(|m| is_capability_in_module(capability, m)),
                "{} has no module",
                capability.as_str()
            );
        }
    }

    #[test]
    fn levels_are_strictly_ordered() {
        assert!(is_role_superior(UserRole::Superadmin, UserRole::Admin));
        assert!(is_role_superior(UserRole::Admin, UserRole::Supervisor));
        assert!(is_role_superior(UserRole::Supervisor, UserRole::Guard));
        assert!(!is_role_superior(UserRole::Guard, UserRole::Guard));
        assert!(!is_role_superior(UserRole::Guard, UserRole::Superadmin));
    }

    #[test]
    fn only_superadmin_delegates_module_toggles() {
        assert!(can_role_delegate_capability(UserRole::Superadmin, "module.enable"));
        assert!(!can_role_delegate_capability(UserRole::Admin, "module.enable"));
        assert!(!can_role_delegate_capability(UserRole::Admin, "module.disable"));
        assert!(delegation_ceiling(UserRole::Superadmin).can_manage_modules);
        assert!(!delegation_ceiling(UserRole::Admin).can_manage_modules);
    }

    #[test]
    fn supervisor_and_guard_delegate_nothing() {
        for role in [UserRole::Supervisor, UserRole::Guard] {
            assert!(!can_role_delegate_capability(role, "shift.open"));
            assert!(!can_role_delegate_to(role, UserRole::Guard));
            assert!(!delegation_ceiling(role).can_manage_modules);
        }
    }

    #[test]
    fn admin_delegates_operations_and_supervision() {
        assert!(can_role_delegate_capability(UserRole::Admin, "shift.open"));
        assert!(can_role_delegate_capability(UserRole::Admin, "shift.close.supervised"));
        assert!(can_role_delegate_capability(UserRole::Admin, "user.invite"));
        assert!(can_role_delegate_to(UserRole::Admin, UserRole::Guard));
        assert!(!can_role_delegate_to(UserRole::Admin, UserRole::Admin));
    }

    #[test]
    fn profiles_stay_within_operations() {
        for profile in CANONICAL_PROFILES {
            for capability in profile.typical_capabilities {
                assert!(
                    OPERATION_CAPABILITIES.contains(capability),
                    "{} in profile {} is not operational",
                    capability.as_str(),
                    profile.id
                );
            }
        }
    }
}

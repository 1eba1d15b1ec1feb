//! Permission vocabulary: modules, actions, and per-actor permission records.

use std::fmt;

use serde::{Deserialize, Serialize};

/// A functional area of the clinic subject to permission checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Module {
    Patients,
    Appointments,
    Prescriptions,
    Exams,
    Notes,
    Financial,
    Reports,
    Conversations,
    Analytics,
    /// Electronic service invoices (NFS-e)
    Nfse,
    /// Secretary invitations and grants
    Secretaries,
    Whatsapp,
    Facebook,
}

impl Module {
    /// Every module, in navigation order.
    pub const ALL: [Module; 13] = [
        Module::Patients,
        Module::Appointments,
        Module::Prescriptions,
        Module::Exams,
        Module::Notes,
        Module::Financial,
        Module::Reports,
        Module::Conversations,
        Module::Analytics,
        Module::Nfse,
        Module::Secretaries,
        Module::Whatsapp,
        Module::Facebook,
    ];

    /// Modules that can appear in a secretary's grant.
    pub const GRANTABLE: [Module; 9] = [
        Module::Patients,
        Module::Appointments,
        Module::Prescriptions,
        Module::Exams,
        Module::Notes,
        Module::Financial,
        Module::Reports,
        Module::Conversations,
        Module::Analytics,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Module::Patients => "patients",
            Module::Appointments => "appointments",
            Module::Prescriptions => "prescriptions",
            Module::Exams => "exams",
            Module::Notes => "notes",
            Module::Financial => "financial",
            Module::Reports => "reports",
            Module::Conversations => "conversations",
            Module::Analytics => "analytics",
            Module::Nfse => "nfse",
            Module::Secretaries => "secretaries",
            Module::Whatsapp => "whatsapp",
            Module::Facebook => "facebook",
        }
    }

    /// Parse a module name as used by the web client.
    pub fn parse(s: &str) -> Option<Self> {
        Module::ALL
            .iter()
            .copied()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
    }

    /// Whether a secretary grant can cover this module.
    pub fn is_grantable(&self) -> bool {
        Module::GRANTABLE.contains(self)
    }
}

impl fmt::Display for Module {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An operation attempted on a module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Read,
    Write,
    ViewDetails,
    ViewSensitive,
}

impl Action {
    pub const ALL: [Action; 4] = [
        Action::Read,
        Action::Write,
        Action::ViewDetails,
        Action::ViewSensitive,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Read => "read",
            Action::Write => "write",
            Action::ViewDetails => "view_details",
            Action::ViewSensitive => "view_sensitive",
        }
    }

    /// Parse an action name; accepts both snake_case and the web client's camelCase.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "read" => Some(Action::Read),
            "write" => Some(Action::Write),
            "view_details" | "viewDetails" => Some(Action::ViewDetails),
            "view_sensitive" | "viewSensitive" => Some(Action::ViewSensitive),
            _ => None,
        }
    }

    /// Detail and sensitive views share the same gate.
    pub fn is_detail_view(&self) -> bool {
        matches!(self, Action::ViewDetails | Action::ViewSensitive)
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Clinic-wide capabilities that are not tied to a single module.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClinicCapability {
    CreatePatients,
    AssignToAnyDoctor,
    ViewAllSchedules,
    ManageWaitingRoom,
}

impl ClinicCapability {
    pub fn as_str(&self) -> &'static str {
        match self {
            ClinicCapability::CreatePatients => "create_patients",
            ClinicCapability::AssignToAnyDoctor => "assign_to_any_doctor",
            ClinicCapability::ViewAllSchedules => "view_all_schedules",
            ClinicCapability::ManageWaitingRoom => "manage_waiting_room",
        }
    }

    /// Accepts the snake_case name or the `can*` flag name.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "create_patients" | "canCreatePatients" => Some(ClinicCapability::CreatePatients),
            "assign_to_any_doctor" | "canAssignToAnyDoctor" => {
                Some(ClinicCapability::AssignToAnyDoctor)
            }
            "view_all_schedules" | "canViewAllSchedules" => Some(ClinicCapability::ViewAllSchedules),
            "manage_waiting_room" | "canManageWaitingRoom" => {
                Some(ClinicCapability::ManageWaitingRoom)
            }
            _ => None,
        }
    }
}

/// Read/write/detail triple for one module.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModulePermission {
    pub read: bool,
    pub write: bool,
    pub view_details: bool,
}

impl ModulePermission {
    pub const NONE: ModulePermission = ModulePermission {
        read: false,
        write: false,
        view_details: false,
    };

    pub const FULL: ModulePermission = ModulePermission {
        read: true,
        write: true,
        view_details: true,
    };

    pub const READ_WRITE: ModulePermission = ModulePermission {
        read: true,
        write: true,
        view_details: false,
    };

    pub const READ_ONLY: ModulePermission = ModulePermission {
        read: true,
        write: false,
        view_details: false,
    };
}

/// A secretary's module grants plus clinic-wide flags.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModulePermissionSet {
    pub patients: ModulePermission,
    pub appointments: ModulePermission,
    pub prescriptions: ModulePermission,
    pub exams: ModulePermission,
    pub notes: ModulePermission,
    pub financial: ModulePermission,
    pub reports: ModulePermission,
    pub conversations: ModulePermission,
    pub analytics: ModulePermission,
    pub can_create_patients: bool,
    pub can_assign_to_any_doctor: bool,
    pub can_view_all_schedules: bool,
    pub can_manage_waiting_room: bool,
}

impl ModulePermissionSet {
    /// Grant applied to a newly invited secretary.
    pub fn secretary_default() -> Self {
        Self {
            patients: ModulePermission::READ_WRITE,
            appointments: ModulePermission::READ_WRITE,
            conversations: ModulePermission::READ_WRITE,
            can_create_patients: true,
            can_manage_waiting_room: true,
            ..Self::default()
        }
    }

    /// Permissions for a module; areas outside the grant are always empty.
    pub fn get(&self, module: Module) -> ModulePermission {
        match module {
            Module::Patients => self.patients,
            Module::Appointments => self.appointments,
            Module::Prescriptions => self.prescriptions,
            Module::Exams => self.exams,
            Module::Notes => self.notes,
            Module::Financial => self.financial,
            Module::Reports => self.reports,
            Module::Conversations => self.conversations,
            Module::Analytics => self.analytics,
            Module::Nfse | Module::Secretaries | Module::Whatsapp | Module::Facebook => {
                ModulePermission::NONE
            }
        }
    }

    /// Replace the grant for a module. Returns false for non-grantable areas.
    pub fn set(&mut self, module: Module, permission: ModulePermission) -> bool {
        let slot = match module {
            Module::Patients => &mut self.patients,
            Module::Appointments => &mut self.appointments,
            Module::Prescriptions => &mut self.prescriptions,
            Module::Exams => &mut self.exams,
            Module::Notes => &mut self.notes,
            Module::Financial => &mut self.financial,
            Module::Reports => &mut self.reports,
            Module::Conversations => &mut self.conversations,
            Module::Analytics => &mut self.analytics,
            Module::Nfse | Module::Secretaries | Module::Whatsapp | Module::Facebook => {
                return false
            }
        };
        *slot = permission;
        true
    }

    pub fn capability(&self, capability: ClinicCapability) -> bool {
        match capability {
            ClinicCapability::CreatePatients => self.can_create_patients,
            ClinicCapability::AssignToAnyDoctor => self.can_assign_to_any_doctor,
            ClinicCapability::ViewAllSchedules => self.can_view_all_schedules,
            ClinicCapability::ManageWaitingRoom => self.can_manage_waiting_room,
        }
    }
}

/// Extra permissions a clinic grants to an associated doctor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PermissionFlagSet {
    pub can_view_financial: bool,
    pub can_manage_financial: bool,
    pub can_view_all_patients: bool,
    pub can_issue_nfse: bool,
    pub can_manage_secretaries: bool,
    pub can_view_analytics: bool,
    pub can_manage_whatsapp: bool,
    pub can_manage_facebook: bool,
}

impl Default for PermissionFlagSet {
    fn default() -> Self {
        Self {
            can_view_financial: false,
            can_manage_financial: false,
            can_view_all_patients: false,
            can_issue_nfse: false,
            can_manage_secretaries: false,
            can_view_analytics: true,
            can_manage_whatsapp: false,
            can_manage_facebook: false,
        }
    }
}

impl PermissionFlagSet {
    /// Every flag set.
    pub fn all() -> Self {
        Self {
            can_view_financial: true,
            can_manage_financial: true,
            can_view_all_patients: true,
            can_issue_nfse: true,
            can_manage_secretaries: true,
            can_view_analytics: true,
            can_manage_whatsapp: true,
            can_manage_facebook: true,
        }
    }

    /// Every flag cleared, including the analytics default.
    pub fn none() -> Self {
        Self {
            can_view_analytics: false,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_defaults() {
        let flags = PermissionFlagSet::default();
        assert!(flags.can_view_analytics);
        assert!(!flags.can_view_financial);
        assert!(!flags.can_view_all_patients);
    }

    #[test]
    fn test_missing_analytics_flag_defaults_true() {
        let flags: PermissionFlagSet =
            serde_json::from_str(r#"{"canViewFinancial": true}"#).unwrap();
        assert!(flags.can_view_financial);
        assert!(flags.can_view_analytics);
    }

    #[test]
    fn test_non_grantable_modules_are_empty() {
        let mut set = ModulePermissionSet::default();
        assert!(!set.set(Module::Nfse, ModulePermission::FULL));
        assert_eq!(set.get(Module::Nfse), ModulePermission::NONE);

        assert!(set.set(Module::Exams, ModulePermission::READ_ONLY));
        assert!(set.get(Module::Exams).read);
        assert!(!set.get(Module::Exams).write);
    }

    #[test]
    fn test_module_parse() {
        assert_eq!(Module::parse("Patients"), Some(Module::Patients));
        assert_eq!(Module::parse(" nfse "), Some(Module::Nfse));
        assert_eq!(Module::parse("inventory"), None);
        assert_eq!(Action::parse("viewDetails"), Some(Action::ViewDetails));
    }
}

//! Capability matrix: (actor kind × module × action) → allowed.

use crate::models::{
    Action, ActorContext, ActorRole, AssociationType, ClinicCapability, DoctorAssociation, Module,
    PermissionFlagSet,
};

use super::{DenialReason, SensitiveDataPolicy};

/// Declarative permission table. Stateless; every rule lives in one match.
pub struct CapabilityMatrix;

impl CapabilityMatrix {
    /// Whether `actor` may perform `action` on `module`.
    pub fn check(
        actor: Option<&ActorContext>,
        module: Module,
        action: Action,
        sensitive: &dyn SensitiveDataPolicy,
    ) -> bool {
        Self::explain(actor, module, action, sensitive).is_ok()
    }

    /// Like [`check`](Self::check), with the reason for a denial.
    pub fn explain(
        actor: Option<&ActorContext>,
        module: Module,
        action: Action,
        sensitive: &dyn SensitiveDataPolicy,
    ) -> Result<(), DenialReason> {
        let actor = actor.ok_or(DenialReason::NotAuthenticated)?;

        match &actor.role {
            ActorRole::ClinicAdmin => Ok(()),
            ActorRole::Doctor(assoc) => {
                let flags = effective_doctor_flags(actor, assoc);
                if doctor_flag_allows(&flags, module, action) {
                    Ok(())
                } else {
                    Err(DenialReason::InsufficientPermission)
                }
            }
            ActorRole::Secretary(grant) => {
                let perm = grant.permissions.get(module);
                match action {
                    Action::Read if perm.read => Ok(()),
                    Action::Write if perm.write => Ok(()),
                    Action::Read | Action::Write => Err(DenialReason::InsufficientPermission),
                    Action::ViewDetails | Action::ViewSensitive => {
                        if perm.view_details && sensitive.can_view_sensitive_data(actor, module) {
                            Ok(())
                        } else if perm.read || perm.write {
                            Err(DenialReason::SensitiveDataRestricted)
                        } else {
                            Err(DenialReason::InsufficientPermission)
                        }
                    }
                }
            }
        }
    }

    /// Clinic-wide capability check.
    pub fn capability(
        actor: Option<&ActorContext>,
        capability: ClinicCapability,
    ) -> Result<(), DenialReason> {
        let actor = actor.ok_or(DenialReason::NotAuthenticated)?;

        let allowed = match &actor.role {
            ActorRole::ClinicAdmin => true,
            ActorRole::Doctor(assoc) => match capability {
                ClinicCapability::CreatePatients | ClinicCapability::ManageWaitingRoom => true,
                ClinicCapability::AssignToAnyDoctor | ClinicCapability::ViewAllSchedules => {
                    has_owner_override(actor, assoc)
                }
            },
            ActorRole::Secretary(grant) => grant.permissions.capability(capability),
        };

        if allowed {
            Ok(())
        } else {
            Err(DenialReason::InsufficientPermission)
        }
    }
}

/// Solo practitioners and clinic owners hold every doctor flag implicitly.
pub fn has_owner_override(actor: &ActorContext, assoc: &DoctorAssociation) -> bool {
    actor.is_solo() || assoc.association_type == AssociationType::Owner
}

/// The doctor's flags after applying the owner override.
pub fn effective_doctor_flags(actor: &ActorContext, assoc: &DoctorAssociation) -> PermissionFlagSet {
    if has_owner_override(actor, assoc) {
        PermissionFlagSet::all()
    } else {
        assoc.additional_permissions
    }
}

/// Doctors are trusted everywhere except the flag-gated areas.
///
/// Besides financial, NFSe and secretary management, the per-doctor
/// `canViewAnalytics`, `canManageWhatsapp` and `canManageFacebook` flags
/// gate their own modules. Analytics defaults to allowed.
fn doctor_flag_allows(flags: &PermissionFlagSet, module: Module, action: Action) -> bool {
    match module {
        Module::Financial => match action {
            Action::Write => flags.can_manage_financial,
            Action::Read | Action::ViewDetails | Action::ViewSensitive => {
                flags.can_view_financial || flags.can_manage_financial
            }
        },
        Module::Nfse => flags.can_issue_nfse,
        Module::Secretaries => flags.can_manage_secretaries,
        Module::Analytics => flags.can_view_analytics,
        Module::Whatsapp => flags.can_manage_whatsapp,
        Module::Facebook => flags.can_manage_facebook,
        Module::Patients
        | Module::Appointments
        | Module::Prescriptions
        | Module::Exams
        | Module::Notes
        | Module::Reports
        | Module::Conversations => true,
    }
}

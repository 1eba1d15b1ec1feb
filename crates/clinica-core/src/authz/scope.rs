//! Scope resolution: the concrete doctors an actor may act for.

use std::collections::BTreeSet;

use tracing::debug;

use crate::models::{ActorContext, ActorRole, ClinicMode, DoctorId, DoctorRosterEntry, ScopeType};

/// Ids of active roster doctors.
pub fn active_doctor_ids(roster: &[DoctorRosterEntry]) -> BTreeSet<DoctorId> {
    roster
        .iter()
        .filter(|entry| entry.active)
        .map(|entry| entry.doctor_id.clone())
        .collect()
}

/// Compute the set of doctor ids the actor may touch.
///
/// Solo clinics always yield their one doctor, even with an empty roster.
/// Otherwise only active roster doctors can appear, so an empty roster
/// yields an empty scope and growing the roster never shrinks a scope.
pub fn resolve_scope(actor: &ActorContext, roster: &[DoctorRosterEntry]) -> BTreeSet<DoctorId> {
    if let ClinicMode::Solo { doctor_id } = &actor.clinic_mode {
        return BTreeSet::from([doctor_id.clone()]);
    }

    let active = active_doctor_ids(roster);

    let scope: BTreeSet<DoctorId> = match &actor.role {
        ActorRole::ClinicAdmin => active,
        ActorRole::Doctor(assoc) => {
            if assoc.additional_permissions.can_view_all_patients {
                active
            } else {
                active
                    .into_iter()
                    .filter(|id| *id == assoc.doctor_id)
                    .collect()
            }
        }
        ActorRole::Secretary(grant) => match grant.scope_type {
            ScopeType::AllDoctors => active,
            // Inactive or unknown doctors are dropped silently.
            ScopeType::SpecificDoctors => grant
                .scope_doctor_ids
                .iter()
                .filter(|id| active.contains(*id))
                .cloned()
                .collect(),
            ScopeType::SingleDoctor => grant
                .scope_doctor_ids
                .first()
                .filter(|id| active.contains(*id))
                .cloned()
                .into_iter()
                .collect(),
        },
    };

    debug!(
        user_id = %actor.user_id,
        kind = ?actor.kind(),
        roster_size = roster.len(),
        scope_size = scope.len(),
        "resolved actor scope"
    );

    scope
}

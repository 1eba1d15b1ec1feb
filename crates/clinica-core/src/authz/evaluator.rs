//! Public query surface of the permission engine.

use std::collections::BTreeSet;

use tracing::{debug, warn};

use crate::models::{
    Action, ActorContext, ActorRole, ClinicCapability, DoctorId, DoctorRosterEntry, Module,
};

use super::{
    resolve_scope, ActionContext, AuthzError, AuthzResult, CapabilityMatrix, Decision,
    DenialReason, DenySensitive, SensitiveDataPolicy,
};

/// Answers permission questions for one actor over one roster snapshot.
///
/// The scope is resolved once at construction. The evaluator borrows its
/// inputs immutably, so the snapshot cannot change underneath it; callers
/// build a new evaluator after refreshing the session or roster.
pub struct PermissionEvaluator<'a> {
    actor: Option<&'a ActorContext>,
    roster: &'a [DoctorRosterEntry],
    sensitive: &'a dyn SensitiveDataPolicy,
    scope: BTreeSet<DoctorId>,
    log_denials: bool,
}

impl<'a> PermissionEvaluator<'a> {
    /// Create an evaluator. `None` means no authenticated session.
    pub fn new(actor: Option<&'a ActorContext>, roster: &'a [DoctorRosterEntry]) -> Self {
        let scope = actor
            .map(|a| resolve_scope(a, roster))
            .unwrap_or_default();
        Self {
            actor,
            roster,
            sensitive: &DenySensitive,
            scope,
            log_denials: true,
        }
    }

    /// Use a caller-supplied sensitive-data rule instead of failing closed.
    pub fn with_sensitive_policy(mut self, policy: &'a dyn SensitiveDataPolicy) -> Self {
        self.sensitive = policy;
        self
    }

    /// Toggle `warn!` events for denials.
    pub fn with_denial_logging(mut self, enabled: bool) -> Self {
        self.log_denials = enabled;
        self
    }

    pub fn actor(&self) -> Option<&'a ActorContext> {
        self.actor
    }

    pub fn is_authenticated(&self) -> bool {
        self.actor.is_some()
    }

    pub fn is_multi_doctor(&self) -> bool {
        self.actor
            .map(|a| a.clinic_mode.is_multi_doctor())
            .unwrap_or(false)
    }

    /// Doctors the actor may act for.
    pub fn resolved_scope(&self) -> &BTreeSet<DoctorId> {
        &self.scope
    }

    /// Read access to a module.
    pub fn has_access(&self, module: Module) -> bool {
        CapabilityMatrix::check(self.actor, module, Action::Read, self.sensitive)
    }

    /// Modules the actor can read, in navigation order.
    pub fn visible_modules(&self) -> Vec<Module> {
        Module::ALL
            .iter()
            .copied()
            .filter(|m| self.has_access(*m))
            .collect()
    }

    /// Decide an action. A target doctor outside the scope is rejected before
    /// the capability matrix is consulted.
    pub fn can_perform_action(
        &self,
        module: Module,
        action: Action,
        context: &ActionContext,
    ) -> Decision {
        let decision: Decision = self.evaluate(module, action, context).into();
        if let Some(reason) = decision.reason {
            self.log_denial(module, action, context, reason);
        } else {
            debug!(module = %module, action = %action, "action allowed");
        }
        decision
    }

    /// Like [`can_perform_action`](Self::can_perform_action), as a `Result`.
    pub fn require(&self, module: Module, action: Action, context: &ActionContext) -> AuthzResult<()> {
        match self.can_perform_action(module, action, context).reason {
            None => Ok(()),
            Some(reason) => Err(AuthzError::Denied { module, reason }),
        }
    }

    fn evaluate(
        &self,
        module: Module,
        action: Action,
        context: &ActionContext,
    ) -> Result<(), DenialReason> {
        if self.actor.is_none() {
            return Err(DenialReason::NotAuthenticated);
        }
        if let Some(target) = &context.doctor_id {
            if !self.scope.contains(target) {
                return Err(DenialReason::OutOfScope);
            }
        }
        CapabilityMatrix::explain(self.actor, module, action, self.sensitive)
    }

    fn log_denial(&self, module: Module, action: Action, context: &ActionContext, reason: DenialReason) {
        if !self.log_denials {
            return;
        }
        warn!(
            user_id = self.actor.map(|a| a.user_id.as_str()).unwrap_or("-"),
            module = %module,
            action = %action,
            target_doctor = context.doctor_id.as_ref().map(|d| d.as_str()).unwrap_or("-"),
            reason = %reason,
            "permission denied"
        );
    }

    /// Whether a doctor is inside the actor's scope.
    pub fn can_access_doctor(&self, doctor_id: &DoctorId) -> bool {
        self.scope.contains(doctor_id)
    }

    /// Clinic-wide capability such as creating patients.
    pub fn has_capability(&self, capability: ClinicCapability) -> Decision {
        CapabilityMatrix::capability(self.actor, capability).into()
    }

    /// Doctors whose schedules the actor can open.
    ///
    /// With the all-schedules capability this is the whole scope; otherwise
    /// the scope narrowed to doctors whose appointments the actor can read.
    pub fn get_scheduleable_doctors(&self) -> Vec<DoctorId> {
        let Some(actor) = self.actor else {
            return Vec::new();
        };
        if actor.is_solo() || self.has_capability(ClinicCapability::ViewAllSchedules).allowed {
            return self.scope.iter().cloned().collect();
        }
        self.scope
            .iter()
            .filter(|id| {
                self.evaluate(Module::Appointments, Action::Read, &ActionContext::for_doctor((*id).clone()))
                    .is_ok()
            })
            .cloned()
            .collect()
    }

    /// Doctors the actor may assign patients or appointments to.
    ///
    /// Always a subset of the viewing scope.
    pub fn get_assignable_doctors(&self) -> Vec<DoctorId> {
        let Some(actor) = self.actor else {
            return Vec::new();
        };
        if actor.is_solo() || self.has_capability(ClinicCapability::AssignToAnyDoctor).allowed {
            return self.scope.iter().cloned().collect();
        }
        match &actor.role {
            ActorRole::Doctor(assoc) => self
                .scope
                .iter()
                .filter(|id| **id == assoc.doctor_id)
                .cloned()
                .collect(),
            ActorRole::Secretary(_) | ActorRole::ClinicAdmin => Vec::new(),
        }
    }

    /// Doctors offered in the patient list filter.
    ///
    /// Empty outside multi-doctor clinics, and empty for a doctor who only
    /// sees their own patients, since there is nothing to filter by.
    pub fn get_patient_filter_doctors(&self) -> Vec<DoctorId> {
        let Some(actor) = self.actor else {
            return Vec::new();
        };
        if !actor.clinic_mode.is_multi_doctor() {
            return Vec::new();
        }
        if let ActorRole::Doctor(assoc) = &actor.role {
            if !assoc.additional_permissions.can_view_all_patients {
                return Vec::new();
            }
        }
        self.scope.iter().cloned().collect()
    }

    /// Roster entries for a list of ids, skipping ids not on the roster.
    pub fn roster_entries(&self, ids: &[DoctorId]) -> Vec<&'a DoctorRosterEntry> {
        ids.iter()
            .filter_map(|id| self.roster.iter().find(|entry| entry.doctor_id == *id))
            .collect()
    }
}

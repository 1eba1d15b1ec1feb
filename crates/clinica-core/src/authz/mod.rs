//! Clinic permission engine.
//!
//! Pure evaluation over an `(ActorContext, roster)` snapshot:
//!
//! ```text
//! ActorContext + roster ──► scope::resolve_scope ──┐
//!                                                   ├──► PermissionEvaluator ──► Decision
//! ActorContext + module/action ──► CapabilityMatrix ┘
//! ```
//!
//! Denials are ordinary values carrying a [`DenialReason`]. Only a malformed
//! session payload is an error.

mod capability;
mod evaluator;
mod scope;

pub use capability::*;
pub use evaluator::*;
pub use scope::*;

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{ActorContext, DoctorId, MalformedActor, Module};

/// Canonical denial codes used for UI messaging.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialReason {
    NotAuthenticated,
    /// The target is not visible to the actor at all.
    OutOfScope,
    /// Visible, but the module/action is not granted.
    #[serde(rename = "insufficient_permissions")]
    InsufficientPermission,
    /// Module access is granted but detail/sensitive views are not.
    SensitiveDataRestricted,
}

impl DenialReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            DenialReason::NotAuthenticated => "not_authenticated",
            DenialReason::OutOfScope => "out_of_scope",
            DenialReason::InsufficientPermission => "insufficient_permissions",
            DenialReason::SensitiveDataRestricted => "sensitive_data_restricted",
        }
    }
}

impl fmt::Display for DenialReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a permission query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Decision {
    pub allowed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<DenialReason>,
}

impl Decision {
    pub const ALLOW: Decision = Decision {
        allowed: true,
        reason: None,
    };

    pub fn deny(reason: DenialReason) -> Self {
        Self {
            allowed: false,
            reason: Some(reason),
        }
    }

    pub fn is_allowed(&self) -> bool {
        self.allowed
    }
}

impl From<Result<(), DenialReason>> for Decision {
    fn from(result: Result<(), DenialReason>) -> Self {
        match result {
            Ok(()) => Decision::ALLOW,
            Err(reason) => Decision::deny(reason),
        }
    }
}

/// Optional target of an action.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionContext {
    pub doctor_id: Option<DoctorId>,
}

impl ActionContext {
    pub fn for_doctor(doctor_id: impl Into<DoctorId>) -> Self {
        Self {
            doctor_id: Some(doctor_id.into()),
        }
    }
}

/// Authorization errors for callers that prefer `?` over inspecting a [`Decision`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("access denied on {module}: {reason}")]
    Denied {
        module: Module,
        reason: DenialReason,
    },

    #[error(transparent)]
    MalformedActor(#[from] MalformedActor),
}

pub type AuthzResult<T> = Result<T, AuthzError>;

/// Rule for viewing sensitive clinical data, supplied by the caller.
///
/// The engine consults it for secretary detail/sensitive views and does not
/// define the rule itself.
pub trait SensitiveDataPolicy {
    fn can_view_sensitive_data(&self, actor: &ActorContext, module: Module) -> bool;
}

impl<F> SensitiveDataPolicy for F
where
    F: Fn(&ActorContext, Module) -> bool,
{
    fn can_view_sensitive_data(&self, actor: &ActorContext, module: Module) -> bool {
        self(actor, module)
    }
}

/// Fails closed: no sensitive views.
#[derive(Debug, Clone, Copy, Default)]
pub struct DenySensitive;

impl SensitiveDataPolicy for DenySensitive {
    fn can_view_sensitive_data(&self, _actor: &ActorContext, _module: Module) -> bool {
        false
    }
}

/// Defers entirely to the module's `viewDetails` grant.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowSensitive;

impl SensitiveDataPolicy for AllowSensitive {
    fn can_view_sensitive_data(&self, _actor: &ActorContext, _module: Module) -> bool {
        true
    }
}

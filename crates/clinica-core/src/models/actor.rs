//! Actor context: who is asking, in which clinic mode, with which grants.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::permissions::{ModulePermissionSet, PermissionFlagSet};
use super::roster::{AssociationType, DoctorId};

/// Kind of authenticated actor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActorKind {
    Doctor,
    Secretary,
    ClinicAdmin,
}

/// Whether the clinic has one doctor or several.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum ClinicMode {
    /// A single-doctor practice; the doctor is known even without a roster.
    Solo { doctor_id: DoctorId },
    MultiDoctor,
}

impl ClinicMode {
    pub fn is_multi_doctor(&self) -> bool {
        matches!(self, ClinicMode::MultiDoctor)
    }

    pub fn solo_doctor(&self) -> Option<&DoctorId> {
        match self {
            ClinicMode::Solo { doctor_id } => Some(doctor_id),
            ClinicMode::MultiDoctor => None,
        }
    }
}

/// A doctor's binding to the clinic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoctorAssociation {
    pub doctor_id: DoctorId,
    pub association_type: AssociationType,
    pub additional_permissions: PermissionFlagSet,
    pub default_repasse_percent: Option<Decimal>,
}

/// Which doctors a secretary works for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScopeType {
    AllDoctors,
    SpecificDoctors,
    SingleDoctor,
}

impl ScopeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ScopeType::AllDoctors => "all_doctors",
            ScopeType::SpecificDoctors => "specific_doctors",
            ScopeType::SingleDoctor => "single_doctor",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim() {
            "all_doctors" | "allDoctors" | "all" => Some(ScopeType::AllDoctors),
            "specific_doctors" | "specificDoctors" | "specific" => Some(ScopeType::SpecificDoctors),
            "single_doctor" | "singleDoctor" | "single" => Some(ScopeType::SingleDoctor),
            _ => None,
        }
    }
}

/// A secretary's scope and module grants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecretaryGrant {
    pub scope_type: ScopeType,
    /// Ordered and de-duplicated; `SingleDoctor` uses the first entry.
    pub scope_doctor_ids: Vec<DoctorId>,
    pub permissions: ModulePermissionSet,
}

impl SecretaryGrant {
    pub fn new(scope_type: ScopeType, doctor_ids: impl IntoIterator<Item = DoctorId>) -> Self {
        let mut scope_doctor_ids: Vec<DoctorId> = Vec::new();
        for id in doctor_ids {
            if !scope_doctor_ids.contains(&id) {
                scope_doctor_ids.push(id);
            }
        }
        Self {
            scope_type,
            scope_doctor_ids,
            permissions: ModulePermissionSet::secretary_default(),
        }
    }

    pub fn with_permissions(mut self, permissions: ModulePermissionSet) -> Self {
        self.permissions = permissions;
        self
    }
}

/// Role-specific part of the actor context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActorRole {
    Doctor(DoctorAssociation),
    Secretary(SecretaryGrant),
    ClinicAdmin,
}

/// Resolved once per session and passed explicitly to every evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActorContext {
    pub user_id: String,
    pub clinic_mode: ClinicMode,
    pub role: ActorRole,
}

impl ActorContext {
    pub fn doctor(user_id: impl Into<String>, clinic_mode: ClinicMode, association: DoctorAssociation) -> Self {
        Self {
            user_id: user_id.into(),
            clinic_mode,
            role: ActorRole::Doctor(association),
        }
    }

    pub fn secretary(user_id: impl Into<String>, clinic_mode: ClinicMode, grant: SecretaryGrant) -> Self {
        Self {
            user_id: user_id.into(),
            clinic_mode,
            role: ActorRole::Secretary(grant),
        }
    }

    pub fn clinic_admin(user_id: impl Into<String>, clinic_mode: ClinicMode) -> Self {
        Self {
            user_id: user_id.into(),
            clinic_mode,
            role: ActorRole::ClinicAdmin,
        }
    }

    pub fn kind(&self) -> ActorKind {
        match self.role {
            ActorRole::Doctor(_) => ActorKind::Doctor,
            ActorRole::Secretary(_) => ActorKind::Secretary,
            ActorRole::ClinicAdmin => ActorKind::ClinicAdmin,
        }
    }

    pub fn is_solo(&self) -> bool {
        !self.clinic_mode.is_multi_doctor()
    }

    /// The doctor this actor is, if a doctor.
    pub fn own_doctor_id(&self) -> Option<&DoctorId> {
        match &self.role {
            ActorRole::Doctor(assoc) => Some(&assoc.doctor_id),
            _ => None,
        }
    }

    pub fn doctor_association(&self) -> Option<&DoctorAssociation> {
        match &self.role {
            ActorRole::Doctor(assoc) => Some(assoc),
            _ => None,
        }
    }

    pub fn secretary_grant(&self) -> Option<&SecretaryGrant> {
        match &self.role {
            ActorRole::Secretary(grant) => Some(grant),
            _ => None,
        }
    }

    /// Replace a secretary's session grant with the stored one. No-op for other roles.
    pub fn override_secretary_grant(&mut self, stored: SecretaryGrant) {
        if let ActorRole::Secretary(grant) = &mut self.role {
            *grant = stored;
        }
    }
}

/// Actor context as delivered by the identity provider.
///
/// The session payload is flat: an `actorKind` string and optional role blocks.
/// Conversion into [`ActorContext`] fails when the block required by the kind
/// is absent, which indicates a defect upstream rather than a denial.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawActorContext {
    #[serde(alias = "actor_kind", alias = "role")]
    pub actor_kind: Option<String>,
    #[serde(alias = "user_id")]
    pub user_id: Option<String>,
    #[serde(alias = "clinic_mode")]
    pub clinic_mode: Option<String>,
    /// The practice doctor in solo mode; falls back to the doctor association.
    #[serde(alias = "solo_doctor_id")]
    pub solo_doctor_id: Option<String>,
    #[serde(alias = "doctor_association")]
    pub doctor_association: Option<RawDoctorAssociation>,
    #[serde(alias = "secretary_grant", alias = "secretaryPermissions")]
    pub secretary_grant: Option<RawSecretaryGrant>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDoctorAssociation {
    #[serde(alias = "doctor_id")]
    pub doctor_id: Option<String>,
    #[serde(alias = "association_type")]
    pub association_type: Option<String>,
    #[serde(alias = "additional_permissions")]
    pub additional_permissions: Option<PermissionFlagSet>,
    #[serde(alias = "default_repasse_percent")]
    pub default_repasse_percent: Option<Decimal>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawSecretaryGrant {
    #[serde(alias = "scope_type")]
    pub scope_type: Option<String>,
    #[serde(alias = "scope_doctor_ids", alias = "doctorIds")]
    pub scope_doctor_ids: Option<Vec<String>>,
    pub permissions: Option<ModulePermissionSet>,
}

/// A session payload that does not describe a well-formed actor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed actor context: {0}")]
pub struct MalformedActor(pub String);

impl TryFrom<RawActorContext> for ActorContext {
    type Error = MalformedActor;

    fn try_from(raw: RawActorContext) -> Result<Self, Self::Error> {
        let user_id = raw
            .user_id
            .filter(|s| !s.is_empty())
            .ok_or_else(|| MalformedActor("missing user id".into()))?;

        let kind = match raw.actor_kind.as_deref().map(str::trim) {
            Some("doctor") | Some("medico") => ActorKind::Doctor,
            Some("secretary") | Some("secretaria") => ActorKind::Secretary,
            Some("clinic_admin") | Some("clinicAdmin") | Some("admin") => ActorKind::ClinicAdmin,
            Some(other) => return Err(MalformedActor(format!("unknown actor kind '{}'", other))),
            None => return Err(MalformedActor("missing actor kind".into())),
        };

        let role = match kind {
            ActorKind::Doctor => {
                let assoc = raw
                    .doctor_association
                    .ok_or_else(|| MalformedActor("doctor without association".into()))?;
                let doctor_id = assoc
                    .doctor_id
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| MalformedActor("doctor association without doctor id".into()))?;
                let association_type = match assoc.association_type.as_deref() {
                    None => AssociationType::Employee,
                    Some(s) => AssociationType::parse(s).ok_or_else(|| {
                        MalformedActor(format!("unknown association type '{}'", s))
                    })?,
                };
                ActorRole::Doctor(DoctorAssociation {
                    doctor_id: DoctorId(doctor_id),
                    association_type,
                    additional_permissions: assoc.additional_permissions.unwrap_or_default(),
                    default_repasse_percent: assoc.default_repasse_percent,
                })
            }
            ActorKind::Secretary => {
                let grant = raw
                    .secretary_grant
                    .ok_or_else(|| MalformedActor("secretary without grant".into()))?;
                let scope_type = grant
                    .scope_type
                    .as_deref()
                    .and_then(ScopeType::parse)
                    .ok_or_else(|| MalformedActor("secretary grant without valid scope type".into()))?;
                let ids = grant
                    .scope_doctor_ids
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|s| !s.is_empty())
                    .map(DoctorId);
                ActorRole::Secretary(
                    SecretaryGrant::new(scope_type, ids)
                        .with_permissions(grant.permissions.unwrap_or_default()),
                )
            }
            ActorKind::ClinicAdmin => ActorRole::ClinicAdmin,
        };

        let clinic_mode = match raw.clinic_mode.as_deref().map(str::trim) {
            Some("multi_doctor") | Some("multiDoctor") | Some("multi") => ClinicMode::MultiDoctor,
            None => return Err(MalformedActor("missing clinic mode".into())),
            Some("solo") => {
                let doctor_id = raw
                    .solo_doctor_id
                    .filter(|s| !s.is_empty())
                    .map(DoctorId)
                    .or_else(|| match &role {
                        ActorRole::Doctor(assoc) => Some(assoc.doctor_id.clone()),
                        ActorRole::Secretary(grant) => grant.scope_doctor_ids.first().cloned(),
                        ActorRole::ClinicAdmin => None,
                    })
                    .ok_or_else(|| MalformedActor("solo clinic without a doctor".into()))?;
                ClinicMode::Solo { doctor_id }
            }
            Some(other) => return Err(MalformedActor(format!("unknown clinic mode '{}'", other))),
        };

        Ok(ActorContext {
            user_id,
            clinic_mode,
            role,
        })
    }
}

impl ActorContext {
    /// Parse and normalize a session payload.
    pub fn from_session_json(json: &str) -> Result<Self, MalformedActor> {
        let raw: RawActorContext =
            serde_json::from_str(json).map_err(|e| MalformedActor(e.to_string()))?;
        Self::try_from(raw)
    }
}

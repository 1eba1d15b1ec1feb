//! Clinic doctor roster.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::permissions::PermissionFlagSet;

/// Opaque doctor identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DoctorId(pub String);

impl DoctorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DoctorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for DoctorId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DoctorId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// How a doctor is bound to the clinic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssociationType {
    Owner,
    Partner,
    Employee,
    Contractor,
    Guest,
}

impl AssociationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssociationType::Owner => "owner",
            AssociationType::Partner => "partner",
            AssociationType::Employee => "employee",
            AssociationType::Contractor => "contractor",
            AssociationType::Guest => "guest",
        }
    }

    /// Parse an association type, accepting the Portuguese labels of older records.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_lowercase().as_str() {
            "owner" | "proprietario" | "dono" => Some(AssociationType::Owner),
            "partner" | "socio" => Some(AssociationType::Partner),
            "employee" | "funcionario" | "clt" => Some(AssociationType::Employee),
            "contractor" | "pj" | "prestador" => Some(AssociationType::Contractor),
            "guest" | "convidado" => Some(AssociationType::Guest),
            _ => None,
        }
    }
}

/// A doctor entry in a clinic's roster. Deactivated entries are kept so that
/// historical references keep resolving.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DoctorRosterEntry {
    pub doctor_id: DoctorId,
    pub name: String,
    pub specialty: Option<String>,
    pub association_type: AssociationType,
    pub active: bool,
    pub additional_permissions: PermissionFlagSet,
}

impl DoctorRosterEntry {
    /// Create an active roster entry with default permissions.
    pub fn new(doctor_id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            doctor_id: DoctorId::new(doctor_id),
            name: name.into(),
            specialty: None,
            association_type: AssociationType::Employee,
            active: true,
            additional_permissions: PermissionFlagSet::default(),
        }
    }

    /// Soft-delete: the entry stays resolvable but leaves every scope.
    pub fn deactivate(&mut self) {
        self.active = false;
    }
}

/// Roster record as found in persisted or exported data.
///
/// Older records use `is_active` or a `status` string instead of `active`,
/// nest permissions under `permissions`, and omit fields that now have
/// defaults. [`DoctorRosterEntry::try_from`] is the only place those shapes
/// are reconciled.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawDoctorRecord {
    #[serde(alias = "doctor_id", alias = "id")]
    pub doctor_id: Option<String>,
    #[serde(alias = "full_name", alias = "fullName")]
    pub name: Option<String>,
    pub specialty: Option<String>,
    #[serde(alias = "association_type", alias = "role")]
    pub association_type: Option<String>,
    pub active: Option<bool>,
    #[serde(alias = "is_active")]
    pub is_active: Option<bool>,
    pub status: Option<String>,
    #[serde(alias = "additional_permissions")]
    pub additional_permissions: Option<PermissionFlagSet>,
    pub permissions: Option<PermissionFlagSet>,
}

/// Why a raw roster record could not be normalized.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RosterRecordError {
    #[error("roster record has no doctor id")]
    MissingId,

    #[error("unknown association type '{0}' for doctor {1}")]
    UnknownAssociation(String, String),
}

impl TryFrom<RawDoctorRecord> for DoctorRosterEntry {
    type Error = RosterRecordError;

    fn try_from(raw: RawDoctorRecord) -> Result<Self, Self::Error> {
        let doctor_id = raw
            .doctor_id
            .filter(|id| !id.trim().is_empty())
            .ok_or(RosterRecordError::MissingId)?;

        let association_type = match raw.association_type.as_deref() {
            None => AssociationType::Employee,
            Some(s) => AssociationType::parse(s)
                .ok_or_else(|| RosterRecordError::UnknownAssociation(s.into(), doctor_id.clone()))?,
        };

        // Resolution order: explicit `active`, then legacy `is_active`, then `status`.
        let active = raw
            .active
            .or(raw.is_active)
            .or_else(|| {
                raw.status
                    .as_deref()
                    .map(|s| matches!(s.to_lowercase().as_str(), "active" | "ativo" | "accepted"))
            })
            .unwrap_or(true);

        let additional_permissions = raw
            .additional_permissions
            .or(raw.permissions)
            .unwrap_or_default();

        Ok(DoctorRosterEntry {
            name: raw.name.unwrap_or_else(|| doctor_id.clone()),
            doctor_id: DoctorId(doctor_id),
            specialty: raw.specialty.filter(|s| !s.trim().is_empty()),
            association_type,
            active,
            additional_permissions,
        })
    }
}

/// Normalize a JSON array of roster records.
pub fn roster_from_json(json: &str) -> Result<Vec<DoctorRosterEntry>, RosterLoadError> {
    let raw: Vec<RawDoctorRecord> = serde_json::from_str(json)?;
    raw.into_iter()
        .map(|r| DoctorRosterEntry::try_from(r).map_err(RosterLoadError::from))
        .collect()
}

/// Roster loading errors.
#[derive(Debug, thiserror::Error)]
pub enum RosterLoadError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Record(#[from] RosterRecordError),
}

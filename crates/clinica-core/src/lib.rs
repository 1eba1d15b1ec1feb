//! Clinica Core Library
//!
//! Permission engine and TISS billing core for multi-doctor clinics.
//!
//! # Architecture
//!
//! ```text
//!  Session JSON ──► RawActorContext ──► ActorContext ─┐
//!                                                     │
//!  Roster store ──► DoctorRosterEntry[] ──────────────┼──► PermissionEvaluator
//!                                                     │      (scope, then capability)
//!                                                     │             │
//!                                                     │        Decision / AuthzError
//!                                                     │             │
//!                                          ┌──────────▼─────────────▼──────────┐
//!                                          │          BillingService           │
//!                                          │  guide: Rascunho → Validado → ... │
//!                                          │  lote:  Aberto → Fechado → ...    │
//!                                          └──────────┬────────────────────────┘
//!                                                     │
//!                             ┌───────────────────────┼───────────────────────┐
//!                             ▼                       ▼                       ▼
//!                      SQLite store           mensagemTISS XML         Submission
//!                   (versioned writes)        (SHA-256 epilogo)         transport
//! ```
//!
//! # Core Principle
//!
//! **The evaluator is the only authorization decision point.** Denials are
//! values with a reason code; only malformed session data is an error.
//!
//! # Modules
//!
//! - [`models`]: Actors, roster, permission records, TISS guides and lots
//! - [`authz`]: Scope resolver, capability matrix, permission evaluator
//! - [`tiss`]: Guide/lot state machines and guide validation
//! - [`db`]: SQLite persistence with optimistic concurrency
//! - [`export`]: Lot XML artifact and CSV summary
//! - [`billing`]: Persistence-backed billing workflow
//! - [`config`]: Runtime configuration

pub mod authz;
pub mod billing;
pub mod config;
pub mod db;
pub mod export;
pub mod models;
pub mod tiss;

// Re-export commonly used types
pub use authz::{
    resolve_scope, ActionContext, AuthzError, CapabilityMatrix, Decision, DenialReason,
    PermissionEvaluator, SensitiveDataPolicy,
};
pub use billing::{BillingError, BillingService, SubmissionAck, SubmissionRejection, SubmissionTransport};
pub use config::ClinicaConfig;
pub use db::Database;
pub use export::{LoteArtifact, LoteSummary};
pub use models::{
    Action, ActorContext, ClinicCapability, DoctorId, DoctorRosterEntry, GuideStatus,
    LoteStatus, Module, TissGuide, TissLote,
};
pub use tiss::{GuideEvent, GuideValidator, InvalidStateTransition, LoteEvent, ValidationReport};

// UniFFI setup - using proc macros
uniffi::setup_scaffolding!();

use std::str::FromStr;
use std::sync::{Arc, Mutex};

use chrono::NaiveDate;
use rust_decimal::Decimal;

use models::{
    AssociationType, Beneficiario, Operadora, PermissionFlagSet, Procedimento, ScopeType,
    SecretaryGrant, TipoGuia,
};
use tiss::{Adjudicacao, AdjudicationOutcome, GuideAdjudication, ValidationEntry};

// =========================================================================
// FFI Error Type
// =========================================================================

#[derive(Debug, thiserror::Error, uniffi::Error)]
pub enum ClinicaError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Malformed session: {0}")]
    MalformedSession(String),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Invalid state transition: {0}")]
    InvalidTransition(String),

    #[error("Validation failed: {0}")]
    ValidationFailed(String),

    #[error("Submission rejected: {0}")]
    SubmissionRejected(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl From<db::DbError> for ClinicaError {
    fn from(e: db::DbError) -> Self {
        match e {
            db::DbError::NotFound(what) => ClinicaError::NotFound(what),
            db::DbError::VersionConflict { .. } => ClinicaError::Conflict(e.to_string()),
            other => ClinicaError::DatabaseError(other.to_string()),
        }
    }
}

impl From<serde_json::Error> for ClinicaError {
    fn from(e: serde_json::Error) -> Self {
        ClinicaError::SerializationError(e.to_string())
    }
}

impl From<AuthzError> for ClinicaError {
    fn from(e: AuthzError) -> Self {
        match e {
            AuthzError::Denied { reason, .. } => ClinicaError::AccessDenied(reason.to_string()),
            AuthzError::MalformedActor(m) => ClinicaError::MalformedSession(m.0),
        }
    }
}

impl From<InvalidStateTransition> for ClinicaError {
    fn from(e: InvalidStateTransition) -> Self {
        ClinicaError::InvalidTransition(e.to_string())
    }
}

impl From<BillingError> for ClinicaError {
    fn from(e: BillingError) -> Self {
        match e {
            BillingError::Db(e) => e.into(),
            BillingError::Transition(e) => e.into(),
            BillingError::Validation { .. } => ClinicaError::ValidationFailed(e.to_string()),
            BillingError::SubmissionRejected { motivo, .. } => {
                ClinicaError::SubmissionRejected(motivo)
            }
            BillingError::UnknownOperadora(id) => ClinicaError::NotFound(format!("operadora {}", id)),
            other => ClinicaError::InvalidInput(other.to_string()),
        }
    }
}

impl From<config::ConfigError> for ClinicaError {
    fn from(e: config::ConfigError) -> Self {
        ClinicaError::ConfigError(e.to_string())
    }
}

impl<T> From<std::sync::PoisonError<T>> for ClinicaError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        ClinicaError::DatabaseError(format!("Lock poisoned: {}", e))
    }
}

// =========================================================================
// Factory Functions (exported to FFI)
// =========================================================================

/// Open or create a database at the given path.
#[uniffi::export]
pub fn open_database(
    path: String,
    config_json: Option<String>,
) -> Result<Arc<ClinicaCore>, ClinicaError> {
    let config = match config_json {
        Some(json) => ClinicaConfig::from_json_str(&json)?,
        None => ClinicaConfig::default(),
    };
    let db = Database::open(&path)?;
    Ok(Arc::new(ClinicaCore {
        db: Arc::new(Mutex::new(db)),
        config,
    }))
}

/// Create an in-memory database (for testing).
#[uniffi::export]
pub fn open_database_in_memory() -> Result<Arc<ClinicaCore>, ClinicaError> {
    let db = Database::open_in_memory()?;
    Ok(Arc::new(ClinicaCore {
        db: Arc::new(Mutex::new(db)),
        config: ClinicaConfig::default(),
    }))
}

// =========================================================================
// Foreign Submission Transport
// =========================================================================

/// Implemented by the host app to deliver lot artifacts to the operator.
#[uniffi::export(with_foreign)]
pub trait LoteTransport: Send + Sync {
    fn submit(&self, artifact: FfiLoteArtifact) -> FfiSubmissionOutcome;
}

struct ForeignTransport(Arc<dyn LoteTransport>);

impl SubmissionTransport for ForeignTransport {
    fn submit(&self, artifact: &LoteArtifact) -> Result<SubmissionAck, SubmissionRejection> {
        let outcome = self.0.submit(artifact.clone().into());
        match (outcome.protocolo, outcome.motivo_rejeicao) {
            (_, Some(motivo)) => Err(SubmissionRejection { motivo }),
            (Some(protocolo), None) => Ok(SubmissionAck { protocolo }),
            (None, None) => Err(SubmissionRejection {
                motivo: "transport returned neither protocol nor rejection".into(),
            }),
        }
    }
}

// =========================================================================
// Main API Object
// =========================================================================

/// Thread-safe database wrapper for FFI.
#[derive(uniffi::Object)]
pub struct ClinicaCore {
    db: Arc<Mutex<Database>>,
    config: ClinicaConfig,
}

impl ClinicaCore {
    /// Build an evaluator for the session and run `f` against it.
    fn with_evaluator<T>(
        &self,
        db: &Database,
        session_json: Option<&str>,
        f: impl FnOnce(&PermissionEvaluator<'_>) -> T,
    ) -> Result<T, ClinicaError> {
        let mut actor = session_json
            .map(ActorContext::from_session_json)
            .transpose()
            .map_err(AuthzError::from)?;
        if let Some(actor) = actor.as_mut().filter(|a| a.secretary_grant().is_some()) {
            if let Some(stored) = db.get_secretary_grant(&actor.user_id)? {
                actor.override_secretary_grant(stored);
            }
        }
        let roster = db.list_roster()?;
        let evaluator = PermissionEvaluator::new(actor.as_ref(), &roster)
            .with_denial_logging(self.config.authz.log_denials);
        Ok(f(&evaluator))
    }

    fn authorize(
        &self,
        db: &Database,
        session_json: Option<&str>,
        module: Module,
        action: Action,
        doctor_id: Option<DoctorId>,
    ) -> Result<(), ClinicaError> {
        let context = ActionContext { doctor_id };
        self.with_evaluator(db, session_json, |ev| ev.require(module, action, &context))??;
        Ok(())
    }

    fn authorize_guide(
        &self,
        db: &Database,
        session_json: Option<&str>,
        guia_id: &str,
    ) -> Result<(), ClinicaError> {
        let guide = db.require_guide(guia_id)?;
        self.authorize(db, session_json, Module::Financial, Action::Write, guide.doctor_id)
    }
}

#[uniffi::export]
impl ClinicaCore {
    // =========================================================================
    // Roster Operations
    // =========================================================================

    /// Add or update a roster entry.
    pub fn upsert_doctor(&self, doctor: FfiDoctor) -> Result<(), ClinicaError> {
        let db = self.db.lock()?;
        let entry = DoctorRosterEntry::try_from(doctor)?;
        db.upsert_doctor(&entry)?;
        Ok(())
    }

    /// Soft-delete a doctor.
    pub fn deactivate_doctor(&self, doctor_id: String) -> Result<bool, ClinicaError> {
        let db = self.db.lock()?;
        Ok(db.deactivate_doctor(&DoctorId(doctor_id))?)
    }

    /// Full roster including inactive doctors.
    pub fn list_roster(&self) -> Result<Vec<FfiDoctor>, ClinicaError> {
        let db = self.db.lock()?;
        Ok(db.list_roster()?.into_iter().map(|d| d.into()).collect())
    }

    /// Import a roster export in any supported record shape.
    pub fn import_roster_json(&self, json: String) -> Result<u32, ClinicaError> {
        let db = self.db.lock()?;
        Ok(db.import_roster_json(&json)? as u32)
    }

    /// Store a secretary's grant. `permissions_json` is a module permission set.
    ///
    /// A stored grant takes precedence over the one carried in the session.
    pub fn upsert_secretary_grant(
        &self,
        user_id: String,
        grant: FfiSecretaryGrant,
    ) -> Result<(), ClinicaError> {
        let db = self.db.lock()?;
        let grant = SecretaryGrant::try_from(grant)?;
        db.upsert_secretary_grant(&user_id, &grant)?;
        Ok(())
    }

    pub fn upsert_operadora(&self, operadora: FfiOperadora) -> Result<(), ClinicaError> {
        let db = self.db.lock()?;
        db.upsert_operadora(&operadora.into())?;
        Ok(())
    }

    // =========================================================================
    // Permission Queries
    // =========================================================================

    /// Decide one action. `session_json` absent means unauthenticated.
    pub fn can_perform_action(
        &self,
        session_json: Option<String>,
        module: String,
        action: String,
        doctor_id: Option<String>,
    ) -> Result<FfiDecision, ClinicaError> {
        let module = parse_module(&module)?;
        let action = Action::parse(&action)
            .ok_or_else(|| ClinicaError::InvalidInput(format!("unknown action '{}'", action)))?;
        let context = ActionContext {
            doctor_id: doctor_id.map(DoctorId),
        };
        let db = self.db.lock()?;
        let decision = self.with_evaluator(&db, session_json.as_deref(), |ev| {
            ev.can_perform_action(module, action, &context)
        })?;
        Ok(decision.into())
    }

    pub fn has_access(&self, session_json: Option<String>, module: String) -> Result<bool, ClinicaError> {
        let module = parse_module(&module)?;
        let db = self.db.lock()?;
        self.with_evaluator(&db, session_json.as_deref(), |ev| ev.has_access(module))
    }

    /// Modules for sidebar navigation.
    pub fn visible_modules(&self, session_json: Option<String>) -> Result<Vec<String>, ClinicaError> {
        let db = self.db.lock()?;
        self.with_evaluator(&db, session_json.as_deref(), |ev| {
            ev.visible_modules()
                .into_iter()
                .map(|m| m.as_str().to_string())
                .collect()
        })
    }

    pub fn has_capability(
        &self,
        session_json: Option<String>,
        capability: String,
    ) -> Result<FfiDecision, ClinicaError> {
        let capability = ClinicCapability::parse(&capability).ok_or_else(|| {
            ClinicaError::InvalidInput(format!("unknown capability '{}'", capability))
        })?;
        let db = self.db.lock()?;
        let decision =
            self.with_evaluator(&db, session_json.as_deref(), |ev| ev.has_capability(capability))?;
        Ok(decision.into())
    }

    pub fn can_access_doctor(
        &self,
        session_json: Option<String>,
        doctor_id: String,
    ) -> Result<bool, ClinicaError> {
        let db = self.db.lock()?;
        let doctor_id = DoctorId(doctor_id);
        self.with_evaluator(&db, session_json.as_deref(), |ev| ev.can_access_doctor(&doctor_id))
    }

    pub fn scheduleable_doctors(&self, session_json: Option<String>) -> Result<Vec<String>, ClinicaError> {
        let db = self.db.lock()?;
        self.with_evaluator(&db, session_json.as_deref(), |ev| {
            ids_to_strings(ev.get_scheduleable_doctors())
        })
    }

    pub fn assignable_doctors(&self, session_json: Option<String>) -> Result<Vec<String>, ClinicaError> {
        let db = self.db.lock()?;
        self.with_evaluator(&db, session_json.as_deref(), |ev| {
            ids_to_strings(ev.get_assignable_doctors())
        })
    }

    pub fn patient_filter_doctors(
        &self,
        session_json: Option<String>,
    ) -> Result<Vec<String>, ClinicaError> {
        let db = self.db.lock()?;
        self.with_evaluator(&db, session_json.as_deref(), |ev| {
            ids_to_strings(ev.get_patient_filter_doctors())
        })
    }

    // =========================================================================
    // Guide Operations
    // =========================================================================

    /// Create a draft guide.
    pub fn create_guide(
        &self,
        session_json: Option<String>,
        draft: FfiGuideDraft,
    ) -> Result<FfiGuide, ClinicaError> {
        let db = self.db.lock()?;
        let guide = TissGuide::try_from(draft)?;
        self.authorize(
            &db,
            session_json.as_deref(),
            Module::Financial,
            Action::Write,
            guide.doctor_id.clone(),
        )?;
        let service = BillingService::new(&db, self.config.clone());
        Ok(service.create_guide(guide)?.into())
    }

    pub fn get_guide(
        &self,
        session_json: Option<String>,
        guia_id: String,
    ) -> Result<Option<FfiGuide>, ClinicaError> {
        let db = self.db.lock()?;
        let Some(guide) = db.get_guide(&guia_id)? else {
            return Ok(None);
        };
        self.authorize(
            &db,
            session_json.as_deref(),
            Module::Financial,
            Action::Read,
            guide.doctor_id.clone(),
        )?;
        Ok(Some(guide.into()))
    }

    /// Append a procedure to a draft guide.
    pub fn add_procedure(
        &self,
        session_json: Option<String>,
        guia_id: String,
        procedure: FfiProcedimento,
    ) -> Result<FfiGuide, ClinicaError> {
        let db = self.db.lock()?;
        self.authorize_guide(&db, session_json.as_deref(), &guia_id)?;
        let procedimento = Procedimento::try_from(procedure)?;
        let service = BillingService::new(&db, self.config.clone());
        Ok(service
            .edit_guide(&guia_id, |g| g.procedimentos.push(procedimento))?
            .into())
    }

    /// Validate a draft. Findings are returned whether or not the guide advanced.
    ///
    /// Only structural checks run here: code format is verified but not
    /// resolved against a TUSS table. Hosts that need table checks run
    /// `clinica_tuss::TussGuideValidator` through [`BillingService::with_validator`].
    pub fn validate_guide(
        &self,
        session_json: Option<String>,
        guia_id: String,
    ) -> Result<FfiValidationResult, ClinicaError> {
        let db = self.db.lock()?;
        self.authorize_guide(&db, session_json.as_deref(), &guia_id)?;
        let service = BillingService::new(&db, self.config.clone());
        let (validated, report) = match service.validate_guide(&guia_id) {
            Ok((_, report)) => (true, report),
            Err(BillingError::Validation { report, .. }) => (false, report),
            Err(e) => return Err(e.into()),
        };
        Ok(FfiValidationResult {
            validated,
            entries: report.entries.into_iter().map(|e| e.into()).collect(),
        })
    }

    pub fn reopen_guide(
        &self,
        session_json: Option<String>,
        guia_id: String,
    ) -> Result<FfiGuide, ClinicaError> {
        let db = self.db.lock()?;
        self.authorize_guide(&db, session_json.as_deref(), &guia_id)?;
        let service = BillingService::new(&db, self.config.clone());
        Ok(service.reopen_guide(&guia_id)?.into())
    }

    pub fn delete_guide(&self, session_json: Option<String>, guia_id: String) -> Result<(), ClinicaError> {
        let db = self.db.lock()?;
        self.authorize_guide(&db, session_json.as_deref(), &guia_id)?;
        let service = BillingService::new(&db, self.config.clone());
        service.delete_guide(&guia_id)?;
        Ok(())
    }

    // =========================================================================
    // Lot Operations
    // =========================================================================

    pub fn create_lote(
        &self,
        session_json: Option<String>,
        operadora_id: String,
    ) -> Result<FfiLote, ClinicaError> {
        let db = self.db.lock()?;
        self.authorize(&db, session_json.as_deref(), Module::Financial, Action::Write, None)?;
        let service = BillingService::new(&db, self.config.clone());
        Ok(service.create_lote(&operadora_id)?.into())
    }

    pub fn add_guide_to_lote(
        &self,
        session_json: Option<String>,
        lote_id: String,
        guia_id: String,
    ) -> Result<FfiLote, ClinicaError> {
        let db = self.db.lock()?;
        self.authorize_guide(&db, session_json.as_deref(), &guia_id)?;
        let service = BillingService::new(&db, self.config.clone());
        Ok(service.add_guide_to_lote(&lote_id, &guia_id)?.into())
    }

    pub fn remove_guide_from_lote(
        &self,
        session_json: Option<String>,
        lote_id: String,
        guia_id: String,
    ) -> Result<FfiLote, ClinicaError> {
        let db = self.db.lock()?;
        self.authorize_guide(&db, session_json.as_deref(), &guia_id)?;
        let service = BillingService::new(&db, self.config.clone());
        Ok(service.remove_guide_from_lote(&lote_id, &guia_id)?.into())
    }

    /// Close a lot and return its submission artifact.
    pub fn close_lote(
        &self,
        session_json: Option<String>,
        lote_id: String,
    ) -> Result<FfiLoteArtifact, ClinicaError> {
        let db = self.db.lock()?;
        self.authorize(&db, session_json.as_deref(), Module::Financial, Action::Write, None)?;
        let service = BillingService::new(&db, self.config.clone());
        Ok(service.close_lote(&lote_id)?.into())
    }

    /// Submit a closed lot through the host transport.
    pub fn submit_lote(
        &self,
        session_json: Option<String>,
        lote_id: String,
        artifact: FfiLoteArtifact,
        transport: Arc<dyn LoteTransport>,
    ) -> Result<FfiLote, ClinicaError> {
        let artifact: LoteArtifact = artifact.into();
        {
            let db = self.db.lock()?;
            self.authorize(&db, session_json.as_deref(), Module::Financial, Action::Write, None)?;
            BillingService::new(&db, self.config.clone()).check_submittable(&lote_id, &artifact)?;
        }

        // Lock released while the host transport runs.
        let outcome = ForeignTransport(transport).submit(&artifact);

        let db = self.db.lock()?;
        let service = BillingService::new(&db, self.config.clone());
        Ok(service.record_submission(&lote_id, outcome)?.into())
    }

    /// Move a lot through the operator's lifecycle: `start_processing`,
    /// `accept`, `reject`, or `pay`.
    pub fn advance_lote(
        &self,
        session_json: Option<String>,
        lote_id: String,
        event: String,
        motivo: Option<String>,
    ) -> Result<FfiLote, ClinicaError> {
        let db = self.db.lock()?;
        self.authorize(&db, session_json.as_deref(), Module::Financial, Action::Write, None)?;
        let service = BillingService::new(&db, self.config.clone());
        let lote = match event.as_str() {
            "start_processing" => service.start_processing(&lote_id)?,
            "accept" => service.accept_lote(&lote_id)?,
            "reject" => service.reject_lote(&lote_id, motivo.as_deref().unwrap_or(""))?,
            "pay" => service.pay_lote(&lote_id)?,
            other => {
                return Err(ClinicaError::InvalidInput(format!("unknown lote event '{}'", other)))
            }
        };
        Ok(lote.into())
    }

    /// Apply per-guide operator verdicts; one outcome per verdict.
    pub fn adjudicate(
        &self,
        session_json: Option<String>,
        lote_id: String,
        verdicts: Vec<FfiAdjudication>,
    ) -> Result<Vec<FfiAdjudicationOutcome>, ClinicaError> {
        let db = self.db.lock()?;
        self.authorize(&db, session_json.as_deref(), Module::Financial, Action::Write, None)?;
        let verdicts = verdicts
            .into_iter()
            .map(GuideAdjudication::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        let service = BillingService::new(&db, self.config.clone());
        Ok(service
            .adjudicate(&lote_id, &verdicts)?
            .into_iter()
            .map(|o| o.into())
            .collect())
    }

    pub fn delete_lote(&self, session_json: Option<String>, lote_id: String) -> Result<(), ClinicaError> {
        let db = self.db.lock()?;
        self.authorize(&db, session_json.as_deref(), Module::Financial, Action::Write, None)?;
        let service = BillingService::new(&db, self.config.clone());
        service.delete_lote(&lote_id)?;
        Ok(())
    }

    // =========================================================================
    // Export Operations
    // =========================================================================

    /// Lot summary as CSV.
    pub fn export_lote_csv(
        &self,
        session_json: Option<String>,
        lote_id: String,
    ) -> Result<String, ClinicaError> {
        let db = self.db.lock()?;
        self.authorize(&db, session_json.as_deref(), Module::Financial, Action::Read, None)?;
        let service = BillingService::new(&db, self.config.clone());
        Ok(service.lote_summary(&lote_id)?.to_csv())
    }

    /// Lot summary as JSON.
    pub fn export_lote_json(
        &self,
        session_json: Option<String>,
        lote_id: String,
    ) -> Result<String, ClinicaError> {
        let db = self.db.lock()?;
        self.authorize(&db, session_json.as_deref(), Module::Financial, Action::Read, None)?;
        let service = BillingService::new(&db, self.config.clone());
        Ok(service.lote_summary(&lote_id)?.to_json()?)
    }
}

fn parse_module(s: &str) -> Result<Module, ClinicaError> {
    Module::parse(s).ok_or_else(|| ClinicaError::InvalidInput(format!("unknown module '{}'", s)))
}

fn parse_decimal(field: &str, s: &str) -> Result<Decimal, ClinicaError> {
    Decimal::from_str(s.trim())
        .map_err(|_| ClinicaError::InvalidInput(format!("{}: invalid decimal '{}'", field, s)))
}

fn parse_date(field: &str, s: &str) -> Result<NaiveDate, ClinicaError> {
    NaiveDate::parse_from_str(s.trim(), "%Y-%m-%d")
        .map_err(|_| ClinicaError::InvalidInput(format!("{}: invalid date '{}'", field, s)))
}

fn ids_to_strings(ids: Vec<DoctorId>) -> Vec<String> {
    ids.into_iter().map(|d| d.0).collect()
}

// =========================================================================
// FFI Types
// =========================================================================

/// FFI-safe permission decision.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDecision {
    pub allowed: bool,
    pub reason: Option<String>,
}

impl From<Decision> for FfiDecision {
    fn from(decision: Decision) -> Self {
        Self {
            allowed: decision.allowed,
            reason: decision.reason.map(|r| r.as_str().to_string()),
        }
    }
}

/// FFI-safe doctor permission flags.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiPermissionFlags {
    pub can_view_financial: bool,
    pub can_manage_financial: bool,
    pub can_view_all_patients: bool,
    pub can_issue_nfse: bool,
    pub can_manage_secretaries: bool,
    pub can_view_analytics: bool,
    pub can_manage_whatsapp: bool,
    pub can_manage_facebook: bool,
}

impl From<PermissionFlagSet> for FfiPermissionFlags {
    fn from(flags: PermissionFlagSet) -> Self {
        Self {
            can_view_financial: flags.can_view_financial,
            can_manage_financial: flags.can_manage_financial,
            can_view_all_patients: flags.can_view_all_patients,
            can_issue_nfse: flags.can_issue_nfse,
            can_manage_secretaries: flags.can_manage_secretaries,
            can_view_analytics: flags.can_view_analytics,
            can_manage_whatsapp: flags.can_manage_whatsapp,
            can_manage_facebook: flags.can_manage_facebook,
        }
    }
}

impl From<FfiPermissionFlags> for PermissionFlagSet {
    fn from(flags: FfiPermissionFlags) -> Self {
        PermissionFlagSet {
            can_view_financial: flags.can_view_financial,
            can_manage_financial: flags.can_manage_financial,
            can_view_all_patients: flags.can_view_all_patients,
            can_issue_nfse: flags.can_issue_nfse,
            can_manage_secretaries: flags.can_manage_secretaries,
            can_view_analytics: flags.can_view_analytics,
            can_manage_whatsapp: flags.can_manage_whatsapp,
            can_manage_facebook: flags.can_manage_facebook,
        }
    }
}

/// FFI-safe roster entry.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiDoctor {
    pub doctor_id: String,
    pub name: String,
    pub specialty: Option<String>,
    pub association_type: String,
    pub active: bool,
    pub additional_permissions: FfiPermissionFlags,
}

impl From<DoctorRosterEntry> for FfiDoctor {
    fn from(entry: DoctorRosterEntry) -> Self {
        Self {
            doctor_id: entry.doctor_id.0,
            name: entry.name,
            specialty: entry.specialty,
            association_type: entry.association_type.as_str().to_string(),
            active: entry.active,
            additional_permissions: entry.additional_permissions.into(),
        }
    }
}

impl TryFrom<FfiDoctor> for DoctorRosterEntry {
    type Error = ClinicaError;

    fn try_from(doctor: FfiDoctor) -> Result<Self, Self::Error> {
        if doctor.doctor_id.trim().is_empty() {
            return Err(ClinicaError::InvalidInput("doctor_id is empty".into()));
        }
        let association_type = AssociationType::parse(&doctor.association_type).ok_or_else(|| {
            ClinicaError::InvalidInput(format!(
                "unknown association type '{}'",
                doctor.association_type
            ))
        })?;
        Ok(DoctorRosterEntry {
            doctor_id: DoctorId(doctor.doctor_id),
            name: doctor.name,
            specialty: doctor.specialty,
            association_type,
            active: doctor.active,
            additional_permissions: doctor.additional_permissions.into(),
        })
    }
}

/// FFI-safe secretary grant.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSecretaryGrant {
    pub scope_type: String,
    pub scope_doctor_ids: Vec<String>,
    /// Module permission set as JSON; secretary defaults when absent
    pub permissions_json: Option<String>,
}

impl TryFrom<FfiSecretaryGrant> for SecretaryGrant {
    type Error = ClinicaError;

    fn try_from(grant: FfiSecretaryGrant) -> Result<Self, Self::Error> {
        let scope_type = ScopeType::parse(&grant.scope_type).ok_or_else(|| {
            ClinicaError::InvalidInput(format!("unknown scope type '{}'", grant.scope_type))
        })?;
        let mut result =
            SecretaryGrant::new(scope_type, grant.scope_doctor_ids.into_iter().map(DoctorId));
        if let Some(json) = grant.permissions_json {
            result = result.with_permissions(serde_json::from_str(&json)?);
        }
        Ok(result)
    }
}

/// FFI-safe operator.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiOperadora {
    pub id: String,
    pub nome: String,
    pub registro_ans: String,
    pub codigo_prestador: String,
}

impl From<FfiOperadora> for Operadora {
    fn from(op: FfiOperadora) -> Self {
        Operadora {
            id: op.id,
            nome: op.nome,
            registro_ans: op.registro_ans,
            codigo_prestador: op.codigo_prestador,
        }
    }
}

/// FFI-safe procedure line. Money values are decimal strings.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiProcedimento {
    pub codigo_tuss: String,
    pub descricao: String,
    pub quantidade: u32,
    pub valor_unitario: String,
    pub valor_total: String,
    pub data_execucao: Option<String>,
}

impl From<Procedimento> for FfiProcedimento {
    fn from(p: Procedimento) -> Self {
        Self {
            codigo_tuss: p.codigo_tuss,
            descricao: p.descricao,
            quantidade: p.quantidade,
            valor_unitario: p.valor_unitario.to_string(),
            valor_total: p.valor_total.to_string(),
            data_execucao: p.data_execucao.map(|d| d.to_string()),
        }
    }
}

impl TryFrom<FfiProcedimento> for Procedimento {
    type Error = ClinicaError;

    /// `valor_total` is ignored; it is always quantity × unit price.
    fn try_from(p: FfiProcedimento) -> Result<Self, Self::Error> {
        let mut procedimento = Procedimento::new(
            p.codigo_tuss,
            p.descricao,
            p.quantidade,
            parse_decimal("valor_unitario", &p.valor_unitario)?,
        );
        procedimento.data_execucao = p
            .data_execucao
            .map(|d| parse_date("data_execucao", &d))
            .transpose()?;
        Ok(procedimento)
    }
}

/// FFI-safe input for a new guide.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiGuideDraft {
    pub tipo_guia: String,
    pub operadora_id: String,
    pub numero_carteira: String,
    pub nome_beneficiario: String,
    pub doctor_id: Option<String>,
    pub data_atendimento: Option<String>,
    pub senha_autorizacao: Option<String>,
    pub procedimentos: Vec<FfiProcedimento>,
}

impl TryFrom<FfiGuideDraft> for TissGuide {
    type Error = ClinicaError;

    fn try_from(draft: FfiGuideDraft) -> Result<Self, Self::Error> {
        let tipo = TipoGuia::parse(&draft.tipo_guia).ok_or_else(|| {
            ClinicaError::InvalidInput(format!("unknown guide type '{}'", draft.tipo_guia))
        })?;
        let mut guide = TissGuide::new(tipo, draft.operadora_id);
        guide.beneficiario = Beneficiario {
            numero_carteira: draft.numero_carteira,
            nome: draft.nome_beneficiario,
        };
        guide.doctor_id = draft.doctor_id.map(DoctorId);
        guide.data_atendimento = draft
            .data_atendimento
            .map(|d| parse_date("data_atendimento", &d))
            .transpose()?;
        guide.senha_autorizacao = draft.senha_autorizacao;
        guide.procedimentos = draft
            .procedimentos
            .into_iter()
            .map(Procedimento::try_from)
            .collect::<Result<_, _>>()?;
        guide.recalculate();
        Ok(guide)
    }
}

/// FFI-safe guide.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiGuide {
    pub id: String,
    pub numero_guia_prestador: String,
    pub tipo_guia: String,
    pub operadora_id: String,
    pub doctor_id: Option<String>,
    pub status: String,
    pub procedimentos: Vec<FfiProcedimento>,
    pub valor_total: String,
    pub valor_glosado: String,
    pub valor_pago: String,
    pub motivo_glosa: Option<String>,
    pub lote_id: Option<String>,
    pub locked: bool,
    pub version: i64,
}

impl From<TissGuide> for FfiGuide {
    fn from(guide: TissGuide) -> Self {
        Self {
            id: guide.id,
            numero_guia_prestador: guide.numero_guia_prestador,
            tipo_guia: guide.tipo_guia.as_str().to_string(),
            operadora_id: guide.operadora_id,
            doctor_id: guide.doctor_id.map(|d| d.0),
            status: guide.status.as_str().to_string(),
            procedimentos: guide.procedimentos.into_iter().map(|p| p.into()).collect(),
            valor_total: guide.valor_total.to_string(),
            valor_glosado: guide.valor_glosado.to_string(),
            valor_pago: guide.valor_pago.to_string(),
            motivo_glosa: guide.motivo_glosa,
            lote_id: guide.lote_id,
            locked: guide.locked,
            version: guide.version,
        }
    }
}

/// FFI-safe validation finding.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiValidationEntry {
    pub severity: String,
    pub field: String,
    pub message: String,
}

impl From<ValidationEntry> for FfiValidationEntry {
    fn from(entry: ValidationEntry) -> Self {
        Self {
            severity: entry.severity.to_string(),
            field: entry.field,
            message: entry.message,
        }
    }
}

#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiValidationResult {
    /// True when the guide moved to `validado`
    pub validated: bool,
    pub entries: Vec<FfiValidationEntry>,
}

/// FFI-safe lot.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiLote {
    pub id: String,
    pub numero_lote: u64,
    pub operadora_id: String,
    pub status: String,
    pub guia_ids: Vec<String>,
    pub valor_total: String,
    pub protocolo: Option<String>,
    pub motivo_rejeicao: Option<String>,
    pub artifact_hash: Option<String>,
}

impl From<TissLote> for FfiLote {
    fn from(lote: TissLote) -> Self {
        Self {
            id: lote.id,
            numero_lote: lote.numero_lote,
            operadora_id: lote.operadora_id,
            status: lote.status.as_str().to_string(),
            guia_ids: lote.guia_ids.into_iter().collect(),
            valor_total: lote.valor_total.to_string(),
            protocolo: lote.protocolo,
            motivo_rejeicao: lote.motivo_rejeicao,
            artifact_hash: lote.artifact_hash,
        }
    }
}

/// FFI-safe lot artifact.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiLoteArtifact {
    pub lote_id: String,
    pub numero_lote: u64,
    pub padrao_tiss: String,
    pub guide_count: u32,
    pub xml: String,
    pub hash: String,
    pub hash_algorithm: String,
}

impl From<LoteArtifact> for FfiLoteArtifact {
    fn from(a: LoteArtifact) -> Self {
        Self {
            lote_id: a.lote_id,
            numero_lote: a.numero_lote,
            padrao_tiss: a.padrao_tiss,
            guide_count: a.guide_count as u32,
            xml: a.xml,
            hash: a.hash,
            hash_algorithm: a.hash_algorithm,
        }
    }
}

impl From<FfiLoteArtifact> for LoteArtifact {
    fn from(a: FfiLoteArtifact) -> Self {
        LoteArtifact {
            lote_id: a.lote_id,
            numero_lote: a.numero_lote,
            padrao_tiss: a.padrao_tiss,
            guide_count: a.guide_count as usize,
            xml: a.xml,
            hash: a.hash,
            hash_algorithm: a.hash_algorithm,
        }
    }
}

/// Result reported by the host transport. Set exactly one field.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiSubmissionOutcome {
    pub protocolo: Option<String>,
    pub motivo_rejeicao: Option<String>,
}

/// FFI-safe operator verdict. `valor_glosado` absent means accepted.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiAdjudication {
    pub guia_id: String,
    pub valor_glosado: Option<String>,
    pub motivo: Option<String>,
}

impl TryFrom<FfiAdjudication> for GuideAdjudication {
    type Error = ClinicaError;

    fn try_from(a: FfiAdjudication) -> Result<Self, Self::Error> {
        let adjudicacao = match a.valor_glosado {
            None => Adjudicacao::Aceita,
            Some(valor) => Adjudicacao::Glosada {
                valor_glosado: parse_decimal("valor_glosado", &valor)?,
                motivo: a.motivo,
            },
        };
        Ok(GuideAdjudication {
            guia_id: a.guia_id,
            adjudicacao,
        })
    }
}

/// FFI-safe verdict outcome.
#[derive(Debug, Clone, uniffi::Record)]
pub struct FfiAdjudicationOutcome {
    pub guia_id: String,
    pub status: Option<String>,
    pub error: Option<String>,
}

impl From<AdjudicationOutcome> for FfiAdjudicationOutcome {
    fn from(outcome: AdjudicationOutcome) -> Self {
        let (status, error) = match outcome.result {
            Ok(status) => (Some(status.as_str().to_string()), None),
            Err(e) => (None, Some(e.to_string())),
        };
        Self {
            guia_id: outcome.guia_id,
            status,
            error,
        }
    }
}

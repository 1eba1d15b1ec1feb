//! Persistence-backed TISS billing workflow.
//!
//! Every operation loads the entities it touches, runs the state machine on
//! the in-memory copies, and writes them back inside one transaction with
//! version checks. A concurrent writer surfaces as [`DbError::VersionConflict`].

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::ClinicaConfig;
use crate::db::{Database, DbError};
use crate::export::{ExportError, LoteArtifact, LoteSummary};
use crate::models::{GuideStatus, LoteStatus, TissGuide, TissLote};
use crate::tiss::{
    AdjudicationOutcome, GuideAdjudication, GuideEvent, GuideValidator, InvalidStateTransition,
    LoteEvent, StructuralValidator, ValidationReport,
};

/// Billing workflow errors.
#[derive(Error, Debug)]
pub enum BillingError {
    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Transition(#[from] InvalidStateTransition),

    #[error(transparent)]
    Export(#[from] ExportError),

    #[error("Guide {guia_id} failed validation with {} error(s)", report.error_count())]
    Validation {
        guia_id: String,
        report: ValidationReport,
    },

    #[error("Operator not registered: {0}")]
    UnknownOperadora(String),

    #[error("Artifact does not match lote {0}")]
    ArtifactMismatch(String),

    #[error("Submission of lote {lote_id} rejected by transport: {motivo}")]
    SubmissionRejected { lote_id: String, motivo: String },
}

pub type BillingResult<T> = Result<T, BillingError>;

/// Transport acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionAck {
    pub protocolo: String,
}

/// Transport refusal; the lot is reopened for correction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmissionRejection {
    pub motivo: String,
}

/// Delivers a closed lot's artifact to the operator.
pub trait SubmissionTransport {
    fn submit(&self, artifact: &LoteArtifact) -> Result<SubmissionAck, SubmissionRejection>;
}

/// Billing workflow over a [`Database`].
pub struct BillingService<'a> {
    db: &'a Database,
    config: ClinicaConfig,
    validator: Box<dyn GuideValidator + 'a>,
}

impl<'a> BillingService<'a> {
    /// Create a service with the structural validator.
    pub fn new(db: &'a Database, config: ClinicaConfig) -> Self {
        Self {
            db,
            config,
            validator: Box::new(StructuralValidator::new()),
        }
    }

    /// Replace the validator consulted before `Rascunho → Validado`.
    pub fn with_validator(mut self, validator: impl GuideValidator + 'a) -> Self {
        self.validator = Box::new(validator);
        self
    }

    pub fn config(&self) -> &ClinicaConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Guides
    // ------------------------------------------------------------------

    /// Persist a new draft guide.
    pub fn create_guide(&self, mut guide: TissGuide) -> BillingResult<TissGuide> {
        if self.db.get_operadora(&guide.operadora_id)?.is_none() {
            return Err(BillingError::UnknownOperadora(guide.operadora_id));
        }
        guide.ensure_editable()?;
        guide.recalculate();
        guide.lote_id = None;
        guide.locked = false;
        guide.version = 0;
        self.db.insert_guide(&guide)?;
        Ok(guide)
    }

    /// Edit a draft guide; totals are recomputed.
    pub fn edit_guide<F>(&self, guia_id: &str, f: F) -> BillingResult<TissGuide>
    where
        F: FnOnce(&mut TissGuide),
    {
        let mut guide = self.db.require_guide(guia_id)?;
        let id = guide.id.clone();
        let version = guide.version;
        guide.edit(|g| {
            f(g);
            // Identity and workflow fields are not editable.
            g.id = id;
            g.version = version;
            g.status = GuideStatus::Rascunho;
            g.lote_id = None;
            g.locked = false;
        })?;
        self.db.update_guide(&mut guide)?;
        Ok(guide)
    }

    /// Run the validator and advance the guide when the report has no errors.
    pub fn validate_guide(&self, guia_id: &str) -> BillingResult<(TissGuide, ValidationReport)> {
        let mut guide = self.db.require_guide(guia_id)?;
        let report = self.validator.validate(&guide);
        if !report.is_clean() {
            warn!(guide_id = %guia_id, errors = report.error_count(), "guide validation failed");
            return Err(BillingError::Validation {
                guia_id: guia_id.to_string(),
                report,
            });
        }
        guide.transition(GuideEvent::Validate {
            report: report.clone(),
        })?;
        self.db.update_guide(&mut guide)?;
        Ok((guide, report))
    }

    /// Send a validated guide back to draft.
    pub fn reopen_guide(&self, guia_id: &str) -> BillingResult<TissGuide> {
        let mut guide = self.db.require_guide(guia_id)?;
        guide.transition(GuideEvent::Reopen)?;
        self.db.update_guide(&mut guide)?;
        Ok(guide)
    }

    /// Delete a draft or validated guide, detaching it from an open lot first.
    pub fn delete_guide(&self, guia_id: &str) -> BillingResult<()> {
        self.db.atomically(|db| {
            let mut guide = db.require_guide(guia_id)?;
            guide.ensure_deletable()?;

            if let Some(lote_id) = guide.lote_id.clone() {
                let mut lote = db.require_lote(&lote_id)?;
                lote.remove_guide(&mut guide)?;
                db.update_guide(&mut guide)?;
                db.update_lote(&mut lote)?;
            }
            db.delete_guide(guia_id)?;
            info!(guide_id = %guia_id, "guide deleted");
            Ok(())
        })
    }

    // ------------------------------------------------------------------
    // Lots
    // ------------------------------------------------------------------

    /// Open a new lot for an operator.
    pub fn create_lote(&self, operadora_id: &str) -> BillingResult<TissLote> {
        if self.db.get_operadora(operadora_id)?.is_none() {
            return Err(BillingError::UnknownOperadora(operadora_id.to_string()));
        }
        self.db.atomically(|db| {
            let lote = TissLote::new(db.next_numero_lote()?, operadora_id);
            db.insert_lote(&lote)?;
            info!(lote_id = %lote.id, numero = lote.numero_lote, operadora = %operadora_id, "lote created");
            Ok(lote)
        })
    }

    pub fn add_guide_to_lote(&self, lote_id: &str, guia_id: &str) -> BillingResult<TissLote> {
        let limit = self.config.tiss.max_guias_por_lote;
        self.db.atomically(|db| {
            let mut lote = db.require_lote(lote_id)?;
            let mut guide = db.require_guide(guia_id)?;
            lote.add_guide(&mut guide, limit)?;
            db.update_guide(&mut guide)?;
            db.update_lote(&mut lote)?;
            Ok(lote)
        })
    }

    pub fn remove_guide_from_lote(&self, lote_id: &str, guia_id: &str) -> BillingResult<TissLote> {
        self.db.atomically(|db| {
            let mut lote = db.require_lote(lote_id)?;
            let mut guide = db.require_guide(guia_id)?;
            lote.remove_guide(&mut guide)?;
            db.update_guide(&mut guide)?;
            db.update_lote(&mut lote)?;
            Ok(lote)
        })
    }

    /// Close the lot, locking its guides, and render the submission artifact.
    pub fn close_lote(&self, lote_id: &str) -> BillingResult<LoteArtifact> {
        self.db.atomically(|db| {
            let mut lote = db.require_lote(lote_id)?;
            let mut guides = db.list_guides_for_lote(lote_id)?;
            let operadora = db
                .get_operadora(&lote.operadora_id)?
                .ok_or_else(|| BillingError::UnknownOperadora(lote.operadora_id.clone()))?;

            lote.transition(LoteEvent::Close, &mut guides)?;
            let artifact =
                LoteArtifact::build(&lote, &guides, &operadora, &self.config.tiss, Utc::now())?;
            lote.artifact_hash = Some(artifact.hash.clone());

            persist(db, &mut lote, &mut guides)?;
            Ok(artifact)
        })
    }

    /// Hand the artifact to the transport. An acknowledgement sends the lot;
    /// a rejection reopens it.
    pub fn submit_lote(
        &self,
        lote_id: &str,
        artifact: &LoteArtifact,
        transport: &dyn SubmissionTransport,
    ) -> BillingResult<TissLote> {
        self.check_submittable(lote_id, artifact)?;
        self.record_submission(lote_id, transport.submit(artifact))
    }

    /// Checks that the lot is closed and the artifact is the one produced on close.
    pub fn check_submittable(&self, lote_id: &str, artifact: &LoteArtifact) -> BillingResult<TissLote> {
        let lote = self.db.require_lote(lote_id)?;
        if lote.status != LoteStatus::Fechado {
            return Err(InvalidStateTransition::lote(
                &lote.id,
                lote.status,
                "send",
                "lote não está fechado",
            )
            .into());
        }
        if artifact.lote_id != lote.id
            || lote.artifact_hash.as_deref() != Some(artifact.hash.as_str())
            || !artifact.verify()
        {
            return Err(BillingError::ArtifactMismatch(lote.id));
        }
        Ok(lote)
    }

    /// Applies the transport's answer to a lot that passed [`Self::check_submittable`].
    pub fn record_submission(
        &self,
        lote_id: &str,
        outcome: Result<SubmissionAck, SubmissionRejection>,
    ) -> BillingResult<TissLote> {
        match outcome {
            Ok(ack) => self.transition_lote(
                lote_id,
                LoteEvent::Send {
                    protocolo: ack.protocolo,
                },
            ),
            Err(rejection) => {
                warn!(lote_id = %lote_id, motivo = %rejection.motivo, "transport rejected lote");
                self.transition_lote(lote_id, LoteEvent::Reopen)?;
                Err(BillingError::SubmissionRejected {
                    lote_id: lote_id.to_string(),
                    motivo: rejection.motivo,
                })
            }
        }
    }

    pub fn start_processing(&self, lote_id: &str) -> BillingResult<TissLote> {
        self.transition_lote(lote_id, LoteEvent::StartProcessing)
    }

    pub fn accept_lote(&self, lote_id: &str) -> BillingResult<TissLote> {
        self.transition_lote(lote_id, LoteEvent::Accept)
    }

    pub fn reject_lote(&self, lote_id: &str, motivo: &str) -> BillingResult<TissLote> {
        self.transition_lote(
            lote_id,
            LoteEvent::Reject {
                motivo: motivo.to_string(),
            },
        )
    }

    pub fn pay_lote(&self, lote_id: &str) -> BillingResult<TissLote> {
        self.transition_lote(lote_id, LoteEvent::Pay)
    }

    /// Apply operator verdicts. Successful verdicts are persisted even when
    /// others in the same batch fail.
    pub fn adjudicate(
        &self,
        lote_id: &str,
        verdicts: &[GuideAdjudication],
    ) -> BillingResult<Vec<AdjudicationOutcome>> {
        self.db.atomically(|db| {
            let lote = db.require_lote(lote_id)?;
            let mut guides = db.list_guides_for_lote(lote_id)?;
            let before: Vec<GuideStatus> = guides.iter().map(|g| g.status).collect();

            let outcomes = lote.adjudicate(&mut guides, verdicts);
            for (guide, status) in guides.iter_mut().zip(before) {
                if guide.status != status {
                    db.update_guide(guide)?;
                }
            }

            let failed = outcomes.iter().filter(|o| o.result.is_err()).count();
            info!(lote_id = %lote_id, applied = outcomes.len() - failed, failed, "adjudication applied");
            Ok(outcomes)
        })
    }

    /// Delete an open lot, detaching its guides.
    pub fn delete_lote(&self, lote_id: &str) -> BillingResult<()> {
        self.db.atomically(|db| {
            let mut lote = db.require_lote(lote_id)?;
            let mut guides = db.list_guides_for_lote(lote_id)?;
            lote.dissolve(&mut guides)?;
            for guide in guides.iter_mut() {
                db.update_guide(guide)?;
            }
            db.delete_lote(lote_id)?;
            info!(lote_id = %lote_id, numero = lote.numero_lote, "lote deleted");
            Ok(())
        })
    }

    pub fn lote_summary(&self, lote_id: &str) -> BillingResult<LoteSummary> {
        let lote = self.db.require_lote(lote_id)?;
        let guides = self.db.list_guides_for_lote(lote_id)?;
        Ok(LoteSummary::from_lote(&lote, &guides))
    }

    fn transition_lote(&self, lote_id: &str, event: LoteEvent) -> BillingResult<TissLote> {
        self.db.atomically(|db| {
            let mut lote = db.require_lote(lote_id)?;
            let mut guides = db.list_guides_for_lote(lote_id)?;
            lote.transition(event, &mut guides)?;
            persist(db, &mut lote, &mut guides)?;
            Ok(lote)
        })
    }
}

fn persist(db: &Database, lote: &mut TissLote, guides: &mut [TissGuide]) -> BillingResult<()> {
    for guide in guides.iter_mut() {
        db.update_guide(guide)?;
    }
    db.update_lote(lote)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Beneficiario, Operadora, Procedimento, TipoGuia};
    use crate::tiss::Adjudicacao;
    use rust_decimal::Decimal;
    use std::cell::RefCell;

    struct FakeTransport {
        reject_with: Option<String>,
        submitted: RefCell<Vec<String>>,
    }

    impl FakeTransport {
        fn accepting() -> Self {
            Self {
                reject_with: None,
                submitted: RefCell::new(Vec::new()),
            }
        }

        fn rejecting(motivo: &str) -> Self {
            Self {
                reject_with: Some(motivo.to_string()),
                submitted: RefCell::new(Vec::new()),
            }
        }
    }

    impl SubmissionTransport for FakeTransport {
        fn submit(&self, artifact: &LoteArtifact) -> Result<SubmissionAck, SubmissionRejection> {
            self.submitted.borrow_mut().push(artifact.hash.clone());
            match &self.reject_with {
                Some(motivo) => Err(SubmissionRejection {
                    motivo: motivo.clone(),
                }),
                None => Ok(SubmissionAck {
                    protocolo: format!("PRT-{}", artifact.numero_lote),
                }),
            }
        }
    }

    fn setup_db() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.upsert_operadora(&Operadora {
            id: "op-1".into(),
            nome: "Saúde Total".into(),
            registro_ans: "123456".into(),
            codigo_prestador: "0099".into(),
        })
        .unwrap();
        db
    }

    fn make_guide(valor: i64) -> TissGuide {
        let mut guide = TissGuide::new(TipoGuia::Consulta, "op-1");
        guide.beneficiario = Beneficiario {
            numero_carteira: "0001".into(),
            nome: "Maria".into(),
        };
        guide.data_atendimento = chrono::NaiveDate::from_ymd_opt(2024, 1, 10);
        guide
            .procedimentos
            .push(Procedimento::new("10101012", "Consulta", 1, Decimal::new(valor, 0)));
        guide
    }

    fn validated(service: &BillingService<'_>, valor: i64) -> TissGuide {
        let guide = service.create_guide(make_guide(valor)).unwrap();
        service.validate_guide(&guide.id).unwrap().0
    }

    #[test]
    fn test_create_requires_known_operator() {
        let db = setup_db();
        let service = BillingService::new(&db, ClinicaConfig::default());
        let guide = TissGuide::new(TipoGuia::Consulta, "op-x");
        assert!(matches!(
            service.create_guide(guide),
            Err(BillingError::UnknownOperadora(_))
        ));
    }

    #[test]
    fn test_validation_failure_keeps_draft() {
        let db = setup_db();
        let service = BillingService::new(&db, ClinicaConfig::default());
        let guide = service
            .create_guide(TissGuide::new(TipoGuia::Consulta, "op-1"))
            .unwrap();

        match service.validate_guide(&guide.id) {
            Err(BillingError::Validation { report, .. }) => assert!(report.error_count() > 0),
            other => panic!("unexpected: {:?}", other.map(|(g, _)| g.status)),
        }
        assert_eq!(db.require_guide(&guide.id).unwrap().status, GuideStatus::Rascunho);
    }

    #[test]
    fn test_edit_only_drafts() {
        let db = setup_db();
        let service = BillingService::new(&db, ClinicaConfig::default());
        let guide = service.create_guide(make_guide(100)).unwrap();

        let edited = service
            .edit_guide(&guide.id, |g| {
                g.procedimentos[0].quantidade = 2;
                g.status = GuideStatus::Pago;
            })
            .unwrap();
        assert_eq!(edited.valor_total, Decimal::new(200, 0));
        assert_eq!(edited.status, GuideStatus::Rascunho);

        service.validate_guide(&guide.id).unwrap();
        assert!(service.edit_guide(&guide.id, |g| g.senha_autorizacao = None).is_err());
    }

    #[test]
    fn test_full_lote_lifecycle() {
        let db = setup_db();
        let service = BillingService::new(&db, ClinicaConfig::default());
        let g1 = validated(&service, 100);
        let g2 = validated(&service, 40);

        let lote = service.create_lote("op-1").unwrap();
        service.add_guide_to_lote(&lote.id, &g1.id).unwrap();
        let lote_state = service.add_guide_to_lote(&lote.id, &g2.id).unwrap();
        assert_eq!(lote_state.valor_total, Decimal::new(140, 0));

        let artifact = service.close_lote(&lote.id).unwrap();
        assert!(matches!(
            service.delete_guide(&g1.id),
            Err(BillingError::Transition(_))
        ));

        let transport = FakeTransport::accepting();
        let sent = service.submit_lote(&lote.id, &artifact, &transport).unwrap();
        assert_eq!(sent.status, LoteStatus::Enviado);
        assert_eq!(sent.protocolo.as_deref(), Some("PRT-1"));
        assert_eq!(db.require_guide(&g1.id).unwrap().status, GuideStatus::Enviado);
        assert!(service.delete_guide(&g1.id).is_err());

        let outcomes = service
            .adjudicate(
                &lote.id,
                &[
                    GuideAdjudication {
                        guia_id: g1.id.clone(),
                        adjudicacao: Adjudicacao::Aceita,
                    },
                    GuideAdjudication {
                        guia_id: g2.id.clone(),
                        adjudicacao: Adjudicacao::Glosada {
                            valor_glosado: Decimal::new(10, 0),
                            motivo: Some("glosa parcial".into()),
                        },
                    },
                ],
            )
            .unwrap();
        assert!(outcomes.iter().all(|o| o.result.is_ok()));

        service.accept_lote(&lote.id).unwrap();
        let paid = service.pay_lote(&lote.id).unwrap();
        assert_eq!(paid.status, LoteStatus::Pago);
        assert_eq!(db.require_guide(&g2.id).unwrap().valor_pago, Decimal::new(30, 0));

        let summary = service.lote_summary(&lote.id).unwrap();
        assert_eq!(summary.valor_pago, Decimal::new(130, 0));
        assert_eq!(transport.submitted.borrow().len(), 1);
    }

    #[test]
    fn test_transport_rejection_reopens() {
        let db = setup_db();
        let service = BillingService::new(&db, ClinicaConfig::default());
        let g1 = validated(&service, 100);
        let lote = service.create_lote("op-1").unwrap();
        service.add_guide_to_lote(&lote.id, &g1.id).unwrap();
        let artifact = service.close_lote(&lote.id).unwrap();

        let err = service
            .submit_lote(&lote.id, &artifact, &FakeTransport::rejecting("schema inválido"))
            .unwrap_err();
        assert!(matches!(err, BillingError::SubmissionRejected { .. }));

        let reopened = db.require_lote(&lote.id).unwrap();
        assert_eq!(reopened.status, LoteStatus::Aberto);
        assert!(reopened.artifact_hash.is_none());
        assert!(!db.require_guide(&g1.id).unwrap().locked);
    }

    #[test]
    fn test_stale_artifact_rejected() {
        let db = setup_db();
        let service = BillingService::new(&db, ClinicaConfig::default());
        let g1 = validated(&service, 100);
        let lote = service.create_lote("op-1").unwrap();
        service.add_guide_to_lote(&lote.id, &g1.id).unwrap();
        let mut artifact = service.close_lote(&lote.id).unwrap();
        artifact.hash = "0".repeat(64);

        let transport = FakeTransport::accepting();
        assert!(matches!(
            service.submit_lote(&lote.id, &artifact, &transport),
            Err(BillingError::ArtifactMismatch(_))
        ));
        assert!(transport.submitted.borrow().is_empty());
    }

    #[test]
    fn test_lote_limit_from_config() {
        let db = setup_db();
        let mut config = ClinicaConfig::default();
        config.tiss.max_guias_por_lote = 1;
        let service = BillingService::new(&db, config);
        let g1 = validated(&service, 10);
        let g2 = validated(&service, 10);

        let lote = service.create_lote("op-1").unwrap();
        service.add_guide_to_lote(&lote.id, &g1.id).unwrap();
        assert!(service.add_guide_to_lote(&lote.id, &g2.id).is_err());

        let stored = db.require_guide(&g2.id).unwrap();
        assert!(stored.lote_id.is_none());
    }

    #[test]
    fn test_delete_guide_in_open_lote() {
        let db = setup_db();
        let service = BillingService::new(&db, ClinicaConfig::default());
        let g1 = validated(&service, 70);
        let g2 = validated(&service, 30);
        let lote = service.create_lote("op-1").unwrap();
        service.add_guide_to_lote(&lote.id, &g1.id).unwrap();
        service.add_guide_to_lote(&lote.id, &g2.id).unwrap();

        service.delete_guide(&g1.id).unwrap();
        let lote = db.require_lote(&lote.id).unwrap();
        assert_eq!(lote.len(), 1);
        assert_eq!(lote.valor_total, Decimal::new(30, 0));
        assert!(db.get_guide(&g1.id).unwrap().is_none());
    }

    #[test]
    fn test_delete_lote_detaches_guides() {
        let db = setup_db();
        let service = BillingService::new(&db, ClinicaConfig::default());
        let g1 = validated(&service, 70);
        let lote = service.create_lote("op-1").unwrap();
        service.add_guide_to_lote(&lote.id, &g1.id).unwrap();

        service.delete_lote(&lote.id).unwrap();
        assert!(db.get_lote(&lote.id).unwrap().is_none());
        assert!(db.require_guide(&g1.id).unwrap().lote_id.is_none());
    }

    #[test]
    fn test_rejected_lote_guides_can_be_relotted() {
        let db = setup_db();
        let service = BillingService::new(&db, ClinicaConfig::default());
        let g1 = validated(&service, 70);
        let lote = service.create_lote("op-1").unwrap();
        service.add_guide_to_lote(&lote.id, &g1.id).unwrap();
        let artifact = service.close_lote(&lote.id).unwrap();
        service
            .submit_lote(&lote.id, &artifact, &FakeTransport::accepting())
            .unwrap();
        service.reject_lote(&lote.id, "lote duplicado").unwrap();

        let next = service.create_lote("op-1").unwrap();
        assert_eq!(next.numero_lote, 2);
        let next = service.add_guide_to_lote(&next.id, &g1.id).unwrap();
        assert_eq!(next.valor_total, Decimal::new(70, 0));
    }
}

//! End-to-end scenarios across the permission engine, billing, and storage.

use chrono::NaiveDate;
use rust_decimal::Decimal;

use clinica_core::authz::{ActionContext, DenialReason, PermissionEvaluator};
use clinica_core::billing::{BillingError, BillingService, SubmissionAck, SubmissionRejection, SubmissionTransport};
use clinica_core::config::ClinicaConfig;
use clinica_core::db::{Database, DbError};
use clinica_core::export::LoteArtifact;
use clinica_core::models::{
    Action, ActorContext, AssociationType, ClinicMode, DoctorAssociation, DoctorId,
    DoctorRosterEntry, GuideStatus, LoteStatus, Module, Operadora, PermissionFlagSet,
    Procedimento, ScopeType, SecretaryGrant, TipoGuia, TissGuide,
};
use clinica_core::tiss::{Adjudicacao, GuideAdjudication};

fn roster() -> Vec<DoctorRosterEntry> {
    let mut d2 = DoctorRosterEntry::new("D2", "Dr. Two");
    d2.deactivate();
    vec![
        DoctorRosterEntry::new("D1", "Dr. One"),
        d2,
        DoctorRosterEntry::new("D3", "Dr. Three"),
    ]
}

fn ids(list: &[&str]) -> Vec<DoctorId> {
    list.iter().map(|s| DoctorId::new(*s)).collect()
}

#[test]
fn test_secretary_specific_doctors_drops_inactive_and_ungranted() {
    let roster = roster();
    let actor = ActorContext::secretary(
        "sec-1",
        ClinicMode::MultiDoctor,
        SecretaryGrant::new(ScopeType::SpecificDoctors, ids(&["D1", "D2"])),
    );
    let evaluator = PermissionEvaluator::new(Some(&actor), &roster);

    assert_eq!(evaluator.resolved_scope().iter().cloned().collect::<Vec<_>>(), ids(&["D1"]));
    assert!(evaluator.can_access_doctor(&DoctorId::new("D1")));
    assert!(!evaluator.can_access_doctor(&DoctorId::new("D2")));
    assert!(!evaluator.can_access_doctor(&DoctorId::new("D3")));

    let decision =
        evaluator.can_perform_action(Module::Patients, Action::Read, &ActionContext::for_doctor("D3"));
    assert_eq!(decision.reason, Some(DenialReason::OutOfScope));
}

#[test]
fn test_multi_doctor_patient_filter_diverges_from_schedule() {
    let roster = roster();
    let actor = ActorContext::doctor(
        "user-d1",
        ClinicMode::MultiDoctor,
        DoctorAssociation {
            doctor_id: DoctorId::new("D1"),
            association_type: AssociationType::Employee,
            additional_permissions: PermissionFlagSet::default(),
            default_repasse_percent: None,
        },
    );
    let evaluator = PermissionEvaluator::new(Some(&actor), &roster);

    assert!(evaluator.get_patient_filter_doctors().is_empty());
    assert_eq!(evaluator.get_scheduleable_doctors(), ids(&["D1"]));
    assert_eq!(evaluator.get_assignable_doctors(), ids(&["D1"]));
}

#[test]
fn test_denial_reasons_are_distinguished() {
    let roster = roster();
    let actor = ActorContext::secretary(
        "sec-1",
        ClinicMode::MultiDoctor,
        SecretaryGrant::new(ScopeType::AllDoctors, Vec::new()),
    );
    let evaluator = PermissionEvaluator::new(Some(&actor), &roster);
    let in_scope = ActionContext::for_doctor("D1");

    assert!(evaluator.can_perform_action(Module::Patients, Action::Write, &in_scope).allowed);
    assert_eq!(
        evaluator
            .can_perform_action(Module::Patients, Action::ViewDetails, &in_scope)
            .reason,
        Some(DenialReason::SensitiveDataRestricted)
    );
    assert_eq!(
        evaluator
            .can_perform_action(Module::Financial, Action::Read, &in_scope)
            .reason,
        Some(DenialReason::InsufficientPermission)
    );
    assert_eq!(
        evaluator
            .can_perform_action(Module::Patients, Action::Read, &ActionContext::for_doctor("D2"))
            .reason,
        Some(DenialReason::OutOfScope)
    );
}

#[test]
fn test_session_json_to_decision() {
    let roster = roster();
    let session = r#"{
        "actorKind": "doctor",
        "userId": "u-3",
        "clinicMode": "multi_doctor",
        "doctorAssociation": {
            "doctorId": "D3",
            "associationType": "partner",
            "additionalPermissions": {"canViewFinancial": true}
        }
    }"#;
    let actor = ActorContext::from_session_json(session).unwrap();
    let evaluator = PermissionEvaluator::new(Some(&actor), &roster);

    assert!(evaluator.has_access(Module::Financial));
    assert!(!evaluator
        .can_perform_action(Module::Financial, Action::Write, &ActionContext::default())
        .allowed);
    assert!(evaluator.has_access(Module::Analytics));
    assert!(!evaluator.has_access(Module::Nfse));

    assert!(ActorContext::from_session_json(r#"{"actorKind": "secretary", "userId": "s"}"#).is_err());
}

// -------------------------------------------------------------------------
// Billing
// -------------------------------------------------------------------------

struct AckTransport;

impl SubmissionTransport for AckTransport {
    fn submit(&self, artifact: &LoteArtifact) -> Result<SubmissionAck, SubmissionRejection> {
        Ok(SubmissionAck {
            protocolo: format!("PROT-{:06}", artifact.numero_lote),
        })
    }
}

fn setup_db(db: &Database) {
    db.upsert_operadora(&Operadora {
        id: "op-1".into(),
        nome: "Operadora Exemplo".into(),
        registro_ans: "345678".into(),
        codigo_prestador: "00123".into(),
    })
    .unwrap();
}

fn draft(valor: i64) -> TissGuide {
    let mut guide = TissGuide::new(TipoGuia::Consulta, "op-1");
    guide.beneficiario.numero_carteira = "9988776655".into();
    guide.beneficiario.nome = "João Silva".into();
    guide.doctor_id = Some(DoctorId::new("D1"));
    guide.data_atendimento = NaiveDate::from_ymd_opt(2024, 3, 4);
    guide.procedimentos.push(Procedimento::new(
        "10101012",
        "Consulta em consultório",
        1,
        Decimal::new(valor, 0),
    ));
    guide.recalculate();
    guide
}

#[test]
fn test_closed_lot_guide_cannot_be_deleted_and_send_marks_enviado() {
    let db = Database::open_in_memory().unwrap();
    setup_db(&db);
    let service = BillingService::new(&db, ClinicaConfig::default());

    let guide = service.create_guide(draft(180)).unwrap();
    service.validate_guide(&guide.id).unwrap();
    let lote = service.create_lote("op-1").unwrap();
    let lote = service.add_guide_to_lote(&lote.id, &guide.id).unwrap();
    assert_eq!(lote.valor_total, Decimal::new(180, 0));

    let artifact = service.close_lote(&lote.id).unwrap();
    assert!(matches!(
        service.delete_guide(&guide.id),
        Err(BillingError::Transition(_))
    ));
    assert!(db.require_guide(&guide.id).unwrap().locked);

    let lote = service.submit_lote(&lote.id, &artifact, &AckTransport).unwrap();
    assert_eq!(lote.status, LoteStatus::Enviado);
    assert_eq!(lote.protocolo.as_deref(), Some("PROT-000001"));
    assert_eq!(db.require_guide(&guide.id).unwrap().status, GuideStatus::Enviado);
    assert!(service.delete_guide(&guide.id).is_err());
}

#[test]
fn test_partial_adjudication_then_payment() {
    let db = Database::open_in_memory().unwrap();
    setup_db(&db);
    let service = BillingService::new(&db, ClinicaConfig::default());

    let lote = service.create_lote("op-1").unwrap();
    let mut guide_ids = Vec::new();
    for valor in [100, 250] {
        let guide = service.create_guide(draft(valor)).unwrap();
        service.validate_guide(&guide.id).unwrap();
        service.add_guide_to_lote(&lote.id, &guide.id).unwrap();
        guide_ids.push(guide.id);
    }
    let artifact = service.close_lote(&lote.id).unwrap();
    assert_eq!(artifact.guide_count, 2);
    service.submit_lote(&lote.id, &artifact, &AckTransport).unwrap();

    let outcomes = service
        .adjudicate(
            &lote.id,
            &[
                GuideAdjudication {
                    guia_id: guide_ids[0].clone(),
                    adjudicacao: Adjudicacao::Aceita,
                },
                GuideAdjudication {
                    guia_id: guide_ids[1].clone(),
                    adjudicacao: Adjudicacao::Glosada {
                        valor_glosado: Decimal::new(300, 0),
                        motivo: None,
                    },
                },
            ],
        )
        .unwrap();
    assert_eq!(outcomes[0].result, Ok(GuideStatus::Aceito));
    assert!(outcomes[1].result.is_err());

    // Paying is blocked while a guide is still awaiting a verdict.
    service.accept_lote(&lote.id).unwrap();
    assert!(service.pay_lote(&lote.id).is_err());

    let outcomes = service
        .adjudicate(
            &lote.id,
            &[GuideAdjudication {
                guia_id: guide_ids[1].clone(),
                adjudicacao: Adjudicacao::Glosada {
                    valor_glosado: Decimal::new(50, 0),
                    motivo: Some("valor acima da tabela".into()),
                },
            }],
        )
        .unwrap();
    assert_eq!(outcomes[0].result, Ok(GuideStatus::Glosado));

    let lote = service.pay_lote(&lote.id).unwrap();
    assert_eq!(lote.status, LoteStatus::Pago);
    let paid = db.require_guide(&guide_ids[1]).unwrap();
    assert_eq!(paid.status, GuideStatus::Pago);
    assert_eq!(paid.valor_pago, Decimal::new(200, 0));
}

#[test]
fn test_stale_guide_write_conflicts() {
    let db = Database::open_in_memory().unwrap();
    setup_db(&db);
    let service = BillingService::new(&db, ClinicaConfig::default());
    let guide = service.create_guide(draft(90)).unwrap();

    let mut first = db.require_guide(&guide.id).unwrap();
    let mut second = db.require_guide(&guide.id).unwrap();

    first.senha_autorizacao = Some("123".into());
    db.update_guide(&mut first).unwrap();

    second.senha_autorizacao = Some("456".into());
    assert!(matches!(
        db.update_guide(&mut second),
        Err(DbError::VersionConflict { .. })
    ));
    assert_eq!(
        db.require_guide(&guide.id).unwrap().senha_autorizacao.as_deref(),
        Some("123")
    );
}

#[test]
fn test_on_disk_database_persists_roster_and_guides() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("clinica.db");

    let guide_id = {
        let db = Database::open(&path).unwrap();
        setup_db(&db);
        let mut owner = DoctorRosterEntry::new("D1", "Dr. One");
        owner.association_type = AssociationType::Owner;
        db.upsert_doctor(&owner).unwrap();
        let service = BillingService::new(&db, ClinicaConfig::default());
        service.create_guide(draft(75)).unwrap().id
    };

    let db = Database::open(&path).unwrap();
    let roster = db.list_roster().unwrap();
    assert_eq!(roster.len(), 1);
    assert_eq!(roster[0].association_type, AssociationType::Owner);

    let guide = db.require_guide(&guide_id).unwrap();
    assert_eq!(guide.status, GuideStatus::Rascunho);
    assert_eq!(guide.valor_total, Decimal::new(75, 0));
    assert_eq!(guide.data_atendimento, NaiveDate::from_ymd_opt(2024, 3, 4));
}

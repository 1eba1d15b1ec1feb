//! Property tests for the permission engine and the billing state machines.

use std::collections::BTreeSet;

use proptest::prelude::*;
use rust_decimal::Decimal;

use clinica_core::authz::{
    resolve_scope, ActionContext, CapabilityMatrix, DenialReason, DenySensitive,
    PermissionEvaluator,
};
use clinica_core::models::{
    Action, ActorContext, AssociationType, ClinicMode, DoctorAssociation, DoctorId,
    DoctorRosterEntry, GuideStatus, Module, ModulePermission, ModulePermissionSet,
    PermissionFlagSet, Procedimento, ScopeType, SecretaryGrant, TipoGuia, TissGuide, TissLote,
};
use clinica_core::tiss::{GuideEvent, ValidationReport};

const DOCTOR_POOL: usize = 8;

fn doctor_id(i: usize) -> DoctorId {
    DoctorId::new(format!("D{}", i))
}

fn arb_flags() -> impl Strategy<Value = PermissionFlagSet> {
    prop::collection::vec(any::<bool>(), 8).prop_map(|b| PermissionFlagSet {
        can_view_financial: b[0],
        can_manage_financial: b[1],
        can_view_all_patients: b[2],
        can_issue_nfse: b[3],
        can_manage_secretaries: b[4],
        can_view_analytics: b[5],
        can_manage_whatsapp: b[6],
        can_manage_facebook: b[7],
    })
}

fn arb_module_permission() -> impl Strategy<Value = ModulePermission> {
    (any::<bool>(), any::<bool>(), any::<bool>()).prop_map(|(read, write, view_details)| {
        ModulePermission {
            read,
            write,
            view_details,
        }
    })
}

fn arb_permission_set() -> impl Strategy<Value = ModulePermissionSet> {
    (
        prop::collection::vec(arb_module_permission(), Module::GRANTABLE.len()),
        prop::collection::vec(any::<bool>(), 4),
    )
        .prop_map(|(modules, caps)| {
            let mut set = ModulePermissionSet {
                can_create_patients: caps[0],
                can_assign_to_any_doctor: caps[1],
                can_view_all_schedules: caps[2],
                can_manage_waiting_room: caps[3],
                ..ModulePermissionSet::default()
            };
            for (module, perm) in Module::GRANTABLE.iter().zip(modules) {
                set.set(*module, perm);
            }
            set
        })
}

/// Roster entries with distinct ids drawn from the pool.
fn arb_roster() -> impl Strategy<Value = Vec<DoctorRosterEntry>> {
    prop::collection::btree_map(0..DOCTOR_POOL, (any::<bool>(), arb_flags()), 0..DOCTOR_POOL)
        .prop_map(|entries| {
            entries
                .into_iter()
                .map(|(i, (active, flags))| {
                    let mut entry = DoctorRosterEntry::new(format!("D{}", i), format!("Dr. {}", i));
                    entry.active = active;
                    entry.additional_permissions = flags;
                    entry
                })
                .collect()
        })
}

fn arb_association_type() -> impl Strategy<Value = AssociationType> {
    prop_oneof![
        Just(AssociationType::Owner),
        Just(AssociationType::Partner),
        Just(AssociationType::Employee),
        Just(AssociationType::Contractor),
        Just(AssociationType::Guest),
    ]
}

fn arb_scope_type() -> impl Strategy<Value = ScopeType> {
    prop_oneof![
        Just(ScopeType::AllDoctors),
        Just(ScopeType::SpecificDoctors),
        Just(ScopeType::SingleDoctor),
    ]
}

/// Actors in a multi-doctor clinic.
fn arb_multi_doctor_actor() -> impl Strategy<Value = ActorContext> {
    prop_oneof![
        Just(ActorContext::clinic_admin("admin", ClinicMode::MultiDoctor)),
        (0..DOCTOR_POOL, arb_association_type(), arb_flags()).prop_map(|(i, association_type, flags)| {
            ActorContext::doctor(
                "doctor-user",
                ClinicMode::MultiDoctor,
                DoctorAssociation {
                    doctor_id: doctor_id(i),
                    association_type,
                    additional_permissions: flags,
                    default_repasse_percent: None,
                },
            )
        }),
        (
            arb_scope_type(),
            prop::collection::vec(0..DOCTOR_POOL, 0..4),
            arb_permission_set()
        )
            .prop_map(|(scope_type, ids, permissions)| {
                ActorContext::secretary(
                    "secretary-user",
                    ClinicMode::MultiDoctor,
                    SecretaryGrant::new(scope_type, ids.into_iter().map(doctor_id))
                        .with_permissions(permissions),
                )
            }),
    ]
}

fn arb_module() -> impl Strategy<Value = Module> {
    prop::sample::select(Module::ALL.to_vec())
}

fn arb_action() -> impl Strategy<Value = Action> {
    prop::sample::select(Action::ALL.to_vec())
}

proptest! {
    #[test]
    fn test_scope_monotonic_in_roster(
        actor in arb_multi_doctor_actor(),
        roster in arb_roster(),
        extra in arb_roster(),
    ) {
        let known: BTreeSet<DoctorId> = roster.iter().map(|e| e.doctor_id.clone()).collect();
        let mut grown = roster.clone();
        grown.extend(extra.into_iter().filter(|e| !known.contains(&e.doctor_id)));

        let small = resolve_scope(&actor, &roster);
        let large = resolve_scope(&actor, &grown);
        prop_assert!(small.is_subset(&large), "{:?} not within {:?}", small, large);
    }

    #[test]
    fn test_scope_only_contains_active_roster_doctors(
        actor in arb_multi_doctor_actor(),
        roster in arb_roster(),
    ) {
        let active: BTreeSet<DoctorId> = roster
            .iter()
            .filter(|e| e.active)
            .map(|e| e.doctor_id.clone())
            .collect();
        prop_assert!(resolve_scope(&actor, &roster).is_subset(&active));
    }

    #[test]
    fn test_admin_allowed_everything(
        module in arb_module(),
        action in arb_action(),
        solo in any::<bool>(),
    ) {
        let mode = if solo {
            ClinicMode::Solo { doctor_id: doctor_id(0) }
        } else {
            ClinicMode::MultiDoctor
        };
        let admin = ActorContext::clinic_admin("admin", mode);
        prop_assert!(CapabilityMatrix::check(Some(&admin), module, action, &DenySensitive));
    }

    #[test]
    fn test_solo_doctor_allowed_everything(
        flags in arb_flags(),
        association_type in arb_association_type(),
        roster in arb_roster(),
        module in arb_module(),
        action in arb_action(),
    ) {
        let actor = ActorContext::doctor(
            "solo",
            ClinicMode::Solo { doctor_id: doctor_id(1) },
            DoctorAssociation {
                doctor_id: doctor_id(1),
                association_type,
                additional_permissions: flags,
                default_repasse_percent: None,
            },
        );
        let evaluator = PermissionEvaluator::new(Some(&actor), &roster).with_denial_logging(false);

        prop_assert!(evaluator.can_perform_action(module, action, &ActionContext::default()).allowed);
        prop_assert!(evaluator
            .can_perform_action(module, action, &ActionContext::for_doctor("D1"))
            .allowed);
    }

    #[test]
    fn test_scope_checked_before_capability(
        roster in arb_roster(),
        module in prop::sample::select(Module::GRANTABLE.to_vec()),
        action in arb_action(),
    ) {
        let mut full = ModulePermissionSet::default();
        for m in Module::GRANTABLE {
            full.set(m, ModulePermission::FULL);
        }
        let actor = ActorContext::secretary(
            "secretary",
            ClinicMode::MultiDoctor,
            SecretaryGrant::new(ScopeType::SpecificDoctors, Vec::new()).with_permissions(full),
        );
        let evaluator = PermissionEvaluator::new(Some(&actor), &roster).with_denial_logging(false);
        prop_assert!(evaluator.resolved_scope().is_empty());

        let decision = evaluator.can_perform_action(module, action, &ActionContext::for_doctor("D3"));
        prop_assert_eq!(decision.reason, Some(DenialReason::OutOfScope));
    }

    #[test]
    fn test_unauthenticated_always_denied(
        roster in arb_roster(),
        module in arb_module(),
        action in arb_action(),
    ) {
        let evaluator = PermissionEvaluator::new(None, &roster).with_denial_logging(false);
        let decision = evaluator.can_perform_action(module, action, &ActionContext::default());
        prop_assert_eq!(decision.reason, Some(DenialReason::NotAuthenticated));
        prop_assert!(!evaluator.has_access(module));
        prop_assert!(evaluator.get_scheduleable_doctors().is_empty());
    }

    #[test]
    fn test_assignable_within_scope(
        actor in arb_multi_doctor_actor(),
        roster in arb_roster(),
    ) {
        let evaluator = PermissionEvaluator::new(Some(&actor), &roster).with_denial_logging(false);
        let scope = evaluator.resolved_scope().clone();
        for id in evaluator.get_assignable_doctors() {
            prop_assert!(scope.contains(&id));
        }
        for id in evaluator.get_scheduleable_doctors() {
            prop_assert!(scope.contains(&id));
        }
    }
}

// -------------------------------------------------------------------------
// State machines
// -------------------------------------------------------------------------

/// Operations a caller can attempt against a single guide.
#[derive(Debug, Clone)]
enum GuideOp {
    Event(GuideEvent),
    AttachToLot,
}

fn arb_guide_op() -> impl Strategy<Value = GuideOp> {
    let dirty = {
        let mut report = ValidationReport::new();
        report.erro("procedimentos", "inválido");
        report
    };
    prop_oneof![
        Just(GuideOp::Event(GuideEvent::Validate { report: ValidationReport::new() })),
        Just(GuideOp::Event(GuideEvent::Validate { report: dirty })),
        Just(GuideOp::Event(GuideEvent::Reopen)),
        Just(GuideOp::Event(GuideEvent::Lock)),
        Just(GuideOp::Event(GuideEvent::Unlock)),
        Just(GuideOp::Event(GuideEvent::Submit)),
        Just(GuideOp::Event(GuideEvent::Release)),
        Just(GuideOp::Event(GuideEvent::Accept)),
        (1i64..100).prop_map(|v| GuideOp::Event(GuideEvent::Glosa {
            valor_glosado: Decimal::new(v, 0),
            motivo: None,
        })),
        Just(GuideOp::Event(GuideEvent::Pay { valor_pago: None })),
        Just(GuideOp::AttachToLot),
    ]
}

fn priced_guide(valor: i64) -> TissGuide {
    let mut guide = TissGuide::new(TipoGuia::Sadt, "op-1");
    guide
        .add_procedimento(Procedimento::new("40301630", "Hemograma", 1, Decimal::new(valor, 0)))
        .unwrap();
    guide
}

proptest! {
    #[test]
    fn test_guide_paid_is_final_and_validation_not_skipped(
        ops in prop::collection::vec(arb_guide_op(), 1..40),
    ) {
        let mut guide = priced_guide(100);
        let mut seen_validado = false;

        for op in ops {
            let before = guide.status;
            match op {
                GuideOp::AttachToLot => {
                    if guide.status == GuideStatus::Validado && guide.lote_id.is_none() {
                        guide.lote_id = Some("lote-1".into());
                    }
                }
                GuideOp::Event(event) => {
                    let snapshot = guide.clone();
                    if guide.transition(event).is_err() {
                        prop_assert_eq!(guide.status, snapshot.status);
                        prop_assert_eq!(guide.locked, snapshot.locked);
                        prop_assert_eq!(&guide.lote_id, &snapshot.lote_id);
                    }
                }
            }

            if before == GuideStatus::Pago {
                prop_assert_eq!(guide.status, GuideStatus::Pago);
            }
            if guide.status == GuideStatus::Validado {
                seen_validado = true;
            }
            if guide.status == GuideStatus::Enviado {
                prop_assert!(seen_validado);
                prop_assert!(before == GuideStatus::Validado || before == GuideStatus::Enviado);
            }
            prop_assert_eq!(guide.valor_total, guide.procedures_total());
        }
    }

    #[test]
    fn test_lot_total_tracks_members(
        prices in prop::collection::vec(1i64..10_000, 1..12),
        ops in prop::collection::vec((any::<bool>(), 0usize..12), 1..60),
    ) {
        let mut guides: Vec<TissGuide> = prices
            .iter()
            .map(|p| {
                let mut g = priced_guide(*p);
                g.transition(GuideEvent::Validate { report: ValidationReport::new() }).unwrap();
                g
            })
            .collect();
        let mut lote = TissLote::new(1, "op-1");

        for (add, idx) in ops {
            let idx = idx % guides.len();
            let guide = &mut guides[idx];
            let _ = if add {
                lote.add_guide(guide, 5)
            } else {
                lote.remove_guide(guide)
            };

            let members: Vec<TissGuide> = guides
                .iter()
                .filter(|g| g.lote_id.as_deref() == Some(lote.id.as_str()))
                .cloned()
                .collect();
            prop_assert_eq!(lote.valor_total, TissLote::members_total(&members));
            prop_assert_eq!(lote.guia_ids.len(), members.len());
            prop_assert!(lote.len() <= 5);
        }
    }
}

//! Guide validation backed by the TUSS table.

use rust_decimal::Decimal;
use tracing::debug;

use clinica_core::config::TissConfig;
use clinica_core::models::TissGuide;
use clinica_core::tiss::{is_tuss_code_format, GuideValidator, StructuralValidator, ValidationReport};

use crate::table::{description_similarity, TussTable};

/// Below this, a line's description is reported as differing from the table.
const DESCRIPTION_MATCH_THRESHOLD: f64 = 0.85;

/// Structural checks plus code resolvability and reference-price deviation.
pub struct TussGuideValidator<'a> {
    table: &'a TussTable,
    structural: StructuralValidator,
    price_tolerance: Decimal,
}

impl<'a> TussGuideValidator<'a> {
    pub fn new(table: &'a TussTable, config: &TissConfig) -> Self {
        Self {
            table,
            structural: StructuralValidator::new(),
            price_tolerance: config.price_tolerance,
        }
    }

    pub fn with_structural(mut self, structural: StructuralValidator) -> Self {
        self.structural = structural;
        self
    }

    fn check_procedures(&self, guide: &TissGuide, report: &mut ValidationReport) {
        for (i, p) in guide.procedimentos.iter().enumerate() {
            // Malformed codes are already reported by the structural pass.
            if !is_tuss_code_format(&p.codigo_tuss) {
                continue;
            }
            let field = |name: &str| format!("procedimentos[{}].{}", i, name);

            let Some(entry) = self.table.lookup(&p.codigo_tuss) else {
                report.erro(
                    field("codigo_tuss"),
                    format!("código {} não consta na tabela TUSS", p.codigo_tuss),
                );
                continue;
            };
            if !entry.ativo {
                report.erro(
                    field("codigo_tuss"),
                    format!("código {} inativo na tabela TUSS", p.codigo_tuss),
                );
                continue;
            }

            if let Some(referencia) = entry.valor_referencia.filter(|v| *v > Decimal::ZERO) {
                let deviation = (p.valor_unitario - referencia).abs() / referencia;
                if deviation > self.price_tolerance {
                    report.aviso(
                        field("valor_unitario"),
                        format!(
                            "valor unitário {} difere do valor de referência {}",
                            p.valor_unitario, referencia
                        ),
                    );
                }
            }

            let similarity = description_similarity(
                &p.descricao.trim().to_lowercase(),
                &entry.descricao.trim().to_lowercase(),
            );
            if similarity < DESCRIPTION_MATCH_THRESHOLD {
                report.info(
                    field("descricao"),
                    format!("descrição difere da tabela: '{}'", entry.descricao),
                );
            }
        }
    }
}

impl GuideValidator for TussGuideValidator<'_> {
    fn validate(&self, guide: &TissGuide) -> ValidationReport {
        let mut report = self.structural.validate(guide);
        self.check_procedures(guide, &mut report);
        debug!(
            guide_id = %guide.id,
            errors = report.error_count(),
            entries = report.entries.len(),
            "TUSS validation"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::TussEntry;
    use chrono::NaiveDate;
    use clinica_core::models::{Beneficiario, DoctorId, Procedimento, TipoGuia};
    use clinica_core::tiss::Severity;

    fn table() -> TussTable {
        TussTable::from_entries(vec![
            TussEntry::new("10101012", "Consulta em consultório")
                .with_reference_price(Decimal::new(100, 0)),
            TussEntry::new("40302040", "Glicose").inactive(),
        ])
        .unwrap()
    }

    fn guide(procedimento: Procedimento) -> TissGuide {
        let mut guide = TissGuide::new(TipoGuia::Consulta, "op-1");
        guide.beneficiario = Beneficiario {
            numero_carteira: "0001".into(),
            nome: "Maria".into(),
        };
        guide.doctor_id = Some(DoctorId::new("dr-1"));
        guide.data_atendimento = NaiveDate::from_ymd_opt(2024, 6, 1);
        guide.procedimentos.push(procedimento);
        guide.recalculate();
        guide
    }

    fn validator(table: &TussTable) -> TussGuideValidator<'_> {
        TussGuideValidator::new(table, &TissConfig::default()).with_structural(
            StructuralValidator::with_today(NaiveDate::from_ymd_opt(2024, 6, 10).unwrap()),
        )
    }

    #[test]
    fn test_known_code_within_tolerance_is_clean() {
        let table = table();
        let report = validator(&table).validate(&guide(Procedimento::new(
            "10101012",
            "Consulta em consultório",
            1,
            Decimal::new(110, 0),
        )));
        assert!(report.is_clean());
        assert_eq!(report.entries.len(), 0);
    }

    #[test]
    fn test_unknown_and_inactive_codes_are_errors() {
        let table = table();
        let v = validator(&table);

        let report = v.validate(&guide(Procedimento::new("99999999", "x", 1, Decimal::ONE)));
        assert_eq!(report.error_count(), 1);

        let report = v.validate(&guide(Procedimento::new("40302040", "Glicose", 1, Decimal::ONE)));
        assert_eq!(report.error_count(), 1);
        assert!(report.errors().any(|e| e.message.contains("inativo")));
    }

    #[test]
    fn test_price_deviation_warns() {
        let table = table();
        let report = validator(&table).validate(&guide(Procedimento::new(
            "10101012",
            "Consulta em consultório",
            1,
            Decimal::new(200, 0),
        )));
        assert!(report.is_clean());
        assert_eq!(report.count(Severity::Aviso), 1);
        assert_eq!(report.entries[0].field, "procedimentos[0].valor_unitario");
    }

    #[test]
    fn test_description_mismatch_is_info() {
        let table = table();
        let report = validator(&table).validate(&guide(Procedimento::new(
            "10101012",
            "Radiografia de tórax",
            1,
            Decimal::new(100, 0),
        )));
        assert!(report.is_clean());
        assert_eq!(report.count(Severity::Info), 1);
    }
}

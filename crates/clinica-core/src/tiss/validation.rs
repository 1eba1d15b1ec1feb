//! Guide validation reports and the structural validator.

use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::models::{TipoGuia, TissGuide};

/// Severity of a validation finding. Only `Erro` blocks validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Erro,
    Aviso,
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Erro => f.write_str("erro"),
            Severity::Aviso => f.write_str("aviso"),
            Severity::Info => f.write_str("info"),
        }
    }
}

/// A single validation finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationEntry {
    pub severity: Severity,
    /// Field path, e.g. `procedimentos[0].codigo_tuss`
    pub field: String,
    pub message: String,
}

/// Findings of one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub entries: Vec<ValidationEntry>,
}

impl ValidationReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, severity: Severity, field: impl Into<String>, message: impl Into<String>) {
        self.entries.push(ValidationEntry {
            severity,
            field: field.into(),
            message: message.into(),
        });
    }

    pub fn erro(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Erro, field, message);
    }

    pub fn aviso(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Aviso, field, message);
    }

    pub fn info(&mut self, field: impl Into<String>, message: impl Into<String>) {
        self.push(Severity::Info, field, message);
    }

    /// Append another report's entries.
    pub fn merge(&mut self, other: ValidationReport) {
        self.entries.extend(other.entries);
    }

    /// No `Erro` entries.
    pub fn is_clean(&self) -> bool {
        self.error_count() == 0
    }

    pub fn error_count(&self) -> usize {
        self.count(Severity::Erro)
    }

    pub fn count(&self, severity: Severity) -> usize {
        self.entries.iter().filter(|e| e.severity == severity).count()
    }

    pub fn errors(&self) -> impl Iterator<Item = &ValidationEntry> {
        self.entries.iter().filter(|e| e.severity == Severity::Erro)
    }
}

/// Validation collaborator consulted before `Rascunho → Validado`.
pub trait GuideValidator {
    fn validate(&self, guide: &TissGuide) -> ValidationReport;
}

/// Required fields and arithmetic consistency; no code-table lookups.
#[derive(Debug, Clone, Default)]
pub struct StructuralValidator {
    /// Reference date for "attendance in the future" checks; today when unset.
    pub today: Option<NaiveDate>,
}

impl StructuralValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_today(today: NaiveDate) -> Self {
        Self { today: Some(today) }
    }
}

/// TUSS procedure codes are eight digits.
pub fn is_tuss_code_format(code: &str) -> bool {
    code.len() == 8 && code.bytes().all(|b| b.is_ascii_digit())
}

impl GuideValidator for StructuralValidator {
    fn validate(&self, guide: &TissGuide) -> ValidationReport {
        let mut report = ValidationReport::new();
        let today = self
            .today
            .unwrap_or_else(|| chrono::Utc::now().date_naive());

        if guide.operadora_id.trim().is_empty() {
            report.erro("operadora_id", "operadora não informada");
        }
        if guide.beneficiario.numero_carteira.trim().is_empty() {
            report.erro("beneficiario.numero_carteira", "carteirinha do beneficiário não informada");
        }
        if guide.beneficiario.nome.trim().is_empty() {
            report.erro("beneficiario.nome", "nome do beneficiário não informado");
        }
        match guide.data_atendimento {
            None => report.erro("data_atendimento", "data de atendimento não informada"),
            Some(date) if date > today => {
                report.erro("data_atendimento", "data de atendimento no futuro")
            }
            Some(_) => {}
        }

        if guide.procedimentos.is_empty() {
            report.erro("procedimentos", "guia sem procedimentos");
        }
        for (i, p) in guide.procedimentos.iter().enumerate() {
            let field = |name: &str| format!("procedimentos[{}].{}", i, name);
            if !is_tuss_code_format(&p.codigo_tuss) {
                report.erro(field("codigo_tuss"), format!("código TUSS inválido: '{}'", p.codigo_tuss));
            }
            if p.quantidade == 0 {
                report.erro(field("quantidade"), "quantidade deve ser maior que zero");
            }
            if p.valor_unitario <= Decimal::ZERO {
                report.erro(field("valor_unitario"), "valor unitário deve ser positivo");
            }
            if p.valor_total != p.expected_total() {
                report.erro(
                    field("valor_total"),
                    format!("valor total {} difere de quantidade × unitário {}", p.valor_total, p.expected_total()),
                );
            }
            if let (Some(exec), Some(atend)) = (p.data_execucao, guide.data_atendimento) {
                if exec < atend {
                    report.aviso(field("data_execucao"), "execução anterior ao atendimento");
                }
            }
        }

        if guide.valor_total != guide.procedures_total() {
            report.erro(
                "valor_total",
                format!("valor total {} difere da soma dos procedimentos {}", guide.valor_total, guide.procedures_total()),
            );
        }

        if guide.tipo_guia.requires_authorization() && guide.senha_autorizacao.is_none() {
            report.aviso("senha_autorizacao", "guia sem senha de autorização");
        }
        if guide.tipo_guia == TipoGuia::Consulta && guide.procedimentos.len() > 1 {
            report.aviso("procedimentos", "guia de consulta com mais de um procedimento");
        }
        if guide.doctor_id.is_none() {
            report.info("doctor_id", "profissional executante não vinculado");
        }

        report
    }
}

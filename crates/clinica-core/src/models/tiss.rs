//! TISS billing models: guides, lots, procedures, and operators.

use std::collections::BTreeSet;
use std::fmt;

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::roster::DoctorId;

/// TISS guide type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TipoGuia {
    Consulta,
    Sadt,
    Internacao,
    Honorarios,
}

impl TipoGuia {
    pub fn as_str(&self) -> &'static str {
        match self {
            TipoGuia::Consulta => "consulta",
            TipoGuia::Sadt => "sadt",
            TipoGuia::Internacao => "internacao",
            TipoGuia::Honorarios => "honorarios",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "consulta" => Some(TipoGuia::Consulta),
            "sadt" | "sp_sadt" => Some(TipoGuia::Sadt),
            "internacao" => Some(TipoGuia::Internacao),
            "honorarios" => Some(TipoGuia::Honorarios),
            _ => None,
        }
    }

    /// Guide types that require a prior authorization password.
    pub fn requires_authorization(&self) -> bool {
        matches!(self, TipoGuia::Sadt | TipoGuia::Internacao)
    }
}

/// Guide status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GuideStatus {
    Rascunho,
    Validado,
    Enviado,
    Aceito,
    Glosado,
    Pago,
}

impl GuideStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            GuideStatus::Rascunho => "rascunho",
            GuideStatus::Validado => "validado",
            GuideStatus::Enviado => "enviado",
            GuideStatus::Aceito => "aceito",
            GuideStatus::Glosado => "glosado",
            GuideStatus::Pago => "pago",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rascunho" => Some(GuideStatus::Rascunho),
            "validado" => Some(GuideStatus::Validado),
            "enviado" => Some(GuideStatus::Enviado),
            "aceito" => Some(GuideStatus::Aceito),
            "glosado" => Some(GuideStatus::Glosado),
            "pago" => Some(GuideStatus::Pago),
            _ => None,
        }
    }
}

impl fmt::Display for GuideStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lot status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LoteStatus {
    Aberto,
    Fechado,
    Enviado,
    Processando,
    Aceito,
    Rejeitado,
    Pago,
}

impl LoteStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LoteStatus::Aberto => "aberto",
            LoteStatus::Fechado => "fechado",
            LoteStatus::Enviado => "enviado",
            LoteStatus::Processando => "processando",
            LoteStatus::Aceito => "aceito",
            LoteStatus::Rejeitado => "rejeitado",
            LoteStatus::Pago => "pago",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "aberto" => Some(LoteStatus::Aberto),
            "fechado" => Some(LoteStatus::Fechado),
            "enviado" => Some(LoteStatus::Enviado),
            "processando" => Some(LoteStatus::Processando),
            "aceito" => Some(LoteStatus::Aceito),
            "rejeitado" => Some(LoteStatus::Rejeitado),
            "pago" => Some(LoteStatus::Pago),
            _ => None,
        }
    }
}

impl fmt::Display for LoteStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Health-insurance operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Operadora {
    pub id: String,
    pub nome: String,
    /// ANS registry number (6 digits)
    pub registro_ans: String,
    /// The clinic's provider code at this operator
    pub codigo_prestador: String,
}

/// Insured patient as identified on a guide.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Beneficiario {
    pub numero_carteira: String,
    pub nome: String,
}

/// A billed procedure line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Procedimento {
    pub codigo_tuss: String,
    pub descricao: String,
    pub quantidade: u32,
    pub valor_unitario: Decimal,
    /// quantidade × valor_unitario
    pub valor_total: Decimal,
    pub data_execucao: Option<NaiveDate>,
}

impl Procedimento {
    pub fn new(
        codigo_tuss: impl Into<String>,
        descricao: impl Into<String>,
        quantidade: u32,
        valor_unitario: Decimal,
    ) -> Self {
        Self {
            codigo_tuss: codigo_tuss.into(),
            descricao: descricao.into(),
            quantidade,
            valor_unitario,
            valor_total: valor_unitario * Decimal::from(quantidade),
            data_execucao: None,
        }
    }

    pub fn expected_total(&self) -> Decimal {
        self.valor_unitario * Decimal::from(self.quantidade)
    }
}

/// A single TISS billing claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TissGuide {
    pub id: String,
    pub numero_guia_prestador: String,
    pub tipo_guia: TipoGuia,
    pub operadora_id: String,
    pub beneficiario: Beneficiario,
    /// Executing doctor, used for scope checks
    pub doctor_id: Option<DoctorId>,
    pub data_atendimento: Option<NaiveDate>,
    pub senha_autorizacao: Option<String>,
    pub status: GuideStatus,
    pub procedimentos: Vec<Procedimento>,
    /// Sum of procedure totals
    pub valor_total: Decimal,
    pub valor_glosado: Decimal,
    pub valor_pago: Decimal,
    pub motivo_glosa: Option<String>,
    /// Lot this guide belongs to, if any
    pub lote_id: Option<String>,
    /// Set while the containing lot is closed and awaiting submission
    pub locked: bool,
    /// Optimistic concurrency version
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl TissGuide {
    /// Create a new draft guide.
    pub fn new(tipo_guia: TipoGuia, operadora_id: impl Into<String>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        let id = uuid::Uuid::new_v4().to_string();
        Self {
            numero_guia_prestador: id.split('-').next().unwrap_or_default().to_uppercase(),
            id,
            tipo_guia,
            operadora_id: operadora_id.into(),
            beneficiario: Beneficiario::default(),
            doctor_id: None,
            data_atendimento: None,
            senha_autorizacao: None,
            status: GuideStatus::Rascunho,
            procedimentos: Vec::new(),
            valor_total: Decimal::ZERO,
            valor_glosado: Decimal::ZERO,
            valor_pago: Decimal::ZERO,
            motivo_glosa: None,
            lote_id: None,
            locked: false,
            version: 0,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    /// Sum of procedure totals.
    pub fn procedures_total(&self) -> Decimal {
        self.procedimentos.iter().map(|p| p.valor_total).sum()
    }

    /// Recompute line and guide totals from quantities and unit prices.
    pub fn recalculate(&mut self) {
        for p in &mut self.procedimentos {
            p.valor_total = p.expected_total();
        }
        self.valor_total = self.procedures_total();
    }

    /// Touch the updated_at timestamp.
    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }
}

/// A batch of guides submitted together to one operator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TissLote {
    pub id: String,
    /// Sequential number shown to the operator
    pub numero_lote: u64,
    pub operadora_id: String,
    pub status: LoteStatus,
    pub guia_ids: BTreeSet<String>,
    /// Sum of member guide totals
    pub valor_total: Decimal,
    /// Operator protocol number returned on submission
    pub protocolo: Option<String>,
    pub motivo_rejeicao: Option<String>,
    /// Hash of the generated submission artifact
    pub artifact_hash: Option<String>,
    pub version: i64,
    pub created_at: String,
    pub updated_at: String,
}

impl TissLote {
    /// Create a new open lot.
    pub fn new(numero_lote: u64, operadora_id: impl Into<String>) -> Self {
        let now = chrono::Utc::now().to_rfc3339();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            numero_lote,
            operadora_id: operadora_id.into(),
            status: LoteStatus::Aberto,
            guia_ids: BTreeSet::new(),
            valor_total: Decimal::ZERO,
            protocolo: None,
            motivo_rejeicao: None,
            artifact_hash: None,
            version: 0,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn len(&self) -> usize {
        self.guia_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.guia_ids.is_empty()
    }

    pub fn touch(&mut self) {
        self.updated_at = chrono::Utc::now().to_rfc3339();
    }
}

//! Per-guide lot summary for reconciliation spreadsheets.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::escape_csv;
use crate::models::{TissGuide, TissLote};

/// One row per guide.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoteSummaryLine {
    pub numero_guia_prestador: String,
    pub tipo_guia: String,
    pub numero_carteira: String,
    pub beneficiario: String,
    pub doctor_id: Option<String>,
    pub status: String,
    pub valor_total: Decimal,
    pub valor_glosado: Decimal,
    pub valor_pago: Decimal,
    pub motivo_glosa: Option<String>,
}

/// Lot header plus guide lines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoteSummary {
    pub numero_lote: u64,
    pub operadora_id: String,
    pub status: String,
    pub protocolo: Option<String>,
    pub valor_total: Decimal,
    pub valor_glosado: Decimal,
    pub valor_pago: Decimal,
    pub lines: Vec<LoteSummaryLine>,
    pub exported_at: String,
}

impl LoteSummary {
    /// Summarize a lot. Guides not in the lot are ignored.
    pub fn from_lote(lote: &TissLote, guides: &[TissGuide]) -> Self {
        let mut members: Vec<&TissGuide> = guides
            .iter()
            .filter(|g| lote.guia_ids.contains(&g.id))
            .collect();
        members.sort_by(|a, b| a.numero_guia_prestador.cmp(&b.numero_guia_prestador));

        let lines: Vec<LoteSummaryLine> = members
            .iter()
            .map(|g| LoteSummaryLine {
                numero_guia_prestador: g.numero_guia_prestador.clone(),
                tipo_guia: g.tipo_guia.as_str().to_string(),
                numero_carteira: g.beneficiario.numero_carteira.clone(),
                beneficiario: g.beneficiario.nome.clone(),
                doctor_id: g.doctor_id.as_ref().map(|d| d.to_string()),
                status: g.status.as_str().to_string(),
                valor_total: g.valor_total,
                valor_glosado: g.valor_glosado,
                valor_pago: g.valor_pago,
                motivo_glosa: g.motivo_glosa.clone(),
            })
            .collect();

        Self {
            numero_lote: lote.numero_lote,
            operadora_id: lote.operadora_id.clone(),
            status: lote.status.as_str().to_string(),
            protocolo: lote.protocolo.clone(),
            valor_total: lote.valor_total,
            valor_glosado: lines.iter().map(|l| l.valor_glosado).sum(),
            valor_pago: lines.iter().map(|l| l.valor_pago).sum(),
            lines,
            exported_at: chrono::Utc::now().to_rfc3339(),
        }
    }

    /// Export to JSON.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    /// Export to CSV format.
    pub fn to_csv(&self) -> String {
        let mut csv = String::new();

        csv.push_str("numero_lote,numero_guia,tipo_guia,carteira,beneficiario,doctor_id,status,valor_total,valor_glosado,valor_pago,motivo_glosa\n");

        for line in &self.lines {
            csv.push_str(&format!(
                "{},{},{},{},{},{},{},{},{},{},{}\n",
                self.numero_lote,
                escape_csv(&line.numero_guia_prestador),
                line.tipo_guia,
                escape_csv(&line.numero_carteira),
                escape_csv(&line.beneficiario),
                escape_csv(line.doctor_id.as_deref().unwrap_or("")),
                line.status,
                line.valor_total,
                line.valor_glosado,
                line.valor_pago,
                escape_csv(line.motivo_glosa.as_deref().unwrap_or("")),
            ));
        }

        csv
    }
}

//! TISS `mensagemTISS` lot artifact (`ENVIO_LOTE_GUIAS`).

use std::fmt::Write;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::{ExportError, ExportResult};
use crate::config::TissConfig;
use crate::models::{Operadora, TipoGuia, TissGuide, TissLote};

const NAMESPACE: &str = "http://www.ans.gov.br/padroes/tiss/schemas";
/// TUSS procedure table code.
const CODIGO_TABELA_TUSS: &str = "22";

/// Submission artifact for one lot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoteArtifact {
    pub lote_id: String,
    pub numero_lote: u64,
    pub padrao_tiss: String,
    pub guide_count: usize,
    pub xml: String,
    /// Hex digest of the message body, also written to `epilogo`
    pub hash: String,
    pub hash_algorithm: String,
}

impl LoteArtifact {
    /// Render the lot. `guides` must be exactly the lot's members.
    pub fn build(
        lote: &TissLote,
        guides: &[TissGuide],
        operadora: &Operadora,
        config: &TissConfig,
        generated_at: DateTime<Utc>,
    ) -> ExportResult<Self> {
        if lote.is_empty() {
            return Err(ExportError::EmptyLote(lote.numero_lote));
        }
        if guides.len() != lote.len() || !guides.iter().all(|g| lote.guia_ids.contains(&g.id)) {
            return Err(ExportError::Membership(lote.numero_lote));
        }
        if operadora.id != lote.operadora_id {
            return Err(ExportError::OperatorMismatch {
                expected: lote.operadora_id.clone(),
                actual: operadora.id.clone(),
            });
        }

        let mut ordered: Vec<&TissGuide> = guides.iter().collect();
        ordered.sort_by(|a, b| {
            a.numero_guia_prestador
                .cmp(&b.numero_guia_prestador)
                .then_with(|| a.id.cmp(&b.id))
        });

        let body = render_body(lote, &ordered, operadora, config, generated_at);
        let hash = body_hash(&body);

        let mut xml = String::new();
        xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        let _ = writeln!(xml, "<ans:mensagemTISS xmlns:ans=\"{}\">", NAMESPACE);
        xml.push_str(&body);
        let _ = writeln!(xml, "  <ans:epilogo><ans:hash>{}</ans:hash></ans:epilogo>", hash);
        xml.push_str("</ans:mensagemTISS>\n");

        Ok(Self {
            lote_id: lote.id.clone(),
            numero_lote: lote.numero_lote,
            padrao_tiss: config.padrao_tiss.clone(),
            guide_count: ordered.len(),
            xml,
            hash,
            hash_algorithm: config.hash_algorithm.clone(),
        })
    }

    /// Recompute the body hash from the XML and compare with the epilogue.
    pub fn verify(&self) -> bool {
        let Some(start) = self.xml.find("<ans:cabecalho>") else {
            return false;
        };
        let Some(end) = self.xml.find("  <ans:epilogo>") else {
            return false;
        };
        // Body starts at the indentation preceding the header element.
        let start = self.xml[..start].rfind('\n').map(|i| i + 1).unwrap_or(start);
        end > start && body_hash(&self.xml[start..end]) == self.hash
    }
}

fn body_hash(body: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.as_bytes());
    hex::encode(hasher.finalize())
}

fn guide_element(tipo: TipoGuia) -> &'static str {
    match tipo {
        TipoGuia::Consulta => "guiaConsulta",
        TipoGuia::Sadt => "guiaSP-SADT",
        TipoGuia::Internacao => "guiaResumoInternacao",
        TipoGuia::Honorarios => "guiaHonorarios",
    }
}

fn money(value: Decimal) -> String {
    format!("{:.2}", value.round_dp(2))
}

fn render_body(
    lote: &TissLote,
    guides: &[&TissGuide],
    operadora: &Operadora,
    config: &TissConfig,
    generated_at: DateTime<Utc>,
) -> String {
    let mut out = String::new();

    let _ = writeln!(out, "  <ans:cabecalho>");
    let _ = writeln!(out, "    <ans:identificacaoTransacao>");
    let _ = writeln!(out, "      <ans:tipoTransacao>ENVIO_LOTE_GUIAS</ans:tipoTransacao>");
    let _ = writeln!(out, "      <ans:sequencialTransacao>{}</ans:sequencialTransacao>", lote.numero_lote);
    let _ = writeln!(out, "      <ans:dataRegistroTransacao>{}</ans:dataRegistroTransacao>", generated_at.format("%Y-%m-%d"));
    let _ = writeln!(out, "      <ans:horaRegistroTransacao>{}</ans:horaRegistroTransacao>", generated_at.format("%H:%M:%S"));
    let _ = writeln!(out, "    </ans:identificacaoTransacao>");
    let _ = writeln!(
        out,
        "    <ans:origem><ans:identificacaoPrestador><ans:codigoPrestadorNaOperadora>{}</ans:codigoPrestadorNaOperadora></ans:identificacaoPrestador></ans:origem>",
        escape_xml(&operadora.codigo_prestador)
    );
    let _ = writeln!(out, "    <ans:destino><ans:registroANS>{}</ans:registroANS></ans:destino>", escape_xml(&operadora.registro_ans));
    let _ = writeln!(out, "    <ans:Padrao>{}</ans:Padrao>", escape_xml(&config.padrao_tiss));
    let _ = writeln!(out, "  </ans:cabecalho>");

    let _ = writeln!(out, "  <ans:prestadorParaOperadora>");
    let _ = writeln!(out, "    <ans:loteGuias>");
    let _ = writeln!(out, "      <ans:numeroLote>{}</ans:numeroLote>", lote.numero_lote);
    let _ = writeln!(out, "      <ans:guiasTISS>");
    for guide in guides {
        render_guide(&mut out, guide, operadora);
    }
    let _ = writeln!(out, "      </ans:guiasTISS>");
    let _ = writeln!(out, "    </ans:loteGuias>");
    let _ = writeln!(out, "  </ans:prestadorParaOperadora>");

    out
}

fn render_guide(out: &mut String, guide: &TissGuide, operadora: &Operadora) {
    let element = guide_element(guide.tipo_guia);
    let _ = writeln!(out, "        <ans:{}>", element);
    let _ = writeln!(
        out,
        "          <ans:cabecalhoGuia><ans:registroANS>{}</ans:registroANS><ans:numeroGuiaPrestador>{}</ans:numeroGuiaPrestador></ans:cabecalhoGuia>",
        escape_xml(&operadora.registro_ans),
        escape_xml(&guide.numero_guia_prestador)
    );
    let _ = writeln!(
        out,
        "          <ans:dadosBeneficiario><ans:numeroCarteira>{}</ans:numeroCarteira><ans:nomeBeneficiario>{}</ans:nomeBeneficiario></ans:dadosBeneficiario>",
        escape_xml(&guide.beneficiario.numero_carteira),
        escape_xml(&guide.beneficiario.nome)
    );
    if let Some(senha) = &guide.senha_autorizacao {
        let _ = writeln!(out, "          <ans:senha>{}</ans:senha>", escape_xml(senha));
    }
    if let Some(date) = guide.data_atendimento {
        let _ = writeln!(out, "          <ans:dataAtendimento>{}</ans:dataAtendimento>", date.format("%Y-%m-%d"));
    }
    let _ = writeln!(out, "          <ans:procedimentosExecutados>");
    for p in &guide.procedimentos {
        let _ = writeln!(out, "            <ans:procedimentoExecutado>");
        if let Some(date) = p.data_execucao.or(guide.data_atendimento) {
            let _ = writeln!(out, "              <ans:dataExecucao>{}</ans:dataExecucao>", date.format("%Y-%m-%d"));
        }
        let _ = writeln!(
            out,
            "              <ans:procedimento><ans:codigoTabela>{}</ans:codigoTabela><ans:codigoProcedimento>{}</ans:codigoProcedimento><ans:descricaoProcedimento>{}</ans:descricaoProcedimento></ans:procedimento>",
            CODIGO_TABELA_TUSS,
            escape_xml(&p.codigo_tuss),
            escape_xml(&p.descricao)
        );
        let _ = writeln!(out, "              <ans:quantidadeExecutada>{}</ans:quantidadeExecutada>", p.quantidade);
        let _ = writeln!(out, "              <ans:valorUnitario>{}</ans:valorUnitario>", money(p.valor_unitario));
        let _ = writeln!(out, "              <ans:valorTotal>{}</ans:valorTotal>", money(p.valor_total));
        let _ = writeln!(out, "            </ans:procedimentoExecutado>");
    }
    let _ = writeln!(out, "          </ans:procedimentosExecutados>");
    let _ = writeln!(
        out,
        "          <ans:valorTotal><ans:valorTotalGeral>{}</ans:valorTotalGeral></ans:valorTotal>",
        money(guide.valor_total)
    );
    let _ = writeln!(out, "        </ans:{}>", element);
}

/// Escape text content for XML.
pub fn escape_xml(s: &str) -> String {
    let mut escaped = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&apos;"),
            _ => escaped.push(c),
        }
    }
    escaped
}

//! In-memory TUSS code table.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use strsim::{jaro_winkler, normalized_levenshtein};
use thiserror::Error;
use tracing::debug;

use clinica_core::tiss::is_tuss_code_format;

/// Minimum similarity for a search hit.
const MIN_SEARCH_SCORE: f64 = 0.55;

#[derive(Error, Debug)]
pub enum TussError {
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid TUSS code: '{0}'")]
    InvalidCode(String),

    #[error("Duplicate TUSS code: {0}")]
    DuplicateCode(String),
}

pub type TussResult<T> = Result<T, TussError>;

fn default_true() -> bool {
    true
}

/// One row of the TUSS table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TussEntry {
    #[serde(alias = "code", alias = "codigoTuss")]
    pub codigo: String,
    #[serde(alias = "description", alias = "termo")]
    pub descricao: String,
    /// Reference price negotiated with operators, if any.
    #[serde(default, alias = "valorReferencia", alias = "reference_price")]
    pub valor_referencia: Option<Decimal>,
    /// Codes retired from the table stay loadable but are not billable.
    #[serde(default = "default_true", alias = "active")]
    pub ativo: bool,
}

impl TussEntry {
    pub fn new(codigo: impl Into<String>, descricao: impl Into<String>) -> Self {
        Self {
            codigo: codigo.into(),
            descricao: descricao.into(),
            valor_referencia: None,
            ativo: true,
        }
    }

    pub fn with_reference_price(mut self, valor: Decimal) -> Self {
        self.valor_referencia = Some(valor);
        self
    }

    pub fn inactive(mut self) -> Self {
        self.ativo = false;
        self
    }
}

/// A ranked search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct TussMatch<'a> {
    pub entry: &'a TussEntry,
    pub score: f64,
}

#[derive(Debug, Clone, Default)]
pub struct TussTable {
    entries: BTreeMap<String, TussEntry>,
}

impl TussTable {
    /// Build a table, rejecting malformed and duplicate codes.
    pub fn from_entries(entries: impl IntoIterator<Item = TussEntry>) -> TussResult<Self> {
        let mut map = BTreeMap::new();
        for mut entry in entries {
            entry.codigo = entry.codigo.trim().to_string();
            if !is_tuss_code_format(&entry.codigo) {
                return Err(TussError::InvalidCode(entry.codigo));
            }
            if map.contains_key(&entry.codigo) {
                return Err(TussError::DuplicateCode(entry.codigo));
            }
            map.insert(entry.codigo.clone(), entry);
        }
        debug!(entries = map.len(), "TUSS table built");
        Ok(Self { entries: map })
    }

    /// Parse a JSON array of entries.
    pub fn from_json_str(json: &str) -> TussResult<Self> {
        let entries: Vec<TussEntry> = serde_json::from_str(json)?;
        Self::from_entries(entries)
    }

    /// Load a JSON table from disk.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("reading TUSS table {}", path.display()))?;
        let table = Self::from_json_str(&raw)
            .with_context(|| format!("parsing TUSS table {}", path.display()))?;
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn lookup(&self, codigo: &str) -> Option<&TussEntry> {
        self.entries.get(codigo.trim())
    }

    /// Active entries ranked by description similarity, best first.
    pub fn search(&self, descricao: &str, limit: usize) -> Vec<TussMatch<'_>> {
        let query = normalize(descricao);
        if query.is_empty() || limit == 0 {
            return Vec::new();
        }

        let mut hits: Vec<TussMatch<'_>> = self
            .entries
            .values()
            .filter(|e| e.ativo)
            .map(|entry| TussMatch {
                entry,
                score: description_similarity(&query, &normalize(&entry.descricao)),
            })
            .filter(|m| m.score >= MIN_SEARCH_SCORE)
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.entry.codigo.cmp(&b.entry.codigo))
        });
        hits.truncate(limit);
        hits
    }
}

fn normalize(s: &str) -> String {
    s.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Jaro-Winkler weighted over normalized Levenshtein.
pub(crate) fn description_similarity(a: &str, b: &str) -> f64 {
    let jw = jaro_winkler(a, b);
    let lev = normalized_levenshtein(a, b);
    jw * 0.6 + lev * 0.4
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> TussTable {
        TussTable::from_entries(vec![
            TussEntry::new("10101012", "Consulta em consultório")
                .with_reference_price(Decimal::new(150, 0)),
            TussEntry::new("40301630", "Hemograma com contagem de plaquetas"),
            TussEntry::new("40302040", "Glicose").inactive(),
            TussEntry::new("40304361", "Hemoglobina glicada"),
        ])
        .unwrap()
    }

    #[test]
    fn test_lookup_trims() {
        let table = table();
        assert_eq!(table.len(), 4);
        assert_eq!(table.lookup(" 10101012 ").unwrap().descricao, "Consulta em consultório");
        assert!(table.lookup("99999999").is_none());
    }

    #[test]
    fn test_rejects_bad_and_duplicate_codes() {
        assert!(matches!(
            TussTable::from_entries(vec![TussEntry::new("1010", "x")]),
            Err(TussError::InvalidCode(_))
        ));
        assert!(matches!(
            TussTable::from_entries(vec![
                TussEntry::new("10101012", "a"),
                TussEntry::new("10101012", "b"),
            ]),
            Err(TussError::DuplicateCode(_))
        ));
    }

    #[test]
    fn test_search_ranks_and_skips_inactive() {
        let table = table();
        let hits = table.search("hemograma", 5);
        assert!(!hits.is_empty());
        assert_eq!(hits[0].entry.codigo, "40301630");

        assert!(table.search("glicose", 5).iter().all(|m| m.entry.codigo != "40302040"));
        assert!(table.search("   ", 5).is_empty());
    }

    #[test]
    fn test_json_aliases() {
        let json = r#"[
            {"code": "10101012", "description": "Consulta", "valorReferencia": "120.50"},
            {"codigo": "40301630", "descricao": "Hemograma", "active": false}
        ]"#;
        let table = TussTable::from_json_str(json).unwrap();
        assert_eq!(
            table.lookup("10101012").unwrap().valor_referencia,
            Some(Decimal::new(12050, 2))
        );
        assert!(!table.lookup("40301630").unwrap().ativo);
    }
}

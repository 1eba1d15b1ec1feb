//! TISS lot database operations.

use std::collections::BTreeSet;

use rusqlite::{params, OptionalExtension};
use tracing::warn;

use super::{decimal_from_sql, decimal_to_sql, Database, DbError, DbResult};
use crate::models::{LoteStatus, TissLote};

const LOTE_COLUMNS: &str = r#"
    id, numero_lote, operadora_id, status, guia_ids, valor_total, protocolo,
    motivo_rejeicao, artifact_hash, version, created_at, updated_at
"#;

impl Database {
    /// Next sequential lot number.
    pub fn next_numero_lote(&self) -> DbResult<u64> {
        let max: i64 = self.conn.query_row(
            "SELECT COALESCE(MAX(numero_lote), 0) FROM tiss_lotes",
            [],
            |row| row.get(0),
        )?;
        Ok(max as u64 + 1)
    }

    pub fn insert_lote(&self, lote: &TissLote) -> DbResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO tiss_lotes ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                LOTE_COLUMNS
            ),
            params![
                lote.id,
                lote.numero_lote as i64,
                lote.operadora_id,
                lote.status.as_str(),
                serde_json::to_string(&lote.guia_ids)?,
                decimal_to_sql(&lote.valor_total),
                lote.protocolo,
                lote.motivo_rejeicao,
                lote.artifact_hash,
                lote.version,
                lote.created_at,
                lote.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Compare-and-set write; bumps `lote.version` on success.
    pub fn update_lote(&self, lote: &mut TissLote) -> DbResult<()> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE tiss_lotes SET
                status = ?3,
                guia_ids = ?4,
                valor_total = ?5,
                protocolo = ?6,
                motivo_rejeicao = ?7,
                artifact_hash = ?8,
                updated_at = ?9,
                version = version + 1
            WHERE id = ?1 AND version = ?2
            "#,
            params![
                lote.id,
                lote.version,
                lote.status.as_str(),
                serde_json::to_string(&lote.guia_ids)?,
                decimal_to_sql(&lote.valor_total),
                lote.protocolo,
                lote.motivo_rejeicao,
                lote.artifact_hash,
                lote.updated_at,
            ],
        )?;

        if rows_affected == 0 {
            if self.get_lote(&lote.id)?.is_none() {
                return Err(DbError::NotFound(format!("lote {}", lote.id)));
            }
            warn!(lote_id = %lote.id, expected = lote.version, "stale lote write rejected");
            return Err(DbError::VersionConflict {
                entity: "lote",
                id: lote.id.clone(),
                expected: lote.version,
            });
        }
        lote.version += 1;
        Ok(())
    }

    pub fn get_lote(&self, id: &str) -> DbResult<Option<TissLote>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM tiss_lotes WHERE id = ?", LOTE_COLUMNS),
                [id],
                LoteRow::from_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    pub fn require_lote(&self, id: &str) -> DbResult<TissLote> {
        self.get_lote(id)?
            .ok_or_else(|| DbError::NotFound(format!("lote {}", id)))
    }

    /// Lots in a given status, newest first.
    pub fn list_lotes_by_status(&self, status: LoteStatus) -> DbResult<Vec<TissLote>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM tiss_lotes WHERE status = ? ORDER BY numero_lote DESC",
            LOTE_COLUMNS
        ))?;
        let rows = stmt.query_map([status.as_str()], LoteRow::from_row)?;

        let mut lotes = Vec::new();
        for row in rows {
            lotes.push(row?.try_into()?);
        }
        Ok(lotes)
    }

    /// Remove a lot row. Only open lots are deleted; guides must be detached first.
    pub fn delete_lote(&self, id: &str) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "DELETE FROM tiss_lotes WHERE id = ? AND status = 'aberto'",
            [id],
        )?;
        Ok(rows_affected > 0)
    }
}

/// Intermediate row struct for database mapping.
struct LoteRow {
    id: String,
    numero_lote: i64,
    operadora_id: String,
    status: String,
    guia_ids: String,
    valor_total: String,
    protocolo: Option<String>,
    motivo_rejeicao: Option<String>,
    artifact_hash: Option<String>,
    version: i64,
    created_at: String,
    updated_at: String,
}

impl LoteRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(LoteRow {
            id: row.get(0)?,
            numero_lote: row.get(1)?,
            operadora_id: row.get(2)?,
            status: row.get(3)?,
            guia_ids: row.get(4)?,
            valor_total: row.get(5)?,
            protocolo: row.get(6)?,
            motivo_rejeicao: row.get(7)?,
            artifact_hash: row.get(8)?,
            version: row.get(9)?,
            created_at: row.get(10)?,
            updated_at: row.get(11)?,
        })
    }
}

impl TryFrom<LoteRow> for TissLote {
    type Error = DbError;

    fn try_from(row: LoteRow) -> Result<Self, Self::Error> {
        let status = LoteStatus::parse(&row.status)
            .ok_or_else(|| DbError::Constraint(format!("Unknown lote status: {}", row.status)))?;
        let guia_ids: BTreeSet<String> = serde_json::from_str(&row.guia_ids)?;

        Ok(TissLote {
            id: row.id,
            numero_lote: row.numero_lote as u64,
            operadora_id: row.operadora_id,
            status,
            guia_ids,
            valor_total: decimal_from_sql("valor_total", &row.valor_total)?,
            protocolo: row.protocolo,
            motivo_rejeicao: row.motivo_rejeicao,
            artifact_hash: row.artifact_hash,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Operadora;
    use rust_decimal::Decimal;

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

    #[test]
    fn test_numbering_is_sequential() {
        let db = setup_db();
        assert_eq!(db.next_numero_lote().unwrap(), 1);
        db.insert_lote(&TissLote::new(1, "op-1")).unwrap();
        assert_eq!(db.next_numero_lote().unwrap(), 2);
        assert!(db.insert_lote(&TissLote::new(1, "op-1")).is_err());
    }

    #[test]
    fn test_update_and_conflict() {
        let db = setup_db();
        let lote = TissLote::new(1, "op-1");
        db.insert_lote(&lote).unwrap();

        let mut a = db.require_lote(&lote.id).unwrap();
        let mut b = db.require_lote(&lote.id).unwrap();
        a.guia_ids.insert("g1".into());
        a.valor_total = Decimal::new(10, 0);
        db.update_lote(&mut a).unwrap();

        b.status = LoteStatus::Fechado;
        assert!(matches!(
            db.update_lote(&mut b),
            Err(DbError::VersionConflict { entity: "lote", .. })
        ));

        let stored = db.require_lote(&lote.id).unwrap();
        assert_eq!(stored.status, LoteStatus::Aberto);
        assert_eq!(stored.guia_ids.len(), 1);
        assert_eq!(stored.version, 1);
    }

    #[test]
    fn test_only_open_lotes_deleted() {
        let db = setup_db();
        let mut lote = TissLote::new(1, "op-1");
        lote.status = LoteStatus::Enviado;
        db.insert_lote(&lote).unwrap();
        assert!(!db.delete_lote(&lote.id).unwrap());
        assert_eq!(db.list_lotes_by_status(LoteStatus::Enviado).unwrap().len(), 1);
    }
}

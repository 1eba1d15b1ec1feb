//! TISS guide database operations.
//!
//! Updates are compare-and-set on `version`: a writer that read an older
//! version gets [`DbError::VersionConflict`] instead of overwriting.

use rusqlite::{params, OptionalExtension};
use tracing::warn;

use super::{decimal_from_sql, decimal_to_sql, Database, DbError, DbResult};
use crate::models::{DoctorId, GuideStatus, TipoGuia, TissGuide};

const GUIDE_COLUMNS: &str = r#"
    id, numero_guia_prestador, tipo_guia, operadora_id, beneficiario, doctor_id,
    data_atendimento, senha_autorizacao, status, procedimentos, valor_total,
    valor_glosado, valor_pago, motivo_glosa, lote_id, locked, version,
    created_at, updated_at
"#;

impl Database {
    /// Insert a new guide.
    pub fn insert_guide(&self, guide: &TissGuide) -> DbResult<()> {
        self.conn.execute(
            &format!(
                "INSERT INTO tiss_guides ({}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19)",
                GUIDE_COLUMNS
            ),
            params![
                guide.id,
                guide.numero_guia_prestador,
                guide.tipo_guia.as_str(),
                guide.operadora_id,
                serde_json::to_string(&guide.beneficiario)?,
                guide.doctor_id.as_ref().map(DoctorId::as_str),
                guide.data_atendimento.map(|d| d.to_string()),
                guide.senha_autorizacao,
                guide.status.as_str(),
                serde_json::to_string(&guide.procedimentos)?,
                decimal_to_sql(&guide.valor_total),
                decimal_to_sql(&guide.valor_glosado),
                decimal_to_sql(&guide.valor_pago),
                guide.motivo_glosa,
                guide.lote_id,
                guide.locked,
                guide.version,
                guide.created_at,
                guide.updated_at,
            ],
        )?;
        Ok(())
    }

    /// Write a guide if nobody else changed it since it was read.
    ///
    /// On success `guide.version` is bumped to the stored version.
    pub fn update_guide(&self, guide: &mut TissGuide) -> DbResult<()> {
        let rows_affected = self.conn.execute(
            r#"
            UPDATE tiss_guides SET
                tipo_guia = ?3,
                operadora_id = ?4,
                beneficiario = ?5,
                doctor_id = ?6,
                data_atendimento = ?7,
                senha_autorizacao = ?8,
                status = ?9,
                procedimentos = ?10,
                valor_total = ?11,
                valor_glosado = ?12,
                valor_pago = ?13,
                motivo_glosa = ?14,
                lote_id = ?15,
                locked = ?16,
                updated_at = ?17,
                version = version + 1
            WHERE id = ?1 AND version = ?2
            "#,
            params![
                guide.id,
                guide.version,
                guide.tipo_guia.as_str(),
                guide.operadora_id,
                serde_json::to_string(&guide.beneficiario)?,
                guide.doctor_id.as_ref().map(DoctorId::as_str),
                guide.data_atendimento.map(|d| d.to_string()),
                guide.senha_autorizacao,
                guide.status.as_str(),
                serde_json::to_string(&guide.procedimentos)?,
                decimal_to_sql(&guide.valor_total),
                decimal_to_sql(&guide.valor_glosado),
                decimal_to_sql(&guide.valor_pago),
                guide.motivo_glosa,
                guide.lote_id,
                guide.locked,
                guide.updated_at,
            ],
        )?;

        if rows_affected == 0 {
            return Err(self.guide_write_failure(&guide.id, guide.version)?);
        }
        guide.version += 1;
        Ok(())
    }

    fn guide_write_failure(&self, id: &str, expected: i64) -> DbResult<DbError> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM tiss_guides WHERE id = ?)",
            [id],
            |row| row.get(0),
        )?;
        if !exists {
            return Ok(DbError::NotFound(format!("guide {}", id)));
        }
        warn!(guide_id = %id, expected, "stale guide write rejected");
        Ok(DbError::VersionConflict {
            entity: "guide",
            id: id.to_string(),
            expected,
        })
    }

    /// Get a guide by ID.
    pub fn get_guide(&self, id: &str) -> DbResult<Option<TissGuide>> {
        self.conn
            .query_row(
                &format!("SELECT {} FROM tiss_guides WHERE id = ?", GUIDE_COLUMNS),
                [id],
                GuideRow::from_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Get a guide, failing if it does not exist.
    pub fn require_guide(&self, id: &str) -> DbResult<TissGuide> {
        self.get_guide(id)?
            .ok_or_else(|| DbError::NotFound(format!("guide {}", id)))
    }

    /// Guides of one lot, ordered by provider guide number.
    pub fn list_guides_for_lote(&self, lote_id: &str) -> DbResult<Vec<TissGuide>> {
        self.query_guides(
            &format!(
                "SELECT {} FROM tiss_guides WHERE lote_id = ? ORDER BY numero_guia_prestador, id",
                GUIDE_COLUMNS
            ),
            [lote_id],
        )
    }

    pub fn list_guides_by_status(&self, status: GuideStatus) -> DbResult<Vec<TissGuide>> {
        self.query_guides(
            &format!(
                "SELECT {} FROM tiss_guides WHERE status = ? ORDER BY created_at DESC",
                GUIDE_COLUMNS
            ),
            [status.as_str()],
        )
    }

    /// Validated guides of an operator that are not in any lot.
    pub fn list_loteable_guides(&self, operadora_id: &str) -> DbResult<Vec<TissGuide>> {
        self.query_guides(
            &format!(
                "SELECT {} FROM tiss_guides
                 WHERE operadora_id = ? AND status = 'validado' AND lote_id IS NULL AND locked = 0
                 ORDER BY created_at",
                GUIDE_COLUMNS
            ),
            [operadora_id],
        )
    }

    /// Guides executed by one doctor.
    pub fn list_guides_for_doctor(&self, doctor_id: &DoctorId) -> DbResult<Vec<TissGuide>> {
        self.query_guides(
            &format!(
                "SELECT {} FROM tiss_guides WHERE doctor_id = ? ORDER BY created_at DESC",
                GUIDE_COLUMNS
            ),
            [doctor_id.as_str()],
        )
    }

    /// Delete a guide. The schema refuses locked or submitted guides.
    pub fn delete_guide(&self, id: &str) -> DbResult<bool> {
        let rows_affected = self
            .conn
            .execute("DELETE FROM tiss_guides WHERE id = ?", [id])?;
        Ok(rows_affected > 0)
    }

    fn query_guides<P: rusqlite::Params>(&self, sql: &str, params: P) -> DbResult<Vec<TissGuide>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, GuideRow::from_row)?;

        let mut guides = Vec::new();
        for row in rows {
            guides.push(row?.try_into()?);
        }
        Ok(guides)
    }
}

/// Intermediate row struct for database mapping.
struct GuideRow {
    id: String,
    numero_guia_prestador: String,
    tipo_guia: String,
    operadora_id: String,
    beneficiario: String,
    doctor_id: Option<String>,
    data_atendimento: Option<String>,
    senha_autorizacao: Option<String>,
    status: String,
    procedimentos: String,
    valor_total: String,
    valor_glosado: String,
    valor_pago: String,
    motivo_glosa: Option<String>,
    lote_id: Option<String>,
    locked: bool,
    version: i64,
    created_at: String,
    updated_at: String,
}

impl GuideRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(GuideRow {
            id: row.get(0)?,
            numero_guia_prestador: row.get(1)?,
            tipo_guia: row.get(2)?,
            operadora_id: row.get(3)?,
            beneficiario: row.get(4)?,
            doctor_id: row.get(5)?,
            data_atendimento: row.get(6)?,
            senha_autorizacao: row.get(7)?,
            status: row.get(8)?,
            procedimentos: row.get(9)?,
            valor_total: row.get(10)?,
            valor_glosado: row.get(11)?,
            valor_pago: row.get(12)?,
            motivo_glosa: row.get(13)?,
            lote_id: row.get(14)?,
            locked: row.get(15)?,
            version: row.get(16)?,
            created_at: row.get(17)?,
            updated_at: row.get(18)?,
        })
    }
}

impl TryFrom<GuideRow> for TissGuide {
    type Error = DbError;

    fn try_from(row: GuideRow) -> Result<Self, Self::Error> {
        let tipo_guia = TipoGuia::parse(&row.tipo_guia)
            .ok_or_else(|| DbError::Constraint(format!("Unknown guide type: {}", row.tipo_guia)))?;
        let status = GuideStatus::parse(&row.status)
            .ok_or_else(|| DbError::Constraint(format!("Unknown guide status: {}", row.status)))?;
        let data_atendimento = row
            .data_atendimento
            .map(|d| {
                d.parse::<chrono::NaiveDate>()
                    .map_err(|_| DbError::Constraint(format!("Invalid attendance date: {}", d)))
            })
            .transpose()?;

        let mut guide = TissGuide {
            id: row.id,
            numero_guia_prestador: row.numero_guia_prestador,
            tipo_guia,
            operadora_id: row.operadora_id,
            beneficiario: serde_json::from_str(&row.beneficiario)?,
            doctor_id: row.doctor_id.map(DoctorId),
            data_atendimento,
            senha_autorizacao: row.senha_autorizacao,
            status,
            procedimentos: serde_json::from_str(&row.procedimentos)?,
            valor_total: decimal_from_sql("valor_total", &row.valor_total)?,
            valor_glosado: decimal_from_sql("valor_glosado", &row.valor_glosado)?,
            valor_pago: decimal_from_sql("valor_pago", &row.valor_pago)?,
            motivo_glosa: row.motivo_glosa,
            lote_id: row.lote_id,
            locked: row.locked,
            version: row.version,
            created_at: row.created_at,
            updated_at: row.updated_at,
        };

        // Stored totals are derived data; trust the procedure lines.
        let stored_total = guide.valor_total;
        guide.recalculate();
        if guide.valor_total != stored_total {
            warn!(guide_id = %guide.id, stored = %stored_total, computed = %guide.valor_total, "guide total recomputed on load");
        }
        Ok(guide)
    }
}

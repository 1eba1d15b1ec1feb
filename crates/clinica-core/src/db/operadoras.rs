//! Health-plan operator database operations.

use rusqlite::{params, OptionalExtension};

use super::{Database, DbResult};
use crate::models::Operadora;

impl Database {
    pub fn upsert_operadora(&self, operadora: &Operadora) -> DbResult<()> {
        self.conn.execute(
            r#"
            INSERT INTO operadoras (id, nome, registro_ans, codigo_prestador)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(id) DO UPDATE SET
                nome = excluded.nome,
                registro_ans = excluded.registro_ans,
                codigo_prestador = excluded.codigo_prestador
            "#,
            params![
                operadora.id,
                operadora.nome,
                operadora.registro_ans,
                operadora.codigo_prestador,
            ],
        )?;
        Ok(())
    }

    pub fn get_operadora(&self, id: &str) -> DbResult<Option<Operadora>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, nome, registro_ans, codigo_prestador FROM operadoras WHERE id = ?",
                [id],
                |row| {
                    Ok(Operadora {
                        id: row.get(0)?,
                        nome: row.get(1)?,
                        registro_ans: row.get(2)?,
                        codigo_prestador: row.get(3)?,
                    })
                },
            )
            .optional()?)
    }
}

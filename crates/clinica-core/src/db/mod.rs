//! SQLite persistence for the roster, secretary grants, and TISS billing.

mod schema;
mod roster;
mod grants;
mod operadoras;
mod guides;
mod lotes;

pub use schema::*;

use std::path::Path;
use std::str::FromStr;

use rusqlite::Connection;
use rust_decimal::Decimal;
use thiserror::Error;

/// Database errors.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Constraint violation: {0}")]
    Constraint(String),

    /// Row changed since it was read; reload and retry.
    #[error("Version conflict on {entity} {id}: expected version {expected}")]
    VersionConflict {
        entity: &'static str,
        id: String,
        expected: i64,
    },
}

pub type DbResult<T> = Result<T, DbError>;

/// Database connection wrapper.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open database at path, creating if needed.
    pub fn open<P: AsRef<Path>>(path: P) -> DbResult<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    /// Create in-memory database (for testing).
    pub fn open_in_memory() -> DbResult<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.initialize()?;
        Ok(db)
    }

    fn initialize(&self) -> DbResult<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Get raw connection (for advanced queries).
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside a transaction; commits on `Ok`, rolls back on `Err`.
    pub fn atomically<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&Database) -> Result<T, E>,
        E: From<DbError>,
    {
        let tx = self.conn.unchecked_transaction().map_err(DbError::from)?;
        let value = f(self)?;
        tx.commit().map_err(DbError::from)?;
        Ok(value)
    }
}

pub(crate) fn decimal_to_sql(value: &Decimal) -> String {
    value.normalize().to_string()
}

pub(crate) fn decimal_from_sql(column: &str, raw: &str) -> DbResult<Decimal> {
    Decimal::from_str(raw)
        .map_err(|e| DbError::Constraint(format!("Invalid decimal in {}: '{}' ({})", column, raw, e)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_in_memory() {
        let db = Database::open_in_memory();
        assert!(db.is_ok());
    }

    #[test]
    fn test_schema_initialized() {
        let db = Database::open_in_memory().unwrap();

        let tables: Vec<String> = db
            .conn()
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .filter_map(|r| r.ok())
            .collect();

        for table in ["doctors", "secretary_grants", "operadoras", "tiss_guides", "tiss_lotes"] {
            assert!(tables.contains(&table.to_string()), "missing {}", table);
        }
    }

    #[test]
    fn test_atomically_rolls_back() {
        let db = Database::open_in_memory().unwrap();
        let result: DbResult<()> = db.atomically(|db| {
            db.conn()
                .execute("INSERT INTO operadoras (id, nome, registro_ans, codigo_prestador) VALUES ('op', 'X', '1', '2')", [])?;
            Err(DbError::Constraint("abort".into()))
        });
        assert!(result.is_err());
        assert!(db.get_operadora("op").unwrap().is_none());
    }

    #[test]
    fn test_decimal_round_trip_text() {
        let value = Decimal::new(15050, 2);
        assert_eq!(decimal_from_sql("v", &decimal_to_sql(&value)).unwrap(), value);
        assert!(decimal_from_sql("v", "abc").is_err());
    }
}

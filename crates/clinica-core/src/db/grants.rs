//! Secretary grant database operations.

use rusqlite::{params, OptionalExtension};

use super::{Database, DbError, DbResult};
use crate::models::{DoctorId, ScopeType, SecretaryGrant};

impl Database {
    /// Insert or replace the grant of a secretary user.
    pub fn upsert_secretary_grant(&self, user_id: &str, grant: &SecretaryGrant) -> DbResult<()> {
        let ids_json = serde_json::to_string(&grant.scope_doctor_ids)?;
        let permissions_json = serde_json::to_string(&grant.permissions)?;

        self.conn.execute(
            r#"
            INSERT INTO secretary_grants (user_id, scope_type, scope_doctor_ids, permissions)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT(user_id) DO UPDATE SET
                scope_type = excluded.scope_type,
                scope_doctor_ids = excluded.scope_doctor_ids,
                permissions = excluded.permissions,
                updated_at = datetime('now')
            "#,
            params![user_id, grant.scope_type.as_str(), ids_json, permissions_json],
        )?;
        Ok(())
    }

    pub fn get_secretary_grant(&self, user_id: &str) -> DbResult<Option<SecretaryGrant>> {
        let row = self
            .conn
            .query_row(
                "SELECT scope_type, scope_doctor_ids, permissions FROM secretary_grants WHERE user_id = ?",
                [user_id],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                },
            )
            .optional()?;

        let Some((scope_type, ids_json, permissions_json)) = row else {
            return Ok(None);
        };
        let scope_type = ScopeType::parse(&scope_type)
            .ok_or_else(|| DbError::Constraint(format!("Unknown scope type: {}", scope_type)))?;
        let ids: Vec<DoctorId> = serde_json::from_str(&ids_json)?;
        let grant = SecretaryGrant::new(scope_type, ids)
            .with_permissions(serde_json::from_str(&permissions_json)?);
        Ok(Some(grant))
    }

    pub fn delete_secretary_grant(&self, user_id: &str) -> DbResult<bool> {
        let rows_affected = self
            .conn
            .execute("DELETE FROM secretary_grants WHERE user_id = ?", [user_id])?;
        Ok(rows_affected > 0)
    }
}

//! Doctor roster database operations.

use rusqlite::{params, OptionalExtension};

use super::{Database, DbError, DbResult};
use crate::models::{DoctorId, DoctorRosterEntry, RawDoctorRecord};

impl Database {
    /// Insert or replace a roster entry.
    pub fn upsert_doctor(&self, entry: &DoctorRosterEntry) -> DbResult<()> {
        let permissions_json = serde_json::to_string(&entry.additional_permissions)?;

        self.conn.execute(
            r#"
            INSERT INTO doctors (
                doctor_id, name, specialty, association_type, active, additional_permissions
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
            ON CONFLICT(doctor_id) DO UPDATE SET
                name = excluded.name,
                specialty = excluded.specialty,
                association_type = excluded.association_type,
                active = excluded.active,
                additional_permissions = excluded.additional_permissions,
                updated_at = datetime('now')
            "#,
            params![
                entry.doctor_id.as_str(),
                entry.name,
                entry.specialty,
                entry.association_type.as_str(),
                entry.active,
                permissions_json,
            ],
        )?;
        Ok(())
    }

    /// Soft-delete a doctor. The row stays so historical guides still resolve.
    pub fn deactivate_doctor(&self, doctor_id: &DoctorId) -> DbResult<bool> {
        let rows_affected = self.conn.execute(
            "UPDATE doctors SET active = 0, updated_at = datetime('now') WHERE doctor_id = ?",
            [doctor_id.as_str()],
        )?;
        Ok(rows_affected > 0)
    }

    /// Get a roster entry by doctor id, active or not.
    pub fn get_doctor(&self, doctor_id: &DoctorId) -> DbResult<Option<DoctorRosterEntry>> {
        self.conn
            .query_row(
                r#"
                SELECT doctor_id, name, specialty, association_type, active, additional_permissions
                FROM doctors
                WHERE doctor_id = ?
                "#,
                [doctor_id.as_str()],
                DoctorRow::from_row,
            )
            .optional()?
            .map(|row| row.try_into())
            .transpose()
    }

    /// Full roster, including deactivated doctors, ordered by name.
    pub fn list_roster(&self) -> DbResult<Vec<DoctorRosterEntry>> {
        let mut stmt = self.conn.prepare(
            r#"
            SELECT doctor_id, name, specialty, association_type, active, additional_permissions
            FROM doctors
            ORDER BY name, doctor_id
            "#,
        )?;

        let rows = stmt.query_map([], DoctorRow::from_row)?;

        let mut roster = Vec::new();
        for row in rows {
            roster.push(row?.try_into()?);
        }
        Ok(roster)
    }

    /// Load a roster export (JSON array in any supported record shape).
    pub fn import_roster_json(&self, json: &str) -> DbResult<usize> {
        let records: Vec<RawDoctorRecord> = serde_json::from_str(json)?;
        self.atomically(|db| {
            let mut count = 0;
            for record in records {
                let entry = DoctorRosterEntry::try_from(record)
                    .map_err(|e| DbError::Constraint(e.to_string()))?;
                db.upsert_doctor(&entry)?;
                count += 1;
            }
            Ok(count)
        })
    }
}

/// Intermediate row struct for database mapping.
struct DoctorRow {
    doctor_id: String,
    name: String,
    specialty: Option<String>,
    association_type: String,
    active: bool,
    additional_permissions: String,
}

impl DoctorRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(DoctorRow {
            doctor_id: row.get(0)?,
            name: row.get(1)?,
            specialty: row.get(2)?,
            association_type: row.get(3)?,
            active: row.get(4)?,
            additional_permissions: row.get(5)?,
        })
    }
}

impl TryFrom<DoctorRow> for DoctorRosterEntry {
    type Error = DbError;

    fn try_from(row: DoctorRow) -> Result<Self, Self::Error> {
        // Stored rows go through the same normalization as imported records.
        let record = RawDoctorRecord {
            doctor_id: Some(row.doctor_id),
            name: Some(row.name),
            specialty: row.specialty,
            association_type: Some(row.association_type),
            active: Some(row.active),
            additional_permissions: Some(serde_json::from_str(&row.additional_permissions)?),
            ..Default::default()
        };
        DoctorRosterEntry::try_from(record).map_err(|e| DbError::Constraint(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::AssociationType;

    fn setup_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_upsert_and_get() {
        let db = setup_db();
        let mut entry = DoctorRosterEntry::new("D1", "Dra. Ana");
        entry.association_type = AssociationType::Partner;
        entry.additional_permissions.can_view_financial = true;
        db.upsert_doctor(&entry).unwrap();

        let loaded = db.get_doctor(&DoctorId::from("D1")).unwrap().unwrap();
        assert_eq!(loaded, entry);

        entry.name = "Dra. Ana Souza".into();
        db.upsert_doctor(&entry).unwrap();
        assert_eq!(db.list_roster().unwrap().len(), 1);
        assert_eq!(db.list_roster().unwrap()[0].name, "Dra. Ana Souza");
    }

    #[test]
    fn test_deactivate_keeps_row() {
        let db = setup_db();
        db.upsert_doctor(&DoctorRosterEntry::new("D1", "A")).unwrap();
        assert!(db.deactivate_doctor(&DoctorId::from("D1")).unwrap());
        assert!(!db.deactivate_doctor(&DoctorId::from("D9")).unwrap());

        let loaded = db.get_doctor(&DoctorId::from("D1")).unwrap().unwrap();
        assert!(!loaded.active);
    }

    #[test]
    fn test_import_legacy_shapes() {
        let db = setup_db();
        let json = r#"[
            {"id": "D1", "full_name": "Dr. Bruno", "role": "socio", "is_active": true},
            {"doctorId": "D2", "name": "Dra. Carla", "status": "inactive"}
        ]"#;
        assert_eq!(db.import_roster_json(json).unwrap(), 2);

        let d1 = db.get_doctor(&DoctorId::from("D1")).unwrap().unwrap();
        assert_eq!(d1.association_type, AssociationType::Partner);
        let d2 = db.get_doctor(&DoctorId::from("D2")).unwrap().unwrap();
        assert!(!d2.active);
    }

    #[test]
    fn test_import_is_all_or_nothing() {
        let db = setup_db();
        let json = r#"[{"id": "D1", "name": "A"}, {"name": "sem id"}]"#;
        assert!(db.import_roster_json(json).is_err());
        assert!(db.list_roster().unwrap().is_empty());
    }
}

// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! NIST 800-53 families, controls and the CCIs mapped onto them

use rusqlite::{Connection, OptionalExtension, Row, ToSql, params};
use tracing::warn;

use super::{Database, map_constraint, pluralize};
use crate::model::{Cci, Control, ControlRef, FALLBACK_CCI, Family, Stig, format_cci, sanitize};
use crate::{Result, StigqterError};

const CCI_COLUMNS: &str = "id, ControlId, cci, definition, isImport, importCompliance, \
                           importDateTested, importTestedBy, importTestResults";

fn row_to_family(row: &Row) -> rusqlite::Result<Family> {
    Ok(Family {
        id: row.get(0)?,
        acronym: row.get(1)?,
        description: row.get::<_, Option<String>>(2)?.unwrap_or_default(),
    })
}

fn row_to_control(row: &Row) -> rusqlite::Result<Control> {
    Ok(Control {
        id: row.get(0)?,
        family_id: row.get(1)?,
        number: row.get(2)?,
        enhancement: row.get(3)?,
        title: row.get::<_, Option<String>>(4)?.unwrap_or_default(),
        description: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
    })
}

fn row_to_cci(row: &Row) -> rusqlite::Result<Cci> {
    Ok(Cci {
        id: row.get(0)?,
        control_id: row.get(1)?,
        cci: row.get(2)?,
        definition: row.get::<_, Option<String>>(3)?.unwrap_or_default(),
        is_import: row.get::<_, i64>(4)? != 0,
        import_compliance: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        import_date_tested: row.get::<_, Option<String>>(6)?.unwrap_or_default(),
        import_tested_by: row.get::<_, Option<String>>(7)?.unwrap_or_default(),
        import_test_results: row.get::<_, Option<String>>(8)?.unwrap_or_default(),
    })
}

fn select_ccis(conn: &Connection, clause: &str, args: &[&dyn ToSql]) -> Result<Vec<Cci>> {
    let sql = format!("SELECT {} FROM CCI {} ORDER BY cci", CCI_COLUMNS, clause);
    let mut stmt = conn.prepare(&sql)?;
    let ccis = stmt.query_map(args, row_to_cci)?.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(ccis)
}

fn family_by_acronym(conn: &Connection, acronym: &str) -> Result<Option<Family>> {
    let family = conn
        .query_row(
            "SELECT id, Acronym, Description FROM Family WHERE Acronym = ?1",
            params![acronym],
            row_to_family,
        )
        .optional()?;
    Ok(family)
}

fn control_by_ref(conn: &Connection, family_id: i64, control: &ControlRef) -> Result<Option<Control>> {
    let found = conn
        .query_row(
            r#"SELECT id, FamilyId, number, enhancement, title, description FROM Control
               WHERE FamilyId = ?1 AND number = ?2 AND enhancement IS ?3"#,
            params![family_id, control.number, control.enhancement],
            row_to_control,
        )
        .optional()?;
    Ok(found)
}

impl Database {
    /// Add a control family
    pub fn add_family(&self, acronym: &str, description: &str) -> Result<Family> {
        let conn = self.lock_conn()?;
        let acronym = acronym.trim().to_uppercase();
        let description = sanitize(description);
        conn.execute(
            "INSERT INTO Family (Acronym, Description) VALUES (?1, ?2)",
            params![acronym, description],
        )
        .map_err(|e| map_constraint(e, format!("Family {}", acronym)))?;
        Ok(Family {
            id: conn.last_insert_rowid(),
            acronym,
            description,
        })
    }

    pub fn get_family(&self, acronym: &str) -> Result<Option<Family>> {
        let conn = self.lock_conn()?;
        family_by_acronym(&conn, &acronym.trim().to_uppercase())
    }

    pub fn get_family_by_id(&self, id: i64) -> Result<Option<Family>> {
        let conn = self.lock_conn()?;
        let family = conn
            .query_row(
                "SELECT id, Acronym, Description FROM Family WHERE id = ?1",
                params![id],
                row_to_family,
            )
            .optional()?;
        Ok(family)
    }

    pub fn get_families(&self) -> Result<Vec<Family>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT id, Acronym, Description FROM Family ORDER BY Acronym")?;
        let families = stmt.query_map([], row_to_family)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(families)
    }

    /// Add a control given in human-readable form (`AC-2 (1)`).
    ///
    /// The family must already be present.
    pub fn add_control(&self, name: &str, title: &str, description: &str) -> Result<Control> {
        let control = ControlRef::parse(name)?;
        let conn = self.lock_conn()?;

        let family = family_by_acronym(&conn, &control.family)?
            .ok_or_else(|| StigqterError::NotFound(format!("Family {}", control.family)))?;

        if control_by_ref(&conn, family.id, &control)?.is_some() {
            return Err(StigqterError::AlreadyExists(format!("Control {}", control)));
        }

        conn.execute(
            r#"INSERT INTO Control (FamilyId, number, enhancement, title, description)
               VALUES (?1, ?2, ?3, ?4, ?5)"#,
            params![family.id, control.number, control.enhancement, title, description],
        )?;

        Ok(Control {
            id: conn.last_insert_rowid(),
            family_id: family.id,
            number: control.number,
            enhancement: control.enhancement,
            title: title.to_string(),
            description: description.to_string(),
        })
    }

    pub fn get_control(&self, id: i64) -> Result<Option<Control>> {
        let conn = self.lock_conn()?;
        let control = conn
            .query_row(
                "SELECT id, FamilyId, number, enhancement, title, description FROM Control WHERE id = ?1",
                params![id],
                row_to_control,
            )
            .optional()?;
        Ok(control)
    }

    /// Look up a control by name. A name without an enhancement only
    /// matches the base control.
    pub fn find_control(&self, name: &str) -> Result<Option<Control>> {
        let control = ControlRef::parse(name)?;
        let conn = self.lock_conn()?;
        match family_by_acronym(&conn, &control.family)? {
            Some(family) => control_by_ref(&conn, family.id, &control),
            None => Ok(None),
        }
    }

    pub fn get_controls(&self) -> Result<Vec<Control>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            r#"SELECT Control.id, FamilyId, number, enhancement, title, description
               FROM Control JOIN Family ON Family.id = Control.FamilyId
               ORDER BY Family.Acronym, number, enhancement"#,
        )?;
        let controls = stmt.query_map([], row_to_control)?.collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(controls)
    }

    /// Human-readable name of a stored control (`AC-2 (1)`)
    pub fn control_name(&self, control: &Control) -> Result<String> {
        let family = self
            .get_family_by_id(control.family_id)?
            .map(|f| f.acronym)
            .unwrap_or_else(|| "??".to_string());
        Ok(ControlRef {
            family,
            number: control.number,
            enhancement: control.enhancement,
        }
        .to_string())
    }

    /// Add a CCI; the CCI number must be new. Sets `cci.id`.
    pub fn add_cci(&self, cci: &mut Cci) -> Result<()> {
        let conn = self.lock_conn()?;
        let exists: i64 = conn.query_row(
            "SELECT COUNT(*) FROM CCI WHERE cci = ?1",
            params![cci.cci],
            |row| row.get(0),
        )?;
        if exists > 0 {
            return Err(StigqterError::AlreadyExists(format_cci(cci.cci)));
        }

        conn.execute(
            "INSERT INTO CCI (ControlId, cci, definition) VALUES (?1, ?2, ?3)",
            params![cci.control_id, cci.cci, cci.definition],
        )?;
        cci.id = conn.last_insert_rowid();
        Ok(())
    }

    pub fn get_cci(&self, id: i64) -> Result<Option<Cci>> {
        let conn = self.lock_conn()?;
        Ok(select_ccis(&conn, "WHERE id = ?1", &[&id])?.into_iter().next())
    }

    pub fn get_cci_by_number(&self, cci: i64) -> Result<Option<Cci>> {
        let conn = self.lock_conn()?;
        Ok(select_ccis(&conn, "WHERE cci = ?1", &[&cci])?.into_iter().next())
    }

    pub fn get_ccis(&self) -> Result<Vec<Cci>> {
        let conn = self.lock_conn()?;
        select_ccis(&conn, "", &[])
    }

    /// Find the CCI a STIG rule maps to.
    ///
    /// DISA occasionally maps rules to CCIs that do not exist in 800-53
    /// rev 4; those rules are remapped to CCI-000366. Callers can detect a
    /// remap by comparing the returned number with the requested one.
    pub fn resolve_cci(&self, cci: i64, stig: Option<&Stig>) -> Result<Cci> {
        if let Some(found) = self.get_cci_by_number(cci)? {
            return Ok(found);
        }

        let source = stig.map(|s| s.to_string()).unwrap_or_else(|| "<unknown STIG>".to_string());
        warn!(
            "{} referenced by {} does not exist in NIST 800-53r4; remapping to {}",
            format_cci(cci),
            source,
            format_cci(FALLBACK_CCI)
        );

        self.get_cci_by_number(FALLBACK_CCI)?.ok_or_else(|| {
            StigqterError::NotFound(format!(
                "{} (and fallback {})",
                format_cci(cci),
                format_cci(FALLBACK_CCI)
            ))
        })
    }

    /// Store the eMASS "Latest Test Result" columns on the matching CCI.
    /// Returns false when the CCI number is unknown.
    pub fn import_cci(&self, cci: &Cci) -> Result<bool> {
        let conn = self.lock_conn()?;
        let updated = conn.execute(
            r#"UPDATE CCI SET isImport = ?1, importCompliance = ?2, importDateTested = ?3,
               importTestedBy = ?4, importTestResults = ?5 WHERE cci = ?6"#,
            params![
                cci.is_import as i64,
                cci.import_compliance,
                cci.import_date_tested,
                cci.import_tested_by,
                cci.import_test_results,
                cci.cci
            ],
        )?;
        Ok(updated > 0)
    }

    /// Forget all eMASS import results
    pub fn clear_emass_import(&self) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            r#"UPDATE CCI SET isImport = 0, importCompliance = NULL, importDateTested = NULL,
               importTestedBy = NULL, importTestResults = NULL"#,
            [],
        )?;
        conn.execute("DELETE FROM variables WHERE name = 'emassImport'", [])?;
        Ok(())
    }

    /// Whether any eMASS Test Result Import has been loaded
    pub fn is_emass_import(&self) -> Result<bool> {
        let conn = self.lock_conn()?;
        let imported: i64 = conn.query_row("SELECT COUNT(*) FROM CCI WHERE isImport <> 0", [], |row| row.get(0))?;
        Ok(imported > 0)
    }

    /// Remove all families, controls and CCIs.
    ///
    /// Refused with `InUse` while imported STIG checks still point at the
    /// catalog; delete those STIGs first.
    pub fn delete_ccis(&self) -> Result<()> {
        self.bulk(|db| {
            let conn = db.lock_conn()?;
            let referenced: i64 = conn.query_row(
                "SELECT COUNT(*) FROM STIGCheck WHERE CCIId IS NOT NULL",
                [],
                |row| row.get(0),
            )?;
            if referenced > 0 {
                return Err(StigqterError::InUse(format!(
                    "The CCI catalog cannot be cleared; {} STIG {} still {} mapped to it",
                    referenced,
                    pluralize(referenced as usize, "checks", "check"),
                    pluralize(referenced as usize, "are", "is"),
                )));
            }
            conn.execute_batch("DELETE FROM CCI; DELETE FROM Control; DELETE FROM Family;")?;
            Ok(())
        })
    }

    /// Point STIG checks that were parked on CCI-000366 back at the CCI
    /// their benchmark named, once that CCI is in the catalog. Returns the
    /// number of checks moved.
    pub fn map_unmapped(&self) -> Result<usize> {
        let conn = self.lock_conn()?;
        let moved = conn.execute(
            r#"UPDATE STIGCheck
               SET CCIId = (SELECT id FROM CCI WHERE CCI.cci = STIGCheck.intendedCCI),
                   intendedCCI = NULL
               WHERE intendedCCI IN (SELECT cci FROM CCI)"#,
            [],
        )?;
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::StigCheck;

    fn seeded() -> Database {
        let db = Database::in_memory().unwrap();
        db.add_family("AC", "Access Control").unwrap();
        db.add_family("CM", "Configuration Management").unwrap();
        db.add_control("AC-2", "ACCOUNT MANAGEMENT", "Manage accounts.").unwrap();
        db.add_control("AC-2 (1)", "ACCOUNT MANAGEMENT | AUTOMATED", "").unwrap();
        db.add_control("CM-6", "CONFIGURATION SETTINGS", "").unwrap();
        db
    }

    #[test]
    fn test_family_lookup_and_duplicates() {
        let db = seeded();
        let ac = db.get_family("ac").unwrap().unwrap();
        assert_eq!(ac.description, "Access Control");
        assert_eq!(db.get_family_by_id(ac.id).unwrap().unwrap().acronym, "AC");
        assert!(matches!(
            db.add_family("AC", "Something else"),
            Err(StigqterError::AlreadyExists(_))
        ));
        assert_eq!(db.get_families().unwrap().len(), 2);
    }

    #[test]
    fn test_add_control_requires_family() {
        let db = seeded();
        assert!(matches!(
            db.add_control("ZZ-1", "NOPE", ""),
            Err(StigqterError::NotFound(_))
        ));
        assert!(matches!(
            db.add_control("AC", "BAD", ""),
            Err(StigqterError::InvalidControl(_))
        ));
        assert!(matches!(
            db.add_control("AC-2", "AGAIN", ""),
            Err(StigqterError::AlreadyExists(_))
        ));
    }

    #[test]
    fn test_find_control_distinguishes_enhancements() {
        let db = seeded();
        let base = db.find_control("AC-2").unwrap().unwrap();
        assert_eq!(base.enhancement, None);
        assert_eq!(base.title, "ACCOUNT MANAGEMENT");

        let enhanced = db.find_control("AC-2(1)").unwrap().unwrap();
        assert_eq!(enhanced.enhancement, Some(1));
        assert_eq!(db.control_name(&enhanced).unwrap(), "AC-2 (1)");

        assert!(db.find_control("AC-3").unwrap().is_none());
        assert!(db.find_control("XX-3").unwrap().is_none());
    }

    #[test]
    fn test_add_cci_rejects_duplicates() {
        let db = seeded();
        let control = db.find_control("CM-6").unwrap().unwrap();
        let mut cci = Cci {
            control_id: Some(control.id),
            cci: 366,
            definition: "Implement the security configuration settings.".to_string(),
            ..Cci::default()
        };
        db.add_cci(&mut cci).unwrap();
        assert!(cci.id > 0);

        let mut again = cci.clone();
        assert!(matches!(db.add_cci(&mut again), Err(StigqterError::AlreadyExists(_))));
        assert_eq!(db.get_cci(cci.id).unwrap().unwrap().cci, 366);
    }

    #[test]
    fn test_resolve_cci_remaps_unknown_numbers() {
        let db = seeded();
        assert!(matches!(db.resolve_cci(1, None), Err(StigqterError::NotFound(_))));

        let mut fallback = Cci { cci: FALLBACK_CCI, ..Cci::default() };
        db.add_cci(&mut fallback).unwrap();
        let mut known = Cci { cci: 15, ..Cci::default() };
        db.add_cci(&mut known).unwrap();

        assert_eq!(db.resolve_cci(15, None).unwrap().cci, 15);
        assert_eq!(db.resolve_cci(999_999, None).unwrap().cci, FALLBACK_CCI);
    }

    #[test]
    fn test_import_cci_only_touches_matching_cci() {
        let db = seeded();
        for n in [15, 366] {
            let mut c = Cci { cci: n, ..Cci::default() };
            db.add_cci(&mut c).unwrap();
        }
        assert!(!db.is_emass_import().unwrap());

        let imported = Cci {
            cci: 15,
            is_import: true,
            import_compliance: "Compliant".to_string(),
            import_date_tested: "01-Jan-2020".to_string(),
            import_tested_by: "assessor".to_string(),
            import_test_results: "ok".to_string(),
            ..Cci::default()
        };
        assert!(db.import_cci(&imported).unwrap());
        assert!(!db.import_cci(&Cci { cci: 42, ..imported.clone() }).unwrap());

        assert!(db.is_emass_import().unwrap());
        assert!(db.get_cci_by_number(15).unwrap().unwrap().is_import);
        assert!(!db.get_cci_by_number(366).unwrap().unwrap().is_import);

        db.clear_emass_import().unwrap();
        assert!(!db.is_emass_import().unwrap());
        assert_eq!(db.get_cci_by_number(15).unwrap().unwrap().import_compliance, "");
    }

    #[test]
    fn test_delete_ccis_clears_catalog() {
        let db = seeded();
        let control = db.find_control("CM-6").unwrap().unwrap();
        let mut c = Cci {
            control_id: Some(control.id),
            cci: 366,
            ..Cci::default()
        };
        db.add_cci(&mut c).unwrap();

        db.delete_ccis().unwrap();
        let stats = db.get_stats().unwrap();
        assert_eq!((stats.families, stats.controls, stats.ccis), (0, 0, 0));
    }

    #[test]
    fn test_delete_ccis_refused_while_stigs_use_them() {
        let db = seeded();
        let mut c = Cci { cci: FALLBACK_CCI, ..Cci::default() };
        db.add_cci(&mut c).unwrap();
        let check = StigCheck {
            cci_id: c.id,
            rule: "SV-1r1_rule".to_string(),
            ..StigCheck::default()
        };
        let stig = db.add_stig(&Stig { title: "Sample".to_string(), ..Stig::default() }, &[check], false).unwrap();

        match db.delete_ccis() {
            Err(StigqterError::InUse(msg)) => assert!(msg.contains("1 STIG check is")),
            other => panic!("expected InUse, got {:?}", other),
        }
        assert_eq!(db.get_stats().unwrap().families, 2);

        db.delete_stig(stig.id).unwrap();
        db.delete_ccis().unwrap();
        assert_eq!(db.get_stats().unwrap().ccis, 0);
    }

    #[test]
    fn test_map_unmapped_moves_parked_checks() {
        let db = seeded();
        let mut fallback = Cci { cci: FALLBACK_CCI, ..Cci::default() };
        db.add_cci(&mut fallback).unwrap();
        let parked = StigCheck {
            cci_id: fallback.id,
            intended_cci: Some(15),
            rule: "SV-1r1_rule".to_string(),
            ..StigCheck::default()
        };
        let stig = db.add_stig(&Stig { title: "Sample".to_string(), ..Stig::default() }, &[parked], false).unwrap();

        assert_eq!(db.map_unmapped().unwrap(), 0);

        let mut real = Cci { cci: 15, ..Cci::default() };
        db.add_cci(&mut real).unwrap();
        assert_eq!(db.map_unmapped().unwrap(), 1);

        let check = db.get_stig_check_by_rule(stig.id, "SV-1r1_rule").unwrap().unwrap();
        assert_eq!(check.cci_id, real.id);
        assert_eq!(check.intended_cci, None);
        assert_eq!(db.map_unmapped().unwrap(), 0);
    }
}

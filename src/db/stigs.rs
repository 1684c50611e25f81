// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! STIG benchmarks and their checks

use rusqlite::{Connection, OptionalExtension, Row, ToSql, params};
use tracing::{debug, info};

use super::{Database, pluralize};
use crate::model::{Severity, Stig, StigCheck};
use crate::{Result, StigqterError};

const STIG_COLUMNS: &str = "STIG.id, STIG.title, STIG.description, STIG.release, STIG.version, \
                            STIG.benchmarkId, STIG.fileName";

const CHECK_COLUMNS: &str = "id, STIGId, CCIId, rule, vulnNum, groupTitle, ruleVersion, severity, \
                             weight, title, vulnDiscussion, falsePositives, falseNegatives, fix, \
                             `check`, documentable, mitigations, severityOverrideGuidance, \
                             checkContentRef, potentialImpact, thirdPartyTools, mitigationControl, \
                             responsibility, IAControls, targetKey, intendedCCI";

fn text(row: &Row, idx: usize) -> rusqlite::Result<String> {
    Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
}

fn row_to_stig(row: &Row) -> rusqlite::Result<Stig> {
    Ok(Stig {
        id: row.get(0)?,
        title: text(row, 1)?,
        description: text(row, 2)?,
        release: text(row, 3)?,
        version: row.get::<_, Option<i64>>(4)?.unwrap_or_default(),
        benchmark_id: text(row, 5)?,
        file_name: text(row, 6)?,
    })
}

fn row_to_check(row: &Row) -> rusqlite::Result<StigCheck> {
    Ok(StigCheck {
        id: row.get(0)?,
        stig_id: row.get(1)?,
        cci_id: row.get::<_, Option<i64>>(2)?.unwrap_or_default(),
        rule: text(row, 3)?,
        vuln_num: text(row, 4)?,
        group_title: text(row, 5)?,
        rule_version: text(row, 6)?,
        severity: Severity::from_i64(row.get::<_, Option<i64>>(7)?.unwrap_or_default()),
        weight: row.get::<_, Option<f64>>(8)?.unwrap_or(10.0),
        title: text(row, 9)?,
        vuln_discussion: text(row, 10)?,
        false_positives: text(row, 11)?,
        false_negatives: text(row, 12)?,
        fix: text(row, 13)?,
        check: text(row, 14)?,
        documentable: row.get::<_, Option<i64>>(15)?.unwrap_or_default() != 0,
        mitigations: text(row, 16)?,
        severity_override_guidance: text(row, 17)?,
        check_content_ref: text(row, 18)?,
        potential_impact: text(row, 19)?,
        third_party_tools: text(row, 20)?,
        mitigation_control: text(row, 21)?,
        responsibility: text(row, 22)?,
        ia_controls: text(row, 23)?,
        target_key: text(row, 24)?,
        intended_cci: row.get(25)?,
    })
}

fn select_stigs(conn: &Connection, clause: &str, args: &[&dyn ToSql]) -> Result<Vec<Stig>> {
    let sql = format!("SELECT {} FROM STIG {} ORDER BY LOWER(STIG.title), STIG.version, STIG.release", STIG_COLUMNS, clause);
    let mut stmt = conn.prepare(&sql)?;
    let stigs = stmt.query_map(args, row_to_stig)?.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(stigs)
}

fn select_checks(conn: &Connection, clause: &str, args: &[&dyn ToSql]) -> Result<Vec<StigCheck>> {
    let sql = format!("SELECT {} FROM STIGCheck {} ORDER BY rule", CHECK_COLUMNS, clause);
    let mut stmt = conn.prepare(&sql)?;
    let checks = stmt.query_map(args, row_to_check)?.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(checks)
}

fn insert_check(conn: &Connection, stig_id: i64, check: &StigCheck) -> Result<()> {
    conn.execute(
        r#"INSERT INTO STIGCheck (STIGId, CCIId, rule, vulnNum, groupTitle, ruleVersion, severity,
               weight, title, vulnDiscussion, falsePositives, falseNegatives, fix, `check`,
               documentable, mitigations, severityOverrideGuidance, checkContentRef,
               potentialImpact, thirdPartyTools, mitigationControl, responsibility, IAControls,
               targetKey, intendedCCI)
           VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17,
               ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25)"#,
        params![
            stig_id,
            check.cci_id,
            check.rule,
            check.vuln_num,
            check.group_title,
            check.rule_version,
            check.severity.as_i64(),
            check.weight,
            check.title,
            check.vuln_discussion,
            check.false_positives,
            check.false_negatives,
            check.fix,
            check.check,
            check.documentable as i64,
            check.mitigations,
            check.severity_override_guidance,
            check.check_content_ref,
            check.potential_impact,
            check.third_party_tools,
            check.mitigation_control,
            check.responsibility,
            check.ia_controls,
            check.target_key,
            check.intended_cci,
        ],
    )?;
    Ok(())
}

impl Database {
    /// Store a STIG and its checks in one transaction.
    ///
    /// A STIG with the same title, version and release is rejected with
    /// `AlreadyExists` unless `stig_exists` is set, in which case the checks
    /// are appended to the stored STIG.
    pub fn add_stig(&self, stig: &Stig, checks: &[StigCheck], stig_exists: bool) -> Result<Stig> {
        self.bulk(|db| {
            let existing = db.find_stig(&stig.title, stig.version, &stig.release)?;
            let stored = match existing {
                Some(found) if stig_exists => found,
                Some(found) => return Err(StigqterError::AlreadyExists(found.to_string())),
                None => {
                    let conn = db.lock_conn()?;
                    conn.execute(
                        r#"INSERT INTO STIG (title, description, release, version, benchmarkId, fileName)
                           VALUES (?1, ?2, ?3, ?4, ?5, ?6)"#,
                        params![
                            stig.title,
                            stig.description,
                            stig.release,
                            stig.version,
                            stig.benchmark_id,
                            stig.file_name
                        ],
                    )?;
                    Stig {
                        id: conn.last_insert_rowid(),
                        ..stig.clone()
                    }
                }
            };

            let conn = db.lock_conn()?;
            for check in checks {
                insert_check(&conn, stored.id, check)?;
            }
            debug!("Stored {} checks for {}", checks.len(), stored);
            Ok(stored)
        })
    }

    pub fn get_stig(&self, id: i64) -> Result<Option<Stig>> {
        let conn = self.lock_conn()?;
        Ok(select_stigs(&conn, "WHERE STIG.id = ?1", &[&id])?.into_iter().next())
    }

    /// Look a STIG up by its identity (title, version, release)
    pub fn find_stig(&self, title: &str, version: i64, release: &str) -> Result<Option<Stig>> {
        let conn = self.lock_conn()?;
        let found = conn
            .query_row(
                &format!(
                    "SELECT {} FROM STIG WHERE title = ?1 AND version = ?2 AND release = ?3",
                    STIG_COLUMNS
                ),
                params![title, version, release],
                row_to_stig,
            )
            .optional()?;
        Ok(found)
    }

    pub fn get_stigs(&self) -> Result<Vec<Stig>> {
        let conn = self.lock_conn()?;
        select_stigs(&conn, "", &[])
    }

    /// STIGs mapped to an asset
    pub fn get_stigs_for_asset(&self, asset_id: i64) -> Result<Vec<Stig>> {
        let conn = self.lock_conn()?;
        select_stigs(
            &conn,
            "JOIN AssetSTIG ON AssetSTIG.STIGId = STIG.id WHERE AssetSTIG.AssetId = ?1",
            &[&asset_id],
        )
    }

    pub fn get_stig_check(&self, id: i64) -> Result<Option<StigCheck>> {
        let conn = self.lock_conn()?;
        Ok(select_checks(&conn, "WHERE id = ?1", &[&id])?.into_iter().next())
    }

    pub fn get_stig_check_by_rule(&self, stig_id: i64, rule: &str) -> Result<Option<StigCheck>> {
        let conn = self.lock_conn()?;
        Ok(select_checks(&conn, "WHERE STIGId = ?1 AND rule = ?2", &[&stig_id, &rule])?
            .into_iter()
            .next())
    }

    pub fn get_stig_checks(&self, stig_id: i64) -> Result<Vec<StigCheck>> {
        let conn = self.lock_conn()?;
        select_checks(&conn, "WHERE STIGId = ?1", &[&stig_id])
    }

    /// Remove a STIG and its checks. Refused while any asset uses it.
    pub fn delete_stig(&self, id: i64) -> Result<()> {
        let stig = self
            .get_stig(id)?
            .ok_or_else(|| StigqterError::NotFound(format!("STIG {}", id)))?;

        let assets = self.get_assets_for_stig(id)?;
        if !assets.is_empty() {
            let names: Vec<String> = assets.iter().map(|a| a.host_name.clone()).collect();
            return Err(StigqterError::InUse(format!(
                "{} cannot be deleted; the following {} still {} it: {}",
                stig,
                pluralize(assets.len(), "assets", "asset"),
                pluralize(assets.len(), "use", "uses"),
                names.join(", ")
            )));
        }

        self.bulk(|db| {
            let conn = db.lock_conn()?;
            conn.execute("DELETE FROM STIGCheck WHERE STIGId = ?1", params![id])?;
            conn.execute("DELETE FROM STIG WHERE id = ?1", params![id])?;
            Ok(())
        })?;
        info!("Deleted {}", stig);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Asset, Cci, FALLBACK_CCI};

    fn sample_stig() -> Stig {
        Stig {
            title: "Windows 10 Security Technical Implementation Guide".to_string(),
            description: "Windows 10 STIG".to_string(),
            release: "Release: 23 Benchmark Date: 26 Jul 2019".to_string(),
            version: 1,
            benchmark_id: "Windows_10_STIG".to_string(),
            file_name: "U_Windows_10_STIG_V1R23_Manual-xccdf.xml".to_string(),
            ..Stig::default()
        }
    }

    /// In-memory database holding CCI-000366; returns the CCI's row id
    fn cci_db() -> (Database, i64) {
        let db = Database::in_memory().unwrap();
        let mut cci = Cci { cci: FALLBACK_CCI, ..Cci::default() };
        db.add_cci(&mut cci).unwrap();
        (db, cci.id)
    }

    fn sample_checks(cci_id: i64) -> Vec<StigCheck> {
        vec![
            StigCheck {
                cci_id,
                rule: "SV-77809r3_rule".to_string(),
                vuln_num: "V-63319".to_string(),
                severity: Severity::High,
                weight: 10.0,
                title: "Domain-joined systems must use Windows 10 Enterprise Edition 64-bit".to_string(),
                documentable: true,
                ..StigCheck::default()
            },
            StigCheck {
                cci_id,
                rule: "SV-77811r1_rule".to_string(),
                vuln_num: "V-63321".to_string(),
                severity: Severity::Medium,
                weight: 10.0,
                ..StigCheck::default()
            },
        ]
    }

    #[test]
    fn test_add_stig_with_checks() {
        let (db, cci_id) = cci_db();
        let stig = db.add_stig(&sample_stig(), &sample_checks(cci_id), false).unwrap();
        assert!(stig.id > 0);

        let checks = db.get_stig_checks(stig.id).unwrap();
        assert_eq!(checks.len(), 2);
        assert_eq!(checks[0].severity, Severity::High);
        assert!(checks[0].documentable);

        let by_rule = db.get_stig_check_by_rule(stig.id, "SV-77811r1_rule").unwrap().unwrap();
        assert_eq!(by_rule.vuln_num, "V-63321");
        assert_eq!(db.get_stig_check(by_rule.id).unwrap().unwrap(), by_rule);
    }

    #[test]
    fn test_check_with_unknown_cci_is_rejected() {
        let (db, cci_id) = cci_db();
        let checks = sample_checks(cci_id + 100);
        assert!(matches!(
            db.add_stig(&sample_stig(), &checks, false),
            Err(StigqterError::Database(_))
        ));
        // The STIG row is rolled back with its checks
        assert!(db.get_stigs().unwrap().is_empty());
    }

    #[test]
    fn test_duplicate_stig_is_rejected_unless_appending() {
        let (db, cci_id) = cci_db();
        let stig = db.add_stig(&sample_stig(), &sample_checks(cci_id)[..1], false).unwrap();

        let again = db.add_stig(&sample_stig(), &sample_checks(cci_id), false);
        assert!(matches!(again, Err(StigqterError::AlreadyExists(_))));
        assert_eq!(db.get_stig_checks(stig.id).unwrap().len(), 1);

        let appended = db.add_stig(&sample_stig(), &sample_checks(cci_id)[1..], true).unwrap();
        assert_eq!(appended.id, stig.id);
        assert_eq!(db.get_stig_checks(stig.id).unwrap().len(), 2);
        assert_eq!(db.get_stigs().unwrap().len(), 1);
    }

    #[test]
    fn test_find_stig_and_display() {
        let db = Database::in_memory().unwrap();
        let stig = db.add_stig(&sample_stig(), &[], false).unwrap();
        let found = db
            .find_stig(&stig.title, 1, "Release: 23 Benchmark Date: 26 Jul 2019")
            .unwrap()
            .unwrap();
        assert_eq!(found, stig);
        assert!(db.find_stig(&stig.title, 2, &stig.release).unwrap().is_none());
        assert_eq!(
            found.to_string(),
            "Windows 10 Security Technical Implementation Guide Version: 1 Release: 23 Benchmark Date: 26 Jul 2019"
        );
    }

    #[test]
    fn test_get_stigs_orders_case_insensitively() {
        let db = Database::in_memory().unwrap();
        for title in ["zOS", "apache", "Windows"] {
            let stig = Stig { title: title.to_string(), ..sample_stig() };
            db.add_stig(&stig, &[], false).unwrap();
        }
        let titles: Vec<String> = db.get_stigs().unwrap().into_iter().map(|s| s.title).collect();
        assert_eq!(titles, vec!["apache", "Windows", "zOS"]);
    }

    #[test]
    fn test_delete_stig_in_use() {
        let (db, cci_id) = cci_db();
        let stig = db.add_stig(&sample_stig(), &sample_checks(cci_id), false).unwrap();
        let mut asset = Asset::named("WS01");
        db.add_asset(&mut asset).unwrap();
        db.add_stig_to_asset(stig.id, asset.id).unwrap();

        match db.delete_stig(stig.id) {
            Err(StigqterError::InUse(msg)) => assert!(msg.contains("WS01")),
            other => panic!("expected InUse, got {:?}", other),
        }

        db.delete_stig_from_asset(stig.id, asset.id).unwrap();
        db.delete_stig(stig.id).unwrap();
        assert!(db.get_stig(stig.id).unwrap().is_none());
        assert_eq!(db.get_stats().unwrap().stig_checks, 0);
        assert!(matches!(db.delete_stig(stig.id), Err(StigqterError::NotFound(_))));
    }
}

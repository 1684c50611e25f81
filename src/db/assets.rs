// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Assets, their STIG mappings and the checklist entries for each mapping

use rusqlite::{Connection, Row, ToSql, params};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{Database, map_constraint};
use crate::model::{Asset, CklCheck, Severity, Status};
use crate::{Result, StigqterError};

const ASSET_COLUMNS: &str = "Asset.id, Asset.assetType, Asset.hostName, Asset.hostIP, Asset.hostMAC, \
                             Asset.hostFQDN, Asset.techArea, Asset.targetKey, Asset.webOrDatabase, \
                             Asset.webDBSite, Asset.webDBInstance";

const CKL_COLUMNS: &str = "CKLCheck.id, CKLCheck.AssetId, CKLCheck.STIGCheckId, CKLCheck.status, \
                           CKLCheck.findingDetails, CKLCheck.comments, CKLCheck.severityOverride, \
                           CKLCheck.severityJustification";

/// Checklist tallies for one asset
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetSummary {
    pub total: i64,
    pub open: i64,
    pub not_a_finding: i64,
    pub not_applicable: i64,
    pub not_reviewed: i64,
}

fn text(row: &Row, idx: usize) -> rusqlite::Result<String> {
    Ok(row.get::<_, Option<String>>(idx)?.unwrap_or_default())
}

fn row_to_asset(row: &Row) -> rusqlite::Result<Asset> {
    Ok(Asset {
        id: row.get(0)?,
        asset_type: text(row, 1)?,
        host_name: text(row, 2)?,
        host_ip: text(row, 3)?,
        host_mac: text(row, 4)?,
        host_fqdn: text(row, 5)?,
        tech_area: text(row, 6)?,
        target_key: text(row, 7)?,
        web_or_database: row.get::<_, Option<i64>>(8)?.unwrap_or_default() != 0,
        web_db_site: text(row, 9)?,
        web_db_instance: text(row, 10)?,
    })
}

fn row_to_ckl(row: &Row) -> rusqlite::Result<CklCheck> {
    Ok(CklCheck {
        id: row.get(0)?,
        asset_id: row.get(1)?,
        stig_check_id: row.get(2)?,
        status: Status::from_i64(row.get::<_, Option<i64>>(3)?.unwrap_or_default()),
        finding_details: text(row, 4)?,
        comments: text(row, 5)?,
        severity_override: Severity::from_i64(row.get::<_, Option<i64>>(6)?.unwrap_or_default()),
        severity_justification: text(row, 7)?,
    })
}

fn select_assets(conn: &Connection, clause: &str, args: &[&dyn ToSql]) -> Result<Vec<Asset>> {
    let sql = format!("SELECT {} FROM Asset {} ORDER BY LOWER(Asset.hostName)", ASSET_COLUMNS, clause);
    let mut stmt = conn.prepare(&sql)?;
    let assets = stmt.query_map(args, row_to_asset)?.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(assets)
}

fn select_ckl_checks(conn: &Connection, clause: &str, args: &[&dyn ToSql]) -> Result<Vec<CklCheck>> {
    let sql = format!(
        "SELECT {} FROM CKLCheck JOIN STIGCheck ON STIGCheck.id = CKLCheck.STIGCheckId {} \
         ORDER BY CKLCheck.AssetId, STIGCheck.rule",
        CKL_COLUMNS, clause
    );
    let mut stmt = conn.prepare(&sql)?;
    let checks = stmt.query_map(args, row_to_ckl)?.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(checks)
}

impl Database {
    /// Add an asset; host names are unique. Sets `asset.id`.
    pub fn add_asset(&self, asset: &mut Asset) -> Result<()> {
        if asset.host_name.trim().is_empty() {
            return Err(StigqterError::InvalidInput("Asset host name must not be empty".to_string()));
        }
        let conn = self.lock_conn()?;
        conn.execute(
            r#"INSERT INTO Asset (assetType, hostName, hostIP, hostMAC, hostFQDN, techArea,
                   targetKey, webOrDatabase, webDBSite, webDBInstance)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"#,
            params![
                asset.asset_type,
                asset.host_name,
                asset.host_ip,
                asset.host_mac,
                asset.host_fqdn,
                asset.tech_area,
                asset.target_key,
                asset.web_or_database as i64,
                asset.web_db_site,
                asset.web_db_instance
            ],
        )
        .map_err(|e| map_constraint(e, format!("Asset {}", asset.host_name)))?;
        asset.id = conn.last_insert_rowid();
        Ok(())
    }

    /// Overwrite the stored details of an existing asset
    pub fn update_asset(&self, asset: &Asset) -> Result<()> {
        let conn = self.lock_conn()?;
        let updated = conn
            .execute(
                r#"UPDATE Asset SET assetType = ?1, hostName = ?2, hostIP = ?3, hostMAC = ?4,
                       hostFQDN = ?5, techArea = ?6, targetKey = ?7, webOrDatabase = ?8,
                       webDBSite = ?9, webDBInstance = ?10
                   WHERE id = ?11"#,
                params![
                    asset.asset_type,
                    asset.host_name,
                    asset.host_ip,
                    asset.host_mac,
                    asset.host_fqdn,
                    asset.tech_area,
                    asset.target_key,
                    asset.web_or_database as i64,
                    asset.web_db_site,
                    asset.web_db_instance,
                    asset.id
                ],
            )
            .map_err(|e| map_constraint(e, format!("Asset {}", asset.host_name)))?;
        if updated == 0 {
            return Err(StigqterError::NotFound(format!("Asset {}", asset.id)));
        }
        Ok(())
    }

    pub fn get_asset(&self, id: i64) -> Result<Option<Asset>> {
        let conn = self.lock_conn()?;
        Ok(select_assets(&conn, "WHERE Asset.id = ?1", &[&id])?.into_iter().next())
    }

    pub fn get_asset_by_name(&self, host_name: &str) -> Result<Option<Asset>> {
        let conn = self.lock_conn()?;
        let host_name = host_name.trim();
        Ok(select_assets(&conn, "WHERE Asset.hostName = ?1", &[&host_name])?
            .into_iter()
            .next())
    }

    pub fn get_assets(&self) -> Result<Vec<Asset>> {
        let conn = self.lock_conn()?;
        select_assets(&conn, "", &[])
    }

    /// Assets a STIG is mapped to
    pub fn get_assets_for_stig(&self, stig_id: i64) -> Result<Vec<Asset>> {
        let conn = self.lock_conn()?;
        select_assets(
            &conn,
            "JOIN AssetSTIG ON AssetSTIG.AssetId = Asset.id WHERE AssetSTIG.STIGId = ?1",
            &[&stig_id],
        )
    }

    /// Remove an asset. Refused while any STIG is still mapped to it.
    pub fn delete_asset(&self, id: i64) -> Result<()> {
        let asset = self
            .get_asset(id)?
            .ok_or_else(|| StigqterError::NotFound(format!("Asset {}", id)))?;
        let stigs = self.get_stigs_for_asset(id)?;
        if !stigs.is_empty() {
            return Err(StigqterError::InUse(format!(
                "Unable to delete {}; {} STIG(s) are still mapped to it",
                asset,
                stigs.len()
            )));
        }

        let conn = self.lock_conn()?;
        conn.execute("DELETE FROM CKLCheck WHERE AssetId = ?1", params![id])?;
        conn.execute("DELETE FROM Asset WHERE id = ?1", params![id])?;
        Ok(())
    }

    /// Map a STIG to an asset and create a not-reviewed checklist entry for
    /// each of its checks. Returns the number of entries created.
    pub fn add_stig_to_asset(&self, stig_id: i64, asset_id: i64) -> Result<usize> {
        let stig = self
            .get_stig(stig_id)?
            .ok_or_else(|| StigqterError::NotFound(format!("STIG {}", stig_id)))?;
        let asset = self
            .get_asset(asset_id)?
            .ok_or_else(|| StigqterError::NotFound(format!("Asset {}", asset_id)))?;

        self.bulk(|db| {
            let conn = db.lock_conn()?;
            let mapped: i64 = conn.query_row(
                "SELECT COUNT(*) FROM AssetSTIG WHERE AssetId = ?1 AND STIGId = ?2",
                params![asset_id, stig_id],
                |row| row.get(0),
            )?;
            if mapped > 0 {
                return Err(StigqterError::AlreadyExists(format!("{} on {}", stig, asset)));
            }

            conn.execute(
                "INSERT INTO AssetSTIG (AssetId, STIGId) VALUES (?1, ?2)",
                params![asset_id, stig_id],
            )?;
            let created = conn.execute(
                r#"INSERT INTO CKLCheck (AssetId, STIGCheckId, status, findingDetails, comments,
                       severityOverride, severityJustification)
                   SELECT ?1, id, ?2, '', '', ?3, '' FROM STIGCheck WHERE STIGId = ?4"#,
                params![asset_id, Status::NotReviewed.as_i64(), Severity::None.as_i64(), stig_id],
            )?;
            debug!("Mapped {} to {} ({} checks)", stig, asset, created);
            Ok(created)
        })
    }

    /// Unmap a STIG from an asset, dropping its checklist entries
    pub fn delete_stig_from_asset(&self, stig_id: i64, asset_id: i64) -> Result<()> {
        self.bulk(|db| {
            let conn = db.lock_conn()?;
            conn.execute(
                r#"DELETE FROM CKLCheck WHERE AssetId = ?1
                   AND STIGCheckId IN (SELECT id FROM STIGCheck WHERE STIGId = ?2)"#,
                params![asset_id, stig_id],
            )?;
            let removed = conn.execute(
                "DELETE FROM AssetSTIG WHERE AssetId = ?1 AND STIGId = ?2",
                params![asset_id, stig_id],
            )?;
            if removed == 0 {
                return Err(StigqterError::NotFound(format!(
                    "STIG {} mapping on asset {}",
                    stig_id, asset_id
                )));
            }
            Ok(())
        })
    }

    pub fn get_ckl_check(&self, id: i64) -> Result<Option<CklCheck>> {
        let conn = self.lock_conn()?;
        Ok(select_ckl_checks(&conn, "WHERE CKLCheck.id = ?1", &[&id])?
            .into_iter()
            .next())
    }

    pub fn find_ckl_check(&self, asset_id: i64, stig_check_id: i64) -> Result<Option<CklCheck>> {
        let conn = self.lock_conn()?;
        Ok(select_ckl_checks(
            &conn,
            "WHERE CKLCheck.AssetId = ?1 AND CKLCheck.STIGCheckId = ?2",
            &[&asset_id, &stig_check_id],
        )?
        .into_iter()
        .next())
    }

    /// Checklist entries of an asset, optionally limited to one STIG
    pub fn get_ckl_checks(&self, asset_id: i64, stig_id: Option<i64>) -> Result<Vec<CklCheck>> {
        let conn = self.lock_conn()?;
        match stig_id {
            Some(stig_id) => select_ckl_checks(
                &conn,
                "WHERE CKLCheck.AssetId = ?1 AND STIGCheck.STIGId = ?2",
                &[&asset_id, &stig_id],
            ),
            None => select_ckl_checks(&conn, "WHERE CKLCheck.AssetId = ?1", &[&asset_id]),
        }
    }

    pub fn get_all_ckl_checks(&self) -> Result<Vec<CklCheck>> {
        let conn = self.lock_conn()?;
        select_ckl_checks(&conn, "", &[])
    }

    /// Save a checklist entry, addressed by id or, when the id is unset,
    /// by its (asset, STIG check) pair
    pub fn update_ckl_check(&self, check: &CklCheck) -> Result<()> {
        let conn = self.lock_conn()?;
        let status = check.status.as_i64();
        let severity_override = check.severity_override.as_i64();
        let set = "UPDATE CKLCheck SET status = ?1, findingDetails = ?2, comments = ?3, \
                   severityOverride = ?4, severityJustification = ?5";

        let updated = if check.id > 0 {
            conn.execute(
                &format!("{} WHERE id = ?6", set),
                params![
                    status,
                    check.finding_details,
                    check.comments,
                    severity_override,
                    check.severity_justification,
                    check.id
                ],
            )?
        } else {
            conn.execute(
                &format!("{} WHERE AssetId = ?6 AND STIGCheckId = ?7", set),
                params![
                    status,
                    check.finding_details,
                    check.comments,
                    severity_override,
                    check.severity_justification,
                    check.asset_id,
                    check.stig_check_id
                ],
            )?
        };

        if updated == 0 {
            return Err(StigqterError::NotFound(format!(
                "Checklist entry for asset {} / check {}",
                check.asset_id, check.stig_check_id
            )));
        }
        Ok(())
    }

    /// Status tallies over all checklist entries of an asset
    pub fn asset_summary(&self, asset_id: i64) -> Result<AssetSummary> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM CKLCheck WHERE AssetId = ?1 GROUP BY status")?;
        let rows = stmt
            .query_map(params![asset_id], |row| {
                Ok((row.get::<_, Option<i64>>(0)?.unwrap_or_default(), row.get::<_, i64>(1)?))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        let mut summary = AssetSummary::default();
        for (status, count) in rows {
            summary.total += count;
            match Status::from_i64(status) {
                Status::Open => summary.open += count,
                Status::NotAFinding => summary.not_a_finding += count,
                Status::NotApplicable => summary.not_applicable += count,
                Status::NotReviewed => summary.not_reviewed += count,
            }
        }
        Ok(summary)
    }
}

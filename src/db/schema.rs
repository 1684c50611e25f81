// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Schema creation and step-wise upgrades.
//!
//! The schema version lives in the `variables` table under `version`.
//! A missing table means a brand new database (version 0).

use rusqlite::{Connection, OptionalExtension, params};
use tracing::info;

use crate::Result;

/// Version a freshly opened database is upgraded to
pub const LATEST_VERSION: i64 = 3;

const V1_INITIAL: &str = r#"
    CREATE TABLE IF NOT EXISTS `Family` (
        `id`            INTEGER PRIMARY KEY AUTOINCREMENT,
        `Acronym`       TEXT UNIQUE,
        `Description`   TEXT UNIQUE
    );

    CREATE TABLE IF NOT EXISTS `Control` (
        `id`            INTEGER PRIMARY KEY AUTOINCREMENT,
        `FamilyId`      INTEGER NOT NULL,
        `number`        INTEGER NOT NULL,
        `enhancement`   INTEGER,
        `title`         TEXT,
        `description`   TEXT,
        FOREIGN KEY(`FamilyId`) REFERENCES `Family`(`id`)
    );

    CREATE TABLE IF NOT EXISTS `CCI` (
        `id`                INTEGER PRIMARY KEY AUTOINCREMENT,
        `ControlId`         INTEGER,
        `cci`               INTEGER,
        `definition`        TEXT,
        `isImport`          INTEGER NOT NULL DEFAULT 0,
        `importCompliance`  TEXT,
        `importDateTested`  TEXT,
        `importTestedBy`    TEXT,
        `importTestResults` TEXT,
        FOREIGN KEY(`ControlId`) REFERENCES `Control`(`id`)
    );

    CREATE TABLE IF NOT EXISTS `variables` (
        `name`  TEXT,
        `value` TEXT
    );

    CREATE TABLE IF NOT EXISTS `STIG` (
        `id`            INTEGER PRIMARY KEY AUTOINCREMENT,
        `title`         TEXT,
        `description`   TEXT,
        `release`       TEXT,
        `version`       INTEGER,
        `benchmarkId`   TEXT,
        `fileName`      TEXT
    );

    CREATE TABLE IF NOT EXISTS `STIGCheck` (
        `id`                        INTEGER PRIMARY KEY AUTOINCREMENT,
        `STIGId`                    INTEGER,
        `CCIId`                     INTEGER,
        `rule`                      TEXT,
        `vulnNum`                   TEXT,
        `groupTitle`                TEXT,
        `ruleVersion`               TEXT,
        `severity`                  INTEGER,
        `weight`                    REAL,
        `title`                     TEXT,
        `vulnDiscussion`            TEXT,
        `falsePositives`            TEXT,
        `falseNegatives`            TEXT,
        `fix`                       TEXT,
        `check`                     TEXT,
        `documentable`              INTEGER,
        `mitigations`               TEXT,
        `severityOverrideGuidance`  TEXT,
        `checkContentRef`           TEXT,
        `potentialImpact`           TEXT,
        `thirdPartyTools`           TEXT,
        `mitigationControl`         TEXT,
        `responsibility`            TEXT,
        `IAControls`                TEXT,
        `targetKey`                 TEXT,
        FOREIGN KEY(`STIGId`) REFERENCES `STIG`(`id`),
        FOREIGN KEY(`CCIId`) REFERENCES `CCI`(`id`)
    );

    CREATE TABLE IF NOT EXISTS `Asset` (
        `id`            INTEGER PRIMARY KEY AUTOINCREMENT,
        `assetType`     TEXT,
        `hostName`      TEXT UNIQUE,
        `hostIP`        TEXT,
        `hostMAC`       TEXT,
        `hostFQDN`      TEXT,
        `techArea`      TEXT,
        `targetKey`     TEXT,
        `webOrDatabase` INTEGER,
        `webDBSite`     TEXT,
        `webDBInstance` TEXT
    );

    CREATE TABLE IF NOT EXISTS `AssetSTIG` (
        `id`        INTEGER PRIMARY KEY AUTOINCREMENT,
        `AssetId`   INTEGER,
        `STIGId`    INTEGER,
        FOREIGN KEY(`AssetId`) REFERENCES `Asset`(`id`),
        FOREIGN KEY(`STIGId`) REFERENCES `STIG`(`id`)
    );

    CREATE TABLE IF NOT EXISTS `CKLCheck` (
        `id`                    INTEGER PRIMARY KEY AUTOINCREMENT,
        `AssetId`               INTEGER,
        `STIGCheckId`           INTEGER,
        `status`                INTEGER,
        `findingDetails`        TEXT,
        `comments`              TEXT,
        `severityOverride`      INTEGER,
        `severityJustification` TEXT,
        FOREIGN KEY(`STIGCheckId`) REFERENCES `STIGCheck`(`id`),
        FOREIGN KEY(`AssetId`) REFERENCES `Asset`(`id`)
    );
"#;

const V2_LOOKUP_INDEXES: &str = r#"
    CREATE INDEX IF NOT EXISTS idx_cci_number ON CCI(cci);
    CREATE INDEX IF NOT EXISTS idx_stigcheck_stig ON STIGCheck(STIGId);
    CREATE INDEX IF NOT EXISTS idx_stigcheck_rule ON STIGCheck(rule);
    CREATE INDEX IF NOT EXISTS idx_cklcheck_asset_check ON CKLCheck(AssetId, STIGCheckId);
    CREATE INDEX IF NOT EXISTS idx_assetstig_asset_stig ON AssetSTIG(AssetId, STIGId);
"#;

/// CCI number a check named when it had to be parked on CCI-000366
const V3_INTENDED_CCI: &str = r#"
    ALTER TABLE STIGCheck ADD COLUMN `intendedCCI` INTEGER;
"#;

const MIGRATIONS: &[(i64, &str)] = &[
    (1, V1_INITIAL),
    (2, V2_LOOKUP_INDEXES),
    (3, V3_INTENDED_CCI),
];

/// Version stored in the database; 0 for an empty file
pub fn current_version(conn: &Connection) -> Result<i64> {
    let has_variables: bool = conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = 'variables'",
        [],
        |row| row.get::<_, i64>(0).map(|n| n > 0),
    )?;
    if !has_variables {
        return Ok(0);
    }

    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM variables WHERE name = 'version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    Ok(value.and_then(|v| v.trim().parse().ok()).unwrap_or(0))
}

/// Apply every migration newer than the stored version
pub fn migrate(conn: &Connection) -> Result<i64> {
    let stored = current_version(conn)?;
    let mut version = stored;

    for (target, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > stored) {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)?;
        set_variable(&tx, "version", &target.to_string())?;
        tx.commit()?;
        info!("Database upgraded from version {} to {}", version, target);
        version = *target;
    }

    Ok(version)
}

/// Drop all application tables
pub fn drop_all(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        DROP TABLE IF EXISTS CKLCheck;
        DROP TABLE IF EXISTS AssetSTIG;
        DROP TABLE IF EXISTS Asset;
        DROP TABLE IF EXISTS STIGCheck;
        DROP TABLE IF EXISTS STIG;
        DROP TABLE IF EXISTS variables;
        DROP TABLE IF EXISTS CCI;
        DROP TABLE IF EXISTS Control;
        DROP TABLE IF EXISTS Family;
        "#,
    )?;
    Ok(())
}

pub fn set_variable(conn: &Connection, name: &str, value: &str) -> Result<()> {
    let updated = conn.execute(
        "UPDATE variables SET value = ?2 WHERE name = ?1",
        params![name, value],
    )?;
    if updated == 0 {
        conn.execute(
            "INSERT INTO variables (name, value) VALUES (?1, ?2)",
            params![name, value],
        )?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_upgrade_from_version_one() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(V1_INITIAL).unwrap();
        set_variable(&conn, "version", "1").unwrap();
        assert_eq!(current_version(&conn).unwrap(), 1);

        assert_eq!(migrate(&conn).unwrap(), LATEST_VERSION);

        let indexes: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'index' AND name LIKE 'idx_%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(indexes, 5);

        let intended: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM pragma_table_info('STIGCheck') WHERE name = 'intendedCCI'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(intended, 1);
    }

    #[test]
    fn test_migrate_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(migrate(&conn).unwrap(), LATEST_VERSION);
        assert_eq!(migrate(&conn).unwrap(), LATEST_VERSION);
        let rows: i64 = conn
            .query_row("SELECT COUNT(*) FROM variables WHERE name = 'version'", [], |row| row.get(0))
            .unwrap();
        assert_eq!(rows, 1);
    }
}

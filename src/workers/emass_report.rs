// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! eMASS Test Result rollup.
//!
//! Every checklist entry votes for the CCI of its STIG check. One Open
//! entry makes the CCI Non-Compliant for good; a CCI with only
//! NotAFinding entries is Compliant. CCIs carried by a previous eMASS
//! import that received no votes are repeated with their old results.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use tracing::info;

use super::{Progress, Worker};
use crate::config::ReportConfig;
use crate::db::Database;
use crate::model::{format_cci, Asset, Cci, CklCheck, Severity, StigCheck, Status};
use crate::Result;

/// One row of the Test Result Import sheet
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRow {
    pub control: String,
    pub control_description: String,
    /// Six digit CCI number
    pub cci: String,
    pub definition: String,
    pub compliance_status: String,
    pub date_tested: String,
    pub tested_by: String,
    pub test_results: String,
    pub latest_compliance: String,
    pub latest_date_tested: String,
    pub latest_tested_by: String,
    pub latest_test_results: String,
}

/// A checklist entry with what is needed to describe it
struct Finding {
    asset: String,
    check: StigCheck,
    entry: CklCheck,
}

impl Finding {
    fn line(&self) -> String {
        format!("{}: {} {}", self.asset, self.check.rule, self.check.title)
    }

    fn severity(&self) -> Severity {
        match self.entry.severity_override {
            Severity::None => self.check.severity,
            over => over,
        }
    }
}

/// Result of a rollup
#[derive(Debug, Clone, Default)]
pub struct Report {
    pub rows: Vec<ReportRow>,
    /// A CCI was assessed that the last eMASS import did not carry
    pub unimported_cci: bool,
}

fn base_row(db: &Database, cci: &Cci) -> Result<ReportRow> {
    let control = match cci.control_id {
        Some(id) => db.get_control(id)?,
        None => None,
    };
    let (control_name, control_description) = match control {
        Some(control) => (db.control_name(&control)?, control.description),
        None => (String::new(), String::new()),
    };
    let latest = |value: &str| if cci.is_import { value.to_string() } else { String::new() };

    Ok(ReportRow {
        control: control_name,
        control_description,
        cci: format!("{:06}", cci.cci),
        definition: cci.definition.clone(),
        latest_compliance: latest(&cci.import_compliance),
        latest_date_tested: latest(&cci.import_date_tested),
        latest_tested_by: latest(&cci.import_tested_by),
        latest_test_results: latest(&cci.import_test_results),
        ..ReportRow::default()
    })
}

/// Roll every checklist entry up to its CCI
pub fn build_report(db: &Database, progress: &Progress, tested_by: &str, date: &str) -> Result<Report> {
    let checks = db.get_all_ckl_checks()?;
    progress.initialize(checks.len() as u64 + 1, 0);

    let mut stig_checks: HashMap<i64, StigCheck> = HashMap::new();
    let mut assets: HashMap<i64, Asset> = HashMap::new();
    let mut ccis: HashMap<i64, Cci> = HashMap::new();
    // Keyed by CCI number so rows come out in CCI order
    let mut failed: BTreeMap<i64, Vec<Finding>> = BTreeMap::new();
    let mut passed: BTreeMap<i64, Vec<Finding>> = BTreeMap::new();

    for entry in checks {
        if !matches!(entry.status, Status::Open | Status::NotAFinding) {
            progress.advance();
            continue;
        }
        if !stig_checks.contains_key(&entry.stig_check_id) {
            if let Some(check) = db.get_stig_check(entry.stig_check_id)? {
                stig_checks.insert(check.id, check);
            }
        }
        let Some(check) = stig_checks.get(&entry.stig_check_id).cloned() else {
            progress.advance();
            continue;
        };
        progress.status(format!("Checking {}…", check));

        if !ccis.contains_key(&check.cci_id) {
            if let Some(cci) = db.get_cci(check.cci_id)? {
                ccis.insert(cci.id, cci);
            }
        }
        let Some(cci) = ccis.get(&check.cci_id).map(|c| c.cci) else {
            progress.advance();
            continue;
        };
        if !assets.contains_key(&entry.asset_id) {
            if let Some(asset) = db.get_asset(entry.asset_id)? {
                assets.insert(asset.id, asset);
            }
        }
        let asset = assets
            .get(&entry.asset_id)
            .map(|a| a.host_name.clone())
            .unwrap_or_default();

        let finding = Finding { asset, check, entry };
        if finding.entry.status == Status::Open {
            passed.remove(&cci);
            failed.entry(cci).or_default().push(finding);
        } else if !failed.contains_key(&cci) {
            passed.entry(cci).or_default().push(finding);
        }
        progress.advance();
    }

    let by_number: HashMap<i64, Cci> = ccis.into_values().map(|c| (c.cci, c)).collect();
    let mut report = Report::default();

    for (verdict, heading, groups) in [
        ("Non-Compliant", "The following checks are open:", &mut failed),
        ("Compliant", "The following checks were compliant:", &mut passed),
    ] {
        for (number, findings) in groups.iter_mut() {
            let Some(cci) = by_number.get(number) else { continue };
            progress.status(format!("Adding {}…", format_cci(cci.cci)));
            findings.sort_by(|a, b| (&a.asset, &a.check.rule).cmp(&(&b.asset, &b.check.rule)));

            let mut results = heading.to_string();
            for f in findings.iter() {
                results.push('\n');
                results.push_str(&f.line());
                if f.entry.status == Status::Open {
                    results.push_str(&format!(" - {}", f.severity().category()));
                    if !f.entry.finding_details.is_empty() {
                        results.push_str(&format!(" - {}", f.entry.finding_details));
                    }
                }
            }

            report.unimported_cci |= !cci.is_import;
            report.rows.push(ReportRow {
                compliance_status: verdict.to_string(),
                date_tested: date.to_string(),
                tested_by: tested_by.to_string(),
                test_results: results,
                ..base_row(db, cci)?
            });
        }
    }

    for cci in db.get_ccis()? {
        if !cci.is_import || failed.contains_key(&cci.cci) || passed.contains_key(&cci.cci) {
            continue;
        }
        report.rows.push(base_row(db, &cci)?);
    }
    progress.advance();

    Ok(report)
}

/// Write the compliance rollup as JSON
pub struct WorkerEmassReport {
    output: PathBuf,
    config: ReportConfig,
    rows: Vec<ReportRow>,
}

impl WorkerEmassReport {
    pub fn new(output: impl AsRef<Path>, config: ReportConfig) -> Self {
        Self {
            output: output.as_ref().to_path_buf(),
            config,
            rows: Vec::new(),
        }
    }

    pub fn rows(&self) -> &[ReportRow] {
        &self.rows
    }
}

#[async_trait]
impl Worker for WorkerEmassReport {
    fn name(&self) -> &'static str {
        "emass-report"
    }

    async fn process(&mut self, db: &Database, progress: &Progress) -> Result<()> {
        let date = chrono::Local::now().format(&self.config.date_format).to_string();
        let report = build_report(db, progress, &self.config.tester(), &date)?;

        if report.unimported_cci && db.is_emass_import()? {
            progress.warning(
                "New CCI Detected",
                "One or more CCIs were detected that were not part of the eMASS TR Import. \
                 Please check the report for test results that have no \"Latest Test Result\" data.",
            );
        }

        progress.status("Writing report…");
        let json = serde_json::to_string_pretty(&report.rows)?;
        tokio::fs::write(&self.output, json).await?;
        info!("Wrote {} eMASS row(s) to {}", report.rows.len(), self.output.display());
        self.rows = report.rows;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::ckl_export::tests::mapped_db;
    use crate::workers::{spawn_worker, WorkerEvent};

    fn set_status(db: &Database, asset_id: i64, rule: &str, status: Status, details: &str) {
        let entry = db
            .get_ckl_checks(asset_id, None)
            .unwrap()
            .into_iter()
            .find(|e| db.get_stig_check(e.stig_check_id).unwrap().unwrap().rule == rule)
            .unwrap();
        db.update_ckl_check(&CklCheck {
            status,
            finding_details: details.to_string(),
            ..entry
        })
        .unwrap();
    }

    #[test]
    fn test_open_check_makes_cci_non_compliant() {
        let (db, asset, _stig) = mapped_db();
        set_status(&db, asset.id, "SV-1000r1_rule", Status::NotAFinding, "");
        set_status(&db, asset.id, "SV-1001r2_rule", Status::Open, "ssh allows root");

        let (progress, _rx) = Progress::channel();
        let report = build_report(&db, &progress, "tester", "01-Jan-2020").unwrap();
        assert_eq!(report.rows.len(), 1);

        let row = &report.rows[0];
        assert_eq!(row.cci, "000366");
        assert_eq!(row.compliance_status, "Non-Compliant");
        assert_eq!(row.tested_by, "tester");
        assert_eq!(row.date_tested, "01-Jan-2020");
        assert_eq!(
            row.test_results,
            "The following checks are open:\nhost1: SV-1001r2_rule Audit records must be kept. - CAT II - ssh allows root"
        );
        assert!(report.unimported_cci);
    }

    #[test]
    fn test_not_a_finding_only_is_compliant() {
        let (db, asset, _stig) = mapped_db();
        set_status(&db, asset.id, "SV-1000r1_rule", Status::NotAFinding, "ok");

        let (progress, _rx) = Progress::channel();
        let report = build_report(&db, &progress, "tester", "01-Jan-2020").unwrap();
        let row = &report.rows[0];
        assert_eq!(row.compliance_status, "Compliant");
        assert_eq!(
            row.test_results,
            "The following checks were compliant:\nhost1: SV-1000r1_rule The system must use an approved edition."
        );
    }

    #[test]
    fn test_unreviewed_imported_cci_keeps_previous_results() {
        let (db, _asset, _stig) = mapped_db();
        db.import_cci(&Cci {
            cci: 366,
            is_import: true,
            import_compliance: "Compliant".to_string(),
            import_tested_by: "auditor".to_string(),
            ..Cci::default()
        })
        .unwrap();

        let (progress, _rx) = Progress::channel();
        let report = build_report(&db, &progress, "tester", "01-Jan-2020").unwrap();
        assert_eq!(report.rows.len(), 1);
        let row = &report.rows[0];
        assert_eq!(row.compliance_status, "");
        assert_eq!(row.latest_compliance, "Compliant");
        assert_eq!(row.latest_tested_by, "auditor");
        assert!(!report.unimported_cci);
    }

    #[tokio::test]
    async fn test_report_worker_writes_json() {
        let (db, asset, _stig) = mapped_db();
        set_status(&db, asset.id, "SV-1000r1_rule", Status::Open, "");
        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("emass.json");
        let config = ReportConfig {
            tested_by: Some("tester".to_string()),
            date_format: "%Y".to_string(),
        };

        let (handle, mut rx) = spawn_worker(WorkerEmassReport::new(&output, config), db);
        let worker = handle.await.unwrap().unwrap();
        assert_eq!(worker.rows().len(), 1);

        let written: Vec<ReportRow> = serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(written, worker.rows());

        // No eMASS import was loaded, so nothing to warn about
        while let Some(event) = rx.recv().await {
            assert!(!matches!(event, WorkerEvent::Warning { .. }));
        }
    }
}

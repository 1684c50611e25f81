// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Detailed findings: every open checklist entry of every asset, worst
//! first, with the CCI and control it rolls up to.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

use super::ckl_export::collect_stig;
use super::{Progress, Worker};
use crate::db::{AssetSummary, Database};
use crate::model::{cci_number, Severity, Status};
use crate::Result;

/// One open finding
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingRow {
    pub asset: String,
    pub stig: String,
    pub vuln_num: String,
    pub rule: String,
    pub title: String,
    /// `CAT I` to `CAT III`, after any checklist override
    pub severity: String,
    pub cci: String,
    pub control: String,
    pub finding_details: String,
    pub comments: String,
}

/// Checklist tallies of one asset
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetFindings {
    pub asset: String,
    pub summary: AssetSummary,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FindingsReport {
    pub findings: Vec<FindingRow>,
    pub assets: Vec<AssetFindings>,
}

/// Control name of a CCI number, cached per run
fn control_for(db: &Database, cache: &mut HashMap<String, String>, cci: &str) -> Result<String> {
    if let Some(found) = cache.get(cci) {
        return Ok(found.clone());
    }
    let control = match cci_number(cci) {
        Some(number) => match db.get_cci_by_number(number)?.and_then(|c| c.control_id) {
            Some(id) => match db.get_control(id)? {
                Some(control) => db.control_name(&control)?,
                None => String::new(),
            },
            None => String::new(),
        },
        None => String::new(),
    };
    cache.insert(cci.to_string(), control.clone());
    Ok(control)
}

/// Gather the open findings of every asset
pub fn build_findings(db: &Database, progress: &Progress) -> Result<FindingsReport> {
    let assets = db.get_assets()?;
    progress.initialize(assets.len() as u64, 0);

    let mut controls = HashMap::new();
    let mut ranked: Vec<(Severity, FindingRow)> = Vec::new();
    let mut report = FindingsReport::default();

    for asset in assets {
        progress.status(format!("Collecting findings for {}…", asset));
        for stig in db.get_stigs_for_asset(asset.id)? {
            for vuln in collect_stig(db, &asset, &stig)?.vulns {
                if vuln.entry.status != Status::Open {
                    continue;
                }
                let severity = match vuln.entry.severity_override {
                    Severity::None => vuln.check.severity,
                    over => over,
                };
                let control = control_for(db, &mut controls, &vuln.cci)?;
                ranked.push((
                    severity,
                    FindingRow {
                        asset: asset.host_name.clone(),
                        stig: stig.to_string(),
                        vuln_num: vuln.check.vuln_num,
                        rule: vuln.check.rule,
                        title: vuln.check.title,
                        severity: severity.category().to_string(),
                        cci: vuln.cci,
                        control,
                        finding_details: vuln.entry.finding_details,
                        comments: vuln.entry.comments,
                    },
                ));
            }
        }
        report.assets.push(AssetFindings {
            asset: asset.host_name.clone(),
            summary: db.asset_summary(asset.id)?,
        });
        progress.advance();
    }

    ranked.sort_by(|(a_sev, a), (b_sev, b)| {
        b_sev
            .cmp(a_sev)
            .then_with(|| a.asset.cmp(&b.asset))
            .then_with(|| a.rule.cmp(&b.rule))
    });
    report.findings = ranked.into_iter().map(|(_, row)| row).collect();
    Ok(report)
}

/// Write the detailed findings report as JSON
pub struct WorkerFindingsReport {
    output: PathBuf,
    report: FindingsReport,
}

impl WorkerFindingsReport {
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            output: output.as_ref().to_path_buf(),
            report: FindingsReport::default(),
        }
    }

    pub fn report(&self) -> &FindingsReport {
        &self.report
    }
}

#[async_trait]
impl Worker for WorkerFindingsReport {
    fn name(&self) -> &'static str {
        "findings-report"
    }

    async fn process(&mut self, db: &Database, progress: &Progress) -> Result<()> {
        self.report = build_findings(db, progress)?;
        progress.status("Writing report…");
        tokio::fs::write(&self.output, serde_json::to_string_pretty(&self.report)?).await?;
        info!(
            "Wrote {} finding(s) across {} asset(s) to {}",
            self.report.findings.len(),
            self.report.assets.len(),
            self.output.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Asset, Cci, CklCheck};
    use crate::workers::ckl_export::tests::mapped_db;
    use crate::workers::spawn_worker;

    fn set(db: &Database, entry: &CklCheck, status: Status, severity_override: Severity) {
        db.update_ckl_check(&CklCheck {
            status,
            severity_override,
            finding_details: format!("{} finding", status),
            ..entry.clone()
        })
        .unwrap();
    }

    #[test]
    fn test_open_findings_worst_first() {
        let (db, host1, stig) = mapped_db();
        let mut host0 = Asset::named("host0");
        db.add_asset(&mut host0).unwrap();
        db.add_stig_to_asset(stig.id, host0.id).unwrap();

        // host1: SV-1000 (high) open, SV-1001 (medium) not a finding
        let host1_entries = db.get_ckl_checks(host1.id, None).unwrap();
        set(&db, &host1_entries[0], Status::Open, Severity::None);
        set(&db, &host1_entries[1], Status::NotAFinding, Severity::None);
        // host0: SV-1001 open and raised to high
        let host0_entries = db.get_ckl_checks(host0.id, None).unwrap();
        set(&db, &host0_entries[1], Status::Open, Severity::High);

        let (progress, _rx) = Progress::channel();
        let report = build_findings(&db, &progress).unwrap();

        let order: Vec<(&str, &str)> = report
            .findings
            .iter()
            .map(|f| (f.asset.as_str(), f.rule.as_str()))
            .collect();
        assert_eq!(order, vec![("host0", "SV-1001r2_rule"), ("host1", "SV-1000r1_rule")]);
        assert!(report.findings.iter().all(|f| f.severity == "CAT I"));
        assert_eq!(report.findings[1].cci, "CCI-000366");
        assert_eq!(report.findings[1].finding_details, "Open finding");

        assert_eq!(report.assets.len(), 2);
        assert_eq!(report.assets[1].asset, "host1");
        assert_eq!(report.assets[1].summary.open, 1);
        assert_eq!(report.assets[1].summary.not_a_finding, 1);
    }

    #[test]
    fn test_finding_carries_control_name() {
        let db = Database::in_memory().unwrap();
        db.add_family("CM", "Configuration Management").unwrap();
        let control = db.add_control("CM-6", "CONFIGURATION SETTINGS", "").unwrap();
        let mut cci = Cci {
            control_id: Some(control.id),
            cci: 366,
            ..Cci::default()
        };
        db.add_cci(&mut cci).unwrap();

        let mut cache = HashMap::new();
        assert_eq!(control_for(&db, &mut cache, "CCI-000366").unwrap(), "CM-6");
        assert_eq!(control_for(&db, &mut cache, "").unwrap(), "");
        assert_eq!(cache.len(), 2);
    }

    #[tokio::test]
    async fn test_findings_worker_writes_json() {
        let (db, asset, _stig) = mapped_db();
        let entries = db.get_ckl_checks(asset.id, None).unwrap();
        set(&db, &entries[0], Status::Open, Severity::None);

        let dir = tempfile::tempdir().unwrap();
        let output = dir.path().join("findings.json");
        let (handle, _rx) = spawn_worker(WorkerFindingsReport::new(&output), db);
        let worker = handle.await.unwrap().unwrap();
        assert_eq!(worker.report().findings.len(), 1);

        let written: FindingsReport = serde_json::from_str(&std::fs::read_to_string(&output).unwrap()).unwrap();
        assert_eq!(&written, worker.report());
    }
}

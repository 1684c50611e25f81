// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Import checklists written by STIG Viewer (or by the CKL export)

use async_trait::async_trait;
use quick_xml::events::Event;
use std::path::PathBuf;
use tracing::{debug, info};

use super::{Progress, Worker};
use crate::db::Database;
use crate::model::{Asset, CklCheck, Severity, Status};
use crate::xml::{element_text, local_name, reader};
use crate::{Result, StigqterError};

/// Evaluation of one rule as recorded in a checklist
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedVuln {
    pub rule: String,
    pub status: Status,
    pub finding_details: String,
    pub comments: String,
    pub severity_override: Severity,
    pub severity_justification: String,
}

/// An iSTIG block: the benchmark it refers to and its rules
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedIStig {
    pub title: String,
    pub version: i64,
    pub release: String,
    pub vulns: Vec<ParsedVuln>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParsedChecklist {
    pub asset: Asset,
    pub stigs: Vec<ParsedIStig>,
}

fn apply_asset_field(asset: &mut Asset, field: &str, value: String) {
    match field {
        "ASSET_TYPE" if !value.is_empty() => asset.asset_type = value,
        "HOST_NAME" => asset.host_name = value,
        "HOST_IP" => asset.host_ip = value,
        "HOST_MAC" => asset.host_mac = value,
        "HOST_FQDN" => asset.host_fqdn = value,
        "TECH_AREA" => asset.tech_area = value,
        "TARGET_KEY" => asset.target_key = value,
        "WEB_OR_DATABASE" => asset.web_or_database = value.eq_ignore_ascii_case("true"),
        "WEB_DB_SITE" => asset.web_db_site = value,
        "WEB_DB_INSTANCE" => asset.web_db_instance = value,
        _ => {}
    }
}

fn apply_stig_info(istig: &mut ParsedIStig, name: &str, data: String) {
    match name {
        "title" => istig.title = data,
        "version" => istig.version = data.trim().parse().unwrap_or_default(),
        "releaseinfo" => istig.release = data,
        _ => {}
    }
}

/// Parse a `.ckl` document. Elements that are not understood are ignored.
pub fn parse_ckl(document: &str) -> Result<ParsedChecklist> {
    let mut r = reader(document);
    let mut buf = Vec::new();
    let mut inner = Vec::new();

    let mut checklist = ParsedChecklist::default();
    let mut saw_root = false;
    let mut in_asset = false;
    let mut istig: Option<ParsedIStig> = None;
    let mut vuln: Option<ParsedVuln> = None;
    // (name, data) of the SI_DATA or STIG_DATA being read
    let mut pair: (String, String) = Default::default();

    loop {
        buf.clear();
        match r.read_event_into(&mut buf)? {
            Event::Start(e) => {
                let name = local_name(&e);
                match name.as_str() {
                    "CHECKLIST" => saw_root = true,
                    "ASSET" => in_asset = true,
                    "iSTIG" => istig = Some(ParsedIStig::default()),
                    "VULN" => vuln = Some(ParsedVuln::default()),
                    "SI_DATA" | "STIG_DATA" => pair = Default::default(),
                    "SID_NAME" | "VULN_ATTRIBUTE" => pair.0 = element_text(&mut r, &mut inner)?,
                    "SID_DATA" | "ATTRIBUTE_DATA" => pair.1 = element_text(&mut r, &mut inner)?,
                    field if in_asset => {
                        let value = element_text(&mut r, &mut inner)?;
                        apply_asset_field(&mut checklist.asset, field, value);
                    }
                    "STATUS" | "FINDING_DETAILS" | "COMMENTS" | "SEVERITY_OVERRIDE" | "SEVERITY_JUSTIFICATION" => {
                        let value = element_text(&mut r, &mut inner)?;
                        if let Some(v) = vuln.as_mut() {
                            match name.as_str() {
                                "STATUS" => v.status = Status::parse(&value),
                                "FINDING_DETAILS" => v.finding_details = value,
                                "COMMENTS" => v.comments = value,
                                "SEVERITY_OVERRIDE" => v.severity_override = Severity::parse(&value),
                                _ => v.severity_justification = value,
                            }
                        }
                    }
                    _ => {}
                }
            }
            Event::End(e) => match String::from_utf8_lossy(e.local_name().as_ref()).as_ref() {
                "ASSET" => in_asset = false,
                "SI_DATA" => {
                    if let Some(s) = istig.as_mut() {
                        let (name, data) = std::mem::take(&mut pair);
                        apply_stig_info(s, &name, data);
                    }
                }
                "STIG_DATA" => {
                    if let Some(v) = vuln.as_mut() {
                        if pair.0 == "Rule_ID" {
                            v.rule = std::mem::take(&mut pair.1);
                        }
                    }
                }
                "VULN" => {
                    if let (Some(v), Some(s)) = (vuln.take(), istig.as_mut()) {
                        if v.rule.is_empty() {
                            debug!("Skipping VULN without a Rule_ID");
                        } else {
                            s.vulns.push(v);
                        }
                    }
                }
                "iSTIG" => {
                    if let Some(s) = istig.take() {
                        checklist.stigs.push(s);
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_root {
        return Err(StigqterError::Document("not a CHECKLIST document".to_string()));
    }
    checklist.asset.host_name = checklist.asset.host_name.trim().to_string();
    Ok(checklist)
}

/// Load `.ckl` files into the database
pub struct WorkerCklImport {
    files: Vec<PathBuf>,
    updated: usize,
}

impl WorkerCklImport {
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self { files, updated: 0 }
    }

    /// Number of checklist entries updated so far
    pub fn updated(&self) -> usize {
        self.updated
    }

    /// Create or refresh the asset, then apply each iSTIG
    fn store(db: &Database, progress: &Progress, parsed: ParsedChecklist) -> Result<usize> {
        let ParsedChecklist { asset: mut incoming, stigs } = parsed;
        let asset = match db.get_asset_by_name(&incoming.host_name)? {
            Some(existing) => {
                incoming.id = existing.id;
                db.update_asset(&incoming)?;
                incoming
            }
            None => {
                db.add_asset(&mut incoming)?;
                incoming
            }
        };

        let mut mapped: Vec<i64> = db.get_stigs_for_asset(asset.id)?.iter().map(|s| s.id).collect();
        let mut updated = 0;
        for istig in stigs {
            let Some(stig) = db.find_stig(&istig.title, istig.version, &istig.release)? else {
                progress.warning(
                    "STIG Not Imported",
                    format!(
                        "{} Version: {} {} must be imported before checklists that use it",
                        istig.title, istig.version, istig.release
                    ),
                );
                continue;
            };
            if !mapped.contains(&stig.id) {
                db.add_stig_to_asset(stig.id, asset.id)?;
                mapped.push(stig.id);
            }

            for v in istig.vulns {
                let Some(check) = db.get_stig_check_by_rule(stig.id, &v.rule)? else {
                    progress.warning("Unknown Rule", format!("{} is not part of {}", v.rule, stig));
                    continue;
                };
                db.update_ckl_check(&CklCheck {
                    id: 0,
                    asset_id: asset.id,
                    stig_check_id: check.id,
                    status: v.status,
                    finding_details: v.finding_details,
                    comments: v.comments,
                    severity_override: v.severity_override,
                    severity_justification: v.severity_justification,
                })?;
                updated += 1;
            }
        }
        Ok(updated)
    }
}

#[async_trait]
impl Worker for WorkerCklImport {
    fn name(&self) -> &'static str {
        "ckl-import"
    }

    async fn process(&mut self, db: &Database, progress: &Progress) -> Result<()> {
        progress.initialize(self.files.len() as u64, 0);
        for path in &self.files {
            progress.status(format!("Parsing {}…", path.display()));
            let document = match tokio::fs::read_to_string(path).await {
                Ok(document) => document,
                Err(e) => {
                    progress.warning("Invalid Checklist", format!("Unable to read {}: {}", path.display(), e));
                    progress.advance();
                    continue;
                }
            };
            let parsed = match parse_ckl(&document) {
                Ok(parsed) if !parsed.asset.host_name.is_empty() => parsed,
                Ok(_) => {
                    progress.warning("Invalid Checklist", format!("{} has no HOST_NAME", path.display()));
                    progress.advance();
                    continue;
                }
                Err(e) => {
                    progress.warning("Invalid Checklist", format!("{}: {}", path.display(), e));
                    progress.advance();
                    continue;
                }
            };

            progress.status(format!("Importing {}…", parsed.asset));
            self.updated += db.bulk(|db| Self::store(db, progress, parsed))?;
            progress.advance();
        }
        info!("Updated {} checklist entries from {} file(s)", self.updated, self.files.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workers::ckl_export::tests::mapped_db;
    use crate::workers::ckl_export::{collect_stig, write_ckl};
    use crate::workers::{spawn_worker, WorkerEvent};

    const CKL: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!--DISA STIG Viewer :: 2.9-->
<CHECKLIST>
  <ASSET>
    <ROLE>None</ROLE>
    <ASSET_TYPE>Computing</ASSET_TYPE>
    <HOST_NAME>host2</HOST_NAME>
    <HOST_IP>10.0.0.2</HOST_IP>
    <HOST_MAC></HOST_MAC>
    <HOST_FQDN>host2.example.mil</HOST_FQDN>
    <TECH_AREA/>
    <WEB_OR_DATABASE>false</WEB_OR_DATABASE>
  </ASSET>
  <STIGS>
    <iSTIG>
      <STIG_INFO>
        <SI_DATA><SID_NAME>version</SID_NAME><SID_DATA>1</SID_DATA></SI_DATA>
        <SI_DATA><SID_NAME>customname</SID_NAME></SI_DATA>
        <SI_DATA><SID_NAME>releaseinfo</SID_NAME><SID_DATA>Release: 23 Benchmark Date: 26 Jul 2019</SID_DATA></SI_DATA>
        <SI_DATA><SID_NAME>title</SID_NAME><SID_DATA>Sample OS Security Technical Implementation Guide</SID_DATA></SI_DATA>
      </STIG_INFO>
      <VULN>
        <STIG_DATA><VULN_ATTRIBUTE>Vuln_Num</VULN_ATTRIBUTE><ATTRIBUTE_DATA>V-1000</ATTRIBUTE_DATA></STIG_DATA>
        <STIG_DATA><VULN_ATTRIBUTE>Rule_ID</VULN_ATTRIBUTE><ATTRIBUTE_DATA>SV-1000r1_rule</ATTRIBUTE_DATA></STIG_DATA>
        <STATUS>NotAFinding</STATUS>
        <FINDING_DETAILS>Checked &amp; fine</FINDING_DETAILS>
        <COMMENTS></COMMENTS>
        <SEVERITY_OVERRIDE></SEVERITY_OVERRIDE>
        <SEVERITY_JUSTIFICATION></SEVERITY_JUSTIFICATION>
      </VULN>
      <VULN>
        <STIG_DATA><VULN_ATTRIBUTE>Rule_ID</VULN_ATTRIBUTE><ATTRIBUTE_DATA>SV-9999r1_rule</ATTRIBUTE_DATA></STIG_DATA>
        <STATUS>Open</STATUS>
      </VULN>
    </iSTIG>
  </STIGS>
</CHECKLIST>"#;

    #[test]
    fn test_parse_ckl() {
        let parsed = parse_ckl(CKL).unwrap();
        assert_eq!(parsed.asset.host_name, "host2");
        assert_eq!(parsed.asset.host_ip, "10.0.0.2");
        assert_eq!(parsed.asset.host_fqdn, "host2.example.mil");
        assert!(!parsed.asset.web_or_database);

        assert_eq!(parsed.stigs.len(), 1);
        let istig = &parsed.stigs[0];
        assert_eq!(istig.title, "Sample OS Security Technical Implementation Guide");
        assert_eq!(istig.version, 1);
        assert_eq!(istig.release, "Release: 23 Benchmark Date: 26 Jul 2019");
        assert_eq!(istig.vulns.len(), 2);
        assert_eq!(istig.vulns[0].rule, "SV-1000r1_rule");
        assert_eq!(istig.vulns[0].status, Status::NotAFinding);
        assert_eq!(istig.vulns[0].finding_details, "Checked & fine");
        assert_eq!(istig.vulns[1].status, Status::Open);
    }

    #[test]
    fn test_parse_rejects_other_documents() {
        assert!(matches!(parse_ckl("<Benchmark/>"), Err(StigqterError::Document(_))));
    }

    #[test]
    fn test_exported_checklist_reads_back() {
        let (db, asset, stig) = mapped_db();
        let mut entry = db.get_ckl_checks(asset.id, Some(stig.id)).unwrap().remove(1);
        entry.status = Status::NotApplicable;
        entry.comments = "Not installed".to_string();
        entry.severity_override = Severity::High;
        entry.severity_justification = "Exposed".to_string();
        db.update_ckl_check(&entry).unwrap();

        let ckl = write_ckl(&asset, &[collect_stig(&db, &asset, &stig).unwrap()]).unwrap();
        let parsed = parse_ckl(&ckl).unwrap();

        assert_eq!(parsed.asset.host_name, asset.host_name);
        assert_eq!(parsed.asset.host_ip, asset.host_ip);
        let istig = &parsed.stigs[0];
        assert_eq!((istig.title.as_str(), istig.version), (stig.title.as_str(), stig.version));
        assert_eq!(istig.release, stig.release);
        let vuln = &istig.vulns[1];
        assert_eq!(vuln.rule, "SV-1001r2_rule");
        assert_eq!(vuln.status, Status::NotApplicable);
        assert_eq!(vuln.comments, "Not installed");
        assert_eq!(vuln.severity_override, Severity::High);
        assert_eq!(vuln.severity_justification, "Exposed");
    }

    #[tokio::test]
    async fn test_import_worker_creates_asset_and_updates_checks() {
        let (db, _asset, stig) = mapped_db();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host2.ckl");
        std::fs::write(&path, CKL).unwrap();

        let (handle, mut rx) = spawn_worker(WorkerCklImport::new(vec![path]), db.clone());
        let worker = handle.await.unwrap().unwrap();
        assert_eq!(worker.updated(), 1);

        let mut warnings = Vec::new();
        while let Some(event) = rx.recv().await {
            if let WorkerEvent::Warning { title, .. } = event {
                warnings.push(title);
            }
        }
        assert_eq!(warnings, vec!["Unknown Rule".to_string()]);

        let host2 = db.get_asset_by_name("host2").unwrap().unwrap();
        assert_eq!(host2.host_fqdn, "host2.example.mil");
        let mapped: Vec<i64> = db.get_stigs_for_asset(host2.id).unwrap().iter().map(|s| s.id).collect();
        assert_eq!(mapped, vec![stig.id]);

        let check = db.get_stig_check_by_rule(stig.id, "SV-1000r1_rule").unwrap().unwrap();
        let entry = db.find_ckl_check(host2.id, check.id).unwrap().unwrap();
        assert_eq!(entry.status, Status::NotAFinding);
        assert_eq!(entry.finding_details, "Checked & fine");
    }

    #[tokio::test]
    async fn test_import_warns_about_missing_stig() {
        let db = Database::in_memory().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host2.ckl");
        std::fs::write(&path, CKL).unwrap();

        let (handle, mut rx) = spawn_worker(WorkerCklImport::new(vec![path]), db.clone());
        let worker = handle.await.unwrap().unwrap();
        assert_eq!(worker.updated(), 0);

        let mut saw = false;
        while let Some(event) = rx.recv().await {
            if let WorkerEvent::Warning { title, .. } = event {
                saw |= title == "STIG Not Imported";
            }
        }
        assert!(saw);
        assert!(db.get_asset_by_name("host2").unwrap().is_some());
    }

    #[tokio::test]
    async fn test_repeated_istig_is_mapped_once() {
        let (db, _asset, stig) = mapped_db();
        let istig_start = CKL.find("<iSTIG>").unwrap();
        let istig_end = CKL.find("</iSTIG>").unwrap() + "</iSTIG>".len();
        let twice = CKL.replacen(
            &CKL[istig_start..istig_end],
            &CKL[istig_start..istig_end].repeat(2),
            1,
        );
        assert_eq!(parse_ckl(&twice).unwrap().stigs.len(), 2);

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("host2.ckl");
        std::fs::write(&path, twice).unwrap();

        let (handle, _rx) = spawn_worker(WorkerCklImport::new(vec![path]), db.clone());
        let worker = handle.await.unwrap().unwrap();
        assert_eq!(worker.updated(), 2);

        let host2 = db.get_asset_by_name("host2").unwrap().unwrap();
        assert_eq!(db.get_stigs_for_asset(host2.id).unwrap().len(), 1);
        assert_eq!(db.get_ckl_checks(host2.id, Some(stig.id)).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_unreadable_file_warns_and_import_continues() {
        let (db, _asset, _stig) = mapped_db();
        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("corrupt.ckl");
        std::fs::write(&binary, [0xFF, 0xFE, 0x00, 0xC3]).unwrap();
        let missing = dir.path().join("missing.ckl");
        let good = dir.path().join("host2.ckl");
        std::fs::write(&good, CKL).unwrap();

        let worker = WorkerCklImport::new(vec![binary, missing, good]);
        let (handle, mut rx) = spawn_worker(worker, db.clone());
        let worker = handle.await.unwrap().unwrap();
        assert_eq!(worker.updated(), 1);

        let mut invalid = 0;
        while let Some(event) = rx.recv().await {
            if let WorkerEvent::Warning { title, .. } = event {
                invalid += (title == "Invalid Checklist") as usize;
            }
        }
        assert_eq!(invalid, 2);
        assert!(db.get_asset_by_name("host2").unwrap().is_some());
    }
}

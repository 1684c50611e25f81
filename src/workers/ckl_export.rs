// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! STIG Viewer checklist (`.ckl`) export

use async_trait::async_trait;
use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::info;

use super::{Progress, Worker};
use crate::db::Database;
use crate::model::{format_cci, Asset, CklCheck, Stig, StigCheck};
use crate::{Result, StigqterError};

/// One rule of a checklist together with its evaluation
#[derive(Debug, Clone)]
pub struct Vuln {
    pub check: StigCheck,
    pub entry: CklCheck,
    /// `CCI-xxxxxx`, empty when the check has no CCI
    pub cci: String,
}

/// A STIG as it appears inside a checklist
#[derive(Debug, Clone)]
pub struct ChecklistStig {
    pub stig: Stig,
    pub vulns: Vec<Vuln>,
}

/// Gather the checklist entries of `stig` on `asset`, in rule order
pub fn collect_stig(db: &Database, asset: &Asset, stig: &Stig) -> Result<ChecklistStig> {
    let checks: HashMap<i64, StigCheck> = db
        .get_stig_checks(stig.id)?
        .into_iter()
        .map(|c| (c.id, c))
        .collect();
    let mut ccis: HashMap<i64, String> = HashMap::new();

    let mut vulns = Vec::new();
    for entry in db.get_ckl_checks(asset.id, Some(stig.id))? {
        let check = checks
            .get(&entry.stig_check_id)
            .cloned()
            .ok_or_else(|| StigqterError::NotFound(format!("STIG check {}", entry.stig_check_id)))?;
        let cci = match ccis.get(&check.cci_id) {
            Some(cci) => cci.clone(),
            None => {
                let cci = db
                    .get_cci(check.cci_id)?
                    .map(|c| format_cci(c.cci))
                    .unwrap_or_default();
                ccis.insert(check.cci_id, cci.clone());
                cci
            }
        };
        vulns.push(Vuln { check, entry, cci });
    }

    Ok(ChecklistStig {
        stig: stig.clone(),
        vulns,
    })
}

/// `Release: 23 Benchmark Date: 26 Jul 2019` → `R23`
fn short_release(release: &str) -> String {
    let number: String = release
        .trim_start_matches("Release:")
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    if number.is_empty() {
        release.to_string()
    } else {
        format!("R{}", number)
    }
}

pub(crate) fn safe_file_component(value: &str) -> String {
    value
        .trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '-' | '.') { c } else { '_' })
        .collect()
}

/// `<host>_<benchmark>_V<version>R<release>.ckl`
pub fn ckl_file_name(asset: &Asset, stig: &Stig) -> String {
    let benchmark = if stig.benchmark_id.is_empty() { &stig.title } else { &stig.benchmark_id };
    safe_file_component(&format!(
        "{}_{}_V{}{}",
        asset.host_name,
        benchmark,
        stig.version,
        short_release(&stig.release)
    )) + ".ckl"
}

/// The STIGRef value STIG Viewer shows for a benchmark
fn stig_ref(stig: &Stig) -> String {
    format!("{} :: Version {}, {}", stig.title, stig.version, stig.release)
}

fn bool_str(value: bool) -> &'static str {
    if value { "true" } else { "false" }
}

pub(crate) fn start(w: &mut Writer<Vec<u8>>, name: &str) -> Result<()> {
    w.write_event(Event::Start(BytesStart::new(name)))?;
    Ok(())
}

pub(crate) fn end(w: &mut Writer<Vec<u8>>, name: &str) -> Result<()> {
    w.write_event(Event::End(BytesEnd::new(name)))?;
    Ok(())
}

pub(crate) fn element(w: &mut Writer<Vec<u8>>, name: &str, text: &str) -> Result<()> {
    if text.is_empty() {
        w.write_event(Event::Empty(BytesStart::new(name)))?;
        return Ok(());
    }
    start(w, name)?;
    w.write_event(Event::Text(BytesText::new(text)))?;
    end(w, name)
}

fn write_asset(w: &mut Writer<Vec<u8>>, asset: &Asset) -> Result<()> {
    start(w, "ASSET")?;
    element(w, "ROLE", "None")?;
    element(w, "ASSET_TYPE", &asset.asset_type)?;
    element(w, "HOST_NAME", &asset.host_name)?;
    element(w, "HOST_IP", &asset.host_ip)?;
    element(w, "HOST_MAC", &asset.host_mac)?;
    element(w, "HOST_FQDN", &asset.host_fqdn)?;
    element(w, "TECH_AREA", &asset.tech_area)?;
    element(w, "TARGET_KEY", &asset.target_key)?;
    element(w, "WEB_OR_DATABASE", bool_str(asset.web_or_database))?;
    element(w, "WEB_DB_SITE", &asset.web_db_site)?;
    element(w, "WEB_DB_INSTANCE", &asset.web_db_instance)?;
    end(w, "ASSET")
}

fn write_stig_info(w: &mut Writer<Vec<u8>>, stig: &Stig) -> Result<()> {
    let version = stig.version.to_string();
    let uuid = uuid::Uuid::new_v4().to_string();
    let fields: [(&str, &str); 9] = [
        ("version", version.as_str()),
        ("classification", "UNCLASSIFIED"),
        ("stigid", stig.benchmark_id.as_str()),
        ("description", stig.description.as_str()),
        ("filename", stig.file_name.as_str()),
        ("releaseinfo", stig.release.as_str()),
        ("title", stig.title.as_str()),
        ("uuid", uuid.as_str()),
        ("source", "STIG.DOD.MIL"),
    ];

    start(w, "STIG_INFO")?;
    for (name, data) in fields {
        start(w, "SI_DATA")?;
        element(w, "SID_NAME", name)?;
        if !data.is_empty() {
            element(w, "SID_DATA", data)?;
        }
        end(w, "SI_DATA")?;
    }
    end(w, "STIG_INFO")
}

fn write_vuln(w: &mut Writer<Vec<u8>>, stig: &Stig, vuln: &Vuln) -> Result<()> {
    let c = &vuln.check;
    let weight = c.weight.to_string();
    let reference = stig_ref(stig);
    let attributes: [(&str, &str); 25] = [
        ("Vuln_Num", c.vuln_num.as_str()),
        ("Severity", c.severity.as_str()),
        ("Group_Title", c.group_title.as_str()),
        ("Rule_ID", c.rule.as_str()),
        ("Rule_Ver", c.rule_version.as_str()),
        ("Rule_Title", c.title.as_str()),
        ("Vuln_Discuss", c.vuln_discussion.as_str()),
        ("IA_Controls", c.ia_controls.as_str()),
        ("Check_Content", c.check.as_str()),
        ("Fix_Text", c.fix.as_str()),
        ("False_Positives", c.false_positives.as_str()),
        ("False_Negatives", c.false_negatives.as_str()),
        ("Documentable", bool_str(c.documentable)),
        ("Mitigations", c.mitigations.as_str()),
        ("Potential_Impact", c.potential_impact.as_str()),
        ("Third_Party_Tools", c.third_party_tools.as_str()),
        ("Mitigation_Control", c.mitigation_control.as_str()),
        ("Responsibility", c.responsibility.as_str()),
        ("Security_Override_Guidance", c.severity_override_guidance.as_str()),
        ("Check_Content_Ref", c.check_content_ref.as_str()),
        ("Weight", weight.as_str()),
        ("Class", "Unclass"),
        ("STIGRef", reference.as_str()),
        ("TargetKey", c.target_key.as_str()),
        ("CCI_REF", vuln.cci.as_str()),
    ];

    start(w, "VULN")?;
    for (name, data) in attributes {
        if name == "CCI_REF" && data.is_empty() {
            continue;
        }
        start(w, "STIG_DATA")?;
        element(w, "VULN_ATTRIBUTE", name)?;
        element(w, "ATTRIBUTE_DATA", data)?;
        end(w, "STIG_DATA")?;
    }
    let e = &vuln.entry;
    element(w, "STATUS", e.status.ckl_str())?;
    element(w, "FINDING_DETAILS", &e.finding_details)?;
    element(w, "COMMENTS", &e.comments)?;
    element(w, "SEVERITY_OVERRIDE", e.severity_override.as_str())?;
    element(w, "SEVERITY_JUSTIFICATION", &e.severity_justification)?;
    end(w, "VULN")
}

/// Render a checklist for `asset` containing every STIG in `stigs`
pub fn write_ckl(asset: &Asset, stigs: &[ChecklistStig]) -> Result<String> {
    let mut w = Writer::new_with_indent(Vec::new(), b'\t', 1);
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    start(&mut w, "CHECKLIST")?;
    write_asset(&mut w, asset)?;
    start(&mut w, "STIGS")?;
    for istig in stigs {
        start(&mut w, "iSTIG")?;
        write_stig_info(&mut w, &istig.stig)?;
        for vuln in &istig.vulns {
            write_vuln(&mut w, &istig.stig, vuln)?;
        }
        end(&mut w, "iSTIG")?;
    }
    end(&mut w, "STIGS")?;
    end(&mut w, "CHECKLIST")?;

    String::from_utf8(w.into_inner()).map_err(|e| StigqterError::Document(e.to_string()))
}

/// Write `.ckl` files for assets into a directory
pub struct WorkerCklExport {
    dir: PathBuf,
    /// One file per asset instead of one per asset/STIG pair
    combined: bool,
    assets: Option<Vec<i64>>,
    written: Vec<PathBuf>,
}

impl WorkerCklExport {
    pub fn new(dir: impl AsRef<Path>, combined: bool) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
            combined,
            assets: None,
            written: Vec::new(),
        }
    }

    /// Restrict the export to these asset ids
    pub fn with_assets(mut self, asset_ids: Vec<i64>) -> Self {
        self.assets = Some(asset_ids);
        self
    }

    pub fn written(&self) -> &[PathBuf] {
        &self.written
    }

    async fn write(&mut self, name: String, contents: String) -> Result<()> {
        let path = self.dir.join(name);
        tokio::fs::write(&path, contents).await?;
        self.written.push(path);
        Ok(())
    }
}

#[async_trait]
impl Worker for WorkerCklExport {
    fn name(&self) -> &'static str {
        "ckl-export"
    }

    async fn process(&mut self, db: &Database, progress: &Progress) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let assets: Vec<Asset> = match &self.assets {
            Some(ids) => {
                let mut assets = Vec::with_capacity(ids.len());
                for id in ids {
                    let asset = db
                        .get_asset(*id)?
                        .ok_or_else(|| StigqterError::NotFound(format!("Asset {}", id)))?;
                    assets.push(asset);
                }
                assets
            }
            None => db.get_assets()?,
        };

        let mut pairs = Vec::new();
        for asset in assets {
            let stigs = db.get_stigs_for_asset(asset.id)?;
            pairs.push((asset, stigs));
        }
        progress.initialize(pairs.iter().map(|(_, s)| s.len() as u64).sum(), 0);

        for (asset, stigs) in pairs {
            let mut collected = Vec::with_capacity(stigs.len());
            for stig in &stigs {
                progress.status(format!("Writing {} for {}…", stig, asset));
                let istig = collect_stig(db, &asset, stig)?;
                if self.combined {
                    collected.push(istig);
                } else {
                    let ckl = write_ckl(&asset, std::slice::from_ref(&istig))?;
                    self.write(ckl_file_name(&asset, stig), ckl).await?;
                }
                progress.advance();
            }
            if self.combined && !collected.is_empty() {
                let ckl = write_ckl(&asset, &collected)?;
                let name = safe_file_component(&asset.host_name) + ".ckl";
                self.write(name, ckl).await?;
            }
        }

        info!("Exported {} checklist(s) to {}", self.written.len(), self.dir.display());
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::model::{Severity, Status};
    use crate::workers::spawn_worker;
    use crate::workers::stig_add::parse_benchmark;
    use crate::workers::stig_add::tests::{catalog_db, XCCDF};

    /// A database with the sample STIG mapped to `host1`
    pub(crate) fn mapped_db() -> (Database, Asset, Stig) {
        let db = catalog_db();
        let parsed = parse_benchmark(XCCDF, "U_Sample_OS_STIG_V1R23_Manual-xccdf.xml")
            .unwrap()
            .unwrap();
        let checks: Vec<StigCheck> = parsed
            .checks
            .into_iter()
            .map(|p| {
                let mut check = p.check;
                check.cci_id = db.get_cci_by_number(366).unwrap().unwrap().id;
                check
            })
            .collect();
        let stig = db.add_stig(&parsed.stig, &checks, false).unwrap();
        let mut asset = Asset::named("host1");
        asset.host_ip = "10.0.0.1".to_string();
        db.add_asset(&mut asset).unwrap();
        db.add_stig_to_asset(stig.id, asset.id).unwrap();
        (db, asset, stig)
    }

    #[test]
    fn test_short_release_and_file_name() {
        assert_eq!(short_release("Release: 23 Benchmark Date: 26 Jul 2019"), "R23");
        assert_eq!(short_release("custom"), "custom");

        let stig = Stig {
            title: "Sample".to_string(),
            version: 1,
            release: "Release: 23 Benchmark Date: 26 Jul 2019".to_string(),
            benchmark_id: "Sample_OS_STIG".to_string(),
            ..Stig::default()
        };
        assert_eq!(ckl_file_name(&Asset::named("web 01"), &stig), "web_01_Sample_OS_STIG_V1R23.ckl");
    }

    #[test]
    fn test_write_ckl_contains_entries() {
        let (db, asset, stig) = mapped_db();
        let mut entry = db.get_ckl_checks(asset.id, Some(stig.id)).unwrap().remove(0);
        entry.status = Status::Open;
        entry.finding_details = "telnet <enabled> & listening".to_string();
        entry.severity_override = Severity::Low;
        db.update_ckl_check(&entry).unwrap();

        let istig = collect_stig(&db, &asset, &stig).unwrap();
        assert_eq!(istig.vulns.len(), 2);
        assert_eq!(istig.vulns[0].cci, "CCI-000366");

        let ckl = write_ckl(&asset, &[istig]).unwrap();
        assert!(ckl.starts_with("<?xml version=\"1.0\" encoding=\"UTF-8\"?>"));
        assert!(ckl.contains("<HOST_NAME>host1</HOST_NAME>"));
        assert!(ckl.contains("<HOST_IP>10.0.0.1</HOST_IP>"));
        assert!(ckl.contains("<ATTRIBUTE_DATA>SV-1000r1_rule</ATTRIBUTE_DATA>"));
        assert!(ckl.contains("<STATUS>Open</STATUS>"));
        assert!(ckl.contains("<STATUS>Not_Reviewed</STATUS>"));
        assert!(ckl.contains("telnet &lt;enabled&gt; &amp; listening"));
        assert!(ckl.contains("<SEVERITY_OVERRIDE>low</SEVERITY_OVERRIDE>"));
        assert!(ckl.contains("<SID_DATA>Sample_OS_STIG</SID_DATA>"));
    }

    #[tokio::test]
    async fn test_export_worker_writes_files() {
        let (db, _asset, _stig) = mapped_db();
        let dir = tempfile::tempdir().unwrap();

        let (handle, _rx) = spawn_worker(WorkerCklExport::new(dir.path(), false), db.clone());
        let worker = handle.await.unwrap().unwrap();
        assert_eq!(worker.written().len(), 1);
        let name = worker.written()[0].file_name().unwrap().to_string_lossy().to_string();
        assert!(name.starts_with("host1_"));
        assert!(name.ends_with("_V1R23.ckl"));

        let (handle, _rx) = spawn_worker(WorkerCklExport::new(dir.path(), true), db);
        let worker = handle.await.unwrap().unwrap();
        assert_eq!(worker.written(), &[dir.path().join("host1.ckl")]);
    }
}

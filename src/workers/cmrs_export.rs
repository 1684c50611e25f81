// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! CMRS finding-import XML: one ASSET per asset, one TARGET per mapped
//! STIG and one FINDING per checklist entry.

use async_trait::async_trait;
use quick_xml::events::{BytesDecl, BytesStart, BytesText, Event};
use quick_xml::Writer;
use std::path::{Path, PathBuf};
use tracing::info;

use super::ckl_export::{collect_stig, element, end, start, Vuln};
use super::{Progress, Worker};
use crate::db::Database;
use crate::model::{Asset, Severity, Status};
use crate::{Result, StigqterError};

/// Status code used by CMRS
pub fn cmrs_status(status: Status) -> &'static str {
    match status {
        Status::Open => "O",
        Status::NotAFinding => "NF",
        Status::NotApplicable => "NA",
        Status::NotReviewed => "NR",
    }
}

fn element_with(w: &mut Writer<Vec<u8>>, name: &str, attrs: &[(&str, &str)], text: &str) -> Result<()> {
    let tag = BytesStart::new(name).with_attributes(attrs.iter().copied());
    w.write_event(Event::Start(tag))?;
    w.write_event(Event::Text(BytesText::new(text)))?;
    end(w, name)
}

fn write_finding(w: &mut Writer<Vec<u8>>, vuln: &Vuln) -> Result<()> {
    start(w, "FINDING")?;
    let id = if vuln.check.vuln_num.is_empty() { &vuln.check.rule } else { &vuln.check.vuln_num };
    element_with(w, "FINDING_ID", &[("TYPE", "VK"), ("ID", id.as_str())], id)?;
    element(w, "FINDING_STATUS", cmrs_status(vuln.entry.status))?;
    element(w, "TOOL", "Manual")?;
    element(w, "TOOL_VERSION", "")?;
    element(w, "AUTHENTICATED_FINDING", "TRUE")?;
    match vuln.entry.severity_override {
        Severity::None => element(w, "FINDING_DETAILS", &vuln.entry.finding_details)?,
        over => element_with(
            w,
            "FINDING_DETAILS",
            &[("OVERRIDE", over.as_str()), ("JUSTIFICATION", vuln.entry.severity_justification.as_str())],
            &vuln.entry.finding_details,
        )?,
    }
    element(w, "COMMENT", &vuln.entry.comments)?;
    end(w, "FINDING")
}

fn write_asset(db: &Database, w: &mut Writer<Vec<u8>>, asset: &Asset) -> Result<()> {
    start(w, "ASSET")?;
    for (kind, value) in [
        ("HOST_NAME", asset.host_name.as_str()),
        ("IP_ADDRESS", asset.host_ip.as_str()),
        ("MAC_ADDRESS", asset.host_mac.as_str()),
        ("FQDN", asset.host_fqdn.as_str()),
    ] {
        if !value.is_empty() {
            element_with(w, "ASSET_ID", &[("TYPE", kind)], value)?;
        }
    }
    element(w, "ASSET_TYPE", &asset.asset_type)?;

    start(w, "ELEMENT")?;
    let element_key = if asset.target_key.is_empty() { "Unknown" } else { asset.target_key.as_str() };
    element(w, "ELEMENT_KEY", element_key)?;
    for stig in db.get_stigs_for_asset(asset.id)? {
        let istig = collect_stig(db, asset, &stig)?;
        start(w, "TARGET")?;
        let target = if stig.benchmark_id.is_empty() { &stig.title } else { &stig.benchmark_id };
        element(w, "TARGET_KEY", target)?;
        element(w, "TARGET_NAME", &stig.to_string())?;
        for vuln in &istig.vulns {
            write_finding(w, vuln)?;
        }
        end(w, "TARGET")?;
    }
    end(w, "ELEMENT")?;
    end(w, "ASSET")
}

/// Render every asset with its checklist entries
pub fn write_cmrs(db: &Database, progress: &Progress) -> Result<String> {
    let assets = db.get_assets()?;
    progress.initialize(assets.len() as u64, 0);

    let mut w = Writer::new_with_indent(Vec::new(), b'\t', 1);
    w.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;
    start(&mut w, "IMPORT_FILE")?;
    for asset in &assets {
        progress.status(format!("Exporting {}…", asset));
        write_asset(db, &mut w, asset)?;
        progress.advance();
    }
    end(&mut w, "IMPORT_FILE")?;

    String::from_utf8(w.into_inner()).map_err(|e| StigqterError::Document(e.to_string()))
}

/// Write the CMRS export to a file
pub struct WorkerCmrsExport {
    output: PathBuf,
}

impl WorkerCmrsExport {
    pub fn new(output: impl AsRef<Path>) -> Self {
        Self {
            output: output.as_ref().to_path_buf(),
        }
    }
}

#[async_trait]
impl Worker for WorkerCmrsExport {
    fn name(&self) -> &'static str {
        "cmrs-export"
    }

    async fn process(&mut self, db: &Database, progress: &Progress) -> Result<()> {
        let xml = write_cmrs(db, progress)?;
        tokio::fs::write(&self.output, xml).await?;
        info!("Wrote CMRS export to {}", self.output.display());
        Ok(())
    }
}

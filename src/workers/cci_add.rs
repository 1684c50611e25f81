// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Index NIST 800-53 rev 4 families and controls and the DISA CCI list

use async_trait::async_trait;
use quick_xml::events::Event;
use std::collections::HashSet;
use tracing::info;

use super::{Progress, Worker};
use crate::archive::xml_files_from_zip;
use crate::config::SourceConfig;
use crate::db::Database;
use crate::fetch::Fetcher;
use crate::model::{Cci, control_from_cci_index, cci_number, format_cci};
use crate::xml::{attr, element_text, local_name, reader};
use crate::{Result, StigqterError};

/// Families of NIST 800-53 rev 4, used when the family page cannot be read
const REV4_FAMILIES: &[(&str, &str)] = &[
    ("AC", "Access Control"),
    ("AT", "Awareness and Training"),
    ("AU", "Audit and Accountability"),
    ("CA", "Security Assessment and Authorization"),
    ("CM", "Configuration Management"),
    ("CP", "Contingency Planning"),
    ("IA", "Identification and Authentication"),
    ("IR", "Incident Response"),
    ("MA", "Maintenance"),
    ("MP", "Media Protection"),
    ("PE", "Physical and Environmental Protection"),
    ("PL", "Planning"),
    ("PM", "Program Management"),
    ("PS", "Personnel Security"),
    ("RA", "Risk Assessment"),
    ("SA", "System and Services Acquisition"),
    ("SC", "System and Communications Protection"),
    ("SI", "System and Information Integrity"),
];

/// Appendix J privacy families
const PRIVACY_FAMILIES: &[(&str, &str)] = &[
    ("AP", "Authority and Purpose"),
    ("AR", "Accountability, Audit, and Risk Management"),
    ("DI", "Data Quality and Integrity"),
    ("DM", "Data Minimization and Retention"),
    ("IP", "Individual Participation and Redress"),
    ("SE", "Security"),
    ("TR", "Transparency"),
    ("UL", "Use Limitation"),
];

/// Appendix J privacy controls (not part of the controls feed)
const PRIVACY_CONTROLS: &[(&str, &str)] = &[
    ("AP-1", "AUTHORITY TO COLLECT"),
    ("AP-2", "PURPOSE SPECIFICATION"),
    ("AR-1", "GOVERNANCE AND PRIVACY PROGRAM"),
    ("AR-2", "PRIVACY IMPACT AND RISK ASSESSMENT"),
    ("AR-3", "PRIVACY REQUIREMENTS FOR CONTRACTORS AND SERVICE PROVIDERS"),
    ("AR-4", "PRIVACY MONITORING AND AUDITING"),
    ("AR-5", "PRIVACY AWARENESS AND TRAINING"),
    ("AR-6", "PRIVACY REPORTING"),
    ("AR-7", "PRIVACY-ENHANCED SYSTEM DESIGN AND DEVELOPMENT"),
    ("AR-8", "ACCOUNTING OF DISCLOSURES"),
    ("DI-1", "DATA QUALITY"),
    ("DI-1 (1)", "DATA QUALITY | VALIDATE PII"),
    ("DI-1 (2)", "DATA QUALITY | RE-VALIDATE PII"),
    ("DI-2", "DATA INTEGRITY AND DATA INTEGRITY BOARD"),
    ("DI-2 (1)", "DATA INTEGRITY AND DATA INTEGRITY BOARD | PUBLISH AGREEMENTS ON WEBSITE"),
    ("DM-1", "MINIMIZATION OF PERSONALLY IDENTIFIABLE INFORMATION"),
    ("DM-1 (1)", "MINIMIZATION OF PERSONALLY IDENTIFIABLE INFORMATION | LOCATE / REMOVE / REDACT / ANONYMIZE PII"),
    ("DM-2", "DATA RETENTION AND DISPOSAL"),
    ("DM-2 (1)", "DATA RETENTION AND DISPOSAL | SYSTEM CONFIGURATION"),
    ("DM-3", "MINIMIZATION OF PII USED IN TESTING, TRAINING, AND RESEARCH"),
    ("DM-3 (1)", "MINIMIZATION OF PII USED IN TESTING, TRAINING, AND RESEARCH | RISK MINIMIZATION TECHNIQUES"),
    ("IP-1", "CONSENT"),
    ("IP-1 (1)", "CONSENT | MECHANISMS SUPPORTING ITEMIZED OR TIERED CONSENT"),
    ("IP-2", "INDIVIDUAL ACCESS"),
    ("IP-3", "REDRESS"),
    ("IP-4", "COMPLAINT MANAGEMENT"),
    ("IP-4 (1)", "COMPLAINT MANAGEMENT | RESPONSE TIMES"),
    ("SE-1", "INVENTORY OF PERSONALLY IDENTIFIABLE INFORMATION"),
    ("SE-2", "PRIVACY INCIDENT RESPONSE"),
    ("TR-1", "PRIVACY NOTICE"),
    ("TR-1 (1)", "PRIVACY NOTICE | REAL-TIME OR LAYERED NOTICE"),
    ("TR-2", "SYSTEM OF RECORDS NOTICES AND PRIVACY ACT STATEMENTS"),
    ("TR-2 (1)", "SYSTEM OF RECORDS NOTICES AND PRIVACY ACT STATEMENTS | PUBLIC WEBSITE PUBLICATION"),
    ("TR-3", "DISSEMINATION OF PRIVACY PROGRAM INFORMATION"),
    ("UL-1", "INTERNAL USE"),
    ("UL-2", "INFORMATION SHARING WITH THIRD PARTIES"),
];

/// A control read from the 800-53 feed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlEntry {
    pub name: String,
    pub title: String,
    pub description: String,
}

/// A rev 4 CCI read from the DISA CCI list
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CciEntry {
    pub cci: i64,
    pub control: String,
    pub definition: String,
}

/// Family anchors on the NIST rev 4 page: `<a id="...FamilyLink">AC - Access Control</a>`.
///
/// Stops at the first markup error, which real-world HTML eventually hits.
pub fn parse_families(page: &str) -> Vec<(String, String)> {
    let mut families = Vec::new();
    let mut r = reader(page);
    let mut buf = Vec::new();
    let mut inner = Vec::new();

    loop {
        buf.clear();
        let is_family_link = match r.read_event_into(&mut buf) {
            Ok(Event::Start(e)) if local_name(&e).eq_ignore_ascii_case("a") => attr(&e, "id")
                .map(|id| id.ends_with("FamilyLink"))
                .unwrap_or(false),
            Ok(Event::Eof) | Err(_) => break,
            Ok(_) => false,
        };
        if !is_family_link {
            continue;
        }

        let text = match element_text(&mut r, &mut inner) {
            Ok(text) => text,
            Err(_) => break,
        };
        if let Some((acronym, name)) = text.split_once('-') {
            let acronym = acronym.trim();
            let name = name.trim();
            if acronym.len() == 2 && !name.is_empty() {
                families.push((acronym.to_uppercase(), name.to_string()));
            }
        }
    }

    families
}

/// Controls and enhancements from the 800-53 rev 4 XML feed.
///
/// A control's description is the text of its statement; nested statement
/// descriptions are joined by newlines.
pub fn parse_controls(feed: &str) -> Result<Vec<ControlEntry>> {
    let mut controls = Vec::new();
    let mut current: Option<ControlEntry> = None;
    let mut statement_depth = 0usize;
    let mut in_guidance = false;
    let mut r = reader(feed);
    let mut buf = Vec::new();
    let mut inner = Vec::new();

    loop {
        buf.clear();
        match r.read_event_into(&mut buf)? {
            Event::Start(e) => match local_name(&e).as_str() {
                "control" | "control-enhancement" => {
                    if let Some(done) = current.take() {
                        controls.push(done);
                    }
                    current = Some(ControlEntry::default());
                    statement_depth = 0;
                    in_guidance = false;
                }
                "statement" => statement_depth += 1,
                "supplemental-guidance" | "references" => in_guidance = true,
                "number" if statement_depth == 0 && !in_guidance => {
                    let text = element_text(&mut r, &mut inner)?;
                    if let Some(c) = current.as_mut().filter(|c| c.name.is_empty()) {
                        c.name = text;
                    }
                }
                "title" if statement_depth == 0 && !in_guidance => {
                    let text = element_text(&mut r, &mut inner)?;
                    if let Some(c) = current.as_mut().filter(|c| c.title.is_empty()) {
                        c.title = text;
                    }
                }
                "description" if statement_depth > 0 => {
                    let text = element_text(&mut r, &mut inner)?;
                    if let Some(c) = current.as_mut() {
                        if !c.description.is_empty() {
                            c.description.push('\n');
                        }
                        c.description.push_str(&text);
                    }
                }
                _ => {}
            },
            Event::End(e) => match String::from_utf8_lossy(e.local_name().as_ref()).as_ref() {
                "statement" => statement_depth = statement_depth.saturating_sub(1),
                "supplemental-guidance" | "references" => in_guidance = false,
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(done) = current {
        controls.push(done);
    }
    controls.retain(|c| !c.name.is_empty());
    Ok(controls)
}

/// Rev 4 CCIs from the DISA CCI list. Only the first rev 4 reference of
/// each item is used.
pub fn parse_cci_list(document: &str) -> Result<Vec<CciEntry>> {
    let mut entries = Vec::new();
    let mut cci: Option<i64> = None;
    let mut definition = String::new();
    let mut mapped = false;
    let mut r = reader(document);
    let mut buf = Vec::new();
    let mut inner = Vec::new();

    loop {
        buf.clear();
        let (e, is_start) = match r.read_event_into(&mut buf)? {
            Event::Start(e) => (e, true),
            Event::Empty(e) => (e, false),
            Event::Eof => break,
            _ => continue,
        };
        match local_name(&e).as_str() {
            "cci_item" => {
                cci = attr(&e, "id").and_then(|id| cci_number(&id));
                definition.clear();
                mapped = false;
            }
            "definition" if is_start => {
                definition = element_text(&mut r, &mut inner)?;
            }
            "reference" if !mapped => {
                let version = attr(&e, "version").unwrap_or_default();
                let index = attr(&e, "index").unwrap_or_default();
                if let Some(number) = cci.filter(|_| version.trim() == "4" && !index.trim().is_empty()) {
                    entries.push(CciEntry {
                        cci: number,
                        control: control_from_cci_index(&index),
                        definition: definition.clone(),
                    });
                    mapped = true;
                }
            }
            _ => {}
        }
    }

    Ok(entries)
}

/// Downloads and indexes families, controls and CCIs
pub struct WorkerCciAdd {
    sources: SourceConfig,
}

impl WorkerCciAdd {
    pub fn new(sources: SourceConfig) -> Self {
        Self { sources }
    }

    fn add_controls<'a>(&self, db: &Database, progress: &Progress, controls: impl Iterator<Item = (&'a str, &'a str, &'a str)>) -> Result<()> {
        db.bulk(|db| {
            for (name, title, description) in controls {
                progress.status(format!("Adding {}…", name));
                match db.add_control(name, title, description) {
                    Ok(_) | Err(StigqterError::AlreadyExists(_)) => {}
                    Err(StigqterError::NotFound(what)) | Err(StigqterError::InvalidControl(what)) => {
                        progress.warning("Unable to Add Control", format!("{}: {}", name, what));
                    }
                    Err(e) => return Err(e),
                }
                progress.advance();
            }
            Ok(())
        })
    }
}

#[async_trait]
impl Worker for WorkerCciAdd {
    fn name(&self) -> &'static str {
        "cci-add"
    }

    async fn process(&mut self, db: &Database, progress: &Progress) -> Result<()> {
        progress.initialize(1, 0);
        let fetcher = Fetcher::new(&self.sources)?;

        progress.status("Downloading Families…");
        let mut families = match fetcher.download_page(&self.sources.families_url).await {
            Ok(page) => parse_families(&page),
            Err(e) => {
                progress.warning("Family Download Failed", e.to_string());
                Vec::new()
            }
        };
        if families.is_empty() {
            progress.status("Using built-in NIST 800-53 rev 4 families");
            families = REV4_FAMILIES
                .iter()
                .map(|(a, d)| (a.to_string(), d.to_string()))
                .collect();
        }
        families.extend(PRIVACY_FAMILIES.iter().map(|(a, d)| (a.to_string(), d.to_string())));

        db.bulk(|db| {
            for (acronym, name) in &families {
                progress.status(format!("Adding {} ({})…", acronym, name));
                match db.add_family(acronym, name) {
                    Ok(_) | Err(StigqterError::AlreadyExists(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            Ok(())
        })?;

        progress.status("Downloading Controls…");
        let feed = fetcher.download_page(&self.sources.controls_url).await?;
        let controls = parse_controls(&feed)?;
        progress.initialize((controls.len() + PRIVACY_CONTROLS.len() + 2) as u64, 1);
        self.add_controls(
            db,
            progress,
            controls
                .iter()
                .map(|c| (c.name.as_str(), c.title.as_str(), c.description.as_str())),
        )?;
        self.add_controls(db, progress, PRIVACY_CONTROLS.iter().map(|(n, t)| (*n, *t, "")))?;

        progress.status(format!("Downloading {}…", self.sources.cci_list_url));
        let bundle = fetcher.download_bytes(&self.sources.cci_list_url).await?;
        progress.status("Extracting CCIs…");
        let files = xml_files_from_zip(&bundle)?;

        progress.status("Parsing CCIs…");
        let mut entries = Vec::new();
        for file in &files {
            entries.extend(parse_cci_list(&file.text())?);
        }

        progress.initialize(entries.len() as u64 + 1, 1);
        let mut seen = HashSet::new();
        let added = db.bulk(|db| {
            let mut added = 0usize;
            for entry in &entries {
                progress.advance();
                if !seen.insert(entry.cci) {
                    continue;
                }
                progress.status(format!("Adding {}…", format_cci(entry.cci)));
                let control_id = match db.find_control(&entry.control) {
                    Ok(found) => found.map(|c| c.id),
                    Err(StigqterError::InvalidControl(_)) => None,
                    Err(e) => return Err(e),
                };
                if control_id.is_none() {
                    progress.warning(
                        "Unknown Control",
                        format!("{} maps to {}, which is not indexed", format_cci(entry.cci), entry.control),
                    );
                }
                let mut cci = Cci {
                    control_id,
                    cci: entry.cci,
                    definition: entry.definition.clone(),
                    ..Cci::default()
                };
                match db.add_cci(&mut cci) {
                    Ok(()) => added += 1,
                    Err(StigqterError::AlreadyExists(_)) => {}
                    Err(e) => return Err(e),
                }
            }
            Ok(added)
        })?;

        info!("Indexed {} families, {} controls and {} CCIs", families.len(), controls.len(), added);
        Ok(())
    }
}

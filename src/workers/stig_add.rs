// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! Import XCCDF STIG benchmarks from DISA zip bundles, one by one or as
//! the whole SRG/STIG library

use async_trait::async_trait;
use quick_xml::events::Event;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{Progress, Worker};
use crate::archive::{ArchiveEntry, xml_files_from_zip};
use crate::config::SourceConfig;
use crate::db::Database;
use crate::fetch::Fetcher;
use crate::model::{FALLBACK_CCI, Severity, Stig, StigCheck, cci_number, format_cci};
use crate::xml::{attr, element_text, local_name, reader, unescape_lossy};
use crate::{Result, StigqterError};

/// A rule read from a benchmark, with the CCI it names (if any)
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedCheck {
    pub check: StigCheck,
    pub cci: Option<i64>,
}

/// A benchmark read from an XCCDF document
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBenchmark {
    pub stig: Stig,
    pub checks: Vec<ParsedCheck>,
}

/// Text of `<tag>...</tag>` inside an XCCDF rule description
fn description_field(description: &str, tag: &str) -> String {
    let open = format!("<{}>", tag);
    let close = format!("</{}>", tag);
    description
        .find(&open)
        .and_then(|start| {
            let body = &description[start + open.len()..];
            body.find(&close).map(|end| unescape_lossy(body[..end].trim()))
        })
        .unwrap_or_default()
}

/// Fill the rule fields carried inside the description blob
fn apply_description(check: &mut StigCheck, description: &str) {
    check.vuln_discussion = description_field(description, "VulnDiscussion");
    check.false_positives = description_field(description, "FalsePositives");
    check.false_negatives = description_field(description, "FalseNegatives");
    check.documentable = description_field(description, "Documentable")
        .to_lowercase()
        .starts_with('t');
    check.mitigations = description_field(description, "Mitigations");
    check.severity_override_guidance = description_field(description, "SeverityOverrideGuidance");
    check.potential_impact = description_field(description, "PotentialImpacts");
    check.third_party_tools = description_field(description, "ThirdPartyTools");
    check.mitigation_control = description_field(description, "MitigationControl");
    check.responsibility = description_field(description, "Responsibility");
    check.ia_controls = description_field(description, "IAControls");
}

/// Parse an XCCDF benchmark. Documents whose root is not `Benchmark`
/// yield `None`.
pub fn parse_benchmark(document: &str, file_name: &str) -> Result<Option<ParsedBenchmark>> {
    let mut stig = Stig {
        file_name: file_name.to_string(),
        ..Stig::default()
    };
    let mut checks = Vec::new();
    let mut current: Option<ParsedCheck> = None;
    let mut seen_root = false;
    let mut in_rules = false;
    let mut in_profile = false;
    let mut in_group = false;
    let mut in_reference = false;

    let mut r = reader(document);
    let mut buf = Vec::new();
    let mut inner = Vec::new();

    loop {
        buf.clear();
        let (e, is_start) = match r.read_event_into(&mut buf)? {
            Event::Start(e) => (e, true),
            Event::Empty(e) => (e, false),
            Event::End(e) => {
                match e.local_name().as_ref() {
                    b"reference" => in_reference = false,
                    b"Group" => {
                        if let Some(done) = current.take().filter(|c| !c.check.rule.is_empty()) {
                            checks.push(done);
                        }
                        in_group = false;
                    }
                    _ => {}
                }
                continue;
            }
            Event::Eof => break,
            _ => continue,
        };
        let name = local_name(&e);

        if !seen_root {
            if name != "Benchmark" {
                return Ok(None);
            }
            seen_root = true;
            stig.benchmark_id = attr(&e, "id").unwrap_or_default();
            continue;
        }

        match name.as_str() {
            "reference" => {
                in_reference = is_start;
                continue;
            }
            "Profile" => {
                in_profile = true;
                continue;
            }
            "Group" => {
                in_rules = true;
                in_group = true;
                if let Some(done) = current.take().filter(|c| !c.check.rule.is_empty()) {
                    checks.push(done);
                }
                current = Some(ParsedCheck {
                    check: StigCheck {
                        vuln_num: attr(&e, "id").unwrap_or_default().trim().to_string(),
                        weight: 10.0,
                        ..StigCheck::default()
                    },
                    cci: None,
                });
                continue;
            }
            _ => {}
        }

        if !in_rules {
            if in_profile || in_reference || !is_start {
                continue;
            }
            match name.as_str() {
                "title" => stig.title = element_text(&mut r, &mut inner)?,
                "description" => stig.description = element_text(&mut r, &mut inner)?,
                "plain-text" if attr(&e, "id").as_deref().map(str::trim) == Some("release-info") => {
                    stig.release = element_text(&mut r, &mut inner)?;
                }
                "version" => {
                    let text = element_text(&mut r, &mut inner)?;
                    stig.version = text.trim().parse().unwrap_or_default();
                }
                _ => {}
            }
            continue;
        }

        let Some(parsed) = current.as_mut() else {
            continue;
        };
        let check = &mut parsed.check;

        match name.as_str() {
            "Rule" => {
                in_group = false;
                check.rule = attr(&e, "id").unwrap_or_default().trim().to_string();
                check.severity = Severity::parse(&attr(&e, "severity").unwrap_or_default());
                check.weight = attr(&e, "weight")
                    .and_then(|w| w.trim().parse().ok())
                    .unwrap_or(10.0);
            }
            "check-content-ref" => {
                if let Some(reference) = attr(&e, "name") {
                    check.check_content_ref = reference.trim().to_string();
                }
            }
            _ if !is_start => {}
            "identifier" if in_reference => {
                let key = element_text(&mut r, &mut inner)?;
                if check.target_key.is_empty() {
                    check.target_key = key;
                }
            }
            _ if in_reference => {}
            "title" => {
                let text = element_text(&mut r, &mut inner)?;
                if in_group {
                    check.group_title = text;
                } else {
                    check.title = text;
                }
            }
            "description" if !in_group => {
                let text = element_text(&mut r, &mut inner)?;
                apply_description(check, &text);
            }
            "version" if !in_group => check.rule_version = element_text(&mut r, &mut inner)?,
            "ident" => {
                let ident = element_text(&mut r, &mut inner)?;
                if parsed.cci.is_none() && ident.to_uppercase().starts_with("CCI") {
                    parsed.cci = cci_number(&ident);
                }
            }
            "fixtext" => check.fix = element_text(&mut r, &mut inner)?,
            "check-content" => check.check = element_text(&mut r, &mut inner)?,
            _ => {}
        }
    }

    if let Some(done) = current.filter(|c| !c.check.rule.is_empty()) {
        checks.push(done);
    }

    Ok(Some(ParsedBenchmark { stig, checks }))
}

/// Imports every XCCDF benchmark found in the given files
pub struct WorkerStigAdd {
    files: Vec<PathBuf>,
    added: Vec<Stig>,
}

impl WorkerStigAdd {
    /// `files` are STIG zip bundles or bare XCCDF documents
    pub fn new(files: Vec<PathBuf>) -> Self {
        Self {
            files,
            added: Vec::new(),
        }
    }

    /// STIGs stored by the last run
    pub fn added(&self) -> &[Stig] {
        &self.added
    }

    fn documents(path: &Path) -> Result<Vec<ArchiveEntry>> {
        let data = std::fs::read(path)?;
        let is_zip = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.eq_ignore_ascii_case("zip"))
            .unwrap_or(false);
        if is_zip {
            xml_files_from_zip(&data)
        } else {
            Ok(vec![ArchiveEntry {
                name: path.to_string_lossy().to_string(),
                data,
            }])
        }
    }

    fn store(db: &Database, progress: &Progress, parsed: ParsedBenchmark) -> Result<Stig> {
        let ParsedBenchmark { stig, checks } = parsed;
        let mut resolved = Vec::with_capacity(checks.len());
        for ParsedCheck { mut check, cci } in checks {
            let wanted = cci.unwrap_or(FALLBACK_CCI);
            if cci.is_none() {
                progress.warning(
                    "Missing CCI",
                    format!("{} in {} names no CCI; mapping it to {}", check.rule, stig, format_cci(FALLBACK_CCI)),
                );
            }
            let found = db.resolve_cci(wanted, Some(&stig))?;
            if found.cci != wanted {
                check.intended_cci = Some(wanted);
                progress.warning(
                    "Broken CCI",
                    format!(
                        "{} in {} maps to {}, which does not exist in NIST 800-53r4; remapped to {}",
                        check.rule,
                        stig,
                        format_cci(wanted),
                        format_cci(found.cci)
                    ),
                );
            }
            check.cci_id = found.id;
            resolved.push(check);
        }
        db.add_stig(&stig, &resolved, false)
    }
}

/// Parse and store every benchmark in `documents`. Unparseable and
/// duplicate benchmarks only warn.
fn import_documents(
    db: &Database,
    progress: &Progress,
    documents: Vec<ArchiveEntry>,
    added: &mut Vec<Stig>,
) -> Result<()> {
    for document in documents {
        let file_name = document.file_name();
        let parsed = match parse_benchmark(&document.text(), &file_name) {
            Ok(Some(parsed)) => parsed,
            Ok(None) => {
                debug!("{} is not an XCCDF benchmark", document.name);
                continue;
            }
            Err(e) => {
                progress.warning("Unable to Parse STIG", format!("{}: {}", document.name, e));
                continue;
            }
        };

        match WorkerStigAdd::store(db, progress, parsed) {
            Ok(stig) => {
                info!("Added {}", stig);
                added.push(stig);
            }
            Err(StigqterError::AlreadyExists(what)) => {
                progress.warning(
                    "STIG Already Exists",
                    format!("The STIG {} already exists in the database.", what),
                );
            }
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

#[async_trait]
impl Worker for WorkerStigAdd {
    fn name(&self) -> &'static str {
        "stig-add"
    }

    async fn process(&mut self, db: &Database, progress: &Progress) -> Result<()> {
        progress.initialize(self.files.len() as u64, 0);

        for path in &self.files {
            progress.status(format!("Extracting {}…", path.display()));
            let documents = Self::documents(path)?;

            progress.status(format!("Parsing {}…", path.display()));
            import_documents(db, progress, documents, &mut self.added)?;
            progress.advance();
        }

        Ok(())
    }
}

/// First link on the compilations page to an SRG/STIG library zip
pub fn library_link(page: &str) -> Option<String> {
    page.split("href=")
        .skip(1)
        .filter_map(|rest| {
            let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
            let body = &rest[1..];
            body.find(quote).map(|end| body[..end].trim().to_string())
        })
        .find(|href| {
            let lower = href.to_lowercase();
            lower.ends_with(".zip") && lower.contains("stig_library")
        })
}

/// Download the DISA SRG/STIG library and import every benchmark in it
pub struct WorkerStigDownload {
    sources: SourceConfig,
    added: Vec<Stig>,
}

impl WorkerStigDownload {
    pub fn new(sources: SourceConfig) -> Self {
        Self {
            sources,
            added: Vec::new(),
        }
    }

    pub fn added(&self) -> &[Stig] {
        &self.added
    }
}

#[async_trait]
impl Worker for WorkerStigDownload {
    fn name(&self) -> &'static str {
        "stig-download"
    }

    async fn process(&mut self, db: &Database, progress: &Progress) -> Result<()> {
        progress.initialize(3, 0);
        let fetcher = Fetcher::new(&self.sources)?;

        let mut library = self.sources.stig_library_url.clone();
        if !library.to_lowercase().ends_with(".zip") {
            progress.status(format!("Looking up the STIG library on {}…", library));
            let page = fetcher.download_page(&library).await?;
            library = library_link(&page).ok_or_else(|| {
                StigqterError::Document(format!("{} does not link to a STIG library", library))
            })?;
        }
        progress.advance();

        progress.status(format!("Downloading {}…", library));
        let bundle = fetcher.download_bytes(&library).await?;
        progress.advance();

        progress.status("Extracting STIGs…");
        let documents = xml_files_from_zip(&bundle)?;
        import_documents(db, progress, documents, &mut self.added)?;
        progress.advance();

        info!("Imported {} STIG(s) from {}", self.added.len(), library);
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::archive::tests::make_zip;
    use crate::model::Cci;
    use crate::workers::{WorkerEvent, spawn_worker};

    pub(crate) const XCCDF: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<Benchmark xmlns:dc="http://purl.org/dc/elements/1.1/" xmlns="http://checklists.nist.gov/xccdf/1.1" id="Sample_OS_STIG" xml:lang="en">
  <status date="2019-07-26">accepted</status>
  <title>Sample OS Security Technical Implementation Guide</title>
  <description>This STIG is used in tests.</description>
  <reference href="https://cyber.mil">
    <dc:publisher>DISA</dc:publisher>
    <dc:source>STIG.DOD.MIL</dc:source>
  </reference>
  <plain-text id="release-info">Release: 23 Benchmark Date: 26 Jul 2019</plain-text>
  <version>1</version>
  <Profile id="MAC-1_Classified">
    <title>I - Mission Critical Classified</title>
    <description>&lt;ProfileDescription&gt;&lt;/ProfileDescription&gt;</description>
    <select idref="V-1000" selected="true" />
  </Profile>
  <Group id="V-1000">
    <title>SRG-OS-000001</title>
    <description>&lt;GroupDescription&gt;&lt;/GroupDescription&gt;</description>
    <Rule id="SV-1000r1_rule" severity="high" weight="10.0">
      <version>OS-00-000001</version>
      <title>The system must use an approved edition.</title>
      <description>&lt;VulnDiscussion&gt;Older editions lack protections &amp;amp; updates.&lt;/VulnDiscussion&gt;&lt;FalsePositives&gt;&lt;/FalsePositives&gt;&lt;FalseNegatives&gt;&lt;/FalseNegatives&gt;&lt;Documentable&gt;true&lt;/Documentable&gt;&lt;Mitigations&gt;&lt;/Mitigations&gt;&lt;SeverityOverrideGuidance&gt;&lt;/SeverityOverrideGuidance&gt;&lt;PotentialImpacts&gt;&lt;/PotentialImpacts&gt;&lt;ThirdPartyTools&gt;&lt;/ThirdPartyTools&gt;&lt;MitigationControl&gt;&lt;/MitigationControl&gt;&lt;Responsibility&gt;System Administrator&lt;/Responsibility&gt;&lt;IAControls&gt;ECSC-1&lt;/IAControls&gt;</description>
      <reference>
        <dc:title>DPMS Target Sample OS</dc:title>
        <dc:publisher>DISA</dc:publisher>
        <dc:type>DPMS Target</dc:type>
        <dc:subject>Sample OS</dc:subject>
        <dc:identifier>2885</dc:identifier>
      </reference>
      <ident system="http://iase.disa.mil/cci">CCI-000366</ident>
      <fixtext fixref="F-1000r1_fix">Install an approved edition.</fixtext>
      <fix id="F-1000r1_fix" />
      <check system="C-1000r1_chk">
        <check-content-ref name="M" href="Sample_OS_STIG.xml" />
        <check-content>Verify the edition.</check-content>
      </check>
    </Rule>
  </Group>
  <Group id="V-1001">
    <title>SRG-OS-000002</title>
    <description>&lt;GroupDescription&gt;&lt;/GroupDescription&gt;</description>
    <Rule id="SV-1001r2_rule" severity="medium" weight="10.0">
      <version>OS-00-000002</version>
      <title>Audit records must be kept.</title>
      <description>&lt;VulnDiscussion&gt;Keep records.&lt;/VulnDiscussion&gt;&lt;Documentable&gt;false&lt;/Documentable&gt;</description>
      <ident system="http://cyber.mil/legacy">V-1001</ident>
      <ident system="http://iase.disa.mil/cci">CCI-999999</ident>
      <fixtext fixref="F-1001r2_fix">Keep them.</fixtext>
      <check system="C-1001r2_chk">
        <check-content-ref name="M" href="Sample_OS_STIG.xml" />
        <check-content>Look at them.</check-content>
      </check>
    </Rule>
  </Group>
</Benchmark>"#;

    #[test]
    fn test_parse_benchmark_header() {
        let parsed = parse_benchmark(XCCDF, "U_Sample_OS_V1R23_Manual-xccdf.xml").unwrap().unwrap();
        let stig = &parsed.stig;
        assert_eq!(stig.title, "Sample OS Security Technical Implementation Guide");
        assert_eq!(stig.description, "This STIG is used in tests.");
        assert_eq!(stig.release, "Release: 23 Benchmark Date: 26 Jul 2019");
        assert_eq!(stig.version, 1);
        assert_eq!(stig.benchmark_id, "Sample_OS_STIG");
        assert_eq!(stig.file_name, "U_Sample_OS_V1R23_Manual-xccdf.xml");
    }

    #[test]
    fn test_parse_benchmark_rules() {
        let parsed = parse_benchmark(XCCDF, "x.xml").unwrap().unwrap();
        assert_eq!(parsed.checks.len(), 2);

        let first = &parsed.checks[0];
        assert_eq!(first.cci, Some(366));
        let c = &first.check;
        assert_eq!(c.vuln_num, "V-1000");
        assert_eq!(c.group_title, "SRG-OS-000001");
        assert_eq!(c.rule, "SV-1000r1_rule");
        assert_eq!(c.rule_version, "OS-00-000001");
        assert_eq!(c.severity, Severity::High);
        assert_eq!(c.title, "The system must use an approved edition.");
        assert_eq!(c.vuln_discussion, "Older editions lack protections & updates.");
        assert!(c.documentable);
        assert_eq!(c.responsibility, "System Administrator");
        assert_eq!(c.ia_controls, "ECSC-1");
        assert_eq!(c.target_key, "2885");
        assert_eq!(c.fix, "Install an approved edition.");
        assert_eq!(c.check_content_ref, "M");
        assert_eq!(c.check, "Verify the edition.");

        let second = &parsed.checks[1];
        assert_eq!(second.cci, Some(999_999));
        assert_eq!(second.check.severity, Severity::Medium);
        assert!(!second.check.documentable);
        assert_eq!(second.check.target_key, "");
    }

    #[test]
    fn test_non_benchmark_documents_are_skipped() {
        assert_eq!(parse_benchmark("<cci_list/>", "x.xml").unwrap(), None);
        assert_eq!(parse_benchmark("<?xml version=\"1.0\"?><CHECKLIST></CHECKLIST>", "x.ckl").unwrap(), None);
    }

    /// Database with CCI-000366 present so STIG imports can resolve
    pub(crate) fn catalog_db() -> Database {
        let db = Database::in_memory().unwrap();
        let mut cci = Cci {
            cci: FALLBACK_CCI,
            definition: "Implement the security configuration settings.".to_string(),
            ..Cci::default()
        };
        db.add_cci(&mut cci).unwrap();
        db
    }

    #[tokio::test]
    async fn test_worker_imports_zip_and_remaps_broken_cci() {
        let dir = tempfile::tempdir().unwrap();
        let bundle = dir.path().join("U_Sample_OS_V1R23_STIG.zip");
        std::fs::write(
            &bundle,
            make_zip(&[
                ("U_Sample_OS_V1R23_Manual-xccdf.xml", XCCDF.as_bytes()),
                ("U_Sample_OS_V1R23_Overview.xml", b"<overview/>"),
            ]),
        )
        .unwrap();

        let db = catalog_db();
        let (handle, mut rx) = spawn_worker(WorkerStigAdd::new(vec![bundle.clone()]), db.clone());
        let worker = handle.await.unwrap().unwrap();
        assert_eq!(worker.added().len(), 1);

        let stig = &worker.added()[0];
        let checks = db.get_stig_checks(stig.id).unwrap();
        assert_eq!(checks.len(), 2);
        let fallback = db.get_cci_by_number(FALLBACK_CCI).unwrap().unwrap();
        assert!(checks.iter().all(|c| c.cci_id == fallback.id));
        // Only the broken mapping remembers what it asked for
        assert_eq!(checks[0].intended_cci, None);
        assert_eq!(checks[1].intended_cci, Some(999_999));

        let mut broken = false;
        while let Some(event) = rx.recv().await {
            if let WorkerEvent::Warning { title, .. } = event {
                broken |= title == "Broken CCI";
            }
        }
        assert!(broken);

        // Importing the same bundle again only warns
        let (handle, _rx) = spawn_worker(WorkerStigAdd::new(vec![bundle]), db.clone());
        assert!(handle.await.unwrap().unwrap().added().is_empty());
        assert_eq!(db.get_stigs().unwrap().len(), 1);
    }

    #[test]
    fn test_library_link() {
        let page = r#"<a href="/stigs/compilations/readme.pdf">Readme</a>
            <a class="link" href='https://dl.dod.cyber.mil/wp-content/uploads/stigs/zip/U_SRG-STIG_Library_2019_10v2.zip'>Library</a>"#;
        assert_eq!(
            library_link(page).as_deref(),
            Some("https://dl.dod.cyber.mil/wp-content/uploads/stigs/zip/U_SRG-STIG_Library_2019_10v2.zip")
        );
        assert_eq!(library_link("<a href=\"other.zip\">x</a>"), None);
    }

    #[tokio::test]
    async fn test_download_worker_imports_library_from_page() {
        let dir = tempfile::tempdir().unwrap();
        let library = dir.path().join("U_SRG-STIG_Library_2019_10v2.zip");
        let bundle = make_zip(&[("U_Sample_OS_V1R23_Manual-xccdf.xml", XCCDF.as_bytes())]);
        std::fs::write(&library, make_zip(&[("U_Sample_OS_V1R23_STIG.zip", &bundle)])).unwrap();
        let page = dir.path().join("compilations.html");
        std::fs::write(&page, format!("<a href=\"{}\">SRG-STIG Library</a>", library.display())).unwrap();

        let sources = SourceConfig {
            stig_library_url: page.to_string_lossy().to_string(),
            ..SourceConfig::default()
        };
        let db = catalog_db();
        let (handle, _rx) = spawn_worker(WorkerStigDownload::new(sources), db.clone());
        let worker = handle.await.unwrap().unwrap();

        assert_eq!(worker.added().len(), 1);
        assert_eq!(worker.added()[0].benchmark_id, "Sample_OS_STIG");
        assert_eq!(db.get_stig_checks(worker.added()[0].id).unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_download_worker_rejects_page_without_library() {
        let dir = tempfile::tempdir().unwrap();
        let page = dir.path().join("compilations.html");
        std::fs::write(&page, "<p>moved</p>").unwrap();
        let sources = SourceConfig {
            stig_library_url: page.to_string_lossy().to_string(),
            ..SourceConfig::default()
        };
        let (handle, _rx) = spawn_worker(WorkerStigDownload::new(sources), catalog_db());
        assert!(matches!(handle.await.unwrap(), Err(StigqterError::Document(_))));
    }
}

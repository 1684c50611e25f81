// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2025 Jonathan D. A. Jewell <hyperpolymath>

//! STIGQter command line

use anyhow::{Context, anyhow, bail};
use clap::{Parser, Subcommand};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use stigqter::config::AppConfig;
use stigqter::db::Database;
use stigqter::model::{Asset, Severity, Status, format_cci};
use stigqter::workers::{
    Worker, WorkerAssetAdd, WorkerCciAdd, WorkerCciDelete, WorkerCklExport, WorkerCklImport,
    WorkerCmrsExport, WorkerEmassImport, WorkerEmassReport, WorkerEvent, WorkerFindingsReport,
    WorkerMapUnmapped, WorkerStigAdd, WorkerStigDelete, WorkerStigDownload, spawn_worker,
};

/// STIGQter CLI - STIG checklist manager
#[derive(Parser, Debug)]
#[command(name = "stigqter")]
#[command(author = "Jonathan D. A. Jewell <hyperpolymath>")]
#[command(version)]
#[command(about = "Manage STIG checklists, CCIs and eMASS test results", long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (JSON format)
    #[arg(short, long, default_value = "stigqter.json", global = true)]
    config: PathBuf,

    /// Enable verbose logging (debug level)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Enable trace logging (most verbose)
    #[arg(long, global = true)]
    trace: bool,

    /// Output format for listings
    #[arg(long, global = true, default_value = "text", value_parser = ["text", "json"])]
    format: String,

    /// Suppress non-essential output (quiet mode)
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// NIST 800-53 families, controls and CCIs
    Cci {
        #[command(subcommand)]
        action: CciCommands,
    },

    /// Imported STIG benchmarks
    Stig {
        #[command(subcommand)]
        action: StigCommands,
    },

    /// Assets and their STIG mappings
    Asset {
        #[command(subcommand)]
        action: AssetCommands,
    },

    /// Checklist entries
    Check {
        #[command(subcommand)]
        action: CheckCommands,
    },

    /// STIG Viewer checklists
    Ckl {
        #[command(subcommand)]
        action: CklCommands,
    },

    /// eMASS Test Result exchange
    Emass {
        #[command(subcommand)]
        action: EmassCommands,
    },

    /// Findings and CMRS reports
    Report {
        #[command(subcommand)]
        action: ReportCommands,
    },

    /// Database operations
    Db {
        #[command(subcommand)]
        action: DbCommands,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

#[derive(Subcommand, Debug)]
enum CciCommands {
    /// Download and index the 800-53 rev4 catalog and the DISA CCI list
    Update,

    /// Remove all families, controls and CCIs
    Delete,

    /// List CCIs
    List {
        /// Only CCIs mapped to this control (e.g. "AC-2 (1)")
        #[arg(long)]
        control: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum StigCommands {
    /// Import STIG bundles (zip) or XCCDF files; glob patterns are expanded
    Add {
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Delete STIGs by id
    Delete {
        #[arg(required = true)]
        ids: Vec<i64>,
    },

    /// Download the DISA SRG/STIG library and import every STIG in it
    Download,

    /// Move checks parked on CCI-000366 to the CCI their STIG named,
    /// now that it is indexed
    Remap,

    /// List imported STIGs
    List,

    /// List the checks of a STIG
    Checks { id: i64 },
}

#[derive(Subcommand, Debug)]
enum AssetCommands {
    /// Create an asset
    Add {
        host_name: String,

        #[arg(long)]
        ip: Option<String>,

        #[arg(long)]
        mac: Option<String>,

        #[arg(long)]
        fqdn: Option<String>,

        #[arg(long)]
        tech_area: Option<String>,

        /// Asset type (default: Computing)
        #[arg(long = "type")]
        asset_type: Option<String>,

        /// STIG ids to map to the new asset
        #[arg(short, long = "stig")]
        stigs: Vec<i64>,
    },

    /// Delete an asset with no STIGs mapped
    Delete { host_name: String },

    /// List assets
    List,

    /// Show an asset's STIGs and checklist tallies
    Show { host_name: String },

    /// Map a STIG to an asset
    Map { host_name: String, stig_id: i64 },

    /// Remove a STIG (and its checklist entries) from an asset
    Unmap { host_name: String, stig_id: i64 },
}

#[derive(Subcommand, Debug)]
enum CheckCommands {
    /// Record the evaluation of one rule on an asset
    Set {
        host_name: String,

        /// Rule id (e.g. SV-1000r1_rule)
        rule: String,

        /// Open, NotAFinding, Not_Applicable or Not_Reviewed
        #[arg(short, long)]
        status: String,

        #[arg(long)]
        details: Option<String>,

        #[arg(long)]
        comments: Option<String>,

        /// low, medium, high (or CAT I-III); empty clears it
        #[arg(long)]
        severity_override: Option<String>,

        #[arg(long)]
        justification: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum CklCommands {
    /// Write checklists into a directory
    Export {
        dir: PathBuf,

        /// One checklist per asset holding all of its STIGs
        #[arg(long)]
        combined: bool,

        /// Only these assets (host names)
        #[arg(short, long = "asset")]
        assets: Vec<String>,
    },

    /// Import checklists
    Import {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
enum ReportCommands {
    /// Write every open finding, worst first, as JSON
    Findings { output: PathBuf },

    /// Write the CMRS finding-import XML
    Cmrs { output: PathBuf },
}

#[derive(Subcommand, Debug)]
enum EmassCommands {
    /// Load an eMASS Test Result Import workbook
    Import { workbook: PathBuf },

    /// Write the compliance rollup as JSON
    Report { output: PathBuf },

    /// Forget the loaded eMASS test results
    Clear,
}

#[derive(Subcommand, Debug)]
enum DbCommands {
    /// Show database statistics
    Stats,

    /// Vacuum database (reclaim space)
    Vacuum,

    /// Drop everything and start over
    Reset {
        /// Skip confirmation
        #[arg(long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigCommands {
    /// Show current configuration
    Show,

    /// Generate default configuration file
    Generate {
        /// Output file path
        #[arg(short, long, default_value = "stigqter.json")]
        output: PathBuf,
    },

    /// Validate configuration file
    Validate,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.trace {
        "trace"
    } else if cli.verbose {
        "debug"
    } else if cli.quiet {
        "warn"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = AppConfig::load(&cli.config)
        .with_context(|| format!("Failed to load {}", cli.config.display()))?;
    let json = cli.format == "json";

    match cli.command {
        Commands::Config { action } => run_config_command(config, action, &cli.config),
        command => {
            let db = Database::open(&config.database.path)
                .with_context(|| format!("Failed to open database {}", config.database.path))?;
            debug!("Database opened: {}", config.database.path);
            match command {
                Commands::Cci { action } => run_cci_command(&config, &db, action, json).await,
                Commands::Stig { action } => run_stig_command(&config, &db, action, json).await,
                Commands::Asset { action } => run_asset_command(&db, action, json).await,
                Commands::Check { action } => run_check_command(&db, action),
                Commands::Ckl { action } => run_ckl_command(&db, action).await,
                Commands::Emass { action } => run_emass_command(&config, &db, action).await,
                Commands::Report { action } => run_report_command(&db, action).await,
                Commands::Db { action } => run_db_command(&db, action, json),
                Commands::Config { .. } => Ok(()),
            }
        }
    }
}

/// Run a worker to completion, rendering its events as log lines
async fn run_worker<W: Worker + 'static>(worker: W, db: &Database) -> anyhow::Result<W> {
    let name = worker.name();
    let (handle, mut rx) = spawn_worker(worker, db.clone());

    let (mut max, mut value, mut warnings) = (0u64, 0u64, 0usize);
    while let Some(event) = rx.recv().await {
        match event {
            WorkerEvent::Initialize { max: m, value: v } => {
                max = m;
                value = v;
            }
            WorkerEvent::Advance => value += 1,
            WorkerEvent::Status(message) if max > 0 => info!("[{}/{}] {}", value.min(max), max, message),
            WorkerEvent::Status(message) => info!("{}", message),
            // Already logged by the worker
            WorkerEvent::Warning { .. } => warnings += 1,
            WorkerEvent::Finished => break,
        }
    }

    let worker = handle
        .await
        .with_context(|| format!("{} task did not complete", name))?
        .with_context(|| format!("{} failed", name))?;
    if warnings > 0 {
        warn!("{} finished with {} warning(s)", name, warnings);
    }
    Ok(worker)
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn find_asset(db: &Database, host_name: &str) -> anyhow::Result<Asset> {
    db.get_asset_by_name(host_name)?
        .ok_or_else(|| anyhow!("No asset named {}", host_name))
}

/// Expand glob patterns; a pattern without matches must name an existing file
fn expand_paths(patterns: &[String]) -> anyhow::Result<Vec<PathBuf>> {
    let mut paths = Vec::new();
    for pattern in patterns {
        let matches: Vec<PathBuf> = glob::glob(pattern)
            .with_context(|| format!("Invalid pattern {}", pattern))?
            .filter_map(|entry| entry.ok())
            .collect();
        if matches.is_empty() {
            let path = PathBuf::from(pattern);
            if !path.exists() {
                bail!("{} does not exist", pattern);
            }
            paths.push(path);
        } else {
            paths.extend(matches);
        }
    }
    Ok(paths)
}

async fn run_cci_command(config: &AppConfig, db: &Database, action: CciCommands, json: bool) -> anyhow::Result<()> {
    match action {
        CciCommands::Update => {
            run_worker(WorkerCciAdd::new(config.sources.clone()), db).await?;
            let stats = db.get_stats()?;
            println!(
                "Indexed {} families, {} controls, {} CCIs",
                stats.families, stats.controls, stats.ccis
            );
        }
        CciCommands::Delete => {
            run_worker(WorkerCciDelete::new(), db).await?;
            println!("CCI/RMF information removed");
        }
        CciCommands::List { control } => {
            let mut ccis = db.get_ccis()?;
            if let Some(name) = control {
                let control = db
                    .find_control(&name)?
                    .ok_or_else(|| anyhow!("No control named {}", name))?;
                ccis.retain(|c| c.control_id == Some(control.id));
            }
            if json {
                return print_json(&ccis);
            }
            for cci in ccis {
                let control = match cci.control_id {
                    Some(id) => match db.get_control(id)? {
                        Some(control) => db.control_name(&control)?,
                        None => String::new(),
                    },
                    None => String::new(),
                };
                println!("{}\t{}\t{}", format_cci(cci.cci), control, cci.definition);
            }
        }
    }
    Ok(())
}

async fn run_stig_command(config: &AppConfig, db: &Database, action: StigCommands, json: bool) -> anyhow::Result<()> {
    match action {
        StigCommands::Add { paths } => {
            let files = expand_paths(&paths)?;
            let worker = run_worker(WorkerStigAdd::new(files), db).await?;
            for stig in worker.added() {
                println!("Added {}", stig);
            }
        }
        StigCommands::Delete { ids } => {
            let worker = run_worker(WorkerStigDelete::new(ids), db).await?;
            println!("Deleted {} STIG(s)", worker.deleted());
        }
        StigCommands::Download => {
            let worker = run_worker(WorkerStigDownload::new(config.sources.clone()), db).await?;
            println!("Imported {} STIG(s) from the library", worker.added().len());
        }
        StigCommands::Remap => {
            let worker = run_worker(WorkerMapUnmapped::new(), db).await?;
            println!("Remapped {} check(s)", worker.remapped());
        }
        StigCommands::List => {
            let stigs = db.get_stigs()?;
            if json {
                return print_json(&stigs);
            }
            for stig in stigs {
                println!("{}\t{}", stig.id, stig);
            }
        }
        StigCommands::Checks { id } => {
            let stig = db.get_stig(id)?.ok_or_else(|| anyhow!("No STIG with id {}", id))?;
            let checks = db.get_stig_checks(stig.id)?;
            if json {
                return print_json(&checks);
            }
            println!("{}", stig);
            for check in checks {
                println!("  {}\t{}\t{}", check.rule, check.severity.category(), check.title);
            }
        }
    }
    Ok(())
}

async fn run_asset_command(db: &Database, action: AssetCommands, json: bool) -> anyhow::Result<()> {
    match action {
        AssetCommands::Add { host_name, ip, mac, fqdn, tech_area, asset_type, stigs } => {
            let mut asset = Asset::named(&host_name);
            asset.host_ip = ip.unwrap_or_default();
            asset.host_mac = mac.unwrap_or_default();
            asset.host_fqdn = fqdn.unwrap_or_default();
            asset.tech_area = tech_area.unwrap_or_default();
            if let Some(asset_type) = asset_type {
                asset.asset_type = asset_type;
            }
            let worker = run_worker(WorkerAssetAdd::new(asset, stigs), db).await?;
            println!("Added asset {} (id {})", worker.asset(), worker.asset().id);
        }
        AssetCommands::Delete { host_name } => {
            let asset = find_asset(db, &host_name)?;
            db.delete_asset(asset.id)?;
            println!("Deleted asset {}", asset);
        }
        AssetCommands::List => {
            let assets = db.get_assets()?;
            if json {
                return print_json(&assets);
            }
            for asset in assets {
                println!("{}\t{}\t{}", asset.id, asset, asset.host_ip);
            }
        }
        AssetCommands::Show { host_name } => {
            let asset = find_asset(db, &host_name)?;
            let stigs = db.get_stigs_for_asset(asset.id)?;
            let summary = db.asset_summary(asset.id)?;
            if json {
                return print_json(&serde_json::json!({
                    "asset": asset,
                    "stigs": stigs,
                    "summary": summary,
                }));
            }
            println!("{} ({})", asset, asset.asset_type);
            println!("  IP: {}  MAC: {}  FQDN: {}", asset.host_ip, asset.host_mac, asset.host_fqdn);
            println!("  STIGs:");
            for stig in &stigs {
                println!("    {}\t{}", stig.id, stig);
            }
            println!(
                "  Checks: {} total, {} open, {} not a finding, {} not applicable, {} not reviewed",
                summary.total, summary.open, summary.not_a_finding, summary.not_applicable, summary.not_reviewed
            );
        }
        AssetCommands::Map { host_name, stig_id } => {
            let asset = find_asset(db, &host_name)?;
            let created = db.add_stig_to_asset(stig_id, asset.id)?;
            println!("Mapped STIG {} to {} ({} checks)", stig_id, asset, created);
        }
        AssetCommands::Unmap { host_name, stig_id } => {
            let asset = find_asset(db, &host_name)?;
            db.delete_stig_from_asset(stig_id, asset.id)?;
            println!("Removed STIG {} from {}", stig_id, asset);
        }
    }
    Ok(())
}

fn run_check_command(db: &Database, action: CheckCommands) -> anyhow::Result<()> {
    match action {
        CheckCommands::Set { host_name, rule, status, details, comments, severity_override, justification } => {
            let asset = find_asset(db, &host_name)?;
            let mut found = None;
            for stig in db.get_stigs_for_asset(asset.id)? {
                if let Some(check) = db.get_stig_check_by_rule(stig.id, &rule)? {
                    found = Some(check);
                    break;
                }
            }
            let check = found.ok_or_else(|| anyhow!("{} is not part of any STIG mapped to {}", rule, asset))?;
            let mut entry = db
                .find_ckl_check(asset.id, check.id)?
                .ok_or_else(|| anyhow!("No checklist entry for {} on {}", rule, asset))?;

            let parsed = Status::parse(&status);
            if parsed == Status::NotReviewed && !status.to_lowercase().contains("review") {
                bail!("Unknown status \"{}\"", status);
            }
            entry.status = parsed;
            if let Some(details) = details {
                entry.finding_details = details;
            }
            if let Some(comments) = comments {
                entry.comments = comments;
            }
            if let Some(severity) = severity_override {
                entry.severity_override = Severity::parse(&severity);
            }
            if let Some(justification) = justification {
                entry.severity_justification = justification;
            }
            db.update_ckl_check(&entry)?;
            println!("{} {} on {}: {}", check.rule, check.title, asset, entry.status);
        }
    }
    Ok(())
}

async fn run_ckl_command(db: &Database, action: CklCommands) -> anyhow::Result<()> {
    match action {
        CklCommands::Export { dir, combined, assets } => {
            let mut worker = WorkerCklExport::new(&dir, combined);
            if !assets.is_empty() {
                let ids = assets
                    .iter()
                    .map(|host| find_asset(db, host).map(|a| a.id))
                    .collect::<anyhow::Result<Vec<_>>>()?;
                worker = worker.with_assets(ids);
            }
            let worker = run_worker(worker, db).await?;
            for path in worker.written() {
                println!("{}", path.display());
            }
        }
        CklCommands::Import { files } => {
            let worker = run_worker(WorkerCklImport::new(files), db).await?;
            println!("Updated {} checklist entries", worker.updated());
        }
    }
    Ok(())
}

async fn run_emass_command(config: &AppConfig, db: &Database, action: EmassCommands) -> anyhow::Result<()> {
    match action {
        EmassCommands::Import { workbook } => {
            let worker = run_worker(WorkerEmassImport::new(&workbook, config.report.date_format.clone()), db).await?;
            println!("Imported {} test result(s) from {}", worker.imported(), workbook.display());
        }
        EmassCommands::Report { output } => {
            let worker = run_worker(WorkerEmassReport::new(&output, config.report.clone()), db).await?;
            println!("Wrote {} row(s) to {}", worker.rows().len(), output.display());
        }
        EmassCommands::Clear => {
            db.clear_emass_import()?;
            println!("eMASS test results removed");
        }
    }
    Ok(())
}

async fn run_report_command(db: &Database, action: ReportCommands) -> anyhow::Result<()> {
    match action {
        ReportCommands::Findings { output } => {
            let worker = run_worker(WorkerFindingsReport::new(&output), db).await?;
            println!("Wrote {} finding(s) to {}", worker.report().findings.len(), output.display());
        }
        ReportCommands::Cmrs { output } => {
            run_worker(WorkerCmrsExport::new(&output), db).await?;
            println!("Wrote {}", output.display());
        }
    }
    Ok(())
}

fn run_db_command(db: &Database, action: DbCommands, json: bool) -> anyhow::Result<()> {
    match action {
        DbCommands::Stats => {
            let stats = db.get_stats()?;
            if json {
                return print_json(&stats);
            }
            println!("Database Statistics (schema v{}):", db.schema_version()?);
            println!("  Families: {}", stats.families);
            println!("  Controls: {}", stats.controls);
            println!("  CCIs: {}", stats.ccis);
            println!("  STIGs: {}", stats.stigs);
            println!("  STIG checks: {}", stats.stig_checks);
            println!("  Assets: {}", stats.assets);
            println!("  Checklist entries: {}", stats.ckl_checks);
        }
        DbCommands::Vacuum => {
            db.vacuum()?;
            println!("Database vacuumed successfully");
        }
        DbCommands::Reset { force } => {
            if !force {
                eprintln!("Use --force to confirm dropping all data");
                return Ok(());
            }
            db.reset()?;
            println!("Database reset");
        }
    }
    Ok(())
}

fn run_config_command(config: AppConfig, action: ConfigCommands, config_path: &Path) -> anyhow::Result<()> {
    match action {
        ConfigCommands::Show => print_json(&config)?,
        ConfigCommands::Generate { output } => {
            AppConfig::default().save(&output)?;
            println!("Generated config at {}", output.display());
        }
        ConfigCommands::Validate => {
            config.validate()?;
            println!("Configuration at {} is valid", config_path.display());
            println!("  Database: {}", config.database.path);
            println!("  CCI list: {}", config.sources.cci_list_url);
            println!("  Tested by: {}", config.report.tester());
        }
    }
    Ok(())
}

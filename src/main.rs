use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use siem_policy_manager::codec::{alarms, rules};
use siem_policy_manager::{
    AlarmTemplate, ImportService, ManagerConfig, MemoryRepository, PolicyRepository,
    RelationshipDetector, SignatureIndex, TenantFileStore, TenantId,
};

#[derive(Parser, Debug)]
#[command(name = "siem_policy_manager")]
#[command(about = "Operator tooling for SIEM rule/alarm policy documents")]
struct Args {
    /// Configuration file path
    #[arg(long, env = "POLICY_CONFIG", default_value = "policy_manager.toml")]
    config: PathBuf,

    /// Tenant scope for all operations
    #[arg(long, env = "POLICY_TENANT", default_value = "default")]
    tenant: String,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum DocumentKind {
    Rule,
    Alarm,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Parse a document and report its contents
    Inspect {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, value_enum)]
        kind: DocumentKind,
        /// Event-ID mapping table (JSON); defaults to the configured path
        #[arg(long, env = "POLICY_MAPPING")]
        mapping: Option<PathBuf>,
    },
    /// Resolve an identifier to platform event IDs
    Resolve {
        /// Event-ID mapping table (JSON); defaults to the configured path
        #[arg(long, env = "POLICY_MAPPING")]
        mapping: Option<PathBuf>,
        identifier: String,
    },
    /// Detect rule/alarm relationships across two documents
    Detect {
        #[arg(long)]
        rules: PathBuf,
        #[arg(long)]
        alarms: PathBuf,
    },
    /// Import a rule document and re-export it
    Export {
        #[arg(long)]
        rules: PathBuf,
        /// Output path; omit to store in the tenant's upload directory
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Generate an alarm document from a rule document
    Generate {
        #[arg(long)]
        rules: PathBuf,
        /// Output path; omit to store in the tenant's upload directory
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Structurally validate a document
    Validate {
        #[arg(long)]
        file: PathBuf,
        #[arg(long, value_enum)]
        kind: DocumentKind,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    let config = if args.config.exists() {
        ManagerConfig::load(&args.config)
            .await
            .with_context(|| format!("failed to load {}", args.config.display()))?
    } else {
        ManagerConfig::default()
    };

    let tenant = TenantId::new(args.tenant.clone());

    match args.command {
        Command::Inspect {
            file,
            kind,
            mapping,
        } => {
            let xml = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let index = load_index(mapping.as_deref(), &config)?;
            inspect(&tenant, &xml, kind, &index)?;
        }
        Command::Resolve {
            mapping,
            identifier,
        } => {
            let index = load_index(mapping.as_deref(), &config)?;
            let event_ids = index.resolve(&identifier);
            let details = index.describe(&event_ids);
            println!("{}", serde_json::to_string_pretty(&details)?);
        }
        Command::Detect { rules, alarms } => {
            detect(&tenant, &rules, &alarms).await?;
        }
        Command::Export { rules: path, out } => {
            let xml = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let parsed = rules::parse_rules_document(&tenant, &xml)?;
            let exported = rules::rules_to_xml(&parsed)?;
            let stored = write_output(&config, &tenant, "rule", &exported, out).await?;
            println!("exported {} rules to {}", parsed.len(), stored.display());
        }
        Command::Generate { rules: path, out } => {
            let xml = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("failed to read {}", path.display()))?;
            let parsed = rules::parse_rules_document(&tenant, &xml)?;
            let template = AlarmTemplate::default();
            let mut generated = Vec::new();
            for rule in parsed.iter().filter(|r| r.sig_id.is_some()) {
                generated.push(template.generate_for_rule(rule)?);
            }
            let doc = alarms::alarms_to_xml(&generated);
            let stored = write_output(&config, &tenant, "alarm", &doc, out).await?;
            println!(
                "generated {} alarms from {} rules to {}",
                generated.len(),
                parsed.len(),
                stored.display()
            );
        }
        Command::Validate { file, kind } => {
            let xml = tokio::fs::read_to_string(&file)
                .await
                .with_context(|| format!("failed to read {}", file.display()))?;
            let report = match kind {
                DocumentKind::Rule => rules::validate_rules_document(&xml),
                DocumentKind::Alarm => alarms::validate_alarms_document(&xml),
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            if !report.valid {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn load_index(mapping: Option<&Path>, config: &ManagerConfig) -> Result<SignatureIndex> {
    let path = mapping.unwrap_or(&config.mapping_path);
    Ok(SignatureIndex::load(path)?)
}

/// Writes a produced document to an explicit path, or into the tenant's
/// configured upload directory with retention applied.
async fn write_output(
    config: &ManagerConfig,
    tenant: &TenantId,
    file_type: &str,
    content: &str,
    out: Option<PathBuf>,
) -> Result<PathBuf> {
    match out {
        Some(path) => {
            tokio::fs::write(&path, content)
                .await
                .with_context(|| format!("failed to write {}", path.display()))?;
            Ok(path)
        }
        None => {
            let store = TenantFileStore::new(config.upload_root.clone());
            let files = store.tenant(tenant).await?;
            let path = files
                .store_document(file_type, content, config.cleanup_keep_latest)
                .await?;
            Ok(path)
        }
    }
}

fn inspect(
    tenant: &TenantId,
    xml: &str,
    kind: DocumentKind,
    index: &SignatureIndex,
) -> Result<()> {
    match kind {
        DocumentKind::Rule => {
            let parsed = rules::parse_rules_document(tenant, xml)?;
            let entries: Vec<_> = parsed
                .iter()
                .map(|r| {
                    json!({
                        "rule_id": r.rule_id,
                        "sig_id": r.sig_id,
                        "name": r.name,
                        "severity": r.severity,
                        "event_ids": index.rule_event_ids(r),
                    })
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "count": parsed.len(),
                    "rules": entries,
                }))?
            );
        }
        DocumentKind::Alarm => {
            let parsed = alarms::parse_alarms_document(tenant, xml)?;
            let entries: Vec<_> = parsed
                .iter()
                .map(|a| {
                    json!({
                        "name": a.name,
                        "match_field": a.match_field,
                        "match_value": a.match_value,
                        "severity": a.severity,
                        "event_ids": index.alarm_event_ids(a, &[]),
                    })
                })
                .collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "count": parsed.len(),
                    "alarms": entries,
                }))?
            );
        }
    }
    Ok(())
}

async fn detect(tenant: &TenantId, rules_path: &Path, alarms_path: &Path) -> Result<()> {
    let rules_xml = tokio::fs::read_to_string(rules_path)
        .await
        .with_context(|| format!("failed to read {}", rules_path.display()))?;
    let alarms_xml = tokio::fs::read_to_string(alarms_path)
        .await
        .with_context(|| format!("failed to read {}", alarms_path.display()))?;

    let repo = Arc::new(MemoryRepository::new());
    let service = ImportService::new(repo.clone());
    service
        .import_rules(tenant, &rules_xml)
        .await
        .context("rule import failed")?;
    let report = service
        .import_alarms(tenant, &alarms_xml)
        .await
        .context("alarm import failed")?;

    // Imports seed everything there is to find; the detection pass confirms
    // idempotence and reports the final link set.
    let outcome = RelationshipDetector::new(repo.clone()).detect(tenant).await;
    if !outcome.success {
        anyhow::bail!(
            "detection failed: {}",
            outcome.error.unwrap_or_else(|| "unknown error".to_string())
        );
    }

    let links = repo.links_for_tenant(tenant).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&json!({
            "links_seeded": report.links_seeded,
            "links_detected": outcome.count,
            "links": links,
        }))?
    );
    Ok(())
}

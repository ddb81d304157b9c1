//! Snapshot Inspector
//!
//! Prints the metadata and per-group contents of a save pair without
//! reconstructing any objects.
//!
//! ## Configuration
//!
//! The pipeline is built from the `PERSIST_*` environment variables (see
//! `PersistenceConfig::from_env`), plus:
//! - `RUST_LOG`: Log level filter (default: info)
//! - `LOG_FORMAT`: "json" for structured logs, "pretty" for development (default: pretty)
//!
//! ## Usage
//!
//! ```bash
//! PERSIST_COMPRESSION=gzip cargo run --bin snapshot_inspect -- ./saves slot1
//! ```

use std::collections::BTreeMap;

use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use graph_persistence_kernel::manager::PersistenceManager;
use graph_persistence_kernel::{
    FileMetadata, FileSaveStore, Pipeline, PersistenceConfig, PersistenceUnit, SaveStore, StrategyTag,
    PERSISTENCE_SCHEMA_VERSION,
};

/// Initialize the tracing subscriber with JSON or pretty format
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| "snapshot_inspect=info,graph_persistence_kernel=info".into());

    if log_format == "json" {
        tracing_subscriber::registry()
            .with(filter)
            .with(
                fmt::layer()
                    .json()
                    .with_target(true)
                    .flatten_event(true)
                    .with_writer(std::io::stderr),
            )
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true).with_writer(std::io::stderr))
            .init();
    }
}

#[derive(Serialize)]
struct GroupSummary {
    nodes: usize,
    roots: Vec<String>,
    instances: usize,
    strategies: BTreeMap<String, usize>,
}

#[derive(Serialize)]
struct Report {
    schema_version: &'static str,
    metadata: FileMetadata,
    fingerprint: String,
    payload_bytes: usize,
    groups: BTreeMap<String, GroupSummary>,
}

fn summarize(unit: &PersistenceUnit) -> BTreeMap<String, GroupSummary> {
    unit.groups
        .iter()
        .map(|(group, snapshot)| {
            let mut strategies: BTreeMap<String, usize> = BTreeMap::new();
            for node in snapshot.nodes.values() {
                *strategies.entry(node.strategy.to_string()).or_default() += 1;
            }
            let summary = GroupSummary {
                nodes: snapshot.len(),
                roots: snapshot.roots.keys().cloned().collect(),
                instances: snapshot.instances.len(),
                strategies,
            };
            (group.clone(), summary)
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args: Vec<String> = std::env::args().collect();
    let (dir, name) = match args.as_slice() {
        [_, dir, name] => (dir.clone(), name.clone()),
        _ => {
            eprintln!("usage: snapshot_inspect <dir> <name>");
            std::process::exit(2);
        }
    };

    let config = PersistenceConfig::from_env()?;
    let pipeline = Pipeline::from_config(&config)?;
    info!(dir = %dir, save = %name, pipeline = ?pipeline, "inspecting save");

    let store = FileSaveStore::new(&dir);
    let Some(meta_bytes) = store.read(&PersistenceManager::metadata_file(&name)).await? else {
        warn!(save = %name, "metadata file not found");
        std::process::exit(1);
    };
    let metadata = FileMetadata::from_bytes(&meta_bytes)?;
    if !metadata.is_compatible(&config.version) {
        warn!(
            running = %config.version,
            found = %metadata.version,
            "version differs from PERSIST_VERSION; a manager would refuse this load"
        );
    }

    let Some(data) = store.read(&PersistenceManager::data_file(&name)).await? else {
        warn!(save = %name, "data file not found");
        std::process::exit(1);
    };
    let unit: PersistenceUnit = pipeline.read(&data, &metadata.checksum, &metadata.checksum_algorithm)?;

    let unsupported = unit
        .groups
        .values()
        .flat_map(|s| s.nodes.values())
        .filter(|n| n.strategy == StrategyTag::Unsupported)
        .count();
    if unsupported > 0 {
        warn!(unsupported, "snapshot contains unsupported nodes");
    }

    let report = Report {
        schema_version: PERSISTENCE_SCHEMA_VERSION,
        fingerprint: unit.fingerprint()?,
        payload_bytes: data.len(),
        groups: summarize(&unit),
        metadata,
    };
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

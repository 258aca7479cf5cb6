//! Replay a record save against a fixture.
//!
//! Loads an allocator configuration (TOML) and a store fixture (JSON), runs
//! the save orchestrator once for the given record and prints the resulting
//! report as JSON. The updated store can optionally be written back out so
//! several saves can be chained.
//!
//! ```text
//! studyalloc-replay --config alloc.toml --fixture store.json \
//!     --project 1 --record 17 --event 41 --group 105 --output store.json
//! ```

use std::collections::BTreeMap;
use std::path::PathBuf;

use anyhow::Context;
use anyhow::Result;
use clap::Parser;
use serde::Deserialize;
use studyalloc::AllocatorConfig;
use studyalloc::SaveEvent;
use studyalloc::SaveOrchestrator;
use studyalloc_store::EventId;
use studyalloc_store::GroupId;
use studyalloc_store::ProjectId;
use studyalloc_store::RecordKey;
use studyalloc_testing::DeterministicRecordStore;
use studyalloc_testing::StaticGroupDirectory;
use studyalloc_testing::StoreSnapshot;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "studyalloc-replay", version, about = "Replay a record save against a store fixture")]
struct Args {
    /// Path to the TOML allocator configuration.
    #[arg(long, env = "STUDYALLOC_CONFIG")]
    config: PathBuf,

    /// Path to the JSON store fixture.
    #[arg(long)]
    fixture: PathBuf,

    /// Project the save happened in.
    #[arg(long)]
    project: u64,

    /// Record that was saved.
    #[arg(long)]
    record: String,

    /// Event the save happened on.
    #[arg(long)]
    event: u64,

    /// Data access group of the saving user.
    #[arg(long)]
    group: Option<u64>,

    /// Instrument that was saved.
    #[arg(long)]
    instrument: Option<String>,

    /// Write the store contents after the save to this path.
    #[arg(long)]
    output: Option<PathBuf>,
}

/// Fixture file layout.
#[derive(Debug, Default, Deserialize)]
struct Fixture {
    #[serde(default)]
    store: StoreSnapshot,
    /// `project -> group -> display name`
    #[serde(default)]
    groups: BTreeMap<ProjectId, BTreeMap<GroupId, String>>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let args = Args::parse();

    let config = AllocatorConfig::from_toml_file(&args.config)?;
    let fixture_text = std::fs::read_to_string(&args.fixture)
        .with_context(|| format!("failed to read fixture {}", args.fixture.display()))?;
    let fixture: Fixture = serde_json::from_str(&fixture_text)
        .with_context(|| format!("failed to parse fixture {}", args.fixture.display()))?;

    let store = DeterministicRecordStore::from_snapshot(fixture.store);
    let directory = StaticGroupDirectory::from_map(fixture.groups).into_arc();
    let orchestrator = SaveOrchestrator::try_new(store.clone(), directory, &config)?;

    let save = SaveEvent {
        project: ProjectId(args.project),
        record: RecordKey::new(args.record),
        instrument: args.instrument,
        event: EventId(args.event),
        group: args.group.map(GroupId),
        repeat_instance: None,
    };
    let report = orchestrator.on_record_saved(save).await;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if let Some(path) = args.output {
        let snapshot = store.snapshot().await;
        let json = serde_json::to_string_pretty(&snapshot)?;
        std::fs::write(&path, json).with_context(|| format!("failed to write {}", path.display()))?;
        info!(path = %path.display(), "wrote updated store");
    }

    Ok(())
}

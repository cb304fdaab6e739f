//! roiflow command line tools.
//!
//! Provides the `roiflow` binary:
//! - `demo` builds a multi-lane data selection over synthetic volumes,
//!   puts a time-blocked cache behind every lane, reads everything twice
//!   and saves the project.
//! - `inspect` prints the group tree stored in a project database.
//!
//! The database path comes from `--db`, then `ROIFLOW_DB_PATH`, then
//! `roiflow.db`.

mod synthetic;

use std::process;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use roiflow_cache::{OpBlockCache, SerialBlockCache};
use roiflow_core::{Graph, GraphConfig, OperatorId, SlotId, Value};
use roiflow_ops::{DatasetInfo, MultiLaneDataSelection, ReaderRegistry, SerialDataset};
use roiflow_storage::{
    Attr, Group, GroupStore, OperatorSerializer, PayloadStore, SerialLaneCount, SerialSlot,
    SqliteStore, StorageError,
};

use synthetic::SyntheticReader;

const DEFAULT_DB_PATH: &str = "roiflow.db";

/// roiflow lazy dataflow tools.
#[derive(Parser)]
#[command(name = "roiflow", about = "roiflow lazy dataflow tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Build, read and save a demo pipeline.
    Demo {
        /// Number of lanes (datasets) to create.
        #[arg(short, long, default_value_t = 2)]
        lanes: usize,

        /// Path to the project database file.
        #[arg(short, long)]
        db: Option<String>,
    },
    /// Print the stored group tree of a project.
    Inspect {
        /// Path to the project database file.
        #[arg(short, long)]
        db: Option<String>,
    },
}

fn main() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let exit_code = match cli.command {
        Commands::Demo { lanes, db } => run_demo(lanes, &db_path(db)),
        Commands::Inspect { db } => run_inspect(&db_path(db)),
    };
    process::exit(exit_code);
}

fn db_path(flag: Option<String>) -> String {
    flag.or_else(|| std::env::var("ROIFLOW_DB_PATH").ok())
        .unwrap_or_else(|| DEFAULT_DB_PATH.to_string())
}

/// Exit code for a failed command: 1 = graph error, 3 = storage error.
fn exit_code(err: &StorageError) -> i32 {
    match err {
        StorageError::Core(_) => 1,
        _ => 3,
    }
}

// ---------------------------------------------------------------------------
// demo
// ---------------------------------------------------------------------------

/// Execute the demo subcommand.
fn run_demo(lanes: usize, db_path: &str) -> i32 {
    match demo(lanes, db_path) {
        Ok(()) => 0,
        Err(e) => {
            eprintln!("Error: {e}");
            exit_code(&e)
        }
    }
}

struct LaneCache {
    cache: OperatorId,
    output: SlotId,
}

fn demo(lanes: usize, db_path: &str) -> Result<(), StorageError> {
    let graph = Graph::new(GraphConfig::from_env())?;
    let readers = Arc::new(ReaderRegistry::new().with_scheme("mem", Arc::new(SyntheticReader)));
    let selection = MultiLaneDataSelection::add(&graph, readers, &["tczyx"])?;
    selection.set_roles(&graph, &["Raw Data"])?;

    let mut caches = Vec::with_capacity(lanes);
    for n in 0..lanes {
        let info = DatasetInfo::url(&format!("mem://demo/lane-{n}"));
        let lane = selection.push_lane(&graph, vec![Some(info)])?;

        let cache = graph.add_operator(OpBlockCache::new())?;
        graph.set_value(graph.input(cache, "BlockShape")?, Value::Shape(vec![1, 0, 0, 0, 0]))?;
        graph.connect(graph.input(cache, "Input")?, selection.image(&graph, lane, 0)?)?;
        caches.push(LaneCache {
            cache,
            output: graph.output(cache, "Output")?,
        });
    }
    info!(lanes, "pipeline built");

    for pass in ["cold", "warm"] {
        let started = Instant::now();
        let mut total = 0.0f64;
        for lane in &caches {
            let data = graph.get_all(lane.output)?.wait()?;
            total += data.iter().map(|&v| f64::from(v)).sum::<f64>();
        }
        let recomputed: u64 = caches
            .iter()
            .map(|lane| graph.with_operator::<OpBlockCache, _>(lane.cache, |c| c.recompute_count()))
            .sum::<Result<u64, _>>()?;
        println!(
            "{pass} read: {:?}, sum {total}, blocks computed so far {recomputed}",
            started.elapsed()
        );
    }

    let mut store = SqliteStore::new(db_path)?;
    let payloads: Arc<dyn PayloadStore> = Arc::new(store.clone());
    let group = selection.id();
    let mut input_data = OperatorSerializer::new("Input Data")
        .with_item(SerialSlot::new(graph.input(group, "DatasetRoles")?, "Roles"))
        .with_item(SerialLaneCount::new(group))
        .with_item(SerialDataset::new(graph.input(group, "DatasetGroup")?, "infos"));
    input_data.save(&graph, &mut store)?;

    let mut cache_data = OperatorSerializer::new("Cache");
    for (lane, entry) in caches.iter().enumerate() {
        cache_data.add_item(Box::new(SerialBlockCache::new(
            entry.cache,
            &format!("lane{lane}"),
            payloads.clone(),
        )));
    }
    cache_data.save(&graph, &mut store)?;

    println!(
        "saved {lanes} lane(s) and {} block payload(s) to {db_path}",
        store.payload_count()?
    );
    Ok(())
}

// ---------------------------------------------------------------------------
// inspect
// ---------------------------------------------------------------------------

/// Execute the inspect subcommand.
fn run_inspect(db_path: &str) -> i32 {
    let store = match SqliteStore::new(db_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Error: failed to open database '{db_path}': {e}");
            return 3;
        }
    };
    match store.load_tree("") {
        Ok(tree) => {
            print_group(&tree, "/", 0);
            0
        }
        Err(e) => {
            eprintln!("Error: failed to read project: {e}");
            exit_code(&e)
        }
    }
}

fn print_group(group: &Group, name: &str, depth: usize) {
    let indent = "  ".repeat(depth);
    println!("{indent}{name}");
    for (key, attr) in &group.attrs {
        println!("{indent}  {key} = {}", describe_attr(attr));
    }
    for (child_name, child) in &group.groups {
        print_group(child, &format!("{child_name}/"), depth + 1);
    }
}

fn describe_attr(attr: &Attr) -> String {
    match attr {
        Attr::Bool(b) => b.to_string(),
        Attr::Int(n) => n.to_string(),
        Attr::Float(x) => x.to_string(),
        Attr::Str(s) => format!("{s:?}"),
        Attr::IntArray(v) => format!("{v:?}"),
        Attr::FloatArray(v) => format!("{v:?}"),
        Attr::StrArray(v) => format!("{v:?}"),
        Attr::Bytes(bytes) => format!("<{} bytes>", bytes.len()),
        Attr::Json(json) => json.to_string(),
    }
}

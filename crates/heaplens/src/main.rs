use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use heaplens_core::extract::{extract_collection, ExtractorRegistry, HashedCollectionExtractor};
use heaplens_core::quantize::{Function, Quantize, Value};
use heaplens_core::snapshot::{schema, Snapshot};
use heaplens_dump::{BuildOptions, IndexBuilder};

const DEFAULT_PAGE_SIZE: usize = 64 * 1024;
const MAX_HISTOGRAM_ROWS: usize = 10_000;

#[derive(Parser)]
#[command(name = "heaplens", about = "Index and analyze heap snapshot dumps")]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(about = "Build the snapshot index and persist its artifacts")]
    Index {
        dump: PathBuf,
        /// Artifact prefix; defaults to the dump path itself.
        #[arg(long)]
        out: Option<PathBuf>,
        #[arg(long, default_value_t = DEFAULT_PAGE_SIZE)]
        page_size: usize,
        #[arg(long)]
        json: bool,
    },
    #[command(about = "Build the index and report what was found")]
    Info {
        dump: PathBuf,
        #[arg(long)]
        json: bool,
    },
    #[command(about = "Per-class instance histogram over the indexed dump")]
    Histogram {
        dump: PathBuf,
        #[arg(long, default_value_t = 20)]
        top: usize,
        #[arg(long)]
        json: bool,
    },
    #[command(about = "Inspect collection instances of one class")]
    Collections {
        dump: PathBuf,
        #[arg(long)]
        class: String,
        #[arg(long, default_value = "table")]
        array_field: String,
        #[arg(long)]
        json: bool,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();
    let args = Args::parse();
    match args.command {
        Command::Index { dump, out, page_size, json } => cmd_index(dump, out, page_size, json),
        Command::Info { dump, json } => cmd_info(dump, json),
        Command::Histogram { dump, top, json } => cmd_histogram(dump, top, json),
        Command::Collections { dump, class, array_field, json } => {
            cmd_collections(dump, class, array_field, json)
        }
    }
}

fn cmd_index(dump: PathBuf, out: Option<PathBuf>, page_size: usize, json: bool) -> Result<()> {
    let options = BuildOptions { page_size, ..BuildOptions::default() };
    let index = IndexBuilder::with_options(&dump, options).build()?;
    let prefix = out.unwrap_or_else(|| dump.clone());
    let paths = index.write_to(&prefix)?;
    if json {
        println!(
            "{}",
            serde_json::json!({
                "type": "index",
                "objects": index.object_count(),
                "stats": index.stats,
                "artifacts": {
                    "identifiers": paths.identifiers,
                    "object_to_class": paths.object_to_class,
                    "object_to_position": paths.object_to_position,
                    "object_to_size": paths.object_to_size,
                    "outbound": paths.outbound,
                    "classes": paths.classes,
                    "gc_roots": paths.gc_roots,
                    "strings": paths.strings,
                },
            })
        );
    } else {
        println!("indexed {} objects from {}", index.object_count(), dump.display());
        println!("artifacts written under prefix {}", prefix.display());
        print_stats(&index.stats);
    }
    Ok(())
}

fn cmd_info(dump: PathBuf, json: bool) -> Result<()> {
    let snapshot = Snapshot::from_dump(&dump)?;
    if json {
        println!(
            "{}",
            serde_json::json!({
                "type": "info",
                "objects": snapshot.object_count(),
                "classes": snapshot.classes().count(),
                "gc_roots": snapshot.gc_roots().len(),
                "schema_version": snapshot.schema_version(),
                "stats": snapshot.stats(),
            })
        );
    } else {
        println!("{}", dump.display());
        println!("  objects:  {}", snapshot.object_count());
        println!("  classes:  {}", snapshot.classes().count());
        println!("  gc roots: {}", snapshot.gc_roots().len());
        print_stats(snapshot.stats());
    }
    Ok(())
}

fn cmd_histogram(dump: PathBuf, top: usize, json: bool) -> Result<()> {
    let snapshot = Snapshot::from_dump(&dump)?;
    let mut quantize = Quantize::value_distribution(&["class"])
        .column("objects", Function::Count)
        .column("shallow size", Function::SumInt)
        .build();
    for id in 0..snapshot.object_count() {
        if snapshot.is_class(id) {
            continue;
        }
        let class = snapshot.class_of(id)?;
        quantize.add_value(
            Some(id),
            &[
                Value::Text(class.name.clone()),
                Value::Null,
                Value::Int(snapshot.size_of(id) as i64),
            ],
        )?;
    }
    let table = quantize.result();
    let mut rows: Vec<_> = table.rows.iter().take(MAX_HISTOGRAM_ROWS).collect();
    rows.sort_by_key(|row| std::cmp::Reverse(row.values[0].as_i64().unwrap_or(0)));
    rows.truncate(top);
    if json {
        let rows: Vec<_> = rows
            .iter()
            .map(|row| {
                serde_json::json!({
                    "class": row.key_values[0],
                    "objects": row.values[0],
                    "shallow_size": row.values[1],
                })
            })
            .collect();
        println!("{}", serde_json::json!({ "type": "histogram", "rows": rows }));
    } else {
        println!("{:<48} {:>10} {:>14}", "CLASS", "OBJECTS", "SHALLOW SIZE");
        for row in rows {
            println!(
                "{:<48} {:>10} {:>14}",
                row.key_values[0].to_string(),
                row.values[0].to_string(),
                row.values[1].to_string()
            );
        }
    }
    Ok(())
}

fn cmd_collections(dump: PathBuf, class: String, array_field: String, json: bool) -> Result<()> {
    let snapshot = Snapshot::from_dump(&dump)?;
    let class_id = snapshot
        .class_by_name(&class)
        .and_then(|c| c.object_id)
        .ok_or_else(|| anyhow!("no class named {:?} in this snapshot", class))?;
    let mut registry = ExtractorRegistry::new();
    let array_field: &'static str = Box::leak(array_field.into_boxed_str());
    registry.register_collection(
        &class,
        schema::ALL,
        Arc::new(HashedCollectionExtractor::new(array_field)),
    );

    let mut lines = Vec::new();
    for id in 0..snapshot.object_count() {
        if snapshot.index().object_to_class.get(id) != u64::from(class_id) || snapshot.is_class(id)
        {
            continue;
        }
        let object = match snapshot.object(id) {
            Some(object) => object,
            None => continue,
        };
        let Some(extracted) = extract_collection(object, &registry, None)? else {
            continue;
        };
        lines.push((id, extracted.size()?, extracted.capacity()?, extracted.fill_ratio()?));
    }
    if json {
        let rows: Vec<_> = lines
            .iter()
            .map(|(id, size, capacity, fill)| {
                serde_json::json!({
                    "object_id": id,
                    "size": size,
                    "capacity": capacity,
                    "fill_ratio": fill,
                })
            })
            .collect();
        println!("{}", serde_json::json!({ "type": "collections", "class": class, "rows": rows }));
    } else {
        println!("{:<10} {:>8} {:>10} {:>10}", "OBJECT", "SIZE", "CAPACITY", "FILL");
        for (id, size, capacity, fill) in lines {
            println!(
                "{:<10} {:>8} {:>10} {:>10}",
                id,
                display_opt(size),
                display_opt(capacity),
                fill.map(|f| format!("{:.2}", f)).unwrap_or_default(),
            );
        }
    }
    Ok(())
}

fn display_opt<T: std::fmt::Display>(value: Option<T>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn print_stats(stats: &heaplens_dump::BuildStats) {
    println!("  records parsed:    {}", stats.records);
    println!("  instances:         {}", stats.objects);
    println!("  real classes:      {}", stats.classes);
    println!("  synthetic classes: {}", stats.synthetic_classes);
    println!("  parse errors:      {}", stats.parse_errors);
    println!("  dropped roots:     {}", stats.dropped_roots);
    println!("  dropped refs:      {}", stats.dropped_references);
}

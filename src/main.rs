//! Hikma CLI - operator tool for a code-graph store

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use hikma_graph::config::{self, EngineConfig};
use hikma_graph::query::Direction;
use hikma_graph::search::{MetadataFilters, SearchHit};
use hikma_graph::{BusinessKey, Engine, GraphBatch, NodeKind};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(name = "hikma")]
#[command(version = "0.0.1")]
#[command(about = "Code graph persistence and query engine")]
#[command(long_about = r#"
Hikma persists extracted code structure as a property graph with embeddings
in a single SQLite store and answers structural and semantic queries.

Example usage:
  hikma load --input batch.json
  hikma search --query "calculate sum" --kind function
  hikma callers --key "fn:file:repo:acme#billing#abc#src/math.ts#calculateSum@1"
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file (defaults to hikma.toml when present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Database path, overriding the configuration
    #[arg(short, long, global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },

    /// Load a JSON graph batch ({"nodes": [...], "edges": [...]})
    Load {
        #[arg(short, long)]
        input: PathBuf,

        /// Embed nodes that carry no vector before loading
        #[arg(long)]
        embed: bool,
    },

    /// Ranked search with optional metadata filters
    Search {
        #[arg(short, long)]
        query: String,

        #[arg(short, long)]
        limit: Option<usize>,

        /// Restrict to node kinds (repeatable)
        #[arg(short, long)]
        kind: Vec<NodeKind>,

        #[arg(long)]
        min_similarity: Option<f32>,

        #[arg(long)]
        language: Option<String>,

        /// File extension, without the dot
        #[arg(long)]
        ext: Option<String>,

        #[arg(long)]
        author: Option<String>,

        /// Path substring
        #[arg(long)]
        path: Option<String>,

        /// Repository business key
        #[arg(long)]
        repo: Option<BusinessKey>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,
    },

    /// Show statistics about the stored graph
    Stats {
        #[arg(long)]
        json: bool,
    },

    /// Find transitive callers of a function
    Callers {
        /// Business key of the function
        #[arg(short, long)]
        key: BusinessKey,

        #[arg(long)]
        depth: Option<u32>,
    },

    /// Find transitive callees of a function
    Callees {
        #[arg(short, long)]
        key: BusinessKey,

        #[arg(long)]
        depth: Option<u32>,
    },

    /// Follow reads and writes of a variable
    Dataflow {
        /// Business key of the variable
        #[arg(short, long)]
        key: BusinessKey,

        #[arg(long)]
        depth: Option<u32>,
    },

    /// List functions declared in a file
    Functions {
        #[arg(short, long)]
        path: String,
    },

    /// Check the store for orphaned edges and typed rows without a node
    Audit {
        /// Exit with an error when findings exist
        #[arg(long)]
        strict: bool,
    },

    /// Delete every node, edge and embedding
    Reset {
        #[arg(long)]
        yes: bool,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    if let Commands::Init { force } = cli.command {
        let path = cli.config.unwrap_or_else(config::default_config_path);
        config::write_config(&path, &EngineConfig::default(), force)?;
        println!("✅ Wrote {}", path.display());
        return Ok(());
    }

    let mut config = config::load_config(cli.config.as_deref())?.unwrap_or_default();
    if let Some(database) = cli.database {
        config.database = database;
    }
    if !config.is_in_memory() {
        config::ensure_db_dir(&config.database)?;
    }
    let mut engine = open_engine(config)?;

    match cli.command {
        Commands::Init { .. } => unreachable!("handled before the engine is opened"),

        Commands::Load { input, embed } => {
            let batch = read_batch(&input)?;
            println!("🚀 Loading {} nodes, {} edges from {}", batch.len(), batch.edges().len(), input.display());
            let report = if embed {
                engine.load_with_embeddings(batch)?
            } else {
                engine.load(&batch)?
            };
            let result = &report.sqlite;
            println!("✅ Load committed in {}ms", result.duration_ms);
            println!("   Nodes: {}", result.nodes_written);
            println!("   Edges: {} ({} unresolved)", result.edges_written, result.unresolved_edges);
            println!("   Embeddings: {}", result.embeddings_written);
            if !result.audit.is_clean() {
                println!("⚠️  {}", result.audit);
            }
        }

        Commands::Search { query, limit, kind, min_similarity, language, ext, author, path, repo, json } => {
            let mut options = engine.search_options().with_node_types(&kind);
            if let Some(limit) = limit {
                options = options.with_limit(limit);
            }
            if let Some(min) = min_similarity {
                options = options.with_min_similarity(min);
            }
            let filters = MetadataFilters {
                node_types: kind,
                repository: repo,
                file_extension: ext,
                language,
                author,
                path_contains: path,
                ..MetadataFilters::default()
            };

            let hits = engine.hybrid_search(&query, &filters, &options)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&hits)?);
            } else if hits.is_empty() {
                println!("❌ No results.");
            } else {
                for hit in &hits {
                    print_hit(hit);
                }
            }
        }

        Commands::Stats { json } => {
            let stats = engine.get_graph_stats()?;
            if json {
                println!("{}", serde_json::to_string_pretty(&stats)?);
            } else {
                println!("📊 Hikma Statistics ({})", engine.config().database.display());
                println!("------------------------------------");
                println!("{}", engine.db_stats()?);
                println!("{}", stats);
            }
        }

        Commands::Callers { key, depth } => {
            println!("📞 Finding callers for: {}...", key);
            print_call_graph(&engine, &key, Direction::Incoming, depth)?;
        }

        Commands::Callees { key, depth } => {
            println!("📱 Finding callees for: {}...", key);
            print_call_graph(&engine, &key, Direction::Outgoing, depth)?;
        }

        Commands::Dataflow { key, depth } => {
            let steps = engine.find_data_flow(&key, depth)?;
            if steps.is_empty() {
                println!("∅ No data flow found.");
            }
            for step in steps {
                println!("- [{}] {} via {} (depth {})", step.kind, step.name, step.via, step.depth);
                println!("  {}", step.node);
            }
        }

        Commands::Functions { path } => {
            let functions = engine.find_functions_in_file(&path)?;
            if functions.is_empty() {
                println!("∅ No functions found in {}.", path);
            }
            for function in functions {
                println!("- [{}] {} ({})", function.kind(), function.name(), function.business_key);
            }
        }

        Commands::Audit { strict } => {
            let report = engine.audit()?;
            println!("{}", report);
            if strict {
                report.into_result()?;
            }
        }

        Commands::Reset { yes } => {
            if !yes {
                anyhow::bail!("refusing to reset {} without --yes", engine.config().database.display());
            }
            engine.reset()?;
            println!("🗑️  Store cleared.");
        }
    }

    engine.close()?;
    Ok(())
}

fn open_engine(config: EngineConfig) -> anyhow::Result<Engine> {
    let engine = Engine::open(config)?;

    #[cfg(feature = "local-embeddings")]
    let engine = match hikma_graph::search::FastEmbedProvider::new() {
        Ok(provider) => engine.with_provider(Box::new(provider)),
        Err(e) => {
            tracing::warn!("embedding model unavailable, search will use text matching: {}", e);
            engine
        }
    };

    Ok(engine)
}

fn read_batch(path: &Path) -> anyhow::Result<GraphBatch> {
    let contents = std::fs::read_to_string(path)?;
    Ok(GraphBatch::from_json(&contents)?)
}

fn print_hit(hit: &SearchHit) {
    println!(
        "- [{}] {} (Score: {:.2}, similarity {:.2}, {:?})",
        hit.node.kind(),
        hit.node.name(),
        hit.score,
        hit.similarity,
        hit.mode
    );
    println!("  Key: {}", hit.node.business_key);
    if let Some(sig) = hit.node.signature() {
        println!("  Sig: {}", sig);
    }
}

fn print_call_graph(engine: &Engine, key: &BusinessKey, direction: Direction, depth: Option<u32>) -> anyhow::Result<()> {
    let entries = engine.call_graph(key, direction, depth)?;
    if entries.is_empty() {
        println!("∅ Nothing found.");
        return Ok(());
    }
    for entry in entries {
        let at = entry.line.map(|l| format!(" @ line {}", l)).unwrap_or_default();
        let dynamic = if entry.dynamic { " (dynamic)" } else { "" };
        println!("- [depth {}] {} -> {}{}{}", entry.depth, entry.caller, entry.callee, at, dynamic);
    }
    Ok(())
}

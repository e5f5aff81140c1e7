use anyhow::{Context as AnyhowContext, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

use taskwing_retrieval::SearchOptions;

use crate::config::AppConfig;
use crate::orchestrator::{IngestSummary, Orchestrator};

mod config;
mod crash;
mod orchestrator;

#[derive(Parser)]
#[command(name = "taskwing")]
#[command(about = "Evidence-backed repository knowledge graph for LLM planners", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Repository root (defaults to current directory)
    #[arg(long, global = true, default_value = ".")]
    path: PathBuf,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode: log only warnings/errors (stdout is reserved for output)
    #[arg(long, global = true)]
    quiet: bool,

    /// Tag ingested knowledge with a monorepo workspace path instead of root
    #[arg(long, global = true)]
    workspace: Option<String>,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze the whole repository and build the knowledge store
    Bootstrap(BootstrapArgs),

    /// Re-analyze a set of changed files incrementally
    Watch(WatchArgs),

    /// Retrieve grounding context for a query
    Query(QueryArgs),

    /// Show knowledge store statistics
    Stats(StatsArgs),

    /// List available ingestion agents
    Agents,

    /// Rebuild the full-text index from stored nodes
    #[command(name = "rebuild-fts")]
    RebuildFts,
}

#[derive(Args)]
struct BootstrapArgs {
    /// Output JSON format
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct WatchArgs {
    /// Changed files, repo-relative (comma-separated)
    #[arg(long, value_delimiter = ',', num_args = 1..)]
    files: Vec<String>,

    /// Output JSON format
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct QueryArgs {
    /// Query text, or an exact node id (task-*, node-*, plan-*)
    query: String,

    /// Maximum number of results
    #[arg(long, short = 'n', default_value_t = 10)]
    limit: usize,

    /// Filter by node type (feature, component, pattern, ...)
    #[arg(long = "type", short = 't')]
    node_type: Option<String>,

    /// Exclude root-tagged nodes when a workspace filter is set
    #[arg(long)]
    no_root: bool,

    /// Print raw ranked results instead of the assembled context
    #[arg(long)]
    raw: bool,

    /// Include per-stage timing report
    #[arg(long)]
    debug: bool,

    /// Output JSON format
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct StatsArgs {
    /// Output JSON format
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut cli = Cli::parse();

    let json_output = match &cli.command {
        Commands::Bootstrap(args) => args.json,
        Commands::Watch(args) => args.json,
        Commands::Query(args) => args.json,
        Commands::Stats(args) => args.json,
        _ => false,
    };
    if json_output {
        cli.quiet = true;
    }

    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"));
    if cli.quiet {
        builder.filter_level(log::LevelFilter::Warn);
    } else if cli.verbose {
        builder.filter_level(log::LevelFilter::Debug);
    }
    builder.target(env_logger::Target::Stderr).init();

    let root = cli.path.canonicalize().context("Invalid repository path")?;
    crash::install(&root);

    let config = AppConfig::load(&root)?;
    let mut orchestrator = Orchestrator::new(&root, config)?;
    if let Some(workspace) = &cli.workspace {
        orchestrator = orchestrator.with_workspace(workspace.clone());
    }

    let ctx = CancellationToken::new();
    let signal_ctx = ctx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupt received, cancelling");
            signal_ctx.cancel();
        }
    });

    let result = match cli.command {
        Commands::Bootstrap(args) => run_bootstrap(&orchestrator, &ctx, args).await,
        Commands::Watch(args) => run_watch(&orchestrator, &ctx, args).await,
        Commands::Query(args) => run_query(&orchestrator, &ctx, args, cli.workspace).await,
        Commands::Stats(args) => run_stats(&orchestrator, args),
        Commands::Agents => run_agents(&orchestrator),
        Commands::RebuildFts => run_rebuild_fts(&orchestrator),
    };
    orchestrator.close().await;
    result
}

async fn run_bootstrap(
    orchestrator: &Orchestrator,
    ctx: &CancellationToken,
    args: BootstrapArgs,
) -> Result<()> {
    let summary = orchestrator.bootstrap(ctx).await?;
    print_ingest_summary(&summary, args.json)
}

async fn run_watch(
    orchestrator: &Orchestrator,
    ctx: &CancellationToken,
    args: WatchArgs,
) -> Result<()> {
    if args.files.is_empty() {
        anyhow::bail!("watch requires --files with at least one changed file");
    }
    let summary = orchestrator.watch(ctx, args.files).await?;
    print_ingest_summary(&summary, args.json)
}

fn print_ingest_summary(summary: &IngestSummary, json: bool) -> Result<()> {
    if json {
        let failures: Vec<_> = summary
            .failures
            .iter()
            .map(|(agent, reason)| serde_json::json!({ "agent": agent, "reason": reason }))
            .collect();
        let out = serde_json::json!({
            "agents_run": summary.agents_run,
            "findings": summary.findings,
            "nodes_upserted": summary.nodes_upserted,
            "edges_linked": summary.edges_linked,
            "embedded": summary.embedded,
            "files_read": summary.coverage.files_read.len(),
            "files_skipped": summary.coverage.files_skipped.len(),
            "failures": failures,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        eprintln!(
            "Ingested {} findings from {} agents: {} nodes, {} edges, {} embedded",
            summary.findings,
            summary.agents_run,
            summary.nodes_upserted,
            summary.edges_linked,
            summary.embedded,
        );
        eprintln!(
            "Coverage: {} files read, {} skipped",
            summary.coverage.files_read.len(),
            summary.coverage.files_skipped.len(),
        );
        for (agent, reason) in &summary.failures {
            eprintln!("  {agent}: {reason}");
        }
    }
    if summary.agents_run > 0 && summary.failures.len() == summary.agents_run {
        anyhow::bail!("all agents failed");
    }
    Ok(())
}

async fn run_query(
    orchestrator: &Orchestrator,
    ctx: &CancellationToken,
    args: QueryArgs,
    workspace: Option<String>,
) -> Result<()> {
    let opts = SearchOptions {
        limit: args.limit,
        node_type: args.node_type.clone(),
        workspace,
        include_root: !args.no_root,
        debug: args.debug,
    };
    let results = orchestrator.search(ctx, &args.query, &opts).await?;

    if args.json {
        let nodes: Vec<_> = results
            .nodes
            .iter()
            .map(|scored| {
                serde_json::json!({
                    "id": scored.node.id,
                    "type": scored.node.node_type,
                    "title": scored.node.title,
                    "score": scored.score,
                    "expanded_from": scored.expanded_from,
                })
            })
            .collect();
        let mut out = serde_json::json!({ "query": args.query, "results": nodes });
        if let Some(debug) = &results.debug {
            let stages: Vec<_> = debug
                .stages
                .iter()
                .map(|(name, took)| serde_json::json!({ "stage": name, "ms": took.as_millis() }))
                .collect();
            out["debug"] = serde_json::json!({ "stages": stages });
        }
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    if let Some(debug) = &results.debug {
        for (name, took) in &debug.stages {
            eprintln!("{name}: {}ms", took.as_millis());
        }
        eprintln!();
    }

    if args.raw {
        if results.nodes.is_empty() {
            eprintln!("No results for '{}'", args.query);
            return Ok(());
        }
        for (i, scored) in results.nodes.iter().enumerate() {
            let origin = scored
                .expanded_from
                .as_deref()
                .map(|parent| format!(" via {parent}"))
                .unwrap_or_default();
            println!(
                "{}. {} [{}] (score: {:.3}){}",
                i + 1,
                scored.node.title,
                scored.node.node_type,
                scored.score,
                origin,
            );
        }
        return Ok(());
    }

    println!("{}", orchestrator.assemble(&results)?);
    Ok(())
}

fn run_stats(orchestrator: &Orchestrator, args: StatsArgs) -> Result<()> {
    let (count, stats) = orchestrator.stats()?;
    if args.json {
        let out = serde_json::json!({
            "nodes": count,
            "with_embeddings": stats.with_embeddings,
            "without_embeddings": stats.without,
            "embedding_dimension": stats.dim,
            "mixed_dimensions": stats.mixed_dim,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        println!("Nodes: {count}");
        println!(
            "Embeddings: {} present, {} missing",
            stats.with_embeddings, stats.without
        );
        match (stats.dim, stats.mixed_dim) {
            (_, true) => println!("Dimension: MIXED (vector search degraded, re-run bootstrap)"),
            (Some(dim), false) => println!("Dimension: {dim}"),
            (None, false) => println!("Dimension: none stored"),
        }
    }
    Ok(())
}

fn run_agents(orchestrator: &Orchestrator) -> Result<()> {
    for (id, name, description) in orchestrator.registry().list() {
        println!("{id:<8} {name}: {description}");
    }
    Ok(())
}

fn run_rebuild_fts(orchestrator: &Orchestrator) -> Result<()> {
    let reindexed = orchestrator.rebuild_fts()?;
    eprintln!("Rebuilt full-text index over {reindexed} nodes");
    Ok(())
}

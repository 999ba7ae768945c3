//! # HelloRAG CLI (`hellorag`)
//!
//! Builds an index from HelloRAG exports and answers questions against it.
//!
//! ## Usage
//!
//! ```bash
//! hellorag --config ./config/hellorag.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `hellorag build` | Ingest every export under `pack.base_path` |
//! | `hellorag retrieve "<q>"` | Print the top-k nodes for a question |
//! | `hellorag query "<q>"` | Retrieve, then generate an answer |
//! | `hellorag chat` | Answer questions read from stdin, one per line, as one conversation |
//! | `hellorag stats` | Summarise the index |
//!
//! `--json` switches every command's stdout to a single JSON document.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

use hellorag_pack::config::{self, Config};
use hellorag_pack::ingest::RefreshReport;
use hellorag_pack::models::{ImagePayload, QueryResult, ScoredNode};
use hellorag_pack::progress::ProgressMode;
use hellorag_pack::{logging, stats, HelloRagPack};

/// HelloRAG pack: question answering over exported document archives.
#[derive(Parser)]
#[command(
    name = "hellorag",
    about = "Retrieval-augmented question answering over HelloRAG document exports",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/hellorag.toml")]
    config: PathBuf,

    /// Print machine-readable JSON on stdout.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Ingest every export under `pack.base_path` into the index.
    ///
    /// Archives that fail to parse are reported and skipped; archives that
    /// disappeared from the base path are pruned from the index.
    Build {
        /// Progress on stderr: `off`, `human`, or `json`.
        /// Defaults to `human` when stderr is a terminal.
        #[arg(long, value_parser = parse_progress)]
        progress: Option<ProgressMode>,
    },

    /// Print the nodes most relevant to a question.
    Retrieve {
        question: String,

        /// Rebuild the index before retrieving.
        #[arg(long)]
        refresh: bool,
    },

    /// Answer a question from the indexed exports.
    Query {
        question: String,

        /// Rebuild the index before answering.
        #[arg(long)]
        refresh: bool,
    },

    /// Hold a conversation: one question per stdin line, answers keep
    /// earlier turns in view. An empty line ends the session.
    Chat {
        /// Rebuild the index before chatting.
        #[arg(long)]
        refresh: bool,
    },

    /// Show node counts and the archives in the index.
    Stats,
}

fn parse_progress(s: &str) -> Result<ProgressMode, String> {
    ProgressMode::parse(s).ok_or_else(|| format!("invalid progress mode '{}'", s))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let mut cfg = config::load_config(&cli.config)?;
    logging::init_with_config(&cfg.logging);

    match cli.command {
        Commands::Build { progress } => {
            cfg.pack.need_refresh = true;
            let mode = progress.unwrap_or_else(ProgressMode::default_for_tty);
            let mut pack = HelloRagPack::from_config(&cfg)?.with_progress(mode.reporter());
            pack.initialize().await?;
            if let Some(report) = pack.last_refresh() {
                print_report(report, cli.json)?;
            }
            pack.close().await;
        }
        Commands::Retrieve { question, refresh } => {
            let mut pack = open(&mut cfg, refresh).await?;
            let nodes = pack.retrieve(&question).await?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&nodes)?);
            } else {
                print_nodes(&nodes);
            }
            pack.close().await;
        }
        Commands::Query { question, refresh } => {
            let mut pack = open(&mut cfg, refresh).await?;
            let result = pack.run(&question).await?;
            print_answer(&result, cli.json)?;
            pack.close().await;
        }
        Commands::Chat { refresh } => {
            let mut pack = open(&mut cfg, refresh).await?;
            chat_loop(&pack, cli.json).await?;
            pack.close().await;
        }
        Commands::Stats => {
            let mut pack = open(&mut cfg, false).await?;
            if let Some(handle) = pack.index() {
                stats::run_stats(handle, cli.json).await?;
            }
            pack.close().await;
        }
    }

    Ok(())
}

async fn open(cfg: &mut Config, refresh: bool) -> anyhow::Result<HelloRagPack> {
    cfg.pack.need_refresh |= refresh;
    let mut pack = HelloRagPack::from_config(cfg)?;
    pack.initialize().await?;
    Ok(pack)
}

async fn chat_loop(pack: &HelloRagPack, json: bool) -> anyhow::Result<()> {
    let mut session = pack.chat()?;
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        let message = line.trim();
        if message.is_empty() {
            break;
        }
        let result = session.send(message).await?;
        if json {
            println!("{}", serde_json::to_string(&result)?);
        } else {
            println!("{}", result.answer.trim());
            println!();
        }
    }
    Ok(())
}

fn print_report(report: &RefreshReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    println!(
        "Ingested {} of {} archives ({} skipped, {} pruned).",
        report.ingested.len(),
        report.discovered,
        report.skipped.len(),
        report.pruned.len()
    );
    println!(
        "Nodes: {} (text {}, table {}, image {}), embedded {}.",
        report.total_nodes(),
        report.text_nodes,
        report.table_nodes,
        report.image_nodes,
        report.embedded_nodes
    );
    for skipped in &report.skipped {
        println!("  skipped {}: {}", skipped.id, skipped.reason);
    }
    for id in &report.stale {
        println!("  dropped {}: embedded by a different model", id);
    }
    Ok(())
}

fn print_nodes(nodes: &[ScoredNode]) {
    if nodes.is_empty() {
        println!("No results.");
        return;
    }
    for (i, scored) in nodes.iter().enumerate() {
        let node = &scored.node;
        println!(
            "{}. [{:.3}] {} (page {}, {})",
            i + 1,
            scored.score,
            node.file_name,
            node.page_label,
            node.kind.as_str()
        );
        match &node.image {
            Some(ImagePayload::Url { url }) => println!("    image: {}", url),
            Some(ImagePayload::Inline { mime, .. }) => println!("    image: inline {}", mime),
            None => {}
        }
        for line in node.text.lines().take(3) {
            println!("    {}", line);
        }
        println!();
    }
}

fn print_answer(result: &QueryResult, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    println!("{}", result.answer.trim());
    println!();
    println!("Sources:");
    print_nodes(&result.source_nodes);
    Ok(())
}

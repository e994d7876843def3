//! sari: workspace-scoped code search MCP server.
//!
//! Usage:
//!   sari serve --root <path>        # MCP server on stdin/stdout
//!   sari scan --root <path>         # one-shot index build
//!   sari search <query>             # CLI search (debugging)
//!   sari status                     # index health snapshot

use clap::{Parser, Subcommand};
use sari::{Service, Settings};
use serde_json::json;
use std::io::BufReader;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sari")]
#[command(about = "Workspace-scoped code search and retrieval MCP server")]
#[command(version)]
struct Cli {
    /// Workspace root directory
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Database path (default: per-user cache keyed by root id)
    #[arg(long)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the MCP server (stdin/stdout JSON-RPC)
    Serve,

    /// Run one full scan to completion
    Scan,

    /// Search the index from the command line
    Search {
        /// Search query
        query: String,

        /// Search type: code, symbol, api, repo, auto
        #[arg(short = 't', long, default_value = "code")]
        search_type: String,

        /// Maximum results
        #[arg(short, long, default_value = "20")]
        limit: usize,
    },

    /// Print the status snapshot
    Status,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // CRITICAL: log to stderr only (stdout is JSON-RPC for MCP).
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("sari=info".parse()?))
        .with_writer(std::io::stderr)
        .init();

    let settings = Settings::from_env();
    let service = Service::new(&cli.root, cli.db.clone(), settings)?;

    match cli.command {
        Commands::Serve => {
            tracing::info!(
                "serving MCP for {}",
                service.ctx.workspace_root.display()
            );
            let server = sari::mcp::McpServer::new(service.ctx.clone());
            let stdin = std::io::stdin();
            let stdout = std::io::stdout();
            server.run(BufReader::new(stdin.lock()), stdout);
        }

        Commands::Scan => {
            let outcome = service
                .ctx
                .indexer
                .scan_once()
                .map_err(|e| anyhow::anyhow!(e))?;
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "scanned_files": outcome.scanned_files,
                    "indexed_files": outcome.indexed_files,
                }))?
            );
        }

        Commands::Search {
            query,
            search_type,
            limit,
        } => {
            let args = json!({
                "query": query,
                "search_type": search_type,
                "limit": limit,
            });
            let response = sari::tools::execute_search(&service.ctx, &args);
            println!("{}", serde_json::to_string_pretty(&response.json)?);
        }

        Commands::Status => {
            let response = sari::tools::execute_status(&service.ctx, &json!({}));
            println!("{}", serde_json::to_string_pretty(&response.json)?);
        }
    }

    service.shutdown();
    Ok(())
}

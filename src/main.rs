//! Administrative CLI for the embedding store.
//!
//! Read-only inspection (`tenants`, `stats`, `config`) plus the two
//! maintenance operations that need no embedder: writing a settings file
//! and rebuilding a tenant's index from its raw records.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{
    Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use ragdb::{RagOrchestrator, Settings, TableStats};

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Multi-tenant embedding store
#[derive(Parser)]
#[command(
    name = "ragdb",
    version = env!("CARGO_PKG_VERSION"),
    about = "Multi-tenant embedding store administration",
    next_line_help = true,
    styles = clap_cargo_style()
)]
struct Cli {
    /// Path to custom settings.toml file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Set up .ragdb directory with a default settings file
    Init {
        /// Overwrite an existing settings file
        #[arg(short, long)]
        force: bool,
    },

    /// Display active settings
    Config,

    /// List tenant namespaces
    Tenants,

    /// Show record and index counts of a tenant
    Stats {
        /// Tenant id
        tenant: String,
    },

    /// Rebuild a tenant's index from its raw records
    Rebuild {
        /// Tenant id
        tenant: String,
    },
}

fn load_settings(path: Option<&PathBuf>) -> Result<Settings> {
    let settings = match path {
        Some(path) => Settings::load_from(path).map_err(|e| {
            anyhow::anyhow!("Configuration error loading from {}: {e}", path.display())
        })?,
        None => Settings::load().map_err(|e| anyhow::anyhow!("Configuration error: {e}"))?,
    };
    Ok(settings)
}

fn print_stats(stats: &TableStats, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(stats)?);
        return Ok(());
    }
    println!("Tenant:          {}", stats.tenant);
    println!("State:           {:?}", stats.state);
    println!("Records:         {}", stats.record_count);
    println!("Deleted:         {}", stats.deleted_count);
    match stats.dimension {
        Some(dimension) => println!("Dimension:       {dimension}"),
        None => println!("Dimension:       -"),
    }
    println!("Metric:          {}", stats.metric.as_str());
    println!("Index built:     {}", stats.index_built);
    println!("Partitions:      {}", stats.partition_count);
    println!("Indexed:         {}", stats.indexed_count);
    println!("Unindexed:       {}", stats.unindexed_count);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    if let Commands::Init { force } = &cli.command {
        let path = Settings::init_config_file(*force).map_err(|e| anyhow::anyhow!("{e}"))?;
        println!("Created configuration file at: {}", path.display());
        println!("Edit this file to customize your settings.");
        return Ok(());
    }

    let settings = load_settings(cli.config.as_ref())?;
    ragdb::logging::init(settings.debug);

    if let Commands::Config = &cli.command {
        if cli.json {
            println!("{}", serde_json::to_string_pretty(&settings)?);
        } else {
            println!("Current Configuration:");
            println!("{}", "=".repeat(50));
            println!("{}", toml::to_string_pretty(&settings)?);
        }
        return Ok(());
    }

    let rag = RagOrchestrator::new(settings)?;

    match cli.command {
        Commands::Tenants => {
            let tenants = rag.list_tenants()?;
            if cli.json {
                println!("{}", serde_json::to_string_pretty(&tenants)?);
            } else if tenants.is_empty() {
                println!("No tenants in {}", rag.settings().data_dir.display());
            } else {
                for tenant in tenants {
                    println!("{tenant}");
                }
            }
        }
        Commands::Stats { tenant } => {
            let stats = rag.table_stats(&tenant).await?;
            print_stats(&stats, cli.json)?;
        }
        Commands::Rebuild { tenant } => {
            let stats = rag
                .rebuild_index(&tenant)
                .await
                .with_context(|| format!("Rebuilding index of tenant '{tenant}'"))?;
            if !cli.json {
                if stats.index_built {
                    println!("Rebuilt index of tenant '{tenant}'");
                } else if stats.record_count == 0 {
                    println!("Tenant '{tenant}' holds no records");
                } else {
                    println!(
                        "Tenant '{tenant}' has too few records for {} partitions, queries use exhaustive scan",
                        rag.settings().index.num_partitions
                    );
                }
            }
            print_stats(&stats, cli.json)?;
        }
        Commands::Init { .. } | Commands::Config => unreachable!("handled above"),
    }

    Ok(())
}

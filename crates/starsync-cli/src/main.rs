use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use starsync_client::{HttpStore, MemoryStore, RemoteStore};
use starsync_core::ConfigManager;
use starsync_cli::{logging, Dataset, ImportReport, Importer};
use tracing::info;

#[derive(Parser)]
#[command(name = "starsync")]
#[command(about = "StarSync - synchronize game-universe dumps into the central store", long_about = None)]
#[command(version)]
struct Cli {
    /// Output format (json, pretty, table)
    #[arg(short, long, global = true, default_value = "pretty")]
    output: OutputFormat,

    /// Configuration file
    #[arg(short, long, global = true, env = "STARSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Run against an in-memory store; nothing is sent over the network
    #[arg(long, global = true)]
    dry_run: bool,

    /// Write workers, overriding the configuration
    #[arg(short, long, global = true)]
    workers: Option<usize>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    Json,
    Pretty,
    Table,
}

#[derive(Subcommand)]
enum Commands {
    /// Import one dump file
    Import {
        /// Which dataset the file holds
        #[arg(value_enum)]
        dataset: Dataset,

        /// Dump file (JSON array for commodities, JSON lines otherwise)
        file: PathBuf,
    },

    /// Import every dump found in a directory, in dependency order
    ImportAll {
        /// Directory holding commodities.json, factions.jsonl, systems.jsonl, ...
        dir: PathBuf,
    },

    /// Write a configuration file with default values
    InitConfig {
        /// Destination
        #[arg(default_value = ".starsync.toml")]
        path: PathBuf,
    },
}

fn main() {
    let cli = Cli::parse();
    if let Err(e) = run(&cli) {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(cli: &Cli) -> Result<()> {
    if let Commands::InitConfig { path } = &cli.command {
        ConfigManager::create_default_config(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("{} {}", "Wrote".green().bold(), path.display());
        return Ok(());
    }

    let mut manager =
        ConfigManager::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(workers) = cli.workers {
        manager.config_mut().dispatch.workers = workers;
        ConfigManager::validate_config(manager.config()).context("Invalid --workers")?;
    }
    logging::init(&manager.config().logging, cli.verbose)?;
    manager.log_summary();
    let config = manager.into_config();

    let store: Arc<dyn RemoteStore> = if cli.dry_run {
        info!("dry run: writing to an in-memory store");
        Arc::new(MemoryStore::new())
    } else {
        info!("remote store at {}", config.store.base_url);
        Arc::new(HttpStore::new(&config.store).context("Failed to create store client")?)
    };
    let mut importer = Importer::new(store, &config)?;

    let reports = match &cli.command {
        Commands::Import { dataset, file } => vec![importer.import(*dataset, file)?],
        Commands::ImportAll { dir } => importer.import_all(dir)?,
        Commands::InitConfig { .. } => Vec::new(),
    };
    print_output(&cli.output, &reports)
}

fn print_output(format: &OutputFormat, reports: &[ImportReport]) -> Result<()> {
    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(reports)?);
        }
        OutputFormat::Pretty => {
            for report in reports {
                print_pretty(&serde_json::to_value(report)?);
                println!();
            }
        }
        OutputFormat::Table => print_table(reports),
    }
    Ok(())
}

fn print_pretty(value: &serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map {
                let key_colored = key.cyan().bold();
                match val {
                    serde_json::Value::String(s) => {
                        println!("{}: {}", key_colored, s.green());
                    }
                    serde_json::Value::Number(n) => {
                        println!("{}: {}", key_colored, n.to_string().yellow());
                    }
                    serde_json::Value::Object(_) => {
                        println!("{}:", key_colored);
                        print_pretty(val);
                    }
                    serde_json::Value::Array(items) => {
                        println!("{}:", key_colored);
                        for item in items {
                            println!("  {}", item);
                        }
                    }
                    _ => {
                        println!("{}: {}", key_colored, val);
                    }
                }
            }
        }
        _ => println!("{}", value),
    }
}

fn print_table(reports: &[ImportReport]) {
    let header = format!(
        "{:<12} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} {:>8}",
        "dataset", "read", "unchanged", "created", "updated", "deleted", "rejected", "secs"
    );
    println!("{}", header.cyan().bold());
    for report in reports {
        println!(
            "{:<12} {:>10} {:>10} {:>10} {:>10} {:>10} {:>10} {:>8.1}",
            report.dataset.as_str(),
            report.records,
            report.stats.unchanged,
            report.stats.created,
            report.stats.updated,
            report.stats.deleted,
            report.rejected,
            report.elapsed_secs()
        );
    }
}

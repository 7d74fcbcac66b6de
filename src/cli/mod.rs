//! Command-line interface for the trace store.
//!
//! Ingests newline-delimited JSON spans and answers trace lookups and
//! searches against the configured SQLite file.

use crate::core::config::ConfigBuilder;
use crate::core::{Config, Result, Span, TraceId, TraceQueryParameters, TraceStoreError};
use crate::storage::StorageManager;
use chrono::Utc;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Span ingestion and trace retrieval on top of SQLite
#[derive(Parser, Debug)]
#[command(name = "tracestore")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Configuration file path (default: ~/.config/tracestore/config.yaml)
    #[arg(short, long, env = "TRACESTORE_CONFIG", global = true)]
    pub config: Option<PathBuf>,

    /// SQLite database file, overrides the config file
    #[arg(long, env = "TRACESTORE_DATA_FILE", global = true)]
    pub data_file: Option<PathBuf>,

    /// Spans per write batch, overrides the config file
    #[arg(long, env = "TRACESTORE_BATCH_SIZE", global = true)]
    pub batch_size: Option<usize>,

    /// Enable debug logging
    #[arg(short, long, env = "TRACESTORE_DEBUG", global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Ingest newline-delimited JSON spans from a file
    Ingest {
        /// File with one JSON span per line
        file: PathBuf,
        /// Write to the archive table instead of the primary tables
        #[arg(long)]
        archive: bool,
    },
    /// Print one trace as JSON
    Trace {
        /// Trace ID in hex
        id: String,
        /// Read from the archive table
        #[arg(long)]
        archive: bool,
    },
    /// Search traces
    Find(FindArgs),
    /// List services
    Services,
    /// List operations of a service
    Operations {
        /// Service name
        service: String,
    },
    /// Validate configuration and exit
    CheckConfig,
}

/// Trace search filters
#[derive(Args, Debug)]
pub struct FindArgs {
    /// Service name
    #[arg(long)]
    pub service: String,

    /// Operation name
    #[arg(long)]
    pub operation: Option<String>,

    /// Tag filter as key=value, repeatable
    #[arg(long = "tag", value_parser = parse_tag)]
    pub tags: Vec<(String, String)>,

    /// Minimum span duration, e.g. 150ms
    #[arg(long, value_parser = parse_duration)]
    pub min_duration: Option<Duration>,

    /// Maximum span duration, e.g. 2s
    #[arg(long, value_parser = parse_duration)]
    pub max_duration: Option<Duration>,

    /// How far back to search
    #[arg(long, value_parser = parse_duration, default_value = "1h")]
    pub lookback: Duration,

    /// Maximum number of traces
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}

fn parse_tag(s: &str) -> std::result::Result<(String, String), String> {
    s.split_once('=')
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .ok_or_else(|| format!("expected key=value, got {s:?}"))
}

fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    humantime_serde::re::humantime::parse_duration(s).map_err(|e| e.to_string())
}

impl FindArgs {
    /// Converts the flags into query parameters ending now.
    pub fn to_query(&self) -> Result<TraceQueryParameters> {
        let lookback = chrono::Duration::from_std(self.lookback)
            .map_err(|e| TraceStoreError::invalid_query(format!("lookback out of range: {e}")))?;
        let now = Utc::now();
        Ok(TraceQueryParameters {
            service_name: self.service.clone(),
            operation_name: self.operation.clone(),
            tags: self.tags.iter().cloned().collect(),
            start_time_min: Some(now - lookback),
            start_time_max: Some(now),
            duration_min: self.min_duration,
            duration_max: self.max_duration,
            num_traces: self.limit,
        })
    }
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Load configuration with precedence: CLI flags, then the config file,
    /// then defaults.
    pub async fn load_config(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::new();

        let config_path = match &self.config {
            Some(path) => Some(path.clone()),
            None => dirs::config_dir()
                .map(|d| d.join("tracestore").join("config.yaml"))
                .filter(|path| path.exists()),
        };

        if let Some(path) = config_path {
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    builder = builder.from_yaml(&content)?;
                    tracing::info!("Loaded configuration from: {:?}", path);
                }
                Err(e) => {
                    return Err(TraceStoreError::config(format!(
                        "Failed to read config file {:?}: {}",
                        path, e
                    )));
                }
            }
        }

        if let Some(path) = &self.data_file {
            builder = builder.data_file(path.clone());
        }
        if let Some(size) = self.batch_size {
            builder = builder.batch_write_size(size);
        }
        builder.debug(self.debug).build()
    }
}

/// Initialize logging. `RUST_LOG` wins over the configured level.
pub fn init_logging(config: &Config) -> Result<()> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let level = if config.debug {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let fmt_layer = if config.logging.structured {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(true)
            .with_thread_ids(true)
            .with_line_number(true)
            .compact()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .compact()
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()
        .map_err(|e| TraceStoreError::config(format!("Failed to initialize logging: {}", e)))?;

    Ok(())
}

/// Execute a parsed command line.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = cli.load_config().await?;
    init_logging(&config)?;

    if let Command::CheckConfig = cli.command {
        let storage = &config.storage;
        println!("Configuration is valid!");
        println!("  Data file: {}", storage.data_file.display());
        println!("  Batch size: {}", storage.batch_write_size);
        println!("  Flush interval: {:?}", storage.batch_flush_interval);
        println!("  Encoding: {:?}", storage.encoding);
        println!("  Spans table: {}", storage.spans_table);
        println!("  Index table: {}", storage.index_table);
        return Ok(());
    }

    let manager = StorageManager::open_sqlite(&config.storage).await?;
    let result = run_command(&manager, &cli.command).await;
    let closed = manager.close().await;
    result?;
    closed
}

async fn run_command(manager: &StorageManager, command: &Command) -> Result<()> {
    match command {
        Command::Ingest { file, archive } => {
            let writer = if *archive {
                manager.archive_writer()
            } else {
                manager.writer()
            };
            let content = tokio::fs::read_to_string(file).await?;
            let mut count = 0usize;
            for (line_no, line) in content.lines().enumerate() {
                if line.trim().is_empty() {
                    continue;
                }
                let span: Span = serde_json::from_str(line).map_err(|e| {
                    TraceStoreError::serialization(format!("line {}: {e}", line_no + 1))
                })?;
                writer.submit(span).await?;
                count += 1;
            }
            writer.close().await?;
            let stats = writer.stats();
            println!(
                "Ingested {} spans ({} flushed, {} dropped)",
                count, stats.spans_flushed, stats.spans_dropped
            );
        }
        Command::Trace { id, archive } => {
            let trace_id: TraceId = id.parse()?;
            let reader = if *archive {
                manager.archive_reader()
            } else {
                manager.reader()
            };
            let trace = reader.get_trace(trace_id).await?;
            println!("{}", serde_json::to_string_pretty(&trace)?);
        }
        Command::Find(args) => {
            let traces = manager.reader().find_traces(&args.to_query()?).await?;
            println!("{}", serde_json::to_string_pretty(&traces)?);
        }
        Command::Services => {
            for service in manager.reader().get_services().await? {
                println!("{service}");
            }
        }
        Command::Operations { service } => {
            for operation in manager.reader().get_operations(service).await? {
                println!("{}", operation.name);
            }
        }
        Command::CheckConfig => {}
    }
    Ok(())
}

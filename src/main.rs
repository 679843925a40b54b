use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use prometheus::Encoder;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use blobstore::check::{check_integrity, CheckConfig};
use blobstore::inspect::{blob_info, disk_space, format_bytes, num_keys, print_blob_info};
use blobstore::retrieve::{retrieve, RetrieveConfig};
use blobstore::{Blobstore, BlobstoreConfig, Durability, SharedMetrics};

#[derive(Parser)]
#[command(version)]
struct Cli {
    #[arg(long, help = "Path to a blobstore.toml configuration file")]
    config: Option<PathBuf>,

    #[arg(long, help = "Storage directory (overrides storage.path)")]
    data_dir: Option<PathBuf>,

    #[arg(long, help = "Durability level (buffer, fsync, fdatasync)")]
    durability: Option<Durability>,

    #[arg(long, help = "Cache fragment size in bytes (overrides cache.fragment_size)")]
    fragment_size: Option<u64>,

    #[arg(
        long,
        default_value = "info",
        help = "Log level (error, warn, info, debug, trace). Can also be set via RUST_LOG env var"
    )]
    log_level: String,

    #[arg(long, help = "Print the collected metrics after the command finished")]
    print_metrics: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Store a file as a new blob
    Store {
        #[arg(required = true, help = "File to store")]
        file: PathBuf,

        #[arg(long, help = "Blob description, at most 255 characters")]
        description: Option<String>,
    },

    /// Retrieve a blob into a file
    Retrieve(RetrieveConfig),

    /// Delete a blob
    Delete {
        #[arg(required = true, help = "Blob id")]
        blob_id: u64,
    },

    /// Show blob metadata
    Info {
        #[arg(required = true, help = "Blob id")]
        blob_id: u64,

        #[arg(long, help = "Print as JSON")]
        json: bool,
    },

    /// Check blob integrity
    Check(CheckConfig),

    /// Inspect DB
    Inspect {
        #[command(subcommand)]
        command: InspectCommand,
    },
}

#[derive(Debug, Subcommand)]
pub enum InspectCommand {
    // number of keys
    NumKeys,
    DiskSpace,
}

fn setup_tracing(log_level: &str) {
    // Try to use RUST_LOG env var first, fall back to CLI flag
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(log_level))
        .unwrap_or_else(|_| {
            eprintln!("Invalid log level '{}', falling back to 'info'", log_level);
            EnvFilter::new("info")
        });

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

fn load_config(cli: &Cli) -> Result<BlobstoreConfig> {
    let mut config = match &cli.config {
        Some(path) => BlobstoreConfig::load_from_file(path)?,
        None => BlobstoreConfig::default(),
    };
    if let Some(data_dir) = &cli.data_dir {
        config.storage.path = data_dir.clone();
    }
    if let Some(durability) = cli.durability {
        config.storage.durability = durability;
    }
    if let Some(fragment_size) = cli.fragment_size {
        config.cache.fragment_size = fragment_size;
    }
    config.validate()?;
    Ok(config)
}

fn print_metrics() -> Result<()> {
    let mut buffer = Vec::new();
    let encoder = prometheus::TextEncoder::new();
    let metric_families = prometheus::gather();
    encoder.encode(&metric_families, &mut buffer)?;
    print!("{}", String::from_utf8_lossy(&buffer));
    Ok(())
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();

    let cli = Cli::parse();
    setup_tracing(&cli.log_level);

    let config = load_config(&cli)?;
    let storage_path = config.storage.path.clone();
    let chunk_size = config.storage.chunk_size;
    let open_store = || Blobstore::from_config(&config, SharedMetrics::prometheus());

    match cli.command {
        Command::Store { file, description } => {
            let store = open_store()?;
            let length = file.metadata()?.len();
            let mut reader = BufReader::new(File::open(&file)?);
            let blob_id = store.store_blob(&mut reader, Some(length), description.as_deref())?;
            info!(blob_id, file = %file.display(), "stored file");
            println!("{blob_id}");
        }
        Command::Retrieve(args) => {
            let store = open_store()?;
            let written = retrieve(&store, args)?;
            println!("Written: {}", format_bytes(written));
        }
        Command::Delete { blob_id } => {
            open_store()?.delete_blob(blob_id)?;
            println!("Deleted blob #{blob_id}");
        }
        Command::Info { blob_id, json } => {
            let info = blob_info(&storage_path, chunk_size, blob_id)?;
            print_blob_info(&info, json)?;
        }
        Command::Check(args) => {
            let store = open_store()?;
            check_integrity(&store, args)?;
            println!("OK");
        }
        Command::Inspect { command } => match command {
            InspectCommand::NumKeys => {
                let (blobs, chunks) = num_keys(&storage_path, chunk_size)?;
                println!("Number of keys: {} blobs, {} chunks", blobs, chunks);
            }
            InspectCommand::DiskSpace => {
                let disk_space = disk_space(&storage_path, chunk_size)?;
                println!("Disk space: {}", format_bytes(disk_space));
            }
        },
    }

    if cli.print_metrics {
        print_metrics()?;
    }
    Ok(())
}

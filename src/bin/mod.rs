use std::{io, path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use gridstream::{FileBackend, GridFs, GridFsConfig, ReadOptions, WriteOptions};
use tokio::{fs, io::AsyncWriteExt};
use tracing::level_filters::LevelFilter;

#[derive(Debug, Clone, Parser)]
struct Args {
    #[command(subcommand)]
    command: Commands,
    /// Directory holding the object store.
    #[arg(long, default_value = "gridstream-data")]
    root: PathBuf,
    #[arg(long, default_value = gridstream::config::DEFAULT_NAMESPACE)]
    namespace: String,
    #[arg(long, default_value_t = false)]
    verbose: bool,
}

#[derive(Debug, Clone, Subcommand)]
enum Commands {
    /// Store a local file under NAME.
    Put {
        source: PathBuf,
        name: String,
        #[arg(long)]
        content_type: Option<String>,
    },
    /// Write object NAME to a local file, or stdout when no destination is given.
    Get {
        name: String,
        destination: Option<PathBuf>,
    },
    /// Print the metadata of NAME as JSON.
    Stat { name: String },
    /// List every object in the namespace.
    Ls,
    /// Remove NAME.
    Rm { name: String },
}

#[tokio::main]
async fn main() -> io::Result<()> {
    let args = Args::parse();

    let log_level = if args.verbose {
        LevelFilter::TRACE
    } else {
        LevelFilter::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_writer(io::stderr)
        .init();

    let backend = FileBackend::new(&args.root).await?;
    let config = GridFsConfig::default().with_namespace(&args.namespace);
    let gridfs = GridFs::with_config(Arc::new(backend), config)?;

    match args.command {
        Commands::Put {
            source,
            name,
            content_type,
        } => {
            let mut options = WriteOptions::default();
            options.content_type = content_type;

            let mut input = fs::File::open(&source).await?;
            let mut output = gridfs.create_write_stream(&name, options)?;

            let n = tokio::io::copy(&mut input, &mut output).await?;
            output.shutdown().await?;

            tracing::info!(name = %name, bytes = n, "stored");
        }
        Commands::Get { name, destination } => {
            let mut input = gridfs
                .create_read_stream(&name, ReadOptions::default())?
                .into_async_read();

            let n = match destination {
                Some(path) => {
                    let mut file = fs::File::create(&path).await?;
                    let n = tokio::io::copy(&mut input, &mut file).await?;
                    file.flush().await?;
                    n
                }
                None => {
                    let mut stdout = tokio::io::stdout();
                    let n = tokio::io::copy(&mut input, &mut stdout).await?;
                    stdout.flush().await?;
                    n
                }
            };

            tracing::info!(name = %name, bytes = n, "fetched");
        }
        Commands::Stat { name } => match gridfs.stat(&name).await? {
            Some(info) => {
                let json = serde_json::to_string_pretty(&info).map_err(io::Error::other)?;
                println!("{}", json);
            }
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("{}: no such object", name),
                ));
            }
        },
        Commands::Ls => {
            for name in gridfs.list().await? {
                println!("{}", name);
            }
        }
        Commands::Rm { name } => {
            gridfs.delete(&name).await?;
        }
    }

    Ok(())
}

use anyhow::{Context, Result};
use bucketwire::cli::commands;
use bucketwire::{config, S3Client};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "bucketwire")]
#[command(version, about = "S3-compatible object storage client", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(long, global = true)]
    config: Option<String>,

    /// Profile to use from config
    #[arg(long, global = true)]
    profile: Option<String>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// List buckets, or objects under a prefix
    Ls {
        /// S3 path (s3/bucket/prefix/); omit to list buckets
        path: Option<String>,

        /// List recursively
        #[arg(short, long)]
        recursive: bool,
    },

    /// Upload a file, resuming an interrupted multipart upload if one exists
    Put {
        /// Local file
        file: PathBuf,

        /// Destination (s3/bucket/key or s3/bucket/dir/)
        path: String,

        /// Parts uploaded in parallel
        #[arg(long, default_value = "1")]
        concurrency: usize,

        /// Content-Type of the object
        #[arg(long)]
        content_type: Option<String>,
    },

    /// Print an object to stdout
    Cat {
        /// S3 path
        path: String,
    },

    /// Show object info
    Stat {
        /// S3 path
        path: String,
    },

    /// Remove an object
    Rm {
        /// S3 path
        path: String,
    },

    /// Make bucket
    Mb {
        /// Bucket name (s3/bucket)
        bucket: String,
    },

    /// Remove bucket
    Rb {
        /// Bucket name (s3/bucket)
        bucket: String,
    },

    /// List incomplete multipart uploads
    Uploads {
        /// S3 path (s3/bucket/prefix)
        path: String,
    },

    /// Abort incomplete multipart uploads
    RmUploads {
        /// S3 path (s3/bucket/prefix)
        path: String,
    },

    /// Print a presigned GET URL
    Presign {
        /// S3 path
        path: String,

        /// Validity in seconds (max 7 days)
        #[arg(long, default_value = "3600")]
        expires: u64,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| cli.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    // Parallel part uploads are plain futures, a single thread drives them
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;

    runtime.block_on(async_main(cli))
}

async fn async_main(cli: Cli) -> Result<()> {
    let config = config::load_config(cli.config.as_deref(), cli.profile.as_deref())?;
    let profile = config
        .get_profile(cli.profile.as_deref())
        .context("No profile configured")?;
    let client = S3Client::from_profile(profile)?;

    match cli.command {
        Commands::Ls { path, recursive } => {
            commands::cmd_ls(&client, path.as_deref(), recursive).await?;
        }
        Commands::Put {
            file,
            path,
            concurrency,
            content_type,
        } => {
            commands::cmd_put(&client, &file, &path, content_type.as_deref(), concurrency).await?;
        }
        Commands::Cat { path } => {
            commands::cmd_cat(&client, &path).await?;
        }
        Commands::Stat { path } => {
            commands::cmd_stat(&client, &path).await?;
        }
        Commands::Rm { path } => {
            commands::cmd_rm(&client, &path).await?;
        }
        Commands::Mb { bucket } => {
            commands::cmd_mb(&client, &bucket).await?;
        }
        Commands::Rb { bucket } => {
            commands::cmd_rb(&client, &bucket).await?;
        }
        Commands::Uploads { path } => {
            commands::cmd_uploads(&client, &path).await?;
        }
        Commands::RmUploads { path } => {
            commands::cmd_rm_uploads(&client, &path).await?;
        }
        Commands::Presign { path, expires } => {
            commands::cmd_presign(&client, &path, expires).await?;
        }
    }

    Ok(())
}

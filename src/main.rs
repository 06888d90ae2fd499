use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing::info;

use statline_etl::cli::db_counts;
use statline_etl::database_ops::db::Db;
use statline_etl::database_ops::growth;
use statline_etl::database_ops::statline::{
    self, DownloadConfig, EntityKind, StatlineClient, FACTS,
};
use statline_etl::util::env as env_util;

#[derive(Parser, Debug)]
#[command(name = "statline", version, about = "CBS Statline ETL admin CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Dataset {
    Bevolking,
    Bodemgebruik,
}

impl From<Dataset> for EntityKind {
    fn from(d: Dataset) -> Self {
        match d {
            Dataset::Bevolking => EntityKind::Bevolking,
            Dataset::Bodemgebruik => EntityKind::Bodemgebruik,
        }
    }
}

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Fetch all six dimension feeds and upsert them into the store
    MetadataSync,
    /// Download one fact feed into parquet staging files
    Download {
        dataset: Dataset,
        /// Parallel download workers (default: STATLINE_WORKERS or 4)
        #[arg(long)]
        workers: Option<usize>,
        /// Rows claimed per worker iteration (default: STATLINE_CHUNK_SIZE or 10000)
        #[arg(long)]
        chunk_size: Option<u64>,
        /// Staging directory root (default: STATLINE_OUT_DIR or data/parquet)
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Merge staged parquet files for one fact feed into the store
    Merge {
        dataset: Dataset,
        /// Directory holding the entity's staging files
        /// (default: <out_dir>/<table>)
        #[arg(long)]
        dir: Option<PathBuf>,
    },
    /// Metadata sync, then download + merge both fact feeds
    RunAll {
        #[arg(long)]
        workers: Option<usize>,
        #[arg(long)]
        out_dir: Option<PathBuf>,
    },
    /// Print row counts for the pipeline's tables
    DbCounts,
    /// Year-over-year population growth for one region key (e.g. GM0363)
    Growth {
        region: String,
        /// Emit JSON instead of plain text
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

fn download_config(
    workers: Option<usize>,
    chunk_size: Option<u64>,
    out_dir: Option<PathBuf>,
) -> DownloadConfig {
    let mut cfg = DownloadConfig::from_env();
    if let Some(w) = workers {
        cfg.workers = w.max(1);
    }
    if let Some(c) = chunk_size {
        cfg.chunk_size = c.max(1);
    }
    if let Some(dir) = out_dir {
        cfg.out_dir = dir;
    }
    cfg
}

fn client() -> Result<StatlineClient> {
    let base = env_util::env_opt("STATLINE_BASE_URL");
    let timeout = env_util::env_opt("STATLINE_HTTP_TIMEOUT").and_then(|s| s.parse().ok());
    StatlineClient::new(base.as_deref(), timeout)
}

async fn connect_db() -> Result<Db> {
    let url = env_util::db_url().context("resolving database URL")?;
    let max_conns = env_util::env_parse("DB_MAX_CONNS", 10u32);
    let db = Db::connect(&url, max_conns).await?;
    db.ensure_schema().await.context("applying migrations")?;
    Ok(db)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_util::init_env();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,sqlx=warn".into()),
        )
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::MetadataSync => {
            let db = connect_db().await?;
            let client = client()?;
            let rows = statline::run_metadata_sync(&db, &client).await?;
            info!(rows, "metadata sync complete");
        }
        Commands::Download {
            dataset,
            workers,
            chunk_size,
            out_dir,
        } => {
            let kind: EntityKind = dataset.into();
            let cfg = download_config(workers, chunk_size, out_dir);
            let client = client()?;
            let summary = statline::download_fact(kind, &client, &cfg).await?;
            info!(
                rows = summary.rows_fetched,
                pages = summary.pages_fetched,
                files = summary.files_written,
                "download complete"
            );
        }
        Commands::Merge { dataset, dir } => {
            let kind: EntityKind = dataset.into();
            let db = connect_db().await?;
            let dir = dir.unwrap_or_else(|| {
                DownloadConfig::from_env().out_dir.join(kind.table())
            });
            let rows = statline::run_merge(&db, kind, &dir).await?;
            info!(rows, "merge complete");
        }
        Commands::RunAll { workers, out_dir } => {
            let db = connect_db().await?;
            let client = client()?;
            let cfg = download_config(workers, None, out_dir);

            let rows = statline::run_metadata_sync(&db, &client).await?;
            info!(rows, "metadata sync complete");

            for kind in FACTS {
                let summary = statline::download_fact(kind, &client, &cfg).await?;
                info!(
                    entity = kind.table(),
                    rows = summary.rows_fetched,
                    files = summary.files_written,
                    "download complete"
                );
                let merged =
                    statline::run_merge(&db, kind, &cfg.out_dir.join(kind.table())).await?;
                info!(entity = kind.table(), rows = merged, "merge complete");
            }
        }
        Commands::DbCounts => {
            let db = connect_db().await?;
            db_counts::run(&db).await?;
        }
        Commands::Growth { region, json } => {
            let db = connect_db().await?;
            let rows = growth::population_growth(&db, &region).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&rows)?);
            } else {
                println!("population growth for {region}:");
                for r in rows {
                    println!("  {}: {:>10}  ({:+.2}%)", r.jaar, r.bevolking, r.growth * 100.0);
                }
            }
        }
    }
    Ok(())
}

//! CBS Statline provider: paginated OData ingest with parquet staging and
//! idempotent Postgres merge.
//!
//! The pipeline runs in two independent passes per fact feed. The download
//! pass fans out over workers that claim disjoint offset ranges from a
//! shared counter and spill decoded pages to offset-named parquet files.
//! The merge pass later reads those files back as an unordered set and
//! upserts them keyed on each entity's primary key, which makes re-runs and
//! overlapping files from interrupted downloads harmless. No state other
//! than the staging files crosses the two passes.

pub mod buffer;
pub mod checkpoint;
pub mod decode;
pub mod download;
pub mod error;
pub mod fetch;
pub mod merge;
pub mod records;
pub mod schema;

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use tracing::{info, instrument};

use crate::database_ops::db::Db;

pub use download::{run_fact_download, DownloadConfig, DownloadSummary};
pub use error::EtlError;
pub use fetch::{FactPages, PageSource, StatlineClient};
pub use schema::{EntityKind, DIMENSIONS, FACTS};

/// Fetch all six dimension feeds (one request each) and upsert them
/// wholesale. Category groups go first so rows referencing them land after
/// their targets. Returns the total row count across feeds.
#[instrument(skip(db, client))]
pub async fn run_metadata_sync(db: &Db, client: &StatlineClient) -> Result<u64, EtlError> {
    let mut total = 0u64;
    for kind in DIMENSIONS {
        info!(entity = kind.table(), "fetching dimension feed");
        let raw = client.fetch_all(kind).await?;
        let mut records = Vec::with_capacity(raw.len());
        for r in raw {
            records.push(records::TypedRecord::from_raw(kind, r)?);
        }
        let records = merge::dedup_by_pk(records);
        let n = merge::upsert_records(db, kind, &records).await?;
        info!(entity = kind.table(), rows = n, "dimension upserted");
        total += n;
    }
    Ok(total)
}

/// Download one fact feed into parquet staging files using the shared
/// Statline client.
pub async fn download_fact(
    kind: EntityKind,
    client: &StatlineClient,
    cfg: &DownloadConfig,
) -> Result<DownloadSummary> {
    let source = Arc::new(FactPages::new(client.clone(), kind));
    run_fact_download(kind, source, cfg).await
}

/// Merge every staging file under `dir` for one fact entity, scoped to the
/// regions currently present in the store. Returns rows upserted.
#[instrument(skip(db), fields(entity = kind.table()))]
pub async fn run_merge(db: &Db, kind: EntityKind, dir: &Path) -> Result<u64, EtlError> {
    let valid_regions = merge::load_valid_regions(db).await?;
    info!(
        entity = kind.table(),
        dir = %dir.display(),
        known_regions = valid_regions.len(),
        "merging staging files"
    );
    let total = merge::import_dir(db, dir, kind, &valid_regions).await?;
    info!(entity = kind.table(), rows = total, "merge complete");
    Ok(total)
}

//! Parallel download pass for the paginated fact feeds.
//!
//! A fixed pool of workers shares one `OffsetCounter`. Each worker loops
//! (claim a range, fetch that page, coerce, buffer, flush on threshold)
//! until it observes a page with zero entries, flushes its tail and exits.
//! Workers coordinate through nothing but the counter, so output files may
//! appear in any offset order; the merge pass treats them as an unordered
//! set.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::Serialize;
use tokio::time::Duration;
use tracing::{error, info, warn};

use crate::util::env::{env_opt, env_parse};

use super::buffer::{BufferedWriter, DEFAULT_FLUSH_THRESHOLD};
use super::checkpoint::OffsetCounter;
use super::error::EtlError;
use super::fetch::PageSource;
use super::records::TypedRecord;
use super::schema::EntityKind;

#[derive(Debug, Clone)]
pub struct DownloadConfig {
    pub workers: usize,
    pub chunk_size: u64,
    pub out_dir: PathBuf,
    pub max_retries: u32,
    pub backoff: Duration,
}

impl DownloadConfig {
    pub fn from_env() -> Self {
        Self {
            workers: env_parse("STATLINE_WORKERS", 4usize).max(1),
            chunk_size: env_parse("STATLINE_CHUNK_SIZE", DEFAULT_FLUSH_THRESHOLD as u64).max(1),
            out_dir: PathBuf::from(
                env_opt("STATLINE_OUT_DIR").unwrap_or_else(|| "data/parquet".into()),
            ),
            max_retries: env_parse("STATLINE_MAX_RETRIES", 3u32),
            backoff: Duration::from_millis(env_parse("STATLINE_BACKOFF_MS", 300u64)),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct DownloadSummary {
    pub rows_fetched: u64,
    pub pages_fetched: u64,
    pub files_written: u64,
    pub started_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Default)]
struct WorkerStats {
    rows: u64,
    pages: u64,
    files: u64,
}

/// Run the FETCHING phase for one fact feed to completion. The counter is
/// fresh per run; resuming after a crash refetches from offset zero and
/// leans on merge idempotence for correctness.
pub async fn run_fact_download(
    kind: EntityKind,
    source: Arc<dyn PageSource>,
    cfg: &DownloadConfig,
) -> Result<DownloadSummary> {
    let started_at = Utc::now();
    let counter = OffsetCounter::new();
    let stop = Arc::new(AtomicBool::new(false));

    info!(
        entity = kind.table(),
        workers = cfg.workers,
        chunk_size = cfg.chunk_size,
        out_dir = %cfg.out_dir.display(),
        "starting fact download"
    );

    let mut tasks = Vec::with_capacity(cfg.workers);
    for worker_id in 0..cfg.workers {
        let source = source.clone();
        let counter = counter.clone();
        let stop = stop.clone();
        let cfg = cfg.clone();
        tasks.push(tokio::spawn(async move {
            let res = worker_loop(worker_id, kind, source, counter, &cfg, stop).await;
            match &res {
                Ok(stats) => info!(
                    worker = worker_id,
                    rows = stats.rows,
                    pages = stats.pages,
                    files = stats.files,
                    "worker finished"
                ),
                Err(e) => error!(worker = worker_id, error = %e, "worker failed"),
            }
            res
        }));
    }

    let mut summary = DownloadSummary {
        started_at: Some(started_at),
        ..DownloadSummary::default()
    };
    let mut first_err: Option<anyhow::Error> = None;
    for res in join_all(tasks).await {
        match res {
            Ok(Ok(stats)) => {
                summary.rows_fetched += stats.rows;
                summary.pages_fetched += stats.pages;
                summary.files_written += stats.files;
            }
            Ok(Err(e)) => {
                if first_err.is_none() {
                    first_err = Some(e);
                }
            }
            Err(join_err) => {
                if first_err.is_none() {
                    first_err = Some(anyhow::anyhow!(join_err));
                }
            }
        }
    }

    if let Some(e) = first_err {
        return Err(e);
    }
    info!(
        entity = kind.table(),
        rows = summary.rows_fetched,
        files = summary.files_written,
        "fact download complete"
    );
    Ok(summary)
}

async fn worker_loop(
    worker_id: usize,
    kind: EntityKind,
    source: Arc<dyn PageSource>,
    counter: OffsetCounter,
    cfg: &DownloadConfig,
    stop: Arc<AtomicBool>,
) -> Result<WorkerStats> {
    let mut writer = BufferedWriter::create(kind, &cfg.out_dir, cfg.chunk_size as usize)?;
    let mut stats = WorkerStats::default();
    let mut claim_end = 0u64;

    loop {
        // Cooperative stop: finish nothing new once a sibling hit a
        // systemic error, but never abandon an in-flight page.
        if stop.load(Ordering::Relaxed) {
            break;
        }

        let start = counter.claim_next_batch(cfg.chunk_size);
        let raw = fetch_with_retry(source.as_ref(), start, cfg).await?;
        if raw.is_empty() {
            info!(worker = worker_id, offset = start, entity = kind.table(), "end of feed");
            break;
        }
        claim_end = start + cfg.chunk_size;

        let mut records = Vec::with_capacity(raw.len());
        for r in raw {
            match TypedRecord::from_raw(kind, r) {
                Ok(rec) => records.push(rec),
                Err(e) => {
                    // Schema mismatch with the live feed: abort the whole
                    // run, not just this worker.
                    stop.store(true, Ordering::Relaxed);
                    return Err(e.into());
                }
            }
        }

        stats.rows += records.len() as u64;
        stats.pages += 1;
        writer.accept(records);
        writer.flush_if_threshold(claim_end)?;
    }

    writer.flush_remainder(claim_end)?;
    stats.files = writer.files_written();
    Ok(stats)
}

async fn fetch_with_retry(
    source: &dyn PageSource,
    offset: u64,
    cfg: &DownloadConfig,
) -> Result<Vec<super::decode::RawRecord>, EtlError> {
    let mut attempt = 0u32;
    let mut backoff = cfg.backoff;
    loop {
        match source.fetch_page(offset).await {
            Ok(page) => return Ok(page),
            Err(e) if e.is_transient() && attempt < cfg.max_retries => {
                attempt += 1;
                warn!(
                    offset,
                    attempt,
                    max_retries = cfg.max_retries,
                    error = %e,
                    "page fetch failed; backing off"
                );
                tokio::time::sleep(backoff).await;
                backoff = backoff.saturating_mul(2).min(Duration::from_secs(30));
            }
            Err(e) => return Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::statline::decode::RawRecord;
    use crate::database_ops::statline::merge::read_staging_file;
    use crate::database_ops::statline::records::PkValue;
    use async_trait::async_trait;
    use std::collections::HashSet;
    use std::sync::atomic::AtomicU64;
    use std::sync::Mutex;

    /// Simulated paginated feed of `total` rows served in pages of
    /// `page_size`, with ids 0..total. Records every claimed offset.
    struct FakeSource {
        total: u64,
        page_size: u64,
        claims: Mutex<Vec<u64>>,
        fail_first_n: AtomicU64,
        poison_offset: Option<u64>,
    }

    impl FakeSource {
        fn new(total: u64, page_size: u64) -> Self {
            Self {
                total,
                page_size,
                claims: Mutex::new(Vec::new()),
                fail_first_n: AtomicU64::new(0),
                poison_offset: None,
            }
        }

        fn row(id: u64) -> RawRecord {
            RawRecord(vec![
                Some(id.to_string()),
                Some("T001038".into()),
                Some("10000".into()),
                Some("T001019".into()),
                Some("GM0363  ".into()),
                Some("2020JJ00".into()),
                Some("100".into()),
                Some("99.5".into()),
            ])
        }
    }

    #[async_trait]
    impl PageSource for FakeSource {
        async fn fetch_page(&self, offset: u64) -> Result<Vec<RawRecord>, EtlError> {
            self.claims.lock().unwrap().push(offset);
            if self.fail_first_n.load(Ordering::SeqCst) > 0 {
                self.fail_first_n.fetch_sub(1, Ordering::SeqCst);
                return Err(EtlError::FetchStatus {
                    offset,
                    status: 503,
                });
            }
            if offset >= self.total {
                return Ok(Vec::new());
            }
            let end = (offset + self.page_size).min(self.total);
            let mut page: Vec<RawRecord> = (offset..end).map(Self::row).collect();
            if self.poison_offset == Some(offset) {
                page[0].0[2] = Some("not-a-number".into());
            }
            Ok(page)
        }
    }

    fn test_cfg(dir: &std::path::Path, workers: usize, chunk: u64) -> DownloadConfig {
        DownloadConfig {
            workers,
            chunk_size: chunk,
            out_dir: dir.to_path_buf(),
            max_retries: 2,
            backoff: Duration::from_millis(1),
        }
    }

    fn staged_ids(dir: &std::path::Path) -> Vec<i64> {
        let mut ids = Vec::new();
        let entity_dir = dir.join("bevolking");
        for entry in std::fs::read_dir(entity_dir).unwrap() {
            let path = entry.unwrap().path();
            for rec in read_staging_file(&path, EntityKind::Bevolking).unwrap() {
                match rec.pk() {
                    PkValue::Int(id) => ids.push(id),
                    other => panic!("unexpected pk {other:?}"),
                }
            }
        }
        ids
    }

    #[tokio::test]
    async fn test_exactly_once_coverage_across_workers() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::new(1_237, 100));
        let cfg = test_cfg(dir.path(), 4, 100);

        let summary = run_fact_download(EntityKind::Bevolking, source, &cfg)
            .await
            .unwrap();
        assert_eq!(summary.rows_fetched, 1_237);

        let ids = staged_ids(dir.path());
        assert_eq!(ids.len(), 1_237, "duplicate or missing rows in staging");
        let unique: HashSet<i64> = ids.iter().copied().collect();
        assert_eq!(unique.len(), 1_237);
        assert_eq!(*unique.iter().min().unwrap(), 0);
        assert_eq!(*unique.iter().max().unwrap(), 1_236);
    }

    #[tokio::test]
    async fn test_terminates_on_empty_page_without_further_claims() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::new(300, 100));
        let cfg = test_cfg(dir.path(), 1, 100);

        run_fact_download(EntityKind::Bevolking, source.clone(), &cfg)
            .await
            .unwrap();

        let claims = source.claims.lock().unwrap().clone();
        assert_eq!(claims, vec![0, 100, 200, 300]);
    }

    #[tokio::test]
    async fn test_partial_final_page_is_flushed() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::new(150, 100));
        let cfg = test_cfg(dir.path(), 1, 100);

        let summary = run_fact_download(EntityKind::Bevolking, source, &cfg)
            .await
            .unwrap();
        assert_eq!(summary.rows_fetched, 150);
        assert_eq!(staged_ids(dir.path()).len(), 150);
    }

    #[tokio::test]
    async fn test_transient_failures_are_retried() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::new(200, 100));
        source.fail_first_n.store(2, Ordering::SeqCst);
        let cfg = test_cfg(dir.path(), 1, 100);

        let summary = run_fact_download(EntityKind::Bevolking, source, &cfg)
            .await
            .unwrap();
        assert_eq!(summary.rows_fetched, 200);
    }

    #[tokio::test]
    async fn test_exhausted_retries_fail_the_worker() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(FakeSource::new(200, 100));
        source.fail_first_n.store(50, Ordering::SeqCst);
        let cfg = test_cfg(dir.path(), 1, 100);

        let err = run_fact_download(EntityKind::Bevolking, source, &cfg).await;
        assert!(err.is_err());
    }

    #[tokio::test]
    async fn test_validation_error_aborts_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut source = FakeSource::new(10_000, 100);
        source.poison_offset = Some(300);
        let cfg = test_cfg(dir.path(), 2, 100);

        let err = run_fact_download(EntityKind::Bevolking, Arc::new(source), &cfg).await;
        let err = err.expect_err("poisoned page must abort");
        assert!(err.downcast_ref::<EtlError>().is_some_and(|e| matches!(
            e,
            EtlError::Validation { field: "leeftijd_key", .. }
        )));
    }

    #[test]
    fn test_config_defaults() {
        let cfg = DownloadConfig::from_env();
        assert!(cfg.workers >= 1);
        assert!(cfg.chunk_size >= 1);
    }
}

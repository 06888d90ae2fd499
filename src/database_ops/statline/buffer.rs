//! Row buffer that spills to offset-named parquet staging files.
//!
//! Files are written whole and never touched again; the offset embedded in
//! the name is the claim-end offset of the worker that produced it, which
//! is unique across workers within a run, so concurrent writers can never
//! collide on a path. A resumed run may produce files overlapping an
//! earlier run's; the merge pass absorbs that through keyed upsert.

use std::fs::File;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use parquet::arrow::ArrowWriter;
use tracing::info;

use super::records::{to_record_batch, TypedRecord};
use super::schema::EntityKind;

pub const DEFAULT_FLUSH_THRESHOLD: usize = 10_000;

pub struct BufferedWriter {
    kind: EntityKind,
    dir: PathBuf,
    threshold: usize,
    buf: Vec<TypedRecord>,
    files_written: u64,
}

impl BufferedWriter {
    pub fn create(kind: EntityKind, out_dir: &Path, threshold: usize) -> Result<Self> {
        let dir = out_dir.join(kind.table());
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("creating staging dir {}", dir.display()))?;
        Ok(Self {
            kind,
            dir,
            threshold: threshold.max(1),
            buf: Vec::new(),
            files_written: 0,
        })
    }

    pub fn accept(&mut self, records: Vec<TypedRecord>) {
        self.buf.extend(records);
    }

    pub fn buffered(&self) -> usize {
        self.buf.len()
    }

    pub fn files_written(&self) -> u64 {
        self.files_written
    }

    /// Spill the buffer once it has reached the row threshold. The offset is
    /// the caller's cumulative claim-end at this point in its loop.
    pub fn flush_if_threshold(&mut self, cumulative_offset: u64) -> Result<Option<PathBuf>> {
        if self.buf.len() < self.threshold {
            return Ok(None);
        }
        self.flush(cumulative_offset).map(Some)
    }

    /// Spill whatever is left; called once when a worker observes
    /// end-of-data so the tail of the feed is not lost.
    pub fn flush_remainder(&mut self, cumulative_offset: u64) -> Result<Option<PathBuf>> {
        if self.buf.is_empty() {
            return Ok(None);
        }
        self.flush(cumulative_offset).map(Some)
    }

    fn flush(&mut self, cumulative_offset: u64) -> Result<PathBuf> {
        let path = self
            .dir
            .join(format!("{}_{}.parquet", self.kind.file_stem(), cumulative_offset));
        let batch = to_record_batch(self.kind, &self.buf)?;

        let file = File::create(&path)
            .with_context(|| format!("creating {}", path.display()))?;
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None)
            .with_context(|| format!("opening parquet writer {}", path.display()))?;
        writer
            .write(&batch)
            .with_context(|| format!("writing record batch {}", path.display()))?;
        writer
            .close()
            .with_context(|| format!("closing parquet writer {}", path.display()))?;

        info!(
            entity = self.kind.table(),
            rows = self.buf.len(),
            offset = cumulative_offset,
            file = %path.display(),
            "flushed staging file"
        );
        self.buf.clear();
        self.files_written += 1;
        Ok(path)
    }
}

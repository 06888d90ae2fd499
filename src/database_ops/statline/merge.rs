//! Merge pass: read staging files back and upsert them into Postgres.
//!
//! Files are consumed as an unordered set. Correctness rests entirely on
//! the primary-key upsert: re-importing a file, or importing overlapping
//! files from a restarted download run, overwrites rows in place and never
//! duplicates them. Fact rows referencing regions outside the locally known
//! set are dropped before the upsert (the remote feed carries historical
//! and foreign region codes that are out of analysis scope).

use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::path::Path;

use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use sqlx::QueryBuilder;
use tracing::{info, instrument, warn};

use crate::database_ops::db::Db;

use super::error::EtlError;
use super::records::{from_record_batch, TypedRecord, Value};
use super::schema::{EntityKind, FieldType};

// Stay clear of Postgres' 65535 bind-parameter cap; bodemgebruik rows carry
// 48 parameters each.
const MAX_BIND_PARAMS: usize = 60_000;

fn import_error(path: &Path, source: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> EtlError {
    EtlError::Import {
        path: path.to_path_buf(),
        source: source.into(),
    }
}

/// Read one staging file into typed records. Any read or decode failure is
/// an `Import` error naming the file; skip-vs-abort is the caller's call.
pub fn read_staging_file(path: &Path, kind: EntityKind) -> Result<Vec<TypedRecord>, EtlError> {
    let file = File::open(path).map_err(|e| import_error(path, e))?;
    let reader = ParquetRecordBatchReaderBuilder::try_new(file)
        .map_err(|e| import_error(path, e))?
        .build()
        .map_err(|e| import_error(path, e))?;

    let mut records = Vec::new();
    for batch in reader {
        let batch = batch.map_err(|e| import_error(path, e))?;
        let rows = from_record_batch(kind, &batch).map_err(|e| import_error(path, e))?;
        records.extend(rows);
    }
    Ok(records)
}

/// Drop fact rows whose region key is not locally known. Dimension records
/// pass through untouched.
pub fn filter_known_regions(
    kind: EntityKind,
    records: Vec<TypedRecord>,
    valid_regions: &HashSet<String>,
) -> Vec<TypedRecord> {
    let Some(idx) = kind.region_field() else {
        return records;
    };
    records
        .into_iter()
        .filter(|r| match &r.values[idx] {
            Value::Text(key) => valid_regions.contains(key),
            _ => false,
        })
        .collect()
}

/// Keep one row per primary key (last occurrence wins). A multi-row INSERT
/// cannot carry the same conflict key twice, and all copies of a record are
/// authoritative snapshots of the same upstream row anyway.
pub fn dedup_by_pk(records: Vec<TypedRecord>) -> Vec<TypedRecord> {
    let mut by_pk: HashMap<_, TypedRecord> = HashMap::with_capacity(records.len());
    for r in records {
        by_pk.insert(r.pk(), r);
    }
    by_pk.into_values().collect()
}

/// Bulk upsert keyed on the entity's primary key: insert new rows, overwrite
/// every non-key column of existing ones.
#[instrument(skip(db, records), fields(entity = kind.table(), rows = records.len()))]
pub async fn upsert_records(
    db: &Db,
    kind: EntityKind,
    records: &[TypedRecord],
) -> Result<u64, EtlError> {
    if records.is_empty() {
        return Ok(0);
    }

    let fields = kind.fields();
    let columns: Vec<&str> = fields.iter().map(|f| f.column).collect();
    let pk = kind.primary_key().column;
    let rows_per_chunk = (MAX_BIND_PARAMS / fields.len()).max(1);

    for chunk in records.chunks(rows_per_chunk) {
        let mut qb: QueryBuilder<'_, sqlx::Postgres> = QueryBuilder::new(format!(
            "INSERT INTO {} ({}) ",
            kind.table(),
            columns.join(", ")
        ));
        qb.push_values(chunk, |mut b, r| {
            for (spec, v) in fields.iter().zip(&r.values) {
                match v {
                    Value::Text(s) => {
                        b.push_bind(s.as_str());
                    }
                    Value::Int(i) => {
                        b.push_bind(*i);
                    }
                    Value::Float(f) => {
                        b.push_bind(*f);
                    }
                    Value::Null => match spec.ty {
                        FieldType::Text => {
                            b.push_bind(None::<&str>);
                        }
                        FieldType::Int => {
                            b.push_bind(None::<i64>);
                        }
                        FieldType::Float => {
                            b.push_bind(None::<f64>);
                        }
                    },
                }
            }
        });
        qb.push(format!(" ON CONFLICT ({pk}) DO UPDATE SET "));
        let mut sep = qb.separated(", ");
        for spec in &fields[1..] {
            sep.push(format!("{c} = EXCLUDED.{c}", c = spec.column));
        }
        qb.build().execute(&db.pool).await?;
    }

    Ok(records.len() as u64)
}

/// Import one staging file: read, filter to known regions, dedup, upsert.
/// Returns the number of rows actually upserted; an empty file is Ok(0).
pub async fn import_file(
    db: &Db,
    path: &Path,
    kind: EntityKind,
    valid_regions: &HashSet<String>,
) -> Result<u64, EtlError> {
    let records = read_staging_file(path, kind)?;
    let total = records.len();
    let kept = dedup_by_pk(filter_known_regions(kind, records, valid_regions));
    let count = upsert_records(db, kind, &kept).await?;
    info!(
        entity = kind.table(),
        file = %path.display(),
        read = total,
        upserted = count,
        "staging file merged"
    );
    Ok(count)
}

/// Import every staging file in the entity's directory, in whatever order
/// the filesystem yields them. Unreadable files are logged and skipped so
/// one corrupt flush cannot wedge the whole merge; store errors abort.
pub async fn import_dir(
    db: &Db,
    dir: &Path,
    kind: EntityKind,
    valid_regions: &HashSet<String>,
) -> Result<u64, EtlError> {
    let mut total = 0u64;
    let entries = std::fs::read_dir(dir).map_err(|e| import_error(dir, e))?;
    for entry in entries {
        let path = entry.map_err(|e| import_error(dir, e))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("parquet") {
            continue;
        }
        match import_file(db, &path, kind, valid_regions).await {
            Ok(n) => total += n,
            Err(e @ EtlError::Import { .. }) => {
                warn!(error = %e, file = %path.display(), "skipping unreadable staging file");
            }
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}

/// Region keys currently present in the store; the fact merge is scoped to
/// these.
pub async fn load_valid_regions(db: &Db) -> Result<HashSet<String>, EtlError> {
    let keys: Vec<String> = sqlx::query_scalar("SELECT regio_key FROM regios")
        .fetch_all(&db.pool)
        .await?;
    Ok(keys.into_iter().collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database_ops::statline::records::PkValue;

    fn bevolking_record(id: i64, regio: &str) -> TypedRecord {
        let kind = EntityKind::Bevolking;
        let mut values = vec![Value::Null; kind.fields().len()];
        values[0] = Value::Int(id);
        values[4] = Value::Text(regio.to_string());
        values[6] = Value::Int(id * 10);
        TypedRecord { kind, values }
    }

    #[test]
    fn test_region_filter_keeps_only_known_keys_and_counts_match() {
        let valid: HashSet<String> = ["GM0363".to_string(), "GM0599".to_string()].into();
        let records = vec![
            bevolking_record(1, "GM0363"),
            bevolking_record(2, "NL9999"),
            bevolking_record(3, "GM0599"),
            bevolking_record(4, "GM0363"),
        ];
        let kept = filter_known_regions(EntityKind::Bevolking, records, &valid);
        assert_eq!(kept.len(), 3);
        assert!(kept
            .iter()
            .all(|r| matches!(&r.values[4], Value::Text(k) if valid.contains(k))));
    }

    #[test]
    fn test_region_filter_drops_null_region() {
        let valid: HashSet<String> = ["GM0363".to_string()].into();
        let mut r = bevolking_record(1, "GM0363");
        r.values[4] = Value::Null;
        let kept = filter_known_regions(EntityKind::Bevolking, vec![r], &valid);
        assert!(kept.is_empty());
    }

    #[test]
    fn test_region_filter_ignores_dimensions() {
        let kind = EntityKind::Regios;
        let records = vec![TypedRecord {
            kind,
            values: vec![
                Value::Text("GM9999".into()),
                Value::Text("Nergenshuizen".into()),
                Value::Null,
                Value::Null,
            ],
        }];
        let kept = filter_known_regions(kind, records.clone(), &HashSet::new());
        assert_eq!(kept, records);
    }

    #[test]
    fn test_dedup_keeps_one_row_per_pk_last_wins() {
        let records = vec![
            bevolking_record(1, "GM0363"),
            bevolking_record(2, "GM0363"),
            {
                let mut r = bevolking_record(1, "GM0599");
                r.values[6] = Value::Int(777);
                r
            },
        ];
        let deduped = dedup_by_pk(records);
        assert_eq!(deduped.len(), 2);
        let one = deduped
            .iter()
            .find(|r| r.pk() == PkValue::Int(1))
            .unwrap();
        assert_eq!(one.values[6], Value::Int(777));
    }

    #[test]
    fn test_corrupt_staging_file_is_an_import_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Bevolking_100.parquet");
        std::fs::write(&path, b"definitely not parquet").unwrap();
        let err = read_staging_file(&path, EntityKind::Bevolking).unwrap_err();
        match err {
            EtlError::Import { path: p, .. } => assert_eq!(p, path),
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn test_staging_file_round_trip() {
        use crate::database_ops::statline::buffer::BufferedWriter;
        let dir = tempfile::tempdir().unwrap();
        let mut w = BufferedWriter::create(EntityKind::Bevolking, dir.path(), 3).unwrap();
        w.accept(vec![
            bevolking_record(10, "GM0363"),
            bevolking_record(11, "GM0599"),
            bevolking_record(12, "GM0363"),
        ]);
        let path = w.flush_if_threshold(30_000).unwrap().unwrap();
        let back = read_staging_file(&path, EntityKind::Bevolking).unwrap();
        assert_eq!(back.len(), 3);
        assert_eq!(back[0].pk(), PkValue::Int(10));
    }
}

//! Row-count report over the pipeline's tables, for eyeballing whether a
//! sync or merge actually landed.

use anyhow::Result;
use chrono::Utc;
use sqlx::Row;

use crate::database_ops::db::Db;
use crate::database_ops::statline::{DIMENSIONS, FACTS};

fn is_undefined_table_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.code().as_deref() == Some("42P01"),
        _ => false,
    }
}

pub async fn run(db: &Db) -> Result<()> {
    use std::fmt::Write as _;

    // A missing table just means the schema was never bootstrapped; report
    // zero rather than failing the diagnostic.
    async fn count(db: &Db, table: &str) -> Result<i64> {
        match sqlx::query_scalar::<_, i64>(&format!("SELECT count(*) FROM {table}"))
            .fetch_one(&db.pool)
            .await
        {
            Ok(val) => Ok(val),
            Err(e) if is_undefined_table_error(&e) => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    let mut out = String::new();
    writeln!(out, "DB COUNTS SUMMARY (as of {}):", Utc::now().to_rfc3339()).ok();

    writeln!(out, "dimensions:").ok();
    for kind in DIMENSIONS {
        let n = count(db, kind.table()).await?;
        writeln!(out, "  {}: {n}", kind.table()).ok();
    }

    writeln!(out, "facts:").ok();
    for kind in FACTS {
        let n = count(db, kind.table()).await?;
        writeln!(out, "  {}: {n}", kind.table()).ok();
    }

    // Period coverage of the merged facts, when present.
    let coverage = sqlx::query(
        "SELECT min(p.jaar) AS first_jaar, max(p.jaar) AS last_jaar
         FROM bevolking b
         JOIN perioden p ON p.datum_key = b.datum_key
         WHERE p.jaar IS NOT NULL",
    )
    .fetch_optional(&db.pool)
    .await;
    if let Ok(Some(row)) = coverage {
        let first = row.try_get::<Option<i64>, _>("first_jaar").ok().flatten();
        let last = row.try_get::<Option<i64>, _>("last_jaar").ok().flatten();
        if let (Some(first), Some(last)) = (first, last) {
            writeln!(out, "bevolking period coverage: {first}..{last}").ok();
        }
    }

    println!("{out}");
    Ok(())
}

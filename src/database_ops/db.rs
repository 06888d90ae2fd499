use std::str::FromStr;
use std::time::Duration;

use anyhow::Result;
use sqlx::{
    postgres::{PgConnectOptions, PgPoolOptions, PgSslMode},
    PgPool, Row,
};
use tracing::{info, instrument};

#[derive(Clone)]
pub struct Db {
    pub pool: PgPool,
}

impl Db {
    // SECURITY: never include raw DSNs in tracing spans (they may contain credentials).
    #[instrument(skip(database_url))]
    pub async fn connect(database_url: &str, max_connections: u32) -> Result<Self> {
        let mut connect_options = PgConnectOptions::from_str(database_url)?;
        if database_url.contains("sslmode=require") {
            connect_options = connect_options.ssl_mode(PgSslMode::Require);
        }

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Duration::from_secs(10))
            .idle_timeout(Duration::from_secs(600))
            .connect_with(connect_options)
            .await?;
        info!(max_connections, "connected to db");
        Ok(Self { pool })
    }

    /// Apply any pending SQL files from `./migrations`, tracked in a
    /// `_migrations` table. File names must start with a numeric version
    /// followed by an underscore (`0001_init.sql`); anything else is
    /// ignored.
    pub async fn ensure_schema(&self) -> Result<()> {
        use std::{collections::HashSet, fs, path::Path};

        let dir = Path::new("./migrations");
        if !dir.exists() {
            return Ok(());
        }

        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS _migrations (
                version BIGINT PRIMARY KEY,
                description TEXT,
                installed_at TIMESTAMPTZ DEFAULT now()
             )",
        )
        .execute(&self.pool)
        .await?;

        let mut applied: HashSet<i64> = HashSet::new();
        for row in sqlx::raw_sql("SELECT version FROM _migrations")
            .fetch_all(&self.pool)
            .await?
        {
            applied.insert(row.try_get::<i64, _>(0)?);
        }

        let mut candidates: Vec<(i64, String, std::path::PathBuf)> = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if !path.is_file() {
                continue;
            }
            let Some(fname) = path.file_name().and_then(|s| s.to_str()) else {
                continue;
            };
            if !fname.ends_with(".sql") {
                continue;
            }
            let num: String = fname.chars().take_while(|c| c.is_ascii_digit()).collect();
            let Some(rest) = fname
                .strip_prefix(&num)
                .and_then(|s| s.strip_prefix('_'))
            else {
                continue;
            };
            if let Ok(version) = num.parse::<i64>() {
                candidates.push((version, rest.trim_end_matches(".sql").to_string(), path));
            }
        }
        candidates.sort_by_key(|(v, _, _)| *v);

        for (version, desc, path) in candidates {
            if applied.contains(&version) {
                continue;
            }
            let sql = fs::read_to_string(&path)?;
            info!(version, file = ?path, "applying migration");
            sqlx::raw_sql(&sql).execute(&self.pool).await?;

            let desc_escaped = desc.replace('\'', "''");
            sqlx::raw_sql(&format!(
                "INSERT INTO _migrations(version, description) VALUES ({version}, '{desc_escaped}')"
            ))
            .execute(&self.pool)
            .await?;
            applied.insert(version);
        }
        Ok(())
    }
}

//! Environment helpers: centralized dotenv loading and ergonomic getters.
//! Call `init_env()` once early in each binary (or rely on lazy Once).
use std::str::FromStr;
use std::sync::Once;

static INIT: Once = Once::new();

/// Load .env if present, exactly once. Safe to call many times.
pub fn init_env() {
    INIT.call_once(|| {
        let _ = dotenv::dotenv();
    });
}

/// Get optional env var (None if unset or empty).
pub fn env_opt(key: &str) -> Option<String> {
    init_env();
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

/// Get parsed value with default fallback.
pub fn env_parse<T>(key: &str, default: T) -> T
where
    T: FromStr + Clone,
{
    init_env();
    match std::env::var(key) {
        Ok(raw) => raw.parse::<T>().unwrap_or(default),
        Err(_) => default,
    }
}

/// Boolean flag; accepts 1/true/on/yes (case-insensitive) as true.
pub fn env_flag(key: &str, default: bool) -> bool {
    init_env();
    match std::env::var(key) {
        Ok(raw) => {
            let v = raw.trim().to_ascii_lowercase();
            matches!(v.as_str(), "1" | "true" | "on" | "yes")
        }
        Err(_) => default,
    }
}

/// Database DSN: a full DATABASE_URL wins, otherwise one is composed from
/// the component variables (DBNAME/DBUSER/DBPASS/DBPORT, optional DBHOST).
pub fn db_url() -> anyhow::Result<String> {
    init_env();
    if let Some(v) = env_opt("DATABASE_URL") {
        return Ok(v);
    }
    build_dsn_from_components()
        .ok_or_else(|| anyhow::anyhow!("no DATABASE_URL and incomplete DBNAME/DBUSER/DBPASS/DBPORT"))
}

fn build_dsn_from_components() -> Option<String> {
    let database = env_opt("DBNAME")?;
    let user = env_opt("DBUSER")?;
    let password = env_opt("DBPASS");
    let port = env_opt("DBPORT").unwrap_or_else(|| "5432".into());
    let host = env_opt("DBHOST").unwrap_or_else(|| "localhost".into());

    // The password may contain reserved URL characters; build via url::Url
    // so credentials are percent-encoded safely.
    let port_u16: u16 = port.parse::<u16>().unwrap_or(5432);
    let mut out = url::Url::parse("postgresql://localhost").ok()?;
    out.set_username(&user).ok()?;
    if let Some(pass) = password {
        out.set_password(Some(&pass)).ok()?;
    }
    out.set_host(Some(&host)).ok()?;
    out.set_port(Some(port_u16)).ok()?;
    out.set_path(&format!("/{database}"));
    Some(out.to_string())
}

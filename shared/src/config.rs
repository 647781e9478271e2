use std::str::FromStr;
use tracing::warn;

/// Settings for the carbon TCP server, read from `CARBON_*` environment variables
#[derive(Clone, Debug)]
pub struct Config {
    pub host: String,
    pub tcp_port: u16,
    pub backend: String,
    pub max_entries: Option<u64>,
    pub default_ttl_ms: Option<u64>,
}

impl Config {
    const DEFAULT_HOST: &str = "127.0.0.1";
    const DEFAULT_TCP_PORT: u16 = 5500;
    const DEFAULT_BACKEND: &str = "bounded";
    const DEFAULT_MAX_ENTRIES: u64 = 100_000;

    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a config from an arbitrary variable source
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let host = lookup("CARBON_HOST").unwrap_or_else(|| Self::DEFAULT_HOST.to_string());
        let tcp_port =
            parse_or("CARBON_TCP_PORT", lookup("CARBON_TCP_PORT")).unwrap_or(Self::DEFAULT_TCP_PORT);
        let backend = lookup("CARBON_BACKEND")
            .map(|b| b.trim().to_lowercase())
            .unwrap_or_else(|| Self::DEFAULT_BACKEND.to_string());
        let max_entries = parse_or("CARBON_MAX_ENTRIES", lookup("CARBON_MAX_ENTRIES"))
            .or(Some(Self::DEFAULT_MAX_ENTRIES));
        // 0 = no default TTL
        let default_ttl_ms = parse_or::<u64>("CARBON_DEFAULT_TTL_MS", lookup("CARBON_DEFAULT_TTL_MS"))
            .filter(|ttl| *ttl > 0);

        Self {
            host,
            tcp_port,
            backend,
            max_entries,
            default_ttl_ms,
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.tcp_port)
    }
}

fn parse_or<T: FromStr>(name: &str, raw: Option<String>) -> Option<T> {
    let raw = raw?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("{name}={raw:?} is not a valid number, using default");
            None
        }
    }
}

use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

pub struct Config {
    pub host: String,
    pub port: u16,
    pub data_dir: String,
    /// Origin the application is served from, e.g. `http://localhost:8787`.
    pub origin: String,
    /// Where same-origin traffic is forwarded when the network is consulted.
    pub upstream: String,
    pub trusted_image_hosts: Vec<String>,
    /// Base URL of the remote document store (item metadata, daily pick).
    pub documents_url: String,
    /// Base URL of the remote object store holding the assets.
    pub objects_url: String,
    pub cache_version: String,
    pub app_shell: Vec<String>,
    pub orig_max_entries: usize,
    pub reference_time_zone: String,
    pub background_timeout: Duration,
    pub daily_snapshot: usize,
}

impl Config {
    const DEFAULT_HOST: &str = "127.0.0.1";
    const DEFAULT_PORT: u16 = 8787;
    const DEFAULT_DATA_DIR: &str = "./data";
    const DEFAULT_ORIGIN: &str = "http://localhost:8787";
    const DEFAULT_UPSTREAM: &str = "http://localhost:3000";
    const DEFAULT_TRUSTED_IMAGE_HOSTS: &str = "firebasestorage.googleapis.com,firebasestorage.app";
    const DEFAULT_DOCUMENTS_URL: &str = "http://localhost:3000/api/documents";
    const DEFAULT_OBJECTS_URL: &str = "http://localhost:3000/api/storage";
    const DEFAULT_CACHE_VERSION: &str = "v1";
    const DEFAULT_APP_SHELL: &str = "/,/index.html,/manifest.json";
    const DEFAULT_ORIG_MAX_ENTRIES: usize = 20;
    const DEFAULT_REFERENCE_TZ: &str = "Europe/Madrid";
    const DEFAULT_BACKGROUND_TIMEOUT_MS: u64 = 5000;
    const DEFAULT_DAILY_SNAPSHOT: usize = 100;

    pub fn from_env() -> Self {
        Self {
            host: env_or("NOSOTROS_HOST", Self::DEFAULT_HOST),
            port: parse_or("NOSOTROS_PORT", Self::DEFAULT_PORT),
            data_dir: env_or("NOSOTROS_DATA_DIR", Self::DEFAULT_DATA_DIR),
            origin: env_or("NOSOTROS_ORIGIN", Self::DEFAULT_ORIGIN),
            upstream: env_or("NOSOTROS_UPSTREAM", Self::DEFAULT_UPSTREAM),
            trusted_image_hosts: split_list(&env_or(
                "NOSOTROS_TRUSTED_IMAGE_HOSTS",
                Self::DEFAULT_TRUSTED_IMAGE_HOSTS,
            )),
            documents_url: env_or("NOSOTROS_DOCUMENTS_URL", Self::DEFAULT_DOCUMENTS_URL),
            objects_url: env_or("NOSOTROS_OBJECTS_URL", Self::DEFAULT_OBJECTS_URL),
            cache_version: env_or("NOSOTROS_CACHE_VERSION", Self::DEFAULT_CACHE_VERSION),
            app_shell: split_list(&env_or("NOSOTROS_APP_SHELL", Self::DEFAULT_APP_SHELL)),
            orig_max_entries: parse_or("NOSOTROS_ORIG_MAX_ENTRIES", Self::DEFAULT_ORIG_MAX_ENTRIES),
            reference_time_zone: env_or("NOSOTROS_REFERENCE_TZ", Self::DEFAULT_REFERENCE_TZ),
            background_timeout: Duration::from_millis(parse_or(
                "NOSOTROS_BACKGROUND_TIMEOUT_MS",
                Self::DEFAULT_BACKGROUND_TIMEOUT_MS,
            )),
            daily_snapshot: parse_or("NOSOTROS_DAILY_SNAPSHOT", Self::DEFAULT_DAILY_SNAPSHOT),
        }
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: Self::DEFAULT_HOST.to_string(),
            port: Self::DEFAULT_PORT,
            data_dir: Self::DEFAULT_DATA_DIR.to_string(),
            origin: Self::DEFAULT_ORIGIN.to_string(),
            upstream: Self::DEFAULT_UPSTREAM.to_string(),
            trusted_image_hosts: split_list(Self::DEFAULT_TRUSTED_IMAGE_HOSTS),
            documents_url: Self::DEFAULT_DOCUMENTS_URL.to_string(),
            objects_url: Self::DEFAULT_OBJECTS_URL.to_string(),
            cache_version: Self::DEFAULT_CACHE_VERSION.to_string(),
            app_shell: split_list(Self::DEFAULT_APP_SHELL),
            orig_max_entries: Self::DEFAULT_ORIG_MAX_ENTRIES,
            reference_time_zone: Self::DEFAULT_REFERENCE_TZ.to_string(),
            background_timeout: Duration::from_millis(Self::DEFAULT_BACKGROUND_TIMEOUT_MS),
            daily_snapshot: Self::DEFAULT_DAILY_SNAPSHOT,
        }
    }
}

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parse_or<T: FromStr + Copy + std::fmt::Display>(name: &str, default: T) -> T {
    match std::env::var(name) {
        Ok(raw) => raw.trim().parse::<T>().unwrap_or_else(|_| {
            warn!("{name}={raw:?} is not valid, using default {default}");
            default
        }),
        Err(_) => default,
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

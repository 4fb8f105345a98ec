//! Settings of the `tally` server binary, read from `settings.toml` and
//! `TALLY_*` environment variables (e.g. `TALLY_SERVER__PORT=4000`).
use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

const DEFAULT_SETTINGS_PATH: &str = "settings";

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct App {
    pub level: String,
}

impl Default for App {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Database {
    Memory,
    Sqlite(String),
}

impl Database {
    pub fn url(&self) -> String {
        match self {
            Database::Memory => String::from("sqlite::memory:"),
            Database::Sqlite(path) => format!("sqlite:{path}?mode=rwc"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Server {
    pub bind: Option<String>,
    pub port: u16,
    pub database: Database,
}

impl Server {
    pub fn addr(&self) -> String {
        let bind = self.bind.as_deref().unwrap_or("127.0.0.1");
        format!("{bind}:{}", self.port)
    }
}

impl Default for Server {
    fn default() -> Self {
        Self {
            bind: None,
            port: 3000,
            database: Database::Memory,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub app: App,
    pub server: Server,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::from_path(DEFAULT_SETTINGS_PATH)
    }

    pub fn from_path(path: &str) -> Result<Self, ConfigError> {
        Config::builder()
            .add_source(File::with_name(path).required(false))
            .add_source(Environment::with_prefix("TALLY").separator("__"))
            .build()?
            .try_deserialize()
    }
}

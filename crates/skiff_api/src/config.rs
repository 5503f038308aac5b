use std::path::Path;

use figment::{Figment, providers::{Env, Toml, Format}};
use serde::{Deserialize, Deserializer};
use tracing::Level;

#[derive(Deserialize, Clone, Debug)]
pub struct SqliteDbConfig {
    pub path: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct TlsConfig {
    pub enable: bool,
    pub key: String,
    pub cert: String,
}

#[derive(Deserialize, Clone, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DatabaseConfig {
    Sqlite(SqliteDbConfig),
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Human,
    #[default]
    Json,
}

#[derive(Deserialize, Clone, Debug, Default)]
#[serde(rename_all = "snake_case")]
pub enum RollPeriod {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
}

#[derive(Deserialize, Clone, Debug)]
pub struct LogConfig {
    /// The minimum level of logging
    #[serde(deserialize_with = "deserialize_log_level", default = "default_log_level")]
    pub level: Level,
    /// The directory the rolling log files are written to
    #[serde(default = "default_log_path")]
    pub path: String,
    /// The format of the produced logs
    #[serde(default)]
    pub format: LogFormat,
    /// The roll period of the file
    #[serde(default)]
    pub roll_period: RollPeriod,
    pub env_filter: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            path: default_log_path(),
            format: LogFormat::default(),
            roll_period: RollPeriod::default(),
            env_filter: None,
        }
    }
}

/// Where the upstream Docker registry lives and how the console talks to it.
#[derive(Deserialize, Clone, Debug)]
pub struct RegistryConfig {
    pub url: String,
    /// Shared HS256 secret used to mint bearer tokens the registry trusts.
    /// When unset, requests are sent without credentials.
    pub token_secret: Option<String>,
    #[serde(default = "default_token_issuer")]
    pub token_issuer: String,
    #[serde(default = "default_token_service")]
    pub token_service: String,
    #[serde(default = "default_registry_timeout")]
    pub timeout_secs: u64,
    /// Identity used when listing the registry catalog for the repository cache.
    #[serde(default = "default_catalog_account")]
    pub catalog_account: String,
    #[serde(default = "default_catalog_refresh")]
    pub catalog_refresh_secs: u64,
    #[serde(default = "default_catalog_page_size")]
    pub catalog_page_size: u32,
}

#[derive(Deserialize, Clone, Copy, Debug, Default, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MailSecurity {
    None,
    #[default]
    Starttls,
    Tls,
}

#[derive(Deserialize, Clone, Debug)]
pub struct MailConfig {
    pub host: String,
    #[serde(default = "default_mail_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    #[serde(default)]
    pub security: MailSecurity,
    #[serde(default = "default_mail_timeout")]
    pub timeout_secs: u64,
    #[serde(default = "default_reset_subject")]
    pub reset_subject: String,
    #[serde(default = "default_reset_hint")]
    pub reset_hint: String,
}

#[derive(Deserialize, Clone, Debug)]
pub struct SessionConfig {
    /// Lifetime of a console session token in seconds.
    #[serde(default = "default_token_max_age")]
    pub token_max_age: u32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            token_max_age: default_token_max_age(),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub listen_address: String,
    pub listen_port: String,
    url: Option<String>,
    #[serde(default)]
    pub log: LogConfig,
    pub database: DatabaseConfig,
    pub tls: Option<TlsConfig>,
    pub registry: RegistryConfig,
    pub mail: MailConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(skip)]
    pub jwt_key: String,
}

impl Config {
    /// Load the config file at `path`, with `SKIFF_` environment variables layered on top.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, figment::Error> {
        let figment = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SKIFF_").split("__"));

        Self::from_figment(figment)
    }

    pub fn from_figment(figment: Figment) -> Result<Self, figment::Error> {
        let mut config: Config = figment.extract()?;

        if let Some(url) = config.url.as_mut() {
            trim_trailing_slashes(url);
        }
        trim_trailing_slashes(&mut config.registry.url);

        Ok(config)
    }

    /// The external base url of the console, used in links sent to users.
    pub fn url(&self) -> String {
        match &self.url {
            Some(u) => u.clone(),
            None => format!("http://{}:{}", self.listen_address, self.listen_port)
        }
    }
}

fn trim_trailing_slashes(url: &mut String) {
    while url.ends_with('/') {
        url.pop();
    }
}

fn default_log_level() -> Level {
    Level::INFO
}

fn default_log_path() -> String {
    "logs".to_string()
}

fn default_token_issuer() -> String {
    "skiff-console".to_string()
}

fn default_token_service() -> String {
    "registry".to_string()
}

fn default_registry_timeout() -> u64 {
    30
}

fn default_catalog_account() -> String {
    "admin".to_string()
}

fn default_catalog_refresh() -> u64 {
    600
}

fn default_catalog_page_size() -> u32 {
    1000
}

fn default_mail_port() -> u16 {
    25
}

fn default_mail_timeout() -> u64 {
    10
}

fn default_reset_subject() -> String {
    "Reset your password".to_string()
}

fn default_reset_hint() -> String {
    "Please click the link below to reset your password".to_string()
}

fn default_token_max_age() -> u32 {
    1800
}

fn deserialize_log_level<'de, D>(deserializer: D) -> Result<Level, D::Error>
where D: Deserializer<'de> {
    let s = String::deserialize(deserializer)?.to_lowercase();
    let s = s.as_str();

    match s {
        "error" => Ok(Level::ERROR),
        "warn" => Ok(Level::WARN),
        "info" => Ok(Level::INFO),
        "debug" => Ok(Level::DEBUG),
        "trace" => Ok(Level::TRACE),
        _ => Err(serde::de::Error::custom(format!("Unknown log level: '{}'", s))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
        listen_address = "127.0.0.1"
        listen_port = "8080"

        [database]
        type = "sqlite"
        path = "data/skiff.db"

        [registry]
        url = "http://registry:5000/"

        [mail]
        host = "smtp.example.com"
        from = "console@example.com"
    "#;

    #[test]
    fn defaults_are_filled_in() {
        let config = Config::from_figment(Figment::from(Toml::string(MINIMAL))).unwrap();

        assert_eq!(config.registry.url, "http://registry:5000");
        assert_eq!(config.registry.timeout_secs, 30);
        assert_eq!(config.registry.catalog_refresh_secs, 600);
        assert_eq!(config.mail.port, 25);
        assert_eq!(config.mail.security, MailSecurity::Starttls);
        assert_eq!(config.session.token_max_age, 1800);
        assert_eq!(config.log.level, Level::INFO);
        assert!(config.tls.is_none());
    }

    #[test]
    fn url_falls_back_to_listen_address() {
        let config = Config::from_figment(Figment::from(Toml::string(MINIMAL))).unwrap();
        assert_eq!(config.url(), "http://127.0.0.1:8080");
    }

    #[test]
    fn url_is_trimmed() {
        let toml = format!("url = \"https://console.example.com//\"\n{}", MINIMAL);
        let config = Config::from_figment(Figment::from(Toml::string(&toml))).unwrap();
        assert_eq!(config.url(), "https://console.example.com");
    }

    #[test]
    fn unknown_log_level_is_rejected() {
        let toml = format!("{}\n[log]\nlevel = \"loud\"\n", MINIMAL);
        assert!(Config::from_figment(Figment::from(Toml::string(&toml))).is_err());
    }
}

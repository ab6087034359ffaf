use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use scriptorium_core::PageSizes;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub backend: BackendConfig,
    #[serde(default)]
    pub db: Option<DbConfig>,
    #[serde(default)]
    pub rest: Option<RestConfig>,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub pagination: PaginationConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub drafts: DraftsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    #[default]
    Sqlite,
    Rest,
    Memory,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct BackendConfig {
    #[serde(default)]
    pub kind: BackendKind,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RestConfig {
    pub url: String,
    pub api_key: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 {
    30
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaginationConfig {
    #[serde(default = "default_manuscripts_page")]
    pub manuscripts: u32,
    #[serde(default = "default_blog_page")]
    pub blog_posts: u32,
    #[serde(default = "default_guestbook_page")]
    pub guestbook: u32,
}

impl Default for PaginationConfig {
    fn default() -> Self {
        Self {
            manuscripts: default_manuscripts_page(),
            blog_posts: default_blog_page(),
            guestbook: default_guestbook_page(),
        }
    }
}

fn default_manuscripts_page() -> u32 {
    10
}
fn default_blog_page() -> u32 {
    5
}
fn default_guestbook_page() -> u32 {
    10
}

impl PaginationConfig {
    pub fn page_sizes(&self) -> PageSizes {
        PageSizes {
            manuscripts: self.manuscripts,
            blog_posts: self.blog_posts,
            guestbook: self.guestbook,
        }
    }
}

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum AuthProvider {
    #[default]
    Local,
    Rest,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    #[serde(default = "default_session_ttl_hours")]
    pub session_ttl_hours: i64,
    #[serde(default)]
    pub provider: AuthProvider,
    #[serde(default)]
    pub admins: Vec<AdminAccount>,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            session_ttl_hours: default_session_ttl_hours(),
            provider: AuthProvider::default(),
            admins: Vec::new(),
        }
    }
}

fn default_session_ttl_hours() -> i64 {
    24
}

/// A locally configured admin login. `password_hash` is an argon2 PHC string
/// as printed by `scriptorium hash-password`.
#[derive(Debug, Deserialize, Clone)]
pub struct AdminAccount {
    pub email: String,
    pub password_hash: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DraftsConfig {
    #[serde(default = "default_drafts_dir")]
    pub dir: PathBuf,
}

impl Default for DraftsConfig {
    fn default() -> Self {
        Self {
            dir: default_drafts_dir(),
        }
    }
}

fn default_drafts_dir() -> PathBuf {
    PathBuf::from("./data/drafts")
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// The SQLite settings; only valid once [`load_config`] has checked them.
    pub fn db(&self) -> Result<&DbConfig> {
        self.db
            .as_ref()
            .context("[db] section is required for the sqlite backend")
    }

    pub fn rest(&self) -> Result<&RestConfig> {
        self.rest
            .as_ref()
            .context("[rest] section is required for the rest backend")
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate backend
    match config.backend.kind {
        BackendKind::Sqlite => {
            if config.db.is_none() {
                anyhow::bail!("db.path must be set when backend.kind is 'sqlite'");
            }
        }
        BackendKind::Rest => {
            let Some(rest) = &config.rest else {
                anyhow::bail!("[rest] url and api_key must be set when backend.kind is 'rest'");
            };
            if !rest.url.starts_with("http://") && !rest.url.starts_with("https://") {
                anyhow::bail!("rest.url must be an http(s) URL, got '{}'", rest.url);
            }
            if rest.api_key.trim().is_empty() {
                anyhow::bail!("rest.api_key must not be empty");
            }
            if rest.timeout_secs == 0 {
                anyhow::bail!("rest.timeout_secs must be > 0");
            }
        }
        BackendKind::Memory => {}
    }

    // Validate pagination
    let pages = &config.pagination;
    if pages.manuscripts < 1 || pages.blog_posts < 1 || pages.guestbook < 1 {
        anyhow::bail!("pagination sizes must be >= 1");
    }

    // Validate auth
    if config.auth.session_ttl_hours < 1 {
        anyhow::bail!("auth.session_ttl_hours must be >= 1");
    }
    if config.auth.provider == AuthProvider::Rest && config.rest.is_none() {
        anyhow::bail!("auth.provider 'rest' requires a [rest] section");
    }
    for admin in &config.auth.admins {
        if !admin.password_hash.starts_with("$argon2") {
            anyhow::bail!(
                "auth.admins: password_hash for '{}' is not an argon2 hash",
                admin.email
            );
        }
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn load(toml: &str) -> Result<Config> {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(toml.as_bytes()).unwrap();
        load_config(file.path())
    }

    #[test]
    fn sqlite_defaults() {
        let cfg = load("[db]\npath = \"./data/s.sqlite\"\n").unwrap();
        assert_eq!(cfg.backend.kind, BackendKind::Sqlite);
        assert_eq!(cfg.server.bind, "127.0.0.1:8080");
        assert_eq!(cfg.pagination.page_sizes(), PageSizes::default());
        assert_eq!(cfg.auth.session_ttl_hours, 24);
        assert_eq!(cfg.logging.level, "info");
    }

    #[test]
    fn sqlite_requires_db_path() {
        let err = load("[backend]\nkind = \"sqlite\"\n").unwrap_err();
        assert!(err.to_string().contains("db.path"));
    }

    #[test]
    fn rest_requires_url_and_key() {
        assert!(load("[backend]\nkind = \"rest\"\n").is_err());
        let cfg = load(
            "[backend]\nkind = \"rest\"\n[rest]\nurl = \"https://x.example\"\napi_key = \"k\"\n",
        )
        .unwrap();
        assert_eq!(cfg.rest().unwrap().timeout_secs, 30);
    }

    #[test]
    fn zero_page_size_is_rejected() {
        let err = load("[backend]\nkind = \"memory\"\n[pagination]\nblog_posts = 0\n").unwrap_err();
        assert!(err.to_string().contains("pagination"));
    }

    #[test]
    fn admin_hash_must_be_argon2() {
        let err = load(
            "[backend]\nkind = \"memory\"\n[[auth.admins]]\nemail = \"a@b\"\npassword_hash = \"plain\"\n",
        )
        .unwrap_err();
        assert!(err.to_string().contains("argon2"));
    }
}

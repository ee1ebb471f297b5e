use serde::Deserialize;
use std::path::PathBuf;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    // OAuth application credentials; env vars take precedence when set
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_redirect_uri")]
    pub redirect_uri: String,
    #[serde(default = "default_scopes")]
    pub scopes: Vec<String>,

    // Remote endpoints
    #[serde(default = "default_auth_base")]
    pub auth_base: String,
    #[serde(default = "default_api_base")]
    pub api_base: String,

    /// CSV chart feed providing the ranking.
    #[serde(default = "default_ranking_url")]
    pub ranking_url: String,
    #[serde(default)]
    pub market: Option<String>,

    /// UTC offset (hours) used when stamping playlist descriptions.
    #[serde(default = "default_utc_offset_hours")]
    pub description_utc_offset_hours: i32,

    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,

    // path to database file
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
}

fn default_redirect_uri() -> String { "http://127.0.0.1:8888/app/login/callback".into() }
fn default_auth_base() -> String { "https://accounts.spotify.com".into() }
fn default_api_base() -> String { "https://api.spotify.com/v1".into() }
fn default_ranking_url() -> String { "https://spotifycharts.com/regional/jp/daily/latest/download".into() }
fn default_utc_offset_hours() -> i32 { 9 }

fn default_scopes() -> Vec<String> {
    vec![
        "playlist-modify-public",
        "playlist-modify-private",
        "playlist-read-private",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("ranking-playlist-sync")
}

fn default_log_dir() -> PathBuf { default_data_dir().join("logs") }
fn default_db_path() -> PathBuf { default_data_dir().join("ranking-sync.db") }

impl Config {
    pub fn from_path(path: &std::path::Path) -> anyhow::Result<Self> {
        let s = std::fs::read_to_string(path)?;
        Self::from_toml_str(&s)
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let mut cfg: Config = toml::from_str(s)?;
        cfg.apply_env();
        Ok(cfg)
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("SPOTIFY_CLIENT_ID") {
            self.client_id = v;
        }
        if let Ok(v) = std::env::var("SPOTIFY_CLIENT_SECRET") {
            self.client_secret = v;
        }
        // Endpoint overrides are how tests point the client at a mock server.
        if let Ok(v) = std::env::var("SPOTIFY_AUTH_BASE") {
            self.auth_base = v;
        }
        if let Ok(v) = std::env::var("SPOTIFY_API_BASE") {
            self.api_base = v;
        }
    }

    pub fn has_client_credentials(&self) -> bool {
        !self.client_id.is_empty() && !self.client_secret.is_empty()
    }
}

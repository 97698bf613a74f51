//! Monitor configuration.
//!
//! Values come from `PROFILE_MONITOR_*` environment variables (after `.env`
//! has been loaded by the binary). Loading goes through a lookup function so
//! tests never touch the process environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::credentials::BackendKind;
use crate::{Error, Result};

/// Prefix shared by every configuration variable.
pub const ENV_PREFIX: &str = "PROFILE_MONITOR_";

pub const DEFAULT_TOKEN_URL: &str = "https://open.spotify.com/api/token";
pub const DEFAULT_SERVER_TIME_URL: &str = "https://open.spotify.com/";
pub const DEFAULT_PROBE_URL: &str = "https://api.spotify.com/v1/me";
pub const DEFAULT_ACCOUNTS_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";
pub const DEFAULT_AUTHORIZE_URL: &str = "https://accounts.spotify.com/authorize";
pub const DEFAULT_LOGIN_URL: &str = "https://login5.spotify.com/v3/login";
pub const DEFAULT_CLIENT_TOKEN_URL: &str = "https://clienttoken.spotify.com/v1/clienttoken";
pub const DEFAULT_SPCLIENT_BASE: &str = "https://spclient.wg.spotify.com";
pub const DEFAULT_WEB_API_BASE: &str = "https://api.spotify.com/v1";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CookieConfig {
    /// Value of the `sp_dc` web-player cookie.
    #[serde(skip_serializing)]
    pub sp_dc: String,
    pub token_url: String,
    pub server_time_url: String,
    pub probe_url: String,
    pub max_attempts: u32,
    pub retry_delay_ms: u64,
}

impl Default for CookieConfig {
    fn default() -> Self {
        Self {
            sp_dc: String::new(),
            token_url: DEFAULT_TOKEN_URL.to_string(),
            server_time_url: DEFAULT_SERVER_TIME_URL.to_string(),
            probe_url: DEFAULT_PROBE_URL.to_string(),
            max_attempts: 10,
            retry_delay_ms: 500,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientCredentialsConfig {
    pub client_id: String,
    #[serde(skip_serializing)]
    pub client_secret: String,
    pub token_url: String,
    /// Persisted token cache; memory only when unset.
    pub cache_path: Option<PathBuf>,
}

impl Default for ClientCredentialsConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            token_url: DEFAULT_ACCOUNTS_TOKEN_URL.to_string(),
            cache_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizationCodeConfig {
    pub client_id: String,
    /// PKCE is used when no secret is configured.
    #[serde(skip_serializing)]
    pub client_secret: Option<String>,
    pub redirect_uri: String,
    pub scopes: String,
    pub authorize_url: String,
    pub token_url: String,
    pub cache_path: Option<PathBuf>,
    /// Whether the one-time browser bootstrap may prompt on stdin.
    pub interactive: bool,
}

impl Default for AuthorizationCodeConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            redirect_uri: "http://127.0.0.1:8888/callback".to_string(),
            scopes: "user-read-private user-follow-read playlist-read-private".to_string(),
            authorize_url: DEFAULT_AUTHORIZE_URL.to_string(),
            token_url: DEFAULT_ACCOUNTS_TOKEN_URL.to_string(),
            cache_path: None,
            interactive: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BinaryLoginConfig {
    pub device_id: String,
    pub system_id: String,
    pub user_uri_id: String,
    #[serde(skip_serializing)]
    pub refresh_token: String,
    pub app_version: String,
    pub cpu_arch: u64,
    pub os_build: u64,
    pub platform: u64,
    pub os_major: u64,
    pub os_minor: u64,
    pub client_model: u64,
    /// Captured login request body; fills any identifier left empty above.
    pub login_request_file: Option<PathBuf>,
    /// Captured client-token request body.
    pub client_token_request_file: Option<PathBuf>,
    pub login_url: String,
    pub client_token_url: String,
}

impl Default for BinaryLoginConfig {
    fn default() -> Self {
        Self {
            device_id: String::new(),
            system_id: String::new(),
            user_uri_id: String::new(),
            refresh_token: String::new(),
            app_version: "1.2.52.442".to_string(),
            cpu_arch: 10,
            os_build: 19045,
            platform: 2,
            os_major: 9,
            os_minor: 9,
            client_model: 34404,
            login_request_file: None,
            client_token_request_file: None,
            login_url: DEFAULT_LOGIN_URL.to_string(),
            client_token_url: DEFAULT_CLIENT_TOKEN_URL.to_string(),
        }
    }
}

impl BinaryLoginConfig {
    /// Fill empty identifiers from the captured request files, if any.
    pub fn apply_captured_requests(&mut self) -> Result<()> {
        if let Some(path) = self.login_request_file.clone() {
            let captured = proto_codec::parse_login_request_file(&path)
                .map_err(|e| Error::config(format!("{}: {e}", path.display())))?;
            fill(&mut self.device_id, captured.device_id);
            fill(&mut self.system_id, captured.system_id);
            fill(&mut self.user_uri_id, captured.user_uri_id);
            fill(&mut self.refresh_token, captured.refresh_token);
        }
        if let Some(path) = self.client_token_request_file.clone() {
            let captured = proto_codec::parse_client_token_request_file(&path)
                .map_err(|e| Error::config(format!("{}: {e}", path.display())))?;
            self.app_version = captured.app_version;
            fill(&mut self.device_id, captured.device_id);
            fill(&mut self.system_id, captured.system_id);
            self.cpu_arch = captured.cpu_arch;
            self.os_build = captured.os_build;
            self.platform = captured.platform;
            self.os_major = captured.os_major;
            self.os_minor = captured.os_minor;
            self.client_model = captured.client_model;
        }
        Ok(())
    }

    fn missing_fields(&self) -> Vec<&'static str> {
        [
            ("device_id", &self.device_id),
            ("system_id", &self.system_id),
            ("user_uri_id", &self.user_uri_id),
            ("refresh_token", &self.refresh_token),
        ]
        .into_iter()
        .filter(|(_, v)| v.is_empty())
        .map(|(k, _)| k)
        .collect()
    }
}

fn fill(target: &mut String, value: String) {
    if target.is_empty() {
        *target = value;
    }
}

/// Endpoints of the profile API collaborator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    pub spclient_base: String,
    pub web_api_base: String,
    /// Upper bound on playlist pages fetched per playlist.
    pub max_playlist_pages: u32,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            spclient_base: DEFAULT_SPCLIENT_BASE.to_string(),
            web_api_base: DEFAULT_WEB_API_BASE.to_string(),
            max_playlist_pages: 50,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
    /// Monitored user id (the part after `spotify:user:`).
    pub user_id: String,
    pub backend: BackendKind,
    pub check_interval_secs: u64,
    pub error_interval_secs: u64,
    /// Per-call timeout, also used as the watchdog deadline.
    pub request_timeout_secs: u64,
    pub disappeared_threshold: u32,
    pub liveness_interval_secs: u64,
    pub refresh_margin_secs: u64,
    pub data_dir: PathBuf,
    pub log_dir: PathBuf,
    pub track_playlists: bool,
    pub track_followers: bool,
    pub track_followings: bool,
    pub track_recent_artists: bool,
    pub track_profile_picture: bool,
    pub notify_errors: bool,
    pub api: ApiConfig,
    pub cookie: CookieConfig,
    pub client_credentials: ClientCredentialsConfig,
    pub authorization_code: AuthorizationCodeConfig,
    pub binary_login: BinaryLoginConfig,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            user_id: String::new(),
            backend: BackendKind::Cookie,
            check_interval_secs: 1800,
            error_interval_secs: 180,
            request_timeout_secs: 30,
            disappeared_threshold: 3,
            liveness_interval_secs: 12 * 60 * 60,
            refresh_margin_secs: 60,
            data_dir: PathBuf::from("data"),
            log_dir: PathBuf::from("logs"),
            track_playlists: true,
            track_followers: true,
            track_followings: true,
            track_recent_artists: true,
            track_profile_picture: true,
            notify_errors: true,
            api: ApiConfig::default(),
            cookie: CookieConfig::default(),
            client_credentials: ClientCredentialsConfig::default(),
            authorization_code: AuthorizationCodeConfig::default(),
            binary_login: BinaryLoginConfig::default(),
        }
    }
}

/// Reads prefixed keys through a caller-supplied lookup.
struct EnvReader<F> {
    lookup: F,
}

impl<F> EnvReader<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn raw(&self, key: &str) -> Option<String> {
        (self.lookup)(&format!("{ENV_PREFIX}{key}"))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
    }

    fn string(&self, key: &str, target: &mut String) {
        if let Some(v) = self.raw(key) {
            *target = v;
        }
    }

    fn opt_string(&self, key: &str, target: &mut Option<String>) {
        if let Some(v) = self.raw(key) {
            *target = Some(v);
        }
    }

    fn path(&self, key: &str, target: &mut PathBuf) {
        if let Some(v) = self.raw(key) {
            *target = PathBuf::from(v);
        }
    }

    fn opt_path(&self, key: &str, target: &mut Option<PathBuf>) {
        if let Some(v) = self.raw(key) {
            *target = Some(PathBuf::from(v));
        }
    }

    fn parsed<T>(&self, key: &str, target: &mut T) -> Result<()>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        if let Some(v) = self.raw(key) {
            *target = v
                .parse()
                .map_err(|e| Error::config(format!("{ENV_PREFIX}{key}={v}: {e}")))?;
        }
        Ok(())
    }

    fn flag(&self, key: &str, target: &mut bool) -> Result<()> {
        if let Some(v) = self.raw(key) {
            *target = match v.to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" => false,
                _ => {
                    return Err(Error::config(format!(
                        "{ENV_PREFIX}{key}={v}: expected a boolean"
                    )));
                }
            };
        }
        Ok(())
    }
}

impl MonitorConfig {
    /// Load from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load from an arbitrary key lookup, starting from defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let env = EnvReader { lookup };
        let mut config = Self::default();

        env.string("USER_ID", &mut config.user_id);
        env.parsed("BACKEND", &mut config.backend)?;
        env.parsed("CHECK_INTERVAL_SECS", &mut config.check_interval_secs)?;
        env.parsed("ERROR_INTERVAL_SECS", &mut config.error_interval_secs)?;
        env.parsed("REQUEST_TIMEOUT_SECS", &mut config.request_timeout_secs)?;
        env.parsed("DISAPPEARED_THRESHOLD", &mut config.disappeared_threshold)?;
        env.parsed("LIVENESS_INTERVAL_SECS", &mut config.liveness_interval_secs)?;
        env.parsed("REFRESH_MARGIN_SECS", &mut config.refresh_margin_secs)?;
        env.path("DATA_DIR", &mut config.data_dir);
        env.path("LOG_DIR", &mut config.log_dir);
        env.flag("TRACK_PLAYLISTS", &mut config.track_playlists)?;
        env.flag("TRACK_FOLLOWERS", &mut config.track_followers)?;
        env.flag("TRACK_FOLLOWINGS", &mut config.track_followings)?;
        env.flag("TRACK_RECENT_ARTISTS", &mut config.track_recent_artists)?;
        env.flag("TRACK_PROFILE_PICTURE", &mut config.track_profile_picture)?;
        env.flag("NOTIFY_ERRORS", &mut config.notify_errors)?;

        env.string("SP_DC", &mut config.cookie.sp_dc);
        env.parsed("COOKIE_MAX_ATTEMPTS", &mut config.cookie.max_attempts)?;
        env.parsed("COOKIE_RETRY_DELAY_MS", &mut config.cookie.retry_delay_ms)?;

        env.string("CLIENT_ID", &mut config.client_credentials.client_id);
        env.string("CLIENT_SECRET", &mut config.client_credentials.client_secret);
        env.opt_path("TOKEN_CACHE_PATH", &mut config.client_credentials.cache_path);

        env.string("CLIENT_ID", &mut config.authorization_code.client_id);
        env.opt_string("CLIENT_SECRET", &mut config.authorization_code.client_secret);
        env.string("REDIRECT_URI", &mut config.authorization_code.redirect_uri);
        env.string("SCOPES", &mut config.authorization_code.scopes);
        env.opt_path("TOKEN_CACHE_PATH", &mut config.authorization_code.cache_path);
        env.flag("INTERACTIVE", &mut config.authorization_code.interactive)?;

        let binary = &mut config.binary_login;
        env.string("DEVICE_ID", &mut binary.device_id);
        env.string("SYSTEM_ID", &mut binary.system_id);
        env.string("USER_URI_ID", &mut binary.user_uri_id);
        env.string("REFRESH_TOKEN", &mut binary.refresh_token);
        env.string("APP_VERSION", &mut binary.app_version);
        env.opt_path("LOGIN_REQUEST_FILE", &mut binary.login_request_file);
        env.opt_path("CLIENT_TOKEN_REQUEST_FILE", &mut binary.client_token_request_file);

        Ok(config)
    }

    /// Startup validation; failures here are fatal.
    pub fn validate(&self) -> Result<()> {
        if self.user_id.trim().is_empty() {
            return Err(Error::config("monitored user id is not set"));
        }
        if self.check_interval_secs == 0 {
            return Err(Error::config("check interval must be positive"));
        }
        if self.disappeared_threshold == 0 {
            return Err(Error::config("disappeared threshold must be at least 1"));
        }
        match self.backend {
            BackendKind::Cookie if self.cookie.sp_dc.is_empty() => {
                Err(Error::config("cookie backend requires the sp_dc cookie"))
            }
            BackendKind::OAuthClientCredentials
                if self.client_credentials.client_id.is_empty()
                    || self.client_credentials.client_secret.is_empty() =>
            {
                Err(Error::config(
                    "client-credentials backend requires a client id and secret",
                ))
            }
            BackendKind::OAuthAuthorizationCode if self.authorization_code.client_id.is_empty() => {
                Err(Error::config("authorization-code backend requires a client id"))
            }
            BackendKind::BinaryLogin => {
                let missing = self.binary_login.missing_fields();
                if missing.is_empty() {
                    Ok(())
                } else {
                    Err(Error::config(format!(
                        "binary login backend is missing: {}",
                        missing.join(", ")
                    )))
                }
            }
            _ => Ok(()),
        }
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_secs(self.check_interval_secs)
    }

    pub fn error_interval(&self) -> Duration {
        Duration::from_secs(self.error_interval_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn liveness_interval(&self) -> Duration {
        Duration::from_secs(self.liveness_interval_secs)
    }

    pub fn refresh_margin(&self) -> Duration {
        Duration::from_secs(self.refresh_margin_secs)
    }
}

use std::path::Path;

use axum::http::HeaderName;
use serde::{Deserialize, Deserializer};

pub const DEFAULT_RPS: u32 = 10;
pub const DEFAULT_BURST: u32 = 20;
pub const DEFAULT_CSRF_COOKIE: &str = "csrf_token";
pub const DEFAULT_CSRF_HEADER: &str = "X-CSRF-Token";

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Mount point of the application screens, e.g. `/app`. Empty means root.
    pub base_path: String,
    /// Honour `X-Forwarded-For` / `X-Real-IP` when resolving the client identity.
    /// Clients can forge these headers unless a reverse proxy overwrites them.
    pub trust_proxy_headers: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(deserialize_with = "lenient_rate")]
    pub requests_per_second: u32,
    #[serde(deserialize_with = "lenient_rate")]
    pub burst_capacity: u32,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CsrfConfig {
    pub cookie_name: String,
    pub header_name: String,
    /// Force the `Secure` cookie attribute on or off. Unset means detect TLS per request.
    pub secure_cookie: Option<bool>,
    pub max_form_bytes: usize,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct SecurityConfig {
    pub enable_hsts: Option<bool>,
    pub hsts_max_age: Option<u64>,
    pub hsts_include_subdomains: Option<bool>,
    pub csp: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    pub dir: String,
    pub file_prefix: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub rate_limit: RateLimitConfig,
    pub csrf: CsrfConfig,
    pub security: Option<SecurityConfig>,
    pub logging: LoggingConfig,
}

// Mirror defaults from config/default.toml
impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            base_path: "/app".to_string(),
            trust_proxy_headers: true,
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self { requests_per_second: DEFAULT_RPS, burst_capacity: DEFAULT_BURST, sweep_interval_secs: 300 }
    }
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            cookie_name: DEFAULT_CSRF_COOKIE.to_string(),
            header_name: DEFAULT_CSRF_HEADER.to_string(),
            secure_cookie: None,
            max_form_bytes: 1024 * 1024,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { dir: "logs".to_string(), file_prefix: "farm-manager.log".to_string() }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            rate_limit: RateLimitConfig::default(),
            csrf: CsrfConfig::default(),
            security: None,
            logging: LoggingConfig::default(),
        }
    }
}

/// Loads configuration: embedded defaults -> farm-manager.toml -> `FARM_MANAGER_CONFIG`
/// -> `FARM__*` env -> legacy flat env variables.
pub fn load() -> anyhow::Result<AppConfig> {
    // Load .env first (optional)
    let _ = dotenvy::dotenv();

    let custom = std::env::var("FARM_MANAGER_CONFIG").ok();
    let mut cfg = load_from(custom.as_deref().map(Path::new))?;
    apply_env_overrides(&mut cfg, |key| std::env::var(key).ok());
    sanitize(&mut cfg);
    validate(&cfg)?;
    Ok(cfg)
}

/// Builds the layered configuration without the legacy env overrides.
pub fn load_from(extra_file: Option<&Path>) -> anyhow::Result<AppConfig> {
    load_sources(true, extra_file, None)
}

/// Layered load with explicit sources.
///
/// `local_file` enables `farm-manager.toml` in the working directory. `env` replaces the
/// process environment as the source of `FARM__*` variables when set.
pub fn load_sources(
    local_file: bool,
    extra_file: Option<&Path>,
    env: Option<::config::Map<String, String>>,
) -> anyhow::Result<AppConfig> {
    let defaults: &str = include_str!("../config/default.toml");
    let mut builder =
        ::config::Config::builder().add_source(::config::File::from_str(defaults, ::config::FileFormat::Toml));

    if local_file {
        // Optional local file: farm-manager.toml (in CWD)
        builder = builder.add_source(::config::File::with_name("farm-manager").required(false));
    }
    if let Some(path) = extra_file {
        builder = builder.add_source(::config::File::from(path).required(false));
    }
    // Environment variables last to have highest precedence
    builder = builder.add_source(
        ::config::Environment::with_prefix("FARM").separator("__").try_parsing(true).source(env),
    );

    let cfg: AppConfig = builder.build()?.try_deserialize()?;
    Ok(cfg)
}

/// Accepts any value for a rate setting. Anything that is not a positive integer becomes 0,
/// which [`sanitize`] replaces with the default.
fn lenient_rate<'de, D>(deserializer: D) -> Result<u32, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = serde_json::Value::deserialize(deserializer)?;
    let parsed = match &raw {
        serde_json::Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
        serde_json::Value::String(s) => s.trim().parse::<u32>().ok(),
        _ => None,
    };
    match parsed {
        Some(n) if n > 0 => Ok(n),
        _ => {
            tracing::debug!("ignoring non-positive rate limit value {}", raw);
            Ok(0)
        }
    }
}

/// Applies the flat environment variables the deployment scripts set.
///
/// Unparsable or non-positive numeric values are ignored, so the layered value stays in effect.
pub fn apply_env_overrides<F>(cfg: &mut AppConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let non_empty = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

    if let Some(port) = non_empty("PORT").and_then(|v| v.parse::<u16>().ok()) {
        cfg.server.port = port;
    }
    if let Some(base) = non_empty("APP_BASE_PATH") {
        cfg.server.base_path = base;
    }
    if let Some(rps) = non_empty("RATE_LIMIT_RPS").and_then(|v| parse_positive(&v)) {
        cfg.rate_limit.requests_per_second = rps;
    }
    if let Some(burst) = non_empty("RATE_LIMIT_BURST").and_then(|v| parse_positive(&v)) {
        cfg.rate_limit.burst_capacity = burst;
    }
    if let Some(name) = non_empty("CSRF_COOKIE_NAME") {
        cfg.csrf.cookie_name = name;
    }
    if let Some(name) = non_empty("CSRF_HEADER_NAME") {
        cfg.csrf.header_name = name;
    }
}

fn parse_positive(v: &str) -> Option<u32> {
    match v.parse::<u32>() {
        Ok(n) if n > 0 => Some(n),
        _ => {
            tracing::debug!("ignoring non-positive rate limit value {:?}", v);
            None
        }
    }
}

/// Replaces values that have a silent fallback and normalises the base path.
pub fn sanitize(cfg: &mut AppConfig) {
    if cfg.rate_limit.requests_per_second == 0 {
        cfg.rate_limit.requests_per_second = DEFAULT_RPS;
    }
    if cfg.rate_limit.burst_capacity == 0 {
        cfg.rate_limit.burst_capacity = DEFAULT_BURST;
    }
    cfg.server.base_path = normalize_base_path(&cfg.server.base_path);
}

/// `"/app/"` -> `"/app"`, `"/"` -> `""`.
pub fn normalize_base_path(path: &str) -> String {
    path.trim().trim_end_matches('/').to_string()
}

pub fn validate(cfg: &AppConfig) -> anyhow::Result<()> {
    // Server
    if cfg.server.port == 0 {
        return Err(anyhow::anyhow!("invalid server.port: {}", cfg.server.port));
    }
    #[cfg(unix)]
    if cfg.server.port < 1024 {
        tracing::warn!("Using privileged port {} - may require elevated permissions", cfg.server.port);
    }
    let base = &cfg.server.base_path;
    if !base.is_empty() && !base.starts_with('/') {
        return Err(anyhow::anyhow!("server.base_path must start with '/': {:?}", base));
    }
    if cfg.server.trust_proxy_headers {
        tracing::warn!(
            "server.trust_proxy_headers is enabled: rate limiting keys on X-Forwarded-For / X-Real-IP, \
             which clients can forge unless a reverse proxy overwrites them"
        );
    }

    // Rate limit
    if cfg.rate_limit.sweep_interval_secs == 0 {
        return Err(anyhow::anyhow!("rate_limit.sweep_interval_secs must be > 0"));
    }

    // CSRF
    if !is_cookie_token(&cfg.csrf.cookie_name) {
        return Err(anyhow::anyhow!("csrf.cookie_name is not a valid cookie name: {:?}", cfg.csrf.cookie_name));
    }
    if HeaderName::from_bytes(cfg.csrf.header_name.as_bytes()).is_err() {
        return Err(anyhow::anyhow!("csrf.header_name is not a valid header name: {:?}", cfg.csrf.header_name));
    }
    if cfg.csrf.max_form_bytes == 0 {
        return Err(anyhow::anyhow!("csrf.max_form_bytes must be > 0"));
    }

    Ok(())
}

/// RFC 6265 cookie-name: a non-empty token without separators or controls.
fn is_cookie_token(name: &str) -> bool {
    !name.is_empty()
        && name.bytes().all(|b| {
            b.is_ascii_graphic() && !matches!(b, b'(' | b')' | b'<' | b'>' | b'@' | b',' | b';' | b':'
                | b'\\' | b'"' | b'/' | b'[' | b']' | b'?' | b'=' | b'{' | b'}')
        })
}

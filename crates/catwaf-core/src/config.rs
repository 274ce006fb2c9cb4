//! Configuration for the `CatWAF` control plane.
//!
//! Resolution order (later wins):
//! 1. Built-in defaults
//! 2. TOML config file (`/etc/catwaf/catwaf.toml` unless overridden)
//! 3. `CATWAF_*` environment variables
//! 4. CLI arguments (applied by the binary)
//!
//! The configuration is read once at startup. Paths such as the deny-list
//! artifact and the reload sentinel are fixed for the life of the process.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default location of the config file.
pub const DEFAULT_CONFIG_PATH: &str = "/etc/catwaf/catwaf.toml";

/// Complete control-plane configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonConfig,
    #[serde(default)]
    pub paths: PathsConfig,
    #[serde(default)]
    pub reload: ReloadConfig,
    #[serde(default)]
    pub acme: AcmeConfig,
    #[serde(default)]
    pub queue: QueueConfig,
    #[serde(default)]
    pub maintenance: MaintenanceConfig,
}

/// Process-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub listen_addr: SocketAddr,
    pub database_path: Option<PathBuf>,
    pub log_level: String,
    pub log_json: bool,
    /// Bearer token for the admin API. `None` disables authentication.
    pub api_key: Option<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            database_path: None,
            log_level: "info".to_string(),
            log_json: false,
            api_key: None,
        }
    }
}

/// Filesystem locations of the artifacts the proxy consumes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    /// Directory holding one generated `<domain>.conf` per site.
    pub sites_dir: PathBuf,
    /// Deny-list artifact.
    pub banlist_path: PathBuf,
    /// Per-domain certificate directories live here.
    pub certs_dir: PathBuf,
    /// Storage root of the ACME client (`live/<name>/` underneath).
    pub acme_dir: PathBuf,
    /// Webroot served for `http-01` challenges.
    pub acme_webroot: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            sites_dir: PathBuf::from("/etc/nginx/sites-enabled"),
            banlist_path: PathBuf::from("/etc/fail2ban/state/banlist.conf"),
            certs_dir: PathBuf::from("/etc/nginx/certs"),
            acme_dir: PathBuf::from("/etc/letsencrypt"),
            acme_webroot: PathBuf::from("/var/www/certbot"),
        }
    }
}

/// How the proxy is told to pick up new artifacts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReloadMode {
    /// Run the reload command and wait for its exit status.
    #[default]
    Command,
    /// Touch a sentinel file for an external watcher.
    Sentinel,
}

impl ReloadMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Command => "command",
            Self::Sentinel => "sentinel",
        }
    }
}

impl FromStr for ReloadMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "command" => Ok(Self::Command),
            "sentinel" => Ok(Self::Sentinel),
            other => Err(Error::Config(format!("unknown reload mode: {other}"))),
        }
    }
}

/// Reload coordinator settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReloadConfig {
    pub mode: ReloadMode,
    /// Program and arguments run in `command` mode.
    pub command: Vec<String>,
    pub sentinel_path: PathBuf,
    /// Requests arriving within this window share one reload.
    pub debounce_ms: u64,
    pub timeout_secs: u64,
}

impl Default for ReloadConfig {
    fn default() -> Self {
        Self {
            mode: ReloadMode::Command,
            command: vec!["nginx".to_string(), "-s".to_string(), "reload".to_string()],
            sentinel_path: PathBuf::from("/etc/nginx/sites-enabled/.reload_needed"),
            debounce_ms: 500,
            timeout_secs: 30,
        }
    }
}

/// Certificate client settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AcmeConfig {
    /// Certificate client executable.
    pub client: PathBuf,
    pub email: Option<String>,
    pub staging: bool,
    /// Delay between the config reload and the client invocation, giving
    /// the proxy time to serve the challenge location.
    pub grace_secs: u64,
    pub timeout_secs: u64,
    /// DNS plugin name passed to the client for `dns-01`.
    pub dns_plugin: String,
    /// Fallback DNS-provider credential when the site has none.
    pub dns_credential: Option<String>,
}

impl Default for AcmeConfig {
    fn default() -> Self {
        Self {
            client: PathBuf::from("certbot"),
            email: None,
            staging: false,
            grace_secs: 5,
            timeout_secs: 600,
            dns_plugin: "cloudflare".to_string(),
            dns_credential: None,
        }
    }
}

/// Job worker settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub poll_interval_ms: u64,
    pub default_max_attempts: i64,
    /// Issuance is not retried automatically unless raised above 1.
    pub issuance_max_attempts: i64,
    pub list_limit_max: i64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            default_max_attempts: 3,
            issuance_max_attempts: 1,
            list_limit_max: 500,
        }
    }
}

/// Periodic housekeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    pub ban_sweep_secs: u64,
    pub renewal_check_secs: u64,
    pub renewal_threshold_days: i64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            ban_sweep_secs: 60,
            renewal_check_secs: 24 * 60 * 60,
            renewal_threshold_days: 30,
        }
    }
}

/// Load configuration from `path` (or the default location) and apply
/// environment overrides.
///
/// An explicit path that does not exist is an error; a missing default file
/// is not.
pub fn load_config(path: Option<&Path>) -> Result<Config> {
    let mut config = match path {
        Some(p) => load_config_file(p)?,
        None => {
            let default = Path::new(DEFAULT_CONFIG_PATH);
            if default.exists() {
                load_config_file(default)?
            } else {
                Config::default()
            }
        }
    };

    apply_env_overrides(&mut config, |key| std::env::var(key).ok())?;
    Ok(config)
}

fn load_config_file(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        Error::Config(format!("Failed to read config file {}: {e}", path.display()))
    })?;
    parse_config(&content)
}

/// Parse a TOML document into a [`Config`].
pub fn parse_config(content: &str) -> Result<Config> {
    Ok(toml::from_str(content)?)
}

/// Apply `CATWAF_*` overrides using `lookup` to read variables.
pub fn apply_env_overrides<F>(config: &mut Config, lookup: F) -> Result<()>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(val) = lookup("CATWAF_LISTEN_ADDR") {
        config.daemon.listen_addr = val
            .parse()
            .map_err(|e| Error::Config(format!("CATWAF_LISTEN_ADDR: {e}")))?;
    }
    if let Some(val) = lookup("CATWAF_DB_PATH") {
        config.daemon.database_path = Some(PathBuf::from(val));
    }
    if let Some(val) = lookup("CATWAF_LOG_LEVEL") {
        config.daemon.log_level = val;
    }
    if let Some(val) = lookup("CATWAF_API_KEY") {
        config.daemon.api_key = Some(val).filter(|k| !k.is_empty());
    }
    if let Some(val) = lookup("CATWAF_SITES_DIR") {
        config.paths.sites_dir = PathBuf::from(val);
    }
    if let Some(val) = lookup("CATWAF_BANLIST_PATH") {
        config.paths.banlist_path = PathBuf::from(val);
    }
    if let Some(val) = lookup("CATWAF_CERTS_DIR") {
        config.paths.certs_dir = PathBuf::from(val);
    }
    if let Some(val) = lookup("CATWAF_RELOAD_MODE") {
        config.reload.mode = val.parse()?;
    }
    if let Some(val) = lookup("CATWAF_RELOAD_SENTINEL") {
        config.reload.sentinel_path = PathBuf::from(val);
    }
    if let Some(val) = lookup("CATWAF_ACME_EMAIL") {
        config.acme.email = Some(val);
    }
    if let Some(val) = lookup("CATWAF_DNS_CREDENTIAL").or_else(|| lookup("CLOUDFLARE_API_TOKEN"))
        && !val.is_empty()
    {
        config.acme.dns_credential = Some(val);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_match_proxy_layout() {
        let config = Config::default();
        assert_eq!(
            config.paths.banlist_path,
            PathBuf::from("/etc/fail2ban/state/banlist.conf")
        );
        assert_eq!(config.reload.mode, ReloadMode::Command);
        assert_eq!(config.acme.grace_secs, 5);
        assert_eq!(config.queue.issuance_max_attempts, 1);
        assert_eq!(config.maintenance.renewal_threshold_days, 30);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = parse_config(
            r#"
            [reload]
            mode = "sentinel"
            sentinel_path = "/run/catwaf/reload"

            [paths]
            sites_dir = "/srv/sites"
            "#,
        )
        .unwrap();

        assert_eq!(config.reload.mode, ReloadMode::Sentinel);
        assert_eq!(config.reload.sentinel_path, PathBuf::from("/run/catwaf/reload"));
        assert_eq!(config.reload.debounce_ms, 500);
        assert_eq!(config.paths.sites_dir, PathBuf::from("/srv/sites"));
        assert_eq!(config.paths.certs_dir, PathBuf::from("/etc/nginx/certs"));
    }

    #[test]
    fn unknown_reload_mode_is_rejected() {
        assert!(parse_config("[reload]\nmode = \"carrier-pigeon\"\n").is_err());
        assert!("pigeon".parse::<ReloadMode>().is_err());
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("CATWAF_LISTEN_ADDR", "0.0.0.0:9000"),
                ("CATWAF_RELOAD_MODE", "sentinel"),
                ("CATWAF_API_KEY", "s3cret"),
                ("CLOUDFLARE_API_TOKEN", "cf-token"),
            ]),
        )
        .unwrap();

        assert_eq!(config.daemon.listen_addr.port(), 9000);
        assert_eq!(config.reload.mode, ReloadMode::Sentinel);
        assert_eq!(config.daemon.api_key.as_deref(), Some("s3cret"));
        assert_eq!(config.acme.dns_credential.as_deref(), Some("cf-token"));
    }

    #[test]
    fn catwaf_credential_wins_over_provider_variable() {
        let mut config = Config::default();
        apply_env_overrides(
            &mut config,
            env(&[
                ("CATWAF_DNS_CREDENTIAL", "primary"),
                ("CLOUDFLARE_API_TOKEN", "fallback"),
            ]),
        )
        .unwrap();
        assert_eq!(config.acme.dns_credential.as_deref(), Some("primary"));
    }

    #[test]
    fn bad_listen_addr_is_an_error() {
        let mut config = Config::default();
        let result = apply_env_overrides(&mut config, env(&[("CATWAF_LISTEN_ADDR", "nope")]));
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = load_config(Some(&dir.path().join("absent.toml")));
        assert!(matches!(result, Err(Error::Config(_))));
    }
}

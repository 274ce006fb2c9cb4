//! Validated site desired state.
//!
//! [`SiteRow`] is what the store holds; [`SiteDesiredState`] is what the
//! regeneration and certificate code consume. Conversion rejects anything
//! that could not be rendered safely into a proxy config.

use serde::{Deserialize, Serialize};

use crate::error::{ControlError, ControlResult};
use crate::storage::{SiteInput, SiteRow};

/// Restrict a domain to `[A-Za-z0-9._-]` before it reaches a path or an
/// argument vector.
pub fn validate_domain(domain: &str) -> ControlResult<&str> {
    let valid = !domain.is_empty()
        && domain.len() <= 253
        && domain
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'))
        && !domain.starts_with(['-', '.'])
        && !domain.contains("..");
    if valid {
        Ok(domain)
    } else {
        Err(ControlError::validation(format!("invalid domain: {domain:?}")))
    }
}

/// Load-balancing method of an upstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LbMethod {
    RoundRobin,
    LeastConn,
    IpHash,
    Hash,
}

impl LbMethod {
    pub fn parse(s: &str) -> ControlResult<Self> {
        match s {
            "" | "round_robin" => Ok(Self::RoundRobin),
            "least_conn" => Ok(Self::LeastConn),
            "ip_hash" => Ok(Self::IpHash),
            "hash" => Ok(Self::Hash),
            other => Err(ControlError::validation(format!(
                "invalid load-balancing method: {other}"
            ))),
        }
    }

    /// Upstream directive, if the method needs one.
    pub const fn directive(self) -> Option<&'static str> {
        match self {
            Self::RoundRobin => None,
            Self::LeastConn => Some("least_conn;"),
            Self::IpHash => Some("ip_hash;"),
            Self::Hash => Some("hash $request_uri consistent;"),
        }
    }
}

/// How domain control is proven, or how material is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeType {
    #[serde(rename = "http-01")]
    Http01,
    #[serde(rename = "dns-01")]
    Dns01,
    #[serde(rename = "snakeoil")]
    Snakeoil,
    #[serde(rename = "custom")]
    Custom,
}

impl ChallengeType {
    pub fn parse(s: &str) -> ControlResult<Self> {
        match s {
            "" | "http-01" => Ok(Self::Http01),
            "dns-01" => Ok(Self::Dns01),
            "snakeoil" => Ok(Self::Snakeoil),
            "custom" => Ok(Self::Custom),
            other => Err(ControlError::validation(format!("invalid challenge type: {other}"))),
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Http01 => "http-01",
            Self::Dns01 => "dns-01",
            Self::Snakeoil => "snakeoil",
            Self::Custom => "custom",
        }
    }

    /// Issued by the control plane rather than supplied by the user.
    pub const fn is_automated(self) -> bool {
        !matches!(self, Self::Custom)
    }
}

/// One upstream server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backend {
    pub address: String,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default = "default_weight")]
    pub weight: u32,
    #[serde(default = "default_max_fails")]
    pub max_fails: u32,
    /// Seconds.
    #[serde(default = "default_fail_timeout")]
    pub fail_timeout: u32,
    #[serde(default)]
    pub backup: bool,
    #[serde(default)]
    pub down: bool,
}

const fn default_weight() -> u32 {
    1
}

const fn default_max_fails() -> u32 {
    3
}

const fn default_fail_timeout() -> u32 {
    30
}

impl Backend {
    /// `address[:port]` as it appears in the upstream block.
    pub fn endpoint(&self) -> String {
        match self.port {
            Some(port) => format!("{}:{port}", self.address),
            None => self.address.clone(),
        }
    }

    fn validate(&self) -> ControlResult<()> {
        let address_ok = !self.address.is_empty()
            && self
                .address
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | ':' | '-' | '_' | '[' | ']'));
        if !address_ok {
            return Err(ControlError::validation(format!(
                "invalid backend address: {:?}",
                self.address
            )));
        }
        if self.weight == 0 {
            return Err(ControlError::validation(format!(
                "backend {} has weight 0",
                self.address
            )));
        }
        Ok(())
    }
}

/// Out-of-band health check settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HealthCheck {
    pub enabled: bool,
    /// Seconds.
    pub interval: u32,
    pub path: String,
}

/// TLS settings of a site.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SslSettings {
    pub enabled: bool,
    pub challenge: ChallengeType,
    /// DNS-provider credential for `dns-01`.
    pub credential: Option<String>,
}

/// Inline `/.well-known`-style files served by the proxy.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WellKnownFiles {
    pub robots_txt: Option<String>,
    pub security_txt: Option<String>,
    pub humans_txt: Option<String>,
    pub ads_txt: Option<String>,
}

impl WellKnownFiles {
    /// `(location, body)` pairs for the files that are set.
    pub fn entries(&self) -> Vec<(&'static str, &str)> {
        [
            ("/robots.txt", &self.robots_txt),
            ("/.well-known/security.txt", &self.security_txt),
            ("/humans.txt", &self.humans_txt),
            ("/ads.txt", &self.ads_txt),
        ]
        .into_iter()
        .filter_map(|(path, body)| {
            body.as_deref()
                .filter(|b| !b.trim().is_empty())
                .map(|b| (path, b))
        })
        .collect()
    }
}

/// A site as the control plane reconciles it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteDesiredState {
    pub id: i64,
    pub domain: String,
    pub enabled: bool,
    pub wildcard: bool,
    pub backends: Vec<Backend>,
    pub lb_method: LbMethod,
    pub health_check: HealthCheck,
    pub ssl: SslSettings,
    pub well_known: WellKnownFiles,
}

impl TryFrom<SiteRow> for SiteDesiredState {
    type Error = ControlError;

    fn try_from(row: SiteRow) -> ControlResult<Self> {
        validate_domain(&row.domain)?;

        let backends: Vec<Backend> = serde_json::from_str(&row.backends).map_err(|e| {
            ControlError::validation(format!("malformed backends for {}: {e}", row.domain))
        })?;
        if backends.is_empty() {
            return Err(ControlError::validation(format!(
                "site {} has no backends",
                row.domain
            )));
        }
        for backend in &backends {
            backend.validate()?;
        }

        let health_path_ok = row.health_check_path.starts_with('/')
            && !row
                .health_check_path
                .chars()
                .any(|c| c.is_whitespace() || matches!(c, ';' | '"' | '\'' | '{' | '}'));
        if !health_path_ok {
            return Err(ControlError::validation(format!(
                "invalid health check path: {:?}",
                row.health_check_path
            )));
        }
        let interval = u32::try_from(row.health_check_interval)
            .ok()
            .filter(|i| *i > 0)
            .ok_or_else(|| ControlError::validation("health check interval must be positive"))?;

        let well_known = WellKnownFiles {
            robots_txt: row.robots_txt,
            security_txt: row.security_txt,
            humans_txt: row.humans_txt,
            ads_txt: row.ads_txt,
        };
        if well_known.entries().iter().any(|(_, body)| body.contains('$')) {
            return Err(ControlError::validation(
                "well-known file content must not contain '$'",
            ));
        }

        Ok(Self {
            id: row.id,
            enabled: row.enabled,
            wildcard: row.wildcard_subdomains,
            lb_method: LbMethod::parse(&row.lb_method)?,
            health_check: HealthCheck {
                enabled: row.health_check_enabled,
                interval,
                path: row.health_check_path,
            },
            ssl: SslSettings {
                enabled: row.ssl_enabled,
                challenge: ChallengeType::parse(&row.ssl_challenge_type)?,
                credential: row.dns_credential.filter(|c| !c.is_empty()),
            },
            domain: row.domain,
            backends,
            well_known,
        })
    }
}

/// Check that `input` would convert into a renderable site.
pub fn validate_input(input: &SiteInput) -> ControlResult<()> {
    let row = SiteRow {
        id: 0,
        domain: input.domain.clone(),
        enabled: input.enabled,
        backends: input.backends.to_string(),
        lb_method: input.lb_method.clone(),
        health_check_enabled: input.health_check_enabled,
        health_check_interval: input.health_check_interval,
        health_check_path: input.health_check_path.clone(),
        ssl_enabled: input.ssl_enabled,
        ssl_challenge_type: input.ssl_challenge_type.clone(),
        dns_credential: input.dns_credential.clone(),
        wildcard_subdomains: input.wildcard_subdomains,
        robots_txt: input.robots_txt.clone(),
        security_txt: input.security_txt.clone(),
        humans_txt: input.humans_txt.clone(),
        ads_txt: input.ads_txt.clone(),
        created_at: 0,
        updated_at: 0,
    };
    SiteDesiredState::try_from(row).map(|_| ())
}

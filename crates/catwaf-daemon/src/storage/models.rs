//! Database models for the control plane.

use serde::{Deserialize, Serialize};

/// Job record from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Job {
    pub id: i64,
    pub job_type: String,
    /// JSON document.
    pub payload: String,
    pub status: String,
    pub priority: i64,
    pub attempts: i64,
    pub max_attempts: i64,
    pub error: Option<String>,
    /// JSON document written on completion.
    pub result: Option<String>,
    pub created_at: i64,
    pub started_at: Option<i64>,
    pub completed_at: Option<i64>,
}

impl Job {
    /// Parsed payload; malformed JSON reads as `null`.
    pub fn payload_value(&self) -> serde_json::Value {
        serde_json::from_str(&self.payload).unwrap_or(serde_json::Value::Null)
    }

    pub fn result_value(&self) -> Option<serde_json::Value> {
        self.result
            .as_deref()
            .and_then(|r| serde_json::from_str(r).ok())
    }

    pub fn status(&self) -> Option<JobStatus> {
        JobStatus::parse(&self.status)
    }
}

/// Job lifecycle status. `Completed` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    pub const ALL: [Self; 4] = [Self::Pending, Self::Running, Self::Completed, Self::Failed];

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|status| status.as_str() == s)
    }

    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Job counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct JobStats {
    pub pending: i64,
    pub running: i64,
    pub completed: i64,
    pub failed: i64,
    pub total: i64,
}

/// Ban record from the database.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BanRecord {
    pub id: i64,
    pub ip_address: String,
    pub reason: String,
    pub jail: String,
    /// Seconds; `None` for permanent bans.
    pub ban_duration: Option<i64>,
    pub banned_at: i64,
    pub expires_at: Option<i64>,
    pub is_permanent: bool,
}

impl BanRecord {
    pub fn is_active(&self, now: i64) -> bool {
        self.is_permanent || self.expires_at.is_some_and(|at| at > now)
    }
}

/// Selection for ban listings.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BanFilter {
    #[default]
    Active,
    Permanent,
    Expired,
    All,
}

/// Site record as stored by the CRUD layer.
///
/// Backends are kept as a JSON array; see [`crate::site::SiteDesiredState`]
/// for the validated form.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SiteRow {
    pub id: i64,
    pub domain: String,
    pub enabled: bool,
    pub backends: String,
    pub lb_method: String,
    pub health_check_enabled: bool,
    pub health_check_interval: i64,
    pub health_check_path: String,
    pub ssl_enabled: bool,
    pub ssl_challenge_type: String,
    #[serde(skip_serializing)]
    pub dns_credential: Option<String>,
    pub wildcard_subdomains: bool,
    pub robots_txt: Option<String>,
    pub security_txt: Option<String>,
    pub humans_txt: Option<String>,
    pub ads_txt: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}

/// Writable site fields.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteInput {
    pub domain: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "empty_backends")]
    pub backends: serde_json::Value,
    #[serde(default = "default_lb_method")]
    pub lb_method: String,
    #[serde(default)]
    pub health_check_enabled: bool,
    #[serde(default = "default_health_interval")]
    pub health_check_interval: i64,
    #[serde(default = "default_health_path")]
    pub health_check_path: String,
    #[serde(default)]
    pub ssl_enabled: bool,
    #[serde(default = "default_challenge")]
    pub ssl_challenge_type: String,
    #[serde(default)]
    pub dns_credential: Option<String>,
    #[serde(default)]
    pub wildcard_subdomains: bool,
    #[serde(default)]
    pub robots_txt: Option<String>,
    #[serde(default)]
    pub security_txt: Option<String>,
    #[serde(default)]
    pub humans_txt: Option<String>,
    #[serde(default)]
    pub ads_txt: Option<String>,
}

const fn default_true() -> bool {
    true
}

fn empty_backends() -> serde_json::Value {
    serde_json::Value::Array(Vec::new())
}

fn default_lb_method() -> String {
    "round_robin".to_string()
}

const fn default_health_interval() -> i64 {
    30
}

fn default_health_path() -> String {
    "/".to_string()
}

fn default_challenge() -> String {
    "http-01".to_string()
}

impl SiteInput {
    /// Minimal input for `domain` with the given backends.
    pub fn new(domain: impl Into<String>, backends: serde_json::Value) -> Self {
        Self {
            domain: domain.into(),
            enabled: true,
            backends,
            lb_method: default_lb_method(),
            health_check_enabled: false,
            health_check_interval: default_health_interval(),
            health_check_path: default_health_path(),
            ssl_enabled: false,
            ssl_challenge_type: default_challenge(),
            dns_credential: None,
            wildcard_subdomains: false,
            robots_txt: None,
            security_txt: None,
            humans_txt: None,
            ads_txt: None,
        }
    }
}

/// Per-domain certificate state. A domain with no row is `unrequested`.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct CertificateRow {
    pub domain: String,
    pub state: String,
    pub challenge_type: String,
    pub job_id: Option<i64>,
    pub last_error: Option<String>,
    pub not_before: Option<i64>,
    pub not_after: Option<i64>,
    pub updated_at: i64,
}

/// Certificate lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CertState {
    Unrequested,
    Issuing,
    Installed,
    Failed,
}

impl CertState {
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unrequested => "unrequested",
            Self::Issuing => "issuing",
            Self::Installed => "installed",
            Self::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unrequested" => Some(Self::Unrequested),
            "issuing" => Some(Self::Issuing),
            "installed" => Some(Self::Installed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl std::fmt::Display for CertState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

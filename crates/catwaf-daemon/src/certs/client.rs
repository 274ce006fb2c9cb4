//! Invocation of the external ACME client.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;

use catwaf_core::config::{AcmeConfig, PathsConfig};
use tempfile::NamedTempFile;

use crate::artifacts::{self, ArtifactError};
use crate::gateway::CommandSpec;

/// Second-level labels under which registrations happen one level deeper.
const MULTI_PART_SUFFIXES: &[&str] = &[
    "co.uk", "org.uk", "ac.uk", "gov.uk", "com.au", "co.nz", "co.za", "com.br", "com.mx", "co.jp",
    "co.in", "co.kr",
];

/// Registrable domain of `domain`: `sub.example.co.uk` → `example.co.uk`.
pub fn base_domain(domain: &str) -> &str {
    let labels: Vec<&str> = domain.split('.').collect();
    if labels.len() <= 2 {
        return domain;
    }
    let last_two = labels[labels.len() - 2..].join(".");
    let keep = if MULTI_PART_SUFFIXES.contains(&last_two.as_str()) {
        3
    } else {
        2
    };
    if labels.len() <= keep {
        return domain;
    }
    let skip: usize = labels[..labels.len() - keep].iter().map(|l| l.len() + 1).sum();
    &domain[skip..]
}

/// Certificate and key read back from the client's storage.
#[derive(Debug)]
pub struct Lineage {
    pub fullchain: String,
    pub private_key: String,
}

/// Builds client command lines and reads their results.
#[derive(Debug, Clone)]
pub struct AcmeClient {
    program: PathBuf,
    config_dir: PathBuf,
    webroot: PathBuf,
    email: Option<String>,
    staging: bool,
    dns_plugin: String,
    timeout: Duration,
}

impl AcmeClient {
    pub fn new(acme: &AcmeConfig, paths: &PathsConfig) -> Self {
        Self {
            program: acme.client.clone(),
            config_dir: paths.acme_dir.clone(),
            webroot: paths.acme_webroot.clone(),
            email: acme.email.clone().filter(|e| !e.is_empty()),
            staging: acme.staging,
            dns_plugin: acme.dns_plugin.clone(),
            timeout: Duration::from_secs(acme.timeout_secs),
        }
    }

    fn base_command(&self, cert_name: &str) -> CommandSpec {
        let mut spec = CommandSpec::new(&self.program)
            .args(["certonly", "--non-interactive", "--agree-tos"])
            .arg("--config-dir")
            .arg(self.config_dir.as_os_str())
            .args(["--cert-name", cert_name])
            .with_timeout(self.timeout);
        spec = match &self.email {
            Some(email) => spec.args(["--email", email.as_str()]),
            None => spec.arg("--register-unsafely-without-email"),
        };
        if self.staging {
            spec = spec.arg("--staging");
        }
        spec
    }

    /// Webroot issuance for exactly `domain`.
    pub fn http01_command(&self, domain: &str) -> CommandSpec {
        self.base_command(domain)
            .args(["--webroot", "-w"])
            .arg(self.webroot.as_os_str())
            .args(["-d", domain])
    }

    /// DNS issuance for `base` and `*.base`.
    pub fn dns01_command(&self, base: &str, credentials: &Path) -> CommandSpec {
        let plugin = format!("--dns-{}", self.dns_plugin);
        self.base_command(base)
            .arg(&plugin)
            .arg(format!("{plugin}-credentials"))
            .arg(credentials.as_os_str())
            .args(["-d", base])
            .arg("-d")
            .arg(format!("*.{base}"))
    }

    /// Write a private credentials file for the DNS plugin. The file is
    /// deleted when the returned handle is dropped.
    pub fn write_credentials(&self, token: &str) -> Result<NamedTempFile, ArtifactError> {
        let key = format!("dns_{}_api_token", self.dns_plugin.replace('-', "_"));
        let write_err = |e: std::io::Error| ArtifactError::Write {
            path: "dns credentials".to_string(),
            reason: e.to_string(),
        };
        let mut file = NamedTempFile::new().map_err(write_err)?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            file.as_file()
                .set_permissions(std::fs::Permissions::from_mode(artifacts::PRIVATE_MODE))
                .map_err(write_err)?;
        }
        writeln!(file, "{key} = {token}").map_err(write_err)?;
        file.as_file().sync_all().map_err(write_err)?;
        Ok(file)
    }

    /// Client storage for `cert_name`.
    pub fn live_dir(&self, cert_name: &str) -> PathBuf {
        self.config_dir.join("live").join(cert_name)
    }

    /// Read the issued chain and key for `cert_name`.
    pub fn read_lineage(&self, cert_name: &str) -> Result<Lineage, ArtifactError> {
        let dir = self.live_dir(cert_name);
        let read = |name: &str| {
            let path = dir.join(name);
            artifacts::read_optional(&path)?.ok_or_else(|| ArtifactError::Read {
                path: path.display().to_string(),
                reason: "not produced by the certificate client".to_string(),
            })
        };
        Ok(Lineage {
            fullchain: read("fullchain.pem")?,
            private_key: read("privkey.pem")?,
        })
    }
}

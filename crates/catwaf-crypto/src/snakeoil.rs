//! Self-signed ("snakeoil") certificates.
//!
//! Used for the `snakeoil` challenge type: the site gets TLS immediately with
//! no CA round-trip, at the cost of browser warnings.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use rcgen::{CertificateParams, DnType, KeyPair};

use crate::CertError;

/// Organisation written into every snakeoil subject.
pub const SNAKEOIL_ORG: &str = "CatWAF Snakeoil";

/// Snakeoil certificates are valid for one year from generation.
const VALIDITY: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// PEM-encoded certificate and private key.
pub struct CertBundle {
    /// PEM certificate (also used as the full chain).
    pub cert_pem: String,
    /// PEM PKCS#8 private key.
    pub key_pem: String,
}

impl std::fmt::Debug for CertBundle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertBundle")
            .field("cert_pem", &self.cert_pem)
            .field("key_pem", &"<redacted>")
            .finish()
    }
}

/// Generate a self-signed certificate for `domain`.
///
/// The subject is `CN=<domain>, O=CatWAF Snakeoil` and the domain is the
/// only SAN.
pub fn generate_snakeoil(domain: &str) -> Result<CertBundle, CertError> {
    let mut params = CertificateParams::new(vec![domain.to_string()])
        .map_err(|e| CertError::Generation(e.to_string()))?;
    params.distinguished_name.push(DnType::CommonName, domain);
    params
        .distinguished_name
        .push(DnType::OrganizationName, SNAKEOIL_ORG);

    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    let epoch = rcgen::date_time_ymd(1970, 1, 1);
    params.not_before = epoch + Duration::from_secs(now.as_secs());
    params.not_after = params.not_before + VALIDITY;

    let key_pair = KeyPair::generate().map_err(|e| CertError::Generation(e.to_string()))?;
    let cert = params
        .self_signed(&key_pair)
        .map_err(|e| CertError::Generation(e.to_string()))?;

    Ok(CertBundle {
        cert_pem: cert.pem(),
        key_pem: key_pair.serialize_pem(),
    })
}

#[cfg(test)]
#[allow(clippy::panic, clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::{inspect_certificate, verify_key_pair};

    #[test]
    fn snakeoil_is_pem_encoded() {
        let bundle = generate_snakeoil("example.test").unwrap();
        assert!(bundle.cert_pem.contains("BEGIN CERTIFICATE"));
        assert!(bundle.key_pem.contains("BEGIN PRIVATE KEY"));
    }

    #[test]
    fn snakeoil_subject_and_validity() {
        let bundle = generate_snakeoil("example.test").unwrap();
        let info = inspect_certificate(&bundle.cert_pem).unwrap();

        assert_eq!(info.subject_cn.as_deref(), Some("example.test"));
        assert!(info.issuer.contains(SNAKEOIL_ORG), "issuer: {}", info.issuer);
        assert_eq!(info.dns_names, vec!["example.test".to_string()]);
        let days = (info.not_after - info.not_before) / 86_400;
        assert_eq!(days, 365);
    }

    #[test]
    fn snakeoil_key_matches_certificate() {
        let bundle = generate_snakeoil("example.test").unwrap();
        verify_key_pair(&bundle.cert_pem, &bundle.key_pem).unwrap();
    }

    #[test]
    fn debug_redacts_key() {
        let bundle = generate_snakeoil("example.test").unwrap();
        let rendered = format!("{bundle:?}");
        assert!(!rendered.contains("PRIVATE KEY"));
    }
}

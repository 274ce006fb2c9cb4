//! Certificate primitives for the `CatWAF` control plane.
//!
//! - [`snakeoil`]: self-signed certificates for sites that have no CA-issued
//!   material yet
//! - [`inspect`]: X.509 parsing and certificate/private-key cross-checks for
//!   user-supplied material

pub mod inspect;
pub mod snakeoil;

pub use inspect::{CertInfo, inspect_certificate, verify_key_pair};
pub use snakeoil::{CertBundle, generate_snakeoil};

/// Certificate errors.
#[derive(Debug, thiserror::Error)]
pub enum CertError {
    /// Certificate generation or signing failed.
    #[error("Certificate generation error: {0}")]
    Generation(String),

    /// The certificate is not a parseable PEM-encoded X.509 structure.
    #[error("Invalid certificate: {0}")]
    InvalidCertificate(String),

    /// The private key could not be parsed.
    #[error("Invalid private key: {0}")]
    InvalidKey(String),

    /// The private key does not belong to the certificate.
    #[error("Certificate and private key do not match")]
    KeyMismatch,
}

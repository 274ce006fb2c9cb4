//! Certificate Lifecycle Manager.

pub mod client;
mod layout;
mod manager;

pub use client::{AcmeClient, base_domain};
pub use layout::{CertLayout, FULLCHAIN_FILE, KEY_FILE};
pub use manager::{
    CertRemoval, CertificateManager, CertificateStatus, IssuedCertificate, UploadOutcome,
    UploadRequest,
};

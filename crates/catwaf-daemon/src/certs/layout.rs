use std::path::{Path, PathBuf};

/// File name of the installed certificate chain.
pub const FULLCHAIN_FILE: &str = "fullchain.pem";

/// File name of the installed private key.
pub const KEY_FILE: &str = "key.pem";

/// Where installed certificate material lives: `<root>/<domain>/`.
#[derive(Debug, Clone)]
pub struct CertLayout {
    root: PathBuf,
}

impl CertLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn dir(&self, domain: &str) -> PathBuf {
        self.root.join(domain)
    }

    pub fn fullchain(&self, domain: &str) -> PathBuf {
        self.dir(domain).join(FULLCHAIN_FILE)
    }

    pub fn private_key(&self, domain: &str) -> PathBuf {
        self.dir(domain).join(KEY_FILE)
    }

    /// Both files are present on disk.
    pub fn is_installed(&self, domain: &str) -> bool {
        self.fullchain(domain).is_file() && self.private_key(domain).is_file()
    }
}

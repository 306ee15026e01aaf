// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! On-disk trust list and certificate validation.
//!
//! Trusted server certificates are stored as `<thumbprint>.der` files in
//! a `trusted/` subdirectory of the store location. The thumbprint index
//! is kept in memory; opening the store loads it once from disk, after
//! which trust checks are synchronous.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::fs;
use tracing::{debug, error, info};

use crate::certificate::parse::{parse_certificate, Certificate};
use crate::error::{CertificateError, UaResult};

const TRUSTED_DIR: &str = "trusted";
const DER_EXTENSION: &str = "der";

// =============================================================================
// TrustStore
// =============================================================================

/// Directory-backed list of trusted certificates.
pub struct TrustStore {
    trusted_dir: PathBuf,
    index: RwLock<HashSet<String>>,
}

impl TrustStore {
    /// Returns the conventional store location under the system
    /// temporary directory.
    pub fn default_dir() -> PathBuf {
        std::env::temp_dir()
            .join("client")
            .join("security")
            .join("pki")
    }

    /// Opens the store at `dir`, creating the directory layout if needed
    /// and loading the thumbprints of already trusted certificates.
    pub async fn open(dir: impl Into<PathBuf>) -> UaResult<Arc<Self>> {
        let base: PathBuf = dir.into();
        let trusted_dir = base.join(TRUSTED_DIR);
        fs::create_dir_all(&trusted_dir)
            .await
            .map_err(|e| CertificateError::store(&trusted_dir, "cannot create directory", e))?;

        let mut index = HashSet::new();
        let mut entries = fs::read_dir(&trusted_dir)
            .await
            .map_err(|e| CertificateError::store(&trusted_dir, "cannot list directory", e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CertificateError::store(&trusted_dir, "cannot list directory", e))?
        {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == DER_EXTENSION) {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    index.insert(stem.to_string());
                }
            }
        }

        info!(path = %trusted_dir.display(), trusted = index.len(), "opened trust store");
        Ok(Arc::new(Self {
            trusted_dir,
            index: RwLock::new(index),
        }))
    }

    /// Returns the path of the trusted copy for a thumbprint.
    fn certificate_path(&self, thumbprint: &str) -> PathBuf {
        self.trusted_dir.join(format!("{thumbprint}.{DER_EXTENSION}"))
    }

    /// Adds a certificate to the trust list.
    pub async fn trust(&self, certificate: &Certificate) -> UaResult<()> {
        let path = self.certificate_path(certificate.thumbprint());
        fs::write(&path, certificate.der())
            .await
            .map_err(|e| CertificateError::store(&path, "cannot write certificate", e))?;
        self.index
            .write()
            .insert(certificate.thumbprint().to_string());
        info!(
            thumbprint = certificate.thumbprint(),
            subject = certificate.subject(),
            "trusted certificate"
        );
        Ok(())
    }

    /// Removes a certificate from the trust list.
    ///
    /// Removing a certificate that was never trusted is a no-op.
    pub async fn untrust(&self, certificate: &Certificate) -> UaResult<()> {
        if !self.index.read().contains(certificate.thumbprint()) {
            debug!(
                thumbprint = certificate.thumbprint(),
                "certificate was not trusted; nothing to remove"
            );
            return Ok(());
        }
        let path = self.certificate_path(certificate.thumbprint());
        match fs::remove_file(&path).await {
            Ok(()) => {}
            // A concurrent untrust may have removed the file already.
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                debug!(
                    thumbprint = certificate.thumbprint(),
                    "trusted copy was already removed"
                );
            }
            Err(e) => {
                return Err(CertificateError::store(&path, "cannot remove certificate", e).into())
            }
        }
        self.index.write().remove(certificate.thumbprint());
        info!(
            thumbprint = certificate.thumbprint(),
            "removed certificate from trust list"
        );
        Ok(())
    }

    /// Removes every certificate from the trust list.
    ///
    /// Best effort: a certificate that cannot be removed is logged and
    /// skipped, the remaining ones are still processed.
    pub async fn untrust_all(&self) {
        let thumbprints: Vec<String> = self.index.read().iter().cloned().collect();
        for thumbprint in thumbprints {
            let path = self.certificate_path(&thumbprint);
            match fs::remove_file(&path).await {
                Ok(()) => {
                    self.index.write().remove(&thumbprint);
                    info!(thumbprint, "removed certificate from trust list");
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    self.index.write().remove(&thumbprint);
                }
                Err(e) => {
                    error!(thumbprint, error = %e, "cannot remove trusted certificate; skipping");
                }
            }
        }
    }

    /// Imports a batch of CA certificates into the trust list.
    ///
    /// Certificates that fail to parse or store are logged and skipped.
    /// Returns the number of certificates actually imported.
    pub async fn import_trusted_roots<I>(&self, certificates: I) -> usize
    where
        I: IntoIterator<Item = Vec<u8>>,
    {
        let mut imported = 0;
        for bytes in certificates {
            let certificate = match parse_certificate(&bytes) {
                Ok(certificate) => certificate,
                Err(e) => {
                    error!(error = %e, "cannot parse CA certificate; skipping");
                    continue;
                }
            };
            match self.trust(&certificate).await {
                Ok(()) => imported += 1,
                Err(e) => {
                    error!(
                        thumbprint = certificate.thumbprint(),
                        error = %e,
                        "cannot store CA certificate; skipping"
                    );
                }
            }
        }
        imported
    }

    /// Returns `true` if the certificate is in the trust list.
    pub fn is_trusted(&self, certificate: &Certificate) -> bool {
        self.index.read().contains(certificate.thumbprint())
    }

    /// Returns the thumbprints of all trusted certificates.
    pub fn trusted_thumbprints(&self) -> Vec<String> {
        self.index.read().iter().cloned().collect()
    }

    /// Returns the directory holding the trusted copies.
    pub fn trusted_dir(&self) -> &Path {
        &self.trusted_dir
    }
}

// =============================================================================
// TrustValidator
// =============================================================================

/// Validates presented server certificates against a [`TrustStore`].
pub struct TrustValidator {
    store: Arc<TrustStore>,
}

impl TrustValidator {
    /// Creates a validator over the given store.
    pub fn new(store: Arc<TrustStore>) -> Self {
        Self { store }
    }

    /// Accepts the certificate if it is currently valid and trusted.
    pub fn validate(&self, certificate: &Certificate) -> UaResult<()> {
        if !certificate.is_currently_valid() {
            return Err(CertificateError::expired(certificate.thumbprint()).into());
        }
        if !self.store.is_trusted(certificate) {
            return Err(CertificateError::untrusted(certificate.thumbprint()).into());
        }
        Ok(())
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &Arc<TrustStore> {
        &self.store
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UaError;

    const CERT_PEM: &[u8] =
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/cert.pem"));
    const OTHER_CERT_PEM: &[u8] = include_bytes!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/fixtures/cert2.pem"
    ));

    async fn open_temp_store() -> (tempfile::TempDir, Arc<TrustStore>) {
        let dir = tempfile::tempdir().unwrap();
        let store = TrustStore::open(dir.path()).await.unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn trust_persists_the_der_copy() {
        let (_dir, store) = open_temp_store().await;
        let certificate = parse_certificate(CERT_PEM).unwrap();

        store.trust(&certificate).await.unwrap();
        assert!(store.is_trusted(&certificate));

        let path = store
            .trusted_dir()
            .join(format!("{}.der", certificate.thumbprint()));
        let stored = std::fs::read(path).unwrap();
        assert_eq!(stored, certificate.der());
    }

    #[tokio::test]
    async fn reopening_reloads_the_index() {
        let dir = tempfile::tempdir().unwrap();
        let certificate = parse_certificate(CERT_PEM).unwrap();
        {
            let store = TrustStore::open(dir.path()).await.unwrap();
            store.trust(&certificate).await.unwrap();
        }
        let reopened = TrustStore::open(dir.path()).await.unwrap();
        assert!(reopened.is_trusted(&certificate));
        assert_eq!(reopened.trusted_thumbprints().len(), 1);
    }

    #[tokio::test]
    async fn untrust_of_unknown_certificate_is_a_no_op() {
        let (_dir, store) = open_temp_store().await;
        let certificate = parse_certificate(CERT_PEM).unwrap();
        store.untrust(&certificate).await.unwrap();
        assert!(!store.is_trusted(&certificate));
    }

    #[tokio::test]
    async fn untrust_restores_the_prior_trust_list() {
        let (_dir, store) = open_temp_store().await;
        let first = parse_certificate(CERT_PEM).unwrap();
        let second = parse_certificate(OTHER_CERT_PEM).unwrap();
        store.trust(&first).await.unwrap();
        let mut before = store.trusted_thumbprints();
        before.sort();

        store.trust(&second).await.unwrap();
        store.untrust(&second).await.unwrap();

        let mut after = store.trusted_thumbprints();
        after.sort();
        assert_eq!(after, before);
        assert!(store.is_trusted(&first));
        assert!(!store.is_trusted(&second));
        let removed = store
            .trusted_dir()
            .join(format!("{}.der", second.thumbprint()));
        assert!(!removed.exists());
    }

    #[tokio::test]
    async fn untrust_tolerates_an_already_removed_file() {
        let (_dir, store) = open_temp_store().await;
        let certificate = parse_certificate(CERT_PEM).unwrap();
        store.trust(&certificate).await.unwrap();

        let path = store
            .trusted_dir()
            .join(format!("{}.der", certificate.thumbprint()));
        std::fs::remove_file(&path).unwrap();

        store.untrust(&certificate).await.unwrap();
        assert!(!store.is_trusted(&certificate));
    }

    #[tokio::test]
    async fn untrust_all_clears_the_store() {
        let (_dir, store) = open_temp_store().await;
        let first = parse_certificate(CERT_PEM).unwrap();
        let second = parse_certificate(OTHER_CERT_PEM).unwrap();
        store.trust(&first).await.unwrap();
        store.trust(&second).await.unwrap();

        store.untrust_all().await;
        assert!(store.trusted_thumbprints().is_empty());
        assert!(!store.is_trusted(&first));
        assert!(!store.is_trusted(&second));
    }

    #[tokio::test]
    async fn bulk_import_skips_broken_certificates() {
        let (_dir, store) = open_temp_store().await;
        let imported = store
            .import_trusted_roots(vec![
                CERT_PEM.to_vec(),
                b"broken".to_vec(),
                OTHER_CERT_PEM.to_vec(),
            ])
            .await;
        assert_eq!(imported, 2);
        assert_eq!(store.trusted_thumbprints().len(), 2);
    }

    #[tokio::test]
    async fn validator_rejects_untrusted_and_accepts_trusted() {
        let (_dir, store) = open_temp_store().await;
        let certificate = parse_certificate(CERT_PEM).unwrap();
        let validator = TrustValidator::new(store.clone());

        let error = validator.validate(&certificate).unwrap_err();
        assert!(matches!(
            error,
            UaError::Certificate(CertificateError::Untrusted { .. })
        ));

        store.trust(&certificate).await.unwrap();
        validator.validate(&certificate).unwrap();
    }
}

// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Certificate and private key parsing.
//!
//! Certificates are accepted as PEM or DER X.509. Private keys are
//! accepted in exactly two forms, both password-protected:
//!
//! - PKCS#8 `ENCRYPTED PRIVATE KEY` blocks (PBES2)
//! - traditional OpenSSL `RSA PRIVATE KEY` blocks with `Proc-Type` and
//!   `DEK-Info` headers (AES-CBC, key derived with the legacy
//!   `EVP_BytesToKey` scheme)
//!
//! Unencrypted keys are rejected: the connector never accepts key
//! material that is stored in the clear.

use std::fmt;

use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use chrono::{DateTime, Utc};
use md5::{Digest as Md5Digest, Md5};
use pkcs8::EncryptedPrivateKeyInfo;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::RsaPrivateKey;
use sha1::Sha1;
use tracing::error;
use x509_parser::certificate::X509Certificate;
use x509_parser::extensions::{GeneralName, ParsedExtension};
use x509_parser::prelude::FromDer;

use crate::error::{CertificateError, UaResult};

const PEM_MARKER: &[u8] = b"-----BEGIN";
const TAG_CERTIFICATE: &str = "CERTIFICATE";
const TAG_ENCRYPTED_PKCS8: &str = "ENCRYPTED PRIVATE KEY";
const TAG_TRADITIONAL_RSA: &str = "RSA PRIVATE KEY";

// =============================================================================
// Certificate
// =============================================================================

/// A parsed X.509 certificate with its extracted metadata.
///
/// The DER bytes are the source of truth; the metadata fields are
/// extracted once at parse time so the borrow into the DER buffer never
/// escapes this module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Certificate {
    der: Vec<u8>,
    thumbprint: String,
    subject: String,
    issuer: String,
    serial: String,
    not_before: DateTime<Utc>,
    not_after: DateTime<Utc>,
    application_uri: Option<String>,
}

impl Certificate {
    /// Returns the DER encoding.
    pub fn der(&self) -> &[u8] {
        &self.der
    }

    /// Returns the uppercase hex SHA-1 thumbprint of the DER encoding.
    pub fn thumbprint(&self) -> &str {
        &self.thumbprint
    }

    /// Returns the subject distinguished name.
    pub fn subject(&self) -> &str {
        &self.subject
    }

    /// Returns the issuer distinguished name.
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Returns the serial number in hex.
    pub fn serial(&self) -> &str {
        &self.serial
    }

    /// Returns the start of the validity period.
    pub fn not_before(&self) -> DateTime<Utc> {
        self.not_before
    }

    /// Returns the end of the validity period.
    pub fn not_after(&self) -> DateTime<Utc> {
        self.not_after
    }

    /// Returns the application URI from the subject alternative name,
    /// if the certificate carries one.
    pub fn application_uri(&self) -> Option<&str> {
        self.application_uri.as_deref()
    }

    /// Returns `true` if `at` falls inside the validity period.
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        at >= self.not_before && at <= self.not_after
    }

    /// Returns `true` if the certificate is valid right now.
    pub fn is_currently_valid(&self) -> bool {
        self.is_valid_at(Utc::now())
    }
}

impl fmt::Display for Certificate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.subject, self.thumbprint)
    }
}

// =============================================================================
// PrivateKey
// =============================================================================

/// A decrypted RSA private key.
#[derive(Clone)]
pub struct PrivateKey(RsaPrivateKey);

impl PrivateKey {
    /// Returns the underlying RSA key.
    pub fn rsa(&self) -> &RsaPrivateKey {
        &self.0
    }

    /// Returns the modulus size in bits.
    pub fn bit_size(&self) -> usize {
        use rsa::traits::PublicKeyParts;
        self.0.size() * 8
    }
}

// Key material never goes through Debug output.
impl fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PrivateKey(rsa, {} bits)", self.bit_size())
    }
}

/// An application certificate paired with its private key.
#[derive(Debug, Clone)]
pub struct KeyPair {
    /// The certificate.
    pub certificate: Certificate,
    /// The matching private key.
    pub private_key: PrivateKey,
}

// =============================================================================
// Parsing
// =============================================================================

/// Computes the uppercase hex SHA-1 thumbprint of DER bytes.
pub fn thumbprint(der: &[u8]) -> String {
    hex_encode(&Sha1::digest(der))
}

/// Parses a certificate from PEM or DER bytes.
pub fn parse_certificate(bytes: &[u8]) -> UaResult<Certificate> {
    let der = if looks_like_pem(bytes) {
        let block = pem::parse(bytes).map_err(|e| {
            error!(error = %e, "cannot parse certificate PEM block");
            CertificateError::InvalidCertificateFormat
        })?;
        if block.tag() != TAG_CERTIFICATE {
            error!(tag = block.tag(), "PEM block is not a certificate");
            return Err(CertificateError::InvalidCertificateFormat.into());
        }
        block.contents().to_vec()
    } else {
        bytes.to_vec()
    };

    let (_, cert) = X509Certificate::from_der(&der).map_err(|e| {
        error!(error = %e, "cannot parse X.509 certificate");
        CertificateError::InvalidCertificateFormat
    })?;

    let mut application_uri = None;
    for extension in cert.extensions() {
        if let ParsedExtension::SubjectAlternativeName(san) = extension.parsed_extension() {
            for name in &san.general_names {
                if let GeneralName::URI(uri) = name {
                    application_uri = Some((*uri).to_string());
                    break;
                }
            }
        }
    }

    let not_before = timestamp_to_utc(cert.validity().not_before.timestamp());
    let not_after = timestamp_to_utc(cert.validity().not_after.timestamp());
    let parsed = Certificate {
        thumbprint: thumbprint(&der),
        subject: cert.subject().to_string(),
        issuer: cert.issuer().to_string(),
        serial: cert.raw_serial_as_string(),
        not_before,
        not_after,
        application_uri,
        der,
    };
    Ok(parsed)
}

/// Parses and decrypts a password-protected private key.
///
/// Only encrypted PKCS#8 and encrypted traditional PKCS#1 PEM blocks are
/// accepted. The returned errors carry no detail; the cause is logged.
pub fn parse_private_key(bytes: &[u8], password: &str) -> UaResult<PrivateKey> {
    let block = pem::parse(bytes).map_err(|e| {
        error!(error = %e, "cannot parse private key PEM block");
        CertificateError::UnsupportedKeyFormat
    })?;

    match block.tag() {
        TAG_ENCRYPTED_PKCS8 => decrypt_pkcs8(block.contents(), password),
        TAG_TRADITIONAL_RSA => decrypt_traditional(&block, password),
        other => {
            error!(
                tag = other,
                "private key format is not supported; only encrypted PKCS#1 and PKCS#8 are accepted"
            );
            Err(CertificateError::UnsupportedKeyFormat.into())
        }
    }
}

fn decrypt_pkcs8(der: &[u8], password: &str) -> UaResult<PrivateKey> {
    let info = EncryptedPrivateKeyInfo::try_from(der).map_err(|e| {
        error!(error = %e, "cannot parse encrypted PKCS#8 structure");
        CertificateError::UnsupportedKeyFormat
    })?;
    let document = info.decrypt(password).map_err(|e| {
        error!(error = %e, "cannot decrypt PKCS#8 private key");
        CertificateError::DecryptionFailed
    })?;
    let key = RsaPrivateKey::from_pkcs8_der(document.as_bytes()).map_err(|e| {
        error!(error = %e, "decrypted PKCS#8 content is not an RSA key");
        CertificateError::UnsupportedKeyFormat
    })?;
    Ok(PrivateKey(key))
}

fn decrypt_traditional(block: &pem::Pem, password: &str) -> UaResult<PrivateKey> {
    let proc_type = block.headers().get("Proc-Type").unwrap_or_default();
    if !proc_type.contains("ENCRYPTED") {
        error!("traditional PKCS#1 key without encryption headers is not accepted");
        return Err(CertificateError::UnsupportedKeyFormat.into());
    }
    let dek_info = block.headers().get("DEK-Info").ok_or_else(|| {
        error!("encrypted PKCS#1 key is missing the DEK-Info header");
        CertificateError::UnsupportedKeyFormat
    })?;
    let (algorithm, iv_hex) = dek_info.split_once(',').ok_or_else(|| {
        error!(dek_info, "malformed DEK-Info header");
        CertificateError::UnsupportedKeyFormat
    })?;
    let iv = hex_decode(iv_hex.trim()).ok_or_else(|| {
        error!("DEK-Info IV is not valid hex");
        CertificateError::UnsupportedKeyFormat
    })?;
    let key_len = match algorithm.trim() {
        "AES-128-CBC" => 16,
        "AES-192-CBC" => 24,
        "AES-256-CBC" => 32,
        other => {
            error!(algorithm = other, "unsupported PEM encryption algorithm");
            return Err(CertificateError::UnsupportedKeyFormat.into());
        }
    };
    if iv.len() < 8 {
        error!("DEK-Info IV is too short");
        return Err(CertificateError::UnsupportedKeyFormat.into());
    }

    // OpenSSL's legacy EVP_BytesToKey: the salt is the first 8 IV bytes.
    let key = evp_bytes_to_key(password.as_bytes(), &iv[..8], key_len);
    let der = aes_cbc_decrypt(key_len, &key, &iv, block.contents()).ok_or_else(|| {
        error!("cannot decrypt PKCS#1 private key; the password is likely wrong");
        CertificateError::DecryptionFailed
    })?;
    let key = RsaPrivateKey::from_pkcs1_der(&der).map_err(|e| {
        error!(error = %e, "decrypted PKCS#1 content is not an RSA key; the password is likely wrong");
        CertificateError::DecryptionFailed
    })?;
    Ok(PrivateKey(key))
}

/// The MD5-based key derivation OpenSSL applies to PEM passwords.
fn evp_bytes_to_key(password: &[u8], salt: &[u8], key_len: usize) -> Vec<u8> {
    let mut key = Vec::with_capacity(key_len);
    let mut previous: Vec<u8> = Vec::new();
    while key.len() < key_len {
        let mut hasher = Md5::new();
        hasher.update(&previous);
        hasher.update(password);
        hasher.update(salt);
        previous = hasher.finalize().to_vec();
        key.extend_from_slice(&previous);
    }
    key.truncate(key_len);
    key
}

fn aes_cbc_decrypt(key_len: usize, key: &[u8], iv: &[u8], data: &[u8]) -> Option<Vec<u8>> {
    match key_len {
        16 => cbc::Decryptor::<Aes128>::new_from_slices(key, iv)
            .ok()?
            .decrypt_padded_vec_mut::<Pkcs7>(data)
            .ok(),
        24 => cbc::Decryptor::<Aes192>::new_from_slices(key, iv)
            .ok()?
            .decrypt_padded_vec_mut::<Pkcs7>(data)
            .ok(),
        32 => cbc::Decryptor::<Aes256>::new_from_slices(key, iv)
            .ok()?
            .decrypt_padded_vec_mut::<Pkcs7>(data)
            .ok(),
        _ => None,
    }
}

fn looks_like_pem(bytes: &[u8]) -> bool {
    bytes
        .windows(PEM_MARKER.len())
        .take(64)
        .any(|window| window == PEM_MARKER)
}

fn timestamp_to_utc(seconds: i64) -> DateTime<Utc> {
    DateTime::from_timestamp(seconds, 0).unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

fn hex_encode(bytes: &[u8]) -> String {
    const DIGITS: &[u8; 16] = b"0123456789ABCDEF";
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        out.push(DIGITS[(byte >> 4) as usize] as char);
        out.push(DIGITS[(byte & 0x0F) as usize] as char);
    }
    out
}

fn hex_decode(text: &str) -> Option<Vec<u8>> {
    if text.len() % 2 != 0 {
        return None;
    }
    let mut out = Vec::with_capacity(text.len() / 2);
    let bytes = text.as_bytes();
    for pair in bytes.chunks_exact(2) {
        let high = (pair[0] as char).to_digit(16)?;
        let low = (pair[1] as char).to_digit(16)?;
        out.push(((high << 4) | low) as u8);
    }
    Some(out)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::UaError;

    const FIXTURE_PASSWORD: &str = "opcua-test";

    const CERT_PEM: &[u8] =
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/cert.pem"));
    const CERT_DER: &[u8] =
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/cert.der"));
    const KEY_PKCS8_ENC: &[u8] = include_bytes!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/fixtures/pkcs8_enc.pem"
    ));
    const KEY_PKCS1_ENC: &[u8] = include_bytes!(concat!(
        env!("CARGO_MANIFEST_DIR"),
        "/tests/fixtures/pkcs1_enc.pem"
    ));
    const KEY_PLAIN: &[u8] =
        include_bytes!(concat!(env!("CARGO_MANIFEST_DIR"), "/tests/fixtures/plain.pem"));

    #[test]
    fn pem_and_der_forms_yield_the_same_certificate() {
        let from_pem = parse_certificate(CERT_PEM).unwrap();
        let from_der = parse_certificate(CERT_DER).unwrap();
        assert_eq!(from_pem.thumbprint(), from_der.thumbprint());
        assert_eq!(from_pem.der(), from_der.der());
        assert!(from_pem.subject().contains("connector-test"));
    }

    #[test]
    fn certificate_exposes_san_application_uri() {
        let cert = parse_certificate(CERT_PEM).unwrap();
        assert_eq!(cert.application_uri(), Some("urn:test:connector:client"));
    }

    #[test]
    fn thumbprint_is_uppercase_hex_sha1() {
        let cert = parse_certificate(CERT_DER).unwrap();
        assert_eq!(cert.thumbprint().len(), 40);
        assert!(cert
            .thumbprint()
            .chars()
            .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_lowercase()));
        assert_eq!(cert.thumbprint(), thumbprint(CERT_DER));
    }

    #[test]
    fn garbage_is_an_invalid_certificate() {
        let error = parse_certificate(b"not a certificate").unwrap_err();
        assert!(matches!(
            error,
            UaError::Certificate(CertificateError::InvalidCertificateFormat)
        ));
    }

    #[test]
    fn encrypted_pkcs8_key_decrypts_with_the_right_password() {
        let key = parse_private_key(KEY_PKCS8_ENC, FIXTURE_PASSWORD).unwrap();
        assert_eq!(key.bit_size(), 2048);
    }

    #[test]
    fn encrypted_pkcs1_key_decrypts_with_the_right_password() {
        let key = parse_private_key(KEY_PKCS1_ENC, FIXTURE_PASSWORD).unwrap();
        assert_eq!(key.bit_size(), 2048);
    }

    #[test]
    fn wrong_password_is_a_decryption_failure() {
        for fixture in [KEY_PKCS8_ENC, KEY_PKCS1_ENC] {
            let error = parse_private_key(fixture, "wrong-password").unwrap_err();
            assert!(matches!(
                error,
                UaError::Certificate(CertificateError::DecryptionFailed)
            ));
        }
    }

    #[test]
    fn unencrypted_key_is_rejected() {
        let error = parse_private_key(KEY_PLAIN, FIXTURE_PASSWORD).unwrap_err();
        assert!(matches!(
            error,
            UaError::Certificate(CertificateError::UnsupportedKeyFormat)
        ));
    }

    #[test]
    fn debug_output_carries_no_key_material() {
        let key = parse_private_key(KEY_PKCS8_ENC, FIXTURE_PASSWORD).unwrap();
        let debug = format!("{key:?}");
        assert_eq!(debug, "PrivateKey(rsa, 2048 bits)");
    }

    #[test]
    fn hex_codecs_round_trip() {
        assert_eq!(hex_encode(&[0x0F, 0xA0, 0xFF]), "0FA0FF");
        assert_eq!(hex_decode("0fa0ff"), Some(vec![0x0F, 0xA0, 0xFF]));
        assert_eq!(hex_decode("xyz"), None);
    }
}

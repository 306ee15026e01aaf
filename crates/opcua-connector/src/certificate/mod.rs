// SPDX-License-Identifier: PolyForm-Noncommercial-1.0.0
// Copyright (c) 2025 Sylvex. All rights reserved.

//! Certificate and private key handling.
//!
//! Two concerns live here:
//!
//! - [`parse`] turns caller-supplied bytes into typed [`Certificate`] and
//!   [`PrivateKey`] values, covering PEM and DER X.509 certificates plus
//!   password-protected private keys in PKCS#8 and traditional OpenSSL
//!   PKCS#1 encoding.
//! - [`trust`] maintains the on-disk trust list of server certificates,
//!   keyed by SHA-1 thumbprint, and validates presented certificates
//!   against it.
//!
//! Parse failures around key material keep their user-facing messages
//! vague; the detailed cause goes to the log only.

pub mod parse;
pub mod trust;

pub use parse::{parse_certificate, parse_private_key, thumbprint, Certificate, KeyPair, PrivateKey};
pub use trust::{TrustStore, TrustValidator};

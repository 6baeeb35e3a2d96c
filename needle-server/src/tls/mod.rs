//! TLS handshake integration
//!
//! Handles:
//! - Resolving the certificate name from SNI (or the configured default)
//! - Converting cached PEM records into openssl certificate/key pairs
//! - Installing them from pingora's certificate callback

mod sni;

pub use sni::{BindingError, CertificateBinding, ServedCertificate, create_sni_callbacks};

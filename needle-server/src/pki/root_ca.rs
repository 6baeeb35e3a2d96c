use openssl::asn1::{Asn1Integer, Asn1Time};
use openssl::bn::{BigNum, MsbOption};
use openssl::error::ErrorStack;
use openssl::hash::MessageDigest;
use openssl::pkey::{PKey, PKeyRef, Private};
use openssl::rsa::Rsa;
use openssl::x509::extension::{BasicConstraints, KeyUsage, SubjectKeyIdentifier};
use openssl::x509::{X509, X509Builder, X509NameBuilder, X509Ref};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Root CA certificate validity period (10 years)
const CA_VALIDITY_DAYS: u32 = 3650;
const CA_KEY_BITS: u32 = 2048;
const CA_ORGANIZATION: &str = "Needle";

pub const DEFAULT_CA_COMMON_NAME: &str = "Needle Local Root CA";

#[derive(Debug, Error)]
pub enum CaError {
    #[error("Failed to generate root CA: {0}")]
    Generation(#[source] ErrorStack),
    #[error("Failed to parse root CA: {0}")]
    Parse(String),
    #[error("Root CA private key does not match its certificate")]
    KeyMismatch,
    #[error("Failed to read file {0}: {1}")]
    FileRead(PathBuf, std::io::Error),
    #[error("Failed to write file {0}: {1}")]
    FileWrite(PathBuf, std::io::Error),
    #[error("Refusing to overwrite existing file {0}")]
    AlreadyExists(PathBuf),
}

/// Immutable signing material for every leaf certificate.
#[derive(Clone)]
pub struct RootCa {
    certificate: X509,
    private_key: PKey<Private>,
    cert_pem: Vec<u8>,
}

impl std::fmt::Debug for RootCa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RootCa")
            .field("subject", &self.certificate.subject_name())
            .finish_non_exhaustive()
    }
}

impl RootCa {
    /// Load the root CA from a PEM certificate file and a PEM private key file.
    pub fn load(cert_path: &Path, key_path: &Path) -> Result<Self, CaError> {
        let cert_pem =
            fs::read(cert_path).map_err(|e| CaError::FileRead(cert_path.to_path_buf(), e))?;
        let key_pem =
            fs::read(key_path).map_err(|e| CaError::FileRead(key_path.to_path_buf(), e))?;
        Self::from_pem(&cert_pem, &key_pem)
    }

    /// Parse PEM material. The key may be PKCS#1 or PKCS#8.
    pub fn from_pem(cert_pem: &[u8], key_pem: &[u8]) -> Result<Self, CaError> {
        let certificate = X509::from_pem(cert_pem)
            .map_err(|e| CaError::Parse(format!("certificate: {}", e)))?;
        let private_key = PKey::private_key_from_pem(key_pem)
            .map_err(|e| CaError::Parse(format!("private key: {}", e)))?;
        let public_key = certificate
            .public_key()
            .map_err(|e| CaError::Parse(format!("certificate public key: {}", e)))?;
        if !public_key.public_eq(&private_key) {
            return Err(CaError::KeyMismatch);
        }

        Ok(Self {
            certificate,
            private_key,
            cert_pem: cert_pem.to_vec(),
        })
    }

    /// Generate a fresh self-signed root CA.
    pub fn generate(common_name: &str) -> Result<Self, CaError> {
        let private_key = Rsa::generate(CA_KEY_BITS)
            .and_then(PKey::from_rsa)
            .map_err(CaError::Generation)?;
        let certificate =
            self_signed_ca(common_name, &private_key).map_err(CaError::Generation)?;
        let cert_pem = certificate.to_pem().map_err(CaError::Generation)?;

        Ok(Self {
            certificate,
            private_key,
            cert_pem,
        })
    }

    /// Write certificate and key to disk. The key file is created with mode 0600.
    pub fn save(&self, cert_path: &Path, key_path: &Path, overwrite: bool) -> Result<(), CaError> {
        for path in [cert_path, key_path] {
            if !overwrite && path.exists() {
                return Err(CaError::AlreadyExists(path.to_path_buf()));
            }
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .map_err(|e| CaError::FileWrite(parent.to_path_buf(), e))?;
            }
        }

        let key_pem = self
            .private_key
            .private_key_to_pem_pkcs8()
            .map_err(CaError::Generation)?;

        fs::write(cert_path, &self.cert_pem)
            .map_err(|e| CaError::FileWrite(cert_path.to_path_buf(), e))?;
        fs::write(key_path, key_pem).map_err(|e| CaError::FileWrite(key_path.to_path_buf(), e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(key_path, fs::Permissions::from_mode(0o600))
                .map_err(|e| CaError::FileWrite(key_path.to_path_buf(), e))?;
        }

        tracing::info!(
            cert_path = %cert_path.display(),
            key_path = %key_path.display(),
            "Saved root CA"
        );

        Ok(())
    }

    pub fn certificate(&self) -> &X509Ref {
        &self.certificate
    }

    pub fn private_key(&self) -> &PKeyRef<Private> {
        &self.private_key
    }

    /// Certificate PEM exactly as loaded, for distribution to clients.
    pub fn cert_pem(&self) -> &[u8] {
        &self.cert_pem
    }
}

fn self_signed_ca(common_name: &str, key: &PKey<Private>) -> Result<X509, ErrorStack> {
    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_text("CN", common_name)?;
    name.append_entry_by_text("O", CA_ORGANIZATION)?;
    let name = name.build();

    let mut serial = BigNum::new()?;
    serial.rand(128, MsbOption::MAYBE_ZERO, false)?;
    let serial = Asn1Integer::from_bn(&serial)?;

    let mut builder = X509Builder::new()?;
    builder.set_version(2)?;
    builder.set_serial_number(&serial)?;
    builder.set_subject_name(&name)?;
    builder.set_issuer_name(&name)?;
    builder.set_pubkey(key)?;
    builder.set_not_before(&Asn1Time::days_from_now(0)?)?;
    builder.set_not_after(&Asn1Time::days_from_now(CA_VALIDITY_DAYS)?)?;
    builder.append_extension(BasicConstraints::new().critical().ca().build()?)?;
    builder.append_extension(
        KeyUsage::new()
            .critical()
            .key_cert_sign()
            .crl_sign()
            .digital_signature()
            .build()?,
    )?;
    let ski = SubjectKeyIdentifier::new().build(&builder.x509v3_context(None, None))?;
    builder.append_extension(ski)?;
    builder.sign(key, MessageDigest::sha256())?;

    Ok(builder.build())
}

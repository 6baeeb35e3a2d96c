//! SNI-based certificate selection for TLS
//!
//! Every handshake is served a certificate for exactly the name the client
//! asked for, issued on first sight. Handshakes without SNI share one
//! certificate under the configured default name.

use crate::issuance::{IssuanceError, IssuanceService};
use async_trait::async_trait;
use needle_core::{CertificateRecord, resolve_certificate_name};
use openssl::error::ErrorStack;
use openssl::pkey::{PKey, Private};
use openssl::ssl::{NameType, SslRef};
use openssl::x509::X509;
use pingora_core::listeners::TlsAccept;
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum BindingError {
    #[error(transparent)]
    Issuance(#[from] IssuanceError),

    #[error("invalid certificate PEM for {name}: {source}")]
    Certificate {
        name: String,
        #[source]
        source: ErrorStack,
    },

    #[error("invalid private key PEM for {name}: {source}")]
    PrivateKey {
        name: String,
        #[source]
        source: ErrorStack,
    },

    #[error("private key does not match certificate for {name}")]
    KeyMismatch { name: String },

    #[error("failed to install certificate for {name}: {source}")]
    Install {
        name: String,
        #[source]
        source: ErrorStack,
    },
}

/// Certificate and key ready to hand to openssl.
#[derive(Clone)]
pub struct ServedCertificate {
    pub name: String,
    pub certificate: X509,
    pub private_key: PKey<Private>,
}

impl std::fmt::Debug for ServedCertificate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServedCertificate")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl ServedCertificate {
    pub fn from_record(record: &CertificateRecord) -> Result<Self, BindingError> {
        let name = record.name.clone();
        let certificate =
            X509::from_pem(&record.cert_pem).map_err(|source| BindingError::Certificate {
                name: name.clone(),
                source,
            })?;
        let private_key = PKey::private_key_from_pem(&record.key_pem).map_err(|source| {
            BindingError::PrivateKey {
                name: name.clone(),
                source,
            }
        })?;
        let public_key = certificate
            .public_key()
            .map_err(|source| BindingError::Certificate {
                name: name.clone(),
                source,
            })?;
        if !public_key.public_eq(&private_key) {
            return Err(BindingError::KeyMismatch { name });
        }

        Ok(Self {
            name,
            certificate,
            private_key,
        })
    }

    pub fn install(&self, ssl: &mut SslRef) -> Result<(), BindingError> {
        let install_err = |source: ErrorStack| BindingError::Install {
            name: self.name.clone(),
            source,
        };
        ssl.set_certificate(&self.certificate).map_err(install_err)?;
        ssl.set_private_key(&self.private_key).map_err(install_err)?;
        Ok(())
    }
}

/// Binds pingora's certificate callback to the issuance service.
pub struct CertificateBinding {
    service: Arc<IssuanceService>,
    default_name: String,
}

impl CertificateBinding {
    pub fn new(service: Arc<IssuanceService>, default_name: impl Into<String>) -> Self {
        Self {
            service,
            default_name: default_name.into(),
        }
    }

    pub fn default_name(&self) -> &str {
        &self.default_name
    }

    /// Fetch (or issue) the certificate for a handshake's server name.
    pub async fn certificate_for(
        &self,
        server_name: Option<&str>,
    ) -> Result<ServedCertificate, BindingError> {
        let name = resolve_certificate_name(server_name, &self.default_name);
        tracing::debug!(hostname = name, sni = server_name.is_some(), "Certificate lookup");

        let record = self.service.get_or_create(name).await?;
        ServedCertificate::from_record(&record)
    }

    /// Resolve and install the certificate for this connection.
    ///
    /// On error nothing is installed and the handshake fails.
    pub async fn select_certificate(&self, ssl: &mut SslRef) -> Result<(), BindingError> {
        let server_name = ssl.servername(NameType::HOST_NAME).map(str::to_string);
        let served = self.certificate_for(server_name.as_deref()).await?;
        served.install(ssl)
    }
}

impl std::fmt::Debug for CertificateBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CertificateBinding")
            .field("default_name", &self.default_name)
            .finish()
    }
}

#[async_trait]
impl TlsAccept for CertificateBinding {
    async fn certificate_callback(&self, ssl: &mut SslRef) {
        if let Err(e) = self.select_certificate(ssl).await {
            let hostname = ssl
                .servername(NameType::HOST_NAME)
                .unwrap_or(self.default_name.as_str())
                .to_string();
            tracing::error!(hostname = %hostname, "Refusing TLS handshake: {}", e);
        }
    }
}

/// Create TLS callbacks for on-demand certificate selection
pub fn create_sni_callbacks(binding: CertificateBinding) -> Box<dyn TlsAccept + Send + Sync> {
    Box::new(binding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pki::testing::root_ca;
    use crate::pki::{CertificateFactory, SigningFactory};
    use needle_core::{
        CertificateStore, DEFAULT_CERTIFICATE_NAME, MemoryCertificateStore, StoreError,
    };
    use openssl::ssl::{Ssl, SslContext, SslMethod};

    fn binding_with_store(store: Arc<dyn CertificateStore>) -> CertificateBinding {
        let factory = Arc::new(SigningFactory::new(root_ca()));
        let service = Arc::new(IssuanceService::new(store, factory));
        CertificateBinding::new(service, DEFAULT_CERTIFICATE_NAME)
    }

    fn binding() -> (Arc<MemoryCertificateStore>, CertificateBinding) {
        let store = Arc::new(MemoryCertificateStore::new());
        (store.clone(), binding_with_store(store))
    }

    fn common_name(cert: &X509) -> String {
        cert.subject_name()
            .entries_by_nid(openssl::nid::Nid::COMMONNAME)
            .next()
            .unwrap()
            .data()
            .as_utf8()
            .unwrap()
            .to_string()
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sni_name_selects_matching_certificate() {
        let (store, binding) = binding();
        let served = binding.certificate_for(Some("app.needle.test")).await.unwrap();

        assert_eq!(served.name, "app.needle.test");
        assert_eq!(common_name(&served.certificate), "app.needle.test");
        assert!(store.get("app.needle.test").is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn missing_or_empty_sni_shares_default_certificate() {
        let (store, binding) = binding();
        let first = binding.certificate_for(None).await.unwrap();
        let second = binding.certificate_for(Some("")).await.unwrap();

        assert_eq!(first.name, DEFAULT_CERTIFICATE_NAME);
        assert_eq!(
            first.certificate.to_der().unwrap(),
            second.certificate.to_der().unwrap()
        );
        assert_eq!(store.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn custom_default_name_is_used() {
        let store: Arc<dyn CertificateStore> = Arc::new(MemoryCertificateStore::new());
        let factory = Arc::new(SigningFactory::new(root_ca()));
        let service = Arc::new(IssuanceService::new(store, factory));
        let binding = CertificateBinding::new(service, "fallback.local");

        let served = binding.certificate_for(None).await.unwrap();
        assert_eq!(served.name, "fallback.local");
        assert_eq!(binding.default_name(), "fallback.local");
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn issuance_failure_is_reported() {
        struct BrokenStore;
        impl CertificateStore for BrokenStore {
            fn get(&self, _name: &str) -> Result<CertificateRecord, StoreError> {
                Err(StoreError::Backend("unavailable".into()))
            }
            fn put(&self, _record: &CertificateRecord) -> Result<(), StoreError> {
                Ok(())
            }
        }

        let binding = binding_with_store(Arc::new(BrokenStore));
        let err = binding.certificate_for(Some("x.test")).await.unwrap_err();
        assert!(matches!(
            err,
            BindingError::Issuance(IssuanceError::Lookup { .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mismatched_cached_key_is_fatal() {
        let (store, binding) = binding();
        let factory = SigningFactory::new(root_ca());
        let a = factory.create("mix.test").unwrap();
        let b = factory.create("mix.test").unwrap();
        store
            .put(&CertificateRecord::new("mix.test", a.cert_pem, b.key_pem, a.created_at))
            .unwrap();

        let err = binding.certificate_for(Some("mix.test")).await.unwrap_err();
        assert!(matches!(err, BindingError::KeyMismatch { name } if name == "mix.test"));
    }

    #[test]
    fn empty_certificate_is_rejected() {
        let record = CertificateRecord::new("empty.test", Vec::new(), Vec::new(), 0);
        assert!(matches!(
            ServedCertificate::from_record(&record),
            Err(BindingError::Certificate { .. })
        ));
    }

    #[test]
    fn malformed_key_is_rejected() {
        let good = SigningFactory::new(root_ca()).create("key.test").unwrap();
        let record = CertificateRecord::new("key.test", good.cert_pem, b"nope".to_vec(), 0);
        assert!(matches!(
            ServedCertificate::from_record(&record),
            Err(BindingError::PrivateKey { .. })
        ));
    }

    #[test]
    fn install_sets_certificate_on_connection() {
        let record = SigningFactory::new(root_ca()).create("install.test").unwrap();
        let served = ServedCertificate::from_record(&record).unwrap();

        let ctx = SslContext::builder(SslMethod::tls()).unwrap().build();
        let mut ssl = Ssl::new(&ctx).unwrap();
        served.install(&mut ssl).unwrap();

        let installed = ssl.certificate().unwrap();
        assert_eq!(
            installed.to_der().unwrap(),
            served.certificate.to_der().unwrap()
        );
    }
}

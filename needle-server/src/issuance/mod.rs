//! Get-or-create issuance over a certificate store and a signing factory
//!
//! Every lookup for a name runs inside that name's critical section, so
//! concurrent cold handshakes for one host cause a single issuance. Store
//! I/O and RSA key generation run on the blocking pool.

mod locks;

pub use locks::{NameGuard, NameLocks};

use crate::pki::{CertificateFactory, FactoryError};
use needle_core::{CertificateRecord, CertificateStore, StoreError};
use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum IssuanceError {
    #[error("certificate lookup failed for {name}: {source}")]
    Lookup {
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("certificate creation failed for {name}: {source}")]
    Create {
        name: String,
        #[source]
        source: FactoryError,
    },

    #[error("certificate persistence failed for {name}: {source}")]
    Persist {
        name: String,
        #[source]
        source: StoreError,
    },

    #[error("issuance worker for {name} did not complete: {reason}")]
    Worker { name: String, reason: String },
}

impl IssuanceError {
    pub fn name(&self) -> &str {
        match self {
            IssuanceError::Lookup { name, .. }
            | IssuanceError::Create { name, .. }
            | IssuanceError::Persist { name, .. }
            | IssuanceError::Worker { name, .. } => name,
        }
    }
}

pub struct IssuanceService {
    store: Arc<dyn CertificateStore>,
    factory: Arc<dyn CertificateFactory>,
    locks: NameLocks,
}

impl IssuanceService {
    pub fn new(store: Arc<dyn CertificateStore>, factory: Arc<dyn CertificateFactory>) -> Self {
        Self {
            store,
            factory,
            locks: NameLocks::new(),
        }
    }

    /// Return the cached certificate for `name`, issuing and persisting one on a miss.
    ///
    /// Cached records are returned as stored, without any expiry check.
    pub async fn get_or_create(&self, name: &str) -> Result<CertificateRecord, IssuanceError> {
        let guard = self.locks.acquire(name).await;
        let store = self.store.clone();
        let factory = self.factory.clone();

        // The worker owns the guard: a caller that stops waiting leaves the
        // name locked until the record is persisted.
        tokio::task::spawn_blocking(move || {
            let guard = guard;
            get_or_create_locked(store.as_ref(), factory.as_ref(), guard.name())
        })
        .await
        .map_err(|e| IssuanceError::Worker {
            name: name.to_string(),
            reason: e.to_string(),
        })?
    }

    /// Names with an issuance in flight or waiting.
    pub fn pending_names(&self) -> usize {
        self.locks.len()
    }
}

fn get_or_create_locked(
    store: &dyn CertificateStore,
    factory: &dyn CertificateFactory,
    name: &str,
) -> Result<CertificateRecord, IssuanceError> {
    match store.get(name) {
        Ok(record) => {
            tracing::debug!(hostname = name, "Certificate cache hit");
            return Ok(record);
        }
        Err(StoreError::NotFound(_)) => {}
        Err(source) => {
            return Err(IssuanceError::Lookup {
                name: name.to_string(),
                source,
            });
        }
    }

    let record = factory.create(name).map_err(|source| IssuanceError::Create {
        name: name.to_string(),
        source,
    })?;
    store.put(&record).map_err(|source| IssuanceError::Persist {
        name: name.to_string(),
        source,
    })?;

    tracing::info!(
        hostname = name,
        created_at = record.created_at,
        "Issued new certificate"
    );
    Ok(record)
}

use crate::CertificateRecord;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// No record exists for the name. Callers treat this as "issue one".
    #[error("certificate not found: {0}")]
    NotFound(String),

    #[error("store backend error: {0}")]
    Backend(String),

    #[error("invalid data: {0}")]
    InvalidData(String),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

/// Persistent name -> certificate mapping.
///
/// Implementations must give per-key read-your-writes: a `put` followed by a
/// `get` of the same name, with no other writer, observes the write. Writers
/// to the same name are serialized by the issuance service, not the store.
pub trait CertificateStore: Send + Sync {
    fn get(&self, name: &str) -> Result<CertificateRecord, StoreError>;

    /// Upsert keyed by `record.name`.
    fn put(&self, record: &CertificateRecord) -> Result<(), StoreError>;
}

/// Process-local test store. Nothing is persisted; the server always uses SQLite.
#[derive(Debug, Default)]
pub struct MemoryCertificateStore {
    records: RwLock<HashMap<String, CertificateRecord>>,
}

impl MemoryCertificateStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

impl CertificateStore for MemoryCertificateStore {
    fn get(&self, name: &str) -> Result<CertificateRecord, StoreError> {
        self.records
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| StoreError::NotFound(name.to_string()))
    }

    fn put(&self, record: &CertificateRecord) -> Result<(), StoreError> {
        self.records
            .write()
            .insert(record.name.clone(), record.clone());
        Ok(())
    }
}

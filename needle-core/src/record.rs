use serde::{Deserialize, Serialize};

/// One issued leaf certificate.
///
/// Records are keyed by `name` and never updated in place once stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CertificateRecord {
    /// Hostname or literal IP address the certificate was issued for
    pub name: String,
    /// PEM `CERTIFICATE` block
    pub cert_pem: Vec<u8>,
    /// PEM `RSA PRIVATE KEY` block (PKCS#1)
    pub key_pem: Vec<u8>,
    /// Issuance time, unix seconds
    pub created_at: i64,
}

impl CertificateRecord {
    pub fn new(
        name: impl Into<String>,
        cert_pem: Vec<u8>,
        key_pem: Vec<u8>,
        created_at: i64,
    ) -> Self {
        Self {
            name: name.into(),
            cert_pem,
            key_pem,
            created_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_serializes_with_snake_case_fields() {
        let record = CertificateRecord::new("a.test", b"cert".to_vec(), b"key".to_vec(), 42);
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["name"], "a.test");
        assert_eq!(json["created_at"], 42);
        assert!(json["cert_pem"].is_array());
        assert!(json["key_pem"].is_array());

        let back: CertificateRecord = serde_json::from_value(json).unwrap();
        assert_eq!(back, record);
    }
}

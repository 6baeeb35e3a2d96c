use needle_core::CertificateRecord;
use serde::Serialize;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;
use x509_parser::extensions::GeneralName;
use x509_parser::pem::parse_x509_pem;
use x509_parser::prelude::*;

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("Failed to decode PEM for {name}: {reason}")]
    Pem { name: String, reason: String },
    #[error("Failed to parse certificate for {name}: {reason}")]
    Certificate { name: String, reason: String },
}

/// Decoded view of a cached certificate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CertificateSummary {
    pub name: String,
    pub created_at: i64,
    pub common_name: Option<String>,
    /// Colon-separated hex
    pub serial: String,
    pub not_before: i64,
    pub not_after: i64,
    pub dns_names: Vec<String>,
    pub ip_addresses: Vec<IpAddr>,
    pub server_auth: bool,
    pub client_auth: bool,
    pub digital_signature: bool,
    pub is_ca: bool,
}

impl CertificateSummary {
    pub fn from_record(record: &CertificateRecord) -> Result<Self, SummaryError> {
        let (_, pem) = parse_x509_pem(&record.cert_pem).map_err(|e| SummaryError::Pem {
            name: record.name.clone(),
            reason: e.to_string(),
        })?;
        let (_, cert) = X509Certificate::from_der(pem.contents.as_slice()).map_err(|e| {
            SummaryError::Certificate {
                name: record.name.clone(),
                reason: e.to_string(),
            }
        })?;

        let common_name = cert
            .subject()
            .iter_common_name()
            .next()
            .and_then(|cn| cn.as_str().ok())
            .map(str::to_string);

        let mut dns_names = Vec::new();
        let mut ip_addresses = Vec::new();
        if let Ok(Some(san)) = cert.subject_alternative_name() {
            for name in san.value.general_names.iter() {
                match name {
                    GeneralName::DNSName(dns) => dns_names.push(dns.to_string()),
                    GeneralName::IPAddress(bytes) => {
                        if let Some(ip) = ip_from_bytes(bytes) {
                            ip_addresses.push(ip);
                        }
                    }
                    _ => {}
                }
            }
        }

        let (server_auth, client_auth) = match cert.extended_key_usage() {
            Ok(Some(eku)) => (eku.value.server_auth, eku.value.client_auth),
            _ => (false, false),
        };
        let digital_signature = matches!(
            cert.key_usage(),
            Ok(Some(ku)) if ku.value.digital_signature()
        );
        let is_ca = matches!(cert.basic_constraints(), Ok(Some(bc)) if bc.value.ca);

        Ok(Self {
            name: record.name.clone(),
            created_at: record.created_at,
            common_name,
            serial: cert.raw_serial_as_string(),
            not_before: cert.validity().not_before.timestamp(),
            not_after: cert.validity().not_after.timestamp(),
            dns_names,
            ip_addresses,
            server_auth,
            client_auth,
            digital_signature,
            is_ca,
        })
    }

    pub fn is_expired_at(&self, unix_seconds: i64) -> bool {
        unix_seconds > self.not_after
    }
}

fn ip_from_bytes(bytes: &[u8]) -> Option<IpAddr> {
    match bytes.len() {
        4 => <[u8; 4]>::try_from(bytes)
            .ok()
            .map(|b| IpAddr::V4(Ipv4Addr::from(b))),
        16 => <[u8; 16]>::try_from(bytes)
            .ok()
            .map(|b| IpAddr::V6(Ipv6Addr::from(b))),
        _ => None,
    }
}

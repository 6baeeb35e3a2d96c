//! Leaf certificate issuance
//!
//! Handles:
//! - Loading, generating and saving the root CA keypair
//! - Signing per-name leaf certificates with that root
//! - Inspecting issued certificates for administrative listings

mod factory;
mod root_ca;
mod summary;

pub use factory::{CertificateFactory, FactoryError, SigningFactory};
pub use root_ca::{CaError, DEFAULT_CA_COMMON_NAME, RootCa};
pub use summary::{CertificateSummary, SummaryError};

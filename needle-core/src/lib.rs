//! Needle Core - Shared certificate types
//!
//! This crate contains the types shared by everything that issues, stores or
//! serves Needle leaf certificates:
//! - `CertificateRecord`, the unit the store persists
//! - the `CertificateStore` contract and its in-memory implementation
//! - the handshake name policy (SNI or configured default)
//!
//! The TLS stack, the signing factory and the SQLite backend live in
//! `needle-server`.

mod record;
mod server_name;
mod store;

pub use record::*;
pub use server_name::*;
pub use store::*;

//! Needle Server - on-demand leaf certificates for any SNI name
//!
//! A TLS endpoint that never needs certificates provisioned ahead of time:
//! the first handshake for a host issues a leaf certificate signed by a local
//! root CA, caches it in SQLite, and every later handshake reuses it.
//!
//! - `pki`: root CA material and the signing factory
//! - `issuance`: get-or-create with one issuance per name
//! - `store`: SQLite certificate cache
//! - `tls`: pingora certificate callback
//! - `proxy`: HTTP endpoints and server assembly

pub mod config;
pub mod defaults;
pub mod issuance;
pub mod pki;
pub mod proxy;
pub mod store;
pub mod tls;

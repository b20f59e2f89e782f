//! # Active Directory LDAP transport
//!
//! The protocol half of adlink: finding domain controllers, authenticating,
//! pooling connections, and the [`AdClient`] that implements
//! [`Directory`](adlink_core::traits::Directory) on top of them.
//!
//! ## Features
//!
//! - DNS SRV discovery (`_ldap._tcp`, `_kerberos._tcp`) with RFC 2782 ordering
//! - Plain LDAP, StartTLS and LDAPS with an optional private CA
//! - Simple bind and, with the `gssapi` feature, Kerberos via keytab,
//!   credential cache or password
//! - Bounded connection pool with health checks, idle reaping and endpoint
//!   failover
//! - Paged searches
//!
//! ## Example
//!
//! ```ignore
//! use adlink_core::prelude::*;
//! use adlink_ldap::AdClient;
//!
//! let config = ClientConfig::new(
//!     "corp.example.com",
//!     AuthConfig::password("svc-adlink@corp.example.com", "secret"),
//! );
//! let client = AdClient::connect(config).await?;
//!
//! let group = client.groups().create(&NewGroup::new("Engineering")).await?;
//! client
//!     .groups()
//!     .set_members(&group.guid, &["alice", "CORP\\bob"])
//!     .await?;
//! ```

pub mod auth;
pub mod client;
pub mod discovery;
pub mod kerberos;
pub mod pool;
pub mod session;

// Re-exports
pub use auth::Authenticator;
pub use client::AdClient;
pub use discovery::{Discovery, DnsSrvResolver, Endpoint, SrvRecord, SrvResolver, Transport};
pub use pool::{ConnectionFactory, ConnectionPool, PoolGuard, PoolStats, PooledConnection};
pub use session::{LdapSession, SessionFactory, TlsSettings};

//! Directory connector with ordered failover.
//!
//! A [`DirectoryConnector`] holds a list of candidate LDAP servers, pins the
//! first one accepting a bind, and serves account lookups and credential
//! verification against it.

#![forbid(unsafe_code)]

pub mod auth;
pub mod config;
pub mod connector;
pub mod directory;
pub mod error;
pub mod telemetry;

pub use auth::{AuthFailure, Authenticator, LdapAuthenticator, Verification};
pub use config::{Attributes, Configuration, ServerConfig};
pub use connector::{
    AuthOutcome, BindFailure, BindIdentity, DirectoryConnector, SessionState,
};
pub use directory::{
    Credentials, DirectoryClient, DirectoryEntry, DirectoryHandle,
    SearchRequest, SearchScope,
};
pub use error::{ConnectorError, DirectoryError, Result};
pub use telemetry::{Logger, Severity, TracingLogger};

//! Directory client abstraction.
//!
//! The connector never talks to the wire itself: it opens a
//! [`DirectoryHandle`] through a [`DirectoryClient`] for each candidate
//! server, binds it, then runs searches on the pinned handle.

pub mod ldap;

use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::ServerConfig;
use crate::error::DirectoryError;

pub use ldap::LdapClient;

/// Username and password pair.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl Credentials {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Static bind identity of a server, if configured.
    pub fn from_server(server: &ServerConfig) -> Option<Self> {
        match (&server.username, &server.password) {
            (Some(username), Some(password)) => {
                Some(Self::new(username, password))
            },
            _ => None,
        }
    }
}

// Keep passwords out of logs.
impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"********")
            .finish()
    }
}

/// Search depth below the base DN.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchScope {
    /// Immediate children of the base DN only.
    OneLevel,
    Subtree,
}

impl From<SearchScope> for ldap3::Scope {
    fn from(val: SearchScope) -> Self {
        match val {
            SearchScope::OneLevel => ldap3::Scope::OneLevel,
            SearchScope::Subtree => ldap3::Scope::Subtree,
        }
    }
}

/// Filtered search under a base DN.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchRequest {
    pub base_dn: String,
    pub scope: SearchScope,
    pub filter: String,
    /// Attribute to order results by.
    pub sort_by: Option<String>,
}

impl SearchRequest {
    /// Create a new [`SearchRequest`] without ordering.
    pub fn new(
        base_dn: impl Into<String>,
        scope: SearchScope,
        filter: impl Into<String>,
    ) -> Self {
        Self {
            base_dn: base_dn.into(),
            scope,
            filter: filter.into(),
            sort_by: None,
        }
    }

    /// Order results by `attribute`.
    pub fn sort_by(mut self, attribute: impl Into<String>) -> Self {
        self.sort_by = Some(attribute.into());
        self
    }
}

/// One directory entry with its full attribute set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DirectoryEntry {
    pub dn: String,
    pub attrs: HashMap<String, Vec<String>>,
    /// Values that are not valid UTF-8, such as `objectGUID` or `objectSid`.
    pub bin_attrs: HashMap<String, Vec<Vec<u8>>>,
}

impl DirectoryEntry {
    pub fn new(dn: impl Into<String>) -> Self {
        Self {
            dn: dn.into(),
            attrs: HashMap::new(),
            bin_attrs: HashMap::new(),
        }
    }

    /// Add a value to `name`.
    pub fn with_attr(
        mut self,
        name: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.attrs.entry(name.into()).or_default().push(value.into());
        self
    }

    /// First value of an attribute. Lookup is case-insensitive, as attribute
    /// names are in LDAP.
    pub fn first(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key.eq_ignore_ascii_case(name))
            .and_then(|(_, values)| values.first())
            .map(String::as_str)
    }
}

impl From<ldap3::SearchEntry> for DirectoryEntry {
    fn from(entry: ldap3::SearchEntry) -> Self {
        Self {
            dn: entry.dn,
            attrs: entry.attrs,
            bin_attrs: entry.bin_attrs,
        }
    }
}

/// Opens handles on candidate servers.
#[async_trait]
pub trait DirectoryClient: fmt::Debug + Send + Sync {
    /// Open a connection scoped to `server`. No bind is performed.
    async fn open(
        &self,
        server: &ServerConfig,
    ) -> Result<Box<dyn DirectoryHandle>, DirectoryError>;
}

/// Live session on one server.
#[async_trait]
pub trait DirectoryHandle: Send {
    /// Bind with `credentials`, or anonymously when `None`.
    async fn bind(
        &mut self,
        credentials: Option<&Credentials>,
    ) -> Result<(), DirectoryError>;

    /// Execute `request` and return matching entries in server order.
    async fn search(
        &mut self,
        request: &SearchRequest,
    ) -> Result<Vec<DirectoryEntry>, DirectoryError>;

    /// Close the session.
    async fn unbind(&mut self) -> Result<(), DirectoryError>;
}

/// Build an equality filter, escaping `value`.
pub fn equality_filter(attribute: &str, value: &str) -> String {
    format!("({attribute}={})", ldap3::ldap_escape(value))
}

/// Stable sort by the first value of `attribute`. Entries lacking it go last.
pub fn sort_entries(entries: &mut [DirectoryEntry], attribute: &str) {
    entries.sort_by(|a, b| match (a.first(attribute), b.first(attribute)) {
        (Some(a), Some(b)) => a.to_lowercase().cmp(&b.to_lowercase()),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}

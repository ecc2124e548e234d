//! LDAP support.

use std::time::Duration;

use async_trait::async_trait;
use ldap3::{Ldap as Ldap3, LdapConnAsync, LdapConnSettings, SearchEntry};

use super::{
    Credentials, DirectoryClient, DirectoryEntry, DirectoryHandle,
    SearchRequest, sort_entries,
};
use crate::config::ServerConfig;
use crate::error::DirectoryError;

/// Every attribute of matched entries.
const ALL_ATTRIBUTES: &str = "*";

/// Opens [`ldap3`] connections.
#[derive(Debug, Clone)]
pub struct LdapClient {
    timeout: Duration,
}

impl LdapClient {
    /// Create a new [`LdapClient`] with a connection timeout.
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl DirectoryClient for LdapClient {
    async fn open(
        &self,
        server: &ServerConfig,
    ) -> Result<Box<dyn DirectoryHandle>, DirectoryError> {
        let settings = LdapConnSettings::new()
            .set_conn_timeout(self.timeout)
            .set_starttls(server.starttls);

        let (conn, ldap) =
            LdapConnAsync::with_settings(settings, &server.url).await?;

        let url = server.url.clone();
        tokio::spawn(async move {
            if let Err(err) = conn.drive().await {
                tracing::warn!(
                    error = %err,
                    %url,
                    "LDAP connection driver error"
                );
            }
        });

        Ok(Box::new(LdapHandle { conn: ldap }))
    }
}

/// Bound (or bindable) [`ldap3`] session.
pub struct LdapHandle {
    conn: Ldap3,
}

#[async_trait]
impl DirectoryHandle for LdapHandle {
    async fn bind(
        &mut self,
        credentials: Option<&Credentials>,
    ) -> Result<(), DirectoryError> {
        let (dn, password) = match credentials {
            Some(creds) => (creds.username.as_str(), creds.password.as_str()),
            None => ("", ""),
        };

        self.conn.simple_bind(dn, password).await?.success()?;
        Ok(())
    }

    async fn search(
        &mut self,
        request: &SearchRequest,
    ) -> Result<Vec<DirectoryEntry>, DirectoryError> {
        let (results, _) = self
            .conn
            .search(
                &request.base_dn,
                request.scope.into(),
                &request.filter,
                vec![ALL_ATTRIBUTES],
            )
            .await?
            .success()?;

        let mut entries: Vec<DirectoryEntry> = results
            .into_iter()
            .map(|entry| SearchEntry::construct(entry).into())
            .collect();

        if let Some(attribute) = &request.sort_by {
            sort_entries(&mut entries, attribute);
        }

        Ok(entries)
    }

    async fn unbind(&mut self) -> Result<(), DirectoryError> {
        self.conn.unbind().await?;
        Ok(())
    }
}

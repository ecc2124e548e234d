//! Failover-aware directory connector.
//!
//! Candidate servers are tried in configured order and the first one that
//! accepts a bind is pinned. Every later lookup and authentication runs on
//! that server until [`DirectoryConnector::reset`] or a new selection pass.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;

use crate::auth::{AuthFailure, Authenticator, LdapAuthenticator, Verification};
use crate::config::{Attributes, Configuration, ServerConfig};
use crate::directory::{
    Credentials, DirectoryClient, DirectoryEntry, DirectoryHandle, LdapClient,
    SearchRequest, SearchScope, equality_filter,
};
use crate::error::{ConnectorError, DirectoryError, Result};
use crate::telemetry::{ConnectorLog, Logger, Severity};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Bind refused by one server during selection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindFailure {
    /// Server URL.
    pub server: String,
    pub message: String,
}

impl fmt::Display for BindFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bind failed on {}: {}", self.server, self.message)
    }
}

/// Identity the pinned handle is bound with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindIdentity {
    Anonymous,
    /// Static credentials from the server configuration.
    Static(String),
    /// User verified by [`DirectoryConnector::authenticate`].
    User(String),
}

/// Snapshot of the connector session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    Unbound,
    /// Last selection pass found no server.
    Unavailable,
    Bound {
        server: String,
        identity: BindIdentity,
    },
}

/// Outcome of [`DirectoryConnector::authenticate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    Authenticated,
    Rejected(Vec<AuthFailure>),
}

impl AuthOutcome {
    pub fn is_authenticated(&self) -> bool {
        matches!(self, AuthOutcome::Authenticated)
    }
}

#[derive(Default)]
struct Session {
    /// Index of the pinned server.
    active: Option<usize>,
    handle: Option<Box<dyn DirectoryHandle>>,
    identity: Option<BindIdentity>,
    errors: Vec<BindFailure>,
    unavailable: bool,
    /// Verified identities, keyed by server index.
    users: HashMap<usize, Credentials>,
}

/// Directory connector.
pub struct DirectoryConnector {
    servers: Vec<ServerConfig>,
    attributes: Attributes,
    timeout: Duration,
    client: Arc<dyn DirectoryClient>,
    authenticator: Arc<dyn Authenticator>,
    /// Caller-supplied collaborators are never rebuilt by the builders.
    custom_client: bool,
    custom_authenticator: bool,
    log: ConnectorLog,
    session: Mutex<Session>,
}

impl DirectoryConnector {
    /// Create a new [`DirectoryConnector`] backed by [`ldap3`].
    ///
    /// No network activity happens until the first operation.
    pub fn new(
        servers: Vec<ServerConfig>,
        logger: Arc<dyn Logger>,
        log_enabled: bool,
    ) -> Self {
        let attributes = Attributes::default();
        let client: Arc<dyn DirectoryClient> =
            Arc::new(LdapClient::new(DEFAULT_TIMEOUT));
        let authenticator = Arc::new(LdapAuthenticator::new(
            client.clone(),
            attributes.clone(),
        ));

        Self {
            servers,
            attributes,
            timeout: DEFAULT_TIMEOUT,
            client,
            authenticator,
            custom_client: false,
            custom_authenticator: false,
            log: ConnectorLog::new(logger, log_enabled),
            session: Mutex::new(Session::default()),
        }
    }

    /// Create a connector from a loaded [`Configuration`].
    pub fn from_config(
        config: &Configuration,
        logger: Arc<dyn Logger>,
    ) -> Self {
        let mut connector =
            Self::new(config.servers.clone(), logger, config.log_enabled);
        connector.attributes = config.attributes.clone();
        connector.with_timeout(config.timeout())
    }

    /// Replace the directory client. Unless a custom authenticator was
    /// supplied, the default one is rebuilt on top of it.
    pub fn with_client(mut self, client: Arc<dyn DirectoryClient>) -> Self {
        self.client = client;
        self.custom_client = true;
        self.rebuild_authenticator();
        self
    }

    /// Replace the authentication service. Later builder calls keep it.
    pub fn with_authenticator(
        mut self,
        authenticator: Arc<dyn Authenticator>,
    ) -> Self {
        self.authenticator = authenticator;
        self.custom_authenticator = true;
        self
    }

    /// Bound each bind, search and verification attempt. The default
    /// [`LdapClient`] connects within the same timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        if !self.custom_client {
            self.client = Arc::new(LdapClient::new(timeout));
            self.rebuild_authenticator();
        }
        self
    }

    fn rebuild_authenticator(&mut self) {
        if !self.custom_authenticator {
            self.authenticator = Arc::new(LdapAuthenticator::new(
                self.client.clone(),
                self.attributes.clone(),
            ));
        }
    }

    pub fn servers(&self) -> &[ServerConfig] {
        &self.servers
    }

    /// Try every server in order and pin the first that accepts a bind.
    ///
    /// Always runs a full pass: the previous handle is released and the
    /// error log is rebuilt.
    pub async fn select_active_server(&self) -> Result<ServerConfig> {
        let mut session = self.session.lock().await;
        self.select(&mut session).await
    }

    /// Search the subtree for an account name, sorted by surname.
    pub async fn find_by_username(
        &self,
        username: &str,
    ) -> Result<DirectoryEntry> {
        let mut session = self.session.lock().await;
        let server = self.ensure_active(&mut session).await?;

        self.log.notice(format!(
            "attempting to get username {username} under {} \
             against the active server",
            server.base_dn
        ));

        let filter = equality_filter(&self.attributes.account, username);
        let request =
            SearchRequest::new(&server.base_dn, SearchScope::Subtree, &filter)
                .sort_by(&self.attributes.sort);

        let entry = self
            .search(&mut session, &server, &request)
            .await?
            .into_iter()
            .next()
            .ok_or(ConnectorError::NotFound { filter })?;

        self.log.dump("username entry lookup response", &entry);
        Ok(entry)
    }

    /// Search the direct children of the base DN by email.
    pub async fn find_by_email(
        &self,
        email: &str,
    ) -> Result<Option<DirectoryEntry>> {
        self.log.notice(format!(
            "attempting to search by email for {email} \
             against the active server"
        ));
        self.find_one_level(&self.attributes.mail, email).await
    }

    /// Search the direct children of the base DN by numeric identifier.
    pub async fn find_by_id(&self, id: u64) -> Result<Option<DirectoryEntry>> {
        self.log.notice(format!(
            "attempting to search by {} for {id} against the active server",
            self.attributes.id
        ));
        self.find_one_level(&self.attributes.id, &id.to_string())
            .await
    }

    /// Verify `username`/`password` on the active server.
    ///
    /// On success the verified session replaces the pinned handle and the
    /// identity is kept for later selection passes on that server.
    /// Rejections are not errors; only a missing server is.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<AuthOutcome> {
        let mut session = self.session.lock().await;
        let server = self.ensure_active(&mut session).await?;

        self.log.notice(format!("attempting to authenticate {username}"));

        if username.is_empty() || password.is_empty() {
            let reasons = vec![AuthFailure::EmptyCredentials];
            self.log_rejection(username, &reasons);
            return Ok(AuthOutcome::Rejected(reasons));
        }

        let credentials = Credentials::new(username, password);
        let verification = match tokio::time::timeout(
            self.timeout,
            self.authenticator.verify(&server, &credentials),
        )
        .await
        {
            Ok(verification) => verification,
            Err(_) => Verification::Invalid(vec![AuthFailure::ServerUnreachable(
                DirectoryError::Timeout(self.timeout).to_string(),
            )]),
        };

        match verification {
            Verification::Valid { handle, bind_dn } => {
                self.log.notice(format!("{username} logged in successfully"));

                if let Some(mut previous) = session.handle.replace(handle) {
                    self.release(previous.as_mut()).await;
                }
                session.identity =
                    Some(BindIdentity::User(username.to_owned()));
                if let Some(index) = session.active {
                    session
                        .users
                        .insert(index, Credentials::new(bind_dn, password));
                }

                Ok(AuthOutcome::Authenticated)
            },
            Verification::Invalid(reasons) => {
                self.log_rejection(username, &reasons);
                Ok(AuthOutcome::Rejected(reasons))
            },
        }
    }

    /// Back to unbound: the handle is released, and the error log and
    /// verified identities are cleared.
    pub async fn reset(&self) {
        let mut session = self.session.lock().await;
        if let Some(mut handle) = session.handle.take() {
            self.release(handle.as_mut()).await;
        }
        *session = Session::default();
        self.log.notice("session reset");
    }

    pub async fn state(&self) -> SessionState {
        let session = self.session.lock().await;
        match (session.active, &session.identity) {
            (Some(index), Some(identity)) => SessionState::Bound {
                server: self.servers[index].url.clone(),
                identity: identity.clone(),
            },
            _ if session.unavailable => SessionState::Unavailable,
            _ => SessionState::Unbound,
        }
    }

    /// Pinned server, if any.
    pub async fn active_server(&self) -> Option<ServerConfig> {
        let session = self.session.lock().await;
        session.active.map(|index| self.servers[index].clone())
    }

    /// Bind failures of the most recent selection pass.
    pub async fn errors(&self) -> Vec<BindFailure> {
        self.session.lock().await.errors.clone()
    }

    async fn select(&self, session: &mut Session) -> Result<ServerConfig> {
        if let Some(mut handle) = session.handle.take() {
            self.release(handle.as_mut()).await;
        }
        session.active = None;
        session.identity = None;
        session.unavailable = false;
        session.errors.clear();

        for (index, server) in self.servers.iter().enumerate() {
            self.log.notice(format!("attempting bind with {}", server.url));

            match self.bind_server(session, index, server).await {
                Ok((handle, identity)) => {
                    self.log.notice(format!(
                        "bind successful, setting active server {}",
                        server.url
                    ));
                    session.active = Some(index);
                    session.handle = Some(handle);
                    session.identity = Some(identity);
                    return Ok(server.clone());
                },
                Err(err) => {
                    let failure = BindFailure {
                        server: server.url.clone(),
                        message: err.to_string(),
                    };
                    self.log.warn(failure.to_string());
                    session.errors.push(failure);
                },
            }
        }

        session.unavailable = true;
        self.log.log(
            Severity::Error,
            format!(
                "no directory server accepted the bind ({} tried)",
                self.servers.len()
            ),
        );
        Err(ConnectorError::NoServerAvailable {
            failures: session.errors.clone(),
        })
    }

    /// Bind one candidate, preferring the identity verified on it.
    ///
    /// A verified identity the server refuses is retried with the static or
    /// anonymous identity, and forgotten if that bind succeeds.
    async fn bind_server(
        &self,
        session: &mut Session,
        index: usize,
        server: &ServerConfig,
    ) -> std::result::Result<
        (Box<dyn DirectoryHandle>, BindIdentity),
        DirectoryError,
    > {
        let stale = match session.users.get(&index).cloned() {
            Some(user) => match self.bind(server, Some(&user)).await {
                Ok(handle) => {
                    return Ok((handle, BindIdentity::User(user.username)));
                },
                Err(err) => {
                    self.log.warn(format!(
                        "{} no longer binds on {}: {err}",
                        user.username, server.url
                    ));
                    true
                },
            },
            None => false,
        };

        let (credentials, identity) = match Credentials::from_server(server) {
            Some(creds) => {
                let name = creds.username.clone();
                (Some(creds), BindIdentity::Static(name))
            },
            None => (None, BindIdentity::Anonymous),
        };
        let handle = self.bind(server, credentials.as_ref()).await?;

        if stale {
            session.users.remove(&index);
        }
        Ok((handle, identity))
    }

    /// Pinned server, running a selection pass if none is.
    async fn ensure_active(
        &self,
        session: &mut Session,
    ) -> Result<ServerConfig> {
        if let (Some(index), true) = (session.active, session.handle.is_some())
        {
            return Ok(self.servers[index].clone());
        }
        self.select(session).await
    }

    async fn bind(
        &self,
        server: &ServerConfig,
        credentials: Option<&Credentials>,
    ) -> std::result::Result<Box<dyn DirectoryHandle>, DirectoryError> {
        self.bounded(async {
            let mut handle = self.client.open(server).await?;
            handle.bind(credentials).await?;
            Ok(handle)
        })
        .await
    }

    async fn search(
        &self,
        session: &mut Session,
        server: &ServerConfig,
        request: &SearchRequest,
    ) -> Result<Vec<DirectoryEntry>> {
        let Some(handle) = session.handle.as_mut() else {
            return Err(ConnectorError::NoServerAvailable {
                failures: session.errors.clone(),
            });
        };

        match self.bounded(handle.search(request)).await {
            Ok(entries) => {
                self.log.dump("raw directory result", &entries);
                Ok(entries)
            },
            Err(source) => {
                self.log.warn(format!(
                    "search {} on {} failed: {source}",
                    request.filter, server.url
                ));
                Err(ConnectorError::Search {
                    server: server.url.clone(),
                    source,
                })
            },
        }
    }

    async fn find_one_level(
        &self,
        attribute: &str,
        value: &str,
    ) -> Result<Option<DirectoryEntry>> {
        let mut session = self.session.lock().await;
        let server = self.ensure_active(&mut session).await?;

        let request = SearchRequest::new(
            &server.base_dn,
            SearchScope::OneLevel,
            equality_filter(attribute, value),
        );
        let entry = self
            .search(&mut session, &server, &request)
            .await?
            .into_iter()
            .next();

        if let Some(entry) = &entry {
            self.log.dump("first match", entry);
        }
        Ok(entry)
    }

    /// Best-effort unbind of a handle being dropped.
    async fn release(&self, handle: &mut dyn DirectoryHandle) {
        if let Err(err) = self.bounded(handle.unbind()).await {
            self.log
                .log(Severity::Debug, format!("unbind failed: {err}"));
        }
    }

    async fn bounded<T>(
        &self,
        operation: impl Future<Output = std::result::Result<T, DirectoryError>>,
    ) -> std::result::Result<T, DirectoryError> {
        tokio::time::timeout(self.timeout, operation)
            .await
            .map_err(|_| DirectoryError::Timeout(self.timeout))?
    }

    fn log_rejection(&self, username: &str, reasons: &[AuthFailure]) {
        let reasons = reasons
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        self.log
            .warn(format!("{username} authentication failed: {reasons}"));
    }
}

impl fmt::Debug for DirectoryConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DirectoryConnector")
            .field("servers", &self.servers)
            .field("timeout", &self.timeout)
            .field("client", &self.client)
            .field("log", &self.log)
            .finish_non_exhaustive()
    }
}

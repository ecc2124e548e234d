//! Credential verification against a directory server.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::config::{Attributes, ServerConfig};
use crate::directory::{
    Credentials, DirectoryClient, DirectoryHandle, SearchRequest, SearchScope,
    equality_filter,
};
use crate::error::DirectoryError;

/// LDAP `invalidCredentials` result code.
const INVALID_CREDENTIALS: u32 = 49;

/// Why a verification was refused.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    EmptyCredentials,
    InvalidCredentials,
    AccountNotFound,
    /// More than one entry matches the username.
    AmbiguousAccount,
    AccountLocked,
    AccountDisabled,
    PasswordExpired,
    ServerUnreachable(String),
    Other(String),
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthFailure::EmptyCredentials => {
                f.write_str("username and password are required")
            },
            AuthFailure::InvalidCredentials => {
                f.write_str("invalid credentials")
            },
            AuthFailure::AccountNotFound => f.write_str("account not found"),
            AuthFailure::AmbiguousAccount => {
                f.write_str("more than one account matches")
            },
            AuthFailure::AccountLocked => f.write_str("account is locked"),
            AuthFailure::AccountDisabled => f.write_str("account is disabled"),
            AuthFailure::PasswordExpired => f.write_str("password has expired"),
            AuthFailure::ServerUnreachable(err) => {
                write!(f, "server unreachable: {err}")
            },
            AuthFailure::Other(err) => f.write_str(err),
        }
    }
}

impl AuthFailure {
    /// Classify a failed bind.
    ///
    /// Active Directory appends a `data <hex>` sub-code to its
    /// `invalidCredentials` diagnostic.
    pub fn from_bind_error(err: &DirectoryError) -> Self {
        match (err.result_code(), err.diagnostic()) {
            (Some(INVALID_CREDENTIALS), Some(text)) => {
                let text = text.to_ascii_lowercase();
                if text.contains("data 775") {
                    AuthFailure::AccountLocked
                } else if text.contains("data 533") || text.contains("data 701")
                {
                    AuthFailure::AccountDisabled
                } else if text.contains("data 532") || text.contains("data 773")
                {
                    AuthFailure::PasswordExpired
                } else {
                    AuthFailure::InvalidCredentials
                }
            },
            (Some(INVALID_CREDENTIALS), None) => {
                AuthFailure::InvalidCredentials
            },
            (Some(_), _) => AuthFailure::Other(err.to_string()),
            (None, _) => AuthFailure::ServerUnreachable(err.to_string()),
        }
    }
}

/// Result of [`Authenticator::verify`].
pub enum Verification {
    /// Handle bound as the verified user, and the DN it is bound with.
    Valid {
        handle: Box<dyn DirectoryHandle>,
        bind_dn: String,
    },
    Invalid(Vec<AuthFailure>),
}

impl fmt::Debug for Verification {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verification::Valid { bind_dn, .. } => {
                f.debug_struct("Valid").field("bind_dn", bind_dn).finish()
            },
            Verification::Invalid(reasons) => {
                f.debug_tuple("Invalid").field(reasons).finish()
            },
        }
    }
}

/// Authentication service.
#[async_trait]
pub trait Authenticator: Send + Sync {
    async fn verify(
        &self,
        server: &ServerConfig,
        credentials: &Credentials,
    ) -> Verification;
}

/// Verifies credentials with a simple bind.
pub struct LdapAuthenticator {
    client: Arc<dyn DirectoryClient>,
    attributes: Attributes,
}

impl LdapAuthenticator {
    /// Create a new [`LdapAuthenticator`].
    pub fn new(
        client: Arc<dyn DirectoryClient>,
        attributes: Attributes,
    ) -> Self {
        Self { client, attributes }
    }

    /// Find the DN to bind as.
    async fn resolve_dn(
        &self,
        handle: &mut dyn DirectoryHandle,
        server: &ServerConfig,
        username: &str,
    ) -> Result<String, AuthFailure> {
        if username.contains('=') || username.contains('@') {
            return Ok(username.to_owned());
        }
        if let Some(domain) = &server.account_domain {
            return Ok(format!("{username}@{domain}"));
        }

        handle
            .bind(Credentials::from_server(server).as_ref())
            .await
            .map_err(|err| AuthFailure::ServerUnreachable(err.to_string()))?;

        let request = SearchRequest::new(
            &server.base_dn,
            SearchScope::Subtree,
            equality_filter(&self.attributes.account, username),
        );
        let mut entries = handle
            .search(&request)
            .await
            .map_err(|err| AuthFailure::Other(err.to_string()))?;

        match entries.len() {
            0 => Err(AuthFailure::AccountNotFound),
            1 => Ok(entries.remove(0).dn),
            _ => Err(AuthFailure::AmbiguousAccount),
        }
    }
}

#[async_trait]
impl Authenticator for LdapAuthenticator {
    async fn verify(
        &self,
        server: &ServerConfig,
        credentials: &Credentials,
    ) -> Verification {
        if credentials.username.is_empty() || credentials.password.is_empty() {
            return Verification::Invalid(vec![AuthFailure::EmptyCredentials]);
        }

        let mut handle = match self.client.open(server).await {
            Ok(handle) => handle,
            Err(err) => {
                return Verification::Invalid(vec![
                    AuthFailure::ServerUnreachable(err.to_string()),
                ]);
            },
        };

        let dn = match self
            .resolve_dn(handle.as_mut(), server, &credentials.username)
            .await
        {
            Ok(dn) => dn,
            Err(reason) => return Verification::Invalid(vec![reason]),
        };

        let user = Credentials::new(dn, &credentials.password);
        match handle.bind(Some(&user)).await {
            Ok(()) => Verification::Valid {
                handle,
                bind_dn: user.username,
            },
            Err(err) => {
                let mut reasons = vec![AuthFailure::from_bind_error(&err)];
                if let Some(text) = err.diagnostic().filter(|t| !t.is_empty()) {
                    reasons.push(AuthFailure::Other(text.to_owned()));
                }
                Verification::Invalid(reasons)
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::DirectoryEntry;
    use std::sync::Mutex;
    use std::time::Duration;

    /// Accepts one DN/password pair and serves a fixed entry set.
    #[derive(Debug)]
    struct OneUser {
        dn: &'static str,
        password: &'static str,
        entries: Vec<DirectoryEntry>,
        binds: Arc<Mutex<Vec<Option<String>>>>,
    }

    struct OneUserHandle {
        dn: &'static str,
        password: &'static str,
        entries: Vec<DirectoryEntry>,
        binds: Arc<Mutex<Vec<Option<String>>>>,
    }

    #[async_trait]
    impl DirectoryClient for OneUser {
        async fn open(
            &self,
            _server: &ServerConfig,
        ) -> Result<Box<dyn DirectoryHandle>, DirectoryError> {
            Ok(Box::new(OneUserHandle {
                dn: self.dn,
                password: self.password,
                entries: self.entries.clone(),
                binds: self.binds.clone(),
            }))
        }
    }

    #[async_trait]
    impl DirectoryHandle for OneUserHandle {
        async fn bind(
            &mut self,
            credentials: Option<&Credentials>,
        ) -> Result<(), DirectoryError> {
            self.binds
                .lock()
                .unwrap()
                .push(credentials.map(|c| c.username.clone()));
            match credentials {
                None => Ok(()),
                Some(c)
                    if c.username == self.dn && c.password == self.password =>
                {
                    Ok(())
                },
                Some(_) => Err(DirectoryError::Rejected {
                    code: INVALID_CREDENTIALS,
                    message: "80090308: LdapErr: DSID-0C09042A, data 52e"
                        .into(),
                }),
            }
        }

        async fn search(
            &mut self,
            _request: &SearchRequest,
        ) -> Result<Vec<DirectoryEntry>, DirectoryError> {
            Ok(self.entries.clone())
        }

        async fn unbind(&mut self) -> Result<(), DirectoryError> {
            Ok(())
        }
    }

    type Binds = Arc<Mutex<Vec<Option<String>>>>;

    fn authenticator(
        entries: Vec<DirectoryEntry>,
    ) -> (LdapAuthenticator, Binds) {
        let binds = Arc::new(Mutex::new(Vec::new()));
        let client = OneUser {
            dn: "cn=jdoe,ou=people,dc=example,dc=com",
            password: "hunter2",
            entries,
            binds: binds.clone(),
        };
        (
            LdapAuthenticator::new(Arc::new(client), Attributes::default()),
            binds,
        )
    }

    #[test]
    fn test_classify_bind_errors() {
        let classify = |data: &str| {
            AuthFailure::from_bind_error(&DirectoryError::Rejected {
                code: 49,
                message: format!(
                    "80090308: LdapErr: DSID-0C09042A, comment: \
                     AcceptSecurityContext error, data {data}, v4563"
                ),
            })
        };

        assert_eq!(classify("52e"), AuthFailure::InvalidCredentials);
        assert_eq!(classify("775"), AuthFailure::AccountLocked);
        assert_eq!(classify("533"), AuthFailure::AccountDisabled);
        assert_eq!(classify("532"), AuthFailure::PasswordExpired);

        let timeout = DirectoryError::Timeout(Duration::from_secs(1));
        assert!(matches!(
            AuthFailure::from_bind_error(&timeout),
            AuthFailure::ServerUnreachable(_)
        ));

        let unavailable = DirectoryError::Rejected {
            code: 52,
            message: String::new(),
        };
        assert!(matches!(
            AuthFailure::from_bind_error(&unavailable),
            AuthFailure::Other(_)
        ));
    }

    #[tokio::test]
    async fn test_verify_resolves_account_name() {
        let entry = DirectoryEntry::new("cn=jdoe,ou=people,dc=example,dc=com")
            .with_attr("sAMAccountName", "jdoe");
        let (auth, binds) = authenticator(vec![entry]);
        let server = ServerConfig::new("ldap://dc1", "dc=example,dc=com");

        let verification = auth
            .verify(&server, &Credentials::new("jdoe", "hunter2"))
            .await;

        let Verification::Valid { bind_dn, .. } = verification else {
            panic!("valid credentials must verify");
        };
        assert_eq!(bind_dn, "cn=jdoe,ou=people,dc=example,dc=com");
        assert_eq!(
            *binds.lock().unwrap(),
            vec![None, Some("cn=jdoe,ou=people,dc=example,dc=com".to_owned())]
        );
    }

    #[tokio::test]
    async fn test_verify_rejects() {
        let (auth, _) = authenticator(vec![]);
        let server = ServerConfig::new("ldap://dc1", "dc=example,dc=com");

        let Verification::Invalid(reasons) = auth
            .verify(&server, &Credentials::new("ghost", "whatever"))
            .await
        else {
            panic!("unknown account must not verify");
        };
        assert_eq!(reasons, vec![AuthFailure::AccountNotFound]);

        let Verification::Invalid(reasons) = auth
            .verify(
                &server,
                &Credentials::new(
                    "cn=jdoe,ou=people,dc=example,dc=com",
                    "wrong",
                ),
            )
            .await
        else {
            panic!("wrong password must not verify");
        };
        assert_eq!(reasons[0], AuthFailure::InvalidCredentials);

        let Verification::Invalid(reasons) =
            auth.verify(&server, &Credentials::new("jdoe", "")).await
        else {
            panic!("empty password must not verify");
        };
        assert_eq!(reasons, vec![AuthFailure::EmptyCredentials]);
    }

    #[tokio::test]
    async fn test_verify_ambiguous_account() {
        let (auth, _) = authenticator(vec![
            DirectoryEntry::new("cn=jdoe,ou=a,dc=example,dc=com"),
            DirectoryEntry::new("cn=jdoe,ou=b,dc=example,dc=com"),
        ]);
        let server = ServerConfig::new("ldap://dc1", "dc=example,dc=com");

        let Verification::Invalid(reasons) =
            auth.verify(&server, &Credentials::new("jdoe", "hunter2")).await
        else {
            panic!("ambiguous account must not verify");
        };
        assert_eq!(reasons, vec![AuthFailure::AmbiguousAccount]);
    }

    #[tokio::test]
    async fn test_verify_account_domain() {
        let (auth, binds) = authenticator(vec![]);
        let mut server = ServerConfig::new("ldap://dc1", "dc=example,dc=com");
        server.account_domain = Some("example.com".into());

        let verification =
            auth.verify(&server, &Credentials::new("jdoe", "hunter2")).await;

        // `jdoe@example.com` is not the accepted DN.
        assert!(matches!(verification, Verification::Invalid(_)));
        assert_eq!(
            *binds.lock().unwrap(),
            vec![Some("jdoe@example.com".to_owned())]
        );
    }
}

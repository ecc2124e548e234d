//! Configuration manager for the directory connector.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use url::Url;
use validator::{Validate, ValidationError, ValidationErrors};

const DEFAULT_CONFIG_PATH: &str = "directory.yaml";
const DEFAULT_TIMEOUT: u64 = 10; // seconds.

/// Errors that may occur during the configuration loading process.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to deserialize configuration: {0}")]
    Deserialize(#[from] serde_yaml::Error),
    #[error("URL is invalid: {0}")]
    Url(#[from] url::ParseError),
    #[error("configuration is invalid: {0}")]
    Validation(#[from] ValidationErrors),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct Configuration {
    /// Candidate servers, tried in this order.
    #[validate(length(min = 1), nested)]
    pub servers: Vec<ServerConfig>,
    /// Forward diagnostics to the logger.
    #[serde(default = "enabled")]
    pub log_enabled: bool,
    /// Per-attempt timeout, in seconds.
    #[serde(default = "default_timeout")]
    #[validate(range(min = 1))]
    pub timeout: u64,
    #[serde(default)]
    pub attributes: Attributes,
    #[serde(skip)]
    path: PathBuf,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            servers: Vec::new(),
            log_enabled: true,
            timeout: DEFAULT_TIMEOUT,
            attributes: Attributes::default(),
            path: PathBuf::new(),
        }
    }
}

/// One candidate directory endpoint.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[validate(schema(function = "validate_bind_credentials"))]
pub struct ServerConfig {
    /// `ldap://host:port` or `ldaps://host:port`.
    #[validate(length(min = 1))]
    pub url: String,
    #[serde(default)]
    pub starttls: bool,
    /// Search root.
    #[validate(length(min = 1))]
    pub base_dn: String,
    /// Static bind DN. Anonymous bind when absent.
    pub username: Option<String>,
    #[serde(skip_serializing)]
    pub password: Option<String>,
    /// Qualifies short usernames as `user@domain` on authentication.
    pub account_domain: Option<String>,
}

impl ServerConfig {
    /// Create a new anonymous [`ServerConfig`].
    pub fn new(url: impl Into<String>, base_dn: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            base_dn: base_dn.into(),
            ..Default::default()
        }
    }

    /// Bind with a static identity instead of anonymously.
    pub fn with_credentials(
        mut self,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }
}

fn validate_bind_credentials(
    server: &ServerConfig,
) -> Result<(), ValidationError> {
    match (&server.username, &server.password) {
        (Some(_), None) | (None, Some(_)) => {
            Err(ValidationError::new("username_and_password"))
        },
        _ => Ok(()),
    }
}

/// Directory attribute names used by lookups.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attributes {
    /// Account name, `sAMAccountName` on Active Directory.
    pub account: String,
    pub mail: String,
    /// Numeric identifier.
    pub id: String,
    /// Sort key of username lookups.
    pub sort: String,
}

impl Default for Attributes {
    fn default() -> Self {
        Self {
            account: "sAMAccountName".into(),
            mail: "mail".into(),
            id: "uidNumber".into(),
            sort: "sn".into(),
        }
    }
}

fn enabled() -> bool {
    true
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT
}

impl Configuration {
    /// Create a configuration from an ordered server list.
    pub fn new(servers: Vec<ServerConfig>) -> Self {
        Self {
            servers,
            ..Default::default()
        }
    }

    pub fn path(mut self, path: PathBuf) -> Self {
        self.path = path;
        self
    }

    /// Per-attempt timeout as a [`Duration`].
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout)
    }

    /// Normalizes a server URL by ensuring it starts with an LDAP scheme.
    fn normalize_url(url: &str) -> Result<String, url::ParseError> {
        let url_with_scheme =
            if url.starts_with("ldap://") || url.starts_with("ldaps://") {
                url.to_string()
            } else {
                format!("ldap://{url}")
            };

        let parsed_url = Url::parse(&url_with_scheme)?;
        Ok(parsed_url.to_string().trim_end_matches('/').to_owned())
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Configuration = serde_yaml::from_str(content)?;
        config.finalize()
    }

    /// Reads the configuration file from the specified path, or from the
    /// default location when no path was set.
    ///
    /// A missing file is an error, even when the default location exists.
    pub fn read(self) -> Result<Self, ConfigError> {
        let file_path = if self.path.as_os_str().is_empty() {
            Path::new(DEFAULT_CONFIG_PATH).to_path_buf()
        } else {
            self.path.clone()
        };

        let file = File::open(&file_path).inspect_err(|err| {
            tracing::error!(
                error = %err,
                path = %file_path.display(),
                "cannot open configuration file"
            );
        })?;
        let mut config: Configuration = serde_yaml::from_reader(file)?;
        config.path = file_path;

        config.finalize()
    }

    fn finalize(mut self) -> Result<Self, ConfigError> {
        for server in self.servers.iter_mut() {
            server.url = Self::normalize_url(&server.url)?;
        }

        self.validate()?;
        Ok(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONFIG: &str = r#"
servers:
  - url: dc1.example.com:389
    base_dn: dc=example,dc=com
    username: cn=reader,dc=example,dc=com
    password: secret
  - url: ldaps://dc2.example.com
    base_dn: dc=example,dc=com
log_enabled: false
timeout: 3
"#;

    #[test]
    fn test_read_yaml() {
        let config = Configuration::from_yaml(CONFIG).unwrap();

        assert_eq!(config.servers.len(), 2);
        assert_eq!(config.servers[0].url, "ldap://dc1.example.com:389");
        assert_eq!(config.servers[1].url, "ldaps://dc2.example.com");
        assert_eq!(
            config.servers[0].username.as_deref(),
            Some("cn=reader,dc=example,dc=com")
        );
        assert!(config.servers[1].username.is_none());
        assert!(!config.log_enabled);
        assert_eq!(config.timeout(), Duration::from_secs(3));
        assert_eq!(config.attributes, Attributes::default());
    }

    #[test]
    fn test_defaults() {
        let config = Configuration::from_yaml(
            "servers:\n  - url: ldap://localhost\n    base_dn: dc=local\n",
        )
        .unwrap();

        assert!(config.log_enabled);
        assert_eq!(config.timeout, DEFAULT_TIMEOUT);
        assert_eq!(config.attributes.account, "sAMAccountName");
        assert_eq!(config.attributes.sort, "sn");
    }

    #[test]
    fn test_rejects_invalid() {
        // No server at all.
        assert!(matches!(
            Configuration::from_yaml("servers: []"),
            Err(ConfigError::Validation(_))
        ));

        // Username without password.
        let half_credentials = r#"
servers:
  - url: ldap://localhost
    base_dn: dc=local
    username: cn=admin
"#;
        assert!(matches!(
            Configuration::from_yaml(half_credentials),
            Err(ConfigError::Validation(_))
        ));

        // Empty base DN.
        assert!(matches!(
            Configuration::from_yaml(
                "servers:\n  - url: ldap://localhost\n    base_dn: ''\n"
            ),
            Err(ConfigError::Validation(_))
        ));
    }

    #[test]
    fn test_example_file() {
        let config = Configuration::from_yaml(include_str!(
            "../directory.example.yaml"
        ))
        .unwrap();

        assert_eq!(config.servers.len(), 2);
        assert!(config.servers[0].starttls);
        assert_eq!(
            config.servers[1].account_domain.as_deref(),
            Some("example.com")
        );
    }

    #[test]
    fn test_missing_file() {
        // An explicit path never falls back to `directory.yaml`.
        let config = Configuration::default()
            .path(PathBuf::from("/nonexistent/mine.yaml"))
            .read();

        match config {
            Err(ConfigError::Io(err)) => {
                assert_eq!(err.kind(), std::io::ErrorKind::NotFound)
            },
            other => panic!("expected IO error, got {other:?}"),
        }
    }

    #[test]
    fn test_read_explicit_path() {
        let path = std::env::temp_dir().join(format!(
            "directory-connector-{}.yaml",
            std::process::id()
        ));
        std::fs::write(
            &path,
            "servers:\n  - url: ldap://explicit\n    base_dn: dc=local\n",
        )
        .unwrap();

        let config = Configuration::default().path(path.clone()).read();
        let _ = std::fs::remove_file(&path);

        let config = config.unwrap();
        assert_eq!(config.servers[0].url, "ldap://explicit");
        assert_eq!(config.path, path);
    }
}

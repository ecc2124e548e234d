//! Error handler for the directory connector.

use std::time::Duration;

use ldap3::LdapError;
use thiserror::Error;

use crate::config::ConfigError;
use crate::connector::BindFailure;

pub type Result<T> = std::result::Result<T, ConnectorError>;

/// Failure reported by a directory client (bind, search, unbind).
#[derive(Debug, Error)]
pub enum DirectoryError {
    #[error(transparent)]
    Ldap(#[from] LdapError),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("server answered with code {code}: {message}")]
    Rejected { code: u32, message: String },

    #[error("{0}")]
    Other(String),
}

impl DirectoryError {
    /// LDAP result code carried by the error, if any.
    pub fn result_code(&self) -> Option<u32> {
        match self {
            DirectoryError::Rejected { code, .. } => Some(*code),
            DirectoryError::Ldap(LdapError::LdapResult { result }) => {
                Some(result.rc)
            },
            _ => None,
        }
    }

    /// Diagnostic text sent back by the server, if any.
    pub fn diagnostic(&self) -> Option<&str> {
        match self {
            DirectoryError::Rejected { message, .. } => Some(message),
            DirectoryError::Ldap(LdapError::LdapResult { result }) => {
                Some(&result.text)
            },
            _ => None,
        }
    }
}

/// Errors surfaced by [`crate::connector::DirectoryConnector`] operations.
#[derive(Debug, Error)]
pub enum ConnectorError {
    #[error(
        "no directory server available ({} bind failure(s))",
        failures.len()
    )]
    NoServerAvailable { failures: Vec<BindFailure> },

    #[error("search on {server} failed: {source}")]
    Search {
        server: String,
        #[source]
        source: DirectoryError,
    },

    #[error("no entry matches {filter}")]
    NotFound { filter: String },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejected_exposes_code_and_diagnostic() {
        let err = DirectoryError::Rejected {
            code: 49,
            message: "80090308: LdapErr: DSID-0C09042A, data 775".into(),
        };

        assert_eq!(err.result_code(), Some(49));
        assert!(err.diagnostic().unwrap().contains("data 775"));
        assert_eq!(DirectoryError::Other("boom".into()).result_code(), None);
    }

    #[test]
    fn test_no_server_message_counts_failures() {
        let err = ConnectorError::NoServerAvailable {
            failures: vec![
                BindFailure {
                    server: "ldap://a".into(),
                    message: "refused".into(),
                },
                BindFailure {
                    server: "ldap://b".into(),
                    message: "refused".into(),
                },
            ],
        };

        assert_eq!(
            err.to_string(),
            "no directory server available (2 bind failure(s))"
        );
    }
}

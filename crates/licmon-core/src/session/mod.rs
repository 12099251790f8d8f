//! Authenticated session against the appliance REST API.
//!
//! [`SessionClient::fetch`] logs in, runs `show` commands in order and logs
//! out again on every exit path. The wire protocol lives behind the
//! [`SessionTransport`] trait so cycles can be driven by test doubles.

mod client;
mod transport;

use std::fmt;

use thiserror::Error;

pub use client::SessionClient;
pub use transport::{HttpTransport, SessionToken, SessionTransport};

/// Login credentials for the appliance
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    /// Management user name
    pub username: String,
    /// Management password
    pub password: String,
}

impl Credentials {
    /// Create credentials
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Raw output of one `show` command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// The command as sent (e.g. "show license-usage")
    pub command: String,
    /// Response body, untouched
    pub body: String,
}

/// Join command outputs into the text the usage parser expects
pub fn join_outputs(outputs: &[CommandOutput]) -> String {
    outputs
        .iter()
        .map(|o| o.body.trim())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Errors raised while talking to the appliance
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    /// Host unreachable, TLS failure, timeout or a server-side failure
    #[error("connection to {host} failed: {message}")]
    Connection { host: String, message: String },

    /// Credentials rejected or session no longer valid
    #[error("authentication to {host} rejected: {message}")]
    Auth { host: String, message: String },

    /// The appliance refused or failed a specific command
    #[error("command '{command}' failed: {message}")]
    Command { command: String, message: String },
}

impl SessionError {
    /// Whether the failure points at configuration rather than transience
    pub fn is_elevated(&self) -> bool {
        matches!(self, SessionError::Auth { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_credentials_debug_redacts_password() {
        let creds = Credentials::new("admin", "s3cret");
        let printed = format!("{:?}", creds);
        assert!(printed.contains("admin"));
        assert!(!printed.contains("s3cret"));
    }

    #[test]
    fn test_join_outputs() {
        let outputs = vec![
            CommandOutput {
                command: "show a".to_string(),
                body: "{\"a\": 1}\n".to_string(),
            },
            CommandOutput {
                command: "show b".to_string(),
                body: "  {\"b\": 2}".to_string(),
            },
        ];
        assert_eq!(join_outputs(&outputs), "{\"a\": 1}\n{\"b\": 2}");
    }

    #[test]
    fn test_session_error_display() {
        let err = SessionError::Auth {
            host: "10.0.60.60".to_string(),
            message: "status 1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "authentication to 10.0.60.60 rejected: status 1"
        );
        assert!(err.is_elevated());

        let err = SessionError::Command {
            command: "show license-usage".to_string(),
            message: "HTTP 500".to_string(),
        };
        assert!(!err.is_elevated());
    }
}

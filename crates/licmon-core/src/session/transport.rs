//! Wire transport for the appliance `/v1` REST API.

use std::time::Duration;

use serde_json::Value;

use super::{Credentials, SessionError};

/// Opaque session token (`UIDARUBA`) returned by a successful login
#[derive(Clone, PartialEq, Eq)]
pub struct SessionToken(String);

impl SessionToken {
    /// Wrap a raw token
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    /// Raw token value
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SessionToken(<redacted>)")
    }
}

/// Low-level operations of an appliance session.
///
/// Implementations must bound every call with a timeout and never retry.
pub trait SessionTransport: Send + Sync {
    /// Authenticate and return a session token
    fn login(&self, host: &str, credentials: &Credentials) -> Result<SessionToken, SessionError>;

    /// Run one `show` command and return the raw response body
    fn show(&self, host: &str, token: &SessionToken, command: &str)
        -> Result<String, SessionError>;

    /// Invalidate the session token
    fn logout(&self, host: &str, token: &SessionToken) -> Result<(), SessionError>;
}

/// HTTPS transport backed by a blocking `ureq` agent
pub struct HttpTransport {
    agent: ureq::Agent,
    port: u16,
}

impl HttpTransport {
    /// Create a transport.
    ///
    /// Appliances usually present self-signed certificates, so verification
    /// is opt-in through `verify_tls`.
    pub fn new(port: u16, verify_tls: bool, timeout: Duration) -> Self {
        let tls = ureq::tls::TlsConfig::builder()
            .disable_verification(!verify_tls)
            .build();
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .tls_config(tls)
            .build()
            .into();
        Self { agent, port }
    }

    fn base_url(&self, host: &str) -> String {
        format!("https://{}:{}/v1", host, self.port)
    }
}

impl SessionTransport for HttpTransport {
    fn login(&self, host: &str, credentials: &Credentials) -> Result<SessionToken, SessionError> {
        let url = format!("{}/api/login", self.base_url(host));
        let mut response = self
            .agent
            .post(&url)
            .send_form([
                ("username", credentials.username.as_str()),
                ("password", credentials.password.as_str()),
            ])
            .map_err(|e| connection_error(host, e))?;

        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            return Err(SessionError::Auth {
                host: host.to_string(),
                message: format!("HTTP {}", status),
            });
        }
        if !(200..300).contains(&status) {
            return Err(SessionError::Connection {
                host: host.to_string(),
                message: format!("login returned HTTP {}", status),
            });
        }

        let body: Value = response
            .body_mut()
            .read_json()
            .map_err(|e| connection_error(host, e))?;
        interpret_login(&body).map_err(|message| SessionError::Auth {
            host: host.to_string(),
            message,
        })
    }

    fn show(
        &self,
        host: &str,
        token: &SessionToken,
        command: &str,
    ) -> Result<String, SessionError> {
        let url = format!("{}/configuration/showcommand", self.base_url(host));
        let mut response = self
            .agent
            .get(&url)
            .query("command", command)
            .query("UIDARUBA", token.as_str())
            .header("Cookie", format!("SESSION={}", token.as_str()))
            .call()
            .map_err(|e| connection_error(host, e))?;

        let status = response.status().as_u16();
        if status == 401 || status == 403 {
            return Err(SessionError::Auth {
                host: host.to_string(),
                message: format!("session rejected with HTTP {}", status),
            });
        }
        if !(200..300).contains(&status) {
            return Err(SessionError::Command {
                command: command.to_string(),
                message: format!("HTTP {}", status),
            });
        }

        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| connection_error(host, e))?;
        check_command_status(&body).map_err(|message| SessionError::Command {
            command: command.to_string(),
            message,
        })?;
        Ok(body)
    }

    fn logout(&self, host: &str, token: &SessionToken) -> Result<(), SessionError> {
        let url = format!("{}/api/logout", self.base_url(host));
        let response = self
            .agent
            .get(&url)
            .query("UIDARUBA", token.as_str())
            .header("Cookie", format!("SESSION={}", token.as_str()))
            .call()
            .map_err(|e| connection_error(host, e))?;

        let status = response.status().as_u16();
        if !(200..300).contains(&status) {
            return Err(SessionError::Connection {
                host: host.to_string(),
                message: format!("logout returned HTTP {}", status),
            });
        }
        Ok(())
    }
}

fn connection_error(host: &str, err: ureq::Error) -> SessionError {
    SessionError::Connection {
        host: host.to_string(),
        message: err.to_string(),
    }
}

/// `_global_result.status` as a string ("0" on success); numbers are accepted too
fn global_status(body: &Value) -> Option<String> {
    match body.get("_global_result")?.get("status")? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Extract the session token from a login response
fn interpret_login(body: &Value) -> Result<SessionToken, String> {
    match global_status(body).as_deref() {
        Some("0") => body["_global_result"]["UIDARUBA"]
            .as_str()
            .filter(|t| !t.is_empty())
            .map(SessionToken::new)
            .ok_or_else(|| "login succeeded but no UIDARUBA token was returned".to_string()),
        Some(status) => {
            let reason = body["_global_result"]["status_str"]
                .as_str()
                .unwrap_or("login refused");
            Err(format!("{} (status {})", reason, status))
        }
        None => Err("unexpected login response".to_string()),
    }
}

/// Reject command bodies that carry a failing `_global_result`
fn check_command_status(body: &str) -> Result<(), String> {
    let Ok(value) = serde_json::from_str::<Value>(body) else {
        // Non-JSON bodies are left for the parser to judge
        return Ok(());
    };
    match global_status(&value).as_deref() {
        None | Some("0") => Ok(()),
        Some(status) => {
            let reason = value["_global_result"]["status_str"]
                .as_str()
                .unwrap_or("command refused");
            Err(format!("{} (status {})", reason, status))
        }
    }
}

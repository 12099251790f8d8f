//! One-shot session client: login, run commands, always log out.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::transport::{SessionToken, SessionTransport};
use super::{CommandOutput, Credentials, SessionError};

/// Fetches raw command output over a fresh session per call
#[derive(Clone)]
pub struct SessionClient {
    transport: Arc<dyn SessionTransport>,
}

impl SessionClient {
    /// Create a client over the given transport
    pub fn new(transport: Arc<dyn SessionTransport>) -> Self {
        Self { transport }
    }

    /// Open one session, run `commands` in order and return their raw output.
    ///
    /// The first command is required. A command error on any later command
    /// is logged and that output is omitted. Connection and auth errors are
    /// never retried here. The session is logged out on every exit path.
    pub fn fetch(
        &self,
        commands: &[String],
        credentials: &Credentials,
        host: &str,
    ) -> Result<Vec<CommandOutput>, SessionError> {
        let session = Session::open(self.transport.as_ref(), host, credentials)?;
        info!("Session opened on {}", host);

        let mut outputs = Vec::with_capacity(commands.len());
        for (index, command) in commands.iter().enumerate() {
            match session.show(command) {
                Ok(body) => {
                    debug!("'{}' returned {} bytes", command, body.len());
                    outputs.push(CommandOutput {
                        command: command.clone(),
                        body,
                    });
                }
                Err(e @ SessionError::Command { .. }) if index > 0 => {
                    warn!("Optional command failed, continuing without it: {}", e);
                }
                Err(e) => return Err(e),
            }
        }

        session.close();
        Ok(outputs)
    }
}

/// Logged-in session; logs out when closed or dropped
struct Session<'a> {
    transport: &'a dyn SessionTransport,
    host: &'a str,
    token: Option<SessionToken>,
}

impl<'a> Session<'a> {
    fn open(
        transport: &'a dyn SessionTransport,
        host: &'a str,
        credentials: &Credentials,
    ) -> Result<Self, SessionError> {
        let token = transport.login(host, credentials)?;
        Ok(Self {
            transport,
            host,
            token: Some(token),
        })
    }

    fn show(&self, command: &str) -> Result<String, SessionError> {
        match &self.token {
            Some(token) => self.transport.show(self.host, token, command),
            None => Err(SessionError::Auth {
                host: self.host.to_string(),
                message: "session already closed".to_string(),
            }),
        }
    }

    fn close(mut self) {
        self.logout();
    }

    fn logout(&mut self) {
        if let Some(token) = self.token.take() {
            match self.transport.logout(self.host, &token) {
                Ok(()) => debug!("Session closed on {}", self.host),
                Err(e) => warn!("Logout from {} failed: {}", self.host, e),
            }
        }
    }
}

impl Drop for Session<'_> {
    fn drop(&mut self) {
        self.logout();
    }
}

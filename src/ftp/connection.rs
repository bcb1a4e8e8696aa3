//! FTP session lifecycle.
//!
//! [`FtpConnectionManager`] is the sole owner of the control connection. It
//! walks an explicit state machine on connect and tears the session down on
//! any failed transition, on [`disconnect`](FtpConnectionManager::disconnect),
//! and on drop.

use std::io::{self, Read};

use native_tls::TlsConnector;
use tracing::debug;

use super::client::{DataConn, FtpClient, FtpError, Reply};
use super::{FtpConfig, TransferMode};
use crate::StorageError;

/// Session lifecycle states.
///
/// Data operations are only permitted in [`Ready`](ConnectionState::Ready);
/// any failed transition forces a return to
/// [`Disconnected`](ConnectionState::Disconnected).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No session.
    Disconnected,
    /// Transport being established.
    Connecting,
    /// Logged in.
    Authenticated,
    /// Data-connection mode and transfer type configured.
    PassiveModeSet,
    /// Anchored at the absolute root directory.
    RootResolved,
    /// Fully configured; data operations permitted.
    Ready,
}

/// Owns the FTP session: connect, authenticate, configure, reconnect.
///
/// No other component holds or mutates the underlying connection.
pub struct FtpConnectionManager {
    config: FtpConfig,
    client: Option<FtpClient>,
    state: ConnectionState,
    /// Absolute working directory after root resolution. Directory-creation
    /// logic rebuilds paths relative to the session's current directory, so
    /// the anchor must be absolute or intermediate `CWD` calls would make it
    /// drift.
    absolute_root: String,
    pure_ftpd: bool,
}

impl FtpConnectionManager {
    /// Create a manager in the `Disconnected` state.
    pub fn new(config: FtpConfig) -> Self {
        Self {
            config,
            client: None,
            state: ConnectionState::Disconnected,
            absolute_root: String::from("/"),
            pure_ftpd: false,
        }
    }

    /// The configuration snapshot this session was built from.
    pub fn config(&self) -> &FtpConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Whether data operations are permitted.
    pub fn is_ready(&self) -> bool {
        self.state == ConnectionState::Ready
    }

    /// The absolute root resolved during connect.
    pub fn absolute_root(&self) -> &str {
        &self.absolute_root
    }

    /// Whether the server identified itself as Pure-FTPd.
    pub fn is_pure_ftpd(&self) -> bool {
        self.pure_ftpd
    }

    /// Establish and configure the session, replacing any existing one.
    ///
    /// # Errors
    ///
    /// [`StorageError::ConnectionFailure`] on any failed transition; the
    /// session is torn down and the state reset to `Disconnected`.
    pub fn connect(&mut self) -> Result<(), StorageError> {
        self.reset();
        self.state = ConnectionState::Connecting;
        debug!(host = %self.config.host, port = self.config.port, "connecting");

        let (mut client, greeting) = match FtpClient::connect(
            &self.config.host,
            self.config.port,
            self.config.timeout,
        ) {
            Ok(ok) => ok,
            Err(e) => return Err(self.fail(format!("could not connect: {}", describe(&e)))),
        };
        if !greeting.is_completion() {
            return Err(self.fail(format!("unexpected greeting: {}", greeting.to_line())));
        }

        if self.config.tls {
            client = self.secure(client)?;
        }

        client = self.login(client)?;
        self.state = ConnectionState::Authenticated;

        if self.config.utf8 {
            match client.command("OPTS UTF8 ON") {
                Ok(reply) if reply.is_completion() => {}
                Ok(reply) => {
                    return Err(
                        self.fail(format!("could not set UTF-8 mode: {}", reply.to_line()))
                    );
                }
                Err(e) => {
                    return Err(self.fail(format!("could not set UTF-8 mode: {}", describe(&e))));
                }
            }
        }

        client.set_passive(self.config.passive);
        if let Some(ignore) = self.config.ignore_passive_address {
            client.set_ignore_passive_address(ignore);
        }
        let type_cmd = match self.config.transfer_mode {
            TransferMode::Binary => "TYPE I",
            TransferMode::Ascii => "TYPE A",
        };
        match client.command(type_cmd) {
            Ok(reply) if reply.is_completion() => {}
            Ok(reply) => {
                return Err(self.fail(format!("could not set transfer type: {}", reply.to_line())));
            }
            Err(e) => {
                return Err(self.fail(format!("could not set transfer type: {}", describe(&e))));
            }
        }
        self.state = ConnectionState::PassiveModeSet;

        self.resolve_root(&mut client)?;
        self.state = ConnectionState::RootResolved;

        self.pure_ftpd = self.detect_pure_ftpd(&mut client)?;

        self.client = Some(client);
        self.state = ConnectionState::Ready;
        debug!(root = %self.absolute_root, pure_ftpd = self.pure_ftpd, "session ready");
        Ok(())
    }

    /// Connect if not already `Ready`.
    pub fn ensure_ready(&mut self) -> Result<(), StorageError> {
        if self.is_ready() { Ok(()) } else { self.connect() }
    }

    /// Tear the session down. Safe to call in any state.
    pub fn disconnect(&mut self) {
        if let Some(client) = &mut self.client {
            let _ = client.command("QUIT");
        }
        self.reset();
    }

    /// Actively probe liveness by attempting a listing rather than trusting
    /// cached state. A transport-level listing failure means "not connected";
    /// any other failure is re-raised.
    pub fn is_connected(&mut self) -> Result<bool, StorageError> {
        if self.client.is_none() {
            return Ok(false);
        }
        match self.raw_list("-aln", "/") {
            Ok(_) => Ok(true),
            Err(FtpError::Io(_)) => {
                self.reset();
                Ok(false)
            }
            Err(FtpError::UnexpectedReply(reply)) => Err(StorageError::Protocol {
                operation: "is_connected",
                reply: reply.to_line(),
            }),
        }
    }

    /// Send a command on the control channel.
    pub(crate) fn command(&mut self, cmd: &str) -> Result<Reply, FtpError> {
        self.client_mut()?.command(cmd)
    }

    /// Open a data connection for a transfer command.
    pub(crate) fn open_data(&mut self, cmd: &str) -> Result<DataConn, FtpError> {
        self.client_mut()?.open_data(cmd)
    }

    /// Read the transfer-complete reply.
    pub(crate) fn finish_data(&mut self) -> Result<Reply, FtpError> {
        self.client_mut()?.finish_data()
    }

    /// Raw `LIST` with options, returning the response lines.
    ///
    /// Applies the Pure-FTPd quirk: that server treats unescaped spaces in
    /// raw command arguments as argument separators.
    pub(crate) fn raw_list(&mut self, options: &str, path: &str) -> Result<Vec<String>, FtpError> {
        let path = self.escape_path(path);
        self.data_lines(&format!("LIST {options} {path}"))
    }

    /// `NLST` name listing of `arg`.
    pub(crate) fn nlst(&mut self, arg: &str) -> Result<Vec<String>, FtpError> {
        self.data_lines(&format!("NLST {arg}"))
    }

    /// Change back to the absolute root resolved at connect time.
    pub(crate) fn restore_root(&mut self) -> Result<(), FtpError> {
        let cmd = format!("CWD {}", self.absolute_root);
        let reply = self.command(&cmd)?;
        if reply.is_completion() {
            Ok(())
        } else {
            Err(FtpError::UnexpectedReply(reply))
        }
    }

    /// Backslash-escape spaces when talking to Pure-FTPd. Applies only to
    /// raw listing arguments; transfer verbs take pathnames verbatim.
    fn escape_path(&self, path: &str) -> String {
        if self.pure_ftpd {
            path.replace(' ', "\\ ")
        } else {
            path.to_string()
        }
    }

    fn data_lines(&mut self, cmd: &str) -> Result<Vec<String>, FtpError> {
        let mut data = self.open_data(cmd)?;
        let mut raw = Vec::new();
        data.read_to_end(&mut raw)?;
        data.close()?;
        self.finish_data()?;

        let text = String::from_utf8_lossy(&raw);
        Ok(text.lines().map(str::to_string).collect())
    }

    fn client_mut(&mut self) -> Result<&mut FtpClient, FtpError> {
        self.client.as_mut().ok_or_else(|| {
            FtpError::Io(io::Error::new(
                io::ErrorKind::NotConnected,
                "session not ready",
            ))
        })
    }

    fn reset(&mut self) {
        self.client = None;
        self.state = ConnectionState::Disconnected;
    }

    /// Build the fatal error for a failed transition and drop the session.
    fn fail(&mut self, context: String) -> StorageError {
        self.reset();
        StorageError::ConnectionFailure {
            host: self.config.host.clone(),
            port: self.config.port,
            context,
        }
    }

    /// Explicit FTPS upgrade: `AUTH TLS`, handshake, `PBSZ 0`, `PROT P`.
    fn secure(&mut self, mut client: FtpClient) -> Result<FtpClient, StorageError> {
        match client.command("AUTH TLS") {
            Ok(reply) if reply.is_completion() => {}
            Ok(reply) => {
                return Err(self.fail(format!("AUTH TLS refused: {}", reply.to_line())));
            }
            Err(e) => return Err(self.fail(format!("AUTH TLS failed: {}", describe(&e)))),
        }

        let connector = TlsConnector::new()
            .map_err(|e| self.fail(format!("could not build TLS connector: {e}")))?;
        let mut client = client
            .into_secure(&self.config.host, &connector)
            .map_err(|e| self.fail(format!("TLS handshake failed: {}", describe(&e))))?;

        for cmd in ["PBSZ 0", "PROT P"] {
            match client.command(cmd) {
                Ok(reply) if reply.is_completion() => {}
                Ok(reply) => {
                    return Err(self.fail(format!("{cmd} refused: {}", reply.to_line())));
                }
                Err(e) => return Err(self.fail(format!("{cmd} failed: {}", describe(&e)))),
            }
        }
        client.set_data_tls(connector, self.config.host.clone());
        Ok(client)
    }

    /// Log in, converting any failure into a fatal error that also closes
    /// the half-open session.
    fn login(&mut self, mut client: FtpClient) -> Result<FtpClient, StorageError> {
        let user_reply = match client.command(&format!("USER {}", self.config.username)) {
            Ok(reply) => reply,
            Err(e) => return Err(self.fail(format!("login failed: {}", describe(&e)))),
        };

        let reply = if user_reply.is_intermediate() {
            match client.command(&format!("PASS {}", self.config.password)) {
                Ok(reply) => reply,
                Err(e) => return Err(self.fail(format!("login failed: {}", describe(&e)))),
            }
        } else {
            user_reply
        };

        if !reply.is_completion() {
            let _ = client.command("QUIT");
            drop(client);
            return Err(self.fail(format!(
                "could not log in with username {}: {}",
                self.config.username,
                reply.to_line()
            )));
        }
        Ok(client)
    }

    /// Change into the configured root (fatal if it does not exist), then
    /// read back the absolute working directory as the effective root.
    fn resolve_root(&mut self, client: &mut FtpClient) -> Result<(), StorageError> {
        if !self.config.root.is_empty() {
            match client.command(&format!("CWD {}", self.config.root)) {
                Ok(reply) if reply.is_completion() => {}
                Ok(_) => {
                    return Err(self.fail(format!(
                        "root is invalid or does not exist: {}",
                        self.config.root
                    )));
                }
                Err(e) => {
                    return Err(self.fail(format!("could not enter root: {}", describe(&e))));
                }
            }
        }

        match client.command("PWD") {
            Ok(reply) if reply.is_completion() => {
                self.absolute_root =
                    parse_pwd(&reply.text()).unwrap_or_else(|| String::from("/"));
                Ok(())
            }
            Ok(reply) => Err(self.fail(format!("PWD refused: {}", reply.to_line()))),
            Err(e) => Err(self.fail(format!("PWD failed: {}", describe(&e)))),
        }
    }

    /// Server-dialect detection: a benign `HELP`, inspected for the
    /// Pure-FTPd signature. An explicit `system_type` hint short-circuits
    /// the probe.
    fn detect_pure_ftpd(&mut self, client: &mut FtpClient) -> Result<bool, StorageError> {
        if let Some(hint) = &self.config.system_type {
            return Ok(hint.to_ascii_lowercase().contains("pure-ftpd"));
        }
        match client.command("HELP") {
            Ok(reply) => Ok(reply.text().to_ascii_lowercase().contains("pure-ftpd")),
            Err(e) => Err(self.fail(format!("HELP failed: {}", describe(&e)))),
        }
    }
}

impl Drop for FtpConnectionManager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

impl std::fmt::Debug for FtpConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FtpConnectionManager")
            .field("host", &self.config.host)
            .field("port", &self.config.port)
            .field("state", &self.state)
            .field("absolute_root", &self.absolute_root)
            .finish_non_exhaustive()
    }
}

fn describe(e: &FtpError) -> String {
    match e {
        FtpError::Io(e) => e.to_string(),
        FtpError::UnexpectedReply(reply) => reply.to_line(),
    }
}

/// Extract the quoted directory from a `257 "/path" ...` reply.
fn parse_pwd(text: &str) -> Option<String> {
    let start = text.find('"')?;
    let end = text[start + 1..].find('"')? + start + 1;
    Some(text[start + 1..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_pwd_extracts_quoted_path() {
        assert_eq!(
            parse_pwd("\"/srv/root\" is the current directory"),
            Some("/srv/root".to_string())
        );
        assert_eq!(parse_pwd("no quotes here"), None);
    }

    #[test]
    fn manager_starts_disconnected() {
        let manager = FtpConnectionManager::new(FtpConfig::default());
        assert_eq!(manager.state(), ConnectionState::Disconnected);
        assert!(!manager.is_ready());
    }

    #[test]
    fn connect_failure_is_fatal_and_resets() {
        let mut config = FtpConfig::default();
        config.host = "127.0.0.1".into();
        config.port = 1; // nothing listens here
        config.timeout = std::time::Duration::from_millis(200);

        let mut manager = FtpConnectionManager::new(config);
        let err = manager.connect().unwrap_err();
        assert!(matches!(err, StorageError::ConnectionFailure { port: 1, .. }));
        assert_eq!(manager.state(), ConnectionState::Disconnected);
    }
}

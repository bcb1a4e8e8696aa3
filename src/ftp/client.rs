//! Blocking FTP control-channel client.
//!
//! Speaks the RFC 959 wire protocol over a `TcpStream`, optionally upgraded
//! to explicit FTPS (RFC 4217) via `native-tls`. Data connections are opened
//! per transfer in passive (`PASV`) or active (`PORT`) mode and are
//! TLS-wrapped when the control channel negotiated `PROT P`.
//!
//! The client is deliberately dumb: it moves commands and replies, and knows
//! nothing about adapter semantics. Session lifecycle lives in
//! [`connection`](super::connection).

use std::io::{self, Read, Write};
use std::net::{IpAddr, Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::time::Duration;

use native_tls::{TlsConnector, TlsStream};
use tracing::trace;

/// A parsed control-channel reply.
#[derive(Debug, Clone)]
pub(crate) struct Reply {
    /// Three-digit reply code.
    pub code: u16,
    /// Reply text, one element per line for multi-line replies.
    pub lines: Vec<String>,
}

impl Reply {
    /// First digit is 1: positive preliminary, a data transfer follows.
    pub fn is_preliminary(&self) -> bool {
        self.code / 100 == 1
    }

    /// First digit is 2: positive completion.
    pub fn is_completion(&self) -> bool {
        self.code / 100 == 2
    }

    /// First digit is 3: positive intermediate (e.g. `331`, `350`).
    pub fn is_intermediate(&self) -> bool {
        self.code / 100 == 3
    }

    /// Full reply text, lines joined with spaces.
    pub fn text(&self) -> String {
        self.lines.join(" ")
    }

    /// One-line rendering for error contexts.
    pub fn to_line(&self) -> String {
        format!("{} {}", self.code, self.text())
    }
}

/// Client-side failure: either the transport broke or the server answered
/// with a reply the caller did not expect.
#[derive(Debug)]
pub(crate) enum FtpError {
    /// Transport-level failure.
    Io(io::Error),
    /// The server replied, but not with an acceptable code.
    UnexpectedReply(Reply),
}

impl From<io::Error> for FtpError {
    fn from(e: io::Error) -> Self {
        FtpError::Io(e)
    }
}

/// Control or data stream, plain or TLS.
enum Channel {
    Plain(TcpStream),
    Tls(Box<TlsStream<TcpStream>>),
}

impl Channel {
    fn shutdown_write(&mut self) -> io::Result<()> {
        match self {
            Channel::Plain(s) => s.shutdown(Shutdown::Write),
            Channel::Tls(s) => s.shutdown(),
        }
    }
}

impl Read for Channel {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Channel::Plain(s) => s.read(buf),
            Channel::Tls(s) => s.read(buf),
        }
    }
}

impl Write for Channel {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Channel::Plain(s) => s.write(buf),
            Channel::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Channel::Plain(s) => s.flush(),
            Channel::Tls(s) => s.flush(),
        }
    }
}

/// An open data connection for one transfer.
///
/// Dropping it releases the socket; [`DataConn::close`] additionally performs
/// an orderly write-side shutdown so the server sees end-of-file on uploads.
pub(crate) struct DataConn(Channel);

impl DataConn {
    /// Orderly close: flush and shut down the write side.
    pub fn close(mut self) -> io::Result<()> {
        self.0.flush()?;
        self.0.shutdown_write()
    }
}

impl Read for DataConn {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl Write for DataConn {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

/// Blocking FTP control connection.
pub(crate) struct FtpClient {
    stream: Channel,
    /// Unconsumed control-channel bytes.
    buf: Vec<u8>,
    peer: SocketAddr,
    passive: bool,
    ignore_passive_address: bool,
    /// TLS context for data connections once `PROT P` is active.
    data_tls: Option<(TlsConnector, String)>,
}

impl FtpClient {
    /// Open the control connection and consume the server greeting.
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<(Self, Reply), FtpError> {
        let addr = (host, port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| io::Error::other(format!("could not resolve {host}")))?;
        let stream = TcpStream::connect_timeout(&addr, timeout)?;

        let mut client = Self {
            stream: Channel::Plain(stream),
            buf: Vec::new(),
            peer: addr,
            passive: true,
            ignore_passive_address: false,
            data_tls: None,
        };
        let greeting = client.read_reply()?;
        Ok((client, greeting))
    }

    /// Upgrade the control channel to TLS (after `AUTH TLS` was accepted).
    ///
    /// Consumes the client so a failed handshake cannot leave a half-upgraded
    /// stream in use.
    pub fn into_secure(mut self, domain: &str, connector: &TlsConnector) -> Result<Self, FtpError> {
        self.stream = match self.stream {
            Channel::Plain(tcp) => {
                let tls = connector
                    .connect(domain, tcp)
                    .map_err(|e| FtpError::Io(io::Error::other(e.to_string())))?;
                Channel::Tls(Box::new(tls))
            }
            already_tls @ Channel::Tls(_) => already_tls,
        };
        Ok(self)
    }

    /// Set whether data connections use passive mode.
    pub fn set_passive(&mut self, passive: bool) {
        self.passive = passive;
    }

    /// When set, the address advertised in the `PASV` reply is ignored and
    /// the control connection's peer address is used instead.
    pub fn set_ignore_passive_address(&mut self, ignore: bool) {
        self.ignore_passive_address = ignore;
    }

    /// Enable TLS on subsequent data connections.
    pub fn set_data_tls(&mut self, connector: TlsConnector, domain: String) {
        self.data_tls = Some((connector, domain));
    }

    /// Send a command and read the reply.
    pub fn command(&mut self, cmd: &str) -> Result<Reply, FtpError> {
        trace!(cmd, "ftp command");
        self.stream.write_all(cmd.as_bytes())?;
        self.stream.write_all(b"\r\n")?;
        self.stream.flush()?;
        let reply = self.read_reply()?;
        trace!(code = reply.code, "ftp reply");
        Ok(reply)
    }

    /// Open a data connection and send the transfer command on the control
    /// channel. Fails with [`FtpError::UnexpectedReply`] if the server does
    /// not answer with a positive preliminary (1xx) reply.
    pub fn open_data(&mut self, cmd: &str) -> Result<DataConn, FtpError> {
        let stream = if self.passive {
            let target = self.passive_target()?;
            let stream = TcpStream::connect(target)?;
            let reply = self.command(cmd)?;
            if !reply.is_preliminary() {
                return Err(FtpError::UnexpectedReply(reply));
            }
            stream
        } else {
            let listener = self.active_listener()?;
            let reply = self.command(cmd)?;
            if !reply.is_preliminary() {
                return Err(FtpError::UnexpectedReply(reply));
            }
            let (stream, _) = listener.accept()?;
            stream
        };

        let channel = match &self.data_tls {
            Some((connector, domain)) => {
                let tls = connector
                    .connect(domain, stream)
                    .map_err(|e| FtpError::Io(io::Error::other(e.to_string())))?;
                Channel::Tls(Box::new(tls))
            }
            None => Channel::Plain(stream),
        };
        Ok(DataConn(channel))
    }

    /// Read the transfer-complete reply after the data connection is closed.
    pub fn finish_data(&mut self) -> Result<Reply, FtpError> {
        let reply = self.read_reply()?;
        if reply.is_completion() {
            Ok(reply)
        } else {
            Err(FtpError::UnexpectedReply(reply))
        }
    }

    /// Negotiate a passive data connection target.
    fn passive_target(&mut self) -> Result<SocketAddr, FtpError> {
        let reply = self.command("PASV")?;
        if !reply.is_completion() {
            return Err(FtpError::UnexpectedReply(reply));
        }
        let (advertised_ip, port) = parse_pasv(&reply.text()).ok_or_else(|| {
            FtpError::Io(io::Error::other(format!(
                "malformed PASV reply: {}",
                reply.to_line()
            )))
        })?;

        let ip = if self.ignore_passive_address {
            self.peer.ip()
        } else {
            IpAddr::V4(advertised_ip)
        };
        Ok(SocketAddr::new(ip, port))
    }

    /// Bind a listener and announce it with `PORT` for active mode.
    fn active_listener(&mut self) -> Result<TcpListener, FtpError> {
        let local_ip = match &self.stream {
            Channel::Plain(s) => s.local_addr()?.ip(),
            Channel::Tls(s) => s.get_ref().local_addr()?.ip(),
        };
        let listener = TcpListener::bind((local_ip, 0))?;
        let port = listener.local_addr()?.port();

        let IpAddr::V4(v4) = local_ip else {
            return Err(FtpError::Io(io::Error::other(
                "active mode requires an IPv4 control connection",
            )));
        };
        let [a, b, c, d] = v4.octets();
        let reply = self.command(&format!(
            "PORT {a},{b},{c},{d},{},{}",
            port >> 8,
            port & 0xff
        ))?;
        if !reply.is_completion() {
            return Err(FtpError::UnexpectedReply(reply));
        }
        Ok(listener)
    }

    /// Read one (possibly multi-line) reply.
    fn read_reply(&mut self) -> Result<Reply, FtpError> {
        let first = self.read_line()?;
        let (code, rest, multiline) = split_reply_line(&first)
            .ok_or_else(|| io::Error::other(format!("malformed reply: {first}")))?;

        let mut lines = vec![rest.to_string()];
        if multiline {
            loop {
                let line = self.read_line()?;
                match split_reply_line(&line) {
                    Some((c, rest, false)) if c == code => {
                        lines.push(rest.to_string());
                        break;
                    }
                    _ => lines.push(line),
                }
            }
        }
        Ok(Reply { code, lines })
    }

    /// Read one CRLF-terminated line from the control channel.
    fn read_line(&mut self) -> io::Result<String> {
        loop {
            if let Some(pos) = self.buf.iter().position(|&b| b == b'\n') {
                let mut line: Vec<u8> = self.buf.drain(..=pos).collect();
                if line.last() == Some(&b'\n') {
                    line.pop();
                }
                if line.last() == Some(&b'\r') {
                    line.pop();
                }
                return Ok(String::from_utf8_lossy(&line).into_owned());
            }

            let mut chunk = [0u8; 512];
            let n = self.stream.read(&mut chunk)?;
            if n == 0 {
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "control connection closed",
                ));
            }
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }
}

/// Split a reply line into (code, text, is-multiline-start).
fn split_reply_line(line: &str) -> Option<(u16, &str, bool)> {
    if line.len() < 3 || !line.as_bytes()[..3].iter().all(u8::is_ascii_digit) {
        return None;
    }
    let code: u16 = line[..3].parse().ok()?;
    match line.as_bytes().get(3) {
        None => Some((code, "", false)),
        Some(b' ') => Some((code, &line[4..], false)),
        Some(b'-') => Some((code, &line[4..], true)),
        Some(_) => None,
    }
}

/// Extract host and port from a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2)` reply.
fn parse_pasv(text: &str) -> Option<(std::net::Ipv4Addr, u16)> {
    let start = text.find('(')?;
    let end = text[start..].find(')')? + start;
    let mut parts = text[start + 1..end].split(',');
    let mut next = || -> Option<u16> { parts.next()?.trim().parse().ok() };

    let (a, b, c, d) = (next()?, next()?, next()?, next()?);
    let (p1, p2) = (next()?, next()?);
    if a > 255 || b > 255 || c > 255 || d > 255 || p1 > 255 || p2 > 255 {
        return None;
    }
    Some((
        std::net::Ipv4Addr::new(a as u8, b as u8, c as u8, d as u8),
        (p1 << 8) | p2,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_reply_line_single() {
        assert_eq!(split_reply_line("220 ready"), Some((220, "ready", false)));
        assert_eq!(split_reply_line("220"), Some((220, "", false)));
    }

    #[test]
    fn split_reply_line_multiline_start() {
        assert_eq!(
            split_reply_line("214-The following commands are recognized"),
            Some((214, "The following commands are recognized", true))
        );
    }

    #[test]
    fn split_reply_line_rejects_garbage() {
        assert_eq!(split_reply_line("hello"), None);
        assert_eq!(split_reply_line("12"), None);
    }

    #[test]
    fn parse_pasv_extracts_address() {
        let (ip, port) = parse_pasv("Entering Passive Mode (127,0,0,1,195,149).").unwrap();
        assert_eq!(ip, std::net::Ipv4Addr::LOCALHOST);
        assert_eq!(port, 195 * 256 + 149);
    }

    #[test]
    fn parse_pasv_rejects_out_of_range() {
        assert!(parse_pasv("(300,0,0,1,1,1)").is_none());
        assert!(parse_pasv("no parentheses").is_none());
    }

    #[test]
    fn reply_code_classes() {
        let reply = |code| Reply {
            code,
            lines: vec![String::new()],
        };
        assert!(reply(150).is_preliminary());
        assert!(reply(226).is_completion());
        assert!(reply(331).is_intermediate());
        assert!(!reply(550).is_completion());
    }
}

//! FTP storage backend.
//!
//! [`FtpAdapter`] implements the [`StorageAdapter`] contract over a single
//! blocking FTP or explicit-FTPS session owned by a
//! [`FtpConnectionManager`]. The session working directory stays anchored at
//! a resolved absolute root; helpers that must `CWD` elsewhere restore it
//! before returning.

pub(crate) mod client;
mod connection;
mod listing;

use std::collections::VecDeque;
use std::io::{Cursor, Read, Write};
use std::time::Duration;

use client::FtpError;
pub use connection::{ConnectionState, FtpConnectionManager};
use listing::{mdtm_to_epoch, normalize_listing, parse_unix_line};

use crate::adapter::{Listing, StorageAdapter};
use crate::path::{normalize, parent};
use crate::{DirectoryEntry, EntryType, Metadata, StorageError, Visibility, WriteOptions};

/// Data-transfer representation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum TransferMode {
    /// `TYPE I`: bytes pass through unmodified.
    #[default]
    Binary,
    /// `TYPE A`: line endings are translated in transit.
    Ascii,
}

/// Connection and behavior settings for [`FtpAdapter`].
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct FtpConfig {
    /// Server hostname or address.
    pub host: String,
    /// Control-connection port.
    pub port: u16,
    /// Login username.
    pub username: String,
    /// Login password.
    pub password: String,
    /// Upgrade the session to explicit FTPS (`AUTH TLS`).
    pub tls: bool,
    /// Connect timeout.
    #[cfg_attr(feature = "serde", serde(default = "default_timeout"))]
    pub timeout: Duration,
    /// Remote root directory; all logical paths resolve beneath it.
    pub root: String,
    /// Mode applied for [`Visibility::Public`] via `SITE CHMOD`.
    pub perm_public: u32,
    /// Mode applied for [`Visibility::Private`] via `SITE CHMOD`.
    pub perm_private: u32,
    /// Use passive (`PASV`) data connections; active (`PORT`) otherwise.
    pub passive: bool,
    /// Transfer representation type.
    pub transfer_mode: TransferMode,
    /// Server-dialect hint; when set, skips the `HELP` probe.
    pub system_type: Option<String>,
    /// Substitute the control peer's address for the one advertised in
    /// `PASV` replies (NAT setups advertising internal addresses).
    pub ignore_passive_address: Option<bool>,
    /// Walk directories client-side instead of relying on `LIST -R`.
    pub manual_recursion: bool,
    /// Request UTF-8 path mode (`OPTS UTF8 ON`); refusal is fatal.
    pub utf8: bool,
}

impl Default for FtpConfig {
    fn default() -> Self {
        Self {
            host: String::from("127.0.0.1"),
            port: 21,
            username: String::from("anonymous"),
            password: String::new(),
            tls: false,
            timeout: default_timeout(),
            root: String::new(),
            perm_public: 0o644,
            perm_private: 0o600,
            passive: true,
            transfer_mode: TransferMode::Binary,
            system_type: None,
            ignore_passive_address: None,
            manual_recursion: false,
            utf8: false,
        }
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(90)
}

/// Storage adapter over a remote FTP server.
///
/// All operations lazily (re)connect through the owned
/// [`FtpConnectionManager`], so a dropped session heals on the next call.
/// The adapter is a single blocking session; see [`StorageAdapter`] for the
/// concurrency contract.
#[derive(Debug)]
pub struct FtpAdapter {
    manager: FtpConnectionManager,
}

impl FtpAdapter {
    /// Create an adapter. No connection is made until the first operation
    /// (or an explicit [`connect`](Self::connect)).
    pub fn new(config: FtpConfig) -> Self {
        Self {
            manager: FtpConnectionManager::new(config),
        }
    }

    /// Eagerly establish the session.
    ///
    /// # Errors
    ///
    /// [`StorageError::ConnectionFailure`] describing the failed step.
    pub fn connect(&mut self) -> Result<(), StorageError> {
        self.manager.connect()
    }

    /// Tear the session down; the next operation reconnects.
    pub fn disconnect(&mut self) {
        self.manager.disconnect();
    }

    /// Probe session liveness. See [`FtpConnectionManager::is_connected`].
    pub fn is_connected(&mut self) -> Result<bool, StorageError> {
        self.manager.is_connected()
    }

    /// The session manager, exposing lifecycle state.
    pub fn manager(&self) -> &FtpConnectionManager {
        &self.manager
    }

    fn ready(&mut self) -> Result<(), StorageError> {
        self.manager.ensure_ready()
    }

    /// Map a client failure into a contextual storage error. A 550 reply is
    /// the server's "no such file or directory".
    fn err(operation: &'static str, path: &str, e: FtpError) -> StorageError {
        match e {
            FtpError::Io(source) => StorageError::Io {
                operation,
                path: path.to_string(),
                source,
            },
            FtpError::UnexpectedReply(reply) if reply.code == 550 => StorageError::NotFound {
                path: path.to_string(),
            },
            FtpError::UnexpectedReply(reply) => StorageError::Protocol {
                operation,
                reply: reply.to_line(),
            },
        }
    }

    /// Metadata probe for one logical path, or `None` if nothing exists
    /// there.
    ///
    /// Directories are detected with a `CWD` attempt (restored afterwards);
    /// files with a single-path `LIST -A` plus an `MDTM` round trip for the
    /// timestamp.
    fn probe(&mut self, logical: &str) -> Result<Option<Metadata>, StorageError> {
        if logical.is_empty() {
            // The root always exists.
            return Ok(Some(Metadata::directory()));
        }
        self.ready()?;

        let reply = self
            .manager
            .command(&format!("CWD {logical}"))
            .map_err(|e| Self::err("metadata", logical, e))?;
        if reply.is_completion() {
            self.manager
                .restore_root()
                .map_err(|e| Self::err("metadata", logical, e))?;
            return Ok(Some(Metadata::directory()));
        }

        // Globbing characters would turn the single-path listing into a
        // pattern match.
        let escaped = logical.replace('*', "\\*");
        let lines = match self.manager.raw_list("-A", &escaped) {
            Ok(lines) => lines,
            Err(FtpError::UnexpectedReply(reply)) if reply.code == 550 => return Ok(None),
            Err(e) => return Err(Self::err("metadata", logical, e)),
        };

        let mut lines = lines.iter().map(|l| l.trim_end()).filter(|l| !l.is_empty());
        let first = match lines.next() {
            Some(first) => first,
            None => return Ok(None),
        };
        if first.contains("not found") {
            return Ok(None);
        }
        let Some(parsed) = parse_unix_line(first) else {
            return Ok(None);
        };

        let timestamp = match parsed.entry_type {
            EntryType::Directory => None,
            _ => self.mdtm(logical)?,
        };
        Ok(Some(parsed.into_metadata(timestamp)))
    }

    /// Modification timestamp via `MDTM`, or `None` when the server does not
    /// support it.
    fn mdtm(&mut self, logical: &str) -> Result<Option<i64>, StorageError> {
        match self.manager.command(&format!("MDTM {logical}")) {
            Ok(reply) if reply.code == 213 => Ok(mdtm_to_epoch(&reply.text())),
            Ok(_) => Ok(None),
            Err(e) => Err(Self::err("metadata", logical, e)),
        }
    }

    fn assert_file_present(&mut self, logical: &str) -> Result<(), StorageError> {
        match self.probe(logical)? {
            Some(meta) if meta.is_file() => Ok(()),
            _ => Err(StorageError::NotFound {
                path: logical.to_string(),
            }),
        }
    }

    fn assert_absent(
        &mut self,
        logical: &str,
        operation: &'static str,
    ) -> Result<(), StorageError> {
        if self.probe(logical)?.is_some() {
            return Err(StorageError::AlreadyExists {
                path: logical.to_string(),
                operation,
            });
        }
        Ok(())
    }

    /// Make sure the parent directory of `logical` exists.
    fn ensure_parent(&mut self, logical: &str) -> Result<(), StorageError> {
        let parent = parent(logical).to_string();
        if parent.is_empty() {
            return Ok(());
        }
        self.create_segments(&parent)
    }

    /// Walk the path segment by segment from the session root, creating
    /// missing directories and descending into each. The session working
    /// directory is restored on every exit path.
    fn create_segments(&mut self, logical: &str) -> Result<(), StorageError> {
        self.ready()?;
        for segment in logical.split('/') {
            if !self.segment_exists(segment)? {
                let reply = self
                    .manager
                    .command(&format!("MKD {segment}"))
                    .map_err(|e| Self::err("create_dir", logical, e))?;
                if !reply.is_completion() {
                    self.restore_root_after("create_dir", logical)?;
                    return Err(StorageError::DirectoryCreationFailed {
                        path: logical.to_string(),
                    });
                }
            }
            let reply = self
                .manager
                .command(&format!("CWD {segment}"))
                .map_err(|e| Self::err("create_dir", logical, e))?;
            if !reply.is_completion() {
                self.restore_root_after("create_dir", logical)?;
                return Err(StorageError::DirectoryCreationFailed {
                    path: logical.to_string(),
                });
            }
        }
        self.restore_root_after("create_dir", logical)
    }

    /// Whether `name` exists in the session's current directory, via a name
    /// listing. Servers that refuse `NLST` on an empty directory report it
    /// as empty rather than failing the walk.
    fn segment_exists(&mut self, name: &str) -> Result<bool, StorageError> {
        let names = match self.manager.nlst(".") {
            Ok(names) => names,
            Err(FtpError::UnexpectedReply(_)) => Vec::new(),
            Err(e) => return Err(Self::err("create_dir", name, e)),
        };
        Ok(names
            .iter()
            .map(|n| n.trim_start_matches("./"))
            .any(|n| n == name))
    }

    fn restore_root_after(
        &mut self,
        operation: &'static str,
        logical: &str,
    ) -> Result<(), StorageError> {
        self.manager
            .restore_root()
            .map_err(|e| Self::err(operation, logical, e))
    }

    /// `STOR` the buffered contents, creating the parent directory first and
    /// applying visibility afterwards.
    fn store(
        &mut self,
        logical: &str,
        contents: &[u8],
        options: &WriteOptions,
    ) -> Result<(), StorageError> {
        self.ensure_parent(logical)?;

        // Transfer verbs take the pathname verbatim; the Pure-FTPd space
        // escape applies to raw listing arguments only.
        let mut data = self
            .manager
            .open_data(&format!("STOR {logical}"))
            .map_err(|e| Self::err("write", logical, e))?;
        data.write_all(contents)
            .map_err(|e| StorageError::io("write", logical, e))?;
        data.close()
            .map_err(|e| StorageError::io("write", logical, e))?;
        self.manager
            .finish_data()
            .map_err(|e| Self::err("write", logical, e))?;

        if let Some(visibility) = options.visibility {
            self.apply_visibility(logical, visibility)?;
        }
        Ok(())
    }

    fn apply_visibility(
        &mut self,
        logical: &str,
        visibility: Visibility,
    ) -> Result<(), StorageError> {
        let mode = match visibility {
            Visibility::Public => self.manager.config().perm_public,
            Visibility::Private => self.manager.config().perm_private,
        };
        let reply = self
            .manager
            .command(&format!("SITE CHMOD {mode:o} {logical}"))
            .map_err(|e| Self::err("set_visibility", logical, e))?;
        if reply.is_completion() {
            Ok(())
        } else if reply.code == 550 {
            Err(StorageError::NotFound {
                path: logical.to_string(),
            })
        } else {
            Err(StorageError::Protocol {
                operation: "set_visibility",
                reply: reply.to_line(),
            })
        }
    }

    /// Full listing of `logical`, either in one server-side `LIST -R` shot
    /// or by walking subdirectories client-side when the server's recursive
    /// listing cannot be trusted.
    fn list_directory(
        &mut self,
        logical: &str,
        recursive: bool,
    ) -> Result<Vec<DirectoryEntry>, StorageError> {
        self.ready()?;

        // Listing a file path would re-base the file's own entry under
        // itself, so require the target to be a directory first.
        if !logical.is_empty() {
            let reply = self
                .manager
                .command(&format!("CWD {logical}"))
                .map_err(|e| Self::err("list_contents", logical, e))?;
            if !reply.is_completion() {
                return Err(StorageError::NotFound {
                    path: logical.to_string(),
                });
            }
            self.restore_root_after("list_contents", logical)?;
        }

        let escaped = logical.replace('*', "\\*");

        if recursive && self.manager.config().manual_recursion {
            let mut out = Vec::new();
            let mut queue = VecDeque::from([escaped]);
            while let Some(dir) = queue.pop_front() {
                let lines = self
                    .manager
                    .raw_list("-aln", &dir)
                    .map_err(|e| Self::err("list_contents", logical, e))?;
                for entry in normalize_listing(&lines, &dir) {
                    if entry.entry_type == EntryType::Directory {
                        queue.push_back(entry.path.clone());
                    }
                    out.push(entry);
                }
            }
            return Ok(out);
        }

        let options = if recursive { "-alnR" } else { "-aln" };
        let lines = self
            .manager
            .raw_list(options, &escaped)
            .map_err(|e| Self::err("list_contents", logical, e))?;
        Ok(normalize_listing(&lines, logical))
    }
}

impl StorageAdapter for FtpAdapter {
    fn has_file(&mut self, path: &str) -> Result<bool, StorageError> {
        let logical = normalize(path)?;
        Ok(matches!(self.probe(&logical)?, Some(meta) if meta.is_file()))
    }

    fn has_dir(&mut self, path: &str) -> Result<bool, StorageError> {
        let logical = normalize(path)?;
        if logical.is_empty() {
            return Ok(true);
        }
        self.ready()?;
        let reply = self
            .manager
            .command(&format!("CWD {logical}"))
            .map_err(|e| Self::err("has_dir", &logical, e))?;
        if reply.is_completion() {
            self.restore_root_after("has_dir", &logical)?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    fn read(&mut self, path: &str) -> Result<Vec<u8>, StorageError> {
        let logical = normalize(path)?;
        self.ready()?;

        let mut data = match self.manager.open_data(&format!("RETR {logical}")) {
            Ok(data) => data,
            Err(FtpError::UnexpectedReply(reply)) if reply.code == 550 => {
                return Err(StorageError::NotFound { path: logical });
            }
            Err(e) => return Err(Self::err("read", &logical, e)),
        };
        let mut contents = Vec::new();
        data.read_to_end(&mut contents)
            .map_err(|e| StorageError::io("read", &logical, e))?;
        data.close()
            .map_err(|e| StorageError::io("read", &logical, e))?;
        self.manager
            .finish_data()
            .map_err(|e| Self::err("read", &logical, e))?;
        Ok(contents)
    }

    fn open_read(&mut self, path: &str) -> Result<Box<dyn Read + Send>, StorageError> {
        // One control connection cannot interleave a long-lived download
        // with other commands, so the transfer is drained eagerly and the
        // caller streams from the buffer.
        let contents = self.read(path)?;
        Ok(Box::new(Cursor::new(contents)))
    }

    fn write(
        &mut self,
        path: &str,
        contents: &[u8],
        options: &WriteOptions,
    ) -> Result<(), StorageError> {
        let logical = normalize(path)?;
        if matches!(self.probe(&logical)?, Some(meta) if meta.is_file()) {
            return Err(StorageError::AlreadyExists {
                path: logical,
                operation: "write",
            });
        }
        self.store(&logical, contents, options)
    }

    fn write_stream(
        &mut self,
        path: &str,
        contents: &mut dyn Read,
        options: &WriteOptions,
    ) -> Result<(), StorageError> {
        let mut buffer = Vec::new();
        contents
            .read_to_end(&mut buffer)
            .map_err(|e| StorageError::io("write", path, e))?;
        self.write(path, &buffer, options)
    }

    fn update(
        &mut self,
        path: &str,
        contents: &[u8],
        options: &WriteOptions,
    ) -> Result<(), StorageError> {
        let logical = normalize(path)?;
        self.assert_file_present(&logical)?;
        self.store(&logical, contents, options)
    }

    fn update_stream(
        &mut self,
        path: &str,
        contents: &mut dyn Read,
        options: &WriteOptions,
    ) -> Result<(), StorageError> {
        let mut buffer = Vec::new();
        contents
            .read_to_end(&mut buffer)
            .map_err(|e| StorageError::io("update", path, e))?;
        self.update(path, &buffer, options)
    }

    fn put(
        &mut self,
        path: &str,
        contents: &[u8],
        options: &WriteOptions,
    ) -> Result<(), StorageError> {
        let logical = normalize(path)?;
        self.ready()?;
        self.store(&logical, contents, options)
    }

    fn put_stream(
        &mut self,
        path: &str,
        contents: &mut dyn Read,
        options: &WriteOptions,
    ) -> Result<(), StorageError> {
        let mut buffer = Vec::new();
        contents
            .read_to_end(&mut buffer)
            .map_err(|e| StorageError::io("put", path, e))?;
        self.put(path, &buffer, options)
    }

    fn rename(&mut self, path: &str, new_path: &str) -> Result<(), StorageError> {
        let source = normalize(path)?;
        let destination = normalize(new_path)?;
        if self.probe(&source)?.is_none() {
            return Err(StorageError::NotFound { path: source });
        }
        self.assert_absent(&destination, "rename")?;
        self.ensure_parent(&destination)?;

        let reply = self
            .manager
            .command(&format!("RNFR {source}"))
            .map_err(|e| Self::err("rename", &source, e))?;
        if !reply.is_intermediate() {
            return Err(StorageError::Protocol {
                operation: "rename",
                reply: reply.to_line(),
            });
        }
        let reply = self
            .manager
            .command(&format!("RNTO {destination}"))
            .map_err(|e| Self::err("rename", &destination, e))?;
        if reply.is_completion() {
            Ok(())
        } else {
            Err(StorageError::Protocol {
                operation: "rename",
                reply: reply.to_line(),
            })
        }
    }

    fn copy(&mut self, path: &str, new_path: &str) -> Result<(), StorageError> {
        let source = normalize(path)?;
        let destination = normalize(new_path)?;
        // Both preconditions are checked before any transfer starts.
        self.assert_file_present(&source)?;
        self.assert_absent(&destination, "copy")?;

        let contents = self.read(&source)?;
        self.store(&destination, &contents, &WriteOptions::default())
    }

    fn delete_file(&mut self, path: &str) -> Result<(), StorageError> {
        let logical = normalize(path)?;
        self.ready()?;
        let reply = self
            .manager
            .command(&format!("DELE {logical}"))
            .map_err(|e| Self::err("delete_file", &logical, e))?;
        if reply.is_completion() {
            Ok(())
        } else if reply.code == 550 {
            Err(StorageError::NotFound { path: logical })
        } else {
            Err(StorageError::Protocol {
                operation: "delete_file",
                reply: reply.to_line(),
            })
        }
    }

    fn delete_dir(&mut self, path: &str) -> Result<(), StorageError> {
        let logical = normalize(path)?;
        let mut contents = self.list_directory(&logical, true)?;
        // Deepest entries first, files before the directories that hold
        // them. Aborts on the first failure; prior removals stand.
        contents.reverse();

        for entry in contents.iter().filter(|e| e.entry_type != EntryType::Directory) {
            self.delete_file(&entry.path)?;
        }
        for entry in contents.iter().filter(|e| e.entry_type == EntryType::Directory) {
            let reply = self
                .manager
                .command(&format!("RMD {}", entry.path))
                .map_err(|e| Self::err("delete_dir", &entry.path, e))?;
            if !reply.is_completion() {
                return Err(StorageError::Protocol {
                    operation: "delete_dir",
                    reply: reply.to_line(),
                });
            }
        }

        let reply = self
            .manager
            .command(&format!("RMD {logical}"))
            .map_err(|e| Self::err("delete_dir", &logical, e))?;
        if reply.is_completion() {
            Ok(())
        } else if reply.code == 550 {
            Err(StorageError::NotFound { path: logical })
        } else {
            Err(StorageError::Protocol {
                operation: "delete_dir",
                reply: reply.to_line(),
            })
        }
    }

    fn create_dir(&mut self, path: &str, _options: &WriteOptions) -> Result<(), StorageError> {
        let logical = normalize(path)?;
        if logical.is_empty() {
            return Ok(());
        }
        self.create_segments(&logical)
    }

    fn list_contents(
        &mut self,
        directory: &str,
        recursive: bool,
    ) -> Result<Listing, StorageError> {
        let logical = normalize(directory)?;
        let entries = self.list_directory(&logical, recursive)?;
        Ok(Listing::from_vec(entries))
    }

    fn metadata(&mut self, path: &str) -> Result<Metadata, StorageError> {
        let logical = normalize(path)?;
        self.probe(&logical)?
            .ok_or(StorageError::NotFound { path: logical })
    }

    fn set_visibility(
        &mut self,
        path: &str,
        visibility: Visibility,
    ) -> Result<(), StorageError> {
        let logical = normalize(path)?;
        self.ready()?;
        self.apply_visibility(&logical, visibility)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = FtpConfig::default();
        assert_eq!(config.port, 21);
        assert_eq!(config.perm_public, 0o644);
        assert_eq!(config.perm_private, 0o600);
        assert!(config.passive);
        assert_eq!(config.transfer_mode, TransferMode::Binary);
    }

    #[test]
    fn adapter_starts_disconnected() {
        let adapter = FtpAdapter::new(FtpConfig::default());
        assert_eq!(adapter.manager().state(), ConnectionState::Disconnected);
    }
}

//! SFTP transport for remote archive storage.
//!
//! ssh2 is synchronous; callers on the async runtime wrap these operations
//! in `spawn_blocking`. Connection failures are transient (the orchestrator
//! retries them); authentication failures are validation errors.

use crate::error::{BackupError, Result};
use crate::settings::{RemoteCredential, RemoteSubtype};
use ssh2::Session;
use std::io::{Read, Write};
use std::net::TcpStream;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 22;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

pub struct SftpClient {
    host: String,
    user: String,
    secret: String,
    port: u16,
    session: Option<Session>,
}

impl SftpClient {
    pub fn new() -> Self {
        Self {
            host: String::new(),
            user: String::new(),
            secret: String::new(),
            port: DEFAULT_PORT,
            session: None,
        }
    }

    pub fn from_credential(credential: &RemoteCredential) -> Self {
        Self {
            host: credential.host.clone(),
            user: credential.user.clone(),
            secret: credential.secret.clone(),
            port: if credential.port == 0 {
                DEFAULT_PORT
            } else {
                credential.port
            },
            session: None,
        }
    }

    /// Restore cached connection defaults and forget credentials.
    pub fn reset(&mut self) {
        self.host.clear();
        self.user.clear();
        self.secret.clear();
        self.port = DEFAULT_PORT;
    }

    pub fn disconnect(&mut self) {
        if let Some(session) = self.session.take() {
            let _ = session.disconnect(None, "done", None);
        }
    }

    /// Attempt a real connect + auth handshake with the given credentials.
    /// Human-readable diagnostics (never the secret) are appended to
    /// `errors` on failure.
    pub fn is_valid_credentials(
        &mut self,
        host: &str,
        user: &str,
        secret: &str,
        port: u16,
        subtype: RemoteSubtype,
        errors: &mut Vec<String>,
    ) -> bool {
        if subtype != RemoteSubtype::Sftp {
            errors.push(format!(
                "unsupported protocol subtype {subtype}; only sftp transport is available"
            ));
            return false;
        }
        if host.is_empty() || user.is_empty() {
            errors.push("host and user are required".into());
            return false;
        }

        self.host = host.to_string();
        self.user = user.to_string();
        self.secret = secret.to_string();
        self.port = if port == 0 { DEFAULT_PORT } else { port };
        self.disconnect();

        match self.connect() {
            Ok(()) => true,
            Err(e) => {
                errors.push(e.to_string());
                false
            }
        }
    }

    fn connect(&mut self) -> Result<()> {
        if self.session.is_some() {
            return Ok(());
        }

        let addr = format!("{}:{}", self.host, self.port);
        let tcp = match addr.parse::<std::net::SocketAddr>() {
            Ok(sock_addr) => TcpStream::connect_timeout(&sock_addr, CONNECT_TIMEOUT),
            // Not a literal address; fall back to resolver-based connect.
            Err(_) => TcpStream::connect(&addr),
        }
        .map_err(|e| BackupError::Transient(format!("could not connect to {addr}: {e}")))?;

        let mut session = Session::new()
            .map_err(|e| BackupError::Transient(format!("could not create ssh session: {e}")))?;
        session.set_tcp_stream(tcp);
        session
            .handshake()
            .map_err(|e| BackupError::Transient(format!("ssh handshake with {addr} failed: {e}")))?;

        session
            .userauth_password(&self.user, &self.secret)
            .map_err(|_| {
                BackupError::Validation(format!(
                    "authentication failed for user {} on {}",
                    self.user, self.host
                ))
            })?;
        if !session.authenticated() {
            return Err(BackupError::Validation(format!(
                "authentication failed for user {} on {}",
                self.user, self.host
            )));
        }

        self.session = Some(session);
        Ok(())
    }

    fn session(&mut self) -> Result<&Session> {
        self.connect()?;
        self.session
            .as_ref()
            .ok_or_else(|| anyhow::anyhow!("ssh session missing after connect").into())
    }

    /// Upload `local` into `remote_dir`, creating the directory when needed.
    /// Returns the remote file name.
    pub fn upload(&mut self, local: &Path, remote_dir: &str) -> Result<String> {
        let basename = local
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| anyhow::anyhow!("archive path has no file name"))?;
        let remote_path = format!("{remote_dir}/{basename}");

        let mut source = std::fs::File::open(local)?;

        let session = self.session()?;
        let sftp = session
            .sftp()
            .map_err(|e| BackupError::Transient(format!("sftp channel failed: {e}")))?;

        if sftp.stat(Path::new(remote_dir)).is_err() {
            sftp.mkdir(Path::new(remote_dir), 0o755)
                .map_err(|e| BackupError::Transient(format!("could not create {remote_dir}: {e}")))?;
        }

        let mut target = sftp
            .create(Path::new(&remote_path))
            .map_err(|e| BackupError::Transient(format!("could not create {remote_path}: {e}")))?;

        let mut buffer = vec![0u8; 128 * 1024];
        loop {
            let read = source.read(&mut buffer)?;
            if read == 0 {
                break;
            }
            target
                .write_all(&buffer[..read])
                .map_err(|e| BackupError::Transient(format!("upload of {basename} failed: {e}")))?;
        }

        tracing::info!(remote = %remote_path, "Archive uploaded");
        Ok(basename)
    }

    /// Names of this site's archives in `remote_dir`, oldest first.
    /// Archive names embed their creation timestamp, so lexical order is
    /// chronological order.
    pub fn list_archives(&mut self, remote_dir: &str) -> Result<Vec<String>> {
        let session = self.session()?;
        let sftp = session
            .sftp()
            .map_err(|e| BackupError::Transient(format!("sftp channel failed: {e}")))?;

        let entries = match sftp.readdir(Path::new(remote_dir)) {
            Ok(entries) => entries,
            // Missing directory simply means no archives yet.
            Err(_) => return Ok(Vec::new()),
        };

        let mut names: Vec<String> = entries
            .into_iter()
            .filter_map(|(path, stat)| {
                if !stat.is_file() {
                    return None;
                }
                let name = path.file_name()?.to_string_lossy().into_owned();
                name.starts_with("backup-").then_some(name)
            })
            .collect();
        names.sort();
        Ok(names)
    }

    /// Delete the oldest archives beyond `retention_count` (0 = unlimited).
    /// Returns the deleted names.
    pub fn enforce_retention(&mut self, remote_dir: &str, retention_count: u32) -> Result<Vec<String>> {
        let names = self.list_archives(remote_dir)?;
        let doomed = prune_candidates(names, retention_count);

        let session = self.session()?;
        let sftp = session
            .sftp()
            .map_err(|e| BackupError::Transient(format!("sftp channel failed: {e}")))?;

        for name in &doomed {
            let remote_path = format!("{remote_dir}/{name}");
            sftp.unlink(Path::new(&remote_path))
                .map_err(|e| BackupError::Transient(format!("could not delete {remote_path}: {e}")))?;
            tracing::info!(remote = %remote_path, "Pruned remote archive");
        }
        Ok(doomed)
    }
}

impl Default for SftpClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Which archives retention would delete: everything before the newest
/// `retention_count` entries. 0 keeps everything.
pub fn prune_candidates(mut names: Vec<String>, retention_count: u32) -> Vec<String> {
    if retention_count == 0 {
        return Vec::new();
    }
    names.sort();
    let keep = retention_count as usize;
    if names.len() <= keep {
        return Vec::new();
    }
    names.truncate(names.len() - keep);
    names
}

#[cfg(test)]
mod tests {
    use super::*;

    fn archive_names(stamps: &[&str]) -> Vec<String> {
        stamps
            .iter()
            .map(|s| format!("backup-{s}-abcd1234.tar.gz"))
            .collect()
    }

    #[test]
    fn retention_deletes_exactly_the_oldest_beyond_count() {
        let names = archive_names(&[
            "20240101-000000",
            "20240102-000000",
            "20240103-000000",
            "20240104-000000",
            "20240105-000000",
        ]);

        let doomed = prune_candidates(names, 3);
        assert_eq!(
            doomed,
            archive_names(&["20240101-000000", "20240102-000000"])
        );
    }

    #[test]
    fn retention_zero_means_unlimited() {
        let names = archive_names(&["20240101-000000", "20240102-000000"]);
        assert!(prune_candidates(names, 0).is_empty());
    }

    #[test]
    fn retention_with_fewer_archives_than_count_deletes_nothing() {
        let names = archive_names(&["20240101-000000"]);
        assert!(prune_candidates(names, 3).is_empty());
    }

    #[test]
    fn unsorted_input_still_prunes_oldest_first() {
        let names = archive_names(&["20240103-000000", "20240101-000000", "20240102-000000"]);
        let doomed = prune_candidates(names, 2);
        assert_eq!(doomed, archive_names(&["20240101-000000"]));
    }
}

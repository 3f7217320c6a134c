//! Remote storage: credential management and the SFTP transport.

pub mod sftp;

pub use sftp::{prune_candidates, SftpClient, DEFAULT_PORT};

use crate::error::{BackupError, Result};
use crate::settings::{RemoteSubtype, SettingsStore};
use std::sync::Arc;

/// Key of the credential record inside the settings document's remote map.
pub const REMOTE_KEY: &str = "sftp";

/// Directory on the remote host holding this site's archives.
pub const REMOTE_BACKUP_DIR: &str = "site-backups";

/// User-submitted remote settings, pre-validation.
#[derive(Debug, Clone)]
pub struct RemoteForm {
    pub host: String,
    pub user: String,
    pub secret: String,
    pub port: u16,
    pub subtype: RemoteSubtype,
    pub retention_count: u32,
    pub nickname: String,
}

/// Validated save/delete flows over the per-remote-type credential record.
pub struct RemoteSettings {
    store: Arc<dyn SettingsStore>,
    client: SftpClient,
}

impl RemoteSettings {
    pub fn new(store: Arc<dyn SettingsStore>) -> Self {
        Self {
            store,
            client: SftpClient::new(),
        }
    }

    /// Persist remote settings.
    ///
    /// host/user/secret/port/subtype are written only when the credentials
    /// validate against the live host; retention_count and nickname are
    /// written regardless, so retention can be adjusted without re-entering
    /// credentials.
    pub fn save(&mut self, form: &RemoteForm) -> Result<()> {
        let mut errors = Vec::new();
        let valid = self.client.is_valid_credentials(
            &form.host,
            &form.user,
            &form.secret,
            form.port,
            form.subtype,
            &mut errors,
        );

        let mut doc = self.store.get()?;
        let record = doc.remote.entry(REMOTE_KEY.to_string()).or_default();
        if valid {
            record.host = form.host.clone();
            record.user = form.user.clone();
            record.secret = form.secret.clone();
            record.port = form.port;
            record.subtype = form.subtype;
        }
        record.retention_count = form.retention_count;
        record.nickname = form.nickname.clone();
        self.store.save(&doc)?;

        if valid {
            Ok(())
        } else {
            Err(BackupError::Validation(errors.join("; ")))
        }
    }

    /// Clear the credential record, drop any live session and reset the
    /// client's cached connection defaults.
    pub fn delete(&mut self) -> Result<()> {
        let mut doc = self.store.get()?;
        doc.remote.insert(REMOTE_KEY.to_string(), Default::default());
        self.store.save(&doc)?;

        self.client.disconnect();
        self.client.reset();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{MemorySettingsStore, RemoteCredential};

    fn form(host: &str) -> RemoteForm {
        RemoteForm {
            host: host.to_string(),
            user: "backup".into(),
            secret: "s3cret".into(),
            port: DEFAULT_PORT,
            subtype: RemoteSubtype::Sftp,
            retention_count: 4,
            nickname: "offsite".into(),
        }
    }

    #[test]
    fn invalid_credentials_still_persist_retention_and_nickname() {
        let store = Arc::new(MemorySettingsStore::new());
        let mut remote = RemoteSettings::new(store.clone());

        // 127.0.0.1:1 refuses connections, so validation fails fast.
        let mut bad = form("127.0.0.1");
        bad.port = 1;
        let err = remote.save(&bad).unwrap_err();
        assert!(matches!(err, BackupError::Validation(_)));
        // Diagnostics must not leak the secret.
        assert!(!err.to_string().contains("s3cret"));

        let record = store.get().unwrap().remote[REMOTE_KEY].clone();
        assert_eq!(record.retention_count, 4);
        assert_eq!(record.nickname, "offsite");
        // Credentials were not persisted.
        assert!(record.host.is_empty());
        assert!(record.secret.is_empty());
    }

    #[test]
    fn delete_clears_the_record() -> Result<()> {
        let store = Arc::new(MemorySettingsStore::new());
        let mut doc = store.get()?;
        doc.remote.insert(
            REMOTE_KEY.to_string(),
            RemoteCredential {
                host: "backups.example.com".into(),
                user: "backup".into(),
                secret: "s3cret".into(),
                port: 22,
                subtype: RemoteSubtype::Sftp,
                retention_count: 4,
                nickname: "offsite".into(),
            },
        );
        store.save(&doc)?;

        let mut remote = RemoteSettings::new(store.clone());
        remote.delete()?;

        let record = store.get()?.remote[REMOTE_KEY].clone();
        assert_eq!(record, RemoteCredential::default());
        Ok(())
    }

    #[test]
    fn plain_ftp_subtype_is_rejected_without_probing() {
        let store = Arc::new(MemorySettingsStore::new());
        let mut remote = RemoteSettings::new(store);

        let mut bad = form("backups.example.com");
        bad.subtype = RemoteSubtype::Ftp;
        let err = remote.save(&bad).unwrap_err();
        assert!(err.to_string().contains("sftp"));
    }
}

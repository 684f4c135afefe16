//! File-based credential storage.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use directories::BaseDirs;
use serde::{Deserialize, Serialize};

use super::CredentialStore;
use crate::auth::{DeviceToken, Session};
use crate::{Error, Result};

const APP_DIR: &str = ".proxy-auth";
const CREDENTIALS_DIR: &str = "credentials";

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoredEntry {
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<DeviceToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    session: Option<Session>,
}

impl StoredEntry {
    fn is_empty(&self) -> bool {
        self.token.is_none() && self.session.is_none()
    }
}

/// One JSON document per service URL inside a directory.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Store entries as JSON files under `dir`. The directory is created on first write.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// `~/.proxy-auth/credentials`, if a home directory can be determined.
    pub fn default_location() -> Option<Self> {
        BaseDirs::new().map(|dirs| Self::new(dirs.home_dir().join(APP_DIR).join(CREDENTIALS_DIR)))
    }

    /// Directory holding the entry files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn entry_path(&self, service_url: &str) -> PathBuf {
        let name: String = service_url
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
            .collect();
        self.dir.join(format!("{}.json", name))
    }

    async fn read_entry(&self, service_url: &str) -> Result<StoredEntry> {
        let path = self.entry_path(service_url);
        let content = match tokio::fs::read_to_string(&path).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(StoredEntry::default());
            }
            Err(e) => {
                return Err(Error::Store(format!(
                    "Failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        serde_json::from_str(&content)
            .map_err(|e| Error::Store(format!("Failed to parse {}: {}", path.display(), e)))
    }

    async fn write_entry(&self, service_url: &str, entry: &StoredEntry) -> Result<()> {
        let path = self.entry_path(service_url);

        if entry.is_empty() {
            return match tokio::fs::remove_file(&path).await {
                Ok(()) => Ok(()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(e) => Err(Error::Store(format!(
                    "Failed to remove {}: {}",
                    path.display(),
                    e
                ))),
            };
        }

        tokio::fs::create_dir_all(&self.dir)
            .await
            .map_err(|e| Error::Store(format!("Failed to create {}: {}", self.dir.display(), e)))?;
        let json = serde_json::to_vec_pretty(entry)
            .map_err(|e| Error::Store(format!("Failed to encode credentials: {}", e)))?;
        tokio::fs::write(&path, json)
            .await
            .map_err(|e| Error::Store(format!("Failed to write {}: {}", path.display(), e)))
    }
}

#[async_trait]
impl CredentialStore for FileStore {
    fn name(&self) -> &str {
        "file"
    }

    async fn load_token(&self, service_url: &str) -> Result<Option<DeviceToken>> {
        Ok(self.read_entry(service_url).await?.token)
    }

    async fn save_token(&self, service_url: &str, token: &DeviceToken) -> Result<()> {
        let mut entry = self.read_entry(service_url).await.unwrap_or_default();
        entry.token = Some(token.clone());
        self.write_entry(service_url, &entry).await
    }

    async fn delete_token(&self, service_url: &str) -> Result<()> {
        let mut entry = self.read_entry(service_url).await.unwrap_or_default();
        entry.token = None;
        self.write_entry(service_url, &entry).await
    }

    async fn load_session(&self, service_url: &str) -> Result<Option<Session>> {
        Ok(self.read_entry(service_url).await?.session)
    }

    async fn save_session(&self, service_url: &str, session: &Session) -> Result<()> {
        let mut entry = self.read_entry(service_url).await.unwrap_or_default();
        entry.session = Some(session.clone());
        self.write_entry(service_url, &entry).await
    }

    async fn delete_session(&self, service_url: &str) -> Result<()> {
        let mut entry = self.read_entry(service_url).await.unwrap_or_default();
        entry.session = None;
        self.write_entry(service_url, &entry).await
    }
}

//! A credential store persisted to a local file

use std::{
    io,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use tokio::{fs::OpenOptions, sync::Mutex};

use super::{BoxError, CredentialStore, InMemoryCredentialStore};
use crate::{CredentialPair, Credentials};

/// A credential store backed by a JSON document on the local filesystem
///
/// Reads are served from an in-memory snapshot taken when the store is
/// opened and kept current by every write. Writes replace the file by
/// renaming a fully written sibling file over it, so other processes never
/// observe a half-written document.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: PathBuf,
    snapshot: InMemoryCredentialStore,
    writes: Mutex<()>,
}

impl FileCredentialStore {
    /// Opens a store at `path`
    ///
    /// A missing file is treated as a logged-out state. A file that exists
    /// but cannot be parsed is reported as [`io::ErrorKind::InvalidData`].
    pub async fn open(path: impl Into<PathBuf>) -> io::Result<Self> {
        let path = path.into();
        let credentials = match read_credentials(&path).await {
            Ok(credentials) => credentials,
            Err(error) if error.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no stored credentials found");
                Credentials::empty()
            }
            Err(error) => return Err(error),
        };

        let snapshot = InMemoryCredentialStore::new();
        snapshot.replace(credentials);

        Ok(Self {
            path,
            snapshot,
            writes: Mutex::new(()),
        })
    }

    /// The path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    async fn write_credentials(&self, credentials: &Credentials) -> io::Result<()> {
        use tokio::io::AsyncWriteExt;

        let staging = self.staging_path();

        let mut file_opts = OpenOptions::new();

        file_opts.create(true).truncate(true).write(true);

        #[cfg(unix)]
        file_opts.mode(0o600);

        let mut file = file_opts.open(&staging).await?;
        let data = serde_json::to_vec_pretty(credentials)?;
        file.write_all(&data).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&staging, &self.path).await
    }
}

async fn read_credentials(path: &Path) -> io::Result<Credentials> {
    let data = tokio::fs::read(path).await?;
    let credentials = serde_json::from_slice(&data)?;
    Ok(credentials)
}

#[async_trait]
impl CredentialStore for FileCredentialStore {
    async fn load(&self) -> Credentials {
        self.snapshot.snapshot()
    }

    async fn save(&self, credentials: CredentialPair) -> Result<(), BoxError> {
        let _write = self.writes.lock().await;
        let credentials = Credentials::from(credentials);
        self.snapshot.replace(credentials.clone());
        Ok(self.write_credentials(&credentials).await?)
    }

    async fn clear(&self) -> Result<(), BoxError> {
        let _write = self.writes.lock().await;
        self.snapshot.replace(Credentials::empty());
        match tokio::fs::remove_file(&self.path).await {
            Err(error) if error.kind() != io::ErrorKind::NotFound => Err(error.into()),
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn missing_file_opens_as_logged_out() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCredentialStore::open(dir.path().join("credentials.json"))
            .await
            .unwrap();

        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn saved_credentials_survive_reopening() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::open(&path).await.unwrap();
        store.save(CredentialPair::new("A2", "B2")).await.unwrap();
        drop(store);

        let reopened = FileCredentialStore::open(&path).await.unwrap();
        let credentials = reopened.load().await;
        assert_eq!(credentials.access_token().unwrap().as_str(), "A2");
        assert_eq!(credentials.refresh_token().unwrap().as_str(), "B2");
        assert!(!dir.path().join("credentials.json.tmp").exists());
    }

    #[tokio::test]
    async fn clear_removes_the_file_and_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::open(&path).await.unwrap();
        store.save(CredentialPair::new("A1", "B1")).await.unwrap();
        assert!(path.exists());

        store.clear().await.unwrap();
        store.clear().await.unwrap();

        assert!(!path.exists());
        assert!(store.load().await.is_empty());
    }

    #[tokio::test]
    async fn malformed_file_is_invalid_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");
        std::fs::write(&path, b"not json").unwrap();

        let error = FileCredentialStore::open(&path).await.unwrap_err();
        assert_eq!(error.kind(), io::ErrorKind::InvalidData);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn file_is_private_to_the_owner() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("credentials.json");

        let store = FileCredentialStore::open(&path).await.unwrap();
        store.save(CredentialPair::new("A1", "B1")).await.unwrap();

        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }
}

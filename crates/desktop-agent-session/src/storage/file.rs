//! Credential persisted as a JSON file.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use desktop_agent_core::{Credential, StoreError, TokenStore};
use tokio::{fs, sync::Mutex};

/// Token store backed by a single JSON file.
///
/// Writes go to a sibling temp file that is then renamed over the target,
/// so a crash never leaves a half-written credential. On unix the file is
/// created with mode `0600`.
#[derive(Debug)]
pub struct FileTokenStore {
    path: PathBuf,
    /// Serializes writers; readers see either the old or the new file.
    write_lock: Mutex<()>,
}

impl FileTokenStore {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(std::ffi::OsStr::to_os_string)
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl TokenStore for FileTokenStore {
    async fn get(&self) -> Result<Option<Credential>, StoreError> {
        let text = match fs::read_to_string(&self.path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let credential: Credential = serde_json::from_str(&text)?;
        if credential.is_blank() {
            tracing::warn!(path = %self.path.display(), "ignoring blank stored credential");
            return Ok(None);
        }
        Ok(Some(credential))
    }

    async fn set(&self, credential: &Credential) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).await?;
        }

        let json = serde_json::to_vec_pretty(credential)?;
        let temp = self.temp_path();
        fs::write(&temp, json).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&temp, std::fs::Permissions::from_mode(0o600)).await?;
        }
        fs::rename(&temp, &self.path).await?;
        tracing::debug!(path = %self.path.display(), "credential saved");
        Ok(())
    }

    async fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;
        match fs::remove_file(&self.path).await {
            Ok(()) => {
                tracing::debug!(path = %self.path.display(), "credential removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

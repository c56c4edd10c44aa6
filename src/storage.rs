use std::path::{Path, PathBuf};

use anyhow::Context;
use async_trait::async_trait;
use bytes::Bytes;
use tracing::{debug, warn};

/// URL prefix under which stored avatars are served.
pub const PUBLIC_PREFIX: &str = "/uploads";

#[async_trait]
pub trait AvatarStorage: Send + Sync {
    /// Stores the file and returns the reference to keep on the user record.
    async fn put(&self, file_name: &str, body: Bytes) -> anyhow::Result<String>;
    /// Missing files and references owned by someone else are a no-op.
    async fn remove(&self, reference: &str) -> anyhow::Result<()>;
}

#[derive(Clone)]
pub struct LocalAvatarStorage {
    root: PathBuf,
}

impl LocalAvatarStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolves a `/uploads/<file>` reference to a path under the root.
    fn local_path(&self, reference: &str) -> Option<PathBuf> {
        let rest = reference.strip_prefix(PUBLIC_PREFIX)?.strip_prefix('/')?;
        let name = Path::new(rest).file_name()?;
        (name == rest).then(|| self.root.join(name))
    }
}

#[async_trait]
impl AvatarStorage for LocalAvatarStorage {
    async fn put(&self, file_name: &str, body: Bytes) -> anyhow::Result<String> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("create upload dir {}", self.root.display()))?;
        let path = self.root.join(file_name);
        tokio::fs::write(&path, &body)
            .await
            .with_context(|| format!("write avatar {}", path.display()))?;
        debug!(path = %path.display(), bytes = body.len(), "avatar stored");
        Ok(format!("{PUBLIC_PREFIX}/{file_name}"))
    }

    async fn remove(&self, reference: &str) -> anyhow::Result<()> {
        let Some(path) = self.local_path(reference) else {
            debug!(reference, "avatar not stored locally; nothing to remove");
            return Ok(());
        };
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "avatar removed");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove avatar {}", path.display())),
        }
    }
}

/// Removes a replaced or orphaned avatar; failures are logged, never returned.
pub async fn discard_avatar(storage: &dyn AvatarStorage, reference: &str) {
    if let Err(e) = storage.remove(reference).await {
        warn!(error = ?e, reference, "failed to remove avatar file");
    }
}

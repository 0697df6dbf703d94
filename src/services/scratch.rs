//! Process-private scratch space for in-flight uploads.
//!
//! Every file handed out here is owned by a [`TempPath`] guard, so it is
//! removed when the owning pipeline run ends: on success, on error, on panic
//! and when the request future is dropped mid-flight.

use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::{
    io::{self, ErrorKind, SeekFrom},
    path::{Path, PathBuf},
    sync::Arc,
};
use tempfile::{Builder, TempDir, TempPath};
use tokio::{
    fs::{self, File},
    io::{AsyncSeekExt, AsyncWriteExt},
};
use tracing::debug;

use super::upload_service::UploadError;

/// Scratch directory shared by every pipeline run of this process.
///
/// The directory itself is removed when the last clone is dropped.
#[derive(Clone, Debug)]
pub struct ScratchDir {
    root: Arc<TempDir>,
}

impl ScratchDir {
    /// Create a fresh private directory under `parent`.
    pub fn create_in(parent: impl AsRef<Path>) -> io::Result<Self> {
        let parent = parent.as_ref();
        std::fs::create_dir_all(parent)?;
        let root = Builder::new().prefix("tubely-scratch-").tempdir_in(parent)?;
        Ok(Self {
            root: Arc::new(root),
        })
    }

    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Copy `stream` into a new uniquely named file ending in `.{extension}`.
    ///
    /// The returned artifact's handle is rewound to offset zero. If the
    /// stream yields an error the partial file is removed before returning.
    pub async fn materialize<S>(
        &self,
        mut stream: S,
        extension: &str,
    ) -> Result<ScratchArtifact, UploadError>
    where
        S: Stream<Item = Result<Bytes, UploadError>> + Unpin,
    {
        let named = Builder::new()
            .prefix("tubely-upload-")
            .suffix(&format!(".{extension}"))
            .tempfile_in(self.path())?;
        let (file, path) = named.into_parts();
        let mut file = File::from_std(file);

        let mut size: u64 = 0;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;
            size += chunk.len() as u64;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        file.sync_all().await?;
        file.seek(SeekFrom::Start(0)).await?;

        debug!(path = %path.display(), size_bytes = size, "materialized upload");

        Ok(ScratchArtifact { path, file, size })
    }

    /// Reserve an empty sibling file for a tool to write into.
    pub fn reserve(&self, extension: &str) -> io::Result<TempPath> {
        Ok(Builder::new()
            .prefix("tubely-processed-")
            .suffix(&format!(".{extension}"))
            .tempfile_in(self.path())?
            .into_temp_path())
    }

    /// Names currently present in the scratch directory.
    pub async fn entries(&self) -> io::Result<Vec<PathBuf>> {
        let mut dir = fs::read_dir(self.path()).await?;
        let mut entries = Vec::new();
        while let Some(entry) = dir.next_entry().await? {
            entries.push(entry.path());
        }
        entries.sort();
        Ok(entries)
    }
}

/// A temporary file exclusively owned by one pipeline run.
#[derive(Debug)]
pub struct ScratchArtifact {
    path: TempPath,
    file: File,
    size: u64,
}

impl ScratchArtifact {
    /// Take ownership of a file a tool wrote into a reserved path.
    ///
    /// An absent or empty file is reported as `UnexpectedEof`.
    pub async fn adopt(path: TempPath) -> io::Result<Self> {
        let file = File::open(&path).await?;
        let size = file.metadata().await?.len();
        if size == 0 {
            return Err(io::Error::new(ErrorKind::UnexpectedEof, "file is empty"));
        }
        Ok(Self { path, file, size })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn size(&self) -> u64 {
        self.size
    }

    /// Move the artifact to `dest`, leaving nothing behind in scratch.
    ///
    /// Falls back to copying from the open handle when a rename is not
    /// possible (scratch and destination on different filesystems). The
    /// published file is world-readable.
    pub async fn persist(self, dest: &Path) -> io::Result<()> {
        let Self { path, mut file, .. } = self;
        match path.persist(dest) {
            Ok(()) => publish_mode(dest).await,
            Err(err) => {
                debug!(
                    dest = %dest.display(),
                    error = %err.error,
                    "rename failed, copying scratch file instead"
                );
                let scratch = err.path;
                file.seek(SeekFrom::Start(0)).await?;
                let mut out = File::create(dest).await?;
                if let Err(copy_err) = tokio::io::copy(&mut file, &mut out).await {
                    drop(out);
                    let _ = fs::remove_file(dest).await;
                    return Err(copy_err);
                }
                out.sync_all().await?;
                drop(scratch);
                publish_mode(dest).await
            }
        }
    }
}

/// Tempfiles are created 0600; published assets are served by other
/// processes too.
#[cfg(unix)]
async fn publish_mode(dest: &Path) -> io::Result<()> {
    use std::{fs::Permissions, os::unix::fs::PermissionsExt};
    fs::set_permissions(dest, Permissions::from_mode(0o644)).await
}

#[cfg(not(unix))]
async fn publish_mode(_dest: &Path) -> io::Result<()> {
    Ok(())
}

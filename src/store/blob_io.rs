//! Shared atomic-write / content-addressed-path helpers used by both the
//! filesystem and containerd-style backends.
//!
//! Grounded on the teacher's `image/cache.rs` (`add_blob_with_verification`):
//! write to a sibling temp file, fsync-free rename into place. A rename
//! within the same directory is atomic on POSIX filesystems, so a crash
//! mid-write never leaves a partially-written file observable under its
//! final digest-addressed name.

use crate::digest::Digest;
use crate::error::{OciPkgError, Result};
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub fn blob_path(root: &Path, digest: &Digest) -> PathBuf {
    root.join(digest.algorithm()).join(digest.hex())
}

pub fn has_blob(root: &Path, digest: &Digest) -> bool {
    blob_path(root, digest).is_file()
}

pub async fn read_blob(root: &Path, digest: &Digest) -> Result<Vec<u8>> {
    let path = blob_path(root, digest);
    tokio::fs::read(&path)
        .await
        .map_err(|e| OciPkgError::io_at(path, e))
}

pub fn blob_size(root: &Path, digest: &Digest) -> Result<u64> {
    let path = blob_path(root, digest);
    let meta = std::fs::metadata(&path).map_err(|e| OciPkgError::io_at(path, e))?;
    Ok(meta.len())
}

/// Write `data` under `digest`'s content-addressed path. A no-op if the
/// blob already exists there (§4.1: "existing content at the same digest
/// is left intact").
pub async fn save_blob(root: &Path, digest: &Digest, data: &[u8]) -> Result<()> {
    let final_path = blob_path(root, digest);
    if final_path.is_file() {
        return Ok(());
    }
    let dir = final_path.parent().expect("blob path has a parent");
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| OciPkgError::io_at(dir, e))?;

    let tmp_path = dir.join(format!(".tmp-{}", Uuid::new_v4()));
    tokio::fs::write(&tmp_path, data)
        .await
        .map_err(|e| OciPkgError::io_at(&tmp_path, e))?;
    tokio::fs::rename(&tmp_path, &final_path).await.map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        OciPkgError::io_at(&final_path, e)
    })?;
    Ok(())
}

pub async fn remove_blob(root: &Path, digest: &Digest) -> Result<()> {
    let path = blob_path(root, digest);
    match tokio::fs::remove_file(&path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(OciPkgError::io_at(path, e)),
    }
}

/// Atomically repoint a tag symlink at `target`. Writes to a sibling
/// temp symlink then renames over the final name so readers never observe
/// a half-written link (§4.1 SaveDescriptor guarantee (c), §5 ordering).
pub async fn repoint_tag(tag_path: &Path, target: &Path) -> Result<()> {
    let dir = tag_path.parent().expect("tag path has a parent");
    tokio::fs::create_dir_all(dir)
        .await
        .map_err(|e| OciPkgError::io_at(dir, e))?;
    let tmp_path = dir.join(format!(".tmp-{}", Uuid::new_v4()));

    #[cfg(unix)]
    {
        tokio::fs::symlink(target, &tmp_path)
            .await
            .map_err(|e| OciPkgError::io_at(&tmp_path, e))?;
    }
    #[cfg(not(unix))]
    {
        tokio::fs::write(&tmp_path, target.to_string_lossy().as_bytes())
            .await
            .map_err(|e| OciPkgError::io_at(&tmp_path, e))?;
    }

    tokio::fs::rename(&tmp_path, tag_path).await.map_err(|e| {
        let _ = std::fs::remove_file(&tmp_path);
        OciPkgError::io_at(tag_path, e)
    })?;
    Ok(())
}

pub async fn resolve_tag(tag_path: &Path) -> Result<Option<PathBuf>> {
    if !tag_path.exists() && !is_symlink(tag_path) {
        return Ok(None);
    }
    #[cfg(unix)]
    {
        match tokio::fs::read_link(tag_path).await {
            Ok(target) => Ok(Some(target)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(OciPkgError::io_at(tag_path, e)),
        }
    }
    #[cfg(not(unix))]
    {
        match tokio::fs::read(tag_path).await {
            Ok(bytes) => Ok(Some(PathBuf::from(String::from_utf8_lossy(&bytes).into_owned()))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(OciPkgError::io_at(tag_path, e)),
        }
    }
}

fn is_symlink(path: &Path) -> bool {
    std::fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

use std::fs;
use std::io::{self, Write};
use std::path::Path;

use crate::error::{GalleryError, GalleryResult};

/// Replaces `path` with `bytes` via a temp file in the same directory, so a
/// reader sees either the old or the new content, never a partial write.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> GalleryResult<()> {
    let dir = path.parent().ok_or_else(|| {
        GalleryError::at(
            "resolve parent of",
            path,
            io::Error::new(io::ErrorKind::InvalidInput, "path has no parent"),
        )
    })?;
    fs::create_dir_all(dir).map_err(|err| GalleryError::at("create", dir, err))?;

    let prefix = path
        .file_name()
        .map(|name| format!(".{}.", name.to_string_lossy()))
        .unwrap_or_else(|| ".charmsmith.".to_string());
    let mut temp = tempfile::Builder::new()
        .prefix(&prefix)
        .suffix(".tmp")
        .tempfile_in(dir)
        .map_err(|err| GalleryError::at("create temp file in", dir, err))?;
    temp.write_all(bytes)
        .and_then(|_| temp.as_file().sync_all())
        .map_err(|err| GalleryError::at("write temp file for", path, err))?;
    temp.persist(path)
        .map_err(|err| GalleryError::at("persist", path, err.error))?;
    Ok(())
}

/// Removes a file, treating "already gone" as success.
pub fn remove_if_exists(path: &Path) -> GalleryResult<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(GalleryError::at("remove", path, err)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_atomic_replaces_content_without_leftovers() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("metadata.json");
        write_atomic(&path, b"first")?;
        write_atomic(&path, b"second")?;
        assert_eq!(fs::read(&path)?, b"second");

        let entries = fs::read_dir(path.parent().unwrap_or(temp.path()))?.count();
        assert_eq!(entries, 1);
        Ok(())
    }

    #[test]
    fn write_atomic_fails_when_target_is_a_directory() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("metadata.json");
        fs::create_dir(&path)?;
        assert!(matches!(
            write_atomic(&path, b"{}"),
            Err(GalleryError::Persistence { .. })
        ));
        Ok(())
    }

    #[test]
    fn remove_if_exists_is_idempotent() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("gone.vec");
        fs::write(&path, b"x")?;
        remove_if_exists(&path)?;
        remove_if_exists(&path)?;
        assert!(!path.exists());
        Ok(())
    }
}

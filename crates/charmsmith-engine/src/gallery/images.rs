use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use crate::atomic::{remove_if_exists, write_atomic};
use crate::error::{GalleryError, GalleryResult};

/// Persistence for reference image bytes, addressed by an opaque filename.
pub trait ImageStore: Send + Sync {
    /// Stores `bytes` for `id` and returns the filename to record.
    fn put(&self, id: &str, bytes: &[u8]) -> GalleryResult<String>;
    fn read(&self, filename: &str) -> GalleryResult<Vec<u8>>;
    /// Removing an absent image is not an error.
    fn delete(&self, filename: &str) -> GalleryResult<()>;
}

/// Stores images as `<dir>/<id>.<ext>`, with the extension sniffed from
/// the bytes.
#[derive(Debug, Clone)]
pub struct FsImageStore {
    dir: PathBuf,
}

impl FsImageStore {
    pub fn new(dir: impl Into<PathBuf>) -> GalleryResult<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|err| GalleryError::at("create", &dir, err))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, filename: &str) -> GalleryResult<PathBuf> {
        let plain = !filename.is_empty()
            && !filename.starts_with('.')
            && !filename.contains(['/', '\\'])
            && Path::new(filename).file_name().is_some();
        if !plain {
            return Err(GalleryError::persistence(
                format!("refusing image filename `{filename}`"),
                io::Error::new(io::ErrorKind::InvalidInput, "not a plain file name"),
            ));
        }
        Ok(self.dir.join(filename))
    }
}

impl ImageStore for FsImageStore {
    fn put(&self, id: &str, bytes: &[u8]) -> GalleryResult<String> {
        let filename = format!("{id}.{}", image_extension(bytes));
        write_atomic(&self.path_for(&filename)?, bytes)?;
        Ok(filename)
    }

    fn read(&self, filename: &str) -> GalleryResult<Vec<u8>> {
        let path = self.path_for(filename)?;
        fs::read(&path).map_err(|err| GalleryError::at("read", &path, err))
    }

    fn delete(&self, filename: &str) -> GalleryResult<()> {
        remove_if_exists(&self.path_for(filename)?)
    }
}

pub fn image_extension(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .ok()
        .and_then(|format| format.extensions_str().first().copied())
        .unwrap_or("bin")
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use image::{ImageFormat, Rgb, RgbImage};

    use super::*;

    fn png_bytes() -> anyhow::Result<Vec<u8>> {
        let image = RgbImage::from_pixel(2, 2, Rgb([10, 20, 30]));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png)?;
        Ok(out.into_inner())
    }

    #[test]
    fn put_read_delete_round_trip() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = FsImageStore::new(temp.path().join("images"))?;
        let bytes = png_bytes()?;

        let filename = store.put("ref-1", &bytes)?;
        assert_eq!(filename, "ref-1.png");
        assert_eq!(store.read(&filename)?, bytes);

        store.delete(&filename)?;
        store.delete(&filename)?;
        assert!(!store.dir().join(&filename).exists());
        Ok(())
    }

    #[test]
    fn unknown_bytes_get_a_neutral_extension() {
        assert_eq!(image_extension(b"definitely not an image"), "bin");
    }

    #[test]
    fn traversal_filenames_are_refused() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let store = FsImageStore::new(temp.path())?;
        assert!(store.read("../metadata.json").is_err());
        assert!(store.delete("nested/evil.png").is_err());
        assert!(store.path_for(".hidden").is_err());
        Ok(())
    }
}

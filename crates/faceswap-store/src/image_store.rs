//! Upload staging and image decode/encode.

use faceswap_core::{EmptyImage, Image, ImageOrigin};
use image::{ImageFormat, RgbImage};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// File extensions accepted for uploads.
pub const ACCEPTED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum ImageStoreError {
    #[error("unsupported image type '{0}' (accepted: jpg, jpeg, png)")]
    UnsupportedFormat(String),
    #[error("failed to decode {origin}: {source}")]
    Decode {
        origin: String,
        #[source]
        source: image::ImageError,
    },
    #[error("{origin}: {source}")]
    Empty {
        origin: String,
        #[source]
        source: EmptyImage,
    },
    #[error("failed to encode {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Which side of the swap an upload belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadRole {
    Source,
    Target,
}

impl UploadRole {
    fn prefix(self) -> &'static str {
        match self {
            UploadRole::Source => "source",
            UploadRole::Target => "target",
        }
    }
}

/// Reads images from disk and stages uploads in a content directory.
#[derive(Debug, Clone)]
pub struct ImageStore {
    content_dir: PathBuf,
}

impl ImageStore {
    pub fn new(content_dir: impl Into<PathBuf>) -> Self {
        Self {
            content_dir: content_dir.into(),
        }
    }

    pub fn content_dir(&self) -> &Path {
        &self.content_dir
    }

    /// Read and decode an image file as RGB.
    pub fn load(&self, path: &Path) -> Result<Image, ImageStoreError> {
        check_extension(path)?;
        let bytes = fs::read(path).map_err(|source| ImageStoreError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let image = decode(&bytes, ImageOrigin::File(path.to_path_buf()))?;
        tracing::debug!(path = %path.display(), width = image.width(), height = image.height(), "loaded image");
        Ok(image)
    }

    /// Write uploaded bytes as `<role>_<name>` in the content directory.
    ///
    /// Only the final component of `name` is used. Returns the written path.
    pub fn save_upload(
        &self,
        role: UploadRole,
        name: &str,
        bytes: &[u8],
    ) -> Result<PathBuf, ImageStoreError> {
        let file_name = Path::new(name)
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| ImageStoreError::UnsupportedFormat(name.to_string()))?;
        let path = self
            .content_dir
            .join(format!("{}_{file_name}", role.prefix()));
        check_extension(&path)?;

        fs::create_dir_all(&self.content_dir).map_err(|source| ImageStoreError::Io {
            path: self.content_dir.clone(),
            source,
        })?;
        fs::write(&path, bytes).map_err(|source| ImageStoreError::Io {
            path: path.clone(),
            source,
        })?;

        tracing::info!(path = %path.display(), bytes = bytes.len(), "staged upload");
        Ok(path)
    }

    /// Remove a file written by [`Self::save_upload`] after it was rejected.
    ///
    /// Paths outside the content directory are left alone.
    pub fn discard_upload(&self, path: &Path) {
        if path.parent() != Some(self.content_dir.as_path()) {
            tracing::warn!(path = %path.display(), "refusing to discard file outside content directory");
            return;
        }
        match fs::remove_file(path) {
            Ok(()) => tracing::debug!(path = %path.display(), "discarded rejected upload"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to discard rejected upload"),
        }
    }
}

/// Decode an in-memory image as RGB, rejecting zero-sized images.
pub fn decode(bytes: &[u8], origin: ImageOrigin) -> Result<Image, ImageStoreError> {
    let decoded = image::load_from_memory(bytes).map_err(|source| ImageStoreError::Decode {
        origin: origin.to_string(),
        source,
    })?;
    let label = origin.to_string();
    Image::new(decoded.to_rgb8(), origin).map_err(|source| ImageStoreError::Empty {
        origin: label,
        source,
    })
}

/// Encode `image` as PNG at `path`, creating parent directories.
pub fn write_png(path: &Path, image: &RgbImage) -> Result<(), ImageStoreError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|source| ImageStoreError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    image
        .save_with_format(path, ImageFormat::Png)
        .map_err(|source| ImageStoreError::Encode {
            path: path.to_path_buf(),
            source,
        })
}

fn check_extension(path: &Path) -> Result<(), ImageStoreError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if ACCEPTED_EXTENSIONS.contains(&ext.as_str()) {
        Ok(())
    } else {
        Err(ImageStoreError::UnsupportedFormat(path.display().to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn png_bytes(width: u32, height: u32) -> Vec<u8> {
        let image = RgbImage::from_pixel(width, height, Rgb([10, 20, 30]));
        let mut out = Cursor::new(Vec::new());
        image.write_to(&mut out, ImageFormat::Png).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_png() {
        let image = decode(&png_bytes(7, 5), ImageOrigin::Memory("t".into())).unwrap();
        assert_eq!(image.dimensions(), (7, 5));
        assert_eq!(*image.pixels().get_pixel(3, 3), Rgb([10, 20, 30]));
    }

    #[test]
    fn test_decode_garbage_fails() {
        let err = decode(b"definitely not an image", ImageOrigin::Memory("junk".into())).unwrap_err();
        assert!(matches!(err, ImageStoreError::Decode { .. }));
    }

    #[test]
    fn test_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested/face.png");
        write_png(&path, &RgbImage::from_pixel(4, 4, Rgb([1, 2, 3]))).unwrap();

        let store = ImageStore::new(dir.path());
        let image = store.load(&path).unwrap();
        assert_eq!(image.dimensions(), (4, 4));
        assert_eq!(image.origin(), &ImageOrigin::File(path));
    }

    #[test]
    fn test_load_rejects_extension() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("face.gif");
        fs::write(&path, b"GIF89a").unwrap();

        let err = ImageStore::new(dir.path()).load(&path).unwrap_err();
        assert!(matches!(err, ImageStoreError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let err = ImageStore::new(dir.path())
            .load(&dir.path().join("absent.jpg"))
            .unwrap_err();
        assert!(matches!(err, ImageStoreError::Io { .. }));
    }

    #[test]
    fn test_save_upload_prefixes_and_strips_directories() {
        let dir = TempDir::new().unwrap();
        let store = ImageStore::new(dir.path().join("assets"));

        let path = store
            .save_upload(UploadRole::Target, "../../etc/me.PNG", &png_bytes(2, 2))
            .unwrap();

        assert_eq!(path, dir.path().join("assets/target_me.PNG"));
        assert!(store.load(&path).is_ok());
    }

    #[test]
    fn test_discard_upload_only_touches_content_dir() {
        let dir = TempDir::new().unwrap();
        let store = ImageStore::new(dir.path().join("assets"));
        let staged = store
            .save_upload(UploadRole::Source, "bad.png", b"not an image")
            .unwrap();
        let outside = dir.path().join("keep.png");
        fs::write(&outside, b"x").unwrap();

        store.discard_upload(&staged);
        store.discard_upload(&staged);
        store.discard_upload(&outside);

        assert!(!staged.exists());
        assert!(outside.exists());
    }
}

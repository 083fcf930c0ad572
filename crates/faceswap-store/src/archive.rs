//! Output archive: one directory per swap, named by timestamp.
//!
//! Layout: `<root>/<key>/result.png`. The directory listing is the index;
//! there is no separate manifest. Keys are `YYYYMMDD_HHMMSS` in UTC, so a
//! local clock change never reorders them.
//! A second result within the same second gets `_01`, `_02`, ... appended,
//! which keeps lexical order equal to creation order.

use chrono::{DateTime, NaiveDateTime, Utc};
use image::{ImageFormat, RgbImage};
use serde::Serialize;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;

pub const RESULT_FILE: &str = "result.png";
const PARTIAL_FILE: &str = "result.png.tmp";
const KEY_FORMAT: &str = "%Y%m%d_%H%M%S";
const KEY_BASE_LEN: usize = 15;
const MAX_COLLISION_SUFFIX: u32 = 99;

#[derive(Error, Debug)]
pub enum ArchiveError {
    #[error("failed to create archive directory {path}: {source}")]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("no free archive key for {base} after {attempts} attempts")]
    KeysExhausted { base: String, attempts: u32 },
    #[error("failed to encode result {path}: {source}")]
    Encode {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    #[error("failed to finalize result {path}: {source}")]
    Finalize {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to read archive {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// One archived swap result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveEntry {
    pub key: String,
    pub result_path: PathBuf,
    pub created_at: DateTime<Utc>,
}

impl ArchiveEntry {
    /// File name offered when the result is downloaded.
    pub fn download_name(&self) -> String {
        format!("result_{}.png", self.key)
    }
}

/// Append-only, timestamp-keyed store of swap results.
#[derive(Debug, Clone)]
pub struct OutputArchive {
    root: PathBuf,
}

impl OutputArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Persist `image` under a key derived from the current time.
    pub fn store(&self, image: &RgbImage) -> Result<ArchiveEntry, ArchiveError> {
        self.store_at(image, Utc::now())
    }

    /// Persist `image` under a key derived from `created_at`.
    ///
    /// The result file only appears once fully written. On failure the claimed
    /// directory is removed again.
    pub fn store_at(
        &self,
        image: &RgbImage,
        created_at: DateTime<Utc>,
    ) -> Result<ArchiveEntry, ArchiveError> {
        fs::create_dir_all(&self.root).map_err(|source| ArchiveError::CreateDir {
            path: self.root.clone(),
            source,
        })?;

        let (key, dir) = self.claim_key(created_at)?;
        let partial = dir.join(PARTIAL_FILE);
        let result_path = dir.join(RESULT_FILE);

        let written = image
            .save_with_format(&partial, ImageFormat::Png)
            .map_err(|source| ArchiveError::Encode {
                path: partial.clone(),
                source,
            })
            .and_then(|()| {
                fs::rename(&partial, &result_path).map_err(|source| ArchiveError::Finalize {
                    path: result_path.clone(),
                    source,
                })
            });

        if let Err(err) = written {
            if let Err(cleanup) = fs::remove_dir_all(&dir) {
                tracing::warn!(dir = %dir.display(), error = %cleanup, "failed to remove partial archive entry");
            }
            return Err(err);
        }

        tracing::info!(key = %key, path = %result_path.display(), "archived swap result");

        Ok(ArchiveEntry {
            key,
            result_path,
            created_at,
        })
    }

    /// Atomically create the entry directory for the first free key.
    fn claim_key(&self, created_at: DateTime<Utc>) -> Result<(String, PathBuf), ArchiveError> {
        let base = created_at.format(KEY_FORMAT).to_string();

        for suffix in 0..=MAX_COLLISION_SUFFIX {
            let key = if suffix == 0 {
                base.clone()
            } else {
                format!("{base}_{suffix:02}")
            };
            let dir = self.root.join(&key);
            match fs::create_dir(&dir) {
                Ok(()) => {
                    if suffix > 0 {
                        tracing::debug!(%base, %key, "archive key collision; using suffix");
                    }
                    return Ok((key, dir));
                }
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(ArchiveError::CreateDir { path: dir, source }),
            }
        }

        Err(ArchiveError::KeysExhausted {
            base,
            attempts: MAX_COLLISION_SUFFIX + 1,
        })
    }

    /// Up to `limit` entries, most recent first.
    ///
    /// Directories whose name is not an archive key, or which hold no result
    /// file, are skipped. A missing archive root is an empty history.
    pub fn list_recent(&self, limit: usize) -> Result<Vec<ArchiveEntry>, ArchiveError> {
        let read_dir = match fs::read_dir(&self.root) {
            Ok(rd) => rd,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(ArchiveError::Read {
                    path: self.root.clone(),
                    source,
                })
            }
        };

        let mut keyed = Vec::new();
        for dir_entry in read_dir {
            let dir_entry = dir_entry.map_err(|source| ArchiveError::Read {
                path: self.root.clone(),
                source,
            })?;
            let Ok(name) = dir_entry.file_name().into_string() else {
                continue;
            };
            let Some(created_at) = parse_key(&name) else {
                tracing::debug!(name = %name, "ignoring non-archive entry");
                continue;
            };
            if dir_entry.path().is_dir() {
                keyed.push((name, created_at));
            }
        }

        keyed.sort_by(|a, b| b.0.cmp(&a.0));

        let entries = keyed
            .into_iter()
            .filter_map(|(key, created_at)| {
                let result_path = self.root.join(&key).join(RESULT_FILE);
                if result_path.is_file() {
                    Some(ArchiveEntry {
                        key,
                        result_path,
                        created_at,
                    })
                } else {
                    tracing::warn!(key = %key, "archive entry has no result file; skipping");
                    None
                }
            })
            .take(limit)
            .collect();

        Ok(entries)
    }
}

/// Parse `YYYYMMDD_HHMMSS` or `YYYYMMDD_HHMMSS_NN` into the key's timestamp.
fn parse_key(name: &str) -> Option<DateTime<Utc>> {
    let base = name.get(..KEY_BASE_LEN)?;
    let rest = &name[KEY_BASE_LEN..];
    let suffix_ok = rest.is_empty()
        || (rest.len() == 3
            && rest.starts_with('_')
            && rest[1..].bytes().all(|b| b.is_ascii_digit()));
    if !suffix_ok {
        return None;
    }
    NaiveDateTime::parse_from_str(base, KEY_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use image::Rgb;
    use tempfile::TempDir;

    fn at(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        NaiveDate::from_ymd_opt(2026, 10, 19)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
            .and_utc()
    }

    fn pixel_image() -> RgbImage {
        RgbImage::from_pixel(3, 2, Rgb([40, 50, 60]))
    }

    #[test]
    fn test_store_layout() {
        let dir = TempDir::new().unwrap();
        let archive = OutputArchive::new(dir.path().join("outputs"));

        let entry = archive.store_at(&pixel_image(), at(12, 30, 5)).unwrap();

        assert_eq!(entry.key, "20261019_123005");
        assert_eq!(entry.result_path, dir.path().join("outputs/20261019_123005/result.png"));
        assert_eq!(entry.download_name(), "result_20261019_123005.png");
        let files: Vec<_> = fs::read_dir(entry.result_path.parent().unwrap()).unwrap().collect();
        assert_eq!(files.len(), 1, "exactly one file per entry");
        let reread = image::open(&entry.result_path).unwrap().to_rgb8();
        assert_eq!(reread, pixel_image());
    }

    #[test]
    fn test_same_second_gets_suffix() {
        let dir = TempDir::new().unwrap();
        let archive = OutputArchive::new(dir.path());

        let first = archive.store_at(&pixel_image(), at(8, 0, 0)).unwrap();
        let second = archive.store_at(&pixel_image(), at(8, 0, 0)).unwrap();
        let third = archive.store_at(&pixel_image(), at(8, 0, 0)).unwrap();

        assert_eq!(first.key, "20261019_080000");
        assert_eq!(second.key, "20261019_080000_01");
        assert_eq!(third.key, "20261019_080000_02");

        let keys: Vec<_> = archive.list_recent(10).unwrap().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, ["20261019_080000_02", "20261019_080000_01", "20261019_080000"]);
    }

    #[test]
    fn test_suffixed_key_sorts_before_next_second() {
        let dir = TempDir::new().unwrap();
        let archive = OutputArchive::new(dir.path());

        archive.store_at(&pixel_image(), at(8, 0, 0)).unwrap();
        archive.store_at(&pixel_image(), at(8, 0, 0)).unwrap();
        archive.store_at(&pixel_image(), at(8, 0, 1)).unwrap();

        let keys: Vec<_> = archive.list_recent(10).unwrap().into_iter().map(|e| e.key).collect();
        assert_eq!(keys, ["20261019_080001", "20261019_080000_01", "20261019_080000"]);
    }

    #[test]
    fn test_list_recent_limit_and_order() {
        let dir = TempDir::new().unwrap();
        let archive = OutputArchive::new(dir.path());
        for s in [3, 1, 4, 0, 2] {
            archive.store_at(&pixel_image(), at(9, 0, s)).unwrap();
        }

        let recent = archive.list_recent(3).unwrap();
        let secs: Vec<_> = recent.iter().map(|e| e.created_at).collect();
        assert_eq!(secs, [at(9, 0, 4), at(9, 0, 3), at(9, 0, 2)]);
        assert!(archive.list_recent(0).unwrap().is_empty());
    }

    #[test]
    fn test_list_recent_fewer_than_limit() {
        let dir = TempDir::new().unwrap();
        let archive = OutputArchive::new(dir.path());
        for s in 0..3 {
            archive.store_at(&pixel_image(), at(10, 0, s)).unwrap();
        }
        assert_eq!(archive.list_recent(5).unwrap().len(), 3);
    }

    #[test]
    fn test_list_recent_skips_missing_result_and_foreign_dirs() {
        let dir = TempDir::new().unwrap();
        let archive = OutputArchive::new(dir.path());
        archive.store_at(&pixel_image(), at(11, 0, 0)).unwrap();
        fs::create_dir(dir.path().join("20261019_110005")).unwrap();
        fs::create_dir(dir.path().join("scratch")).unwrap();
        fs::write(dir.path().join("20261019_110009"), b"a file, not a directory").unwrap();

        let recent = archive.list_recent(5).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].key, "20261019_110000");
    }

    #[test]
    fn test_missing_root_is_empty_history() {
        let dir = TempDir::new().unwrap();
        let archive = OutputArchive::new(dir.path().join("never-created"));
        assert!(archive.list_recent(5).unwrap().is_empty());
    }

    #[test]
    fn test_store_into_unwritable_root_fails() {
        let dir = TempDir::new().unwrap();
        let blocker = dir.path().join("outputs");
        fs::write(&blocker, b"not a directory").unwrap();

        let result = OutputArchive::new(&blocker).store_at(&pixel_image(), at(1, 2, 3));
        assert!(matches!(result, Err(ArchiveError::CreateDir { .. })));
    }

    #[test]
    fn test_store_keys_by_utc_now() {
        let dir = TempDir::new().unwrap();
        let archive = OutputArchive::new(dir.path());

        let before = Utc::now();
        let entry = archive.store(&pixel_image()).unwrap();
        let after = Utc::now();

        let keyed = parse_key(&entry.key).unwrap().timestamp();
        assert_eq!(keyed, entry.created_at.timestamp());
        assert!((before.timestamp()..=after.timestamp()).contains(&keyed));
    }

    #[test]
    fn test_key_order_follows_utc_across_local_fall_back() {
        // 01:30 EDT then 01:10 EST on 2026-11-01: local wall time goes backwards
        let dir = TempDir::new().unwrap();
        let archive = OutputArchive::new(dir.path());
        let earlier = NaiveDate::from_ymd_opt(2026, 11, 1)
            .unwrap()
            .and_hms_opt(5, 30, 0)
            .unwrap()
            .and_utc();
        let later = NaiveDate::from_ymd_opt(2026, 11, 1)
            .unwrap()
            .and_hms_opt(6, 10, 0)
            .unwrap()
            .and_utc();

        archive.store_at(&pixel_image(), earlier).unwrap();
        archive.store_at(&pixel_image(), later).unwrap();

        let recent = archive.list_recent(2).unwrap();
        assert_eq!(recent[0].created_at, later);
        assert_eq!(recent[1].created_at, earlier);
    }

    #[test]
    fn test_parse_key() {
        assert_eq!(parse_key("20261019_123005"), Some(at(12, 30, 5)));
        assert_eq!(parse_key("20261019_123005_07"), Some(at(12, 30, 5)));
        assert_eq!(parse_key("20261019_123005_7"), None);
        assert_eq!(parse_key("20261019_1230"), None);
        assert_eq!(parse_key("latest"), None);
    }
}

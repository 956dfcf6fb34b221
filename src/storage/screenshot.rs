use super::ScreenshotWriter;
use crate::detection::BoundingBox;
use crate::error::StorageError;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// JSON sidecar written next to each screenshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScreenshotMetadata {
    pub event_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub person_bbox: BoundingBox,
    pub phone_bbox: BoundingBox,
    pub overlap_ratio: f32,
    pub frame_count: u32,
    pub num_persons: usize,
    pub num_phones: usize,
}

/// Writes `<base>/<YYYY-MM-DD>/<HHMMSS_mmm>_event_<id8>.jpg`, dated in the configured timezone.
///
/// Bytes are written to a private temp file first and then linked into place, so
/// a reader never sees a half-written screenshot and two writers can never
/// replace each other's file. References are paths relative to `base`.
pub struct FsScreenshotWriter {
    base: PathBuf,
    tz: Tz,
    save_metadata: bool,
}

impl FsScreenshotWriter {
    pub fn new<P: Into<PathBuf>>(base: P, tz: Tz, save_metadata: bool) -> Result<Self, StorageError> {
        let base = base.into();
        fs::create_dir_all(&base).map_err(|source| StorageError::Io {
            path: base.display().to_string(),
            source,
        })?;
        Ok(Self {
            base,
            tz,
            save_metadata,
        })
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Absolute path for a reference, refusing anything that escapes the base directory
    pub fn resolve(&self, reference: &str) -> Result<PathBuf, StorageError> {
        let relative = Path::new(reference);
        let escapes = relative.is_absolute()
            || relative
                .components()
                .any(|c| !matches!(c, Component::Normal(_)));
        if escapes || reference.is_empty() {
            return Err(StorageError::InvalidPath {
                path: reference.to_string(),
            });
        }
        Ok(self.base.join(relative))
    }

    fn relative_path(&self, metadata: &ScreenshotMetadata) -> PathBuf {
        let local = metadata.timestamp.with_timezone(&self.tz);
        let simple = metadata.event_id.simple().to_string();
        let id8 = &simple[simple.len().saturating_sub(8)..];

        PathBuf::from(local.format("%Y-%m-%d").to_string()).join(format!(
            "{}_event_{}.jpg",
            local.format("%H%M%S_%3f"),
            id8
        ))
    }

    fn write_error(path: &Path, e: impl std::fmt::Display) -> StorageError {
        StorageError::ScreenshotWrite {
            path: path.display().to_string(),
            details: e.to_string(),
        }
    }

    /// Write `bytes` to `target` without ever replacing an existing file
    fn publish(target: &Path, bytes: &[u8]) -> io::Result<()> {
        let tmp = target.with_extension(format!("tmp-{}", Uuid::new_v4().simple()));

        let result = (|| {
            let mut file = OpenOptions::new().write(true).create_new(true).open(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
            drop(file);
            fs::hard_link(&tmp, target)
        })();

        if let Err(e) = fs::remove_file(&tmp) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("Failed to remove temp file {}: {}", tmp.display(), e);
            }
        }
        result
    }
}

impl ScreenshotWriter for FsScreenshotWriter {
    fn write(&self, jpeg: &[u8], metadata: &ScreenshotMetadata) -> Result<String, StorageError> {
        let relative = self.relative_path(metadata);
        let target = self.base.join(&relative);

        if let Some(dir) = target.parent() {
            fs::create_dir_all(dir).map_err(|e| Self::write_error(dir, e))?;
        }

        Self::publish(&target, jpeg).map_err(|e| Self::write_error(&target, e))?;

        if self.save_metadata {
            let sidecar = target.with_extension("json");
            let written = serde_json::to_vec_pretty(metadata)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
                .and_then(|json| Self::publish(&sidecar, &json));
            if let Err(e) = written {
                warn!("Failed to write metadata {}: {}", sidecar.display(), e);
            }
        }

        let reference = relative.to_string_lossy().replace('\\', "/");
        debug!("Screenshot saved: {} ({} bytes)", reference, jpeg.len());
        Ok(reference)
    }

    fn discard(&self, reference: &str) -> Result<(), StorageError> {
        let path = self.resolve(reference)?;
        for file in [path.clone(), path.with_extension("json")] {
            match fs::remove_file(&file) {
                Ok(()) => debug!("Removed {}", file.display()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(StorageError::Io {
                        path: file.display().to_string(),
                        source,
                    })
                }
            }
        }
        Ok(())
    }
}

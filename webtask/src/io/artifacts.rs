//! Timestamped screenshot and audio artifacts.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use chrono::{DateTime, Utc};
use regex::Regex;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::core::wav::WavHeader;

const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactKind {
    Screenshot,
    Audio,
}

impl ArtifactKind {
    pub fn extension(self) -> &'static str {
        match self {
            ArtifactKind::Screenshot => "png",
            ArtifactKind::Audio => "wav",
        }
    }
}

/// Filesystem failure while saving or clearing artifacts.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("create artifact directory {}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("write artifact {}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("remove artifact {}", path.display())]
    Remove {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("list artifact directory {}", path.display())]
    List {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Persists artifact bytes under `{dir}/{task_id}_{YYYYMMDD_HHMMSS}.{ext}`.
#[derive(Debug, Clone)]
pub struct ArtifactStore {
    screenshots_dir: PathBuf,
    audio_dir: PathBuf,
}

impl ArtifactStore {
    pub fn new(screenshots_dir: impl Into<PathBuf>, audio_dir: impl Into<PathBuf>) -> Self {
        Self {
            screenshots_dir: screenshots_dir.into(),
            audio_dir: audio_dir.into(),
        }
    }

    pub fn dir(&self, kind: ArtifactKind) -> &Path {
        match kind {
            ArtifactKind::Screenshot => &self.screenshots_dir,
            ArtifactKind::Audio => &self.audio_dir,
        }
    }

    /// Save `bytes` stamped with the current UTC time.
    ///
    /// Empty input saves nothing and returns `Ok(None)`.
    pub fn save(
        &self,
        task_id: &str,
        kind: ArtifactKind,
        bytes: &[u8],
    ) -> Result<Option<PathBuf>, StorageError> {
        self.save_at(task_id, kind, bytes, Utc::now())
    }

    pub fn save_at(
        &self,
        task_id: &str,
        kind: ArtifactKind,
        bytes: &[u8],
        at: DateTime<Utc>,
    ) -> Result<Option<PathBuf>, StorageError> {
        if bytes.is_empty() {
            debug!(task_id, ?kind, "empty artifact, nothing saved");
            return Ok(None);
        }
        let dir = self.dir(kind);
        fs::create_dir_all(dir).map_err(|source| StorageError::CreateDir {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = dir.join(format!(
            "{task_id}_{}.{}",
            at.format(TIMESTAMP_FORMAT),
            kind.extension()
        ));
        fs::write(&path, bytes).map_err(|source| StorageError::Write {
            path: path.clone(),
            source,
        })?;
        info!(task_id, path = %path.display(), bytes = bytes.len(), "artifact saved");
        Ok(Some(path))
    }

    /// Decode a base64 WAV payload reported by the agent and save it.
    ///
    /// Absent, blank or undecodable payloads yield `Ok(None)`. A payload
    /// without a valid PCM WAV header is saved anyway, with a warning.
    pub fn collect_audio(
        &self,
        task_id: &str,
        payload: Option<&str>,
    ) -> Result<Option<PathBuf>, StorageError> {
        let Some(payload) = payload.map(str::trim).filter(|p| !p.is_empty()) else {
            return Ok(None);
        };
        let bytes = match STANDARD.decode(payload) {
            Ok(bytes) => bytes,
            Err(err) => {
                warn!(task_id, err = %err, "audio payload is not valid base64, skipping");
                return Ok(None);
            }
        };
        match WavHeader::parse(&bytes) {
            Ok(header) => debug!(
                task_id,
                sample_rate = header.sample_rate,
                channels = header.channels,
                duration_secs = header.duration_secs(),
                "audio payload decoded"
            ),
            Err(err) => warn!(task_id, err = %err, "audio payload is not a PCM WAV"),
        }
        self.save(task_id, ArtifactKind::Audio, &bytes)
    }

    /// Remove earlier artifacts of `task_ids` from both directories.
    ///
    /// Only files named `{task_id}_{timestamp}.{png|wav}` are touched.
    /// Returns the number of files removed.
    pub fn clear_for(&self, task_ids: &[String]) -> Result<usize, StorageError> {
        if task_ids.is_empty() {
            return Ok(0);
        }
        let mut removed = 0;
        for dir in [&self.screenshots_dir, &self.audio_dir] {
            if !dir.is_dir() {
                continue;
            }
            let entries = fs::read_dir(dir).map_err(|source| StorageError::List {
                path: dir.clone(),
                source,
            })?;
            for entry in entries.flatten() {
                let name = entry.file_name();
                let Some(name) = name.to_str() else {
                    continue;
                };
                let owned = artifact_task_id(name)
                    .is_some_and(|owner| task_ids.iter().any(|id| id == owner));
                if !owned {
                    continue;
                }
                let path = entry.path();
                fs::remove_file(&path).map_err(|source| StorageError::Remove {
                    path: path.clone(),
                    source,
                })?;
                debug!(path = %path.display(), "removed stale artifact");
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "cleared artifacts from previous runs");
        }
        Ok(removed)
    }
}

/// Task id encoded in an artifact file name, if the name has the artifact shape.
fn artifact_task_id(name: &str) -> Option<&str> {
    static NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"^(.+)_\d{8}_\d{6}\.(?:png|wav)$").expect("artifact name pattern")
    });
    NAME_RE
        .captures(name)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

//! File-backed cache persistence.
//!
//! One JSON document per site under the cache directory. Saves are atomic
//! (write a temp file, fsync, rename over the original), so a run that dies
//! part-way leaves the previous document intact. Each run also holds an
//! advisory lock on `<site>.json.lock` for its whole duration; a second run
//! against the same site fails fast instead of racing the first.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;

use super::PeakCache;
use super::merge::TieBreak;
use crate::model::ConfigError;

const TMP_SUFFIX: &str = ".tmp";
const LOCK_SUFFIX: &str = ".lock";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("cache I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cache document {path} is not valid JSON: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// A document without thresholds cannot be classified against; this is
    /// a configuration problem, not a data problem.
    #[error("cache document {path} has no thresholds")]
    MissingThresholds { path: PathBuf },

    #[error("cache document {path} is invalid: {source}")]
    InvalidDocument {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("cache for site {site} is locked by another run ({path})")]
    Locked { site: String, path: PathBuf },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// File name stem used for a site's document, lock and temp file.
/// Characters outside `[A-Za-z0-9_-]` become `_`, so distinct site ids can
/// share a stem; settings validation rejects that.
pub fn cache_file_stem(site: &str) -> String {
    site.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

impl CacheError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        CacheError::Io { path: path.to_path_buf(), source }
    }

    /// Errors that mean the run was misconfigured rather than unlucky.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            CacheError::MissingThresholds { .. } | CacheError::Locked { .. } | CacheError::Config(_)
        )
    }
}

/// Held for the duration of a run; the lock is released when dropped.
#[derive(Debug)]
pub struct CacheLock {
    file: File,
    path: PathBuf,
}

impl CacheLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for CacheLock {
    fn drop(&mut self) {
        let _ = FileExt::unlock(&self.file);
    }
}

/// Cache documents for every site, stored under one directory.
#[derive(Debug, Clone)]
pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Path of the document for `site`.
    pub fn cache_path(&self, site: &str) -> PathBuf {
        self.dir.join(format!("{}.json", cache_file_stem(site)))
    }

    fn sibling(&self, site: &str, suffix: &str) -> PathBuf {
        let mut path = self.cache_path(site).into_os_string();
        path.push(suffix);
        PathBuf::from(path)
    }

    pub fn tmp_path(&self, site: &str) -> PathBuf {
        self.sibling(site, TMP_SUFFIX)
    }

    pub fn lock_path(&self, site: &str) -> PathBuf {
        self.sibling(site, LOCK_SUFFIX)
    }

    /// Takes the per-site run lock without blocking.
    pub fn lock(&self, site: &str) -> Result<CacheLock, CacheError> {
        fs::create_dir_all(&self.dir).map_err(|e| CacheError::io(&self.dir, e))?;
        let path = self.lock_path(site);
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&path)
            .map_err(|e| CacheError::io(&path, e))?;

        match FileExt::try_lock_exclusive(&file) {
            Ok(()) => Ok(CacheLock { file, path }),
            Err(e) if e.kind() == fs2::lock_contended_error().kind() => Err(CacheError::Locked {
                site: site.to_string(),
                path,
            }),
            Err(e) => Err(CacheError::io(&path, e)),
        }
    }

    /// Loads the cache for `site`, or `None` when no document exists yet.
    pub fn load(&self, site: &str, policy: TieBreak) -> Result<Option<PeakCache>, CacheError> {
        let path = self.cache_path(site);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(CacheError::io(&path, e)),
        };

        let value: serde_json::Value = serde_json::from_str(&contents).map_err(|source| CacheError::Json {
            path: path.clone(),
            source,
        })?;
        if value.get("thresholds").is_none_or(|t| t.is_null()) {
            return Err(CacheError::MissingThresholds { path });
        }

        let doc = serde_json::from_value(value).map_err(|source| CacheError::InvalidDocument {
            path: path.clone(),
            source,
        })?;
        Ok(Some(PeakCache::from_document(doc, policy)))
    }

    /// Writes the cache in one atomic replace.
    pub fn save(&self, cache: &PeakCache) -> Result<PathBuf, CacheError> {
        fs::create_dir_all(&self.dir).map_err(|e| CacheError::io(&self.dir, e))?;

        let path = self.cache_path(&cache.site);
        let tmp_path = self.tmp_path(&cache.site);
        let json = serde_json::to_string_pretty(&cache.to_document()).map_err(|source| CacheError::Json {
            path: path.clone(),
            source,
        })?;

        let mut tmp = File::create(&tmp_path).map_err(|e| CacheError::io(&tmp_path, e))?;
        tmp.write_all(json.as_bytes())
            .and_then(|_| tmp.write_all(b"\n"))
            .and_then(|_| tmp.sync_all())
            .map_err(|e| CacheError::io(&tmp_path, e))?;
        drop(tmp);

        fs::rename(&tmp_path, &path).map_err(|e| CacheError::io(&path, e))?;
        Ok(path)
    }
}

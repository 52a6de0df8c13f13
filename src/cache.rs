//! Session feature cache
//!
//! Window-feature extraction dominates offline training time, so per-
//! session feature vectors are cached keyed by session id. The disk
//! backend stores one JSON file per session and replaces entries with a
//! temp-file write plus rename; concurrent writers of the same key
//! resolve last-writer-wins with no torn reads.

use crate::error::ScreenError;
use crate::types::FeatureVector;
use std::fs;
use std::path::{Path, PathBuf};

/// Storage for per-session window features.
pub trait FeatureCache {
    /// Cached features for a session, or `None` on a miss.
    fn get(&self, session_id: &str) -> Result<Option<Vec<FeatureVector>>, ScreenError>;

    /// Store features for a session, replacing any existing entry.
    fn put(&self, session_id: &str, features: &[FeatureVector]) -> Result<(), ScreenError>;
}

/// One JSON file per session under a root directory.
#[derive(Debug, Clone)]
pub struct DiskFeatureCache {
    root: PathBuf,
}

impl DiskFeatureCache {
    /// Open (creating if needed) a cache rooted at `root`.
    pub fn open(root: &Path) -> Result<Self, ScreenError> {
        fs::create_dir_all(root)?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    fn entry_path(&self, session_id: &str) -> PathBuf {
        self.root.join(format!("{}.json", sanitize_key(session_id)))
    }
}

/// Map a session id onto a safe file stem. Anything outside
/// `[A-Za-z0-9._-]` becomes an underscore, so ids with path separators
/// cannot escape the cache root.
fn sanitize_key(session_id: &str) -> String {
    session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '.' || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

impl FeatureCache for DiskFeatureCache {
    fn get(&self, session_id: &str) -> Result<Option<Vec<FeatureVector>>, ScreenError> {
        let path = self.entry_path(session_id);
        if !path.exists() {
            return Ok(None);
        }
        let json = fs::read_to_string(&path)?;
        let features = serde_json::from_str(&json).map_err(|e| {
            ScreenError::CacheError(format!(
                "corrupt cache entry for {}: {}",
                session_id, e
            ))
        })?;
        Ok(Some(features))
    }

    fn put(&self, session_id: &str, features: &[FeatureVector]) -> Result<(), ScreenError> {
        let path = self.entry_path(session_id);
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_string(features)?;
        fs::write(&tmp, json)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }
}

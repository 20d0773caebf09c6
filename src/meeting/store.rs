//! Active meeting record
//!
//! Saved when a meeting starts and removed when it ends, so a restarted client
//! can offer to rejoin. Records older than the configured age are discarded.

use crate::config::StorageConfig;
use crate::model::MeetingConfig;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredMeeting {
    pub config: MeetingConfig,
    #[serde(default)]
    pub title: Option<String>,
    /// Milliseconds since the Unix epoch
    pub timestamp: u64,
}

pub struct MeetingStore {
    path: Option<PathBuf>,
    max_age: Duration,
}

impl MeetingStore {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            path: config.state_file.clone(),
            max_age: Duration::from_secs(config.max_age_secs),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn save(&self, config: &MeetingConfig, title: Option<&str>) -> io::Result<()> {
        let path = match &self.path {
            Some(path) => path,
            None => return Ok(()),
        };
        let record = StoredMeeting {
            config: config.clone(),
            title: title.map(str::to_string),
            timestamp: now_millis(),
        };
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_vec_pretty(&record)?)?;
        debug!("Saved active meeting {} to {}", config.meeting_id, path.display());
        Ok(())
    }

    /// The stored meeting, unless missing, unreadable or stale
    pub fn load(&self) -> io::Result<Option<StoredMeeting>> {
        let path = match &self.path {
            Some(path) => path,
            None => return Ok(None),
        };
        let content = match std::fs::read(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        };

        let record: StoredMeeting = match serde_json::from_slice(&content) {
            Ok(record) => record,
            Err(e) => {
                warn!("Discarding unreadable meeting record {}: {}", path.display(), e);
                self.clear()?;
                return Ok(None);
            }
        };

        let age = Duration::from_millis(now_millis().saturating_sub(record.timestamp));
        if age > self.max_age {
            debug!("Discarding meeting record {} ({}s old)", record.config.meeting_id, age.as_secs());
            self.clear()?;
            return Ok(None);
        }
        Ok(Some(record))
    }

    pub fn clear(&self) -> io::Result<()> {
        let path = match &self.path {
            Some(path) => path,
            None => return Ok(()),
        };
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e),
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

//! Cross-process reschedule signaling through marker files.
//!
//! The admin CLI cannot reach into the running service, so it drops a
//! marker under `<data>/reschedule/` and the engine picks it up on its
//! next poll. The file body carries the request; the name only has to
//! be unique and sort roughly by creation time.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use nudge_core::error::{NudgeError, Result};

/// Body of one marker file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RescheduleRequest {
    pub user_id: String,
    pub category: String,
    pub requested_at: DateTime<Utc>,
}

/// A marker found on disk, ready to be applied and then consumed.
#[derive(Debug, Clone)]
pub struct Marker {
    pub path: PathBuf,
    pub request: RescheduleRequest,
}

pub struct RescheduleBridge {
    dir: PathBuf,
}

impl RescheduleBridge {
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            dir: data_dir.as_ref().join("reschedule"),
        }
    }

    /// Drop a marker requesting a recompute for one (user, category).
    pub fn write_marker(&self, user_id: &str, category: &str) -> Result<PathBuf> {
        std::fs::create_dir_all(&self.dir)?;
        let request = RescheduleRequest {
            user_id: user_id.to_string(),
            category: category.to_string(),
            requested_at: Utc::now(),
        };
        let name = format!(
            "{user_id}__{category}__{:013}__{}.json",
            request.requested_at.timestamp_millis(),
            Uuid::new_v4().simple()
        );
        let path = self.dir.join(name);
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(&request)?)?;
        std::fs::rename(&tmp, &path)?;
        Ok(path)
    }

    /// All pending markers, oldest first. Markers whose body does not
    /// parse are deleted on sight so they cannot wedge every poll.
    pub fn scan(&self) -> Result<Vec<Marker>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(NudgeError::Io(e)),
        };

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().and_then(|e| e.to_str()) == Some("json"))
            .collect();
        paths.sort();

        let mut markers = Vec::with_capacity(paths.len());
        for path in paths {
            let parsed = std::fs::read_to_string(&path)
                .map_err(NudgeError::Io)
                .and_then(|content| {
                    serde_json::from_str::<RescheduleRequest>(&content).map_err(NudgeError::Json)
                });
            match parsed {
                Ok(request) => markers.push(Marker { path, request }),
                Err(e) => {
                    warn!(path = %path.display(), "Dropping malformed reschedule marker: {e}");
                    let _ = std::fs::remove_file(&path);
                }
            }
        }
        Ok(markers)
    }

    /// Delete a consumed marker. A marker that is already gone counts
    /// as consumed, so two racing pollers cannot trip each other up.
    pub fn consume(&self, marker: &Marker) -> Result<()> {
        match std::fs::remove_file(&marker.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(NudgeError::Io(e)),
        }
    }
}

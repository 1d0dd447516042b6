//! File-backed schedule and task storage.
//!
//! Layout under the data root:
//! `schedules/<user>/<category>.json` and `tasks/<user>.json`.
//! Schedule files are written by the admin CLI and read by the running
//! engine; writes go through a tmp file plus rename so a reader never
//! sees a torn file.

use std::path::{Path, PathBuf};

use nudge_core::error::{NudgeError, Result};
use nudge_core::types::{ScheduleData, TaskItem};

pub struct ScheduleStore {
    root: PathBuf,
}

impl ScheduleStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            root: data_dir.into(),
        }
    }

    pub fn schedule_path(&self, user_id: &str, category: &str) -> PathBuf {
        self.root
            .join("schedules")
            .join(user_id)
            .join(format!("{category}.json"))
    }

    fn tasks_path(&self, user_id: &str) -> PathBuf {
        self.root.join("tasks").join(format!("{user_id}.json"))
    }

    pub fn load_schedule(&self, user_id: &str, category: &str) -> Result<ScheduleData> {
        let path = self.schedule_path(user_id, category);
        let content = std::fs::read_to_string(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                NudgeError::schedule(format!("no schedule for {user_id}/{category}"))
            } else {
                NudgeError::Io(e)
            }
        })?;
        serde_json::from_str(&content)
            .map_err(|e| NudgeError::schedule(format!("{}: {e}", path.display())))
    }

    pub fn save_schedule(
        &self,
        user_id: &str,
        category: &str,
        data: &ScheduleData,
    ) -> Result<()> {
        let path = self.schedule_path(user_id, category);
        let content = serde_json::to_string_pretty(data)?;
        write_atomic(&path, &content)
    }

    /// Every (user, category) pair that has a schedule file on disk.
    pub fn list_pairs(&self) -> Result<Vec<(String, String)>> {
        let schedules = self.root.join("schedules");
        let mut pairs = Vec::new();
        let users = match std::fs::read_dir(&schedules) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(pairs),
            Err(e) => return Err(NudgeError::Io(e)),
        };

        for user_entry in users {
            let user_entry = user_entry?;
            if !user_entry.file_type()?.is_dir() {
                continue;
            }
            let user_id = user_entry.file_name().to_string_lossy().to_string();
            for file_entry in std::fs::read_dir(user_entry.path())? {
                let path = file_entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some("json") {
                    continue;
                }
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    pairs.push((user_id.clone(), stem.to_string()));
                }
            }
        }

        pairs.sort();
        Ok(pairs)
    }

    /// Missing task file just means the user has no tasks yet.
    pub fn load_tasks(&self, user_id: &str) -> Result<Vec<TaskItem>> {
        let path = self.tasks_path(user_id);
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(NudgeError::Io(e)),
        };
        serde_json::from_str(&content)
            .map_err(|e| NudgeError::schedule(format!("{}: {e}", path.display())))
    }
}

/// Write-then-rename so concurrent readers see the old or the new file,
/// never a partial one.
fn write_atomic(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use nudge_core::types::{CategoryKind, SchedulePeriod};

    fn sample_schedule() -> ScheduleData {
        let mut data = ScheduleData::default();
        data.periods.insert(
            "workday".to_string(),
            SchedulePeriod::new(&["mon", "tue", "wed", "thu", "fri"], "09:00", "17:00"),
        );
        data
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduleStore::new(dir.path());

        store
            .save_schedule("ryan", "motivational", &sample_schedule())
            .unwrap();
        let loaded = store.load_schedule("ryan", "motivational").unwrap();

        assert!(loaded.enabled);
        assert_eq!(loaded.kind, CategoryKind::Message);
        assert_eq!(loaded.periods.len(), 1);
        assert_eq!(loaded.periods["workday"].start_time, "09:00");

        // No tmp leftovers from the atomic write.
        let user_dir = dir.path().join("schedules").join("ryan");
        let leftovers: Vec<_> = std::fs::read_dir(user_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().and_then(|x| x.to_str()) == Some("tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_load_missing_schedule_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduleStore::new(dir.path());
        let err = store.load_schedule("ryan", "motivational").unwrap_err();
        assert!(err.to_string().contains("ryan/motivational"));
    }

    #[test]
    fn test_list_pairs() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduleStore::new(dir.path());
        assert!(store.list_pairs().unwrap().is_empty());

        store
            .save_schedule("ryan", "motivational", &sample_schedule())
            .unwrap();
        store
            .save_schedule("ryan", "chores", &sample_schedule())
            .unwrap();
        store
            .save_schedule("ana", "motivational", &sample_schedule())
            .unwrap();

        let pairs = store.list_pairs().unwrap();
        assert_eq!(
            pairs,
            vec![
                ("ana".to_string(), "motivational".to_string()),
                ("ryan".to_string(), "chores".to_string()),
                ("ryan".to_string(), "motivational".to_string()),
            ]
        );
    }

    #[test]
    fn test_load_tasks_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduleStore::new(dir.path());
        assert!(store.load_tasks("ryan").unwrap().is_empty());
    }

    #[test]
    fn test_load_tasks_parses_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduleStore::new(dir.path());

        let tasks_dir = dir.path().join("tasks");
        std::fs::create_dir_all(&tasks_dir).unwrap();
        std::fs::write(
            tasks_dir.join("ryan.json"),
            r#"[{"id": "t1", "title": "water the plants", "priority": "high"}]"#,
        )
        .unwrap();

        let tasks = store.load_tasks("ryan").unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "water the plants");
    }

    #[test]
    fn test_load_tasks_malformed_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = ScheduleStore::new(dir.path());

        let tasks_dir = dir.path().join("tasks");
        std::fs::create_dir_all(&tasks_dir).unwrap();
        std::fs::write(tasks_dir.join("ryan.json"), "not json").unwrap();

        assert!(store.load_tasks("ryan").is_err());
    }
}

//! Durable offline queue for remote actions that could not execute.
//!
//! Every mutation is persisted via temp-file-then-rename so a crash can never
//! leave a half-written queue on disk. A malformed or missing file loads as
//! an empty queue.

use std::collections::VecDeque;
use std::fs;
use std::path::PathBuf;

use log::warn;
use serde::{Deserialize, Serialize};

use crate::error::Result;

const MAX_QUEUE: usize = 600;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueuedAction {
    pub target: String,
    pub action: String,
    #[serde(default = "default_domain")]
    pub domain_id: String,
    #[serde(default)]
    pub queued_utc: String,
}

fn default_domain() -> String {
    "0".to_string()
}

#[derive(Debug)]
pub struct OfflineQueue {
    path: PathBuf,
    entries: VecDeque<QueuedAction>,
}

impl OfflineQueue {
    /// Opens the queue at `path`, loading whatever valid state is on disk.
    pub fn open(path: PathBuf) -> Self {
        let entries = Self::load_entries(&path);
        Self { path, entries }
    }

    fn load_entries(path: &PathBuf) -> VecDeque<QueuedAction> {
        let Ok(raw) = fs::read_to_string(path) else {
            return VecDeque::new();
        };
        match serde_json::from_str::<Vec<QueuedAction>>(&raw) {
            Ok(entries) => entries.into(),
            Err(err) => {
                warn!("offline queue at {} is malformed ({err}); starting empty", path.display());
                VecDeque::new()
            }
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&QueuedAction> {
        self.entries.get(index)
    }

    pub fn entries(&self) -> impl Iterator<Item = &QueuedAction> {
        self.entries.iter()
    }

    /// Appends an action, dropping the oldest entry past capacity, and
    /// persists before returning.
    pub fn push(&mut self, action: QueuedAction) -> Result<()> {
        self.entries.push_back(action);
        while self.entries.len() > MAX_QUEUE {
            self.entries.pop_front();
        }
        self.persist()
    }

    pub fn remove(&mut self, index: usize) -> Option<QueuedAction> {
        self.entries.remove(index)
    }

    /// Atomic write: serialize to a temp file in the same directory, then
    /// rename over the target.
    pub fn persist(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let entries: Vec<&QueuedAction> = self.entries.iter().collect();
        let payload = serde_json::to_string_pretty(&entries)?;
        let tmp_path = self.path.with_extension("json.tmp");
        fs::write(&tmp_path, payload)?;
        fs::rename(&tmp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(n: usize) -> QueuedAction {
        QueuedAction {
            target: format!("robot{n}"),
            action: "restart_domain".to_string(),
            domain_id: "0".to_string(),
            queued_utc: String::new(),
        }
    }

    #[test]
    fn test_roundtrip_through_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state/offline_remote_queue.json");

        let mut queue = OfflineQueue::open(path.clone());
        queue.push(action(1)).unwrap();
        queue.push(action(2)).unwrap();

        let reloaded = OfflineQueue::open(path.clone());
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.get(0).unwrap().target, "robot1");

        // The persisted file is always valid JSON.
        let raw = fs::read_to_string(&path).unwrap();
        serde_json::from_str::<Vec<QueuedAction>>(&raw).unwrap();
    }

    #[test]
    fn test_malformed_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        fs::write(&path, "{not json").unwrap();
        let queue = OfflineQueue::open(path);
        assert!(queue.is_empty());
    }

    #[test]
    fn test_capacity_drops_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let mut queue = OfflineQueue::open(path);
        for n in 0..(MAX_QUEUE + 5) {
            queue.push(action(n)).unwrap();
        }
        assert_eq!(queue.len(), MAX_QUEUE);
        assert_eq!(queue.get(0).unwrap().target, "robot5");
    }

    #[test]
    fn test_remove_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let mut queue = OfflineQueue::open(dir.path().join("queue.json"));
        for n in 0..3 {
            queue.push(action(n)).unwrap();
        }
        let removed = queue.remove(1).unwrap();
        assert_eq!(removed.target, "robot1");
        assert_eq!(queue.get(1).unwrap().target, "robot2");
    }
}

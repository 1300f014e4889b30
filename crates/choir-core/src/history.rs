//! File history for undo.
//!
//! Write/edit tools snapshot a file's bytes *before* mutating it; `undo`
//! restores the most recent snapshots across all files. Snapshots are capped
//! per file in insertion order.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;

const MAX_HISTORY_PER_FILE: usize = 50;

#[derive(Debug, Clone)]
struct FileSnapshot {
    path: String,
    /// `None` when the file did not exist at snapshot time.
    content: Option<Vec<u8>>,
    taken_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Default)]
pub struct FileHistory {
    history: Mutex<HashMap<String, VecDeque<FileSnapshot>>>,
}

impl FileHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot the current state of `path`. Call before any mutation.
    pub async fn save_state(&self, path: &str) -> std::io::Result<()> {
        let content = match std::fs::read(Path::new(path)) {
            Ok(bytes) => Some(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => return Err(e),
        };
        let snapshot = FileSnapshot {
            path: path.to_string(),
            content,
            taken_at: chrono::Utc::now(),
        };
        let mut history = self.history.lock().await;
        let queue = history.entry(path.to_string()).or_default();
        if queue.len() == MAX_HISTORY_PER_FILE {
            queue.pop_front();
        }
        queue.push_back(snapshot);
        Ok(())
    }

    /// Undo the last `count` changes across all files, newest first.
    /// Returns the restored paths.
    pub async fn undo(&self, count: usize) -> std::io::Result<Vec<String>> {
        let mut history = self.history.lock().await;

        let mut newest: Vec<(chrono::DateTime<chrono::Utc>, String)> = history
            .iter()
            .filter_map(|(path, queue)| queue.back().map(|s| (s.taken_at, path.clone())))
            .collect();
        newest.sort_by(|a, b| b.0.cmp(&a.0));

        let mut restored = Vec::new();
        for (_, path) in newest.into_iter().take(count) {
            let Some(queue) = history.get_mut(&path) else {
                continue;
            };
            let Some(snapshot) = queue.pop_back() else {
                continue;
            };
            let file_path = PathBuf::from(&snapshot.path);
            match snapshot.content {
                None => {
                    // The file did not exist before; remove it.
                    if file_path.exists() {
                        std::fs::remove_file(&file_path)?;
                    }
                }
                Some(content) => {
                    if let Some(parent) = file_path.parent() {
                        std::fs::create_dir_all(parent)?;
                    }
                    std::fs::write(&file_path, content)?;
                }
            }
            restored.push(snapshot.path);
            if queue.is_empty() {
                history.remove(&path);
            }
        }
        Ok(restored)
    }

    /// Total snapshots across all files.
    pub async fn size(&self) -> usize {
        self.history.lock().await.values().map(VecDeque::len).sum()
    }

    pub async fn clear(&self) {
        self.history.lock().await.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn undo_restores_previous_content() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        let path_str = path.display().to_string();
        std::fs::write(&path, "v1").unwrap();

        let history = FileHistory::new();
        history.save_state(&path_str).await.unwrap();
        std::fs::write(&path, "v2").unwrap();

        let restored = history.undo(1).await.unwrap();
        assert_eq!(restored, vec![path_str]);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "v1");
    }

    #[tokio::test]
    async fn undo_deletes_files_that_did_not_exist() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("new.txt");
        let path_str = path.display().to_string();

        let history = FileHistory::new();
        history.save_state(&path_str).await.unwrap();
        std::fs::write(&path, "created").unwrap();

        history.undo(1).await.unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn undo_count_spans_files_newest_first() {
        let dir = TempDir::new().unwrap();
        let a = dir.path().join("a.txt");
        let b = dir.path().join("b.txt");
        std::fs::write(&a, "a1").unwrap();
        std::fs::write(&b, "b1").unwrap();

        let history = FileHistory::new();
        history.save_state(&a.display().to_string()).await.unwrap();
        std::fs::write(&a, "a2").unwrap();
        history.save_state(&b.display().to_string()).await.unwrap();
        std::fs::write(&b, "b2").unwrap();

        // Only the most recent change (b) is undone.
        let restored = history.undo(1).await.unwrap();
        assert_eq!(restored, vec![b.display().to_string()]);
        assert_eq!(std::fs::read_to_string(&b).unwrap(), "b1");
        assert_eq!(std::fs::read_to_string(&a).unwrap(), "a2");
    }

    #[tokio::test]
    async fn snapshots_are_capped_per_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.txt");
        let path_str = path.display().to_string();
        std::fs::write(&path, "x").unwrap();

        let history = FileHistory::new();
        for _ in 0..(MAX_HISTORY_PER_FILE + 10) {
            history.save_state(&path_str).await.unwrap();
        }
        assert_eq!(history.size().await, MAX_HISTORY_PER_FILE);
    }
}

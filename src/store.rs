use async_trait::async_trait;
use std::collections::HashMap;
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use tokio::sync::Mutex;

/// Durable persistence for serialized conversations, keyed by user identity.
/// The orchestrator only depends on get/put of opaque blobs.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get(&self, user_id: &str) -> anyhow::Result<Option<Vec<u8>>>;
    async fn put(&self, user_id: &str, blob: Vec<u8>) -> anyhow::Result<()>;
}

/// In-memory store, used in tests and as a default for ephemeral deployments
#[derive(Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn get(&self, user_id: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().await.get(user_id).cloned())
    }

    async fn put(&self, user_id: &str, blob: Vec<u8>) -> anyhow::Result<()> {
        self.blobs.lock().await.insert(user_id.to_string(), blob);
        Ok(())
    }
}

/// File-backed store: one file per user under a root directory
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub fn new(root: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let root = root.into();
        if !root.exists() {
            fs::create_dir_all(&root)?;
        }
        Ok(Self { root })
    }

    fn path_for(&self, user_id: &str) -> PathBuf {
        // Keep file names filesystem-safe regardless of the id scheme
        let safe: String = user_id
            .chars()
            .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        self.root.join(format!("{}.jsonl", safe))
    }
}

#[async_trait]
impl ConversationStore for FileStore {
    async fn get(&self, user_id: &str) -> anyhow::Result<Option<Vec<u8>>> {
        let path = self.path_for(user_id);
        if !path.exists() {
            return Ok(None);
        }
        Ok(Some(fs::read(path)?))
    }

    async fn put(&self, user_id: &str, blob: Vec<u8>) -> anyhow::Result<()> {
        let path = self.path_for(user_id);
        // Write to a sibling file and rename so an interrupted write never
        // leaves a half-written snapshot at the target path
        let staging = path.with_extension("jsonl.tmp");
        {
            let file = fs::File::create(&staging)?;
            let mut writer = std::io::BufWriter::new(file);
            writer.write_all(&blob)?;
            writer.flush()?;
        }
        fs::rename(&staging, &path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        assert!(store.get("alice").await.unwrap().is_none());
        store.put("alice", b"blob".to_vec()).await.unwrap();
        assert_eq!(store.get("alice").await.unwrap().unwrap(), b"blob");
    }

    #[tokio::test]
    async fn test_file_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();

        assert!(store.get("alice").await.unwrap().is_none());
        store.put("alice", b"line one\n".to_vec()).await.unwrap();
        assert_eq!(store.get("alice").await.unwrap().unwrap(), b"line one\n");

        // Overwrite, not append
        store.put("alice", b"line two\n".to_vec()).await.unwrap();
        assert_eq!(store.get("alice").await.unwrap().unwrap(), b"line two\n");
    }

    #[tokio::test]
    async fn test_file_store_replaces_snapshot_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store.put("alice", b"one\n".to_vec()).await.unwrap();
        store.put("alice", b"two\n".to_vec()).await.unwrap();

        // The staging file is gone and only the named snapshot remains
        let names: Vec<String> = fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["alice.jsonl"]);
        assert_eq!(store.get("alice").await.unwrap().unwrap(), b"two\n");
    }

    #[tokio::test]
    async fn test_file_store_sanitizes_user_ids() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileStore::new(dir.path()).unwrap();
        store.put("a/b:c", b"x".to_vec()).await.unwrap();
        assert_eq!(store.get("a/b:c").await.unwrap().unwrap(), b"x");
    }
}

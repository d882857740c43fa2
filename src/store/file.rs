use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use super::{validate_key, KvStore, StoreError};

/// Stores each key as `<dir>/<key>.json`.
///
/// Writes go to a temporary sibling file that is renamed over the target, so a
/// crash mid-write leaves the previous document intact. Two processes sharing
/// the directory still race with last-write-wins.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Creates `dir` if it does not exist.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await.map_err(|source| StoreError::Io {
            key: dir.display().to_string(),
            source,
        })?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

fn io_err(key: &str) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
    move |source| StoreError::Io {
        key: key.to_owned(),
        source,
    }
}

#[async_trait]
impl KvStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        validate_key(key)?;
        match fs::read_to_string(self.path_for(key)).await {
            Ok(s) => Ok(Some(s)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_err(key)(e)),
        }
    }

    async fn set(&self, key: &str, value: String) -> Result<(), StoreError> {
        validate_key(key)?;
        let target = self.path_for(key);
        let tmp = self.dir.join(format!(".{key}.json.tmp"));

        fs::write(&tmp, value.as_bytes()).await.map_err(io_err(key))?;
        fs::rename(&tmp, &target).await.map_err(io_err(key))?;

        debug!(key = %key, bytes = value.len(), "file_store: saved");
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        match fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_err(key)(e)),
        }
    }

    async fn keys(&self) -> Result<Vec<String>, StoreError> {
        let dir_key = self.dir.display().to_string();
        let mut entries = fs::read_dir(&self.dir).await.map_err(io_err(&dir_key))?;
        let mut keys = Vec::new();

        while let Some(entry) = entries.next_entry().await.map_err(io_err(&dir_key))? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(key) = name.strip_suffix(".json") {
                if validate_key(key).is_ok() {
                    keys.push(key.to_owned());
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_documents_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::open(tmp.path()).await.unwrap();

        assert!(store.get("smart_farm_sensors").await.unwrap().is_none());
        store
            .set("smart_farm_sensors", r#"[{"id":1}]"#.into())
            .await
            .unwrap();

        let reopened = FileStore::open(tmp.path()).await.unwrap();
        assert_eq!(
            reopened.get("smart_farm_sensors").await.unwrap().as_deref(),
            Some(r#"[{"id":1}]"#)
        );
        assert!(tmp.path().join("smart_farm_sensors.json").exists());
    }

    #[tokio::test]
    async fn keys_lists_only_json_documents() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::open(tmp.path()).await.unwrap();
        store.set("b_key", "1".into()).await.unwrap();
        store.set("a_key", "2".into()).await.unwrap();
        std::fs::write(tmp.path().join("notes.txt"), "x").unwrap();

        assert_eq!(store.keys().await.unwrap(), vec!["a_key", "b_key"]);
    }

    #[tokio::test]
    async fn remove_missing_key_is_ok() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::open(tmp.path()).await.unwrap();
        store.remove("never_written").await.unwrap();
    }

    #[tokio::test]
    async fn rejects_path_like_keys() {
        let tmp = tempfile::tempdir().unwrap();
        let store = FileStore::open(tmp.path()).await.unwrap();
        let err = store.set("../escape", "1".into()).await.unwrap_err();
        assert!(matches!(err, StoreError::InvalidKey(_)));
    }
}

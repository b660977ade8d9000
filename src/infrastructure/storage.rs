use async_trait::async_trait;
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::PathBuf;
use thiserror::Error;
use tokio::fs;
use tokio::sync::RwLock;
use tracing::debug;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage I/O error on {key}: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Invalid storage key: {0}")]
    InvalidKey(String),
}

/// String key-value storage. Keys are `/`-separated paths of at most one
/// directory level, e.g. `accounts/alice`.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    #[must_use]
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    #[must_use]
    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError>;
    /// Returns whether the key existed.
    #[must_use]
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;
    /// Keys starting with `prefix`, sorted.
    #[must_use]
    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError>;
}

#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.entries.write().await.remove(key).is_some())
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        Ok(self
            .entries
            .read()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// One JSON file per key under a root directory. Writes go through a
/// temporary file and a rename so a crash never leaves a half-written record.
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let root = root.into();
        fs::create_dir_all(&root).await.map_err(|e| StorageError::Io {
            key: root.display().to_string(),
            source: e,
        })?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StorageError> {
        let segments: Vec<&str> = key.split('/').collect();
        if segments.len() > 2 || segments.iter().any(|s| s.is_empty()) {
            return Err(StorageError::InvalidKey(key.to_string()));
        }

        let mut path = self.root.clone();
        for (i, segment) in segments.iter().enumerate() {
            let encoded = encode_segment(segment);
            if i + 1 == segments.len() {
                path.push(format!("{}.json", encoded));
            } else {
                path.push(encoded);
            }
        }
        Ok(path)
    }
}

#[async_trait]
impl KeyValueStore for FileStore {
    async fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path).await {
            Ok(content) => Ok(Some(content)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StorageError::Io {
                key: key.to_string(),
                source: e,
            }),
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let path = self.path_for(key)?;
        let io_err = |e| StorageError::Io {
            key: key.to_string(),
            source: e,
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await.map_err(io_err)?;
        }

        let temp_path = path.with_extension("json.tmp");
        fs::write(&temp_path, value).await.map_err(io_err)?;
        fs::rename(&temp_path, &path).await.map_err(io_err)?;
        debug!(key, "Stored record");
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let path = self.path_for(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StorageError::Io {
                key: key.to_string(),
                source: e,
            }),
        }
    }

    async fn keys_with_prefix(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let (dir_key, dir_path) = match prefix.rsplit_once('/') {
            Some((dir, _)) => (
                format!("{}/", dir),
                self.root.join(encode_segment(dir)),
            ),
            None => (String::new(), self.root.clone()),
        };

        let mut entries = match fs::read_dir(&dir_path).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(StorageError::Io {
                    key: prefix.to_string(),
                    source: e,
                })
            }
        };

        let mut keys = Vec::new();
        loop {
            let entry = entries.next_entry().await.map_err(|e| StorageError::Io {
                key: prefix.to_string(),
                source: e,
            })?;
            let Some(entry) = entry else { break };

            let file_name = entry.file_name();
            let Some(stem) = file_name.to_str().and_then(|n| n.strip_suffix(".json")) else {
                continue;
            };
            if let Some(segment) = decode_segment(stem) {
                let key = format!("{}{}", dir_key, segment);
                if key.starts_with(prefix) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}

/// Percent-encodes a key segment into a file name. `.` is escaped as well
/// so no segment can name `..` or collide with the `.json` suffix.
fn encode_segment(segment: &str) -> String {
    urlencoding::encode(segment).replace('.', "%2E")
}

fn decode_segment(encoded: &str) -> Option<String> {
    urlencoding::decode(encoded).ok().map(|s| s.into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_encoding_round_trips_unusual_names() {
        let name = "Анна.smith/../x";
        let encoded = encode_segment(name);
        assert!(encoded.bytes().all(|b| b.is_ascii_alphanumeric()
            || matches!(b, b'%' | b'_' | b'-' | b'~')));
        assert_eq!(decode_segment(&encoded).as_deref(), Some(name));
        assert_eq!(encode_segment(".."), "%2E%2E");
        assert_eq!(decode_segment("%2E%2E").as_deref(), Some(".."));
    }

    #[test]
    fn memory_store_overwrites_in_place() {
        let store = MemoryStore::new();
        tokio_test::block_on(async {
            store.put("schema_version", "1").await.unwrap();
            store.put("schema_version", "2").await.unwrap();
            assert_eq!(
                store.get("schema_version").await.unwrap().as_deref(),
                Some("2")
            );
            assert_eq!(store.keys_with_prefix("").await.unwrap().len(), 1);
        });
    }

    #[tokio::test]
    async fn memory_store_lists_by_prefix() {
        let store = MemoryStore::new();
        store.put("accounts/bob", "{}").await.unwrap();
        store.put("accounts/alice", "{}").await.unwrap();
        store.put("promo_codes/X", "{}").await.unwrap();

        let keys = store.keys_with_prefix("accounts/").await.unwrap();
        assert_eq!(keys, vec!["accounts/alice", "accounts/bob"]);
        assert!(store.delete("accounts/bob").await.unwrap());
        assert!(!store.delete("accounts/bob").await.unwrap());
    }

    #[tokio::test]
    async fn file_store_persists_records() {
        let root = std::env::temp_dir().join(format!("setka-store-{}", uuid::Uuid::new_v4()));
        let store = FileStore::open(&root).await.unwrap();

        store.put("schema_version", "2").await.unwrap();
        store.put("accounts/a.b", "{\"x\":1}").await.unwrap();
        store.put("accounts/c", "{}").await.unwrap();

        let reopened = FileStore::open(&root).await.unwrap();
        assert_eq!(
            reopened.get("accounts/a.b").await.unwrap().as_deref(),
            Some("{\"x\":1}")
        );
        assert_eq!(
            reopened.keys_with_prefix("accounts/").await.unwrap(),
            vec!["accounts/a.b", "accounts/c"]
        );
        assert_eq!(reopened.get("missing").await.unwrap(), None);
        assert!(reopened.delete("accounts/c").await.unwrap());
        assert!(matches!(
            reopened.put("a/b/c", "{}").await,
            Err(StorageError::InvalidKey(_))
        ));

        let _ = std::fs::remove_dir_all(&root);
    }
}

//! Object store abstraction for pipeline artifacts (S3-like, local, memory).
//!
//! This module defines the storage contract the pipeline is written against.
//! The store is assumed **eventually consistent with no compare-and-swap**:
//! every write is a blind overwrite, and nothing in this contract lets a
//! caller condition a write on current state. Coordination happens through
//! the existence of flag objects, never through versions.
//!
//! Documents are JSON; [`get_json`]/[`put_json`] wrap the byte-level calls
//! and map a missing object to `None`, since absence is an ordinary outcome
//! for every document the pipeline reads.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::error::{Error, Result};

/// Metadata about a stored object.
#[derive(Debug, Clone)]
pub struct ObjectMeta {
    /// Object path (key).
    pub path: String,
    /// Object size in bytes.
    pub size: u64,
    /// Last modification timestamp.
    pub last_modified: Option<DateTime<Utc>>,
}

/// Object store trait for pipeline artifacts.
///
/// All backends (S3-like, local disk, memory) implement this trait.
#[async_trait]
pub trait ObjectStore: Send + Sync + 'static {
    /// Reads an entire object.
    ///
    /// Returns `Error::NotFound` if the object doesn't exist.
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Writes an object, blindly overwriting any existing content.
    async fn put(&self, path: &str, data: Bytes) -> Result<()>;

    /// Deletes an object.
    ///
    /// Succeeds even if the object doesn't exist (idempotent).
    async fn delete(&self, path: &str) -> Result<()>;

    /// Lists objects with the given prefix.
    ///
    /// Returns an empty vec if no objects match.
    ///
    /// **Ordering**: Results are returned in arbitrary order that may vary
    /// between backends and invocations. Callers requiring deterministic
    /// order must sort.
    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>>;

    /// Gets object metadata without reading content.
    ///
    /// Returns `None` if the object doesn't exist.
    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>>;

    /// Returns whether an object exists.
    async fn exists(&self, path: &str) -> Result<bool> {
        Ok(self.head(path).await?.is_some())
    }
}

/// Reads and deserializes a JSON document, mapping absence to `None`.
///
/// # Errors
///
/// Returns `Error::Serialization` when the object exists but is not valid
/// JSON for `T`, and storage errors as-is.
pub async fn get_json<T: DeserializeOwned>(
    store: &dyn ObjectStore,
    path: &str,
) -> Result<Option<T>> {
    let data = match store.get(path).await {
        Ok(data) => data,
        Err(Error::NotFound(_)) => return Ok(None),
        Err(e) => return Err(e),
    };
    let value = serde_json::from_slice(&data)
        .map_err(|e| Error::serialization(format!("decoding {path}: {e}")))?;
    Ok(Some(value))
}

/// Serializes and writes a JSON document.
///
/// # Errors
///
/// Returns `Error::Serialization` when `value` cannot be serialized, and
/// storage errors as-is.
pub async fn put_json<T: Serialize>(store: &dyn ObjectStore, path: &str, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value)
        .map_err(|e| Error::serialization(format!("encoding {path}: {e}")))?;
    store.put(path, Bytes::from(data)).await
}

/// Copies every object under `from_prefix` to the same relative key under
/// `to_prefix`, returning the number of objects copied.
///
/// Both prefixes are expected to end with `/`.
pub async fn copy_prefix(
    store: &dyn ObjectStore,
    from_prefix: &str,
    to_prefix: &str,
) -> Result<usize> {
    let objects = store.list(from_prefix).await?;
    let mut copied = 0;
    for meta in objects {
        let Some(relative) = meta.path.strip_prefix(from_prefix) else {
            continue;
        };
        let data = store.get(&meta.path).await?;
        store.put(&format!("{to_prefix}{relative}"), data).await?;
        copied += 1;
    }
    Ok(copied)
}

/// In-memory object store for testing.
///
/// Thread-safe via `RwLock`. Not suitable for production.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    objects: Arc<RwLock<HashMap<String, StoredObject>>>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    last_modified: DateTime<Utc>,
}

impl MemoryStore {
    /// Creates a new empty memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides an object's modification timestamp.
    ///
    /// Test support: the deploy sweep keys off object age, which a fresh
    /// in-memory write can't otherwise produce. Returns false when the
    /// object doesn't exist.
    pub fn set_last_modified(&self, path: &str, when: DateTime<Utc>) -> Result<bool> {
        let mut objects = self.objects.write().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;
        match objects.get_mut(path) {
            Some(object) => {
                object.last_modified = when;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Returns the number of stored objects.
    pub fn len(&self) -> Result<usize> {
        let objects = self.objects.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;
        Ok(objects.len())
    }

    /// Returns whether the store is empty.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, path: &str) -> Result<Bytes> {
        let objects = self.objects.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        objects
            .get(path)
            .map(|o| o.data.clone())
            .ok_or_else(|| Error::NotFound(format!("object not found: {path}")))
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        let mut objects = self.objects.write().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        objects.insert(
            path.to_string(),
            StoredObject {
                data,
                last_modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn delete(&self, path: &str) -> Result<()> {
        let mut objects = self.objects.write().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        objects.remove(path);
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        Ok(objects
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(path, object)| ObjectMeta {
                path: path.clone(),
                size: object.data.len() as u64,
                last_modified: Some(object.last_modified),
            })
            .collect())
    }

    async fn head(&self, path: &str) -> Result<Option<ObjectMeta>> {
        let objects = self.objects.read().map_err(|_| Error::Internal {
            message: "lock poisoned".into(),
        })?;

        Ok(objects.get(path).map(|object| ObjectMeta {
            path: path.to_string(),
            size: object.data.len() as u64,
            last_modified: Some(object.last_modified),
        }))
    }
}

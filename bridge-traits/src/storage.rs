//! Persistent Key-Value Storage
//!
//! Durable string storage for state that survives a reload: the per-user
//! publish cache snapshot and list scroll offsets.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};

use crate::error::{BridgeError, Result};

/// Key-value store trait
///
/// Keys are flat strings; callers namespace them themselves
/// (`qortal_publish_{user}_{app}`, `scroll-position-{list}`).
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::KeyValueStore;
///
/// async fn remember_offset(store: &dyn KeyValueStore, list: &str, y: f64) -> Result<()> {
///     store.set_string(&format!("scroll-position-{list}"), &y.to_string()).await
/// }
/// ```
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Retrieve a string value
    async fn get_string(&self, key: &str) -> Result<Option<String>>;

    /// Store a string value, replacing any previous one
    async fn set_string(&self, key: &str, value: &str) -> Result<()>;

    /// Delete a value; deleting a missing key is not an error
    async fn delete(&self, key: &str) -> Result<()>;

    /// List all stored keys
    async fn list_keys(&self) -> Result<Vec<String>>;

    /// Check if a key exists
    async fn has_key(&self, key: &str) -> Result<bool> {
        Ok(self.get_string(key).await?.is_some())
    }
}

/// JSON helpers layered over any [`KeyValueStore`].
#[async_trait]
pub trait KeyValueStoreExt: KeyValueStore {
    async fn get_json<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: DeserializeOwned + Send,
    {
        match self.get_string(key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| BridgeError::Storage(format!("corrupt value at `{key}`: {e}"))),
            None => Ok(None),
        }
    }

    async fn set_json<T>(&self, key: &str, value: &T) -> Result<()>
    where
        T: Serialize + Sync,
    {
        let raw = serde_json::to_string(value)
            .map_err(|e| BridgeError::Storage(format!("cannot serialize `{key}`: {e}")))?;
        self.set_string(key, &raw).await
    }
}

impl<T: KeyValueStore + ?Sized> KeyValueStoreExt for T {}

#[cfg(test)]
mod tests {
    use super::*;
    use mockall::mock;
    use std::collections::HashMap;

    mock! {
        pub Store {}

        #[async_trait]
        impl KeyValueStore for Store {
            async fn get_string(&self, key: &str) -> Result<Option<String>>;
            async fn set_string(&self, key: &str, value: &str) -> Result<()>;
            async fn delete(&self, key: &str) -> Result<()>;
            async fn list_keys(&self) -> Result<Vec<String>>;
        }
    }

    #[tokio::test]
    async fn test_get_json_decodes_value() {
        let mut store = MockStore::new();
        store
            .expect_get_string()
            .returning(|_| Ok(Some(r#"{"a":1}"#.to_string())));

        let value: Option<HashMap<String, i32>> = store.get_json("k").await.unwrap();
        assert_eq!(value.unwrap().get("a"), Some(&1));
    }

    #[tokio::test]
    async fn test_get_json_reports_corruption() {
        let mut store = MockStore::new();
        store
            .expect_get_string()
            .returning(|_| Ok(Some("not json".to_string())));

        let err = store.get_json::<Vec<u8>>("k").await.unwrap_err();
        assert!(matches!(err, BridgeError::Storage(_)));
    }

    #[tokio::test]
    async fn test_has_key_uses_get() {
        let mut store = MockStore::new();
        store.expect_get_string().returning(|_| Ok(None));
        assert!(!store.has_key("missing").await.unwrap());
    }
}

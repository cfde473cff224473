//! In-memory storage backend.
//!
//! Keeps all data in a `HashMap` behind a read-write lock. Data is lost on
//! restart, which makes this backend suitable for tests and development.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory storage implementation.
#[derive(Default)]
pub struct MemoryStorage {
	store: RwLock<HashMap<String, Vec<u8>>>,
}

impl MemoryStorage {
	pub fn new() -> Self {
		Self::default()
	}
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let store = self.store.read().await;
		store.get(key).cloned().ok_or(StorageError::NotFound)
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		let mut store = self.store.write().await;
		store.insert(key.to_string(), value);
		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let mut store = self.store.write().await;
		store.remove(key);
		Ok(())
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		let store = self.store.read().await;
		Ok(store.contains_key(key))
	}

	async fn list_ids(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
		let prefix = format!("{}:", namespace);
		let store = self.store.read().await;
		Ok(store
			.keys()
			.filter_map(|k| k.strip_prefix(&prefix))
			.map(|id| id.to_string())
			.collect())
	}
}

/// Factory function to create a memory backend from configuration.
///
/// Memory storage takes no configuration parameters.
pub fn create_storage(_config: &toml::Value) -> Box<dyn StorageInterface> {
	Box::new(MemoryStorage::new())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_basic_operations() {
		let storage = MemoryStorage::new();

		let key = "intents:abc";
		let value = b"payload".to_vec();
		storage.set_bytes(key, value.clone()).await.unwrap();

		assert_eq!(storage.get_bytes(key).await.unwrap(), value);
		assert!(storage.exists(key).await.unwrap());

		storage.delete(key).await.unwrap();
		assert!(!storage.exists(key).await.unwrap());
		assert!(matches!(
			storage.get_bytes(key).await,
			Err(StorageError::NotFound)
		));
	}

	#[tokio::test]
	async fn test_list_ids_is_namespace_scoped() {
		let storage = MemoryStorage::new();

		storage.set_bytes("intents:a", vec![1]).await.unwrap();
		storage.set_bytes("intents:b", vec![2]).await.unwrap();
		storage.set_bytes("other:c", vec![3]).await.unwrap();

		let mut ids = storage.list_ids("intents").await.unwrap();
		ids.sort();
		assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);
	}
}

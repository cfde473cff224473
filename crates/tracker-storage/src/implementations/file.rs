//! File-based storage backend.
//!
//! Stores each value as a file under a base directory, one subdirectory per
//! namespace. Writes go through a temp file plus rename so readers never
//! observe a partial value.

use crate::{StorageError, StorageInterface};
use async_trait::async_trait;
use std::path::PathBuf;
use tokio::fs;

/// File-based storage implementation.
pub struct FileStorage {
	base_path: PathBuf,
}

impl FileStorage {
	pub fn new(base_path: PathBuf) -> Self {
		Self { base_path }
	}

	/// Maps a `namespace:id` key to `<base>/<namespace>/<id>.json`.
	fn file_path(&self, key: &str) -> PathBuf {
		let (namespace, id) = key.split_once(':').unwrap_or(("default", key));
		let safe_id = id.replace(['/', ':', '\\'], "_");
		self.base_path.join(namespace).join(format!("{}.json", safe_id))
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let path = self.file_path(key);
		match fs::read(&path).await {
			Ok(data) => Ok(data),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		let path = self.file_path(key);
		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?;
		}

		// Write atomically: temp file then rename.
		let temp_path = path.with_extension("tmp");
		fs::write(&temp_path, value)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		fs::rename(&temp_path, &path)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let path = self.file_path(key);
		match fs::remove_file(&path).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		Ok(self.file_path(key).exists())
	}

	async fn list_ids(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
		let dir = self.base_path.join(namespace);
		let mut entries = match fs::read_dir(&dir).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		let mut ids = Vec::new();
		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			let name = entry.file_name().to_string_lossy().to_string();
			if let Some(id) = name.strip_suffix(".json") {
				ids.push(id.to_string());
			}
		}
		Ok(ids)
	}
}

/// Factory function to create a file backend from configuration.
///
/// Configuration parameters:
/// - `storage_path`: base directory (default: "./data/intents")
pub fn create_storage(config: &toml::Value) -> Box<dyn StorageInterface> {
	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/intents")
		.to_string();

	Box::new(FileStorage::new(PathBuf::from(storage_path)))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_roundtrip_and_listing() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FileStorage::new(dir.path().to_path_buf());

		storage.set_bytes("intents:a", b"one".to_vec()).await.unwrap();
		storage.set_bytes("intents:b", b"two".to_vec()).await.unwrap();

		assert_eq!(storage.get_bytes("intents:a").await.unwrap(), b"one");

		let mut ids = storage.list_ids("intents").await.unwrap();
		ids.sort();
		assert_eq!(ids, vec!["a".to_string(), "b".to_string()]);

		// Empty namespace lists nothing rather than erroring.
		assert!(storage.list_ids("missing").await.unwrap().is_empty());

		storage.delete("intents:a").await.unwrap();
		assert!(matches!(
			storage.get_bytes("intents:a").await,
			Err(StorageError::NotFound)
		));
	}

	#[tokio::test]
	async fn test_overwrite_keeps_latest() {
		let dir = tempfile::tempdir().unwrap();
		let storage = FileStorage::new(dir.path().to_path_buf());

		storage.set_bytes("intents:x", b"v1".to_vec()).await.unwrap();
		storage.set_bytes("intents:x", b"v2".to_vec()).await.unwrap();
		assert_eq!(storage.get_bytes("intents:x").await.unwrap(), b"v2");
	}
}

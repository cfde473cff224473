//! Storage module for the intent tracker.
//!
//! This module provides the persistence abstractions for tracked intents:
//! a low-level key-value [`StorageInterface`] with pluggable backends, a
//! typed [`StorageService`] layered on top, and the [`IntentStore`] which
//! owns the intent lifecycle rules.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

pub mod implementations {
	pub mod file;
	pub mod memory;
}

mod store;

pub use store::{IntentStore, StoreError};

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// The requested key does not exist.
	#[error("Not found")]
	NotFound,
	/// Serialization or deserialization failed.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// The storage backend failed.
	#[error("Backend error: {0}")]
	Backend(String),
}

/// Low-level interface implemented by storage backends.
///
/// Backends store opaque bytes under string keys. Keys are namespaced by
/// the typed layer as `namespace:id`, and backends must be able to list
/// the ids stored under a namespace.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes for the given key.
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError>;

	/// Stores raw bytes under the given key, overwriting any prior value.
	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError>;

	/// Deletes the value associated with the given key. Deleting a missing
	/// key is not an error.
	async fn delete(&self, key: &str) -> Result<(), StorageError>;

	/// Checks whether a key exists.
	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Lists the id portion of every key under `namespace`.
	async fn list_ids(&self, namespace: &str) -> Result<Vec<String>, StorageError>;
}

/// Factory signature for creating a backend from TOML configuration.
pub type StorageFactory = fn(&toml::Value) -> Box<dyn StorageInterface>;

/// Typed storage layered over a backend.
///
/// Values are serialized to JSON and stored under `namespace:id` keys.
pub struct StorageService {
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	fn key(namespace: &str, id: &str) -> String {
		format!("{}:{}", namespace, id)
	}

	/// Serializes and stores a value.
	pub async fn store<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<(), StorageError> {
		let bytes =
			serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.backend.set_bytes(&Self::key(namespace, id), bytes).await
	}

	/// Retrieves and deserializes a value.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<T, StorageError> {
		let bytes = self.backend.get_bytes(&Self::key(namespace, id)).await?;
		serde_json::from_slice(&bytes).map_err(|e| StorageError::Serialization(e.to_string()))
	}

	/// Retrieves every value stored under a namespace.
	pub async fn retrieve_all<T: DeserializeOwned>(
		&self,
		namespace: &str,
	) -> Result<Vec<T>, StorageError> {
		let ids = self.backend.list_ids(namespace).await?;
		let mut values = Vec::with_capacity(ids.len());
		for id in ids {
			// A concurrent delete between list and get is not an error.
			match self.retrieve(namespace, &id).await {
				Ok(value) => values.push(value),
				Err(StorageError::NotFound) => continue,
				Err(e) => return Err(e),
			}
		}
		Ok(values)
	}

	/// Removes a value.
	pub async fn remove(&self, namespace: &str, id: &str) -> Result<(), StorageError> {
		self.backend.delete(&Self::key(namespace, id)).await
	}

	/// Checks whether a value exists.
	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&Self::key(namespace, id)).await
	}
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The storage contract.
//!
//! Implementations hold encrypted keys only and know nothing about the
//! domain: no validation, no crypto, just records addressed by id. The one
//! concurrency primitive offered to callers is the per-record version
//! token: [`Db::update`] succeeds only when the caller's token matches the
//! stored one, so every mutation above this layer is read-validate-write.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::KeydbError;
use crate::types::DbKey;

/// The database operations the key manager relies on.
#[async_trait]
pub trait Db: Send + Sync {
	/// Fetch the key with the given id, or `KeyIdNotFound`.
	async fn get(&self, id: &str) -> Result<DbKey, KeydbError>;

	/// Fetch every stored key.
	async fn get_all(&self) -> Result<Vec<DbKey>, KeydbError>;

	/// Insert new keys; `KeyExists` on any id collision.
	async fn add(&self, keys: &[DbKey]) -> Result<(), KeydbError>;

	/// Replace the stored record if its version token still matches
	/// `key.db_version`; `DbVersion` otherwise. A fresh token is assigned
	/// on success.
	async fn update(&self, key: &DbKey) -> Result<(), KeydbError>;

	/// Permanently remove the key, or `KeyIdNotFound`.
	async fn remove(&self, id: &str) -> Result<(), KeydbError>;
}

pub(crate) fn now_nanos() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_nanos() as i64)
		.unwrap_or(0)
}

#[derive(Default)]
struct TempDbInner {
	keys: Vec<DbKey>,
	err: Option<String>,
}

/// In-memory [`Db`] for tests and local development. No persistence, one
/// reader-writer lock, nanosecond timestamps as version tokens.
#[derive(Default)]
pub struct TempDb {
	inner: RwLock<TempDbInner>,
}

impl TempDb {
	pub fn new() -> Self {
		TempDb::default()
	}

	/// Make every subsequent operation fail with the given message. Used by
	/// tests to exercise storage-failure paths.
	pub async fn set_error(&self, err: Option<String>) {
		self.inner.write().await.err = err;
	}
}

#[async_trait]
impl Db for TempDb {
	async fn get(&self, id: &str) -> Result<DbKey, KeydbError> {
		let inner = self.inner.read().await;
		if let Some(e) = &inner.err {
			return Err(KeydbError::Unavailable(e.clone()));
		}
		inner
			.keys
			.iter()
			.find(|k| k.id == id)
			.cloned()
			.ok_or(KeydbError::KeyIdNotFound)
	}

	async fn get_all(&self) -> Result<Vec<DbKey>, KeydbError> {
		let inner = self.inner.read().await;
		if let Some(e) = &inner.err {
			return Err(KeydbError::Unavailable(e.clone()));
		}
		Ok(inner.keys.clone())
	}

	async fn add(&self, keys: &[DbKey]) -> Result<(), KeydbError> {
		let mut inner = self.inner.write().await;
		if let Some(e) = &inner.err {
			return Err(KeydbError::Unavailable(e.clone()));
		}
		for key in keys {
			if inner.keys.iter().any(|k| k.id == key.id) {
				return Err(KeydbError::KeyExists);
			}
		}
		for key in keys {
			let mut key = key.clone();
			key.db_version = now_nanos();
			inner.keys.push(key);
		}
		Ok(())
	}

	async fn update(&self, key: &DbKey) -> Result<(), KeydbError> {
		let mut inner = self.inner.write().await;
		if let Some(e) = &inner.err {
			return Err(KeydbError::Unavailable(e.clone()));
		}
		let stored = inner
			.keys
			.iter_mut()
			.find(|k| k.id == key.id)
			.ok_or(KeydbError::KeyIdNotFound)?;
		if stored.db_version != key.db_version {
			return Err(KeydbError::DbVersion);
		}
		let mut key = key.clone();
		key.db_version = now_nanos();
		*stored = key;
		Ok(())
	}

	async fn remove(&self, id: &str) -> Result<(), KeydbError> {
		let mut inner = self.inner.write().await;
		if let Some(e) = &inner.err {
			return Err(KeydbError::Unavailable(e.clone()));
		}
		let idx = inner
			.keys
			.iter()
			.position(|k| k.id == id)
			.ok_or(KeydbError::KeyIdNotFound)?;
		inner.keys.remove(idx);
		Ok(())
	}
}

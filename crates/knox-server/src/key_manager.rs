// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Orchestration of key mutations.
//!
//! Every operation follows the same discipline: load the encrypted record,
//! decrypt what the operation needs, validate the domain invariants on the
//! would-be result, then write back through the store's optimistic token.
//! On a token conflict the operation fails with `DbVersion` and the caller
//! (ultimately the client's backoff loop) retries; there is no retry here,
//! so a conflicted request never holds state across attempts.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use knox_core::{Access, Key, KeyVersion, KeyVersionList, VersionStatus};
use knox_server_keydb::{Cryptor, Db, KeydbError};

/// Errors from key-manager operations: either a domain invariant failed or
/// the storage/crypto layer did.
#[derive(Error, Debug)]
pub enum KeyManagerError {
	#[error(transparent)]
	Domain(#[from] knox_core::Error),

	#[error(transparent)]
	Store(#[from] KeydbError),
}

/// Mediates all access to stored keys.
pub struct KeyManager {
	cryptor: Arc<dyn Cryptor>,
	db: Arc<dyn Db>,
}

impl KeyManager {
	pub fn new(cryptor: Arc<dyn Cryptor>, db: Arc<dyn Db>) -> Self {
		KeyManager { cryptor, db }
	}

	/// Every stored key id.
	pub async fn get_all_key_ids(&self) -> Result<Vec<String>, KeyManagerError> {
		let keys = self.db.get_all().await?;
		Ok(keys.into_iter().map(|k| k.id).collect())
	}

	/// The ids among `fingerprints` whose stored version hash differs from
	/// the caller's. Ids not present in storage are skipped, not errors.
	pub async fn get_updated_key_ids(
		&self,
		fingerprints: &HashMap<String, String>,
	) -> Result<Vec<String>, KeyManagerError> {
		let keys = self.db.get_all().await?;
		Ok(keys
			.into_iter()
			.filter(|k| {
				fingerprints
					.get(&k.id)
					.is_some_and(|hash| *hash != k.version_hash)
			})
			.map(|k| k.id)
			.collect())
	}

	/// Fetch and decrypt a key, filtering versions by minimum status:
	/// `Inactive` returns everything, `Active` the Primary and Active
	/// versions, `Primary` only the Primary version.
	#[tracing::instrument(skip(self))]
	pub async fn get_key(
		&self,
		id: &str,
		status: VersionStatus,
	) -> Result<Key, KeyManagerError> {
		let enc = self.db.get(id).await?;
		let mut key = self.cryptor.decrypt(&enc)?;
		match status {
			VersionStatus::Inactive => {}
			VersionStatus::Active => {
				key.version_list = key.version_list.get_active();
			}
			VersionStatus::Primary => {
				let primary = key
					.version_list
					.get_primary()
					.cloned()
					.ok_or(knox_core::Error::MultiplePrimary)?;
				key.version_list = KeyVersionList(vec![primary]);
			}
		}
		Ok(key)
	}

	/// Validate, encrypt, and store a brand-new key.
	#[tracing::instrument(skip(self, key), fields(key_id = %key.id))]
	pub async fn add_new_key(&self, key: &Key) -> Result<(), KeyManagerError> {
		key.validate()?;
		let enc = self.cryptor.encrypt(key)?;
		self.db.add(&[enc]).await?;
		tracing::info!(key_id = %key.id, "key created");
		Ok(())
	}

	/// Remove a key's storage record entirely.
	#[tracing::instrument(skip(self))]
	pub async fn delete_key(&self, id: &str) -> Result<(), KeyManagerError> {
		self.db.remove(id).await?;
		tracing::info!(key_id = %id, "key deleted");
		Ok(())
	}

	/// Apply one ACL change. Versions stay encrypted; only the ACL on the
	/// stored record changes.
	#[tracing::instrument(skip(self, access))]
	pub async fn update_access(&self, id: &str, access: Access) -> Result<(), KeyManagerError> {
		let enc = self.db.get(id).await?;
		let mut updated = enc.clone();
		updated.acl = updated.acl.add(access);
		updated.acl.validate()?;
		self.db.update(&updated).await?;
		Ok(())
	}

	/// Append a new version. The version joins the plaintext list for
	/// validation and hashing, but only the new version is encrypted; the
	/// existing ciphertexts are carried over untouched.
	#[tracing::instrument(skip(self, version), fields(version_id = version.id))]
	pub async fn add_version(
		&self,
		id: &str,
		version: &KeyVersion,
	) -> Result<(), KeyManagerError> {
		let enc = self.db.get(id).await?;
		let mut key = self.cryptor.decrypt(&enc)?;

		key.version_list.push(version.clone());
		key.version_hash = key.version_list.hash();
		key.validate()?;

		let enc_version = self.cryptor.encrypt_version(&key, version)?;
		let mut updated = enc.clone();
		updated.version_list.push(enc_version);
		updated.version_hash = key.version_hash;
		self.db.update(&updated).await?;
		Ok(())
	}

	/// Rotate one version's status. Only statuses and the hash change on
	/// the stored record; no version data is re-encrypted.
	#[tracing::instrument(skip(self))]
	pub async fn update_version(
		&self,
		id: &str,
		version_id: u64,
		status: VersionStatus,
	) -> Result<(), KeyManagerError> {
		let enc = self.db.get(id).await?;
		let mut key = self.cryptor.decrypt(&enc)?;

		key.version_list.update(version_id, status)?;
		key.version_hash = key.version_list.hash();
		key.validate()?;

		let mut updated = enc.clone();
		for stored in &mut updated.version_list {
			if let Some(v) = key.version_list.iter().find(|v| v.id == stored.id) {
				stored.status = v.status;
			}
		}
		updated.version_hash = key.version_hash;
		self.db.update(&updated).await?;
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use knox_core::{AccessType, Acl, PrincipalType};
	use knox_server_keydb::{AesGcmCryptor, TempDb};

	fn manager_with_db() -> (KeyManager, Arc<TempDb>) {
		let db = Arc::new(TempDb::new());
		let cryptor = Arc::new(AesGcmCryptor::new(0, b"testtesttesttest").unwrap());
		(KeyManager::new(cryptor, db.clone()), db)
	}

	fn version(id: u64, status: VersionStatus, data: &[u8]) -> KeyVersion {
		KeyVersion {
			id,
			data: data.to_vec(),
			status,
			creation_time: id as i64,
		}
	}

	fn new_key(id: &str) -> Key {
		let versions = KeyVersionList(vec![version(1, VersionStatus::Primary, b"v1")]);
		let hash = versions.hash();
		Key {
			id: id.to_string(),
			acl: Acl::new().add(Access {
				principal_type: PrincipalType::User,
				id: "creator".to_string(),
				access_type: AccessType::Admin,
			}),
			version_list: versions,
			version_hash: hash,
			path: None,
		}
	}

	#[tokio::test]
	async fn add_and_get_round_trip() {
		let (m, _) = manager_with_db();
		m.add_new_key(&new_key("k1")).await.unwrap();

		let key = m.get_key("k1", VersionStatus::Inactive).await.unwrap();
		assert_eq!(key.id, "k1");
		assert_eq!(key.version_list.0[0].data, b"v1");
		assert!(key.validate().is_ok());
	}

	#[tokio::test]
	async fn add_duplicate_key_fails() {
		let (m, _) = manager_with_db();
		m.add_new_key(&new_key("k1")).await.unwrap();
		assert!(matches!(
			m.add_new_key(&new_key("k1")).await,
			Err(KeyManagerError::Store(KeydbError::KeyExists))
		));
	}

	#[tokio::test]
	async fn add_invalid_key_fails_before_storage() {
		let (m, _) = manager_with_db();
		let mut key = new_key("bad id!");
		key.version_hash = key.version_list.hash();
		assert!(matches!(
			m.add_new_key(&key).await,
			Err(KeyManagerError::Domain(knox_core::Error::InvalidKeyId))
		));
		assert!(m.get_all_key_ids().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn get_key_filters_by_minimum_status() {
		let (m, _) = manager_with_db();
		m.add_new_key(&new_key("k1")).await.unwrap();
		m.add_version("k1", &version(2, VersionStatus::Active, b"v2"))
			.await
			.unwrap();
		m.update_version("k1", 2, VersionStatus::Inactive).await.unwrap();

		let all = m.get_key("k1", VersionStatus::Inactive).await.unwrap();
		assert_eq!(all.version_list.len(), 2);

		let active = m.get_key("k1", VersionStatus::Active).await.unwrap();
		assert_eq!(active.version_list.len(), 1);

		let primary = m.get_key("k1", VersionStatus::Primary).await.unwrap();
		assert_eq!(primary.version_list.len(), 1);
		assert_eq!(
			primary.version_list.0[0].status,
			VersionStatus::Primary
		);
	}

	#[tokio::test]
	async fn get_missing_key_fails() {
		let (m, _) = manager_with_db();
		assert!(matches!(
			m.get_key("nope", VersionStatus::Active).await,
			Err(KeyManagerError::Store(KeydbError::KeyIdNotFound))
		));
	}

	#[tokio::test]
	async fn get_updated_ids_compares_hashes() {
		let (m, _) = manager_with_db();
		m.add_new_key(&new_key("k1")).await.unwrap();
		m.add_new_key(&new_key("k2")).await.unwrap();

		let k1_hash = m
			.get_key("k1", VersionStatus::Inactive)
			.await
			.unwrap()
			.version_hash;

		let fingerprints = HashMap::from([
			("k1".to_string(), k1_hash),
			("k2".to_string(), "stale".to_string()),
			("ghost".to_string(), String::new()),
		]);
		let updated = m.get_updated_key_ids(&fingerprints).await.unwrap();
		assert_eq!(updated, vec!["k2".to_string()]);
	}

	#[tokio::test]
	async fn add_version_extends_key_and_changes_hash() {
		let (m, _) = manager_with_db();
		m.add_new_key(&new_key("k1")).await.unwrap();
		let before = m
			.get_key("k1", VersionStatus::Inactive)
			.await
			.unwrap()
			.version_hash;

		m.add_version("k1", &version(2, VersionStatus::Active, b"v2"))
			.await
			.unwrap();

		let key = m.get_key("k1", VersionStatus::Inactive).await.unwrap();
		assert_eq!(key.version_list.len(), 2);
		assert_ne!(key.version_hash, before);
		assert!(key.validate().is_ok());
		assert_eq!(key.version_list.0[1].data, b"v2");
	}

	#[tokio::test]
	async fn update_version_rotates_primary() {
		let (m, _) = manager_with_db();
		m.add_new_key(&new_key("k1")).await.unwrap();
		m.add_version("k1", &version(2, VersionStatus::Active, b"v2"))
			.await
			.unwrap();

		m.update_version("k1", 2, VersionStatus::Primary).await.unwrap();

		let key = m.get_key("k1", VersionStatus::Inactive).await.unwrap();
		let primary = key.version_list.get_primary().unwrap();
		assert_eq!(primary.id, 2);
		assert!(key.validate().is_ok());
	}

	#[tokio::test]
	async fn update_version_rejects_illegal_transition() {
		let (m, _) = manager_with_db();
		m.add_new_key(&new_key("k1")).await.unwrap();
		assert!(matches!(
			m.update_version("k1", 1, VersionStatus::Inactive).await,
			Err(KeyManagerError::Domain(
				knox_core::Error::PrimaryToInactive
			))
		));
	}

	#[tokio::test]
	async fn update_access_round_trip() {
		let (m, _) = manager_with_db();
		m.add_new_key(&new_key("k1")).await.unwrap();

		let grant = Access {
			principal_type: PrincipalType::Machine,
			id: "web01".to_string(),
			access_type: AccessType::Read,
		};
		m.update_access("k1", grant.clone()).await.unwrap();
		let key = m.get_key("k1", VersionStatus::Inactive).await.unwrap();
		assert_eq!(key.acl.len(), 2);

		let revoke = Access { access_type: AccessType::None, ..grant };
		m.update_access("k1", revoke).await.unwrap();
		let key = m.get_key("k1", VersionStatus::Inactive).await.unwrap();
		assert_eq!(key.acl.len(), 1);
	}

	#[tokio::test]
	async fn delete_key_removes_record() {
		let (m, _) = manager_with_db();
		m.add_new_key(&new_key("k1")).await.unwrap();
		m.delete_key("k1").await.unwrap();
		assert!(m.get_key("k1", VersionStatus::Active).await.is_err());
	}

	// Concurrent writers race on the optimistic token; each retries on
	// conflict the way the HTTP client's backoff loop would, and the final
	// stored key must hold every write.
	#[tokio::test]
	async fn concurrent_add_version_converges_with_retries() {
		let (m, _) = manager_with_db();
		let m = Arc::new(m);
		m.add_new_key(&new_key("k1")).await.unwrap();

		let mut handles = Vec::new();
		for i in 2u64..=4 {
			let m = m.clone();
			handles.push(tokio::spawn(async move {
				let v = version(i, VersionStatus::Active, b"vn");
				for _ in 0..10 {
					match m.add_version("k1", &v).await {
						Ok(()) => return true,
						Err(KeyManagerError::Store(KeydbError::DbVersion)) => continue,
						Err(e) => panic!("unexpected error: {e}"),
					}
				}
				false
			}));
		}
		for h in handles {
			assert!(h.await.unwrap(), "writer exhausted its retries");
		}

		let key = m.get_key("k1", VersionStatus::Inactive).await.unwrap();
		assert_eq!(key.version_list.len(), 4);
		assert!(key.validate().is_ok());
	}
}

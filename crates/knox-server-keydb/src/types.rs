// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Storage-side key shapes.

use knox_core::{Acl, VersionStatus};
use serde::{Deserialize, Serialize};

use crate::error::KeydbError;

/// A key version with its payload sealed.
///
/// `crypto_metadata` is the cryptor scheme byte followed by the nonce; its
/// interpretation belongs to the cryptor that produced it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncKeyVersion {
	pub id: u64,
	#[serde(rename = "data", with = "knox_core::encoding::base64_bytes")]
	pub enc_data: Vec<u8>,
	pub status: VersionStatus,
	#[serde(rename = "ts")]
	pub creation_time: i64,
	#[serde(rename = "crypt", with = "knox_core::encoding::base64_bytes")]
	pub crypto_metadata: Vec<u8>,
}

impl EncKeyVersion {
	/// The cryptor scheme byte this version was sealed under.
	pub fn scheme_version(&self) -> Result<u8, KeydbError> {
		self.crypto_metadata
			.first()
			.copied()
			.ok_or(KeydbError::BadCryptoMetadata)
	}

	/// The nonce used to seal this version.
	pub fn nonce(&self) -> Result<&[u8], KeydbError> {
		if self.crypto_metadata.len() < 2 {
			return Err(KeydbError::BadCryptoMetadata);
		}
		Ok(&self.crypto_metadata[1..])
	}
}

/// A key as stored: encrypted versions plus the opaque concurrency token.
///
/// `db_version` is assigned by the storage layer on every successful write
/// and is never serialized with the record's data. Code above this crate
/// must treat it as opaque.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbKey {
	pub id: String,
	pub acl: Acl,
	#[serde(rename = "versions")]
	pub version_list: Vec<EncKeyVersion>,
	#[serde(rename = "hash")]
	pub version_hash: String,
	#[serde(skip)]
	pub db_version: i64,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn db_version_is_not_serialized() {
		let key = DbKey {
			id: "k".to_string(),
			acl: Acl::new(),
			version_list: Vec::new(),
			version_hash: "abc".to_string(),
			db_version: 42,
		};
		let json = serde_json::to_value(&key).unwrap();
		assert!(json.get("db_version").is_none());
		let back: DbKey = serde_json::from_value(json).unwrap();
		assert_eq!(back.db_version, 0);
	}

	#[test]
	fn metadata_accessors() {
		let v = EncKeyVersion {
			id: 1,
			enc_data: vec![0xff],
			status: VersionStatus::Primary,
			creation_time: 0,
			crypto_metadata: vec![7, 1, 2, 3],
		};
		assert_eq!(v.scheme_version().unwrap(), 7);
		assert_eq!(v.nonce().unwrap(), &[1, 2, 3]);

		let empty = EncKeyVersion { crypto_metadata: vec![], ..v };
		assert!(empty.scheme_version().is_err());
	}
}

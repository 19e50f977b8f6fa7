// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Keys, key versions, and the rotation state machine.
//!
//! A [`Key`] owns a non-empty list of [`KeyVersion`]s with exactly one
//! `Primary` version. Rotation never edits version data in place: new data
//! arrives as a fresh `Active` version and the status transitions in
//! [`KeyVersionList::update`] decide which versions produce and which merely
//! verify. The `version_hash` is a fingerprint of the in-use version ids so
//! clients can detect change without transferring key material.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::acl::Acl;
use crate::error::Error;

static KEY_ID_RE: Lazy<Regex> =
	Lazy::new(|| Regex::new("^[a-zA-Z0-9_:]+$").expect("key id regex"));

/// Rotation state of a single key version.
///
/// The derived ordering (`Primary < Active < Inactive`) is load-bearing: it
/// fixes the sort order the version hash is computed over.
#[derive(
	Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum VersionStatus {
	Primary,
	Active,
	Inactive,
}

/// A single version of a key. Everything except `status` is immutable once
/// the version exists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyVersion {
	pub id: u64,
	#[serde(with = "crate::encoding::base64_bytes")]
	pub data: Vec<u8>,
	pub status: VersionStatus,
	#[serde(rename = "ts")]
	pub creation_time: i64,
}

/// The ordered list of versions of a key. Grows as the key is rotated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct KeyVersionList(pub Vec<KeyVersion>);

impl KeyVersionList {
	pub fn iter(&self) -> std::slice::Iter<'_, KeyVersion> {
		self.0.iter()
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	pub fn push(&mut self, version: KeyVersion) {
		self.0.push(version);
	}

	/// The Primary and Active versions, in list order.
	pub fn get_active(&self) -> KeyVersionList {
		KeyVersionList(
			self.0
				.iter()
				.filter(|v| matches!(v.status, VersionStatus::Primary | VersionStatus::Active))
				.cloned()
				.collect(),
		)
	}

	/// The Primary version. `None` only for lists that fail [`validate`].
	///
	/// [`validate`]: KeyVersionList::validate
	pub fn get_primary(&self) -> Option<&KeyVersion> {
		self.0.iter().find(|v| v.status == VersionStatus::Primary)
	}

	/// Check that version ids are unique and exactly one version is Primary.
	pub fn validate(&self) -> Result<(), Error> {
		let mut primary_count = 0;
		let mut seen = std::collections::HashSet::with_capacity(self.0.len());
		for v in &self.0 {
			if v.status == VersionStatus::Primary {
				primary_count += 1;
			}
			if !seen.insert(v.id) {
				return Err(Error::SameVersionId);
			}
		}
		if primary_count != 1 {
			return Err(Error::MultiplePrimary);
		}
		Ok(())
	}

	/// SHA-256 fingerprint of the versions currently in use.
	///
	/// Versions are ordered by `(status, id)`, so the Primary id comes first
	/// followed by the Active ids in numeric order; each id contributes its
	/// 8 little-endian bytes. Inactive versions and version data do not
	/// participate, so the hash changes exactly when the set of usable
	/// versions changes.
	pub fn hash(&self) -> String {
		let mut sorted: Vec<&KeyVersion> = self.0.iter().collect();
		sorted.sort_by_key(|v| (v.status, v.id));
		let mut buf = Vec::with_capacity(8 * sorted.len());
		for v in sorted {
			if v.status != VersionStatus::Inactive {
				buf.extend_from_slice(&v.id.to_le_bytes());
			}
		}
		hex::encode(Sha256::digest(&buf))
	}

	/// Change the status of the version identified by `version_id`.
	///
	/// Legal transitions:
	/// - `Active -> Primary`, demoting the current Primary to Active
	/// - `Active -> Inactive`
	/// - `Inactive -> Active`
	///
	/// Everything else is rejected with the matching typed error. A Primary
	/// version is never changed directly; promote another Active version to
	/// replace it.
	pub fn update(&mut self, version_id: u64, status: VersionStatus) -> Result<(), Error> {
		let idx = self
			.0
			.iter()
			.position(|v| v.id == version_id)
			.ok_or(Error::KeyVersionNotFound)?;
		match status {
			VersionStatus::Primary => {
				if self.0[idx].status != VersionStatus::Active {
					return Err(Error::InactiveToPrimary);
				}
				for v in &mut self.0 {
					if v.status == VersionStatus::Primary {
						v.status = VersionStatus::Active;
					}
				}
				self.0[idx].status = VersionStatus::Primary;
			}
			VersionStatus::Active => {
				if self.0[idx].status != VersionStatus::Inactive {
					return Err(Error::PrimaryToActive);
				}
				self.0[idx].status = VersionStatus::Active;
			}
			VersionStatus::Inactive => {
				if self.0[idx].status != VersionStatus::Active {
					return Err(Error::PrimaryToInactive);
				}
				self.0[idx].status = VersionStatus::Inactive;
			}
		}
		Ok(())
	}
}

impl IntoIterator for KeyVersionList {
	type Item = KeyVersion;
	type IntoIter = std::vec::IntoIter<KeyVersion>;

	fn into_iter(self) -> Self::IntoIter {
		self.0.into_iter()
	}
}

impl<'a> IntoIterator for &'a KeyVersionList {
	type Item = &'a KeyVersion;
	type IntoIter = std::slice::Iter<'a, KeyVersion>;

	fn into_iter(self) -> Self::IntoIter {
		self.0.iter()
	}
}

/// A named secret: an id, an ACL, and the list of versions of its material.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
	pub id: String,
	pub acl: Acl,
	#[serde(rename = "versions")]
	pub version_list: KeyVersionList,
	#[serde(rename = "hash")]
	pub version_hash: String,
	/// Cache-file location, set client-side only.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub path: Option<String>,
}

impl Key {
	/// Check every key invariant: id charset, ACL validity, version-list
	/// validity, and hash agreement. Returns the first failure.
	pub fn validate(&self) -> Result<(), Error> {
		if !KEY_ID_RE.is_match(&self.id) {
			return Err(Error::InvalidKeyId);
		}
		self.acl.validate()?;
		self.version_list.validate()?;
		if self.version_hash != self.version_list.hash() {
			return Err(Error::InvalidVersionHash);
		}
		Ok(())
	}
}

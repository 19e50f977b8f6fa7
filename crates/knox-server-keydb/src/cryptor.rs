// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! At-rest encryption of key versions.
//!
//! Every version is sealed independently with AES-128-GCM under a single
//! process-wide key. The associated data binds the ciphertext to the
//! version's identity (version id, creation time, owning key id), so a
//! ciphertext moved between versions or keys fails to open. The metadata
//! stored next to the ciphertext is one scheme byte plus the nonce; a
//! cryptor refuses to open versions sealed under a different scheme byte,
//! which is how migrations discover what still needs re-encrypting.

use aes_gcm::aead::{Aead, KeyInit, OsRng, Payload};
use aes_gcm::{Aes128Gcm, Key, Nonce};
use rand::RngCore;
use zeroize::Zeroizing;

use knox_core::{Key as KnoxKey, KeyVersion};

use crate::error::KeydbError;
use crate::types::{DbKey, EncKeyVersion};

/// Size of the AES-128-GCM key in bytes.
pub const KEY_SIZE: usize = 16;

/// Size of the AES-GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;

const MAX_VARINT_LEN: usize = 10;

/// Converts between domain keys and their encrypted storage form.
pub trait Cryptor: Send + Sync {
	fn encrypt(&self, key: &KnoxKey) -> Result<DbKey, KeydbError>;
	fn decrypt(&self, key: &DbKey) -> Result<KnoxKey, KeydbError>;
	fn encrypt_version(
		&self,
		key: &KnoxKey,
		version: &KeyVersion,
	) -> Result<EncKeyVersion, KeydbError>;
	fn decrypt_version(
		&self,
		key: &DbKey,
		version: &EncKeyVersion,
	) -> Result<KeyVersion, KeydbError>;
}

/// AES-128-GCM [`Cryptor`] with a one-byte scheme version.
pub struct AesGcmCryptor {
	key: Zeroizing<[u8; KEY_SIZE]>,
	version: u8,
}

impl AesGcmCryptor {
	/// Create a cryptor from a 16-byte master key and a scheme version byte.
	pub fn new(version: u8, key_data: &[u8]) -> Result<Self, KeydbError> {
		let key: [u8; KEY_SIZE] = key_data
			.try_into()
			.map_err(|_| KeydbError::Encryption(format!("master key must be {KEY_SIZE} bytes")))?;
		Ok(AesGcmCryptor { key: Zeroizing::new(key), version })
	}

	fn cipher(&self) -> Aes128Gcm {
		Aes128Gcm::new(Key::<Aes128Gcm>::from_slice(self.key.as_ref()))
	}

	/// Associated data: version id ‖ creation time ‖ key id, with the
	/// integers varint-encoded into fixed 10-byte zero-padded buffers.
	fn associated_data(key_id: &str, version_id: u64, creation_time: i64) -> Vec<u8> {
		let mut ad = Vec::with_capacity(2 * MAX_VARINT_LEN + key_id.len());
		ad.extend_from_slice(&uvarint_buf(version_id));
		ad.extend_from_slice(&varint_buf(creation_time));
		ad.extend_from_slice(key_id.as_bytes());
		ad
	}
}

impl Cryptor for AesGcmCryptor {
	fn encrypt_version(
		&self,
		key: &KnoxKey,
		version: &KeyVersion,
	) -> Result<EncKeyVersion, KeydbError> {
		let mut nonce_bytes = [0u8; NONCE_SIZE];
		OsRng.fill_bytes(&mut nonce_bytes);
		let nonce = Nonce::from_slice(&nonce_bytes);

		let ad = Self::associated_data(&key.id, version.id, version.creation_time);
		let ciphertext = self
			.cipher()
			.encrypt(nonce, Payload { msg: &version.data, aad: &ad })
			.map_err(|e| KeydbError::Encryption(e.to_string()))?;

		let mut metadata = Vec::with_capacity(1 + NONCE_SIZE);
		metadata.push(self.version);
		metadata.extend_from_slice(&nonce_bytes);

		Ok(EncKeyVersion {
			id: version.id,
			enc_data: ciphertext,
			status: version.status,
			creation_time: version.creation_time,
			crypto_metadata: metadata,
		})
	}

	fn decrypt_version(
		&self,
		key: &DbKey,
		version: &EncKeyVersion,
	) -> Result<KeyVersion, KeydbError> {
		if version.scheme_version()? != self.version {
			return Err(KeydbError::CryptorVersion);
		}
		let nonce_bytes = version.nonce()?;
		if nonce_bytes.len() != NONCE_SIZE {
			return Err(KeydbError::BadCryptoMetadata);
		}
		let nonce = Nonce::from_slice(nonce_bytes);

		let ad = Self::associated_data(&key.id, version.id, version.creation_time);
		let plaintext = self
			.cipher()
			.decrypt(nonce, Payload { msg: &version.enc_data, aad: &ad })
			.map_err(|e| KeydbError::Decryption(e.to_string()))?;

		Ok(KeyVersion {
			id: version.id,
			data: plaintext,
			status: version.status,
			creation_time: version.creation_time,
		})
	}

	fn encrypt(&self, key: &KnoxKey) -> Result<DbKey, KeydbError> {
		let mut versions = Vec::with_capacity(key.version_list.len());
		for v in &key.version_list {
			versions.push(self.encrypt_version(key, v)?);
		}
		Ok(DbKey {
			id: key.id.clone(),
			acl: key.acl.clone(),
			version_list: versions,
			version_hash: key.version_hash.clone(),
			db_version: 0,
		})
	}

	fn decrypt(&self, key: &DbKey) -> Result<KnoxKey, KeydbError> {
		let mut versions = knox_core::KeyVersionList::default();
		for v in &key.version_list {
			versions.push(self.decrypt_version(key, v)?);
		}
		Ok(KnoxKey {
			id: key.id.clone(),
			acl: key.acl.clone(),
			version_list: versions,
			version_hash: key.version_hash.clone(),
			path: None,
		})
	}
}

/// Unsigned LEB128 into a fixed 10-byte buffer; unwritten bytes stay zero.
fn uvarint_buf(mut x: u64) -> [u8; MAX_VARINT_LEN] {
	let mut buf = [0u8; MAX_VARINT_LEN];
	let mut i = 0;
	while x >= 0x80 {
		buf[i] = (x as u8) | 0x80;
		x >>= 7;
		i += 1;
	}
	buf[i] = x as u8;
	buf
}

/// Zigzag-encoded signed varint into a fixed 10-byte buffer.
fn varint_buf(x: i64) -> [u8; MAX_VARINT_LEN] {
	let ux = ((x as u64) << 1) ^ ((x >> 63) as u64);
	uvarint_buf(ux)
}

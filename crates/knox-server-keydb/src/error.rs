// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

use thiserror::Error;

/// Errors from the storage and at-rest-crypto layer.
#[derive(Error, Debug)]
pub enum KeydbError {
	/// The record was encrypted under a different cryptor scheme byte.
	/// This is the signal to re-encrypt during a scheme migration.
	#[error("cryptor version does not match")]
	CryptorVersion,

	/// The stored record changed since it was read. The caller must re-read
	/// and reapply; nothing here retries.
	#[error("db version does not match")]
	DbVersion,

	#[error("key id not found")]
	KeyIdNotFound,

	#[error("key already exists")]
	KeyExists,

	#[error("encryption failed: {0}")]
	Encryption(String),

	#[error("decryption failed: {0}")]
	Decryption(String),

	#[error("malformed crypto metadata")]
	BadCryptoMetadata,

	#[error("serialization error: {0}")]
	Serialization(#[from] serde_json::Error),

	#[error("database error: {0}")]
	Sql(#[from] sqlx::Error),

	#[error("database unavailable: {0}")]
	Unavailable(String),
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Domain error taxonomy.
//!
//! These errors are a closed set: every validation or state-machine failure
//! a key mutation can produce is one of these variants, so the HTTP layer
//! can map them to response subcodes exhaustively.

use thiserror::Error;

/// Errors produced by domain validation and the version rotation state
/// machine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
	#[error("duplicate entries in ACL")]
	AclDuplicateEntries,

	#[error("ACL contains None access")]
	AclContainsNone,

	#[error("key id can only contain alphanumeric characters, colons, and underscores")]
	InvalidKeyId,

	#[error("version hash does not match version list")]
	InvalidVersionHash,

	#[error("version must be Active to promote to Primary")]
	InactiveToPrimary,

	#[error("Primary version can not be demoted, promote an Active version instead")]
	PrimaryToActive,

	#[error("version must be Active to demote to Inactive")]
	PrimaryToInactive,

	#[error("more than one Primary version")]
	MultiplePrimary,

	#[error("repeated version id")]
	SameVersionId,

	#[error("invalid version status")]
	InvalidStatus,

	#[error("key version not found")]
	KeyVersionNotFound,

	#[error("key id not found")]
	KeyIdNotFound,

	#[error("key already exists")]
	KeyExists,

	#[error("invalid principal identifier: {0}")]
	BadPrincipalIdentifier(String),
}

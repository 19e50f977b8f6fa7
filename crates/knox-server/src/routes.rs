// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! HTTP handlers for the `/v0` key API.
//!
//! Handlers read their declared parameters from the map the parameter
//! middleware resolved, authorize against the key's ACL with the request's
//! principal, and delegate to the key manager. Error mapping to subcodes
//! happens here and nowhere else.

use std::collections::HashMap;

use axum::extract::{Extension, State};
use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD as BASE64_URL};
use base64::Engine;
use rand::Rng;

use knox_core::{
	Access, AccessType, Acl, Code, Key, KeyVersion, KeyVersionList, Principal, PrincipalMux,
	VersionStatus,
};
use knox_server_keydb::KeydbError;

use crate::api::AppState;
use crate::api_response::{now_nanos, ApiData, HttpError};
use crate::key_manager::KeyManagerError;
use crate::params::Params;

fn internal(e: impl std::fmt::Display) -> HttpError {
	HttpError::new(Code::InternalServerError, e.to_string())
}

/// Fetch a key for an authorization check, mapping a missing id to its
/// client-facing subcode.
async fn get_key_or_404(
	state: &AppState,
	id: &str,
	status: VersionStatus,
) -> Result<Key, HttpError> {
	state.manager.get_key(id, status).await.map_err(|e| match e {
		KeyManagerError::Store(KeydbError::KeyIdNotFound) => {
			HttpError::code(Code::KeyIdentifierDoesNotExist)
		}
		other => internal(other),
	})
}

/// Check a submitted ACL entry's principal id against the per-type rules
/// and any registered site-specific validators.
fn validate_principal(state: &AppState, entry: &Access) -> Result<(), HttpError> {
	entry
		.principal_type
		.validate_id(&entry.id)
		.map_err(|e| HttpError::new(Code::BadPrincipalIdentifier, e.to_string()))?;
	for validator in state.principal_validators.iter() {
		validator(entry.principal_type, &entry.id)
			.map_err(|e| HttpError::new(Code::BadPrincipalIdentifier, e.to_string()))?;
	}
	Ok(())
}

/// Create a version with a random 63-bit id and the current time.
fn new_key_version(data: Vec<u8>, status: VersionStatus) -> KeyVersion {
	KeyVersion {
		id: rand::thread_rng().gen::<u64>() >> 1,
		data,
		status,
		creation_time: now_nanos(),
	}
}

/// Assemble a new key: requested ACL, plus Admin for the creator, plus the
/// process-wide default grants.
fn new_key(id: &str, acl: Acl, data: Vec<u8>, creator: &dyn Principal, defaults: &[Access]) -> Key {
	let mut acl = acl.add(Access {
		principal_type: knox_core::PrincipalType::User,
		id: creator.id(),
		access_type: AccessType::Admin,
	});
	for grant in defaults {
		acl = acl.add(grant.clone());
	}
	let version_list = KeyVersionList(vec![new_key_version(data, VersionStatus::Primary)]);
	let version_hash = version_list.hash();
	Key {
		id: id.to_string(),
		acl,
		version_list,
		version_hash,
		path: None,
	}
}

/// GET /v0/keys/ — list all ids, or with `id=hash` query pairs, list the
/// ids whose stored hash differs. No authorization beyond authentication.
pub async fn get_keys(
	State(state): State<AppState>,
	Extension(params): Extension<Params>,
) -> Result<ApiData<Vec<String>>, HttpError> {
	let query_string = params.get("queryString").unwrap_or("");
	let mut fingerprints: HashMap<String, String> = HashMap::new();
	for (k, v) in url::form_urlencoded::parse(query_string.as_bytes()) {
		fingerprints.insert(k.into_owned(), v.into_owned());
	}

	let ids = if fingerprints.is_empty() {
		state.manager.get_all_key_ids().await
	} else {
		state.manager.get_updated_key_ids(&fingerprints).await
	}
	.map_err(internal)?;
	Ok(ApiData(Some(ids)))
}

/// POST /v0/keys/ — create a key. Users only; the creator is granted
/// Admin. Returns the id of the initial Primary version.
pub async fn post_keys(
	State(state): State<AppState>,
	Extension(principal): Extension<PrincipalMux>,
	Extension(params): Extension<Params>,
) -> Result<ApiData<u64>, HttpError> {
	if !principal.is_user() {
		return Err(HttpError::code(Code::Unauthorized));
	}

	let key_id = params.require("id", Code::NoKeyId)?;
	let data = params.require("data", Code::NoKeyData)?;

	let acl = match params.get("acl") {
		Some(acl_json) => serde_json::from_str::<Acl>(acl_json)
			.map_err(|e| HttpError::new(Code::BadRequestData, e.to_string()))?,
		None => Acl::new(),
	};
	for entry in &acl {
		validate_principal(&state, entry)?;
	}

	let data = BASE64
		.decode(data)
		.map_err(|e| HttpError::new(Code::BadRequestData, e.to_string()))?;

	let key = new_key(key_id, acl, data, &principal, &state.default_access);
	match state.manager.add_new_key(&key).await {
		Ok(()) => Ok(ApiData(Some(key.version_list.0[0].id))),
		Err(KeyManagerError::Store(KeydbError::KeyExists)) => {
			Err(HttpError::code(Code::KeyIdentifierExists))
		}
		Err(KeyManagerError::Domain(knox_core::Error::InvalidKeyId)) => {
			Err(HttpError::code(Code::BadKeyFormat))
		}
		Err(e) => Err(internal(e)),
	}
}

/// GET /v0/keys/{keyID}/ — fetch a key. Requires Read. The `status` query
/// parameter is a JSON-quoted minimum status, default Active. The ACL is
/// zeroed in the response so cached copies never carry it.
pub async fn get_key(
	State(state): State<AppState>,
	Extension(principal): Extension<PrincipalMux>,
	Extension(params): Extension<Params>,
) -> Result<ApiData<Key>, HttpError> {
	let key_id = params.require("keyID", Code::NoKeyId)?;

	let status = match params.get("status") {
		Some(s) => serde_json::from_str::<VersionStatus>(s)
			.map_err(|e| HttpError::new(Code::BadRequestData, e.to_string()))?,
		None => VersionStatus::Active,
	};

	let mut key = get_key_or_404(&state, key_id, status).await?;
	if !principal.can_access(&key.acl, AccessType::Read) {
		return Err(HttpError::code(Code::Unauthorized));
	}
	key.acl = Acl::new();
	Ok(ApiData(Some(key)))
}

/// DELETE /v0/keys/{keyID}/ — remove a key entirely. Requires Admin.
pub async fn delete_key(
	State(state): State<AppState>,
	Extension(principal): Extension<PrincipalMux>,
	Extension(params): Extension<Params>,
) -> Result<ApiData<serde_json::Value>, HttpError> {
	let key_id = params.require("keyID", Code::NoKeyId)?;

	let key = get_key_or_404(&state, key_id, VersionStatus::Primary).await?;
	if !principal.can_access(&key.acl, AccessType::Admin) {
		return Err(HttpError::code(Code::Unauthorized));
	}

	state.manager.delete_key(key_id).await.map_err(internal)?;
	Ok(ApiData(None))
}

/// GET /v0/keys/{keyID}/access/ — fetch a key's ACL. Intentionally
/// unauthorized beyond authentication, so anyone can discover whom to ask
/// for a grant.
pub async fn get_access(
	State(state): State<AppState>,
	Extension(params): Extension<Params>,
) -> Result<ApiData<Acl>, HttpError> {
	let key_id = params.require("keyID", Code::NoKeyId)?;
	let key = get_key_or_404(&state, key_id, VersionStatus::Primary).await?;
	Ok(ApiData(Some(key.acl)))
}

/// PUT /v0/keys/{keyID}/access/ — add, update, or remove one ACL entry.
/// Requires Admin. The `access` field is JSON, or base64url-encoded JSON
/// for older clients. A `None` grant removes the entry; principal-id
/// validation is skipped for removals so stale entries stay revocable.
pub async fn put_access(
	State(state): State<AppState>,
	Extension(principal): Extension<PrincipalMux>,
	Extension(params): Extension<Params>,
) -> Result<ApiData<serde_json::Value>, HttpError> {
	let key_id = params.require("keyID", Code::NoKeyId)?;
	let access_str = params.require("access", Code::BadRequestData)?;

	let access: Access = match serde_json::from_str(access_str) {
		Ok(access) => access,
		Err(_) => {
			let decoded = BASE64_URL
				.decode(access_str)
				.map_err(|e| HttpError::new(Code::BadRequestData, e.to_string()))?;
			serde_json::from_slice(&decoded)
				.map_err(|e| HttpError::new(Code::BadRequestData, e.to_string()))?
		}
	};

	let key = get_key_or_404(&state, key_id, VersionStatus::Primary).await?;
	if !principal.can_access(&key.acl, AccessType::Admin) {
		return Err(HttpError::code(Code::Unauthorized));
	}

	if access.access_type != AccessType::None {
		validate_principal(&state, &access)?;
	}

	state
		.manager
		.update_access(key_id, access)
		.await
		.map_err(internal)?;
	Ok(ApiData(None))
}

/// POST /v0/keys/{keyID}/versions/ — add a version, immediately Active.
/// Requires Write. Returns the new version id.
pub async fn post_version(
	State(state): State<AppState>,
	Extension(principal): Extension<PrincipalMux>,
	Extension(params): Extension<Params>,
) -> Result<ApiData<u64>, HttpError> {
	let key_id = params.require("keyID", Code::NoKeyId)?;
	let data = params.require("data", Code::BadRequestData)?;
	let data = BASE64
		.decode(data)
		.map_err(|e| HttpError::new(Code::BadRequestData, e.to_string()))?;

	let key = get_key_or_404(&state, key_id, VersionStatus::Inactive).await?;
	if !principal.can_access(&key.acl, AccessType::Write) {
		return Err(HttpError::code(Code::Unauthorized));
	}

	let version = new_key_version(data, VersionStatus::Active);
	state
		.manager
		.add_version(key_id, &version)
		.await
		.map_err(internal)?;
	Ok(ApiData(Some(version.id)))
}

/// PUT /v0/keys/{keyID}/versions/{versionID}/ — rotate a version's status.
/// Requires Write. The `status` field is a JSON-quoted target status.
pub async fn put_version(
	State(state): State<AppState>,
	Extension(principal): Extension<PrincipalMux>,
	Extension(params): Extension<Params>,
) -> Result<ApiData<serde_json::Value>, HttpError> {
	let key_id = params.require("keyID", Code::NoKeyId)?;
	let version_id = params.require("versionID", Code::BadRequestData)?;
	let status_str = params.require("status", Code::BadRequestData)?;

	let status: VersionStatus = serde_json::from_str(status_str)
		.map_err(|e| HttpError::new(Code::BadRequestData, e.to_string()))?;
	let version_id: u64 = version_id
		.parse()
		.map_err(|e: std::num::ParseIntError| HttpError::new(Code::BadRequestData, e.to_string()))?;

	let key = get_key_or_404(&state, key_id, VersionStatus::Inactive).await?;
	if !principal.can_access(&key.acl, AccessType::Write) {
		return Err(HttpError::code(Code::Unauthorized));
	}

	match state.manager.update_version(key_id, version_id, status).await {
		Ok(()) => Ok(ApiData(None)),
		Err(KeyManagerError::Domain(knox_core::Error::KeyVersionNotFound)) => {
			Err(HttpError::code(Code::KeyVersionDoesNotExist))
		}
		Err(KeyManagerError::Domain(
			e @ (knox_core::Error::InactiveToPrimary
			| knox_core::Error::PrimaryToActive
			| knox_core::Error::PrimaryToInactive),
		)) => Err(HttpError::new(Code::BadRequestData, e.to_string())),
		Err(e) => Err(internal(e)),
	}
}

/// Fallback for unknown routes: the envelope's 404.
pub async fn not_found() -> HttpError {
	HttpError::code(Code::NotFound)
}

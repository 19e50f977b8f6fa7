// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The typed API client.
//!
//! Every call resolves the `Authorization` header through a pluggable
//! handler (an empty result is a hard error, not an anonymous request),
//! posts forms the way the server's parameter layer expects, and decodes
//! the response envelope. Server-side failures (subcode 1) are retried with
//! linear-plus-jitter backoff; every other error surfaces immediately.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::Rng;
use serde::de::DeserializeOwned;
use thiserror::Error;

use knox_core::{Access, Acl, Code, Key, Response, VersionStatus};

const BASE_BACKOFF: Duration = Duration::from_millis(50);
const MAX_BACKOFF: Duration = Duration::from_secs(3);
const MAX_RETRY_ATTEMPTS: u32 = 3;

/// Errors from client operations.
#[derive(Error, Debug)]
pub enum ClientError {
	#[error("no authentication data given; use 'knox login' or set KNOX_USER_AUTH or KNOX_MACHINE_AUTH")]
	NoAuth,

	#[error("request failed: {0}")]
	Http(#[from] reqwest::Error),

	#[error("{message}")]
	Api { code: Code, message: String },

	#[error("no folder set for cached keys")]
	NoCacheFolder,

	#[error("cache read failed: {0}")]
	Cache(#[from] std::io::Error),

	#[error("decode failed: {0}")]
	Json(#[from] serde_json::Error),
}

/// Supplies the `Authorization` header value for each call.
pub type AuthHandler = Arc<dyn Fn() -> Option<String> + Send + Sync>;

/// The key-management operations the server exposes.
#[async_trait]
pub trait ApiClient: Send + Sync {
	/// Cache first, network fallback on any cache error.
	async fn get_key(&self, key_id: &str) -> Result<Key, ClientError>;

	/// Read a key from the local file cache only.
	async fn cache_get_key(&self, key_id: &str) -> Result<Key, ClientError>;

	/// Fetch a key from the server, bypassing the cache.
	async fn network_get_key(&self, key_id: &str) -> Result<Key, ClientError>;

	/// Fetch a key with an explicit minimum-status filter: `Active` returns
	/// the Primary and Active versions, `Inactive` everything, `Primary`
	/// only the Primary version.
	async fn network_get_key_with_status(
		&self,
		key_id: &str,
		status: VersionStatus,
	) -> Result<Key, ClientError>;

	/// Create a key; returns the id of its initial Primary version.
	async fn create_key(&self, key_id: &str, data: &[u8], acl: &Acl) -> Result<u64, ClientError>;

	/// With an empty map, list all key ids; otherwise list the ids among
	/// the map whose server-side hash differs from the given one.
	async fn get_keys(
		&self,
		fingerprints: &HashMap<String, String>,
	) -> Result<Vec<String>, ClientError>;

	async fn delete_key(&self, key_id: &str) -> Result<(), ClientError>;

	async fn get_acl(&self, key_id: &str) -> Result<Acl, ClientError>;

	async fn put_access(&self, key_id: &str, access: &Access) -> Result<(), ClientError>;

	/// Add a version; returns the new version id.
	async fn add_version(&self, key_id: &str, data: &[u8]) -> Result<u64, ClientError>;

	async fn update_version(
		&self,
		key_id: &str,
		version_id: u64,
		status: VersionStatus,
	) -> Result<(), ClientError>;
}

/// Sleep duration before retry `attempt` (1-based): linear in the attempt
/// number with up to one base interval of jitter, capped.
pub fn backoff_duration(attempt: u32) -> Duration {
	let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..50));
	let duration = BASE_BACKOFF * attempt + jitter;
	duration.min(MAX_BACKOFF)
}

/// HTTP implementation of [`ApiClient`].
pub struct HttpApiClient {
	base_url: String,
	client: reqwest::Client,
	auth_handler: AuthHandler,
	/// Cache directory; `None` disables [`ApiClient::cache_get_key`].
	key_folder: Option<PathBuf>,
}

impl HttpApiClient {
	pub fn new(
		base_url: impl Into<String>,
		client: reqwest::Client,
		auth_handler: AuthHandler,
		key_folder: Option<PathBuf>,
	) -> Self {
		HttpApiClient {
			base_url: base_url.into().trim_end_matches('/').to_string(),
			client,
			auth_handler,
			key_folder,
		}
	}

	/// A reqwest client with the standard knox user agent.
	pub fn default_http_client() -> reqwest::Client {
		reqwest::Client::builder()
			.user_agent(concat!("knox/", env!("CARGO_PKG_VERSION")))
			.build()
			.unwrap_or_default()
	}

	async fn call<T: DeserializeOwned>(
		&self,
		method: reqwest::Method,
		path: &str,
		form: Option<&[(&str, String)]>,
	) -> Result<Option<T>, ClientError> {
		let auth = (self.auth_handler)().filter(|a| !a.is_empty()).ok_or(ClientError::NoAuth)?;
		let url = format!("{}{}", self.base_url, path);

		let mut attempt = 1;
		loop {
			let mut request = self
				.client
				.request(method.clone(), &url)
				.header("Authorization", &auth);
			if let Some(form) = form {
				request = request.form(form);
			}
			let response = request.send().await?;
			let envelope: Response<T> = response.json().await?;

			if envelope.is_ok() {
				return Ok(envelope.data);
			}
			if envelope.code != Code::InternalServerError || attempt == MAX_RETRY_ATTEMPTS {
				return Err(ClientError::Api {
					code: envelope.code,
					message: envelope.message,
				});
			}
			tracing::debug!(attempt, code = i32::from(envelope.code), "retrying after server error");
			tokio::time::sleep(backoff_duration(attempt)).await;
			attempt += 1;
		}
	}
}

#[async_trait]
impl ApiClient for HttpApiClient {
	async fn get_key(&self, key_id: &str) -> Result<Key, ClientError> {
		match self.cache_get_key(key_id).await {
			Ok(key) => Ok(key),
			Err(_) => self.network_get_key(key_id).await,
		}
	}

	async fn cache_get_key(&self, key_id: &str) -> Result<Key, ClientError> {
		let folder = self.key_folder.as_ref().ok_or(ClientError::NoCacheFolder)?;
		let path = folder.join(key_id);
		let bytes = std::fs::read(&path)?;
		let mut key: Key = serde_json::from_slice(&bytes)?;
		key.path = Some(path.display().to_string());
		Ok(key)
	}

	async fn network_get_key(&self, key_id: &str) -> Result<Key, ClientError> {
		let data = self
			.call::<Key>(reqwest::Method::GET, &format!("/v0/keys/{key_id}/"), None)
			.await?;
		data.ok_or_else(|| ClientError::Api {
			code: Code::InternalServerError,
			message: "empty key response".to_string(),
		})
	}

	async fn network_get_key_with_status(
		&self,
		key_id: &str,
		status: VersionStatus,
	) -> Result<Key, ClientError> {
		let path = {
			let mut serializer = url::form_urlencoded::Serializer::new(String::new());
			serializer.append_pair("status", &serde_json::to_string(&status)?);
			format!("/v0/keys/{key_id}/?{}", serializer.finish())
		};
		let data = self.call::<Key>(reqwest::Method::GET, &path, None).await?;
		data.ok_or_else(|| ClientError::Api {
			code: Code::InternalServerError,
			message: "empty key response".to_string(),
		})
	}

	async fn create_key(&self, key_id: &str, data: &[u8], acl: &Acl) -> Result<u64, ClientError> {
		let form = [
			("id", key_id.to_string()),
			("data", BASE64.encode(data)),
			("acl", serde_json::to_string(acl)?),
		];
		let id = self
			.call::<u64>(reqwest::Method::POST, "/v0/keys/", Some(&form))
			.await?;
		id.ok_or_else(|| ClientError::Api {
			code: Code::InternalServerError,
			message: "empty create response".to_string(),
		})
	}

	async fn get_keys(
		&self,
		fingerprints: &HashMap<String, String>,
	) -> Result<Vec<String>, ClientError> {
		let path = {
			let mut serializer = url::form_urlencoded::Serializer::new(String::new());
			for (id, hash) in fingerprints {
				serializer.append_pair(id, hash);
			}
			let query = serializer.finish();
			if query.is_empty() {
				"/v0/keys/".to_string()
			} else {
				format!("/v0/keys/?{query}")
			}
		};
		let ids = self.call::<Vec<String>>(reqwest::Method::GET, &path, None).await?;
		Ok(ids.unwrap_or_default())
	}

	async fn delete_key(&self, key_id: &str) -> Result<(), ClientError> {
		self.call::<serde_json::Value>(
			reqwest::Method::DELETE,
			&format!("/v0/keys/{key_id}/"),
			None,
		)
		.await?;
		Ok(())
	}

	async fn get_acl(&self, key_id: &str) -> Result<Acl, ClientError> {
		let acl = self
			.call::<Acl>(reqwest::Method::GET, &format!("/v0/keys/{key_id}/access/"), None)
			.await?;
		Ok(acl.unwrap_or_default())
	}

	async fn put_access(&self, key_id: &str, access: &Access) -> Result<(), ClientError> {
		let form = [("access", serde_json::to_string(access)?)];
		self.call::<serde_json::Value>(
			reqwest::Method::PUT,
			&format!("/v0/keys/{key_id}/access/"),
			Some(&form),
		)
		.await?;
		Ok(())
	}

	async fn add_version(&self, key_id: &str, data: &[u8]) -> Result<u64, ClientError> {
		let form = [("data", BASE64.encode(data))];
		let id = self
			.call::<u64>(
				reqwest::Method::POST,
				&format!("/v0/keys/{key_id}/versions/"),
				Some(&form),
			)
			.await?;
		id.ok_or_else(|| ClientError::Api {
			code: Code::InternalServerError,
			message: "empty version response".to_string(),
		})
	}

	async fn update_version(
		&self,
		key_id: &str,
		version_id: u64,
		status: VersionStatus,
	) -> Result<(), ClientError> {
		let form = [("status", serde_json::to_string(&status)?)];
		self.call::<serde_json::Value>(
			reqwest::Method::PUT,
			&format!("/v0/keys/{key_id}/versions/{version_id}/"),
			Some(&form),
		)
		.await?;
		Ok(())
	}
}

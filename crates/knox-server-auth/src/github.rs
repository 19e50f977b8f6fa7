// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! User authentication through github.com OAuth tokens.
//!
//! The token from the `Authorization` header (scheme `0u`) is replayed as a
//! bearer token against the GitHub API; the login becomes the user id and
//! the user's organizations become their groups.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use knox_core::Principal;

use crate::principals::User;
use crate::provider::{AuthContext, AuthError, AuthProvider};

const GITHUB_API_URL: &str = "https://api.github.com";

#[derive(Debug, Deserialize)]
struct LoginResponse {
	login: String,
}

/// Validates user OAuth tokens against the GitHub API.
pub struct GitHubProvider {
	client: reqwest::Client,
	api_url: String,
}

impl GitHubProvider {
	/// Create a provider whose API calls time out after `timeout`.
	pub fn new(timeout: Duration) -> Self {
		GitHubProvider {
			client: reqwest::Client::builder()
				.timeout(timeout)
				.build()
				.unwrap_or_default(),
			api_url: GITHUB_API_URL.to_string(),
		}
	}

	/// Point the provider at a different API endpoint. Used by tests.
	pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
		self.api_url = api_url.into();
		self
	}

	async fn get_api<T: serde::de::DeserializeOwned>(
		&self,
		path: &str,
		token: &str,
	) -> Result<T, AuthError> {
		let resp = self
			.client
			.get(format!("{}{}", self.api_url, path))
			.header("Authorization", format!("Bearer {token}"))
			.header("User-Agent", "knox-server")
			.send()
			.await?;
		if !resp.status().is_success() {
			return Err(AuthError::ApiStatus(resp.status().as_u16()));
		}
		Ok(resp.json().await?)
	}
}

#[async_trait]
impl AuthProvider for GitHubProvider {
	fn name(&self) -> &'static str {
		"github"
	}

	fn version_byte(&self) -> u8 {
		b'0'
	}

	fn type_byte(&self) -> u8 {
		b'u'
	}

	#[tracing::instrument(skip(self, token, _ctx))]
	async fn authenticate(
		&self,
		token: &str,
		_ctx: &AuthContext,
	) -> Result<Arc<dyn Principal>, AuthError> {
		let user: LoginResponse = self.get_api("/user", token).await?;
		let orgs: Vec<LoginResponse> = self.get_api("/user/orgs", token).await?;
		let groups = orgs.into_iter().map(|o| o.login);
		tracing::debug!(user = %user.login, "github token validated");
		Ok(Arc::new(User::new(user.login, groups)))
	}
}

/// A stand-in user provider for tests and the dev server: any non-empty
/// token authenticates as `testuser` in `testgroup`.
pub struct MockUserProvider;

#[async_trait]
impl AuthProvider for MockUserProvider {
	fn name(&self) -> &'static str {
		"mock_user"
	}

	fn version_byte(&self) -> u8 {
		b'0'
	}

	fn type_byte(&self) -> u8 {
		b'u'
	}

	async fn authenticate(
		&self,
		token: &str,
		_ctx: &AuthContext,
	) -> Result<Arc<dyn Principal>, AuthError> {
		if token.is_empty() || token == "notvalid" {
			return Err(AuthError::ApiStatus(401));
		}
		Ok(Arc::new(User::new(
			"testuser",
			vec!["testgroup".to_string()],
		)))
	}
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Application state and router construction.

use std::sync::Arc;

use axum::http::header::{HeaderValue, CONTENT_TYPE, X_CONTENT_TYPE_OPTIONS};
use axum::routing::{get, post, put};
use axum::{middleware, Router};
use tower_http::set_header::SetResponseHeaderLayer;

use knox_core::{Access, PrincipalValidator};
use knox_server_auth::AuthProvider;

use crate::key_manager::KeyManager;
use crate::{access_log, auth_middleware, params, routes};

/// Process-wide state shared by every handler.
#[derive(Clone)]
pub struct AppState {
	pub manager: Arc<KeyManager>,
	pub providers: Arc<Vec<Box<dyn AuthProvider>>>,
	/// Grants appended to the ACL of every created key.
	pub default_access: Arc<Vec<Access>>,
	/// Extra site-specific checks on principal ids submitted to ACLs.
	pub principal_validators: Arc<Vec<PrincipalValidator>>,
}

impl AppState {
	pub fn new(
		manager: KeyManager,
		providers: Vec<Box<dyn AuthProvider>>,
		default_access: Vec<Access>,
		principal_validators: Vec<PrincipalValidator>,
	) -> Self {
		AppState {
			manager: Arc::new(manager),
			providers: Arc::new(providers),
			default_access: Arc::new(default_access),
			principal_validators: Arc::new(principal_validators),
		}
	}
}

/// Build the `/v0` router with the full middleware chain.
///
/// Chain order, outermost first: response headers, access logging,
/// authentication, parameter parsing, handler. The fallback sits inside
/// authentication, so unknown routes still demand a valid principal and
/// still answer with the envelope.
pub fn create_router(state: AppState) -> Router {
	Router::new()
		.route("/v0/keys/", get(routes::get_keys).post(routes::post_keys))
		.route(
			"/v0/keys/{keyID}/",
			get(routes::get_key).delete(routes::delete_key),
		)
		.route(
			"/v0/keys/{keyID}/access/",
			get(routes::get_access).put(routes::put_access),
		)
		.route("/v0/keys/{keyID}/versions/", post(routes::post_version))
		.route(
			"/v0/keys/{keyID}/versions/{versionID}/",
			put(routes::put_version),
		)
		// route_layer: parameter parsing needs the matched path, which only
		// exists after routing.
		.route_layer(middleware::from_fn(params::parse_params))
		.fallback(routes::not_found)
		.layer(middleware::from_fn_with_state(
			state.clone(),
			auth_middleware::authenticate,
		))
		.layer(middleware::from_fn(access_log::access_log))
		.layer(SetResponseHeaderLayer::if_not_present(
			CONTENT_TYPE,
			HeaderValue::from_static("application/json"),
		))
		.layer(SetResponseHeaderLayer::overriding(
			X_CONTENT_TYPE_OPTIONS,
			HeaderValue::from_static("nosniff"),
		))
		.with_state(state)
}

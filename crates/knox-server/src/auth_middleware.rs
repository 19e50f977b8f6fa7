// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Request authentication.
//!
//! Every provider whose `(version, type)` selector matches the
//! `Authorization` header gets a chance to authenticate the request. The
//! first success becomes the default principal; all successes are retained
//! in the [`PrincipalMux`] so the access log can attribute which scheme
//! matched. A request no provider vouches for is rejected before it
//! reaches any handler.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Request, State};
use axum::http::header::AUTHORIZATION;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use knox_core::{Code, Principal, PrincipalMux};
use knox_server_auth::{match_token, AuthContext, TlsPeer};

use crate::api::AppState;
use crate::api_response::HttpError;

pub async fn authenticate(
	State(state): State<AppState>,
	mut req: Request,
	next: Next,
) -> Response {
	let header = req
		.headers()
		.get(AUTHORIZATION)
		.and_then(|v| v.to_str().ok())
		.unwrap_or("")
		.to_string();
	let ctx = AuthContext {
		tls_peer: req.extensions().get::<TlsPeer>().cloned(),
	};

	let mut default_principal: Option<Arc<dyn Principal>> = None;
	let mut all: HashMap<String, Arc<dyn Principal>> = HashMap::new();
	let mut last_error = "no matching authentication providers found".to_string();

	for provider in state.providers.iter() {
		let Some(token) = match_token(provider.as_ref(), &header) else {
			continue;
		};
		match provider.authenticate(token, &ctx).await {
			Ok(principal) => {
				if default_principal.is_none() {
					default_principal = Some(principal.clone());
				}
				all.insert(provider.name().to_string(), principal);
			}
			Err(e) => {
				tracing::debug!(provider = provider.name(), error = %e, "authentication failed");
				last_error = e.to_string();
			}
		}
	}

	let Some(default_principal) = default_principal else {
		return HttpError::new(Code::Unauthenticated, last_error).into_response();
	};

	let mux = PrincipalMux::new(default_principal, all);
	req.extensions_mut().insert(mux.clone());
	let mut response = next.run(req).await;
	response.extensions_mut().insert(mux);
	response
}

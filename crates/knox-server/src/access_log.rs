// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Structured access logging.
//!
//! One event per request on the `knox::access` target, carrying the route
//! id, the (already redacted) parameters, the principal and which auth
//! scheme produced it, and the response subcode. Secret payloads never
//! appear here: the parameter middleware redacts the `data` field before
//! this layer sees it.

use axum::extract::Request;
use axum::middleware::Next;
use axum::response::Response;

use knox_core::{Principal, PrincipalMux};

use crate::api_response::ApiErrorInfo;
use crate::params::{LoggedParams, RouteId};

pub async fn access_log(req: Request, next: Next) -> Response {
	let method = req.method().to_string();
	let path = req.uri().path().to_string();
	let user_agent = req
		.headers()
		.get(axum::http::header::USER_AGENT)
		.and_then(|v| v.to_str().ok())
		.unwrap_or("unknown")
		.to_string();

	let response = next.run(req).await;

	let status = response.status().as_u16();
	let route_id = response
		.extensions()
		.get::<RouteId>()
		.map(|r| r.0)
		.unwrap_or("404");
	let params = response
		.extensions()
		.get::<LoggedParams>()
		.map(|p| format!("{:?}", p.0))
		.unwrap_or_default();
	let (principal, auth_type) = response
		.extensions()
		.get::<PrincipalMux>()
		.map(|mux| (mux.id(), mux.type_name()))
		.unwrap_or_default();
	let (code, error_message) = response
		.extensions()
		.get::<ApiErrorInfo>()
		.map(|e| (i32::from(e.code), e.message.clone()))
		.unwrap_or((0, String::new()));

	tracing::info!(
		target: "knox::access",
		%method,
		%path,
		route = route_id,
		status,
		code,
		%principal,
		%auth_type,
		%params,
		%user_agent,
		msg = %error_message,
		"access"
	);

	response
}

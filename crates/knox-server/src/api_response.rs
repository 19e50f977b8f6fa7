// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Envelope construction for HTTP responses.
//!
//! Success and failure share one JSON envelope; the HTTP status is derived
//! from the subcode. Detailed error messages reach the client only for
//! bad-request subcodes (HTTP 400) where the caller can act on them; for
//! everything else the envelope carries the fixed message and the detail
//! stays in the access log.

use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

use knox_core::Code;

static HOSTNAME: OnceLock<String> = OnceLock::new();

pub(crate) fn hostname() -> &'static str {
	HOSTNAME.get_or_init(|| gethostname::gethostname().to_string_lossy().into_owned())
}

pub(crate) fn now_nanos() -> i64 {
	SystemTime::now()
		.duration_since(UNIX_EPOCH)
		.map(|d| d.as_nanos() as i64)
		.unwrap_or(0)
}

/// An API failure: the subcode plus server-side detail.
#[derive(Debug, Clone)]
pub struct HttpError {
	pub code: Code,
	pub message: String,
}

impl HttpError {
	pub fn new(code: Code, message: impl Into<String>) -> Self {
		HttpError { code, message: message.into() }
	}

	pub fn code(code: Code) -> Self {
		HttpError { code, message: String::new() }
	}
}

/// Copy of the error placed in response extensions for the access logger.
#[derive(Debug, Clone)]
pub struct ApiErrorInfo {
	pub code: Code,
	pub message: String,
}

impl IntoResponse for HttpError {
	fn into_response(self) -> Response {
		let status =
			StatusCode::from_u16(self.code.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
		// Only bad-request subcodes surface their detail to the client.
		let message = if status == StatusCode::BAD_REQUEST && !self.message.is_empty() {
			self.message.clone()
		} else {
			self.code.default_message().to_string()
		};
		let envelope = knox_core::Response::<serde_json::Value> {
			status: "error".to_string(),
			code: self.code,
			host: hostname().to_string(),
			ts: now_nanos(),
			message,
			data: None,
		};
		let mut response = (status, Json(envelope)).into_response();
		response.extensions_mut().insert(ApiErrorInfo {
			code: self.code,
			message: self.message,
		});
		response
	}
}

/// A successful handler result, wrapped into the `ok` envelope.
pub struct ApiData<T: Serialize>(pub Option<T>);

impl<T: Serialize> IntoResponse for ApiData<T> {
	fn into_response(self) -> Response {
		let envelope = knox_core::Response {
			status: "ok".to_string(),
			code: Code::Ok,
			host: hostname().to_string(),
			ts: now_nanos(),
			message: String::new(),
			data: self.0,
		};
		Json(envelope).into_response()
	}
}

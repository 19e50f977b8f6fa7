// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Declarative per-route parameter parsing.
//!
//! Each route declares exactly which parameters it consumes and from which
//! source: a URL path variable, a single query parameter, the raw query
//! string, or a form-post field. A middleware resolves the declarations
//! into one string map before the handler runs, and leaves a redacted copy
//! on the response for the access logger, so secret-bearing fields never
//! leak into logs no matter which handler touched them.

use std::collections::HashMap;

use axum::body::{to_bytes, Body};
use axum::extract::{FromRequestParts, MatchedPath, RawPathParams, Request};
use axum::http::header::CONTENT_TYPE;
use axum::http::Method;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};

use knox_core::Code;

use crate::api_response::HttpError;

const MAX_FORM_BYTES: usize = 64 * 1024;

/// Where a declared parameter comes from.
#[derive(Debug, Clone, Copy)]
pub enum ParamSpec {
	/// A URL path variable.
	Url(&'static str),
	/// A single query-string parameter (first value wins).
	Query(&'static str),
	/// The entire raw query string.
	RawQuery(&'static str),
	/// A form-post field (first value wins).
	Form(&'static str),
}

impl ParamSpec {
	fn name(&self) -> &'static str {
		match self {
			ParamSpec::Url(n) | ParamSpec::Query(n) | ParamSpec::RawQuery(n) | ParamSpec::Form(n) => n,
		}
	}
}

/// One row of the route table.
#[derive(Debug)]
pub struct RouteSpec {
	pub id: &'static str,
	pub method: &'static str,
	pub path: &'static str,
	pub params: &'static [ParamSpec],
}

/// The fixed route table: every route, its identifier for logging, and the
/// parameters it consumes.
pub static ROUTES: &[RouteSpec] = &[
	RouteSpec {
		id: "getkeys",
		method: "GET",
		path: "/v0/keys/",
		params: &[ParamSpec::RawQuery("queryString")],
	},
	RouteSpec {
		id: "postkeys",
		method: "POST",
		path: "/v0/keys/",
		params: &[ParamSpec::Form("id"), ParamSpec::Form("data"), ParamSpec::Form("acl")],
	},
	RouteSpec {
		id: "getkey",
		method: "GET",
		path: "/v0/keys/{keyID}/",
		params: &[ParamSpec::Url("keyID"), ParamSpec::Query("status")],
	},
	RouteSpec {
		id: "deletekey",
		method: "DELETE",
		path: "/v0/keys/{keyID}/",
		params: &[ParamSpec::Url("keyID")],
	},
	RouteSpec {
		id: "getaccess",
		method: "GET",
		path: "/v0/keys/{keyID}/access/",
		params: &[ParamSpec::Url("keyID")],
	},
	RouteSpec {
		id: "putaccess",
		method: "PUT",
		path: "/v0/keys/{keyID}/access/",
		params: &[ParamSpec::Url("keyID"), ParamSpec::Form("access")],
	},
	RouteSpec {
		id: "postversion",
		method: "POST",
		path: "/v0/keys/{keyID}/versions/",
		params: &[ParamSpec::Url("keyID"), ParamSpec::Form("data")],
	},
	RouteSpec {
		id: "putversion",
		method: "PUT",
		path: "/v0/keys/{keyID}/versions/{versionID}/",
		params: &[
			ParamSpec::Url("keyID"),
			ParamSpec::Url("versionID"),
			ParamSpec::Form("status"),
		],
	},
];

fn route_spec(method: &Method, matched_path: &str) -> Option<&'static RouteSpec> {
	ROUTES
		.iter()
		.find(|r| r.method == method.as_str() && r.path == matched_path)
}

/// The parameters a route declared, resolved from the request.
#[derive(Debug, Clone, Default)]
pub struct Params(pub HashMap<&'static str, String>);

impl Params {
	pub fn get(&self, name: &str) -> Option<&str> {
		self.0.get(name).map(String::as_str)
	}

	/// Fetch a required parameter or fail with the given subcode.
	pub fn require(&self, name: &str, missing: Code) -> Result<&str, HttpError> {
		self.get(name).ok_or_else(|| HttpError::code(missing))
	}
}

/// Redacted parameter copy attached to responses for the access logger.
#[derive(Debug, Clone)]
pub struct LoggedParams(pub HashMap<&'static str, String>);

/// The route identifier attached to responses for the access logger.
#[derive(Debug, Clone, Copy)]
pub struct RouteId(pub &'static str);

fn scrub(params: &Params) -> LoggedParams {
	let mut copy = params.0.clone();
	if copy.contains_key("data") {
		copy.insert("data", "<DATA>".to_string());
	}
	LoggedParams(copy)
}

fn first_query_value(query: &str, name: &str) -> Option<String> {
	url::form_urlencoded::parse(query.as_bytes())
		.find(|(k, _)| k == name)
		.map(|(_, v)| v.into_owned())
}

/// Middleware resolving the matched route's parameter declarations.
pub async fn parse_params(req: Request, next: Next) -> Response {
	let matched = req
		.extensions()
		.get::<MatchedPath>()
		.map(|p| p.as_str().to_string());
	let spec = match matched.as_deref().and_then(|p| route_spec(req.method(), p)) {
		Some(spec) => spec,
		// Route misses fall through to the router's fallback.
		None => return next.run(req).await,
	};

	let (mut parts, body) = req.into_parts();

	let needs_form = spec.params.iter().any(|p| matches!(p, ParamSpec::Form(_)));
	let form_pairs: Vec<(String, String)> = if needs_form {
		let is_form = parts
			.headers
			.get(CONTENT_TYPE)
			.and_then(|v| v.to_str().ok())
			.is_some_and(|ct| ct.starts_with("application/x-www-form-urlencoded"));
		if is_form {
			let bytes = match to_bytes(body, MAX_FORM_BYTES).await {
				Ok(bytes) => bytes,
				Err(e) => {
					return HttpError::new(Code::BadRequestData, e.to_string()).into_response();
				}
			};
			url::form_urlencoded::parse(&bytes)
				.map(|(k, v)| (k.into_owned(), v.into_owned()))
				.collect()
		} else {
			Vec::new()
		}
	} else {
		Vec::new()
	};

	let path_params = match RawPathParams::from_request_parts(&mut parts, &()).await {
		Ok(p) => p,
		Err(e) => return HttpError::new(Code::BadRequestData, e.to_string()).into_response(),
	};

	let mut params = Params::default();
	for p in spec.params {
		let value = match p {
			ParamSpec::Url(name) => path_params
				.iter()
				.find(|(k, _)| **k == **name)
				.map(|(_, v)| v.to_string()),
			ParamSpec::Query(name) => parts
				.uri
				.query()
				.and_then(|q| first_query_value(q, name)),
			ParamSpec::RawQuery(_) => Some(parts.uri.query().unwrap_or("").to_string()),
			ParamSpec::Form(name) => form_pairs
				.iter()
				.find(|(k, _)| k == name)
				.map(|(_, v)| v.clone()),
		};
		if let Some(value) = value {
			params.0.insert(p.name(), value);
		}
	}

	let logged = scrub(&params);
	let route_id = RouteId(spec.id);

	let mut req = Request::from_parts(parts, Body::empty());
	req.extensions_mut().insert(params);

	let mut response = next.run(req).await;
	response.extensions_mut().insert(logged);
	response.extensions_mut().insert(route_id);
	response
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! End-to-end tests of the `/v0` API against the in-memory store.

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use axum::Router;
use base64::engine::general_purpose::{STANDARD as BASE64, URL_SAFE_NO_PAD as BASE64_URL};
use base64::Engine;
use tower::ServiceExt;

use knox_core::{Key, Response, VersionStatus};
use knox_server::{create_router, AppState, KeyManager};
use knox_server_auth::{AuthProvider, MockUserProvider, MtlsProvider, TlsPeer};
use knox_server_keydb::{AesGcmCryptor, Cryptor, Db, TempDb};

const USER_AUTH: &str = "0utesttoken";

fn test_app() -> Router {
	let cryptor: Arc<dyn Cryptor> = Arc::new(AesGcmCryptor::new(0, b"testtesttesttest").unwrap());
	let db: Arc<dyn Db> = Arc::new(TempDb::new());
	let providers: Vec<Box<dyn AuthProvider>> =
		vec![Box::new(MockUserProvider), Box::new(MtlsProvider)];
	let state = AppState::new(
		KeyManager::new(cryptor, db),
		providers,
		Vec::new(),
		Vec::new(),
	);
	create_router(state)
}

fn machine_peer(hostname: &str) -> TlsPeer {
	TlsPeer {
		common_name: Some(hostname.to_string()),
		uri_sans: Vec::new(),
	}
}

async fn send(
	app: &Router,
	method: Method,
	uri: &str,
	auth: &str,
	form: Option<&[(&str, &str)]>,
	tls_peer: Option<TlsPeer>,
) -> (StatusCode, Response<serde_json::Value>) {
	let mut builder = Request::builder().method(method).uri(uri);
	if !auth.is_empty() {
		builder = builder.header(header::AUTHORIZATION, auth);
	}
	if let Some(peer) = tls_peer {
		builder = builder.extension(peer);
	}
	let body = match form {
		Some(fields) => {
			builder = builder.header(
				header::CONTENT_TYPE,
				"application/x-www-form-urlencoded",
			);
			let mut serializer = url::form_urlencoded::Serializer::new(String::new());
			for (k, v) in fields {
				serializer.append_pair(k, v);
			}
			Body::from(serializer.finish())
		}
		None => Body::empty(),
	};
	let request = builder.body(body).unwrap();
	let response = app.clone().oneshot(request).await.unwrap();
	let status = response.status();
	let bytes = axum::body::to_bytes(response.into_body(), 1024 * 1024)
		.await
		.unwrap();
	let envelope: Response<serde_json::Value> = serde_json::from_slice(&bytes)
		.unwrap_or_else(|e| panic!("bad envelope ({e}): {}", String::from_utf8_lossy(&bytes)));
	(status, envelope)
}

async fn create_key(app: &Router, id: &str, data: &[u8]) -> u64 {
	let encoded = BASE64.encode(data);
	let (status, envelope) = send(
		app,
		Method::POST,
		"/v0/keys/",
		USER_AUTH,
		Some(&[("id", id), ("data", &encoded)]),
		None,
	)
	.await;
	assert_eq!(status, StatusCode::OK, "create failed: {}", envelope.message);
	envelope.data.unwrap().as_u64().unwrap()
}

async fn fetch_key(app: &Router, uri: &str) -> Key {
	let (status, envelope) = send(app, Method::GET, uri, USER_AUTH, None, None).await;
	assert_eq!(status, StatusCode::OK, "get failed: {}", envelope.message);
	serde_json::from_value(envelope.data.unwrap()).unwrap()
}

#[tokio::test]
async fn create_and_fetch_key() {
	let app = test_app();
	let v0 = create_key(&app, "testkey", b"hello").await;

	let key = fetch_key(&app, "/v0/keys/testkey/").await;
	assert_eq!(key.id, "testkey");
	assert_eq!(key.version_list.len(), 1);
	assert_eq!(key.version_list.0[0].id, v0);
	assert_eq!(key.version_list.0[0].status, VersionStatus::Primary);
	assert_eq!(key.version_list.0[0].data, b"hello");
	// The ACL is zeroed in key responses.
	assert!(key.acl.is_empty());

	// The real ACL holds only the creator, with Admin.
	let (status, envelope) =
		send(&app, Method::GET, "/v0/keys/testkey/access/", USER_AUTH, None, None).await;
	assert_eq!(status, StatusCode::OK);
	let acl = envelope.data.unwrap();
	let entries = acl.as_array().unwrap();
	assert_eq!(entries.len(), 1);
	assert_eq!(entries[0]["id"], "testuser");
	assert_eq!(entries[0]["access"], "Admin");
	assert_eq!(entries[0]["type"], "User");
}

#[tokio::test]
async fn listing_and_change_detection() {
	let app = test_app();
	create_key(&app, "key_a", b"a").await;
	create_key(&app, "key_b", b"b").await;

	let (status, envelope) = send(&app, Method::GET, "/v0/keys/", USER_AUTH, None, None).await;
	assert_eq!(status, StatusCode::OK);
	let mut ids: Vec<String> =
		serde_json::from_value(envelope.data.unwrap()).unwrap();
	ids.sort();
	assert_eq!(ids, vec!["key_a", "key_b"]);

	let hash_a = fetch_key(&app, "/v0/keys/key_a/").await.version_hash;

	// Matching hash: unchanged. Stale hash: reported. Unknown id: skipped.
	let uri = format!("/v0/keys/?key_a={hash_a}&key_b=stale&ghost=");
	let (status, envelope) = send(&app, Method::GET, &uri, USER_AUTH, None, None).await;
	assert_eq!(status, StatusCode::OK);
	let changed: Vec<String> = serde_json::from_value(envelope.data.unwrap()).unwrap();
	assert_eq!(changed, vec!["key_b"]);
}

#[tokio::test]
async fn rotate_key_version() {
	let app = test_app();
	let v0 = create_key(&app, "testkey", b"hello").await;
	let hash_before = fetch_key(&app, "/v0/keys/testkey/").await.version_hash;

	// Add a second version; it joins as Active.
	let encoded = BASE64.encode(b"world");
	let (status, envelope) = send(
		&app,
		Method::POST,
		"/v0/keys/testkey/versions/",
		USER_AUTH,
		Some(&[("data", &encoded)]),
		None,
	)
	.await;
	assert_eq!(status, StatusCode::OK);
	let v1 = envelope.data.unwrap().as_u64().unwrap();

	// Promote it.
	let uri = format!("/v0/keys/testkey/versions/{v1}/");
	let (status, _) = send(
		&app,
		Method::PUT,
		&uri,
		USER_AUTH,
		Some(&[("status", "\"Primary\"")]),
		None,
	)
	.await;
	assert_eq!(status, StatusCode::OK);

	let key = fetch_key(&app, "/v0/keys/testkey/").await;
	assert_eq!(key.version_list.len(), 2);
	let primary = key.version_list.get_primary().unwrap();
	assert_eq!(primary.id, v1);
	assert!(key
		.version_list
		.iter()
		.any(|v| v.id == v0 && v.status == VersionStatus::Active));
	assert_ne!(key.version_hash, hash_before);
	assert!(key.validate().is_ok());
}

#[tokio::test]
async fn deactivate_and_filter_versions() {
	let app = test_app();
	let v0 = create_key(&app, "testkey", b"hello").await;
	let encoded = BASE64.encode(b"world");
	let (_, envelope) = send(
		&app,
		Method::POST,
		"/v0/keys/testkey/versions/",
		USER_AUTH,
		Some(&[("data", &encoded)]),
		None,
	)
	.await;
	let v1 = envelope.data.unwrap().as_u64().unwrap();

	let uri = format!("/v0/keys/testkey/versions/{v1}/");
	send(&app, Method::PUT, &uri, USER_AUTH, Some(&[("status", "\"Primary\"")]), None).await;
	let uri = format!("/v0/keys/testkey/versions/{v0}/");
	let (status, _) = send(
		&app,
		Method::PUT,
		&uri,
		USER_AUTH,
		Some(&[("status", "\"Inactive\"")]),
		None,
	)
	.await;
	assert_eq!(status, StatusCode::OK);

	let active = fetch_key(&app, "/v0/keys/testkey/?status=%22Active%22").await;
	assert_eq!(active.version_list.len(), 1);
	assert_eq!(active.version_list.0[0].id, v1);

	let all = fetch_key(&app, "/v0/keys/testkey/?status=%22Inactive%22").await;
	assert_eq!(all.version_list.len(), 2);

	// Demoting the Primary directly is an illegal transition.
	let uri = format!("/v0/keys/testkey/versions/{v1}/");
	let (status, envelope) = send(
		&app,
		Method::PUT,
		&uri,
		USER_AUTH,
		Some(&[("status", "\"Inactive\"")]),
		None,
	)
	.await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(i32::from(envelope.code), 11);
}

#[tokio::test]
async fn machines_cannot_create_keys() {
	let app = test_app();
	let (status, envelope) = send(
		&app,
		Method::POST,
		"/v0/keys/",
		"0tweb01",
		Some(&[("id", "mkey"), ("data", "aGk=")]),
		Some(machine_peer("web01")),
	)
	.await;
	assert_eq!(status, StatusCode::FORBIDDEN);
	assert_eq!(i32::from(envelope.code), 6);
}

#[tokio::test]
async fn acl_round_trip_grants_and_revokes() {
	let app = test_app();
	create_key(&app, "testkey", b"hello").await;

	let put_access = |access: String| {
		let app = app.clone();
		async move {
			send(
				&app,
				Method::PUT,
				"/v0/keys/testkey/access/",
				USER_AUTH,
				Some(&[("access", access.as_str())]),
				None,
			)
			.await
		}
	};

	// Read grant lets the machine fetch the key.
	let (status, _) =
		put_access(r#"{"type":"Machine","id":"tester","access":"Read"}"#.to_string()).await;
	assert_eq!(status, StatusCode::OK);
	let (status, _) = send(
		&app,
		Method::GET,
		"/v0/keys/testkey/",
		"0ttester",
		None,
		Some(machine_peer("tester")),
	)
	.await;
	assert_eq!(status, StatusCode::OK);

	// Upgrade to Write, then revoke with None.
	let (status, _) =
		put_access(r#"{"type":"Machine","id":"tester","access":"Write"}"#.to_string()).await;
	assert_eq!(status, StatusCode::OK);
	let (status, _) =
		put_access(r#"{"type":"Machine","id":"tester","access":"None"}"#.to_string()).await;
	assert_eq!(status, StatusCode::OK);

	// Back to just the creator; the machine is locked out again.
	let (_, envelope) =
		send(&app, Method::GET, "/v0/keys/testkey/access/", USER_AUTH, None, None).await;
	let entries = envelope.data.unwrap();
	assert_eq!(entries.as_array().unwrap().len(), 1);
	let (status, envelope) = send(
		&app,
		Method::GET,
		"/v0/keys/testkey/",
		"0ttester",
		None,
		Some(machine_peer("tester")),
	)
	.await;
	assert_eq!(status, StatusCode::FORBIDDEN);
	assert_eq!(i32::from(envelope.code), 6);
}

#[tokio::test]
async fn legacy_base64url_access_parameter() {
	let app = test_app();
	create_key(&app, "testkey", b"hello").await;

	let encoded = BASE64_URL.encode(r#"{"type":"Machine","id":"tester","access":"Read"}"#);
	let (status, _) = send(
		&app,
		Method::PUT,
		"/v0/keys/testkey/access/",
		USER_AUTH,
		Some(&[("access", encoded.as_str())]),
		None,
	)
	.await;
	assert_eq!(status, StatusCode::OK);

	let (_, envelope) =
		send(&app, Method::GET, "/v0/keys/testkey/access/", USER_AUTH, None, None).await;
	assert_eq!(envelope.data.unwrap().as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn empty_machine_prefix_is_rejected() {
	let app = test_app();
	create_key(&app, "testkey", b"hello").await;
	let (status, envelope) = send(
		&app,
		Method::PUT,
		"/v0/keys/testkey/access/",
		USER_AUTH,
		Some(&[("access", r#"{"type":"MachinePrefix","id":"","access":"Read"}"#)]),
		None,
	)
	.await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(i32::from(envelope.code), 13);
}

#[tokio::test]
async fn delete_requires_admin() {
	let app = test_app();
	create_key(&app, "testkey", b"hello").await;

	// A machine with only Read cannot delete.
	send(
		&app,
		Method::PUT,
		"/v0/keys/testkey/access/",
		USER_AUTH,
		Some(&[("access", r#"{"type":"Machine","id":"tester","access":"Read"}"#)]),
		None,
	)
	.await;
	let (status, _) = send(
		&app,
		Method::DELETE,
		"/v0/keys/testkey/",
		"0ttester",
		None,
		Some(machine_peer("tester")),
	)
	.await;
	assert_eq!(status, StatusCode::FORBIDDEN);

	// The creator can.
	let (status, _) =
		send(&app, Method::DELETE, "/v0/keys/testkey/", USER_AUTH, None, None).await;
	assert_eq!(status, StatusCode::OK);
	let (status, envelope) =
		send(&app, Method::GET, "/v0/keys/testkey/", USER_AUTH, None, None).await;
	assert_eq!(status, StatusCode::NOT_FOUND);
	assert_eq!(i32::from(envelope.code), 4);
}

#[tokio::test]
async fn duplicate_key_id_is_a_bad_request() {
	let app = test_app();
	create_key(&app, "testkey", b"hello").await;
	let (status, envelope) = send(
		&app,
		Method::POST,
		"/v0/keys/",
		USER_AUTH,
		Some(&[("id", "testkey"), ("data", "aGk=")]),
		None,
	)
	.await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(i32::from(envelope.code), 2);
}

#[tokio::test]
async fn bad_key_id_charset_is_rejected() {
	let app = test_app();
	let (status, envelope) = send(
		&app,
		Method::POST,
		"/v0/keys/",
		USER_AUTH,
		Some(&[("id", "bad key!"), ("data", "aGk=")]),
		None,
	)
	.await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(i32::from(envelope.code), 12);
}

#[tokio::test]
async fn missing_parameters_have_dedicated_subcodes() {
	let app = test_app();
	let (status, envelope) = send(
		&app,
		Method::POST,
		"/v0/keys/",
		USER_AUTH,
		Some(&[("data", "aGk=")]),
		None,
	)
	.await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(i32::from(envelope.code), 9);

	let (status, envelope) = send(
		&app,
		Method::POST,
		"/v0/keys/",
		USER_AUTH,
		Some(&[("id", "newkey")]),
		None,
	)
	.await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(i32::from(envelope.code), 10);
}

#[tokio::test]
async fn invalid_status_filter_is_a_bad_request() {
	let app = test_app();
	create_key(&app, "testkey", b"hello").await;
	let (status, envelope) = send(
		&app,
		Method::GET,
		"/v0/keys/testkey/?status=%22Sideways%22",
		USER_AUTH,
		None,
		None,
	)
	.await;
	assert_eq!(status, StatusCode::BAD_REQUEST);
	assert_eq!(i32::from(envelope.code), 11);
}

#[tokio::test]
async fn unauthenticated_requests_are_rejected() {
	let app = test_app();

	let (status, envelope) = send(&app, Method::GET, "/v0/keys/", "", None, None).await;
	assert_eq!(status, StatusCode::UNAUTHORIZED);
	assert_eq!(i32::from(envelope.code), 5);

	// A token for an unregistered scheme does not authenticate either.
	let (status, _) = send(&app, Method::GET, "/v0/keys/", "0xtoken", None, None).await;
	assert_eq!(status, StatusCode::UNAUTHORIZED);

	// Nor does a machine token without a TLS peer certificate.
	let (status, _) = send(&app, Method::GET, "/v0/keys/", "0tweb01", None, None).await;
	assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_routes_answer_with_the_envelope() {
	let app = test_app();
	let (status, envelope) =
		send(&app, Method::GET, "/v0/nope/", USER_AUTH, None, None).await;
	assert_eq!(status, StatusCode::NOT_FOUND);
	assert_eq!(i32::from(envelope.code), 8);
	assert_eq!(envelope.status, "error");
	assert!(!envelope.host.is_empty());
}

#[tokio::test]
async fn version_rotation_on_unknown_version_is_404() {
	let app = test_app();
	create_key(&app, "testkey", b"hello").await;
	let (status, envelope) = send(
		&app,
		Method::PUT,
		"/v0/keys/testkey/versions/12345/",
		USER_AUTH,
		Some(&[("status", "\"Inactive\"")]),
		None,
	)
	.await;
	assert_eq!(status, StatusCode::NOT_FOUND);
	assert_eq!(i32::from(envelope.code), 3);
}

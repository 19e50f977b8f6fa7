// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The Knox key server.
//!
//! This crate wires the domain model, the encrypted store, and the auth
//! providers into the `/v0` HTTP API. The [`KeyManager`] is the one place
//! mutations are orchestrated: every write is read-validate-write against
//! the store's optimistic version token, and conflicts are surfaced to the
//! client rather than retried here.

pub mod access_log;
pub mod api;
pub mod api_response;
pub mod auth_middleware;
pub mod config;
pub mod key_manager;
pub mod params;
pub mod routes;
pub mod tls;

pub use api::{create_router, AppState};
pub use api_response::{ApiData, HttpError};
pub use config::ServerConfig;
pub use key_manager::{KeyManager, KeyManagerError};

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Authentication for the Knox server.
//!
//! A provider turns an `Authorization` token (plus whatever identity the
//! TLS layer established) into a [`knox_core::Principal`]. Providers are a
//! closed, enumerable set selected by the two leading bytes of the
//! `Authorization` header; the server tries every provider whose selector
//! matches and the first success becomes the request's default principal.

pub mod github;
pub mod mtls;
pub mod principals;
pub mod provider;

pub use github::{GitHubProvider, MockUserProvider};
pub use mtls::{MtlsProvider, SpiffeProvider, TlsPeer};
pub use principals::{Machine, Service, User};
pub use provider::{match_token, AuthContext, AuthError, AuthProvider};

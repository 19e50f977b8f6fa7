// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The provider contract and header scheme selection.
//!
//! The `Authorization` header is `<version><type><token>`: one ASCII byte
//! for the protocol version, one for the provider kind, and the rest is the
//! provider's token. [`match_token`] peels the selector; the server hands
//! the remainder to every provider advertising that `(version, type)` pair.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use knox_core::Principal;

use crate::mtls::TlsPeer;

/// Errors produced by authentication providers.
#[derive(Error, Debug)]
pub enum AuthError {
	#[error("no matching authentication providers found")]
	NoProviderMatch,

	#[error("token validation request failed: {0}")]
	Http(#[from] reqwest::Error),

	#[error("token validation returned status {0}")]
	ApiStatus(u16),

	#[error("no verified peer certificate presented")]
	NoPeerCertificate,

	#[error("peer certificate does not match token hostname")]
	HostnameMismatch,

	#[error("more than one service identity specified in certificate")]
	MultipleServiceIds,

	#[error("invalid service id format")]
	InvalidServiceId,
}

/// Request-scoped inputs available to providers besides the token.
///
/// Providers never see the socket; the TLS front-end distills the peer
/// certificate (when one was presented and verified) into [`TlsPeer`].
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
	pub tls_peer: Option<TlsPeer>,
}

/// An authentication scheme.
#[async_trait]
pub trait AuthProvider: Send + Sync {
	/// Stable name used to attribute principals in access logs.
	fn name(&self) -> &'static str;

	/// The protocol version byte this provider consumes.
	fn version_byte(&self) -> u8;

	/// The scheme type byte this provider consumes.
	fn type_byte(&self) -> u8;

	/// Validate `token` and produce the authenticated principal.
	async fn authenticate(
		&self,
		token: &str,
		ctx: &AuthContext,
	) -> Result<Arc<dyn Principal>, AuthError>;
}

/// If `header` selects `provider`, return the provider's share of it.
pub fn match_token<'a>(provider: &dyn AuthProvider, header: &'a str) -> Option<&'a str> {
	let bytes = header.as_bytes();
	if bytes.len() > 2
		&& bytes[0] == provider.version_byte()
		&& bytes[1] == provider.type_byte()
	{
		Some(&header[2..])
	} else {
		None
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::principals::Machine;

	struct Dummy;

	#[async_trait]
	impl AuthProvider for Dummy {
		fn name(&self) -> &'static str {
			"dummy"
		}

		fn version_byte(&self) -> u8 {
			b'0'
		}

		fn type_byte(&self) -> u8 {
			b't'
		}

		async fn authenticate(
			&self,
			token: &str,
			_ctx: &AuthContext,
		) -> Result<Arc<dyn Principal>, AuthError> {
			Ok(Arc::new(Machine::new(token)))
		}
	}

	#[test]
	fn match_token_peels_selector() {
		assert_eq!(match_token(&Dummy, "0thost01"), Some("host01"));
		assert_eq!(match_token(&Dummy, "0uhost01"), None);
		assert_eq!(match_token(&Dummy, "1thost01"), None);
		assert_eq!(match_token(&Dummy, "0t"), None);
		assert_eq!(match_token(&Dummy, ""), None);
	}
}

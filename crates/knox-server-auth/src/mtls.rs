// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Machine and service authentication from the TLS peer certificate.
//!
//! The TLS front-end verifies any presented client certificate against the
//! configured roots and distills it into a [`TlsPeer`] before the request
//! reaches the router. The mTLS provider (scheme `0t`) checks the token
//! names the certified host; the SPIFFE provider (scheme `0s`) ignores the
//! token entirely and takes the workload identity from the certificate's
//! URI SAN.

use std::sync::Arc;

use async_trait::async_trait;

use knox_core::Principal;

use crate::principals::{Machine, Service};
use crate::provider::{AuthContext, AuthError, AuthProvider};

/// The verified identity of a TLS peer, extracted from its certificate.
///
/// Only present when the peer presented a certificate that chained to the
/// configured roots; an unverified certificate never produces a `TlsPeer`.
#[derive(Debug, Clone, Default)]
pub struct TlsPeer {
	/// Subject common name.
	pub common_name: Option<String>,
	/// URI subject alternative names.
	pub uri_sans: Vec<String>,
}

/// Authenticates machines: the token must equal the certified hostname.
pub struct MtlsProvider;

#[async_trait]
impl AuthProvider for MtlsProvider {
	fn name(&self) -> &'static str {
		"mtls"
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
		ctx: &AuthContext,
	) -> Result<Arc<dyn Principal>, AuthError> {
		let peer = ctx.tls_peer.as_ref().ok_or(AuthError::NoPeerCertificate)?;
		match &peer.common_name {
			Some(cn) if cn == token => Ok(Arc::new(Machine::new(token))),
			_ => Err(AuthError::HostnameMismatch),
		}
	}
}

/// Authenticates workloads by the SPIFFE id in their certificate.
pub struct SpiffeProvider;

impl SpiffeProvider {
	/// Split `spiffe://<domain>/<path>` into its parts. The prefix is
	/// assumed and the split is on the first slash; anything else is an
	/// authentication failure rather than a diagnosed parse error.
	fn parse_spiffe_id(uri: &str) -> Result<(&str, &str), AuthError> {
		let rest = uri
			.strip_prefix("spiffe://")
			.ok_or(AuthError::InvalidServiceId)?;
		match rest.split_once('/') {
			Some((domain, path)) if !domain.is_empty() && !path.is_empty() => Ok((domain, path)),
			_ => Err(AuthError::InvalidServiceId),
		}
	}
}

#[async_trait]
impl AuthProvider for SpiffeProvider {
	fn name(&self) -> &'static str {
		"spiffe"
	}

	fn version_byte(&self) -> u8 {
		b'0'
	}

	fn type_byte(&self) -> u8 {
		b's'
	}

	async fn authenticate(
		&self,
		_token: &str,
		ctx: &AuthContext,
	) -> Result<Arc<dyn Principal>, AuthError> {
		let peer = ctx.tls_peer.as_ref().ok_or(AuthError::NoPeerCertificate)?;
		if peer.uri_sans.len() > 1 {
			return Err(AuthError::MultipleServiceIds);
		}
		let uri = peer.uri_sans.first().ok_or(AuthError::InvalidServiceId)?;
		let (domain, path) = Self::parse_spiffe_id(uri)?;
		Ok(Arc::new(Service::new(domain, path)))
	}
}

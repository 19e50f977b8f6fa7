// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! TLS termination for the API listener.
//!
//! TLS 1.2+ with an ECDHE-AES128-GCM floor. Client certificates are
//! requested but never required: a connection without one still serves
//! user-token auth, while a certificate that verifies against the
//! configured client roots is distilled into a [`TlsPeer`] request
//! extension for the mTLS and SPIFFE providers.

use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio_rustls::rustls::crypto::{ring, CryptoProvider};
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::server::WebPkiClientVerifier;
use tokio_rustls::rustls::version::{TLS12, TLS13};
use tokio_rustls::rustls::{RootCertStore, ServerConfig as RustlsConfig};
use tokio_rustls::TlsAcceptor;
use tower::ServiceExt;
use x509_parser::prelude::{FromDer, GeneralName, X509Certificate};

use knox_server_auth::TlsPeer;

use crate::config::TlsConfig;

#[derive(Error, Debug)]
pub enum TlsError {
	#[error("failed to read {path}: {source}")]
	Io {
		path: String,
		#[source]
		source: std::io::Error,
	},

	#[error("no certificates found in {0}")]
	NoCertificates(String),

	#[error("no private key found in {0}")]
	NoPrivateKey(String),

	#[error("tls configuration error: {0}")]
	Rustls(#[from] tokio_rustls::rustls::Error),

	#[error("client verifier error: {0}")]
	Verifier(#[from] tokio_rustls::rustls::server::VerifierBuilderError),
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>, TlsError> {
	let file = std::fs::File::open(path).map_err(|source| TlsError::Io {
		path: path.display().to_string(),
		source,
	})?;
	let certs: Result<Vec<_>, _> = rustls_pemfile::certs(&mut BufReader::new(file)).collect();
	let certs = certs.map_err(|source| TlsError::Io {
		path: path.display().to_string(),
		source,
	})?;
	if certs.is_empty() {
		return Err(TlsError::NoCertificates(path.display().to_string()));
	}
	Ok(certs)
}

fn read_key(path: &Path) -> Result<PrivateKeyDer<'static>, TlsError> {
	let file = std::fs::File::open(path).map_err(|source| TlsError::Io {
		path: path.display().to_string(),
		source,
	})?;
	rustls_pemfile::private_key(&mut BufReader::new(file))
		.map_err(|source| TlsError::Io {
			path: path.display().to_string(),
			source,
		})?
		.ok_or_else(|| TlsError::NoPrivateKey(path.display().to_string()))
}

/// The minimum cipher set plus the TLS 1.3 defaults.
fn crypto_provider() -> CryptoProvider {
	use tokio_rustls::rustls::crypto::ring::cipher_suite;
	CryptoProvider {
		cipher_suites: vec![
			cipher_suite::TLS13_AES_128_GCM_SHA256,
			cipher_suite::TLS13_AES_256_GCM_SHA384,
			cipher_suite::TLS13_CHACHA20_POLY1305_SHA256,
			cipher_suite::TLS_ECDHE_ECDSA_WITH_AES_128_GCM_SHA256,
			cipher_suite::TLS_ECDHE_RSA_WITH_AES_128_GCM_SHA256,
		],
		..ring::default_provider()
	}
}

/// Build the rustls server configuration from PEM files.
pub fn build_server_config(config: &TlsConfig) -> Result<Arc<RustlsConfig>, TlsError> {
	let certs = read_certs(&config.cert_path)?;
	let key = read_key(&config.key_path)?;
	let provider = Arc::new(crypto_provider());

	let builder = RustlsConfig::builder_with_provider(provider.clone())
		.with_protocol_versions(&[&TLS13, &TLS12])?;

	let builder = match &config.client_ca_path {
		Some(ca_path) => {
			let mut roots = RootCertStore::empty();
			for cert in read_certs(ca_path)? {
				roots.add(cert)?;
			}
			let verifier = WebPkiClientVerifier::builder_with_provider(Arc::new(roots), provider)
				.allow_unauthenticated()
				.build()?;
			builder.with_client_cert_verifier(verifier)
		}
		None => builder.with_no_client_auth(),
	};

	let mut tls_config = builder.with_single_cert(certs, key)?;
	tls_config.alpn_protocols = vec![b"http/1.1".to_vec()];
	Ok(Arc::new(tls_config))
}

/// Distill a verified peer certificate chain into the identity the auth
/// providers consume: the leaf's subject CN and its URI SANs.
pub fn peer_identity(certs: &[CertificateDer<'_>]) -> Option<TlsPeer> {
	let leaf = certs.first()?;
	let (_, cert) = X509Certificate::from_der(leaf.as_ref()).ok()?;

	let common_name = cert
		.subject()
		.iter_common_name()
		.next()
		.and_then(|cn| cn.as_str().ok())
		.map(str::to_string);

	let mut uri_sans = Vec::new();
	if let Ok(Some(san)) = cert.subject_alternative_name() {
		for name in &san.value.general_names {
			if let GeneralName::URI(uri) = name {
				uri_sans.push((*uri).to_string());
			}
		}
	}

	Some(TlsPeer { common_name, uri_sans })
}

/// Accept loop: terminate TLS, attach the peer identity, and serve the
/// router over HTTP/1.1 on each connection.
pub async fn serve(
	listener: TcpListener,
	tls_config: Arc<RustlsConfig>,
	app: axum::Router,
) -> std::io::Result<()> {
	let acceptor = TlsAcceptor::from(tls_config);
	loop {
		let (stream, remote_addr) = listener.accept().await?;
		let acceptor = acceptor.clone();
		let app = app.clone();
		tokio::spawn(async move {
			let tls_stream = match acceptor.accept(stream).await {
				Ok(s) => s,
				Err(e) => {
					tracing::debug!(%remote_addr, error = %e, "tls handshake failed");
					return;
				}
			};
			let peer = {
				let (_, conn) = tls_stream.get_ref();
				conn.peer_certificates().and_then(peer_identity)
			};

			let service = hyper::service::service_fn(move |mut req: Request<Incoming>| {
				if let Some(peer) = peer.clone() {
					req.extensions_mut().insert(peer);
				}
				app.clone().oneshot(req)
			});

			if let Err(e) = auto::Builder::new(TokioExecutor::new())
				.serve_connection(TokioIo::new(tls_stream), service)
				.await
			{
				tracing::debug!(%remote_addr, error = %e, "connection error");
			}
		});
	}
}

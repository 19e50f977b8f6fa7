// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Server configuration from `KNOX_SERVER_*` environment variables.
//!
//! Every section has a working default so a bare `knox-server` starts a dev
//! instance: in-memory storage, the well-known dev master key, plain HTTP,
//! and mock user auth. Production deployments set the database URL, a real
//! master key, TLS material, and disable dev auth.

use std::path::PathBuf;

use thiserror::Error;

use knox_core::Access;

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("invalid value for {name}: {message}")]
	Invalid { name: &'static str, message: String },
}

fn env_var(name: &'static str) -> Option<String> {
	std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn env_parse<T: std::str::FromStr>(name: &'static str) -> Result<Option<T>, ConfigError>
where
	T::Err: std::fmt::Display,
{
	match env_var(name) {
		Some(raw) => raw
			.parse()
			.map(Some)
			.map_err(|e: T::Err| ConfigError::Invalid { name, message: e.to_string() }),
		None => Ok(None),
	}
}

/// Listener address.
#[derive(Debug, Clone)]
pub struct HttpConfig {
	pub host: String,
	pub port: u16,
}

impl Default for HttpConfig {
	fn default() -> Self {
		HttpConfig { host: "0.0.0.0".to_string(), port: 9000 }
	}
}

impl HttpConfig {
	pub fn socket_addr(&self) -> String {
		format!("{}:{}", self.host, self.port)
	}
}

/// Key storage. With no URL configured the server runs on the in-memory
/// store, which loses everything on restart.
#[derive(Debug, Clone, Default)]
pub struct DatabaseConfig {
	pub url: Option<String>,
}

/// At-rest encryption material.
#[derive(Debug, Clone)]
pub struct CryptorConfig {
	/// 16-byte AES key.
	pub master_key: Vec<u8>,
	/// Scheme version byte stored with every sealed version.
	pub version: u8,
	/// True when no key was configured and the dev key is in use.
	pub is_dev_key: bool,
}

/// TLS listener material. Client certificates are requested, never
/// required; `client_ca_path` sets the roots they are verified against.
#[derive(Debug, Clone)]
pub struct TlsConfig {
	pub cert_path: PathBuf,
	pub key_path: PathBuf,
	pub client_ca_path: Option<PathBuf>,
}

/// Authentication switches.
#[derive(Debug, Clone)]
pub struct AuthConfig {
	/// Validate `0u` tokens against the GitHub API.
	pub github: bool,
	/// Accept any `0u` token as `testuser`. Dev only.
	pub dev_user: bool,
	pub github_timeout_secs: u64,
}

impl Default for AuthConfig {
	fn default() -> Self {
		AuthConfig { github: true, dev_user: false, github_timeout_secs: 10 }
	}
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
	pub level: String,
}

impl Default for LoggingConfig {
	fn default() -> Self {
		LoggingConfig { level: "info".to_string() }
	}
}

/// Fully resolved server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
	pub http: HttpConfig,
	pub database: DatabaseConfig,
	pub cryptor: CryptorConfig,
	pub tls: Option<TlsConfig>,
	pub auth: AuthConfig,
	pub logging: LoggingConfig,
	/// Grants appended to every created key's ACL, as a JSON array.
	pub default_access: Vec<Access>,
}

const DEV_MASTER_KEY: &[u8] = b"testtesttesttest";

/// Load configuration from the environment.
pub fn load_config() -> Result<ServerConfig, ConfigError> {
	let mut http = HttpConfig::default();
	if let Some(host) = env_var("KNOX_SERVER_HOST") {
		http.host = host;
	}
	if let Some(port) = env_parse::<u16>("KNOX_SERVER_PORT")? {
		http.port = port;
	}

	let database = DatabaseConfig { url: env_var("KNOX_SERVER_DATABASE_URL") };

	let cryptor = match env_var("KNOX_SERVER_MASTER_KEY") {
		Some(hex_key) => {
			let master_key = hex::decode(&hex_key).map_err(|e| ConfigError::Invalid {
				name: "KNOX_SERVER_MASTER_KEY",
				message: e.to_string(),
			})?;
			if master_key.len() != 16 {
				return Err(ConfigError::Invalid {
					name: "KNOX_SERVER_MASTER_KEY",
					message: format!("expected 16 bytes, got {}", master_key.len()),
				});
			}
			CryptorConfig { master_key, version: 0, is_dev_key: false }
		}
		None => CryptorConfig {
			master_key: DEV_MASTER_KEY.to_vec(),
			version: 0,
			is_dev_key: true,
		},
	};

	let tls = match (env_var("KNOX_SERVER_TLS_CERT"), env_var("KNOX_SERVER_TLS_KEY")) {
		(Some(cert), Some(key)) => Some(TlsConfig {
			cert_path: PathBuf::from(cert),
			key_path: PathBuf::from(key),
			client_ca_path: env_var("KNOX_SERVER_TLS_CLIENT_CA").map(PathBuf::from),
		}),
		(None, None) => None,
		_ => {
			return Err(ConfigError::Invalid {
				name: "KNOX_SERVER_TLS_CERT",
				message: "TLS cert and key must both be set or both be unset".to_string(),
			});
		}
	};

	let mut auth = AuthConfig::default();
	if let Some(dev) = env_parse::<bool>("KNOX_SERVER_DEV_AUTH")? {
		auth.dev_user = dev;
		auth.github = !dev;
	}
	if let Some(timeout) = env_parse::<u64>("KNOX_SERVER_GITHUB_TIMEOUT_SECS")? {
		auth.github_timeout_secs = timeout;
	}

	let default_access = match env_var("KNOX_SERVER_DEFAULT_ACCESS") {
		Some(json) => serde_json::from_str(&json).map_err(|e| ConfigError::Invalid {
			name: "KNOX_SERVER_DEFAULT_ACCESS",
			message: e.to_string(),
		})?,
		None => Vec::new(),
	};

	let logging = LoggingConfig {
		level: env_var("KNOX_SERVER_LOG").unwrap_or_else(|| "info".to_string()),
	};

	Ok(ServerConfig {
		http,
		database,
		cryptor,
		tls,
		auth,
		logging,
		default_access,
	})
}

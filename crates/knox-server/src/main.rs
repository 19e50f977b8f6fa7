// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Knox key server binary.

use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use knox_server::{create_router, AppState, KeyManager};
use knox_server_auth::{AuthProvider, GitHubProvider, MockUserProvider, MtlsProvider, SpiffeProvider};
use knox_server_keydb::{AesGcmCryptor, Cryptor, Db, SqlDb, TempDb};

/// Knox server - the central secret-management service.
#[derive(Parser, Debug)]
#[command(name = "knox-server", about = "Knox secret management server", version)]
struct Args {
	#[command(subcommand)]
	command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Show version information
	Version,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();
	if let Some(Command::Version) = args.command {
		println!("knox-server {}", env!("CARGO_PKG_VERSION"));
		return Ok(());
	}

	// Load .env file if present
	dotenvy::dotenv().ok();

	let config = knox_server::config::load_config()?;

	tracing_subscriber::registry()
		.with(
			tracing_subscriber::EnvFilter::try_from_default_env()
				.unwrap_or_else(|_| config.logging.level.clone().into()),
		)
		.with(tracing_subscriber::fmt::layer())
		.init();

	tracing::info!(
		host = %config.http.host,
		port = config.http.port,
		database = config.database.url.as_deref().unwrap_or("(in-memory)"),
		tls = config.tls.is_some(),
		"starting knox-server"
	);
	if config.cryptor.is_dev_key {
		tracing::warn!("no master key configured, using the dev key; do not use in production");
	}

	let cryptor: Arc<dyn Cryptor> = Arc::new(AesGcmCryptor::new(
		config.cryptor.version,
		&config.cryptor.master_key,
	)?);

	let db: Arc<dyn Db> = match &config.database.url {
		Some(url) => Arc::new(SqlDb::connect(url).await?),
		None => Arc::new(TempDb::new()),
	};

	let mut providers: Vec<Box<dyn AuthProvider>> = Vec::new();
	if config.auth.dev_user {
		tracing::warn!("dev user auth enabled; any 0u token authenticates as testuser");
		providers.push(Box::new(MockUserProvider));
	} else if config.auth.github {
		providers.push(Box::new(GitHubProvider::new(Duration::from_secs(
			config.auth.github_timeout_secs,
		))));
	}
	providers.push(Box::new(MtlsProvider));
	providers.push(Box::new(SpiffeProvider));

	let manager = KeyManager::new(cryptor, db);
	let state = AppState::new(
		manager,
		providers,
		config.default_access.clone(),
		Vec::new(),
	);
	let app = create_router(state);

	let listener = tokio::net::TcpListener::bind(config.http.socket_addr()).await?;
	tracing::info!(addr = %listener.local_addr()?, "listening");

	match &config.tls {
		Some(tls) => {
			let tls_config = knox_server::tls::build_server_config(tls)?;
			knox_server::tls::serve(listener, tls_config, app).await?;
		}
		None => {
			tracing::warn!("serving plain HTTP; configure KNOX_SERVER_TLS_CERT/KEY for TLS");
			axum::serve(listener, app).await?;
		}
	}
	Ok(())
}

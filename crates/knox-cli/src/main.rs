// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The `knox` command-line client.

mod auth;

use std::io::{Read, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use knox_client::{
    ApiClient, Daemon, HttpApiClient, KeysFile, DEFAULT_CACHE_ROOT, KEYS_DIR, REGISTER_FILE,
};
use knox_core::{Access, AccessType, PrincipalType, VersionStatus};

/// Knox - store, fetch, rotate, and delegate access to secrets.
#[derive(Parser, Debug)]
#[command(name = "knox", about = "Knox secret management client", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create a new key with initial data (from the argument or stdin)
    Create { key_id: String, data: Option<String> },
    /// Print the primary version of a key (cache first, then network)
    Get { key_id: String },
    /// Add a new key version with data (from the argument or stdin)
    Add { key_id: String, data: Option<String> },
    /// List all key ids
    Keys,
    /// List a key's versions and statuses
    Versions {
        key_id: String,
        /// Include Inactive versions
        #[arg(long)]
        all: bool,
    },
    /// Print a key's access control list
    Acl { key_id: String },
    /// Grant, change, or revoke access: knox access <key> <type> <principal> <access>
    Access {
        key_id: String,
        /// user, usergroup, machine, machineprefix, or service
        principal_type: String,
        principal: String,
        /// none, read, write, or admin (none revokes)
        access: String,
    },
    /// Promote an Active version to Primary
    Promote { key_id: String, version_id: u64 },
    /// Demote an Active version to Inactive
    Deactivate { key_id: String, version_id: u64 },
    /// Return an Inactive version to Active
    Reactivate { key_id: String, version_id: u64 },
    /// Delete a key entirely
    Delete { key_id: String },
    /// Save a user token (from stdin) for subsequent commands
    Login,
    /// Register key ids for the daemon to keep cached
    Register {
        /// A single key id to register
        #[arg(short = 'k')]
        key: Option<String>,
        /// A file with newline-separated key ids
        #[arg(short = 'f')]
        file: Option<PathBuf>,
        /// Replace the registration list instead of adding to it
        #[arg(short = 'r')]
        replace: bool,
    },
    /// Remove a key id from the registration list
    Unregister {
        #[arg(short = 'k')]
        key: String,
    },
    /// Run the refresh daemon keeping cached keys in sync
    Daemon,
    /// Show version information
    Version,
}

fn cache_root() -> PathBuf {
    std::env::var("KNOX_CACHE_DIR")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(DEFAULT_CACHE_ROOT))
}

fn api_client() -> HttpApiClient {
    let host =
        std::env::var("KNOX_HOST").unwrap_or_else(|_| "https://localhost:9000".to_string());
    HttpApiClient::new(
        host,
        HttpApiClient::default_http_client(),
        auth::auth_handler(),
        Some(cache_root().join(KEYS_DIR)),
    )
}

fn read_data(data: Option<String>) -> Result<Vec<u8>, std::io::Error> {
    match data {
        Some(data) => Ok(data.into_bytes()),
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            Ok(buf)
        }
    }
}

fn parse_principal_type(s: &str) -> Result<PrincipalType, String> {
    match s.to_ascii_lowercase().as_str() {
        "user" => Ok(PrincipalType::User),
        "usergroup" => Ok(PrincipalType::UserGroup),
        "machine" => Ok(PrincipalType::Machine),
        "machineprefix" => Ok(PrincipalType::MachinePrefix),
        "service" => Ok(PrincipalType::Service),
        other => Err(format!(
            "unknown principal type {other:?}; expected user, usergroup, machine, machineprefix, or service"
        )),
    }
}

fn parse_access_type(s: &str) -> Result<AccessType, String> {
    match s.to_ascii_lowercase().as_str() {
        "none" => Ok(AccessType::None),
        "read" => Ok(AccessType::Read),
        "write" => Ok(AccessType::Write),
        "admin" => Ok(AccessType::Admin),
        other => Err(format!(
            "unknown access type {other:?}; expected none, read, write, or admin"
        )),
    }
}

async fn run(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    match command {
        Command::Create { key_id, data } => {
            let data = read_data(data)?;
            let version_id = api_client()
                .create_key(&key_id, &data, &knox_core::Acl::new())
                .await?;
            println!("{version_id}");
        }
        Command::Get { key_id } => {
            let key = api_client().get_key(&key_id).await?;
            let primary = key
                .version_list
                .get_primary()
                .ok_or("key has no primary version")?;
            std::io::stdout().write_all(&primary.data)?;
        }
        Command::Add { key_id, data } => {
            let data = read_data(data)?;
            let version_id = api_client().add_version(&key_id, &data).await?;
            println!("{version_id}");
        }
        Command::Keys => {
            let mut ids = api_client().get_keys(&Default::default()).await?;
            ids.sort();
            for id in ids {
                println!("{id}");
            }
        }
        Command::Versions { key_id, all } => {
            let status = if all { VersionStatus::Inactive } else { VersionStatus::Active };
            let key = api_client()
                .network_get_key_with_status(&key_id, status)
                .await?;
            for v in &key.version_list {
                println!("{}\t{:?}", v.id, v.status);
            }
        }
        Command::Acl { key_id } => {
            let acl = api_client().get_acl(&key_id).await?;
            println!("{}", serde_json::to_string_pretty(&acl)?);
        }
        Command::Access { key_id, principal_type, principal, access } => {
            let access = Access {
                principal_type: parse_principal_type(&principal_type)?,
                id: principal,
                access_type: parse_access_type(&access)?,
            };
            api_client().put_access(&key_id, &access).await?;
        }
        Command::Promote { key_id, version_id } => {
            api_client()
                .update_version(&key_id, version_id, VersionStatus::Primary)
                .await?;
        }
        Command::Deactivate { key_id, version_id } => {
            api_client()
                .update_version(&key_id, version_id, VersionStatus::Inactive)
                .await?;
        }
        Command::Reactivate { key_id, version_id } => {
            api_client()
                .update_version(&key_id, version_id, VersionStatus::Active)
                .await?;
        }
        Command::Delete { key_id } => {
            api_client().delete_key(&key_id).await?;
        }
        Command::Login => {
            auth::login()?;
        }
        Command::Register { key, file, replace } => {
            let ids = match (key, file) {
                (Some(key), None) => vec![key],
                (None, Some(path)) => std::fs::read_to_string(path)?
                    .split_whitespace()
                    .map(str::to_string)
                    .collect(),
                _ => return Err("specify exactly one of -k <key> or -f <file>".into()),
            };
            let keys_file = KeysFile::new(cache_root().join(REGISTER_FILE));
            let guard = keys_file.lock().await?;
            if replace {
                keys_file.overwrite(&guard, &ids)?;
            } else {
                keys_file.add(&guard, &ids)?;
            }
            tracing::info!(?ids, "registered keys");
        }
        Command::Unregister { key } => {
            let keys_file = KeysFile::new(cache_root().join(REGISTER_FILE));
            let guard = keys_file.lock().await?;
            keys_file.remove(&guard, &[key])?;
        }
        Command::Daemon => {
            // Machines authenticate as their hostname unless told otherwise.
            if std::env::var("KNOX_MACHINE_AUTH").is_err() {
                let hostname = gethostname::gethostname();
                std::env::set_var("KNOX_MACHINE_AUTH", &hostname);
            }
            let daemon = Daemon::new(cache_root(), Arc::new(api_client()))
                .with_metrics_callback(Arc::new(|metrics| {
                    tracing::info!(
                        update_err = metrics.update_err,
                        get_key_err = metrics.get_key_err,
                        success = metrics.success,
                        "daemon metrics"
                    );
                }));
            daemon.run(knox_client::daemon::DEFAULT_REFRESH).await?;
        }
        Command::Version => {
            println!("knox {}", env!("CARGO_PKG_VERSION"));
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match run(cli.command).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("knox: {e}");
            ExitCode::FAILURE
        }
    }
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Authentication data resolution.
//!
//! Precedence: `KNOX_USER_AUTH` (a user OAuth token), then the token file
//! written by `knox login`, then `KNOX_MACHINE_AUTH` (a hostname backed by
//! the machine's client certificate). User tokens get the `0u` scheme
//! prefix, machine identities `0t`.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use knox_client::AuthHandler;

const TOKEN_FILE: &str = ".knox_user_auth";

fn token_file_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(TOKEN_FILE))
}

fn stored_user_token() -> Option<String> {
    let path = token_file_path()?;
    let token = std::fs::read_to_string(path).ok()?;
    let token = token.trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Resolve the `Authorization` header value for each request.
pub fn auth_handler() -> AuthHandler {
    std::sync::Arc::new(|| {
        if let Ok(token) = std::env::var("KNOX_USER_AUTH") {
            if !token.is_empty() {
                return Some(format!("0u{token}"));
            }
        }
        if let Some(token) = stored_user_token() {
            return Some(format!("0u{token}"));
        }
        if let Ok(machine) = std::env::var("KNOX_MACHINE_AUTH") {
            if !machine.is_empty() {
                return Some(format!("0t{machine}"));
            }
        }
        None
    })
}

/// Read a user token from stdin and save it for subsequent commands.
pub fn login() -> Result<(), Box<dyn std::error::Error>> {
    let path = token_file_path().ok_or("cannot determine home directory")?;

    eprint!("Please enter your token: ");
    std::io::stderr().flush()?;
    let mut token = String::new();
    std::io::stdin().lock().read_line(&mut token)?;
    let token = token.trim();
    if token.is_empty() {
        return Err("no token entered".into());
    }

    std::fs::write(&path, token)?;
    // Owner-only: the token grants full user access.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))?;
    }
    eprintln!("Token saved to {}", path.display());
    Ok(())
}

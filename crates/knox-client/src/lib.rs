// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Consumer-side Knox: the typed API client, the on-disk key cache, and the
//! refresh daemon that keeps the cache in sync with the server.
//!
//! The cache layout under the root (default `/var/lib/knox`) is one JSON
//! file per key beneath `v0/keys/`, plus the `.registered` file listing the
//! ids this host wants cached. Multiple local processes coordinate on the
//! registration file through an advisory exclusive lock.

pub mod client;
pub mod daemon;
pub mod keys_file;

pub use client::{backoff_duration, ApiClient, AuthHandler, ClientError, HttpApiClient};
pub use daemon::{Daemon, DaemonError, DaemonMetrics};
pub use keys_file::{KeysFile, KeysFileError};

/// Default cache root on consumer machines.
pub const DEFAULT_CACHE_ROOT: &str = "/var/lib/knox";

/// Registration file name under the cache root.
pub const REGISTER_FILE: &str = ".registered";

/// Key cache directory under the cache root.
pub const KEYS_DIR: &str = "v0/keys";

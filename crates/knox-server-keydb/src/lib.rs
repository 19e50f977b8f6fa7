// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Encrypted key storage.
//!
//! Keys at rest are a [`DbKey`]: the same shape as a domain key, but every
//! version's payload is sealed with authenticated encryption and the record
//! carries an opaque version token for optimistic concurrency. The
//! [`Cryptor`] converts between the two shapes; the [`Db`] trait is the
//! storage contract with an in-memory implementation for tests and a
//! SQLite-backed one for deployments.

pub mod cryptor;
pub mod db;
pub mod error;
pub mod sql;
pub mod types;

pub use cryptor::{AesGcmCryptor, Cryptor};
pub use db::{Db, TempDb};
pub use error::KeydbError;
pub use sql::SqlDb;
pub use types::{DbKey, EncKeyVersion};

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Core domain types shared by the Knox server and clients.
//!
//! This crate defines the key model (keys, versions, rotation statuses),
//! access control lists, the principal abstraction used for authorization,
//! and the wire envelope every API response is wrapped in. It contains no
//! I/O; storage, crypto, and transport live in the sibling crates.

pub mod acl;
pub mod encoding;
pub mod error;
pub mod key;
pub mod principal;
pub mod response;

pub use acl::{Access, AccessType, Acl, PrincipalType, PrincipalValidator};
pub use error::Error;
pub use key::{Key, KeyVersion, KeyVersionList, VersionStatus};
pub use principal::{Principal, PrincipalMux};
pub use response::{Code, Response};

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The principal abstraction used for authorization decisions.
//!
//! A principal is whoever a request authenticated as: a person, a machine,
//! or a workload. Concrete implementations live next to the auth providers;
//! this module only fixes the capability surface and the mux that lets one
//! request carry the results of several providers at once.

use std::collections::HashMap;
use std::sync::Arc;

use crate::acl::{AccessType, Acl};

/// An authenticated identity.
pub trait Principal: Send + Sync {
	/// Stable identifier used in ACL entries and access logs.
	fn id(&self) -> String;

	/// Short tag for logging: `"user"`, `"machine"`, or `"service"`.
	fn type_name(&self) -> String;

	/// Whether this principal holds `required` access under `acl`.
	fn can_access(&self, acl: &Acl, required: AccessType) -> bool;

	/// Whether this principal is a person (required for key creation).
	fn is_user(&self) -> bool {
		false
	}
}

/// The principals a single request authenticated as, keyed by provider name.
///
/// The first provider to succeed supplies the default principal, which all
/// authorization decisions delegate to; the rest are retained so access logs
/// can attribute which scheme matched.
#[derive(Clone)]
pub struct PrincipalMux {
	default: Arc<dyn Principal>,
	all: HashMap<String, Arc<dyn Principal>>,
}

impl PrincipalMux {
	pub fn new(default: Arc<dyn Principal>, all: HashMap<String, Arc<dyn Principal>>) -> Self {
		PrincipalMux { default, all }
	}

	/// The principal authorization decisions are made against.
	pub fn default_principal(&self) -> &Arc<dyn Principal> {
		&self.default
	}

	/// Provider names that successfully authenticated this request.
	pub fn provider_names(&self) -> Vec<&str> {
		let mut names: Vec<&str> = self.all.keys().map(String::as_str).collect();
		names.sort_unstable();
		names
	}
}

impl Principal for PrincipalMux {
	fn id(&self) -> String {
		self.default.id()
	}

	fn type_name(&self) -> String {
		let mut kinds: Vec<String> = self.all.values().map(|p| p.type_name()).collect();
		kinds.sort_unstable();
		kinds.dedup();
		if kinds.len() <= 1 {
			self.default.type_name()
		} else {
			kinds.join(",")
		}
	}

	fn can_access(&self, acl: &Acl, required: AccessType) -> bool {
		self.default.can_access(acl, required)
	}

	fn is_user(&self) -> bool {
		self.default.is_user()
	}
}

impl std::fmt::Debug for PrincipalMux {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("PrincipalMux")
			.field("default", &self.default.id())
			.field("providers", &self.provider_names())
			.finish()
	}
}

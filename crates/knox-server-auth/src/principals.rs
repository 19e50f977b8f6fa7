// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Concrete principal kinds.
//!
//! Each kind matches a different slice of an ACL:
//! - a [`User`] matches `User` entries by id and `UserGroup` entries by
//!   membership,
//! - a [`Machine`] matches `Machine` entries by hostname equality and
//!   `MachinePrefix` entries by string prefix,
//! - a [`Service`] matches `Service` entries by SPIFFE id equality.

use std::collections::HashSet;

use knox_core::{AccessType, Acl, Principal, PrincipalType};

/// A person, identified by username, with their group memberships.
#[derive(Debug, Clone)]
pub struct User {
	id: String,
	groups: HashSet<String>,
}

impl User {
	pub fn new(id: impl Into<String>, groups: impl IntoIterator<Item = String>) -> Self {
		User {
			id: id.into(),
			groups: groups.into_iter().collect(),
		}
	}

	fn in_group(&self, group: &str) -> bool {
		self.groups.contains(group)
	}
}

impl Principal for User {
	fn id(&self) -> String {
		self.id.clone()
	}

	fn type_name(&self) -> String {
		"user".to_string()
	}

	fn can_access(&self, acl: &Acl, required: AccessType) -> bool {
		acl.iter().any(|a| match a.principal_type {
			PrincipalType::User => a.id == self.id && a.access_type.can_access(required),
			PrincipalType::UserGroup => self.in_group(&a.id) && a.access_type.can_access(required),
			_ => false,
		})
	}

	fn is_user(&self) -> bool {
		true
	}
}

/// A host, identified by hostname.
#[derive(Debug, Clone)]
pub struct Machine {
	hostname: String,
}

impl Machine {
	pub fn new(hostname: impl Into<String>) -> Self {
		Machine { hostname: hostname.into() }
	}
}

impl Principal for Machine {
	fn id(&self) -> String {
		self.hostname.clone()
	}

	fn type_name(&self) -> String {
		"machine".to_string()
	}

	fn can_access(&self, acl: &Acl, required: AccessType) -> bool {
		acl.iter().any(|a| match a.principal_type {
			PrincipalType::Machine => a.id == self.hostname && a.access_type.can_access(required),
			PrincipalType::MachinePrefix => {
				self.hostname.starts_with(&a.id) && a.access_type.can_access(required)
			}
			_ => false,
		})
	}
}

/// A workload, identified by SPIFFE trust domain and workload path.
#[derive(Debug, Clone)]
pub struct Service {
	domain: String,
	path: String,
}

impl Service {
	pub fn new(domain: impl Into<String>, path: impl Into<String>) -> Self {
		Service {
			domain: domain.into(),
			path: path.into(),
		}
	}
}

impl Principal for Service {
	fn id(&self) -> String {
		format!("spiffe://{}/{}", self.domain, self.path)
	}

	fn type_name(&self) -> String {
		"service".to_string()
	}

	fn can_access(&self, acl: &Acl, required: AccessType) -> bool {
		let id = self.id();
		acl.iter().any(|a| {
			a.principal_type == PrincipalType::Service
				&& a.id == id
				&& a.access_type.can_access(required)
		})
	}
}

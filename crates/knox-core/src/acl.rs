// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Access control lists.
//!
//! An [`Acl`] is an ordered list of [`Access`] grants attached to a key.
//! Precedence is by grant magnitude ([`AccessType`] ordering), not by list
//! position. The list is kept free of duplicates and of `None` grants; an
//! incoming `None` grant means "remove this entry".

use serde::de::Deserializer;
use serde::ser::{self, Serializer};
use serde::{Deserialize, Serialize};

use crate::error::Error;

/// The kind of principal an ACL entry grants access to.
///
/// `Unknown` exists so that ACLs written by newer servers can still be
/// decoded (and displayed) by older clients: unrecognized type strings
/// decode to `Unknown` instead of failing the whole document. Encoding
/// `Unknown` is always an error, which keeps it out of storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PrincipalType {
	User,
	UserGroup,
	Machine,
	MachinePrefix,
	Service,
	Unknown,
}

impl PrincipalType {
	fn as_str(self) -> Option<&'static str> {
		match self {
			PrincipalType::User => Some("User"),
			PrincipalType::UserGroup => Some("UserGroup"),
			PrincipalType::Machine => Some("Machine"),
			PrincipalType::MachinePrefix => Some("MachinePrefix"),
			PrincipalType::Service => Some("Service"),
			PrincipalType::Unknown => None,
		}
	}

	/// Validate a principal identifier against the rules for this type.
	///
	/// Used when an ACL entry is added through the API. Deletions skip this
	/// check so that entries which have since become invalid can still be
	/// revoked.
	pub fn validate_id(self, id: &str) -> Result<(), Error> {
		match self {
			PrincipalType::User | PrincipalType::UserGroup | PrincipalType::Machine => {
				if id.is_empty() {
					return Err(Error::BadPrincipalIdentifier(id.to_string()));
				}
				Ok(())
			}
			PrincipalType::MachinePrefix => {
				if id.is_empty() {
					return Err(Error::BadPrincipalIdentifier(
						"machine prefix must not be empty".to_string(),
					));
				}
				Ok(())
			}
			PrincipalType::Service => {
				let rest = id
					.strip_prefix("spiffe://")
					.ok_or_else(|| Error::BadPrincipalIdentifier(id.to_string()))?;
				match rest.split_once('/') {
					Some((domain, path)) if !domain.is_empty() && !path.is_empty() => Ok(()),
					_ => Err(Error::BadPrincipalIdentifier(id.to_string())),
				}
			}
			PrincipalType::Unknown => Err(Error::BadPrincipalIdentifier(id.to_string())),
		}
	}
}

impl Serialize for PrincipalType {
	fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
		match self.as_str() {
			Some(s) => serializer.serialize_str(s),
			None => Err(ser::Error::custom("cannot serialize Unknown principal type")),
		}
	}
}

impl<'de> Deserialize<'de> for PrincipalType {
	fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
		let s = String::deserialize(deserializer)?;
		Ok(match s.as_str() {
			"User" => PrincipalType::User,
			"UserGroup" => PrincipalType::UserGroup,
			"Machine" => PrincipalType::Machine,
			"MachinePrefix" => PrincipalType::MachinePrefix,
			"Service" => PrincipalType::Service,
			_ => PrincipalType::Unknown,
		})
	}
}

/// A custom validation hook applied to principal identifiers submitted for
/// ACL membership, on top of [`PrincipalType::validate_id`]. Deployments
/// register these to enforce site-specific naming rules.
pub type PrincipalValidator = fn(PrincipalType, &str) -> Result<(), Error>;

/// The level of access an ACL entry grants.
///
/// The ordering is meaningful: a higher grant implies every lower one, so
/// authorization is a single comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AccessType {
	None,
	Read,
	Write,
	Admin,
}

impl AccessType {
	/// Whether a holder of this access level may perform an operation that
	/// requires `required`.
	pub fn can_access(self, required: AccessType) -> bool {
		self >= required
	}
}

/// A single grant in an ACL.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Access {
	#[serde(rename = "type")]
	pub principal_type: PrincipalType,
	pub id: String,
	#[serde(rename = "access")]
	pub access_type: AccessType,
}

/// An ordered list of access grants on a key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Acl(pub Vec<Access>);

impl Acl {
	pub fn new() -> Self {
		Acl(Vec::new())
	}

	pub fn iter(&self) -> std::slice::Iter<'_, Access> {
		self.0.iter()
	}

	pub fn len(&self) -> usize {
		self.0.len()
	}

	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Check that the list holds no `None` grants and no duplicate
	/// `(type, id)` pairs.
	pub fn validate(&self) -> Result<(), Error> {
		for (i, a) in self.0.iter().enumerate() {
			if a.access_type == AccessType::None {
				return Err(Error::AclContainsNone);
			}
			for (j, b) in self.0.iter().enumerate() {
				if i != j && a.id == b.id && a.principal_type == b.principal_type {
					return Err(Error::AclDuplicateEntries);
				}
			}
		}
		Ok(())
	}

	/// Return a new ACL with `access` applied.
	///
	/// An existing `(type, id)` entry is replaced, or removed when the new
	/// grant is `None`. An absent entry is appended unless the grant is
	/// `None`, in which case the list is unchanged.
	#[must_use]
	pub fn add(&self, access: Access) -> Acl {
		for (i, existing) in self.0.iter().enumerate() {
			if existing.principal_type == access.principal_type && existing.id == access.id {
				let mut entries = self.0.clone();
				if access.access_type == AccessType::None {
					entries.remove(i);
				} else {
					entries[i] = access;
				}
				return Acl(entries);
			}
		}
		if access.access_type == AccessType::None {
			return self.clone();
		}
		let mut entries = self.0.clone();
		entries.push(access);
		Acl(entries)
	}
}

impl IntoIterator for Acl {
	type Item = Access;
	type IntoIter = std::vec::IntoIter<Access>;

	fn into_iter(self) -> Self::IntoIter {
		self.0.into_iter()
	}
}

impl<'a> IntoIterator for &'a Acl {
	type Item = &'a Access;
	type IntoIter = std::slice::Iter<'a, Access>;

	fn into_iter(self) -> Self::IntoIter {
		self.0.iter()
	}
}

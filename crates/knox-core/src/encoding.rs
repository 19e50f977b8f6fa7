// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! Serde helpers for wire encodings.

/// Serialize byte arrays as standard base64 strings, the JSON encoding the
/// rest of the protocol expects for binary fields.
pub mod base64_bytes {
	use base64::engine::general_purpose::STANDARD;
	use base64::Engine;
	use serde::de;
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(data: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
		serializer.serialize_str(&STANDARD.encode(data))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
		let s = String::deserialize(deserializer)?;
		STANDARD.decode(s).map_err(de::Error::custom)
	}
}

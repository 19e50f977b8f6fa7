// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights
// reserved. SPDX-License-Identifier: Proprietary

//! The wire envelope and response subcodes.
//!
//! Every API response, success or failure, is the same JSON envelope:
//! `{status, code, host, ts, message, data}`. The subcode is the stable
//! machine-readable error identity; the HTTP status is derived from it and
//! carries no extra information.

use serde::{Deserialize, Serialize};

/// Response subcodes. The numeric values are part of the wire protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "i32", try_from = "i32")]
pub enum Code {
	Ok,
	InternalServerError,
	KeyIdentifierExists,
	KeyVersionDoesNotExist,
	KeyIdentifierDoesNotExist,
	Unauthenticated,
	Unauthorized,
	NotYetImplemented,
	NotFound,
	NoKeyId,
	NoKeyData,
	BadRequestData,
	BadKeyFormat,
	BadPrincipalIdentifier,
}

impl Code {
	/// The HTTP status this subcode maps to.
	pub fn http_status(self) -> u16 {
		match self {
			Code::Ok => 200,
			Code::InternalServerError => 500,
			Code::KeyIdentifierExists => 400,
			Code::KeyVersionDoesNotExist => 404,
			Code::KeyIdentifierDoesNotExist => 404,
			Code::Unauthenticated => 401,
			Code::Unauthorized => 403,
			Code::NotYetImplemented => 501,
			Code::NotFound => 404,
			Code::NoKeyId => 400,
			Code::NoKeyData => 400,
			Code::BadRequestData => 400,
			Code::BadKeyFormat => 400,
			Code::BadPrincipalIdentifier => 400,
		}
	}

	/// The fixed client-facing message for this subcode.
	pub fn default_message(self) -> &'static str {
		match self {
			Code::Ok => "",
			Code::InternalServerError => "Internal server error",
			Code::KeyIdentifierExists => "Key identifier exists",
			Code::KeyVersionDoesNotExist => "Key version does not exist",
			Code::KeyIdentifierDoesNotExist => "Key identifier does not exist",
			Code::Unauthenticated => "User or machine is not authenticated",
			Code::Unauthorized => "User or machine not authorized",
			Code::NotYetImplemented => "Not yet implemented",
			Code::NotFound => "Route not found",
			Code::NoKeyId => "Missing key id",
			Code::NoKeyData => "Missing key data",
			Code::BadRequestData => "Bad request format",
			Code::BadKeyFormat => "Key id contains unsupported characters",
			Code::BadPrincipalIdentifier => "Invalid principal identifier",
		}
	}
}

impl From<Code> for i32 {
	fn from(code: Code) -> i32 {
		match code {
			Code::Ok => 0,
			Code::InternalServerError => 1,
			Code::KeyIdentifierExists => 2,
			Code::KeyVersionDoesNotExist => 3,
			Code::KeyIdentifierDoesNotExist => 4,
			Code::Unauthenticated => 5,
			Code::Unauthorized => 6,
			Code::NotYetImplemented => 7,
			Code::NotFound => 8,
			Code::NoKeyId => 9,
			Code::NoKeyData => 10,
			Code::BadRequestData => 11,
			Code::BadKeyFormat => 12,
			Code::BadPrincipalIdentifier => 13,
		}
	}
}

impl TryFrom<i32> for Code {
	type Error = String;

	fn try_from(value: i32) -> Result<Self, Self::Error> {
		Ok(match value {
			0 => Code::Ok,
			1 => Code::InternalServerError,
			2 => Code::KeyIdentifierExists,
			3 => Code::KeyVersionDoesNotExist,
			4 => Code::KeyIdentifierDoesNotExist,
			5 => Code::Unauthenticated,
			6 => Code::Unauthorized,
			7 => Code::NotYetImplemented,
			8 => Code::NotFound,
			9 => Code::NoKeyId,
			10 => Code::NoKeyData,
			11 => Code::BadRequestData,
			12 => Code::BadKeyFormat,
			13 => Code::BadPrincipalIdentifier,
			other => return Err(format!("unknown response code {other}")),
		})
	}
}

/// The envelope wrapping every API response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response<T = serde_json::Value> {
	pub status: String,
	pub code: Code,
	pub host: String,
	pub ts: i64,
	pub message: String,
	pub data: Option<T>,
}

impl<T> Response<T> {
	pub fn is_ok(&self) -> bool {
		self.status == "ok"
	}
}

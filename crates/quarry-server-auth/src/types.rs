// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Core type definitions shared by the access-control engine.
//!
//! - **ID newtypes**: Type-safe wrappers around UUIDs for every persistent entity
//!   ([`UserId`], [`OrgId`], [`DatasetId`], ...) preventing accidental mixing
//! - **Actor role**: The coarse platform role carried by an identity ([`Role`])
//!
//! All ID types serialize transparently as UUID strings and convert to/from
//! [`uuid::Uuid`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// =============================================================================
// ID Newtypes
// =============================================================================

macro_rules! define_id_type {
	($name:ident, $doc:expr) => {
		#[doc = $doc]
		#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
		#[serde(transparent)]
		pub struct $name(Uuid);

		impl $name {
			/// Create a new ID from a UUID.
			pub fn new(id: Uuid) -> Self {
				Self(id)
			}

			/// Generate a new random ID.
			pub fn generate() -> Self {
				Self(Uuid::new_v4())
			}

			/// Get the inner UUID value.
			pub fn into_inner(self) -> Uuid {
				self.0
			}

			/// Get a reference to the inner UUID.
			pub fn as_uuid(&self) -> &Uuid {
				&self.0
			}
		}

		impl fmt::Display for $name {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				write!(f, "{}", self.0)
			}
		}

		impl From<Uuid> for $name {
			fn from(id: Uuid) -> Self {
				Self(id)
			}
		}

		impl From<$name> for Uuid {
			fn from(id: $name) -> Self {
				id.0
			}
		}

		impl From<$name> for crate::predicate::Value {
			fn from(id: $name) -> Self {
				crate::predicate::Value::Text(id.0.to_string())
			}
		}
	};
}

define_id_type!(UserId, "Unique identifier for a user.");
define_id_type!(OrgId, "Unique identifier for an organization.");
define_id_type!(TeamId, "Unique identifier for a team.");
define_id_type!(MembershipId, "Unique identifier for a team membership.");
define_id_type!(PolicyId, "Unique identifier for a resource audience policy.");
define_id_type!(InvitationId, "Unique identifier for an organization invitation.");
define_id_type!(AuditLogId, "Unique identifier for an audit log entry.");
define_id_type!(DatasetId, "Unique identifier for a dataset.");
define_id_type!(RuleId, "Unique identifier for a dataset rule.");
define_id_type!(DatasetActionId, "Unique identifier for a dataset action.");
define_id_type!(PageId, "Unique identifier for a page.");
define_id_type!(SheetId, "Unique identifier for a sheet.");
define_id_type!(WidgetId, "Unique identifier for a catalog widget.");
define_id_type!(WidgetInstanceId, "Unique identifier for a placed widget instance.");
define_id_type!(ConnectionId, "Unique identifier for a connection.");
define_id_type!(ScheduleId, "Unique identifier for a schedule.");
define_id_type!(PaymentsConfigId, "Unique identifier for a payments configuration.");

// =============================================================================
// Actor Role
// =============================================================================

/// Platform-wide role of the actor, as asserted by the authentication layer.
///
/// Resource access never derives from this role; it only gates the few
/// operations that have no parent resource (creating an organization).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
	/// No authenticated actor. The least-privileged value.
	#[default]
	Anonymous,
	/// A regular authenticated user.
	User,
	/// Platform administrator.
	Admin,
}

impl Role {
	/// Returns all available roles.
	pub fn all() -> &'static [Role] {
		&[Role::Anonymous, Role::User, Role::Admin]
	}

	/// Parse a role claim, degrading to [`Role::Anonymous`] when the claim is
	/// missing, not a string, or an unknown value.
	pub fn from_claim(claim: Option<&serde_json::Value>) -> Self {
		claim
			.and_then(|v| v.as_str())
			.map(Self::parse_lenient)
			.unwrap_or_default()
	}

	/// Parse a role string, degrading to [`Role::Anonymous`] for unknown values.
	pub fn parse_lenient(s: &str) -> Self {
		s.parse().unwrap_or_default()
	}

	pub fn is_admin(&self) -> bool {
		matches!(self, Role::Admin)
	}
}

impl fmt::Display for Role {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Role::Anonymous => write!(f, "anonymous"),
			Role::User => write!(f, "user"),
			Role::Admin => write!(f, "admin"),
		}
	}
}

/// Error returned when parsing a role string strictly.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown role: {0}")]
pub struct UnknownRole(pub String);

impl FromStr for Role {
	type Err = UnknownRole;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.trim().to_ascii_lowercase().as_str() {
			"anonymous" => Ok(Role::Anonymous),
			"user" => Ok(Role::User),
			"admin" => Ok(Role::Admin),
			other => Err(UnknownRole(other.to_string())),
		}
	}
}

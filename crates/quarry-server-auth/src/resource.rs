// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Resource types, audiences, and per-type privilege vocabularies.
//!
//! Privileges are not globally ordered. Each [`ResourceType`] defines its own
//! vocabulary and its own admin-equivalent privilege; `admin` on a dataset says
//! nothing about `admin` on a page.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::AuthzError;

/// Types of resources that can carry audience policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
	Organization,
	Dataset,
	Page,
	Connection,
	Schedule,
	Payments,
}

impl ResourceType {
	/// Returns all resource types.
	pub fn all() -> &'static [ResourceType] {
		&[
			ResourceType::Organization,
			ResourceType::Dataset,
			ResourceType::Page,
			ResourceType::Connection,
			ResourceType::Schedule,
			ResourceType::Payments,
		]
	}

	/// The privileges a policy on this resource type may carry.
	pub fn privileges(&self) -> &'static [Privilege] {
		match self {
			ResourceType::Organization => &[Privilege::Member, Privilege::SystemAdmin],
			ResourceType::Page => &[Privilege::Admin, Privilege::Editor, Privilege::Viewer],
			ResourceType::Dataset
			| ResourceType::Connection
			| ResourceType::Schedule
			| ResourceType::Payments => &[Privilege::Admin, Privilege::Viewer],
		}
	}

	/// The privilege that allows managing the resource and its policies.
	pub fn admin_privilege(&self) -> Privilege {
		match self {
			ResourceType::Organization => Privilege::SystemAdmin,
			_ => Privilege::Admin,
		}
	}

	/// Returns true if `privilege` belongs to this type's vocabulary.
	pub fn accepts(&self, privilege: Privilege) -> bool {
		self.privileges().contains(&privilege)
	}

	/// Validate that `privilege` belongs to this type's vocabulary.
	pub fn validate(&self, privilege: Privilege) -> Result<(), AuthzError> {
		if self.accepts(privilege) {
			Ok(())
		} else {
			Err(AuthzError::InvalidGrant(format!(
				"privilege {privilege} is not defined for resource type {self}"
			)))
		}
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			ResourceType::Organization => "organization",
			ResourceType::Dataset => "dataset",
			ResourceType::Page => "page",
			ResourceType::Connection => "connection",
			ResourceType::Schedule => "schedule",
			ResourceType::Payments => "payments",
		}
	}
}

impl fmt::Display for ResourceType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for ResourceType {
	type Err = AuthzError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		ResourceType::all()
			.iter()
			.copied()
			.find(|rt| rt.as_str() == s)
			.ok_or_else(|| AuthzError::InvalidGrant(format!("unknown resource type: {s}")))
	}
}

/// Who a policy grants access to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AudienceType {
	User,
	Organization,
	Team,
}

impl AudienceType {
	pub fn all() -> &'static [AudienceType] {
		&[AudienceType::User, AudienceType::Organization, AudienceType::Team]
	}

	/// Group audiences expand to their members in the flattened closure.
	pub fn is_group(&self) -> bool {
		!matches!(self, AudienceType::User)
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			AudienceType::User => "user",
			AudienceType::Organization => "organization",
			AudienceType::Team => "team",
		}
	}
}

impl fmt::Display for AudienceType {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for AudienceType {
	type Err = AuthzError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		AudienceType::all()
			.iter()
			.copied()
			.find(|a| a.as_str() == s)
			.ok_or_else(|| AuthzError::InvalidGrant(format!("unknown audience type: {s}")))
	}
}

/// A privilege name. Meaningful only together with a [`ResourceType`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Privilege {
	Admin,
	Editor,
	Viewer,
	Member,
	SystemAdmin,
}

impl Privilege {
	pub fn all() -> &'static [Privilege] {
		&[
			Privilege::Admin,
			Privilege::Editor,
			Privilege::Viewer,
			Privilege::Member,
			Privilege::SystemAdmin,
		]
	}

	pub fn as_str(&self) -> &'static str {
		match self {
			Privilege::Admin => "admin",
			Privilege::Editor => "editor",
			Privilege::Viewer => "viewer",
			Privilege::Member => "member",
			Privilege::SystemAdmin => "system_admin",
		}
	}
}

impl fmt::Display for Privilege {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for Privilege {
	type Err = AuthzError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Privilege::all()
			.iter()
			.copied()
			.find(|p| p.as_str() == s)
			.ok_or_else(|| AuthzError::InvalidGrant(format!("unknown privilege: {s}")))
	}
}

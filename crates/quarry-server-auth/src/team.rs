// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Team types.
//!
//! This module provides:
//! - [`Team`] - sub-groups within an organization that can hold policies
//! - [`TeamMembership`] - links users to teams
//!
//! Membership changes alter the flattened closure of every policy whose audience
//! is the team.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{MembershipId, OrgId, TeamId, UserId};

/// A team within an organization.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
	/// Unique identifier for this team.
	pub id: TeamId,

	/// The organization this team belongs to.
	pub org_id: OrgId,

	/// Display name of the team.
	pub name: String,

	/// When the team was created.
	pub created_at: DateTime<Utc>,

	/// When the team was last updated.
	pub updated_at: DateTime<Utc>,

	/// When the team was soft-deleted.
	pub deleted_at: Option<DateTime<Utc>>,
}

impl Team {
	/// Creates a new team in the given organization.
	pub fn new(org_id: OrgId, name: impl Into<String>) -> Self {
		let now = Utc::now();
		Self {
			id: TeamId::generate(),
			org_id,
			name: name.into(),
			created_at: now,
			updated_at: now,
			deleted_at: None,
		}
	}
}

/// A user's membership in a team.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TeamMembership {
	/// Unique identifier for this membership record.
	pub id: MembershipId,

	/// The team this membership is for.
	pub team_id: TeamId,

	/// The user who is a member.
	pub user_id: UserId,

	/// When this membership was created.
	pub created_at: DateTime<Utc>,

	pub updated_at: DateTime<Utc>,

	/// When this membership ended.
	pub deleted_at: Option<DateTime<Utc>>,
}

impl TeamMembership {
	/// Creates a new live membership.
	pub fn new(team_id: TeamId, user_id: UserId) -> Self {
		let now = Utc::now();
		Self {
			id: MembershipId::generate(),
			team_id,
			user_id,
			created_at: now,
			updated_at: now,
			deleted_at: None,
		}
	}

	pub fn is_live(&self) -> bool {
		self.deleted_at.is_none()
	}
}

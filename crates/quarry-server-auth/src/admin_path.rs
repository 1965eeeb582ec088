// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Self-demotion evaluation.
//!
//! An actor may hold a resource's admin-equivalent privilege through several
//! policies at once: a direct user grant, a grant to one of their teams, a grant to
//! one of their organizations. Each such policy is an *admin path*. Editing or
//! revoking one of another audience's policies is always fine; editing or revoking
//! one of the actor's own admin paths is fine only while another path remains.
//!
//! Evaluation is a pure function of the current policy set and the actor's
//! memberships. Callers load both inside the mutating transaction.

use std::collections::BTreeSet;
use tracing::instrument;

use crate::error::AuthzError;
use crate::policy::{Audience, ResourceAudiencePolicy};
use crate::resource::Privilege;
use crate::types::{OrgId, PolicyId, TeamId, UserId};

/// The groups an actor currently belongs to, as stored (not as claimed).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActorMemberships {
	pub user_id: UserId,
	pub team_ids: BTreeSet<TeamId>,
	pub org_ids: BTreeSet<OrgId>,
}

impl ActorMemberships {
	pub fn new(user_id: UserId) -> Self {
		Self {
			user_id,
			team_ids: BTreeSet::new(),
			org_ids: BTreeSet::new(),
		}
	}

	pub fn with_teams(mut self, team_ids: impl IntoIterator<Item = TeamId>) -> Self {
		self.team_ids.extend(team_ids);
		self
	}

	pub fn with_orgs(mut self, org_ids: impl IntoIterator<Item = OrgId>) -> Self {
		self.org_ids.extend(org_ids);
		self
	}

	/// Returns true if a grant to `audience` reaches this actor.
	pub fn reaches(&self, audience: Audience) -> bool {
		match audience {
			Audience::User(id) => id == self.user_id,
			Audience::Team(id) => self.team_ids.contains(&id),
			Audience::Organization(id) => self.org_ids.contains(&id),
		}
	}
}

/// A proposed mutation of one policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyChange {
	Reprivilege(Privilege),
	Revoke,
}

/// The live admin-equivalent policies that reach the actor.
pub fn admin_paths<'a>(
	actor: &ActorMemberships,
	policies: &'a [ResourceAudiencePolicy],
) -> Vec<&'a ResourceAudiencePolicy> {
	policies
		.iter()
		.filter(|p| p.is_live() && p.is_admin_grant() && actor.reaches(p.audience()))
		.collect()
}

/// Returns true if applying `change` to `target` removes the actor's last admin path.
pub fn removes_last_admin_path(
	actor: &ActorMemberships,
	policies: &[ResourceAudiencePolicy],
	target: PolicyId,
	change: PolicyChange,
) -> bool {
	let paths = admin_paths(actor, policies);
	let Some(target_policy) = paths.iter().find(|p| p.id == target) else {
		return false;
	};

	let keeps_admin = match change {
		PolicyChange::Reprivilege(privilege) => {
			privilege == target_policy.resource_type.admin_privilege()
		}
		PolicyChange::Revoke => false,
	};
	if keeps_admin {
		return false;
	}

	!paths.iter().any(|p| p.id != target)
}

/// Deny `change` if it would remove the actor's last admin path to the resource.
#[instrument(
	level = "debug",
	skip(actor, policies),
	fields(user_id = %actor.user_id, policy_id = %target, change = ?change)
)]
pub fn check_self_demotion(
	actor: &ActorMemberships,
	policies: &[ResourceAudiencePolicy],
	target: PolicyId,
	change: PolicyChange,
) -> Result<(), AuthzError> {
	if removes_last_admin_path(actor, policies, target, change) {
		tracing::warn!(user_id = %actor.user_id, policy_id = %target, "self-demotion denied");
		return Err(AuthzError::denied(
			"cannot remove or demote your last admin grant on this resource",
		));
	}
	Ok(())
}

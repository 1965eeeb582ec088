// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Policy model: direct grants and their flattened per-user closure.
//!
//! A [`ResourceAudiencePolicy`] says "audience X holds privilege P on resource
//! (type, id)". Audiences may be groups, so checking access against direct grants
//! would need a graph walk. Instead every policy is expanded into one
//! [`FlattenedResourceAudiencePolicy`] row per user it reaches, and access checks
//! become a single equality lookup on the flattened rows.
//!
//! The expansion itself is pure and lives here ([`flatten`], [`diff_closure`]);
//! loading members and writing rows is the store's job.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

use crate::resource::{AudienceType, Privilege, ResourceType};
use crate::types::{OrgId, PolicyId, TeamId, UserId};

/// The grant-holder of a policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Audience {
	User(UserId),
	Organization(OrgId),
	Team(TeamId),
}

impl Audience {
	pub fn from_parts(audience_type: AudienceType, id: Uuid) -> Self {
		match audience_type {
			AudienceType::User => Audience::User(UserId::new(id)),
			AudienceType::Organization => Audience::Organization(OrgId::new(id)),
			AudienceType::Team => Audience::Team(TeamId::new(id)),
		}
	}

	pub fn audience_type(&self) -> AudienceType {
		match self {
			Audience::User(_) => AudienceType::User,
			Audience::Organization(_) => AudienceType::Organization,
			Audience::Team(_) => AudienceType::Team,
		}
	}

	pub fn id(&self) -> Uuid {
		match self {
			Audience::User(id) => id.into_inner(),
			Audience::Organization(id) => id.into_inner(),
			Audience::Team(id) => id.into_inner(),
		}
	}
}

/// A direct grant of a privilege on a resource to an audience.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceAudiencePolicy {
	pub id: PolicyId,
	pub resource_type: ResourceType,
	pub resource_id: Uuid,
	pub audience_type: AudienceType,
	pub audience_id: Uuid,
	pub privilege: Privilege,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub deleted_at: Option<DateTime<Utc>>,
	pub metadata: Option<serde_json::Value>,
}

impl ResourceAudiencePolicy {
	/// Creates a new live policy with a generated ID.
	pub fn new(
		resource_type: ResourceType,
		resource_id: impl Into<Uuid>,
		audience: Audience,
		privilege: Privilege,
	) -> Self {
		let now = Utc::now();
		Self {
			id: PolicyId::generate(),
			resource_type,
			resource_id: resource_id.into(),
			audience_type: audience.audience_type(),
			audience_id: audience.id(),
			privilege,
			created_at: now,
			updated_at: now,
			deleted_at: None,
			metadata: None,
		}
	}

	/// The admin-equivalent grant handed to the creator of a resource.
	pub fn creator_grant(
		resource_type: ResourceType,
		resource_id: impl Into<Uuid>,
		creator: UserId,
	) -> Self {
		Self::new(
			resource_type,
			resource_id,
			Audience::User(creator),
			resource_type.admin_privilege(),
		)
	}

	/// Membership of `user_id` in `org_id`.
	pub fn org_membership(org_id: OrgId, user_id: UserId, privilege: Privilege) -> Self {
		Self::new(
			ResourceType::Organization,
			org_id,
			Audience::User(user_id),
			privilege,
		)
	}

	/// Builder: attach metadata.
	pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
		self.metadata = Some(metadata);
		self
	}

	pub fn audience(&self) -> Audience {
		Audience::from_parts(self.audience_type, self.audience_id)
	}

	pub fn is_live(&self) -> bool {
		self.deleted_at.is_none()
	}

	/// Returns true if this policy grants the resource's admin-equivalent privilege.
	pub fn is_admin_grant(&self) -> bool {
		self.privilege == self.resource_type.admin_privilege()
	}

	/// Returns true if this is an organization membership policy.
	pub fn is_org_membership(&self) -> bool {
		self.resource_type == ResourceType::Organization && self.audience_type == AudienceType::User
	}
}

/// One user's effective grant, derived from exactly one policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlattenedResourceAudiencePolicy {
	pub resource_audience_policy_id: PolicyId,
	pub resource_audience_type: AudienceType,
	pub user_id: UserId,
	pub resource_id: Uuid,
	pub resource_audience_id: Uuid,
	pub resource_type: ResourceType,
	pub privilege: Privilege,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub deleted_at: Option<DateTime<Utc>>,
}

impl FlattenedResourceAudiencePolicy {
	/// Identity of a flattened row inside the closure.
	pub fn key(&self) -> ClosureKey {
		ClosureKey {
			policy_id: self.resource_audience_policy_id,
			user_id: self.user_id,
		}
	}
}

/// `(policy, user)`: at most one live flattened row exists per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClosureKey {
	pub policy_id: PolicyId,
	pub user_id: UserId,
}

/// Expand a policy into its flattened rows.
///
/// A user-audience policy yields exactly one row for that user and ignores
/// `members`. A group-audience policy yields one row per distinct member. A
/// soft-deleted policy yields nothing.
pub fn flatten(
	policy: &ResourceAudiencePolicy,
	members: &[UserId],
) -> Vec<FlattenedResourceAudiencePolicy> {
	if !policy.is_live() {
		return Vec::new();
	}

	let now = Utc::now();
	let users: BTreeSet<UserId> = match policy.audience() {
		Audience::User(user_id) => BTreeSet::from([user_id]),
		Audience::Organization(_) | Audience::Team(_) => members.iter().copied().collect(),
	};

	users
		.into_iter()
		.map(|user_id| FlattenedResourceAudiencePolicy {
			resource_audience_policy_id: policy.id,
			resource_audience_type: policy.audience_type,
			user_id,
			resource_id: policy.resource_id,
			resource_audience_id: policy.audience_id,
			resource_type: policy.resource_type,
			privilege: policy.privilege,
			created_at: now,
			updated_at: now,
			deleted_at: None,
		})
		.collect()
}

/// Differences between the closure derived from policies and the stored one.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClosureDiff {
	/// Derived rows with no live stored counterpart.
	pub missing: Vec<FlattenedResourceAudiencePolicy>,
	/// Live stored rows that no policy derives, or whose privilege is stale.
	pub stale: Vec<FlattenedResourceAudiencePolicy>,
}

impl ClosureDiff {
	pub fn is_consistent(&self) -> bool {
		self.missing.is_empty() && self.stale.is_empty()
	}
}

/// Compare the expected closure against the stored live rows.
///
/// A stored row whose privilege differs from the derived one is reported both
/// as stale (the stored row) and missing (the derived row).
pub fn diff_closure(
	expected: &[FlattenedResourceAudiencePolicy],
	actual: &[FlattenedResourceAudiencePolicy],
) -> ClosureDiff {
	let expected_by_key: BTreeMap<ClosureKey, &FlattenedResourceAudiencePolicy> =
		expected.iter().map(|row| (row.key(), row)).collect();
	let actual_by_key: BTreeMap<ClosureKey, &FlattenedResourceAudiencePolicy> = actual
		.iter()
		.filter(|row| row.deleted_at.is_none())
		.map(|row| (row.key(), row))
		.collect();

	let mut diff = ClosureDiff::default();
	for (key, row) in &expected_by_key {
		match actual_by_key.get(key) {
			Some(stored) if stored.privilege == row.privilege => {}
			_ => diff.missing.push((*row).clone()),
		}
	}
	for (key, row) in &actual_by_key {
		match expected_by_key.get(key) {
			Some(derived) if derived.privilege == row.privilege => {}
			_ => diff.stale.push((*row).clone()),
		}
	}
	diff
}

#[cfg(test)]
mod tests {
	use super::*;
	use proptest::prelude::*;

	fn team_policy(privilege: Privilege) -> ResourceAudiencePolicy {
		ResourceAudiencePolicy::new(
			ResourceType::Page,
			Uuid::new_v4(),
			Audience::Team(TeamId::generate()),
			privilege,
		)
	}

	#[test]
	fn creator_grant_uses_type_local_admin() {
		let user = UserId::generate();
		let org = ResourceAudiencePolicy::creator_grant(ResourceType::Organization, Uuid::new_v4(), user);
		assert_eq!(org.privilege, Privilege::SystemAdmin);
		assert!(org.is_admin_grant());
		assert!(org.is_org_membership());

		let dataset = ResourceAudiencePolicy::creator_grant(ResourceType::Dataset, Uuid::new_v4(), user);
		assert_eq!(dataset.privilege, Privilege::Admin);
		assert_eq!(dataset.audience(), Audience::User(user));
	}

	#[test]
	fn user_policy_flattens_to_exactly_one_row() {
		let user = UserId::generate();
		let policy = ResourceAudiencePolicy::new(
			ResourceType::Dataset,
			Uuid::new_v4(),
			Audience::User(user),
			Privilege::Viewer,
		);
		let others = [UserId::generate(), UserId::generate()];
		let rows = flatten(&policy, &others);
		assert_eq!(rows.len(), 1);
		assert_eq!(rows[0].user_id, user);
		assert_eq!(rows[0].privilege, Privilege::Viewer);
	}

	#[test]
	fn group_policy_flattens_per_member() {
		let policy = team_policy(Privilege::Admin);
		let a = UserId::generate();
		let b = UserId::generate();
		let rows = flatten(&policy, &[a, b, a]);
		assert_eq!(rows.len(), 2);
		assert!(rows.iter().all(|r| r.resource_audience_policy_id == policy.id));
		assert!(rows.iter().all(|r| r.resource_audience_type == AudienceType::Team));
	}

	#[test]
	fn deleted_policy_flattens_to_nothing() {
		let mut policy = team_policy(Privilege::Viewer);
		policy.deleted_at = Some(Utc::now());
		assert!(flatten(&policy, &[UserId::generate()]).is_empty());
	}

	#[test]
	fn diff_reports_privilege_drift_both_ways() {
		let policy = team_policy(Privilege::Admin);
		let member = UserId::generate();
		let expected = flatten(&policy, &[member]);
		let mut stored = expected.clone();
		stored[0].privilege = Privilege::Viewer;

		let diff = diff_closure(&expected, &stored);
		assert_eq!(diff.missing.len(), 1);
		assert_eq!(diff.stale.len(), 1);
		assert!(!diff.is_consistent());
	}

	#[test]
	fn diff_ignores_soft_deleted_rows() {
		let policy = team_policy(Privilege::Admin);
		let member = UserId::generate();
		let mut stored = flatten(&policy, &[member]);
		stored[0].deleted_at = Some(Utc::now());

		let diff = diff_closure(&[], &stored);
		assert!(diff.is_consistent());
	}

	proptest! {
		#[test]
		fn group_closure_covers_every_member(member_seeds in prop::collection::vec(any::<u128>(), 0..20)) {
			let policy = team_policy(Privilege::Editor);
			let members: Vec<UserId> = member_seeds.iter().map(|s| UserId::new(Uuid::from_u128(*s))).collect();
			let rows = flatten(&policy, &members);

			let distinct: BTreeSet<UserId> = members.iter().copied().collect();
			prop_assert_eq!(rows.len(), distinct.len());
			for member in &distinct {
				prop_assert!(rows.iter().any(|r| r.user_id == *member && r.privilege == Privilege::Editor));
			}
		}

		#[test]
		fn closure_diff_of_itself_is_consistent(member_seeds in prop::collection::vec(any::<u128>(), 0..20)) {
			let policy = team_policy(Privilege::Viewer);
			let members: Vec<UserId> = member_seeds.iter().map(|s| UserId::new(Uuid::from_u128(*s))).collect();
			let rows = flatten(&policy, &members);
			prop_assert!(diff_closure(&rows, &rows).is_consistent());
		}

		#[test]
		fn removing_a_member_leaves_exactly_one_stale_row(member_seeds in prop::collection::btree_set(any::<u128>(), 1..20)) {
			let policy = team_policy(Privilege::Admin);
			let members: Vec<UserId> = member_seeds.iter().map(|s| UserId::new(Uuid::from_u128(*s))).collect();
			let stored = flatten(&policy, &members);
			let expected = flatten(&policy, &members[1..]);

			let diff = diff_closure(&expected, &stored);
			prop_assert!(diff.missing.is_empty());
			prop_assert_eq!(diff.stale.len(), 1);
			prop_assert_eq!(diff.stale[0].user_id, members[0]);
		}
	}
}

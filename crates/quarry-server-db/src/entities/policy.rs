// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Policies and their flattened closure.
//!
//! This module provides:
//! - [`PolicyRules`] - who may grant, re-privilege and revoke access
//! - [`FlattenedPolicyRules`] - each identity reads only its own effective grants
//!
//! Granting, changing or revoking a policy requires the resource's
//! admin-equivalent privilege. The one exception is accepting an invitation,
//! which lets the invitee grant themself the invited organization membership.

use async_trait::async_trait;
use chrono::Utc;
use quarry_server_auth::{
	check_self_demotion, ActorMemberships, AudienceType, AuthzError,
	FlattenedResourceAudiencePolicy, Identity, OrgId, PolicyChange, Predicate,
	ResourceAudiencePolicy, ResourceType, TeamId, UserId, Value,
};
use sqlx::sqlite::SqliteRow;
use uuid::Uuid;

use crate::capability::{Capability, Gate, Write};
use crate::closure;
use crate::entity::{get_id, get_json, get_parsed, get_timestamps, get_uuid, json_value, Entity};
use crate::error::DbError;

use super::immutable;

impl Entity for ResourceAudiencePolicy {
	const TABLE: &'static str = "resource_audience_policies";

	fn id(&self) -> Uuid {
		self.id.into_inner()
	}

	fn columns(&self) -> Vec<(&'static str, Value)> {
		vec![
			("resource_type", self.resource_type.into()),
			("resource_id", self.resource_id.into()),
			("audience_type", self.audience_type.into()),
			("audience_id", self.audience_id.into()),
			("privilege", self.privilege.into()),
			("metadata", json_value(&self.metadata)),
		]
	}

	fn from_row(row: &SqliteRow) -> Result<Self, DbError> {
		let (created_at, updated_at, deleted_at) = get_timestamps(row)?;
		Ok(Self {
			id: get_id(row, "id")?,
			resource_type: get_parsed(row, "resource_type")?,
			resource_id: get_uuid(row, "resource_id")?,
			audience_type: get_parsed(row, "audience_type")?,
			audience_id: get_uuid(row, "audience_id")?,
			privilege: get_parsed(row, "privilege")?,
			created_at,
			updated_at,
			deleted_at,
			metadata: get_json(row, "metadata")?,
		})
	}
}

impl Entity for FlattenedResourceAudiencePolicy {
	const TABLE: &'static str = "flattened_resource_audience_policies";
	const ID_COLUMN: &'static str = "resource_audience_policy_id";

	fn id(&self) -> Uuid {
		self.resource_audience_policy_id.into_inner()
	}

	fn columns(&self) -> Vec<(&'static str, Value)> {
		vec![
			("resource_audience_type", self.resource_audience_type.into()),
			("user_id", self.user_id.into()),
			("resource_id", self.resource_id.into()),
			("resource_audience_id", self.resource_audience_id.into()),
			("resource_type", self.resource_type.into()),
			("privilege", self.privilege.into()),
		]
	}

	fn from_row(row: &SqliteRow) -> Result<Self, DbError> {
		let (created_at, updated_at, deleted_at) = get_timestamps(row)?;
		Ok(Self {
			resource_audience_policy_id: get_id(row, "resource_audience_policy_id")?,
			resource_audience_type: get_parsed(row, "resource_audience_type")?,
			user_id: get_id(row, "user_id")?,
			resource_id: get_uuid(row, "resource_id")?,
			resource_audience_id: get_uuid(row, "resource_audience_id")?,
			resource_type: get_parsed(row, "resource_type")?,
			privilege: get_parsed(row, "privilege")?,
			created_at,
			updated_at,
			deleted_at,
		})
	}
}

pub struct PolicyRules;

impl PolicyRules {
	/// Group audiences must name a live organization or team.
	async fn require_audience(gate: &mut Gate<'_>, policy: &ResourceAudiencePolicy) -> Result<(), AuthzError> {
		let table = match policy.audience_type {
			AudienceType::User => return Ok(()),
			AudienceType::Organization => "organizations",
			AudienceType::Team => "teams",
		};
		if gate.exists(table, policy.audience_id).await? {
			Ok(())
		} else {
			Err(AuthzError::denied(format!(
				"{} {} does not exist",
				policy.audience_type, policy.audience_id
			)))
		}
	}

	/// The actor is granting themself membership through an invitation they
	/// are accepting: live, unexpired, addressed to their email, same privilege,
	/// and already stamped `accepted_at`. Only the token-checked acceptance
	/// stamps it, and that transaction removes the invitation before commit.
	async fn accepted_invitation(
		gate: &mut Gate<'_>,
		actor: UserId,
		policy: &ResourceAudiencePolicy,
	) -> Result<bool, AuthzError> {
		if !policy.is_org_membership() || policy.audience_id != actor.into_inner() {
			return Ok(false);
		}
		let Some(email) = gate.actor_email().await? else {
			return Ok(false);
		};

		gate.checkpoint()?;
		let count: i64 = sqlx::query_scalar(
			r#"
			SELECT COUNT(*) FROM organization_invitations
			WHERE org_id = ? AND lower(email) = lower(?) AND privilege = ?
				AND accepted_at IS NOT NULL AND expires_at > ? AND deleted_at IS NULL
			"#,
		)
		.bind(policy.resource_id.to_string())
		.bind(email)
		.bind(policy.privilege.as_str())
		.bind(Utc::now().to_rfc3339())
		.fetch_one(gate.conn())
		.await
		.map_err(|e| AuthzError::denied_by("invitation lookup failed", e))?;
		Ok(count > 0)
	}

	/// Every path by which the actor currently reaches an audience, and every
	/// live policy on the resource.
	async fn admin_context(
		gate: &mut Gate<'_>,
		actor: UserId,
		policy: &ResourceAudiencePolicy,
	) -> Result<(ActorMemberships, Vec<ResourceAudiencePolicy>), AuthzError> {
		gate.checkpoint()?;
		let conn = gate.conn();

		let team_ids: Vec<String> = sqlx::query_scalar(
			r#"
			SELECT m.team_id FROM team_memberships m
			JOIN teams t ON t.id = m.team_id
			WHERE m.user_id = ? AND m.deleted_at IS NULL AND t.deleted_at IS NULL
			"#,
		)
		.bind(actor.to_string())
		.fetch_all(&mut *conn)
		.await
		.map_err(|e| AuthzError::denied_by("team membership lookup failed", e))?;

		let org_ids: Vec<String> = sqlx::query_scalar(
			r#"
			SELECT DISTINCT resource_id FROM resource_audience_policies
			WHERE resource_type = ? AND audience_type = ? AND audience_id = ? AND deleted_at IS NULL
			"#,
		)
		.bind(ResourceType::Organization.as_str())
		.bind(AudienceType::User.as_str())
		.bind(actor.to_string())
		.fetch_all(&mut *conn)
		.await
		.map_err(|e| AuthzError::denied_by("organization membership lookup failed", e))?;

		let rows = sqlx::query(
			r#"
			SELECT * FROM resource_audience_policies
			WHERE resource_type = ? AND resource_id = ? AND deleted_at IS NULL
			"#,
		)
		.bind(policy.resource_type.as_str())
		.bind(policy.resource_id.to_string())
		.fetch_all(&mut *conn)
		.await
		.map_err(|e| AuthzError::denied_by("policy lookup failed", e))?;

		let policies = rows
			.iter()
			.map(ResourceAudiencePolicy::from_row)
			.collect::<Result<Vec<_>, _>>()
			.map_err(|e| AuthzError::denied_by("policy row is malformed", e))?;

		let memberships = ActorMemberships::new(actor)
			.with_teams(parse_ids::<TeamId>(&team_ids)?)
			.with_orgs(parse_ids::<OrgId>(&org_ids)?);
		Ok((memberships, policies))
	}

	async fn guard_self_demotion(
		gate: &mut Gate<'_>,
		current: &ResourceAudiencePolicy,
		change: PolicyChange,
	) -> Result<(), AuthzError> {
		let actor = gate.actor()?;
		let (memberships, policies) = Self::admin_context(gate, actor, current).await?;
		check_self_demotion(&memberships, &policies, current.id, change)
	}
}

fn parse_ids<T: From<Uuid>>(raw: &[String]) -> Result<Vec<T>, AuthzError> {
	raw.iter()
		.map(|s| {
			Uuid::parse_str(s)
				.map(T::from)
				.map_err(|e| AuthzError::denied_by("membership id is malformed", e))
		})
		.collect()
}

#[async_trait]
impl Capability<ResourceAudiencePolicy> for PolicyRules {
	/// Anyone with access to a resource may see who else has access to it.
	fn filter_predicate(&self, identity: &Identity) -> Predicate {
		Predicate::for_user(identity, |user_id| {
			Predicate::grant_on_columns("resource_type", "resource_id", user_id)
		})
	}

	async fn authorize_create(
		&self,
		gate: &mut Gate<'_>,
		row: &ResourceAudiencePolicy,
	) -> Result<(), AuthzError> {
		let actor = gate.actor()?;
		row.resource_type.validate(row.privilege)?;
		Self::require_audience(gate, row).await?;

		let admin = row.resource_type.admin_privilege();
		if gate
			.has_policy(row.resource_type, row.resource_id, &[admin])
			.await?
		{
			return Ok(());
		}
		if Self::accepted_invitation(gate, actor, row).await? {
			tracing::debug!(user_id = %actor, org_id = %row.resource_id, "membership granted by invitation");
			return Ok(());
		}
		gate.require_admin(row.resource_type, row.resource_id).await
	}

	/// Only `privilege` and `metadata` change; the grantee and resource are fixed.
	async fn authorize_update(
		&self,
		gate: &mut Gate<'_>,
		current: &ResourceAudiencePolicy,
		proposed: &ResourceAudiencePolicy,
	) -> Result<(), AuthzError> {
		immutable("resource_type", &current.resource_type, &proposed.resource_type)?;
		immutable("resource_id", &current.resource_id, &proposed.resource_id)?;
		immutable("audience_type", &current.audience_type, &proposed.audience_type)?;
		immutable("audience_id", &current.audience_id, &proposed.audience_id)?;
		proposed.resource_type.validate(proposed.privilege)?;

		gate.require_admin(current.resource_type, current.resource_id)
			.await?;
		if proposed.privilege != current.privilege {
			Self::guard_self_demotion(gate, current, PolicyChange::Reprivilege(proposed.privilege))
				.await?;
		}
		Ok(())
	}

	async fn authorize_delete(
		&self,
		gate: &mut Gate<'_>,
		current: &ResourceAudiencePolicy,
	) -> Result<(), AuthzError> {
		gate.require_admin(current.resource_type, current.resource_id)
			.await?;
		Self::guard_self_demotion(gate, current, PolicyChange::Revoke).await
	}

	async fn after_write(
		&self,
		gate: &mut Gate<'_>,
		write: Write<'_, ResourceAudiencePolicy>,
	) -> Result<(), DbError> {
		match write {
			Write::Created(policy) => closure::on_policy_created(gate.conn(), policy).await,
			Write::Updated { before, after } => closure::on_policy_updated(gate.conn(), before, after).await,
			Write::Deleted(policy) => closure::on_policy_deleted(gate.conn(), policy).await,
		}
	}
}

pub struct FlattenedPolicyRules;

#[async_trait]
impl Capability<FlattenedResourceAudiencePolicy> for FlattenedPolicyRules {
	fn filter_predicate(&self, identity: &Identity) -> Predicate {
		Predicate::for_user(identity, |user_id| Predicate::eq("user_id", user_id))
	}

	/// The closure is derived; only the maintenance paths write it.
	async fn authorize_create(
		&self,
		_gate: &mut Gate<'_>,
		_row: &FlattenedResourceAudiencePolicy,
	) -> Result<(), AuthzError> {
		Err(AuthzError::InsertForbidden {
			entity: FlattenedResourceAudiencePolicy::TABLE,
		})
	}
}

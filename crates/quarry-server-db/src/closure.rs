// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Maintenance of the flattened policy closure.
//!
//! Every function here works on the caller's connection so it joins the caller's
//! transaction. Nothing here authorizes: callers are the policy and membership
//! write paths after their own guards passed, and the operations CLI.
//!
//! Membership of a user in an organization is a live user-audience policy on
//! that organization. Membership in a team is a live `team_memberships` row of a
//! live team.

use chrono::Utc;
use quarry_server_auth::{
	diff_closure, flatten, Audience, AudienceType, ClosureDiff, FlattenedResourceAudiencePolicy,
	PolicyId, Privilege, ResourceAudiencePolicy, ResourceType, UserId,
};
use sqlx::sqlite::SqlitePool;
use sqlx::SqliteConnection;
use std::collections::{BTreeSet, HashMap};
use uuid::Uuid;

use crate::entity::Entity;
use crate::error::DbError;

/// Current members of an audience. A user audience is its own single member.
pub async fn members_of(
	conn: &mut SqliteConnection,
	audience: Audience,
) -> Result<Vec<UserId>, DbError> {
	let raw: Vec<String> = match audience {
		Audience::User(user_id) => return Ok(vec![user_id]),
		Audience::Team(team_id) => {
			sqlx::query_scalar(
				r#"
				SELECT DISTINCT m.user_id
				FROM team_memberships m
				JOIN teams t ON t.id = m.team_id
				WHERE m.team_id = ? AND m.deleted_at IS NULL AND t.deleted_at IS NULL
				"#,
			)
			.bind(team_id.to_string())
			.fetch_all(&mut *conn)
			.await?
		}
		Audience::Organization(org_id) => {
			sqlx::query_scalar(
				r#"
				SELECT DISTINCT audience_id
				FROM resource_audience_policies
				WHERE resource_type = ? AND resource_id = ? AND audience_type = ?
					AND deleted_at IS NULL
				"#,
			)
			.bind(ResourceType::Organization.as_str())
			.bind(org_id.to_string())
			.bind(AudienceType::User.as_str())
			.fetch_all(&mut *conn)
			.await?
		}
	};

	raw.iter()
		.map(|s| {
			Uuid::parse_str(s)
				.map(UserId::new)
				.map_err(|e| DbError::Internal(format!("Invalid member id: {e}")))
		})
		.collect()
}

async fn insert_flattened(
	conn: &mut SqliteConnection,
	row: &FlattenedResourceAudiencePolicy,
) -> Result<u64, DbError> {
	let result = sqlx::query(
		r#"
		INSERT OR IGNORE INTO flattened_resource_audience_policies (
			resource_audience_policy_id, resource_audience_type, user_id, resource_id,
			resource_audience_id, resource_type, privilege, created_at, updated_at, deleted_at
		)
		VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, NULL)
		"#,
	)
	.bind(row.resource_audience_policy_id.to_string())
	.bind(row.resource_audience_type.as_str())
	.bind(row.user_id.to_string())
	.bind(row.resource_id.to_string())
	.bind(row.resource_audience_id.to_string())
	.bind(row.resource_type.as_str())
	.bind(row.privilege.as_str())
	.bind(row.created_at.to_rfc3339())
	.bind(row.updated_at.to_rfc3339())
	.execute(&mut *conn)
	.await?;
	Ok(result.rows_affected())
}

/// Insert a policy row without authorization and materialize its closure.
///
/// Used for the creator's admin grant, which exists before anyone could
/// authorize it.
#[tracing::instrument(skip(conn, policy), fields(policy_id = %policy.id, resource_type = %policy.resource_type))]
pub async fn insert_policy(
	conn: &mut SqliteConnection,
	policy: &ResourceAudiencePolicy,
) -> Result<(), DbError> {
	sqlx::query(
		r#"
		INSERT INTO resource_audience_policies (
			id, resource_type, resource_id, audience_type, audience_id, privilege,
			created_at, updated_at, deleted_at, metadata
		)
		VALUES (?, ?, ?, ?, ?, ?, ?, ?, NULL, ?)
		"#,
	)
	.bind(policy.id.to_string())
	.bind(policy.resource_type.as_str())
	.bind(policy.resource_id.to_string())
	.bind(policy.audience_type.as_str())
	.bind(policy.audience_id.to_string())
	.bind(policy.privilege.as_str())
	.bind(policy.created_at.to_rfc3339())
	.bind(policy.updated_at.to_rfc3339())
	.bind(policy.metadata.as_ref().map(|m| m.to_string()))
	.execute(&mut *conn)
	.await
	.map_err(|e| DbError::from_insert(e, "policy"))?;

	on_policy_created(conn, policy).await
}

/// Closure maintenance for a freshly inserted policy.
pub async fn on_policy_created(
	conn: &mut SqliteConnection,
	policy: &ResourceAudiencePolicy,
) -> Result<(), DbError> {
	let rows = materialize_policy(conn, policy).await?;
	if policy.is_org_membership() {
		add_member(
			conn,
			Audience::Organization(policy.resource_id.into()),
			UserId::new(policy.audience_id),
		)
		.await?;
	}
	tracing::debug!(policy_id = %policy.id, rows, "policy materialized");
	Ok(())
}

/// Closure maintenance for a privilege change.
pub async fn on_policy_updated(
	conn: &mut SqliteConnection,
	before: &ResourceAudiencePolicy,
	after: &ResourceAudiencePolicy,
) -> Result<(), DbError> {
	if before.privilege != after.privilege {
		reprivilege(conn, after.id, after.privilege).await?;
	}
	Ok(())
}

/// Closure maintenance for a soft-deleted policy.
pub async fn on_policy_deleted(
	conn: &mut SqliteConnection,
	policy: &ResourceAudiencePolicy,
) -> Result<(), DbError> {
	retract_policy(conn, policy.id).await?;
	if policy.is_org_membership() {
		remove_member(
			conn,
			Audience::Organization(policy.resource_id.into()),
			UserId::new(policy.audience_id),
		)
		.await?;
	}
	Ok(())
}

/// Write one flattened row per current member of the policy's audience.
pub async fn materialize_policy(
	conn: &mut SqliteConnection,
	policy: &ResourceAudiencePolicy,
) -> Result<u64, DbError> {
	let members = if policy.audience_type.is_group() {
		members_of(conn, policy.audience()).await?
	} else {
		Vec::new()
	};

	let mut inserted = 0;
	for row in flatten(policy, &members) {
		inserted += insert_flattened(conn, &row).await?;
	}
	Ok(inserted)
}

/// Retire every live flattened row of a policy.
pub async fn retract_policy(conn: &mut SqliteConnection, policy_id: PolicyId) -> Result<u64, DbError> {
	let now = Utc::now().to_rfc3339();
	let result = sqlx::query(
		r#"
		UPDATE flattened_resource_audience_policies
		SET deleted_at = ?, updated_at = ?
		WHERE resource_audience_policy_id = ? AND deleted_at IS NULL
		"#,
	)
	.bind(&now)
	.bind(&now)
	.bind(policy_id.to_string())
	.execute(&mut *conn)
	.await?;
	Ok(result.rows_affected())
}

/// Propagate a privilege change to every live flattened row of a policy.
pub async fn reprivilege(
	conn: &mut SqliteConnection,
	policy_id: PolicyId,
	privilege: Privilege,
) -> Result<u64, DbError> {
	let result = sqlx::query(
		r#"
		UPDATE flattened_resource_audience_policies
		SET privilege = ?, updated_at = ?
		WHERE resource_audience_policy_id = ? AND deleted_at IS NULL
		"#,
	)
	.bind(privilege.as_str())
	.bind(Utc::now().to_rfc3339())
	.bind(policy_id.to_string())
	.execute(&mut *conn)
	.await?;
	Ok(result.rows_affected())
}

async fn live_policies_for_audience(
	conn: &mut SqliteConnection,
	audience: Audience,
) -> Result<Vec<ResourceAudiencePolicy>, DbError> {
	let rows = sqlx::query(
		r#"
		SELECT * FROM resource_audience_policies
		WHERE audience_type = ? AND audience_id = ? AND deleted_at IS NULL
		"#,
	)
	.bind(audience.audience_type().as_str())
	.bind(audience.id().to_string())
	.fetch_all(&mut *conn)
	.await?;
	rows.iter().map(ResourceAudiencePolicy::from_row).collect()
}

/// A user joined a group: add their rows for every policy held by the group.
#[tracing::instrument(skip(conn), fields(audience = ?audience, user_id = %user_id))]
pub async fn add_member(
	conn: &mut SqliteConnection,
	audience: Audience,
	user_id: UserId,
) -> Result<u64, DbError> {
	let mut inserted = 0;
	for policy in live_policies_for_audience(conn, audience).await? {
		for row in flatten(&policy, &[user_id]) {
			inserted += insert_flattened(conn, &row).await?;
		}
	}
	tracing::debug!(inserted, "member added to closure");
	Ok(inserted)
}

/// A user left a group: retire their rows for every policy held by the group.
///
/// Does nothing while the user is still a member through another path (a second
/// membership policy in the same organization).
#[tracing::instrument(skip(conn), fields(audience = ?audience, user_id = %user_id))]
pub async fn remove_member(
	conn: &mut SqliteConnection,
	audience: Audience,
	user_id: UserId,
) -> Result<u64, DbError> {
	if members_of(conn, audience).await?.contains(&user_id) {
		tracing::debug!("still a member, closure unchanged");
		return Ok(0);
	}

	let now = Utc::now().to_rfc3339();
	let result = sqlx::query(
		r#"
		UPDATE flattened_resource_audience_policies
		SET deleted_at = ?, updated_at = ?
		WHERE resource_audience_type = ? AND resource_audience_id = ? AND user_id = ?
			AND deleted_at IS NULL
		"#,
	)
	.bind(&now)
	.bind(&now)
	.bind(audience.audience_type().as_str())
	.bind(audience.id().to_string())
	.bind(user_id.to_string())
	.execute(&mut *conn)
	.await?;

	tracing::debug!(retired = result.rows_affected(), "member removed from closure");
	Ok(result.rows_affected())
}

/// Soft-delete every policy on a resource, and their flattened rows.
#[tracing::instrument(skip(conn), fields(resource_type = %resource_type, resource_id = %resource_id))]
pub async fn retire_resource(
	conn: &mut SqliteConnection,
	resource_type: ResourceType,
	resource_id: Uuid,
) -> Result<u64, DbError> {
	let now = Utc::now().to_rfc3339();
	let policies = sqlx::query(
		r#"
		UPDATE resource_audience_policies
		SET deleted_at = ?, updated_at = ?
		WHERE resource_type = ? AND resource_id = ? AND deleted_at IS NULL
		"#,
	)
	.bind(&now)
	.bind(&now)
	.bind(resource_type.as_str())
	.bind(resource_id.to_string())
	.execute(&mut *conn)
	.await?;

	sqlx::query(
		r#"
		UPDATE flattened_resource_audience_policies
		SET deleted_at = ?, updated_at = ?
		WHERE resource_type = ? AND resource_id = ? AND deleted_at IS NULL
		"#,
	)
	.bind(&now)
	.bind(&now)
	.bind(resource_type.as_str())
	.bind(resource_id.to_string())
	.execute(&mut *conn)
	.await?;

	tracing::debug!(policies = policies.rows_affected(), "resource retired");
	Ok(policies.rows_affected())
}

/// Retire every flattened row derived through a group that no longer exists.
pub async fn retire_audience(conn: &mut SqliteConnection, audience: Audience) -> Result<u64, DbError> {
	let now = Utc::now().to_rfc3339();
	let result = sqlx::query(
		r#"
		UPDATE flattened_resource_audience_policies
		SET deleted_at = ?, updated_at = ?
		WHERE resource_audience_type = ? AND resource_audience_id = ? AND deleted_at IS NULL
		"#,
	)
	.bind(&now)
	.bind(&now)
	.bind(audience.audience_type().as_str())
	.bind(audience.id().to_string())
	.execute(&mut *conn)
	.await?;
	Ok(result.rows_affected())
}

/// Compare the stored closure with the one derived from live policies.
pub async fn verify(conn: &mut SqliteConnection) -> Result<ClosureDiff, DbError> {
	let policies: Vec<ResourceAudiencePolicy> =
		sqlx::query("SELECT * FROM resource_audience_policies WHERE deleted_at IS NULL")
			.fetch_all(&mut *conn)
			.await?
			.iter()
			.map(ResourceAudiencePolicy::from_row)
			.collect::<Result<_, _>>()?;

	let mut members: HashMap<Audience, Vec<UserId>> = HashMap::new();
	let mut expected = Vec::new();
	for policy in &policies {
		let audience = policy.audience();
		if audience.audience_type().is_group() && !members.contains_key(&audience) {
			let found = members_of(conn, audience).await?;
			members.insert(audience, found);
		}
		let group = members.get(&audience).map(Vec::as_slice).unwrap_or(&[]);
		expected.extend(flatten(policy, group));
	}

	let actual: Vec<FlattenedResourceAudiencePolicy> = sqlx::query(
		"SELECT * FROM flattened_resource_audience_policies WHERE deleted_at IS NULL",
	)
	.fetch_all(&mut *conn)
	.await?
	.iter()
	.map(FlattenedResourceAudiencePolicy::from_row)
	.collect::<Result<_, _>>()?;

	Ok(diff_closure(&expected, &actual))
}

/// Repair the stored closure: retire stale rows, then insert missing ones.
pub async fn rebuild(conn: &mut SqliteConnection) -> Result<ClosureDiff, DbError> {
	let diff = verify(conn).await?;
	let now = Utc::now().to_rfc3339();

	let stale_keys: BTreeSet<_> = diff.stale.iter().map(|row| row.key()).collect();
	for key in &stale_keys {
		sqlx::query(
			r#"
			UPDATE flattened_resource_audience_policies
			SET deleted_at = ?, updated_at = ?
			WHERE resource_audience_policy_id = ? AND user_id = ? AND deleted_at IS NULL
			"#,
		)
		.bind(&now)
		.bind(&now)
		.bind(key.policy_id.to_string())
		.bind(key.user_id.to_string())
		.execute(&mut *conn)
		.await?;
	}
	for row in &diff.missing {
		insert_flattened(conn, row).await?;
	}
	Ok(diff)
}

/// [`verify`] in its own read transaction.
#[tracing::instrument(skip(pool))]
pub async fn verify_closure(pool: &SqlitePool) -> Result<ClosureDiff, DbError> {
	let mut tx = pool.begin().await?;
	let diff = verify(&mut *tx).await?;
	tx.commit().await?;

	tracing::info!(
		missing = diff.missing.len(),
		stale = diff.stale.len(),
		"closure verified"
	);
	Ok(diff)
}

/// [`rebuild`] in its own transaction.
#[tracing::instrument(skip(pool))]
pub async fn rebuild_closure(pool: &SqlitePool) -> Result<ClosureDiff, DbError> {
	let mut tx = pool.begin().await?;
	let diff = rebuild(&mut *tx).await?;
	tx.commit().await?;

	tracing::info!(
		inserted = diff.missing.len(),
		retired = diff.stale.len(),
		"closure rebuilt"
	);
	Ok(diff)
}

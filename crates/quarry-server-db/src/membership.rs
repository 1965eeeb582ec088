// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Organization and team membership.
//!
//! Organization membership is a user-audience policy on the organization; team
//! membership is a `team_memberships` row. Both keep the flattened closure in
//! step through the entity hooks.

use quarry_server_auth::{
	Audience, AudienceType, OrgId, Predicate, Privilege, RequestContext, ResourceAudiencePolicy,
	ResourceType, Team, TeamId, TeamMembership, UserId,
};

use crate::error::{DbError, Result};
use crate::sharing;
use crate::store::{ListQuery, Store};

/// Make `user_id` a member of the organization.
pub async fn add_org_member(
	store: &Store,
	ctx: &RequestContext,
	org_id: OrgId,
	user_id: UserId,
	privilege: Privilege,
) -> Result<ResourceAudiencePolicy> {
	sharing::share(
		store,
		ctx,
		ResourceType::Organization,
		org_id.into_inner(),
		Audience::User(user_id),
		privilege,
	)
	.await
}

/// Remove every membership policy `user_id` holds in the organization.
#[tracing::instrument(skip(store, ctx), fields(actor = ?ctx.identity().user_id()))]
pub async fn remove_org_member(
	store: &Store,
	ctx: &RequestContext,
	org_id: OrgId,
	user_id: UserId,
) -> Result<usize> {
	let mut tx = store.begin(ctx).await?;
	let query = ListQuery::new().filter(
		Predicate::eq("resource_type", ResourceType::Organization)
			.and(Predicate::eq("resource_id", org_id))
			.and(Predicate::eq("audience_type", AudienceType::User))
			.and(Predicate::eq("audience_id", user_id)),
	);
	let memberships: Vec<ResourceAudiencePolicy> = tx.list(&query).await?;
	if memberships.is_empty() {
		return Err(DbError::NotFound(format!(
			"membership of {user_id} in organization {org_id}"
		)));
	}
	for policy in &memberships {
		tx.delete::<ResourceAudiencePolicy>(policy.id).await?;
	}
	tx.commit().await?;

	tracing::info!(removed = memberships.len(), "organization member removed");
	Ok(memberships.len())
}

/// Add `user_id` to a team.
#[tracing::instrument(skip(store, ctx), fields(actor = ?ctx.identity().user_id()))]
pub async fn add_team_member(
	store: &Store,
	ctx: &RequestContext,
	team_id: TeamId,
	user_id: UserId,
) -> Result<TeamMembership> {
	let membership = store.create(ctx, TeamMembership::new(team_id, user_id)).await?;
	tracing::info!(membership_id = %membership.id, "team member added");
	Ok(membership)
}

/// Remove `user_id` from a team.
#[tracing::instrument(skip(store, ctx), fields(actor = ?ctx.identity().user_id()))]
pub async fn remove_team_member(
	store: &Store,
	ctx: &RequestContext,
	team_id: TeamId,
	user_id: UserId,
) -> Result<()> {
	let mut tx = store.begin(ctx).await?;
	let query = ListQuery::new()
		.filter(Predicate::eq("team_id", team_id).and(Predicate::eq("user_id", user_id)))
		.limit(1);
	let membership = tx
		.list::<TeamMembership>(&query)
		.await?
		.into_iter()
		.next()
		.ok_or_else(|| DbError::NotFound(format!("membership of {user_id} in team {team_id}")))?;
	tx.delete::<TeamMembership>(membership.id).await?;
	tx.commit().await?;

	tracing::info!(membership_id = %membership.id, "team member removed");
	Ok(())
}

/// Live members of a team, as visible to the caller.
pub async fn team_members(store: &Store, ctx: &RequestContext, team_id: TeamId) -> Result<Vec<UserId>> {
	let memberships = store
		.related::<Team, TeamMembership>(ctx, team_id)
		.await?;
	Ok(memberships.into_iter().map(|m| m.user_id).collect())
}

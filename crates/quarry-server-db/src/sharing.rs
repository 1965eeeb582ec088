// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Granting, changing and revoking access to resources.
//!
//! Thin, logged wrappers over the policy entity. Every rule lives in
//! [`PolicyRules`](crate::entities::PolicyRules); these functions only shape the
//! calls.

use quarry_server_auth::{
	Audience, FlattenedResourceAudiencePolicy, PolicyId, Predicate, Privilege, RequestContext,
	ResourceAudiencePolicy, ResourceType,
};
use uuid::Uuid;

use crate::error::{DbError, Result};
use crate::store::{ListQuery, Store};

/// Grant `audience` a privilege on a resource.
#[tracing::instrument(skip(store, ctx), fields(user_id = ?ctx.identity().user_id()))]
pub async fn share(
	store: &Store,
	ctx: &RequestContext,
	resource_type: ResourceType,
	resource_id: Uuid,
	audience: Audience,
	privilege: Privilege,
) -> Result<ResourceAudiencePolicy> {
	let policy = ResourceAudiencePolicy::new(resource_type, resource_id, audience, privilege);
	let created = store.create(ctx, policy).await?;
	tracing::info!(policy_id = %created.id, "resource shared");
	Ok(created)
}

/// Change the privilege of an existing policy.
#[tracing::instrument(skip(store, ctx), fields(user_id = ?ctx.identity().user_id()))]
pub async fn change_privilege(
	store: &Store,
	ctx: &RequestContext,
	policy_id: PolicyId,
	privilege: Privilege,
) -> Result<ResourceAudiencePolicy> {
	let mut tx = store.begin(ctx).await?;
	let mut policy = tx
		.find::<ResourceAudiencePolicy>(policy_id)
		.await?
		.ok_or_else(|| DbError::NotFound(format!("policy {policy_id}")))?;
	policy.privilege = privilege;
	let updated = tx.update(policy).await?;
	tx.commit().await?;

	tracing::info!("privilege changed");
	Ok(updated)
}

/// Revoke a policy. Its flattened rows go with it.
#[tracing::instrument(skip(store, ctx), fields(user_id = ?ctx.identity().user_id()))]
pub async fn revoke(store: &Store, ctx: &RequestContext, policy_id: PolicyId) -> Result<()> {
	store.delete::<ResourceAudiencePolicy>(ctx, policy_id).await?;
	tracing::info!("policy revoked");
	Ok(())
}

/// Live policies on a resource, as visible to the caller.
pub async fn policies_for(
	store: &Store,
	ctx: &RequestContext,
	resource_type: ResourceType,
	resource_id: Uuid,
) -> Result<Vec<ResourceAudiencePolicy>> {
	let query = ListQuery::new().filter(resource_filter(resource_type, resource_id));
	store.list(ctx, &query).await
}

/// The caller's own effective privileges on a resource, from every path.
pub async fn effective_privileges(
	store: &Store,
	ctx: &RequestContext,
	resource_type: ResourceType,
	resource_id: Uuid,
) -> Result<Vec<Privilege>> {
	let query = ListQuery::new().filter(resource_filter(resource_type, resource_id));
	let rows: Vec<FlattenedResourceAudiencePolicy> = store.list(ctx, &query).await?;

	let mut privileges: Vec<Privilege> = rows.into_iter().map(|row| row.privilege).collect();
	privileges.sort_by_key(|p| p.as_str());
	privileges.dedup();
	Ok(privileges)
}

fn resource_filter(resource_type: ResourceType, resource_id: Uuid) -> Predicate {
	Predicate::eq("resource_type", resource_type).and(Predicate::eq("resource_id", resource_id))
}

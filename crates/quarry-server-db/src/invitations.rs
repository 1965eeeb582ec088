// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Organization invitations.
//!
//! # Security
//!
//! - The invitation token is returned once, at creation; only its SHA-256 is stored
//! - Acceptance needs the token and an identity whose email matches the invitation
//! - Only [`accept_invitation`] marks an invitation accepted; store updates cannot
//! - An accepted invitation is removed in the same transaction that grants the
//!   membership, so it cannot be replayed

use chrono::{Duration, Utc};
use quarry_server_auth::{
	AuthzError, InvitationId, OrgId, Predicate, Privilege, RequestContext, ResourceAudiencePolicy,
};
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::capability::Gate;
use crate::entities::{AuditLog, OrganizationInvitation};
use crate::error::{DbError, Result};
use crate::store::{ListQuery, ScopedTx, Store};

/// How long an invitation stays valid unless the caller says otherwise.
pub const DEFAULT_INVITATION_TTL_DAYS: i64 = 7;

const TOKEN_BYTES: usize = 32;

/// A fresh random token, hex-encoded.
pub fn generate_invitation_token() -> String {
	let mut bytes = [0u8; TOKEN_BYTES];
	rand::thread_rng().fill_bytes(&mut bytes);
	hex::encode(bytes)
}

/// SHA-256 of a token, hex-encoded.
pub fn hash_token(token: &str) -> String {
	let mut hasher = Sha256::new();
	hasher.update(token.as_bytes());
	hex::encode(hasher.finalize())
}

/// Invite `email` into the organization. Returns the invitation and its token.
#[tracing::instrument(skip(store, ctx, email), fields(actor = ?ctx.identity().user_id()))]
pub async fn create_invitation(
	store: &Store,
	ctx: &RequestContext,
	org_id: OrgId,
	email: &str,
	privilege: Privilege,
	ttl: Duration,
) -> Result<(OrganizationInvitation, String)> {
	let actor = ctx.identity().require_user()?;
	let token = generate_invitation_token();
	let invitation = OrganizationInvitation::new(
		org_id,
		email.trim(),
		privilege,
		hash_token(&token),
		actor,
		Utc::now() + ttl,
	);

	let mut tx = store.begin(ctx).await?;
	let created = tx.create(invitation).await?;
	tx.create(
		AuditLog::new(org_id, Some(actor), "invitation.created")
			.with_target("organization_invitation", created.id.into_inner()),
	)
	.await?;
	tx.commit().await?;

	tracing::info!(invitation_id = %created.id, "invitation created");
	Ok((created, token))
}

/// Accept an invitation as the current user, granting the invited membership.
///
/// Holding the token is what authorizes the self-grant: the invitation is
/// marked accepted here, inside the transaction that creates the membership
/// and then removes the invitation. No committed invitation is ever both live
/// and accepted.
#[tracing::instrument(skip(store, ctx, token), fields(actor = ?ctx.identity().user_id()))]
pub async fn accept_invitation(
	store: &Store,
	ctx: &RequestContext,
	token: &str,
) -> Result<ResourceAudiencePolicy> {
	let actor = ctx.identity().require_user()?;
	let mut tx = store.begin(ctx).await?;

	let query = ListQuery::new()
		.filter(Predicate::eq("token_hash", hash_token(token)))
		.limit(1);
	let invitation = tx
		.list::<OrganizationInvitation>(&query)
		.await?
		.into_iter()
		.next()
		.ok_or_else(|| DbError::NotFound("invitation".to_string()))?;

	let ctx = tx.context();
	let email = Gate::new(ctx, tx.conn()).actor_email().await?;
	if !email.is_some_and(|email| invitation.is_addressed_to(&email)) {
		return Err(DbError::NotFound("invitation".to_string()));
	}
	if invitation.is_expired(Utc::now()) {
		return Err(AuthzError::denied("invitation has expired").into());
	}

	mark_accepted(&mut tx, &invitation).await?;

	let org_id = invitation.org_id;
	let membership = tx
		.create(ResourceAudiencePolicy::org_membership(
			org_id,
			actor,
			invitation.privilege,
		))
		.await?;
	tx.delete::<OrganizationInvitation>(invitation.id).await?;
	tx.create(
		AuditLog::new(org_id, Some(actor), "invitation.accepted")
			.with_target("organization_invitation", invitation.id.into_inner()),
	)
	.await?;
	tx.commit().await?;

	tracing::info!(invitation_id = %invitation.id, org_id = %org_id, "invitation accepted");
	Ok(membership)
}

/// Stamp `accepted_at` on a live, unaccepted invitation.
///
/// Invitation updates through the store cannot touch `accepted_at`, so this is
/// the only writer of the column.
async fn mark_accepted(tx: &mut ScopedTx<'_>, invitation: &OrganizationInvitation) -> Result<()> {
	tx.context().checkpoint()?;
	let now = Utc::now().to_rfc3339();
	let result = sqlx::query(
		r#"
		UPDATE organization_invitations
		SET accepted_at = ?, updated_at = ?
		WHERE id = ? AND accepted_at IS NULL AND deleted_at IS NULL
		"#,
	)
	.bind(&now)
	.bind(&now)
	.bind(invitation.id.to_string())
	.execute(tx.conn())
	.await?;
	if result.rows_affected() == 0 {
		return Err(DbError::NotFound("invitation".to_string()));
	}
	Ok(())
}

/// Decline (as the invitee) or revoke (as an organization admin) an invitation.
#[tracing::instrument(skip(store, ctx), fields(actor = ?ctx.identity().user_id()))]
pub async fn decline_invitation(
	store: &Store,
	ctx: &RequestContext,
	invitation_id: InvitationId,
) -> Result<()> {
	store
		.delete::<OrganizationInvitation>(ctx, invitation_id)
		.await?;
	tracing::info!("invitation removed");
	Ok(())
}

/// Pending invitations visible to the caller.
pub async fn pending_invitations(
	store: &Store,
	ctx: &RequestContext,
) -> Result<Vec<OrganizationInvitation>> {
	let query = ListQuery::new().filter(Predicate::eq("accepted_at", Option::<String>::None));
	store.list(ctx, &query).await
}

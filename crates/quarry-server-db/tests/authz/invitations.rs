// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::Duration;
use quarry_server_auth::{Privilege, ResourceType};
use quarry_server_db::entities::{AuditLog, Dataset, OrganizationInvitation};
use quarry_server_db::invitations::{
	accept_invitation, create_invitation, decline_invitation, pending_invitations,
	DEFAULT_INVITATION_TTL_DAYS,
};
use quarry_server_db::{membership, sharing};

use super::support::{run_authz_cases, visible, AuthzCase, OrgFixture, Outcome, TestDb};

fn ttl() -> Duration {
	Duration::days(DEFAULT_INVITATION_TTL_DAYS)
}

#[tokio::test]
async fn invitee_accepts_and_joins() {
	let db = TestDb::new().await;
	let f = OrgFixture::new(&db).await;
	let store = &db.store;
	let newcomer = db.user("newcomer@acme.test").await;

	let (invitation, token) = create_invitation(
		store,
		&f.owner.ctx,
		f.org.id,
		"Newcomer@Acme.test",
		Privilege::Member,
		ttl(),
	)
	.await
	.unwrap();
	assert_eq!(pending_invitations(store, &newcomer.ctx).await.unwrap().len(), 1);
	assert_eq!(pending_invitations(store, &f.member.ctx).await.unwrap().len(), 0);

	let membership = accept_invitation(store, &newcomer.ctx, &token)
		.await
		.unwrap();
	assert_eq!(membership.resource_type, ResourceType::Organization);
	assert_eq!(membership.resource_id, f.org.id.into_inner());
	assert_eq!(membership.privilege, Privilege::Member);

	assert_eq!(
		sharing::effective_privileges(store, &newcomer.ctx, ResourceType::Organization, f.org.id.into_inner())
			.await
			.unwrap(),
		vec![Privilege::Member]
	);
	// Now a member: may create resources in the org.
	store
		.create_resource(&newcomer.ctx, Dataset::new(f.org.id, "Newcomer data"))
		.await
		.unwrap();

	assert!(store
		.find::<OrganizationInvitation>(&f.owner.ctx, invitation.id)
		.await
		.unwrap()
		.is_none());
	let actions: Vec<String> = store
		.list::<AuditLog>(&f.owner.ctx, &Default::default())
		.await
		.unwrap()
		.into_iter()
		.map(|entry| entry.action)
		.collect();
	assert_eq!(actions, vec!["invitation.created", "invitation.accepted"]);

	let replay = accept_invitation(store, &newcomer.ctx, &token).await;
	run_authz_cases(&[AuthzCase::new("accepted_token_cannot_be_replayed", replay, Outcome::NotFound)]);
}

#[tokio::test]
async fn test_invitation_authorization() {
	let db = TestDb::new().await;
	let f = OrgFixture::new(&db).await;
	let store = &db.store;
	let invitee = db.user("invitee@acme.test").await;

	let (_, token) = create_invitation(
		store,
		&f.owner.ctx,
		f.org.id,
		"invitee@acme.test",
		Privilege::Member,
		ttl(),
	)
	.await
	.unwrap();
	let (_, stale_token) = create_invitation(
		store,
		&f.owner.ctx,
		f.org.id,
		"invitee@acme.test",
		Privilege::Member,
		Duration::seconds(-1),
	)
	.await
	.unwrap();

	let cases = vec![
		AuthzCase::new(
			"member_cannot_invite",
			create_invitation(
				store,
				&f.member.ctx,
				f.org.id,
				"friend@acme.test",
				Privilege::Member,
				ttl(),
			)
			.await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"other_user_cannot_use_token",
			accept_invitation(store, &f.outsider.ctx, &token).await,
			Outcome::NotFound,
		),
		AuthzCase::new(
			"unknown_token_is_not_found",
			accept_invitation(store, &invitee.ctx, "not-a-token").await,
			Outcome::NotFound,
		),
		AuthzCase::new(
			"anonymous_cannot_accept",
			accept_invitation(store, &f.anonymous, &token).await,
			Outcome::NoIdentity,
		),
		AuthzCase::new(
			"expired_invitation_is_denied",
			accept_invitation(store, &invitee.ctx, &stale_token).await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"invitee_can_accept",
			accept_invitation(store, &invitee.ctx, &token).await,
			Outcome::Allowed,
		),
	];
	run_authz_cases(&cases);
}

#[tokio::test]
async fn invitee_cannot_self_grant_without_accepting() {
	let db = TestDb::new().await;
	let f = OrgFixture::new(&db).await;
	let store = &db.store;
	let invitee = db.user("eager@acme.test").await;

	create_invitation(
		store,
		&f.owner.ctx,
		f.org.id,
		"eager@acme.test",
		Privilege::Member,
		ttl(),
	)
	.await
	.unwrap();

	let cases = vec![
		AuthzCase::new(
			"pending_invitation_grants_nothing",
			membership::add_org_member(
				store,
				&invitee.ctx,
				f.org.id,
				invitee.id,
				Privilege::Member,
			)
			.await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"invitation_cannot_be_escalated",
			membership::add_org_member(
				store,
				&invitee.ctx,
				f.org.id,
				invitee.id,
				Privilege::SystemAdmin,
			)
			.await,
			Outcome::Denied,
		),
	];
	run_authz_cases(&cases);
	assert_eq!(visible::<AuditLog>(store, &invitee.ctx).await, 0);
}

#[tokio::test]
async fn acceptance_requires_the_token() {
	let db = TestDb::new().await;
	let f = OrgFixture::new(&db).await;
	let store = &db.store;
	let invitee = db.user("keen@acme.test").await;
	let org_id = f.org.id.into_inner();

	let (invitation, token) = create_invitation(
		store,
		&f.owner.ctx,
		f.org.id,
		"keen@acme.test",
		Privilege::Member,
		ttl(),
	)
	.await
	.unwrap();
	let mut stamped = invitation.clone();
	stamped.accepted_at = Some(chrono::Utc::now());

	let cases = vec![
		AuthzCase::new(
			"invitee_cannot_stamp_acceptance",
			store.update(&invitee.ctx, stamped.clone()).await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"admin_cannot_stamp_acceptance",
			store.update(&f.owner.ctx, stamped).await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"tokenless_self_grant_is_denied",
			membership::add_org_member(store, &invitee.ctx, f.org.id, invitee.id, Privilege::Member)
				.await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"token_holder_can_accept",
			accept_invitation(store, &invitee.ctx, &token).await,
			Outcome::Allowed,
		),
	];
	run_authz_cases(&cases);

	membership::remove_org_member(store, &f.owner.ctx, f.org.id, invitee.id)
		.await
		.unwrap();

	let cases = vec![AuthzCase::new(
		"removed_member_cannot_grant_themself_back",
		membership::add_org_member(store, &invitee.ctx, f.org.id, invitee.id, Privilege::Member)
			.await,
		Outcome::Denied,
	)];
	run_authz_cases(&cases);
	assert!(
		sharing::effective_privileges(store, &invitee.ctx, ResourceType::Organization, org_id)
			.await
			.unwrap()
			.is_empty()
	);
}

#[tokio::test]
async fn invitee_declines_and_admin_revokes() {
	let db = TestDb::new().await;
	let f = OrgFixture::new(&db).await;
	let store = &db.store;
	let invitee = db.user("maybe@acme.test").await;

	let (first, _) = create_invitation(
		store,
		&f.owner.ctx,
		f.org.id,
		"maybe@acme.test",
		Privilege::Member,
		ttl(),
	)
	.await
	.unwrap();
	let (second, _) = create_invitation(
		store,
		&f.owner.ctx,
		f.org.id,
		"someone@else.test",
		Privilege::Member,
		ttl(),
	)
	.await
	.unwrap();

	let cases = vec![
		AuthzCase::new(
			"member_cannot_see_invitation",
			decline_invitation(store, &f.member.ctx, first.id).await,
			Outcome::NotFound,
		),
		AuthzCase::new(
			"invitee_can_decline",
			decline_invitation(store, &invitee.ctx, first.id).await,
			Outcome::Allowed,
		),
		AuthzCase::new(
			"invitee_cannot_see_others_invitations",
			decline_invitation(store, &invitee.ctx, second.id).await,
			Outcome::NotFound,
		),
		AuthzCase::new(
			"admin_can_revoke",
			decline_invitation(store, &f.owner.ctx, second.id).await,
			Outcome::Allowed,
		),
	];
	run_authz_cases(&cases);
	assert!(pending_invitations(store, &f.owner.ctx).await.unwrap().is_empty());
}

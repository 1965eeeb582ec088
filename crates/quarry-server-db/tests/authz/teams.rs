// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use quarry_server_auth::{Audience, Privilege, ResourceType, Team, TeamMembership, UserId};
use quarry_server_db::entities::{Dataset, Page, Sheet};
use quarry_server_db::{membership, sharing, verify_closure};

use super::support::{run_authz_cases, visible, AuthzCase, OrgFixture, Outcome, TestDb};

#[tokio::test]
async fn team_grant_follows_membership() {
	let db = TestDb::new().await;
	let f = OrgFixture::new(&db).await;
	let store = &db.store;
	let alice = db.user("alice@acme.test").await;
	let bob = db.user("bob@acme.test").await;

	let team = store
		.create(&f.owner.ctx, Team::new(f.org.id, "Analysts"))
		.await
		.unwrap();
	membership::add_team_member(store, &f.owner.ctx, team.id, alice.id)
		.await
		.unwrap();
	sharing::share(
		store,
		&f.owner.ctx,
		ResourceType::Page,
		f.page.id.into_inner(),
		Audience::Team(team.id),
		Privilege::Admin,
	)
	.await
	.unwrap();
	// Joining after the grant exists still reaches it.
	membership::add_team_member(store, &f.owner.ctx, team.id, bob.id)
		.await
		.unwrap();

	for user in [&alice, &bob] {
		store
			.create(&user.ctx, Sheet::new(f.page.id, "Scratch", 9))
			.await
			.unwrap();
	}

	membership::remove_team_member(store, &f.owner.ctx, team.id, alice.id)
		.await
		.unwrap();

	let cases = vec![
		AuthzCase::new(
			"remaining_member_is_still_admin",
			store
				.create(&bob.ctx, Sheet::new(f.page.id, "Kept", 10))
				.await,
			Outcome::Allowed,
		),
		AuthzCase::new(
			"removed_member_lost_admin",
			store
				.create(&alice.ctx, Sheet::new(f.page.id, "Lost", 11))
				.await,
			Outcome::Denied,
		),
	];
	run_authz_cases(&cases);
	assert_eq!(visible::<Page>(store, &alice.ctx).await, 0);
	assert_eq!(
		membership::team_members(store, &f.owner.ctx, team.id)
			.await
			.unwrap(),
		vec![bob.id]
	);
}

#[tokio::test]
async fn deleting_team_retires_its_grants() {
	let db = TestDb::new().await;
	let f = OrgFixture::new(&db).await;
	let store = &db.store;
	let carol = db.user("carol@acme.test").await;

	let team = store
		.create(&f.owner.ctx, Team::new(f.org.id, "Temporary"))
		.await
		.unwrap();
	membership::add_team_member(store, &f.owner.ctx, team.id, carol.id)
		.await
		.unwrap();
	sharing::share(
		store,
		&f.owner.ctx,
		ResourceType::Dataset,
		f.dataset.id.into_inner(),
		Audience::Team(team.id),
		Privilege::Viewer,
	)
	.await
	.unwrap();
	assert_eq!(visible::<Dataset>(store, &carol.ctx).await, 1);

	store.delete::<Team>(&f.owner.ctx, team.id).await.unwrap();

	assert_eq!(visible::<Dataset>(store, &carol.ctx).await, 0);
	assert_eq!(visible::<TeamMembership>(store, &f.owner.ctx).await, 0);
	assert!(verify_closure(db.pool())
		.await
		.unwrap()
		.is_consistent());
}

#[tokio::test]
async fn test_team_authorization() {
	let db = TestDb::new().await;
	let f = OrgFixture::new(&db).await;
	let store = &db.store;

	let team = store
		.create(&f.owner.ctx, Team::new(f.org.id, "Core"))
		.await
		.unwrap();
	let mut renamed = team.clone();
	renamed.name = "Renamed".to_string();

	let cases = vec![
		AuthzCase::new(
			"org_member_cannot_create_team",
			store
				.create(&f.member.ctx, Team::new(f.org.id, "Shadow"))
				.await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"org_member_cannot_rename_team",
			store.update(&f.member.ctx, renamed.clone()).await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"outsider_cannot_see_team",
			store.update(&f.outsider.ctx, renamed.clone()).await,
			Outcome::NotFound,
		),
		AuthzCase::new(
			"org_member_cannot_join_team",
			membership::add_team_member(store, &f.member.ctx, team.id, f.member.id).await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"admin_cannot_add_unknown_user",
			membership::add_team_member(store, &f.owner.ctx, team.id, UserId::generate()).await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"admin_can_add_member",
			membership::add_team_member(store, &f.owner.ctx, team.id, f.member.id).await,
			Outcome::Allowed,
		),
		AuthzCase::new(
			"org_member_cannot_remove_member",
			membership::remove_team_member(store, &f.member.ctx, team.id, f.member.id).await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"removing_non_member_is_not_found",
			membership::remove_team_member(store, &f.owner.ctx, team.id, f.outsider.id).await,
			Outcome::NotFound,
		),
		AuthzCase::new(
			"admin_can_rename_team",
			store.update(&f.owner.ctx, renamed).await,
			Outcome::Allowed,
		),
	];
	run_authz_cases(&cases);

	assert_eq!(visible::<Team>(store, &f.member.ctx).await, 1);
	assert_eq!(visible::<Team>(store, &f.outsider.ctx).await, 0);
	assert_eq!(visible::<TeamMembership>(store, &f.member.ctx).await, 1);
	assert_eq!(visible::<TeamMembership>(store, &f.outsider.ctx).await, 0);
}

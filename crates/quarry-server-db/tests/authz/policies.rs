// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use quarry_server_auth::{
	Audience, AuthzError, Privilege, ResourceAudiencePolicy, ResourceType, Team, TeamId,
};
use quarry_server_db::{membership, sharing, DbError, Store};
use uuid::Uuid;

use super::support::{run_authz_cases, AuthzCase, OrgFixture, Outcome, TestDb, TestUser};

/// The live policy `user` holds directly on the page.
async fn direct_page_policy(
	store: &Store,
	viewer: &TestUser,
	page_id: Uuid,
	user: &TestUser,
) -> ResourceAudiencePolicy {
	sharing::policies_for(store, &viewer.ctx, ResourceType::Page, page_id)
		.await
		.unwrap()
		.into_iter()
		.find(|p| p.audience() == Audience::User(user.id))
		.unwrap()
}

#[tokio::test]
async fn sole_admin_cannot_demote_or_revoke_self() {
	let db = TestDb::new().await;
	let f = OrgFixture::new(&db).await;
	let store = &db.store;
	let page_id = f.page.id.into_inner();
	let own = direct_page_policy(store, &f.owner, page_id, &f.owner).await;
	assert_eq!(own.privilege, Privilege::Admin);

	let mut same = own.clone();
	same.metadata = Some(serde_json::json!({ "note": "creator" }));

	let cases = vec![
		AuthzCase::new(
			"sole_admin_cannot_demote_self",
			sharing::change_privilege(store, &f.owner.ctx, own.id, Privilege::Editor).await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"sole_admin_cannot_revoke_self",
			sharing::revoke(store, &f.owner.ctx, own.id).await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"sole_admin_can_edit_metadata_of_own_grant",
			store.update(&f.owner.ctx, same).await,
			Outcome::Allowed,
		),
	];
	run_authz_cases(&cases);

	assert_eq!(
		sharing::effective_privileges(store, &f.owner.ctx, ResourceType::Page, page_id)
			.await
			.unwrap(),
		vec![Privilege::Admin]
	);
}

#[tokio::test]
async fn team_admin_path_allows_direct_demotion() {
	let db = TestDb::new().await;
	let f = OrgFixture::new(&db).await;
	let store = &db.store;
	let page_id = f.page.id.into_inner();

	let team = store
		.create(&f.owner.ctx, Team::new(f.org.id, "Editors"))
		.await
		.unwrap();
	membership::add_team_member(store, &f.owner.ctx, team.id, f.owner.id)
		.await
		.unwrap();
	let team_grant = sharing::share(
		store,
		&f.owner.ctx,
		ResourceType::Page,
		page_id,
		Audience::Team(team.id),
		Privilege::Admin,
	)
	.await
	.unwrap();
	let own = direct_page_policy(store, &f.owner, page_id, &f.owner).await;

	let cases = vec![
		AuthzCase::new(
			"admin_via_team_can_demote_direct_grant",
			sharing::change_privilege(store, &f.owner.ctx, own.id, Privilege::Viewer).await,
			Outcome::Allowed,
		),
		AuthzCase::new(
			"last_remaining_team_path_cannot_be_revoked",
			sharing::revoke(store, &f.owner.ctx, team_grant.id).await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"last_remaining_team_path_cannot_be_demoted",
			sharing::change_privilege(store, &f.owner.ctx, team_grant.id, Privilege::Editor).await,
			Outcome::Denied,
		),
	];
	run_authz_cases(&cases);

	assert_eq!(
		sharing::effective_privileges(store, &f.owner.ctx, ResourceType::Page, page_id)
			.await
			.unwrap(),
		vec![Privilege::Admin, Privilege::Viewer]
	);
}

#[tokio::test]
async fn test_policy_authorization() {
	let db = TestDb::new().await;
	let f = OrgFixture::new(&db).await;
	let store = &db.store;
	let page_id = f.page.id.into_inner();
	let member_grant = direct_page_policy(store, &f.owner, page_id, &f.member).await;

	let mut regranted = member_grant.clone();
	regranted.audience_id = f.outsider.id.into_inner();

	let cases = vec![
		AuthzCase::new(
			"editor_cannot_share_page",
			sharing::share(
				store,
				&f.member.ctx,
				ResourceType::Page,
				page_id,
				Audience::User(f.outsider.id),
				Privilege::Viewer,
			)
			.await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"editor_cannot_promote_self",
			sharing::change_privilege(store, &f.member.ctx, member_grant.id, Privilege::Admin).await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"outsider_cannot_see_policy",
			sharing::revoke(store, &f.outsider.ctx, member_grant.id).await,
			Outcome::NotFound,
		),
		AuthzCase::new(
			"admin_cannot_reassign_grantee",
			store.update(&f.owner.ctx, regranted).await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"admin_cannot_grant_to_missing_team",
			sharing::share(
				store,
				&f.owner.ctx,
				ResourceType::Page,
				page_id,
				Audience::Team(TeamId::generate()),
				Privilege::Viewer,
			)
			.await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"admin_can_demote_someone_else",
			sharing::change_privilege(store, &f.owner.ctx, member_grant.id, Privilege::Viewer).await,
			Outcome::Allowed,
		),
		AuthzCase::new(
			"admin_can_revoke_someone_else",
			sharing::revoke(store, &f.owner.ctx, member_grant.id).await,
			Outcome::Allowed,
		),
	];
	run_authz_cases(&cases);

	assert!(
		sharing::effective_privileges(store, &f.member.ctx, ResourceType::Page, page_id)
			.await
			.unwrap()
			.is_empty()
	);
	assert!(
		sharing::policies_for(store, &f.outsider.ctx, ResourceType::Page, page_id)
			.await
			.unwrap()
			.is_empty()
	);
}

#[tokio::test]
async fn out_of_vocabulary_privilege_is_invalid() {
	let db = TestDb::new().await;
	let f = OrgFixture::new(&db).await;

	let err = sharing::share(
		&db.store,
		&f.owner.ctx,
		ResourceType::Page,
		f.page.id.into_inner(),
		Audience::User(f.outsider.id),
		Privilege::Member,
	)
	.await
	.unwrap_err();
	assert!(matches!(err, DbError::Authz(AuthzError::InvalidGrant(_))));

	let err = membership::add_org_member(
		&db.store,
		&f.owner.ctx,
		f.org.id,
		f.outsider.id,
		Privilege::Editor,
	)
	.await
	.unwrap_err();
	assert!(matches!(err, DbError::Authz(AuthzError::InvalidGrant(_))));
}

#[tokio::test]
async fn org_audience_reaches_every_member() {
	let db = TestDb::new().await;
	let f = OrgFixture::new(&db).await;
	let store = &db.store;
	let late = db.user("late@acme.test").await;

	let dataset_id = f.dataset.id.into_inner();
	sharing::share(
		store,
		&f.owner.ctx,
		ResourceType::Dataset,
		dataset_id,
		Audience::Organization(f.org.id),
		Privilege::Viewer,
	)
	.await
	.unwrap();
	membership::add_org_member(store, &f.owner.ctx, f.org.id, late.id, Privilege::Member)
		.await
		.unwrap();

	assert_eq!(
		sharing::effective_privileges(store, &late.ctx, ResourceType::Dataset, dataset_id)
			.await
			.unwrap(),
		vec![Privilege::Viewer]
	);

	membership::remove_org_member(store, &f.owner.ctx, f.org.id, late.id)
		.await
		.unwrap();
	assert!(
		sharing::effective_privileges(store, &late.ctx, ResourceType::Dataset, dataset_id)
			.await
			.unwrap()
			.is_empty()
	);
	// The outsider never joined.
	assert!(
		sharing::effective_privileges(store, &f.outsider.ctx, ResourceType::Dataset, dataset_id)
			.await
			.unwrap()
			.is_empty()
	);
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use quarry_server_auth::Predicate;
use quarry_server_db::entities::{Dataset, DatasetAction, Rule};
use quarry_server_db::ListQuery;

use super::support::{run_authz_cases, visible, AuthzCase, OrgFixture, Outcome, TestDb};

#[tokio::test]
async fn reads_fail_closed() {
	let db = TestDb::new().await;
	let f = OrgFixture::new(&db).await;
	let store = &db.store;

	// No flattened row: zero rows and no error.
	assert_eq!(visible::<Dataset>(store, &f.outsider.ctx).await, 0);
	assert_eq!(visible::<Rule>(store, &f.outsider.ctx).await, 0);
	assert_eq!(visible::<Dataset>(store, &f.anonymous).await, 0);
	assert!(store
		.find::<Dataset>(&f.outsider.ctx, f.dataset.id)
		.await
		.unwrap()
		.is_none());
	assert_eq!(
		store
			.count::<Dataset>(&f.outsider.ctx, Predicate::Always)
			.await
			.unwrap(),
		0
	);

	assert_eq!(visible::<Dataset>(store, &f.member.ctx).await, 1);
	assert_eq!(visible::<Rule>(store, &f.member.ctx).await, 1);
}

#[tokio::test]
async fn caller_filters_are_kept() {
	let db = TestDb::new().await;
	let f = OrgFixture::new(&db).await;
	let store = &db.store;
	store
		.create_resource(&f.owner.ctx, Dataset::new(f.org.id, "Costs"))
		.await
		.unwrap();

	let by_name = ListQuery::new().filter(Predicate::eq("name", "Costs"));
	let owner_rows: Vec<Dataset> = store.list(&f.owner.ctx, &by_name).await.unwrap();
	assert_eq!(owner_rows.len(), 1);

	// The member holds only "Revenue"; the filter cannot widen that.
	let member_rows: Vec<Dataset> = store.list(&f.member.ctx, &by_name).await.unwrap();
	assert!(member_rows.is_empty());

	let paged: Vec<Dataset> = store
		.list(&f.owner.ctx, &ListQuery::new().limit(1).offset(1))
		.await
		.unwrap();
	assert_eq!(paged.len(), 1);
	assert_eq!(paged[0].name, "Costs");
}

#[tokio::test]
async fn test_dataset_authorization() {
	let db = TestDb::new().await;
	let f = OrgFixture::new(&db).await;
	let store = &db.store;

	let mut renamed = f.dataset.clone();
	renamed.name = "Renamed".to_string();
	let mut moved = f.dataset.clone();
	moved.org_id = quarry_server_auth::OrgId::generate();

	let cases = vec![
		AuthzCase::new(
			"member_can_create_dataset_in_org",
			store
				.create_resource(&f.member.ctx, Dataset::new(f.org.id, "Member data"))
				.await,
			Outcome::Allowed,
		),
		AuthzCase::new(
			"outsider_cannot_create_dataset_in_org",
			store
				.create_resource(&f.outsider.ctx, Dataset::new(f.org.id, "Intrusion"))
				.await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"anonymous_cannot_create_dataset",
			store
				.create_resource(&f.anonymous, Dataset::new(f.org.id, "Ghost"))
				.await,
			Outcome::NoIdentity,
		),
		AuthzCase::new(
			"viewer_cannot_rename_dataset",
			store.update(&f.member.ctx, renamed.clone()).await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"outsider_rename_is_not_found",
			store.update(&f.outsider.ctx, renamed.clone()).await,
			Outcome::NotFound,
		),
		AuthzCase::new(
			"viewer_cannot_add_rule",
			store
				.create(&f.member.ctx, Rule::new(f.dataset.id, "sneaky", "true"))
				.await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"viewer_cannot_delete_rule",
			store.delete::<Rule>(&f.member.ctx, f.rule.id).await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"viewer_cannot_add_action",
			store
				.create(&f.member.ctx, DatasetAction::new(f.dataset.id, "export"))
				.await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"admin_cannot_move_dataset_between_orgs",
			store.update(&f.owner.ctx, moved).await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"admin_can_rename_dataset",
			store.update(&f.owner.ctx, renamed).await,
			Outcome::Allowed,
		),
		AuthzCase::new(
			"admin_can_delete_rule",
			store.delete::<Rule>(&f.owner.ctx, f.rule.id).await,
			Outcome::Allowed,
		),
	];
	run_authz_cases(&cases);
}

#[tokio::test]
async fn failed_creator_grant_leaves_no_dataset() {
	let db = TestDb::new().await;
	let f = OrgFixture::new(&db).await;
	sqlx::query(
		r#"
		CREATE TRIGGER reject_dataset_grants
		BEFORE INSERT ON resource_audience_policies
		WHEN NEW.resource_type = 'dataset'
		BEGIN
			SELECT RAISE(ABORT, 'policy store unavailable');
		END
		"#,
	)
	.execute(db.pool())
	.await
	.unwrap();
	let before = db.raw_count("datasets").await;

	let err = db
		.store
		.create_resource(&f.member.ctx, Dataset::new(f.org.id, "Doomed"))
		.await
		.unwrap_err();
	assert!(matches!(err, quarry_server_db::DbError::Sqlx(_)));
	assert_eq!(db.raw_count("datasets").await, before);
}

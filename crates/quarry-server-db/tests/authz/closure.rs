// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use quarry_server_auth::{Privilege, ResourceType};
use quarry_server_db::entities::Dataset;
use quarry_server_db::{rebuild_closure, sharing, verify_closure};

use super::support::{visible, OrgFixture, TestDb};

#[tokio::test]
async fn maintained_closure_verifies_clean() {
	let db = TestDb::new().await;
	let _f = OrgFixture::new(&db).await;

	let diff = verify_closure(db.pool()).await.unwrap();
	assert!(diff.is_consistent(), "unexpected drift: {diff:?}");
}

#[tokio::test]
async fn rebuild_repairs_drift() {
	let db = TestDb::new().await;
	let f = OrgFixture::new(&db).await;
	let page_id = f.page.id.into_inner();

	// A lost row and a row with the wrong privilege.
	sqlx::query(
		r#"
		UPDATE flattened_resource_audience_policies
		SET deleted_at = updated_at
		WHERE user_id = ? AND resource_type = 'dataset' AND deleted_at IS NULL
		"#,
	)
	.bind(f.member.id.to_string())
	.execute(db.pool())
	.await
	.unwrap();
	sqlx::query(
		r#"
		UPDATE flattened_resource_audience_policies
		SET privilege = 'admin'
		WHERE user_id = ? AND resource_type = 'page' AND deleted_at IS NULL
		"#,
	)
	.bind(f.member.id.to_string())
	.execute(db.pool())
	.await
	.unwrap();
	assert_eq!(visible::<Dataset>(&db.store, &f.member.ctx).await, 0);

	let diff = verify_closure(db.pool()).await.unwrap();
	assert_eq!(diff.missing.len(), 2);
	assert_eq!(diff.stale.len(), 1);
	assert_eq!(diff.stale[0].privilege, Privilege::Admin);

	let repaired = rebuild_closure(db.pool()).await.unwrap();
	assert_eq!(repaired.missing.len(), 2);
	assert!(verify_closure(db.pool()).await.unwrap().is_consistent());

	assert_eq!(visible::<Dataset>(&db.store, &f.member.ctx).await, 1);
	assert_eq!(
		sharing::effective_privileges(&db.store, &f.member.ctx, ResourceType::Page, page_id)
			.await
			.unwrap(),
		vec![Privilege::Editor]
	);

	let again = rebuild_closure(db.pool()).await.unwrap();
	assert!(again.is_consistent());
}

#[tokio::test]
async fn revoked_policy_leaves_no_live_rows() {
	let db = TestDb::new().await;
	let f = OrgFixture::new(&db).await;
	let dataset_id = f.dataset.id.into_inner();

	let grant = sharing::policies_for(&db.store, &f.owner.ctx, ResourceType::Dataset, dataset_id)
		.await
		.unwrap()
		.into_iter()
		.find(|p| p.audience_id == f.member.id.into_inner())
		.unwrap();
	sharing::revoke(&db.store, &f.owner.ctx, grant.id)
		.await
		.unwrap();

	let live: i64 = sqlx::query_scalar(
		"SELECT COUNT(*) FROM flattened_resource_audience_policies WHERE resource_audience_policy_id = ? AND deleted_at IS NULL",
	)
	.bind(grant.id.to_string())
	.fetch_one(db.pool())
	.await
	.unwrap();
	assert_eq!(live, 0);
	assert!(verify_closure(db.pool()).await.unwrap().is_consistent());
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use quarry_server_auth::WidgetId;
use quarry_server_db::entities::{Page, Sheet, Widget, WidgetInstance};
use quarry_server_db::testing::insert_test_widget;
use serde_json::json;

use super::support::{run_authz_cases, visible, AuthzCase, OrgFixture, Outcome, TestDb};

#[tokio::test]
async fn test_page_authorization() {
	let db = TestDb::new().await;
	let f = OrgFixture::new(&db).await;
	let store = &db.store;

	let sheet = store
		.create(&f.owner.ctx, Sheet::new(f.page.id, "Overview", 0))
		.await
		.unwrap();
	let chart = insert_test_widget(db.pool(), "chart", "Line chart").await;

	let mut retitled = f.page.clone();
	retitled.title = "Edited by member".to_string();
	let mut moved_sheet = sheet.clone();
	moved_sheet.position = 3;

	let cases = vec![
		AuthzCase::new(
			"org_member_cannot_create_page",
			store
				.create_resource(&f.member.ctx, Page::new(f.org.id, "Rogue"))
				.await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"outsider_cannot_create_page",
			store
				.create_resource(&f.outsider.ctx, Page::new(f.org.id, "Stray"))
				.await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"editor_can_retitle_page",
			store.update(&f.member.ctx, retitled).await,
			Outcome::Allowed,
		),
		AuthzCase::new(
			"editor_can_reorder_sheet",
			store.update(&f.member.ctx, moved_sheet).await,
			Outcome::Allowed,
		),
		AuthzCase::new(
			"editor_cannot_add_sheet",
			store
				.create(&f.member.ctx, Sheet::new(f.page.id, "Extra", 1))
				.await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"editor_cannot_place_widget",
			store
				.create(&f.member.ctx, WidgetInstance::new(sheet.id, chart))
				.await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"editor_cannot_delete_page",
			store.delete::<Page>(&f.member.ctx, f.page.id).await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"outsider_cannot_see_sheet",
			store.delete::<Sheet>(&f.outsider.ctx, sheet.id).await,
			Outcome::NotFound,
		),
		AuthzCase::new(
			"admin_cannot_place_uncatalogued_widget",
			store
				.create(&f.owner.ctx, WidgetInstance::new(sheet.id, WidgetId::generate()))
				.await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"admin_can_place_widget",
			store
				.create(
					&f.owner.ctx,
					WidgetInstance::new(sheet.id, chart).with_config(json!({ "metric": "revenue" })),
				)
				.await,
			Outcome::Allowed,
		),
		AuthzCase::new(
			"nobody_can_add_to_widget_catalog",
			store
				.create(
					&f.owner.ctx,
					Widget {
						id: WidgetId::generate(),
						kind: "table".to_string(),
						name: "Pivot".to_string(),
						created_at: chrono::Utc::now(),
						updated_at: chrono::Utc::now(),
						deleted_at: None,
					},
				)
				.await,
			Outcome::InsertForbidden,
		),
	];
	run_authz_cases(&cases);

	assert_eq!(visible::<WidgetInstance>(store, &f.member.ctx).await, 1);
	assert_eq!(visible::<WidgetInstance>(store, &f.outsider.ctx).await, 0);
	assert_eq!(visible::<Widget>(store, &f.outsider.ctx).await, 1);
	assert_eq!(visible::<Widget>(store, &f.anonymous).await, 0);
}

#[tokio::test]
async fn editor_cannot_move_widget_to_another_sheet() {
	let db = TestDb::new().await;
	let f = OrgFixture::new(&db).await;
	let store = &db.store;

	let first = store
		.create(&f.owner.ctx, Sheet::new(f.page.id, "First", 0))
		.await
		.unwrap();
	let second = store
		.create(&f.owner.ctx, Sheet::new(f.page.id, "Second", 1))
		.await
		.unwrap();
	let widget = insert_test_widget(db.pool(), "kpi", "Big number").await;
	let placed = store
		.create(&f.owner.ctx, WidgetInstance::new(first.id, widget))
		.await
		.unwrap();

	let mut moved = placed.clone();
	moved.sheet_id = second.id;
	let mut configured = placed.clone();
	configured.config = Some(json!({ "label": "MRR" }));

	let cases = vec![
		AuthzCase::new(
			"editor_cannot_move_widget",
			store.update(&f.member.ctx, moved).await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"editor_can_configure_widget",
			store.update(&f.member.ctx, configured).await,
			Outcome::Allowed,
		),
		AuthzCase::new(
			"editor_cannot_remove_widget",
			store
				.delete::<WidgetInstance>(&f.member.ctx, placed.id)
				.await,
			Outcome::Denied,
		),
	];
	run_authz_cases(&cases);
}

#[tokio::test]
async fn deleting_page_hides_its_children() {
	let db = TestDb::new().await;
	let f = OrgFixture::new(&db).await;
	let store = &db.store;

	let sheet = store
		.create(&f.owner.ctx, Sheet::new(f.page.id, "Only", 0))
		.await
		.unwrap();
	let widget = insert_test_widget(db.pool(), "chart", "Bar chart").await;
	store
		.create(&f.owner.ctx, WidgetInstance::new(sheet.id, widget))
		.await
		.unwrap();
	assert_eq!(visible::<Sheet>(store, &f.member.ctx).await, 1);

	store.delete::<Page>(&f.owner.ctx, f.page.id).await.unwrap();

	assert_eq!(visible::<Page>(store, &f.member.ctx).await, 0);
	assert_eq!(visible::<Sheet>(store, &f.member.ctx).await, 0);
	assert_eq!(visible::<WidgetInstance>(store, &f.member.ctx).await, 0);
	assert_eq!(visible::<Sheet>(store, &f.owner.ctx).await, 0);
}

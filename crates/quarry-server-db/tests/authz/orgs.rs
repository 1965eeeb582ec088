// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use quarry_server_auth::{AuthzError, Identity, RequestContext, Role};
use quarry_server_db::entities::{AuditLog, Dataset, Organization, PaymentsConfig};
use quarry_server_db::{DbError, ListQuery, Registry, Store};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use super::support::{run_authz_cases, visible, AuthzCase, OrgFixture, Outcome, TestDb};

#[tokio::test]
async fn platform_admin_creates_org_and_user_cannot() {
	let db = TestDb::new().await;
	let admin = db.platform_admin("root@quarry.test").await;
	let user = db.user("user@quarry.test").await;

	let org = db
		.store
		.create_resource(&admin.ctx, Organization::new("Created"))
		.await
		.unwrap();
	assert!(db
		.store
		.find::<Organization>(&admin.ctx, org.id)
		.await
		.unwrap()
		.is_some());

	let err = db
		.store
		.create_resource(&user.ctx, Organization::new("Refused"))
		.await
		.unwrap_err();
	assert!(err.is_permission_denied());
	assert_eq!(db.raw_count("organizations").await, 1);
}

#[tokio::test]
async fn test_org_authorization() {
	let db = TestDb::new().await;
	let f = OrgFixture::new(&db).await;
	let store = &db.store;

	let mut renamed = f.org.clone();
	renamed.name = "Renamed".to_string();

	let cases = vec![
		AuthzCase::new(
			"member_can_get_own_org",
			store
				.find::<Organization>(&f.member.ctx, f.org.id)
				.await
				.and_then(|o| o.ok_or(DbError::NotFound("org".into()))),
			Outcome::Allowed,
		),
		AuthzCase::new(
			"outsider_cannot_get_org",
			store
				.find::<Organization>(&f.outsider.ctx, f.org.id)
				.await
				.and_then(|o| o.ok_or(DbError::NotFound("org".into()))),
			Outcome::NotFound,
		),
		AuthzCase::new(
			"member_cannot_update_org",
			store.update(&f.member.ctx, renamed.clone()).await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"member_can_write_audit_log",
			store
				.create(&f.member.ctx, AuditLog::new(f.org.id, Some(f.member.id), "viewed"))
				.await,
			Outcome::Allowed,
		),
		AuthzCase::new(
			"outsider_cannot_write_audit_log",
			store
				.create(&f.outsider.ctx, AuditLog::new(f.org.id, Some(f.outsider.id), "probe"))
				.await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"member_cannot_create_payments_config",
			store
				.create_resource(&f.member.ctx, PaymentsConfig::new(f.org.id, "stripe"))
				.await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"owner_can_create_payments_config",
			store
				.create_resource(&f.owner.ctx, PaymentsConfig::new(f.org.id, "stripe"))
				.await,
			Outcome::Allowed,
		),
		AuthzCase::new(
			"owner_can_update_org",
			store.update(&f.owner.ctx, renamed).await,
			Outcome::Allowed,
		),
	];
	run_authz_cases(&cases);

	assert_eq!(visible::<AuditLog>(store, &f.member.ctx).await, 1);
	assert_eq!(visible::<AuditLog>(store, &f.outsider.ctx).await, 0);
}

#[tokio::test]
async fn audit_log_is_immutable_for_everyone() {
	let db = TestDb::new().await;
	let f = OrgFixture::new(&db).await;
	let entry = db
		.store
		.create(&f.owner.ctx, AuditLog::new(f.org.id, Some(f.owner.id), "org.configured"))
		.await
		.unwrap();

	let mut edited = entry.clone();
	edited.action = "org.erased".to_string();
	let cases = vec![
		AuthzCase::new(
			"owner_cannot_edit_audit_log",
			db.store.update(&f.owner.ctx, edited).await,
			Outcome::Denied,
		),
		AuthzCase::new(
			"owner_cannot_delete_audit_log",
			db.store.delete::<AuditLog>(&f.owner.ctx, entry.id).await,
			Outcome::Denied,
		),
	];
	run_authz_cases(&cases);
	assert_eq!(visible::<AuditLog>(&db.store, &f.owner.ctx).await, 1);
}

#[tokio::test]
async fn deleting_org_retires_every_membership() {
	let db = TestDb::new().await;
	let f = OrgFixture::new(&db).await;

	db.store
		.delete::<Organization>(&f.owner.ctx, f.org.id)
		.await
		.unwrap();

	// Org-scoped access is gone; direct resource grants are not org policies.
	assert_eq!(visible::<Organization>(&db.store, &f.member.ctx).await, 0);
	assert_eq!(visible::<AuditLog>(&db.store, &f.member.ctx).await, 0);
	assert_eq!(visible::<Dataset>(&db.store, &f.member.ctx).await, 1);
	let err = db
		.store
		.create_resource(&f.member.ctx, Dataset::new(f.org.id, "After"))
		.await
		.unwrap_err();
	assert!(err.is_permission_denied());
}

#[tokio::test]
async fn unregistered_entity_is_misconfigured() {
	let db = TestDb::new().await;
	let admin = db.platform_admin("ops@quarry.test").await;
	let bare = Store::new(db.pool().clone(), Arc::new(Registry::new()));

	let err = bare
		.list::<Organization>(&admin.ctx, &ListQuery::new())
		.await
		.unwrap_err();
	assert!(matches!(
		err.authz(),
		Some(AuthzError::MisconfiguredEntity { entity: "organizations" })
	));

	let err = bare
		.create_resource(&admin.ctx, Organization::new("Nope"))
		.await
		.unwrap_err();
	assert!(matches!(err.authz(), Some(AuthzError::MisconfiguredEntity { .. })));
	assert_eq!(db.raw_count("organizations").await, 0);
}

#[tokio::test]
async fn cancelled_request_stops_before_any_query() {
	let db = TestDb::new().await;
	let admin = db.platform_admin("cancel@quarry.test").await;
	let token = CancellationToken::new();
	token.cancel();
	let ctx = RequestContext::new(Identity::user(admin.id).with_role(Role::Admin))
		.with_cancellation(token);

	let err = db
		.store
		.create_resource(&ctx, Organization::new("Cancelled"))
		.await
		.unwrap_err();
	assert!(matches!(err.authz(), Some(AuthzError::Cancelled)));
	assert_eq!(db.raw_count("organizations").await, 0);
}

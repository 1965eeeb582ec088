// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

use chrono::Utc;
use quarry_server_auth::{
	Audience, Identity, Privilege, RequestContext, ResourceType, Role, UserId,
};
use quarry_server_db::entities::{Dataset, Organization, Page, Rule};
use quarry_server_db::{
	create_pool, default_registry, membership, run_migrations, sharing, DbError, ListQuery, Store,
};
use sqlx::sqlite::SqlitePool;
use std::sync::Arc;
use tempfile::TempDir;

/// A file-backed database with every entity registered.
pub struct TestDb {
	pub store: Store,
	_dir: TempDir,
}

impl TestDb {
	pub async fn new() -> Self {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("quarry.db");
		let pool = create_pool(&format!("sqlite:{}?mode=rwc", path.display()))
			.await
			.unwrap();
		run_migrations(&pool).await.unwrap();
		Self {
			store: Store::new(pool, Arc::new(default_registry())),
			_dir: dir,
		}
	}

	pub fn pool(&self) -> &SqlitePool {
		self.store.pool()
	}

	/// Provision a user the way the authentication layer does.
	pub async fn user(&self, email: &str) -> TestUser {
		let id = UserId::generate();
		let now = Utc::now().to_rfc3339();
		sqlx::query(
			"INSERT INTO users (id, email, display_name, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
		)
		.bind(id.to_string())
		.bind(email)
		.bind(email.split('@').next().unwrap())
		.bind(&now)
		.bind(&now)
		.execute(self.pool())
		.await
		.unwrap();
		TestUser {
			id,
			ctx: RequestContext::new(Identity::user(id)),
		}
	}

	pub async fn platform_admin(&self, email: &str) -> TestUser {
		let user = self.user(email).await;
		TestUser {
			id: user.id,
			ctx: RequestContext::new(Identity::user(user.id).with_role(Role::Admin)),
		}
	}

	/// Rows of `table`, including ones no identity can see.
	pub async fn raw_count(&self, table: &str) -> i64 {
		sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {table}"))
			.fetch_one(self.pool())
			.await
			.unwrap()
	}
}

#[derive(Clone)]
pub struct TestUser {
	pub id: UserId,
	pub ctx: RequestContext,
}

/// One organization with an owner, a plain member, and a user from elsewhere.
///
/// The owner created `dataset` and `page`; the member was granted `viewer` on
/// the dataset and `editor` on the page.
pub struct OrgFixture {
	pub org: Organization,
	pub owner: TestUser,
	pub member: TestUser,
	pub outsider: TestUser,
	pub anonymous: RequestContext,
	pub dataset: Dataset,
	pub rule: Rule,
	pub page: Page,
}

impl OrgFixture {
	pub async fn new(db: &TestDb) -> Self {
		let owner = db.platform_admin("owner@acme.test").await;
		let member = db.user("member@acme.test").await;
		let outsider = db.user("outsider@elsewhere.test").await;
		let store = &db.store;

		let org = store
			.create_resource(&owner.ctx, Organization::new("Acme"))
			.await
			.unwrap();
		membership::add_org_member(store, &owner.ctx, org.id, member.id, Privilege::Member)
			.await
			.unwrap();

		let dataset = store
			.create_resource(&owner.ctx, Dataset::new(org.id, "Revenue"))
			.await
			.unwrap();
		let rule = store
			.create(&owner.ctx, Rule::new(dataset.id, "non-negative", "amount >= 0"))
			.await
			.unwrap();
		let page = store
			.create_resource(&owner.ctx, Page::new(org.id, "Dashboard"))
			.await
			.unwrap();

		sharing::share(
			store,
			&owner.ctx,
			ResourceType::Dataset,
			dataset.id.into_inner(),
			Audience::User(member.id),
			Privilege::Viewer,
		)
		.await
		.unwrap();
		sharing::share(
			store,
			&owner.ctx,
			ResourceType::Page,
			page.id.into_inner(),
			Audience::User(member.id),
			Privilege::Editor,
		)
		.await
		.unwrap();

		Self {
			org,
			owner,
			member,
			outsider,
			anonymous: RequestContext::new(Identity::anonymous()),
			dataset,
			rule,
			page,
		}
	}
}

/// What a case expects the store to report.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
	Allowed,
	Denied,
	NotFound,
	InsertForbidden,
	NoIdentity,
}

impl Outcome {
	pub fn of<T>(result: &Result<T, DbError>) -> Self {
		match result {
			Ok(_) => Outcome::Allowed,
			Err(e) if e.is_permission_denied() => Outcome::Denied,
			Err(e) if e.is_insert_forbidden() => Outcome::InsertForbidden,
			Err(e) if e.is_not_found() => Outcome::NotFound,
			Err(DbError::Authz(quarry_server_auth::AuthzError::NoIdentity)) => Outcome::NoIdentity,
			Err(e) => panic!("unexpected error: {e}"),
		}
	}
}

pub struct AuthzCase {
	pub name: &'static str,
	pub outcome: Outcome,
	pub expected: Outcome,
}

impl AuthzCase {
	pub fn new<T>(name: &'static str, result: Result<T, DbError>, expected: Outcome) -> Self {
		Self {
			name,
			outcome: Outcome::of(&result),
			expected,
		}
	}
}

pub fn run_authz_cases(cases: &[AuthzCase]) {
	let failures: Vec<String> = cases
		.iter()
		.filter(|c| c.outcome != c.expected)
		.map(|c| format!("{}: expected {:?}, got {:?}", c.name, c.expected, c.outcome))
		.collect();
	assert!(failures.is_empty(), "authz cases failed:\n{}", failures.join("\n"));
}

/// How many rows of `E` the identity can list.
pub async fn visible<E: quarry_server_db::Entity>(store: &Store, ctx: &RequestContext) -> usize {
	store.list::<E>(ctx, &ListQuery::new()).await.unwrap().len()
}

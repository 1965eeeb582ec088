// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Test helpers: in-memory pools and rows that only the outside world creates.

use chrono::Utc;
use quarry_server_auth::{UserId, WidgetId};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::str::FromStr;
use std::sync::Arc;

use crate::entities::default_registry;
use crate::schema::run_migrations;
use crate::store::Store;

/// A single-connection in-memory pool. Every connection to `:memory:` is its
/// own database, so the pool must never open a second one.
pub async fn create_test_pool() -> SqlitePool {
	let options = SqliteConnectOptions::from_str(":memory:")
		.unwrap()
		.create_if_missing(true);

	SqlitePoolOptions::new()
		.max_connections(1)
		.connect_with(options)
		.await
		.expect("Failed to create test pool")
}

pub async fn create_migrated_test_pool() -> SqlitePool {
	let pool = create_test_pool().await;
	run_migrations(&pool).await.unwrap();
	pool
}

/// A store over a fresh, migrated in-memory database.
pub async fn create_test_store() -> Store {
	let pool = create_migrated_test_pool().await;
	Store::new(pool, Arc::new(default_registry()))
}

/// Users are provisioned by the authentication layer, never through the store.
pub async fn insert_test_user(pool: &SqlitePool, email: &str) -> UserId {
	let id = UserId::generate();
	let now = Utc::now().to_rfc3339();
	let display_name = email.split('@').next().unwrap_or(email).to_string();
	sqlx::query(
		r#"
		INSERT INTO users (id, email, display_name, created_at, updated_at)
		VALUES (?, ?, ?, ?, ?)
		"#,
	)
	.bind(id.to_string())
	.bind(email)
	.bind(display_name)
	.bind(&now)
	.bind(&now)
	.execute(pool)
	.await
	.unwrap();
	id
}

/// The widget catalog is static data, seeded outside the store.
pub async fn insert_test_widget(pool: &SqlitePool, kind: &str, name: &str) -> WidgetId {
	let id = WidgetId::generate();
	let now = Utc::now().to_rfc3339();
	sqlx::query(
		r#"
		INSERT INTO widgets (id, kind, name, created_at, updated_at)
		VALUES (?, ?, ?, ?, ?)
		"#,
	)
	.bind(id.to_string())
	.bind(kind)
	.bind(name)
	.bind(&now)
	.bind(&now)
	.execute(pool)
	.await
	.unwrap();
	id
}

/// Count live flattened rows for `user_id` on a resource.
pub async fn count_flattened(
	pool: &SqlitePool,
	user_id: UserId,
	resource_type: &str,
	resource_id: uuid::Uuid,
) -> i64 {
	sqlx::query_scalar(
		r#"
		SELECT COUNT(*) FROM flattened_resource_audience_policies
		WHERE user_id = ? AND resource_type = ? AND resource_id = ? AND deleted_at IS NULL
		"#,
	)
	.bind(user_id.to_string())
	.bind(resource_type)
	.bind(resource_id.to_string())
	.fetch_one(pool)
	.await
	.unwrap()
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Database schema.
//!
//! Every statement is idempotent, so [`run_migrations`] can run on every start.
//! All IDs are UUID strings and all timestamps RFC 3339 strings. Every table
//! carries `deleted_at`; uniqueness that must only hold among live rows uses a
//! partial index.

use sqlx::sqlite::SqlitePool;

use crate::error::DbError;

pub(crate) const MIGRATIONS: &[(&str, &str)] = &[
	(
		"users",
		r#"
		CREATE TABLE IF NOT EXISTS users (
			id TEXT PRIMARY KEY,
			email TEXT NOT NULL,
			display_name TEXT NOT NULL,
			created_at TEXT NOT NULL,
			updated_at TEXT NOT NULL,
			deleted_at TEXT
		)
		"#,
	),
	(
		"users_email_live",
		"CREATE UNIQUE INDEX IF NOT EXISTS idx_users_email_live ON users(lower(email)) WHERE deleted_at IS NULL",
	),
	(
		"organizations",
		r#"
		CREATE TABLE IF NOT EXISTS organizations (
			id TEXT PRIMARY KEY,
			name TEXT NOT NULL,
			created_at TEXT NOT NULL,
			updated_at TEXT NOT NULL,
			deleted_at TEXT
		)
		"#,
	),
	(
		"organization_invitations",
		r#"
		CREATE TABLE IF NOT EXISTS organization_invitations (
			id TEXT PRIMARY KEY,
			org_id TEXT NOT NULL REFERENCES organizations(id),
			email TEXT NOT NULL,
			privilege TEXT NOT NULL CHECK (privilege IN ('member', 'system_admin')),
			token_hash TEXT NOT NULL UNIQUE,
			invited_by TEXT NOT NULL,
			expires_at TEXT NOT NULL,
			accepted_at TEXT,
			created_at TEXT NOT NULL,
			updated_at TEXT NOT NULL,
			deleted_at TEXT
		)
		"#,
	),
	(
		"audit_logs",
		r#"
		CREATE TABLE IF NOT EXISTS audit_logs (
			id TEXT PRIMARY KEY,
			org_id TEXT NOT NULL REFERENCES organizations(id),
			actor_id TEXT,
			action TEXT NOT NULL,
			target_type TEXT,
			target_id TEXT,
			details TEXT,
			created_at TEXT NOT NULL,
			updated_at TEXT NOT NULL,
			deleted_at TEXT
		)
		"#,
	),
	(
		"teams",
		r#"
		CREATE TABLE IF NOT EXISTS teams (
			id TEXT PRIMARY KEY,
			org_id TEXT NOT NULL REFERENCES organizations(id),
			name TEXT NOT NULL,
			created_at TEXT NOT NULL,
			updated_at TEXT NOT NULL,
			deleted_at TEXT
		)
		"#,
	),
	(
		"team_memberships",
		r#"
		CREATE TABLE IF NOT EXISTS team_memberships (
			id TEXT PRIMARY KEY,
			team_id TEXT NOT NULL REFERENCES teams(id),
			user_id TEXT NOT NULL REFERENCES users(id),
			created_at TEXT NOT NULL,
			updated_at TEXT NOT NULL,
			deleted_at TEXT
		)
		"#,
	),
	(
		"team_memberships_live",
		"CREATE UNIQUE INDEX IF NOT EXISTS idx_team_memberships_live ON team_memberships(team_id, user_id) WHERE deleted_at IS NULL",
	),
	(
		"datasets",
		r#"
		CREATE TABLE IF NOT EXISTS datasets (
			id TEXT PRIMARY KEY,
			org_id TEXT NOT NULL REFERENCES organizations(id),
			name TEXT NOT NULL,
			description TEXT,
			created_at TEXT NOT NULL,
			updated_at TEXT NOT NULL,
			deleted_at TEXT
		)
		"#,
	),
	(
		"dataset_rules",
		r#"
		CREATE TABLE IF NOT EXISTS dataset_rules (
			id TEXT PRIMARY KEY,
			dataset_id TEXT NOT NULL REFERENCES datasets(id),
			name TEXT NOT NULL,
			expression TEXT NOT NULL,
			created_at TEXT NOT NULL,
			updated_at TEXT NOT NULL,
			deleted_at TEXT
		)
		"#,
	),
	(
		"connections",
		r#"
		CREATE TABLE IF NOT EXISTS connections (
			id TEXT PRIMARY KEY,
			org_id TEXT NOT NULL REFERENCES organizations(id),
			name TEXT NOT NULL,
			kind TEXT NOT NULL,
			created_at TEXT NOT NULL,
			updated_at TEXT NOT NULL,
			deleted_at TEXT
		)
		"#,
	),
	(
		"dataset_actions",
		r#"
		CREATE TABLE IF NOT EXISTS dataset_actions (
			id TEXT PRIMARY KEY,
			dataset_id TEXT NOT NULL REFERENCES datasets(id),
			name TEXT NOT NULL,
			connection_id TEXT REFERENCES connections(id),
			config TEXT,
			created_at TEXT NOT NULL,
			updated_at TEXT NOT NULL,
			deleted_at TEXT
		)
		"#,
	),
	(
		"pages",
		r#"
		CREATE TABLE IF NOT EXISTS pages (
			id TEXT PRIMARY KEY,
			org_id TEXT NOT NULL REFERENCES organizations(id),
			title TEXT NOT NULL,
			created_at TEXT NOT NULL,
			updated_at TEXT NOT NULL,
			deleted_at TEXT
		)
		"#,
	),
	(
		"sheets",
		r#"
		CREATE TABLE IF NOT EXISTS sheets (
			id TEXT PRIMARY KEY,
			page_id TEXT NOT NULL REFERENCES pages(id),
			title TEXT NOT NULL,
			position INTEGER NOT NULL DEFAULT 0,
			created_at TEXT NOT NULL,
			updated_at TEXT NOT NULL,
			deleted_at TEXT
		)
		"#,
	),
	(
		"widgets",
		r#"
		CREATE TABLE IF NOT EXISTS widgets (
			id TEXT PRIMARY KEY,
			kind TEXT NOT NULL,
			name TEXT NOT NULL,
			created_at TEXT NOT NULL,
			updated_at TEXT NOT NULL,
			deleted_at TEXT
		)
		"#,
	),
	(
		"widget_instances",
		r#"
		CREATE TABLE IF NOT EXISTS widget_instances (
			id TEXT PRIMARY KEY,
			sheet_id TEXT NOT NULL REFERENCES sheets(id),
			widget_id TEXT NOT NULL REFERENCES widgets(id),
			config TEXT,
			created_at TEXT NOT NULL,
			updated_at TEXT NOT NULL,
			deleted_at TEXT
		)
		"#,
	),
	(
		"schedules",
		r#"
		CREATE TABLE IF NOT EXISTS schedules (
			id TEXT PRIMARY KEY,
			org_id TEXT NOT NULL REFERENCES organizations(id),
			connection_id TEXT NOT NULL REFERENCES connections(id),
			name TEXT NOT NULL,
			cron TEXT NOT NULL,
			enabled INTEGER NOT NULL DEFAULT 1,
			created_at TEXT NOT NULL,
			updated_at TEXT NOT NULL,
			deleted_at TEXT
		)
		"#,
	),
	(
		"payments_configs",
		r#"
		CREATE TABLE IF NOT EXISTS payments_configs (
			id TEXT PRIMARY KEY,
			org_id TEXT NOT NULL REFERENCES organizations(id),
			provider TEXT NOT NULL,
			settings TEXT,
			created_at TEXT NOT NULL,
			updated_at TEXT NOT NULL,
			deleted_at TEXT
		)
		"#,
	),
	(
		"resource_audience_policies",
		r#"
		CREATE TABLE IF NOT EXISTS resource_audience_policies (
			id TEXT PRIMARY KEY,
			resource_type TEXT NOT NULL CHECK (resource_type IN ('organization', 'dataset', 'page', 'connection', 'schedule', 'payments')),
			resource_id TEXT NOT NULL,
			audience_type TEXT NOT NULL CHECK (audience_type IN ('user', 'organization', 'team')),
			audience_id TEXT NOT NULL,
			privilege TEXT NOT NULL,
			created_at TEXT NOT NULL,
			updated_at TEXT NOT NULL,
			deleted_at TEXT,
			metadata TEXT
		)
		"#,
	),
	(
		"resource_audience_policies_resource",
		"CREATE INDEX IF NOT EXISTS idx_rap_resource ON resource_audience_policies(resource_type, resource_id) WHERE deleted_at IS NULL",
	),
	(
		"resource_audience_policies_audience",
		"CREATE INDEX IF NOT EXISTS idx_rap_audience ON resource_audience_policies(audience_type, audience_id) WHERE deleted_at IS NULL",
	),
	(
		"flattened_resource_audience_policies",
		r#"
		CREATE TABLE IF NOT EXISTS flattened_resource_audience_policies (
			resource_audience_policy_id TEXT NOT NULL REFERENCES resource_audience_policies(id),
			resource_audience_type TEXT NOT NULL,
			user_id TEXT NOT NULL,
			resource_id TEXT NOT NULL,
			resource_audience_id TEXT NOT NULL,
			resource_type TEXT NOT NULL,
			privilege TEXT NOT NULL,
			created_at TEXT NOT NULL,
			updated_at TEXT NOT NULL,
			deleted_at TEXT
		)
		"#,
	),
	(
		"flattened_policy_user_live",
		"CREATE UNIQUE INDEX IF NOT EXISTS idx_frap_policy_user_live ON flattened_resource_audience_policies(resource_audience_policy_id, user_id) WHERE deleted_at IS NULL",
	),
	(
		"flattened_lookup",
		"CREATE INDEX IF NOT EXISTS idx_frap_lookup ON flattened_resource_audience_policies(user_id, resource_type, resource_id) WHERE deleted_at IS NULL",
	),
	(
		"flattened_audience",
		"CREATE INDEX IF NOT EXISTS idx_frap_audience ON flattened_resource_audience_policies(resource_audience_type, resource_audience_id, user_id) WHERE deleted_at IS NULL",
	),
];

/// Apply the schema. Safe to call on every start.
#[tracing::instrument(skip(pool))]
pub async fn run_migrations(pool: &SqlitePool) -> Result<(), DbError> {
	let mut tx = pool.begin().await?;
	for (name, statement) in MIGRATIONS {
		tracing::trace!(migration = name, "applying schema step");
		sqlx::query(statement).execute(&mut *tx).await?;
	}
	tx.commit().await?;

	tracing::debug!(steps = MIGRATIONS.len(), "schema up to date");
	Ok(())
}

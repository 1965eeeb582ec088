// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Pages, their sheets, and the widgets placed on them.
//!
//! Sheets and widget instances are scoped through their page. The widget
//! catalog is static and readable by any identified user.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quarry_server_auth::{
	AuthzError, Identity, OrgId, PageId, Predicate, Privilege, ResourceType, SheetId, UserId, Value,
	WidgetId, WidgetInstanceId,
};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::capability::{Capability, Gate, Write};
use crate::closure;
use crate::entity::{get_id, get_json, get_timestamps, json_value, BelongsTo, Entity, Resource};
use crate::error::DbError;

use super::immutable;
use super::org::Organization;

const PAGE_WRITERS: &[Privilege] = &[Privilege::Admin, Privilege::Editor];

fn page_grant(user_id: UserId) -> Predicate {
	Predicate::grant(ResourceType::Page, "id", user_id, &[])
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
	pub id: PageId,
	pub org_id: OrgId,
	pub title: String,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub deleted_at: Option<DateTime<Utc>>,
}

impl Page {
	pub fn new(org_id: OrgId, title: impl Into<String>) -> Self {
		let now = Utc::now();
		Self {
			id: PageId::generate(),
			org_id,
			title: title.into(),
			created_at: now,
			updated_at: now,
			deleted_at: None,
		}
	}
}

impl Entity for Page {
	const TABLE: &'static str = "pages";

	fn id(&self) -> Uuid {
		self.id.into_inner()
	}

	fn columns(&self) -> Vec<(&'static str, Value)> {
		vec![("org_id", self.org_id.into()), ("title", Value::from(&self.title))]
	}

	fn from_row(row: &SqliteRow) -> Result<Self, DbError> {
		let (created_at, updated_at, deleted_at) = get_timestamps(row)?;
		Ok(Self {
			id: get_id(row, "id")?,
			org_id: get_id(row, "org_id")?,
			title: row.try_get("title")?,
			created_at,
			updated_at,
			deleted_at,
		})
	}
}

impl Resource for Page {
	const RESOURCE_TYPE: ResourceType = ResourceType::Page;
}

impl BelongsTo<Organization> for Page {
	const FOREIGN_KEY: &'static str = "org_id";
}

pub struct PageRules;

#[async_trait]
impl Capability<Page> for PageRules {
	fn filter_predicate(&self, identity: &Identity) -> Predicate {
		Predicate::for_user(identity, page_grant)
	}

	/// Pages are created by the organization's `system_admin`s.
	async fn authorize_create(&self, gate: &mut Gate<'_>, row: &Page) -> Result<(), AuthzError> {
		gate.require_admin(ResourceType::Organization, row.org_id.into_inner())
			.await
	}

	async fn authorize_update(
		&self,
		gate: &mut Gate<'_>,
		current: &Page,
		proposed: &Page,
	) -> Result<(), AuthzError> {
		immutable("org_id", &current.org_id, &proposed.org_id)?;
		gate.require_policy(ResourceType::Page, current.id.into_inner(), PAGE_WRITERS)
			.await
	}

	async fn authorize_delete(&self, gate: &mut Gate<'_>, current: &Page) -> Result<(), AuthzError> {
		gate.require_admin(ResourceType::Page, current.id.into_inner())
			.await
	}

	async fn after_write(&self, gate: &mut Gate<'_>, write: Write<'_, Page>) -> Result<(), DbError> {
		if let Write::Deleted(page) = write {
			closure::retire_resource(gate.conn(), ResourceType::Page, page.id.into_inner()).await?;
		}
		Ok(())
	}
}

// =============================================================================
// Sheet
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sheet {
	pub id: SheetId,
	pub page_id: PageId,
	pub title: String,
	pub position: i64,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub deleted_at: Option<DateTime<Utc>>,
}

impl Sheet {
	pub fn new(page_id: PageId, title: impl Into<String>, position: i64) -> Self {
		let now = Utc::now();
		Self {
			id: SheetId::generate(),
			page_id,
			title: title.into(),
			position,
			created_at: now,
			updated_at: now,
			deleted_at: None,
		}
	}
}

impl Entity for Sheet {
	const TABLE: &'static str = "sheets";

	fn id(&self) -> Uuid {
		self.id.into_inner()
	}

	fn columns(&self) -> Vec<(&'static str, Value)> {
		vec![
			("page_id", self.page_id.into()),
			("title", Value::from(&self.title)),
			("position", self.position.into()),
		]
	}

	fn from_row(row: &SqliteRow) -> Result<Self, DbError> {
		let (created_at, updated_at, deleted_at) = get_timestamps(row)?;
		Ok(Self {
			id: get_id(row, "id")?,
			page_id: get_id(row, "page_id")?,
			title: row.try_get("title")?,
			position: row.try_get("position")?,
			created_at,
			updated_at,
			deleted_at,
		})
	}
}

impl BelongsTo<Page> for Sheet {
	const FOREIGN_KEY: &'static str = "page_id";
}

pub struct SheetRules;

#[async_trait]
impl Capability<Sheet> for SheetRules {
	fn filter_predicate(&self, identity: &Identity) -> Predicate {
		Predicate::for_user(identity, |user_id| {
			Predicate::via("page_id", Page::TABLE, page_grant(user_id))
		})
	}

	async fn authorize_create(&self, gate: &mut Gate<'_>, row: &Sheet) -> Result<(), AuthzError> {
		gate.require_admin(ResourceType::Page, row.page_id.into_inner())
			.await
	}

	async fn authorize_update(
		&self,
		gate: &mut Gate<'_>,
		current: &Sheet,
		proposed: &Sheet,
	) -> Result<(), AuthzError> {
		immutable("page_id", &current.page_id, &proposed.page_id)?;
		gate.require_policy(ResourceType::Page, current.page_id.into_inner(), PAGE_WRITERS)
			.await
	}

	async fn authorize_delete(&self, gate: &mut Gate<'_>, current: &Sheet) -> Result<(), AuthzError> {
		gate.require_admin(ResourceType::Page, current.page_id.into_inner())
			.await
	}
}

// =============================================================================
// Widget catalog
// =============================================================================

/// A widget kind users can place on a sheet. Seeded outside the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Widget {
	pub id: WidgetId,
	pub kind: String,
	pub name: String,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub deleted_at: Option<DateTime<Utc>>,
}

impl Entity for Widget {
	const TABLE: &'static str = "widgets";

	fn id(&self) -> Uuid {
		self.id.into_inner()
	}

	fn columns(&self) -> Vec<(&'static str, Value)> {
		vec![("kind", Value::from(&self.kind)), ("name", Value::from(&self.name))]
	}

	fn from_row(row: &SqliteRow) -> Result<Self, DbError> {
		let (created_at, updated_at, deleted_at) = get_timestamps(row)?;
		Ok(Self {
			id: get_id(row, "id")?,
			kind: row.try_get("kind")?,
			name: row.try_get("name")?,
			created_at,
			updated_at,
			deleted_at,
		})
	}
}

pub struct WidgetRules;

#[async_trait]
impl Capability<Widget> for WidgetRules {
	fn filter_predicate(&self, identity: &Identity) -> Predicate {
		Predicate::for_user(identity, |_| Predicate::Always)
	}

	async fn authorize_create(&self, _gate: &mut Gate<'_>, _row: &Widget) -> Result<(), AuthzError> {
		Err(AuthzError::InsertForbidden { entity: Widget::TABLE })
	}
}

// =============================================================================
// WidgetInstance
// =============================================================================

/// A catalog widget placed on a sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WidgetInstance {
	pub id: WidgetInstanceId,
	pub sheet_id: SheetId,
	pub widget_id: WidgetId,
	pub config: Option<serde_json::Value>,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub deleted_at: Option<DateTime<Utc>>,
}

impl WidgetInstance {
	pub fn new(sheet_id: SheetId, widget_id: WidgetId) -> Self {
		let now = Utc::now();
		Self {
			id: WidgetInstanceId::generate(),
			sheet_id,
			widget_id,
			config: None,
			created_at: now,
			updated_at: now,
			deleted_at: None,
		}
	}

	pub fn with_config(mut self, config: serde_json::Value) -> Self {
		self.config = Some(config);
		self
	}
}

impl Entity for WidgetInstance {
	const TABLE: &'static str = "widget_instances";

	fn id(&self) -> Uuid {
		self.id.into_inner()
	}

	fn columns(&self) -> Vec<(&'static str, Value)> {
		vec![
			("sheet_id", self.sheet_id.into()),
			("widget_id", self.widget_id.into()),
			("config", json_value(&self.config)),
		]
	}

	fn from_row(row: &SqliteRow) -> Result<Self, DbError> {
		let (created_at, updated_at, deleted_at) = get_timestamps(row)?;
		Ok(Self {
			id: get_id(row, "id")?,
			sheet_id: get_id(row, "sheet_id")?,
			widget_id: get_id(row, "widget_id")?,
			config: get_json(row, "config")?,
			created_at,
			updated_at,
			deleted_at,
		})
	}
}

impl BelongsTo<Sheet> for WidgetInstance {
	const FOREIGN_KEY: &'static str = "sheet_id";
}

pub struct WidgetInstanceRules;

impl WidgetInstanceRules {
	/// The page owning the instance's sheet. The sheet must be live.
	async fn owning_page(gate: &mut Gate<'_>, instance: &WidgetInstance) -> Result<Uuid, AuthzError> {
		gate.lookup(Sheet::TABLE, "page_id", instance.sheet_id.into_inner())
			.await?
			.ok_or_else(|| AuthzError::denied(format!("sheet {} does not exist", instance.sheet_id)))
	}

	async fn require_widget(gate: &mut Gate<'_>, instance: &WidgetInstance) -> Result<(), AuthzError> {
		if gate.exists(Widget::TABLE, instance.widget_id.into_inner()).await? {
			Ok(())
		} else {
			Err(AuthzError::denied(format!(
				"widget {} is not in the catalog",
				instance.widget_id
			)))
		}
	}
}

#[async_trait]
impl Capability<WidgetInstance> for WidgetInstanceRules {
	fn filter_predicate(&self, identity: &Identity) -> Predicate {
		Predicate::for_user(identity, |user_id| {
			Predicate::via(
				"sheet_id",
				Sheet::TABLE,
				Predicate::via("page_id", Page::TABLE, page_grant(user_id)),
			)
		})
	}

	async fn authorize_create(
		&self,
		gate: &mut Gate<'_>,
		row: &WidgetInstance,
	) -> Result<(), AuthzError> {
		let page_id = Self::owning_page(gate, row).await?;
		gate.require_admin(ResourceType::Page, page_id).await?;
		Self::require_widget(gate, row).await
	}

	async fn authorize_update(
		&self,
		gate: &mut Gate<'_>,
		current: &WidgetInstance,
		proposed: &WidgetInstance,
	) -> Result<(), AuthzError> {
		immutable("sheet_id", &current.sheet_id, &proposed.sheet_id)?;
		let page_id = Self::owning_page(gate, current).await?;
		gate.require_policy(ResourceType::Page, page_id, PAGE_WRITERS)
			.await?;
		if proposed.widget_id != current.widget_id {
			Self::require_widget(gate, proposed).await?;
		}
		Ok(())
	}

	async fn authorize_delete(
		&self,
		gate: &mut Gate<'_>,
		current: &WidgetInstance,
	) -> Result<(), AuthzError> {
		let page_id = Self::owning_page(gate, current).await?;
		gate.require_admin(ResourceType::Page, page_id).await
	}
}

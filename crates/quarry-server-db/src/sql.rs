// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Rendering of [`Predicate`]s into SQL.
//!
//! Column names come from code (`&'static str`); every value is bound. Each
//! nested sub-query gets a fresh table alias so correlated references stay
//! unambiguous.

use quarry_server_auth::{
	AudienceType, GrantCheck, OrgId, Predicate, ResourceRef, ResourceType, UserId, Value,
};
use sqlx::{QueryBuilder, Sqlite};

pub(crate) const FLATTENED_TABLE: &str = "flattened_resource_audience_policies";
pub(crate) const ROOT_ALIAS: &str = "t0";

pub(crate) fn push_value(qb: &mut QueryBuilder<'_, Sqlite>, value: &Value) {
	match value {
		Value::Text(s) => {
			qb.push_bind(s.clone());
		}
		Value::Int(i) => {
			qb.push_bind(*i);
		}
		Value::Null => {
			qb.push("NULL");
		}
	}
}

/// Append `predicate`, evaluated against rows aliased as `alias`.
pub(crate) fn push_predicate(qb: &mut QueryBuilder<'_, Sqlite>, alias: &str, predicate: &Predicate) {
	let mut renderer = Renderer { next_alias: 1 };
	renderer.render(qb, alias, predicate);
}

struct Renderer {
	next_alias: usize,
}

impl Renderer {
	fn alias(&mut self, prefix: &str) -> String {
		let alias = format!("{prefix}{}", self.next_alias);
		self.next_alias += 1;
		alias
	}

	fn render(&mut self, qb: &mut QueryBuilder<'_, Sqlite>, alias: &str, predicate: &Predicate) {
		match predicate {
			Predicate::Always => {
				qb.push("1");
			}
			Predicate::Never => {
				qb.push("0");
			}
			Predicate::Eq {
				column,
				value: Value::Null,
			} => {
				qb.push(format!("{alias}.{column} IS NULL"));
			}
			Predicate::Eq { column, value } => {
				qb.push(format!("{alias}.{column} = "));
				push_value(qb, value);
			}
			Predicate::In { column, values } => {
				if values.is_empty() {
					qb.push("0");
					return;
				}
				qb.push(format!("{alias}.{column} IN ("));
				for (i, value) in values.iter().enumerate() {
					if i > 0 {
						qb.push(", ");
					}
					push_value(qb, value);
				}
				qb.push(")");
			}
			Predicate::Grant(check) => self.render_grant(qb, alias, check),
			Predicate::Via {
				column,
				parent_table,
				predicate,
			} => {
				let parent = self.alias("p");
				qb.push(format!(
					"{alias}.{column} IN (SELECT {parent}.id FROM {parent_table} {parent} WHERE {parent}.deleted_at IS NULL AND ("
				));
				self.render(qb, &parent, predicate);
				qb.push("))");
			}
			Predicate::EmailOf { column, user_id } => {
				let users = self.alias("u");
				qb.push(format!(
					"lower({alias}.{column}) = (SELECT lower({users}.email) FROM users {users} WHERE {users}.deleted_at IS NULL AND {users}.id = "
				));
				qb.push_bind(user_id.to_string());
				qb.push(")");
			}
			Predicate::CoMember {
				column,
				user_id,
				org_ids,
			} => self.render_co_member(qb, alias, column, *user_id, org_ids),
			Predicate::And(parts) => self.render_group(qb, alias, parts, " AND ", "1"),
			Predicate::Or(parts) => self.render_group(qb, alias, parts, " OR ", "0"),
		}
	}

	fn render_group(
		&mut self,
		qb: &mut QueryBuilder<'_, Sqlite>,
		alias: &str,
		parts: &[Predicate],
		op: &str,
		empty: &str,
	) {
		if parts.is_empty() {
			qb.push(empty);
			return;
		}
		qb.push("(");
		for (i, part) in parts.iter().enumerate() {
			if i > 0 {
				qb.push(op);
			}
			self.render(qb, alias, part);
		}
		qb.push(")");
	}

	fn render_grant(&mut self, qb: &mut QueryBuilder<'_, Sqlite>, alias: &str, check: &GrantCheck) {
		let f = self.alias("f");
		qb.push(format!(
			"EXISTS (SELECT 1 FROM {FLATTENED_TABLE} {f} WHERE {f}.deleted_at IS NULL AND {f}.user_id = "
		));
		qb.push_bind(check.user_id.to_string());
		match check.resource_type {
			ResourceRef::Fixed(rt) => {
				qb.push(format!(" AND {f}.resource_type = "));
				qb.push_bind(rt.as_str().to_string());
			}
			ResourceRef::Column(column) => {
				qb.push(format!(" AND {f}.resource_type = {alias}.{column}"));
			}
		}
		qb.push(format!(
			" AND {f}.resource_id = {alias}.{}",
			check.resource_column
		));
		if !check.privileges.is_empty() {
			qb.push(format!(" AND {f}.privilege IN ("));
			for (i, privilege) in check.privileges.iter().enumerate() {
				if i > 0 {
					qb.push(", ");
				}
				qb.push_bind(privilege.as_str().to_string());
			}
			qb.push(")");
		}
		qb.push(")");
	}

	/// Users holding a membership in an organization that `user_id` both claims
	/// and actually holds.
	fn render_co_member(
		&mut self,
		qb: &mut QueryBuilder<'_, Sqlite>,
		alias: &str,
		column: &str,
		user_id: UserId,
		org_ids: &[OrgId],
	) {
		if org_ids.is_empty() {
			qb.push("0");
			return;
		}
		let member = self.alias("f");
		let own = self.alias("f");
		let org = ResourceType::Organization.as_str();
		let user = AudienceType::User.as_str();

		qb.push(format!(
			"{alias}.{column} IN (SELECT {member}.user_id FROM {FLATTENED_TABLE} {member} \
			 WHERE {member}.deleted_at IS NULL AND {member}.resource_type = '{org}' \
			 AND {member}.resource_audience_type = '{user}' AND {member}.resource_id IN ("
		));
		for (i, org_id) in org_ids.iter().enumerate() {
			if i > 0 {
				qb.push(", ");
			}
			qb.push_bind(org_id.to_string());
		}
		qb.push(format!(
			") AND {member}.resource_id IN (SELECT {own}.resource_id FROM {FLATTENED_TABLE} {own} \
			 WHERE {own}.deleted_at IS NULL AND {own}.resource_type = '{org}' \
			 AND {own}.resource_audience_type = '{user}' AND {own}.user_id = "
		));
		qb.push_bind(user_id.to_string());
		qb.push("))");
	}
}

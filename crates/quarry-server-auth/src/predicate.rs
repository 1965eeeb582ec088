// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Row-visibility predicates.
//!
//! A [`Predicate`] describes which rows of an entity's table an identity may see.
//! It deliberately covers only what tenancy scoping needs: column equality,
//! flattened-grant existence, scoping through a parent table, and invitee email
//! matching. It is not a general expression language.
//!
//! Predicates are data. The store renders them into SQL and ANDs them with the
//! caller's own filter. Column names are `&'static str` so only code, never
//! request input, can name a column.
//!
//! # Fail-closed construction
//!
//! - [`Predicate::for_user`] yields [`Predicate::Never`] for anonymous identities
//! - an empty [`Predicate::Or`] matches nothing
//! - an empty [`Predicate::In`] matches nothing
//! - a [`Predicate::CoMember`] with no claimed organizations matches nothing

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use uuid::Uuid;

use crate::identity::Identity;
use crate::resource::{Privilege, ResourceType};
use crate::types::{OrgId, UserId};

/// A scalar bound into a predicate or a row write.
///
/// UUIDs and timestamps are stored as text, booleans as integers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Value {
	Text(String),
	Int(i64),
	Null,
}

impl From<Uuid> for Value {
	fn from(v: Uuid) -> Self {
		Value::Text(v.to_string())
	}
}

impl From<&str> for Value {
	fn from(v: &str) -> Self {
		Value::Text(v.to_string())
	}
}

impl From<String> for Value {
	fn from(v: String) -> Self {
		Value::Text(v)
	}
}

impl From<&String> for Value {
	fn from(v: &String) -> Self {
		Value::Text(v.clone())
	}
}

impl From<i64> for Value {
	fn from(v: i64) -> Self {
		Value::Int(v)
	}
}

impl From<i32> for Value {
	fn from(v: i32) -> Self {
		Value::Int(v as i64)
	}
}

impl From<bool> for Value {
	fn from(v: bool) -> Self {
		Value::Int(v as i64)
	}
}

impl From<DateTime<Utc>> for Value {
	fn from(v: DateTime<Utc>) -> Self {
		Value::Text(v.to_rfc3339())
	}
}

impl From<&serde_json::Value> for Value {
	fn from(v: &serde_json::Value) -> Self {
		Value::Text(v.to_string())
	}
}

impl From<ResourceType> for Value {
	fn from(v: ResourceType) -> Self {
		Value::Text(v.as_str().to_string())
	}
}

impl From<Privilege> for Value {
	fn from(v: Privilege) -> Self {
		Value::Text(v.as_str().to_string())
	}
}

impl From<crate::resource::AudienceType> for Value {
	fn from(v: crate::resource::AudienceType) -> Self {
		Value::Text(v.as_str().to_string())
	}
}

impl<T: Into<Value>> From<Option<T>> for Value {
	fn from(v: Option<T>) -> Self {
		v.map(Into::into).unwrap_or(Value::Null)
	}
}

impl fmt::Display for Value {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Value::Text(s) => write!(f, "'{s}'"),
			Value::Int(i) => write!(f, "{i}"),
			Value::Null => write!(f, "NULL"),
		}
	}
}

/// Where the resource type of a grant check comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceRef {
	/// Every row is scoped under the same resource type.
	Fixed(ResourceType),
	/// The row names its resource type in this column.
	Column(&'static str),
}

/// "A live flattened grant exists for `user_id` on the resource named by this row."
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GrantCheck {
	pub resource_type: ResourceRef,
	/// Column of the scoped row holding the resource id.
	pub resource_column: &'static str,
	pub user_id: UserId,
	/// Accepted privileges; empty accepts any privilege.
	pub privileges: Vec<Privilege>,
}

/// A boolean predicate over the rows of one table.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Predicate {
	Always,
	Never,
	Eq {
		column: &'static str,
		value: Value,
	},
	In {
		column: &'static str,
		values: Vec<Value>,
	},
	Grant(GrantCheck),
	/// The row's `column` references a live row of `parent_table` matching `predicate`.
	Via {
		column: &'static str,
		parent_table: &'static str,
		predicate: Box<Predicate>,
	},
	/// The row's `column` equals the email of `user_id`, case-insensitively.
	EmailOf {
		column: &'static str,
		user_id: UserId,
	},
	/// The row's `column` is a user sharing an organization with `user_id`,
	/// restricted to `org_ids` (the identity's claimed organizations).
	CoMember {
		column: &'static str,
		user_id: UserId,
		org_ids: Vec<OrgId>,
	},
	And(Vec<Predicate>),
	Or(Vec<Predicate>),
}

impl Predicate {
	pub fn eq(column: &'static str, value: impl Into<Value>) -> Self {
		Predicate::Eq {
			column,
			value: value.into(),
		}
	}

	pub fn is_in<V: Into<Value>>(column: &'static str, values: impl IntoIterator<Item = V>) -> Self {
		Predicate::In {
			column,
			values: values.into_iter().map(Into::into).collect(),
		}
	}

	/// Grant on a fixed resource type whose id is in `resource_column`.
	pub fn grant(
		resource_type: ResourceType,
		resource_column: &'static str,
		user_id: UserId,
		privileges: &[Privilege],
	) -> Self {
		Predicate::Grant(GrantCheck {
			resource_type: ResourceRef::Fixed(resource_type),
			resource_column,
			user_id,
			privileges: privileges.to_vec(),
		})
	}

	/// Grant on the resource named by the `(type_column, id_column)` pair of the row.
	pub fn grant_on_columns(
		type_column: &'static str,
		id_column: &'static str,
		user_id: UserId,
	) -> Self {
		Predicate::Grant(GrantCheck {
			resource_type: ResourceRef::Column(type_column),
			resource_column: id_column,
			user_id,
			privileges: Vec::new(),
		})
	}

	pub fn via(column: &'static str, parent_table: &'static str, predicate: Predicate) -> Self {
		Predicate::Via {
			column,
			parent_table,
			predicate: Box::new(predicate),
		}
	}

	/// Build a predicate that needs an authenticated user.
	///
	/// Anonymous identities get [`Predicate::Never`].
	pub fn for_user(identity: &Identity, f: impl FnOnce(UserId) -> Predicate) -> Self {
		match identity.user_id() {
			Some(user_id) => f(user_id),
			None => Predicate::Never,
		}
	}

	pub fn and(self, other: Predicate) -> Self {
		match (self, other) {
			(Predicate::And(mut a), Predicate::And(b)) => {
				a.extend(b);
				Predicate::And(a)
			}
			(Predicate::And(mut a), p) => {
				a.push(p);
				Predicate::And(a)
			}
			(p, Predicate::And(mut b)) => {
				b.insert(0, p);
				Predicate::And(b)
			}
			(a, b) => Predicate::And(vec![a, b]),
		}
	}

	pub fn or(self, other: Predicate) -> Self {
		match (self, other) {
			(Predicate::Or(mut a), Predicate::Or(b)) => {
				a.extend(b);
				Predicate::Or(a)
			}
			(Predicate::Or(mut a), p) => {
				a.push(p);
				Predicate::Or(a)
			}
			(p, Predicate::Or(mut b)) => {
				b.insert(0, p);
				Predicate::Or(b)
			}
			(a, b) => Predicate::Or(vec![a, b]),
		}
	}

	/// Fold constants and collapse single-element groups.
	///
	/// Never widens: the result matches exactly the rows the input matches.
	pub fn simplify(self) -> Self {
		match self {
			Predicate::And(parts) => {
				let mut kept = Vec::with_capacity(parts.len());
				for part in parts.into_iter().map(Predicate::simplify) {
					match part {
						Predicate::Never => return Predicate::Never,
						Predicate::Always => {}
						Predicate::And(inner) => kept.extend(inner),
						other => kept.push(other),
					}
				}
				match kept.len() {
					0 => Predicate::Always,
					1 => kept.remove(0),
					_ => Predicate::And(kept),
				}
			}
			Predicate::Or(parts) => {
				let mut kept = Vec::with_capacity(parts.len());
				for part in parts.into_iter().map(Predicate::simplify) {
					match part {
						Predicate::Always => return Predicate::Always,
						Predicate::Never => {}
						Predicate::Or(inner) => kept.extend(inner),
						other => kept.push(other),
					}
				}
				match kept.len() {
					0 => Predicate::Never,
					1 => kept.remove(0),
					_ => Predicate::Or(kept),
				}
			}
			Predicate::In { values, .. } if values.is_empty() => Predicate::Never,
			Predicate::CoMember { org_ids, .. } if org_ids.is_empty() => Predicate::Never,
			Predicate::Via {
				column,
				parent_table,
				predicate,
			} => match predicate.simplify() {
				Predicate::Never => Predicate::Never,
				inner => Predicate::via(column, parent_table, inner),
			},
			other => other,
		}
	}

	/// Returns true if this predicate can match no row at all.
	pub fn is_never(&self) -> bool {
		matches!(self.clone().simplify(), Predicate::Never)
	}
}

impl fmt::Display for Predicate {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		fn join(f: &mut fmt::Formatter<'_>, parts: &[Predicate], op: &str) -> fmt::Result {
			write!(f, "(")?;
			for (i, part) in parts.iter().enumerate() {
				if i > 0 {
					write!(f, " {op} ")?;
				}
				write!(f, "{part}")?;
			}
			write!(f, ")")
		}

		match self {
			Predicate::Always => write!(f, "TRUE"),
			Predicate::Never => write!(f, "FALSE"),
			Predicate::Eq { column, value } => write!(f, "{column} = {value}"),
			Predicate::In { column, values } => {
				write!(f, "{column} IN [")?;
				for (i, v) in values.iter().enumerate() {
					if i > 0 {
						write!(f, ", ")?;
					}
					write!(f, "{v}")?;
				}
				write!(f, "]")
			}
			Predicate::Grant(check) => {
				let rt = match check.resource_type {
					ResourceRef::Fixed(rt) => rt.to_string(),
					ResourceRef::Column(col) => format!("${col}"),
				};
				write!(f, "grant({rt}, ${}, user={}", check.resource_column, check.user_id)?;
				if !check.privileges.is_empty() {
					let privs: Vec<&str> = check.privileges.iter().map(|p| p.as_str()).collect();
					write!(f, ", {}", privs.join("|"))?;
				}
				write!(f, ")")
			}
			Predicate::Via {
				column,
				parent_table,
				predicate,
			} => write!(f, "{column} -> {parent_table}[{predicate}]"),
			Predicate::EmailOf { column, user_id } => write!(f, "{column} = email({user_id})"),
			Predicate::CoMember { column, user_id, .. } => {
				write!(f, "{column} co-member-of {user_id}")
			}
			Predicate::And(parts) => join(f, parts, "AND"),
			Predicate::Or(parts) => join(f, parts, "OR"),
		}
	}
}

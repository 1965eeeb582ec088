// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Persistent entities and the rules scoping them.
//!
//! This module provides:
//! - one [`Entity`](crate::entity::Entity) per table
//! - one [`Capability`](crate::capability::Capability) per entity
//! - [`default_registry`] wiring every entity to its rules

pub mod connection;
pub mod dataset;
pub mod org;
pub mod page;
pub mod payments;
pub mod policy;
pub mod team;
pub mod user;

pub use connection::{Connection, ConnectionRules, Schedule, ScheduleRules};
pub use dataset::{Dataset, DatasetAction, DatasetActionRules, DatasetRules, Rule, RuleRules};
pub use org::{
	AuditLog, AuditLogRules, Organization, OrganizationInvitation, OrganizationInvitationRules,
	OrganizationRules,
};
pub use page::{Page, PageRules, Sheet, SheetRules, Widget, WidgetInstance, WidgetInstanceRules, WidgetRules};
pub use payments::{PaymentsConfig, PaymentsConfigRules};
pub use policy::{FlattenedPolicyRules, PolicyRules};
pub use team::{TeamMembershipRules, TeamRules};
pub use user::{User, UserRules};

use quarry_server_auth::{AuthzError, FlattenedResourceAudiencePolicy, ResourceAudiencePolicy, Team, TeamMembership};

use crate::registry::Registry;

/// Every entity of the schema, wired to its rules.
pub fn default_registry() -> Registry {
	let mut registry = Registry::new();
	registry
		.register::<Organization>(OrganizationRules)
		.register::<OrganizationInvitation>(OrganizationInvitationRules)
		.register::<AuditLog>(AuditLogRules)
		.register::<User>(UserRules)
		.register::<Team>(TeamRules)
		.register::<TeamMembership>(TeamMembershipRules)
		.register::<Dataset>(DatasetRules)
		.register::<Rule>(RuleRules)
		.register::<DatasetAction>(DatasetActionRules)
		.register::<Page>(PageRules)
		.register::<Sheet>(SheetRules)
		.register::<Widget>(WidgetRules)
		.register::<WidgetInstance>(WidgetInstanceRules)
		.register::<Connection>(ConnectionRules)
		.register::<Schedule>(ScheduleRules)
		.register::<PaymentsConfig>(PaymentsConfigRules)
		.register::<ResourceAudiencePolicy>(PolicyRules)
		.register::<FlattenedResourceAudiencePolicy>(FlattenedPolicyRules);
	registry
}

/// Reject a change to a field that is fixed after creation.
pub(crate) fn immutable<T: PartialEq>(field: &str, before: &T, after: &T) -> Result<(), AuthzError> {
	if before == after {
		Ok(())
	} else {
		Err(AuthzError::denied(format!("{field} cannot be changed")))
	}
}

// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Domain model for Quarry's resource access-control engine.
//!
//! This crate provides:
//! - Identity context carried through every engine call ([`Identity`], [`RequestContext`])
//! - Resource types and their per-type privilege vocabularies
//! - The policy model and its flattened per-user closure
//! - Row-visibility predicates handed to the store
//! - Self-demotion evaluation for policy edits
//!
//! Nothing here touches the database; `quarry-server-db` loads and stores.

pub mod admin_path;
pub mod error;
pub mod identity;
pub mod policy;
pub mod predicate;
pub mod resource;
pub mod team;
pub mod types;

pub use admin_path::{check_self_demotion, ActorMemberships, PolicyChange};
pub use error::AuthzError;
pub use identity::{Identity, RequestContext};
pub use policy::{
	diff_closure, flatten, Audience, ClosureDiff, ClosureKey, FlattenedResourceAudiencePolicy,
	ResourceAudiencePolicy,
};
pub use predicate::{GrantCheck, Predicate, ResourceRef, Value};
pub use resource::{AudienceType, Privilege, ResourceType};
pub use team::{Team, TeamMembership};
pub use types::*;

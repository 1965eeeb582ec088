// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Scoped persistence for the Quarry server.
//!
//! This crate provides:
//! - [`Store`] / [`ScopedTx`] - every read filtered and every write guarded by
//!   the entity's [`Capability`]
//! - [`entities`] - the tables, their rules, and [`default_registry`]
//! - [`closure`] - maintenance of the flattened policy closure
//! - [`sharing`], [`membership`], [`invitations`] - access management flows
//! - [`create_pool`] / [`run_migrations`] - SQLite setup

pub mod capability;
pub mod closure;
pub mod entities;
pub mod entity;
pub mod error;
pub mod invitations;
pub mod membership;
pub mod pool;
pub mod registry;
pub mod schema;
pub mod sharing;
mod sql;
pub mod store;

pub mod testing;

pub use capability::{Capability, Gate, Write};
pub use closure::{rebuild_closure, verify_closure};
pub use entities::default_registry;
pub use entity::{BelongsTo, Entity, Resource};
pub use error::{DbError, Result};
pub use pool::{create_pool, create_pool_with, PoolLimits};
pub use registry::Registry;
pub use schema::run_migrations;
pub use store::{ListQuery, ScopedTx, Store};

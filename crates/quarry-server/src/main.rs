// Copyright (c) 2025 Geoffrey Huntley <ghuntley@ghuntley.com>. All rights reserved.
// SPDX-License-Identifier: Proprietary

//! Quarry operations binary: schema migrations and closure maintenance.

use anyhow::Context;
use clap::{Parser, Subcommand};
use quarry_server_auth::ClosureDiff;
use quarry_server_config::{LogFormat, LoggingConfig, ServerConfig};
use quarry_server_db::{create_pool_with, rebuild_closure, run_migrations, verify_closure, PoolLimits};
use sqlx::sqlite::SqlitePool;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Quarry server - access-control store operations.
#[derive(Parser, Debug)]
#[command(name = "quarry-server", about = "Quarry access-control store operations", version)]
struct Args {
	/// Config file to read instead of /etc/quarry/server.toml
	#[arg(long, env = "QUARRY_SERVER_CONFIG")]
	config: Option<PathBuf>,

	#[command(subcommand)]
	command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
	/// Apply the database schema
	Migrate,
	/// Inspect or repair the flattened policy closure
	Closure {
		#[command(subcommand)]
		action: ClosureAction,
	},
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
enum ClosureAction {
	/// Report flattened rows that are missing or stale; exits 1 on drift
	Verify,
	/// Re-derive the flattened closure from live policies and memberships
	Rebuild,
}

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
	let args = Args::parse();

	// Load .env file if present
	dotenvy::dotenv().ok();

	let config = match &args.config {
		Some(path) => quarry_server_config::load_config_with_file(path),
		None => quarry_server_config::load_config(),
	}
	.context("loading configuration")?;

	init_tracing(&config.logging);
	tracing::info!(database = %config.database.url, command = ?args.command, "starting quarry-server");

	let pool = connect(&config).await?;
	let code = match args.command {
		Command::Migrate => {
			run_migrations(&pool).await.context("applying schema")?;
			println!("schema up to date");
			ExitCode::SUCCESS
		}
		Command::Closure { action } => {
			run_migrations(&pool).await.context("applying schema")?;
			let diff = match action {
				ClosureAction::Verify => verify_closure(&pool).await,
				ClosureAction::Rebuild => rebuild_closure(&pool).await,
			}
			.context("walking the policy closure")?;
			print!("{}", summarize(action, &diff));
			if action == ClosureAction::Verify && !diff.is_consistent() {
				ExitCode::from(1)
			} else {
				ExitCode::SUCCESS
			}
		}
	};

	pool.close().await;
	Ok(code)
}

fn init_tracing(logging: &LoggingConfig) {
	let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
	let (plain, json) = match logging.format {
		LogFormat::Plain => (
			Some(tracing_subscriber::fmt::layer().with_writer(std::io::stderr)),
			None,
		),
		LogFormat::Json => (
			None,
			Some(
				tracing_subscriber::fmt::layer()
					.json()
					.with_writer(std::io::stderr),
			),
		),
	};

	tracing_subscriber::registry()
		.with(filter)
		.with(plain)
		.with(json)
		.init();
}

async fn connect(config: &ServerConfig) -> anyhow::Result<SqlitePool> {
	let limits = PoolLimits {
		max_connections: config.database.max_connections,
		acquire_timeout: config.database.acquire_timeout(),
	};
	create_pool_with(&config.database.url, limits)
		.await
		.with_context(|| format!("opening {}", config.database.url))
}

/// Human-readable report of a closure walk.
fn summarize(action: ClosureAction, diff: &ClosureDiff) -> String {
	let mut out = String::new();
	for row in &diff.missing {
		out.push_str(&format!(
			"missing  policy={} user={} {}:{} {}\n",
			row.resource_audience_policy_id, row.user_id, row.resource_type, row.resource_id, row.privilege
		));
	}
	for row in &diff.stale {
		out.push_str(&format!(
			"stale    policy={} user={} {}:{} {}\n",
			row.resource_audience_policy_id, row.user_id, row.resource_type, row.resource_id, row.privilege
		));
	}

	let verb = match action {
		ClosureAction::Verify => "found",
		ClosureAction::Rebuild => "repaired",
	};
	if diff.is_consistent() {
		out.push_str("closure consistent\n");
	} else {
		out.push_str(&format!(
			"{verb} {} missing and {} stale flattened rows\n",
			diff.missing.len(),
			diff.stale.len()
		));
	}
	out
}

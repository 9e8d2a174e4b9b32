// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Kudos Core - Achievement Progress Engine
//!
//! Reads newline-delimited JSON event envelopes from stdin:
//!
//! ```text
//! {"event":"forum.interaction","payload":{"profileId":"p1","interactionType":"like"}}
//! ```
//!
//! and processes them until EOF or Ctrl-C. Unlocks and milestone
//! notifications are logged.

use std::sync::Arc;

use anyhow::Result;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

use kudos_core::catalog::AchievementCatalog;
use kudos_core::config::Config;
use kudos_core::engine::AchievementEngine;
use kudos_core::events::LoggingSink;
use kudos_core::persistence;
use kudos_core::router::EventEnvelope;
use kudos_core::runtime::EngineRuntime;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (from crate directory or parent directories)
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("kudos_core=info".parse()?),
        )
        .with_writer(std::io::stderr)
        .init();

    info!("Starting Kudos Core");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!("Configuration error: {}", e);
        e
    })?;

    info!(
        max_in_flight = config.max_in_flight,
        queue_capacity = config.queue_capacity,
        retry_max_attempts = config.retry_max_attempts,
        seed_catalog = config.seed_catalog,
        "Configuration loaded"
    );

    // Connect to database (migrations run on connect)
    info!("Connecting to database...");
    let persistence = persistence::connect(&config.database_url).await?;
    persistence.health_check_db().await?;
    info!("Database health check passed");

    if config.seed_catalog {
        AchievementCatalog::new(persistence.clone()).seed().await?;
    }

    let engine = AchievementEngine::with_retry_policy(persistence, config.retry_policy())
        .with_sink(Arc::new(LoggingSink));

    let runtime = EngineRuntime::builder()
        .engine(engine)
        .config(&config)
        .build()?
        .start()
        .await?;

    info!("Kudos Core initialized, reading events from stdin");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut accepted: u64 = 0;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl-C");
                break;
            }

            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("End of input");
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                match serde_json::from_str::<EventEnvelope>(line) {
                    Ok(envelope) => {
                        runtime.submit_envelope(envelope).await?;
                        accepted += 1;
                    }
                    Err(e) => warn!(error = %e, "Skipping line that is not an event envelope"),
                }
            }
        }
    }

    info!(accepted, "Shutting down...");
    runtime.shutdown().await?;
    info!("Shutdown complete");

    Ok(())
}

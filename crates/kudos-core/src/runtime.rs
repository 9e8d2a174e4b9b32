// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Embeddable runtime for kudos-core.
//!
//! This module provides [`EngineRuntime`], which lets an existing tokio
//! application hand domain events to the engine without awaiting them. Events
//! go into a bounded queue; a dispatcher task spawns one handler per event,
//! with at most `max_in_flight` handlers running at once.
//!
//! # Example
//!
//! ```rust,ignore
//! use kudos_core::engine::AchievementEngine;
//! use kudos_core::runtime::EngineRuntime;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let persistence = kudos_core::persistence::connect("sqlite:.data/kudos.db").await?;
//!     let engine = AchievementEngine::new(persistence);
//!
//!     let runtime = EngineRuntime::builder()
//!         .engine(engine)
//!         .max_in_flight(32)
//!         .build()?
//!         .start()
//!         .await?;
//!
//!     runtime.submit_envelope(envelope).await?;
//!
//!     // Graceful shutdown: queued and in-flight events are finished first
//!     runtime.shutdown().await?;
//!     Ok(())
//! }
//! ```

use std::sync::Arc;

use anyhow::Result;
use tokio::sync::{OwnedSemaphorePermit, Semaphore, mpsc, watch};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::engine::AchievementEngine;
use crate::router::{DomainEvent, EventEnvelope};

const DEFAULT_MAX_IN_FLIGHT: u32 = 64;
const DEFAULT_QUEUE_CAPACITY: usize = 1024;

/// Builder for creating an [`EngineRuntime`].
pub struct EngineRuntimeBuilder {
    engine: Option<AchievementEngine>,
    max_in_flight: u32,
    queue_capacity: usize,
}

impl std::fmt::Debug for EngineRuntimeBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRuntimeBuilder")
            .field("engine", &self.engine.as_ref().map(|_| "..."))
            .field("max_in_flight", &self.max_in_flight)
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

impl Default for EngineRuntimeBuilder {
    fn default() -> Self {
        Self {
            engine: None,
            max_in_flight: DEFAULT_MAX_IN_FLIGHT,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
        }
    }
}

impl EngineRuntimeBuilder {
    /// Create a new builder with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the engine (required).
    pub fn engine(mut self, engine: AchievementEngine) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Maximum number of events processed concurrently. `0` means unbounded.
    ///
    /// Default: `64`
    pub fn max_in_flight(mut self, max_in_flight: u32) -> Self {
        self.max_in_flight = max_in_flight;
        self
    }

    /// Capacity of the inbound event queue.
    ///
    /// Default: `1024`
    pub fn queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity;
        self
    }

    /// Take concurrency and queue settings from a [`Config`].
    pub fn config(self, config: &Config) -> Self {
        self.max_in_flight(config.max_in_flight)
            .queue_capacity(config.queue_capacity)
    }

    /// Build the runtime configuration.
    ///
    /// Returns an error if required fields are missing.
    pub fn build(self) -> Result<EngineRuntimeConfig> {
        let engine = self
            .engine
            .ok_or_else(|| anyhow::anyhow!("engine is required"))?;

        if self.queue_capacity == 0 {
            anyhow::bail!("queue_capacity must be greater than zero");
        }

        Ok(EngineRuntimeConfig {
            engine,
            max_in_flight: self.max_in_flight,
            queue_capacity: self.queue_capacity,
        })
    }
}

/// Configuration for an [`EngineRuntime`].
pub struct EngineRuntimeConfig {
    engine: AchievementEngine,
    max_in_flight: u32,
    queue_capacity: usize,
}

impl std::fmt::Debug for EngineRuntimeConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineRuntimeConfig")
            .field("engine", &"...")
            .field("max_in_flight", &self.max_in_flight)
            .field("queue_capacity", &self.queue_capacity)
            .finish()
    }
}

impl EngineRuntimeConfig {
    /// Start the runtime, spawning the dispatcher task.
    pub async fn start(self) -> Result<EngineRuntime> {
        let (sender, receiver) = mpsc::channel(self.queue_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        // Create semaphore for backpressure if configured
        let semaphore = (self.max_in_flight > 0)
            .then(|| Arc::new(Semaphore::new(self.max_in_flight as usize)));

        let dispatcher = tokio::spawn(run_dispatcher(
            self.engine.clone(),
            receiver,
            semaphore,
            shutdown_rx,
        ));

        info!(
            max_in_flight = self.max_in_flight,
            queue_capacity = self.queue_capacity,
            "EngineRuntime started"
        );

        Ok(EngineRuntime {
            sender,
            dispatcher,
            shutdown_tx,
            engine: self.engine,
        })
    }
}

enum Job {
    Event(DomainEvent),
    Envelope(EventEnvelope),
}

/// A running engine that accepts events asynchronously.
///
/// Call [`shutdown`](Self::shutdown) for graceful termination.
pub struct EngineRuntime {
    sender: mpsc::Sender<Job>,
    dispatcher: JoinHandle<Result<()>>,
    shutdown_tx: watch::Sender<bool>,
    engine: AchievementEngine,
}

impl EngineRuntime {
    /// Create a new builder for configuring the runtime.
    pub fn builder() -> EngineRuntimeBuilder {
        EngineRuntimeBuilder::new()
    }

    /// The engine events are dispatched to.
    pub fn engine(&self) -> &AchievementEngine {
        &self.engine
    }

    /// Queue a decoded event. Waits while the queue is full.
    pub async fn submit(&self, event: DomainEvent) -> Result<()> {
        self.enqueue(Job::Event(event)).await
    }

    /// Queue a wire envelope. Decoding happens in the handler.
    pub async fn submit_envelope(&self, envelope: EventEnvelope) -> Result<()> {
        self.enqueue(Job::Envelope(envelope)).await
    }

    async fn enqueue(&self, job: Job) -> Result<()> {
        self.sender
            .send(job)
            .await
            .map_err(|_| anyhow::anyhow!("runtime is shutting down"))
    }

    /// Gracefully shut down the runtime.
    ///
    /// Stops accepting events, finishes everything already queued, and waits
    /// for in-flight handlers.
    pub async fn shutdown(self) -> Result<()> {
        info!("EngineRuntime shutting down...");

        let _ = self.shutdown_tx.send(true);
        drop(self.sender);

        match self.dispatcher.await {
            Ok(Ok(())) => {
                info!("EngineRuntime shutdown complete");
                Ok(())
            }
            Ok(Err(e)) => {
                error!("EngineRuntime dispatcher error during shutdown: {}", e);
                Err(e)
            }
            Err(e) => {
                error!("EngineRuntime dispatcher task panicked: {}", e);
                Err(anyhow::anyhow!("dispatcher task panicked: {}", e))
            }
        }
    }

    /// Check if the runtime is still running.
    pub fn is_running(&self) -> bool {
        !self.dispatcher.is_finished()
    }
}

async fn run_dispatcher(
    engine: AchievementEngine,
    mut receiver: mpsc::Receiver<Job>,
    semaphore: Option<Arc<Semaphore>>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<()> {
    let mut handlers = JoinSet::new();
    let mut closing = false;

    loop {
        tokio::select! {
            biased;

            changed = shutdown_rx.changed(), if !closing => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    debug!("Dispatcher received shutdown signal, draining queue");
                    receiver.close();
                    closing = true;
                }
            }

            Some(joined) = handlers.join_next(), if !handlers.is_empty() => {
                log_join(joined);
            }

            job = receiver.recv() => {
                let Some(job) = job else { break };

                // Acquire permit if semaphore is configured
                let permit: Option<OwnedSemaphorePermit> = match &semaphore {
                    Some(sem) => match sem.clone().acquire_owned().await {
                        Ok(permit) => Some(permit),
                        Err(_) => {
                            warn!("semaphore closed, dropping event");
                            continue;
                        }
                    },
                    None => None,
                };

                let engine = engine.clone();
                handlers.spawn(async move {
                    let _permit = permit;
                    handle_job(&engine, job).await;
                });
            }
        }
    }

    while let Some(joined) = handlers.join_next().await {
        log_join(joined);
    }

    Ok(())
}

async fn handle_job(engine: &AchievementEngine, job: Job) {
    let report = match job {
        Job::Event(event) => engine.process(&event).await,
        Job::Envelope(envelope) => match engine.process_envelope(&envelope).await {
            Ok(report) => report,
            Err(e) => {
                warn!(event = %envelope.event, error = %e, "Rejected event");
                return;
            }
        },
    };

    if !report.is_success() {
        warn!(
            failures = report.failures.len(),
            updates = report.updates,
            "Event processed with failures"
        );
    }
}

fn log_join(joined: std::result::Result<(), tokio::task::JoinError>) {
    if let Err(e) = joined {
        error!("Event handler task panicked: {}", e);
    }
}

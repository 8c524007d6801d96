//! Dedicated runtime hosting the engine task.
//!
//! Mirrors the request/response contract of the engine: poll requests and
//! action intents go in through one channel, snapshots and results come back
//! through another. The engine task is strictly serial; rapid re-polls
//! coalesce through a single-slot mailbox where the latest request wins.

use std::sync::Arc;

use log::info;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use crate::core::executor::CommandRunner;
use crate::core::telemetry::Telemetry;
use crate::platform::Signaler;

use super::{EngineConfig, PollRequest, RuntimeEngine};

const COMMAND_QUEUE_DEPTH: usize = 64;
const EVENT_QUEUE_DEPTH: usize = 64;

/// Requests accepted by the engine task.
#[derive(Debug, Clone)]
pub enum EngineCommand {
    Poll(PollRequest),
    Action { name: String, payload: Value },
    FetchNodeParameters { domain_id: String, node: String },
}

/// Events emitted back to the presentation layer.
#[derive(Debug, Clone)]
pub enum EngineEvent {
    SnapshotReady(Value),
    ActionFinished(Value),
    NodeParametersReady(Value),
}

/// Handle owning the engine's runtime and channels.
pub struct EngineRuntime {
    pub command_tx: mpsc::Sender<EngineCommand>,
    pub event_rx: mpsc::Receiver<EngineEvent>,
    shutdown_tx: broadcast::Sender<()>,
    _runtime: tokio::runtime::Runtime,
}

impl EngineRuntime {
    /// Builds the production engine on a dedicated two-worker runtime.
    pub fn start(config: EngineConfig) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .thread_name("roscope-engine")
            .build()?;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        runtime.spawn(async move {
            let engine = RuntimeEngine::new(config);
            engine_task(engine, command_rx, event_tx, shutdown_rx).await;
        });

        Ok(Self {
            command_tx,
            event_rx,
            shutdown_tx,
            _runtime: runtime,
        })
    }

    /// As [`start`], with every external seam injected.
    pub fn start_with_parts(
        config: EngineConfig,
        runner: Arc<dyn CommandRunner>,
        signaler: Box<dyn Signaler>,
        telemetry: Telemetry,
    ) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .thread_name("roscope-engine")
            .build()?;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        runtime.spawn(async move {
            let engine = RuntimeEngine::with_parts(config, runner, signaler, telemetry);
            engine_task(engine, command_rx, event_tx, shutdown_rx).await;
        });

        Ok(Self {
            command_tx,
            event_rx,
            shutdown_tx,
            _runtime: runtime,
        })
    }

    pub fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Serial engine loop.
///
/// At most one poll runs at a time; polls arriving while one is in flight
/// collapse into the single pending slot (latest wins). Mutating actions set
/// the slot so their effects are re-observed immediately.
pub async fn engine_task(
    mut engine: RuntimeEngine,
    mut command_rx: mpsc::Receiver<EngineCommand>,
    event_tx: mpsc::Sender<EngineEvent>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    info!("engine task started");
    let mut pending_poll: Option<PollRequest> = None;

    loop {
        let command = if let Some(request) = pending_poll.take() {
            EngineCommand::Poll(request)
        } else {
            tokio::select! {
                command = command_rx.recv() => match command {
                    Some(command) => command,
                    None => break,
                },
                _ = shutdown_rx.recv() => break,
            }
        };

        match command {
            EngineCommand::Poll(mut request) => {
                // Collapse any queued polls into this one; actions queued
                // behind them are handled afterwards in arrival order.
                let mut deferred = Vec::new();
                while let Ok(next) = command_rx.try_recv() {
                    match next {
                        EngineCommand::Poll(newer) => request = newer,
                        other => deferred.push(other),
                    }
                }

                let snapshot = engine.poll(request).await;
                if event_tx
                    .send(EngineEvent::SnapshotReady(snapshot))
                    .await
                    .is_err()
                {
                    break;
                }

                for command in deferred {
                    if !handle_side_command(&mut engine, command, &event_tx, &mut pending_poll)
                        .await
                    {
                        return;
                    }
                }
            }
            other => {
                if !handle_side_command(&mut engine, other, &event_tx, &mut pending_poll).await {
                    return;
                }
            }
        }
    }
    info!("engine task stopped");
}

/// Handles actions and parameter fetches; returns false when the event
/// channel is gone.
async fn handle_side_command(
    engine: &mut RuntimeEngine,
    command: EngineCommand,
    event_tx: &mpsc::Sender<EngineEvent>,
    pending_poll: &mut Option<PollRequest>,
) -> bool {
    match command {
        EngineCommand::Poll(request) => {
            *pending_poll = Some(request);
            true
        }
        EngineCommand::Action { name, payload } => {
            let (result, wants_repoll) = engine.run_action(&name, &payload).await;
            if wants_repoll {
                *pending_poll = Some(engine.last_request());
            }
            event_tx
                .send(EngineEvent::ActionFinished(result))
                .await
                .is_ok()
        }
        EngineCommand::FetchNodeParameters { domain_id, node } => {
            let result = engine.fetch_node_parameters(&domain_id, &node).await;
            event_tx
                .send(EngineEvent::NodeParametersReady(result))
                .await
                .is_ok()
        }
    }
}

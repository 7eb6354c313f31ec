//! Per-symbol async worker
//!
//! One tokio task owns a `SymbolPipeline`. Feeds never touch the pipeline
//! directly: they enqueue commands on a bounded channel and the task
//! applies them one at a time, which serializes every mutation for the
//! symbol. Outbound events fan out on a broadcast channel.
//!
//! Housekeeping timers (quality recompute, retention sweep, profile
//! cleanup, heartbeat supervision) run in the same `select!` loop, so they
//! never race with ingestion. They are suspended while the pipeline is
//! halted.
//!
//! Stopping cancels the loop and hands the pipeline back, so snapshots
//! computed before the stop stay queryable.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use types::errors::PipelineError;
use types::ids::{FeedId, Symbol};
use types::market::{OrderBookSnapshot, TapeEntry, Tick};
use types::time::now_nanos;

use crate::events::{AnalyticsEvent, InboundMessage};
use crate::feeds::FeedStatus;
use crate::liquidity::LiquidityProfile;
use crate::metrics::QualityMetrics;
use crate::order_flow::FlowMetrics;
use crate::pipeline::SymbolPipeline;
use crate::scoring::FlowSignal;
use crate::volume_profile::ProfileBucket;

type Query = Box<dyn FnOnce(&SymbolPipeline) + Send>;
type IngestReply = oneshot::Sender<Result<Vec<AnalyticsEvent>, PipelineError>>;

enum Command {
    Inbound {
        message: InboundMessage,
        reply: Option<IngestReply>,
    },
    Query(Query),
    EmergencyShutdown {
        reason: String,
        ack: oneshot::Sender<()>,
    },
    Reinitialize {
        ack: oneshot::Sender<()>,
    },
}

/// Nanosecond clock anchored to wall time at spawn and advanced by the
/// tokio clock, so paused-time tests drive it.
#[derive(Debug, Clone, Copy)]
struct WorkerClock {
    wall_origin: i64,
    origin: Instant,
}

impl WorkerClock {
    fn start() -> Self {
        Self {
            wall_origin: now_nanos(),
            origin: Instant::now(),
        }
    }

    fn now(&self) -> i64 {
        let elapsed = i64::try_from(self.origin.elapsed().as_nanos()).unwrap_or(i64::MAX);
        self.wall_origin.saturating_add(elapsed)
    }
}

/// Cloneable handle to a running worker.
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    symbol: Symbol,
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<AnalyticsEvent>,
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Inbound { message, .. } => write!(f, "Inbound({})", message.type_label()),
            Command::Query(_) => write!(f, "Query"),
            Command::EmergencyShutdown { reason, .. } => write!(f, "EmergencyShutdown({reason})"),
            Command::Reinitialize { .. } => write!(f, "Reinitialize"),
        }
    }
}

impl PipelineHandle {
    pub fn symbol(&self) -> &Symbol {
        &self.symbol
    }

    /// Receive every outbound event emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<AnalyticsEvent> {
        self.events.subscribe()
    }

    /// Enqueue a message without waiting for it to be processed.
    ///
    /// Waits for queue capacity when the worker is behind.
    pub async fn send(&self, message: InboundMessage) -> Result<(), PipelineError> {
        self.commands
            .send(Command::Inbound {
                message,
                reply: None,
            })
            .await
            .map_err(|_| PipelineError::Stopped)
    }

    /// Enqueue a message and wait for the events it produced.
    pub async fn process(
        &self,
        message: InboundMessage,
    ) -> Result<Vec<AnalyticsEvent>, PipelineError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(Command::Inbound {
                message,
                reply: Some(tx),
            })
            .await
            .map_err(|_| PipelineError::Stopped)?;
        rx.await.map_err(|_| PipelineError::Stopped)?
    }

    /// Run a read-only closure on the owning task and return its result.
    pub async fn query<R, F>(&self, f: F) -> Result<R, PipelineError>
    where
        R: Send + 'static,
        F: FnOnce(&SymbolPipeline) -> R + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let query: Query = Box::new(move |pipeline| {
            let _ = tx.send(f(pipeline));
        });
        self.commands
            .send(Command::Query(query))
            .await
            .map_err(|_| PipelineError::Stopped)?;
        rx.await.map_err(|_| PipelineError::Stopped)
    }

    pub async fn emergency_shutdown(&self, reason: impl Into<String>) -> Result<(), PipelineError> {
        let (ack, rx) = oneshot::channel();
        self.commands
            .send(Command::EmergencyShutdown {
                reason: reason.into(),
                ack,
            })
            .await
            .map_err(|_| PipelineError::Stopped)?;
        rx.await.map_err(|_| PipelineError::Stopped)
    }

    pub async fn reinitialize(&self) -> Result<(), PipelineError> {
        let (ack, rx) = oneshot::channel();
        self.commands
            .send(Command::Reinitialize { ack })
            .await
            .map_err(|_| PipelineError::Stopped)?;
        rx.await.map_err(|_| PipelineError::Stopped)
    }

    pub async fn current_market_data(&self) -> Result<Option<Tick>, PipelineError> {
        self.query(|p| p.current_market_data()).await
    }

    pub async fn order_book(&self) -> Result<Option<OrderBookSnapshot>, PipelineError> {
        self.query(|p| p.order_book()).await
    }

    pub async fn recent_ticks(&self, count: usize) -> Result<Vec<Tick>, PipelineError> {
        self.query(move |p| p.recent_ticks(count)).await
    }

    pub async fn recent_tape(&self, count: usize) -> Result<Vec<TapeEntry>, PipelineError> {
        self.query(move |p| p.recent_tape(count)).await
    }

    pub async fn volume_profile(&self) -> Result<Vec<ProfileBucket>, PipelineError> {
        self.query(|p| p.volume_profile()).await
    }

    pub async fn liquidity_profile(&self) -> Result<LiquidityProfile, PipelineError> {
        self.query(|p| p.liquidity_profile()).await
    }

    pub async fn flow_metrics(&self) -> Result<FlowMetrics, PipelineError> {
        self.query(|p| p.flow_metrics()).await
    }

    pub async fn flow_signal(&self) -> Result<FlowSignal, PipelineError> {
        self.query(|p| p.flow_signal()).await
    }

    pub async fn feed_statuses(&self) -> Result<Vec<FeedStatus>, PipelineError> {
        self.query(|p| p.feed_statuses()).await
    }

    pub async fn quality(&self, feed_id: FeedId) -> Result<Option<QualityMetrics>, PipelineError> {
        self.query(move |p| p.quality(&feed_id)).await
    }

    pub async fn is_ready(&self) -> Result<bool, PipelineError> {
        self.query(|p| p.is_ready()).await
    }

    pub async fn is_halted(&self) -> Result<bool, PipelineError> {
        self.query(|p| p.is_halted()).await
    }
}

/// A running worker: the handle plus ownership of the task.
#[derive(Debug)]
pub struct PipelineWorker {
    handle: PipelineHandle,
    cancel: CancellationToken,
    task: JoinHandle<SymbolPipeline>,
}

impl PipelineWorker {
    /// Spawn the owning task. Must be called inside a tokio runtime.
    pub fn spawn(pipeline: SymbolPipeline) -> Self {
        let worker = &pipeline.config().worker;
        let (command_tx, command_rx) = mpsc::channel(worker.command_capacity);
        let (event_tx, _) = broadcast::channel(worker.event_capacity);
        let cancel = CancellationToken::new();

        let handle = PipelineHandle {
            symbol: pipeline.symbol().clone(),
            commands: command_tx,
            events: event_tx.clone(),
        };
        let task = tokio::spawn(run(pipeline, command_rx, event_tx, cancel.clone()));

        Self {
            handle,
            cancel,
            task,
        }
    }

    pub fn handle(&self) -> PipelineHandle {
        self.handle.clone()
    }

    /// Stop accepting input, cancel timers and return the final pipeline.
    pub async fn stop(self) -> Result<SymbolPipeline, PipelineError> {
        self.cancel.cancel();
        self.task.await.map_err(|err| {
            warn!(error = %err, "Pipeline worker task failed");
            PipelineError::Stopped
        })
    }
}

fn timer(period_ms: u64) -> Interval {
    let period = Duration::from_millis(period_ms.max(1));
    let mut interval = interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    interval
}

async fn run(
    mut pipeline: SymbolPipeline,
    mut commands: mpsc::Receiver<Command>,
    events: broadcast::Sender<AnalyticsEvent>,
    cancel: CancellationToken,
) -> SymbolPipeline {
    let clock = WorkerClock::start();
    let config = pipeline.config().clone();
    let mut quality = timer(config.telemetry.recompute_interval_ms);
    let mut sweep = timer(config.store.sweep_interval_ms);
    let mut cleanup = timer(config.profile.cleanup_interval_ms);
    let mut heartbeat = timer(config.worker.heartbeat_check_interval_ms);

    let publish = |emitted: &[AnalyticsEvent]| {
        for event in emitted {
            // No subscribers is not an error.
            let _ = events.send(event.clone());
        }
    };

    info!(symbol = %pipeline.symbol(), "Pipeline worker started");

    loop {
        let halted = pipeline.is_halted();
        tokio::select! {
            biased;

            () = cancel.cancelled() => {
                debug!(symbol = %pipeline.symbol(), "Pipeline worker cancelled");
                break;
            }
            command = commands.recv() => {
                let Some(command) = command else { break };
                match command {
                    Command::Inbound { message, reply } => {
                        let kind = message.type_label();
                        let result = pipeline.handle(message, clock.now());
                        match &result {
                            Ok(emitted) => publish(emitted),
                            Err(err) => debug!(kind, error = %err, "Inbound message rejected"),
                        }
                        if let Some(reply) = reply {
                            let _ = reply.send(result);
                        }
                    }
                    Command::Query(query) => query(&pipeline),
                    Command::EmergencyShutdown { reason, ack } => {
                        let event = pipeline.emergency_shutdown(&reason, clock.now());
                        publish(std::slice::from_ref(&event));
                        let _ = ack.send(());
                    }
                    Command::Reinitialize { ack } => {
                        pipeline.reinitialize(clock.now());
                        for interval in [&mut quality, &mut sweep, &mut cleanup, &mut heartbeat] {
                            interval.reset();
                        }
                        let _ = ack.send(());
                    }
                }
            }
            _ = quality.tick(), if !halted => {
                pipeline.recompute_quality(clock.now());
            }
            _ = sweep.tick(), if !halted => {
                pipeline.sweep(clock.now());
            }
            _ = cleanup.tick(), if !halted => {
                pipeline.cleanup_profile();
            }
            _ = heartbeat.tick(), if !halted => {
                let emitted = pipeline.check_heartbeats(clock.now());
                publish(&emitted);
            }
        }
    }

    info!(symbol = %pipeline.symbol(), "Pipeline worker stopped");
    pipeline
}

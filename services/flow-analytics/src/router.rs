//! Multi-symbol routing
//!
//! A pipeline serves one instrument. The router keeps one worker per
//! symbol and forwards each inbound message to the owner of its payload
//! symbol. Tape batches are split per symbol; feed lifecycle calls fan out
//! to every symbol since a feed usually carries several instruments.

use std::collections::BTreeMap;

use tracing::{info, warn};
use types::errors::PipelineError;
use types::ids::{FeedId, Symbol};
use types::market::TapeEntry;

use crate::config::PipelineConfig;
use crate::events::{AnalyticsEvent, FeedMessage, InboundMessage};
use crate::pipeline::SymbolPipeline;
use crate::worker::{PipelineHandle, PipelineWorker};

/// Routes inbound messages to per-symbol workers.
///
/// Uses BTreeMap for deterministic fan-out order.
#[derive(Debug, Default)]
pub struct FlowRouter {
    workers: BTreeMap<Symbol, PipelineWorker>,
}

impl FlowRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build and spawn a worker for `symbol`. Replaces nothing: adding a
    /// symbol twice returns the existing handle.
    pub fn add_symbol(
        &mut self,
        symbol: Symbol,
        config: PipelineConfig,
        now: i64,
    ) -> Result<PipelineHandle, PipelineError> {
        if let Some(worker) = self.workers.get(&symbol) {
            return Ok(worker.handle());
        }
        let pipeline = SymbolPipeline::new(symbol.clone(), config, now)?;
        let worker = PipelineWorker::spawn(pipeline);
        let handle = worker.handle();
        info!(symbol = %symbol, "Symbol pipeline added");
        self.workers.insert(symbol, worker);
        Ok(handle)
    }

    pub fn handle(&self, symbol: &Symbol) -> Result<PipelineHandle, PipelineError> {
        self.workers
            .get(symbol)
            .map(PipelineWorker::handle)
            .ok_or_else(|| PipelineError::UnknownSymbol(symbol.clone()))
    }

    pub fn symbols(&self) -> Vec<Symbol> {
        self.workers.keys().cloned().collect()
    }

    /// Route a message and wait for the events it produced.
    ///
    /// Lifecycle fan-out attempts every symbol and reports the first error.
    pub async fn route(&self, message: InboundMessage) -> Result<Vec<AnalyticsEvent>, PipelineError> {
        let mut events = Vec::new();
        let mut first_error = None;
        for (handle, message) in self.split(message)? {
            match handle.process(message).await {
                Ok(mut emitted) => events.append(&mut emitted),
                Err(err) => {
                    warn!(symbol = %handle.symbol(), error = %err, "Routed message failed");
                    first_error.get_or_insert(err);
                }
            }
        }
        match first_error {
            Some(err) => Err(err),
            None => Ok(events),
        }
    }

    /// Route a message without waiting for processing.
    pub async fn submit(&self, message: InboundMessage) -> Result<(), PipelineError> {
        for (handle, message) in self.split(message)? {
            handle.send(message).await?;
        }
        Ok(())
    }

    /// Stop every worker and return the final pipelines.
    pub async fn stop_all(self) -> BTreeMap<Symbol, SymbolPipeline> {
        let mut stopped = BTreeMap::new();
        for (symbol, worker) in self.workers {
            match worker.stop().await {
                Ok(pipeline) => {
                    stopped.insert(symbol, pipeline);
                }
                Err(err) => warn!(symbol = %symbol, error = %err, "Worker did not stop cleanly"),
            }
        }
        stopped
    }

    /// Resolve the target handles for a message. Fails without routing
    /// anything if a payload names an unknown symbol.
    fn split(
        &self,
        message: InboundMessage,
    ) -> Result<Vec<(PipelineHandle, InboundMessage)>, PipelineError> {
        match message {
            InboundMessage::Tape { feed_id, message } => self.split_tape(feed_id, message),
            other => {
                if let Some(symbol) = payload_symbol(&other).cloned() {
                    return Ok(vec![(self.handle(&symbol)?, other)]);
                }
                Ok(self
                    .workers
                    .values()
                    .map(|worker| (worker.handle(), other.clone()))
                    .collect())
            }
        }
    }

    fn split_tape(
        &self,
        feed_id: FeedId,
        message: FeedMessage<Vec<TapeEntry>>,
    ) -> Result<Vec<(PipelineHandle, InboundMessage)>, PipelineError> {
        let mut batches: BTreeMap<Symbol, Vec<TapeEntry>> = BTreeMap::new();
        for entry in message.payload {
            batches.entry(entry.symbol.clone()).or_default().push(entry);
        }

        let mut routed = Vec::with_capacity(batches.len());
        for (symbol, entries) in batches {
            let handle = self.handle(&symbol)?;
            let batch = InboundMessage::Tape {
                feed_id: feed_id.clone(),
                message: FeedMessage {
                    sequence: message.sequence,
                    timestamp: message.timestamp,
                    payload: entries,
                },
            };
            routed.push((handle, batch));
        }
        Ok(routed)
    }
}

/// Symbol of a single-instrument payload; `None` for lifecycle calls.
fn payload_symbol(message: &InboundMessage) -> Option<&Symbol> {
    match message {
        InboundMessage::Tick { message, .. } => Some(&message.payload.symbol),
        InboundMessage::OrderBook { message, .. } => Some(&message.payload.symbol),
        InboundMessage::Tape { .. }
        | InboundMessage::Connect { .. }
        | InboundMessage::Disconnect { .. }
        | InboundMessage::Heartbeat { .. } => None,
    }
}

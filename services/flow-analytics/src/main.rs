//! flow-replay: feed a JSON-lines capture through the analytics pipeline
//!
//! Each input line is one `InboundMessage`. Emitted events are written to
//! stdout as JSON lines; logs go to stderr.

use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;
use types::ids::Symbol;
use types::time::now_nanos;

use flow_analytics::{FlowRouter, InboundMessage, PipelineConfig, SERVICE_VERSION};

#[derive(Debug, Parser)]
#[command(name = "flow-replay", version, about = "Replay captured feed messages through the flow analytics pipeline")]
struct Args {
    /// Pipeline configuration (JSON). Defaults apply when omitted.
    #[arg(short, long, env = "FLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Symbols to run pipelines for.
    #[arg(short, long, required = true, value_delimiter = ',')]
    symbols: Vec<String>,

    /// Input file of JSON-lines messages. Reads stdin when omitted.
    input: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    info!(version = SERVICE_VERSION, "Starting flow-replay");

    let config = match &args.config {
        Some(path) => PipelineConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    let mut router = FlowRouter::new();
    for raw in &args.symbols {
        let symbol = Symbol::try_new(raw.as_str())
            .with_context(|| format!("invalid symbol {raw:?}"))?;
        router.add_symbol(symbol, config.clone(), now_nanos())?;
    }

    let reader: Box<dyn AsyncBufRead + Unpin> = match &args.input {
        Some(path) => {
            let file = tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening input {}", path.display()))?;
            Box::new(BufReader::new(file))
        }
        None => Box::new(BufReader::new(tokio::io::stdin())),
    };

    let mut stdout = tokio::io::stdout();
    let mut lines = reader.lines();
    let mut line_no = 0u64;
    let mut emitted = 0u64;

    while let Some(line) = lines.next_line().await? {
        line_no += 1;
        if line.trim().is_empty() {
            continue;
        }
        let message: InboundMessage = match serde_json::from_str(&line) {
            Ok(message) => message,
            Err(err) => {
                warn!(line = line_no, error = %err, "Skipping malformed line");
                continue;
            }
        };
        match router.route(message).await {
            Ok(events) => {
                for event in events {
                    let mut json = serde_json::to_vec(&event)?;
                    json.push(b'\n');
                    stdout.write_all(&json).await?;
                    emitted += 1;
                }
            }
            Err(err) => warn!(line = line_no, error = %err, "Message not routed"),
        }
    }
    stdout.flush().await?;

    let pipelines = router.stop_all().await;
    for (symbol, pipeline) in &pipelines {
        let signal = pipeline.flow_signal();
        info!(
            symbol = %symbol,
            net_flow = %pipeline.flow_metrics().net_order_flow,
            direction = ?signal.direction,
            confidence = signal.confidence,
            ready = pipeline.is_ready(),
            "Final pipeline state"
        );
    }
    info!(lines = line_no, events = emitted, "Replay complete");
    Ok(())
}

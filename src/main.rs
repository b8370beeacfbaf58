// sentinel/src/main.rs
//
// Sentinel — continuous behavioral authentication engine.
//
// Two feed modes for driving the engine without the HTTP transport:
//   tail    — follow a live JSONL feed of stream batches + evaluate calls
//   replay  — replay a captured feed at scaled speed (testing/research)
//
// Usage:
//   sentinel --mode tail --path /var/log/sentinel/feed.jsonl
//   sentinel --mode replay --path captured.jsonl --speed 10.0
//
// Feed records are tagged JSONL:
//   {"type":"keyboard","session_id":...,"user_id":...,"batch_id":1,"events":[...]}
//   {"type":"mouse",...}
//   {"type":"evaluate","session_id":...,"request_context":{...},"eval_id":...}

use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, ValueEnum};
use serde::Deserialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use sentinel::events::{Decision, EvalOutcome, EvaluateRequest, KeyboardBatch, MouseBatch};
use sentinel::util::Clock;
use sentinel::{Orchestrator, SentinelConfig, SentinelError};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "sentinel",
    about = "Continuous behavioral authentication engine",
    version = env!("CARGO_PKG_VERSION"),
)]
struct Cli {
    #[arg(long, value_enum, default_value = "tail")]
    mode: Mode,

    #[arg(long, default_value = "/tmp/sentinel_feed.jsonl",
          help = "JSONL feed path")]
    path: PathBuf,

    #[arg(long, default_value = "1.0", help = "Replay speed multiplier")]
    speed: f64,
}

#[derive(Clone, ValueEnum)]
enum Mode {
    Tail,   // follow a live JSONL feed
    Replay, // replay a static feed at scaled speed
}

// ── Feed records ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum FeedRecord {
    Keyboard(KeyboardBatch),
    Mouse(MouseBatch),
    Evaluate(EvaluateRequest),
}

// ── Pipeline ──────────────────────────────────────────────────────────────────

struct Pipeline {
    engine: Orchestrator,
    evals: AtomicU64,
    ingested: AtomicU64,
}

impl Pipeline {
    fn new() -> Self {
        Self {
            engine: Orchestrator::new(SentinelConfig::default(), Clock::system()),
            evals: AtomicU64::new(0),
            ingested: AtomicU64::new(0),
        }
    }

    async fn process(&self, record: FeedRecord) {
        match record {
            FeedRecord::Keyboard(batch) => {
                self.ingested.fetch_add(1, Ordering::Relaxed);
                match self.engine.ingest_keyboard(&batch).await {
                    Ok(()) => {}
                    Err(SentinelError::Validation(msg)) => {
                        warn!(session_id = %batch.session_id, msg, "keyboard batch rejected")
                    }
                    Err(e) => warn!(%e, "keyboard ingest failed"),
                }
            }
            FeedRecord::Mouse(batch) => {
                self.ingested.fetch_add(1, Ordering::Relaxed);
                match self.engine.ingest_mouse(&batch).await {
                    Ok(()) => {}
                    Err(SentinelError::Validation(msg)) => {
                        warn!(session_id = %batch.session_id, msg, "mouse batch rejected")
                    }
                    Err(e) => warn!(%e, "mouse ingest failed"),
                }
            }
            FeedRecord::Evaluate(request) => {
                self.evals.fetch_add(1, Ordering::Relaxed);
                let session_id = request.session_id.clone();
                let outcome = self.engine.evaluate(&request).await;
                print_decision(&session_id, &outcome);
            }
        }
    }
}

// ── Terminal output ───────────────────────────────────────────────────────────

fn print_decision(session_id: &str, outcome: &EvalOutcome) {
    let (color, label) = match outcome.decision {
        Decision::Allow => ("\x1b[92m", "ALLOW"),
        Decision::Challenge => ("\x1b[93;1m", "CHALLENGE"),
        Decision::Block => ("\x1b[91;1m", "BLOCK"),
    };
    let reset = "\x1b[0m";
    let vectors = outcome
        .anomaly_vectors
        .iter()
        .take(3)
        .cloned()
        .collect::<Vec<_>>()
        .join(" | ");

    println!("\n{}{} {}{}", color, label, outcome.risk, reset);
    println!("  Session : {}{}{}", color, session_id, reset);
    println!("  Mode    : {}", outcome.mode);
    if !vectors.is_empty() {
        println!("  Vectors : {}", vectors);
    }
    if let Some(ttl) = outcome.ban_expires_in_seconds {
        println!("  Ban     : {}{}s{}", color, ttl, reset);
    }
}

async fn print_stats_loop(pipeline: Arc<Pipeline>, start: Instant) {
    loop {
        tokio::time::sleep(tokio::time::Duration::from_secs(30)).await;
        let elapsed = start.elapsed().as_secs_f64();
        println!(
            "\n\x1b[1m── stats  uptime={:.0}s  batches={}  evals={}  sessions={}  audits={} ──\x1b[0m",
            elapsed,
            pipeline.ingested.load(Ordering::Relaxed),
            pipeline.evals.load(Ordering::Relaxed),
            pipeline.engine.sessions.n_sessions(),
            pipeline.engine.audit.len(),
        );
    }
}

// ── Feed sources ──────────────────────────────────────────────────────────────

async fn tail_jsonl(path: PathBuf, tx: mpsc::Sender<FeedRecord>, seek_end: bool) -> Result<()> {
    let file = tokio::fs::File::open(&path).await?;
    let mut lines = BufReader::new(file).lines();

    if seek_end {
        while lines.next_line().await?.is_some() {} // consume existing
    }

    info!("Tailing {}", path.display());
    loop {
        match lines.next_line().await? {
            Some(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<FeedRecord>(line) {
                    Ok(record) => {
                        if tx.send(record).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("Parse error: {}", e),
                }
            }
            None => tokio::time::sleep(tokio::time::Duration::from_millis(50)).await,
        }
    }
    Ok(())
}

async fn replay_jsonl(path: PathBuf, tx: mpsc::Sender<FeedRecord>, speed: f64) -> Result<()> {
    let content = tokio::fs::read_to_string(&path).await?;
    let pace = tokio::time::Duration::from_secs_f64(0.01 / speed.max(0.01));

    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<FeedRecord>(line) {
            Ok(record) => {
                if tx.send(record).await.is_err() {
                    break;
                }
                tokio::time::sleep(pace).await;
            }
            Err(e) => warn!("Parse error: {}", e),
        }
    }
    Ok(())
}

// ── Main ──────────────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::from_default_env().add_directive("sentinel=info".parse()?),
        )
        .compact()
        .init();

    let cli = Cli::parse();
    let pipeline = Arc::new(Pipeline::new());
    let start = Instant::now();
    let (tx, mut rx) = mpsc::channel::<FeedRecord>(16384);

    println!("\x1b[1msentinel\x1b[0m — continuous behavioral authentication engine");

    // Stats printer
    tokio::spawn(print_stats_loop(Arc::clone(&pipeline), start));

    // Hot-state housekeeping
    tokio::spawn(Arc::clone(&pipeline.engine.sessions).housekeeping_loop());

    match cli.mode {
        Mode::Tail => {
            println!("  Mode: \x1b[96mTAIL\x1b[0m  |  {}\n", cli.path.display());
            let path = cli.path.clone();
            tokio::spawn(async move {
                tail_jsonl(path, tx, true).await.ok();
            });
        }
        Mode::Replay => {
            println!(
                "  Mode: \x1b[93mREPLAY\x1b[0m  |  {}  speed={:.1}x\n",
                cli.path.display(),
                cli.speed
            );
            let path = cli.path.clone();
            let speed = cli.speed;
            tokio::spawn(async move {
                replay_jsonl(path, tx, speed).await.ok();
            });
        }
    }

    println!("  Press Ctrl+C to stop.\n");

    // Stream order matters per session: process sequentially. Evaluates
    // from distinct sessions could fan out, but the feed driver favors
    // reproducibility over throughput.
    while let Some(record) = rx.recv().await {
        pipeline.process(record).await;
    }

    Ok(())
}

use anyhow::Context;
use clap::Parser;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use objstore_bench::config::{Args, Backend, BenchPlan};
use objstore_bench::metrics::MetricsCollector;
use objstore_bench::storage::{with_retry, FsStore, MemoryStore, ObjectStore, RedisStore};
use objstore_bench::{logging, server, suite, BenchError};

#[tokio::main]
async fn main() {
    let args = Args::parse();
    logging::init(args.verbose);

    println!();
    println!("╔══════════════════════════════════════════════════╗");
    println!("║   OBJECT STORAGE LATENCY BENCHMARK               ║");
    println!("╚══════════════════════════════════════════════════╝");
    println!();

    if let Err(e) = run(args).await {
        eprintln!("❌ {e:#}");
        process::exit(1);
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let plan = BenchPlan::load(&args).context("loading benchmark plan")?;

    // ── 1. Storage client ────────────────────────────────────────
    let store = connect(&args, &plan).await?;
    println!("🔌 Backend: {}", store.name());

    // ── 2. Shared collector (+ optional live view) ───────────────
    let collector = Arc::new(MetricsCollector::new());
    let server = match args.serve {
        Some(addr) => Some(
            server::spawn(addr, collector.clone())
                .await
                .with_context(|| format!("serving live metrics on {addr}"))?,
        ),
        None => None,
    };

    // ── 3. Run the plan ──────────────────────────────────────────
    let result = suite::run(&plan, store, collector).await?;

    let failed = result.failed_phases();
    println!();
    if failed.is_empty() {
        println!("✓ {} phases completed", result.reports.len());
    } else {
        for r in &failed {
            println!("  {}: {} operations failed", r.label, r.failures.len());
        }
        println!(
            "✗ {} of {} phases had failed operations",
            failed.len(),
            result.reports.len()
        );
    }

    if let Some((_, handle)) = server {
        handle.abort();
    }
    Ok(())
}

async fn connect(args: &Args, plan: &BenchPlan) -> Result<Arc<dyn ObjectStore>, BenchError> {
    let store: Arc<dyn ObjectStore> = match args.backend {
        Backend::Memory => match args.memory_latency_ms {
            Some(ms) => Arc::new(MemoryStore::with_latency(Duration::from_millis(ms))),
            None => Arc::new(MemoryStore::new()),
        },
        Backend::Fs => Arc::new(FsStore::new(&args.fs_root)),
        Backend::Redis => {
            println!("🔌 Connecting to Redis at {}...", args.redis_url);
            let store = with_retry("connect", plan.setup_attempts, Duration::from_secs(1), || {
                RedisStore::connect(&args.redis_url, &args.redis_namespace)
            })
            .await
            .map_err(|e| BenchError::Setup(format!("{e} (is redis-server running?)")))?;
            Arc::new(store)
        }
    };
    Ok(store)
}

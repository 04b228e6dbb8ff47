//! `plugin-host`: runs a guest export from several parallel callers.
//!
//! Every caller borrows its own context from the pool, so the export runs
//! `concurrency` times at once. The first failure cancels the rest and
//! makes the process exit non-zero.

use acton_plugins::api::DryRunLockClient;
use acton_plugins::capability::Capability;
use acton_plugins::config::{self, HostConfig};
use acton_plugins::logging::{self, LogLevel};
use acton_plugins::pool::{ExecutionContextPool, PoolOptions};
use acton_plugins::runtime::WasmtimeEngine;
use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(name = "plugin-host", about = "Run a plugin module in a pool of sandboxes")]
struct Args {
    /// Configuration file; defaults to the standard search paths.
    #[arg(short, long, value_name = "FILE", env = "PLUGIN_HOST_CONFIG")]
    config: Option<PathBuf>,

    /// Guest module, overriding `pool.module`.
    #[arg(short, long, value_name = "FILE")]
    module: Option<PathBuf>,

    /// Export to invoke.
    #[arg(short, long, default_value = "test")]
    export: String,

    /// Number of parallel callers, overriding `pool.concurrency`.
    #[arg(long)]
    concurrency: Option<usize>,

    /// Log level used when `RUST_LOG` is unset.
    #[arg(long, value_parser = parse_level)]
    log_level: Option<LogLevel>,
}

fn parse_level(value: &str) -> Result<LogLevel, String> {
    match value.to_ascii_lowercase().as_str() {
        "trace" => Ok(LogLevel::Trace),
        "debug" => Ok(LogLevel::Debug),
        "info" => Ok(LogLevel::Info),
        "warn" => Ok(LogLevel::Warn),
        "error" => Ok(LogLevel::Error),
        other => Err(format!("unknown log level '{other}'")),
    }
}

fn resolve_config(args: &Args) -> Result<HostConfig> {
    let mut config = match &args.config {
        Some(path) => config::from_path(path)?,
        None => config::load()?,
    };
    if let Some(module) = &args.module {
        config.pool.module = Some(module.clone());
    }
    if let Some(concurrency) = args.concurrency {
        config.pool.concurrency = concurrency;
    }
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let config = resolve_config(&args)?;
    logging::init(&config.logging);

    let module_path = config
        .pool
        .module
        .clone()
        .context("no guest module given; pass --module or set pool.module")?;
    let module = std::fs::read(&module_path)
        .with_context(|| format!("failed to read module {}", module_path.display()))?;

    let engine = Arc::new(WasmtimeEngine::new(config.pool.memory_limit)?);
    let store = config.token_store.open().await?;
    let decoder = config.string_encoding;

    let options = PoolOptions::new(engine, module)
        .with_concurrency(config.pool.concurrency)
        .with_timeout(config.pool.timeout())
        .with_capabilities([
            Capability::env().with_decoder(decoder),
            Capability::token_store(store).with_decoder(decoder),
            Capability::Interop,
            Capability::lock_api(Arc::new(DryRunLockClient::new())),
        ]);
    let pool = ExecutionContextPool::new(options)?;

    let cancel = CancellationToken::new();
    let mut callers = JoinSet::new();
    for caller in 0..config.pool.concurrency {
        let (pool, cancel, export) = (pool.clone(), cancel.child_token(), args.export.clone());
        callers.spawn(async move {
            let result = pool
                .run_with_context(&cancel, |ctx| {
                    Box::pin(async move { ctx.call(&export, Vec::new()).await })
                })
                .await;
            (caller, result)
        });
    }

    let mut failure = None;
    while let Some(joined) = callers.join_next().await {
        let (caller, result) = joined.context("caller task panicked")?;
        match result {
            Ok(values) => tracing::info!(caller, ?values, "Export finished"),
            Err(e) => {
                tracing::error!(caller, error = %e, "Export failed");
                cancel.cancel();
                failure.get_or_insert(e);
            }
        }
    }

    let metrics = pool.metrics();
    tracing::info!(
        completed = metrics.completed,
        timeouts = metrics.timeouts,
        cancellations = metrics.cancellations,
        faults = metrics.faults,
        "Run complete"
    );
    pool.close();

    match failure {
        Some(e) => Err(e).with_context(|| format!("export '{}' failed", args.export)),
        None => Ok(()),
    }
}

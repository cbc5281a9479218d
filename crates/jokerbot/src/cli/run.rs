use std::sync::Arc;

use anyhow::{bail, Result};
use jokerbot_core::pipeline::EventOutcome;
use jokerbot_core::{HttpEventSource, HttpPublisher, Pipeline, ResilientStream, RetryPolicy};
use tokio::sync::watch;

use super::open_cache;
use crate::config::BotConfig;

async fn build_pipeline(config: &BotConfig, shutdown: watch::Receiver<bool>) -> Result<Pipeline> {
    let relay = config.relay_config()?;
    let cache = open_cache(config).await?;

    let source = Arc::new(HttpEventSource::new(relay.clone())?);
    let publisher = Arc::new(HttpPublisher::new(relay)?);
    let stream = ResilientStream::new(
        source,
        publisher,
        RetryPolicy::from(&config.retry),
        shutdown.clone(),
    );

    Ok(Pipeline::new(config.pipeline_config(), cache, stream, shutdown)?)
}

pub async fn run_bot(config: &BotConfig) -> Result<()> {
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut pipeline = build_pipeline(config, shutdown_rx).await?;

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("Interrupted, finishing current event");
            let _ = shutdown_tx.send(true);
        }
        // Keep the sender alive so a failed signal hook does not look like shutdown.
        std::future::pending::<()>().await;
    });

    let stats = pipeline.run().await?;
    eprintln!(
        "Received {} comments: {} replied, {} skipped, {} failed",
        stats.received, stats.replied, stats.skipped, stats.failed
    );
    Ok(())
}

pub async fn run_reply(config: &BotConfig, event_id: &str) -> Result<()> {
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut pipeline = build_pipeline(config, shutdown_rx).await?;

    let Some(event) = pipeline.stream().fetch_event(event_id).await? else {
        bail!("comment {event_id} not found on the relay");
    };

    match pipeline.process_event(&event).await? {
        EventOutcome::Replied { matched, resolved } => {
            println!("Replied to {event_id} ({resolved} of {matched} references resolved)");
        }
        EventOutcome::Skipped(reason) => println!("Skipped {event_id}: {reason:?}"),
        EventOutcome::Failed(error) => bail!("reply to {event_id} failed: {error}"),
    }
    Ok(())
}

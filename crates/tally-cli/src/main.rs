//! Demo wiring for the accrual engine.
//!
//! Runs the engine against a real accrual service (`ACCRUAL_SYSTEM_ADDRESS`)
//! with an in-memory store standing in for the database. Order numbers come
//! from the command line; the process reports each terminal outcome and
//! stops cleanly on ctrl-c.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tally_core::{AccrualEngine, AccrualStore, EngineConfig, HttpAccrualClient, InMemoryAccrualStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let base_url = std::env::var("ACCRUAL_SYSTEM_ADDRESS")
        .unwrap_or_else(|_| "http://localhost:8080".to_owned());
    let config = EngineConfig::from_env().context("reading engine config from environment")?;

    let orders: Vec<String> = std::env::args().skip(1).collect();
    if orders.is_empty() {
        anyhow::bail!("usage: tally-cli <order-number>...");
    }

    let client = Arc::new(
        HttpAccrualClient::new(&base_url, config.request_timeout)
            .context("building accrual client")?,
    );
    let store = Arc::new(InMemoryAccrualStore::new());
    for number in &orders {
        store.track_order(number.clone()).await;
    }

    let store_dyn: Arc<dyn AccrualStore> = Arc::clone(&store) as Arc<dyn AccrualStore>;
    let engine = AccrualEngine::new(config, client, store_dyn)
        .context("building accrual engine")?;

    info!(accrual = %base_url, orders = orders.len(), "starting");
    engine.start().await;
    for number in &orders {
        engine.add_order(number.clone()).await;
    }

    tokio::select! {
        _ = report_outcomes(&store, &orders) => {
            info!("all orders settled");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted");
        }
    }

    engine.stop().await;
    Ok(())
}

/// Poll the store until every order has a terminal outcome, printing each
/// as it lands.
async fn report_outcomes(store: &InMemoryAccrualStore, orders: &[String]) {
    let mut remaining: Vec<&String> = orders.iter().collect();
    while !remaining.is_empty() {
        let mut still_pending = Vec::new();
        for number in remaining {
            match store.accrual(number).await {
                Some((status, points)) => {
                    println!("{number}: {status} ({points} points)");
                }
                None => still_pending.push(number),
            }
        }
        remaining = still_pending;
        if !remaining.is_empty() {
            tokio::time::sleep(Duration::from_millis(500)).await;
        }
    }
}

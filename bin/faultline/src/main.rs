//! A storefront that injects a fault into itself on a fixed timeline.
//!
//! On startup, faultline generates a product catalog, serves it over HTTP, and drives traffic against it. Seven
//! minutes in, stress traffic starts asking for products that do not exist, producing a burst of failed spans that
//! lasts until the fault is rolled back three minutes later. Deploy markers bracket the fault window so the incident
//! lines up with a "deploy" in Honeycomb.

#![deny(warnings)]
#![deny(missing_docs)]

use std::sync::Arc;

use anyhow::Context as _;
use clap::Parser as _;
use faultline_app::prelude::*;
use rand::{rngs::StdRng, SeedableRng as _};
use tokio::{
    net::TcpListener,
    select,
    signal::unix::{signal, SignalKind},
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

mod catalog;
use self::catalog::Catalog;

mod config;
use self::config::{Cli, Config};

mod error;
use self::error::GenericError;

mod fault;
use self::fault::FaultState;

mod http;
use self::http::{build_router, AppState};

mod marker;
use self::marker::HoneycombMarkers;

mod schedule;
use self::schedule::{PhasePlan, PhaseScheduler};

mod span;

mod storefront;
use self::storefront::Storefront;

mod traffic;
use self::traffic::{HttpTarget, TrafficGenerator};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let guard = initialize_logging(None).unwrap_or_else(|e| {
        fatal_and_exit(format!("failed to initialize logging: {}", e));
        unreachable!()
    });

    match run(cli).await {
        Ok(()) => info!("faultline stopped."),
        Err(e) => {
            error!("{:?}", e);
            drop(guard);
            std::process::exit(1);
        }
    }

    // Requests still in flight are abandoned here.
    drop(guard);
    std::process::exit(0);
}

async fn run(cli: Cli) -> Result<(), GenericError> {
    info!("faultline starting...");

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration.")?;
    let plan = PhasePlan::standard(config.phase_unit()).context("Failed to build phase plan.")?;

    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };

    let catalog = Arc::new(Catalog::generate(config.catalog_size(), &mut rng));
    info!(items = catalog.len(), "Generated product catalog.");

    let storefront = Storefront::new(catalog, config.cart_lookup, config.db_latency());

    let shutdown = CancellationToken::new();
    spawn_signal_handlers(shutdown.clone()).context("Failed to configure signal handlers.")?;

    let listener = TcpListener::bind(config.listen_address)
        .await
        .with_context(|| format!("Failed to bind storefront to {}.", config.listen_address))?;
    let local_addr = listener.local_addr()?;
    info!("Server running on port {}", local_addr.port());

    let router = build_router(AppState::new(storefront.clone(), config.spans_enabled));
    let server_shutdown = CancellationToken::new();
    let server = tokio::spawn(http::serve(listener, router, server_shutdown.clone()));

    let client = reqwest::Client::builder()
        .build()
        .context("Failed to build HTTP client.")?;

    let fault = FaultState::new();
    let target = Arc::new(HttpTarget::new(client.clone(), &config.target_url()).context("Invalid target URL.")?);
    let generator = TrafficGenerator::new(target, Arc::clone(storefront.catalog()), fault.clone(), rng);
    let notifier = Arc::new(
        HoneycombMarkers::new(client, &config.marker_endpoint, config.honeycomb_credentials())
            .context("Invalid marker endpoint.")?,
    );

    let scheduler = PhaseScheduler::new(plan, fault, generator, notifier, config.tick_interval());
    let report = scheduler.run(shutdown).await;
    info!(outcome = ?report.outcome, ticks = report.ticks, "Timeline finished.");

    server_shutdown.cancel();
    match server.await {
        Ok(result) => result.context("Storefront server failed.")?,
        Err(e) => return Err(e).context("Storefront server task panicked."),
    }

    Ok(())
}

fn spawn_signal_handlers(shutdown: CancellationToken) -> Result<(), GenericError> {
    let mut sigint_handler = signal(SignalKind::interrupt()).context("Failed to set up SIGINT handler.")?;
    let mut sigterm_handler = signal(SignalKind::terminate()).context("Failed to set up SIGTERM handler.")?;

    tokio::spawn(async move {
        select! {
            _ = sigint_handler.recv() => {
                info!("Received SIGINT, shutting down...");
            }
            _ = sigterm_handler.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }

        shutdown.cancel();
    });

    Ok(())
}

use std::sync::Arc;
use std::time::Duration;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use rail_feeds::aggregator::Aggregator;
use rail_feeds::config::{EngineConfig, FanoutBackend};
use rail_feeds::facade::DepartureBoards;
use rail_feeds::fanout::Fanout;
use rail_feeds::reference::{LocationIndex, LocationTable};
use rail_feeds::stores::BerthGraph;
use rail_feeds::transport::darwin::{BridgeClient, DarwinPushClient, LdbSoapClient};
use rail_feeds::web::{AppState, create_router};

/// How often to check for a Network Rail connection that gave up retrying.
const RESTART_CHECK_INTERVAL: Duration = Duration::from_secs(60);

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = match EngineConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "invalid configuration");
            std::process::exit(1);
        }
    };

    let locations = load_locations(&config);
    let fanout = match &config.fanout {
        FanoutBackend::Memory => Fanout::memory(),
        FanoutBackend::Redis { url } => match Fanout::redis(url).await {
            Ok(fanout) => {
                info!("using Redis fan-out");
                fanout
            }
            Err(e) => {
                warn!(error = %e, "Redis unavailable, using in-process fan-out");
                Fanout::memory()
            }
        },
    };

    let aggregator =
        Aggregator::new(config.aggregator(), locations.clone()).with_fanout(fanout.clone());
    if let Some(path) = &config.smart_path {
        match BerthGraph::from_smart_file(path) {
            Ok(graph) => {
                let berths = aggregator.load_berths(graph).await;
                info!(berths, path = %path.display(), "loaded berth graph");
            }
            Err(e) => warn!(error = %e, path = %path.display(), "failed to load berth graph"),
        }
    }
    let aggregator = Arc::new(aggregator);

    let bridge = match &config.bridge {
        Some(bridge) => BridgeClient::new(bridge.clone()).unwrap_or_else(|e| {
            warn!(error = %e, "failed to create bridge client");
            BridgeClient::disabled()
        }),
        None => BridgeClient::disabled(),
    };
    let push_port = match config.push_port_client() {
        Some(push) => DarwinPushClient::new(push, locations.clone()).with_fanout(fanout.clone()),
        None => DarwinPushClient::disabled(),
    };
    let ldb = match &config.ldb {
        Some(ldb) => LdbSoapClient::new(ldb.clone()).unwrap_or_else(|e| {
            warn!(error = %e, "failed to create LDB client");
            LdbSoapClient::disabled()
        }),
        None => LdbSoapClient::disabled(),
    };
    let boards = Arc::new(
        DepartureBoards::new(&config.cache)
            .with_strategy(Arc::new(bridge))
            .with_strategy(Arc::new(push_port))
            .with_strategy(Arc::new(ldb)),
    );
    info!(
        bridge = config.bridge.is_some(),
        push_port = config.push_port.is_some(),
        ldb = config.ldb.is_some(),
        "board strategies configured"
    );

    aggregator.start().await;

    let restarts = {
        let aggregator = Arc::clone(&aggregator);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(RESTART_CHECK_INTERVAL);
            interval.tick().await; // First tick is immediate, skip it
            loop {
                interval.tick().await;
                aggregator.restart_failed().await;
            }
        })
    };

    let state = AppState::new(Arc::clone(&aggregator), Arc::clone(&boards), fanout, locations);
    let app = create_router(state);

    let listener = match tokio::net::TcpListener::bind(config.listen_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!(error = %e, addr = %config.listen_addr, "failed to bind");
            std::process::exit(1);
        }
    };
    info!(addr = %config.listen_addr, "rail feeds listening");

    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        error!(error = %e, "server error");
    }

    restarts.abort();
    aggregator.stop().await;
    boards.shutdown().await;
    info!("shut down");
}

fn load_locations(config: &EngineConfig) -> LocationIndex {
    let Some(path) = &config.locations_path else {
        warn!("LOCATIONS_PATH not set, station lookups will be empty");
        return LocationIndex::empty();
    };
    match LocationTable::from_corpus_file(path) {
        Ok(table) => {
            info!(locations = table.len(), path = %path.display(), "loaded location table");
            LocationIndex::new(table)
        }
        Err(e) => {
            warn!(error = %e, path = %path.display(), "failed to load location table");
            LocationIndex::empty()
        }
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "failed to listen for Ctrl-C");
    }
    info!("shutdown requested");
}

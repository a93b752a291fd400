//! Periodic refresh of ECFMP flow measures.

use std::sync::Arc;
use std::time::Duration;

use acdm_backend::EcfmpClient;
use tokio::sync::broadcast;
use tokio::time::interval;

use crate::backoff::Backoff;
use crate::state::AppState;

const FLOW_MEASURE_REFRESH_SECS: u64 = 60;
const FLOW_MEASURE_BACKOFF_MAX_SECS: u64 = 600;

pub async fn run_flow_measure_loop(state: Arc<AppState>, mut shutdown: broadcast::Receiver<()>) {
    let client = EcfmpClient::new(state.config().ecfmp_url.clone());
    let mut ticker = interval(Duration::from_secs(FLOW_MEASURE_REFRESH_SECS));
    let mut backoff = Backoff::new(
        Duration::from_secs(FLOW_MEASURE_REFRESH_SECS),
        Duration::from_secs(FLOW_MEASURE_BACKOFF_MAX_SECS),
    );

    loop {
        tokio::select! {
            _ = shutdown.recv() => {
                tracing::info!("Flow measure loop shutting down");
                break;
            }
            _ = ticker.tick() => {
                state.mark_loop_heartbeat("flow-measures");
                if !backoff.ready() {
                    continue;
                }
                match client.fetch_flow_measures().await {
                    Ok(measures) => {
                        tracing::debug!("Fetched {} flow measures", measures.len());
                        state.replace_flow_measures(measures);
                        backoff.reset();
                    }
                    Err(err) => {
                        let delay = backoff.fail();
                        tracing::warn!("Flow measure refresh failed: {:#} (backing off {:?})", err, delay);
                    }
                }
            }
        }
    }
}

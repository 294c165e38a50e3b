use std::sync::Arc;
use std::thread;
use tacho_core::{NoopObserver, RunObserver};
use tacho_io::{init_metrics, serve_metrics, PrometheusObserver};
use tracing::{info, warn};

/// Start the metrics endpoint if an address was given. A bind failure only
/// disables metrics; measuring goes on.
pub fn start_metrics_server(addr: &Option<String>) -> Option<thread::JoinHandle<()>> {
    let addr = addr.as_ref()?;
    init_metrics();
    info!(addr = %addr, "Starting metrics server");
    match serve_metrics(addr) {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!(error = %e, "metrics disabled");
            None
        }
    }
}

pub fn observer(metrics_enabled: bool) -> Arc<dyn RunObserver> {
    if metrics_enabled {
        Arc::new(PrometheusObserver)
    } else {
        Arc::new(NoopObserver)
    }
}

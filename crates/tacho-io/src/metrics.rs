//! Prometheus metrics for tachometer runs.
//!
//! Workers and the coordinator report through [`PrometheusObserver`]; the
//! optional HTTP endpoint exposes the registry together with liveness and
//! readiness probes.

use prometheus::{
    Encoder, GaugeVec, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;
use std::thread;
use tacho_core::{EdgeError, Reading, RunObserver};
use thiserror::Error;
use tiny_http::{Header, Response, Server};

/// Global metrics registry
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Channel Metrics
// ============================================================================

/// Last printed speed per line
pub static CHANNEL_RPM: LazyLock<GaugeVec> = LazyLock::new(|| {
    let gauge = GaugeVec::new(
        Opts::new("tacho_channel_rpm", "Last reported fan speed in RPM"),
        &["gpio"],
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Running average per line (watch mode)
pub static CHANNEL_RPM_AVG: LazyLock<GaugeVec> = LazyLock::new(|| {
    let gauge = GaugeVec::new(
        Opts::new(
            "tacho_channel_rpm_avg",
            "Average fan speed in RPM since watch mode started",
        ),
        &["gpio"],
    )
    .unwrap();
    REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

/// Edges counted per completed sample
pub static SAMPLE_EDGES: LazyLock<Histogram> = LazyLock::new(|| {
    let histogram = Histogram::with_opts(
        HistogramOpts::new(
            "tacho_sample_edges",
            "Edges counted during one measurement window",
        )
        .buckets(vec![
            0.0, 1.0, 10.0, 50.0, 100.0, 500.0, 1000.0, 5000.0, 10000.0,
        ]),
    )
    .unwrap();
    REGISTRY.register(Box::new(histogram.clone())).unwrap();
    histogram
});

// ============================================================================
// Run Metrics
// ============================================================================

/// Rounds written to output
pub static ROUNDS_COMPLETED: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "tacho_rounds_completed_total",
        "Measurement rounds written to output",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Samples abandoned because of cancellation
pub static SAMPLES_INTERRUPTED: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "tacho_samples_interrupted_total",
        "Samples abandoned because the run was cancelled",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Lines that could not be acquired
pub static ACQUISITION_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "tacho_acquisition_failures_total",
        "GPIO lines that could not be acquired",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

/// Lines dropped after an edge wait or read failure
pub static CHANNEL_FAULTS: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        "tacho_channel_faults_total",
        "Channels dropped after an edge wait or read failure",
    )
    .unwrap();
    REGISTRY.register(Box::new(counter.clone())).unwrap();
    counter
});

// ============================================================================
// Observer
// ============================================================================

/// Feeds run events into the global registry.
#[derive(Debug, Default, Clone, Copy)]
pub struct PrometheusObserver;

impl RunObserver for PrometheusObserver {
    fn sample_completed(&self, _line: u32, _rpm: f64, edges: u64) {
        SAMPLE_EDGES.observe(edges as f64);
    }

    fn sample_interrupted(&self, _line: u32) {
        SAMPLES_INTERRUPTED.inc();
    }

    fn acquisition_failed(&self, _line: u32, _error: &EdgeError) {
        ACQUISITION_FAILURES.inc();
    }

    fn channel_faulted(&self, _line: u32, _error: &EdgeError) {
        CHANNEL_FAULTS.inc();
    }

    fn round_emitted(&self, readings: &[Reading]) {
        if readings.is_empty() {
            return;
        }
        for reading in readings {
            let gpio = reading.line.to_string();
            CHANNEL_RPM.with_label_values(&[&gpio]).set(reading.rpm);
            if let Some(stats) = reading.stats {
                CHANNEL_RPM_AVG.with_label_values(&[&gpio]).set(stats.avg());
            }
        }
        ROUNDS_COMPLETED.inc();
    }
}

// ============================================================================
// Metrics HTTP Server
// ============================================================================

#[derive(Debug, Error)]
#[error("cannot bind metrics server on {addr}: {reason}")]
pub struct MetricsError {
    pub addr: String,
    pub reason: String,
}

/// Bind the metrics HTTP server and serve it from a background thread.
///
/// The thread lives as long as the process; a run never waits for it.
pub fn serve_metrics(bind_addr: &str) -> Result<thread::JoinHandle<()>, MetricsError> {
    let server = Server::http(bind_addr).map_err(|e| MetricsError {
        addr: bind_addr.to_string(),
        reason: e.to_string(),
    })?;
    tracing::info!("Metrics server listening on http://{}/metrics", bind_addr);

    let handle = thread::Builder::new()
        .name("tacho-metrics".to_string())
        .spawn(move || {
            for request in server.incoming_requests() {
                let (body, status) = route(request.url());
                let mut response = Response::from_data(body).with_status_code(status);
                if status == 200 && request.url() == "/metrics" {
                    if let Ok(header) = Header::from_bytes(
                        &b"Content-Type"[..],
                        &b"text/plain; version=0.0.4"[..],
                    ) {
                        response = response.with_header(header);
                    }
                }
                let _ = request.respond(response);
            }
        })
        .map_err(|e| MetricsError {
            addr: bind_addr.to_string(),
            reason: e.to_string(),
        })?;
    Ok(handle)
}

fn route(path: &str) -> (Vec<u8>, u16) {
    match path {
        "/metrics" => match encode() {
            Ok(buffer) => (buffer, 200),
            Err(e) => {
                tracing::warn!("Failed to encode metrics: {}", e);
                (b"Internal Server Error".to_vec(), 500)
            }
        },
        "/health" => (b"OK".to_vec(), 200),
        // Ready once a round has been written
        "/ready" if ROUNDS_COMPLETED.get() > 0 => (b"Ready".to_vec(), 200),
        "/ready" => (b"Not Ready".to_vec(), 503),
        _ => (b"Not Found".to_vec(), 404),
    }
}

/// Render the registry in the Prometheus text format.
pub fn encode() -> Result<Vec<u8>, prometheus::Error> {
    let mut buffer = Vec::new();
    TextEncoder::new().encode(&REGISTRY.gather(), &mut buffer)?;
    Ok(buffer)
}

/// Initialize all metrics (forces lazy initialization)
pub fn init_metrics() {
    let _ = CHANNEL_RPM.with_label_values(&["none"]);
    let _ = CHANNEL_RPM_AVG.with_label_values(&["none"]);
    let _ = CHANNEL_RPM.remove_label_values(&["none"]);
    let _ = CHANNEL_RPM_AVG.remove_label_values(&["none"]);
    let _ = SAMPLE_EDGES.get_sample_count();
    let _ = ROUNDS_COMPLETED.get();
    let _ = SAMPLES_INTERRUPTED.get();
    let _ = ACQUISITION_FAILURES.get();
    let _ = CHANNEL_FAULTS.get();
}

#[cfg(test)]
mod tests {
    use super::*;
    use tacho_core::RpmStats;

    #[test]
    fn observer_updates_registry() {
        init_metrics();
        let before = ROUNDS_COMPLETED.get();
        let mut stats = RpmStats::new();
        stats.update(1000.0);
        stats.update(1200.0);

        PrometheusObserver.round_emitted(&[Reading {
            line: 917,
            rpm: 1200.0,
            stats: Some(stats),
        }]);

        assert_eq!(CHANNEL_RPM.with_label_values(&["917"]).get(), 1200.0);
        assert_eq!(CHANNEL_RPM_AVG.with_label_values(&["917"]).get(), 1100.0);
        assert!(ROUNDS_COMPLETED.get() > before);

        let text = String::from_utf8(encode().unwrap()).unwrap();
        assert!(text.contains("tacho_channel_rpm{gpio=\"917\"} 1200"));
    }

    #[test]
    fn probes_route() {
        assert_eq!(route("/health"), (b"OK".to_vec(), 200));
        assert_eq!(route("/nope").1, 404);
        assert_eq!(route("/metrics").1, 200);
    }
}

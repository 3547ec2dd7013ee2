
use std::sync::Once;

use autometrics::prometheus_exporter;
use lazy_static::lazy_static;
use prometheus::exponential_buckets;
use prometheus::GaugeVec;
use prometheus::HistogramOpts;
use prometheus::HistogramVec;
use prometheus::IntCounterVec;
use prometheus::IntGaugeVec;
use prometheus::Opts;
use prometheus::Registry;
use tokio::sync::watch;
use tracing::error;
use tracing::info;
use warp::Filter;
use warp::Rejection;
use warp::Reply;

lazy_static! {
    pub static ref NODE_STATE_TRANSITIONS: IntCounterVec = IntCounterVec::new(
        Opts::new("node_state_transitions", "Membership transitions by target state"),
        &["state"]
    )
    .expect("metric can not be created");

    pub static ref DEPLOYMENTS_PER_NODE: IntGaugeVec = IntGaugeVec::new(
        Opts::new("deployments_per_node", "Units currently recorded in each node's registry"),
        &["node_id"]
    )
    .expect("metric can not be created");

    pub static ref FAILOVERS: IntCounterVec = IntCounterVec::new(
        Opts::new("failovers", "Finished failovers by outcome"),
        &["outcome"]
    )
    .expect("metric can not be created");

    pub static ref REDEPLOY_ATTEMPTS: IntCounterVec = IntCounterVec::new(
        Opts::new("redeploy_attempts", "Single redeploy attempts by result"),
        &["result"]
    )
    .expect("metric can not be created");

    pub static ref FAILOVER_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("failover_duration_ms", "Failover duration in ms, from lock to completion")
            .buckets(exponential_buckets(1.0, 2.0, 16).expect("valid buckets")),
        &["outcome"]
    )
    .expect("metric can not be created");

    pub static ref CLUSTER_FATAL_ERROR: GaugeVec = GaugeVec::new(
        Opts::new("cluster_fatal_error", "Unrecoverable cluster health events"),
        &["event_type"]
    )
    .expect("metric can not be created");

    pub static ref REGISTRY: Registry = Registry::new();
}

static REGISTER_ONCE: Once = Once::new();

pub(crate) fn register_custom_metrics(registry: &Registry) {
    let collectors: Vec<Box<dyn prometheus::core::Collector>> = vec![
        Box::new(NODE_STATE_TRANSITIONS.clone()),
        Box::new(DEPLOYMENTS_PER_NODE.clone()),
        Box::new(FAILOVERS.clone()),
        Box::new(REDEPLOY_ATTEMPTS.clone()),
        Box::new(FAILOVER_DURATION.clone()),
        Box::new(CLUSTER_FATAL_ERROR.clone()),
    ];
    for collector in collectors {
        if let Err(e) = registry.register(collector) {
            error!("collector can not be registered: {}", e);
        }
    }
}

/// Serves `/metrics` until `shutdown_signal` fires.
pub async fn start_server(
    port: u16,
    mut shutdown_signal: watch::Receiver<()>,
) {
    REGISTER_ONCE.call_once(|| register_custom_metrics(&REGISTRY));

    let metrics_route = warp::path!("metrics")
        .map(|| REGISTRY.clone())
        .and_then(metrics_handler);

    info!("serving metrics on port {}", port);
    let (_, server) = warp::serve(metrics_route).bind_with_graceful_shutdown(([0, 0, 0, 0], port), async move {
        let _ = shutdown_signal.changed().await;
    });
    server.await;
}

async fn metrics_handler(registry: Registry) -> Result<impl Reply, Rejection> {
    use prometheus::Encoder;
    let encoder = prometheus::TextEncoder::new();

    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&registry.gather(), &mut buffer) {
        error!("could not encode custom metrics: {}", e);
    };
    let mut res = String::from_utf8(buffer).unwrap_or_else(|e| {
        error!("custom metrics could not be from_utf8'd: {}", e);
        String::default()
    });

    res.push_str(&get_metrics_body());
    Ok(res)
}

/// Autometrics' own series, in Prometheus text format
pub fn get_metrics_body() -> String {
    prometheus_exporter::encode_http_response().into_body()
}

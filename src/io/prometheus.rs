//! Prometheus metrics HTTP endpoint
//!
//! Exposes gateway metrics in Prometheus text format at /metrics and the
//! inventory summary as JSON at /inventory/summary.
//! Uses hyper for the HTTP server.

use crate::domain::event::TagEvent;
use crate::domain::tag::TagState;
use crate::infra::metrics::{MetricsSummary, METRICS_BUCKET_BOUNDS, METRICS_NUM_BUCKETS};
use crate::services::inventory::{InventoryEngine, InventorySummary, TimeBucket};
use bytes::Bytes;
use http_body_util::Full;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::convert::Infallible;
use std::fmt::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Write a gauge metric with f64 value
fn write_gauge_f64(output: &mut String, name: &str, help: &str, site: &str, val: f64) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} gauge");
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val:.6}");
}

/// Write one metric family with an extra label per sample
fn write_labeled<'a>(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    label: &str,
    samples: impl IntoIterator<Item = (&'a str, u64)>,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    for (value, count) in samples {
        let _ = writeln!(output, "{name}{{site=\"{site}\",{label}=\"{value}\"}} {count}");
    }
}

/// Write a histogram metric with buckets, sum, and count
fn write_histogram(
    output: &mut String,
    name: &str,
    help: &str,
    site: &str,
    buckets: &[u64; METRICS_NUM_BUCKETS],
    bounds: &[u64; 10],
    avg: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} histogram");

    let mut cumulative = 0u64;
    for (i, &bound) in bounds.iter().enumerate() {
        cumulative += buckets[i];
        let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"{bound}\"}} {cumulative}");
    }
    cumulative += buckets[METRICS_NUM_BUCKETS - 1];
    let _ = writeln!(output, "{name}_bucket{{site=\"{site}\",le=\"+Inf\"}} {cumulative}");

    let count: u64 = buckets.iter().sum();
    let sum = avg * count;
    let _ = writeln!(output, "{name}_sum{{site=\"{site}\"}} {sum}");
    let _ = writeln!(output, "{name}_count{{site=\"{site}\"}} {count}");
}

/// Format metrics in Prometheus text exposition format
fn format_prometheus_metrics(
    summary: &MetricsSummary,
    inventory: &InventorySummary,
    site_id: &str,
) -> String {
    let mut output = String::with_capacity(4096);

    write_read_metrics(&mut output, site_id, summary);
    write_event_metrics(&mut output, site_id, summary);
    write_inventory_metrics(&mut output, site_id, summary, inventory);
    write_failure_metrics(&mut output, site_id, summary);

    output
}

fn write_read_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "inventory_reads_total",
        "Total tag reads processed",
        MetricType::Counter,
        site,
        summary.reads_total,
    );
    write_gauge_f64(
        output,
        "inventory_reads_per_sec",
        "Tag reads per second over the last sample",
        site,
        summary.reads_per_sec,
    );
    write_metric(
        output,
        "inventory_batches_total",
        "Total read batches processed",
        MetricType::Counter,
        site,
        summary.batches_total,
    );
    write_histogram(
        output,
        "inventory_batch_latency_us",
        "Read batch processing latency in microseconds",
        site,
        &summary.lat_buckets,
        &METRICS_BUCKET_BOUNDS,
        summary.avg_batch_latency_us,
    );
    write_metric(
        output,
        "inventory_batch_latency_p99_us",
        "99th percentile read batch latency",
        MetricType::Gauge,
        site,
        summary.lat_p99_us,
    );
}

fn write_event_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    let kinds = [TagEvent::Arrival, TagEvent::Moved, TagEvent::Departed, TagEvent::Returned];
    write_labeled(
        output,
        "inventory_events_total",
        "Inventory events published by kind",
        MetricType::Counter,
        site,
        "event",
        kinds.iter().map(|k| (k.as_str(), summary.event_count(*k))),
    );
}

fn write_inventory_metrics(
    output: &mut String,
    site: &str,
    summary: &MetricsSummary,
    inventory: &InventorySummary,
) {
    write_metric(
        output,
        "inventory_tags",
        "Tags currently held in the registry",
        MetricType::Gauge,
        site,
        inventory.total_tags as u64,
    );
    write_metric(
        output,
        "inventory_exiting_tags",
        "Tags currently in an exiting set",
        MetricType::Gauge,
        site,
        summary.exiting_count as u64,
    );
    write_labeled(
        output,
        "inventory_tags_by_state",
        "Tags per lifecycle state",
        MetricType::Gauge,
        site,
        "state",
        TagState::ALL.iter().map(|s| (s.as_str(), inventory.state_count(*s) as u64)),
    );
    write_labeled(
        output,
        "inventory_tags_by_last_seen",
        "Tags per last-seen age bucket",
        MetricType::Gauge,
        site,
        "bucket",
        TimeBucket::ALL.iter().map(|b| (b.as_str(), inventory.bucket_count(*b) as u64)),
    );
}

fn write_failure_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "inventory_listener_failures_total",
        "Event listener invocations that panicked",
        MetricType::Counter,
        site,
        summary.listener_failures,
    );
    write_metric(
        output,
        "inventory_persist_failures_total",
        "Cache or snapshot writes that failed",
        MetricType::Counter,
        site,
        summary.persist_failures,
    );
    write_metric(
        output,
        "inventory_aged_out_total",
        "Tags removed by age-out",
        MetricType::Counter,
        site,
        summary.aged_out_total,
    );
}

fn text_response(status: StatusCode, content_type: &str, body: String) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(Bytes::from(body)));
    *response.status_mut() = status;
    if let Ok(value) = content_type.parse() {
        response.headers_mut().insert(hyper::header::CONTENT_TYPE, value);
    }
    response
}

/// Handle HTTP requests
async fn handle_request(
    req: Request<hyper::body::Incoming>,
    engine: Arc<InventoryEngine>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/metrics") => {
            let summary = engine.metrics_report();
            let inventory = engine.summary();
            let body = format_prometheus_metrics(&summary, &inventory, engine.config().site_id());
            Ok(text_response(StatusCode::OK, "text/plain; version=0.0.4; charset=utf-8", body))
        }
        (&Method::GET, "/inventory/summary") => {
            match serde_json::to_string(&engine.summary()) {
                Ok(body) => Ok(text_response(StatusCode::OK, "application/json", body)),
                Err(e) => {
                    error!(error = %e, "inventory_summary_encode_failed");
                    Ok(text_response(
                        StatusCode::INTERNAL_SERVER_ERROR,
                        "text/plain",
                        "summary unavailable".to_string(),
                    ))
                }
            }
        }
        (&Method::GET, "/health") => {
            let body = if engine.is_running() { "ok" } else { "stopped" };
            Ok(text_response(StatusCode::OK, "text/plain", body.to_string()))
        }
        _ => Ok(text_response(StatusCode::NOT_FOUND, "text/plain", "Not Found".to_string())),
    }
}

/// Start the Prometheus metrics HTTP server
pub async fn start_metrics_server(
    port: u16,
    engine: Arc<InventoryEngine>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = TcpListener::bind(addr).await?;

    info!(port = %port, site = %engine.config().site_id(), "prometheus_metrics_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let engine = engine.clone();

                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let engine = engine.clone();
                                async move { handle_request(req, engine).await }
                            });

                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                error!(error = %e, "prometheus_http_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "prometheus_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("prometheus_metrics_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

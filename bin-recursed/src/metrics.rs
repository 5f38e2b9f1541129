use actix_web::{get, http::header::ContentType, App, HttpResponse, HttpServer, Responder};
use lazy_static::lazy_static;
use prometheus::{
    opts, register_histogram_vec, register_int_counter, register_int_counter_vec,
    register_int_gauge, HistogramVec, IntCounter, IntCounterVec, IntGauge, TextEncoder,
};
use std::net::SocketAddr;

pub const RESPONSE_TIME_BUCKETS: &[f64] = &[
    0.0001, // 0.1 ms
    0.0005, // 0.5 ms
    0.0010, // 1   ms
    0.0025, // 2.5 ms
    0.0050, // 5   ms
    0.0100, // 10  ms
    0.0250, // 25  ms
    0.0500, // 50  ms
    0.1000, // 100 ms
    0.2500, // 250 ms
    0.5000, // 500 ms
    1.0000, // 1    s
    2.5000, // 2.5  s
    5.0000, // 5    s
];

lazy_static! {
    pub static ref DNS_REQUESTS_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!(
            "dns_requests_total",
            "Total number of DNS requests received, whether valid or invalid."
        ),
        &["protocol"]
    )
    .unwrap();
    pub static ref DNS_RESPONSES_TOTAL: IntCounterVec = register_int_counter_vec!(
        opts!("dns_responses_total", "Total number of DNS responses sent."),
        &["truncated", "rcode"]
    )
    .unwrap();
    pub static ref DNS_RESPONSE_TIME_SECONDS: HistogramVec = register_histogram_vec!(
        "dns_response_time_seconds",
        "Response time of DNS requests, whether valid or invalid.",
        &["protocol"],
        RESPONSE_TIME_BUCKETS.to_vec()
    )
    .unwrap();
    pub static ref RESOLVER_UPSTREAM_QUERIES_TOTAL: IntCounter = register_int_counter!(
        "resolver_upstream_queries_total",
        "Outbound queries sent to upstream nameservers, including timed-out ones."
    )
    .unwrap();
    pub static ref RESOLVER_CACHE_HIT_TOTAL: IntCounter = register_int_counter!(
        "resolver_cache_hit_total",
        "Requests answered entirely from the cache."
    )
    .unwrap();
    pub static ref RESOLVER_CACHE_MISS_TOTAL: IntCounter = register_int_counter!(
        "resolver_cache_miss_total",
        "Requests which needed at least one upstream query."
    )
    .unwrap();
    pub static ref CACHE_ENTRIES: IntGauge = register_int_gauge!(
        "cache_entries",
        "Entries currently held in the answer cache."
    )
    .unwrap();
    pub static ref CACHE_WEIGHT_BYTES: IntGauge = register_int_gauge!(
        "cache_weight_bytes",
        "Approximate memory held by the answer cache."
    )
    .unwrap();
    pub static ref CACHE_EVICTIONS_TOTAL: IntGauge = register_int_gauge!(
        "cache_evictions_total",
        "Entries pushed out of the cache by space pressure."
    )
    .unwrap();
    pub static ref CACHE_EXPIRED_TOTAL: IntGauge = register_int_gauge!(
        "cache_expired_total",
        "Entries dropped from the cache because their TTL ran out."
    )
    .unwrap();
}

#[get("/metrics")]
async fn get_metrics() -> impl Responder {
    match TextEncoder::new().encode_to_string(&prometheus::gather()) {
        Ok(metrics_str) => HttpResponse::Ok()
            .content_type(ContentType::plaintext())
            .body(metrics_str),
        Err(err) => {
            tracing::error!(error = ?err, "could not serialise metrics");
            HttpResponse::InternalServerError()
                .content_type(ContentType::plaintext())
                .body(err.to_string())
        }
    }
}

pub async fn serve_prometheus_endpoint_task(address: SocketAddr) -> std::io::Result<()> {
    HttpServer::new(|| App::new().service(get_metrics))
        .bind(address)?
        .run()
        .await
}

use clap::Parser;
use std::collections::HashSet;
use std::env;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::process;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing_subscriber::EnvFilter;

use dns_recursor::cache::SharedCache;
use dns_recursor::config::{CacheConfig, ResolverConfig, ROOT_HINTS};
use dns_recursor::resolve_message;
use dns_wire::types::*;

mod metrics;
use self::metrics::*;

async fn handle_raw_message(args: ListenArgs, buf: &[u8]) -> Option<Message> {
    match Message::from_octets(buf) {
        Ok(msg) => {
            let (resolution_metrics, response) =
                resolve_message(&args.config, &args.cache, &msg).await;

            RESOLVER_UPSTREAM_QUERIES_TOTAL.inc_by(resolution_metrics.queries_made);
            if resolution_metrics.cache_hit {
                RESOLVER_CACHE_HIT_TOTAL.inc();
            } else {
                RESOLVER_CACHE_MISS_TOTAL.inc();
            }

            Some(response)
        }

        // a datagram whose header cannot even be read gets no reply
        // at all: an addressable error response needs an id to echo.
        Err(err) => err.id().map(Message::make_format_error_response),
    }
}

async fn listen_udp_task(args: ListenArgs, socket: UdpSocket) {
    let (tx, mut rx) = mpsc::channel::<(Message, SocketAddr, prometheus::HistogramTimer)>(32);
    let mut buf = vec![0u8; 512];

    loop {
        tokio::select! {
            Ok((size, peer)) = socket.recv_from(&mut buf) => {
                tracing::debug!(?peer, "UDP request");
                DNS_REQUESTS_TOTAL.with_label_values(&["udp"]).inc();
                let bytes = buf[..size].to_vec();
                let reply = tx.clone();
                let args = args.clone();
                tokio::spawn(async move {
                    let response_timer = DNS_RESPONSE_TIME_SECONDS
                        .with_label_values(&["udp"])
                        .start_timer();
                    if let Some(response_message) = handle_raw_message(args, &bytes).await {
                        if let Err(error) = reply.send((response_message, peer, response_timer)).await {
                            tracing::debug!(?peer, ?error, "UDP reply channel error");
                        }
                    }
                });
            }

            Some((message, peer, response_timer)) = rx.recv() => {
                let rcode = message.header.rcode;
                match message.into_octets_for_udp() {
                    Ok(serialised) => {
                        let truncated = serialised[2] & HEADER_MASK_TC != 0;
                        DNS_RESPONSES_TOTAL
                            .with_label_values(&[&truncated.to_string(), &rcode.to_string()])
                            .inc();
                        if let Err(error) = socket.send_to(&serialised, peer).await {
                            tracing::debug!(?peer, ?error, "UDP send error");
                        }
                    }
                    Err(error) => {
                        tracing::warn!(?peer, ?error, "could not serialise message");
                    }
                };
                response_timer.observe_duration();
            }
        }
    }
}

/// Arguments for `listen_udp_task` and the resolver.
#[derive(Debug, Clone)]
struct ListenArgs {
    config: Arc<ResolverConfig>,
    cache: SharedCache,
}

/// Drop expired cache entries and log the cache counters, forever.
async fn stats_task(cache: SharedCache, interval: Duration) {
    loop {
        sleep(interval).await;

        cache.prune();
        let stats = cache.stats();

        CACHE_ENTRIES.set(stats.entries.try_into().unwrap_or(i64::MAX));
        CACHE_WEIGHT_BYTES.set(stats.weight.try_into().unwrap_or(i64::MAX));
        CACHE_EVICTIONS_TOTAL.set(stats.evictions.try_into().unwrap_or(i64::MAX));
        CACHE_EXPIRED_TOTAL.set(stats.expired.try_into().unwrap_or(i64::MAX));

        tracing::info!(
            hits = %stats.hits,
            misses = %stats.misses,
            evictions = %stats.evictions,
            expired = %stats.expired,
            entries = %stats.entries,
            weight_bytes = %stats.weight,
            hit_rate_percent = %format!("{:.2}", stats.hit_rate() * 100.0),
            "cache stats"
        );
    }
}

/// Flush the cache and exit when asked to stop.
async fn shutdown_task(cache: SharedCache) {
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(error) => {
            tracing::error!(?error, "could not subscribe to SIGTERM");
            process::exit(1);
        }
    };
    let mut sigint = match signal(SignalKind::interrupt()) {
        Ok(s) => s,
        Err(error) => {
            tracing::error!(?error, "could not subscribe to SIGINT");
            process::exit(1);
        }
    };

    tokio::select! {
        _ = sigterm.recv() => (),
        _ = sigint.recv() => (),
    }

    let stats = cache.stats();
    tracing::info!(entries = %stats.entries, "shutting down, flushing cache");
    cache.clear();
    process::exit(0);
}

fn begin_logging() {
    let log_format = if let Ok(var) = env::var("RUST_LOG_FORMAT") {
        let mut set = HashSet::new();
        for s in var.split(',') {
            set.insert(s.to_string());
        }
        set
    } else {
        HashSet::new()
    };

    let logger = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_ansi(!log_format.contains("no-ansi"));

    if log_format.contains("json") {
        if log_format.contains("no-time") {
            logger.json().without_time().init();
        } else {
            logger.json().init();
        }
    } else if log_format.contains("pretty") {
        if log_format.contains("no-time") {
            logger.pretty().without_time().init();
        } else {
            logger.pretty().init();
        }
    } else if log_format.contains("compact") {
        if log_format.contains("no-time") {
            logger.compact().without_time().init();
        } else {
            logger.compact().init();
        }
    } else if log_format.contains("no-time") {
        logger.without_time().init();
    } else {
        logger.init();
    }
}

// the doc comments for this struct turn into the CLI help text
#[derive(Debug, Clone, Parser)]
/// A recursive DNS resolver.
///
/// recursed accepts queries over UDP and answers them by walking the
/// DNS hierarchy itself, starting from the root servers: it is not a
/// forwarder.  Positive answers are cached, honouring record TTLs,
/// within configurable entry-count and memory bounds.
///
/// Prometheus metrics are served at
/// "http://{metrics_interface}/metrics"
struct Args {
    /// Interface to listen on (in `ip:port` form)
    #[clap(short, long, value_parser, default_value_t = SocketAddr::from((Ipv4Addr::UNSPECIFIED, 53)), env = "RECURSED_INTERFACE")]
    interface: SocketAddr,

    /// Interface to listen on (in `ip:port` form) to serve Prometheus metrics
    #[clap(long, value_parser, default_value_t = SocketAddr::from((Ipv4Addr::LOCALHOST, 9420)), env = "RECURSED_METRICS_INTERFACE")]
    metrics_interface: SocketAddr,

    /// Root nameserver addresses to start every resolution from,
    /// comma-separated
    #[clap(short, long, value_parser, value_delimiter = ',', default_values_t = ROOT_HINTS, env = "RECURSED_ROOT_SERVERS")]
    root_servers: Vec<IpAddr>,

    /// How long to wait for each upstream nameserver, in milliseconds
    #[clap(short, long, value_parser, default_value_t = 5000, env = "RECURSED_TIMEOUT_MS")]
    timeout_ms: u64,

    /// Maximum referral / CNAME / nameserver-lookup depth for one request
    #[clap(short, long, value_parser, default_value_t = 16, env = "RECURSED_MAX_DEPTH")]
    max_depth: usize,

    /// Which port to query upstream nameservers on
    #[clap(long, value_parser, default_value_t = 53, env = "RECURSED_UPSTREAM_DNS_PORT")]
    upstream_dns_port: u16,

    /// How many answers to hold in the cache, at most
    #[clap(long, value_parser, default_value_t = 10_000, env = "RECURSED_CACHE_MAX_ENTRIES")]
    cache_max_entries: usize,

    /// Approximate memory bound for the cache, in bytes
    #[clap(long, value_parser, default_value_t = 10_485_760, env = "RECURSED_CACHE_MAX_MEMORY_BYTES")]
    cache_max_memory_bytes: usize,

    /// Answers with a TTL below this many seconds are not cached
    #[clap(long, value_parser, default_value_t = 10, env = "RECURSED_CACHE_MIN_TTL_SECONDS")]
    cache_min_ttl_seconds: u32,

    /// Seconds between cache statistics log lines; 0 disables them
    #[clap(long, value_parser, default_value_t = 300, env = "RECURSED_STATS_INTERVAL_SECONDS")]
    stats_interval_seconds: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    begin_logging();

    let config = ResolverConfig {
        root_servers: args.root_servers.clone(),
        timeout: Duration::from_millis(args.timeout_ms),
        max_depth: args.max_depth,
        upstream_port: args.upstream_dns_port,
    };
    let cache = SharedCache::new(CacheConfig {
        max_entries: std::cmp::max(1, args.cache_max_entries),
        max_memory_bytes: std::cmp::max(1, args.cache_max_memory_bytes),
        min_ttl_seconds: args.cache_min_ttl_seconds,
    });

    tracing::info!(
        interface = %args.interface,
        root_servers = %config.root_servers.len(),
        timeout_ms = %args.timeout_ms,
        max_depth = %args.max_depth,
        "binding DNS UDP socket"
    );
    let udp = match UdpSocket::bind(args.interface).await {
        Ok(s) => s,
        Err(error) => {
            tracing::error!(?error, "could not bind DNS UDP socket");
            process::exit(1);
        }
    };

    let listen_args = ListenArgs {
        config: Arc::new(config),
        cache: cache.clone(),
    };

    tokio::spawn(listen_udp_task(listen_args, udp));
    if args.stats_interval_seconds > 0 {
        tokio::spawn(stats_task(
            cache.clone(),
            Duration::from_secs(args.stats_interval_seconds),
        ));
    }
    tokio::spawn(shutdown_task(cache));

    tracing::info!(interface = %args.metrics_interface, "binding HTTP TCP socket");
    if let Err(error) = serve_prometheus_endpoint_task(args.metrics_interface).await {
        tracing::error!(?error, "could not bind HTTP TCP socket");
        process::exit(1);
    }
}

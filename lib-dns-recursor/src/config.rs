//! Immutable configuration values, built once at startup and handed
//! to the resolver and cache at construction.

use std::net::{IpAddr, Ipv4Addr};
use std::time::Duration;

/// The 13 root nameserver addresses, used as the starting point of
/// every iterative walk unless overridden.
pub const ROOT_HINTS: [IpAddr; 13] = [
    IpAddr::V4(Ipv4Addr::new(198, 41, 0, 4)),     // a.root-servers.net
    IpAddr::V4(Ipv4Addr::new(170, 247, 170, 2)),  // b.root-servers.net
    IpAddr::V4(Ipv4Addr::new(192, 33, 4, 12)),    // c.root-servers.net
    IpAddr::V4(Ipv4Addr::new(199, 7, 91, 13)),    // d.root-servers.net
    IpAddr::V4(Ipv4Addr::new(192, 203, 230, 10)), // e.root-servers.net
    IpAddr::V4(Ipv4Addr::new(192, 5, 5, 241)),    // f.root-servers.net
    IpAddr::V4(Ipv4Addr::new(192, 112, 36, 4)),   // g.root-servers.net
    IpAddr::V4(Ipv4Addr::new(198, 97, 190, 53)),  // h.root-servers.net
    IpAddr::V4(Ipv4Addr::new(192, 36, 148, 17)),  // i.root-servers.net
    IpAddr::V4(Ipv4Addr::new(192, 58, 128, 30)),  // j.root-servers.net
    IpAddr::V4(Ipv4Addr::new(193, 0, 14, 129)),   // k.root-servers.net
    IpAddr::V4(Ipv4Addr::new(199, 7, 83, 42)),    // l.root-servers.net
    IpAddr::V4(Ipv4Addr::new(202, 12, 27, 33)),   // m.root-servers.net
];

/// Settings for the iterative walk.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ResolverConfig {
    /// Where every walk starts.
    pub root_servers: Vec<IpAddr>,

    /// How long to wait for each upstream nameserver before moving on
    /// to the next one.
    pub timeout: Duration,

    /// Limit on referral hops plus CNAME and NS-name sub-resolutions
    /// in one request.
    pub max_depth: usize,

    /// The port upstream nameservers are queried on.  Almost always
    /// 53, but the end-to-end tests point this at mock servers.
    pub upstream_port: u16,
}

impl ResolverConfig {
    /// A whole resolution may block for one per-hop timeout at every
    /// level of the walk, so that is its overall deadline.
    pub fn overall_deadline(&self) -> Duration {
        self.timeout * u32::try_from(self.max_depth).unwrap_or(u32::MAX)
    }
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            root_servers: ROOT_HINTS.to_vec(),
            timeout: Duration::from_millis(5000),
            max_depth: 16,
            upstream_port: 53,
        }
    }
}

/// Settings for the answer cache.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct CacheConfig {
    /// Hard bound on the number of cached entries.
    pub max_entries: usize,

    /// Bound on the approximate memory held by cached records, in
    /// octets.
    pub max_memory_bytes: usize,

    /// Answers whose minimum TTL is below this are not worth caching.
    pub min_ttl_seconds: u32,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            max_memory_bytes: 10 * 1024 * 1024,
            min_ttl_seconds: 10,
        }
    }
}

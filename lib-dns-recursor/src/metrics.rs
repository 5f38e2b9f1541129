//! Per-resolution counters.  The resolver builds this structure
//! rather than updating process-wide metrics directly; the caller
//! folds it into whatever metrics system it runs.

/// Counters from a single resolution attempt.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct Metrics {
    /// Whether the top-level question was answered from the cache.
    pub cache_hit: bool,

    /// Outbound UDP queries sent, including ones which timed out.
    pub queries_made: u64,

    /// The deepest point the walk reached: referral hops plus CNAME
    /// and NS-name sub-resolutions.
    pub max_depth_reached: usize,
}

impl Metrics {
    pub fn new() -> Self {
        Metrics {
            cache_hit: false,
            queries_made: 0,
            max_depth_reached: 0,
        }
    }

    pub fn cache_hit(&mut self) {
        self.cache_hit = true;
    }

    pub fn query_sent(&mut self) {
        self.queries_made += 1;
    }

    pub fn at_depth(&mut self, depth: usize) {
        if depth > self.max_depth_reached {
            self.max_depth_reached = depth;
        }
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

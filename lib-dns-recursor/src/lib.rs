//! An iterative ("recursive", from the client's point of view) DNS
//! resolver: given a question, walk the hierarchy from the root
//! servers to an authoritative answer, caching what comes back.
//!
//! The resolver holds no global state: callers construct a
//! `ResolverConfig` and a `SharedCache` once and pass them in.

#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::similar_names)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::wildcard_imports)]

pub mod cache;
pub mod config;
pub mod iterative;
pub mod metrics;
pub mod util;

use std::time::Instant;
use tracing::Instrument;

use dns_wire::types::*;

use self::cache::SharedCache;
use self::config::ResolverConfig;
use self::iterative::resolve_iterative;
use self::metrics::Metrics;
use self::util::types::{Resolution, ResolutionError};

/// Resolve a single question.
pub async fn resolve(
    config: &ResolverConfig,
    cache: &SharedCache,
    question: &Question,
) -> (Metrics, Result<Resolution, ResolutionError>) {
    let mut metrics = Metrics::new();

    let result = resolve_iterative(config, cache, &mut metrics, question)
        .instrument(tracing::error_span!("resolve", %question))
        .await;

    (metrics, result)
}

/// Answer a whole request message.
///
/// Only the first question is resolved; any further questions ride
/// along in the echoed question section.  A request with no question
/// at all gets a FormatError response.  Resolution failures become
/// SERVFAIL: whatever happens, the caller gets back a well-formed
/// response carrying the request's id.
pub async fn resolve_message(
    config: &ResolverConfig,
    cache: &SharedCache,
    request: &Message,
) -> (Metrics, Message) {
    let mut response = request.make_response();

    let Some(question) = request.questions.first() else {
        response.header.rcode = Rcode::FormatError;
        return (Metrics::new(), response);
    };

    let started = Instant::now();
    let (metrics, outcome) = resolve(config, cache, question).await;

    match outcome {
        Ok(resolution) => {
            response.header.rcode = resolution.rcode;
            response.answers = resolution.answers;
        }
        Err(error) => {
            tracing::debug!(%question, %error, "resolution failed");
            response.header.rcode = Rcode::ServerFailure;
        }
    }

    tracing::info!(
        %question,
        rcode = %response.header.rcode,
        cache_hit = %metrics.cache_hit,
        queries_made = %metrics.queries_made,
        max_depth_reached = %metrics.max_depth_reached,
        duration_seconds = %started.elapsed().as_secs_f64(),
        "request complete"
    );

    (metrics, response)
}

#[cfg(test)]
mod tests {
    use dns_wire::types::test_util::*;

    use super::*;

    #[tokio::test]
    async fn empty_question_section_is_a_format_error() {
        let request = Message::from_question(
            0x0707,
            Question {
                name: domain("example.com"),
                qtype: QueryType::Record(RecordType::A),
                qclass: QueryClass::Record(RecordClass::IN),
            },
        );
        let mut request = request;
        request.questions.clear();

        let (metrics, response) =
            resolve_message(&ResolverConfig::default(), &SharedCache::default(), &request).await;

        assert_eq!(0x0707, response.header.id);
        assert!(response.header.is_response);
        assert!(response.header.recursion_available);
        assert_eq!(Rcode::FormatError, response.header.rcode);
        assert!(response.answers.is_empty());
        assert_eq!(0, metrics.queries_made);
    }

    #[tokio::test]
    async fn response_echoes_rd_and_id() {
        let mut request = Message::from_question(
            0xbeef,
            Question {
                name: domain("example.com"),
                qtype: QueryType::Record(RecordType::A),
                qclass: QueryClass::Record(RecordClass::IN),
            },
        );
        request.questions.clear();
        request.header.recursion_desired = true;

        let (_, response) =
            resolve_message(&ResolverConfig::default(), &SharedCache::default(), &request).await;

        assert_eq!(0xbeef, response.header.id);
        assert!(response.header.recursion_desired);
        assert!(response.header.recursion_available);
    }
}

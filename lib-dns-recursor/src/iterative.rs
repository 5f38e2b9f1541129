//! Iterative resolution: walk the DNS hierarchy from the root
//! servers, following referrals downwards and CNAMEs sideways, until
//! something authoritative turns up.
//!
//! The outer referral walk is a loop over a (question, nameserver
//! list, depth) state; only CNAME targets and NS hostnames re-enter
//! the engine recursively, and every way of going deeper spends the
//! same depth budget.

use async_recursion::async_recursion;
use std::collections::HashSet;
use std::net::IpAddr;
use tokio::time::timeout;
use tracing::Instrument;

use dns_wire::types::*;

use crate::cache::SharedCache;
use crate::config::ResolverConfig;
use crate::metrics::Metrics;
use crate::util::nameserver::query_nameserver;
use crate::util::types::{Classified, Resolution, ResolutionError};

/// The (question, nameserver) pairs already tried in one resolution.
/// Asking the same server the same question twice cannot produce a
/// new outcome, so a revisit is skipped.
type Visited = HashSet<(DomainName, QueryType, IpAddr)>;

/// Resolve a question by walking the hierarchy from the roots.
///
/// The whole walk runs under a deadline of `max_depth` per-hop
/// timeouts; expiry is reported as `ResolutionError::Timeout` and
/// becomes a SERVFAIL like any other dead end.
///
/// # Errors
///
/// See `ResolutionError`.
pub async fn resolve_iterative(
    config: &ResolverConfig,
    cache: &SharedCache,
    metrics: &mut Metrics,
    question: &Question,
) -> Result<Resolution, ResolutionError> {
    let mut attempted = Visited::new();
    if let Ok(res) = timeout(
        config.overall_deadline(),
        resolve_inner(config, cache, metrics, &mut attempted, question, 0),
    )
    .await
    {
        res
    } else {
        tracing::debug!(%question, "overall deadline expired");
        Err(ResolutionError::Timeout)
    }
}

/// Resolve a question at some depth: from the cache if possible,
/// otherwise by walking, caching any answer on the way out.
#[async_recursion]
async fn resolve_inner(
    config: &ResolverConfig,
    cache: &SharedCache,
    metrics: &mut Metrics,
    attempted: &mut Visited,
    question: &Question,
    depth: usize,
) -> Result<Resolution, ResolutionError> {
    if let Some(rrs) = cache.get(&question.name, question.qtype) {
        tracing::debug!(%question, "cache hit");
        if depth == 0 {
            metrics.cache_hit();
        }
        return Ok(Resolution {
            rcode: Rcode::NoError,
            answers: rrs,
        });
    }

    let resolution = walk(config, cache, metrics, attempted, question, depth).await?;

    // only successful answers are cached, keyed by the name as asked
    // (not any CNAME target it led to), and living by the smallest
    // TTL in the set
    if resolution.rcode == Rcode::NoError && !resolution.answers.is_empty() {
        cache.put(&question.name, question.qtype, &resolution.answers);
    }

    Ok(resolution)
}

/// The referral walk.  Each iteration queries one level of the
/// hierarchy and either finishes, or moves to the nameservers that
/// level delegated to.
#[async_recursion]
async fn walk(
    config: &ResolverConfig,
    cache: &SharedCache,
    metrics: &mut Metrics,
    attempted: &mut Visited,
    question: &Question,
    mut depth: usize,
) -> Result<Resolution, ResolutionError> {
    let mut ns_ips = config.root_servers.clone();

    loop {
        if depth > config.max_depth {
            tracing::debug!(%question, "hit the depth limit");
            return Err(ResolutionError::DepthExceeded);
        }
        metrics.at_depth(depth);

        let mut referral = None;
        'nameservers: for &address in &ns_ips {
            if !attempted.insert((question.name.clone(), question.qtype, address)) {
                tracing::trace!(%question, %address, "already asked, skipping");
                continue;
            }

            metrics.query_sent();
            let Some(response) =
                query_nameserver(address, config.upstream_port, question, config.timeout).await
            else {
                continue;
            };

            match classify_response(question, &response) {
                Classified::Answer { rrs } => {
                    tracing::trace!(%question, %address, answers = rrs.len(), "got answer");
                    return Ok(Resolution {
                        rcode: Rcode::NoError,
                        answers: rrs,
                    });
                }
                Classified::CnameFollow { rrs, target } => {
                    tracing::trace!(%question, %address, %target, "following CNAME");
                    return follow_cname(
                        config,
                        cache,
                        metrics,
                        attempted,
                        question,
                        depth + 1,
                        rrs,
                        target,
                    )
                    .await;
                }
                Classified::Negative { rcode } => {
                    tracing::trace!(%question, %address, %rcode, "authoritative negative");
                    return Ok(Resolution::empty(rcode));
                }
                Classified::Referral { ns_names, glue } => {
                    tracing::trace!(%question, %address, nameservers = ns_names.len(), glue = glue.len(), "got referral");
                    referral = Some((ns_names, glue));
                    break 'nameservers;
                }
                Classified::Unusable => {
                    tracing::trace!(%question, %address, "unusable response, trying next nameserver");
                }
            }
        }

        let Some((ns_names, glue)) = referral else {
            tracing::debug!(%question, "out of nameservers");
            return Err(ResolutionError::NoNameservers {
                question: question.clone(),
            });
        };

        let next_ips = if glue.is_empty() {
            resolve_ns_names(config, cache, metrics, attempted, question, &ns_names, depth + 1)
                .await
        } else {
            glue
        };

        if next_ips.is_empty() {
            tracing::debug!(%question, "referral with no reachable nameservers");
            return Err(ResolutionError::NoNameservers {
                question: question.clone(),
            });
        }

        ns_ips = next_ips;
        depth += 1;
    }
}

/// Continue a resolution at a CNAME target, keeping the alias chain
/// at the front of the answer section.  The target resolution starts
/// over from the roots.
#[allow(clippy::too_many_arguments)]
#[async_recursion]
async fn follow_cname(
    config: &ResolverConfig,
    cache: &SharedCache,
    metrics: &mut Metrics,
    attempted: &mut Visited,
    question: &Question,
    depth: usize,
    rrs: Vec<ResourceRecord>,
    target: DomainName,
) -> Result<Resolution, ResolutionError> {
    let cname_question = Question {
        name: target,
        qtype: question.qtype,
        qclass: question.qclass,
    };

    let resolved = resolve_inner(config, cache, metrics, attempted, &cname_question, depth)
        .instrument(tracing::error_span!("follow_cname", question = %cname_question))
        .await?;

    let mut answers = rrs;
    answers.extend(resolved.answers);
    Ok(Resolution {
        rcode: resolved.rcode,
        answers,
    })
}

/// A referral without glue: resolve the delegated nameservers' own
/// hostnames, from the roots, until one of them yields addresses.
#[allow(clippy::too_many_arguments)]
async fn resolve_ns_names(
    config: &ResolverConfig,
    cache: &SharedCache,
    metrics: &mut Metrics,
    attempted: &mut Visited,
    question: &Question,
    ns_names: &[DomainName],
    depth: usize,
) -> Vec<IpAddr> {
    for name in ns_names {
        let ns_question = Question {
            name: name.clone(),
            qtype: QueryType::Record(RecordType::A),
            qclass: QueryClass::Record(RecordClass::IN),
        };

        match resolve_inner(config, cache, metrics, attempted, &ns_question, depth)
            .instrument(tracing::error_span!("resolve_ns_name", name = %name))
            .await
        {
            Ok(resolution) => {
                let ips = addresses_for(&resolution.answers);
                if !ips.is_empty() {
                    return ips;
                }
            }
            Err(error) => {
                tracing::trace!(%question, ns_name = %name, %error, "could not resolve nameserver name");
            }
        }
    }

    Vec::new()
}

/// The addresses in a nameserver-name record set.  A CNAME at the
/// nameserver name is tolerated: any address record in the set is
/// better than a dead referral.
fn addresses_for(rrs: &[ResourceRecord]) -> Vec<IpAddr> {
    rrs.iter()
        .filter_map(|rr| match rr.rdata {
            RecordData::A { address } => Some(IpAddr::V4(address)),
            RecordData::AAAA { address } => Some(IpAddr::V6(address)),
            _ => None,
        })
        .collect()
}

/// Sort a nameserver's response into the next action for the walk.
///
/// In order:
///
/// - `rcode=3` is an authoritative name error, whatever else the
///   response carries (the authority section usually has the SOA).
///
/// - any other non-zero rcode is unusable, and the walk moves to the
///   next nameserver at this level.
///
/// - a response with answers either answers the question (first
///   record of the right type, or an ANY query) or starts a CNAME
///   chain to follow.
///
/// - no answers but NS records in the authority section is a
///   referral; glue addresses are taken from the additional section
///   when their names match the delegated nameservers.
///
/// - no answers and no delegation from an authoritative server is a
///   "no such data" answer.
///
/// Truncated responses are not rejected: one that still carries an
/// answer or a referral is progress (TCP retry is not available).
pub fn classify_response(question: &Question, response: &Message) -> Classified {
    if response.header.rcode == Rcode::NameError {
        return Classified::Negative {
            rcode: Rcode::NameError,
        };
    }
    if response.header.rcode != Rcode::NoError {
        return Classified::Unusable;
    }

    if let Some(first) = response.answers.first() {
        if let RecordData::CNAME { cname } = &first.rdata {
            let want_cname = question.qtype == QueryType::Record(RecordType::CNAME)
                || question.qtype == QueryType::Wildcard;
            if !want_cname {
                return Classified::CnameFollow {
                    rrs: response.answers.clone(),
                    target: cname.clone(),
                };
            }
        }
        return Classified::Answer {
            rrs: response.answers.clone(),
        };
    }

    let ns_names: Vec<DomainName> = response
        .authority
        .iter()
        .filter_map(|rr| match &rr.rdata {
            RecordData::NS { nsdname } => Some(nsdname.clone()),
            _ => None,
        })
        .collect();

    if !ns_names.is_empty() {
        let glue = response
            .additional
            .iter()
            .filter_map(|rr| {
                if !ns_names.contains(&rr.name) {
                    return None;
                }
                match rr.rdata {
                    RecordData::A { address } => Some(IpAddr::V4(address)),
                    RecordData::AAAA { address } => Some(IpAddr::V6(address)),
                    _ => None,
                }
            })
            .collect();

        return Classified::Referral { ns_names, glue };
    }

    if response.header.is_authoritative {
        return Classified::Negative {
            rcode: Rcode::NoError,
        };
    }

    Classified::Unusable
}

#[cfg(test)]
mod tests {
    use dns_wire::types::test_util::*;
    use std::net::{Ipv4Addr, Ipv6Addr};

    use super::*;
    use crate::util::nameserver::test_util::*;

    #[test]
    fn classify_answer() {
        let (request, response) = nameserver_response(
            "www.example.com",
            &[a_record("www.example.com", Ipv4Addr::new(93, 184, 216, 34))],
            &[],
            &[],
        );

        assert_eq!(
            Classified::Answer {
                rrs: vec![a_record("www.example.com", Ipv4Addr::new(93, 184, 216, 34))],
            },
            classify_response(&request.questions[0], &response)
        );
    }

    #[test]
    fn classify_cname_follow() {
        let (request, response) = nameserver_response(
            "www.example.com",
            &[cname_record("www.example.com", "host.example.net")],
            &[],
            &[],
        );

        assert_eq!(
            Classified::CnameFollow {
                rrs: vec![cname_record("www.example.com", "host.example.net")],
                target: domain("host.example.net"),
            },
            classify_response(&request.questions[0], &response)
        );
    }

    #[test]
    fn classify_cname_is_an_answer_for_cname_queries() {
        let (request, response) = nameserver_response(
            "www.example.com",
            &[cname_record("www.example.com", "host.example.net")],
            &[],
            &[],
        );
        let mut question = request.questions[0].clone();
        question.qtype = QueryType::Record(RecordType::CNAME);

        assert_eq!(
            Classified::Answer {
                rrs: vec![cname_record("www.example.com", "host.example.net")],
            },
            classify_response(&question, &response)
        );

        question.qtype = QueryType::Wildcard;
        assert_eq!(
            Classified::Answer {
                rrs: vec![cname_record("www.example.com", "host.example.net")],
            },
            classify_response(&question, &response)
        );
    }

    #[test]
    fn classify_referral_with_glue() {
        let (request, response) = nameserver_response(
            "www.test.example",
            &[],
            &[ns_record("example", "a.example-tld")],
            &[
                a_record("a.example-tld", Ipv4Addr::new(10, 0, 0, 1)),
                // glue for a server not in the delegation is ignored
                a_record("unrelated.example-tld", Ipv4Addr::new(10, 9, 9, 9)),
            ],
        );

        assert_eq!(
            Classified::Referral {
                ns_names: vec![domain("a.example-tld")],
                glue: vec![IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1))],
            },
            classify_response(&request.questions[0], &response)
        );
    }

    #[test]
    fn classify_referral_accepts_aaaa_glue() {
        let (request, response) = nameserver_response(
            "www.test.example",
            &[],
            &[ns_record("example", "a.example-tld")],
            &[aaaa_record("a.example-tld", Ipv6Addr::LOCALHOST)],
        );

        assert_eq!(
            Classified::Referral {
                ns_names: vec![domain("a.example-tld")],
                glue: vec![IpAddr::V6(Ipv6Addr::LOCALHOST)],
            },
            classify_response(&request.questions[0], &response)
        );
    }

    #[test]
    fn classify_referral_without_glue() {
        let (request, response) = nameserver_response(
            "www.test.example",
            &[],
            &[ns_record("example", "a.example-tld")],
            &[],
        );

        assert_eq!(
            Classified::Referral {
                ns_names: vec![domain("a.example-tld")],
                glue: Vec::new(),
            },
            classify_response(&request.questions[0], &response)
        );
    }

    #[test]
    fn classify_nxdomain_beats_authority_records() {
        let (request, mut response) = nameserver_response(
            "missing.example.com",
            &[],
            &[ns_record("example.com", "ns1.example.com")],
            &[],
        );
        response.header.rcode = Rcode::NameError;

        assert_eq!(
            Classified::Negative {
                rcode: Rcode::NameError,
            },
            classify_response(&request.questions[0], &response)
        );
    }

    #[test]
    fn classify_authoritative_empty_answer() {
        let (request, mut response) = nameserver_response("www.example.com", &[], &[], &[]);
        response.header.is_authoritative = true;

        assert_eq!(
            Classified::Negative {
                rcode: Rcode::NoError,
            },
            classify_response(&request.questions[0], &response)
        );
    }

    #[test]
    fn classify_upstream_failures_are_unusable() {
        for rcode in [
            Rcode::FormatError,
            Rcode::ServerFailure,
            Rcode::NotImplemented,
            Rcode::Refused,
        ] {
            let (request, mut response) = nameserver_response("www.example.com", &[], &[], &[]);
            response.header.rcode = rcode;

            assert_eq!(
                Classified::Unusable,
                classify_response(&request.questions[0], &response)
            );
        }
    }

    #[test]
    fn classify_empty_non_authoritative_is_unusable() {
        let (request, response) = nameserver_response("www.example.com", &[], &[], &[]);

        assert_eq!(
            Classified::Unusable,
            classify_response(&request.questions[0], &response)
        );
    }

    #[test]
    fn classify_truncated_referral_still_progresses() {
        let (request, mut response) = nameserver_response(
            "www.test.example",
            &[],
            &[ns_record("example", "a.example-tld")],
            &[a_record("a.example-tld", Ipv4Addr::new(10, 0, 0, 1))],
        );
        response.header.is_truncated = true;

        assert!(matches!(
            classify_response(&request.questions[0], &response),
            Classified::Referral { .. }
        ));
    }

    #[test]
    fn addresses_for_collects_both_families() {
        let rrs = vec![
            cname_record("ns1.example.com", "other.example.com"),
            a_record("other.example.com", Ipv4Addr::new(10, 0, 0, 1)),
            aaaa_record("other.example.com", Ipv6Addr::LOCALHOST),
        ];

        assert_eq!(
            vec![
                IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)),
                IpAddr::V6(Ipv6Addr::LOCALHOST),
            ],
            addresses_for(&rrs)
        );
    }
}

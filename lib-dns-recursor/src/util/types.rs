use std::net::IpAddr;

use dns_wire::types::*;

/// A finished resolution: what goes in the answer section, and the
/// rcode for the response header.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct Resolution {
    pub rcode: Rcode,
    pub answers: Vec<ResourceRecord>,
}

impl Resolution {
    pub fn empty(rcode: Rcode) -> Self {
        Self {
            rcode,
            answers: Vec::new(),
        }
    }
}

/// An error that ends a whole resolution.  Per-hop problems (a
/// timeout, a malformed or useless response) are recovered by moving
/// to the next nameserver and never surface here; these do surface,
/// and the caller turns them into a SERVFAIL response.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum ResolutionError {
    /// The overall deadline for the request expired.
    Timeout,
    /// The walk used up its depth budget: too many referral hops,
    /// CNAME links, or nameserver-name lookups.
    DepthExceeded,
    /// Every nameserver at some level of the walk failed to produce a
    /// usable response.
    NoNameservers { question: Question },
}

impl std::fmt::Display for ResolutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ResolutionError::Timeout => write!(f, "timed out"),
            ResolutionError::DepthExceeded => write!(f, "hit the recursion depth limit"),
            ResolutionError::NoNameservers { question } => {
                write!(f, "ran out of nameservers answering '{question}'")
            }
        }
    }
}

impl std::error::Error for ResolutionError {}

/// How a nameserver's response moves the walk forward.
#[derive(Debug, Clone, Eq, PartialEq)]
pub enum Classified {
    /// Records answering the question directly.
    Answer { rrs: Vec<ResourceRecord> },

    /// The name is an alias: the chain so far, and the target to
    /// resolve next.
    CnameFollow {
        rrs: Vec<ResourceRecord>,
        target: DomainName,
    },

    /// A delegation to nameservers closer to the answer.  `glue` has
    /// the addresses the additional section provided for them, which
    /// may be empty.
    Referral {
        ns_names: Vec<DomainName>,
        glue: Vec<IpAddr>,
    },

    /// An authoritative "no such data" or "no such name".
    Negative { rcode: Rcode },

    /// Nothing this walk can act on; try the next nameserver.
    Unusable,
}

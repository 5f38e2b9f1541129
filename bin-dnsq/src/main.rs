use clap::Parser;
use std::net::IpAddr;
use std::process;
use std::time::Duration;

use dns_recursor::cache::SharedCache;
use dns_recursor::config::{ResolverConfig, ROOT_HINTS};
use dns_recursor::resolve;
use dns_wire::types::{
    DomainName, QueryClass, QueryType, Question, RecordClass, RecordData, RecordType,
    ResourceRecord,
};

fn rdata_string(rdata: &RecordData) -> String {
    match rdata {
        RecordData::A { address } => address.to_string(),
        RecordData::NS { nsdname } => nsdname.to_string(),
        RecordData::CNAME { cname } => cname.to_string(),
        RecordData::SOA {
            mname,
            rname,
            serial,
            refresh,
            retry,
            expire,
            minimum,
        } => format!("{mname} {rname} {serial} {refresh} {retry} {expire} {minimum}"),
        RecordData::PTR { ptrdname } => ptrdname.to_string(),
        RecordData::MX {
            preference,
            exchange,
        } => format!("{preference} {exchange}"),
        RecordData::TXT { octets } => String::from_utf8_lossy(octets).into_owned(),
        RecordData::AAAA { address } => address.to_string(),
        RecordData::Unknown { octets, .. } => format!("\\# {} octets", octets.len()),
    }
}

fn print_section(heading: &str, rrs: &[ResourceRecord]) {
    if rrs.is_empty() {
        return;
    }

    println!("\n;; {heading}");
    for rr in rrs {
        println!(
            "{}\t{}\t{}\t{}\t{}",
            rr.name,
            rr.ttl,
            rr.rclass,
            rr.rtype(),
            rdata_string(&rr.rdata)
        );
    }
}

// the doc comments for this struct turn into the CLI help text
#[derive(Parser)]
/// DNS recursive lookup utility
///
/// Performs a full iterative resolution from the root servers, the
/// same way the recursed server would, and prints the result.
struct Args {
    /// Domain name to resolve
    #[clap(value_parser)]
    domain: DomainName,

    /// Query type to resolve
    #[clap(default_value_t = QueryType::Record(RecordType::A), value_parser)]
    qtype: QueryType,

    /// Root nameserver addresses to start from, comma-separated
    #[clap(short, long, value_parser, value_delimiter = ',', default_values_t = ROOT_HINTS)]
    root_servers: Vec<IpAddr>,

    /// How long to wait for each upstream nameserver, in milliseconds
    #[clap(short, long, value_parser, default_value_t = 5000)]
    timeout_ms: u64,

    /// Maximum referral / CNAME / nameserver-lookup depth
    #[clap(short, long, value_parser, default_value_t = 16)]
    max_depth: usize,

    /// Which port to query upstream nameservers on
    #[clap(long, value_parser, default_value_t = 53)]
    upstream_dns_port: u16,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let question = Question {
        name: args.domain,
        qtype: args.qtype,
        qclass: QueryClass::Record(RecordClass::IN),
    };

    let config = ResolverConfig {
        root_servers: args.root_servers,
        timeout: Duration::from_millis(args.timeout_ms),
        max_depth: args.max_depth,
        upstream_port: args.upstream_dns_port,
    };

    println!(";; QUESTION");
    println!("{}\t{}\t{}", question.name, question.qclass, question.qtype);

    let (metrics, result) = resolve(&config, &SharedCache::default(), &question).await;

    match result {
        Ok(resolution) => {
            if resolution.answers.is_empty() {
                println!("\n;; ANSWER");
                println!("; empty ({})", resolution.rcode);
            } else {
                print_section("ANSWER", &resolution.answers);
            }
            println!(
                "\n;; {} queries, depth {}",
                metrics.queries_made, metrics.max_depth_reached
            );
        }
        Err(err) => {
            println!("\n;; ANSWER");
            println!("; {err}");
            process::exit(1);
        }
    }
}

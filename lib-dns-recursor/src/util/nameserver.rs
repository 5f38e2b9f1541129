use rand::Rng;
use std::net::IpAddr;
use std::time::Duration;
use tokio::time::timeout;

use dns_wire::types::*;

use crate::util::net::{bind_for, RECV_BUFFER_SIZE};

/// Send a question to a remote nameserver over UDP and wait for the
/// matching response.
///
/// The socket accepts a datagram from any source: correlation is by
/// the query id and the echoed question, and datagrams which match
/// neither are discarded and the receive retried, all within the one
/// `budget`.  `None` on timeout or any socket error.
///
/// The response is NOT otherwise validated - rcode and truncation
/// triage is the caller's job.
pub async fn query_nameserver(
    address: IpAddr,
    port: u16,
    question: &Question,
    budget: Duration,
) -> Option<Message> {
    let request = Message::from_question(rand::rng().random(), question.clone());

    let serialised = match request.clone().into_octets() {
        Ok(octets) => octets,
        Err(error) => {
            tracing::warn!(message = ?request, ?error, "could not serialise query");
            return None;
        }
    };

    match timeout(
        budget,
        query_nameserver_notimeout(address, port, &request, &serialised),
    )
    .await
    {
        Ok(res) => res,
        Err(_) => {
            tracing::trace!(%address, "nameserver timed out");
            None
        }
    }
}

/// Timeout-less version of `query_nameserver`.
async fn query_nameserver_notimeout(
    address: IpAddr,
    port: u16,
    request: &Message,
    serialised: &[u8],
) -> Option<Message> {
    let sock = bind_for(address).await.ok()?;
    sock.send_to(serialised, (address, port)).await.ok()?;

    let mut buf = vec![0u8; RECV_BUFFER_SIZE];
    loop {
        let (len, _) = sock.recv_from(&mut buf).await.ok()?;
        match Message::from_octets(&buf[..len]) {
            Ok(response) if response_matches_request(request, &response) => {
                return Some(response);
            }
            // a stray, late, or spoofed datagram; keep waiting for
            // ours until the budget runs out
            _ => (),
        }
    }
}

/// Check that a datagram answers the query we sent: id, opcode, and
/// question section must all match, and it must be a response at all.
pub fn response_matches_request(request: &Message, response: &Message) -> bool {
    if request.header.id != response.header.id {
        return false;
    }
    if !response.header.is_response {
        return false;
    }
    if request.header.opcode != response.header.opcode {
        return false;
    }
    if request.questions != response.questions {
        return false;
    }

    true
}

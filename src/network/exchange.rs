//! One request/response cycle on a connection.
//!
//! `serve` reads a frame, hands the parsed request to the handler, writes the
//! response and reports how the connection should proceed. The request, the
//! reply slot and the response are locals of a single call, so nothing from
//! one exchange survives into the next.

use crate::config::PROTOCOL_VERSION;
use crate::handler::Handler;
use crate::io::{ReceiveError, Receiver};
use crate::protocol::{
    AuthGrant, Broadcast, Detail, Header, Reply, Request, Response, ResponseBody, StatusCode,
};
use bytes::Bytes;
use std::io::{Read, Write};
use std::net::SocketAddr;
use tracing::{debug, warn};

/// How the connection fares after one exchange
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Keep serving
    Ok,
    /// Peer closed, or the protocol requires closing; not an error
    Eof,
    /// Transport or resource failure; drop the connection
    Fatal,
}

/// Result of one exchange as seen by the event loop
#[derive(Debug)]
pub struct Cycle {
    pub outcome: Outcome,
    /// Status sent back, if a response was written
    pub status: Option<StatusCode>,
    /// Raised by the handler; only set when the outcome is `Ok`
    pub broadcast: Option<Broadcast>,
    /// Credentials granted by a successful CREATE/AUTH
    pub login: Option<AuthGrant>,
}

impl Cycle {
    fn closed(outcome: Outcome) -> Self {
        Self {
            outcome,
            status: None,
            broadcast: None,
            login: None,
        }
    }
}

/// Run one exchange on `receiver`'s stream
pub fn serve<S, H>(receiver: &mut Receiver<S>, peer: SocketAddr, handler: &mut H) -> Cycle
where
    S: Read + Write,
    H: Handler,
{
    let mut word = [0u8; Header::LEN];
    match receiver.read_exact(&mut word) {
        Ok(()) => {}
        Err(ReceiveError::Eof) => return Cycle::closed(Outcome::Eof),
        Err(e) => {
            warn!("Failed to read header from {}: {}", peer, e);
            return Cycle::closed(Outcome::Fatal);
        }
    }

    let header = match Header::from_bytes(word) {
        Ok(header) => header,
        Err(e) => {
            warn!("Dropping frame from {}: {}", peer, e);
            return Cycle::closed(Outcome::Fatal);
        }
    };

    let body_len = usize::from(header.body_len);
    let mut body = Vec::new();
    if body.try_reserve_exact(body_len).is_err() {
        warn!("Cannot allocate {} byte body for {}", body_len, peer);
        return Cycle::closed(Outcome::Fatal);
    }
    body.resize(body_len, 0);

    match receiver.read_exact(&mut body) {
        Ok(()) => {}
        Err(ReceiveError::Eof) => {
            debug!("{} closed mid-frame", peer);
            return Cycle::closed(Outcome::Eof);
        }
        Err(e) => {
            warn!("Failed to read body from {}: {}", peer, e);
            return Cycle::closed(Outcome::Fatal);
        }
    }

    if header.version != PROTOCOL_VERSION {
        warn!(
            "{} speaks protocol version {}, expected {}",
            peer, header.version, PROTOCOL_VERSION
        );
        let response = Response::build(&header, StatusCode::VersionMismatch, Detail::None);
        let outcome = match write_response(receiver.get_mut(), &response) {
            Ok(()) => Outcome::Eof,
            Err(e) => {
                warn!("Failed to write response to {}: {}", peer, e);
                Outcome::Fatal
            }
        };
        return Cycle {
            outcome,
            status: Some(response.status),
            broadcast: None,
            login: None,
        };
    }

    let (status, detail, broadcast) = match Request::parse(header, Bytes::from(body), peer) {
        Ok(request) => {
            let mut reply = Reply::new();
            handler.handle(request, &mut reply);
            let status = reply.status.unwrap_or_else(|| {
                warn!("Handler left no status for {}", peer);
                StatusCode::InternalError
            });
            (status, reply.detail, reply.broadcast)
        }
        Err(e) => {
            debug!("Rejecting request from {}: {}", peer, e);
            (e.status(), Detail::None, None)
        }
    };

    let response = Response::build(&header, status, detail);
    debug!(
        "{} action={} object={} -> {}",
        peer, header.action, header.object, response.status
    );

    if let Err(e) = write_response(receiver.get_mut(), &response) {
        warn!("Failed to write response to {}: {}", peer, e);
        return Cycle::closed(Outcome::Fatal);
    }

    // Only what the client was actually told counts
    let login = match &response.body {
        ResponseBody::Auth(grant) if response.status == StatusCode::Ok => Some(grant.clone()),
        _ => None,
    };

    Cycle {
        outcome: Outcome::Ok,
        status: Some(response.status),
        broadcast: if response.status.is_success() {
            broadcast
        } else {
            None
        },
        login,
    }
}

fn write_response<W: Write>(stream: &mut W, response: &Response) -> std::io::Result<()> {
    let header = response
        .header
        .to_bytes()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    stream.write_all(&header)?;
    stream.write_all(&response.raw_body)?;
    stream.flush()
}

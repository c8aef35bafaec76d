//! Public HTTP/1.1 frontend.
//!
//! Each accepted connection carries exactly one request: the frontend
//! reads it whole (head and body), forwards it through the router, and
//! writes back whatever raw response bytes the tunnel returns. The
//! connection is held open while the request is in flight and closed
//! after the response.

use std::net::SocketAddr;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, info, warn};

use burrow_core::http::{self, RequestHead};
use burrow_proto::ClientAddr;

use crate::router::{RequestRouter, RouterError};

/// Response bytes go out to the public client in chunks of this size;
/// backpressure comes from the socket, never from added delay.
const WRITE_CHUNK: usize = 256 * 1024;

/// Reading the head stops after this many bytes without a blank line.
const MAX_HEAD_BYTES: usize = 64 * 1024;

/// Limits for the public side.
#[derive(Debug, Clone)]
pub struct FrontendConfig {
    /// Cap on a request body; requests above it get 413.
    pub max_body_bytes: usize,
}

impl Default for FrontendConfig {
    fn default() -> Self {
        Self {
            max_body_bytes: 64 * 1024 * 1024,
        }
    }
}

/// Accept public HTTP connections until the listener fails.
pub async fn serve(
    listener: TcpListener,
    router: RequestRouter,
    config: FrontendConfig,
) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "HTTP frontend listening");
    loop {
        let (stream, peer) = listener.accept().await?;
        let router = router.clone();
        let config = config.clone();
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, &router, &config).await {
                debug!(peer = %peer, error = %e, "Public connection ended with error");
            }
        });
    }
}

async fn handle_connection(
    mut stream: TcpStream,
    peer: SocketAddr,
    router: &RequestRouter,
    config: &FrontendConfig,
) -> std::io::Result<()> {
    let request = match read_request(&mut stream, config).await? {
        ReadOutcome::Complete(data) => data,
        ReadOutcome::Rejected(response) => {
            stream.write_all(&response).await?;
            return stream.shutdown().await;
        }
        ReadOutcome::ClosedEarly => return Ok(()),
    };

    debug!(peer = %peer, bytes = request.len(), "Public request read");

    let client_addr = Some(ClientAddr(peer.ip().to_string(), peer.port()));
    match router.forward(request, client_addr).await {
        Ok(response) => {
            debug!(peer = %peer, bytes = response.len(), "Writing response to public client");
            for chunk in response.chunks(WRITE_CHUNK) {
                stream.write_all(chunk).await?;
            }
            stream.flush().await?;
        }
        Err(RouterError::NoClient) => {
            warn!(peer = %peer, "No tunnel client connected; rejecting request");
            let body = http::simple_response(503, "Service Unavailable", "No client connected");
            stream.write_all(&body).await?;
        }
        Err(e @ (RouterError::SendFailed(_) | RouterError::ResponseDropped(_))) => {
            warn!(peer = %peer, error = %e, "Tunnel failure while forwarding");
            let body =
                http::simple_response(500, "Internal Server Error", "Error relaying request");
            stream.write_all(&body).await?;
        }
        Err(RouterError::Timeout(_)) => {
            // Deadline elapsed: close without writing any partial
            // response prefix.
        }
    }
    stream.shutdown().await
}

enum ReadOutcome {
    /// Full request wire bytes, head and body.
    Complete(Vec<u8>),
    /// The request was refused; write this response and close.
    Rejected(Vec<u8>),
    /// The peer closed before sending a complete head.
    ClosedEarly,
}

/// Read one full HTTP/1.1 request: the head up to the blank line, then
/// exactly `Content-Length` body bytes.
async fn read_request(
    stream: &mut TcpStream,
    config: &FrontendConfig,
) -> std::io::Result<ReadOutcome> {
    let mut buf: Vec<u8> = Vec::with_capacity(8 * 1024);

    let head_end = loop {
        if let Some(end) = http::find_header_end(&buf) {
            break end;
        }
        if buf.len() > MAX_HEAD_BYTES {
            return Ok(ReadOutcome::Rejected(bad_request("Header block too large")));
        }
        if stream.read_buf(&mut buf).await? == 0 {
            return Ok(ReadOutcome::ClosedEarly);
        }
    };

    let head = match RequestHead::parse(&buf[..head_end - 4]) {
        Ok(head) => head,
        Err(e) => return Ok(ReadOutcome::Rejected(bad_request(&e.to_string()))),
    };

    if head.is_chunked() {
        return Ok(ReadOutcome::Rejected(http::simple_response(
            501,
            "Not Implemented",
            "Transfer-Encoding: chunked is not supported",
        )));
    }

    let content_length = match head.content_length() {
        Ok(len) => len,
        Err(e) => return Ok(ReadOutcome::Rejected(bad_request(&e.to_string()))),
    };

    let body_len = match content_length {
        Some(len) => len,
        // Methods that carry a body must declare its length.
        None if matches!(head.method.as_str(), "POST" | "PUT" | "PATCH") => {
            return Ok(ReadOutcome::Rejected(bad_request(
                "Content-Length required for this method",
            )));
        }
        None => 0,
    };

    if body_len > config.max_body_bytes {
        return Ok(ReadOutcome::Rejected(http::simple_response(
            413,
            "Payload Too Large",
            "Request body exceeds the configured limit",
        )));
    }

    // Bytes past the head already read belong to the body.
    let total = head_end + body_len;
    while buf.len() < total {
        if stream.read_buf(&mut buf).await? == 0 {
            return Ok(ReadOutcome::Rejected(bad_request(
                "Body shorter than Content-Length",
            )));
        }
    }
    buf.truncate(total);

    Ok(ReadOutcome::Complete(buf))
}

fn bad_request(detail: &str) -> Vec<u8> {
    http::simple_response(400, "Bad Request", detail)
}

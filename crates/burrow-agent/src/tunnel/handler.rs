//! Request forwarding to the local HTTP service.
//!
//! A request frame carries the verbatim wire bytes of the public
//! request. The forwarder re-parses them, replays the request against
//! the configured base URL, and reassembles the local service's answer
//! into wire bytes for the response frame. Handling never fails: every
//! failure mode degrades to a synthesised 400 or 500 response so the
//! relay always gets exactly one response per request.

use std::time::Duration;

use tracing::{debug, warn};

use burrow_core::http::{self, RequestHead};
use burrow_proto::{RequestFrame, ResponseFrame};

use super::error::AgentError;

/// Forwards tunnelled requests to the local service.
pub struct RequestForwarder {
    /// Local base URL, trailing slash stripped.
    base_url: String,
    http: reqwest::Client,
}

enum ForwardError {
    /// The frame's request bytes could not be parsed.
    Malformed(String),
    /// The local service failed, timed out, or was unreachable.
    Upstream(String),
}

impl RequestForwarder {
    pub fn new(local_api_url: &str, timeout: Duration) -> Result<Self, AgentError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AgentError::LocalApi(e.to_string()))?;
        Ok(Self {
            base_url: local_api_url.trim_end_matches('/').to_string(),
            http,
        })
    }

    /// Forward one request frame and produce its response frame.
    pub async fn handle(&self, request: RequestFrame) -> ResponseFrame {
        let request_id = request.id;
        debug!(
            request_id = %request_id,
            bytes = request.data.len(),
            "Handling tunnelled request"
        );

        let data = match self.forward(&request.data).await {
            Ok(wire) => wire,
            Err(ForwardError::Malformed(detail)) => {
                warn!(request_id = %request_id, detail, "Malformed tunnelled request");
                http::simple_response(400, "Bad Request", &format!("Invalid HTTP request: {detail}"))
            }
            Err(ForwardError::Upstream(detail)) => {
                warn!(request_id = %request_id, detail, "Local API call failed");
                http::simple_response(
                    500,
                    "Internal Server Error",
                    &format!("Error forwarding request to local API: {detail}"),
                )
            }
        };

        debug!(request_id = %request_id, bytes = data.len(), "Response assembled");
        ResponseFrame { request_id, data }
    }

    async fn forward(&self, raw: &[u8]) -> Result<Vec<u8>, ForwardError> {
        let (head_bytes, body) =
            http::split_message(raw).map_err(|e| ForwardError::Malformed(e.to_string()))?;
        let head =
            RequestHead::parse(head_bytes).map_err(|e| ForwardError::Malformed(e.to_string()))?;

        let method = reqwest::Method::from_bytes(head.method.as_bytes())
            .map_err(|_| ForwardError::Malformed(format!("bad method {:?}", head.method)))?;
        let url = format!("{}{}", self.base_url, head.target);
        debug!(method = %method, url = %url, body_bytes = body.len(), "Calling local API");

        let mut builder = self.http.request(method, &url);
        for (name, value) in &head.headers {
            // The local hop computes its own connection headers; the
            // body bytes are forwarded exactly, so the recomputed
            // Content-Length is identical.
            if matches!(
                name.to_ascii_lowercase().as_str(),
                "host" | "content-length" | "connection"
            ) {
                continue;
            }
            builder = builder.header(name.as_str(), value.as_str());
        }
        if !body.is_empty() {
            builder = builder.body(body.to_vec());
        }

        let response = builder
            .send()
            .await
            .map_err(|e| ForwardError::Upstream(e.to_string()))?;

        let status = response.status();
        let reason = status.canonical_reason().unwrap_or("");
        let headers: Vec<(String, String)> = response
            .headers()
            .iter()
            .map(|(name, value)| {
                (
                    name.as_str().to_string(),
                    String::from_utf8_lossy(value.as_bytes()).to_string(),
                )
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|e| ForwardError::Upstream(e.to_string()))?;

        Ok(http::assemble_response(
            status.as_u16(),
            reason,
            &headers,
            &body,
        ))
    }
}

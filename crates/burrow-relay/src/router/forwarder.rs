//! Router that forwards public requests through the tunnel and waits
//! for the matching response frame.

use std::time::Duration;

use tokio::time::timeout;
use tracing::{debug, warn};
use uuid::Uuid;

use burrow_proto::{ClientAddr, Frame, RequestFrame, unix_timestamp};

use crate::registry::ClientRegistry;

/// Forwards raw HTTP requests to a tunnel client and returns the raw
/// HTTP response bytes.
#[derive(Clone)]
pub struct RequestRouter {
    registry: ClientRegistry,
    pending_timeout: Duration,
}

impl RequestRouter {
    pub fn new(registry: ClientRegistry, pending_timeout: Duration) -> Self {
        Self {
            registry,
            pending_timeout,
        }
    }

    /// Wrap `data` (verbatim HTTP/1.1 request bytes) in a signed request
    /// frame, send it to a registered client, and wait for the response.
    pub async fn forward(
        &self,
        data: Vec<u8>,
        client_addr: Option<ClientAddr>,
    ) -> Result<Vec<u8>, RouterError> {
        let (client_id, conn) = self.registry.select().await.ok_or(RouterError::NoClient)?;

        let request = RequestFrame {
            id: Uuid::new_v4(),
            timestamp: unix_timestamp(),
            data,
            client_addr,
        };
        let request_id = request.id;
        debug!(
            request_id = %request_id,
            client_id = %client_id,
            "Forwarding request over tunnel"
        );

        // Register the waiter before sending so the response cannot race
        // past us.
        let response_rx = conn.register_pending(request_id).await;

        if conn.send_frame(Frame::Request(request)).await.is_err() {
            // Writer gone: the connection is dead. Evict its clients so
            // the next request does not pick it again.
            self.registry.remove_connection(conn.id()).await;
            conn.cancel_all_pending().await;
            warn!(client_id = %client_id, "Tunnel write failed; client evicted");
            return Err(RouterError::SendFailed(client_id));
        }

        match timeout(self.pending_timeout, response_rx).await {
            Ok(Ok(response)) => {
                debug!(
                    request_id = %request_id,
                    bytes = response.data.len(),
                    "Response frame received"
                );
                Ok(response.data)
            }
            Ok(Err(_)) => Err(RouterError::ResponseDropped(request_id)),
            Err(_) => {
                conn.forget_pending(request_id).await;
                warn!(request_id = %request_id, client_id = %client_id, "Request timed out");
                Err(RouterError::Timeout(request_id))
            }
        }
    }

    pub fn registry(&self) -> &ClientRegistry {
        &self.registry
    }
}

#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    #[error("No tunnel client registered")]
    NoClient,

    #[error("Failed to send through tunnel to client {0}")]
    SendFailed(Uuid),

    #[error("Request timed out: {0}")]
    Timeout(Uuid),

    #[error("Response channel dropped: {0}")]
    ResponseDropped(Uuid),
}

//! Per-socket tunnel connection state.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{RwLock, mpsc, oneshot};
use uuid::Uuid;

use burrow_proto::{Frame, ResponseFrame};

/// Numeric id assigned to each accepted tunnel socket. Client ids are
/// chosen by the peer and only trusted after a signed registration; the
/// connection id is ours and identifies the socket itself.
pub type ConnectionId = u64;

/// One accepted tunnel socket: a handle to its writer task and the
/// table of requests sent down it that still await a response frame.
pub struct TunnelConnection {
    id: ConnectionId,
    /// Sender feeding the connection's single writer task; this is what
    /// serialises frame writes.
    frame_tx: mpsc::Sender<Frame>,
    /// Pending response waiters keyed by request id.
    pending: RwLock<HashMap<Uuid, oneshot::Sender<ResponseFrame>>>,
}

impl TunnelConnection {
    pub fn new(id: ConnectionId, frame_tx: mpsc::Sender<Frame>) -> Arc<Self> {
        Arc::new(Self {
            id,
            frame_tx,
            pending: RwLock::new(HashMap::new()),
        })
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Queue a frame for the writer task.
    pub async fn send_frame(&self, frame: Frame) -> Result<(), mpsc::error::SendError<Frame>> {
        self.frame_tx.send(frame).await
    }

    /// Register a pending request and return the receiver its response
    /// will be delivered on.
    pub async fn register_pending(&self, request_id: Uuid) -> oneshot::Receiver<ResponseFrame> {
        let (tx, rx) = oneshot::channel();
        self.pending.write().await.insert(request_id, tx);
        rx
    }

    /// Deliver a response frame to its waiter. The record is removed
    /// atomically, so a duplicate response finds nothing and returns
    /// `false`.
    pub async fn complete_pending(&self, request_id: Uuid, frame: ResponseFrame) -> bool {
        if let Some(tx) = self.pending.write().await.remove(&request_id) {
            tx.send(frame).is_ok()
        } else {
            false
        }
    }

    /// Drop a single pending record (deadline elapsed).
    pub async fn forget_pending(&self, request_id: Uuid) {
        self.pending.write().await.remove(&request_id);
    }

    /// Cancel every pending request on this connection; their waiters
    /// observe a closed channel.
    pub async fn cancel_all_pending(&self) {
        self.pending.write().await.clear();
    }

    #[cfg(test)]
    pub async fn pending_count(&self) -> usize {
        self.pending.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pending_request_lifecycle() {
        let (tx, _rx) = mpsc::channel(16);
        let conn = TunnelConnection::new(1, tx);

        let request_id = Uuid::new_v4();
        let response_rx = conn.register_pending(request_id).await;

        let delivered = conn
            .complete_pending(
                request_id,
                ResponseFrame {
                    request_id,
                    data: b"HTTP/1.1 200 OK\r\n\r\n".to_vec(),
                },
            )
            .await;
        assert!(delivered);

        let received = response_rx.await.unwrap();
        assert_eq!(received.request_id, request_id);
    }

    #[tokio::test]
    async fn duplicate_response_is_not_delivered() {
        let (tx, _rx) = mpsc::channel(16);
        let conn = TunnelConnection::new(1, tx);

        let request_id = Uuid::new_v4();
        let _response_rx = conn.register_pending(request_id).await;

        let frame = ResponseFrame {
            request_id,
            data: Vec::new(),
        };
        assert!(conn.complete_pending(request_id, frame.clone()).await);
        assert!(!conn.complete_pending(request_id, frame).await);
    }

    #[tokio::test]
    async fn unknown_request_id_returns_false() {
        let (tx, _rx) = mpsc::channel(16);
        let conn = TunnelConnection::new(1, tx);

        let frame = ResponseFrame {
            request_id: Uuid::new_v4(),
            data: Vec::new(),
        };
        assert!(!conn.complete_pending(Uuid::new_v4(), frame).await);
    }

    #[tokio::test]
    async fn cancel_all_pending_closes_waiters() {
        let (tx, _rx) = mpsc::channel(16);
        let conn = TunnelConnection::new(1, tx);

        let rx1 = conn.register_pending(Uuid::new_v4()).await;
        let rx2 = conn.register_pending(Uuid::new_v4()).await;
        conn.cancel_all_pending().await;

        assert!(rx1.await.is_err());
        assert!(rx2.await.is_err());
        assert_eq!(conn.pending_count().await, 0);
    }
}

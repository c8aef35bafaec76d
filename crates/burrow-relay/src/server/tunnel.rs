//! Tunnel listener: the framed back-channel from tunnel clients.
//!
//! Each accepted socket gets a single writer task fed by a channel (so
//! concurrent request frames never interleave on the wire) and a read
//! loop that dispatches registration and response frames. A signature
//! failure closes the connection; a clean close or fatal framing error
//! removes every client record bound to the socket and cancels its
//! pending requests.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use burrow_proto::{Frame, FrameReader, FrameSigner, FrameWriter, ProtoError};

use crate::registry::{ClientRegistry, TunnelConnection};

static NEXT_CONN_ID: AtomicU64 = AtomicU64::new(1);

/// Depth of the per-connection outbound frame queue.
const OUTBOUND_QUEUE: usize = 32;

/// Consecutive undecodable frames tolerated before the connection is
/// closed.
const MAX_PROTOCOL_ERRORS: u32 = 3;

/// Accept tunnel connections until the listener fails.
pub async fn serve(
    listener: TcpListener,
    registry: ClientRegistry,
    signer: FrameSigner,
) -> std::io::Result<()> {
    info!(addr = %listener.local_addr()?, "Tunnel listener ready");
    loop {
        let (stream, peer) = listener.accept().await?;
        let registry = registry.clone();
        let signer = signer.clone();
        tokio::spawn(handle_connection(stream, peer, registry, signer));
    }
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    registry: ClientRegistry,
    signer: FrameSigner,
) {
    let conn_id = NEXT_CONN_ID.fetch_add(1, Ordering::Relaxed);
    info!(conn_id, peer = %peer, "Tunnel connection accepted");

    let (read_half, write_half) = stream.into_split();
    let (frame_tx, mut frame_rx) = mpsc::channel::<Frame>(OUTBOUND_QUEUE);
    let conn = TunnelConnection::new(conn_id, frame_tx);

    let writer_signer = signer.clone();
    let writer_task = tokio::spawn(async move {
        let mut writer = FrameWriter::new(write_half, writer_signer);
        while let Some(frame) = frame_rx.recv().await {
            if let Err(e) = writer.write_frame(&frame).await {
                warn!(conn_id, error = %e, "Tunnel write failed");
                break;
            }
        }
    });

    let mut reader = FrameReader::new(read_half, signer);
    let mut protocol_errors = 0u32;
    loop {
        match reader.read_frame().await {
            Ok(Some(Frame::Register(reg))) => {
                protocol_errors = 0;
                registry.register(reg.client_id, Arc::clone(&conn)).await;
            }
            Ok(Some(Frame::Response(response))) => {
                protocol_errors = 0;
                if !registry.is_registered_connection(conn_id).await {
                    warn!(
                        conn_id,
                        request_id = %response.request_id,
                        "Response from unregistered connection dropped"
                    );
                    continue;
                }
                registry.touch_connection(conn_id).await;

                let request_id = response.request_id;
                debug!(
                    conn_id,
                    request_id = %request_id,
                    bytes = response.data.len(),
                    "Response frame received"
                );
                if !conn.complete_pending(request_id, response).await {
                    warn!(
                        conn_id,
                        request_id = %request_id,
                        "Unsolicited or duplicate response dropped"
                    );
                }
            }
            Ok(Some(Frame::Request(req))) => {
                warn!(conn_id, request_id = %req.id, "Request frame from client dropped");
            }
            Ok(None) => {
                info!(conn_id, "Tunnel connection closed by peer");
                break;
            }
            Err(ProtoError::BadSignature) => {
                warn!(conn_id, peer = %peer, "Signature verification failed; closing connection");
                break;
            }
            Err(e) if e.is_fatal() => {
                warn!(conn_id, error = %e, "Tunnel connection failed");
                break;
            }
            Err(e) => {
                protocol_errors += 1;
                warn!(conn_id, error = %e, protocol_errors, "Undecodable frame dropped");
                if protocol_errors >= MAX_PROTOCOL_ERRORS {
                    warn!(conn_id, "Too many protocol errors; closing connection");
                    break;
                }
            }
        }
    }

    let removed = registry.remove_connection(conn_id).await;
    conn.cancel_all_pending().await;
    writer_task.abort();
    info!(conn_id, clients_removed = removed.len(), "Tunnel connection cleaned up");
}

//! Tunnel agent: the persistent outbound connection to the relay.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::time::sleep;
use tracing::{error, info, warn};
use uuid::Uuid;

use burrow_proto::{Frame, FrameReader, FrameSigner, FrameWriter};

use super::config::AgentConfig;
use super::error::AgentError;
use super::handler::RequestForwarder;

/// Depth of the outbound frame queue feeding the writer task.
const OUTBOUND_QUEUE: usize = 128;

/// Consecutive undecodable frames tolerated before reconnecting.
const MAX_PROTOCOL_ERRORS: u32 = 3;

/// A connection that stayed up this long resets the backoff counter.
const HEALTHY_UPTIME: Duration = Duration::from_secs(60);

/// Maintains the tunnel connection and dispatches request frames.
pub struct TunnelAgent {
    config: AgentConfig,
    /// Self-minted identity, stable for the lifetime of the process.
    client_id: Uuid,
    forwarder: Arc<RequestForwarder>,
}

impl TunnelAgent {
    pub fn new(config: AgentConfig) -> Result<Self, AgentError> {
        let forwarder = Arc::new(RequestForwarder::new(
            &config.local_api_url,
            config.local_timeout,
        )?);
        Ok(Self {
            config,
            client_id: Uuid::new_v4(),
            forwarder,
        })
    }

    pub fn client_id(&self) -> Uuid {
        self.client_id
    }

    /// Run the agent with automatic reconnection.
    ///
    /// Connects to the relay, registers, and handles frames until the
    /// connection drops, then reconnects with exponential backoff.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut attempt: u32 = 0;

        loop {
            if *shutdown.borrow() {
                info!("Tunnel agent shutting down");
                return;
            }

            let started = Instant::now();
            match self.connect_and_run(&mut shutdown).await {
                Ok(()) => {
                    info!("Tunnel connection closed cleanly");
                    return;
                }
                Err(e) => {
                    if started.elapsed() > HEALTHY_UPTIME {
                        attempt = 0;
                    }

                    if !self.config.reconnect.should_retry(attempt) {
                        error!(error = %e, attempt, "Max reconnect attempts reached");
                        return;
                    }

                    let delay = self.config.reconnect.delay_for_attempt(attempt);
                    warn!(error = %e, attempt, delay_ms = delay.as_millis(), "Reconnecting");

                    tokio::select! {
                        () = sleep(delay) => {}
                        _ = shutdown.changed() => {
                            info!("Tunnel agent shutting down during reconnect wait");
                            return;
                        }
                    }

                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }

    /// Connect, register, and run the receive loop until the connection
    /// ends.
    async fn connect_and_run(
        &self,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), AgentError> {
        let stream = TcpStream::connect((self.config.server_host.as_str(), self.config.server_port))
            .await
            .map_err(|e| AgentError::Connection(e.to_string()))?;
        info!(
            server_host = %self.config.server_host,
            server_port = self.config.server_port,
            client_id = %self.client_id,
            "Connected to relay"
        );

        let signer = FrameSigner::new(self.config.secret.as_bytes());
        let (read_half, write_half) = stream.into_split();
        let (outbound_tx, mut outbound_rx) = mpsc::channel::<Frame>(OUTBOUND_QUEUE);

        let writer_signer = signer.clone();
        let writer_task = tokio::spawn(async move {
            let mut writer = FrameWriter::new(write_half, writer_signer);
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = writer.write_frame(&frame).await {
                    warn!(error = %e, "Tunnel write failed");
                    break;
                }
            }
        });

        outbound_tx
            .send(Frame::register(self.client_id))
            .await
            .map_err(|_| AgentError::Registration("Failed to queue registration frame".into()))?;
        info!(client_id = %self.client_id, "Registered with relay");

        let mut reader = FrameReader::new(read_half, signer);
        let result = self.receive_loop(&mut reader, &outbound_tx, shutdown).await;
        writer_task.abort();
        result
    }

    /// Read frames until the connection ends; each request frame is
    /// handled on its own task so slow local calls never stall the
    /// tunnel, and responses return in completion order.
    async fn receive_loop(
        &self,
        reader: &mut FrameReader<tokio::net::tcp::OwnedReadHalf>,
        outbound_tx: &mpsc::Sender<Frame>,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Result<(), AgentError> {
        let mut protocol_errors = 0u32;
        loop {
            tokio::select! {
                read = reader.read_frame() => match read {
                    Ok(Some(Frame::Request(request))) => {
                        protocol_errors = 0;
                        let forwarder = Arc::clone(&self.forwarder);
                        let tx = outbound_tx.clone();
                        tokio::spawn(async move {
                            let response = forwarder.handle(request).await;
                            if tx.send(Frame::Response(response)).await.is_err() {
                                warn!("Outbound channel closed while sending response");
                            }
                        });
                    }
                    Ok(Some(Frame::Register(_))) => {
                        warn!("Registration frame from relay dropped");
                    }
                    Ok(Some(Frame::Response(response))) => {
                        warn!(request_id = %response.request_id, "Response frame from relay dropped");
                    }
                    Ok(None) => {
                        return Err(AgentError::Connection("Stream ended by relay".into()));
                    }
                    Err(e) if e.is_fatal() => {
                        return Err(e.into());
                    }
                    Err(e) => {
                        protocol_errors += 1;
                        warn!(error = %e, protocol_errors, "Dropped undecodable frame");
                        if protocol_errors >= MAX_PROTOCOL_ERRORS {
                            return Err(AgentError::Connection(
                                "Too many protocol errors on tunnel stream".into(),
                            ));
                        }
                    }
                },
                _ = shutdown.changed() => {
                    info!("Tunnel agent received shutdown signal");
                    return Ok(());
                }
            }
        }
    }
}

//! Tunnel agent error types.

/// Errors that can occur in the tunnel agent.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("Connection error: {0}")]
    Connection(String),

    #[error("Registration error: {0}")]
    Registration(String),

    #[error("Protocol error: {0}")]
    Protocol(#[from] burrow_proto::ProtoError),

    #[error("Local API error: {0}")]
    LocalApi(String),
}

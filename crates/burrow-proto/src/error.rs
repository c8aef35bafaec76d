//! Wire protocol error types.

/// Errors from reading or writing tunnel frames.
#[derive(Debug, thiserror::Error)]
pub enum ProtoError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Signature verification failed")]
    BadSignature,

    #[error("Implausible signature length: {0}")]
    BadSignatureLength(u32),

    #[error("Frame exceeds maximum size of {max} bytes")]
    FrameTooLarge { max: usize },

    #[error("Malformed frame: {0}")]
    Malformed(String),

    #[error("Connection closed mid-frame")]
    UnexpectedEof,
}

impl ProtoError {
    /// Whether the error leaves the stream desynchronised. A bad signature
    /// or unparseable payload is reported after the full frame has been
    /// consumed, so the next frame can still be read; everything else
    /// corrupts the framing and the connection must be dropped.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::BadSignature | Self::Json(_))
    }
}

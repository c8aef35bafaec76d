//! Async frame reader and writer.
//!
//! The reader is buffered: the JSON scanner reports the exact frame
//! boundary, and any bytes already read beyond it are kept for the next
//! frame. The signature is verified over the exact payload bytes before
//! the JSON is parsed.
//!
//! Writers must not interleave: every connection runs a single writer
//! task fed by a channel, so a `FrameWriter` is owned by exactly one
//! task.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::ProtoError;
use crate::frame::Frame;
use crate::scan::{JsonObjectScanner, ScanStatus};
use crate::sign::FrameSigner;

/// Default cap on one frame (signature + payload). Response payloads of
/// hundreds of MiB are expected; base64 expands them by 4/3.
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1024 * 1024 * 1024;

/// Upper bound on the declared signature length. The deployed format
/// always sends 64, but the field is honoured as a length.
const MAX_SIGNATURE_BYTES: u32 = 1024;

/// Socket read granularity.
const READ_CHUNK: usize = 64 * 1024;

/// Write granularity for large payloads.
const WRITE_CHUNK: usize = 256 * 1024;

/// Reads signed frames from a byte stream.
pub struct FrameReader<R> {
    inner: R,
    signer: FrameSigner,
    buf: Vec<u8>,
    /// Consumed prefix of `buf`; compacted away on the next refill.
    pos: usize,
    max_frame_bytes: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R, signer: FrameSigner) -> Self {
        Self {
            inner,
            signer,
            buf: Vec::with_capacity(READ_CHUNK),
            pos: 0,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }

    /// Override the frame size cap.
    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }

    /// Read the next frame.
    ///
    /// Returns `Ok(None)` on a clean end of stream at a frame boundary.
    /// `BadSignature` and `Json` errors are reported only after the whole
    /// frame has been consumed, so the caller may keep reading; any other
    /// error means the stream is desynchronised (see
    /// [`ProtoError::is_fatal`]).
    pub async fn read_frame(&mut self) -> Result<Option<Frame>, ProtoError> {
        if self.available().is_empty() && self.fill().await? == 0 {
            return Ok(None);
        }

        let sig_len = u32::from_be_bytes(self.take::<4>().await?);
        if sig_len == 0 || sig_len > MAX_SIGNATURE_BYTES {
            return Err(ProtoError::BadSignatureLength(sig_len));
        }

        let signature = self.take_vec(sig_len as usize).await?;
        let signature = String::from_utf8(signature)
            .map_err(|_| ProtoError::Malformed("signature is not ASCII hex".into()))?;

        let payload_len = self.scan_payload(sig_len as usize).await?;
        let payload = &self.buf[self.pos..self.pos + payload_len];

        let verified = self.signer.verify(payload, &signature);
        let parsed = if verified {
            Some(serde_json::from_slice::<Frame>(payload))
        } else {
            None
        };
        // The frame is consumed whether or not it verifies, keeping the
        // stream aligned on the next frame.
        self.pos += payload_len;

        match parsed {
            None => Err(ProtoError::BadSignature),
            Some(result) => Ok(Some(result?)),
        }
    }

    /// Drive the scanner until the payload's outermost object closes.
    /// Returns the payload length; the payload starts at `self.pos`.
    async fn scan_payload(&mut self, sig_len: usize) -> Result<usize, ProtoError> {
        let mut scanner = JsonObjectScanner::new();
        loop {
            let fresh = &self.buf[self.pos + scanner.scanned()..];
            let status = scanner
                .feed(fresh)
                .map_err(|e| ProtoError::Malformed(e.to_string()))?;

            match status {
                ScanStatus::Complete(len) => return Ok(len),
                ScanStatus::NeedMore => {
                    if 4 + sig_len + scanner.scanned() > self.max_frame_bytes {
                        return Err(ProtoError::FrameTooLarge {
                            max: self.max_frame_bytes,
                        });
                    }
                    if self.fill().await? == 0 {
                        return Err(ProtoError::UnexpectedEof);
                    }
                }
            }
        }
    }

    fn available(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    /// Refill the buffer, first compacting away the consumed prefix.
    /// Returns the number of new bytes (0 on EOF).
    async fn fill(&mut self) -> Result<usize, ProtoError> {
        if self.pos > 0 {
            self.buf.drain(..self.pos);
            self.pos = 0;
        }
        self.buf.reserve(READ_CHUNK);
        Ok(self.inner.read_buf(&mut self.buf).await?)
    }

    /// Consume exactly `N` buffered bytes, refilling as needed.
    async fn take<const N: usize>(&mut self) -> Result<[u8; N], ProtoError> {
        let bytes = self.take_vec(N).await?;
        let mut out = [0u8; N];
        out.copy_from_slice(&bytes);
        Ok(out)
    }

    /// Consume exactly `n` buffered bytes, refilling as needed.
    async fn take_vec(&mut self, n: usize) -> Result<Vec<u8>, ProtoError> {
        while self.available().len() < n {
            if self.fill().await? == 0 {
                return Err(ProtoError::UnexpectedEof);
            }
        }
        let out = self.buf[self.pos..self.pos + n].to_vec();
        self.pos += n;
        Ok(out)
    }
}

/// Writes signed frames to a byte stream.
pub struct FrameWriter<W> {
    inner: W,
    signer: FrameSigner,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W, signer: FrameSigner) -> Self {
        Self { inner, signer }
    }

    /// Serialise, sign, and write one frame:
    /// `sig_len (u32 BE) ++ sig (hex) ++ payload (JSON)`.
    pub async fn write_frame(&mut self, frame: &Frame) -> Result<(), ProtoError> {
        let payload = serde_json::to_vec(frame)?;
        let signature = self.signer.sign(&payload);

        let mut header = Vec::with_capacity(4 + signature.len());
        header.extend_from_slice(&(signature.len() as u32).to_be_bytes());
        header.extend_from_slice(signature.as_bytes());
        self.inner.write_all(&header).await?;

        // Large payloads go out in bounded chunks; backpressure comes
        // from the socket's own flow control.
        for chunk in payload.chunks(WRITE_CHUNK) {
            self.inner.write_all(chunk).await?;
        }
        self.inner.flush().await?;
        Ok(())
    }
}

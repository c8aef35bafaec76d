//! Burrow Tunnel Wire Protocol
//!
//! One frame on the tunnel, in either direction, is:
//!
//! ```text
//! [ sig_len : u32 big-endian ] [ sig : ASCII hex, sig_len bytes ]
//!                              [ payload : UTF-8 JSON object ]
//! ```
//!
//! `sig` is the lowercase hex HMAC-SHA256 of the payload under the shared
//! secret. The payload is delimited by its own syntax: a frame ends where
//! the outermost JSON object closes, with no whitespace permitted between
//! frames. Signatures are verified in constant time before any payload
//! field is interpreted.

pub mod codec;
pub mod error;
pub mod frame;
pub mod scan;
pub mod sign;

pub use codec::{DEFAULT_MAX_FRAME_BYTES, FrameReader, FrameWriter};
pub use error::ProtoError;
pub use frame::{ClientAddr, Frame, RegisterFrame, RequestFrame, ResponseFrame, unix_timestamp};
pub use scan::JsonObjectScanner;
pub use sign::{FrameSigner, SIGNATURE_HEX_LEN};

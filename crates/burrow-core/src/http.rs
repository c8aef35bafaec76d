//! Minimal HTTP/1.1 wire handling.
//!
//! The tunnel does not interpret HTTP beyond what it strictly needs:
//! finding the end of a header block, reading `Content-Length`, splitting
//! a raw message into head and body, and assembling a response byte
//! string. Bodies are treated as opaque bytes throughout.

const HEADER_TERMINATOR: &[u8] = b"\r\n\r\n";
const CRLF: &str = "\r\n";

/// Errors from parsing HTTP wire bytes.
#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("Header block has no terminating blank line")]
    MissingHeaderTerminator,

    #[error("Malformed start line: {0:?}")]
    BadStartLine(String),

    #[error("Malformed Content-Length value: {0:?}")]
    BadContentLength(String),
}

/// Locate the first `CRLF CRLF`. Returns the offset one past it (the
/// length of the header block including the terminator).
pub fn find_header_end(buf: &[u8]) -> Option<usize> {
    buf.windows(HEADER_TERMINATOR.len())
        .position(|w| w == HEADER_TERMINATOR)
        .map(|i| i + HEADER_TERMINATOR.len())
}

/// Split a raw HTTP message at the first blank line into
/// `(head_without_terminator, body)`.
pub fn split_message(raw: &[u8]) -> Result<(&[u8], &[u8]), HttpError> {
    let end = find_header_end(raw).ok_or(HttpError::MissingHeaderTerminator)?;
    Ok((&raw[..end - HEADER_TERMINATOR.len()], &raw[end..]))
}

/// Parsed request start line and headers. Header order is preserved;
/// lookup is case-insensitive.
#[derive(Debug, Clone)]
pub struct RequestHead {
    pub method: String,
    pub target: String,
    pub version: String,
    pub headers: Vec<(String, String)>,
}

impl RequestHead {
    /// Parse a header block (without the terminating blank line).
    ///
    /// The start line is `METHOD target HTTP-version`; each header line
    /// splits on the first `:` with surrounding whitespace trimmed.
    /// Lines without a colon are skipped.
    pub fn parse(head: &[u8]) -> Result<Self, HttpError> {
        let text = String::from_utf8_lossy(head);
        let mut lines = text.split(CRLF);

        let start_line = lines.next().unwrap_or_default();
        let mut parts = start_line.split_whitespace();
        let (Some(method), Some(target), Some(version)) =
            (parts.next(), parts.next(), parts.next())
        else {
            return Err(HttpError::BadStartLine(start_line.to_string()));
        };

        let headers = lines
            .filter_map(|line| {
                line.split_once(':')
                    .map(|(k, v)| (k.trim().to_string(), v.trim().to_string()))
            })
            .collect();

        Ok(Self {
            method: method.to_string(),
            target: target.to_string(),
            version: version.to_string(),
            headers,
        })
    }

    /// First header value matching `name`, case-insensitively.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Parsed `Content-Length`, or `None` when absent.
    pub fn content_length(&self) -> Result<Option<usize>, HttpError> {
        match self.header("content-length") {
            None => Ok(None),
            Some(value) => value
                .parse::<usize>()
                .map(Some)
                .map_err(|_| HttpError::BadContentLength(value.to_string())),
        }
    }

    /// Whether the message declares `Transfer-Encoding: chunked`.
    pub fn is_chunked(&self) -> bool {
        self.header("transfer-encoding")
            .is_some_and(|v| v.to_ascii_lowercase().contains("chunked"))
    }
}

/// Assemble an HTTP/1.1 response wire message from parts, omitting any
/// `Transfer-Encoding` header. The body is appended as raw bytes.
pub fn assemble_response(
    status: u16,
    reason: &str,
    headers: &[(String, String)],
    body: &[u8],
) -> Vec<u8> {
    let mut head = format!("HTTP/1.1 {status} {reason}{CRLF}");
    for (name, value) in headers {
        if name.eq_ignore_ascii_case("transfer-encoding") {
            continue;
        }
        head.push_str(name);
        head.push_str(": ");
        head.push_str(value);
        head.push_str(CRLF);
    }
    head.push_str(CRLF);

    let mut wire = head.into_bytes();
    wire.extend_from_slice(body);
    wire
}

/// A complete plain-text response with `Content-Length` and
/// `Connection: close`, for locally-generated errors (400/500/501/503).
pub fn simple_response(status: u16, reason: &str, body: &str) -> Vec<u8> {
    let headers = vec![
        ("Content-Type".to_string(), "text/plain".to_string()),
        ("Content-Length".to_string(), body.len().to_string()),
        ("Connection".to_string(), "close".to_string()),
    ];
    assemble_response(status, reason, &headers, body.as_bytes())
}

// SPDX-License-Identifier: PMPL-1.0-or-later
// Copyright (c) 2026 Jonathan D.A. Jewell (hyperpolymath) <jonathan.jewell@open.ac.uk>
//
// Minimal HTTP/1.1 framing for the capture endpoint.
//
// Only what the mobile client needs: one request per connection, a
// Content-Length delimited body (no chunked transfer encoding), and a
// response that always closes the connection.  Anything else is reported
// as malformed and answered with 400.

use std::io;

use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::error;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Upper bound on the request line plus headers.
pub const MAX_HEADER_BYTES: usize = 16 * 1024;

/// Read granularity while looking for the end of the headers.
const READ_CHUNK: usize = 8 * 1024;

// ---------------------------------------------------------------------------
// Request
// ---------------------------------------------------------------------------

/// A parsed HTTP request with its full body.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: String,
    /// Request target with any query string removed.
    pub path: String,
    headers: Vec<(String, String)>,
    pub body: Vec<u8>,
}

impl HttpRequest {
    pub fn new(method: &str, path: &str, headers: &[(&str, &str)], body: Vec<u8>) -> Self {
        Self {
            method: method.to_string(),
            path: path.to_string(),
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
                .collect(),
            body,
        }
    }

    /// Case-insensitive header lookup.
    pub fn header(&self, name: &str) -> Option<&str> {
        let name = name.to_ascii_lowercase();
        self.headers
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Media type of the body, lowercased and without parameters
    /// (`image/png; q=1` becomes `image/png`).
    pub fn media_type(&self) -> Option<String> {
        self.header("content-type").map(|value| {
            value
                .split(';')
                .next()
                .unwrap_or_default()
                .trim()
                .to_ascii_lowercase()
        })
    }
}

/// What came off the wire.
#[derive(Debug)]
pub enum ReadOutcome {
    Request(HttpRequest),
    /// Declared body exceeds the configured limit; the body was not read.
    TooLarge { declared: usize },
    Malformed(String),
    /// Peer closed the connection without sending anything.
    Closed,
}

/// Read one request from `reader`.
///
/// Headers are read in chunks until the blank line; the body is then read
/// to exactly `Content-Length` bytes.  A missing Content-Length means an
/// empty body.
pub async fn read_request<R>(reader: &mut R, max_body_bytes: usize) -> io::Result<ReadOutcome>
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::with_capacity(READ_CHUNK);
    let mut chunk = vec![0u8; READ_CHUNK];

    let header_end = loop {
        if let Some(pos) = find_subsequence(&buf, b"\r\n\r\n") {
            break pos;
        }
        if buf.len() > MAX_HEADER_BYTES {
            return Ok(ReadOutcome::Malformed(format!(
                "request headers exceed {MAX_HEADER_BYTES} bytes"
            )));
        }
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(ReadOutcome::Closed);
            }
            return Ok(ReadOutcome::Malformed(
                "connection closed before end of headers".into(),
            ));
        }
        buf.extend_from_slice(&chunk[..n]);
    };

    let head = match std::str::from_utf8(&buf[..header_end]) {
        Ok(head) => head,
        Err(_) => return Ok(ReadOutcome::Malformed("headers are not valid UTF-8".into())),
    };

    let (method, path, headers) = match parse_head(head) {
        Ok(parsed) => parsed,
        Err(reason) => return Ok(ReadOutcome::Malformed(reason)),
    };

    let content_length = match headers.iter().find(|(k, _)| k == "content-length") {
        Some((_, value)) => match value.parse::<usize>() {
            Ok(len) => len,
            Err(_) => {
                return Ok(ReadOutcome::Malformed(format!(
                    "invalid Content-Length: {value}"
                )));
            }
        },
        None => 0,
    };

    if content_length > max_body_bytes {
        return Ok(ReadOutcome::TooLarge {
            declared: content_length,
        });
    }

    let mut body = buf.split_off(header_end + 4);
    body.truncate(content_length);
    if body.len() < content_length {
        let already = body.len();
        body.resize(content_length, 0);
        if let Err(e) = reader.read_exact(&mut body[already..]).await {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                return Ok(ReadOutcome::Malformed(
                    "body shorter than Content-Length".into(),
                ));
            }
            return Err(e);
        }
    }

    Ok(ReadOutcome::Request(HttpRequest {
        method,
        path,
        headers,
        body,
    }))
}

/// Split the request line and header block.
fn parse_head(head: &str) -> std::result::Result<(String, String, Vec<(String, String)>), String> {
    let mut lines = head.split("\r\n");
    let request_line = lines.next().unwrap_or_default();

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(target), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        return Err(format!("malformed request line: {request_line:?}"));
    };
    if !version.starts_with("HTTP/1.") {
        return Err(format!("unsupported protocol version: {version}"));
    }
    let path = target.split('?').next().unwrap_or(target).to_string();

    let mut headers = Vec::new();
    for line in lines {
        let Some((name, value)) = line.split_once(':') else {
            return Err(format!("malformed header line: {line:?}"));
        };
        headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
    }

    Ok((method.to_ascii_uppercase(), path, headers))
}

/// Find the first occurrence of `needle` in `haystack`.
fn find_subsequence(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

// ---------------------------------------------------------------------------
// Response
// ---------------------------------------------------------------------------

/// A response ready to be written.
#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: Vec<u8>,
}

impl HttpResponse {
    /// Serialize `value` as the JSON body.
    pub fn json<T: Serialize>(status: u16, value: &T) -> Self {
        match serde_json::to_vec(value) {
            Ok(body) => Self {
                status,
                content_type: "application/json",
                body,
            },
            Err(e) => {
                error!(error = %e, "failed to serialize response body");
                Self {
                    status: 500,
                    content_type: "application/json",
                    body: br#"{"detail":"Internal server error"}"#.to_vec(),
                }
            }
        }
    }

    /// A response with no body (CORS preflight).
    pub fn empty(status: u16) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: Vec::new(),
        }
    }
}

/// Standard reason phrase for the status codes this server emits.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        422 => "Unprocessable Entity",
        500 => "Internal Server Error",
        502 => "Bad Gateway",
        _ => "Unknown",
    }
}

/// Write `response` with permissive CORS headers and close semantics.
pub async fn send_response<W>(writer: &mut W, response: &HttpResponse) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let head = format!(
        "HTTP/1.1 {} {}\r\n\
         Content-Type: {}\r\n\
         Content-Length: {}\r\n\
         Access-Control-Allow-Origin: *\r\n\
         Access-Control-Allow-Methods: GET, POST, OPTIONS\r\n\
         Access-Control-Allow-Headers: *\r\n\
         Connection: close\r\n\
         \r\n",
        response.status,
        reason_phrase(response.status),
        response.content_type,
        response.body.len()
    );

    writer.write_all(head.as_bytes()).await?;
    writer.write_all(&response.body).await?;
    writer.flush().await
}

//! HTTP/1 wire encoding and decoding for replay transactions.
//!
//! Requests are assembled byte-for-byte from the captured flow so the
//! replayed bytes match what the original client sent: headers keep
//! their captured order, and the request line uses origin-form or
//! absolute-form depending on the proxy mode. Responses are read with
//! standard HTTP/1 framing (content-length, chunked transfer coding,
//! no-body status codes, read-to-close fallback).

use crate::flow::{Request, Response};
use bytes::{BufMut, Bytes, BytesMut};
use std::io;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, BufReader};

/// Maximum accepted size of a response header block (64 KiB).
const MAX_HEAD_SIZE: usize = 64 * 1024;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed status line: {0:?}")]
    InvalidStatusLine(String),
    #[error("malformed header line: {0:?}")]
    InvalidHeader(String),
    #[error("invalid content-length header: {0:?}")]
    InvalidContentLength(String),
    #[error("invalid chunked encoding: {0}")]
    InvalidChunk(String),
    #[error("response header block exceeds {MAX_HEAD_SIZE} bytes")]
    HeadTooLarge,
    #[error("connection closed before the response was complete")]
    UnexpectedEof,
    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Request-line form on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestForm {
    /// `GET /path HTTP/1.1` — direct connections and tunneled requests.
    Origin,
    /// `GET http://host:port/path HTTP/1.1` — plaintext requests sent
    /// through an upstream proxy.
    Absolute,
}

/// Serialize a captured request exactly as a client would emit it.
///
/// Captured headers are written verbatim in their original order. The
/// explicit host-header override, when present and not already captured,
/// is appended as a trailing `Host` header.
pub fn assemble_request(request: &Request, form: RequestForm) -> Bytes {
    let path = if request.path.is_empty() {
        "/"
    } else {
        request.path.as_str()
    };
    let target = match form {
        RequestForm::Origin => path.to_string(),
        RequestForm::Absolute => {
            format!("{}://{}{}", request.scheme, request.authority(), path)
        }
    };

    let mut buf = BytesMut::new();
    buf.put_slice(format!("{} {} HTTP/1.1\r\n", request.method, target).as_bytes());
    for (name, value) in &request.headers {
        buf.put_slice(format!("{name}: {value}\r\n").as_bytes());
    }
    if let Some(host) = &request.host_header {
        let captured_host = request
            .headers
            .iter()
            .any(|(name, _)| name.eq_ignore_ascii_case("host"));
        if !captured_host {
            buf.put_slice(format!("Host: {host}\r\n").as_bytes());
        }
    }
    buf.put_slice(b"\r\n");
    if let Some(content) = &request.content {
        buf.put_slice(content);
    }
    buf.freeze()
}

/// Serialize an HTTP CONNECT request for tunnel establishment.
pub fn assemble_connect(authority: &str) -> Bytes {
    Bytes::from(format!(
        "CONNECT {authority} HTTP/1.1\r\nHost: {authority}\r\n\r\n"
    ))
}

/// Parse `HTTP/1.x <code> <reason>`, returning the code and reason.
pub fn parse_status_line(line: &str) -> Result<(u16, String), CodecError> {
    let mut parts = line.splitn(3, ' ');
    let version = parts.next().unwrap_or("");
    if !version.starts_with("HTTP/1.") {
        return Err(CodecError::InvalidStatusLine(line.to_string()));
    }
    let code: u16 = parts
        .next()
        .unwrap_or("")
        .parse()
        .map_err(|_| CodecError::InvalidStatusLine(line.to_string()))?;
    if !(100..=999).contains(&code) {
        return Err(CodecError::InvalidStatusLine(line.to_string()));
    }
    let reason = parts.next().unwrap_or("").to_string();
    Ok((code, reason))
}

/// Read a CONNECT response head from an upstream proxy.
///
/// Reads one byte at a time so nothing past the header block is consumed:
/// the same transport carries the TLS handshake next, and buffering ahead
/// would swallow handshake bytes. Returns the parsed status code and the
/// status line as received (without the HTTP version).
pub async fn read_tunnel_response_head<S: AsyncRead + Unpin>(
    stream: &mut S,
) -> Result<(u16, String), CodecError> {
    let mut head: Vec<u8> = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        if head.len() >= MAX_HEAD_SIZE {
            return Err(CodecError::HeadTooLarge);
        }
        let n = stream.read(&mut byte).await?;
        if n == 0 {
            return Err(CodecError::UnexpectedEof);
        }
        head.push(byte[0]);
    }
    let head_text = String::from_utf8_lossy(&head);
    let status_line = head_text.lines().next().unwrap_or("");
    let (code, reason) = parse_status_line(status_line)?;
    Ok((code, format!("{code} {reason}")))
}

/// Read and parse a full HTTP/1 response: status line, headers, body.
///
/// `request_method` drives framing: responses to HEAD carry no body
/// regardless of their headers.
pub async fn read_response<S: AsyncRead + Unpin>(
    stream: &mut S,
    request_method: &str,
) -> Result<Response, CodecError> {
    let mut reader = BufReader::new(stream);

    let status_line = read_line(&mut reader).await?;
    let (status_code, reason) = parse_status_line(&status_line)?;

    let mut headers = Vec::new();
    let mut head_size = status_line.len();
    loop {
        let line = read_line(&mut reader).await?;
        if line.is_empty() {
            break;
        }
        head_size += line.len();
        if head_size > MAX_HEAD_SIZE {
            return Err(CodecError::HeadTooLarge);
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| CodecError::InvalidHeader(line.clone()))?;
        headers.push((name.trim().to_string(), value.trim().to_string()));
    }

    let body = match expected_body_size(request_method, status_code, &headers)? {
        BodySize::None => Vec::new(),
        BodySize::Known(size) => {
            let mut body = vec![0u8; size];
            reader.read_exact(&mut body).await.map_err(map_eof)?;
            body
        }
        BodySize::Chunked => read_chunked(&mut reader).await?,
        BodySize::UntilClose => {
            let mut body = Vec::new();
            reader.read_to_end(&mut body).await?;
            body
        }
    };

    Ok(Response {
        status_code,
        reason,
        headers,
        body,
    })
}

enum BodySize {
    None,
    Known(usize),
    Chunked,
    UntilClose,
}

/// HTTP/1 body framing rules (RFC 7230 section 3.3.3).
fn expected_body_size(
    request_method: &str,
    status_code: u16,
    headers: &[(String, String)],
) -> Result<BodySize, CodecError> {
    if request_method.eq_ignore_ascii_case("HEAD") {
        return Ok(BodySize::None);
    }
    if (100..200).contains(&status_code) || status_code == 204 || status_code == 304 {
        return Ok(BodySize::None);
    }
    if let Some(te) = header_value(headers, "transfer-encoding") {
        let te = te.to_ascii_lowercase();
        let last_coding = te.split(',').map(str::trim).next_back().unwrap_or("");
        if last_coding == "chunked" {
            return Ok(BodySize::Chunked);
        }
        // Other transfer codings are delimited by connection close.
        return Ok(BodySize::UntilClose);
    }
    if let Some(cl) = header_value(headers, "content-length") {
        let size: usize = cl
            .trim()
            .parse()
            .map_err(|_| CodecError::InvalidContentLength(cl.to_string()))?;
        return Ok(BodySize::Known(size));
    }
    Ok(BodySize::UntilClose)
}

fn header_value<'a>(headers: &'a [(String, String)], name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(n, _)| n.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

async fn read_chunked<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<Vec<u8>, CodecError> {
    let mut body = Vec::new();
    loop {
        let line = read_line(reader).await?;
        let size_str = line.split(';').next().unwrap_or("").trim();
        let size = usize::from_str_radix(size_str, 16)
            .map_err(|_| CodecError::InvalidChunk(format!("bad chunk size {size_str:?}")))?;
        if size == 0 {
            break;
        }
        let start = body.len();
        body.resize(start + size, 0);
        reader.read_exact(&mut body[start..]).await.map_err(map_eof)?;
        let terminator = read_line(reader).await?;
        if !terminator.is_empty() {
            return Err(CodecError::InvalidChunk("missing chunk terminator".into()));
        }
    }
    // Trailer section, discarded.
    loop {
        let line = read_line(reader).await?;
        if line.is_empty() {
            break;
        }
    }
    Ok(body)
}

/// Read one CRLF-terminated line, without the line ending.
async fn read_line<R: AsyncBufRead + Unpin>(reader: &mut R) -> Result<String, CodecError> {
    let mut buf = Vec::new();
    let n = reader.read_until(b'\n', &mut buf).await?;
    if n == 0 {
        return Err(CodecError::UnexpectedEof);
    }
    if buf.ends_with(b"\n") {
        buf.pop();
        if buf.ends_with(b"\r") {
            buf.pop();
        }
    }
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn map_eof(e: io::Error) -> CodecError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        CodecError::UnexpectedEof
    } else {
        CodecError::Io(e)
    }
}

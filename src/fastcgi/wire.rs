//! FastCGI 1.0 record codec and the tokio client built on it.
//!
//! # Responsibilities
//! - Frame BEGIN_REQUEST, PARAMS and STDIN records for one request
//! - Read STDOUT/STDERR records until END_REQUEST
//! - Decode the CGI response header block into status and headers
//!
//! # Design Decisions
//! - One connection per request; the keep-conn flag is never set
//! - Streams are chunked at the 65535-byte record limit and closed
//!   with an empty record
//! - Content is padded to a multiple of 8 bytes

use std::io;
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{header, HeaderMap, HeaderName, HeaderValue, StatusCode};
use bytes::{BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use super::client::{FcgiError, GatewayClient, GatewayRequest, GatewayResponse};
use super::rule::CgiEnvironment;
use crate::load_balancer::{Backend, Transport};

pub const VERSION_1: u8 = 1;
pub const HEADER_LEN: usize = 8;
pub const MAX_CONTENT: usize = 65535;

const REQUEST_ID: u16 = 1;
const ROLE_RESPONDER: u16 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RecordType {
    BeginRequest = 1,
    AbortRequest = 2,
    EndRequest = 3,
    Params = 4,
    Stdin = 5,
    Stdout = 6,
    Stderr = 7,
}

impl RecordType {
    fn from_u8(v: u8) -> Option<Self> {
        Some(match v {
            1 => RecordType::BeginRequest,
            2 => RecordType::AbortRequest,
            3 => RecordType::EndRequest,
            4 => RecordType::Params,
            5 => RecordType::Stdin,
            6 => RecordType::Stdout,
            7 => RecordType::Stderr,
            _ => return None,
        })
    }
}

/// Fixed eight-byte record header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordHeader {
    pub version: u8,
    pub kind: u8,
    pub request_id: u16,
    pub content_length: u16,
    pub padding_length: u8,
}

impl RecordHeader {
    pub fn decode(raw: &[u8; HEADER_LEN]) -> Self {
        Self {
            version: raw[0],
            kind: raw[1],
            request_id: u16::from_be_bytes([raw[2], raw[3]]),
            content_length: u16::from_be_bytes([raw[4], raw[5]]),
            padding_length: raw[6],
        }
    }

    pub fn record_type(&self) -> Option<RecordType> {
        RecordType::from_u8(self.kind)
    }
}

/// Append one record. `content` must fit in a single record.
pub fn put_record(buf: &mut BytesMut, kind: RecordType, content: &[u8]) {
    debug_assert!(content.len() <= MAX_CONTENT);
    let padding = (8 - content.len() % 8) % 8;
    buf.put_u8(VERSION_1);
    buf.put_u8(kind as u8);
    buf.put_u16(REQUEST_ID);
    buf.put_u16(content.len() as u16);
    buf.put_u8(padding as u8);
    buf.put_u8(0);
    buf.put_slice(content);
    buf.put_bytes(0, padding);
}

/// Append a stream as chunked records followed by the empty terminator.
pub fn put_stream(buf: &mut BytesMut, kind: RecordType, data: &[u8]) {
    for chunk in data.chunks(MAX_CONTENT) {
        put_record(buf, kind, chunk);
    }
    put_record(buf, kind, &[]);
}

fn put_length(buf: &mut BytesMut, len: usize) {
    if len < 0x80 {
        buf.put_u8(len as u8);
    } else {
        buf.put_u32(len as u32 | 0x8000_0000);
    }
}

/// Encode the environment as FastCGI name-value pairs.
pub fn encode_params(env: &CgiEnvironment) -> BytesMut {
    let mut buf = BytesMut::new();
    for (name, value) in env {
        put_length(&mut buf, name.len());
        put_length(&mut buf, value.len());
        buf.put_slice(name.as_bytes());
        buf.put_slice(value.as_bytes());
    }
    buf
}

/// Frame a complete request.
pub fn encode_request(request: &GatewayRequest) -> Bytes {
    let mut env = request.env.clone();
    request.verb.apply(&mut env);

    let mut buf = BytesMut::new();
    let mut begin = [0u8; 8];
    begin[..2].copy_from_slice(&ROLE_RESPONDER.to_be_bytes());
    put_record(&mut buf, RecordType::BeginRequest, &begin);
    put_stream(&mut buf, RecordType::Params, &encode_params(&env));
    let body: &[u8] = if request.verb.has_body() {
        &request.body
    } else {
        &[]
    };
    put_stream(&mut buf, RecordType::Stdin, body);
    buf.freeze()
}

/// Read one record, discarding its padding.
pub async fn read_record<R>(reader: &mut R) -> io::Result<(RecordHeader, Vec<u8>)>
where
    R: AsyncRead + Unpin,
{
    let mut raw = [0u8; HEADER_LEN];
    reader.read_exact(&mut raw).await?;
    let header = RecordHeader::decode(&raw);
    let mut content = vec![0u8; header.content_length as usize];
    reader.read_exact(&mut content).await?;
    let mut padding = vec![0u8; header.padding_length as usize];
    reader.read_exact(&mut padding).await?;
    Ok((header, content))
}

/// Collect STDOUT and STDERR until END_REQUEST.
async fn read_response<R>(reader: &mut R) -> Result<(BytesMut, BytesMut), FcgiError>
where
    R: AsyncRead + Unpin,
{
    let mut stdout = BytesMut::new();
    let mut stderr = BytesMut::new();
    loop {
        let (header, content) = match read_record(reader).await {
            Ok(record) => record,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(FcgiError::Protocol(
                    "connection closed before end of request".to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        };
        if header.version != VERSION_1 {
            return Err(FcgiError::Protocol(format!(
                "unsupported record version {}",
                header.version
            )));
        }
        match header.record_type() {
            Some(RecordType::Stdout) => stdout.put_slice(&content),
            Some(RecordType::Stderr) => stderr.put_slice(&content),
            Some(RecordType::EndRequest) => return Ok((stdout, stderr)),
            _ => tracing::debug!(kind = header.kind, "Ignoring FastCGI record"),
        }
    }
}

fn header_end(raw: &[u8]) -> Option<(usize, usize)> {
    let crlf = raw.windows(4).position(|w| w == b"\r\n\r\n").map(|i| (i, i + 4));
    let lf = raw.windows(2).position(|w| w == b"\n\n").map(|i| (i, i + 2));
    match (crlf, lf) {
        (Some(a), Some(b)) => Some(if a.0 <= b.0 { a } else { b }),
        (a, b) => a.or(b),
    }
}

/// Split a CGI response into status, headers and body.
///
/// A `Status` header sets the code; a `Location` without one means 302.
pub fn parse_cgi_response(raw: Bytes) -> Result<GatewayResponse, FcgiError> {
    let (head_end, body_start) = header_end(&raw)
        .ok_or_else(|| FcgiError::Protocol("malformed response header".to_string()))?;
    let head = std::str::from_utf8(&raw[..head_end])
        .map_err(|_| FcgiError::Protocol("response header is not utf-8".to_string()))?;

    let mut status = None;
    let mut headers = HeaderMap::new();
    for line in head.lines() {
        let line = line.trim_end_matches('\r');
        if line.is_empty() {
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| FcgiError::Protocol(format!("malformed header line {line:?}")))?;
        let (name, value) = (name.trim(), value.trim());

        if name.eq_ignore_ascii_case("status") {
            let code = value
                .get(..3)
                .and_then(|c| c.parse::<u16>().ok())
                .and_then(|c| StatusCode::from_u16(c).ok())
                .ok_or_else(|| FcgiError::Protocol(format!("bad status {value:?}")))?;
            status = Some(code);
            continue;
        }

        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| FcgiError::Protocol(format!("bad header name {name:?}")))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| FcgiError::Protocol(format!("bad header value for {name}")))?;
        headers.append(name, value);
    }

    let status = status.unwrap_or(if headers.contains_key(header::LOCATION) {
        StatusCode::FOUND
    } else {
        StatusCode::OK
    });

    Ok(GatewayResponse {
        status,
        headers,
        body: raw.slice(body_start..),
    })
}

trait Conn: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> Conn for T {}

/// Gateway client speaking FastCGI over tcp or unix sockets.
#[derive(Debug, Clone)]
pub struct TokioFcgiClient {
    read_timeout: Duration,
    send_timeout: Duration,
}

impl TokioFcgiClient {
    pub fn new(read_timeout: Duration, send_timeout: Duration) -> Self {
        Self {
            read_timeout,
            send_timeout,
        }
    }

    async fn connect(&self, backend: &Backend) -> Result<Box<dyn Conn>, FcgiError> {
        let connect_err = |source| FcgiError::Connect {
            backend: backend.to_string(),
            source,
        };
        match backend.transport {
            Transport::Tcp => {
                let stream = TcpStream::connect(&backend.address)
                    .await
                    .map_err(connect_err)?;
                stream.set_nodelay(true).map_err(connect_err)?;
                Ok(Box::new(stream))
            }
            #[cfg(unix)]
            Transport::Unix => {
                let stream = tokio::net::UnixStream::connect(&backend.address)
                    .await
                    .map_err(connect_err)?;
                Ok(Box::new(stream))
            }
            #[cfg(not(unix))]
            Transport::Unix => Err(connect_err(io::Error::from(io::ErrorKind::Unsupported))),
        }
    }
}

#[async_trait]
impl GatewayClient for TokioFcgiClient {
    async fn round_trip(
        &self,
        backend: &Backend,
        request: GatewayRequest,
    ) -> Result<GatewayResponse, FcgiError> {
        let payload = encode_request(&request);

        let mut conn = timeout(self.send_timeout, self.connect(backend))
            .await
            .map_err(|_| FcgiError::Connect {
                backend: backend.to_string(),
                source: io::ErrorKind::TimedOut.into(),
            })??;

        timeout(self.send_timeout, async {
            conn.write_all(&payload).await?;
            conn.flush().await
        })
        .await
        .map_err(|_| FcgiError::Timeout(self.send_timeout))??;

        let (stdout, stderr) = timeout(self.read_timeout, read_response(&mut conn))
            .await
            .map_err(|_| FcgiError::Timeout(self.read_timeout))??;

        if !stderr.is_empty() {
            tracing::warn!(
                backend = %backend,
                stderr = %String::from_utf8_lossy(&stderr),
                "FastCGI backend wrote to stderr"
            );
        }

        parse_cgi_response(stdout.freeze())
    }
}

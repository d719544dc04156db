//! Permissive HTTP/1.x parsing and serialization
//!
//! The parser accepts what lenient real-world servers accept rather than what
//! RFC 9112 allows: whitespace runs in the start line, bare LF line endings,
//! a missing version (HTTP/0.9), and a body framing precedence of
//! `Transfer-Encoding: chunked` over `Content-Length`. Each parse consumes a
//! single message and hands back whatever follows it.

use std::io::Read;
use std::sync::LazyLock;

use bytes::Bytes;
use flate2::read::GzDecoder;
use http::StatusCode;
use regex::bytes::{NoExpand, Regex};

use crate::stream::ByteStream;


/// A header as it appeared on the wire
pub type Header = (Vec<u8>, Vec<u8>);

/// Method candidates for mutation: the registered methods minus HEAD,
/// OPTIONS, CONNECT, PRI and TRACE, plus `*`.
pub const METHODS: &[&[u8]] = &[
    b"ACL",
    b"ANNOUNCE",
    b"BASELINE-CONTROL",
    b"BIND",
    b"CHECKIN",
    b"CHECKOUT",
    b"COPY",
    b"DELETE",
    b"DESCRIBE",
    b"FLUSH",
    b"GET",
    b"GET_PARAMETER",
    b"LABEL",
    b"LINK",
    b"LOCK",
    b"M-SEARCH",
    b"MERGE",
    b"MKACTIVITY",
    b"MKCALENDAR",
    b"MKCOL",
    b"MKREDIRECTREF",
    b"MKWORKSPACE",
    b"MOVE",
    b"NOTIFY",
    b"ORDERPATCH",
    b"PATCH",
    b"PAUSE",
    b"PLAY",
    b"POST",
    b"PROPFIND",
    b"PROPPATCH",
    b"PURGE",
    b"PUT",
    b"QUERY",
    b"REBIND",
    b"RECORD",
    b"REDIRECT",
    b"REFRESH",
    b"REPORT",
    b"SEARCH",
    b"SETUP",
    b"SET_PARAMETER",
    b"SOURCE",
    b"SUBSCRIBE",
    b"TEARDOWN",
    b"UNBIND",
    b"UNCHECKOUT",
    b"UNKNOWN",
    b"UNLINK",
    b"UNLOCK",
    b"UNSET",
    b"UNSUBSCRIBE",
    b"UPDATE",
    b"UPDATEREDIRECTREF",
    b"VERSION-CONTROL",
    b"*",
];

/// Length-signaling headers, in both spellings, dropped before comparing
const LENGTH_HEADERS: [&[u8]; 4] = [
    b"content-length",
    b"content_length",
    b"transfer-encoding",
    b"transfer_encoding",
];

static REQUEST_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?-u)\A(?P<method>[^\s]+)\s+(?P<uri>[^\s]+)(?:\s+HTTP/(?P<version>[^\s]+))?[\t\x0B\x0C\r ]*\r?\n",
    )
    .expect("request line regex")
});

static STATUS_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?-u)\A(?P<version>[^\s]+)[\t\x0B\x0C\r ]+(?P<code>\d+)[\t\x0B\x0C\r ]+(?P<reason>.*?)\r?\n",
    )
    .expect("status line regex")
});

static HEADER_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?-u)\A(?P<name>[^:\n]+):[ \t]*(?P<value>.*?)[ \t]*\z").expect("header line regex")
});

static HEADER_TERMINATOR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)\r?\n\r?\n").expect("header terminator regex"));

static LINE_BREAK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)\r?\n").expect("line break regex"));

static CHUNK_HEADER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?-u)\A(?P<length>[0-9a-fA-F]+)[^\n]*\r?\n").expect("chunk header regex")
});

static HOST_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)[Hh][Oo][Ss][Tt]:[^\r\n]*\r?\n").expect("host line regex"));

static STATUS_DIGITS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?-u)\d\d\d").expect("status digits regex"));

/// Why a message could not be parsed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    /// Request or status line missing or malformed
    InvalidStartLine,
    /// Header block never ends
    NoHeaderTerminator,
    /// A header line is not `name: value`
    InvalidHeaderLine,
    /// Content-Length is not a plain decimal number
    InvalidContentLength,
    /// Chunk size line is not hexadecimal
    InvalidChunkHeader,
    /// Chunk data is short or not followed by CRLF
    InvalidChunkData,
    /// Trailer section after the last chunk is malformed
    InvalidTrailer,
    /// `Transfer-Encoding: chunked` together with `Content-Encoding: gzip`
    ChunkedGzip,
    /// Declared gzip body does not decompress
    Gzip,
    /// Reply does not look like an HTTP/0.9 document
    NotHttp09,
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidStartLine => write!(f, "invalid start line"),
            Self::NoHeaderTerminator => write!(f, "no header termination sequence found"),
            Self::InvalidHeaderLine => write!(f, "invalid header line"),
            Self::InvalidContentLength => write!(f, "invalid Content-Length"),
            Self::InvalidChunkHeader => write!(f, "invalid chunk header"),
            Self::InvalidChunkData => write!(f, "invalid chunk data"),
            Self::InvalidTrailer => write!(f, "invalid trailer section"),
            Self::ChunkedGzip => write!(f, "chunked transfer coding with gzip content coding"),
            Self::Gzip => write!(f, "gzip body does not decompress"),
            Self::NotHttp09 => write!(f, "not an HTTP/0.9 reply"),
        }
    }
}

impl std::error::Error for ParseError {}

/// A request as a target understood it
#[derive(Debug, Clone, Default)]
pub struct HttpRequest {
    pub method:  Vec<u8>,
    pub uri:     Vec<u8>,
    /// `1.1` and friends, `0.9` when the request line had no version, empty
    /// when the target does not report one
    pub version: Vec<u8>,
    pub headers: Vec<Header>,
    /// Already de-chunked or length-delimited
    pub body:    Vec<u8>,
}

impl HttpRequest {
    /// Whether a header named `name` (any case) exists, optionally with
    /// exactly `value`.
    pub fn has_header(&self, name: &[u8], value: Option<&[u8]>) -> bool {
        self.headers
            .iter()
            .any(|(k, v)| k.eq_ignore_ascii_case(name) && value.is_none_or(|value| v == value))
    }

    /// Values of every header named `name`, in wire order
    pub fn header_values<'a>(&'a self, name: &'a [u8]) -> impl Iterator<Item = &'a [u8]> + 'a {
        self.headers
            .iter()
            .filter(move |(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_slice())
    }

    /// Lower-cased, sorted headers without the length-signaling ones.
    pub fn normalized_headers(&self) -> Vec<Header> {
        let mut headers: Vec<Header> = self
            .headers
            .iter()
            .map(|(k, v)| (k.to_ascii_lowercase(), v.clone()))
            .filter(|(k, _)| !LENGTH_HEADERS.contains(&k.as_slice()))
            .collect();
        headers.sort();
        headers
    }

    /// Method and header names are tokens, and no header value carries CR,
    /// LF or NUL.
    pub fn is_valid(&self) -> bool {
        self.method.iter().copied().all(is_tchar)
            && self.headers.iter().all(|(name, value)| {
                name.iter().copied().all(is_tchar)
                    && !value.iter().any(|&b| matches!(b, b'\r' | b'\n' | b'\0'))
            })
    }

    /// Whether the body is sent with the chunked transfer coding
    pub fn is_chunked(&self) -> bool {
        self.header_values(b"transfer-encoding").any(|v| coding_is(v, b"chunked"))
    }

    /// Copy without headers named `name`, or only the ones equal to `value`.
    pub fn without_header(&self, name: &[u8], value: Option<&[u8]>) -> Self {
        let mut result = self.clone();
        result.headers.retain(|(k, v)| {
            !(k.eq_ignore_ascii_case(name) && value.is_none_or(|value| v == value))
        });
        result
    }

    /// Copy with one more header at the end.
    pub fn with_header(&self, name: &[u8], value: &[u8]) -> Self {
        let mut result = self.clone();
        result.headers.push((name.to_vec(), value.to_vec()));
        result
    }

    /// Copy with `translation` applied to every header name, sorted.
    pub fn with_translated_header_names(&self, translation: &[(Vec<u8>, Vec<u8>)]) -> Self {
        let mut result = self.clone();
        for (name, _) in result.headers.iter_mut() {
            *name = translate(name, translation);
        }
        result.headers.sort();
        result
    }

    /// Copy where repeated headers are folded into the first occurrence,
    /// values separated by `joiner`.
    pub fn with_joined_duplicates(&self, joiner: &[u8]) -> Self {
        let mut headers: Vec<Header> = Vec::with_capacity(self.headers.len());
        for (name, value) in &self.headers {
            match headers.iter_mut().find(|(k, _)| k.eq_ignore_ascii_case(name)) {
                Some((_, joined)) => {
                    joined.extend_from_slice(joiner);
                    joined.extend_from_slice(value);
                },
                None => headers.push((name.clone(), value.clone())),
            }
        }
        Self {
            headers,
            ..self.clone()
        }
    }

    /// Request line, headers and the blank line.
    ///
    /// A `0.9` or empty version is written without a version token.
    pub fn head_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(&self.method);
        out.push(b' ');
        out.extend_from_slice(&self.uri);
        if !self.version.is_empty() && self.version != b"0.9" {
            out.extend_from_slice(b" HTTP/");
            out.extend_from_slice(&self.version);
        }
        out.extend_from_slice(b"\r\n");
        write_headers(&self.headers, &mut out);
        out
    }

    /// Serialize so that [`parse_request`] gives back an equal request.
    /// Chunked requests carry their body as a single chunk.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = self.head_bytes();
        if self.is_chunked() {
            out.extend_from_slice(&encode_chunked([self.body.as_slice()]));
        } else {
            out.extend_from_slice(&self.body);
        }
        out
    }
}

/// Header order and the length-signaling headers do not matter, header name
/// case does not matter, and an empty version matches any version.
impl PartialEq for HttpRequest {
    fn eq(&self, other: &Self) -> bool {
        self.method == other.method
            && self.uri == other.uri
            && self.body == other.body
            && (self.version == other.version || self.version.is_empty() || other.version.is_empty())
            && self.normalized_headers() == other.normalized_headers()
    }
}

impl Eq for HttpRequest {}

/// A target's own reply, usually a rejection
#[derive(Debug, Clone, Default)]
pub struct HttpResponse {
    /// Without the `HTTP/` prefix
    pub version: Vec<u8>,
    pub code:    Vec<u8>,
    pub reason:  Vec<u8>,
    pub headers: Vec<Header>,
    pub body:    Vec<u8>,
}

impl HttpResponse {
    pub fn has_code(&self, code: &[u8]) -> bool {
        self.code == code
    }

    /// The code as a [`StatusCode`], when it is three digits in range
    pub fn status(&self) -> Option<StatusCode> {
        StatusCode::from_bytes(&self.code).ok()
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64 + self.body.len());
        out.extend_from_slice(b"HTTP/");
        out.extend_from_slice(&self.version);
        out.push(b' ');
        out.extend_from_slice(&self.code);
        out.push(b' ');
        out.extend_from_slice(&self.reason);
        out.extend_from_slice(b"\r\n");
        write_headers(&self.headers, &mut out);
        out.extend_from_slice(&self.body);
        out
    }
}

/// Responses are compared by status code alone.
impl PartialEq for HttpResponse {
    fn eq(&self, other: &Self) -> bool {
        self.code == other.code
    }
}

impl Eq for HttpResponse {}

/// Parse one request from the front of `raw`, returning it with the bytes
/// that follow it.
pub fn parse_request(raw: &[u8]) -> Result<(HttpRequest, &[u8]), ParseError> {
    let caps = REQUEST_LINE
        .captures(raw)
        .ok_or(ParseError::InvalidStartLine)?;
    let method = caps["method"].to_vec();
    let uri = caps["uri"].to_vec();
    let version = caps
        .name("version")
        .map_or_else(|| b"0.9".to_vec(), |m| m.as_bytes().to_vec());
    let rest = &raw[caps[0].len()..];

    let (mut headers, rest) = parse_headers(rest)?;
    let (body, trailers, rest) = parse_body(&headers, rest, false)?;
    headers.extend(trailers);

    Ok((
        HttpRequest {
            method,
            uri,
            version,
            headers,
            body,
        },
        rest,
    ))
}

/// Parse one response from the front of `raw`, returning it with the bytes
/// that follow it. Responses without framing headers run to the end.
pub fn parse_response(raw: &[u8]) -> Result<(HttpResponse, &[u8]), ParseError> {
    let caps = STATUS_LINE
        .captures(raw)
        .ok_or(ParseError::InvalidStartLine)?;
    let version = &caps["version"];
    let version = version.strip_prefix(b"HTTP/").unwrap_or(version).to_vec();
    let code = caps["code"].to_vec();
    let reason = caps["reason"].to_vec();
    let rest = &raw[caps[0].len()..];

    let (mut headers, rest) = parse_headers(rest)?;
    let (body, trailers, rest) = parse_body(&headers, rest, true)?;
    headers.extend(trailers);

    Ok((
        HttpResponse {
            version,
            code,
            reason,
            headers,
            body,
        },
        rest,
    ))
}

/// Split pipelined requests, stopping at the first byte that does not parse.
/// Returns the requests and the unconsumed tail.
pub fn parse_request_stream(payload: &[u8]) -> (Vec<HttpRequest>, &[u8]) {
    let mut requests = Vec::new();
    let mut remaining = payload;
    while !remaining.is_empty() {
        let Ok((request, rest)) = parse_request(remaining) else {
            break;
        };
        requests.push(request);
        remaining = rest;
    }
    (requests, remaining)
}

fn parse_headers(raw: &[u8]) -> Result<(Vec<Header>, &[u8]), ParseError> {
    if let Some(rest) = raw.strip_prefix(b"\r\n").or_else(|| raw.strip_prefix(b"\n")) {
        return Ok((Vec::new(), rest));
    }

    let terminator = HEADER_TERMINATOR
        .find(raw)
        .ok_or(ParseError::NoHeaderTerminator)?;
    let mut headers = Vec::new();
    for line in LINE_BREAK.split(&raw[..terminator.start()]) {
        let caps = HEADER_LINE
            .captures(line)
            .ok_or(ParseError::InvalidHeaderLine)?;
        headers.push((caps["name"].to_vec(), caps["value"].to_vec()));
    }
    Ok((headers, &raw[terminator.end()..]))
}

/// Body framing as declared by the headers
struct Framing {
    content_length: Option<usize>,
    chunked:        bool,
    gzip:           bool,
}

impl Framing {
    /// Last Content-Length wins; every one must be numeric.
    fn from_headers(headers: &[Header]) -> Result<Self, ParseError> {
        let mut framing = Self {
            content_length: None,
            chunked:        false,
            gzip:           false,
        };
        for (name, value) in headers {
            if name.eq_ignore_ascii_case(b"content-length") {
                let length = parse_decimal(value).ok_or(ParseError::InvalidContentLength)?;
                framing.content_length = Some(length);
            } else if name.eq_ignore_ascii_case(b"transfer-encoding") {
                framing.chunked |= coding_is(value, b"chunked");
            } else if name.eq_ignore_ascii_case(b"content-encoding") {
                framing.gzip |= coding_is(value, b"gzip");
            }
        }
        Ok(framing)
    }
}

type Body<'a> = (Vec<u8>, Vec<Header>, &'a [u8]);

fn parse_body<'a>(
    headers: &[Header],
    rest: &'a [u8],
    is_response: bool,
) -> Result<Body<'a>, ParseError> {
    let framing = Framing::from_headers(headers)?;

    if framing.chunked {
        if framing.gzip {
            return Err(ParseError::ChunkedGzip);
        }
        return decode_chunked(rest);
    }

    match framing.content_length {
        Some(length) => {
            let (body, rest) = rest.split_at(length.min(rest.len()));
            let body = if framing.gzip {
                gunzip(body)?
            } else {
                body.to_vec()
            };
            Ok((body, Vec::new(), rest))
        },
        // Read until close
        None if is_response => Ok((rest.to_vec(), Vec::new(), &[])),
        None => Ok((Vec::new(), Vec::new(), rest)),
    }
}

fn decode_chunked(mut rest: &[u8]) -> Result<Body<'_>, ParseError> {
    let mut body = Vec::new();
    loop {
        let caps = CHUNK_HEADER
            .captures(rest)
            .ok_or(ParseError::InvalidChunkHeader)?;
        let length = parse_hex(&caps["length"]).ok_or(ParseError::InvalidChunkHeader)?;
        rest = &rest[caps[0].len()..];

        if length == 0 {
            let (trailers, rest) = parse_headers(rest).map_err(|_| ParseError::InvalidTrailer)?;
            return Ok((body, trailers, rest));
        }

        let end = length
            .checked_add(2)
            .filter(|end| *end <= rest.len())
            .ok_or(ParseError::InvalidChunkData)?;
        if &rest[length..end] != b"\r\n" {
            return Err(ParseError::InvalidChunkData);
        }
        body.extend_from_slice(&rest[..length]);
        rest = &rest[end..];
    }
}

fn gunzip(body: &[u8]) -> Result<Vec<u8>, ParseError> {
    let mut out = Vec::new();
    GzDecoder::new(body)
        .read_to_end(&mut out)
        .map_err(|_| ParseError::Gzip)?;
    Ok(out)
}

/// Chunked transfer coding of `chunks` followed by the last-chunk and an
/// empty trailer section. Empty chunks are skipped since they would end the
/// body early.
pub fn encode_chunked<'a>(chunks: impl IntoIterator<Item = &'a [u8]>) -> Vec<u8> {
    let mut out = Vec::new();
    for chunk in chunks.into_iter().filter(|c| !c.is_empty()) {
        out.extend_from_slice(format!("{:x}\r\n", chunk.len()).as_bytes());
        out.extend_from_slice(chunk);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"0\r\n\r\n");
    out
}

/// Drop everything up to and including the first blank line, if any.
pub fn strip_http_0_9_headers(data: &[u8]) -> &[u8] {
    match data.windows(4).position(|w| w == b"\r\n\r\n") {
        Some(index) => &data[index + 4..],
        None => data,
    }
}

/// Interpret a version-less reply: it must be an HTML document, and the
/// first run of three digits is taken as the status code.
pub fn parse_http_0_9_response(data: &[u8]) -> Result<HttpResponse, ParseError> {
    if !data.starts_with(b"<") {
        return Err(ParseError::NotHttp09);
    }
    let code = STATUS_DIGITS.find(data).ok_or(ParseError::NotHttp09)?;
    Ok(HttpResponse {
        version: b"0.9".to_vec(),
        code: code.as_bytes().to_vec(),
        ..Default::default()
    })
}

/// Rewrite every Host header line in every buffer to carry `value`.
pub fn adjust_host_header(stream: &ByteStream, value: &[u8]) -> ByteStream {
    let mut replacement = b"Host: ".to_vec();
    replacement.extend_from_slice(value);
    replacement.extend_from_slice(b"\r\n");
    stream
        .iter()
        .map(|buffer| {
            Bytes::from(
                HOST_LINE
                    .replace_all(buffer, NoExpand(&replacement))
                    .into_owned(),
            )
        })
        .collect()
}

/// Apply literal substring substitutions in order.
pub fn translate(input: &[u8], translation: &[(Vec<u8>, Vec<u8>)]) -> Vec<u8> {
    let mut out = input.to_vec();
    for (from, to) in translation {
        out = replace_all(&out, from, to);
    }
    out
}

fn replace_all(haystack: &[u8], from: &[u8], to: &[u8]) -> Vec<u8> {
    if from.is_empty() {
        return haystack.to_vec();
    }
    let mut out = Vec::with_capacity(haystack.len());
    let mut pos = 0;
    while pos < haystack.len() {
        if haystack[pos..].starts_with(from) {
            out.extend_from_slice(to);
            pos += from.len();
        } else {
            out.push(haystack[pos]);
            pos += 1;
        }
    }
    out
}

/// RFC 9110 token character
pub fn is_tchar(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b)
}

fn write_headers(headers: &[Header], out: &mut Vec<u8>) {
    for (name, value) in headers {
        out.extend_from_slice(name);
        out.extend_from_slice(b": ");
        out.extend_from_slice(value);
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(b"\r\n");
}

/// A coding list entry equals `coding` once surrounding commas are dropped.
fn coding_is(value: &[u8], coding: &[u8]) -> bool {
    let start = value.iter().position(|&b| b != b',').unwrap_or(value.len());
    let end = value.iter().rposition(|&b| b != b',').map_or(start, |i| i + 1);
    value[start..end].eq_ignore_ascii_case(coding)
}

fn parse_decimal(value: &[u8]) -> Option<usize> {
    if value.is_empty() || !value.iter().all(u8::is_ascii_digit) {
        return None;
    }
    std::str::from_utf8(value).ok()?.parse().ok()
}

fn parse_hex(value: &[u8]) -> Option<usize> {
    usize::from_str_radix(std::str::from_utf8(value).ok()?, 16).ok()
}

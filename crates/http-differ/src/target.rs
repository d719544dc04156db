//! Targets under test and how to talk to them
//!
//! A [`Service`] is either an origin, which answers each request with a
//! reflection of how it parsed it, or a transducer, which forwards what it
//! parsed to a backend and reports the forwarded bytes on a side channel.
//! Descriptors are loaded from JSON; every anomaly defaults to "absent".

use std::fmt;
use std::time::Duration;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::{Bytes, BytesMut};
use h2wire::{H2ConnectionState, H2Limits};
use serde::de::{Deserializer, MapAccess, SeqAccess, Visitor};
use serde::Deserialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, timeout_at, Instant};
use tracing::{debug, warn};

use crate::config::{FanoutConfig, ECHO_PORT};
use crate::h1::{
    adjust_host_header, parse_http_0_9_response, parse_request_stream, parse_response,
    strip_http_0_9_headers, Header, HttpRequest,
};
use crate::message::HttpMessage;
use crate::reflect::parse_reflection;
use crate::stream::ByteStream;

/// What a target does with a request it accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Role {
    /// Terminates the request and reflects it back
    #[default]
    Origin,
    /// Forwards the request onward
    Transducer,
}

/// A header name, optionally pinned to a single value.
///
/// Written in JSON either as `"name"` or as `["name", "value"]`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(from = "RawHeaderPattern")]
pub struct HeaderPattern {
    pub name:  Vec<u8>,
    pub value: Option<Vec<u8>>,
}

impl HeaderPattern {
    pub fn name(name: &[u8]) -> Self {
        Self {
            name:  name.to_vec(),
            value: None,
        }
    }

    pub fn pair(name: &[u8], value: &[u8]) -> Self {
        Self {
            name:  name.to_vec(),
            value: Some(value.to_vec()),
        }
    }

    /// Whether `req` carries a header matching this pattern
    pub fn matches(&self, req: &HttpRequest) -> bool {
        req.has_header(&self.name, self.value.as_deref())
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawHeaderPattern {
    Name(String),
    Pair(String, String),
}

impl From<RawHeaderPattern> for HeaderPattern {
    fn from(raw: RawHeaderPattern) -> Self {
        match raw {
            RawHeaderPattern::Name(name) => Self::name(&latin1(&name)),
            RawHeaderPattern::Pair(name, value) => Self::pair(&latin1(&name), &latin1(&value)),
        }
    }
}

/// Quirks a target is known to have, used to explain away differences that
/// are not worth reporting.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct AnomalyProfile {
    /// Accepts request lines without a version
    pub allows_http_0_9:               bool,
    /// Headers the target adds to every request it reflects
    pub added_headers:                 Vec<HeaderPattern>,
    /// Headers the target strips from requests
    #[serde(deserialize_with = "de_bytes_list")]
    pub removed_headers:               Vec<Vec<u8>>,
    /// Headers whose values the target overwrites
    #[serde(deserialize_with = "de_bytes_list")]
    pub trashed_headers:               Vec<Vec<u8>>,
    /// Answers 411 to a POST without Content-Length or Transfer-Encoding
    pub requires_length_in_post:       bool,
    pub allows_missing_host_header:    bool,
    /// Substring substitutions the target applies to header names, in order.
    /// Written as a JSON object (key order kept) or an array of pairs.
    #[serde(deserialize_with = "de_translation")]
    pub header_name_translation:       Vec<(Vec<u8>, Vec<u8>)>,
    /// Reflects requests without a version
    pub doesnt_support_version:        bool,
    /// Token characters the target refuses in methods
    #[serde(deserialize_with = "de_bytes")]
    pub method_character_blacklist:    Vec<u8>,
    /// The only methods the target accepts, if it restricts them
    #[serde(deserialize_with = "de_whitelist")]
    pub method_whitelist:              Option<Vec<Vec<u8>>>,
    /// Closes the connection after one request
    pub doesnt_support_persistence:    bool,
    /// Rejects requests whose Host is not its own address
    pub requires_specific_host_header: bool,
    /// Rewrites chunked bodies as Content-Length bodies
    pub translates_chunked_to_cl:      bool,
    pub joins_duplicate_headers:       bool,
    /// Inserted between joined values, usually `, `
    #[serde(deserialize_with = "de_bytes")]
    pub duplicate_header_joiner:       Vec<u8>,
}

impl AnomalyProfile {
    /// Header `name` as this target would spell it
    pub fn translate(&self, name: &[u8]) -> Vec<u8> {
        crate::h1::translate(name, &self.header_name_translation)
    }

    /// Whether the blacklist forbids any byte of `method`
    pub fn forbids_method(&self, method: &[u8]) -> bool {
        method
            .iter()
            .any(|b| self.method_character_blacklist.contains(b))
    }

    /// Whether a whitelist exists and `method` is not on it
    pub fn rejects_method(&self, method: &[u8]) -> bool {
        self.method_whitelist
            .as_ref()
            .is_some_and(|list| !list.iter().any(|m| m == method))
    }
}

/// Strings in descriptors stand for raw bytes, one char per byte.
fn latin1(s: &str) -> Vec<u8> {
    if s.chars().all(|c| u32::from(c) <= 0xFF) {
        s.chars().map(|c| u32::from(c) as u8).collect()
    } else {
        s.as_bytes().to_vec()
    }
}

fn de_bytes<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
    Ok(latin1(&String::deserialize(d)?))
}

fn de_bytes_list<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Vec<u8>>, D::Error> {
    Ok(Vec::<String>::deserialize(d)?
        .iter()
        .map(|s| latin1(s))
        .collect())
}

/// An empty whitelist means no whitelist.
fn de_whitelist<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Vec<Vec<u8>>>, D::Error> {
    let list = de_bytes_list(d)?;
    Ok((!list.is_empty()).then_some(list))
}

fn de_translation<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Header>, D::Error> {
    struct TranslationVisitor;

    impl<'de> Visitor<'de> for TranslationVisitor {
        type Value = Vec<Header>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.write_str("an object or an array of [from, to] pairs")
        }

        fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Self::Value, A::Error> {
            let mut out = Vec::new();
            while let Some((from, to)) = map.next_entry::<String, String>()? {
                out.push((latin1(&from), latin1(&to)));
            }
            Ok(out)
        }

        fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
            let mut out = Vec::new();
            while let Some((from, to)) = seq.next_element::<(String, String)>()? {
                out.push((latin1(&from), latin1(&to)));
            }
            Ok(out)
        }
    }

    d.deserialize_any(TranslationVisitor)
}

/// A target under test
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Service {
    pub name:         String,
    /// IP address or hostname
    pub address:      String,
    /// Defaults to 443 with TLS, 80 without
    #[serde(default)]
    pub port:         Option<u16>,
    #[serde(default)]
    pub requires_tls: bool,
    /// Quiet period override in milliseconds
    #[serde(default)]
    pub timeout_ms:   Option<u64>,
    #[serde(default)]
    pub role:         Role,
    #[serde(default)]
    pub anomalies:    AnomalyProfile,
    /// Side channel port for transducers
    #[serde(default)]
    pub echo_port:    Option<u16>,
}

impl Service {
    pub fn origin(name: &str, address: &str, port: u16) -> Self {
        Self {
            name:         name.to_owned(),
            address:      address.to_owned(),
            port:         Some(port),
            requires_tls: false,
            timeout_ms:   None,
            role:         Role::Origin,
            anomalies:    AnomalyProfile::default(),
            echo_port:    None,
        }
    }

    pub fn transducer(name: &str, address: &str, port: u16) -> Self {
        Self {
            role: Role::Transducer,
            ..Self::origin(name, address, port)
        }
    }

    pub fn with_anomalies(self, anomalies: AnomalyProfile) -> Self {
        Self { anomalies, ..self }
    }

    pub fn port(&self) -> u16 {
        self.port
            .unwrap_or(if self.requires_tls { 443 } else { 80 })
    }

    pub fn echo_port(&self) -> u16 {
        self.echo_port.unwrap_or(ECHO_PORT)
    }

    /// How long the target may stay silent before its reply is complete
    pub fn timeout(&self, config: &FanoutConfig) -> Duration {
        match (self.timeout_ms, self.role) {
            (Some(ms), _) => Duration::from_millis(ms),
            (None, Role::Origin) => config.origin_timeout,
            (None, Role::Transducer) => config.transducer_timeout,
        }
    }

    pub fn is_origin(&self) -> bool {
        self.role == Role::Origin
    }

    pub fn is_transducer(&self) -> bool {
        self.role == Role::Transducer
    }

    /// Send `stream`, one write per buffer, and collect the raw bytes that
    /// came back: one entry per write for origins, one per forwarded record
    /// for transducers.
    pub async fn unparsed_roundtrip(
        &self,
        stream: &ByteStream,
        config: &FanoutConfig,
    ) -> Result<Vec<Bytes>, RoundtripError> {
        let adjusted;
        let stream = if self.anomalies.requires_specific_host_header {
            adjusted = adjust_host_header(stream, &latin1(&self.address));
            &adjusted
        } else {
            stream
        };

        match self.role {
            Role::Origin => {
                let mut conn = self.connect(config).await?;
                let mut budget = ReadBudget::new(config);
                let quiet = self.timeout(config);
                exchange(&mut conn, stream, quiet, config.recv_chunk_size, &mut budget).await
            },
            Role::Transducer => self.forwarded_roundtrip(stream, config).await,
        }
    }

    /// Like [`unparsed_roundtrip`](Self::unparsed_roundtrip), with the reply
    /// parsed into what the target made of each message.
    pub async fn parsed_roundtrip(
        &self,
        stream: &ByteStream,
        config: &FanoutConfig,
    ) -> Result<Vec<HttpMessage>, RoundtripError> {
        let replies = self.unparsed_roundtrip(stream, config).await?;
        let joined: Vec<u8> = replies.concat();

        let is_h2 = stream
            .buffers()
            .first()
            .is_some_and(|first| h2wire::is_http2_preface(first));
        let messages = match self.role {
            Role::Origin if is_h2 => {
                self.parse_h2_reply(&joined, &config.h2_limits, config.recv_chunk_size)
            },
            Role::Origin => self.parse_origin_reply(&joined),
            Role::Transducer => self.parse_forwarded(&joined),
        };

        debug!(
            service = %self.name,
            writes = stream.len(),
            reply_len = joined.len(),
            messages = messages.len(),
            "roundtrip complete"
        );
        Ok(messages)
    }

    /// Split an origin's HTTP/1 reply. A 200 carries a reflection; any other
    /// status stays a response. Targets allowing HTTP/0.9 may answer with a
    /// bare document, which ends the reply.
    pub fn parse_origin_reply(&self, reply: &[u8]) -> Vec<HttpMessage> {
        let mut messages = Vec::new();
        let mut remaining = reply;
        while !remaining.is_empty() {
            if let Ok((response, rest)) = parse_response(remaining) {
                let extracted = if response.has_code(b"200") {
                    parse_reflection(&response.body)
                        .ok()
                        .map(HttpMessage::Request)
                } else {
                    Some(HttpMessage::Response(response))
                };
                if let Some(message) = extracted {
                    messages.push(message);
                    remaining = rest;
                    continue;
                }
            }

            if self.anomalies.allows_http_0_9 {
                let document = strip_http_0_9_headers(remaining);
                if let Ok(req) = parse_reflection(document) {
                    messages.push(HttpMessage::Request(req));
                    break;
                }
                if let Ok(resp) = parse_http_0_9_response(document) {
                    messages.push(HttpMessage::Response(resp));
                    break;
                }
            }

            warn!(
                service = %self.name,
                reply = ?String::from_utf8_lossy(remaining),
                "couldn't parse reply"
            );
            break;
        }
        messages
    }

    /// Decode an HTTP/2 reply on a fresh connection state, `chunk_size`
    /// bytes at a time so only partial frames are ever buffered.
    pub fn parse_h2_reply(
        &self,
        reply: &[u8],
        limits: &H2Limits,
        chunk_size: usize,
    ) -> Vec<HttpMessage> {
        let mut state = H2ConnectionState::with_limits(limits.clone());
        for piece in reply.chunks(chunk_size.max(1)) {
            if let Err(e) = state.feed(piece) {
                warn!(service = %self.name, error = %e, "couldn't decode HTTP/2 reply");
                break;
            }
        }
        state
            .drain()
            .into_iter()
            .map(HttpMessage::from_h2_reply)
            .collect()
    }

    /// Parse what a transducer forwarded as a pipelined request stream.
    pub fn parse_forwarded(&self, forwarded: &[u8]) -> Vec<HttpMessage> {
        let (requests, leftovers) = parse_request_stream(forwarded);
        if !leftovers.is_empty() {
            warn!(
                service = %self.name,
                leftovers = ?String::from_utf8_lossy(leftovers),
                "extra data at the end of the forwarded stream"
            );
        }
        requests.into_iter().map(HttpMessage::Request).collect()
    }

    async fn connect(&self, config: &FanoutConfig) -> Result<Box<dyn Conn>, RoundtripError> {
        let tcp = self
            .connect_tcp(self.port(), config.connect_timeout)
            .await?;
        if self.requires_tls {
            return self.wrap_tls(tcp, config).await;
        }
        Ok(Box::new(tcp))
    }

    async fn connect_tcp(&self, port: u16, limit: Duration) -> Result<TcpStream, RoundtripError> {
        let tcp = timeout(limit, TcpStream::connect((self.address.as_str(), port)))
            .await
            .map_err(|_| RoundtripError::Timeout)?
            .map_err(RoundtripError::Connect)?;
        // Each buffer should leave as its own segment
        let _ = tcp.set_nodelay(true);
        Ok(tcp)
    }

    #[cfg(feature = "tls")]
    async fn wrap_tls(
        &self,
        tcp: TcpStream,
        config: &FanoutConfig,
    ) -> Result<Box<dyn Conn>, RoundtripError> {
        use tokio_rustls::rustls::pki_types::ServerName;
        use tokio_rustls::TlsConnector;

        let name = ServerName::try_from(self.address.clone())
            .map_err(|e| RoundtripError::Tls(e.to_string()))?;
        let connector = TlsConnector::from(tls::client_config());
        let tls = timeout(config.connect_timeout, connector.connect(name, tcp))
            .await
            .map_err(|_| RoundtripError::Timeout)?
            .map_err(|e| RoundtripError::Tls(e.to_string()))?;
        Ok(Box::new(tls))
    }

    #[cfg(not(feature = "tls"))]
    async fn wrap_tls(
        &self,
        _tcp: TcpStream,
        _config: &FanoutConfig,
    ) -> Result<Box<dyn Conn>, RoundtripError> {
        Err(RoundtripError::Tls(format!(
            "{} requires TLS but the `tls` feature is disabled",
            self.name
        )))
    }

    /// Drive the transducer and read back what it forwarded from the echo
    /// side channel, one line of `base64(ip):base64(port):base64(data)` per
    /// forwarded write.
    async fn forwarded_roundtrip(
        &self,
        stream: &ByteStream,
        config: &FanoutConfig,
    ) -> Result<Vec<Bytes>, RoundtripError> {
        let mut conn = self.connect(config).await?;
        let mut echo = self
            .connect_tcp(self.echo_port(), config.connect_timeout)
            .await?;
        // Read-only from here on
        let _ = echo.shutdown().await;

        let mut budget = ReadBudget::new(config);
        let quiet = self.timeout(config);
        exchange(&mut conn, stream, quiet, config.recv_chunk_size, &mut budget).await?;
        drop(conn);

        let mut budget = ReadBudget::new(config);
        let log = read_until_quiet(&mut echo, config.echo_timeout, config.recv_chunk_size, &mut budget)
            .await;
        Ok(parse_echo_log(&log, &self.name))
    }
}

/// Decode the side channel's records, skipping malformed lines.
pub(crate) fn parse_echo_log(log: &[u8], service: &str) -> Vec<Bytes> {
    let mut forwarded = Vec::new();
    for line in log.split(|&b| b == b'\n') {
        let line = line.strip_suffix(b"\r").unwrap_or(line);
        if line.is_empty() {
            continue;
        }
        let data = match line.split(|&b| b == b':').collect::<Vec<_>>().as_slice() {
            [_ip, _port, data] => STANDARD.decode(data),
            _ => {
                warn!(service, line = ?String::from_utf8_lossy(line), "malformed echo record");
                continue;
            },
        };
        match data {
            Ok(data) => forwarded.push(Bytes::from(data)),
            Err(e) => warn!(service, error = %e, "echo record is not base64"),
        }
    }
    forwarded
}

#[cfg(feature = "tls")]
mod tls {
    use std::sync::{Arc, LazyLock};

    use tokio_rustls::rustls::{ClientConfig, RootCertStore};

    static CLIENT_CONFIG: LazyLock<Arc<ClientConfig>> = LazyLock::new(|| {
        let roots = RootCertStore {
            roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
        };
        Arc::new(
            ClientConfig::builder()
                .with_root_certificates(roots)
                .with_no_client_auth(),
        )
    });

    pub(super) fn client_config() -> Arc<ClientConfig> {
        Arc::clone(&CLIENT_CONFIG)
    }
}

/// A plain or TLS connection to a target
trait Conn: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> Conn for T {}

/// What one exchange may still spend: a deadline and a number of bytes.
/// The quiet period bounds each read, this bounds them all.
#[derive(Debug, Clone, Copy)]
struct ReadBudget {
    deadline:  Instant,
    remaining: usize,
}

impl ReadBudget {
    fn new(config: &FanoutConfig) -> Self {
        Self {
            deadline:  Instant::now() + config.roundtrip_timeout,
            remaining: config.max_reply_size,
        }
    }
}

/// Write each buffer, then read until the target goes quiet.
///
/// A target that stops accepting writes ends the exchange; only a failure
/// on the very first write is an error.
async fn exchange<C: AsyncRead + AsyncWrite + Unpin>(
    conn: &mut C,
    stream: &ByteStream,
    quiet: Duration,
    chunk_size: usize,
    budget: &mut ReadBudget,
) -> Result<Vec<Bytes>, RoundtripError> {
    let mut replies = Vec::with_capacity(stream.len());
    for buffer in stream {
        match timeout_at(budget.deadline, conn.write_all(buffer)).await {
            Ok(Ok(())) => {},
            Ok(Err(e)) if replies.is_empty() => return Err(RoundtripError::Io(e)),
            Err(_) if replies.is_empty() => return Err(RoundtripError::Timeout),
            _ => break,
        }
        replies.push(read_until_quiet(conn, quiet, chunk_size, budget).await);
    }
    Ok(replies)
}

/// Read until EOF, an error, `quiet` passes without data, or the budget
/// runs out.
async fn read_until_quiet<R: AsyncRead + Unpin>(
    reader: &mut R,
    quiet: Duration,
    chunk_size: usize,
    budget: &mut ReadBudget,
) -> Bytes {
    let mut out = BytesMut::new();
    let mut chunk = vec![0u8; chunk_size.max(1)];
    while budget.remaining > 0 {
        let until = (Instant::now() + quiet).min(budget.deadline);
        match timeout_at(until, reader.read(&mut chunk)).await {
            Ok(Ok(n)) if n > 0 => {
                let n = n.min(budget.remaining);
                out.extend_from_slice(&chunk[..n]);
                budget.remaining -= n;
            },
            _ => break,
        }
    }
    if budget.remaining == 0 {
        debug!(kept = out.len(), "reply size limit reached");
    } else if Instant::now() >= budget.deadline {
        debug!(kept = out.len(), "roundtrip deadline reached");
    }
    out.freeze()
}

/// Why a target produced no reply at all
#[derive(Debug)]
pub enum RoundtripError {
    /// TCP connect failed
    Connect(std::io::Error),
    /// The first write failed
    Io(std::io::Error),
    /// TLS setup or handshake failed
    Tls(String),
    /// Connecting, or the first write, took longer than allowed
    Timeout,
}

impl fmt::Display for RoundtripError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Connect(e) => write!(f, "connect failed: {e}"),
            Self::Io(e) => write!(f, "write failed: {e}"),
            Self::Tls(msg) => write!(f, "TLS failed: {msg}"),
            Self::Timeout => write!(f, "timed out"),
        }
    }
}

impl std::error::Error for RoundtripError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Connect(e) | Self::Io(e) => Some(e),
            Self::Tls(_) | Self::Timeout => None,
        }
    }
}

/// The targets of one fuzzing campaign, ordered by name
#[derive(Debug, Clone, Default)]
pub struct ServiceSet(Vec<Service>);

impl ServiceSet {
    pub fn new(mut services: Vec<Service>) -> Self {
        services.sort_by(|a, b| a.name.cmp(&b.name));
        Self(services)
    }

    /// Load a JSON array of service descriptors.
    pub fn from_json(json: &[u8]) -> Result<Self, serde_json::Error> {
        Ok(Self::new(serde_json::from_slice(json)?))
    }

    pub fn as_slice(&self) -> &[Service] {
        &self.0
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Service> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&Service> {
        self.0.iter().find(|s| s.name == name)
    }

    pub fn origins(&self) -> impl Iterator<Item = &Service> {
        self.0.iter().filter(|s| s.is_origin())
    }

    pub fn transducers(&self) -> impl Iterator<Item = &Service> {
        self.0.iter().filter(|s| s.is_transducer())
    }
}

impl<'a> IntoIterator for &'a ServiceSet {
    type Item = &'a Service;
    type IntoIter = std::slice::Iter<'a, Service>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

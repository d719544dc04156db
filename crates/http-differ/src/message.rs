//! What a target made of one message in the stream

use h2wire::ParsedH2Message;

use crate::h1::{HttpRequest, HttpResponse};
use crate::reflect::parse_reflection;

/// A target either accepted a message (and we learn how it parsed it) or
/// answered it with a response of its own.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HttpMessage {
    Request(HttpRequest),
    Response(HttpResponse),
}

impl HttpMessage {
    /// Returns true if this is a request
    pub fn is_request(&self) -> bool {
        matches!(self, Self::Request(_))
    }

    /// Returns true if this is a response
    pub fn is_response(&self) -> bool {
        matches!(self, Self::Response(_))
    }

    /// Get the request if this is a request, None otherwise
    pub fn as_request(&self) -> Option<&HttpRequest> {
        match self {
            Self::Request(req) => Some(req),
            Self::Response(_) => None,
        }
    }

    /// Get the response if this is a response, None otherwise
    pub fn as_response(&self) -> Option<&HttpResponse> {
        match self {
            Self::Request(_) => None,
            Self::Response(resp) => Some(resp),
        }
    }

    /// A response carrying exactly this status code
    pub fn has_code(&self, code: &[u8]) -> bool {
        self.as_response().is_some_and(|resp| resp.has_code(code))
    }

    /// Requests must pass [`HttpRequest::is_valid`]; responses always do.
    pub fn is_valid(&self) -> bool {
        self.as_request().is_none_or(HttpRequest::is_valid)
    }

    /// Interpret an HTTP/2 reply from an origin: a 200 whose body is a
    /// reflection document stands for the request it describes, anything
    /// else is kept as a response.
    pub fn from_h2_reply(msg: ParsedH2Message) -> Self {
        if msg.status() == Some(b"200".as_slice())
            && let Ok(req) = parse_reflection(&msg.body)
        {
            return Self::Request(req);
        }
        msg.into()
    }
}

impl From<HttpRequest> for HttpMessage {
    fn from(req: HttpRequest) -> Self {
        Self::Request(req)
    }
}

impl From<HttpResponse> for HttpMessage {
    fn from(resp: HttpResponse) -> Self {
        Self::Response(resp)
    }
}

/// Pseudo-headers map onto the start line; `:authority` becomes `host`.
impl From<ParsedH2Message> for HttpMessage {
    fn from(msg: ParsedH2Message) -> Self {
        let mut headers: Vec<(Vec<u8>, Vec<u8>)> = msg
            .regular_headers()
            .map(|(k, v)| (k.to_vec(), v.to_vec()))
            .collect();

        if msg.is_request() {
            if let Some(authority) = msg.authority() {
                headers.insert(0, (b"host".to_vec(), authority.to_vec()));
            }
            return Self::Request(HttpRequest {
                method: msg.method().unwrap_or_default().to_vec(),
                uri: msg.path().unwrap_or_default().to_vec(),
                version: b"2".to_vec(),
                headers,
                body: msg.body,
            });
        }

        Self::Response(HttpResponse {
            version: b"2".to_vec(),
            code: msg.status().unwrap_or_default().to_vec(),
            reason: Vec::new(),
            headers,
            body: msg.body,
        })
    }
}

//! The JSON document an origin's echo endpoint sends back: how it parsed the
//! request, with every byte string base64 encoded.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use serde::{Deserialize, Serialize};

use crate::h1::{Header, HttpRequest};

/// Failure to read a reflection document
#[derive(Debug)]
pub enum ReflectError {
    /// Not JSON at all
    Json(serde_json::Error),
    /// A field is not valid base64
    Base64(base64::DecodeError),
    /// A key is missing or has the wrong type
    Shape(String),
}

impl std::fmt::Display for ReflectError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Json(e) => write!(f, "couldn't parse reflection JSON: {e}"),
            Self::Base64(e) => write!(f, "invalid base64 in reflection: {e}"),
            Self::Shape(msg) => write!(f, "missing field or invalid type in reflection: {msg}"),
        }
    }
}

impl std::error::Error for ReflectError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Json(e) => Some(e),
            Self::Base64(e) => Some(e),
            Self::Shape(_) => None,
        }
    }
}

impl From<serde_json::Error> for ReflectError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() {
            Self::Shape(e.to_string())
        } else {
            Self::Json(e)
        }
    }
}

impl From<base64::DecodeError> for ReflectError {
    fn from(e: base64::DecodeError) -> Self {
        Self::Base64(e)
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Reflection {
    headers: Vec<(String, String)>,
    uri:     String,
    body:    String,
    method:  String,
    version: String,
}

/// Read a reflection document into the request it describes.
///
/// Header names are lower-cased and headers sorted by name (stable, so
/// duplicates keep their order); a leading `HTTP/` is stripped from the
/// version.
pub fn parse_reflection(body: &[u8]) -> Result<HttpRequest, ReflectError> {
    let doc: Reflection = serde_json::from_slice(body)?;

    let mut headers: Vec<Header> = Vec::with_capacity(doc.headers.len());
    for (name, value) in &doc.headers {
        headers.push((STANDARD.decode(name)?.to_ascii_lowercase(), STANDARD.decode(value)?));
    }
    headers.sort_by(|a, b| a.0.cmp(&b.0));

    let version = STANDARD.decode(&doc.version)?;
    let version = match version.strip_prefix(b"HTTP/") {
        Some(stripped) => stripped.to_vec(),
        None => version,
    };

    Ok(HttpRequest {
        method: STANDARD.decode(&doc.method)?,
        uri: STANDARD.decode(&doc.uri)?,
        version,
        headers,
        body: STANDARD.decode(&doc.body)?,
    })
}

/// Write the reflection document an echo endpoint would send for `req`.
pub fn reflection_json(req: &HttpRequest) -> Vec<u8> {
    let doc = Reflection {
        headers: req
            .headers
            .iter()
            .map(|(k, v)| (STANDARD.encode(k), STANDARD.encode(v)))
            .collect(),
        uri:     STANDARD.encode(&req.uri),
        body:    STANDARD.encode(&req.body),
        method:  STANDARD.encode(&req.method),
        version: STANDARD.encode(&req.version),
    };
    // Serializing plain strings into a Vec cannot fail
    serde_json::to_vec(&doc).unwrap_or_default()
}

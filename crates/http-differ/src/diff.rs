//! Deciding whether two targets disagree about one stream
//!
//! Each target's replies are lined up position by position. Before a
//! position is compared, differences that the targets' anomaly profiles
//! already explain are normalized away, so only unexplained disagreement is
//! reported.

use std::fmt;

use crate::h1::{HttpRequest, HttpResponse};
use crate::message::HttpMessage;
use crate::target::{AnomalyProfile, HeaderPattern, Service};

/// Why two targets' status outcomes differ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StatusCause {
    /// One accepted the message, the other rejected it
    AcceptedVsRejected,
    /// Both rejected, with different status codes
    DifferentStatus,
}

/// Why two targets' message sequences differ
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamCause {
    /// A target kept going after answering 400
    InvalidStream,
    /// A target accepted a request no conforming parser should
    InvalidRequest,
    /// One target replied where the other stayed silent
    MissingReply,
}

/// Outcome of comparing two targets on the same stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Discrepancy {
    NoDiscrepancy,
    Status(StatusCause),
    /// Both accepted, but parsed different requests
    Subtle,
    Stream(StreamCause),
}

impl Discrepancy {
    pub fn is_discrepancy(self) -> bool {
        self != Self::NoDiscrepancy
    }
}

impl fmt::Display for Discrepancy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NoDiscrepancy => write!(f, "no discrepancy"),
            Self::Status(StatusCause::AcceptedVsRejected) => {
                write!(f, "status discrepancy: one accepted, one rejected")
            },
            Self::Status(StatusCause::DifferentStatus) => {
                write!(f, "status discrepancy: different rejection codes")
            },
            Self::Subtle => write!(f, "subtle discrepancy: different interpretations"),
            Self::Stream(StreamCause::InvalidStream) => {
                write!(f, "stream discrepancy: messages after a 400")
            },
            Self::Stream(StreamCause::InvalidRequest) => {
                write!(f, "stream discrepancy: invalid request accepted")
            },
            Self::Stream(StreamCause::MissingReply) => {
                write!(f, "stream discrepancy: missing reply")
            },
        }
    }
}

/// A target that answered 400 should have closed the connection; anything
/// after the 400 means it resynchronized on bytes it had rejected.
pub fn stream_is_invalid(messages: &[HttpMessage]) -> bool {
    match messages.split_last() {
        Some((_, earlier)) => earlier.iter().any(|m| m.has_code(b"400")),
        None => false,
    }
}

/// Compare two targets' replies to the same stream. Symmetric in whether a
/// discrepancy is found.
pub fn classify(
    replies1: &[HttpMessage],
    replies2: &[HttpMessage],
    profile1: &AnomalyProfile,
    profile2: &AnomalyProfile,
) -> Discrepancy {
    let (replies1, replies2) =
        if profile1.doesnt_support_persistence || profile2.doesnt_support_persistence {
            (&replies1[..replies1.len().min(1)], &replies2[..replies2.len().min(1)])
        } else {
            (replies1, replies2)
        };

    if stream_is_invalid(replies1) || stream_is_invalid(replies2) {
        return Discrepancy::Stream(StreamCause::InvalidStream);
    }

    for position in 0..replies1.len().max(replies2.len()) {
        let r1 = replies1.get(position);
        let r2 = replies2.get(position);
        if r1.is_some_and(|m| !m.is_valid()) || r2.is_some_and(|m| !m.is_valid()) {
            return Discrepancy::Stream(StreamCause::InvalidRequest);
        }

        let (r1, r2) = normalize(r1.cloned(), profile1, r2.cloned(), profile2);
        match compare(r1.as_ref(), profile1, r2.as_ref(), profile2) {
            Step::Same => {},
            Step::Explained => break,
            Step::Differ(discrepancy) => return discrepancy,
        }
    }
    Discrepancy::NoDiscrepancy
}

/// The first discrepancy among all pairs of `services`, whose replies are
/// `replies` in the same order.
pub fn classify_all(replies: &[Vec<HttpMessage>], services: &[Service]) -> Discrepancy {
    let pairs: Vec<(&Vec<HttpMessage>, &Service)> = replies.iter().zip(services).collect();
    for (i, (r1, s1)) in pairs.iter().enumerate() {
        for (r2, s2) in &pairs[i + 1..] {
            let discrepancy = classify(r1, r2, &s1.anomalies, &s2.anomalies);
            if discrepancy.is_discrepancy() {
                return discrepancy;
            }
        }
    }
    Discrepancy::NoDiscrepancy
}

enum Step {
    /// Nothing to report at this position
    Same,
    /// A known anomaly accounts for the divergence; later positions are
    /// not meaningful
    Explained,
    Differ(Discrepancy),
}

fn compare(
    r1: Option<&HttpMessage>,
    profile1: &AnomalyProfile,
    r2: Option<&HttpMessage>,
    profile2: &AnomalyProfile,
) -> Step {
    use HttpMessage::{Request, Response};

    match (r1, r2) {
        (None, None) => Step::Same,
        (None, Some(present)) | (Some(present), None) => {
            // A 400 and silence are both refusals
            if present.has_code(b"400") {
                return Step::Explained;
            }
            let (silent_profile, present_profile) = if r1.is_none() {
                (profile1, profile2)
            } else {
                (profile2, profile1)
            };
            match present {
                Request(req) if host_requirement_explains(req, present_profile, silent_profile) => {
                    Step::Explained
                },
                _ => Step::Differ(Discrepancy::Stream(StreamCause::MissingReply)),
            }
        },
        (Some(Request(req)), Some(Response(resp))) => rejection(req, profile1, resp, profile2),
        (Some(Response(resp)), Some(Request(req))) => rejection(req, profile2, resp, profile1),
        (Some(Response(a)), Some(Response(b))) => {
            if a.code == b.code {
                Step::Same
            } else {
                Step::Differ(Discrepancy::Status(StatusCause::DifferentStatus))
            }
        },
        (Some(Request(a)), Some(Request(b))) => {
            if a == b {
                Step::Same
            } else {
                Step::Differ(Discrepancy::Subtle)
            }
        },
    }
}

/// One target accepted `req`, the other answered `resp`.
fn rejection(
    req: &HttpRequest,
    accepter: &AnomalyProfile,
    resp: &HttpResponse,
    rejecter: &AnomalyProfile,
) -> Step {
    let explained = (req.version == b"0.9" && !rejecter.allows_http_0_9)
        || (resp.has_code(b"411")
            && rejecter.requires_length_in_post
            && req.method == b"POST"
            && !accepter.requires_length_in_post)
        || (resp.has_code(b"400") && host_requirement_explains(req, accepter, rejecter))
        || rejecter.rejects_method(&req.method)
        || rejecter.forbids_method(&req.method);

    if explained {
        Step::Explained
    } else {
        Step::Differ(Discrepancy::Status(StatusCause::AcceptedVsRejected))
    }
}

/// The accepter tolerates a missing Host header and the refuser does not.
fn host_requirement_explains(
    req: &HttpRequest,
    accepter: &AnomalyProfile,
    refuser: &AnomalyProfile,
) -> bool {
    accepter.allows_missing_host_header
        && !refuser.allows_missing_host_header
        && !req.has_header(b"host", None)
}

/// Undo the differences each profile accounts for.
fn normalize(
    r1: Option<HttpMessage>,
    profile1: &AnomalyProfile,
    r2: Option<HttpMessage>,
    profile2: &AnomalyProfile,
) -> (Option<HttpMessage>, Option<HttpMessage>) {
    use HttpMessage::Request;

    match (r1, r2) {
        (Some(Request(mut a)), Some(Request(mut b))) => {
            // Each pass reads the other side as it was before either pass ran
            let (a0, b0) = (a.clone(), b.clone());
            sync_added_headers(&a0, profile1, &mut b, profile2);
            sync_added_headers(&b0, profile2, &mut a, profile1);
            let (a1, b1) = (a.clone(), b.clone());
            restore_removed_headers(&mut a, profile1, &b1, profile2);
            restore_removed_headers(&mut b, profile2, &a1, profile1);
            drop_trashed_headers(&mut a, profile1, &mut b, profile2);
            drop_trashed_headers(&mut b, profile2, &mut a, profile1);
            join_like(&mut b, profile1, profile2);
            join_like(&mut a, profile2, profile1);
            if profile1.doesnt_support_version || profile2.doesnt_support_version {
                a.version.clear();
                b.version.clear();
            }
            convert_chunked_like(&mut b, profile1, profile2);
            convert_chunked_like(&mut a, profile2, profile1);
            if !profile1.header_name_translation.is_empty() {
                b = b.with_translated_header_names(&profile1.header_name_translation);
            }
            if !profile2.header_name_translation.is_empty() {
                a = a.with_translated_header_names(&profile2.header_name_translation);
            }
            (Some(Request(a)), Some(Request(b)))
        },
        (Some(Request(a)), other) => (Some(Request(without_added(a, profile1))), other),
        (other, Some(Request(b))) => (other, Some(Request(without_added(b, profile2)))),
        pair => pair,
    }
}

/// Headers `source_profile` adds and `source` carries should be present in
/// `target` too, spelled the way `target_profile` spells them.
fn sync_added_headers(
    source: &HttpRequest,
    source_profile: &AnomalyProfile,
    target: &mut HttpRequest,
    target_profile: &AnomalyProfile,
) {
    for added in &source_profile.added_headers {
        if !added.matches(source) {
            continue;
        }
        let translated = HeaderPattern {
            name:  target_profile.translate(&added.name),
            value: added.value.clone(),
        };
        if translated.matches(target) {
            continue;
        }
        let values: Vec<Vec<u8>> = match &added.value {
            Some(value) => vec![value.clone()],
            None => source.header_values(&added.name).map(<[u8]>::to_vec).collect(),
        };
        for value in values {
            target.headers.push((translated.name.clone(), value));
        }
    }
}

/// Headers `target_profile` strips come back when `source` still has them.
fn restore_removed_headers(
    target: &mut HttpRequest,
    target_profile: &AnomalyProfile,
    source: &HttpRequest,
    source_profile: &AnomalyProfile,
) {
    for name in &target_profile.removed_headers {
        let source_name = source_profile.translate(name);
        if target.has_header(name, None) || !source.has_header(&source_name, None) {
            continue;
        }
        let values: Vec<Vec<u8>> = source
            .header_values(&source_name)
            .map(<[u8]>::to_vec)
            .collect();
        for value in values {
            target.headers.push((name.clone(), value));
        }
    }
}

/// Values `owner_profile` overwrites carry no information on either side.
fn drop_trashed_headers(
    owner: &mut HttpRequest,
    owner_profile: &AnomalyProfile,
    other: &mut HttpRequest,
    other_profile: &AnomalyProfile,
) {
    for name in &owner_profile.trashed_headers {
        *owner = owner.without_header(name, None);
        *other = other.without_header(&other_profile.translate(name), None);
    }
}

/// Fold duplicates in `req` the way a joining `joiner` target would, unless
/// `req`'s own target already does.
fn join_like(req: &mut HttpRequest, joiner: &AnomalyProfile, own: &AnomalyProfile) {
    if joiner.joins_duplicate_headers && !own.joins_duplicate_headers {
        *req = req.with_joined_duplicates(&joiner.duplicate_header_joiner);
    }
}

/// Rewrite `req` from Transfer-Encoding to Content-Length framing when the
/// other target does that and `req`'s own target does not.
fn convert_chunked_like(req: &mut HttpRequest, converter: &AnomalyProfile, own: &AnomalyProfile) {
    if !converter.translates_chunked_to_cl || own.translates_chunked_to_cl {
        return;
    }
    let te = own.translate(b"transfer-encoding");
    if !req.has_header(&te, None) {
        return;
    }
    let mut converted = req.without_header(&te, None);
    converted.headers.push((
        own.translate(b"content-length"),
        req.body.len().to_string().into_bytes(),
    ));
    converted.headers.sort();
    *req = converted;
}

/// A rejected stream tells nothing about headers the accepting target adds.
fn without_added(mut req: HttpRequest, profile: &AnomalyProfile) -> HttpRequest {
    for added in &profile.added_headers {
        req = req.without_header(&added.name, added.value.as_deref());
    }
    req
}

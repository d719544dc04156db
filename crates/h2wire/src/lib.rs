//! HTTP/2 wire codecs for differential testing.
//!
//! [`frame`] splits bytes into generic frames and decomposes them into the
//! ten typed frame variants without losing anything, so malformed frames stay
//! representable. [`hpack`] implements RFC 7541 with explicitly owned
//! dynamic tables. [`H2ConnectionState`] ties both together to recover the
//! messages a peer sent on one connection.

mod error;
pub mod frame;
pub mod hpack;
mod session;

#[cfg(feature = "tracing")]
macro_rules! trace_warn {
    ($($arg:tt)*) => { ::tracing::warn!($($arg)*) }
}
#[cfg(not(feature = "tracing"))]
macro_rules! trace_warn {
    ($($arg:tt)*) => {};
}
pub(crate) use trace_warn;

#[cfg(feature = "tracing")]
macro_rules! trace_debug {
    ($($arg:tt)*) => { ::tracing::debug!($($arg)*) }
}
#[cfg(not(feature = "tracing"))]
macro_rules! trace_debug {
    ($($arg:tt)*) => {};
}
pub(crate) use trace_debug;

pub use error::{FrameError, FrameErrorKind, HpackError};
pub use frame::{
    is_http2_preface, looks_like_http2_frame, Flags, Frame, FrameType, GenericFrame, StreamId,
    CONNECTION_PREFACE,
};
pub use session::{H2ConnectionState, H2Limits, H2Settings, ParsedH2Message};

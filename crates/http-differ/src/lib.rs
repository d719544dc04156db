//! Differential testing of HTTP implementations.
//!
//! The same [`ByteStream`] is sent to several targets and their readings
//! of it are compared. Origins reflect each request they accept back as a
//! JSON document; transducers (proxies) are observed through what they
//! forward to an echo side channel. [`h1`] parses both kinds of output
//! permissively, [`diff`] decides whether two targets disagree once their
//! known quirks are accounted for, and [`mutate`] with [`fuzz`] search for
//! streams that make them disagree.
//!
//! ```ignore
//! use http_differ::{fuzz, FanoutConfig, Mutator, ServiceSet};
//!
//! let services = ServiceSet::from_json(&descriptor_json)?;
//! let found = fuzz::explore(
//!     services.as_slice(),
//!     &fuzz::seeds(),
//!     3,
//!     10_000,
//!     &mut Mutator::new(),
//!     &FanoutConfig::default(),
//! )
//! .await;
//! ```

mod config;
pub mod diff;
mod fanout;
pub mod fuzz;
pub mod grid;
pub mod h1;
mod message;
pub mod mutate;
pub mod reflect;
mod stream;
pub mod target;

pub use config::{FanoutConfig, MutatorConfig, ECHO_PORT};
pub use diff::{classify, classify_all, stream_is_invalid, Discrepancy, StatusCause, StreamCause};
pub use fanout::{fanout, unparsed_fanout};
pub use fuzz::{run_one_generation, triage_generation, Fingerprint, GenerationOutcome, Round};
pub use grid::{generate_clusters, generate_grid, normalize_grid, Grid, Verdict};
pub use h1::{HttpRequest, HttpResponse, ParseError};
pub use message::HttpMessage;
pub use mutate::{Mutator, Operator};
pub use stream::ByteStream;
pub use target::{AnomalyProfile, HeaderPattern, Role, RoundtripError, Service, ServiceSet};

#[cfg(test)]
mod tests;

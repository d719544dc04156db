//! The differential fuzzing loop
//!
//! Two drivers share the same parts. [`run_one_generation`] sends a batch of
//! inputs and sorts them into result-inducing and merely interesting ones,
//! for a caller that breeds the next generation itself. [`explore`] mutates
//! until it has found inputs for a number of distinct normalized grids.

use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet};
use std::hash::{Hash, Hasher};

use tracing::{debug, info};

use crate::config::FanoutConfig;
use crate::diff::classify_all;
use crate::fanout::fanout;
use crate::grid::{generate_grid, normalize_grid, Grid, Verdict};
use crate::message::HttpMessage;
use crate::mutate::Mutator;
use crate::stream::ByteStream;
use crate::target::Service;

/// One request each: a bare GET, a Content-Length POST, a chunked POST.
pub const SEED_REQUESTS: [&[u8]; 3] = [
    b"GET / HTTP/1.1\r\n\r\n",
    b"POST / HTTP/1.1\r\nContent-Length: 10\r\nHost: b\r\n\r\n0123456789",
    b"POST / HTTP/1.1\r\nHost: c\r\nTransfer-Encoding: chunked\r\n\r\n5\r\n01234\r\n5\r\n56789\r\n0\r\n\r\n",
];

/// The canonical starting corpus, one single-buffer stream per seed request
pub fn seeds() -> Vec<ByteStream> {
    SEED_REQUESTS
        .iter()
        .map(|req| ByteStream::from_slices(&[*req]))
        .collect()
}

/// Opaque key for "this input made the targets behave like this"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Fingerprint(pub u64);

impl Fingerprint {
    pub fn of<H: Hash + ?Sized>(value: &H) -> Self {
        let mut hasher = DefaultHasher::new();
        value.hash(&mut hasher);
        Self(hasher.finish())
    }

    /// Signature of what every target made of one input: the shape of each
    /// request it accepted and the code of each response it sent.
    pub fn of_replies(replies: &[Vec<HttpMessage>]) -> Self {
        let mut hasher = DefaultHasher::new();
        for target in replies {
            target.len().hash(&mut hasher);
            for message in target {
                match message {
                    HttpMessage::Request(req) => {
                        0u8.hash(&mut hasher);
                        req.method.hash(&mut hasher);
                        req.uri.hash(&mut hasher);
                        req.version.hash(&mut hasher);
                        req.normalized_headers().hash(&mut hasher);
                        req.body.hash(&mut hasher);
                    },
                    HttpMessage::Response(resp) => {
                        1u8.hash(&mut hasher);
                        resp.code.hash(&mut hasher);
                    },
                }
            }
        }
        Self(hasher.finish())
    }
}

/// What one input produced across all targets
#[derive(Debug, Clone, Default)]
pub struct Round {
    /// Parsed replies, one list per target, in service order
    pub replies:     Vec<Vec<HttpMessage>>,
    /// Set by targets that report their own coverage signature
    pub fingerprint: Option<Fingerprint>,
}

impl From<Vec<Vec<HttpMessage>>> for Round {
    fn from(replies: Vec<Vec<HttpMessage>>) -> Self {
        Self {
            replies,
            fingerprint: None,
        }
    }
}

/// Inputs of one generation, sorted by what they revealed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenerationOutcome {
    /// Some pair of targets disagreed
    pub result_inducing: Vec<ByteStream>,
    /// No disagreement, but behavior not seen before
    pub interesting:     Vec<ByteStream>,
}

/// Sort `inputs` by their `rounds` (same order). Every fingerprint seen is
/// added to `seen`, including those of result-inducing inputs.
pub fn triage_generation(
    inputs: &[ByteStream],
    rounds: &[Round],
    services: &[Service],
    seen: &mut HashSet<Fingerprint>,
) -> GenerationOutcome {
    let mut outcome = GenerationOutcome::default();
    for (input, round) in inputs.iter().zip(rounds) {
        let fingerprint = round
            .fingerprint
            .unwrap_or_else(|| Fingerprint::of_replies(&round.replies));
        let discrepancy = classify_all(&round.replies, services);
        if discrepancy.is_discrepancy() {
            debug!(%discrepancy, "result-inducing input");
            outcome.result_inducing.push(input.clone());
        } else if !seen.contains(&fingerprint) {
            outcome.interesting.push(input.clone());
        }
        seen.insert(fingerprint);
    }
    outcome
}

/// Send each input to every service, one input at a time, and triage.
pub async fn run_one_generation(
    inputs: &[ByteStream],
    services: &[Service],
    config: &FanoutConfig,
    seen: &mut HashSet<Fingerprint>,
) -> GenerationOutcome {
    let mut rounds = Vec::with_capacity(inputs.len());
    for input in inputs {
        rounds.push(Round::from(fanout(input, services, config).await));
    }
    let outcome = triage_generation(inputs, &rounds, services, seen);
    info!(
        inputs = inputs.len(),
        result_inducing = outcome.result_inducing.len(),
        interesting = outcome.interesting.len(),
        "generation done"
    );
    outcome
}

/// Mutate until `goal` distinct normalized grids not produced by any seed
/// have been found, or `max_rounds` mutations have been attempted.
///
/// Inputs whose grid matches a seed's join the corpus. The first input for a
/// new grid ends the search for that goal; later inputs with an already
/// found grid are appended to its list.
pub async fn explore(
    services: &[Service],
    seeds: &[ByteStream],
    goal: usize,
    max_rounds: usize,
    mutator: &mut Mutator,
    config: &FanoutConfig,
) -> HashMap<Grid<Verdict>, Vec<ByteStream>> {
    let mut corpus: Vec<ByteStream> = seeds.to_vec();
    let mut ignored: HashSet<Grid<Verdict>> = HashSet::new();
    for seed in seeds {
        ignored.insert(grid_for(seed, services, config).await);
    }

    let mut results: HashMap<Grid<Verdict>, Vec<ByteStream>> = HashMap::new();
    let mut rounds = 0;
    while results.len() < goal && rounds < max_rounds {
        let Some(parent) = mutator.choose(&corpus) else {
            break;
        };
        rounds += 1;
        let Some(payload) = mutator.mutate(parent) else {
            continue;
        };

        let grid = grid_for(&payload, services, config).await;
        if ignored.contains(&grid) {
            corpus.push(payload);
        } else if let Some(found) = results.get_mut(&grid) {
            found.push(payload);
        } else {
            info!(found = results.len() + 1, goal, rounds, "new grid");
            results.insert(grid, vec![payload]);
        }
    }
    results
}

async fn grid_for(stream: &ByteStream, services: &[Service], config: &FanoutConfig) -> Grid<Verdict> {
    let replies = fanout(stream, services, config).await;
    normalize_grid(&generate_grid(&replies, services))
}

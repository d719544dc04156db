//! Structured mutation of byte streams
//!
//! Operators work at three levels: raw bytes anywhere in the stream, whole
//! buffers (the write boundaries), and parsed requests inside one buffer.
//! Request-level operators re-serialize what they parsed and keep whatever
//! the parser could not consume byte for byte.

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::seq::{IndexedRandom, SliceRandom};
use rand::{Rng, SeedableRng};
use tracing::trace;

use crate::config::MutatorConfig;
use crate::h1::{parse_request, parse_request_stream, HttpRequest, METHODS};
use crate::stream::ByteStream;

/// Bytes that tend to matter to HTTP parsers
const DELIMITERS: &[&[u8]] = &[b"\r\n", b"\r", b"\n", b"\0", b":", b"\t", b" "];

/// One way of changing a stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    InsertSeedBuffer,
    DeleteBuffer,
    ReplaceBuffer,
    DuplicateBuffer,
    ConcatBuffers,
    SplitBuffer,
    ShiftBoundary,
    DeleteByte,
    InsertByte,
    ReplaceByte,
    InsertDelimiter,
    DeleteHeader,
    InsertHeader,
    ReplaceHeader,
    ReplaceMethod,
    Rechunk,
}

impl Operator {
    pub const ALL: [Operator; 16] = [
        Operator::InsertSeedBuffer,
        Operator::DeleteBuffer,
        Operator::ReplaceBuffer,
        Operator::DuplicateBuffer,
        Operator::ConcatBuffers,
        Operator::SplitBuffer,
        Operator::ShiftBoundary,
        Operator::DeleteByte,
        Operator::InsertByte,
        Operator::ReplaceByte,
        Operator::InsertDelimiter,
        Operator::DeleteHeader,
        Operator::InsertHeader,
        Operator::ReplaceHeader,
        Operator::ReplaceMethod,
        Operator::Rechunk,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::InsertSeedBuffer => "insert-seed-buffer",
            Self::DeleteBuffer => "delete-buffer",
            Self::ReplaceBuffer => "replace-buffer",
            Self::DuplicateBuffer => "duplicate-buffer",
            Self::ConcatBuffers => "concat-buffers",
            Self::SplitBuffer => "split-buffer",
            Self::ShiftBoundary => "shift-boundary",
            Self::DeleteByte => "delete-byte",
            Self::InsertByte => "insert-byte",
            Self::ReplaceByte => "replace-byte",
            Self::InsertDelimiter => "insert-delimiter",
            Self::DeleteHeader => "delete-header",
            Self::InsertHeader => "insert-header",
            Self::ReplaceHeader => "replace-header",
            Self::ReplaceMethod => "replace-method",
            Self::Rechunk => "rechunk",
        }
    }
}

/// Applies random operators to streams.
pub struct Mutator {
    rng:    StdRng,
    config: MutatorConfig,
}

impl Default for Mutator {
    fn default() -> Self {
        Self::new()
    }
}

impl Mutator {
    /// Default configuration, seeded from the OS
    pub fn new() -> Self {
        Self::with_config_and_rng(MutatorConfig::default(), StdRng::from_os_rng())
    }

    /// Default configuration with a reproducible sequence
    pub fn seeded(seed: u64) -> Self {
        Self::with_config_and_rng(MutatorConfig::default(), StdRng::seed_from_u64(seed))
    }

    pub fn with_config_and_rng(config: MutatorConfig, rng: StdRng) -> Self {
        Self { rng, config }
    }

    pub fn config(&self) -> &MutatorConfig {
        &self.config
    }

    /// Pick any stream out of `corpus`; `None` if it is empty.
    pub fn choose<'a>(&mut self, corpus: &'a [ByteStream]) -> Option<&'a ByteStream> {
        corpus.choose(&mut self.rng)
    }

    /// Try operators in random order until one applies, giving up after
    /// `max_attempts`.
    pub fn mutate(&mut self, stream: &ByteStream) -> Option<ByteStream> {
        let mut operators = Operator::ALL;
        operators.shuffle(&mut self.rng);
        for operator in operators.into_iter().take(self.config.max_attempts) {
            match self.apply(operator, stream) {
                Some(mutated) => {
                    trace!(operator = operator.name(), "mutation applied");
                    return Some(mutated);
                },
                None => trace!(operator = operator.name(), "mutation not applicable"),
            }
        }
        None
    }

    /// Apply one operator; `None` when it does not fit the stream.
    pub fn apply(&mut self, operator: Operator, stream: &ByteStream) -> Option<ByteStream> {
        let rng = &mut self.rng;
        let config = &self.config;
        match operator {
            Operator::InsertSeedBuffer => insert_seed_buffer(rng, config, stream),
            Operator::DeleteBuffer => delete_buffer(rng, stream),
            Operator::ReplaceBuffer => replace_buffer(rng, config, stream),
            Operator::DuplicateBuffer => duplicate_buffer(rng, stream),
            Operator::ConcatBuffers => concat_buffers(rng, stream),
            Operator::SplitBuffer => split_buffer(rng, stream),
            Operator::ShiftBoundary => shift_boundary(rng, stream),
            Operator::DeleteByte => delete_byte(rng, stream),
            Operator::InsertByte => {
                let byte = [rng.random::<u8>()];
                insert_bytes(rng, stream, &byte)
            },
            Operator::ReplaceByte => replace_byte(rng, stream),
            Operator::InsertDelimiter => {
                let delimiter = *DELIMITERS.choose(rng)?;
                insert_bytes(rng, stream, delimiter)
            },
            Operator::DeleteHeader => rewrite_request(rng, stream, |rng, mut req| {
                if req.headers.is_empty() {
                    return None;
                }
                req.headers.remove(rng.random_range(0..req.headers.len()));
                Some(req.to_bytes())
            }),
            Operator::InsertHeader => rewrite_request(rng, stream, |rng, mut req| {
                let header = config.seed_headers.choose(rng)?.clone();
                req.headers
                    .insert(rng.random_range(0..=req.headers.len()), header);
                Some(req.to_bytes())
            }),
            Operator::ReplaceHeader => rewrite_request(rng, stream, |rng, mut req| {
                if req.headers.is_empty() {
                    return None;
                }
                let index = rng.random_range(0..req.headers.len());
                req.headers[index] = config.seed_headers.choose(rng)?.clone();
                Some(req.to_bytes())
            }),
            Operator::ReplaceMethod => rewrite_request(rng, stream, |rng, mut req| {
                let candidates: Vec<&[u8]> = METHODS
                    .iter()
                    .copied()
                    .filter(|m| *m != req.method.as_slice())
                    .collect();
                req.method = candidates.choose(rng)?.to_vec();
                Some(req.to_bytes())
            }),
            Operator::Rechunk => rewrite_request(rng, stream, |rng, req| {
                if !req.is_chunked() {
                    return None;
                }
                let mut out = req.head_bytes();
                out.extend_from_slice(&chunk_randomly(rng, &req.body));
                Some(out)
            }),
        }
    }
}

fn insert_seed_buffer<R: Rng + ?Sized>(
    rng: &mut R,
    config: &MutatorConfig,
    stream: &ByteStream,
) -> Option<ByteStream> {
    let seed = Bytes::from(config.seed_requests.choose(rng)?.clone());
    let mut buffers = stream.buffers().to_vec();
    buffers.insert(rng.random_range(0..=buffers.len()), seed);
    Some(ByteStream::new(buffers))
}

fn delete_buffer<R: Rng + ?Sized>(rng: &mut R, stream: &ByteStream) -> Option<ByteStream> {
    if stream.len() < 2 {
        return None;
    }
    let mut buffers = stream.buffers().to_vec();
    buffers.remove(rng.random_range(0..buffers.len()));
    Some(ByteStream::new(buffers))
}

fn replace_buffer<R: Rng + ?Sized>(
    rng: &mut R,
    config: &MutatorConfig,
    stream: &ByteStream,
) -> Option<ByteStream> {
    if stream.is_empty() {
        return None;
    }
    let seed = config.seed_requests.choose(rng)?.clone();
    Some(stream.with_buffer(rng.random_range(0..stream.len()), seed))
}

fn duplicate_buffer<R: Rng + ?Sized>(rng: &mut R, stream: &ByteStream) -> Option<ByteStream> {
    if stream.is_empty() {
        return None;
    }
    let mut buffers = stream.buffers().to_vec();
    let index = rng.random_range(0..buffers.len());
    buffers.insert(index, buffers[index].clone());
    Some(ByteStream::new(buffers))
}

fn concat_buffers<R: Rng + ?Sized>(rng: &mut R, stream: &ByteStream) -> Option<ByteStream> {
    if stream.len() < 2 {
        return None;
    }
    let mut buffers = stream.buffers().to_vec();
    let index = rng.random_range(0..buffers.len() - 1);
    let second = buffers.remove(index + 1);
    buffers[index] = [buffers[index].as_ref(), second.as_ref()].concat().into();
    Some(ByteStream::new(buffers))
}

/// Cut one buffer in two, both halves non-empty.
fn split_buffer<R: Rng + ?Sized>(rng: &mut R, stream: &ByteStream) -> Option<ByteStream> {
    let candidates: Vec<usize> = (0..stream.len())
        .filter(|&i| stream.buffers()[i].len() >= 2)
        .collect();
    let index = *candidates.choose(rng)?;
    let mut buffers = stream.buffers().to_vec();
    let mut first = buffers[index].clone();
    let second = first.split_off(rng.random_range(1..first.len()));
    buffers[index] = first;
    buffers.insert(index + 1, second);
    Some(ByteStream::new(buffers))
}

/// Move the boundary between two adjacent buffers, keeping their order.
fn shift_boundary<R: Rng + ?Sized>(rng: &mut R, stream: &ByteStream) -> Option<ByteStream> {
    if stream.len() < 2 {
        return None;
    }
    let mut buffers = stream.buffers().to_vec();
    let index = rng.random_range(0..buffers.len() - 1);
    let mut combined = Bytes::from([buffers[index].as_ref(), buffers[index + 1].as_ref()].concat());
    let second = combined.split_off(rng.random_range(0..=combined.len()));
    buffers[index] = combined;
    buffers[index + 1] = second;
    Some(ByteStream::new(buffers))
}

fn delete_byte<R: Rng + ?Sized>(rng: &mut R, stream: &ByteStream) -> Option<ByteStream> {
    let total = stream.total_len();
    if total == 0 {
        return None;
    }
    let (index, offset) = stream.locate(rng.random_range(0..total))?;
    let buffer = &stream.buffers()[index];
    Some(stream.with_buffer(index, [&buffer[..offset], &buffer[offset + 1..]].concat()))
}

fn replace_byte<R: Rng + ?Sized>(rng: &mut R, stream: &ByteStream) -> Option<ByteStream> {
    let total = stream.total_len();
    if total == 0 {
        return None;
    }
    let (index, offset) = stream.locate(rng.random_range(0..total))?;
    let mut buffer = stream.buffers()[index].to_vec();
    buffer[offset] = rng.random();
    Some(stream.with_buffer(index, buffer))
}

/// Insert `bytes` at any of the `total_len + 1` gaps.
fn insert_bytes<R: Rng + ?Sized>(rng: &mut R, stream: &ByteStream, bytes: &[u8]) -> Option<ByteStream> {
    if stream.is_empty() {
        return None;
    }
    let (index, offset) = stream.locate_gap(rng.random_range(0..=stream.total_len()))?;
    let buffer = &stream.buffers()[index];
    Some(stream.with_buffer(index, [&buffer[..offset], bytes, &buffer[offset..]].concat()))
}

/// Parse a random buffer that holds at least one request, let `rewrite`
/// turn one of its requests into new bytes, and serialize the buffer again.
fn rewrite_request<R, F>(rng: &mut R, stream: &ByteStream, rewrite: F) -> Option<ByteStream>
where
    R: Rng + ?Sized,
    F: FnOnce(&mut R, HttpRequest) -> Option<Vec<u8>>,
{
    let candidates: Vec<usize> = (0..stream.len())
        .filter(|&i| parse_request(&stream.buffers()[i]).is_ok())
        .collect();
    let index = *candidates.choose(rng)?;

    let (mut requests, rest) = parse_request_stream(&stream.buffers()[index]);
    let target = rng.random_range(0..requests.len());
    let rewritten = rewrite(rng, requests.remove(target))?;

    let mut out = Vec::with_capacity(stream.buffers()[index].len() + 64);
    for req in &requests[..target] {
        out.extend_from_slice(&req.to_bytes());
    }
    out.extend_from_slice(&rewritten);
    for req in &requests[target..] {
        out.extend_from_slice(&req.to_bytes());
    }
    out.extend_from_slice(rest);
    Some(stream.with_buffer(index, out))
}

/// Chunked coding of `data` cut at random points. Some size lines are
/// written in legal but unusual forms.
pub fn chunk_randomly<R: Rng + ?Sized>(rng: &mut R, data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 16);
    if !data.is_empty() {
        let cut_count = rng.random_range(0..data.len());
        let mut cuts: Vec<usize> = rand::seq::index::sample(rng, data.len() - 1, cut_count)
            .into_iter()
            .map(|i| i + 1)
            .collect();
        cuts.sort_unstable();
        cuts.push(data.len());

        let mut start = 0;
        for end in cuts {
            let chunk = &data[start..end];
            let size_line = match rng.random_range(0..8) {
                0 => format!("00{:x}\r\n", chunk.len()),
                1 => format!("{:X}\r\n", chunk.len()),
                2 => format!("{:x};ext=1\r\n", chunk.len()),
                _ => format!("{:x}\r\n", chunk.len()),
            };
            out.extend_from_slice(size_line.as_bytes());
            out.extend_from_slice(chunk);
            out.extend_from_slice(b"\r\n");
            start = end;
        }
    }
    out.extend_from_slice(b"0\r\n\r\n");
    out
}

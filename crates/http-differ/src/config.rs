use std::time::Duration;

use h2wire::H2Limits;

use crate::h1::Header;

/// Port of the side channel on which transducers report what they forwarded
pub const ECHO_PORT: u16 = 0xDA1E;

/// Configuration for talking to targets
#[derive(Debug, Clone)]
pub struct FanoutConfig {
    /// Upper bound on targets contacted at once
    pub max_workers:        usize,
    /// Size of each socket read
    pub recv_chunk_size:    usize,
    /// Quiet period after which an origin is considered done answering
    /// (default: 20 ms)
    pub origin_timeout:     Duration,
    /// Quiet period for transducers, which forward before answering
    /// (default: 500 ms)
    pub transducer_timeout: Duration,
    /// Time allowed to establish a connection, including the TLS handshake
    pub connect_timeout:    Duration,
    /// Quiet period on a transducer's echo side channel
    pub echo_timeout:       Duration,
    /// Hard limit on one exchange with a target, however often it speaks
    pub roundtrip_timeout:  Duration,
    /// Bytes kept from one target's reply; reading stops once reached
    pub max_reply_size:     usize,
    /// Limits for decoding HTTP/2 replies
    pub h2_limits:          H2Limits,
}

impl Default for FanoutConfig {
    fn default() -> Self {
        let max_workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1)
            .min(32);
        Self {
            max_workers,
            recv_chunk_size: 65536,
            origin_timeout: Duration::from_millis(20),
            transducer_timeout: Duration::from_millis(500),
            connect_timeout: Duration::from_secs(1),
            echo_timeout: Duration::from_millis(10),
            roundtrip_timeout: Duration::from_secs(5),
            max_reply_size: 16 << 20,
            h2_limits: H2Limits::default(),
        }
    }
}

impl FanoutConfig {
    /// One target at a time, for debugging a misbehaving target
    pub fn sequential() -> Self {
        Self {
            max_workers: 1,
            ..Default::default()
        }
    }
}

/// Configuration for the mutation engine
#[derive(Debug, Clone)]
pub struct MutatorConfig {
    /// Operators tried per mutation before giving up
    pub max_attempts:  usize,
    /// Headers the header operators draw from
    pub seed_headers:  Vec<Header>,
    /// Whole requests the buffer operators draw from
    pub seed_requests: Vec<Vec<u8>>,
}

impl Default for MutatorConfig {
    fn default() -> Self {
        let seed_headers: [(&[u8], &[u8]); 7] = [
            (b"Content-Length", b"0"),
            (b"Transfer-Encoding", b"chunked"),
            (b"Transfer-Encoding", b"identity"),
            (b"", b""),
            (b"Test", b""),
            (b"Connection", b"close"),
            (b"Connection", b"keep-alive"),
        ];
        Self {
            max_attempts:  crate::mutate::Operator::ALL.len(),
            seed_headers:  seed_headers
                .iter()
                .map(|(k, v)| (k.to_vec(), v.to_vec()))
                .collect(),
            seed_requests: crate::fuzz::SEED_REQUESTS
                .iter()
                .map(|r| r.to_vec())
                .collect(),
        }
    }
}

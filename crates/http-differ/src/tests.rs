use std::collections::HashSet;

use proptest::prelude::*;
use rstest::rstest;

use super::*;
use crate::h1::parse_request;
use crate::target::HeaderPattern;

fn request(method: &str, uri: &str, headers: &[(&str, &str)]) -> HttpRequest {
    HttpRequest {
        method:  method.as_bytes().to_vec(),
        uri:     uri.as_bytes().to_vec(),
        version: b"1.1".to_vec(),
        headers: headers
            .iter()
            .map(|(k, v)| (k.as_bytes().to_vec(), v.as_bytes().to_vec()))
            .collect(),
        body:    Vec::new(),
    }
}

fn req(method: &str, uri: &str, headers: &[(&str, &str)]) -> HttpMessage {
    request(method, uri, headers).into()
}

fn resp(code: &str) -> HttpMessage {
    HttpResponse {
        version: b"1.1".to_vec(),
        code: code.as_bytes().to_vec(),
        ..Default::default()
    }
    .into()
}

fn get() -> HttpMessage {
    req("GET", "/", &[("Host", "a")])
}

fn services(n: usize) -> Vec<Service> {
    (0..n)
        .map(|i| Service::origin(&format!("s{i}"), "127.0.0.1", 8000 + i as u16))
        .collect()
}

fn profile() -> AnomalyProfile {
    AnomalyProfile::default()
}

// =========================================================================
// Classification without anomalies
// =========================================================================

#[rstest]
#[case::both_silent(vec![], vec![], Discrepancy::NoDiscrepancy)]
#[case::same_request(vec![get()], vec![get()], Discrepancy::NoDiscrepancy)]
#[case::header_name_case(
    vec![get()],
    vec![req("GET", "/", &[("host", "a")])],
    Discrepancy::NoDiscrepancy
)]
#[case::header_order(
    vec![req("GET", "/", &[("A", "1"), ("B", "2")])],
    vec![req("GET", "/", &[("B", "2"), ("A", "1")])],
    Discrepancy::NoDiscrepancy
)]
#[case::different_uri(vec![get()], vec![req("GET", "/x", &[("Host", "a")])], Discrepancy::Subtle)]
#[case::different_header_value(
    vec![get()],
    vec![req("GET", "/", &[("Host", "b")])],
    Discrepancy::Subtle
)]
#[case::accepted_vs_rejected(
    vec![get()],
    vec![resp("400")],
    Discrepancy::Status(StatusCause::AcceptedVsRejected)
)]
#[case::different_rejections(
    vec![resp("400")],
    vec![resp("404")],
    Discrepancy::Status(StatusCause::DifferentStatus)
)]
#[case::same_rejection(vec![resp("400")], vec![resp("400")], Discrepancy::NoDiscrepancy)]
#[case::silence_vs_400(vec![], vec![resp("400")], Discrepancy::NoDiscrepancy)]
#[case::silence_vs_request(vec![], vec![get()], Discrepancy::Stream(StreamCause::MissingReply))]
#[case::silence_vs_404(vec![resp("404")], vec![], Discrepancy::Stream(StreamCause::MissingReply))]
#[case::continued_after_400(
    vec![resp("400"), get()],
    vec![resp("400")],
    Discrepancy::Stream(StreamCause::InvalidStream)
)]
#[case::invalid_method(
    vec![req("G T", "/", &[])],
    vec![req("G T", "/", &[])],
    Discrepancy::Stream(StreamCause::InvalidRequest)
)]
#[case::invalid_header_value(
    vec![get()],
    vec![req("GET", "/", &[("Host", "a\rb")])],
    Discrepancy::Stream(StreamCause::InvalidRequest)
)]
#[case::second_message_differs(
    vec![get(), get()],
    vec![get(), req("GET", "/x", &[("Host", "a")])],
    Discrepancy::Subtle
)]
#[case::extra_message(
    vec![get()],
    vec![get(), get()],
    Discrepancy::Stream(StreamCause::MissingReply)
)]
fn test_classify_plain(
    #[case] replies1: Vec<HttpMessage>,
    #[case] replies2: Vec<HttpMessage>,
    #[case] expected: Discrepancy,
) {
    assert_eq!(classify(&replies1, &replies2, &profile(), &profile()), expected);
}

#[test]
fn test_explained_position_stops_the_walk() {
    let rejecter = AnomalyProfile {
        method_whitelist: Some(vec![b"GET".to_vec()]),
        ..profile()
    };
    // After the explained 405 nothing is compared, not even the extra request
    let replies1 = vec![req("PUT", "/", &[("Host", "a")]), get()];
    let replies2 = vec![resp("405")];
    assert_eq!(
        classify(&replies1, &replies2, &profile(), &rejecter),
        Discrepancy::NoDiscrepancy
    );
}

// =========================================================================
// Escape hatches
// =========================================================================

#[test]
fn test_http_0_9_rejected_by_strict_target() {
    let mut simple = request("GET", "/", &[]);
    simple.version = b"0.9".to_vec();
    let replies1 = vec![HttpMessage::Request(simple)];
    let replies2 = vec![resp("400")];

    assert_eq!(
        classify(&replies1, &replies2, &profile(), &profile()),
        Discrepancy::NoDiscrepancy
    );

    let lenient = AnomalyProfile {
        allows_http_0_9: true,
        ..profile()
    };
    assert_eq!(
        classify(&replies1, &replies2, &profile(), &lenient),
        Discrepancy::Status(StatusCause::AcceptedVsRejected)
    );
}

#[rstest]
#[case::post_explained("POST", true, false, Discrepancy::NoDiscrepancy)]
#[case::get_not_explained("GET", true, false, Discrepancy::Status(StatusCause::AcceptedVsRejected))]
#[case::rejecter_lenient("POST", false, false, Discrepancy::Status(StatusCause::AcceptedVsRejected))]
#[case::both_strict("POST", true, true, Discrepancy::Status(StatusCause::AcceptedVsRejected))]
fn test_length_required(
    #[case] method: &str,
    #[case] rejecter_requires: bool,
    #[case] accepter_requires: bool,
    #[case] expected: Discrepancy,
) {
    let accepter = AnomalyProfile {
        requires_length_in_post: accepter_requires,
        ..profile()
    };
    let rejecter = AnomalyProfile {
        requires_length_in_post: rejecter_requires,
        ..profile()
    };
    let replies1 = vec![req(method, "/", &[("Host", "a")])];
    let replies2 = vec![resp("411")];
    assert_eq!(classify(&replies1, &replies2, &accepter, &rejecter), expected);
}

#[rstest]
#[case::rejected_with_400(vec![resp("400")], Discrepancy::NoDiscrepancy)]
#[case::silent(vec![], Discrepancy::NoDiscrepancy)]
#[case::other_code(vec![resp("404")], Discrepancy::Status(StatusCause::AcceptedVsRejected))]
fn test_missing_host(#[case] refused: Vec<HttpMessage>, #[case] expected: Discrepancy) {
    let lenient = AnomalyProfile {
        allows_missing_host_header: true,
        ..profile()
    };
    let replies = vec![req("GET", "/", &[])];
    assert_eq!(classify(&replies, &refused, &lenient, &profile()), expected);
    // The hatch needs the request to actually lack a Host header
    assert!(classify(&[get()], &refused, &lenient, &profile()).is_discrepancy());
}

#[rstest]
#[case::not_whitelisted("PUT", Discrepancy::NoDiscrepancy)]
#[case::whitelisted("GET", Discrepancy::Status(StatusCause::AcceptedVsRejected))]
fn test_method_whitelist(#[case] method: &str, #[case] expected: Discrepancy) {
    let rejecter = AnomalyProfile {
        method_whitelist: Some(vec![b"GET".to_vec(), b"POST".to_vec()]),
        ..profile()
    };
    let replies1 = vec![req(method, "/", &[("Host", "a")])];
    let replies2 = vec![resp("405")];
    assert_eq!(classify(&replies1, &replies2, &profile(), &rejecter), expected);
}

#[rstest]
#[case::blacklisted_char("GE!T", Discrepancy::NoDiscrepancy)]
#[case::clean("GET", Discrepancy::Status(StatusCause::AcceptedVsRejected))]
fn test_method_blacklist(#[case] method: &str, #[case] expected: Discrepancy) {
    let rejecter = AnomalyProfile {
        method_character_blacklist: b"!#".to_vec(),
        ..profile()
    };
    let replies1 = vec![resp("400")];
    let replies2 = vec![req(method, "/", &[("Host", "a")])];
    assert_eq!(classify(&replies1, &replies2, &rejecter, &profile()), expected);
}

#[test]
fn test_persistence_truncates_both_sides() {
    let single_shot = AnomalyProfile {
        doesnt_support_persistence: true,
        ..profile()
    };
    let replies1 = vec![get()];
    let replies2 = vec![get(), req("GET", "/x", &[("Host", "a")])];
    assert_eq!(
        classify(&replies1, &replies2, &single_shot, &profile()),
        Discrepancy::NoDiscrepancy
    );
    assert_eq!(
        classify(&replies1, &replies2, &profile(), &profile()),
        Discrepancy::Stream(StreamCause::MissingReply)
    );
}

// =========================================================================
// Normalization
// =========================================================================

#[rstest]
#[case::pinned_value(HeaderPattern::pair(b"Via", b"proxy"), ("Via", "proxy"))]
#[case::any_value(HeaderPattern::name(b"X-Forwarded-For"), ("X-Forwarded-For", "10.0.0.1"))]
fn test_added_headers_are_ignored(#[case] added: HeaderPattern, #[case] header: (&str, &str)) {
    let adder = AnomalyProfile {
        added_headers: vec![added],
        ..profile()
    };
    let replies1 = vec![req("GET", "/", &[("Host", "a"), header])];
    let replies2 = vec![get()];
    assert_eq!(
        classify(&replies1, &replies2, &adder, &profile()),
        Discrepancy::NoDiscrepancy
    );
    assert!(classify(&replies1, &replies2, &profile(), &profile()).is_discrepancy());
}

#[test]
fn test_removed_headers_are_restored() {
    let stripper = AnomalyProfile {
        removed_headers: vec![b"connection".to_vec()],
        ..profile()
    };
    let replies1 = vec![get()];
    let replies2 = vec![req("GET", "/", &[("Host", "a"), ("Connection", "close")])];
    assert_eq!(
        classify(&replies1, &replies2, &stripper, &profile()),
        Discrepancy::NoDiscrepancy
    );
}

#[test]
fn test_restoring_reads_the_other_side_before_either_restore() {
    let underscores = AnomalyProfile {
        header_name_translation: vec![(b"-".to_vec(), b"_".to_vec())],
        removed_headers: vec![b"x_a".to_vec()],
        ..profile()
    };
    let dashes = AnomalyProfile {
        removed_headers: vec![b"X-A".to_vec()],
        ..profile()
    };
    let replies1 = vec![get()];
    let replies2 = vec![req("GET", "/", &[("Host", "a"), ("X_A", "1")])];
    assert_eq!(
        classify(&replies1, &replies2, &underscores, &dashes),
        Discrepancy::NoDiscrepancy
    );
    assert_eq!(
        classify(&replies2, &replies1, &dashes, &underscores),
        Discrepancy::NoDiscrepancy
    );
}

#[test]
fn test_trashed_headers_are_dropped() {
    let trasher = AnomalyProfile {
        trashed_headers: vec![b"user-agent".to_vec()],
        ..profile()
    };
    let replies1 = vec![req("GET", "/", &[("Host", "a"), ("User-Agent", "overwritten")])];
    let replies2 = vec![req("GET", "/", &[("Host", "a"), ("User-Agent", "curl")])];
    assert_eq!(
        classify(&replies1, &replies2, &profile(), &trasher),
        Discrepancy::NoDiscrepancy
    );
}

#[test]
fn test_joined_duplicates() {
    let joiner = AnomalyProfile {
        joins_duplicate_headers: true,
        duplicate_header_joiner: b", ".to_vec(),
        ..profile()
    };
    let replies1 = vec![req("GET", "/", &[("Host", "a"), ("A", "1, 2")])];
    let replies2 = vec![req("GET", "/", &[("Host", "a"), ("A", "1"), ("A", "2")])];
    assert_eq!(
        classify(&replies1, &replies2, &joiner, &profile()),
        Discrepancy::NoDiscrepancy
    );
}

#[test]
fn test_version_ignored_when_unsupported() {
    let mut old = request("GET", "/", &[("Host", "a")]);
    old.version = b"1.0".to_vec();
    let replies1 = vec![HttpMessage::Request(old)];
    let replies2 = vec![get()];
    let versionless = AnomalyProfile {
        doesnt_support_version: true,
        ..profile()
    };
    assert_eq!(
        classify(&replies1, &replies2, &versionless, &profile()),
        Discrepancy::NoDiscrepancy
    );
    assert_eq!(
        classify(&replies1, &replies2, &profile(), &profile()),
        Discrepancy::Subtle
    );
}

#[test]
fn test_chunked_to_content_length() {
    let mut chunked = request("POST", "/", &[("Host", "a"), ("Transfer-Encoding", "chunked")]);
    chunked.body = b"hello".to_vec();
    let mut length = request("POST", "/", &[("Host", "a"), ("Content-Length", "5")]);
    length.body = b"hello".to_vec();
    let converter = AnomalyProfile {
        translates_chunked_to_cl: true,
        ..profile()
    };
    assert_eq!(
        classify(&[length.into()], &[chunked.into()], &converter, &profile()),
        Discrepancy::NoDiscrepancy
    );
}

#[test]
fn test_header_name_translation() {
    let translator = AnomalyProfile {
        header_name_translation: vec![(b"_".to_vec(), b"-".to_vec())],
        ..profile()
    };
    let replies1 = vec![req("GET", "/", &[("Host", "a"), ("x-y", "1")])];
    let replies2 = vec![req("GET", "/", &[("Host", "a"), ("x_y", "1")])];
    assert_eq!(
        classify(&replies1, &replies2, &translator, &profile()),
        Discrepancy::NoDiscrepancy
    );
    assert_eq!(
        classify(&replies1, &replies2, &profile(), &profile()),
        Discrepancy::Subtle
    );
}

#[test]
fn test_stream_is_invalid() {
    assert!(!stream_is_invalid(&[]));
    assert!(!stream_is_invalid(&[resp("400")]));
    assert!(!stream_is_invalid(&[get(), resp("400")]));
    assert!(stream_is_invalid(&[resp("400"), get()]));
    assert!(stream_is_invalid(&[resp("400"), resp("400")]));
}

#[test]
fn test_classify_all_returns_first_discrepancy() {
    let replies = vec![vec![get()], vec![get()], vec![resp("400")]];
    assert_eq!(
        classify_all(&replies, &services(3)),
        Discrepancy::Status(StatusCause::AcceptedVsRejected)
    );
    assert_eq!(
        classify_all(&replies[..2], &services(2)),
        Discrepancy::NoDiscrepancy
    );
}

#[test]
fn test_discrepancy_display() {
    assert_eq!(Discrepancy::NoDiscrepancy.to_string(), "no discrepancy");
    assert!(Discrepancy::Subtle.to_string().starts_with("subtle"));
    assert!(!Discrepancy::NoDiscrepancy.is_discrepancy());
    assert!(Discrepancy::Stream(StreamCause::MissingReply).is_discrepancy());
}

fn message_pool() -> Vec<HttpMessage> {
    let mut simple = request("GET", "/", &[]);
    simple.version = b"0.9".to_vec();
    vec![
        get(),
        req("GET", "/x", &[("Host", "a")]),
        req("GET", "/", &[("Host", "a"), ("Via", "proxy")]),
        req("GET", "/", &[("Host", "a"), ("x_y", "1")]),
        req("GET", "/", &[("Host", "a"), ("X-Y", "1")]),
        req("GET", "/", &[("Host", "a"), ("x_y", "1"), ("x_y", "2")]),
        req("GET", "/", &[("Host", "a"), ("User-Agent", "u")]),
        req("POST", "/", &[("Host", "a"), ("Transfer-Encoding", "chunked")]),
        req("POST", "/", &[("Host", "a"), ("Content-Length", "0")]),
        req("POST", "/", &[]),
        req("PUT", "/", &[("Host", "a")]),
        req("G T", "/", &[]),
        simple.into(),
        resp("400"),
        resp("404"),
        resp("405"),
        resp("411"),
    ]
}

fn profile_pool() -> Vec<AnomalyProfile> {
    vec![
        profile(),
        AnomalyProfile {
            allows_http_0_9: true,
            ..profile()
        },
        AnomalyProfile {
            requires_length_in_post: true,
            ..profile()
        },
        AnomalyProfile {
            allows_missing_host_header: true,
            ..profile()
        },
        AnomalyProfile {
            method_whitelist: Some(vec![b"GET".to_vec()]),
            ..profile()
        },
        AnomalyProfile {
            doesnt_support_persistence: true,
            ..profile()
        },
        AnomalyProfile {
            added_headers: vec![HeaderPattern::pair(b"Via", b"proxy")],
            ..profile()
        },
        AnomalyProfile {
            header_name_translation: vec![(b"_".to_vec(), b"-".to_vec())],
            ..profile()
        },
        AnomalyProfile {
            header_name_translation: vec![(b"-".to_vec(), b"_".to_vec())],
            removed_headers: vec![b"x_y".to_vec()],
            ..profile()
        },
        AnomalyProfile {
            removed_headers: vec![b"X-Y".to_vec()],
            ..profile()
        },
        AnomalyProfile {
            trashed_headers: vec![b"user-agent".to_vec()],
            ..profile()
        },
        AnomalyProfile {
            joins_duplicate_headers: true,
            duplicate_header_joiner: b", ".to_vec(),
            ..profile()
        },
        AnomalyProfile {
            translates_chunked_to_cl: true,
            ..profile()
        },
        AnomalyProfile {
            doesnt_support_version: true,
            ..profile()
        },
    ]
}

fn replies() -> impl Strategy<Value = Vec<HttpMessage>> {
    let pool = message_pool();
    proptest::collection::vec(0..pool.len(), 0..4)
        .prop_map(move |picks| picks.into_iter().map(|i| pool[i].clone()).collect())
}

proptest! {
    #[test]
    fn classification_is_symmetric(
        replies1 in replies(),
        replies2 in replies(),
        p1 in 0..profile_pool().len(),
        p2 in 0..profile_pool().len(),
    ) {
        let profiles = profile_pool();
        let forward = classify(&replies1, &replies2, &profiles[p1], &profiles[p2]);
        let backward = classify(&replies2, &replies1, &profiles[p2], &profiles[p1]);
        prop_assert_eq!(forward.is_discrepancy(), backward.is_discrepancy());
    }

    #[test]
    fn identical_replies_agree(replies in replies(), p in 0..profile_pool().len()) {
        prop_assume!(replies.iter().all(HttpMessage::is_valid));
        prop_assume!(!stream_is_invalid(&replies));
        let profile = &profile_pool()[p];
        prop_assert_eq!(
            classify(&replies, &replies, profile, profile),
            Discrepancy::NoDiscrepancy
        );
    }
}

// =========================================================================
// Grids and clusters
// =========================================================================

#[test]
fn test_generate_grid_is_upper_triangular() {
    let replies = vec![vec![get()], vec![get()], vec![resp("400")]];
    let grid = generate_grid(&replies, &services(3));

    assert_eq!(grid.size(), 3);
    for i in 0..3 {
        for j in 0..=i {
            assert_eq!(grid.get(i, j), None);
        }
    }
    assert_eq!(grid.get(0, 1), Some(&Discrepancy::NoDiscrepancy));
    assert_eq!(
        grid.get(0, 2),
        Some(&Discrepancy::Status(StatusCause::AcceptedVsRejected))
    );
    assert_eq!(grid.pair(2, 1), grid.get(1, 2));
}

#[test]
fn test_normalize_grid() {
    let replies = vec![vec![resp("400")], vec![resp("404")], vec![get()]];
    let grid = normalize_grid(&generate_grid(&replies, &services(3)));
    assert_eq!(grid.get(0, 1), Some(&Verdict::Agree));
    assert_eq!(grid.get(0, 2), Some(&Verdict::Disagree));
    assert_eq!(grid.get(1, 2), Some(&Verdict::Disagree));
    assert_eq!(grid.get(1, 1), None);
}

#[test]
fn test_equal_outcomes_share_a_grid() {
    let a = generate_grid(&[vec![resp("400")], vec![resp("400")]], &services(2));
    let b = generate_grid(&[vec![resp("400")], vec![resp("404")]], &services(2));
    assert_ne!(a, b);
    assert_eq!(normalize_grid(&a), normalize_grid(&b));
}

#[rstest]
#[case::all_agree(vec![vec![get()], vec![get()], vec![get()]], vec![vec![0, 1, 2]])]
#[case::all_differ(
    vec![vec![get()], vec![resp("400")], vec![req("GET", "/x", &[("Host", "a")])]],
    vec![vec![0], vec![1], vec![2]]
)]
#[case::interleaved(
    vec![vec![get()], vec![resp("400")], vec![get()], vec![resp("400")]],
    vec![vec![0, 2], vec![1, 3]]
)]
#[case::invalid_streams_cluster(
    vec![
        vec![get()],
        vec![resp("400"), get()],
        vec![resp("400"), req("GET", "/x", &[("Host", "a")])],
    ],
    vec![vec![0], vec![1, 2]]
)]
fn test_generate_clusters(#[case] replies: Vec<Vec<HttpMessage>>, #[case] expected: Vec<Vec<usize>>) {
    assert_eq!(generate_clusters(&replies, &services(replies.len())), expected);
}

// =========================================================================
// Generation triage
// =========================================================================

#[test]
fn test_seeds_parse_as_single_requests() {
    let seeds = fuzz::seeds();
    assert_eq!(seeds.len(), 3);
    for seed in &seeds {
        assert_eq!(seed.len(), 1);
        let (req, rest) = parse_request(&seed.buffers()[0]).unwrap();
        assert!(rest.is_empty());
        assert!(req.is_valid());
    }
}

#[test]
fn test_triage_generation() {
    let inputs = vec![
        ByteStream::from_slices(&[b"first"]),
        ByteStream::from_slices(&[b"second"]),
        ByteStream::from_slices(&[b"third"]),
        ByteStream::from_slices(&[b"fourth"]),
    ];
    let rounds: Vec<Round> = vec![
        vec![vec![get()], vec![get()]].into(),
        vec![vec![get()], vec![resp("400")]].into(),
        vec![vec![get()], vec![get()]].into(),
        vec![vec![resp("400")], vec![resp("400")]].into(),
    ];
    let mut seen = HashSet::new();

    let outcome = triage_generation(&inputs, &rounds, &services(2), &mut seen);

    assert_eq!(outcome.result_inducing, vec![inputs[1].clone()]);
    assert_eq!(outcome.interesting, vec![inputs[0].clone(), inputs[3].clone()]);
    assert_eq!(seen.len(), 3);

    // A second pass finds nothing new
    let again = triage_generation(&inputs, &rounds, &services(2), &mut seen);
    assert_eq!(again.result_inducing, vec![inputs[1].clone()]);
    assert!(again.interesting.is_empty());
}

#[test]
fn test_triage_prefers_reported_fingerprint() {
    let inputs = vec![
        ByteStream::from_slices(&[b"a"]),
        ByteStream::from_slices(&[b"b"]),
    ];
    let rounds = vec![
        Round {
            replies:     vec![vec![get()], vec![get()]],
            fingerprint: Some(Fingerprint(7)),
        },
        Round {
            replies:     vec![vec![resp("404")], vec![resp("404")]],
            fingerprint: Some(Fingerprint(7)),
        },
    ];
    let mut seen = HashSet::new();
    let outcome = triage_generation(&inputs, &rounds, &services(2), &mut seen);
    assert_eq!(outcome.interesting, vec![inputs[0].clone()]);
    assert_eq!(seen, HashSet::from([Fingerprint(7)]));
}

#[test]
fn test_fingerprint_ignores_header_order() {
    let a = vec![vec![req("GET", "/", &[("A", "1"), ("B", "2")])]];
    let b = vec![vec![req("GET", "/", &[("b", "2"), ("a", "1")])]];
    let c = vec![vec![req("GET", "/", &[("A", "2")])]];
    assert_eq!(Fingerprint::of_replies(&a), Fingerprint::of_replies(&b));
    assert_ne!(Fingerprint::of_replies(&a), Fingerprint::of_replies(&c));
    assert_eq!(Fingerprint::of(b"x".as_slice()), Fingerprint::of(b"x".as_slice()));
}

#![allow(dead_code)]
//! In-process stand-ins for real targets.
//!
//! A fake origin parses what it receives with the crate's own parser and
//! either reflects each request as JSON or rejects it. A fake transducer
//! forwards each request it reads and reports the forwarded bytes on an
//! echo side channel in the same line format real deployments use.

use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use http_differ::h1::{parse_request, parse_request_stream, HttpRequest, ParseError};
use http_differ::reflect::reflection_json;
use http_differ::Service;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;

pub const PREFACE: &[u8] = b"PRI * HTTP/2.0\r\n\r\nSM\r\n\r\n";

/// Decides what a fake origin answers: `None` reflects the request,
/// `Some(code)` rejects it and closes the connection.
pub type Policy = Arc<dyn Fn(&HttpRequest) -> Option<u16> + Send + Sync>;

pub fn accept_all() -> Policy {
    Arc::new(|_| None)
}

/// Rejects every method but GET with 405
pub fn get_only() -> Policy {
    Arc::new(|req| (req.method != b"GET").then_some(405))
}

async fn listen() -> (TcpListener, u16) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    (listener, port)
}

fn reason(code: u16) -> &'static str {
    http::StatusCode::from_u16(code)
        .ok()
        .and_then(|s| s.canonical_reason())
        .unwrap_or("Unknown")
}

fn rejection(code: u16) -> Vec<u8> {
    format!(
        "HTTP/1.1 {code} {}\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
        reason(code)
    )
    .into_bytes()
}

fn reflection(req: &HttpRequest) -> Vec<u8> {
    let body = reflection_json(req);
    let mut out = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    out.extend_from_slice(&body);
    out
}

/// Start a fake origin; returns a service descriptor pointing at it.
pub async fn spawn_origin(name: &str, policy: Policy) -> Service {
    let (listener, port) = listen().await;
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve_origin(socket, Arc::clone(&policy)));
        }
    });
    Service::origin(name, "127.0.0.1", port)
}

async fn serve_origin(mut socket: TcpStream, policy: Policy) {
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        pending.extend_from_slice(&chunk[..n]);

        while !pending.is_empty() {
            match parse_request(&pending) {
                Ok((req, rest)) => {
                    let rest = rest.to_vec();
                    let verdict = if req.is_valid() { policy(&req) } else { Some(400) };
                    match verdict {
                        None => {
                            if socket.write_all(&reflection(&req)).await.is_err() {
                                return;
                            }
                        },
                        Some(code) => {
                            let _ = socket.write_all(&rejection(code)).await;
                            return;
                        },
                    }
                    pending = rest;
                },
                Err(ParseError::NoHeaderTerminator) => break,
                Err(_) => {
                    let _ = socket.write_all(&rejection(400)).await;
                    return;
                },
            }
        }
    }
}

/// Start a target that answers any data with one byte every `interval`,
/// forever, so it never goes quiet.
pub async fn spawn_drip(name: &str, interval: std::time::Duration) -> Service {
    let (listener, port) = listen().await;
    tokio::spawn(async move {
        while let Ok((mut socket, _)) = listener.accept().await {
            tokio::spawn(async move {
                let mut chunk = [0u8; 1024];
                if !matches!(socket.read(&mut chunk).await, Ok(n) if n > 0) {
                    return;
                }
                while socket.write_all(b"x").await.is_ok() {
                    tokio::time::sleep(interval).await;
                }
            });
        }
    });
    Service::origin(name, "127.0.0.1", port)
}

/// Start a fake transducer that forwards every request it parses after
/// passing it through `rewrite`, and answers each with an empty 200.
pub async fn spawn_transducer(
    name: &str,
    rewrite: impl Fn(HttpRequest) -> HttpRequest + Send + Sync + 'static,
) -> Service {
    let (listener, port) = listen().await;
    let (echo_listener, echo_port) = listen().await;
    let (records, forwarded) = mpsc::unbounded_channel::<Vec<u8>>();
    let rewrite = Arc::new(rewrite);

    tokio::spawn(serve_echo(echo_listener, forwarded));
    tokio::spawn(async move {
        while let Ok((socket, _)) = listener.accept().await {
            tokio::spawn(serve_transducer(socket, Arc::clone(&rewrite), records.clone()));
        }
    });

    let mut service = Service::transducer(name, "127.0.0.1", port);
    service.echo_port = Some(echo_port);
    service
}

async fn serve_transducer<F>(mut socket: TcpStream, rewrite: Arc<F>, records: mpsc::UnboundedSender<Vec<u8>>)
where
    F: Fn(HttpRequest) -> HttpRequest + Send + Sync,
{
    let mut pending: Vec<u8> = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = match socket.read(&mut chunk).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        pending.extend_from_slice(&chunk[..n]);

        let (requests, rest) = parse_request_stream(&pending);
        let rest = rest.to_vec();
        for req in requests {
            let _ = records.send(rewrite(req).to_bytes());
            let ok = b"HTTP/1.1 200 OK\r\nContent-Length: 0\r\n\r\n";
            if socket.write_all(ok).await.is_err() {
                return;
            }
        }
        pending = rest;
    }
}

/// Writes each forwarded record to the most recently connected reader.
async fn serve_echo(listener: TcpListener, mut forwarded: mpsc::UnboundedReceiver<Vec<u8>>) {
    let mut reader: Option<TcpStream> = None;
    loop {
        tokio::select! {
            biased;
            accepted = listener.accept() => match accepted {
                Ok((socket, _)) => reader = Some(socket),
                Err(_) => return,
            },
            record = forwarded.recv() => {
                let Some(record) = record else { return };
                if let Some(socket) = reader.as_mut() {
                    let line = format!(
                        "{}:{}:{}\n",
                        STANDARD.encode("127.0.0.1"),
                        STANDARD.encode("8080"),
                        STANDARD.encode(&record)
                    );
                    let _ = socket.write_all(line.as_bytes()).await;
                }
            },
        }
    }
}

/// Connection preface, an empty SETTINGS frame, and one request on stream 1
/// with END_STREAM set.
pub fn h2_request_stream(headers: &[(&str, &str)]) -> Vec<Vec<u8>> {
    let mut encoder = h2wire::hpack::Encoder::default();
    let block = encoder.encode(headers);
    vec![
        PREFACE.to_vec(),
        build_frame(0x4, 0x0, 0, &[]),
        build_frame(0x1, 0x1 | 0x4, 1, &block),
    ]
}

pub fn build_frame(frame_type: u8, flags: u8, stream_id: u32, payload: &[u8]) -> Vec<u8> {
    let len = payload.len() as u32;
    let mut frame = Vec::with_capacity(9 + payload.len());
    frame.extend_from_slice(&len.to_be_bytes()[1..]);
    frame.push(frame_type);
    frame.push(flags);
    frame.extend_from_slice(&(stream_id & 0x7FFF_FFFF).to_be_bytes());
    frame.extend_from_slice(payload);
    frame
}

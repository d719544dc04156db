//! Sending one stream to every target at once

use std::future::Future;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, warn};

use crate::config::FanoutConfig;
use crate::message::HttpMessage;
use crate::stream::ByteStream;
use crate::target::{RoundtripError, Service};

/// Parsed replies of every service to `stream`, in `services` order.
///
/// A service that could not be reached contributes an empty list, which
/// the classifier treats as silence.
pub async fn fanout(
    stream: &ByteStream,
    services: &[Service],
    config: &FanoutConfig,
) -> Vec<Vec<HttpMessage>> {
    run_all(stream, services, config, |service, stream, config| async move {
        service.parsed_roundtrip(&stream, &config).await
    })
    .await
}

/// Raw replies of every service to `stream`, in `services` order.
pub async fn unparsed_fanout(
    stream: &ByteStream,
    services: &[Service],
    config: &FanoutConfig,
) -> Vec<Vec<Bytes>> {
    run_all(stream, services, config, |service, stream, config| async move {
        service.unparsed_roundtrip(&stream, &config).await
    })
    .await
}

/// One task per service, at most `config.max_workers` in flight. Each task
/// owns its connection; nothing is shared between them but the permit pool.
async fn run_all<T, F, Fut>(
    stream: &ByteStream,
    services: &[Service],
    config: &FanoutConfig,
    roundtrip: F,
) -> Vec<Vec<T>>
where
    T: Send + 'static,
    F: Fn(Service, ByteStream, Arc<FanoutConfig>) -> Fut,
    Fut: Future<Output = Result<Vec<T>, RoundtripError>> + Send + 'static,
{
    let permits = Arc::new(Semaphore::new(config.max_workers.max(1)));
    let config = Arc::new(config.clone());
    let mut tasks = JoinSet::new();

    for (index, service) in services.iter().enumerate() {
        let permits = Arc::clone(&permits);
        let name = service.name.clone();
        let call = roundtrip(service.clone(), stream.clone(), Arc::clone(&config));
        tasks.spawn(async move {
            // The pool is never closed, so acquiring cannot fail
            let _permit = permits.acquire_owned().await.ok();
            (index, name, call.await)
        });
    }

    let mut results: Vec<Vec<T>> = services.iter().map(|_| Vec::new()).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, _, Ok(replies))) => results[index] = replies,
            Ok((_, name, Err(e))) => debug!(service = %name, error = %e, "no reply"),
            Err(e) => warn!(error = %e, "roundtrip task failed"),
        }
    }
    results
}

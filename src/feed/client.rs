//! Self-healing event feed client.
//!
//! The client owns a single background worker that holds the push
//! connection, publishes the latest decoded event to a watch channel, and
//! reconnects after a fixed delay when the transport fails.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::StreamExt;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::feed::event::FeedEvent;
use crate::feed::transport::{FeedTransport, SseTransport, TransportError};
use crate::retry::ReconnectPolicy;

/// Default push endpoint of the records service.
pub const FEED_ENDPOINT: &str = "http://localhost:5001/events";

/// Construction options for [`FeedClient`].
#[derive(Clone, Debug)]
pub struct FeedClientOptions {
    /// Push endpoint to connect to.
    pub endpoint: String,
    /// Policy driving the reconnect loop.
    pub reconnect: ReconnectPolicy,
}

impl Default for FeedClientOptions {
    fn default() -> Self {
        Self {
            endpoint: FEED_ENDPOINT.to_string(),
            reconnect: ReconnectPolicy::default(),
        }
    }
}

/// Errors produced while constructing a feed client.
///
/// A running feed never returns errors to consumers; transport and decode
/// failures are logged and recovered internally.
#[derive(Debug, Error)]
pub enum FeedClientError {
    /// Underlying HTTP client could not be built.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

struct FeedClientInner {
    endpoint: String,
    reconnect: ReconnectPolicy,
    transport: Arc<dyn FeedTransport>,
    active: AtomicBool,
    latest: watch::Sender<Option<FeedEvent>>,
}

/// Handle to the process-wide event feed.
///
/// Construct one instance at the application's composition root and clone
/// the handle into every consumer; all clones share the same connection
/// guard and latest-event channel, so at most one physical connection
/// exists no matter how many consumers activate the feed.
#[derive(Clone)]
pub struct FeedClient {
    inner: Arc<FeedClientInner>,
}

impl FeedClient {
    /// Creates a client for the default endpoint.
    pub fn new() -> Result<Self, FeedClientError> {
        Self::with_options(FeedClientOptions::default())
    }

    /// Creates a client with explicit options.
    pub fn with_options(options: FeedClientOptions) -> Result<Self, FeedClientError> {
        let transport = SseTransport::new()?;
        Ok(Self::with_transport(Arc::new(transport), options))
    }

    /// Creates a client over a custom transport.
    pub fn with_transport(transport: Arc<dyn FeedTransport>, options: FeedClientOptions) -> Self {
        let (latest, _) = watch::channel(None);
        Self {
            inner: Arc::new(FeedClientInner {
                endpoint: options.endpoint,
                reconnect: options.reconnect,
                transport,
                active: AtomicBool::new(false),
                latest,
            }),
        }
    }

    /// Ensures the feed is connected.
    ///
    /// The first call spawns the worker that opens the push connection.
    /// While that worker owns the connection guard, further calls are
    /// logged no-ops. Returns immediately; connection establishment is
    /// asynchronous.
    ///
    /// Must be called from within a tokio runtime.
    pub fn activate(&self) {
        if self.inner.active.swap(true, Ordering::SeqCst) {
            info!(event = "feed_already_active");
            return;
        }
        info!(event = "feed_activate", endpoint = %self.inner.endpoint);
        tokio::spawn(feed_worker(Arc::clone(&self.inner)));
    }

    /// Returns the most recently received event, if any.
    ///
    /// Never blocks. For live updates, use [`FeedClient::subscribe`]
    /// rather than polling this accessor.
    pub fn latest(&self) -> Option<FeedEvent> {
        self.inner.latest.borrow().clone()
    }

    /// Subscribes to latest-event changes.
    ///
    /// The receiver observes every replacement, including arrivals whose
    /// payload is identical to the previous one.
    pub fn subscribe(&self) -> watch::Receiver<Option<FeedEvent>> {
        self.inner.latest.subscribe()
    }

    /// Does **not** disconnect the feed.
    ///
    /// The connection is shared process-wide; closing it here would cut
    /// off every other consumer, so this entry point only logs and
    /// returns. It exists to give integrations a symmetric
    /// activate/deactivate pair.
    pub fn deactivate(&self) {
        warn!(
            event = "feed_deactivate_ignored",
            "deactivate() is a no-op; the shared feed connection stays open"
        );
    }
}

enum SessionEnd {
    /// Transport failed before any connection was established.
    NeverConnected,
    /// An established connection was lost.
    Dropped,
}

async fn feed_worker(inner: Arc<FeedClientInner>) {
    let mut failures = 0usize;
    loop {
        match run_feed_session(&inner).await {
            SessionEnd::NeverConnected => failures += 1,
            SessionEnd::Dropped => failures = 0,
        }
        // The frame stream is gone; clear the guard so the delayed retry
        // (or an impatient caller) may reconnect.
        inner.active.store(false, Ordering::SeqCst);

        if inner.reconnect.exhausted(failures) {
            warn!(event = "feed_retries_exhausted", failures);
            return;
        }

        debug!(
            event = "feed_reconnect_scheduled",
            delay_ms = inner.reconnect.delay.as_millis() as u64
        );
        tokio::time::sleep(inner.reconnect.delay).await;

        // Re-enter through the same guard as activate(): if a caller
        // re-activated during the delay window, that worker owns the
        // connection and this retry is suppressed as a duplicate.
        if inner.active.swap(true, Ordering::SeqCst) {
            debug!(event = "feed_already_active");
            return;
        }
    }
}

async fn run_feed_session(inner: &FeedClientInner) -> SessionEnd {
    let mut frames = match inner.transport.open(&inner.endpoint).await {
        Ok(frames) => frames,
        Err(error) => {
            warn!(event = "feed_connect_failed", error = %error);
            return SessionEnd::NeverConnected;
        }
    };
    info!(event = "feed_connected", endpoint = %inner.endpoint);

    while let Some(item) = frames.next().await {
        match item {
            Ok(raw) => match FeedEvent::decode(&raw) {
                Ok(event) => {
                    inner.latest.send_replace(Some(event));
                }
                // Malformed payloads are discarded; they never tear the
                // connection down.
                Err(error) => warn!(event = "feed_decode_failed", error = %error),
            },
            Err(error) => {
                warn!(event = "feed_transport_error", error = %error);
                return SessionEnd::Dropped;
            }
        }
    }
    warn!(event = "feed_stream_ended");
    SessionEnd::Dropped
}

//! Latest-event value published by the feed client.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

/// Global receipt counter; gives every decoded event a distinct ordinal.
static RECEIPT_SEQ: AtomicU64 = AtomicU64::new(0);

/// The most recently received, successfully decoded feed payload.
///
/// `seq` and `received_at_ms` are attached by the client at receipt time,
/// never taken from the server. Two events decoded from byte-identical
/// payloads therefore still compare unequal, so consumers that detect
/// changes by comparing whole values observe every arrival.
#[derive(Clone, Debug, PartialEq)]
pub struct FeedEvent {
    /// Decoded message payload.
    pub payload: Value,
    /// Process-wide receipt ordinal, strictly increasing per decoded event.
    pub seq: u64,
    /// Wall-clock receipt time in milliseconds since the Unix epoch.
    pub received_at_ms: u64,
}

impl FeedEvent {
    /// Decodes a raw frame payload, stamping receipt metadata on success.
    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        let payload = serde_json::from_str(raw)?;
        Ok(Self {
            payload,
            seq: RECEIPT_SEQ.fetch_add(1, Ordering::Relaxed) + 1,
            received_at_ms: now_ms(),
        })
    }

    /// Returns a top-level field of an object payload.
    pub fn field(&self, name: &str) -> Option<&Value> {
        self.payload.get(name)
    }
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

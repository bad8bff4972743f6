//! User-facing Rust SDK for the mail records service.
//!
//! The crate is organized by transport surface:
//! - `api`: HTTP client for the records REST endpoints.
//! - `feed`: self-healing server-push event feed client.
//! - `retry`: retry policies shared across the SDK.

/// Records REST client and request/response types.
pub mod api;
/// Realtime event feed client, event value, and transport seam.
pub mod feed;
/// Retry policies used across the SDK.
pub mod retry;

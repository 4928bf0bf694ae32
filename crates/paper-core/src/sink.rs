//! The emission capability consumed by agents.
//!
//! A sink fuses transport delivery with accumulation for final persistence.
//! Implementations must never block the caller on a slow or disconnected
//! client; delivery degrades silently.

use async_trait::async_trait;

use crate::card::JsonBlock;

#[async_trait]
pub trait StreamSink: Send + Sync {
    /// One streaming content fragment.
    async fn token(&self, text: &str);

    /// One structured event.
    async fn card(&self, block: JsonBlock);

    /// Role of the message currently being accumulated (default `assistant`).
    async fn set_role(&self, role: &str);

    /// End-of-message; triggers the persistence path where applicable.
    async fn finalize(&self);
}

/// Sink that drops everything. Used where an agent runs without a live
/// transport (tests, title generation).
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

#[async_trait]
impl StreamSink for NullSink {
    async fn token(&self, _text: &str) {}
    async fn card(&self, _block: JsonBlock) {}
    async fn set_role(&self, _role: &str) {}
    async fn finalize(&self) {}
}

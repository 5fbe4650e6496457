use async_trait::async_trait;
use serde_json::Value;

use crate::error::Result;

/// One way of providing the virtual microphone. The manager picks a
/// strategy per start and tears it down from persisted state, so
/// implementations must encode everything stop() needs into the payload
/// start() returns.
#[async_trait]
pub trait AudioBackend: Send + Sync {
    /// Whether this backend's runtime prerequisites are reachable.
    async fn ready(&self) -> bool;

    /// Remove modules leaked by a previous run. Returns removed ids.
    async fn cleanup_stale(&self) -> Vec<u32> {
        Vec::new()
    }

    /// Bring the virtual microphone up; the returned payload is
    /// persisted as recovery state.
    async fn start(&self) -> Result<Value>;

    /// Best-effort teardown from persisted state; never fails.
    async fn stop(&self, state: &Value);
}

use async_trait::async_trait;

use crate::key_flow::KeyFlow;
use crate::offset::Timestamp;
use crate::record::Record;

/// A key's view of "now", plus whatever wall-clock/watermark/offset
/// timers it has registered against it.
///
/// This is a model, not a scheduler: implementations must not spawn
/// background tasks of their own (spec §9 design notes). The partition
/// flow drives every call explicitly from its own `currentTimestamp`.
#[async_trait]
pub trait Timers<R: Record>: Send + Sync {
    /// Advances this key's view of "now" to `timestamp`. Monotone: calls
    /// with a timestamp that does not advance the key's clock are
    /// ignored by a correct implementation. A failure here is fatal to
    /// the enclosing `apply` call (spec §4.4).
    async fn set(&self, timestamp: Timestamp) -> anyhow::Result<()>;

    /// Notifies the key that a batch just finished being applied, so it
    /// may snapshot/persist.
    async fn on_processed(&self) -> anyhow::Result<()>;

    /// Evaluates any timers due at-or-before the key's current
    /// timestamp, invoking `flow` with a synthetic empty batch for each
    /// one that requires it.
    async fn trigger(&self, flow: &(dyn KeyFlow<R> + Send + Sync)) -> anyhow::Result<()>;
}

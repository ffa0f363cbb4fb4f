use async_trait::async_trait;

use crate::record::Record;

/// The user-supplied fold applied to one key's records.
///
/// Grounded on the `MessageProcessor` trait exercised in
/// `kafka-deduplicator`'s `tests/consumer_error_recovery_tests.rs`
/// (`async fn process_message(&self, message: AckableMessage) -> Result<()>`):
/// an `async_trait` with a single `&self` entry point returning
/// `anyhow::Result`, so implementors reach for interior mutability
/// (a `Mutex`/`RwLock` around their own state) rather than requiring `&mut
/// self` through the cache's `Arc`.
///
/// `records` is guaranteed non-empty and in strictly increasing offset
/// order for this key (spec invariant I4); `Timers::trigger` calls this
/// same trait with an empty synthetic batch, which is the one place the
/// "non-empty" guarantee is the caller's to honor rather than the type's.
#[async_trait]
pub trait KeyFlow<R: Record>: Send + Sync {
    /// Apply a non-empty, ordered batch of records for this key. Must use
    /// `context.hold`/`context.release` to participate in commit
    /// arbitration, and `context.remove_self` to drop out of the cache.
    ///
    /// Takes borrowed records rather than an owned slice: a batch is
    /// grouped out of a larger, non-contiguous input slice, so per-key
    /// records can't be handed over as one contiguous `&[R]`.
    async fn apply(&self, records: &[&R]) -> anyhow::Result<()>;
}

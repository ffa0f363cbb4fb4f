use async_trait::async_trait;
use futures::stream::BoxStream;

use crate::key_context::KeyContext;
use crate::key_flow::KeyFlow;
use crate::offset::{Timestamp, TopicPartition};
use crate::record::Record;
use crate::timers::Timers;

/// The `{flow, timers}` pair `KeyStateOf` produces for one key.
pub struct KeyState<R: Record> {
    pub flow: Box<dyn KeyFlow<R>>,
    pub timers: Box<dyn Timers<R>>,
}

impl<R: Record> KeyState<R> {
    pub fn new(flow: Box<dyn KeyFlow<R>>, timers: Box<dyn Timers<R>>) -> Self {
        Self { flow, timers }
    }
}

/// Factory that builds per-key state, and enumerates keys to recover for
/// a partition. May perform I/O (e.g. loading a snapshot/journal) — the
/// only collaborator contract in this crate that is allowed to.
#[async_trait]
pub trait KeyStateOf<R: Record>: Send + Sync {
    /// Constructs state for `key`. `created_at` is the timestamp this key
    /// is considered to have come into existence: the partition's
    /// `assignedAt` offset during recovery, or the batch timestamp that
    /// first mentioned the key otherwise.
    async fn build(
        &self,
        key: &R::Key,
        created_at: Timestamp,
        context: KeyContext,
    ) -> anyhow::Result<KeyState<R>>;

    /// Enumerates the keys to recover for `topic_partition`. A finite,
    /// lazily-pulled stream — drivable from a database cursor or an
    /// in-memory list alike; iteration order is irrelevant.
    fn all_keys(&self, topic_partition: &TopicPartition) -> BoxStream<'_, R::Key>;
}

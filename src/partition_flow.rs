use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use tracing::{debug, info};

use crate::cache::LoadingCache;
use crate::clock::Clock;
use crate::config::PartitionFlowConfig;
use crate::error::PartitionFlowError;
use crate::key_context::{KeyContext, RemoveSelf};
use crate::key_flow::KeyFlow;
use crate::key_state::KeyStateOf;
use crate::offset::{offset_to_commit, Offset, Timestamp, TopicPartition};
use crate::record::Record;

/// Invariant bundle for one key while it lives in the cache (spec §3).
/// Never shared across partitions; created on first demand, destroyed
/// when the key removes itself via `context`.
struct PartitionKey<R: Record> {
    state: crate::key_state::KeyState<R>,
    context: KeyContext,
}

/// The concurrency-and-offset coordination engine: C8 in spec §4.4.
///
/// Owns a bounded, lazily-populated per-key cache (C6), fans batches out
/// to keys in parallel while preserving per-key order (I4), arbitrates a
/// commit watermark from per-key holds, and drives each key's timers in
/// lock-step with incoming batches.
///
/// Two `apply` calls on the same `PartitionFlow` are never issued
/// concurrently by the host — the partition is single-consumer — and the
/// implementation relies on that; it does, however, tolerate concurrent
/// *readers* (`committed_offset`, `current_timestamp`) from other tasks.
pub struct PartitionFlow<R, S>
where
    R: Record,
    S: KeyStateOf<R>,
{
    topic_partition: TopicPartition,
    key_state_of: Arc<S>,
    cache: LoadingCache<R::Key, PartitionKey<R>>,
    committed_offset: AtomicU64,
    current_timestamp: Mutex<Timestamp>,
    clock: Arc<dyn Clock>,
    config: PartitionFlowConfig,
}

impl<R, S> PartitionFlow<R, S>
where
    R: Record + 'static,
    S: KeyStateOf<R> + 'static,
{
    /// Constructs a `PartitionFlow` and runs recovery: every key
    /// `key_state_of.all_keys` yields for `topic_partition` is
    /// materialized into the cache before this call returns, sequentially
    /// (spec §4.4 "Recovery is sequential per partition").
    pub async fn new(
        topic_partition: TopicPartition,
        assigned_at: Offset,
        key_state_of: Arc<S>,
        clock: Arc<dyn Clock>,
        config: PartitionFlowConfig,
    ) -> Result<Self, PartitionFlowError> {
        let now = clock.now();
        let cache_topic = topic_partition.topic.clone();
        let cache_partition = topic_partition.partition.to_string();
        let cache = LoadingCache::with_release_hook(move |_, _| {
            metrics::counter!(
                "partition_flow_cache_removals_total",
                "topic" => cache_topic.clone(),
                "partition" => cache_partition.clone(),
            )
            .increment(1);
        });
        let flow = Self {
            topic_partition,
            key_state_of,
            cache,
            committed_offset: AtomicU64::new(assigned_at.get()),
            current_timestamp: Mutex::new(Timestamp::new(now, None, assigned_at)),
            clock,
            config,
        };

        flow.recover(assigned_at).await?;
        Ok(flow)
    }

    async fn recover(&self, assigned_at: Offset) -> Result<(), PartitionFlowError> {
        let created_at = Timestamp::new(self.clock.now(), None, assigned_at);
        let mut keys = self.key_state_of.all_keys(&self.topic_partition);
        let mut recovered = 0usize;
        while let Some(key) = keys.next().await {
            self.fetch_or_build(key, created_at).await?;
            recovered += 1;
        }
        info!(
            partition = %self.topic_partition,
            recovered,
            "partition recovery complete"
        );
        Ok(())
    }

    /// `apply(records)`: returns `Some(o)` when `o` is newly safe to
    /// commit. Runs processRecords (only if non-empty), then
    /// triggerTimers, then offsetToCommit, in that order (spec §4.4).
    ///
    /// Cancellation (spec §5): none of the phases above write
    /// `currentTimestamp` or `committedOffset` directly. They thread a
    /// candidate `Timestamp` through as a return value, and
    /// `offset_to_commit_phase` commits it — together with any
    /// `committedOffset` advance — in a single synchronous, non-`await`
    /// block at the very end. Dropping this future at any point before
    /// that block runs leaves both fields exactly as they were on entry.
    pub async fn apply(&self, records: &[R]) -> Result<Option<Offset>, PartitionFlowError> {
        let batch_timestamp = if !records.is_empty() {
            Some(self.process_records(records).await?)
        } else {
            None
        };

        let tick_clock = self.clock.now();
        let mut candidate = batch_timestamp.unwrap_or_else(|| self.current_timestamp());
        candidate.clock = tick_clock;

        self.trigger_timers(candidate).await?;
        self.offset_to_commit_phase(candidate).await
    }

    /// The committed offset as of the last successful `apply` (or
    /// `assignedAt` if none has run yet). Safe to call concurrently with
    /// `apply`.
    pub fn committed_offset(&self) -> Offset {
        Offset::new(self.committed_offset.load(Ordering::Acquire))
    }

    /// The engine's current `Timestamp`. Safe to call concurrently with
    /// `apply`.
    pub fn current_timestamp(&self) -> Timestamp {
        *self.current_timestamp.lock().unwrap()
    }

    /// Releases every live `PartitionKey` and marks the cache closed.
    /// Consumes `self`: a `PartitionFlow` is a scoped resource (spec §5).
    pub async fn shutdown(self) {
        self.cache.close().await;
    }

    /// Returns the candidate `currentTimestamp` for this batch without
    /// writing it anywhere — the caller (`apply`) decides when, or
    /// whether, it becomes visible (see the cancellation note on `apply`).
    async fn process_records(&self, records: &[R]) -> Result<Timestamp, PartitionFlowError> {
        let batch_clock = self.clock.now();

        let mut order: Vec<R::Key> = Vec::new();
        let mut groups: HashMap<R::Key, Vec<&R>> = HashMap::new();
        for record in records {
            if let Some(key) = record.key() {
                groups
                    .entry(key.clone())
                    .or_insert_with(|| {
                        order.push(key.clone());
                        Vec::new()
                    })
                    .push(record);
            }
        }

        if order.is_empty() {
            // All records unkeyed: treated as empty for fan-out, but
            // there is no representative record to attribute a new
            // `currentTimestamp` to (spec §4.4 edge cases) — the current
            // value carries forward unchanged.
            debug!("batch contained no keyed records");
            return Ok(self.current_timestamp());
        }

        let max_concurrent_keys = self.config.max_concurrent_keys;
        let results: Vec<Result<(), PartitionFlowError>> = stream::iter(order.into_iter().map(
            |key| {
                let key_records = groups
                    .remove(&key)
                    .expect("every ordered key has a non-empty group");
                self.process_key(key, batch_clock, key_records)
            },
        ))
        .buffer_unordered(max_concurrent_keys)
        .collect()
        .await;

        for result in results {
            result?;
        }

        let last = records.last().expect("records is non-empty here");
        let next_offset = offset_to_commit(last.offset())?;
        Ok(Timestamp::new(batch_clock, last.watermark(), next_offset))
    }

    async fn process_key(
        &self,
        key: R::Key,
        batch_clock: DateTime<Utc>,
        records: Vec<&R>,
    ) -> Result<(), PartitionFlowError> {
        let head = records.first().expect("key group is non-empty");
        let batch_at = Timestamp::new(batch_clock, head.watermark(), head.offset());

        let partition_key = self.fetch_or_build(key, batch_at).await?;

        partition_key
            .state
            .timers
            .set(batch_at)
            .await
            .map_err(PartitionFlowError::FlowFailure)?;
        partition_key
            .state
            .flow
            .apply(&records)
            .await
            .map_err(PartitionFlowError::FlowFailure)?;
        partition_key
            .state
            .timers
            .on_processed()
            .await
            .map_err(PartitionFlowError::FlowFailure)?;

        Ok(())
    }

    async fn trigger_timers(&self, current: Timestamp) -> Result<(), PartitionFlowError> {
        let entries = self.cache.values().await;
        let max_concurrent_keys = self.config.max_concurrent_keys;
        let results: Vec<Result<(), PartitionFlowError>> = stream::iter(entries.into_iter().map(
            |(_, partition_key)| async move {
                partition_key
                    .state
                    .timers
                    .set(current)
                    .await
                    .map_err(PartitionFlowError::FlowFailure)?;
                partition_key
                    .state
                    .timers
                    .trigger(partition_key.state.flow.as_ref())
                    .await
                    .map_err(PartitionFlowError::FlowFailure)
            },
        ))
        .buffer_unordered(max_concurrent_keys)
        .collect()
        .await;

        for result in results {
            result?;
        }
        Ok(())
    }

    async fn offset_to_commit_phase(
        &self,
        candidate: Timestamp,
    ) -> Result<Option<Offset>, PartitionFlowError> {
        let entries = self.cache.values().await;
        let min_hold = entries
            .iter()
            .filter_map(|(_, partition_key)| partition_key.context.current_hold())
            .min();

        let allowed = min_hold.unwrap_or(candidate.offset);
        let committed = self.committed_offset();

        metrics::gauge!(
            "partition_flow_cache_size",
            "topic" => self.topic_partition.topic.clone(),
            "partition" => self.topic_partition.partition.to_string(),
        )
        .set(entries.len() as f64);

        // All-or-nothing commit step (spec §5): everything above this
        // point only reads state or awaits; from here to the end of this
        // function nothing is awaited, so once entered this block always
        // runs to completion regardless of whether the caller's future is
        // later dropped.
        *self.current_timestamp.lock().unwrap() = candidate;

        if allowed > committed {
            self.committed_offset.store(allowed.get(), Ordering::Release);
            info!(
                partition = %self.topic_partition,
                from = %committed,
                to = %allowed,
                "commit offset advanced"
            );
            metrics::counter!(
                "partition_flow_commit_advances_total",
                "topic" => self.topic_partition.topic.clone(),
                "partition" => self.topic_partition.partition.to_string(),
            )
            .increment(1);
            metrics::gauge!(
                "partition_flow_committed_offset",
                "topic" => self.topic_partition.topic.clone(),
                "partition" => self.topic_partition.partition.to_string(),
            )
            .set(allowed.get() as f64);
            Ok(Some(allowed))
        } else {
            Ok(None)
        }
    }

    async fn fetch_or_build(
        &self,
        key: R::Key,
        created_at: Timestamp,
    ) -> Result<Arc<PartitionKey<R>>, PartitionFlowError> {
        let cache = self.cache.clone();
        let key_state_of = self.key_state_of.clone();
        let key_for_remove = key.clone();
        let key_for_build = key.clone();
        let cache_topic = self.topic_partition.topic.clone();
        let cache_partition = self.topic_partition.partition.to_string();

        self.cache
            .get_or_create(key, move || async move {
                let remove_self: RemoveSelf = Arc::new(move || {
                    let cache = cache.clone();
                    let key = key_for_remove.clone();
                    Box::pin(async move {
                        cache.remove(&key).await;
                    })
                });
                let context = KeyContext::new(remove_self);
                let state = key_state_of
                    .build(&key_for_build, created_at, context.clone())
                    .await?;
                metrics::counter!(
                    "partition_flow_cache_builds_total",
                    "topic" => cache_topic,
                    "partition" => cache_partition,
                )
                .increment(1);
                Ok(PartitionKey { state, context })
            })
            .await
            .map_err(PartitionFlowError::from)
    }
}

use thiserror::Error;

/// Errors surfaced by the cache's loading machinery.
///
/// Grounded on the `RecvErr`/`OffsetErr` pair in
/// `common/kafka/src/kafka_consumer.rs`: a small `thiserror` enum per
/// collaborator, propagated rather than swallowed.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("key construction failed: {0}")]
    BuildFailed(#[source] anyhow::Error),

    #[error("cache has been closed")]
    Closed,
}

/// Errors the core recognizes, per spec §7.
///
/// No variant here is ever recovered internally: a `BuildFailure` clears
/// the cache slot so the *next* batch may retry, but the current `apply`
/// call still fails. Everything else is fatal to the partition.
#[derive(Error, Debug)]
pub enum PartitionFlowError {
    #[error("key state construction failed: {0}")]
    BuildFailure(#[source] anyhow::Error),

    #[error("a key flow or timer callback failed: {0}")]
    FlowFailure(#[source] anyhow::Error),

    #[error("offset overflowed while computing the next offset to commit")]
    OffsetOverflow,

    #[error("cache access after shutdown")]
    CacheClosed,
}

impl From<CacheError> for PartitionFlowError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::BuildFailed(e) => PartitionFlowError::BuildFailure(e),
            CacheError::Closed => PartitionFlowError::CacheClosed,
        }
    }
}

//! Concurrency-and-offset coordination engine for keyed stream processing
//! over a partitioned log.
//!
//! [`PartitionFlow`] owns a single partition's worth of per-key state,
//! fans batches out to keys with bounded concurrency while preserving
//! per-key ordering, and arbitrates a commit watermark from the holds
//! each key raises against it. It is deliberately silent on broker I/O,
//! serialization, and persistence — those are the host's job, wired in
//! through the [`Record`], [`KeyStateOf`], [`KeyFlow`], and [`Timers`]
//! traits.

pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod journal;
pub mod key_context;
pub mod key_flow;
pub mod key_state;
pub mod offset;
pub mod partition_flow;
pub mod record;
pub mod timers;

pub use cache::LoadingCache;
pub use clock::{Clock, SystemClock};
pub use config::PartitionFlowConfig;
pub use error::{CacheError, PartitionFlowError};
pub use journal::{fold, KafkaSnapshot, Sequenced};
pub use key_context::KeyContext;
pub use key_flow::KeyFlow;
pub use key_state::{KeyState, KeyStateOf};
pub use offset::{offset_to_commit, Offset, Timestamp, TopicPartition};
pub use partition_flow::PartitionFlow;
pub use record::Record;
pub use timers::Timers;

/// In-process tuning knobs for a `PartitionFlow`.
///
/// Unlike the teacher's `KafkaConfig`/`ConsumerConfig` (`common/kafka/src/config.rs`),
/// this is a plain struct with no `envconfig::Envconfig` derive: spec §6 is
/// explicit that the core owns no CLI and no environment variables — that
/// is the host's concern, not this crate's. What the core does need is a
/// knob for how wide its per-key fan-out may run.
#[derive(Debug, Clone)]
pub struct PartitionFlowConfig {
    /// Maximum number of keys processed concurrently during a batch's
    /// `processRecords` and `triggerTimers` phases. Defaults to the
    /// number of available CPUs, the same default the teacher's
    /// `kafka-deduplicator` reaches for via its `num_cpus` dependency.
    pub max_concurrent_keys: usize,
}

impl Default for PartitionFlowConfig {
    fn default() -> Self {
        Self {
            max_concurrent_keys: num_cpus::get().max(1),
        }
    }
}

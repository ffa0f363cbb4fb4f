use crate::offset::Offset;

/// `{offset, value}` summary of a key's journal at a point in time.
/// Monotone in both the offset and the sequence number `value` carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KafkaSnapshot<V> {
    pub offset: Offset,
    pub value: V,
}

/// A sequence number a snapshot's value carries, independent of the
/// record offset it was read at — used for deduplication when offsets
/// alone can't tell two deliveries of "the same" update apart.
pub trait Sequenced {
    fn seq(&self) -> i64;
}

/// Folds one record into a snapshot, following the dedup table in spec
/// §4.3:
///
/// | prior             | new record (offset o, seq s)        | result            |
/// |-------------------|--------------------------------------|-------------------|
/// | `None`             | valid                                 | `Some({o, v})`    |
/// | `Some({o', v'})`    | `o <= o'`                              | unchanged         |
/// | `Some({o', v'})`    | `o > o'`, `s <= v'.seq()`              | unchanged         |
/// | `Some({o', v'})`    | `o > o'`, `s > v'.seq()`               | `Some({o, v})`    |
///
/// `extract` returns `Ok(None)` for a record with no parseable sequence
/// range — left unchanged, not an error. A failure of `extract` itself
/// propagates.
pub fn fold<Rec, V, E>(
    previous: Option<KafkaSnapshot<V>>,
    record: &Rec,
    offset: Offset,
    extract: impl FnOnce(&Rec) -> Result<Option<(i64, V)>, E>,
) -> Result<Option<KafkaSnapshot<V>>, E>
where
    V: Sequenced,
{
    let Some((seq, value)) = extract(record)? else {
        return Ok(previous);
    };

    match previous {
        None => Ok(Some(KafkaSnapshot { offset, value })),
        Some(prior) if offset <= prior.offset => Ok(Some(prior)),
        Some(prior) if seq <= prior.value.seq() => Ok(Some(prior)),
        Some(_) => Ok(Some(KafkaSnapshot { offset, value })),
    }
}

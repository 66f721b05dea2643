//! Proptest generators for property-based testing.

use proptest::prelude::*;

use weft_core::{
    Blake3Hash, Entry, FieldValue, Keypair, KnowledgeVector, LogKey, Mutation, Op, PublicKey,
};

/// Generate a random keypair.
pub fn keypair() -> impl Strategy<Value = Keypair> {
    any::<[u8; 32]>().prop_map(|seed| Keypair::from_seed(&seed))
}

/// Generate a random public key.
pub fn public_key() -> impl Strategy<Value = PublicKey> {
    keypair().prop_map(|kp| kp.public_key())
}

/// Generate a random Blake3Hash.
pub fn blake3_hash() -> impl Strategy<Value = Blake3Hash> {
    any::<[u8; 32]>().prop_map(Blake3Hash)
}

/// Generate payload bytes of specified max length.
pub fn payload(max_len: usize) -> impl Strategy<Value = Vec<u8>> {
    prop::collection::vec(any::<u8>(), 0..=max_len)
}

/// One of a handful of log keys, so generated vectors overlap.
pub fn log_key() -> impl Strategy<Value = LogKey> {
    (0u8..8).prop_map(|b| LogKey::from([b; 32]))
}

pub fn knowledge_vector() -> impl Strategy<Value = KnowledgeVector> {
    prop::collection::vec((log_key(), 0u64..64), 0..8).prop_map(|pairs| pairs.into_iter().collect())
}

pub fn field_value() -> impl Strategy<Value = FieldValue> {
    prop_oneof![
        Just(FieldValue::Null),
        any::<bool>().prop_map(FieldValue::Bool),
        any::<i64>().prop_map(FieldValue::Int),
        "[a-z ]{0,16}".prop_map(FieldValue::Text),
        payload(16).prop_map(FieldValue::from),
    ]
}

/// Ops over a small set of objects and fields, so writes collide.
pub fn op() -> impl Strategy<Value = Op> {
    let object = (0u8..4).prop_map(|n| format!("obj-{}", n));
    let field = (0u8..3).prop_map(|n| format!("f{}", n));
    prop_oneof![
        4 => (object.clone(), field.clone(), field_value())
            .prop_map(|(o, f, v)| Op::put(o, f, v)),
        1 => (object, field).prop_map(|(o, f)| Op::delete(o, f)),
    ]
}

pub fn mutation() -> impl Strategy<Value = Mutation> {
    (0u64..32, prop::collection::vec(op(), 1..4)).prop_map(|(lamport, ops)| Mutation::new(lamport, ops))
}

/// Consecutive signed entries for one log.
pub fn log_entries(max_len: usize) -> impl Strategy<Value = Vec<Entry>> {
    (keypair(), prop::collection::vec(payload(64), 0..=max_len)).prop_map(|(kp, payloads)| {
        payloads
            .into_iter()
            .enumerate()
            .map(|(i, p)| Entry::sign(&kp, i as u64, p))
            .collect()
    })
}

/// A write by one of `peers` replicas.
#[derive(Debug, Clone)]
pub struct ScheduledWrite {
    pub peer: usize,
    pub ops: Vec<Op>,
}

/// A sequence of writes spread across replicas.
#[derive(Debug, Clone)]
pub struct WriteSchedule {
    pub peers: usize,
    pub writes: Vec<ScheduledWrite>,
}

impl Arbitrary for WriteSchedule {
    type Parameters = ();
    type Strategy = BoxedStrategy<Self>;

    fn arbitrary_with(_: Self::Parameters) -> Self::Strategy {
        (2usize..=3)
            .prop_flat_map(|peers| {
                let write = (0..peers, prop::collection::vec(op(), 1..3))
                    .prop_map(|(peer, ops)| ScheduledWrite { peer, ops });
                (Just(peers), prop::collection::vec(write, 1..12))
            })
            .prop_map(|(peers, writes)| WriteSchedule { peers, writes })
            .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weft_core::EntryPayload;

    proptest! {
        #[test]
        fn test_generated_entries_verify(entries in log_entries(8)) {
            for (i, entry) in entries.iter().enumerate() {
                prop_assert_eq!(entry.index, i as u64);
                prop_assert!(entry.verify().is_ok());
            }
        }

        #[test]
        fn test_entry_encoding_stable(entries in log_entries(4)) {
            for entry in entries {
                let bytes = entry.to_bytes();
                prop_assert_eq!(Entry::from_bytes(&bytes).unwrap().id(), entry.id());
            }
        }

        #[test]
        fn test_mutation_payload_decodes(m in mutation()) {
            let bytes = EntryPayload::Mutation(m.clone()).to_bytes().unwrap();
            prop_assert_eq!(EntryPayload::from_bytes(&bytes).unwrap(), EntryPayload::Mutation(m));
        }

        #[test]
        fn test_merge_dominates_both(a in knowledge_vector(), b in knowledge_vector()) {
            let merged = a.merged(&b);
            prop_assert!(merged.dominates(&a));
            prop_assert!(merged.dominates(&b));
            prop_assert!(a.diff(&merged).iter().all(|r| !r.is_empty()));
        }

        #[test]
        fn test_schedule_targets_known_peers(schedule: WriteSchedule) {
            prop_assert!(schedule.writes.iter().all(|w| w.peer < schedule.peers));
        }
    }
}

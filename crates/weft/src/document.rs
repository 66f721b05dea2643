//! The materialized document.
//!
//! A document is a map of objects to fields, each field a last-writer-wins
//! register. Every write carries a [`Stamp`], and a register only moves to a
//! greater stamp. Stamps are unique per op and totally ordered, so the merge
//! is commutative, associative and idempotent: any delivery order of the same
//! mutations yields the same document.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use weft_core::{FieldValue, LogKey, Mutation, Op};

/// Position of one op in the global write order.
///
/// Ordered by Lamport clock first. The authoring log, the entry index and
/// the op's position within the mutation break ties, so no two ops compare
/// equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Stamp {
    pub lamport: u64,
    pub author: LogKey,
    pub index: u64,
    pub op: u32,
}

/// A last-writer-wins register. `None` is a deleted field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Register {
    pub value: Option<FieldValue>,
    pub stamp: Stamp,
}

/// A field whose visible value changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub object: String,
    pub field: String,
    /// New value, `None` once deleted.
    pub value: Option<FieldValue>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    objects: BTreeMap<String, BTreeMap<String, Register>>,
    max_lamport: u64,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    /// Merge a mutation from entry `index` of `author`'s log.
    ///
    /// Returns the fields whose register moved. Applying the same mutation
    /// again returns nothing.
    pub fn apply(&mut self, author: LogKey, index: u64, mutation: &Mutation) -> Vec<FieldChange> {
        self.max_lamport = self.max_lamport.max(mutation.lamport);

        let mut changes = Vec::new();
        for (ordinal, op) in mutation.ops.iter().enumerate() {
            let stamp = Stamp {
                lamport: mutation.lamport,
                author,
                index,
                op: ordinal as u32,
            };
            let (object, field) = op.target();
            let value = match op {
                Op::Put { value, .. } => Some(value.clone()),
                Op::Delete { .. } => None,
            };
            if self.merge(object, field, value.clone(), stamp) {
                changes.push(FieldChange {
                    object: object.to_owned(),
                    field: field.to_owned(),
                    value,
                });
            }
        }
        changes
    }

    fn merge(&mut self, object: &str, field: &str, value: Option<FieldValue>, stamp: Stamp) -> bool {
        let fields = self.objects.entry(object.to_owned()).or_default();
        match fields.get_mut(field) {
            Some(register) if register.stamp >= stamp => false,
            Some(register) => {
                *register = Register { value, stamp };
                true
            }
            None => {
                fields.insert(field.to_owned(), Register { value, stamp });
                true
            }
        }
    }

    /// Current value of a field. Deleted and unknown fields read as `None`.
    pub fn get(&self, object: &str, field: &str) -> Option<&FieldValue> {
        self.register(object, field)?.value.as_ref()
    }

    pub fn register(&self, object: &str, field: &str) -> Option<&Register> {
        self.objects.get(object)?.get(field)
    }

    /// Live fields of an object, in field order.
    pub fn fields<'a>(&'a self, object: &str) -> impl Iterator<Item = (&'a str, &'a FieldValue)> + 'a {
        self.objects
            .get(object)
            .into_iter()
            .flat_map(|fields| fields.iter())
            .filter_map(|(name, register)| Some((name.as_str(), register.value.as_ref()?)))
    }

    /// Objects with at least one live field.
    pub fn objects(&self) -> impl Iterator<Item = &str> {
        self.objects
            .iter()
            .filter(|(_, fields)| fields.values().any(|r| r.value.is_some()))
            .map(|(name, _)| name.as_str())
    }

    /// Number of live fields across all objects.
    pub fn len(&self) -> usize {
        self.objects
            .values()
            .flat_map(|fields| fields.values())
            .filter(|r| r.value.is_some())
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Highest Lamport clock merged so far.
    pub fn max_lamport(&self) -> u64 {
        self.max_lamport
    }
}

//! Typed entry payloads.
//!
//! Entry payloads are opaque bytes at the log level. They are decoded exactly
//! once, into [`EntryPayload`], when the materializer picks an entry up.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::credential::Credential;
use crate::error::CoreError;

/// Everything a log entry can carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryPayload {
    /// A document change.
    Mutation(Mutation),
    /// An authorization grant carried in-band.
    Credential(Credential),
}

impl EntryPayload {
    pub fn to_bytes(&self) -> Result<Vec<u8>, CoreError> {
        let mut buf = Vec::new();
        ciborium::into_writer(self, &mut buf)
            .map_err(|e| CoreError::EncodingError(e.to_string()))?;
        Ok(buf)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CoreError> {
        ciborium::from_reader(bytes).map_err(|e| CoreError::MalformedPayload(e.to_string()))
    }
}

impl From<Mutation> for EntryPayload {
    fn from(m: Mutation) -> Self {
        EntryPayload::Mutation(m)
    }
}

impl From<Credential> for EntryPayload {
    fn from(c: Credential) -> Self {
        EntryPayload::Credential(c)
    }
}

/// A batch of field operations stamped with a Lamport clock.
///
/// The proposer picks `lamport` greater than any clock it has observed, which
/// makes causally later writes win over what they saw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mutation {
    pub lamport: u64,
    pub ops: Vec<Op>,
}

impl Mutation {
    pub fn new(lamport: u64, ops: Vec<Op>) -> Self {
        Self { lamport, ops }
    }
}

/// A single field operation on a named object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    Put {
        object: String,
        field: String,
        value: FieldValue,
    },
    Delete {
        object: String,
        field: String,
    },
}

impl Op {
    pub fn put(object: impl Into<String>, field: impl Into<String>, value: impl Into<FieldValue>) -> Self {
        Op::Put {
            object: object.into(),
            field: field.into(),
            value: value.into(),
        }
    }

    pub fn delete(object: impl Into<String>, field: impl Into<String>) -> Self {
        Op::Delete {
            object: object.into(),
            field: field.into(),
        }
    }

    pub fn target(&self) -> (&str, &str) {
        match self {
            Op::Put { object, field, .. } | Op::Delete { object, field } => (object, field),
        }
    }
}

/// Scalar field values.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Int(i64),
    Text(String),
    Bytes(Bytes),
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        FieldValue::Bool(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Text(v.to_owned())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Text(v)
    }
}

impl From<Vec<u8>> for FieldValue {
    fn from(v: Vec<u8>) -> Self {
        FieldValue::Bytes(v.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::credential::Capability;
    use crate::crypto::Keypair;

    #[test]
    fn test_mutation_payload_decodes() {
        let payload = EntryPayload::Mutation(Mutation::new(
            4,
            vec![
                Op::put("task-1", "title", "write tests"),
                Op::put("task-1", "done", false),
                Op::delete("task-0", "title"),
            ],
        ));
        let bytes = payload.to_bytes().unwrap();
        assert_eq!(EntryPayload::from_bytes(&bytes).unwrap(), payload);
    }

    #[test]
    fn test_credential_payload_decodes() {
        let genesis = Keypair::from_seed(&[9; 32]);
        let cred = Credential::issue(&genesis, Keypair::generate().public_key(), Capability::Write, None);
        let bytes = EntryPayload::from(cred.clone()).to_bytes().unwrap();
        match EntryPayload::from_bytes(&bytes).unwrap() {
            EntryPayload::Credential(decoded) => {
                assert_eq!(decoded, cred);
                decoded.verify_signature().unwrap();
            }
            other => panic!("expected credential, got {:?}", other),
        }
    }

    #[test]
    fn test_garbage_is_malformed() {
        assert!(matches!(
            EntryPayload::from_bytes(b"\xff\x00not cbor"),
            Err(CoreError::MalformedPayload(_))
        ));
    }

    #[test]
    fn test_op_target() {
        assert_eq!(Op::put("a", "b", 1i64).target(), ("a", "b"));
        assert_eq!(Op::delete("c", "d").target(), ("c", "d"));
    }
}

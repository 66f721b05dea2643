//! Canonical CBOR encoding for deterministic serialization.
//!
//! Implements RFC 8949 core deterministic encoding for the structures that are
//! signed or hashed:
//! - Map keys sorted by encoded byte comparison
//! - Integers use smallest valid encoding
//! - Definite lengths only
//!
//! The same entry always produces identical bytes on every platform, so
//! signatures and entry ids are stable across peers.

use bytes::Bytes;
use ciborium::value::{Integer, Value};

use crate::credential::{Capability, Credential};
use crate::crypto::{PublicKey, Signature};
use crate::entry::Entry;
use crate::error::CoreError;
use crate::types::{CredentialId, LogKey};

const ENTRY_DOMAIN: &str = "weft-entry-v1";
const CREDENTIAL_DOMAIN: &str = "weft-credential-v1";

/// Integer map keys. Keys 0-23 encode as single bytes.
mod keys {
    pub const DOMAIN: u64 = 0;

    pub const LOG_KEY: u64 = 1;
    pub const INDEX: u64 = 2;
    pub const PAYLOAD: u64 = 3;
    pub const SIGNATURE: u64 = 4;

    pub const ISSUER: u64 = 1;
    pub const SUBJECT: u64 = 2;
    pub const CAPABILITY: u64 = 3;
    pub const PARENT: u64 = 4;
    pub const CREDENTIAL_SIGNATURE: u64 = 5;
}

fn int(n: u64) -> Value {
    Value::Integer(n.into())
}

fn entry_fields(log_key: &LogKey, index: u64, payload: &[u8]) -> Vec<(Value, Value)> {
    vec![
        (int(keys::LOG_KEY), Value::Bytes(log_key.0.to_vec())),
        (int(keys::INDEX), int(index)),
        (int(keys::PAYLOAD), Value::Bytes(payload.to_vec())),
    ]
}

/// The message an entry signature covers.
pub fn entry_signing_bytes(log_key: &LogKey, index: u64, payload: &[u8]) -> Vec<u8> {
    let mut fields = entry_fields(log_key, index, payload);
    fields.push((int(keys::DOMAIN), Value::Text(ENTRY_DOMAIN.into())));
    encode_canonical(&Value::Map(fields))
}

/// Encode a full entry (signature included) for storage and hashing.
pub fn encode_entry(entry: &Entry) -> Vec<u8> {
    let mut fields = entry_fields(&entry.log_key, entry.index, &entry.payload);
    fields.push((int(keys::SIGNATURE), Value::Bytes(entry.signature.0.to_vec())));
    encode_canonical(&Value::Map(fields))
}

/// Decode an entry produced by [`encode_entry`].
///
/// Non-canonical input is rejected so that every accepted entry has exactly
/// one byte representation.
pub fn decode_entry(bytes: &[u8]) -> Result<Entry, CoreError> {
    let value: Value =
        ciborium::from_reader(bytes).map_err(|e| CoreError::DecodingError(e.to_string()))?;
    let map = as_map(&value).ok_or_else(|| CoreError::MalformedEntry("expected map".into()))?;
    if map.len() != 4 {
        return Err(CoreError::MalformedEntry(format!(
            "expected 4 fields, got {}",
            map.len()
        )));
    }

    let log_key = fixed_bytes::<32>(map, keys::LOG_KEY)
        .map(PublicKey)
        .ok_or_else(|| CoreError::MalformedEntry("invalid log key".into()))?;
    let index = uint(map, keys::INDEX)
        .ok_or_else(|| CoreError::MalformedEntry("invalid index".into()))?;
    let payload = match map_get(map, keys::PAYLOAD) {
        Some(Value::Bytes(b)) => Bytes::copy_from_slice(b),
        _ => return Err(CoreError::MalformedEntry("invalid payload".into())),
    };
    let signature = fixed_bytes::<64>(map, keys::SIGNATURE)
        .map(Signature)
        .ok_or_else(|| CoreError::MalformedEntry("invalid signature".into()))?;

    let entry = Entry {
        log_key,
        index,
        payload,
        signature,
    };

    if encode_entry(&entry) != bytes {
        return Err(CoreError::MalformedEntry("non-canonical encoding".into()));
    }
    Ok(entry)
}

fn credential_fields(
    issuer: &PublicKey,
    subject: &PublicKey,
    capability: Capability,
    parent: Option<&CredentialId>,
) -> Vec<(Value, Value)> {
    let parent = match parent {
        Some(id) => Value::Bytes(id.0.to_vec()),
        None => Value::Null,
    };
    vec![
        (int(keys::ISSUER), Value::Bytes(issuer.0.to_vec())),
        (int(keys::SUBJECT), Value::Bytes(subject.0.to_vec())),
        (int(keys::CAPABILITY), int(capability.to_u8().into())),
        (int(keys::PARENT), parent),
    ]
}

/// The message a credential signature covers.
pub fn credential_signing_bytes(
    issuer: &PublicKey,
    subject: &PublicKey,
    capability: Capability,
    parent: Option<&CredentialId>,
) -> Vec<u8> {
    let mut fields = credential_fields(issuer, subject, capability, parent);
    fields.push((int(keys::DOMAIN), Value::Text(CREDENTIAL_DOMAIN.into())));
    encode_canonical(&Value::Map(fields))
}

/// Canonical bytes of a whole credential; hashed to form its id.
pub fn credential_bytes(credential: &Credential) -> Vec<u8> {
    let mut fields = credential_fields(
        &credential.issuer,
        &credential.subject,
        credential.capability,
        credential.parent.as_ref(),
    );
    fields.push((
        int(keys::CREDENTIAL_SIGNATURE),
        Value::Bytes(credential.signature.0.to_vec()),
    ));
    encode_canonical(&Value::Map(fields))
}

fn as_map(value: &Value) -> Option<&[(Value, Value)]> {
    match value {
        Value::Map(m) => Some(m.as_slice()),
        _ => None,
    }
}

fn map_get(map: &[(Value, Value)], key: u64) -> Option<&Value> {
    map.iter()
        .find(|(k, _)| matches!(k, Value::Integer(i) if u64::try_from(*i) == Ok(key)))
        .map(|(_, v)| v)
}

fn uint(map: &[(Value, Value)], key: u64) -> Option<u64> {
    match map_get(map, key) {
        Some(Value::Integer(i)) => u64::try_from(*i).ok(),
        _ => None,
    }
}

fn fixed_bytes<const N: usize>(map: &[(Value, Value)], key: u64) -> Option<[u8; N]> {
    match map_get(map, key) {
        Some(Value::Bytes(b)) => b.as_slice().try_into().ok(),
        _ => None,
    }
}

/// Encode a CBOR value to canonical bytes.
pub fn encode_canonical(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_value_to(&mut buf, value);
    buf
}

fn encode_value_to(buf: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Integer(i) => encode_integer(buf, *i),
        Value::Bytes(b) => {
            encode_uint(buf, 2, b.len() as u64);
            buf.extend_from_slice(b);
        }
        Value::Text(s) => {
            encode_uint(buf, 3, s.len() as u64);
            buf.extend_from_slice(s.as_bytes());
        }
        Value::Array(arr) => {
            encode_uint(buf, 4, arr.len() as u64);
            for item in arr {
                encode_value_to(buf, item);
            }
        }
        Value::Map(entries) => encode_map_canonical(buf, entries),
        Value::Tag(tag, inner) => {
            encode_uint(buf, 6, *tag);
            encode_value_to(buf, inner);
        }
        Value::Bool(b) => buf.push(if *b { 0xf5 } else { 0xf4 }),
        Value::Float(f) => {
            buf.push(0xfb);
            buf.extend_from_slice(&f.to_be_bytes());
        }
        // Null, plus any variant this module never produces.
        _ => buf.push(0xf6),
    }
}

/// Major types 0 and 1.
fn encode_integer(buf: &mut Vec<u8>, i: Integer) {
    let n: i128 = i.into();
    if n >= 0 {
        encode_uint(buf, 0, n as u64);
    } else {
        // CBOR encodes -1 as 0, -2 as 1, etc.
        encode_uint(buf, 1, (-1 - n) as u64);
    }
}

fn encode_uint(buf: &mut Vec<u8>, major: u8, n: u64) {
    let mt = major << 5;
    if n < 24 {
        buf.push(mt | (n as u8));
    } else if n <= 0xff {
        buf.push(mt | 24);
        buf.push(n as u8);
    } else if n <= 0xffff {
        buf.push(mt | 25);
        buf.extend_from_slice(&(n as u16).to_be_bytes());
    } else if n <= 0xffff_ffff {
        buf.push(mt | 26);
        buf.extend_from_slice(&(n as u32).to_be_bytes());
    } else {
        buf.push(mt | 27);
        buf.extend_from_slice(&n.to_be_bytes());
    }
}

/// Keys are sorted by their encoded bytes.
fn encode_map_canonical(buf: &mut Vec<u8>, entries: &[(Value, Value)]) {
    let mut pairs: Vec<(Vec<u8>, &Value)> = entries
        .iter()
        .map(|(k, v)| (encode_canonical(k), v))
        .collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    encode_uint(buf, 5, pairs.len() as u64);
    for (key_bytes, value) in pairs {
        buf.extend_from_slice(&key_bytes);
        encode_value_to(buf, value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Keypair;

    #[test]
    fn test_small_integers_single_byte() {
        assert_eq!(encode_canonical(&int(0)), vec![0x00]);
        assert_eq!(encode_canonical(&int(23)), vec![0x17]);
        assert_eq!(encode_canonical(&int(24)), vec![0x18, 24]);
        assert_eq!(encode_canonical(&int(256)), vec![0x19, 0x01, 0x00]);
        assert_eq!(encode_canonical(&Value::Integer((-1i64).into())), vec![0x20]);
    }

    #[test]
    fn test_map_keys_sorted() {
        let a = Value::Map(vec![(int(2), int(0)), (int(1), int(0))]);
        let b = Value::Map(vec![(int(1), int(0)), (int(2), int(0))]);
        assert_eq!(encode_canonical(&a), encode_canonical(&b));
        assert_eq!(encode_canonical(&a), vec![0xa2, 0x01, 0x00, 0x02, 0x00]);
    }

    #[test]
    fn test_entry_decode_inverts_encode() {
        let kp = Keypair::from_seed(&[0x42; 32]);
        let entry = Entry::sign(&kp, 7, b"payload".to_vec());
        let bytes = encode_entry(&entry);
        let decoded = decode_entry(&bytes).unwrap();
        assert_eq!(decoded, entry);
    }

    #[test]
    fn test_decode_rejects_trailing_garbage() {
        let kp = Keypair::from_seed(&[0x42; 32]);
        let mut bytes = encode_entry(&Entry::sign(&kp, 0, b"x".to_vec()));
        bytes.push(0x00);
        assert!(decode_entry(&bytes).is_err());
    }

    #[test]
    fn test_decode_rejects_non_map() {
        let bytes = encode_canonical(&Value::Array(vec![]));
        assert!(matches!(
            decode_entry(&bytes),
            Err(CoreError::MalformedEntry(_))
        ));
    }

    #[test]
    fn test_signing_bytes_are_domain_separated() {
        let kp = Keypair::from_seed(&[1; 32]);
        let entry_msg = entry_signing_bytes(&kp.public_key(), 0, b"");
        let cred_msg =
            credential_signing_bytes(&kp.public_key(), &kp.public_key(), Capability::Write, None);
        assert_ne!(entry_msg, cred_msg);
    }
}

//! Entry validation at the ingestion boundary.

use crate::entry::Entry;
use crate::error::ValidationError;
use crate::types::LogKey;

/// Maximum payload size accepted from a peer.
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Outcome of a successful check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryCheck {
    /// The entry is the next one the log expects.
    Next,
    /// The log already holds this index; ingesting is a no-op.
    Duplicate,
}

/// Validate an entry for ingestion into `expected_log` whose next free index
/// is `next_index`.
///
/// The signature is checked before the index, so a forged entry is always
/// reported as a signature failure regardless of its position.
pub fn validate_entry(
    entry: &Entry,
    expected_log: &LogKey,
    next_index: u64,
) -> Result<EntryCheck, ValidationError> {
    // 1. Right log
    if &entry.log_key != expected_log {
        return Err(ValidationError::LogMismatch {
            expected: *expected_log,
            got: entry.log_key,
        });
    }

    // 2. Size bound
    if entry.payload.len() > MAX_PAYLOAD_BYTES {
        return Err(ValidationError::StructuralError(format!(
            "payload of {} bytes exceeds limit",
            entry.payload.len()
        )));
    }

    // 3. Signature
    entry
        .verify()
        .map_err(|_| ValidationError::SignatureFailed)?;

    // 4. Position
    match entry.index.cmp(&next_index) {
        std::cmp::Ordering::Less => Ok(EntryCheck::Duplicate),
        std::cmp::Ordering::Equal => Ok(EntryCheck::Next),
        std::cmp::Ordering::Greater => Err(ValidationError::SequenceGap {
            expected: next_index,
            got: entry.index,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{Keypair, Signature};

    fn entry(index: u64) -> (Keypair, Entry) {
        let kp = Keypair::from_seed(&[0x42; 32]);
        let e = Entry::sign(&kp, index, format!("payload {}", index).into_bytes());
        (kp, e)
    }

    #[test]
    fn test_next_index_accepted() {
        let (kp, e) = entry(2);
        assert_eq!(validate_entry(&e, &kp.public_key(), 2).unwrap(), EntryCheck::Next);
    }

    #[test]
    fn test_old_index_is_duplicate() {
        let (kp, e) = entry(1);
        assert_eq!(
            validate_entry(&e, &kp.public_key(), 5).unwrap(),
            EntryCheck::Duplicate
        );
    }

    #[test]
    fn test_future_index_is_gap() {
        let (kp, e) = entry(4);
        assert!(matches!(
            validate_entry(&e, &kp.public_key(), 2),
            Err(ValidationError::SequenceGap { expected: 2, got: 4 })
        ));
    }

    #[test]
    fn test_bad_signature_wins_over_position() {
        let (kp, mut e) = entry(9);
        e.signature = Signature::ZERO;
        assert!(matches!(
            validate_entry(&e, &kp.public_key(), 2),
            Err(ValidationError::SignatureFailed)
        ));
    }

    #[test]
    fn test_wrong_log_rejected() {
        let (_, e) = entry(0);
        let other = Keypair::from_seed(&[1; 32]).public_key();
        assert!(matches!(
            validate_entry(&e, &other, 0),
            Err(ValidationError::LogMismatch { .. })
        ));
    }
}

//! Frame encoding for [`SyncMessage`]s.

use bytes::Bytes;

use crate::error::{Result, SyncError};
use crate::messages::{limits, SyncMessage};

/// Encode a message into one frame.
pub fn encode(message: &SyncMessage) -> Result<Bytes> {
    message
        .validate_limits()
        .map_err(|e| SyncError::InvalidMessage(e.into()))?;

    let mut buf = Vec::new();
    ciborium::into_writer(message, &mut buf).map_err(|e| SyncError::Codec(e.to_string()))?;

    if buf.len() > limits::MAX_FRAME_BYTES {
        return Err(SyncError::Codec(format!(
            "frame of {} bytes exceeds limit",
            buf.len()
        )));
    }
    Ok(Bytes::from(buf))
}

/// Decode one frame.
pub fn decode(frame: &[u8]) -> Result<SyncMessage> {
    if frame.len() > limits::MAX_FRAME_BYTES {
        return Err(SyncError::Codec(format!(
            "frame of {} bytes exceeds limit",
            frame.len()
        )));
    }

    let message: SyncMessage =
        ciborium::from_reader(frame).map_err(|e| SyncError::Codec(e.to_string()))?;
    message
        .validate_limits()
        .map_err(|e| SyncError::InvalidMessage(e.into()))?;
    Ok(message)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::PROTOCOL_VERSION;
    use weft_core::{Entry, Keypair, KnowledgeVector};

    #[test]
    fn test_hello_round_trip() {
        let kp = Keypair::from_seed(&[7; 32]);
        let mut knowledge = KnowledgeVector::new();
        knowledge.advance(kp.public_key(), 3);

        let msg = SyncMessage::Hello {
            protocol_version: PROTOCOL_VERSION,
            peer_id: kp.public_key(),
            known_logs: vec![kp.public_key()],
            knowledge,
        };
        assert_eq!(decode(&encode(&msg).unwrap()).unwrap(), msg);
    }

    #[test]
    fn test_entries_keep_signatures() {
        let kp = Keypair::from_seed(&[7; 32]);
        let entry = Entry::sign(&kp, 0, &b"payload"[..]);
        let msg = SyncMessage::Entries {
            request_id: 9,
            log_key: kp.public_key(),
            entries: vec![entry],
            done: true,
        };

        match decode(&encode(&msg).unwrap()).unwrap() {
            SyncMessage::Entries { entries, .. } => assert!(entries[0].verify().is_ok()),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(matches!(decode(b"\xff\x00garbage"), Err(SyncError::Codec(_))));
    }
}

//! Key encoding for the processing-state index.
//!
//! Key format: `{STATE}:{event_id}`
//! - STATE: processing state code (UNPROC, READY, ...)
//! - event_id: 26-character ULID, so a prefix scan yields oldest events first

use indexer_types::{EventId, ProcessingState};

use crate::error::StorageError;

/// Entry in the state index
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateIndexKey {
    pub state: ProcessingState,
    pub event_id: EventId,
}

impl StateIndexKey {
    pub fn new(state: ProcessingState, event_id: EventId) -> Self {
        Self { state, event_id }
    }

    /// Encode key to bytes for storage
    pub fn to_bytes(&self) -> Vec<u8> {
        format!("{}:{}", self.state, self.event_id).into_bytes()
    }

    /// Decode key from bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, StorageError> {
        let s = std::str::from_utf8(bytes)
            .map_err(|e| StorageError::Key(format!("Invalid UTF-8: {}", e)))?;
        let (state, id) = s
            .split_once(':')
            .ok_or_else(|| StorageError::Key(format!("Invalid state key format: {}", s)))?;
        let state: ProcessingState = state
            .parse()
            .map_err(|e| StorageError::Key(format!("Invalid state in key {}: {}", s, e)))?;
        if id.is_empty() {
            return Err(StorageError::Key(format!("Missing event id in key: {}", s)));
        }
        Ok(Self::new(state, EventId::new(id)))
    }

    /// Prefix covering every event in a state
    pub fn state_prefix(state: ProcessingState) -> Vec<u8> {
        format!("{}:", state).into_bytes()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_key_roundtrip() {
        let id = EventId::new("01ARZ3NDEKTSV4RRFFQ69G5FAV");
        let key = StateIndexKey::new(ProcessingState::Ready, id);
        let bytes = key.to_bytes();
        assert_eq!(bytes, b"READY:01ARZ3NDEKTSV4RRFFQ69G5FAV");
        assert_eq!(StateIndexKey::from_bytes(&bytes).unwrap(), key);
    }

    #[test]
    fn test_state_prefix_does_not_overlap() {
        // no state code is a prefix of another
        let prefixes: Vec<Vec<u8>> = [
            ProcessingState::Unproc,
            ProcessingState::Ready,
            ProcessingState::Proc,
            ProcessingState::Indx,
            ProcessingState::Fail,
            ProcessingState::Unindx,
        ]
        .into_iter()
        .map(StateIndexKey::state_prefix)
        .collect();
        for a in &prefixes {
            for b in &prefixes {
                if a != b {
                    assert!(!b.starts_with(a));
                }
            }
        }
    }

    #[test]
    fn test_invalid_keys() {
        assert!(StateIndexKey::from_bytes(b"READY").is_err());
        assert!(StateIndexKey::from_bytes(b"DONE:abc").is_err());
        assert!(StateIndexKey::from_bytes(b"READY:").is_err());
    }
}

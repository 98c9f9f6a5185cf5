// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants::DEDUP_DICT_EVENT_ID;
use crate::dedup::DedupState;
use crate::errors::{Error, Result};
use crate::event::{EventEncoding, EventMeta, GenericEvent, PayloadType};
use crate::payload::encode_dedup_info;
use crate::time::now_or_default;
use fnv::FnvBuildHasher;
use hashbrown::HashMap;
use std::mem::size_of;
use std::sync::Arc;
use tracing::debug;

/// Collects the objects referenced by one batch and turns them into its dictionary event.
pub struct ActionDictBuilder {
    state: Arc<DedupState>,
    references: HashMap<u64, usize, FnvBuildHasher>,
    size_estimate: usize,
}

impl ActionDictBuilder {
    pub fn new(state: Arc<DedupState>) -> Self {
        Self {
            state,
            references: HashMap::with_hasher(FnvBuildHasher::default()),
            size_estimate: 0,
        }
    }

    pub fn add(&mut self, objects: &[u64]) -> Result<()> {
        for id in objects {
            if !self.references.contains_key(id) {
                let size = self
                    .state
                    .object_size(*id)
                    .ok_or_else(|| Error::Compression(format!("Object {id} not found")))?;
                self.size_estimate += size_of::<usize>() + size;
            }
            *self.references.entry(*id).or_insert(0) += 1;
        }
        Ok(())
    }

    /// Predicted compressed size of the dictionary event.
    pub fn size(&self) -> usize {
        (self.size_estimate as f32 * self.state.ewma_value()) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.references.is_empty()
    }

    /// Builds the dictionary event and releases this batch's references.
    pub fn finalize(self) -> Result<GenericEvent> {
        let references: Vec<(u64, usize)> = self.references.into_iter().collect();
        let values = self.state.get_all_values(&references)?;
        let ids: Vec<u64> = references.iter().map(|(id, _)| *id).collect();
        let slices: Vec<&[u8]> = values.iter().map(Vec::as_slice).collect();
        let mut payload = encode_dedup_info(&ids, &slices)?;

        self.state.remove_all_values(&references)?;

        let old_size = payload.len();
        self.state.compress(&mut payload)?;
        if old_size > 0 {
            self.state
                .update_ewma(payload.len() as f32 / old_size as f32);
        }
        debug!(
            "Built dictionary of {} objects, {} bytes compressed to {}",
            ids.len(),
            old_size,
            payload.len()
        );

        let client_time = now_or_default(self.state.time_provider());
        Ok(GenericEvent::new(
            EventMeta::new(DEDUP_DICT_EVENT_ID, client_time, 1.0),
            PayloadType::DedupInfo,
            payload,
            EventEncoding::Zstd,
            "",
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dedup::ZstdCompressor;
    use crate::payload::decode_dedup_info;
    use crate::time::{Timestamp, TimeProvider};

    struct FixedTime;

    impl TimeProvider for FixedTime {
        fn gmt_now(&self) -> Timestamp {
            Timestamp {
                year: 2024,
                ..Default::default()
            }
        }
    }

    #[test]
    fn test_finalize_spends_references() {
        let state = Arc::new(DedupState::new(ZstdCompressor::default(), Some(Arc::new(FixedTime))));
        let context = r#"{"_multi":[{"a":1},{"b":2}]}"#;
        let (_, first) = state.transform_payload_and_add_objects(context).unwrap();
        let (_, second) = state.transform_payload_and_add_objects(context).unwrap();
        assert_eq!(state.len(), 2);

        let mut builder = ActionDictBuilder::new(Arc::clone(&state));
        builder.add(&first).unwrap();
        builder.add(&second).unwrap();
        let expected = 2 * size_of::<usize>() + 7 + 7;
        assert_eq!(builder.size(), expected);

        let mut event = builder.finalize().unwrap();
        assert!(state.is_empty());
        assert_eq!(event.meta.id, DEDUP_DICT_EVENT_ID);
        assert_eq!(event.meta.client_time.year, 2024);
        assert_eq!(event.payload_type, PayloadType::DedupInfo);
        assert_eq!(event.encoding, EventEncoding::Zstd);
        let ratio = event.payload.len() as f32 / (8 + 2 * 8 + 2 * (8 + 7)) as f32;
        assert!((state.ewma_value() - (0.5 + 0.5 * ratio)).abs() < 1e-6);

        state.decompress(&mut event.payload).unwrap();
        let mut entries = decode_dedup_info(&event.payload).unwrap();
        entries.sort();
        let mut expected: Vec<(u64, Vec<u8>)> = vec![
            (first[0], br#"{"a":1}"#.to_vec()),
            (first[1], br#"{"b":2}"#.to_vec()),
        ];
        expected.sort();
        assert_eq!(entries, expected);
    }

    #[test]
    fn test_add_unknown_object_fails() {
        let state = Arc::new(DedupState::new(ZstdCompressor::default(), None));
        let mut builder = ActionDictBuilder::new(state);
        assert!(matches!(builder.add(&[42]), Err(Error::Compression(_))));
    }

    #[test]
    fn test_partial_references_survive() {
        let state = Arc::new(DedupState::new(ZstdCompressor::default(), None));
        let context = r#"{"_multi":[{"a":1}]}"#;
        let (_, first) = state.transform_payload_and_add_objects(context).unwrap();
        state.transform_payload_and_add_objects(context).unwrap();

        let mut builder = ActionDictBuilder::new(Arc::clone(&state));
        builder.add(&first).unwrap();
        let event = builder.finalize().unwrap();
        assert_eq!(event.meta.client_time, Timestamp::default());
        assert_eq!(state.len(), 1);
        assert_eq!(state.get_object(first[0]), br#"{"a":1}"#.to_vec());
    }
}

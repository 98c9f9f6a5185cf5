// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Content addressed store for repeated action features, plus payload compression.

use crate::constants;
use crate::errors::{Error, Result};
use crate::hash::uniform_hash;
use crate::time::TimeProvider;
use fnv::FnvBuildHasher;
use hashbrown::HashMap;
use serde::Deserialize;
use serde_json::value::RawValue;
use std::fmt::Write;
use std::ops::Range;
use std::sync::{Arc, Mutex, MutexGuard};
use zstd::zstd_safe;

#[derive(Debug)]
struct DictEntry {
    ref_count: usize,
    content: Vec<u8>,
}

/// Reference counted objects keyed by the hash of their bytes.
#[derive(Debug)]
pub struct DedupDict {
    entries: HashMap<u64, DictEntry, FnvBuildHasher>,
}

impl Default for DedupDict {
    fn default() -> Self {
        Self {
            entries: HashMap::with_hasher(FnvBuildHasher::default()),
        }
    }
}

impl DedupDict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_object(&mut self, content: &[u8]) -> u64 {
        let id = uniform_hash(content, 0);
        self.entries
            .entry(id)
            .and_modify(|entry| entry.ref_count += 1)
            .or_insert_with(|| DictEntry {
                ref_count: 1,
                content: content.to_vec(),
            });
        id
    }

    /// Releases up to `count` references. Returns false if `id` is unknown.
    pub fn remove_object(&mut self, id: u64, count: usize) -> bool {
        let Some(entry) = self.entries.get_mut(&id) else {
            return false;
        };
        entry.ref_count -= count.min(entry.ref_count);
        if entry.ref_count == 0 {
            self.entries.remove(&id);
        }
        true
    }

    /// Content of `id`, empty if unknown.
    pub fn get_object(&self, id: u64) -> &[u8] {
        self.entries
            .get(&id)
            .map(|entry| entry.content.as_slice())
            .unwrap_or_default()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.entries.contains_key(&id)
    }

    pub fn ref_count(&self, id: u64) -> usize {
        self.entries.get(&id).map_or(0, |entry| entry.ref_count)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Moves every action of the context into the dictionary and replaces it by a reference.
    pub fn transform_payload_and_add_objects(&mut self, context: &str) -> Result<(String, Vec<u64>)> {
        let ranges = action_ranges(context)?;
        let mut edited = String::with_capacity(context.len());
        let mut objects = Vec::with_capacity(ranges.len());
        let mut last = 0;

        for range in ranges {
            let id = self.add_object(&context.as_bytes()[range.clone()]);
            edited.push_str(&context[last..range.start]);
            // Writing to a String cannot fail.
            let _ = write!(edited, r#"{{"__aid":{id}}}"#);
            objects.push(id);
            last = range.end;
        }
        edited.push_str(&context[last..]);

        Ok((edited, objects))
    }
}

#[derive(Deserialize)]
struct ActionList<'a> {
    #[serde(rename = "_multi", borrow, default)]
    multi: Option<Vec<&'a RawValue>>,
}

/// Byte ranges of the elements of the top level `_multi` array.
pub fn action_ranges(context: &str) -> Result<Vec<Range<usize>>> {
    let list: ActionList<'_> =
        serde_json::from_str(context).map_err(|e| Error::JsonParse(e.to_string()))?;
    let actions = list.multi.unwrap_or_default();
    if actions.is_empty() {
        return Err(Error::JsonNoActionsFound);
    }

    let base = context.as_ptr() as usize;
    Ok(actions
        .iter()
        .map(|action| {
            let start = action.get().as_ptr() as usize - base;
            start..start + action.get().len()
        })
        .collect())
}

/// Exponentially weighted moving average.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Ewma {
    current: f32,
    weight: f32,
}

impl Default for Ewma {
    fn default() -> Self {
        Self::new(constants::EWMA_INITIAL_VALUE, constants::EWMA_WEIGHT)
    }
}

impl Ewma {
    pub fn new(initial: f32, weight: f32) -> Self {
        Self {
            current: initial,
            weight,
        }
    }

    pub fn update(&mut self, value: f32) {
        self.current = (1.0 - self.weight) * self.current + self.weight * value;
    }

    pub fn value(&self) -> f32 {
        self.current
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ZstdCompressor {
    level: i32,
}

impl Default for ZstdCompressor {
    fn default() -> Self {
        Self::new(constants::DEFAULT_ZSTD_COMPRESSION_LEVEL)
    }
}

impl ZstdCompressor {
    pub fn new(level: i32) -> Self {
        Self { level }
    }

    /// Replaces `buffer` with its compressed frame.
    pub fn compress(&self, buffer: &mut Vec<u8>) -> Result<()> {
        *buffer = zstd::bulk::compress(buffer.as_slice(), self.level)
            .map_err(|e| Error::Compression(e.to_string()))?;
        Ok(())
    }

    /// Replaces `buffer` with the content of its frame; the frame must record its size.
    pub fn decompress(&self, buffer: &mut Vec<u8>) -> Result<()> {
        let size = match zstd_safe::get_frame_content_size(buffer.as_slice()) {
            Ok(Some(size)) => size,
            Ok(None) => {
                return Err(Error::Compression("Unknown decompressed size".to_string()));
            }
            Err(_) => {
                return Err(Error::Compression("Invalid compressed frame".to_string()));
            }
        };
        let size = usize::try_from(size)
            .map_err(|_| Error::Compression(format!("Decompressed size {size} too large")))?;

        *buffer = zstd::bulk::decompress(buffer.as_slice(), size)
            .map_err(|e| Error::Compression(e.to_string()))?;
        Ok(())
    }
}

#[derive(Debug, Default)]
struct DedupInner {
    dict: DedupDict,
    ewma: Ewma,
}

/// Thread safe dictionary and estimator shared by the loggers of one pipeline.
pub struct DedupState {
    inner: Mutex<DedupInner>,
    compressor: ZstdCompressor,
    time_provider: Option<Arc<dyn TimeProvider>>,
}

impl DedupState {
    pub fn new(compressor: ZstdCompressor, time_provider: Option<Arc<dyn TimeProvider>>) -> Self {
        Self {
            inner: Mutex::new(DedupInner::default()),
            compressor,
            time_provider,
        }
    }

    #[allow(clippy::expect_used)]
    fn lock(&self) -> MutexGuard<'_, DedupInner> {
        self.inner.lock().expect("lock poisoned")
    }

    pub fn get_object(&self, id: u64) -> Vec<u8> {
        self.lock().dict.get_object(id).to_vec()
    }

    /// Size of `id`'s content, if present.
    pub fn object_size(&self, id: u64) -> Option<usize> {
        let inner = self.lock();
        inner
            .dict
            .contains(id)
            .then(|| inner.dict.get_object(id).len())
    }

    /// Content of every id; a missing id means a reference was released too early.
    pub fn get_all_values<'a>(&self, ids: impl IntoIterator<Item = &'a (u64, usize)>) -> Result<Vec<Vec<u8>>> {
        let inner = self.lock();
        ids.into_iter()
            .map(|(id, _)| {
                if inner.dict.contains(*id) {
                    Ok(inner.dict.get_object(*id).to_vec())
                } else {
                    Err(Error::Compression(format!("Object {id} not found")))
                }
            })
            .collect()
    }

    pub fn remove_all_values<'a>(&self, ids: impl IntoIterator<Item = &'a (u64, usize)>) -> Result<()> {
        let mut inner = self.lock();
        for (id, count) in ids {
            if !inner.dict.remove_object(*id, *count) {
                return Err(Error::Compression(format!("Object {id} could not be removed")));
            }
        }
        Ok(())
    }

    pub fn transform_payload_and_add_objects(&self, context: &str) -> Result<(String, Vec<u64>)> {
        self.lock().dict.transform_payload_and_add_objects(context)
    }

    pub fn update_ewma(&self, value: f32) {
        self.lock().ewma.update(value);
    }

    pub fn ewma_value(&self) -> f32 {
        self.lock().ewma.value()
    }

    pub fn compress(&self, buffer: &mut Vec<u8>) -> Result<()> {
        self.compressor.compress(buffer)
    }

    pub fn decompress(&self, buffer: &mut Vec<u8>) -> Result<()> {
        self.compressor.decompress(buffer)
    }

    pub fn time_provider(&self) -> Option<&dyn TimeProvider> {
        self.time_provider.as_deref()
    }

    pub fn len(&self) -> usize {
        self.lock().dict.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().dict.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_add_object_is_idempotent() {
        let mut dict = DedupDict::new();
        let first = dict.add_object(b"hello world");
        let second = dict.add_object(b"hello world");
        assert_eq!(first, second);
        assert_eq!(dict.len(), 1);
        assert_eq!(dict.ref_count(first), 2);

        assert!(dict.remove_object(first, 1));
        assert_eq!(dict.ref_count(first), 1);
        assert!(dict.remove_object(first, 1));
        assert!(!dict.contains(first));
        assert!(!dict.remove_object(first, 1));
    }

    #[test]
    fn test_remove_object_clamps_count() {
        let mut dict = DedupDict::new();
        let id = dict.add_object(b"abc");
        assert!(dict.remove_object(id, 10));
        assert!(dict.is_empty());
        assert!(dict.get_object(id).is_empty());
    }

    #[test]
    fn test_transform_payload() {
        let mut dict = DedupDict::new();
        let context = r#"{"GUser":{"id":"a"},"_multi":[{"TAction":{"a1":"f1"}},{"TAction":{"a2":"f2"}},{"TAction":{"a1":"f1"}}]}"#;
        let (edited, objects) = dict.transform_payload_and_add_objects(context).unwrap();

        assert_eq!(objects.len(), 3);
        assert_eq!(objects[0], objects[2]);
        assert_eq!(dict.len(), 2);
        assert_eq!(dict.ref_count(objects[0]), 2);
        assert_eq!(dict.get_object(objects[1]), br#"{"TAction":{"a2":"f2"}}"#);
        assert_eq!(
            edited,
            format!(
                r#"{{"GUser":{{"id":"a"}},"_multi":[{{"__aid":{}}},{{"__aid":{}}},{{"__aid":{}}}]}}"#,
                objects[0], objects[1], objects[2]
            )
        );
    }

    #[test]
    fn test_action_ranges_handles_whitespace() {
        let context = "{ \"_multi\" : [ {\"a\":1} ,\n {\"b\": [2]} ] }";
        let ranges = action_ranges(context).unwrap();
        assert_eq!(&context[ranges[0].clone()], "{\"a\":1}");
        assert_eq!(&context[ranges[1].clone()], "{\"b\": [2]}");
    }

    #[test]
    fn test_action_ranges_errors() {
        assert!(matches!(action_ranges("{\"_multi\":["), Err(Error::JsonParse(_))));
        assert!(matches!(action_ranges("{\"a\":1}"), Err(Error::JsonNoActionsFound)));
        assert!(matches!(action_ranges("{\"_multi\":[]}"), Err(Error::JsonNoActionsFound)));
    }

    #[test]
    fn test_ewma_recurrence() {
        let mut ewma = Ewma::new(1.0, 0.5);
        ewma.update(0.2);
        assert!((ewma.value() - 0.6).abs() < 1e-6);
        ewma.update(0.2);
        assert!((ewma.value() - 0.4).abs() < 1e-6);
    }

    #[test]
    fn test_decompress_rejects_garbage() {
        let mut buffer = b"definitely not zstd".to_vec();
        assert!(matches!(
            ZstdCompressor::default().decompress(&mut buffer),
            Err(Error::Compression(_))
        ));
    }

    #[test]
    fn test_state_get_all_values_reports_missing() {
        let state = DedupState::new(ZstdCompressor::default(), None);
        let (_, objects) = state
            .transform_payload_and_add_objects(r#"{"_multi":[{"a":1}]}"#)
            .unwrap();
        let present = [(objects[0], 1)];
        assert_eq!(state.get_all_values(&present).unwrap(), vec![b"{\"a\":1}".to_vec()]);
        state.remove_all_values(&present).unwrap();
        assert!(state.is_empty());
        assert!(matches!(state.get_all_values(&present), Err(Error::Compression(_))));
        assert!(matches!(state.remove_all_values(&present), Err(Error::Compression(_))));
    }

    proptest! {
        #[test]
        fn test_compression_round_trip(data in proptest::collection::vec(any::<u8>(), 1..4096)) {
            let compressor = ZstdCompressor::new(1);
            let mut buffer = data.clone();
            compressor.compress(&mut buffer).unwrap();
            compressor.decompress(&mut buffer).unwrap();
            prop_assert_eq!(buffer, data);
        }

        #[test]
        fn test_ewma_update(initial in 0.0f32..10.0, weight in 0.0f32..1.0, value in 0.0f32..10.0) {
            let mut ewma = Ewma::new(initial, weight);
            ewma.update(value);
            let expected = (1.0 - weight) * initial + weight * value;
            prop_assert!((ewma.value() - expected).abs() <= 1e-5 * expected.abs().max(1.0));
        }

        #[test]
        fn test_dedup_round_trip(data in proptest::collection::vec(any::<u8>(), 0..256)) {
            let mut dict = DedupDict::new();
            let id = dict.add_object(&data);
            prop_assert_eq!(dict.get_object(id), data.as_slice());
        }
    }
}

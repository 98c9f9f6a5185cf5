// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Payloads carried by generic events.
//!
//! Decision payloads embed the (possibly deduplicated) context verbatim as json.
//! The dictionary payload uses a little-endian binary layout:
//! `count: u64, ids: [u64; count], (len: u64, bytes)*count`.

use crate::config::LearningMode;
use crate::errors::{Error, Result};
use crate::event::{OutcomeValue, PayloadType, SlotRanking};
use serde::Serialize;
use serde_json::value::RawValue;
use std::mem::size_of;

fn raw_context(context: &str) -> Result<&RawValue> {
    serde_json::from_str(context).map_err(|e| Error::JsonParse(e.to_string()))
}

fn to_vec<T: Serialize>(payload: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(payload).map_err(|e| Error::InvalidArgument(e.to_string()))
}

#[derive(Serialize)]
struct CbPayload<'a> {
    context: &'a RawValue,
    action_ids: &'a [u64],
    probabilities: &'a [f32],
    model_id: &'a str,
    learning_mode: LearningMode,
    deferred: bool,
}

#[derive(Serialize)]
struct CaPayload<'a> {
    context: &'a RawValue,
    action: f32,
    pdf_value: f32,
    model_id: &'a str,
    deferred: bool,
}

#[derive(Serialize)]
struct SlotPayload<'a> {
    slot_id: &'a str,
    action_ids: &'a [u32],
    probabilities: &'a [f32],
}

#[derive(Serialize)]
struct MultiSlotPayload<'a> {
    context: &'a RawValue,
    slots: Vec<SlotPayload<'a>>,
    baseline_actions: &'a [i32],
    model_id: &'a str,
    learning_mode: LearningMode,
    deferred: bool,
}

#[derive(Serialize)]
struct MultiStepPayload<'a> {
    context: &'a RawValue,
    event_id: &'a str,
    action_ids: &'a [u64],
    probabilities: &'a [f32],
    model_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    previous_id: Option<&'a str>,
    deferred: bool,
}

/// Decision payload captured at log time, serialized against the transformed context at drain time.
#[derive(Debug, Clone, PartialEq)]
pub enum GenericPayload {
    Cb {
        action_ids: Vec<u64>,
        probabilities: Vec<f32>,
        model_id: String,
        learning_mode: LearningMode,
        deferred: bool,
    },
    Ca {
        action: f32,
        pdf_value: f32,
        model_id: String,
        deferred: bool,
    },
    Slates {
        slots: Vec<SlotRanking>,
        baseline_actions: Vec<i32>,
        model_id: String,
        learning_mode: LearningMode,
        deferred: bool,
    },
    /// Same layout as slates, tagged as a conditional contextual bandit decision.
    Ccb {
        slots: Vec<SlotRanking>,
        baseline_actions: Vec<i32>,
        model_id: String,
        learning_mode: LearningMode,
        deferred: bool,
    },
    /// One step of an episode; the episode id is the event id.
    MultiStep {
        event_id: String,
        action_ids: Vec<u64>,
        probabilities: Vec<f32>,
        model_id: String,
        previous_id: Option<String>,
        deferred: bool,
    },
}

impl GenericPayload {
    pub fn payload_type(&self) -> PayloadType {
        match self {
            GenericPayload::Cb { .. } => PayloadType::Cb,
            GenericPayload::Ca { .. } => PayloadType::Ca,
            GenericPayload::Slates { .. } => PayloadType::Slates,
            GenericPayload::Ccb { .. } => PayloadType::Ccb,
            GenericPayload::MultiStep { .. } => PayloadType::MultiStep,
        }
    }

    pub fn size_estimate(&self) -> usize {
        match self {
            GenericPayload::Cb {
                action_ids,
                probabilities,
                model_id,
                ..
            }
            | GenericPayload::MultiStep {
                action_ids,
                probabilities,
                model_id,
                ..
            } => {
                model_id.len()
                    + action_ids.len() * size_of::<u64>()
                    + probabilities.len() * size_of::<f32>()
            }
            GenericPayload::Ca { model_id, .. } => model_id.len() + 2 * size_of::<f32>(),
            GenericPayload::Slates {
                slots,
                baseline_actions,
                model_id,
                ..
            }
            | GenericPayload::Ccb {
                slots,
                baseline_actions,
                model_id,
                ..
            } => {
                model_id.len()
                    + baseline_actions.len() * size_of::<i32>()
                    + slots
                        .iter()
                        .map(|slot| {
                            slot.slot_id.len()
                                + slot.action_ids.len() * size_of::<u32>()
                                + slot.probabilities.len() * size_of::<f32>()
                        })
                        .sum::<usize>()
            }
        }
    }

    pub fn serialize(&self, context: &str) -> Result<Vec<u8>> {
        let context = raw_context(context)?;
        match self {
            GenericPayload::Cb {
                action_ids,
                probabilities,
                model_id,
                learning_mode,
                deferred,
            } => to_vec(&CbPayload {
                context,
                action_ids,
                probabilities,
                model_id,
                learning_mode: *learning_mode,
                deferred: *deferred,
            }),
            GenericPayload::Ca {
                action,
                pdf_value,
                model_id,
                deferred,
            } => to_vec(&CaPayload {
                context,
                action: *action,
                pdf_value: *pdf_value,
                model_id,
                deferred: *deferred,
            }),
            GenericPayload::Slates {
                slots,
                baseline_actions,
                model_id,
                learning_mode,
                deferred,
            }
            | GenericPayload::Ccb {
                slots,
                baseline_actions,
                model_id,
                learning_mode,
                deferred,
            } => to_vec(&MultiSlotPayload {
                context,
                slots: slots
                    .iter()
                    .map(|slot| SlotPayload {
                        slot_id: &slot.slot_id,
                        action_ids: &slot.action_ids,
                        probabilities: &slot.probabilities,
                    })
                    .collect(),
                baseline_actions,
                model_id,
                learning_mode: *learning_mode,
                deferred: *deferred,
            }),
            GenericPayload::MultiStep {
                event_id,
                action_ids,
                probabilities,
                model_id,
                previous_id,
                deferred,
            } => to_vec(&MultiStepPayload {
                context,
                event_id,
                action_ids,
                probabilities,
                model_id,
                previous_id: previous_id.as_deref(),
                deferred: *deferred,
            }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutcomeIndex {
    Numeric(i32),
    Literal(String),
}

/// Outcome reported against a generic decision.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OutcomePayload {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<OutcomeValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index: Option<OutcomeIndex>,
    pub action_taken: bool,
}

impl OutcomePayload {
    pub fn value(value: OutcomeValue, index: Option<OutcomeIndex>) -> Self {
        Self {
            value: Some(value),
            index,
            action_taken: false,
        }
    }

    pub fn action_taken(index: Option<OutcomeIndex>) -> Self {
        Self {
            value: None,
            index,
            action_taken: true,
        }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        to_vec(self)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EpisodePayload {
    pub episode_id: String,
}

impl EpisodePayload {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        to_vec(self)
    }
}

/// Encodes dictionary ids and their content.
pub fn encode_dedup_info(ids: &[u64], values: &[&[u8]]) -> Result<Vec<u8>> {
    if ids.len() != values.len() {
        return Err(Error::InvalidArgument(format!(
            "{} ids for {} values",
            ids.len(),
            values.len()
        )));
    }

    let size = size_of::<u64>() * (1 + 2 * ids.len()) + values.iter().map(|v| v.len()).sum::<usize>();
    let mut out = Vec::with_capacity(size);
    out.extend_from_slice(&(ids.len() as u64).to_le_bytes());
    for id in ids {
        out.extend_from_slice(&id.to_le_bytes());
    }
    for value in values {
        out.extend_from_slice(&(value.len() as u64).to_le_bytes());
        out.extend_from_slice(value);
    }
    Ok(out)
}

/// Inverse of [`encode_dedup_info`].
pub fn decode_dedup_info(mut bytes: &[u8]) -> Result<Vec<(u64, Vec<u8>)>> {
    let count = read_u64(&mut bytes)? as usize;
    let mut ids = Vec::with_capacity(count.min(bytes.len() / size_of::<u64>()));
    for _ in 0..count {
        ids.push(read_u64(&mut bytes)?);
    }

    let mut entries = Vec::with_capacity(ids.len());
    for id in ids {
        let len = read_u64(&mut bytes)? as usize;
        if bytes.len() < len {
            return Err(Error::InvalidArgument("Truncated dictionary value".to_string()));
        }
        let (value, rest) = bytes.split_at(len);
        entries.push((id, value.to_vec()));
        bytes = rest;
    }
    Ok(entries)
}

fn read_u64(bytes: &mut &[u8]) -> Result<u64> {
    if bytes.len() < size_of::<u64>() {
        return Err(Error::InvalidArgument("Truncated dictionary payload".to_string()));
    }
    let (head, rest) = bytes.split_at(size_of::<u64>());
    *bytes = rest;
    let mut raw = [0u8; size_of::<u64>()];
    raw.copy_from_slice(head);
    Ok(u64::from_le_bytes(raw))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_cb_payload_embeds_context() {
        let payload = GenericPayload::Cb {
            action_ids: vec![2, 1],
            probabilities: vec![0.9, 0.1],
            model_id: "m1".to_string(),
            learning_mode: LearningMode::Apprentice,
            deferred: false,
        };
        let bytes = payload.serialize(r#"{"_multi":[{"__aid":7}]}"#).unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(json["context"]["_multi"][0]["__aid"], 7);
        assert_eq!(json["action_ids"], serde_json::json!([2, 1]));
        assert_eq!(json["learning_mode"], "APPRENTICE");
        assert_eq!(payload.payload_type(), PayloadType::Cb);
    }

    #[test]
    fn test_ccb_payload_shares_slates_layout() {
        let slots = vec![SlotRanking {
            slot_id: "s0".to_string(),
            action_ids: vec![1, 0],
            probabilities: vec![0.6, 0.4],
        }];
        let payload = GenericPayload::Ccb {
            slots,
            baseline_actions: vec![],
            model_id: "m".to_string(),
            learning_mode: LearningMode::Online,
            deferred: false,
        };
        assert_eq!(payload.payload_type(), PayloadType::Ccb);
        let json: serde_json::Value =
            serde_json::from_slice(&payload.serialize("{}").unwrap()).unwrap();
        assert_eq!(json["slots"][0]["slot_id"], "s0");
    }

    #[test]
    fn test_invalid_context_is_rejected() {
        let payload = GenericPayload::Ca {
            action: 1.5,
            pdf_value: 0.2,
            model_id: String::new(),
            deferred: false,
        };
        assert!(matches!(
            payload.serialize("{not json"),
            Err(Error::JsonParse(_))
        ));
    }

    #[test]
    fn test_outcome_payload() {
        let bytes = OutcomePayload::value(
            OutcomeValue::Numeric(1.0),
            Some(OutcomeIndex::Literal("slot-1".to_string())),
        )
        .to_bytes()
        .unwrap();
        assert_eq!(
            String::from_utf8(bytes).unwrap(),
            r#"{"value":1.0,"index":"slot-1","action_taken":false}"#
        );
        let bytes = OutcomePayload::action_taken(None).to_bytes().unwrap();
        assert_eq!(String::from_utf8(bytes).unwrap(), r#"{"action_taken":true}"#);
    }

    #[test]
    fn test_dedup_info_layout() {
        let encoded = encode_dedup_info(&[1, 2], &[b"ab".as_slice(), b"".as_slice()]).unwrap();
        assert_eq!(encoded.len(), 8 + 16 + 8 + 2 + 8);
        let decoded = decode_dedup_info(&encoded).unwrap();
        assert_eq!(decoded, vec![(1, b"ab".to_vec()), (2, Vec::new())]);
        assert!(decode_dedup_info(&encoded[..encoded.len() - 9]).is_err());
        assert!(encode_dedup_info(&[1], &[]).is_err());
    }
}

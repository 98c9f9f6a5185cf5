// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Packs drained events into one wire buffer.
//!
//! Json collections hold one event per line. Generic collections hold framed records,
//! `len: u32 BE, meta_len: u32 BE, meta json, payload`, and a deduplicated collection
//! always starts with its dictionary event.

use crate::action_dict::ActionDictBuilder;
use crate::buffer::DataBuffer;
use crate::constants::message_type;
use crate::dedup::DedupState;
use crate::errors::{Error, Result};
use crate::event::{
    DecisionRankingEvent, Event, EventEncoding, GenericEvent, MultiSlotDecisionEvent,
    OutcomeEvent, OutcomeKind, OutcomeValue, PayloadType, RankingEvent,
};
use crate::time::Timestamp;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SerializerKind {
    #[display("ranking")]
    JsonRanking,
    #[display("decision")]
    JsonDecision,
    #[display("multi-slot")]
    JsonMultiSlot,
    #[display("outcome")]
    JsonOutcome,
    #[display("generic")]
    Generic,
}

impl SerializerKind {
    pub fn message_id(self) -> u16 {
        match self {
            SerializerKind::JsonRanking => message_type::JSON_RANKING_EVENT_COLLECTION,
            SerializerKind::JsonDecision => message_type::JSON_DECISION_EVENT_COLLECTION,
            SerializerKind::JsonMultiSlot => message_type::JSON_MULTI_SLOT_EVENT_COLLECTION,
            SerializerKind::JsonOutcome => message_type::JSON_OUTCOME_EVENT_COLLECTION,
            SerializerKind::Generic => message_type::GENERIC_EVENT_COLLECTION,
        }
    }
}

fn raw_context(context: &str) -> Result<&RawValue> {
    serde_json::from_str(context).map_err(|e| Error::JsonParse(e.to_string()))
}

fn pdrop(pass_prob: f32) -> Option<f32> {
    (pass_prob < 1.0).then(|| 1.0 - pass_prob)
}

fn is_false(value: &bool) -> bool {
    !*value
}

fn is_empty(values: &&[i32]) -> bool {
    values.is_empty()
}

#[derive(Serialize)]
struct VwState<'a> {
    m: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct RankingLine<'a> {
    version: &'static str,
    event_id: &'a str,
    #[serde(rename = "DeferredAction", skip_serializing_if = "is_false")]
    deferred: bool,
    #[serde(rename = "a")]
    actions: &'a [u64],
    #[serde(rename = "c")]
    context: &'a RawValue,
    #[serde(rename = "p")]
    probabilities: &'a [f32],
    #[serde(rename = "VWState")]
    vw_state: VwState<'a>,
    #[serde(rename = "pdrop", skip_serializing_if = "Option::is_none")]
    pdrop: Option<f32>,
}

#[derive(Serialize)]
struct SlotLine<'a, A: Serialize> {
    #[serde(rename = "_id")]
    id: &'a str,
    #[serde(rename = "_a")]
    actions: &'a [A],
    #[serde(rename = "_p")]
    probabilities: &'a [f32],
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct SlotsLine<'a, A: Serialize> {
    version: &'static str,
    event_id: &'a str,
    #[serde(rename = "DeferredAction", skip_serializing_if = "is_false")]
    deferred: bool,
    #[serde(rename = "c")]
    context: &'a RawValue,
    #[serde(rename = "_outcomes")]
    slots: Vec<SlotLine<'a, A>>,
    #[serde(rename = "_ba", skip_serializing_if = "is_empty")]
    baseline_actions: &'a [i32],
    #[serde(rename = "VWState")]
    vw_state: VwState<'a>,
    #[serde(rename = "pdrop", skip_serializing_if = "Option::is_none")]
    pdrop: Option<f32>,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct OutcomeLine<'a> {
    event_id: &'a str,
    #[serde(rename = "v", skip_serializing_if = "Option::is_none")]
    value: Option<&'a OutcomeValue>,
    #[serde(skip_serializing_if = "is_false")]
    action_taken: bool,
}

fn ranking_line(event: &RankingEvent) -> Result<Vec<u8>> {
    to_line(&RankingLine {
        version: "1",
        event_id: &event.meta.id,
        deferred: event.deferred,
        actions: &event.action_ids,
        context: raw_context(&event.context)?,
        probabilities: &event.probabilities,
        vw_state: VwState {
            m: &event.model_id,
        },
        pdrop: pdrop(event.meta.pass_prob),
    })
}

fn decision_line(event: &DecisionRankingEvent) -> Result<Vec<u8>> {
    if event.slot_ids.len() != event.action_ids.len()
        || event.slot_ids.len() != event.probabilities.len()
    {
        return Err(Error::InvalidArgument(format!(
            "Decision {} has {} slots, {} rankings and {} distributions",
            event.meta.id,
            event.slot_ids.len(),
            event.action_ids.len(),
            event.probabilities.len()
        )));
    }

    to_line(&SlotsLine {
        version: "1",
        event_id: &event.meta.id,
        deferred: event.deferred,
        context: raw_context(&event.context)?,
        slots: event
            .slot_ids
            .iter()
            .zip(&event.action_ids)
            .zip(&event.probabilities)
            .map(|((id, actions), probabilities)| SlotLine {
                id,
                actions,
                probabilities,
            })
            .collect(),
        baseline_actions: &[],
        vw_state: VwState {
            m: &event.model_id,
        },
        pdrop: pdrop(event.meta.pass_prob),
    })
}

fn multi_slot_line(event: &MultiSlotDecisionEvent) -> Result<Vec<u8>> {
    to_line(&SlotsLine {
        version: "1",
        event_id: &event.meta.id,
        deferred: event.deferred,
        context: raw_context(&event.context)?,
        slots: event
            .slots
            .iter()
            .map(|slot| SlotLine {
                id: &slot.slot_id,
                actions: &slot.action_ids,
                probabilities: &slot.probabilities,
            })
            .collect(),
        baseline_actions: &event.baseline_actions,
        vw_state: VwState {
            m: &event.model_id,
        },
        pdrop: pdrop(event.meta.pass_prob),
    })
}

fn outcome_line(event: &OutcomeEvent) -> Result<Vec<u8>> {
    let (value, action_taken) = match &event.kind {
        OutcomeKind::Value(value) => (Some(value), false),
        OutcomeKind::ActionTaken => (None, true),
    };
    to_line(&OutcomeLine {
        event_id: &event.meta.id,
        value,
        action_taken,
    })
}

fn to_line<T: Serialize>(line: &T) -> Result<Vec<u8>> {
    let mut bytes = serde_json::to_vec(line).map_err(|e| Error::InvalidArgument(e.to_string()))?;
    bytes.push(b'\n');
    Ok(bytes)
}

/// Metadata framed in front of every generic payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenericRecordMeta {
    pub id: String,
    pub payload_type: PayloadType,
    pub encoding: EventEncoding,
    pub app_id: String,
    pub pass_prob: f32,
    pub client_time: Timestamp,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_index: Option<u64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GenericRecord {
    pub meta: GenericRecordMeta,
    pub payload: Vec<u8>,
}

fn write_generic_record(out: &mut Vec<u8>, event: &GenericEvent) -> Result<()> {
    let meta = serde_json::to_vec(&GenericRecordMeta {
        id: event.meta.id.clone(),
        payload_type: event.payload_type,
        encoding: event.encoding,
        app_id: event.app_id.clone(),
        pass_prob: event.meta.pass_prob,
        client_time: event.meta.client_time,
        event_index: event.meta.event_index,
    })
    .map_err(|e| Error::InvalidArgument(e.to_string()))?;

    let too_large = |_| Error::InvalidArgument(format!("Event {} is too large", event.meta.id));
    let meta_len = u32::try_from(meta.len()).map_err(too_large)?;
    let record_len = u32::try_from(4 + meta.len() + event.payload.len()).map_err(too_large)?;

    out.extend_from_slice(&record_len.to_be_bytes());
    out.extend_from_slice(&meta_len.to_be_bytes());
    out.extend_from_slice(&meta);
    out.extend_from_slice(&event.payload);
    Ok(())
}

fn take_u32(bytes: &mut &[u8]) -> Result<usize> {
    if bytes.len() < 4 {
        return Err(Error::InvalidArgument("Truncated record header".to_string()));
    }
    let (head, rest) = bytes.split_at(4);
    *bytes = rest;
    Ok(u32::from_be_bytes([head[0], head[1], head[2], head[3]]) as usize)
}

/// Decodes the body of a generic collection.
pub fn read_generic_collection(mut body: &[u8]) -> Result<Vec<GenericRecord>> {
    let mut records = Vec::new();
    while !body.is_empty() {
        let len = take_u32(&mut body)?;
        if body.len() < len {
            return Err(Error::InvalidArgument("Truncated record".to_string()));
        }
        let (mut record, rest) = body.split_at(len);
        body = rest;

        let meta_len = take_u32(&mut record)?;
        if record.len() < meta_len {
            return Err(Error::InvalidArgument("Truncated record metadata".to_string()));
        }
        let (meta, payload) = record.split_at(meta_len);
        records.push(GenericRecord {
            meta: serde_json::from_slice(meta).map_err(|e| Error::JsonParse(e.to_string()))?,
            payload: payload.to_vec(),
        });
    }
    Ok(records)
}

enum Format {
    Json,
    Generic,
    Dedup {
        records: Vec<u8>,
        builder: ActionDictBuilder,
    },
}

/// Accumulates events of one kind into a buffer until [`finalize`](Self::finalize).
pub struct CollectionSerializer {
    kind: SerializerKind,
    buffer: DataBuffer,
    format: Format,
    count: usize,
}

impl CollectionSerializer {
    /// Generic collections deduplicate when a dedup state is supplied.
    pub fn new(kind: SerializerKind, buffer: DataBuffer, dedup: Option<Arc<DedupState>>) -> Self {
        let format = match (kind, dedup) {
            (SerializerKind::Generic, Some(state)) => Format::Dedup {
                records: Vec::new(),
                builder: ActionDictBuilder::new(state),
            },
            (SerializerKind::Generic, None) => Format::Generic,
            _ => Format::Json,
        };
        Self {
            kind,
            buffer,
            format,
            count: 0,
        }
    }

    pub fn add(&mut self, event: Event) -> Result<()> {
        match (&mut self.format, self.kind, &event) {
            (Format::Json, SerializerKind::JsonRanking, Event::Ranking(e)) => {
                self.buffer.append(&ranking_line(e)?)
            }
            (Format::Json, SerializerKind::JsonDecision, Event::Decision(e)) => {
                self.buffer.append(&decision_line(e)?)
            }
            (Format::Json, SerializerKind::JsonMultiSlot, Event::MultiSlot(e)) => {
                self.buffer.append(&multi_slot_line(e)?)
            }
            (Format::Json, SerializerKind::JsonOutcome, Event::Outcome(e)) => {
                self.buffer.append(&outcome_line(e)?)
            }
            (Format::Json, SerializerKind::JsonOutcome, _) => {
                return Err(Error::SerializeUnknownOutcomeType);
            }
            (Format::Generic, _, Event::Generic(e)) => {
                let mut record = Vec::new();
                write_generic_record(&mut record, e)?;
                self.buffer.append(&record);
            }
            (Format::Dedup { records, builder }, _, Event::Generic(e)) => {
                builder.add(&e.objects)?;
                write_generic_record(records, e)?;
            }
            _ => {
                return Err(Error::InvalidArgument(format!(
                    "Cannot add a {} event to a {} collection",
                    event.kind(),
                    self.kind
                )));
            }
        }
        self.count += 1;
        Ok(())
    }

    /// Estimated body size, including the predicted dictionary.
    pub fn size(&self) -> usize {
        match &self.format {
            Format::Dedup { records, builder } => {
                self.buffer.body_len() + records.len() + builder.size()
            }
            _ => self.buffer.body_len(),
        }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    pub fn message_id(&self) -> u16 {
        self.kind.message_id()
    }

    /// Returns the buffer without finalizing, for reuse when nothing was added.
    pub fn into_buffer(self) -> DataBuffer {
        self.buffer
    }

    /// Writes the dictionary event (if any object was referenced) and the preamble.
    pub fn finalize(self) -> Result<DataBuffer> {
        let message_id = self.message_id();
        let mut buffer = self.buffer;
        if let Format::Dedup { records, builder } = self.format {
            if !builder.is_empty() {
                let dictionary = builder.finalize()?;
                let mut head = Vec::new();
                write_generic_record(&mut head, &dictionary)?;
                buffer.append(&head);
            }
            buffer.append(&records);
        }
        buffer.write_preamble(message_id)?;
        Ok(buffer)
    }
}

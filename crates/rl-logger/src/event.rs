// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::config::LearningMode;
use crate::errors::Result;
use crate::event_queue::QueueEvent;
use crate::extensions::LoggerExtensions;
use crate::hash::drop_value;
use crate::payload::GenericPayload;
use crate::time::Timestamp;
use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::mem::size_of;
use std::sync::Arc;

/// Metadata shared by every event kind.
#[derive(Debug, Clone, PartialEq)]
pub struct EventMeta {
    pub id: String,
    /// Cumulative probability that this event survived subsampling and pruning
    pub pass_prob: f32,
    pub client_time: Timestamp,
    pub event_index: Option<u64>,
}

impl EventMeta {
    pub fn new(id: impl Into<String>, client_time: Timestamp, pass_prob: f32) -> Self {
        Self {
            id: id.into(),
            pass_prob,
            client_time,
            event_index: None,
        }
    }

    /// Folds `pass_prob` into the survival probability and decides whether to drop.
    ///
    /// A drop value equal to `pass_prob` survives.
    pub fn try_drop(&mut self, pass_prob: f32, drop_pass: u32) -> bool {
        self.pass_prob *= pass_prob;
        drop_value(&self.id, drop_pass) > pass_prob
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ActionFlags {
    #[default]
    Default,
    /// The action is not activated until an explicit action-taken report
    Deferred,
}

impl ActionFlags {
    pub fn is_deferred(self) -> bool {
        self == ActionFlags::Deferred
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ActionProbability {
    pub action_id: u64,
    pub probability: f32,
}

/// Result of a ranking call; action ids are zero based.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RankingResponse {
    pub event_id: String,
    pub model_id: String,
    pub chosen_action_id: u64,
    pub ranking: Vec<ActionProbability>,
}

impl RankingResponse {
    pub fn new(event_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        Self {
            event_id: event_id.into(),
            model_id: model_id.into(),
            ..Default::default()
        }
    }

    pub fn push(&mut self, action_id: u64, probability: f32) {
        if self.ranking.is_empty() {
            self.chosen_action_id = action_id;
        }
        self.ranking.push(ActionProbability {
            action_id,
            probability,
        });
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankingEvent {
    pub meta: EventMeta,
    pub context: String,
    /// One based action ids in ranking order
    pub action_ids: Vec<u64>,
    pub probabilities: Vec<f32>,
    pub model_id: String,
    pub deferred: bool,
    pub learning_mode: LearningMode,
}

impl RankingEvent {
    pub fn choose_rank(
        context: &str,
        flags: ActionFlags,
        response: &RankingResponse,
        client_time: Timestamp,
        pass_prob: f32,
        learning_mode: LearningMode,
    ) -> Self {
        Self {
            meta: EventMeta::new(response.event_id.as_str(), client_time, pass_prob),
            context: context.to_string(),
            action_ids: response.ranking.iter().map(|a| a.action_id + 1).collect(),
            probabilities: response.ranking.iter().map(|a| a.probability).collect(),
            model_id: response.model_id.clone(),
            deferred: flags.is_deferred(),
            learning_mode,
        }
    }

    pub fn size_estimate(&self) -> usize {
        self.meta.id.len()
            + self.context.len()
            + self.model_id.len()
            + self.action_ids.len() * size_of::<u64>()
            + self.probabilities.len() * size_of::<f32>()
    }
}

/// Conditional contextual bandit decision, one ranking per slot.
#[derive(Debug, Clone, PartialEq)]
pub struct DecisionRankingEvent {
    pub meta: EventMeta,
    pub context: String,
    pub slot_ids: Vec<String>,
    pub action_ids: Vec<Vec<u64>>,
    pub probabilities: Vec<Vec<f32>>,
    pub model_id: String,
    pub deferred: bool,
    pub learning_mode: LearningMode,
}

impl DecisionRankingEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn request_decision(
        slot_ids: &[String],
        context: &str,
        flags: ActionFlags,
        action_ids: Vec<Vec<u64>>,
        probabilities: Vec<Vec<f32>>,
        model_id: &str,
        client_time: Timestamp,
        learning_mode: LearningMode,
    ) -> Self {
        // The first slot seeds the drop decision.
        let seed = slot_ids.first().map(String::as_str).unwrap_or_default();
        Self {
            meta: EventMeta::new(seed, client_time, 1.0),
            context: context.to_string(),
            slot_ids: slot_ids.to_vec(),
            action_ids,
            probabilities,
            model_id: model_id.to_string(),
            deferred: flags.is_deferred(),
            learning_mode,
        }
    }

    pub fn size_estimate(&self) -> usize {
        self.meta.id.len()
            + self.context.len()
            + self.model_id.len()
            + self.slot_ids.iter().map(String::len).sum::<usize>()
            + self.action_ids.iter().map(Vec::len).sum::<usize>() * size_of::<u64>()
            + self.probabilities.iter().map(Vec::len).sum::<usize>() * size_of::<f32>()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SlotRanking {
    pub slot_id: String,
    pub action_ids: Vec<u32>,
    pub probabilities: Vec<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiSlotDecisionEvent {
    pub meta: EventMeta,
    pub context: String,
    pub slots: Vec<SlotRanking>,
    pub baseline_actions: Vec<i32>,
    pub model_id: String,
    pub deferred: bool,
    pub learning_mode: LearningMode,
}

impl MultiSlotDecisionEvent {
    #[allow(clippy::too_many_arguments)]
    pub fn request_decision(
        event_id: &str,
        context: &str,
        flags: ActionFlags,
        slots: Vec<SlotRanking>,
        baseline_actions: Vec<i32>,
        model_id: &str,
        client_time: Timestamp,
        learning_mode: LearningMode,
    ) -> Self {
        Self {
            meta: EventMeta::new(event_id, client_time, 1.0),
            context: context.to_string(),
            slots,
            baseline_actions,
            model_id: model_id.to_string(),
            deferred: flags.is_deferred(),
            learning_mode,
        }
    }

    pub fn size_estimate(&self) -> usize {
        self.meta.id.len()
            + self.context.len()
            + self.model_id.len()
            + self.baseline_actions.len() * size_of::<i32>()
            + self
                .slots
                .iter()
                .map(|slot| {
                    slot.slot_id.len()
                        + slot.action_ids.len() * size_of::<u32>()
                        + slot.probabilities.len() * size_of::<f32>()
                })
                .sum::<usize>()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum OutcomeValue {
    Numeric(f32),
    Literal(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutcomeKind {
    Value(OutcomeValue),
    ActionTaken,
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutcomeEvent {
    pub meta: EventMeta,
    pub kind: OutcomeKind,
}

impl OutcomeEvent {
    pub fn report_outcome(event_id: &str, value: OutcomeValue, client_time: Timestamp) -> Self {
        Self {
            meta: EventMeta::new(event_id, client_time, 1.0),
            kind: OutcomeKind::Value(value),
        }
    }

    pub fn report_action_taken(event_id: &str, client_time: Timestamp) -> Self {
        Self {
            meta: EventMeta::new(event_id, client_time, 1.0),
            kind: OutcomeKind::ActionTaken,
        }
    }

    pub fn size_estimate(&self) -> usize {
        self.meta.id.len()
            + match &self.kind {
                OutcomeKind::Value(OutcomeValue::Numeric(_)) => size_of::<f32>(),
                OutcomeKind::Value(OutcomeValue::Literal(value)) => value.len(),
                OutcomeKind::ActionTaken => size_of::<bool>(),
            }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, Serialize, Deserialize)]
pub enum PayloadType {
    #[display("CB")]
    Cb,
    #[display("CA")]
    Ca,
    #[display("CCB")]
    Ccb,
    #[display("Slates")]
    Slates,
    #[display("Outcome")]
    Outcome,
    #[display("DedupInfo")]
    DedupInfo,
    #[display("MultiStep")]
    MultiStep,
    #[display("Episode")]
    Episode,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, Serialize, Deserialize)]
pub enum EventEncoding {
    #[default]
    #[display("IDENTITY")]
    Identity,
    #[display("ZSTD")]
    Zstd,
}

/// Versioned event with an opaque, possibly compressed payload.
#[derive(Debug, Clone, PartialEq)]
pub struct GenericEvent {
    pub meta: EventMeta,
    pub payload_type: PayloadType,
    pub payload: Vec<u8>,
    pub encoding: EventEncoding,
    pub app_id: String,
    /// Dedup objects referenced by the payload
    pub objects: Vec<u64>,
}

impl GenericEvent {
    pub fn new(
        meta: EventMeta,
        payload_type: PayloadType,
        payload: Vec<u8>,
        encoding: EventEncoding,
        app_id: impl Into<String>,
    ) -> Self {
        Self {
            meta,
            payload_type,
            payload,
            encoding,
            app_id: app_id.into(),
            objects: Vec::new(),
        }
    }

    pub fn with_objects(mut self, objects: Vec<u64>) -> Self {
        self.objects = objects;
        self
    }

    pub fn size_estimate(&self) -> usize {
        self.meta.id.len() + self.app_id.len() + self.payload.len()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Ranking(RankingEvent),
    Decision(DecisionRankingEvent),
    MultiSlot(MultiSlotDecisionEvent),
    Outcome(OutcomeEvent),
    Generic(GenericEvent),
}

impl Event {
    pub fn meta(&self) -> &EventMeta {
        match self {
            Event::Ranking(event) => &event.meta,
            Event::Decision(event) => &event.meta,
            Event::MultiSlot(event) => &event.meta,
            Event::Outcome(event) => &event.meta,
            Event::Generic(event) => &event.meta,
        }
    }

    pub fn meta_mut(&mut self) -> &mut EventMeta {
        match self {
            Event::Ranking(event) => &mut event.meta,
            Event::Decision(event) => &mut event.meta,
            Event::MultiSlot(event) => &mut event.meta,
            Event::Outcome(event) => &mut event.meta,
            Event::Generic(event) => &mut event.meta,
        }
    }

    pub fn size_estimate(&self) -> usize {
        match self {
            Event::Ranking(event) => event.size_estimate(),
            Event::Decision(event) => event.size_estimate(),
            Event::MultiSlot(event) => event.size_estimate(),
            Event::Outcome(event) => event.size_estimate(),
            Event::Generic(event) => event.size_estimate(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Event::Ranking(_) => "ranking",
            Event::Decision(_) => "decision",
            Event::MultiSlot(_) => "multi-slot",
            Event::Outcome(_) => "outcome",
            Event::Generic(_) => "generic",
        }
    }
}

/// Generic event whose context transform and payload serialization run at drain time.
pub struct DeferredGenericEvent {
    pub meta: EventMeta,
    pub app_id: String,
    pub context: String,
    pub payload: GenericPayload,
    pub extensions: Arc<dyn LoggerExtensions>,
}

impl DeferredGenericEvent {
    pub fn size_estimate(&self) -> usize {
        self.meta.id.len() + self.app_id.len() + self.context.len() + self.payload.size_estimate()
    }

    /// Extracts dedup objects, serializes the payload and applies the payload transform.
    pub fn materialize(self) -> Result<GenericEvent> {
        let (context, objects) = self
            .extensions
            .transform_payload_and_extract_objects(&self.context)?;
        let serialized = self.payload.serialize(&context)?;
        let (payload, encoding) = self.extensions.transform_serialized_payload(serialized)?;

        Ok(GenericEvent::new(
            self.meta,
            self.payload.payload_type(),
            payload,
            encoding,
            self.app_id,
        )
        .with_objects(objects))
    }
}

impl fmt::Debug for DeferredGenericEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeferredGenericEvent")
            .field("meta", &self.meta)
            .field("payload_type", &self.payload.payload_type())
            .finish_non_exhaustive()
    }
}

/// Queue entry: either a finished event or one whose expensive work is postponed to the drain.
#[derive(Debug)]
pub enum PendingEvent {
    Ready(Event),
    Deferred(DeferredGenericEvent),
}

impl PendingEvent {
    pub fn meta(&self) -> &EventMeta {
        match self {
            PendingEvent::Ready(event) => event.meta(),
            PendingEvent::Deferred(deferred) => &deferred.meta,
        }
    }

    fn meta_mut(&mut self) -> &mut EventMeta {
        match self {
            PendingEvent::Ready(event) => event.meta_mut(),
            PendingEvent::Deferred(deferred) => &mut deferred.meta,
        }
    }

    pub fn size_estimate(&self) -> usize {
        match self {
            PendingEvent::Ready(event) => event.size_estimate(),
            PendingEvent::Deferred(deferred) => deferred.size_estimate(),
        }
    }

    pub fn materialize(self) -> Result<Event> {
        match self {
            PendingEvent::Ready(event) => Ok(event),
            PendingEvent::Deferred(deferred) => deferred.materialize().map(Event::Generic),
        }
    }
}

impl From<Event> for PendingEvent {
    fn from(event: Event) -> Self {
        PendingEvent::Ready(event)
    }
}

impl QueueEvent for PendingEvent {
    fn id(&self) -> &str {
        &self.meta().id
    }

    fn try_drop(&mut self, pass_prob: f32, drop_pass: u32) -> bool {
        self.meta_mut().try_drop(pass_prob, drop_pass)
    }

    fn set_event_index(&mut self, index: u64) {
        self.meta_mut().event_index = Some(index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response() -> RankingResponse {
        let mut response = RankingResponse::new("event-1", "model-7");
        response.push(2, 0.8);
        response.push(0, 0.1);
        response.push(1, 0.1);
        response
    }

    #[test]
    fn test_choose_rank_uses_one_based_actions() {
        let event = RankingEvent::choose_rank(
            r#"{"_multi":[{},{},{}]}"#,
            ActionFlags::Deferred,
            &response(),
            Timestamp::default(),
            1.0,
            LearningMode::Online,
        );
        assert_eq!(event.action_ids, vec![3, 1, 2]);
        assert_eq!(event.probabilities, vec![0.8, 0.1, 0.1]);
        assert!(event.deferred);
        assert_eq!(event.meta.id, "event-1");
        assert_eq!(response().chosen_action_id, 2);
    }

    #[test]
    fn test_try_drop_accumulates_pass_prob() {
        let mut meta = EventMeta::new("event-1", Timestamp::default(), 1.0);
        meta.try_drop(0.5, 0);
        meta.try_drop(0.5, 1);
        assert!((meta.pass_prob - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn test_try_drop_boundary_is_exclusive() {
        let value = drop_value("boundary", 3);
        assert!(value > 0.0);
        let mut meta = EventMeta::new("boundary", Timestamp::default(), 1.0);
        assert!(!meta.try_drop(value, 3), "equal drop value must survive");
        let below = f32::from_bits(value.to_bits() - 1);
        let mut meta = EventMeta::new("boundary", Timestamp::default(), 1.0);
        assert!(meta.try_drop(below, 3), "drop value above the rate must drop");
    }

    #[test]
    fn test_try_drop_never_drops_at_full_rate() {
        for i in 0..100 {
            let mut meta = EventMeta::new(format!("event-{i}"), Timestamp::default(), 1.0);
            assert!(!meta.try_drop(1.0, 0));
        }
    }

    #[test]
    fn test_pending_event_index() {
        let outcome = OutcomeEvent::report_action_taken("event-1", Timestamp::default());
        let mut pending = PendingEvent::from(Event::Outcome(outcome));
        pending.set_event_index(4);
        assert_eq!(pending.meta().event_index, Some(4));
        assert_eq!(pending.id(), "event-1");
    }

    #[test]
    fn test_size_estimates() {
        let outcome = OutcomeEvent::report_outcome(
            "abc",
            OutcomeValue::Literal("clicked".to_string()),
            Timestamp::default(),
        );
        assert_eq!(outcome.size_estimate(), 3 + 7);

        let generic = GenericEvent::new(
            EventMeta::new("abc", Timestamp::default(), 1.0),
            PayloadType::Outcome,
            vec![0; 10],
            EventEncoding::Identity,
            "app",
        );
        assert_eq!(generic.size_estimate(), 16);
    }
}

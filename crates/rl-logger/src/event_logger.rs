// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Typed entry points that turn application calls into queued events.

use crate::async_batcher::AsyncBatcher;
use crate::config::{BatcherConfig, Configuration, LearningMode};
use crate::constants::{APP_ID, INTERACTION_SECTION, OBSERVATION_SECTION};
use crate::errors::{Error, Result};
use crate::event::{
    ActionFlags, DecisionRankingEvent, DeferredGenericEvent, Event, EventMeta, GenericEvent,
    MultiSlotDecisionEvent, OutcomeEvent, OutcomeValue, PayloadType, PendingEvent, RankingEvent,
    RankingResponse, SlotRanking,
};
use crate::extensions::{Dependencies, LoggerExtensions};
use crate::payload::{EpisodePayload, GenericPayload, OutcomeIndex, OutcomePayload};
use crate::sender::Sender;
use crate::serializer::SerializerKind;
use crate::time::{now_or_default, TimeProvider, Timestamp};
use std::sync::Arc;

/// Owns one batcher and stamps events with the app id and client time.
pub struct EventLogger {
    batcher: AsyncBatcher,
    time_provider: Option<Arc<dyn TimeProvider>>,
    app_id: String,
}

impl EventLogger {
    pub fn new(
        batcher: AsyncBatcher,
        time_provider: Option<Arc<dyn TimeProvider>>,
        app_id: impl Into<String>,
    ) -> Self {
        Self {
            batcher,
            time_provider,
            app_id: app_id.into(),
        }
    }

    fn from_configuration(
        config: &Configuration,
        section: &str,
        kind: SerializerKind,
        extensions: &dyn LoggerExtensions,
        dependencies: &Dependencies,
    ) -> Result<Self> {
        let batcher_config = BatcherConfig::from_configuration(config, section)?;
        let batcher = extensions.create_batcher(section, batcher_config, kind, dependencies);
        Ok(Self::new(
            batcher,
            dependencies.time_provider.clone(),
            config.get_or(APP_ID, ""),
        ))
    }

    /// Must succeed once before anything can be logged.
    pub fn init(&mut self, sender: Box<dyn Sender>) -> Result<()> {
        self.batcher.init(sender)
    }

    pub fn is_initialized(&self) -> bool {
        self.batcher.is_initialized()
    }

    pub fn append(&self, event: impl Into<PendingEvent>) -> Result<()> {
        self.batcher.append(event.into())
    }

    pub fn now(&self) -> Timestamp {
        now_or_default(self.time_provider.as_deref())
    }

    pub fn app_id(&self) -> &str {
        &self.app_id
    }

    pub fn queue_size(&self) -> usize {
        self.batcher.queue_size()
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.is_initialized() {
            Ok(())
        } else {
            Err(Error::NotInitialized)
        }
    }
}

/// Ranking decisions, sent as a json collection.
pub struct InteractionLogger {
    logger: EventLogger,
    learning_mode: LearningMode,
}

impl InteractionLogger {
    pub fn new(
        config: &Configuration,
        extensions: &dyn LoggerExtensions,
        dependencies: &Dependencies,
    ) -> Result<Self> {
        Ok(Self {
            logger: EventLogger::from_configuration(
                config,
                INTERACTION_SECTION,
                SerializerKind::JsonRanking,
                extensions,
                dependencies,
            )?,
            learning_mode: LearningMode::from_configuration(config)?,
        })
    }

    pub fn init(&mut self, sender: Box<dyn Sender>) -> Result<()> {
        self.logger.init(sender)
    }

    pub fn log(&self, context: &str, flags: ActionFlags, response: &RankingResponse) -> Result<()> {
        self.logger.ensure_initialized()?;
        let event = RankingEvent::choose_rank(
            context,
            flags,
            response,
            self.logger.now(),
            1.0,
            self.learning_mode,
        );
        self.logger.append(Event::Ranking(event))
    }

    pub fn logger(&self) -> &EventLogger {
        &self.logger
    }
}

/// Conditional contextual bandit decisions.
pub struct DecisionLogger {
    logger: EventLogger,
    learning_mode: LearningMode,
}

impl DecisionLogger {
    pub fn new(
        config: &Configuration,
        extensions: &dyn LoggerExtensions,
        dependencies: &Dependencies,
    ) -> Result<Self> {
        Ok(Self {
            logger: EventLogger::from_configuration(
                config,
                INTERACTION_SECTION,
                SerializerKind::JsonDecision,
                extensions,
                dependencies,
            )?,
            learning_mode: LearningMode::from_configuration(config)?,
        })
    }

    pub fn init(&mut self, sender: Box<dyn Sender>) -> Result<()> {
        self.logger.init(sender)
    }

    pub fn log_decisions(
        &self,
        slot_ids: &[String],
        context: &str,
        flags: ActionFlags,
        action_ids: Vec<Vec<u64>>,
        probabilities: Vec<Vec<f32>>,
        model_id: &str,
    ) -> Result<()> {
        self.logger.ensure_initialized()?;
        if slot_ids.is_empty()
            || slot_ids.len() != action_ids.len()
            || slot_ids.len() != probabilities.len()
        {
            return Err(Error::InvalidArgument(format!(
                "Expected one ranking per slot: {} slots, {} rankings, {} distributions",
                slot_ids.len(),
                action_ids.len(),
                probabilities.len()
            )));
        }

        let event = DecisionRankingEvent::request_decision(
            slot_ids,
            context,
            flags,
            action_ids,
            probabilities,
            model_id,
            self.logger.now(),
            self.learning_mode,
        );
        self.logger.append(Event::Decision(event))
    }

    pub fn logger(&self) -> &EventLogger {
        &self.logger
    }
}

/// Slates and other multi-slot decisions.
pub struct MultiSlotLogger {
    logger: EventLogger,
    learning_mode: LearningMode,
}

impl MultiSlotLogger {
    pub fn new(
        config: &Configuration,
        extensions: &dyn LoggerExtensions,
        dependencies: &Dependencies,
    ) -> Result<Self> {
        Ok(Self {
            logger: EventLogger::from_configuration(
                config,
                INTERACTION_SECTION,
                SerializerKind::JsonMultiSlot,
                extensions,
                dependencies,
            )?,
            learning_mode: LearningMode::from_configuration(config)?,
        })
    }

    pub fn init(&mut self, sender: Box<dyn Sender>) -> Result<()> {
        self.logger.init(sender)
    }

    pub fn log_decision(
        &self,
        event_id: &str,
        context: &str,
        flags: ActionFlags,
        slots: Vec<SlotRanking>,
        baseline_actions: Vec<i32>,
        model_id: &str,
    ) -> Result<()> {
        self.logger.ensure_initialized()?;
        let event = MultiSlotDecisionEvent::request_decision(
            event_id,
            context,
            flags,
            slots,
            baseline_actions,
            model_id,
            self.logger.now(),
            self.learning_mode,
        );
        self.logger.append(Event::MultiSlot(event))
    }

    pub fn logger(&self) -> &EventLogger {
        &self.logger
    }
}

/// Outcomes of earlier decisions, sent on the observation section.
pub struct ObservationLogger {
    logger: EventLogger,
}

impl ObservationLogger {
    pub fn new(
        config: &Configuration,
        extensions: &dyn LoggerExtensions,
        dependencies: &Dependencies,
    ) -> Result<Self> {
        Ok(Self {
            logger: EventLogger::from_configuration(
                config,
                OBSERVATION_SECTION,
                SerializerKind::JsonOutcome,
                extensions,
                dependencies,
            )?,
        })
    }

    pub fn init(&mut self, sender: Box<dyn Sender>) -> Result<()> {
        self.logger.init(sender)
    }

    pub fn log_outcome(&self, event_id: &str, value: OutcomeValue) -> Result<()> {
        self.logger.ensure_initialized()?;
        let event = OutcomeEvent::report_outcome(event_id, value, self.logger.now());
        self.logger.append(Event::Outcome(event))
    }

    pub fn report_action_taken(&self, event_id: &str) -> Result<()> {
        self.logger.ensure_initialized()?;
        let event = OutcomeEvent::report_action_taken(event_id, self.logger.now());
        self.logger.append(Event::Outcome(event))
    }

    pub fn logger(&self) -> &EventLogger {
        &self.logger
    }
}

/// Versioned events whose payloads go through the logger extensions.
pub struct GenericEventLogger {
    logger: EventLogger,
    extensions: Arc<dyn LoggerExtensions>,
    learning_mode: LearningMode,
}

impl GenericEventLogger {
    pub fn new(
        config: &Configuration,
        section: &str,
        extensions: Arc<dyn LoggerExtensions>,
        dependencies: &Dependencies,
    ) -> Result<Self> {
        Ok(Self {
            logger: EventLogger::from_configuration(
                config,
                section,
                SerializerKind::Generic,
                extensions.as_ref(),
                dependencies,
            )?,
            extensions,
            learning_mode: LearningMode::from_configuration(config)?,
        })
    }

    pub fn init(&mut self, sender: Box<dyn Sender>) -> Result<()> {
        self.logger.init(sender)
    }

    /// Queues a decision; the context transform and serialization happen when it is drained.
    pub fn log(&self, event_id: &str, context: &str, payload: GenericPayload) -> Result<()> {
        self.logger.ensure_initialized()?;
        let event = DeferredGenericEvent {
            meta: EventMeta::new(event_id, self.logger.now(), 1.0),
            app_id: self.logger.app_id().to_string(),
            context: context.to_string(),
            payload,
            extensions: Arc::clone(&self.extensions),
        };
        self.logger.append(PendingEvent::Deferred(event))
    }

    /// Contextual bandit decision built from a ranking response.
    pub fn log_cb(&self, context: &str, flags: ActionFlags, response: &RankingResponse) -> Result<()> {
        let payload = GenericPayload::Cb {
            action_ids: response.ranking.iter().map(|a| a.action_id + 1).collect(),
            probabilities: response.ranking.iter().map(|a| a.probability).collect(),
            model_id: response.model_id.clone(),
            learning_mode: self.learning_mode,
            deferred: flags.is_deferred(),
        };
        self.log(&response.event_id, context, payload)
    }

    /// Queues an already serialized payload.
    pub fn log_payload(&self, event_id: &str, payload_type: PayloadType, payload: Vec<u8>) -> Result<()> {
        self.logger.ensure_initialized()?;
        let (payload, encoding) = self.extensions.transform_serialized_payload(payload)?;
        let event = GenericEvent::new(
            EventMeta::new(event_id, self.logger.now(), 1.0),
            payload_type,
            payload,
            encoding,
            self.logger.app_id(),
        );
        self.logger.append(Event::Generic(event))
    }

    pub fn log_outcome(
        &self,
        event_id: &str,
        value: OutcomeValue,
        index: Option<OutcomeIndex>,
    ) -> Result<()> {
        let payload = OutcomePayload::value(value, index).to_bytes()?;
        self.log_payload(event_id, PayloadType::Outcome, payload)
    }

    pub fn report_action_taken(&self, event_id: &str, index: Option<OutcomeIndex>) -> Result<()> {
        let payload = OutcomePayload::action_taken(index).to_bytes()?;
        self.log_payload(event_id, PayloadType::Outcome, payload)
    }

    pub fn learning_mode(&self) -> LearningMode {
        self.learning_mode
    }

    pub fn log_episode_start(&self, episode_id: &str) -> Result<()> {
        let payload = EpisodePayload {
            episode_id: episode_id.to_string(),
        }
        .to_bytes()?;
        self.log_payload(episode_id, PayloadType::Episode, payload)
    }

    pub fn logger(&self) -> &EventLogger {
        &self.logger
    }
}

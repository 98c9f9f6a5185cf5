// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Loggers that pick their wire format from `protocol.version`.
//!
//! Protocol 1 sends json collections through the typed loggers of [`crate::event_logger`].
//! Protocol 2 sends generic events; interactions go through the logger extensions, while
//! observations and episodes always use a plain batcher.

use crate::config::{Configuration, ModelType, ProtocolVersion};
use crate::constants::{INTERACTION_SECTION, OBSERVATION_SECTION};
use crate::errors::{Error, Result};
use crate::event::{ActionFlags, OutcomeValue, RankingResponse, SlotRanking};
use crate::event_logger::{
    DecisionLogger, EventLogger, GenericEventLogger, InteractionLogger, MultiSlotLogger,
    ObservationLogger,
};
use crate::extensions::{DefaultExtensions, Dependencies, LoggerExtensions};
use crate::payload::{GenericPayload, OutcomeIndex};
use crate::sender::Sender;
use std::sync::Arc;

fn not_supported(what: &str, protocol: ProtocolVersion) -> Error {
    Error::ProtocolNotSupported(format!("{what} cannot be logged with protocol {protocol}"))
}

enum Interactions {
    Ranking(InteractionLogger),
    Decision(DecisionLogger),
    MultiSlot(MultiSlotLogger),
    Generic(GenericEventLogger),
}

/// Logs decisions of one model type in the configured protocol.
pub struct InteractionLoggerFacade {
    model_type: ModelType,
    protocol: ProtocolVersion,
    loggers: Interactions,
}

impl InteractionLoggerFacade {
    pub fn new(
        model_type: ModelType,
        config: &Configuration,
        extensions: Arc<dyn LoggerExtensions>,
        dependencies: &Dependencies,
    ) -> Result<Self> {
        let protocol = ProtocolVersion::from_configuration(config)?;
        let loggers = match (protocol, model_type) {
            (ProtocolVersion::V1, ModelType::Cb) => Interactions::Ranking(InteractionLogger::new(
                config,
                extensions.as_ref(),
                dependencies,
            )?),
            (ProtocolVersion::V1, ModelType::Ccb) => Interactions::Decision(DecisionLogger::new(
                config,
                extensions.as_ref(),
                dependencies,
            )?),
            (ProtocolVersion::V1, ModelType::Slates) => Interactions::MultiSlot(
                MultiSlotLogger::new(config, extensions.as_ref(), dependencies)?,
            ),
            (ProtocolVersion::V1, ModelType::Ca) => {
                return Err(not_supported("Continuous actions", protocol));
            }
            (ProtocolVersion::V2, _) => Interactions::Generic(GenericEventLogger::new(
                config,
                INTERACTION_SECTION,
                extensions,
                dependencies,
            )?),
        };
        Ok(Self {
            model_type,
            protocol,
            loggers,
        })
    }

    pub fn init(&mut self, sender: Box<dyn Sender>) -> Result<()> {
        match &mut self.loggers {
            Interactions::Ranking(logger) => logger.init(sender),
            Interactions::Decision(logger) => logger.init(sender),
            Interactions::MultiSlot(logger) => logger.init(sender),
            Interactions::Generic(logger) => logger.init(sender),
        }
    }

    pub fn model_type(&self) -> ModelType {
        self.model_type
    }

    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    /// Contextual bandit ranking.
    pub fn log(&self, context: &str, flags: ActionFlags, response: &RankingResponse) -> Result<()> {
        match &self.loggers {
            Interactions::Ranking(logger) => logger.log(context, flags, response),
            Interactions::Generic(logger) => logger.log_cb(context, flags, response),
            _ => Err(not_supported("Rankings", self.protocol)),
        }
    }

    /// One ranking per slot, protocol 1 only.
    pub fn log_decisions(
        &self,
        slot_ids: &[String],
        context: &str,
        flags: ActionFlags,
        action_ids: Vec<Vec<u64>>,
        probabilities: Vec<Vec<f32>>,
        model_id: &str,
    ) -> Result<()> {
        match &self.loggers {
            Interactions::Decision(logger) => logger.log_decisions(
                slot_ids,
                context,
                flags,
                action_ids,
                probabilities,
                model_id,
            ),
            _ => Err(not_supported("Per slot decisions", self.protocol)),
        }
    }

    /// Slates, or conditional contextual bandit decisions under protocol 2.
    pub fn log_decision(
        &self,
        event_id: &str,
        context: &str,
        flags: ActionFlags,
        slots: Vec<SlotRanking>,
        baseline_actions: Vec<i32>,
        model_id: &str,
    ) -> Result<()> {
        match &self.loggers {
            Interactions::MultiSlot(logger) => {
                logger.log_decision(event_id, context, flags, slots, baseline_actions, model_id)
            }
            Interactions::Generic(logger) => {
                let model_id = model_id.to_string();
                let learning_mode = logger.learning_mode();
                let deferred = flags.is_deferred();
                let payload = match self.model_type {
                    ModelType::Slates => GenericPayload::Slates {
                        slots,
                        baseline_actions,
                        model_id,
                        learning_mode,
                        deferred,
                    },
                    ModelType::Ccb => GenericPayload::Ccb {
                        slots,
                        baseline_actions,
                        model_id,
                        learning_mode,
                        deferred,
                    },
                    other => {
                        return Err(Error::InvalidArgument(format!(
                            "Multi-slot decisions need a slates or CCB model, not {other}"
                        )));
                    }
                };
                logger.log(event_id, context, payload)
            }
            _ => Err(not_supported("Multi-slot decisions", self.protocol)),
        }
    }

    pub fn log_continuous_action(
        &self,
        event_id: &str,
        context: &str,
        flags: ActionFlags,
        action: f32,
        pdf_value: f32,
        model_id: &str,
    ) -> Result<()> {
        match &self.loggers {
            Interactions::Generic(logger) => logger.log(
                event_id,
                context,
                GenericPayload::Ca {
                    action,
                    pdf_value,
                    model_id: model_id.to_string(),
                    deferred: flags.is_deferred(),
                },
            ),
            _ => Err(not_supported("Continuous actions", self.protocol)),
        }
    }

    /// One step of an episode, keyed by the episode id.
    pub fn log_multistep(
        &self,
        episode_id: &str,
        previous_id: Option<&str>,
        context: &str,
        flags: ActionFlags,
        response: &RankingResponse,
    ) -> Result<()> {
        match &self.loggers {
            Interactions::Generic(logger) => logger.log(
                episode_id,
                context,
                GenericPayload::MultiStep {
                    event_id: response.event_id.clone(),
                    action_ids: response.ranking.iter().map(|a| a.action_id + 1).collect(),
                    probabilities: response.ranking.iter().map(|a| a.probability).collect(),
                    model_id: response.model_id.clone(),
                    previous_id: previous_id.map(str::to_string),
                    deferred: flags.is_deferred(),
                },
            ),
            _ => Err(not_supported("Multi-step decisions", self.protocol)),
        }
    }

    pub fn logger(&self) -> &EventLogger {
        match &self.loggers {
            Interactions::Ranking(logger) => logger.logger(),
            Interactions::Decision(logger) => logger.logger(),
            Interactions::MultiSlot(logger) => logger.logger(),
            Interactions::Generic(logger) => logger.logger(),
        }
    }
}

enum Observations {
    Json(ObservationLogger),
    Generic(GenericEventLogger),
}

/// Logs outcomes in the configured protocol.
pub struct ObservationLoggerFacade {
    protocol: ProtocolVersion,
    loggers: Observations,
}

impl ObservationLoggerFacade {
    pub fn new(config: &Configuration, dependencies: &Dependencies) -> Result<Self> {
        let protocol = ProtocolVersion::from_configuration(config)?;
        let loggers = match protocol {
            ProtocolVersion::V1 => Observations::Json(ObservationLogger::new(
                config,
                &DefaultExtensions,
                dependencies,
            )?),
            ProtocolVersion::V2 => Observations::Generic(GenericEventLogger::new(
                config,
                OBSERVATION_SECTION,
                Arc::new(DefaultExtensions),
                dependencies,
            )?),
        };
        Ok(Self { protocol, loggers })
    }

    pub fn init(&mut self, sender: Box<dyn Sender>) -> Result<()> {
        match &mut self.loggers {
            Observations::Json(logger) => logger.init(sender),
            Observations::Generic(logger) => logger.init(sender),
        }
    }

    pub fn protocol(&self) -> ProtocolVersion {
        self.protocol
    }

    pub fn log_outcome(&self, event_id: &str, value: OutcomeValue) -> Result<()> {
        match &self.loggers {
            Observations::Json(logger) => logger.log_outcome(event_id, value),
            Observations::Generic(logger) => logger.log_outcome(event_id, value, None),
        }
    }

    /// Outcome of one slot or step of `primary_id`, protocol 2 only.
    pub fn log_outcome_at(
        &self,
        primary_id: &str,
        index: OutcomeIndex,
        value: OutcomeValue,
    ) -> Result<()> {
        match &self.loggers {
            Observations::Generic(logger) => logger.log_outcome(primary_id, value, Some(index)),
            Observations::Json(_) => Err(not_supported("Indexed outcomes", self.protocol)),
        }
    }

    pub fn report_action_taken(&self, event_id: &str) -> Result<()> {
        match &self.loggers {
            Observations::Json(logger) => logger.report_action_taken(event_id),
            Observations::Generic(logger) => logger.report_action_taken(event_id, None),
        }
    }

    pub fn report_action_taken_at(&self, primary_id: &str, secondary_id: &str) -> Result<()> {
        match &self.loggers {
            Observations::Generic(logger) => logger.report_action_taken(
                primary_id,
                Some(OutcomeIndex::Literal(secondary_id.to_string())),
            ),
            Observations::Json(_) => Err(not_supported("Indexed outcomes", self.protocol)),
        }
    }

    pub fn logger(&self) -> &EventLogger {
        match &self.loggers {
            Observations::Json(logger) => logger.logger(),
            Observations::Generic(logger) => logger.logger(),
        }
    }
}

/// Episode starts, which only exist in protocol 2. Shares the observation settings.
pub struct EpisodeLoggerFacade {
    logger: GenericEventLogger,
}

impl EpisodeLoggerFacade {
    pub fn new(config: &Configuration, dependencies: &Dependencies) -> Result<Self> {
        let protocol = ProtocolVersion::from_configuration(config)?;
        if protocol != ProtocolVersion::V2 {
            return Err(not_supported("Episodes", protocol));
        }
        Ok(Self {
            logger: GenericEventLogger::new(
                config,
                OBSERVATION_SECTION,
                Arc::new(DefaultExtensions),
                dependencies,
            )?,
        })
    }

    pub fn init(&mut self, sender: Box<dyn Sender>) -> Result<()> {
        self.logger.init(sender)
    }

    pub fn log(&self, episode_id: &str) -> Result<()> {
        self.logger.log_episode_start(episode_id)
    }

    pub fn logger(&self) -> &EventLogger {
        self.logger.logger()
    }
}

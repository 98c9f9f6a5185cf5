// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Client side telemetry pipeline for reinforcement learning decisions.
//!
//! Loggers turn decisions and outcomes into events, an [`async_batcher::AsyncBatcher`] per
//! logger queues them, and a drain thread serializes them into preamble framed buffers that
//! a [`sender::Sender`] ships. Generic events can optionally move repeated actions into a
//! shared dictionary ([`dedup`]) and compress their payloads.

#![deny(clippy::unwrap_used)]
#![deny(unused_extern_crates)]
#![deny(unused_allocation)]

pub mod action_dict;
pub mod async_batcher;
pub mod buffer;
pub mod config;
pub mod constants;
pub mod dedup;
pub mod errors;
pub mod event;
pub mod event_logger;
pub mod event_queue;
pub mod extensions;
pub mod hash;
pub mod logger_facade;
pub mod payload;
pub mod sender;
pub mod serializer;
pub mod time;
pub mod trace_logger;

pub use config::{BatcherConfig, Configuration, LearningMode, ModelType, ProtocolVersion};
pub use errors::{Error, ErrorCallback, Result};
pub use event::{ActionFlags, OutcomeValue, RankingResponse, SlotRanking};
pub use event_logger::{
    DecisionLogger, GenericEventLogger, InteractionLogger, MultiSlotLogger, ObservationLogger,
};
pub use extensions::{get_extensions, Dependencies, LoggerExtensions};
pub use logger_facade::{EpisodeLoggerFacade, InteractionLoggerFacade, ObservationLoggerFacade};
pub use sender::{FileSender, Sender};

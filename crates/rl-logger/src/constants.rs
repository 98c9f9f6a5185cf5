// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Configuration keys, defaults and wire identifiers.

pub const INTERACTION_SECTION: &str = "interaction";
pub const OBSERVATION_SECTION: &str = "observation";

pub const APP_ID: &str = "appid";
pub const SEND_HIGH_WATER_MARK: &str = "send.highwatermark";
pub const SEND_BATCH_INTERVAL_MS: &str = "send.batchintervalms";
pub const SEND_QUEUE_MAX_CAPACITY_KB: &str = "send.queue.maxcapacity.kb";
pub const QUEUE_MODE: &str = "queue.mode";
pub const CONTENT_ENCODING: &str = "batch.content.encoding";
pub const SUBSAMPLE_RATE: &str = "subsample.rate";
pub const EVENTS_COUNTER_STATUS: &str = "events.counter.status";
pub const ZSTD_COMPRESSION_LEVEL: &str = "zstd.compression.level";
pub const LEARNING_MODE: &str = "rank.learning.mode";
pub const TRACE_LOG_IMPLEMENTATION: &str = "trace.logger.implementation";
pub const FILE_NAME: &str = "file.name";
pub const PROTOCOL_VERSION: &str = "protocol.version";

pub const TRACING_TRACE_LOGGER: &str = "TRACING_TRACE_LOGGER";
pub const NULL_TRACE_LOGGER: &str = "NULL_TRACE_LOGGER";

pub const DEFAULT_SEND_HIGH_WATER_MARK: usize = 198 * 1024;
pub const DEFAULT_SEND_BATCH_INTERVAL_MS: u64 = 1000;
pub const DEFAULT_SEND_QUEUE_MAX_CAPACITY_KB: usize = 16 * 1024;
pub const DEFAULT_SUBSAMPLE_RATE: f32 = 1.0;
pub const DEFAULT_ZSTD_COMPRESSION_LEVEL: i32 = 1;
pub const DEFAULT_PROTOCOL_VERSION: i64 = 1;

pub const EWMA_INITIAL_VALUE: f32 = 1.0;
pub const EWMA_WEIGHT: f32 = 0.5;

/// Survival probability applied to every queued event when a full DROP queue is pruned.
pub const DROP_MODE_PASS_PROB: f32 = 0.5;

/// Drop pass used for subsampling, distinct from any pass a pruning queue reaches.
pub const SUBSAMPLE_DROP_PASS: u32 = u32::MAX;

/// Id carried by the synthetic dictionary event of a deduplicated batch.
pub const DEDUP_DICT_EVENT_ID: &str = "3defd95a-0122-4aac-9068-0b9ac30b66d8";

pub const PREAMBLE_VERSION: u8 = 1;
pub const PREAMBLE_SIZE: usize = 8;

pub mod message_type {
    pub const UNKNOWN: u16 = 0;
    pub const JSON_RANKING_EVENT_COLLECTION: u16 = 3;
    pub const JSON_OUTCOME_EVENT_COLLECTION: u16 = 4;
    pub const GENERIC_EVENT_COLLECTION: u16 = 11;
    pub const JSON_DECISION_EVENT_COLLECTION: u16 = 12;
    pub const JSON_MULTI_SLOT_EVENT_COLLECTION: u16 = 13;
}

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::async_batcher::AsyncBatcher;
use crate::config::{BatcherConfig, Configuration, ContentEncoding};
use crate::constants::INTERACTION_SECTION;
use crate::dedup::{DedupState, ZstdCompressor};
use crate::errors::{ErrorCallback, Result};
use crate::event::EventEncoding;
use crate::serializer::SerializerKind;
use crate::time::{ClockTimeProvider, TimeProvider};
use crate::trace_logger::{trace_logger_from_configuration, TraceLogger};
use std::borrow::Cow;
use std::sync::Arc;

/// Collaborators handed to every batcher and logger instead of global factories.
#[derive(Clone, Default)]
pub struct Dependencies {
    pub time_provider: Option<Arc<dyn TimeProvider>>,
    pub trace_logger: Option<Arc<dyn TraceLogger>>,
    pub error_callback: Option<ErrorCallback>,
}

impl Dependencies {
    /// System clock and the configured trace logger, without an error callback.
    pub fn from_configuration(config: &Configuration) -> Result<Self> {
        Ok(Self {
            time_provider: Some(Arc::new(ClockTimeProvider)),
            trace_logger: Some(trace_logger_from_configuration(config)?),
            error_callback: None,
        })
    }

    pub fn with_error_callback(mut self, callback: ErrorCallback) -> Self {
        self.error_callback = Some(callback);
        self
    }
}

/// Hooks applied to generic events when they are materialized.
pub trait LoggerExtensions: Send + Sync {
    fn is_object_extraction_enabled(&self) -> bool;

    fn is_serialization_transform_enabled(&self) -> bool;

    /// Returns the context to serialize and the dictionary objects it now references.
    fn transform_payload_and_extract_objects<'a>(
        &self,
        context: &'a str,
    ) -> Result<(Cow<'a, str>, Vec<u64>)>;

    fn transform_serialized_payload(&self, payload: Vec<u8>) -> Result<(Vec<u8>, EventEncoding)>;

    fn dedup_state(&self) -> Option<Arc<DedupState>>;

    fn create_batcher(
        &self,
        section: &str,
        config: BatcherConfig,
        kind: SerializerKind,
        dependencies: &Dependencies,
    ) -> AsyncBatcher {
        // Only interactions extract objects into the dictionary.
        let dedup = match kind {
            SerializerKind::Generic if section == INTERACTION_SECTION => self.dedup_state(),
            _ => None,
        };
        AsyncBatcher::new(
            section,
            config,
            kind,
            dedup,
            dependencies.trace_logger.clone(),
            dependencies.error_callback.clone(),
        )
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultExtensions;

impl LoggerExtensions for DefaultExtensions {
    fn is_object_extraction_enabled(&self) -> bool {
        false
    }

    fn is_serialization_transform_enabled(&self) -> bool {
        false
    }

    fn transform_payload_and_extract_objects<'a>(
        &self,
        context: &'a str,
    ) -> Result<(Cow<'a, str>, Vec<u64>)> {
        Ok((Cow::Borrowed(context), Vec::new()))
    }

    fn transform_serialized_payload(&self, payload: Vec<u8>) -> Result<(Vec<u8>, EventEncoding)> {
        Ok((payload, EventEncoding::Identity))
    }

    fn dedup_state(&self) -> Option<Arc<DedupState>> {
        None
    }
}

/// Moves actions into the shared dictionary and compresses serialized payloads.
pub struct DedupExtensions {
    state: Arc<DedupState>,
}

impl DedupExtensions {
    pub fn new(state: Arc<DedupState>) -> Self {
        Self { state }
    }
}

impl LoggerExtensions for DedupExtensions {
    fn is_object_extraction_enabled(&self) -> bool {
        true
    }

    fn is_serialization_transform_enabled(&self) -> bool {
        true
    }

    fn transform_payload_and_extract_objects<'a>(
        &self,
        context: &'a str,
    ) -> Result<(Cow<'a, str>, Vec<u64>)> {
        let (edited, objects) = self.state.transform_payload_and_add_objects(context)?;
        Ok((Cow::Owned(edited), objects))
    }

    fn transform_serialized_payload(&self, mut payload: Vec<u8>) -> Result<(Vec<u8>, EventEncoding)> {
        self.state.compress(&mut payload)?;
        Ok((payload, EventEncoding::Zstd))
    }

    fn dedup_state(&self) -> Option<Arc<DedupState>> {
        Some(Arc::clone(&self.state))
    }
}

/// Extensions selected by the interaction section's content encoding.
pub fn get_extensions(
    config: &Configuration,
    time_provider: Option<Arc<dyn TimeProvider>>,
) -> Result<Arc<dyn LoggerExtensions>> {
    let batcher_config = BatcherConfig::from_configuration(config, INTERACTION_SECTION)?;
    let extensions: Arc<dyn LoggerExtensions> = match batcher_config.content_encoding {
        ContentEncoding::ZstdAndDedup => {
            let compressor = ZstdCompressor::new(batcher_config.zstd_compression_level);
            Arc::new(DedupExtensions::new(Arc::new(DedupState::new(
                compressor,
                time_provider,
            ))))
        }
        ContentEncoding::Identity => Arc::new(DefaultExtensions),
    };
    Ok(extensions)
}

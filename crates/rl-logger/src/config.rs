// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants;
use crate::errors::{Error, Result};
use derive_more::Display;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

/// String key/value settings with typed accessors.
///
/// Section lookups try `"<section>.<key>"` first and fall back to the bare key.
#[derive(Debug, Clone, Default)]
pub struct Configuration {
    values: BTreeMap<String, String>,
}

impl Configuration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn get_or<'a>(&'a self, key: &str, default: &'a str) -> &'a str {
        self.get(key).unwrap_or(default)
    }

    pub fn get_int(&self, key: &str, default: i64) -> i64 {
        self.get(key)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn get_float(&self, key: &str, default: f32) -> f32 {
        self.get(key)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        match self.get(key).map(str::trim) {
            Some(value) if value.eq_ignore_ascii_case("true") => true,
            Some(value) if value.eq_ignore_ascii_case("false") => false,
            _ => default,
        }
    }

    /// Looks up `"<section>.<key>"`, then `key`.
    pub fn get_in_section(&self, section: &str, key: &str) -> Option<&str> {
        self.get(&format!("{section}.{key}"))
            .or_else(|| self.get(key))
    }

    fn section_int(&self, section: &str, key: &str, default: i64) -> i64 {
        self.get_in_section(section, key)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(default)
    }

    fn section_float(&self, section: &str, key: &str, default: f32) -> f32 {
        self.get_in_section(section, key)
            .and_then(|value| value.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Configuration {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut config = Configuration::new();
        for (key, value) in iter {
            config.set(key, value);
        }
        config
    }
}

impl fmt::Display for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in self.iter() {
            writeln!(f, "{key}: {value}")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum QueueMode {
    #[display("DROP")]
    Drop,
    #[display("BLOCK")]
    Block,
}

impl QueueMode {
    /// `BLOCK` in any case selects blocking, everything else drops.
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("BLOCK") {
            QueueMode::Block
        } else {
            QueueMode::Drop
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ContentEncoding {
    #[display("IDENTITY")]
    Identity,
    #[display("ZSTD_AND_DEDUP")]
    ZstdAndDedup,
}

impl ContentEncoding {
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("ZSTD_AND_DEDUP") {
            ContentEncoding::ZstdAndDedup
        } else {
            ContentEncoding::Identity
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum EventsCounterStatus {
    #[display("ENABLE")]
    Enable,
    #[display("DISABLE")]
    Disable,
}

impl EventsCounterStatus {
    pub fn parse(value: &str) -> Self {
        if value.trim().eq_ignore_ascii_case("ENABLE") {
            EventsCounterStatus::Enable
        } else {
            EventsCounterStatus::Disable
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LearningMode {
    #[default]
    #[display("ONLINE")]
    Online,
    #[display("APPRENTICE")]
    Apprentice,
    #[display("LOGGINGONLY")]
    LoggingOnly,
}

impl LearningMode {
    pub fn parse(value: &str) -> Result<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "ONLINE" => Ok(LearningMode::Online),
            "APPRENTICE" => Ok(LearningMode::Apprentice),
            "LOGGINGONLY" => Ok(LearningMode::LoggingOnly),
            other => Err(Error::InvalidArgument(format!(
                "Unknown learning mode '{other}'"
            ))),
        }
    }

    pub fn from_configuration(config: &Configuration) -> Result<Self> {
        config
            .get(constants::LEARNING_MODE)
            .map_or(Ok(LearningMode::Online), LearningMode::parse)
    }
}

/// Wire protocol of the loggers, from `protocol.version`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ProtocolVersion {
    /// Json collections of typed events.
    #[display("1")]
    V1,
    /// Generic events, optionally deduplicated.
    #[display("2")]
    V2,
}

impl ProtocolVersion {
    pub fn from_configuration(config: &Configuration) -> Result<Self> {
        match config.get_int(constants::PROTOCOL_VERSION, constants::DEFAULT_PROTOCOL_VERSION) {
            1 => Ok(ProtocolVersion::V1),
            2 => Ok(ProtocolVersion::V2),
            other => Err(Error::ProtocolNotSupported(format!(
                "Protocol version {other} is not supported"
            ))),
        }
    }
}

/// Kind of decision the served model makes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ModelType {
    #[display("CB")]
    Cb,
    #[display("CCB")]
    Ccb,
    #[display("SLATES")]
    Slates,
    #[display("CA")]
    Ca,
}

/// Immutable settings of one async batcher, read once at construction.
#[derive(Debug, Clone, PartialEq)]
pub struct BatcherConfig {
    /// Bytes after which a buffer is closed and sent
    pub send_high_water_mark: usize,
    pub send_batch_interval_ms: u64,
    /// Queue capacity in bytes
    pub send_queue_max_capacity: usize,
    pub queue_mode: QueueMode,
    pub subsample_rate: f32,
    pub content_encoding: ContentEncoding,
    pub events_counter_status: EventsCounterStatus,
    pub zstd_compression_level: i32,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            send_high_water_mark: constants::DEFAULT_SEND_HIGH_WATER_MARK,
            send_batch_interval_ms: constants::DEFAULT_SEND_BATCH_INTERVAL_MS,
            send_queue_max_capacity: constants::DEFAULT_SEND_QUEUE_MAX_CAPACITY_KB * 1024,
            queue_mode: QueueMode::Drop,
            subsample_rate: constants::DEFAULT_SUBSAMPLE_RATE,
            content_encoding: ContentEncoding::Identity,
            events_counter_status: EventsCounterStatus::Disable,
            zstd_compression_level: constants::DEFAULT_ZSTD_COMPRESSION_LEVEL,
        }
    }
}

impl BatcherConfig {
    pub fn from_configuration(config: &Configuration, section: &str) -> Result<Self> {
        let defaults = BatcherConfig::default();
        let queue_max_capacity_kb = config.section_int(
            section,
            constants::SEND_QUEUE_MAX_CAPACITY_KB,
            constants::DEFAULT_SEND_QUEUE_MAX_CAPACITY_KB as i64,
        );

        let batcher_config = Self {
            send_high_water_mark: non_negative(config.section_int(
                section,
                constants::SEND_HIGH_WATER_MARK,
                defaults.send_high_water_mark as i64,
            ))?,
            send_batch_interval_ms: non_negative(config.section_int(
                section,
                constants::SEND_BATCH_INTERVAL_MS,
                defaults.send_batch_interval_ms as i64,
            ))? as u64,
            send_queue_max_capacity: non_negative(queue_max_capacity_kb)?.saturating_mul(1024),
            queue_mode: config
                .get_in_section(section, constants::QUEUE_MODE)
                .map_or(defaults.queue_mode, QueueMode::parse),
            subsample_rate: config.section_float(
                section,
                constants::SUBSAMPLE_RATE,
                defaults.subsample_rate,
            ),
            content_encoding: config
                .get_in_section(section, constants::CONTENT_ENCODING)
                .map_or(defaults.content_encoding, ContentEncoding::parse),
            events_counter_status: config
                .get_in_section(section, constants::EVENTS_COUNTER_STATUS)
                .map_or(defaults.events_counter_status, EventsCounterStatus::parse),
            zstd_compression_level: config.section_int(
                section,
                constants::ZSTD_COMPRESSION_LEVEL,
                defaults.zstd_compression_level as i64,
            ) as i32,
        };

        batcher_config.validate()?;
        Ok(batcher_config)
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.subsample_rate > 0.0 && self.subsample_rate <= 1.0) {
            return Err(Error::InvalidArgument(format!(
                "Subsample rate must be in (0, 1], got {}",
                self.subsample_rate
            )));
        }

        if self.send_batch_interval_ms == 0 {
            return Err(Error::InvalidArgument(
                "Batch interval must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    pub fn batch_interval(&self) -> Duration {
        Duration::from_millis(self.send_batch_interval_ms)
    }

    pub fn is_subsampled(&self) -> bool {
        self.subsample_rate < 1.0
    }
}

impl fmt::Display for BatcherConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "high water mark: {}, batch interval: {}ms, queue max capacity: {}, queue mode: {}, \
             subsample rate: {}, content encoding: {}, events counter: {}",
            self.send_high_water_mark,
            self.send_batch_interval_ms,
            self.send_queue_max_capacity,
            self.queue_mode,
            self.subsample_rate,
            self.content_encoding,
            self.events_counter_status
        )
    }
}

fn non_negative(value: i64) -> Result<usize> {
    usize::try_from(value).map_err(|_| {
        Error::InvalidArgument(format!("Expected a non-negative value, got {value}"))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = BatcherConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.send_high_water_mark, 198 * 1024);
        assert_eq!(config.send_queue_max_capacity, 16 * 1024 * 1024);
        assert_eq!(config.queue_mode, QueueMode::Drop);
    }

    #[test]
    fn test_section_key_takes_precedence() {
        let config: Configuration = [
            ("interaction.send.highwatermark", "10"),
            ("send.highwatermark", "20"),
            ("send.batchintervalms", "50"),
            ("queue.mode", "block"),
        ]
        .into_iter()
        .collect();

        let interaction = BatcherConfig::from_configuration(&config, "interaction").unwrap();
        assert_eq!(interaction.send_high_water_mark, 10);
        assert_eq!(interaction.send_batch_interval_ms, 50);
        assert_eq!(interaction.queue_mode, QueueMode::Block);

        let observation = BatcherConfig::from_configuration(&config, "observation").unwrap();
        assert_eq!(observation.send_high_water_mark, 20);
    }

    #[test]
    fn test_queue_max_capacity_is_in_kilobytes() {
        let config: Configuration = [("send.queue.maxcapacity.kb", "2")].into_iter().collect();
        let batcher = BatcherConfig::from_configuration(&config, "interaction").unwrap();
        assert_eq!(batcher.send_queue_max_capacity, 2048);
    }

    #[test]
    fn test_invalid_subsample_rate() {
        for rate in ["0", "-0.5", "1.5"] {
            let config: Configuration = [("subsample.rate", rate)].into_iter().collect();
            assert!(
                BatcherConfig::from_configuration(&config, "interaction").is_err(),
                "rate {rate} should be rejected"
            );
        }
    }

    #[test]
    fn test_queue_mode_parse() {
        assert_eq!(QueueMode::parse("BLOCK"), QueueMode::Block);
        assert_eq!(QueueMode::parse("bLoCk"), QueueMode::Block);
        assert_eq!(QueueMode::parse("DROP"), QueueMode::Drop);
        assert_eq!(QueueMode::parse("anything"), QueueMode::Drop);
        assert_eq!(QueueMode::parse(""), QueueMode::Drop);
    }

    #[test]
    fn test_typed_getters_fall_back() {
        let config: Configuration = [("a", "not-a-number"), ("b", "TRUE"), ("c", "0.25")]
            .into_iter()
            .collect();
        assert_eq!(config.get_int("a", 7), 7);
        assert!(config.get_bool("b", false));
        assert!(!config.get_bool("missing", false));
        assert_eq!(config.get_float("c", 1.0), 0.25);
    }

    #[test]
    fn test_learning_mode() {
        let config: Configuration = [("rank.learning.mode", "apprentice")].into_iter().collect();
        assert_eq!(
            LearningMode::from_configuration(&config).unwrap(),
            LearningMode::Apprentice
        );
        assert!(LearningMode::parse("bogus").is_err());
        assert_eq!(
            LearningMode::from_configuration(&Configuration::new()).unwrap(),
            LearningMode::Online
        );
    }

    #[test]
    fn test_display() {
        let config: Configuration = [("b", "2"), ("a", "1")].into_iter().collect();
        assert_eq!(config.to_string(), "a: 1\nb: 2\n");
        assert!(BatcherConfig::default()
            .to_string()
            .contains("queue mode: DROP"));
    }

    #[test]
    fn test_protocol_version() {
        assert_eq!(
            ProtocolVersion::from_configuration(&Configuration::new()).unwrap(),
            ProtocolVersion::V1
        );
        let config: Configuration = [("protocol.version", "2")].into_iter().collect();
        assert_eq!(
            ProtocolVersion::from_configuration(&config).unwrap(),
            ProtocolVersion::V2
        );
        let config: Configuration = [("protocol.version", "3")].into_iter().collect();
        assert!(matches!(
            ProtocolVersion::from_configuration(&config),
            Err(Error::ProtocolNotSupported(_))
        ));
    }
}

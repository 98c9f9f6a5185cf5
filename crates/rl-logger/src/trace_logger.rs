// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::config::Configuration;
use crate::constants;
use crate::errors::{Error, Result};
use derive_more::Display;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Display)]
pub enum LogLevel {
    #[display("DEBUG")]
    Debug,
    #[display("INFO")]
    Info,
    #[display("WARN")]
    Warn,
    #[display("ERROR")]
    Error,
}

/// Observational sink for pipeline diagnostics. Never affects control flow.
pub trait TraceLogger: Send + Sync {
    fn log(&self, level: LogLevel, message: &str);
}

/// Forwards trace messages to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingTraceLogger;

impl TraceLogger for TracingTraceLogger {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Debug => debug!("{message}"),
            LogLevel::Info => info!("{message}"),
            LogLevel::Warn => warn!("{message}"),
            LogLevel::Error => error!("{message}"),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NullTraceLogger;

impl TraceLogger for NullTraceLogger {
    fn log(&self, _level: LogLevel, _message: &str) {}
}

/// Picks the trace logger named by `trace.logger.implementation`.
pub fn trace_logger_from_configuration(config: &Configuration) -> Result<Arc<dyn TraceLogger>> {
    match config
        .get(constants::TRACE_LOG_IMPLEMENTATION)
        .unwrap_or(constants::TRACING_TRACE_LOGGER)
    {
        constants::TRACING_TRACE_LOGGER => Ok(Arc::new(TracingTraceLogger)),
        constants::NULL_TRACE_LOGGER => Ok(Arc::new(NullTraceLogger)),
        other => Err(Error::InvalidArgument(format!(
            "Unknown trace logger implementation '{other}'"
        ))),
    }
}

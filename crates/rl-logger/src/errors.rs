// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Arc;

/// Errors raised by the logging pipeline.
///
/// Errors that happen before an event is accepted are returned to the caller.
/// Anything that fails after that point is handed to the [`ErrorCallback`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Failed to parse json context: {0}")]
    JsonParse(String),

    #[error("Context does not contain any actions")]
    JsonNoActionsFound,

    #[error("Compression error: {0}")]
    Compression(String),

    #[error("Logger is not initialized")]
    NotInitialized,

    #[error("Logger is already initialized")]
    AlreadyInitialized,

    #[error("Unable to serialize unknown outcome type")]
    SerializeUnknownOutcomeType,

    #[error("Invalid preamble: {0}")]
    Preamble(String),

    #[error("Protocol not supported: {0}")]
    ProtocolNotSupported(String),

    #[error("Sender error: {0}")]
    Sender(String),

    #[error("Failed to start background thread: {0}")]
    BackgroundThreadStart(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Invoked on the drain thread for every failure that can no longer be returned to a caller.
pub type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;

// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::buffer::{DataBuffer, Preamble};
use crate::config::Configuration;
use crate::constants::{FILE_NAME, PREAMBLE_SIZE};
use crate::errors::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Transport for finalized buffers.
///
/// Only the drain thread of one batcher ever calls a sender, so implementations need not
/// support concurrent calls. Retries are the sender's concern.
#[async_trait]
pub trait Sender: Send {
    async fn init(&mut self) -> Result<()> {
        Ok(())
    }

    /// `buffer` starts with a stamped [`Preamble`].
    async fn send(&mut self, buffer: Arc<DataBuffer>) -> Result<()>;
}

/// Appends every buffer, preamble included, to a local file.
pub struct FileSender {
    path: PathBuf,
    file: Option<File>,
}

impl FileSender {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
        }
    }

    /// Reads `<section>.file.name`, then `file.name`.
    pub fn from_configuration(config: &Configuration, section: &str) -> Result<Self> {
        config
            .get_in_section(section, FILE_NAME)
            .map(FileSender::new)
            .ok_or_else(|| Error::InvalidArgument(format!("Missing {section}.{FILE_NAME}")))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Sender for FileSender {
    async fn init(&mut self) -> Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        self.file = Some(file);
        Ok(())
    }

    async fn send(&mut self, buffer: Arc<DataBuffer>) -> Result<()> {
        let file = self.file.as_mut().ok_or(Error::NotInitialized)?;
        file.write_all(buffer.as_bytes()).await?;
        file.flush().await?;
        debug!(
            "Wrote {} bytes to {}",
            buffer.as_bytes().len(),
            self.path.display()
        );
        Ok(())
    }
}

/// Splits a stream of sent buffers back into `(preamble, body)` pairs.
pub fn read_messages(mut bytes: &[u8]) -> Result<Vec<(Preamble, Vec<u8>)>> {
    let mut messages = Vec::new();
    while !bytes.is_empty() {
        let preamble = Preamble::read_from_bytes(bytes)?;
        let end = PREAMBLE_SIZE + preamble.msg_size as usize;
        if bytes.len() < end {
            return Err(Error::Preamble(format!(
                "Message of {} bytes is truncated",
                preamble.msg_size
            )));
        }
        messages.push((preamble, bytes[PREAMBLE_SIZE..end].to_vec()));
        bytes = &bytes[end..];
    }
    Ok(messages)
}

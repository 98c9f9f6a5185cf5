// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants::{PREAMBLE_SIZE, PREAMBLE_VERSION};
use crate::errors::{Error, Result};
use std::sync::Mutex;

/// Fixed header in front of every sent buffer.
///
/// Layout: `reserved: u8, version: u8, msg_type: u16 BE, msg_size: u32 BE`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Preamble {
    pub reserved: u8,
    pub version: u8,
    pub msg_type: u16,
    pub msg_size: u32,
}

impl Preamble {
    pub fn new(msg_type: u16, msg_size: u32) -> Self {
        Self {
            reserved: 0,
            version: PREAMBLE_VERSION,
            msg_type,
            msg_size,
        }
    }

    pub fn write_to_bytes(&self, out: &mut [u8]) -> Result<()> {
        if out.len() < PREAMBLE_SIZE {
            return Err(Error::Preamble(format!(
                "Need {PREAMBLE_SIZE} bytes, got {}",
                out.len()
            )));
        }
        out[0] = self.reserved;
        out[1] = self.version;
        out[2..4].copy_from_slice(&self.msg_type.to_be_bytes());
        out[4..8].copy_from_slice(&self.msg_size.to_be_bytes());
        Ok(())
    }

    pub fn read_from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < PREAMBLE_SIZE {
            return Err(Error::Preamble(format!(
                "Need {PREAMBLE_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(Self {
            reserved: bytes[0],
            version: bytes[1],
            msg_type: u16::from_be_bytes([bytes[2], bytes[3]]),
            msg_size: u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]),
        })
    }
}

/// Byte buffer with room reserved for a [`Preamble`] ahead of the body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataBuffer {
    bytes: Vec<u8>,
}

impl Default for DataBuffer {
    fn default() -> Self {
        Self::new()
    }
}

impl DataBuffer {
    pub fn new() -> Self {
        Self {
            bytes: vec![0; PREAMBLE_SIZE],
        }
    }

    pub fn append(&mut self, data: &[u8]) {
        self.bytes.extend_from_slice(data);
    }

    pub fn body(&self) -> &[u8] {
        &self.bytes[PREAMBLE_SIZE..]
    }

    pub fn body_len(&self) -> usize {
        self.bytes.len() - PREAMBLE_SIZE
    }

    pub fn is_empty(&self) -> bool {
        self.body_len() == 0
    }

    /// Preamble followed by the body.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn reset(&mut self) {
        self.bytes.truncate(PREAMBLE_SIZE);
        self.bytes[..PREAMBLE_SIZE].fill(0);
    }

    /// Stamps the preamble for the current body.
    pub fn write_preamble(&mut self, msg_type: u16) -> Result<()> {
        let msg_size = u32::try_from(self.body_len()).map_err(|_| {
            Error::Preamble(format!("Body of {} bytes is too large", self.body_len()))
        })?;
        Preamble::new(msg_type, msg_size).write_to_bytes(&mut self.bytes[..PREAMBLE_SIZE])
    }

    pub fn preamble(&self) -> Result<Preamble> {
        Preamble::read_from_bytes(&self.bytes)
    }
}

/// Recycles buffers between drain cycles.
#[derive(Debug, Default)]
pub struct BufferPool {
    buffers: Mutex<Vec<DataBuffer>>,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::expect_used)]
    pub fn acquire(&self) -> DataBuffer {
        self.buffers
            .lock()
            .expect("lock poisoned")
            .pop()
            .unwrap_or_default()
    }

    #[allow(clippy::expect_used)]
    pub fn release(&self, mut buffer: DataBuffer) {
        buffer.reset();
        self.buffers.lock().expect("lock poisoned").push(buffer);
    }

    #[allow(clippy::expect_used)]
    pub fn len(&self) -> usize {
        self.buffers.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_preamble_layout() {
        let mut buffer = DataBuffer::new();
        buffer.append(b"hello");
        buffer.write_preamble(0x0102).unwrap();
        assert_eq!(&buffer.as_bytes()[..PREAMBLE_SIZE], &[0, 1, 1, 2, 0, 0, 0, 5]);
        assert_eq!(buffer.preamble().unwrap(), Preamble::new(0x0102, 5));
        assert_eq!(buffer.body(), b"hello");
    }

    #[test]
    fn test_preamble_needs_eight_bytes() {
        assert!(matches!(Preamble::read_from_bytes(&[0; 7]), Err(Error::Preamble(_))));
        assert!(Preamble::new(1, 1).write_to_bytes(&mut [0; 4]).is_err());
    }

    #[test]
    fn test_pool_resets_buffers() {
        let pool = BufferPool::new();
        let mut buffer = pool.acquire();
        buffer.append(b"data");
        buffer.write_preamble(3).unwrap();
        pool.release(buffer);
        assert_eq!(pool.len(), 1);

        let buffer = pool.acquire();
        assert!(buffer.is_empty());
        assert_eq!(buffer.as_bytes(), &[0; PREAMBLE_SIZE]);
        assert!(pool.is_empty());
    }
}

use super::{AddrUnit, BusMap};
use thiserror::Error;

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("failed to load media image: {0}")]
    IoError(#[from] io::Error),

    #[error("media image is empty")]
    Empty,
}

/// A removable media image. The first 256 bytes are visible to the CPU
/// through a read-only window in the physical address space; the rest is
/// for the media controller peripheral to stream from.
pub struct Media {
    data: Box<[u8]>,
}

impl Media {
    pub fn from_file(path: &Path) -> Result<Self, MediaError> {
        let mut file = File::open(path)?;
        let mut data = Vec::new();

        file.read_to_end(&mut data)?;
        Self::from_bytes(data)
    }

    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, MediaError> {
        if bytes.is_empty() {
            return Err(MediaError::Empty);
        }
        Ok(Self {
            data: bytes.into_boxed_slice(),
        })
    }

    pub fn size(&self) -> usize {
        self.data.len()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Reads past the end of the image see open bus, all ones.
    pub fn load<T: AddrUnit>(&self, offset: u32) -> u32 {
        let offset = offset as usize;
        (0..T::WIDTH).fold(0, |val, byte| {
            let b = self.data.get(offset + byte).copied().unwrap_or(0xff);
            val | (b as u32) << (8 * byte)
        })
    }
}

impl BusMap for Media {
    const BUS_BEGIN: u32 = 0x1f00_0000;
    const BUS_END: u32 = Self::BUS_BEGIN + 0x100 - 1;
}

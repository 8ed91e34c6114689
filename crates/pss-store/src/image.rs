//! Persisting an [`InMemoryStore`] to a single image file.
//!
//! On-disk format:
//! ```text
//! [4 bytes: magic "PSSI"]
//! [4 bytes: format version (little-endian u32)]
//! [4 bytes: payload length (little-endian u32)]
//! [4 bytes: CRC32 of payload (little-endian u32)]
//! [N bytes: payload (bincode-serialized StoreImage)]
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::StoreConfig;
use crate::error::{StoreError, StoreResult};
use crate::memory::InMemoryStore;

const IMAGE_MAGIC: &[u8; 4] = b"PSSI";
const IMAGE_VERSION: u32 = 1;
const HEADER_SIZE: usize = 16;

/// Serialized contents of a store: every object plus the id allocator.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreImage {
    pub next_id: u32,
    pub objects: Vec<(u32, Vec<u8>)>,
}

impl StoreImage {
    /// Frame the image for disk.
    pub fn to_bytes(&self) -> StoreResult<Vec<u8>> {
        let payload =
            bincode::serialize(self).map_err(|e| StoreError::Serialization(e.to_string()))?;
        let length = u32::try_from(payload.len())
            .map_err(|_| StoreError::Serialization("image larger than 4 GiB".into()))?;

        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        buf.extend_from_slice(IMAGE_MAGIC);
        buf.extend_from_slice(&IMAGE_VERSION.to_le_bytes());
        buf.extend_from_slice(&length.to_le_bytes());
        buf.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
        buf.extend_from_slice(&payload);
        Ok(buf)
    }

    /// Validate framing and decode.
    pub fn from_bytes(data: &[u8]) -> StoreResult<Self> {
        if data.len() < HEADER_SIZE {
            return Err(StoreError::CorruptImage("image too short".into()));
        }
        if &data[0..4] != IMAGE_MAGIC {
            return Err(StoreError::CorruptImage(format!(
                "bad magic {:?}",
                String::from_utf8_lossy(&data[0..4])
            )));
        }
        let word = |at: usize| u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]]);
        let version = word(4);
        if version != IMAGE_VERSION {
            return Err(StoreError::CorruptImage(format!(
                "unsupported image version {version}"
            )));
        }
        let length = word(8) as usize;
        let expected_crc = word(12);
        let payload = &data[HEADER_SIZE..];
        if payload.len() != length {
            return Err(StoreError::CorruptImage(format!(
                "payload length {} does not match header {length}",
                payload.len()
            )));
        }
        if crc32fast::hash(payload) != expected_crc {
            return Err(StoreError::CorruptImage("CRC mismatch".into()));
        }
        bincode::deserialize(payload).map_err(|e| StoreError::Serialization(e.to_string()))
    }
}

impl InMemoryStore {
    /// Write the store's current contents to `path`, replacing any file there.
    pub fn save_image(&self, path: &Path) -> StoreResult<()> {
        let image = self.to_image();
        let bytes = image.to_bytes()?;
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let staging = path.with_extension("tmp");
        fs::write(&staging, &bytes)?;
        fs::rename(&staging, path)?;
        debug!(path = %path.display(), objects = image.objects.len(), bytes = bytes.len(), "saved store image");
        Ok(())
    }

    /// Load a store previously written by [`InMemoryStore::save_image`].
    pub fn open_image(path: &Path, config: StoreConfig) -> StoreResult<Self> {
        let bytes = fs::read(path)?;
        let image = StoreImage::from_bytes(&bytes)?;
        debug!(path = %path.display(), objects = image.objects.len(), "opened store image");
        Self::from_image(image, config)
    }
}

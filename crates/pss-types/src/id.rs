use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Identifier of one object within a store.
///
/// A `PssId` is opaque: callers never interpret its value beyond comparing it
/// with [`NO_PSS_ID`]. On the wire (root records, chunk tables) it is a
/// big-endian `u32`.
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PssId(u32);

/// The reserved "absent" identifier.
pub const NO_PSS_ID: PssId = PssId(0);

impl PssId {
    /// Wrap a raw identifier value.
    pub const fn new(raw: u32) -> Self {
        Self(raw)
    }

    /// The raw identifier value.
    pub const fn get(self) -> u32 {
        self.0
    }

    /// Returns `true` if this is [`NO_PSS_ID`].
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }

    /// Returns `true` unless this is [`NO_PSS_ID`].
    pub const fn is_some(self) -> bool {
        self.0 != 0
    }

    /// Big-endian wire encoding.
    pub const fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Decode from the big-endian wire encoding.
    pub fn from_be_slice(bytes: &[u8]) -> Result<Self, TypeError> {
        let arr: [u8; 4] = bytes.try_into().map_err(|_| TypeError::InvalidLength {
            expected: 4,
            actual: bytes.len(),
        })?;
        Ok(Self(u32::from_be_bytes(arr)))
    }

    /// Decode a packed array of big-endian ids, such as a chunk table.
    pub fn decode_table(bytes: &[u8]) -> Result<Vec<Self>, TypeError> {
        if bytes.len() % 4 != 0 {
            return Err(TypeError::InvalidLength {
                expected: bytes.len() - bytes.len() % 4,
                actual: bytes.len(),
            });
        }
        Ok(bytes
            .chunks_exact(4)
            .map(|w| Self(u32::from_be_bytes([w[0], w[1], w[2], w[3]])))
            .collect())
    }

    /// Encode ids as a packed big-endian array.
    pub fn encode_table(ids: &[Self]) -> Vec<u8> {
        ids.iter().flat_map(|id| id.to_be_bytes()).collect()
    }
}

impl fmt::Debug for PssId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PssId({})", self.0)
    }
}

impl fmt::Display for PssId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u32> for PssId {
    fn from(raw: u32) -> Self {
        Self(raw)
    }
}

impl From<PssId> for u32 {
    fn from(id: PssId) -> Self {
        id.0
    }
}

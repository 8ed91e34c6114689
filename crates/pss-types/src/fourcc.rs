use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// A four-character code packed big-endian into a `u32`, e.g. `'paok'`.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FourCc(u32);

impl FourCc {
    /// Build from four ASCII bytes.
    pub const fn new(code: &[u8; 4]) -> Self {
        Self(u32::from_be_bytes(*code))
    }

    /// Wrap a raw packed value.
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// The packed value.
    pub const fn raw(self) -> u32 {
        self.0
    }

    /// The four bytes of the code.
    pub const fn bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    /// Parse a four-character ASCII string.
    pub fn parse(s: &str) -> Result<Self, TypeError> {
        let bytes: [u8; 4] = s
            .as_bytes()
            .try_into()
            .map_err(|_| TypeError::InvalidFourCc(s.to_string()))?;
        if !bytes.iter().all(u8::is_ascii_graphic) {
            return Err(TypeError::InvalidFourCc(s.to_string()));
        }
        Ok(Self::new(&bytes))
    }
}

impl fmt::Debug for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FourCc('{self}')")
    }
}

impl fmt::Display for FourCc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.bytes() {
            if b.is_ascii_graphic() {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packs_big_endian() {
        let code = FourCc::new(b"paok");
        assert_eq!(code.raw(), 0x7061_6f6b);
        assert_eq!(code.bytes(), *b"paok");
    }

    #[test]
    fn parse_and_display() {
        let code = FourCc::parse("paok").unwrap();
        assert_eq!(code, FourCc::new(b"paok"));
        assert_eq!(code.to_string(), "paok");
    }

    #[test]
    fn parse_rejects_wrong_length() {
        assert!(FourCc::parse("pao").is_err());
        assert!(FourCc::parse("paok!").is_err());
        assert!(FourCc::parse("pa k").is_err());
    }

    #[test]
    fn display_escapes_binary() {
        assert_eq!(FourCc::from_raw(0).to_string(), "\\x00\\x00\\x00\\x00");
    }
}

use std::fmt;

use crate::error::{CompanderError, CompanderResult};

/// Stateless byte compressor.
pub trait Compressor: Send {
    /// Compress `src` into a fresh buffer.
    fn compress(&mut self, src: &[u8]) -> CompanderResult<Vec<u8>>;
}

/// Stateless byte decompressor.
pub trait Decompressor: Send {
    /// Decompress `src` into `dst`, returning the number of bytes produced.
    /// Fails with [`CompanderError::NoMemory`] if `dst` is too small.
    fn decompress(&mut self, src: &[u8], dst: &mut [u8]) -> CompanderResult<usize>;
}

/// Which codec a compander runs its chunks through.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CodecSpec {
    Zstd { level: i32 },
}

impl CodecSpec {
    /// Fast, lighter compression.
    pub const FAST: Self = Self::Zstd { level: 1 };
    /// The default level.
    pub const DEFAULT: Self = Self::Zstd { level: 3 };

    /// Build a fresh compressor/decompressor pair.
    pub fn build(self) -> CompanderResult<(Box<dyn Compressor>, Box<dyn Decompressor>)> {
        match self {
            Self::Zstd { level } => Ok((
                Box::new(ZstdCompressor::new(level)?),
                Box::new(ZstdDecompressor::new()?),
            )),
        }
    }
}

impl fmt::Display for CodecSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Zstd { level } => write!(f, "zstd-{level}"),
        }
    }
}

// ---------------------------------------------------------------------------
// zstd
// ---------------------------------------------------------------------------

/// zstd compressor with a reusable context.
pub struct ZstdCompressor {
    inner: zstd::bulk::Compressor<'static>,
}

impl ZstdCompressor {
    pub fn new(level: i32) -> CompanderResult<Self> {
        let inner = zstd::bulk::Compressor::new(level)
            .map_err(|e| CompanderError::Codec(e.to_string()))?;
        Ok(Self { inner })
    }
}

impl Compressor for ZstdCompressor {
    fn compress(&mut self, src: &[u8]) -> CompanderResult<Vec<u8>> {
        self.inner
            .compress(src)
            .map_err(|e| CompanderError::Codec(e.to_string()))
    }
}

/// zstd decompressor with a reusable context.
pub struct ZstdDecompressor {
    inner: zstd::bulk::Decompressor<'static>,
}

impl ZstdDecompressor {
    pub fn new() -> CompanderResult<Self> {
        let inner =
            zstd::bulk::Decompressor::new().map_err(|e| CompanderError::Codec(e.to_string()))?;
        Ok(Self { inner })
    }
}

impl Decompressor for ZstdDecompressor {
    fn decompress(&mut self, src: &[u8], dst: &mut [u8]) -> CompanderResult<usize> {
        match self.inner.decompress_to_buffer(src, dst) {
            Ok(n) => Ok(n),
            Err(e) => {
                // Tell "does not fit" apart from corrupt input.
                match zstd::decode_all(src) {
                    Ok(full) if full.len() > dst.len() => Err(CompanderError::NoMemory {
                        needed: full.len(),
                        capacity: dst.len(),
                    }),
                    _ => Err(CompanderError::Codec(e.to_string())),
                }
            }
        }
    }
}

/// A compressor, a decompressor, and a scratch buffer of `8 + block_size`
/// bytes for staging stored chunk bytes.
pub struct CodecSet {
    pub spec: CodecSpec,
    pub compressor: Box<dyn Compressor>,
    pub decompressor: Box<dyn Decompressor>,
    pub scratch: Vec<u8>,
}

impl CodecSet {
    pub fn new(spec: CodecSpec, block_size: usize) -> CompanderResult<Self> {
        let (compressor, decompressor) = spec.build()?;
        Ok(Self {
            spec,
            compressor,
            decompressor,
            scratch: vec![0u8; 8 + block_size],
        })
    }

    /// Capacity of the scratch buffer.
    pub fn scratch_len(&self) -> usize {
        self.scratch.len()
    }
}

impl fmt::Debug for CodecSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CodecSet")
            .field("spec", &self.spec)
            .field("scratch_len", &self.scratch.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn zstd_roundtrip() {
        let (mut c, mut d) = CodecSpec::DEFAULT.build().unwrap();
        let data = vec![0x41u8; 1024];
        let packed = c.compress(&data).unwrap();
        assert!(packed.len() < data.len());

        let mut out = vec![0u8; 1024];
        assert_eq!(d.decompress(&packed, &mut out).unwrap(), 1024);
        assert_eq!(out, data);
    }

    #[test]
    fn small_destination_is_no_memory() {
        let (mut c, mut d) = CodecSpec::FAST.build().unwrap();
        let packed = c.compress(&[7u8; 512]).unwrap();
        let mut out = vec![0u8; 100];
        let err = d.decompress(&packed, &mut out).unwrap_err();
        assert!(matches!(
            err,
            CompanderError::NoMemory { needed: 512, capacity: 100 }
        ));
    }

    #[test]
    fn garbage_input_is_codec_error() {
        let (_, mut d) = CodecSpec::DEFAULT.build().unwrap();
        let mut out = vec![0u8; 64];
        assert!(matches!(
            d.decompress(b"not a zstd frame", &mut out).unwrap_err(),
            CompanderError::Codec(_)
        ));
    }

    #[test]
    fn codec_set_scratch_is_block_plus_eight() {
        let set = CodecSet::new(CodecSpec::DEFAULT, 1024).unwrap();
        assert_eq!(set.scratch_len(), 1032);
    }

    #[test]
    fn spec_display() {
        assert_eq!(CodecSpec::FAST.to_string(), "zstd-1");
        assert_eq!(CodecSpec::DEFAULT.to_string(), "zstd-3");
    }

    proptest! {
        #[test]
        fn any_block_roundtrips(data in proptest::collection::vec(any::<u8>(), 0..=1024)) {
            let (mut c, mut d) = CodecSpec::FAST.build().unwrap();
            let packed = c.compress(&data).unwrap();
            let mut out = vec![0u8; data.len()];
            let n = d.decompress(&packed, &mut out).unwrap();
            prop_assert_eq!(n, data.len());
            prop_assert_eq!(out, data);
        }
    }
}

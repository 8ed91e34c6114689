use pss_compander::{
    CompanderError, CompanderRegistry, CompanderResult, PixelMapCompander, StoreCompander,
};

/// Per-compander hook consulted when a large object is created or opened.
///
/// A [`LargeObjectStore`](crate::LargeObjectStore) looks up an allocator by
/// compander name and falls back to [`ChunkTableAllocator`] when none is
/// registered.
pub trait LargeObjectAllocator: Send + Sync {
    /// Vet a parameter blob before anything is allocated.
    fn check_parameters(&self, _parms: Option<&[u8]>) -> CompanderResult<()> {
        Ok(())
    }

    /// Build the unbound compander for `name`.
    fn compander(
        &self,
        registry: &CompanderRegistry,
        name: &str,
    ) -> CompanderResult<Box<dyn StoreCompander>> {
        registry.make(name)
    }
}

/// The generic allocator: any registered compander, any parameters.
#[derive(Clone, Copy, Debug, Default)]
pub struct ChunkTableAllocator;

impl LargeObjectAllocator for ChunkTableAllocator {}

/// Allocator for pixel maps: insists on a row width up front.
#[derive(Clone, Copy, Debug, Default)]
pub struct PixelMapAllocator;

impl LargeObjectAllocator for PixelMapAllocator {
    fn check_parameters(&self, parms: Option<&[u8]>) -> CompanderResult<()> {
        let parms = parms.ok_or(CompanderError::MissingParameters(PixelMapCompander::NAME))?;
        let raw: [u8; 4] = parms.try_into().map_err(|_| {
            CompanderError::BadParameters(format!("expected 4 bytes, got {}", parms.len()))
        })?;
        let row_bytes = u32::from_be_bytes(raw);
        if row_bytes == 0 || row_bytes % 4 != 0 {
            return Err(CompanderError::BadParameters(format!(
                "row width {row_bytes} is not a positive multiple of 4"
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pss_compander::SIMPLE_COMPANDER;

    #[test]
    fn chunk_table_allocator_accepts_anything() {
        let a = ChunkTableAllocator;
        assert!(a.check_parameters(None).is_ok());
        assert!(a.check_parameters(Some(b"xyz")).is_ok());
        let registry = CompanderRegistry::default();
        assert_eq!(a.compander(&registry, SIMPLE_COMPANDER).unwrap().name(), SIMPLE_COMPANDER);
    }

    #[test]
    fn pixel_allocator_vets_row_width() {
        let a = PixelMapAllocator;
        assert!(matches!(
            a.check_parameters(None).unwrap_err(),
            CompanderError::MissingParameters(_)
        ));
        assert!(matches!(
            a.check_parameters(Some(&[0, 0, 0, 6])).unwrap_err(),
            CompanderError::BadParameters(_)
        ));
        assert!(a.check_parameters(Some(&[1, 2])).is_err());
        assert!(a.check_parameters(Some(&PixelMapCompander::parameters(64))).is_ok());
    }
}

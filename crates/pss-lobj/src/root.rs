use pss_store::{CachedReadStore, Store, StoreError, StoreResult};
use pss_types::{FourCc, PssId};

/// Signature written into a root once construction has completed.
pub const PAOK: FourCc = FourCc::new(b"paok");

/// Size of an encoded [`PackageRoot`].
pub const PACKAGE_ROOT_SIZE: usize = 20;

/// Size of an encoded [`LargeObjectRoot`].
pub const LARGE_OBJECT_ROOT_SIZE: usize = 32;

/// Object kind and attribute bits of a root record.
///
/// The low byte is the kind; bits 8 and 9 mark read-only and paged
/// (compressed) content. The upper half is reserved and must be zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct RootFlags(u32);

impl RootFlags {
    pub const KIND_MASK: u32 = 0x00FF;
    pub const KIND_PACKAGE: u32 = 1;
    pub const KIND_LARGE_OBJECT: u32 = 2;
    pub const READ_ONLY: u32 = 0x0100;
    pub const PAGED: u32 = 0x0200;

    const KNOWN: u32 = Self::KIND_MASK | Self::READ_ONLY | Self::PAGED;

    /// Flags for a paged large object.
    pub const fn large_object(read_only: bool) -> Self {
        let mut bits = Self::KIND_LARGE_OBJECT | Self::PAGED;
        if read_only {
            bits |= Self::READ_ONLY;
        }
        Self(bits)
    }

    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn kind(self) -> u32 {
        self.0 & Self::KIND_MASK
    }

    pub const fn is_read_only(self) -> bool {
        self.0 & Self::READ_ONLY != 0
    }

    pub const fn is_paged(self) -> bool {
        self.0 & Self::PAGED != 0
    }

    /// Whether only defined bits are set and the kind is one we store.
    pub const fn is_well_formed(self) -> bool {
        self.0 & !Self::KNOWN == 0
            && matches!(self.kind(), Self::KIND_PACKAGE | Self::KIND_LARGE_OBJECT)
    }
}

/// The common head of every package root.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PackageRoot {
    /// The chunk table.
    pub data_id: PssId,
    pub compander_name_id: PssId,
    /// Parameter blob, or [`NO_PSS_ID`](pss_types::NO_PSS_ID).
    pub compander_parms_id: PssId,
    pub flags: RootFlags,
    /// [`PAOK`] once valid, zero while under construction.
    pub signature: u32,
}

/// Root record of a large object: the package head plus its logical size.
///
/// Encoded as eight big-endian `u32` fields:
///
/// ```text
/// data_id | name_id | parms_id | flags | signature | actual_size | reserved1 | reserved2
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LargeObjectRoot {
    pub package: PackageRoot,
    pub actual_size: usize,
    pub reserved1: u32,
    pub reserved2: u32,
}

impl LargeObjectRoot {
    /// A root under construction (no signature yet).
    pub fn new(
        data_id: PssId,
        compander_name_id: PssId,
        compander_parms_id: PssId,
        read_only: bool,
        actual_size: usize,
    ) -> Self {
        Self {
            package: PackageRoot {
                data_id,
                compander_name_id,
                compander_parms_id,
                flags: RootFlags::large_object(read_only),
                signature: 0,
            },
            actual_size,
            reserved1: 0,
            reserved2: 0,
        }
    }

    pub fn is_signed(&self) -> bool {
        self.package.signature == PAOK.raw()
    }

    pub fn sign(&mut self) {
        self.package.signature = PAOK.raw();
    }

    pub fn is_read_only(&self) -> bool {
        self.package.flags.is_read_only()
    }

    pub fn to_bytes(&self) -> StoreResult<[u8; LARGE_OBJECT_ROOT_SIZE]> {
        let size = u32::try_from(self.actual_size).map_err(|_| {
            StoreError::BadPackage(format!("size {} does not fit a root", self.actual_size))
        })?;
        let p = &self.package;
        let fields = [
            p.data_id.get(),
            p.compander_name_id.get(),
            p.compander_parms_id.get(),
            p.flags.bits(),
            p.signature,
            size,
            self.reserved1,
            self.reserved2,
        ];
        let mut out = [0u8; LARGE_OBJECT_ROOT_SIZE];
        for (slot, field) in out.chunks_exact_mut(4).zip(fields) {
            slot.copy_from_slice(&field.to_be_bytes());
        }
        Ok(out)
    }

    /// Decode the root held in object `id`, signed or not.
    pub fn load(store: &dyn Store, id: PssId) -> StoreResult<Self> {
        let mut cache = CachedReadStore::open(store, id)?;
        if cache.size() != LARGE_OBJECT_ROOT_SIZE {
            return Err(StoreError::BadPackage(format!(
                "root {id} is {} bytes, expected {LARGE_OBJECT_ROOT_SIZE}",
                cache.size()
            )));
        }
        let mut field = |n: usize| cache.get_u32(n * 4);
        Ok(Self {
            package: PackageRoot {
                data_id: PssId::new(field(0)?),
                compander_name_id: PssId::new(field(1)?),
                compander_parms_id: PssId::new(field(2)?),
                flags: RootFlags::from_bits(field(3)?),
                signature: field(4)?,
            },
            actual_size: field(5)? as usize,
            reserved1: field(6)?,
            reserved2: field(7)?,
        })
    }

    /// Decode and validate a finished root: it must be signed and of a
    /// kind this engine stores.
    pub fn load_valid(store: &dyn Store, id: PssId) -> StoreResult<Self> {
        let root = Self::load(store, id)?;
        if !root.is_signed() {
            return Err(StoreError::BadPackage(format!("root {id} carries no signature")));
        }
        if !root.package.flags.is_well_formed() {
            return Err(StoreError::BadPackageVersion {
                expected: RootFlags::KIND_LARGE_OBJECT,
                found: root.package.flags.kind(),
            });
        }
        Ok(root)
    }

    /// The ids this root references, in creation order.
    pub fn referenced_ids(&self) -> impl Iterator<Item = PssId> {
        let p = self.package;
        [p.compander_name_id, p.compander_parms_id, p.data_id]
            .into_iter()
            .filter(|id| id.is_some())
    }
}

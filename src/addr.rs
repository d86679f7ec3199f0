//! Addresses in the snapshotted process.

use std::fmt;

use scroll::ctx::{SizeWith, TryFromCtx};
use scroll::Endian;

/// An address in the *snapshotted* process's virtual address space.
///
/// This is deliberately a distinct type from host pointers: a `MappedAddr`
/// means nothing until it is resolved through a
/// [`MemoryReader`](crate::MemoryReader), and most of them found in a
/// snapshot are garbage. The null address is 0.
#[derive(Copy, Clone, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MappedAddr(pub u64);

impl MappedAddr {
    /// The null address.
    pub const NULL: MappedAddr = MappedAddr(0);

    pub fn is_null(self) -> bool {
        self.0 == 0
    }

    /// The address `count` bytes past this one, wrapping on overflow.
    ///
    /// Wrapping matters: snapshots contain garbage values near the top of
    /// the address space, and arithmetic on them must not panic.
    pub fn offset_bytes(self, count: u64) -> MappedAddr {
        MappedAddr(self.0.wrapping_add(count))
    }

    /// Byte distance from this address up to `other`, wrapping on underflow.
    pub fn bytes_until(self, other: MappedAddr) -> u64 {
        other.0.wrapping_sub(self.0)
    }
}

impl fmt::Display for MappedAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for MappedAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "MappedAddr({:#x})", self.0)
    }
}

impl<'a> TryFromCtx<'a, Endian> for MappedAddr {
    type Error = scroll::Error;

    fn try_from_ctx(src: &'a [u8], ctx: Endian) -> Result<(Self, usize), Self::Error> {
        let (raw, size) = u64::try_from_ctx(src, ctx)?;
        Ok((MappedAddr(raw), size))
    }
}

impl SizeWith<Endian> for MappedAddr {
    fn size_with(_ctx: &Endian) -> usize {
        8
    }
}

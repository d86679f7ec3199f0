//! The region index: maps snapshot addresses to snapshot bytes.
//!
//! A snapshot is a set of non-overlapping regions of the target process's
//! address space, stored either as one file per region
//! (`mem.<hexstart>.<hexend>.bin` in a directory) or as a single bundle file
//! of `{ start_u64le, end_u64le, bytes }` frames. [`MemoryReader`] memory-maps
//! the files and answers bounds-checked reads against the mapped address
//! space. Every read in the crate goes through this type; nothing else
//! dereferences snapshot data.

use std::fmt;
use std::fs::File;
use std::io;
use std::io::Write;
use std::path::Path;

use failure::Fail;
use log::warn;
use memmap::Mmap;
use range_map::{Range, RangeMap};
use scroll::ctx::{SizeWith, TryFromCtx};
use scroll::{Endian, Pread, LE};

use crate::addr::MappedAddr;

/// Minimum number of bytes an address must cover to plausibly hold an
/// object header (refcount + type pointer).
pub const OBJ_MIN_SIZE: u64 = 16;

/// Errors from opening or reading a snapshot.
#[derive(Debug, Fail)]
pub enum Error {
    /// The requested range is not fully covered by a single region.
    #[fail(display = "address {} is not within any region", _0)]
    OutOfRange(MappedAddr),
    /// A host pointer that does not point into any mapped region.
    #[fail(display = "host address {:#x} is not within any region", _0)]
    HostOutOfRange(u64),
    /// A C string ran to the end of its region without a terminator.
    #[fail(display = "unterminated string at {}", _0)]
    UnterminatedString(MappedAddr),
    /// The bytes at an address did not parse as the requested structure.
    #[fail(display = "malformed structure at {}", _0)]
    ReadFailure(MappedAddr),
    /// The snapshot file itself is malformed.
    #[fail(display = "malformed snapshot: {}", _0)]
    Format(String),
    #[fail(display = "I/O error reading snapshot")]
    Io(#[fail(cause)] io::Error),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Error {
        Error::Io(err)
    }
}

/// Bytes backing one or more regions.
enum Backing {
    Mapped(Mmap),
    Owned(Vec<u8>),
}

impl Backing {
    fn bytes(&self) -> &[u8] {
        match self {
            Backing::Mapped(map) => &map[..],
            Backing::Owned(vec) => &vec[..],
        }
    }
}

/// One contiguous mapped range backed by snapshot bytes.
#[derive(Clone, Copy, Debug)]
struct Region {
    base: MappedAddr,
    size: u64,
    backing: usize,
    offset: usize,
}

/// Reads the regions of a memory snapshot.
pub struct MemoryReader {
    backings: Vec<Backing>,
    regions: Vec<Region>,
    by_mapped: RangeMap<u64, usize>,
    by_host: RangeMap<u64, usize>,
    total_bytes: u64,
}

impl fmt::Debug for MemoryReader {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MemoryReader")
            .field("regions", &self.regions.len())
            .field("total_bytes", &self.total_bytes)
            .finish()
    }
}

/// Parses `mem.<hexstart>.<hexend>.bin`, returning the address range.
fn parse_region_filename(name: &str) -> Option<(u64, u64)> {
    let tokens: Vec<&str> = name.split('.').collect();
    if tokens.len() != 4 || tokens[0] != "mem" || tokens[3] != "bin" {
        return None;
    }
    let start = u64::from_str_radix(tokens[1], 16).ok()?;
    let end = u64::from_str_radix(tokens[2], 16).ok()?;
    Some((start, end))
}

impl MemoryReader {
    /// Opens a snapshot from `path`: a directory of per-region files, or a
    /// single bundle file.
    ///
    /// Missing, zero-sized, or unmappable region files are logged and
    /// skipped; a torn bundle is an error.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<MemoryReader, Error> {
        let path = path.as_ref();
        let mut reader = MemoryReader {
            backings: vec![],
            regions: vec![],
            by_mapped: RangeMap::from_sorted_vec(vec![]),
            by_host: RangeMap::from_sorted_vec(vec![]),
            total_bytes: 0,
        };
        if path.is_dir() {
            for entry in path.read_dir()? {
                let entry = entry?;
                let filename = entry.file_name();
                let name = match filename.to_str() {
                    Some(name) => name,
                    None => continue,
                };
                let (start, end) = match parse_region_filename(name) {
                    Some(range) => range,
                    None => continue,
                };
                let map = match File::open(entry.path()).and_then(|f| unsafe { Mmap::map(&f) }) {
                    Ok(map) => map,
                    Err(err) => {
                        warn!("failed to map region file {}: {}", name, err);
                        continue;
                    }
                };
                let size = map.len() as u64;
                if size == 0 {
                    continue;
                }
                if end.wrapping_sub(start) != size {
                    warn!(
                        "region file {} is {:#x} bytes, name says {:#x}; skipping",
                        name,
                        size,
                        end.wrapping_sub(start)
                    );
                    continue;
                }
                let backing = reader.backings.len();
                reader.backings.push(Backing::Mapped(map));
                reader.regions.push(Region {
                    base: MappedAddr(start),
                    size,
                    backing,
                    offset: 0,
                });
            }
        } else {
            let file = File::open(path)?;
            // An empty bundle is a snapshot with no regions; mapping a
            // zero-length file would fail.
            if file.metadata()?.len() > 0 {
                let map = unsafe { Mmap::map(&file) }?;
                let backing = reader.backings.len();
                let regions = parse_bundle(&map[..], backing)?;
                reader.backings.push(Backing::Mapped(map));
                reader.regions.extend(regions);
            }
        }
        reader.build_index();
        Ok(reader)
    }

    /// Opens a bundle-form snapshot held in memory. Primarily useful for
    /// tests and for consumers that already read the bundle themselves.
    pub fn from_bundle_bytes(bytes: Vec<u8>) -> Result<MemoryReader, Error> {
        let mut reader = MemoryReader {
            backings: vec![],
            regions: vec![],
            by_mapped: RangeMap::from_sorted_vec(vec![]),
            by_host: RangeMap::from_sorted_vec(vec![]),
            total_bytes: 0,
        };
        let regions = parse_bundle(&bytes, 0)?;
        reader.backings.push(Backing::Owned(bytes));
        reader.regions.extend(regions);
        reader.build_index();
        Ok(reader)
    }

    /// Builds the two interval maps once all regions are collected.
    ///
    /// Inputs are sorted by base address, and an overlapping region is
    /// logged and dropped rather than allowed to corrupt the map: the
    /// `range-map` crate panics on overlapping input, and snapshot file
    /// names are untrusted.
    fn build_index(&mut self) {
        self.regions.sort_by_key(|region| region.base);
        let mut kept: Vec<Region> = Vec::with_capacity(self.regions.len());
        let mut mapped: Vec<(Range<u64>, usize)> = Vec::with_capacity(self.regions.len());
        for region in self.regions.drain(..) {
            if region.base.0.checked_add(region.size).is_none() {
                warn!(
                    "region at {} ({:#x} bytes) wraps the address space; skipping",
                    region.base, region.size
                );
                continue;
            }
            let last_end = kept
                .last()
                .map(|last| last.base.0 + last.size)
                .unwrap_or(0);
            if !kept.is_empty() && region.base.0 < last_end {
                warn!(
                    "region at {} ({:#x} bytes) overlaps a previous region; skipping",
                    region.base, region.size
                );
                continue;
            }
            mapped.push((
                Range::new(region.base.0, region.base.0 + region.size - 1),
                kept.len(),
            ));
            kept.push(region);
        }
        let mut host: Vec<(Range<u64>, usize)> = kept
            .iter()
            .enumerate()
            .map(|(index, region)| {
                let base = self.backings[region.backing].bytes().as_ptr() as u64
                    + region.offset as u64;
                (Range::new(base, base + region.size - 1), index)
            })
            .collect();
        host.sort_by_key(|entry| entry.0);
        self.total_bytes = kept.iter().map(|region| region.size).sum();
        self.regions = kept;
        self.by_mapped = RangeMap::from_sorted_vec(mapped);
        self.by_host = RangeMap::from_sorted_vec(host);
    }

    fn region_bytes(&self, index: usize) -> &[u8] {
        let region = &self.regions[index];
        &self.backings[region.backing].bytes()[region.offset..region.offset + region.size as usize]
    }

    fn region_index(&self, addr: MappedAddr) -> Result<usize, Error> {
        self.by_mapped
            .get(addr.0)
            .cloned()
            .ok_or(Error::OutOfRange(addr))
    }

    /// Total bytes across all regions.
    pub fn bytes(&self) -> u64 {
        self.total_bytes
    }

    /// Number of regions.
    pub fn region_count(&self) -> usize {
        self.regions.len()
    }

    /// Whether `addr` lies within some region.
    pub fn exists(&self, addr: MappedAddr) -> bool {
        self.by_mapped.get(addr.0).is_some()
    }

    /// Whether `[addr, addr + size)` is fully covered by a single region.
    ///
    /// A range straddling two adjacent regions fails even if both exist.
    pub fn exists_range(&self, addr: MappedAddr, size: u64) -> bool {
        match self.region_index(addr) {
            Ok(index) => {
                let region = &self.regions[index];
                let offset = region.base.bytes_until(addr);
                offset
                    .checked_add(size)
                    .map_or(false, |end| end <= region.size)
            }
            Err(_) => false,
        }
    }

    /// A bounds-checked, non-owning view of `size` bytes at `addr`.
    pub fn read(&self, addr: MappedAddr, size: u64) -> Result<&[u8], Error> {
        let index = self.region_index(addr)?;
        let region = &self.regions[index];
        let offset = region.base.bytes_until(addr);
        let end = offset
            .checked_add(size)
            .filter(|&end| end <= region.size)
            .ok_or(Error::OutOfRange(addr))?;
        Ok(&self.region_bytes(index)[offset as usize..end as usize])
    }

    /// Like [`read`](MemoryReader::read), extending to the end of the
    /// containing region.
    pub fn read_to_end(&self, addr: MappedAddr) -> Result<&[u8], Error> {
        let index = self.region_index(addr)?;
        let region = &self.regions[index];
        let offset = region.base.bytes_until(addr);
        Ok(&self.region_bytes(index)[offset as usize..])
    }

    /// The `(base, size)` of the region containing `addr`.
    pub fn region_for(&self, addr: MappedAddr) -> Result<(MappedAddr, u64), Error> {
        let index = self.region_index(addr)?;
        let region = &self.regions[index];
        Ok((region.base, region.size))
    }

    /// All regions as `(base, size)`, in ascending base order.
    pub fn all_regions<'a>(&'a self) -> impl Iterator<Item = (MappedAddr, u64)> + 'a {
        self.regions.iter().map(|region| (region.base, region.size))
    }

    /// The host address backing `addr`. Used as the identity of an object's
    /// projection (e.g. for cycle detection), never dereferenced directly.
    pub fn host_addr(&self, addr: MappedAddr) -> Result<u64, Error> {
        let index = self.region_index(addr)?;
        let region = &self.regions[index];
        Ok(self.region_bytes(index).as_ptr() as u64 + region.base.bytes_until(addr))
    }

    /// The inverse projection: the mapped address of a host pointer into one
    /// of the snapshot's mappings.
    pub fn host_to_mapped(&self, host: u64) -> Result<MappedAddr, Error> {
        let index = self
            .by_host
            .get(host)
            .cloned()
            .ok_or(Error::HostOutOfRange(host))?;
        let region = &self.regions[index];
        let base = self.region_bytes(index).as_ptr() as u64;
        Ok(region.base.offset_bytes(host - base))
    }

    /// Projects the structure `T` at `addr`, requiring that the whole
    /// structure lies within a single region.
    pub fn get<T>(&self, addr: MappedAddr) -> Result<T, Error>
    where
        T: SizeWith<Endian> + for<'b> TryFromCtx<'b, Endian, Error = scroll::Error>,
    {
        let size = T::size_with(&LE) as u64;
        let bytes = self.read(addr, size)?;
        bytes.pread_with(0, LE).map_err(|_| Error::ReadFailure(addr))
    }

    /// Projects `count` consecutive `T`s at `addr`.
    pub fn get_array<T>(&self, addr: MappedAddr, count: u64) -> Result<Vec<T>, Error>
    where
        T: SizeWith<Endian> + for<'b> TryFromCtx<'b, Endian, Error = scroll::Error>,
    {
        let item_size = T::size_with(&LE) as u64;
        let total = item_size
            .checked_mul(count)
            .ok_or(Error::OutOfRange(addr))?;
        let bytes = self.read(addr, total)?;
        let mut items = Vec::with_capacity(count as usize);
        let mut offset = 0;
        for _ in 0..count {
            items.push(
                bytes
                    .gread_with(&mut offset, LE)
                    .map_err(|_| Error::ReadFailure(addr))?,
            );
        }
        Ok(items)
    }

    /// Reads a NUL-terminated string at `addr`. The terminator must fall
    /// within the containing region.
    pub fn get_cstr(&self, addr: MappedAddr) -> Result<String, Error> {
        let bytes = self.read_to_end(addr)?;
        match bytes.iter().position(|&b| b == 0) {
            Some(len) => Ok(String::from_utf8_lossy(&bytes[..len]).into_owned()),
            None => Err(Error::UnterminatedString(addr)),
        }
    }

    /// Whether `addr` plausibly points at an object of at least `min_size`
    /// bytes: non-null and fully covered.
    pub fn obj_valid(&self, addr: MappedAddr, min_size: u64) -> bool {
        !addr.is_null() && self.exists_range(addr, min_size)
    }

    /// Like [`obj_valid`](MemoryReader::obj_valid), but null is accepted.
    pub fn obj_valid_or_null(&self, addr: MappedAddr, min_size: u64) -> bool {
        addr.is_null() || self.exists_range(addr, min_size)
    }
}

/// Walks a bundle's `{ start, end, bytes }` frames.
fn parse_bundle(bytes: &[u8], backing: usize) -> Result<Vec<Region>, Error> {
    let mut regions = vec![];
    let mut offset = 0usize;
    while offset < bytes.len() {
        let start: u64 = bytes
            .gread_with(&mut offset, LE)
            .map_err(|_| Error::Format("truncated bundle frame header".to_string()))?;
        let end: u64 = bytes
            .gread_with(&mut offset, LE)
            .map_err(|_| Error::Format("truncated bundle frame header".to_string()))?;
        let size = end
            .checked_sub(start)
            .ok_or_else(|| Error::Format(format!("bundle frame ends ({:#x}) before it starts ({:#x})", end, start)))?;
        if size as usize > bytes.len() - offset {
            return Err(Error::Format(format!(
                "bundle frame at {:#x} runs past the end of the file",
                start
            )));
        }
        if size > 0 {
            regions.push(Region {
                base: MappedAddr(start),
                size,
                backing,
                offset,
            });
        }
        offset += size as usize;
    }
    Ok(regions)
}

/// Writes regions in the bundle wire format; the inverse of opening a
/// bundle-form snapshot.
pub fn write_bundle<W: Write>(
    writer: &mut W,
    regions: &[(MappedAddr, Vec<u8>)],
) -> io::Result<()> {
    for (base, bytes) in regions {
        writer.write_all(&base.0.to_le_bytes())?;
        writer.write_all(&(base.0 + bytes.len() as u64).to_le_bytes())?;
        writer.write_all(bytes)?;
    }
    Ok(())
}

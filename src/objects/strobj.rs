//! String objects.
//!
//! A flags byte picks one of three layouts: ASCII-compact data trails the
//! short header, other compact data trails the longer header, and "general"
//! strings keep their data out of line. `length` counts code points, not
//! bytes.

use bitflags::bitflags;
use scroll::{Pread, SizeWith};

use crate::addr::MappedAddr;
use crate::env::{Environment, InvalidObject};
use crate::memory::Error;
use crate::objects::PyObjectHeader;
use crate::strings::{decode_ucs, escape_string_data, DecodedString};
use crate::traverse::Traversal;

/// Data offset for ASCII-compact strings.
pub const ASCII_DATA_OFFSET: u64 = 48;
/// Data offset for non-ASCII compact strings.
pub const COMPACT_DATA_OFFSET: u64 = 72;
/// Size of the general (out-of-line data) header.
pub const GENERAL_HEADER_SIZE: u64 = 80;

bitflags! {
    /// The top bits of the string flags byte; the low bits hold the
    /// character kind and intern state.
    pub struct StrFlags: u8 {
        const STATIC_ALLOC = 0x80;
        const ASCII = 0x40;
        const COMPACT = 0x20;
    }
}

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyAsciiStringObject {
    pub ob_base: PyObjectHeader,
    /// Code points, not bytes.
    pub length: u64,
    pub hash: u64,
    pub flags: u8,
    _pad1: u8,
    _pad2: u16,
    _pad3: u32,
    pub wstr: MappedAddr,
}

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyCompactStringObject {
    pub ascii: PyAsciiStringObject,
    pub utf8_length: u64,
    pub utf8: MappedAddr,
    pub wstr_length: u64,
}

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyGeneralStringObject {
    pub compact: PyCompactStringObject,
    pub data: MappedAddr,
}

impl PyAsciiStringObject {
    pub fn read(env: &Environment, addr: MappedAddr) -> Result<PyAsciiStringObject, Error> {
        env.reader.get(addr)
    }

    pub fn is_ascii(&self) -> bool {
        StrFlags::from_bits_truncate(self.flags).contains(StrFlags::ASCII)
    }

    pub fn is_compact(&self) -> bool {
        StrFlags::from_bits_truncate(self.flags).contains(StrFlags::COMPACT)
    }

    /// 1 = UCS1 (00-FF), 2 = UCS2 (0000-FFFF), 4 = UCS4 (any code point).
    pub fn char_kind(&self) -> u8 {
        (self.flags >> 2) & 7
    }

    /// 0 = not interned, 1 = interned, 2 = interned+immortal,
    /// 3 = interned+immortal+static.
    pub fn intern_state(&self) -> u8 {
        self.flags & 3
    }

    pub fn invalid_reason(&self, env: &Environment, addr: MappedAddr) -> Option<&'static str> {
        let r = &env.reader;
        if self.is_compact() && self.is_ascii() {
            if !r.exists_range(addr.offset_bytes(ASCII_DATA_OFFSET), self.length) {
                return Some("invalid_ascii_str_data");
            }
            return None;
        }
        let kind = self.char_kind();
        if kind != 1 && kind != 2 && kind != 4 {
            return Some("invalid_char_kind");
        }
        let payload = self.length.checked_mul(kind as u64);
        if self.is_compact() {
            let compact: PyCompactStringObject = match env.reader.get(addr) {
                Ok(compact) => compact,
                Err(_) => return Some("invalid_compact_str_data"),
            };
            if !r.obj_valid_or_null(compact.utf8, 1) {
                return Some("invalid_utf8");
            }
            match payload {
                Some(payload)
                    if r.exists_range(addr.offset_bytes(COMPACT_DATA_OFFSET), payload) => {}
                _ => return Some("invalid_compact_str_data"),
            }
            None
        } else {
            let general: PyGeneralStringObject = match env.reader.get(addr) {
                Ok(general) => general,
                Err(_) => return Some("invalid_general_str_data"),
            };
            match payload {
                Some(payload) if r.exists_range(general.data, payload) => {}
                _ => return Some("invalid_general_str_data"),
            }
            None
        }
    }
}

/// Decodes the string at `addr` to UTF-8 regardless of stored layout.
/// `max_len` bounds the output in bytes (0 = unlimited); cut-off source
/// bytes are reported in the result.
pub fn decode_string(
    env: &Environment,
    addr: MappedAddr,
    max_len: u64,
) -> Result<DecodedString, InvalidObject> {
    let obj = PyAsciiStringObject::read(env, addr)
        .map_err(|_| InvalidObject::new("invalid_addr"))?;
    if obj.length == 0 {
        return Ok(DecodedString {
            data: String::new(),
            excess_bytes: 0,
        });
    }

    if obj.is_compact() && obj.is_ascii() {
        let data = env
            .reader
            .read(addr.offset_bytes(ASCII_DATA_OFFSET), obj.length)
            .map_err(|_| InvalidObject::new("invalid_ascii_str_data"))?;
        let (shown, excess) = if max_len > 0 && data.len() as u64 > max_len {
            (&data[..max_len as usize], data.len() as u64 - max_len)
        } else {
            (data, 0)
        };
        return Ok(DecodedString {
            data: String::from_utf8_lossy(shown).into_owned(),
            excess_bytes: excess,
        });
    }

    let kind = obj.char_kind();
    let data_addr = if obj.is_compact() {
        addr.offset_bytes(COMPACT_DATA_OFFSET)
    } else {
        let general: PyGeneralStringObject = env
            .reader
            .get(addr)
            .map_err(|_| InvalidObject::new("invalid_general_str_data"))?;
        general.data
    };
    let payload = obj
        .length
        .checked_mul(kind as u64)
        .ok_or_else(|| InvalidObject::new("invalid_unicode_str_data"))?;
    let bytes = env
        .reader
        .read(data_addr, payload)
        .map_err(|_| InvalidObject::new("invalid_unicode_str_data"))?;
    decode_ucs(bytes, kind, max_len).map_err(|_| InvalidObject::new("invalid_unicode_str_data"))
}

/// Renders the string at `addr` as a quoted literal.
pub fn repr_string(t: &mut Traversal, addr: MappedAddr) -> String {
    match decode_string(t.env, addr, t.options.max_string_length) {
        Ok(decoded) => escape_string_data(decoded.data.as_bytes(), true, decoded.excess_bytes),
        Err(err) => t.fail("str", err.reason),
    }
}

//! Bytes objects: `ob_size` raw bytes inline after the header.

use scroll::{Pread, SizeWith};

use crate::addr::MappedAddr;
use crate::env::Environment;
use crate::memory::Error;
use crate::objects::PyVarObject;
use crate::strings::escape_string_data;
use crate::traverse::Traversal;

/// Offset of the inline data from the object start.
pub const BYTES_DATA_OFFSET: u64 = 32;

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyBytesObject {
    pub ob_base: PyVarObject,
    pub ob_shash: u64,
}

impl PyBytesObject {
    pub fn read(env: &Environment, addr: MappedAddr) -> Result<PyBytesObject, Error> {
        env.reader.get(addr)
    }

    pub fn len(&self) -> u64 {
        self.ob_base.ob_size.max(0) as u64
    }

    pub fn invalid_reason(&self, env: &Environment, addr: MappedAddr) -> Option<&'static str> {
        if self.ob_base.ob_size < 0 {
            return Some("invalid_size");
        }
        if !env
            .reader
            .exists_range(addr.offset_bytes(BYTES_DATA_OFFSET), self.len())
        {
            return Some("invalid_data");
        }
        None
    }

    /// The inline contents. Call only after a successful validation.
    pub fn contents<'r>(&self, env: &'r Environment, addr: MappedAddr) -> Result<&'r [u8], Error> {
        env.reader
            .read(addr.offset_bytes(BYTES_DATA_OFFSET), self.len())
    }

    pub fn repr(&self, t: &mut Traversal, addr: MappedAddr) -> String {
        let data = match self.contents(t.env, addr) {
            Ok(data) => data,
            Err(_) => return t.fail("bytes", "invalid_data"),
        };
        let limit = t.options.max_string_length;
        let (shown, excess) = if limit > 0 && data.len() as u64 > limit {
            (&data[..limit as usize], data.len() as u64 - limit)
        } else {
            (data, 0)
        };
        if t.options.bytes_as_hex {
            let hex: String = shown.iter().map(|b| format!("{:02X}", b)).collect();
            if excess > 0 {
                format!("bytes.fromhex('{}'...<{:#X} more bytes>)", hex, excess)
            } else {
                format!("bytes.fromhex('{}')", hex)
            }
        } else {
            escape_string_data(shown, false, excess)
        }
    }
}

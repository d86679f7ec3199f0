//! 3.14 integer objects: the digit count and sign live in a tag word
//! instead of `ob_size`.

use scroll::{Pread, SizeWith};

use crate::addr::MappedAddr;
use crate::env::Environment;
use crate::memory::Error;
use crate::objects::PyObjectHeader;
use crate::py310::int::format_digits;

/// Offset of the digit array from the object start.
pub const DIGITS_OFFSET: u64 = 24;

/// `lv_tag` sign bits: 1 = zero, 2 = negative.
pub const SIGN_ZERO: u8 = 1;
pub const SIGN_NEGATIVE: u8 = 2;

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyLongObject {
    pub ob_base: PyObjectHeader,
    pub lv_tag: u64,
}

impl PyLongObject {
    pub fn read(env: &Environment, addr: MappedAddr) -> Result<PyLongObject, Error> {
        env.reader.get(addr)
    }

    pub fn digit_count(&self) -> u64 {
        self.lv_tag >> 3
    }

    pub fn sign_tag(&self) -> u8 {
        (self.lv_tag & 3) as u8
    }

    pub fn is_zero(&self) -> bool {
        self.sign_tag() == SIGN_ZERO || self.digit_count() == 0
    }

    pub fn is_negative(&self) -> bool {
        self.sign_tag() == SIGN_NEGATIVE
    }

    pub fn invalid_reason(&self, env: &Environment, addr: MappedAddr) -> Option<&'static str> {
        if self.digit_count() == 0 {
            return None;
        }
        match self.digit_count().checked_mul(4) {
            Some(bytes) if env.reader.exists_range(addr.offset_bytes(DIGITS_OFFSET), bytes) => {
                None
            }
            _ => Some("invalid_digits"),
        }
    }

    pub fn digits(&self, env: &Environment, addr: MappedAddr) -> Result<Vec<u32>, Error> {
        env.reader
            .get_array(addr.offset_bytes(DIGITS_OFFSET), self.digit_count())
    }

    pub fn repr(&self, env: &Environment, addr: MappedAddr) -> String {
        if self.is_zero() {
            return "0".to_string();
        }
        let digits = match self.digits(env, addr) {
            Ok(digits) => digits,
            Err(_) => return "<int !invalid_digits>".to_string(),
        };
        format_digits(&digits, self.is_negative())
    }
}

/// 3.14 booleans are tagged integers with at most one digit.
#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyBoolObject {
    pub long: PyLongObject,
}

impl PyBoolObject {
    pub fn read(env: &Environment, addr: MappedAddr) -> Result<PyBoolObject, Error> {
        env.reader.get(addr)
    }

    pub fn invalid_reason(&self, env: &Environment, addr: MappedAddr) -> Option<&'static str> {
        if self.long.digit_count() > 1 {
            return Some("invalid_size");
        }
        self.long.invalid_reason(env, addr)
    }

    pub fn repr(&self) -> String {
        if self.long.is_zero() {
            "False".to_string()
        } else {
            "True".to_string()
        }
    }
}

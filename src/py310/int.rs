//! 3.10 integer objects: sign-and-magnitude in 30-bit digits, with the
//! sign carried by `ob_size`.

use scroll::{Pread, SizeWith};

use crate::addr::MappedAddr;
use crate::env::Environment;
use crate::memory::Error;
use crate::objects::PyVarObject;

/// Offset of the digit array from the object start.
pub const DIGITS_OFFSET: u64 = 24;

/// Value bits per digit.
pub const DIGIT_MASK: u32 = 0x3fff_ffff;

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyLongObject {
    pub ob_base: PyVarObject,
}

impl PyLongObject {
    pub fn read(env: &Environment, addr: MappedAddr) -> Result<PyLongObject, Error> {
        env.reader.get(addr)
    }

    pub fn digit_count(&self) -> u64 {
        self.ob_base.ob_size.checked_abs().map(|n| n as u64).unwrap_or(u64::max_value())
    }

    pub fn is_negative(&self) -> bool {
        self.ob_base.ob_size < 0
    }

    pub fn invalid_reason(&self, env: &Environment, addr: MappedAddr) -> Option<&'static str> {
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
        let digits = match self.digits(env, addr) {
            Ok(digits) => digits,
            Err(_) => return "<int !invalid_digits>".to_string(),
        };
        format_digits(&digits, self.is_negative())
    }
}

/// Decimal-renders a digit array when it fits a machine word, otherwise a
/// raw `<int ± XXXXXXXX ...>` dump.
pub fn format_digits(digits: &[u32], is_negative: bool) -> String {
    match digits.len() {
        0 => return "0".to_string(),
        1 => {
            let value = (digits[0] & DIGIT_MASK) as i64;
            return format!("{}", if is_negative { -value } else { value });
        }
        2 => {
            let value =
                (digits[0] & DIGIT_MASK) as i64 | (((digits[1] & DIGIT_MASK) as i64) << 30);
            return format!("{}", if is_negative { -value } else { value });
        }
        3 => {
            let low =
                (digits[0] & DIGIT_MASK) as u64 | (((digits[1] & DIGIT_MASK) as u64) << 30);
            let high = digits[2];
            if high & 0xffff_fff8 == 0 {
                let value = (low | (high as u64) << 60) as i64;
                return format!("{}", if is_negative { -value } else { value });
            }
            if high & 0xffff_fff0 == 0 && !is_negative {
                return format!("{}", low | (high as u64) << 60);
            }
        }
        _ => {}
    }
    let mut out = format!("<int {}", if is_negative { "-" } else { "+" });
    for digit in digits {
        out.push_str(&format!(" {:08X}", digit));
    }
    out.push('>');
    out
}

/// 3.10 booleans are integers with at most one digit.
#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyBoolObject {
    pub long: PyLongObject,
}

impl PyBoolObject {
    pub fn read(env: &Environment, addr: MappedAddr) -> Result<PyBoolObject, Error> {
        env.reader.get(addr)
    }

    pub fn invalid_reason(&self, env: &Environment, addr: MappedAddr) -> Option<&'static str> {
        if self.long.ob_base.ob_size > 1 {
            return Some("invalid_size");
        }
        self.long.invalid_reason(env, addr)
    }

    pub fn repr(&self) -> String {
        if self.long.ob_base.ob_size != 0 {
            "True".to_string()
        } else {
            "False".to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::PyVersion;
    use crate::synth::{long_object_310, PyWorld};

    fn world_with_long(ob_size: i64, digits: &[u32]) -> (Environment, MappedAddr) {
        let mut world = PyWorld::new(0x1000);
        let int_type = world.add_type("int");
        let addr = world.world.place(long_object_310(int_type, ob_size, digits));
        (world.env(PyVersion::Py310), MappedAddr(addr))
    }

    #[test]
    fn test_small_values() {
        let (env, addr) = world_with_long(1, &[42]);
        let long = PyLongObject::read(&env, addr).unwrap();
        assert_eq!(long.invalid_reason(&env, addr), None);
        assert_eq!(long.repr(&env, addr), "42");

        let (env, addr) = world_with_long(-1, &[42]);
        let long = PyLongObject::read(&env, addr).unwrap();
        assert_eq!(long.repr(&env, addr), "-42");

        let (env, addr) = world_with_long(0, &[]);
        let long = PyLongObject::read(&env, addr).unwrap();
        assert_eq!(long.repr(&env, addr), "0");
    }

    #[test]
    fn test_two_digits() {
        // 1 << 30 needs two digits.
        let (env, addr) = world_with_long(2, &[0, 1]);
        let long = PyLongObject::read(&env, addr).unwrap();
        assert_eq!(long.repr(&env, addr), format!("{}", 1u64 << 30));
    }

    #[test]
    fn test_three_digits() {
        // i64::MAX = (2^63 - 1): digits 0x3FFFFFFF, 0x3FFFFFFF, 0x7.
        let (env, addr) = world_with_long(3, &[0x3fff_ffff, 0x3fff_ffff, 0x7]);
        let long = PyLongObject::read(&env, addr).unwrap();
        assert_eq!(long.repr(&env, addr), format!("{}", i64::max_value()));
        // u64::MAX fits unsigned but not signed.
        let (env, addr) = world_with_long(3, &[0x3fff_ffff, 0x3fff_ffff, 0xf]);
        let long = PyLongObject::read(&env, addr).unwrap();
        assert_eq!(long.repr(&env, addr), format!("{}", u64::max_value()));
    }

    #[test]
    fn test_huge_value_raw_dump() {
        let (env, addr) = world_with_long(4, &[1, 2, 3, 4]);
        let long = PyLongObject::read(&env, addr).unwrap();
        assert_eq!(
            long.repr(&env, addr),
            "<int + 00000001 00000002 00000003 00000004>"
        );
    }

    #[test]
    fn test_truncated_digits() {
        let (env, addr) = world_with_long(0x100, &[1]);
        let long = PyLongObject::read(&env, addr).unwrap();
        assert_eq!(long.invalid_reason(&env, addr), Some("invalid_digits"));
    }

    #[test]
    fn test_bool() {
        let mut world = PyWorld::new(0x1000);
        let bool_type = world.add_type("bool");
        let true_addr = world.world.place(long_object_310(bool_type, 1, &[1]));
        let false_addr = world.world.place(long_object_310(bool_type, 0, &[]));
        let fat_addr = world.world.place(long_object_310(bool_type, 2, &[1, 1]));
        let env = world.env(PyVersion::Py310);
        let t = PyBoolObject::read(&env, MappedAddr(true_addr)).unwrap();
        assert_eq!(t.invalid_reason(&env, MappedAddr(true_addr)), None);
        assert_eq!(t.repr(), "True");
        let f = PyBoolObject::read(&env, MappedAddr(false_addr)).unwrap();
        assert_eq!(f.repr(), "False");
        let fat = PyBoolObject::read(&env, MappedAddr(fat_addr)).unwrap();
        assert_eq!(
            fat.invalid_reason(&env, MappedAddr(fat_addr)),
            Some("invalid_size")
        );
    }
}

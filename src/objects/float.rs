//! Float objects: an IEEE-754 double after the header.

use scroll::{Pread, SizeWith};

use crate::objects::PyObjectHeader;
use crate::traverse::Traversal;

#[derive(Clone, Copy, Debug, Pread, SizeWith)]
pub struct PyFloatObject {
    pub ob_base: PyObjectHeader,
    pub ob_fval: f64,
}

impl PyFloatObject {
    pub fn repr(&self, _t: &mut Traversal) -> String {
        format_g(self.ob_fval)
    }
}

/// `printf`-`%g`-style rendering: six significant digits, trailing zeros
/// trimmed, exponential notation when the decimal exponent falls outside
/// `[-4, 6)`.
fn format_g(value: f64) -> String {
    if value.is_nan() {
        return "nan".to_string();
    }
    if value.is_infinite() {
        return if value < 0.0 { "-inf" } else { "inf" }.to_string();
    }
    if value == 0.0 {
        return if value.is_sign_negative() { "-0" } else { "0" }.to_string();
    }
    let negative = value < 0.0;
    // Six significant digits, pre-rounded.
    let rounded = format!("{:.5e}", value.abs());
    let split = rounded.find('e').unwrap();
    let exponent: i32 = rounded[split + 1..].parse().unwrap();
    let digits: String = rounded[..split]
        .chars()
        .filter(|ch| ch.is_ascii_digit())
        .collect();
    let mut out = if exponent >= -4 && exponent < 6 {
        let mut fixed = String::new();
        if exponent >= 0 {
            let point = exponent as usize + 1;
            fixed.push_str(&digits[..point]);
            let frac = digits[point..].trim_end_matches('0');
            if !frac.is_empty() {
                fixed.push('.');
                fixed.push_str(frac);
            }
        } else {
            fixed.push_str("0.");
            for _ in 0..(-exponent - 1) {
                fixed.push('0');
            }
            fixed.push_str(digits.trim_end_matches('0'));
        }
        fixed
    } else {
        let frac = digits[1..].trim_end_matches('0');
        let mantissa = if frac.is_empty() {
            digits[..1].to_string()
        } else {
            format!("{}.{}", &digits[..1], frac)
        };
        format!(
            "{}e{}{:02}",
            mantissa,
            if exponent < 0 { '-' } else { '+' },
            exponent.abs()
        )
    };
    if negative {
        out.insert(0, '-');
    }
    out
}

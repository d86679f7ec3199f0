//! The compact line-number table of code objects.
//!
//! The table is a stream of `(byte_delta: u8, line_delta: i8)` records over
//! bytecode offsets. A line delta of 0 extends the current span without
//! advancing the line; `-0x80` marks a span with no line information.

/// The line delta marking "no line for this span".
const NO_LINE: i8 = -0x80;

/// Resolves a code offset to a source line.
///
/// Walks spans until `code_offset` falls into one that carries a line and
/// returns the accumulated line number, starting at `first_lineno`.
/// Returns 0 when the stream ends without covering the offset.
pub fn line_for_code_offset(table: &[u8], first_lineno: i64, code_offset: u64) -> i64 {
    let mut line = first_lineno;
    let mut start: u64 = 0;
    let mut end: u64 = 0;
    let mut records = table.chunks_exact(2);
    while let Some(record) = records.next() {
        let byte_delta = record[0] as u64;
        let line_delta = record[1] as i8;
        if line_delta == 0 {
            end += byte_delta;
            if code_offset >= start && code_offset < end {
                return line;
            }
            continue;
        }
        start = end;
        end = start + byte_delta;
        if line_delta == NO_LINE {
            continue;
        }
        line += line_delta as i64;
        if start == end {
            continue;
        }
        if code_offset >= start && code_offset < end {
            return line;
        }
    }
    0
}
